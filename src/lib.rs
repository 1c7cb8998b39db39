//! Render orchestration core for parametric solid models.
//!
//! [`engine::EngineGateway`] owns the single connection to the rendering
//! engine. [`application::preview::LivePreviewDriver`] turns parameter edits
//! into debounced, cached preview renders, and
//! [`application::queue::BatchRenderQueue`] drains named export jobs one at a
//! time. Both consume the gateway through the [`engine::RenderEngine`] trait.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod infra;
pub mod util;
