//! Preview mesh cache owned by the live preview driver.
//!
//! ```toml
//! [preview]
//! cache_capacity = 10
//! ```

mod config;
mod store;

pub use config::PreviewCacheConfig;
pub use store::{PreviewCache, PreviewCacheEntry};
