use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::domain::{Capabilities, Parameters, RenderOptions, RenderResult};

use super::error::EngineError;

/// The single render channel shared by the live preview driver and the batch
/// queue. [`EngineGateway`](super::EngineGateway) is the production
/// implementation; tests substitute fakes.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn render(
        &self,
        scad_source: String,
        parameters: Parameters,
        options: RenderOptions,
    ) -> Result<RenderResult, EngineError>;

    /// Reject the in-flight render, if any, and ask the engine to stop it.
    fn cancel(&self);

    fn is_busy(&self) -> bool;

    fn capabilities(&self) -> Capabilities;
}

/// Poll `engine` until it reports idle.
pub async fn wait_until_idle<E>(engine: &E, poll_interval: Duration)
where
    E: RenderEngine + ?Sized,
{
    while engine.is_busy() {
        sleep(poll_interval).await;
    }
}
