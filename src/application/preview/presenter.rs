use super::error::PresentError;
use super::state::PreviewFrame;

/// Where finished preview meshes go.
///
/// A failure while presenting a cached frame evicts that entry and the driver
/// falls back to a fresh render.
pub trait PreviewPresenter: Send + Sync {
    fn present(&self, frame: &PreviewFrame) -> Result<(), PresentError>;
}

impl<F> PreviewPresenter for F
where
    F: Fn(&PreviewFrame) -> Result<(), PresentError> + Send + Sync,
{
    fn present(&self, frame: &PreviewFrame) -> Result<(), PresentError> {
        self(frame)
    }
}

/// Accepts every frame and drops it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardPresenter;

impl PreviewPresenter for DiscardPresenter {
    fn present(&self, _frame: &PreviewFrame) -> Result<(), PresentError> {
        Ok(())
    }
}
