//! Live preview driver: debounced, cached, state-tracked preview renders.

mod driver;
mod error;
mod presenter;
mod state;

pub use driver::{LivePreviewDriver, PreviewConfig};
pub use error::{PresentError, PreviewError};
pub use presenter::{DiscardPresenter, PreviewPresenter};
pub use state::{PreviewFrame, PreviewState};
