pub mod backend;
pub mod error;
pub mod format;
pub mod images;
pub mod jitter;
pub mod nvbufsurface;
pub mod pool;
pub mod presentation;
pub mod queue;
pub mod render;
pub mod sink;
pub mod upload;

pub use error::{CudaError, RenderError};
pub use format::{Platform, UploadStrategy};
pub use presentation::{FrameEvent, Presentation};
pub use queue::{FlowResult, ThreadPhase, WorkItem};
pub use render::RenderSettings;
pub use sink::{Lifecycle, RenderSink};

#[cfg(test)]
mod tests;
