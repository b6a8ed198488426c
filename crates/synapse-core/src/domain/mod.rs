//! Domain model for the change-delivery pipeline.

pub mod change;
pub mod error;
pub mod intent;
pub mod rendered;
pub mod run;

pub use change::ChangeRequest;
pub use error::{PipelineError, Result, Retryable};
pub use intent::{strip_prefix_len, BgpSessionIntent, DeviceIntent, InterfaceIntent, VersionedIntent};
pub use rendered::RenderedConfig;
pub use run::PipelineRun;
