pub mod config;
pub mod error;
pub mod retry;
pub mod time;
pub mod types;

pub use config::ClusterConfig;
pub use error::{LogicalError, SynodError, SynodResult};
pub use retry::{exponential_backoff, RetryPolicy};
pub use types::{ClientId, QueueHandle, ServerIndex, COMPLETED_MARKER};
