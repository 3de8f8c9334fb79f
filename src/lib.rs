pub mod config;
pub mod error;
pub mod logging;
pub mod payload;
pub mod pipeline;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use config::{ClientConfig, ToolConfig};
pub use error::{ClientError, Result};
pub use pipeline::{Pipeline, RunSummary};
