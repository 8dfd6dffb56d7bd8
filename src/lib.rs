pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod logger;
pub mod stage;
pub mod vm;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{FillyError, FillyResult};
pub use logger::{LogMessage, Logger, Severity};
