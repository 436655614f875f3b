pub mod benchmark;
pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod env;
pub mod scheduler;
pub mod status;
pub mod work;

#[cfg(test)]
mod test_helpers;

// Re-export the host surface
pub use context::{AsyncContext, CallbackOutcome};
pub use env::Env;
pub use status::{BridgeError, LastError, Result, Status};
pub use work::{AsyncWork, CompleteCallback, ExecuteCallback};

// Re-export configuration for embedders
pub use config::{Config, ConfigBuilder, PoolConfig};
