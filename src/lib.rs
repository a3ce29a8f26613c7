pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod store;
pub mod tokens;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use context::{FullContext, SmartContext};
pub use error::{ContextError, Result};
pub use store::ContextStore;
