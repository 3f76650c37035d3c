pub mod command_types;
pub mod config;
pub mod types;

pub use command_types::{NamespaceError, kinds, validate_namespace};
pub use config::AgentConfig;
pub use types::*;
