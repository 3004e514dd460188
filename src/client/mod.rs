//! High-level client API: protocol client, configuration and dispatcher builder

pub mod agent;
pub mod builder;
pub mod config;

pub use agent::{ProtocolClient, ServiceStack};
pub use builder::DispatcherBuilder;
pub use config::DispatchConfig;
