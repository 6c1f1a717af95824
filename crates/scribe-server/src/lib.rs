pub mod config;
pub mod connection;
pub mod manager;
pub mod protocol;
pub mod server;
pub mod worker;

pub use config::{load_config, ConfigError, ProviderKind, ScribeConfig, ServerSettings};
pub use manager::{ConnectionManager, SessionState};
pub use protocol::{Action, Outbound, ProtocolError};
pub use server::{build_router, start, AppState, ServerHandle};
