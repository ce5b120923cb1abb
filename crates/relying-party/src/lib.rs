pub mod config;
pub mod http_server;
pub mod state;

pub use config::Config;
pub use state::{State, StateError};
