pub mod config;
pub mod delivery;
pub mod http_server;
pub mod process;
pub mod state;

pub use config::Config;
pub use delivery::HttpDeliverer;
pub use http_server::api::client::{ApiError, ApiRequest, CustodianClient};
pub use process::{spawn_service, start_service, ShutdownHandle};
pub use state::{State, StateError};
