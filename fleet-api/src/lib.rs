pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use auth::{canonicalize, RequestAuthenticator, SignatureHeaders};
pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_app;
pub use state::AppState;
