//! HTTP API layer: routes, handlers, state, and errors.

pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod state;
pub mod stream;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
