//! # sase-api
//!
//! REST backend serving the lookup editor and the SOAR export admin UI.
//! Every handler answers transport-level 200 with a `{payload, status}`
//! envelope; the `status` field carries the outcome the UI switches on.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{ApiServer, ApiServerConfig};
pub use state::AppState;
