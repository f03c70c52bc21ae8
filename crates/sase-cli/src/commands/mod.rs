//! Command implementations.

mod forward;
mod retry;
mod serve;

pub use forward::{run_forward, ForwardConfig};
pub use retry::run_retry;
pub use serve::{run_server, ServeConfig};
