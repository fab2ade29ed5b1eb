//! Health endpoint and shutdown control.

pub mod handlers;
pub mod module;
pub mod shutdown;

pub use handlers::AppState;
pub use module::HealthServer;
pub use shutdown::*;
