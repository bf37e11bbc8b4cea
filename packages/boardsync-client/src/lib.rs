pub mod api;
pub mod config;
pub mod connection;
pub mod logging;
pub mod reconciler;

pub use api::{ApiError, CommandApi, HttpCommandApi};
pub use connection::{ConnectionError, ConnectionManager, ConnectionPhase, ReconnectPolicy};
pub use reconciler::{MoveOutcome, ReconcileError, Reconciler};
