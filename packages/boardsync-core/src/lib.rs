pub mod board_state;
pub mod dispatcher;
pub mod event;
pub mod filter;
pub mod moves;
pub mod types;
pub mod workload;

pub use board_state::{BoardState, MoveStart, Reaction, Rollback, StateError};
pub use dispatcher::{EventDispatcher, HandlerId};
pub use event::{BoardEvent, EventKind, PushEnvelope};
pub use moves::{MoveRejected, MoveRequest};
