//! Session state: the shared store and the tasks that watch it.

pub mod store;
pub mod summary;
pub mod sweeper;

pub use store::SessionStore;
pub use summary::{spawn_summary_logger, SessionSummary};
pub use sweeper::{spawn_sweeper, SweepPolicy};
