//! Schedule-to-execution wiring: trigger registry, fire dispatcher, and the
//! poll/reaper loops.

pub mod dispatcher;
pub mod registry;
pub mod sweep;

pub use dispatcher::{FireOutcome, ScheduleDispatcher};
pub use registry::ScheduleRegistry;
