use crate::runner::CollectionRunner;
use crate::scheduler::{ScheduleDispatcher, ScheduleRegistry};
use crate::storage::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub registry: ScheduleRegistry,
    pub dispatcher: ScheduleDispatcher,
    pub runner: CollectionRunner,
}
