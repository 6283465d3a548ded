pub mod service;
pub mod store;
pub mod types;

pub use service::{LiveJob, Scheduler, TickReport};
pub use store::{FileTaskStore, StoreError, TaskStore};
pub use types::{OneTimeTask, RawSchedule, RawScheduleRecord, ScheduleSpec};
