pub mod calendar;
pub mod subscription;
pub mod storage;

pub use calendar::CalendarListEntry;
pub use subscription::{BatchMode, BatchOrchestrator, BatchResult, CredentialTemplate, Scope};
