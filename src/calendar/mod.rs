pub mod calendar_list;

pub use calendar_list::{AccessRole, CalendarListEntry};
