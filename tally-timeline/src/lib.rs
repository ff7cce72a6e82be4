// tally-timeline: Offline merge of stored history
//
// Loads every stored slot of one object into an ordered timeline, lets a
// pattern fold small intervals into larger ones, and plans the resulting
// column mutation.

pub mod days_months;
pub mod driver;
pub mod dump;
pub mod error;
pub mod patterns;
pub mod timeline;

pub use days_months::DaysMonths;
pub use driver::{merge_row, merge_rows, MergeStats};
pub use error::{TimelineError, TimelineResult};
pub use patterns::{resolve_pattern, TimelinePattern};
pub use timeline::{Mutation, Timeline};
