//! Domain module - core data types of the extraction run
//!
//! Pure data: no I/O, no async. Every other layer builds on these.

pub mod category;
pub mod product;
pub mod session;
pub mod summary;
pub mod value_objects;
pub mod work_item;

pub use category::Category;
pub use product::{NormalizedRecord, ObservationOrigin, RawRecord};
pub use session::Session;
pub use summary::{CategoryStatus, CategorySummary, FieldCompleteness, RunStatus, RunSummary};
pub use value_objects::{CategoryRef, IdentityKey, TaskId};
pub use work_item::{WorkItem, WorkKind};
