//! Connection records and their spreadsheet persistence.

pub mod store;
pub mod xlsx;

pub use store::{Connection, RecordError, RecordStore, COLUMNS};
