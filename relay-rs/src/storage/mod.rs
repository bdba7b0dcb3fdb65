//! Message persistence
//!
//! - [`file`]: one `.eml` file per accepted message in a flat directory

pub mod file;

pub use file::{message_file_name, FileSaver};
