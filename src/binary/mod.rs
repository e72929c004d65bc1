//! Compiled database format.
//!
//! The database is a single self-describing stream of big-endian fields:
//!
//! ```text
//! +---------------------+
//! |       HEADER        |  magic, version, build timestamp (14 bytes)
//! +---------------------+
//! |    STRING TABLE     |  count + length-prefixed strings
//! +---------------------+
//! |   LOCATION TABLE    |  count + 16-byte records
//! +---------------------+
//! |   INTERVAL TABLE    |  count + 6-byte (start, location id) entries
//! +---------------------+
//! ```
//!
//! Interval ends are implicit: each interval runs up to the next start
//! minus one, and the last runs to 255.255.255.255.

mod format;
mod reader;
pub mod writer;


pub use format::*;
pub use reader::read_tables;
pub use writer::DatabaseWriter;
