//! Compiled database writer.

use std::io::Write;

use super::format::*;
use crate::codec;
use crate::Result;

/// Compiled database writer.
///
/// Serializes [`DatabaseTables`] into the on-disk layout:
///
/// ```text
/// magic(u64) | version(u16) | timestamp(u32)
/// string count(u32)   | { length(u8) bytes }*
/// location count(u32) | { lat(i32) lon(i32) cc(u16) country(u16) region(u16) city(u16) }*
/// interval count(u32) | { start(u32) location id(u16) }*
/// ```
///
/// All integers are big-endian. The writer trusts its input; tables coming
/// from [`crate::compiler::CensusCompiler`] already satisfy every limit.
pub struct DatabaseWriter {
    buffer: Vec<u8>,
}

impl DatabaseWriter {
    /// Create a new writer.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024 * 1024), // 1MB initial
        }
    }

    /// Serialize the tables into a byte vector.
    pub fn write(&mut self, tables: &DatabaseTables) -> Result<Vec<u8>> {
        self.buffer.clear();

        let header = DatabaseHeader::new(tables.timestamp);
        codec::write_u64(&mut self.buffer, header.magic)?;
        codec::write_u16(&mut self.buffer, header.version)?;
        codec::write_u32(&mut self.buffer, header.timestamp)?;

        self.write_strings(tables)?;
        self.write_locations(tables)?;
        self.write_intervals(tables)?;

        Ok(std::mem::take(&mut self.buffer))
    }

    /// Serialize the tables straight into `out`.
    pub fn write_to<W: Write>(&mut self, tables: &DatabaseTables, out: &mut W) -> Result<()> {
        let data = self.write(tables)?;
        out.write_all(&data)?;
        out.flush()?;
        Ok(())
    }

    fn write_strings(&mut self, tables: &DatabaseTables) -> Result<()> {
        codec::write_u32(&mut self.buffer, tables.strings.len() as u32)?;
        for string in &tables.strings {
            debug_assert!(string.len() <= MAX_STRING_LEN);
            codec::write_u8(&mut self.buffer, string.len() as u8)?;
            self.buffer.extend_from_slice(string.as_bytes());
        }
        Ok(())
    }

    fn write_locations(&mut self, tables: &DatabaseTables) -> Result<()> {
        codec::write_u32(&mut self.buffer, tables.locations.len() as u32)?;
        self.buffer
            .reserve(tables.locations.len() * LOCATION_RECORD_SIZE);
        for location in &tables.locations {
            codec::write_i32(&mut self.buffer, location.latitude)?;
            codec::write_i32(&mut self.buffer, location.longitude)?;
            for (_, id) in location.string_ids() {
                codec::write_u16(&mut self.buffer, id)?;
            }
        }
        Ok(())
    }

    fn write_intervals(&mut self, tables: &DatabaseTables) -> Result<()> {
        codec::write_u32(&mut self.buffer, tables.intervals.len() as u32)?;
        self.buffer
            .reserve(tables.intervals.len() * INTERVAL_RECORD_SIZE);
        for interval in &tables.intervals {
            codec::write_u32(&mut self.buffer, interval.start)?;
            codec::write_u16(&mut self.buffer, interval.location_id)?;
        }
        Ok(())
    }
}

impl Default for DatabaseWriter {
    fn default() -> Self {
        Self::new()
    }
}
