//! Compiled database reader.
//!
//! The input is treated as untrusted: every count is checked against its
//! hard cap before anything is allocated, every embedded index is checked
//! against the table it points into, and the interval table must start at
//! address 0 and increase strictly so that lookups are total.

use std::io::Read;

use super::format::*;
use crate::codec;
use crate::error::LoadError;

/// Upper bound on speculative preallocation driven by embedded counts.
const PREALLOC_LIMIT: usize = 64 * 1024;

/// Decode and validate all tables from `input`.
///
/// The whole stream must be consumed: bytes after the interval table are
/// rejected. On error every partially decoded table is dropped.
pub fn read_tables<R: Read>(input: &mut R) -> Result<DatabaseTables, LoadError> {
    let header = read_header(input)?;
    header.validate()?;

    let strings = read_strings(input)?;
    let locations = read_locations(input, strings.len())?;
    let intervals = read_intervals(input, locations.len())?;

    let mut probe = [0u8; 1];
    loop {
        match input.read(&mut probe) {
            Ok(0) => break,
            Ok(_) => return Err(LoadError::TrailingData),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(LoadError::Io(e)),
        }
    }

    Ok(DatabaseTables {
        timestamp: header.timestamp,
        strings,
        locations,
        intervals,
    })
}

fn read_header<R: Read>(input: &mut R) -> Result<DatabaseHeader, LoadError> {
    let magic = codec::read_u64(input).map_err(|e| LoadError::from_read("64 bit header", e))?;
    if magic != MAGIC {
        return Err(LoadError::InvalidMagic(magic));
    }
    let version =
        codec::read_u16(input).map_err(|e| LoadError::from_read("16 bit version number", e))?;
    let timestamp =
        codec::read_u32(input).map_err(|e| LoadError::from_read("32 bit timestamp", e))?;
    Ok(DatabaseHeader {
        magic,
        version,
        timestamp,
    })
}

fn read_strings<R: Read>(input: &mut R) -> Result<Vec<String>, LoadError> {
    let count = codec::read_u32(input)
        .map_err(|e| LoadError::from_read("32 bit string table size", e))?;
    if count as usize > MAX_STRINGS {
        return Err(LoadError::StringTableTooLarge(count));
    }

    let mut strings = Vec::with_capacity((count as usize).min(PREALLOC_LIMIT));
    let mut buf = [0u8; MAX_STRING_LEN];
    for index in 0..count {
        let len = codec::read_u8(input)
            .map_err(|e| LoadError::from_read("8 bit length of string", e))?
            as usize;
        input
            .read_exact(&mut buf[..len])
            .map_err(|e| LoadError::from_read("string", e))?;
        let string = std::str::from_utf8(&buf[..len])
            .map_err(|_| LoadError::InvalidString { index })?;
        strings.push(string.to_string());
    }
    Ok(strings)
}

fn read_locations<R: Read>(
    input: &mut R,
    string_count: usize,
) -> Result<Vec<LocationRecord>, LoadError> {
    let count = codec::read_u32(input)
        .map_err(|e| LoadError::from_read("32 bit location table size", e))?;
    if count as usize > MAX_LOCATIONS {
        return Err(LoadError::LocationTableTooLarge(count));
    }

    let mut locations = Vec::with_capacity((count as usize).min(PREALLOC_LIMIT));
    for location in 0..count {
        let latitude =
            codec::read_i32(input).map_err(|e| LoadError::from_read("latitude", e))?;
        let longitude =
            codec::read_i32(input).map_err(|e| LoadError::from_read("longitude", e))?;

        let mut ids = [0u16; 4];
        for id in ids.iter_mut() {
            *id = codec::read_u16(input)
                .map_err(|e| LoadError::from_read("location string index", e))?;
        }

        let record = LocationRecord {
            latitude,
            longitude,
            country_code: ids[0],
            country: ids[1],
            region: ids[2],
            city: ids[3],
        };
        validate_location(location, &record, string_count)?;
        locations.push(record);
    }
    Ok(locations)
}

fn validate_location(
    location: u32,
    record: &LocationRecord,
    string_count: usize,
) -> Result<(), LoadError> {
    let latitude = record.latitude_degrees();
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(LoadError::CoordinateOutOfRange {
            location,
            field: "latitude",
            value: latitude,
        });
    }
    let longitude = record.longitude_degrees();
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(LoadError::CoordinateOutOfRange {
            location,
            field: "longitude",
            value: longitude,
        });
    }
    for (field, id) in record.string_ids() {
        if id as usize >= string_count {
            return Err(LoadError::StringIdOutOfRange {
                location,
                field,
                id,
            });
        }
    }
    Ok(())
}

fn read_intervals<R: Read>(
    input: &mut R,
    location_count: usize,
) -> Result<Vec<AddressInterval>, LoadError> {
    let count =
        codec::read_u32(input).map_err(|e| LoadError::from_read("32 bit IP table size", e))?;
    if count as usize > MAX_INTERVALS {
        return Err(LoadError::IntervalTableTooLarge(count));
    }
    if count == 0 {
        return Err(LoadError::EmptyIntervalTable);
    }

    let mut intervals: Vec<AddressInterval> =
        Vec::with_capacity((count as usize).min(PREALLOC_LIMIT));
    for index in 0..count {
        let start = codec::read_u32(input).map_err(|e| LoadError::from_read("IP entry", e))?;
        let location_id =
            codec::read_u16(input).map_err(|e| LoadError::from_read("IP entry", e))?;

        match intervals.last() {
            None if start != 0 => return Err(LoadError::FirstIntervalNotZero(start)),
            Some(prev) if start <= prev.start => {
                return Err(LoadError::AddressNotIncreasing { index })
            }
            _ => {}
        }
        if location_id as usize >= location_count {
            return Err(LoadError::LocationIdOutOfRange {
                index,
                id: location_id,
            });
        }

        intervals.push(AddressInterval { start, location_id });
    }
    Ok(intervals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(magic: u64, version: u16) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&magic.to_be_bytes());
        data.extend_from_slice(&version.to_be_bytes());
        data.extend_from_slice(&7u32.to_be_bytes());
        data
    }

    #[test]
    fn test_rejects_bad_magic_before_version() {
        let data = header_bytes(0x1234, 9);
        let err = read_tables(&mut data.as_slice()).unwrap_err();
        assert!(matches!(err, LoadError::InvalidMagic(0x1234)));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let data = header_bytes(MAGIC, 2);
        let err = read_tables(&mut data.as_slice()).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedVersion(2)));
    }

    #[test]
    fn test_rejects_oversized_string_table_without_reading_it() {
        let mut data = header_bytes(MAGIC, FORMAT_VERSION);
        data.extend_from_slice(&0x0001_0001u32.to_be_bytes());
        let err = read_tables(&mut data.as_slice()).unwrap_err();
        assert!(matches!(err, LoadError::StringTableTooLarge(0x0001_0001)));
    }

    #[test]
    fn test_rejects_empty_interval_table() {
        let mut data = header_bytes(MAGIC, FORMAT_VERSION);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        let err = read_tables(&mut data.as_slice()).unwrap_err();
        assert!(matches!(err, LoadError::EmptyIntervalTable));
    }

    #[test]
    fn test_rejects_non_utf8_string() {
        let mut data = header_bytes(MAGIC, FORMAT_VERSION);
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&[2, 0xC3, 0x28]);
        let err = read_tables(&mut data.as_slice()).unwrap_err();
        assert!(matches!(err, LoadError::InvalidString { index: 0 }));
    }
}
