//! Compiled database format constants and structures.

use crate::codec::decode_fixed_point;
use crate::error::LoadError;

/// Magic number identifying compiled ip2loc databases.
pub const MAGIC: u64 = 0xD2F5_4B64_DD0E_09AD;

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Header size in bytes: magic (8) + version (2) + timestamp (4).
pub const HEADER_SIZE: usize = 14;

/// Maximum number of entries in the string table.
pub const MAX_STRINGS: usize = 0x10000;

/// Maximum length of a single string in bytes.
pub const MAX_STRING_LEN: usize = 0xFF;

/// Maximum number of distinct locations.
pub const MAX_LOCATIONS: usize = 0x10000;

/// Maximum number of address intervals.
pub const MAX_INTERVALS: usize = 5_000_000;

/// Encoded size of one location record.
pub const LOCATION_RECORD_SIZE: usize = 16;

/// Encoded size of one interval entry.
pub const INTERVAL_RECORD_SIZE: usize = 6;

/// Database header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseHeader {
    /// Magic number
    pub magic: u64,
    /// Format version
    pub version: u16,
    /// Unix timestamp (seconds) when the database was compiled
    pub timestamp: u32,
}

impl DatabaseHeader {
    /// Create a header for the current format version.
    pub fn new(timestamp: u32) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            timestamp,
        }
    }

    /// Validate the header magic and version.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.magic != MAGIC {
            return Err(LoadError::InvalidMagic(self.magic));
        }
        if self.version != FORMAT_VERSION {
            return Err(LoadError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

/// One deduplicated location.
///
/// Coordinates are kept in their fixed-point encoding so that two records
/// compare equal exactly when their encoded bytes do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocationRecord {
    /// Latitude (12.20 fixed point)
    pub latitude: i32,
    /// Longitude (12.20 fixed point)
    pub longitude: i32,
    /// StringID of the country code
    pub country_code: u16,
    /// StringID of the country name
    pub country: u16,
    /// StringID of the region name
    pub region: u16,
    /// StringID of the city name
    pub city: u16,
}

impl LocationRecord {
    pub fn latitude_degrees(&self) -> f64 {
        decode_fixed_point(self.latitude)
    }

    pub fn longitude_degrees(&self) -> f64 {
        decode_fixed_point(self.longitude)
    }

    /// StringIDs in serialization order, paired with their field names.
    pub fn string_ids(&self) -> [(&'static str, u16); 4] {
        [
            ("country code", self.country_code),
            ("country", self.country),
            ("region", self.region),
            ("city", self.city),
        ]
    }
}

/// Start of an address interval and the location it maps to.
///
/// The interval ends just before the next entry's start, or at
/// 255.255.255.255 for the last entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressInterval {
    pub start: u32,
    pub location_id: u16,
}

/// The three tables of a compiled database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseTables {
    /// Unix timestamp of compilation
    pub timestamp: u32,
    /// Deduplicated strings, indexed by StringID
    pub strings: Vec<String>,
    /// Deduplicated locations, indexed by LocationID
    pub locations: Vec<LocationRecord>,
    /// Intervals ordered by strictly increasing start address
    pub intervals: Vec<AddressInterval>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_validation() {
        let header = DatabaseHeader::new(1_700_000_000);
        assert!(header.validate().is_ok());

        let mut bad_magic = header;
        bad_magic.magic = 0;
        assert!(matches!(bad_magic.validate(), Err(LoadError::InvalidMagic(0))));

        let mut bad_version = header;
        bad_version.version = 2;
        assert!(matches!(
            bad_version.validate(),
            Err(LoadError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_location_record_degrees() {
        let record = LocationRecord {
            latitude: 51 << 20 | 1 << 19,
            longitude: -(1 << 19),
            country_code: 0,
            country: 1,
            region: 2,
            city: 3,
        };
        assert_eq!(record.latitude_degrees(), 51.5);
        assert_eq!(record.longitude_degrees(), -0.5);
        assert_eq!(record.string_ids()[3], ("city", 3));
    }
}
