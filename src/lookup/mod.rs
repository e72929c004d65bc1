//! Compiled database lookups.
//!
//! [`LookupEngine`] owns the decoded tables of a compiled database and
//! answers point queries in O(log n) over the interval table. Every
//! address resolves: loading rejects any database whose intervals do not
//! cover the whole 32-bit space.

mod location;

use std::fs::File;
use std::io::Read;
use std::net::Ipv4Addr;
use std::path::Path;

use memmap2::Mmap;

use crate::binary::{read_tables, AddressInterval, DatabaseTables, LocationRecord};
use crate::Result;

pub use location::{Location, ResolvedLocation};

/// One entry of the interval table with its implicit end resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    /// First address of the interval
    pub lower: u32,
    /// Last address of the interval (inclusive)
    pub upper: u32,
    /// Location the interval maps to
    pub location_id: u16,
}

impl IpRange {
    pub fn contains(&self, addr: u32) -> bool {
        self.lower <= addr && addr <= self.upper
    }
}

/// In-memory IP-to-location database.
///
/// Immutable once loaded, so it can be shared between threads (wrap it in
/// an `Arc`) and queried without locking.
pub struct LookupEngine {
    timestamp: u32,
    strings: Vec<String>,
    locations: Vec<LocationRecord>,
    intervals: Vec<AddressInterval>,
}

impl LookupEngine {
    /// Load and validate a compiled database from a stream.
    ///
    /// The stream is treated as untrusted. Nothing is returned unless every
    /// table passes validation.
    pub fn load<R: Read>(mut reader: R) -> Result<Self> {
        let tables = read_tables(&mut reader)?;
        Ok(Self::from_tables(tables))
    }

    /// Load a compiled database held in memory.
    pub fn from_bytes(mut data: &[u8]) -> Result<Self> {
        Self::load(&mut data)
    }

    /// Open a compiled database file.
    ///
    /// The file is memory-mapped for decoding only; the engine keeps its own
    /// copy of the tables, so the file may be replaced afterwards.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let engine = Self::from_bytes(&mmap)?;

        log::info!(
            "Loaded {}: {} intervals, {} locations, {} strings",
            path.display(),
            engine.num_intervals(),
            engine.num_locations(),
            engine.num_strings()
        );
        Ok(engine)
    }

    fn from_tables(tables: DatabaseTables) -> Self {
        Self {
            timestamp: tables.timestamp,
            strings: tables.strings,
            locations: tables.locations,
            intervals: tables.intervals,
        }
    }

    /// Resolve the location of an address. Never fails.
    pub fn location_for_ip(&self, addr: impl Into<u32>) -> Location<'_> {
        let id = self.location_id_for_ip(addr);
        Location::new(self, id, &self.locations[id as usize])
    }

    /// Resolve only the LocationID of an address.
    pub fn location_id_for_ip(&self, addr: impl Into<u32>) -> u16 {
        self.intervals[self.interval_index(addr.into())].location_id
    }

    /// Look up a location by ID.
    pub fn location(&self, id: u16) -> Option<Location<'_>> {
        self.locations
            .get(id as usize)
            .map(|record| Location::new(self, id, record))
    }

    /// Inclusive bounds of the interval containing `addr`.
    pub fn ip_interval(&self, addr: impl Into<u32>) -> (u32, u32) {
        let range = self.range_at(self.interval_index(addr.into()));
        (range.lower, range.upper)
    }

    /// Look up a string by StringID.
    pub fn string(&self, id: u16) -> Option<&str> {
        self.strings.get(id as usize).map(String::as_str)
    }

    /// Interval table entry at `index`, in address order.
    pub fn interval(&self, index: usize) -> Option<IpRange> {
        if index < self.intervals.len() {
            Some(self.range_at(index))
        } else {
            None
        }
    }

    /// Iterate over all intervals in address order.
    pub fn intervals(&self) -> impl Iterator<Item = IpRange> + '_ {
        (0..self.intervals.len()).map(|index| self.range_at(index))
    }

    pub fn num_locations(&self) -> usize {
        self.locations.len()
    }

    pub fn num_strings(&self) -> usize {
        self.strings.len()
    }

    pub fn num_intervals(&self) -> usize {
        self.intervals.len()
    }

    /// Unix timestamp recorded when the database was compiled.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Index of the interval containing `addr`.
    ///
    /// Binary search over `[low, high)`: each probe derives the inclusive
    /// upper bound of `mid` from the next start, and exactly one interval
    /// matches because the table starts at 0 and increases strictly.
    fn interval_index(&self, addr: u32) -> usize {
        let mut low = 0;
        let mut high = self.intervals.len();
        while low < high {
            let mid = low + (high - low) / 2;
            let range = self.range_at(mid);
            if range.contains(addr) {
                return mid;
            }
            if addr > range.upper {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        // Only reachable if the coverage invariant is broken.
        low.min(self.intervals.len().saturating_sub(1))
    }

    fn range_at(&self, index: usize) -> IpRange {
        let entry = self.intervals[index];
        let upper = match self.intervals.get(index + 1) {
            Some(next) => next.start - 1,
            None => u32::MAX,
        };
        IpRange {
            lower: entry.start,
            upper,
            location_id: entry.location_id,
        }
    }

    /// Convenience for dotted-quad text input.
    pub fn location_for_ip_str(&self, addr: &str) -> Result<Location<'_>> {
        let ip: Ipv4Addr = addr
            .parse()
            .map_err(|_| crate::Error::InvalidIpAddress(addr.to_string()))?;
        Ok(self.location_for_ip(ip))
    }
}

impl std::fmt::Debug for LookupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupEngine")
            .field("timestamp", &self.timestamp)
            .field("strings", &self.strings.len())
            .field("locations", &self.locations.len())
            .field("intervals", &self.intervals.len())
            .finish()
    }
}
