//! Census compiler.
//!
//! Turns a geolocation census into [`DatabaseTables`] ready for
//! [`DatabaseWriter`](crate::binary::DatabaseWriter). Records are processed
//! in file order; the first failing record aborts the whole compile.
//!
//! # Example
//!
//! ```
//! use ip2loc::compiler::CensusCompiler;
//!
//! let census = concat!(
//!     "\"0\",\"100\",\"US\",\"UNITED STATES\",\"CA\",\"-\",\"34.05\",\"-118.25\"\n",
//!     "\"101\",\"4294967295\",\"GB\",\"UNITED KINGDOM\",\"-\",\"LONDON\",\"51.50\",\"-0.12\"\n",
//! );
//! let tables = CensusCompiler::new()
//!     .with_timestamp(0)
//!     .compile(census.as_bytes())
//!     .unwrap();
//! assert_eq!(tables.intervals.len(), 2);
//! assert_eq!(tables.locations.len(), 2);
//! ```

pub mod census;
pub mod fold;

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::AHashMap;
use flate2::read::GzDecoder;

use crate::binary::{
    AddressInterval, DatabaseTables, DatabaseWriter, LocationRecord, MAX_LOCATIONS, MAX_STRINGS,
    MAX_STRING_LEN,
};
use crate::codec::encode_fixed_point;
use crate::error::CompileError;
use crate::Result;

use census::{parse_coordinate, parse_unsigned, tokenize, CensusLines};
use fold::fold_to_ascii_upper;

/// Census compiler.
#[derive(Debug, Clone, Default)]
pub struct CensusCompiler {
    timestamp: Option<u32>,
}

impl CensusCompiler {
    /// Create a compiler stamping output with the current time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed build timestamp instead of the current time.
    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Compile a census read from `reader`.
    pub fn compile<R: Read>(&self, reader: R) -> std::result::Result<DatabaseTables, CompileError> {
        self.compile_lines(BufReader::new(reader))
    }

    /// Compile a census file. Files ending in `.gz` are decompressed.
    pub fn compile_file(&self, path: &Path) -> Result<DatabaseTables> {
        let file = File::open(path)?;
        let is_gzip = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        let tables = if is_gzip {
            log::debug!("Decompressing census {}", path.display());
            self.compile(GzDecoder::new(file))?
        } else {
            self.compile(file)?
        };
        Ok(tables)
    }

    /// Compile `input` and write the database to `output`.
    ///
    /// The database is fully serialized before anything is written, and a
    /// file `output` is replaced atomically, so a failed compile never
    /// leaves partial output behind. An `output` of `-` writes to stdout.
    pub fn compile_to_path(&self, input: &Path, output: &Path) -> Result<DatabaseTables> {
        let tables = self.compile_file(input)?;
        let data = DatabaseWriter::new().write(&tables)?;

        if output.as_os_str() == "-" {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        } else {
            write_atomically(output, &data)?;
            log::info!("Wrote {} bytes to {}", data.len(), output.display());
        }
        Ok(tables)
    }

    fn compile_lines<R: BufRead>(
        &self,
        reader: R,
    ) -> std::result::Result<DatabaseTables, CompileError> {
        let mut lines = CensusLines::new(reader);
        let mut state = CompileState::default();

        while let Some((line, text)) = lines.next_line()? {
            state.add_record(line, text)?;
        }
        let tables = state.finish(self.timestamp.unwrap_or_else(now))?;

        log::info!(
            "Compiled census: {} intervals, {} locations, {} strings",
            tables.intervals.len(),
            tables.locations.len(),
            tables.strings.len()
        );
        Ok(tables)
    }
}

/// Accumulated tables plus the interning indexes used to build them.
#[derive(Default)]
struct CompileState {
    strings: Vec<String>,
    string_ids: AHashMap<String, u16>,
    locations: Vec<LocationRecord>,
    location_ids: AHashMap<LocationRecord, u16>,
    intervals: Vec<AddressInterval>,
    /// End address of the previous record.
    prev_end: Option<u32>,
}

impl CompileState {
    fn add_record(&mut self, line: u32, text: &[u8]) -> std::result::Result<(), CompileError> {
        let fields = tokenize(text).ok_or(CompileError::Tokenize { line })?;

        let start = parse_unsigned(fields[0]).ok_or_else(|| CompileError::BeginAddress {
            token: String::from_utf8_lossy(fields[0]).into_owned(),
            line,
        })?;
        let end = parse_unsigned(fields[1]).ok_or_else(|| CompileError::EndAddress {
            token: String::from_utf8_lossy(fields[1]).into_owned(),
            line,
        })?;

        let expected_start = match self.prev_end {
            None => 0,
            Some(u32::MAX) => return Err(CompileError::PastEndOfAddressSpace { line }),
            Some(prev) => prev + 1,
        };
        if start != expected_start {
            return Err(CompileError::NotContiguous { line });
        }
        if end < start {
            return Err(CompileError::EndBeforeBegin { line });
        }

        let latitude = parse_coordinate(fields[6]).ok_or_else(|| CompileError::Latitude {
            token: String::from_utf8_lossy(fields[6]).into_owned(),
            line,
        })?;
        let longitude = parse_coordinate(fields[7]).ok_or_else(|| CompileError::Longitude {
            token: String::from_utf8_lossy(fields[7]).into_owned(),
            line,
        })?;
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CompileError::LatitudeRange {
                value: latitude,
                line,
            });
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CompileError::LongitudeRange {
                value: longitude,
                line,
            });
        }

        let mut ids = [0u16; 4];
        for (id, raw) in ids.iter_mut().zip(&fields[2..6]) {
            *id = self.intern_string(fold_to_ascii_upper(raw), line)?;
        }

        let record = LocationRecord {
            latitude: encode_fixed_point(latitude),
            longitude: encode_fixed_point(longitude),
            country_code: ids[0],
            country: ids[1],
            region: ids[2],
            city: ids[3],
        };
        let location_id = self.intern_location(record, line)?;

        self.intervals.push(AddressInterval { start, location_id });
        self.prev_end = Some(end);
        Ok(())
    }

    fn intern_string(&mut self, value: String, line: u32) -> std::result::Result<u16, CompileError> {
        if let Some(&id) = self.string_ids.get(&value) {
            return Ok(id);
        }
        if value.len() > MAX_STRING_LEN {
            return Err(CompileError::StringTooLong { line });
        }
        if self.strings.len() >= MAX_STRINGS {
            return Err(CompileError::TooManyStrings { line });
        }

        let id = self.strings.len() as u16;
        self.string_ids.insert(value.clone(), id);
        self.strings.push(value);
        Ok(id)
    }

    fn intern_location(
        &mut self,
        record: LocationRecord,
        line: u32,
    ) -> std::result::Result<u16, CompileError> {
        if let Some(&id) = self.location_ids.get(&record) {
            return Ok(id);
        }
        if self.locations.len() >= MAX_LOCATIONS {
            return Err(CompileError::TooManyLocations { line });
        }

        let id = self.locations.len() as u16;
        self.location_ids.insert(record, id);
        self.locations.push(record);
        Ok(id)
    }

    fn finish(self, timestamp: u32) -> std::result::Result<DatabaseTables, CompileError> {
        match self.prev_end {
            None => return Err(CompileError::Empty),
            Some(u32::MAX) => {}
            Some(_) => return Err(CompileError::IncompleteCoverage),
        }
        Ok(DatabaseTables {
            timestamp,
            strings: self.strings,
            locations: self.locations,
            intervals: self.intervals,
        })
    }
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Write `data` to a temporary file next to `path`, then rename it over `path`.
fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
