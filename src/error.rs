//! Error types for ip2loc.

use thiserror::Error;

/// Error type for ip2loc operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Census compilation failed
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// Compiled database failed validation
    #[error("database error: {0}")]
    Load(#[from] LoadError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid IP address
    #[error("invalid IP address: {0}")]
    InvalidIpAddress(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Query client error
    #[error("client error: {0}")]
    Client(String),

    /// Receive loop stopped on a socket fault
    #[error("receive loop failed: {0}")]
    Receive(std::io::Error),
}

/// Result type alias for ip2loc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error raised while compiling a census.
///
/// Record-level variants carry the 1-based line number of the offending
/// record.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("line {line} is too long")]
    LineTooLong { line: u32 },

    #[error("premature end of file on line {line}")]
    PrematureEof { line: u32 },

    #[error("too many lines in census (too many IP intervals)")]
    TooManyLines,

    #[error("failed to tokenize line {line}")]
    Tokenize { line: u32 },

    #[error("failed to parse begin IP address \"{token}\" on line {line}")]
    BeginAddress { token: String, line: u32 },

    #[error("failed to parse end IP address \"{token}\" on line {line}")]
    EndAddress { token: String, line: u32 },

    #[error("begin IP address not one greater than previous end IP address on line {line}")]
    NotContiguous { line: u32 },

    #[error("record on line {line} follows an interval ending at 255.255.255.255")]
    PastEndOfAddressSpace { line: u32 },

    #[error("begin IP address is greater than end IP address on line {line}")]
    EndBeforeBegin { line: u32 },

    #[error("failed to parse latitude \"{token}\" on line {line}")]
    Latitude { token: String, line: u32 },

    #[error("failed to parse longitude \"{token}\" on line {line}")]
    Longitude { token: String, line: u32 },

    #[error("latitude {value} is out of range on line {line}")]
    LatitudeRange { value: f64, line: u32 },

    #[error("longitude {value} is out of range on line {line}")]
    LongitudeRange { value: f64, line: u32 },

    #[error("max string length exceeded on line {line}")]
    StringTooLong { line: u32 },

    #[error("too many distinct strings on line {line}")]
    TooManyStrings { line: u32 },

    #[error("too many distinct locations on line {line}")]
    TooManyLocations { line: u32 },

    #[error("census is empty")]
    Empty,

    #[error("last IP interval does not end at 255.255.255.255")]
    IncompleteCoverage,

    #[error("failed to read census: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised while loading a compiled database.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("truncated database: could not read {0}")]
    Truncated(&'static str),

    #[error("incorrect header magic {0:#018x}")]
    InvalidMagic(u64),

    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u16),

    #[error("string table too large: {0} entries")]
    StringTableTooLarge(u32),

    #[error("string {index} is not valid UTF-8")]
    InvalidString { index: u32 },

    #[error("location table too large: {0} entries")]
    LocationTableTooLarge(u32),

    #[error("{field} of location {location} out of range: {value}")]
    CoordinateOutOfRange {
        location: u32,
        field: &'static str,
        value: f64,
    },

    #[error("{field} string index {id} of location {location} out of range")]
    StringIdOutOfRange {
        location: u32,
        field: &'static str,
        id: u16,
    },

    #[error("IP table too large: {0} entries")]
    IntervalTableTooLarge(u32),

    #[error("IP table is empty")]
    EmptyIntervalTable,

    #[error("first IP interval starts at {0:#010x} instead of 0")]
    FirstIntervalNotZero(u32),

    #[error("IP address of interval {index} not bigger than previous")]
    AddressNotIncreasing { index: u32 },

    #[error("location ID {id} of interval {index} out of range")]
    LocationIdOutOfRange { index: u32, id: u16 },

    #[error("unexpected trailing data after IP table")]
    TrailingData,

    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),
}

/// Why a single address in a client batch was not resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryFailure {
    #[error("not an IP address")]
    NotAnIpAddress,

    #[error("incorrect challenge in response")]
    IncorrectChallenge,

    #[error("send failed: {0}")]
    Send(String),

    #[error("no response: {0}")]
    NoResponse(String),
}

impl LoadError {
    /// Map a codec read failure, treating a short read as truncation.
    pub(crate) fn from_read(what: &'static str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            LoadError::Truncated(what)
        } else {
            LoadError::Io(err)
        }
    }
}
