//! ip2loc - Compact IP-to-location database compiler, lookup engine and
//! UDP query server.
//!
//! A census text file maps contiguous IPv4 address intervals to locations.
//! The [`CensusCompiler`] validates it and produces a small big-endian
//! database (string, location and interval tables). The [`LookupEngine`]
//! loads that database and resolves any IPv4 address with a binary search.
//! The [`QueryServer`] answers password-protected UDP lookups, and the
//! [`QueryClient`] talks to it.
//!
//! # Features
//!
//! - **Strict compilation**: every record is validated; intervals must be
//!   contiguous and cover the whole 32-bit address space
//! - **Deduplication**: identical strings and locations are stored once
//! - **Total lookups**: every address resolves to exactly one location
//! - **Memory-mapped loading**: databases can be opened via `mmap`
//! - **Thread-safe**: a loaded engine is immutable and can be shared
//!
//! # Quick Start
//!
//! ```
//! use std::net::Ipv4Addr;
//! use ip2loc::{CensusCompiler, DatabaseWriter, LookupEngine};
//!
//! let census = "\"0\",\"4294967295\",\"ZZ\",\"NOWHERE\",\"-\",\"-\",\"0\",\"0\"\n";
//! let tables = CensusCompiler::new().compile(census.as_bytes()).unwrap();
//! let bytes = DatabaseWriter::new().write(&tables).unwrap();
//!
//! let engine = LookupEngine::from_bytes(&bytes).unwrap();
//! let location = engine.location_for_ip(Ipv4Addr::new(192, 168, 1, 1));
//! assert_eq!(location.country_code(), "ZZ");
//! ```
//!
//! # Serving
//!
//! ```no_run
//! use std::net::{Ipv4Addr, SocketAddrV4};
//! use std::sync::Arc;
//! use ip2loc::{LookupEngine, QueryServer, ServerConfig};
//!
//! let engine = Arc::new(LookupEngine::open("ip2loc.bin".as_ref())?);
//! let config = ServerConfig::new(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 10020), "secret");
//! QueryServer::bind(config, engine)?.run()?;
//! # Ok::<(), ip2loc::Error>(())
//! ```

mod codec;
mod error;

pub mod binary;
pub mod client;
pub mod compiler;
pub mod lookup;
pub mod server;

// Re-export core types
pub use error::{CompileError, Error, LoadError, QueryFailure, Result};

// Re-export compiler and database types
pub use binary::{DatabaseTables, DatabaseWriter};
pub use compiler::CensusCompiler;
pub use lookup::{IpRange, Location, LookupEngine, ResolvedLocation};

// Re-export network types
pub use client::{QueryClient, RemoteLocation};
pub use server::{QueryServer, ServerConfig, ServerHandle, ServerSettings, ServerStats};
