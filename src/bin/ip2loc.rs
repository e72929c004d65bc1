//! ip2loc: compile census files, look up addresses and run the query server.

use clap::{Parser, Subcommand};
use ip2loc::client::{QueryClient, DEFAULT_PORT};
use ip2loc::server::config::{read_password_file, DEFAULT_PASSWORD_FILE};
use ip2loc::{CensusCompiler, LookupEngine, QueryServer, ServerSettings};
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ip2loc")]
#[command(version)]
#[command(about = "IP-to-location database compiler and query server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a census file into a database
    Compile {
        /// Census file (`.gz` is decompressed)
        input: PathBuf,

        /// Output database, or `-` for stdout
        output: PathBuf,

        /// Timestamp stored in the header (default: now)
        #[arg(long)]
        timestamp: Option<u32>,
    },

    /// Serve lookups over UDP
    Serve {
        /// YAML settings file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// UDP port to listen on
        port: Option<u16>,

        /// IPv4 address to bind (default: all interfaces)
        listen_ip: Option<Ipv4Addr>,

        /// Compiled database
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// File holding the shared password
        #[arg(short, long)]
        password_file: Option<PathBuf>,

        /// Requests allowed to wait for the worker
        #[arg(long)]
        queue_capacity: Option<usize>,

        /// Socket receive timeout in milliseconds
        #[arg(long)]
        receive_timeout_ms: Option<u64>,
    },

    /// Look up addresses in a database file
    Lookup {
        /// Compiled database
        database: PathBuf,

        /// IPv4 addresses
        #[arg(required = true)]
        ips: Vec<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Query a running server
    Query {
        /// Server address (`host` or `host:port`)
        server: String,

        /// IPv4 addresses (at most 64)
        #[arg(required = true)]
        ips: Vec<String>,

        /// File holding the shared password
        #[arg(short, long, default_value = DEFAULT_PASSWORD_FILE)]
        password_file: PathBuf,

        /// Per-try timeout in milliseconds
        #[arg(long, default_value_t = 500)]
        timeout_ms: u64,

        /// Resends of unanswered requests
        #[arg(long, default_value_t = 2)]
        retries: u32,

        /// Ask the server to stop instead of querying it
        #[arg(long)]
        quit: bool,
    },

    /// Show database statistics
    Info {
        /// Compiled database
        database: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            timestamp,
        } => compile(&input, &output, timestamp),
        Commands::Serve {
            config,
            port,
            listen_ip,
            database,
            password_file,
            queue_capacity,
            receive_timeout_ms,
        } => serve(
            config.as_deref(),
            ServerSettings {
                port,
                listen_ip,
                database,
                password_file,
                queue_capacity,
                receive_timeout_ms,
            },
        ),
        Commands::Lookup {
            database,
            ips,
            json,
        } => lookup(&database, &ips, json),
        Commands::Query {
            server,
            ips,
            password_file,
            timeout_ms,
            retries,
            quit,
        } => query(&server, &ips, &password_file, timeout_ms, retries, quit),
        Commands::Info { database } => info(&database),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn compile(
    input: &Path,
    output: &Path,
    timestamp: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut compiler = CensusCompiler::new();
    if let Some(timestamp) = timestamp {
        compiler = compiler.with_timestamp(timestamp);
    }
    compiler.compile_to_path(input, output)?;
    Ok(())
}

fn serve(
    config: Option<&Path>,
    overrides: ServerSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = match config {
        Some(path) => ServerSettings::from_file(path)?,
        None => ServerSettings::default(),
    };
    let settings = base.overridden_by(overrides);

    let server_config = settings.to_config()?;
    let database = settings
        .database
        .clone()
        .ok_or("database path is required (--database or `database:` in settings)")?;
    let engine = Arc::new(LookupEngine::open(&database)?);

    QueryServer::bind(server_config, engine)?.run()?;
    Ok(())
}

fn lookup(database: &Path, ips: &[String], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let engine = LookupEngine::open(database)?;

    for ip in ips {
        let location = engine.location_for_ip_str(ip)?;
        if json {
            println!("{}", serde_json::to_string(&location.to_resolved())?);
        } else {
            println!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                ip,
                location.country_code(),
                location.country(),
                location.region(),
                location.city(),
                location.latitude(),
                location.longitude()
            );
        }
    }
    Ok(())
}

fn query(
    server: &str,
    ips: &[String],
    password_file: &Path,
    timeout_ms: u64,
    retries: u32,
    quit: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let password = String::from_utf8(read_password_file(password_file)?)?;
    let server = resolve_server(server)?;
    let mut client = QueryClient::connect(server, &password)?
        .with_timeout(Duration::from_millis(timeout_ms))
        .with_retries(retries);

    if quit {
        client.send_quit()?;
        return Ok(());
    }

    let ips: Vec<&str> = ips.iter().map(String::as_str).collect();
    let mut failed = false;
    for (ip, result) in client.get_locations(&ips)? {
        match result {
            Ok(location) => println!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                ip,
                location.country_code,
                location.country,
                location.region,
                location.city,
                location.latitude,
                location.longitude
            ),
            Err(e) => {
                eprintln!("{}\t{}", ip, e);
                failed = true;
            }
        }
    }

    if failed {
        return Err("some addresses could not be resolved".into());
    }
    Ok(())
}

fn resolve_server(server: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let with_port = if server.contains(':') {
        server.to_string()
    } else {
        format!("{}:{}", server, DEFAULT_PORT)
    };
    with_port
        .to_socket_addrs()?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| format!("no IPv4 address for {}", server).into())
}

fn info(database: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let engine = LookupEngine::open(database)?;
    println!("Database:  {}", database.display());
    println!("Timestamp: {}", engine.timestamp());
    println!("Strings:   {}", engine.num_strings());
    println!("Locations: {}", engine.num_locations());
    println!("Intervals: {}", engine.num_intervals());
    Ok(())
}
