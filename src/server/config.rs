//! Server configuration.

use std::fs::File;
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Default number of requests waiting for the worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default socket receive timeout, which bounds shutdown latency.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(250);

/// Default password file, relative to the working directory.
pub const DEFAULT_PASSWORD_FILE: &str = ".password";

/// Password files must be smaller than this.
pub const MAX_PASSWORD_FILE_SIZE: usize = 128;

/// Shortest accepted password.
pub const MIN_PASSWORD_LEN: usize = 4;

/// Runtime configuration of a [`QueryServer`](super::QueryServer).
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub listen: SocketAddrV4,
    /// Shared secret every request must carry
    pub password: Vec<u8>,
    /// Maximum number of requests waiting for the worker
    pub queue_capacity: usize,
    /// How long the receiver blocks before re-checking the halt flag
    pub receive_timeout: Duration,
}

impl ServerConfig {
    pub fn new(listen: SocketAddrV4, password: impl Into<Vec<u8>>) -> Self {
        Self {
            listen,
            password: password.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Check the values a server cannot run with.
    pub fn validate(&self) -> Result<()> {
        validate_password(&self.password)?;
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be at least 1".into()));
        }
        if self.receive_timeout.is_zero() {
            return Err(Error::Config("receive timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Source address a `quit` request must come from.
    ///
    /// The bind address, with the wildcard address standing for loopback.
    pub fn quit_address(&self) -> Ipv4Addr {
        let ip = *self.listen.ip();
        if ip.is_unspecified() {
            Ipv4Addr::LOCALHOST
        } else {
            ip
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen", &self.listen)
            .field("password", &"<redacted>")
            .field("queue_capacity", &self.queue_capacity)
            .field("receive_timeout", &self.receive_timeout)
            .finish()
    }
}

/// Server settings file.
///
/// ```yaml
/// port: 27950
/// listen_ip: 127.0.0.1
/// database: /var/lib/ip2loc/ip2loc.bin
/// password_file: /etc/ip2loc/.password
/// queue_capacity: 64
/// receive_timeout_ms: 250
/// ```
///
/// Every key is optional; command-line flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    pub port: Option<u16>,
    pub listen_ip: Option<Ipv4Addr>,
    pub database: Option<PathBuf>,
    pub password_file: Option<PathBuf>,
    pub queue_capacity: Option<usize>,
    pub receive_timeout_ms: Option<u64>,
}

impl ServerSettings {
    /// Load settings from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Combine with `overrides`, whose values win where present.
    pub fn overridden_by(self, overrides: ServerSettings) -> Self {
        Self {
            port: overrides.port.or(self.port),
            listen_ip: overrides.listen_ip.or(self.listen_ip),
            database: overrides.database.or(self.database),
            password_file: overrides.password_file.or(self.password_file),
            queue_capacity: overrides.queue_capacity.or(self.queue_capacity),
            receive_timeout_ms: overrides.receive_timeout_ms.or(self.receive_timeout_ms),
        }
    }

    /// Listen address. The port is required and must be non-zero.
    pub fn listen_addr(&self) -> Result<SocketAddrV4> {
        let port = self
            .port
            .ok_or_else(|| Error::Config("listen port is required".into()))?;
        if port == 0 {
            return Err(Error::Config("port out of range".into()));
        }
        let ip = self.listen_ip.unwrap_or(Ipv4Addr::UNSPECIFIED);
        Ok(SocketAddrV4::new(ip, port))
    }

    /// Build a validated [`ServerConfig`], reading the password file.
    pub fn to_config(&self) -> Result<ServerConfig> {
        let password_file = self
            .password_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PASSWORD_FILE));
        let password = read_password_file(&password_file)?;

        let mut config = ServerConfig::new(self.listen_addr()?, password);
        if let Some(capacity) = self.queue_capacity {
            config = config.with_queue_capacity(capacity);
        }
        if let Some(ms) = self.receive_timeout_ms {
            config = config.with_receive_timeout(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }
}

/// Read the shared secret from a password file.
///
/// The file must be smaller than 128 bytes and hold exactly one line; a
/// single trailing newline is allowed.
pub fn read_password_file(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| {
        Error::Config(format!("could not open {}: {}", path.display(), e))
    })?;
    let mut contents = Vec::with_capacity(MAX_PASSWORD_FILE_SIZE);
    file.take(MAX_PASSWORD_FILE_SIZE as u64)
        .read_to_end(&mut contents)?;

    if contents.len() >= MAX_PASSWORD_FILE_SIZE {
        return Err(Error::Config(format!("{} is too large", path.display())));
    }
    if contents.is_empty() {
        return Err(Error::Config(format!("{} is empty", path.display())));
    }

    let password = match contents.iter().position(|&b| b == b'\n') {
        Some(end) if end + 1 < contents.len() => {
            return Err(Error::Config(format!(
                "{} contains multiple lines of text",
                path.display()
            )));
        }
        Some(end) => contents[..end].to_vec(),
        None => contents,
    };
    validate_password(&password)?;
    Ok(password)
}

fn validate_password(password: &[u8]) -> Result<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(Error::Config("password is too short".into()));
    }
    if password.contains(&b'\n') {
        return Err(Error::Config("password must not contain a newline".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_file(contents: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".password");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    fn config_error(result: Result<Vec<u8>>) -> String {
        match result {
            Err(Error::Config(msg)) => msg,
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_password_file_rules() {
        let (_dir, path) = password_file(b"secret\n");
        assert_eq!(read_password_file(&path).unwrap(), b"secret");

        let (_dir, path) = password_file(b"secret");
        assert_eq!(read_password_file(&path).unwrap(), b"secret");

        let (_dir, path) = password_file(b"");
        assert!(config_error(read_password_file(&path)).ends_with("is empty"));

        let (_dir, path) = password_file(b"secret\nmore\n");
        assert!(config_error(read_password_file(&path)).contains("multiple lines"));

        let (_dir, path) = password_file(b"secret\n\n");
        assert!(config_error(read_password_file(&path)).contains("multiple lines"));

        let (_dir, path) = password_file(b"abc\n");
        assert_eq!(config_error(read_password_file(&path)), "password is too short");

        let (_dir, path) = password_file(&[b'p'; 127]);
        assert_eq!(read_password_file(&path).unwrap().len(), 127);

        let (_dir, path) = password_file(&[b'p'; 128]);
        assert!(config_error(read_password_file(&path)).ends_with("is too large"));
    }

    #[test]
    fn test_missing_password_file() {
        let dir = tempfile::tempdir().unwrap();
        let msg = config_error(read_password_file(&dir.path().join("missing")));
        assert!(msg.starts_with("could not open"));
    }

    #[test]
    fn test_quit_address() {
        let wildcard = ServerConfig::new(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 1), "pass");
        assert_eq!(wildcard.quit_address(), Ipv4Addr::LOCALHOST);

        let bound = ServerConfig::new(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1), "pass");
        assert_eq!(bound.quit_address(), Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn test_config_validation() {
        let listen = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1);
        assert!(ServerConfig::new(listen, "pass").validate().is_ok());
        assert!(ServerConfig::new(listen, "abc").validate().is_err());
        assert!(ServerConfig::new(listen, "pass")
            .with_queue_capacity(0)
            .validate()
            .is_err());
        assert!(ServerConfig::new(listen, "pass")
            .with_receive_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(!format!("{:?}", ServerConfig::new(listen, "hunter22")).contains("hunter22"));
    }

    #[test]
    fn test_settings_yaml_and_overrides() {
        let file = ServerSettings::from_yaml(
            "port: 27950\nlisten_ip: 127.0.0.1\nqueue_capacity: 8\nreceive_timeout_ms: 100\n",
        )
        .unwrap();
        assert_eq!(file.port, Some(27950));
        assert_eq!(file.listen_ip, Some(Ipv4Addr::LOCALHOST));

        let cli = ServerSettings {
            port: Some(4000),
            ..Default::default()
        };
        let merged = file.overridden_by(cli);
        assert_eq!(
            merged.listen_addr().unwrap(),
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4000)
        );
        assert_eq!(merged.queue_capacity, Some(8));

        assert_eq!(ServerSettings::from_yaml("").unwrap(), ServerSettings::default());
        assert!(ServerSettings::from_yaml("bogus: 1\n").is_err());
        assert!(ServerSettings::default().listen_addr().is_err());
    }

    #[test]
    fn test_settings_to_config() {
        let (dir, path) = password_file(b"secret\n");
        let settings = ServerSettings {
            port: Some(27950),
            password_file: Some(path),
            receive_timeout_ms: Some(100),
            ..Default::default()
        };
        let config = settings.to_config().unwrap();
        assert_eq!(config.password, b"secret");
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.receive_timeout, Duration::from_millis(100));
        assert_eq!(config.listen, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 27950));
        drop(dir);
    }
}
