//! UDP client for the query server.
//!
//! Speaks the plain framing only. Every request carries a fresh non-zero
//! challenge, and a reply is accepted only if it echoes a challenge sent
//! for the same address, so stale or forged replies are ignored.
//!
//! ```no_run
//! use ip2loc::client::QueryClient;
//!
//! let mut client = QueryClient::connect("127.0.0.1:10020", "secret").unwrap();
//! for (ip, result) in client.get_locations(&["8.8.8.8", "1.1.1.1"]).unwrap() {
//!     match result {
//!         Ok(location) => println!("{}: {} {}", ip, location.country_code, location.city),
//!         Err(e) => println!("{}: {}", ip, e),
//!     }
//! }
//! ```

use std::io::ErrorKind;
use std::net::{Ipv4Addr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ahash::{AHashMap, RandomState};
use serde::Serialize;

use crate::error::QueryFailure;
use crate::server::protocol::{
    parse_ipv4, CMD_GET_LOCATION_FOR_IP, OUTGOING_BUFFER_SIZE, REQUEST_MARKER, RESPONSE_MARKER,
};
use crate::{Error, Result};

/// Port the client connects to when none is given.
pub const DEFAULT_PORT: u16 = 10020;

/// Most addresses resolved by one [`QueryClient::get_locations`] call.
pub const MAX_BATCH: usize = 64;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_RETRIES: u32 = 2;

const MAX_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: u32 = 20;
const MAX_PASSWORD_LEN: usize = 128;

/// Unmatched replies tolerated after the deadline before giving up a try.
const FLOOD_LIMIT: usize = 1024;

/// A location as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteLocation {
    pub ip: Ipv4Addr,
    pub country_code: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Client for one query server.
pub struct QueryClient {
    socket: UdpSocket,
    password: String,
    timeout: Duration,
    retries: u32,
    random: RandomState,
    sequence: u64,
}

impl QueryClient {
    /// Create a client for the server at `server`.
    pub fn connect<A: ToSocketAddrs>(server: A, password: &str) -> Result<Self> {
        if password.len() < 4 {
            return Err(Error::Client("password is too short".into()));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(Error::Client("password is too long".into()));
        }
        if password.contains('\n') {
            return Err(Error::Client("password contains newline character".into()));
        }

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(server)?;

        Ok(Self {
            socket,
            password: password.to_string(),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            random: RandomState::new(),
            sequence: 0,
        })
    }

    /// How long each try waits for replies (clamped to 1 ms..=10 s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.clamp(Duration::from_millis(1), MAX_TIMEOUT);
        self
    }

    /// How many times unanswered requests are sent again (at most 20).
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.min(MAX_RETRIES);
        self
    }

    /// Resolve one address.
    pub fn get_location(&mut self, ip: &str) -> Result<RemoteLocation> {
        let mut results = self.get_locations(&[ip])?;
        match results.pop() {
            Some((_, Ok(location))) => Ok(location),
            Some((_, Err(failure))) => Err(Error::Client(format!("{}: {}", ip, failure))),
            None => Err(Error::Client(format!("{}: no result", ip))),
        }
    }

    /// Resolve up to [`MAX_BATCH`] addresses.
    ///
    /// Returns one entry per distinct input address, in input order. Every
    /// unanswered request is resent on each retry; a reply to a request from
    /// an earlier try is still accepted.
    pub fn get_locations(
        &mut self,
        ips: &[&str],
    ) -> Result<Vec<(String, std::result::Result<RemoteLocation, QueryFailure>)>> {
        if ips.len() > MAX_BATCH {
            return Err(Error::Client(format!(
                "too many addresses: {} (at most {})",
                ips.len(),
                MAX_BATCH
            )));
        }

        let mut batch = Batch::new(ips);
        let mut last_error: Option<String> = None;
        let mut buf = [0u8; OUTGOING_BUFFER_SIZE];

        for _ in 0..=self.retries {
            if batch.remaining == 0 {
                break;
            }
            self.send_pending(&mut batch);

            let deadline = Instant::now() + self.timeout;
            let mut late_rejects = 0usize;
            let mut fatal = false;

            while batch.remaining > 0 {
                if late_rejects > FLOOD_LIMIT {
                    last_error = Some("packet flood".into());
                    break;
                }

                let wait = deadline.saturating_duration_since(Instant::now());
                let past_deadline = wait.is_zero();
                self.socket
                    .set_read_timeout(Some(wait.max(Duration::from_millis(1))))?;

                let len = match self.socket.recv(&mut buf) {
                    Ok(len) => len,
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                        last_error.get_or_insert_with(|| "timed out".into());
                        break;
                    }
                    Err(e) => {
                        last_error = Some(format!("recv failed: {}", e));
                        fatal = true;
                        break;
                    }
                };

                if let Err(reason) = batch.accept(&buf[..len]) {
                    log::debug!("Ignoring reply: {}", reason);
                    last_error = Some(reason.into());
                    if past_deadline {
                        late_rejects += 1;
                    }
                }
            }

            if fatal {
                break;
            }
        }

        Ok(batch.finish(last_error.as_deref().unwrap_or("unknown error")))
    }

    /// Ask the server to stop. Only honoured when sent from the server's
    /// own address.
    pub fn send_quit(&self) -> Result<()> {
        let request = format!(
            "{}{}\nquit\n",
            String::from_utf8_lossy(REQUEST_MARKER),
            self.password
        );
        self.socket.send(request.as_bytes())?;
        Ok(())
    }

    fn send_pending(&mut self, batch: &mut Batch) {
        for index in 0..batch.entries.len() {
            if !batch.entries[index].is_pending() {
                continue;
            }
            let challenge = self.next_challenge();
            let request = format!(
                "{}{}\n{}:{:08x}\n{}\n",
                String::from_utf8_lossy(REQUEST_MARKER),
                self.password,
                String::from_utf8_lossy(CMD_GET_LOCATION_FOR_IP),
                challenge,
                batch.entries[index].ip
            );

            let entry = &mut batch.entries[index];
            match self.socket.send(request.as_bytes()) {
                Ok(_) => entry.challenges.push(challenge),
                Err(e) => {
                    entry
                        .send_error
                        .get_or_insert_with(|| format!("send failed: {}", e));
                }
            }
        }
    }

    /// Random non-zero challenge.
    fn next_challenge(&mut self) -> u32 {
        loop {
            self.sequence = self.sequence.wrapping_add(1);
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let challenge = self.random.hash_one((self.sequence, nanos)) as u32;
            if challenge != 0 {
                return challenge;
            }
        }
    }
}

struct Entry {
    ip: String,
    valid: bool,
    challenges: Vec<u32>,
    location: Option<RemoteLocation>,
    send_error: Option<String>,
    bad_challenge: bool,
}

impl Entry {
    fn is_pending(&self) -> bool {
        self.valid && self.location.is_none()
    }
}

/// Bookkeeping for one `get_locations` call.
struct Batch {
    entries: Vec<Entry>,
    by_ip: AHashMap<String, usize>,
    remaining: usize,
}

impl Batch {
    fn new(ips: &[&str]) -> Self {
        let mut entries = Vec::with_capacity(ips.len());
        let mut by_ip = AHashMap::with_capacity(ips.len());
        for &ip in ips {
            if by_ip.contains_key(ip) {
                continue;
            }
            by_ip.insert(ip.to_string(), entries.len());
            entries.push(Entry {
                ip: ip.to_string(),
                valid: parse_ipv4(ip.as_bytes()).is_some(),
                challenges: Vec::new(),
                location: None,
                send_error: None,
                bad_challenge: false,
            });
        }
        let remaining = entries.iter().filter(|e| e.valid).count();
        Self {
            entries,
            by_ip,
            remaining,
        }
    }

    /// Match a reply to an outstanding request.
    fn accept(&mut self, data: &[u8]) -> std::result::Result<(), &'static str> {
        let reply = parse_reply(data).ok_or("malformed response")?;
        let index = *self
            .by_ip
            .get(reply.ip_text)
            .ok_or("incorrect IP address in response")?;

        let entry = &mut self.entries[index];
        if !entry.valid {
            return Err("incorrect IP address in response");
        }
        if entry.location.is_some() {
            return Err("duplicate response");
        }
        if reply.challenge == 0 || !entry.challenges.contains(&reply.challenge) {
            entry.bad_challenge = true;
            return Err("incorrect challenge in response");
        }

        entry.location = Some(reply.location);
        self.remaining -= 1;
        Ok(())
    }

    fn finish(
        self,
        last_error: &str,
    ) -> Vec<(String, std::result::Result<RemoteLocation, QueryFailure>)> {
        self.entries
            .into_iter()
            .map(|entry| {
                let result = match entry.location {
                    Some(location) => Ok(location),
                    None if !entry.valid => Err(QueryFailure::NotAnIpAddress),
                    None if entry.bad_challenge => Err(QueryFailure::IncorrectChallenge),
                    None => match entry.send_error {
                        Some(e) => Err(QueryFailure::Send(e)),
                        None => Err(QueryFailure::NoResponse(last_error.to_string())),
                    },
                };
                (entry.ip, result)
            })
            .collect()
    }
}

struct Reply<'a> {
    ip_text: &'a str,
    challenge: u32,
    location: RemoteLocation,
}

/// Parse a plain `getLocationForIP` reply.
///
/// ```text
/// ip2locResponse \n getLocationForIP:<challenge> \n <ip> \n \n
/// <cc> \n <country> \n <region> \n <city> \n <lat> \n <lon> \n
/// ```
fn parse_reply(data: &[u8]) -> Option<Reply<'_>> {
    let text = std::str::from_utf8(data).ok()?;
    let parts: Vec<&str> = text.splitn(11, '\n').collect();
    if parts.len() != 11
        || parts[0].as_bytes() != RESPONSE_MARKER
        || !parts[3].is_empty()
        || !parts[10].is_empty()
    {
        return None;
    }

    let challenge_text = parts[1].strip_prefix("getLocationForIP:")?;
    if challenge_text.len() != 8 {
        return None;
    }
    let challenge = u32::from_str_radix(challenge_text, 16).ok()?;
    let ip = Ipv4Addr::from(parse_ipv4(parts[2].as_bytes())?);

    Some(Reply {
        ip_text: parts[2],
        challenge,
        location: RemoteLocation {
            ip,
            country_code: parts[4].to_string(),
            country: parts[5].to_string(),
            region: parts[6].to_string(),
            city: parts[7].to_string(),
            latitude: parts[8].parse().ok()?,
            longitude: parts[9].parse().ok()?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &[u8] = b"ip2locResponse\ngetLocationForIP:abc12345\n8.8.8.8\n\nUS\nUNITED STATES\nCA\n\n34.05\n-118.25\n";

    #[test]
    fn test_parse_reply() {
        let reply = parse_reply(REPLY).unwrap();
        assert_eq!(reply.ip_text, "8.8.8.8");
        assert_eq!(reply.challenge, 0xabc1_2345);
        assert_eq!(reply.location.country, "UNITED STATES");
        assert_eq!(reply.location.city, "");
        assert_eq!(reply.location.longitude, -118.25);
    }

    #[test]
    fn test_parse_reply_rejects_malformed() {
        // no challenge
        assert!(parse_reply(b"ip2locResponse\ngetLocationForIP\n8.8.8.8\n\nUS\nX\nY\nZ\n1\n2\n").is_none());
        // missing final newline
        assert!(parse_reply(&REPLY[..REPLY.len() - 1]).is_none());
        // trailing data
        let mut extra = REPLY.to_vec();
        extra.extend_from_slice(b"junk");
        assert!(parse_reply(&extra).is_none());
        // legacy framing
        assert!(parse_reply(b"\xff\xff\xff\xffip2LocResponse \"getLocationForIP\"").is_none());
        // bad address
        let bad_ip = String::from_utf8_lossy(REPLY).replace("8.8.8.8", "8.8.8.08");
        assert!(parse_reply(bad_ip.as_bytes()).is_none());
    }

    #[test]
    fn test_batch_matches_challenges() {
        let mut batch = Batch::new(&["8.8.8.8", "bogus", "8.8.8.8"]);
        assert_eq!(batch.entries.len(), 2);
        assert_eq!(batch.remaining, 1);

        // Reply before any request was sent.
        assert_eq!(batch.accept(REPLY), Err("incorrect challenge in response"));

        batch.entries[0].challenges.push(0xabc1_2345);
        assert_eq!(batch.accept(REPLY), Ok(()));
        assert_eq!(batch.accept(REPLY), Err("duplicate response"));
        assert_eq!(batch.remaining, 0);

        let results = batch.finish("timed out");
        assert_eq!(results[0].0, "8.8.8.8");
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].1, Err(QueryFailure::NotAnIpAddress));
    }

    #[test]
    fn test_unanswered_addresses_report_last_error() {
        let batch = Batch::new(&["1.2.3.4"]);
        let results = batch.finish("timed out");
        assert_eq!(
            results[0].1,
            Err(QueryFailure::NoResponse("timed out".into()))
        );
    }

    #[test]
    fn test_client_password_rules() {
        assert!(QueryClient::connect("127.0.0.1:9", "abc").is_err());
        assert!(QueryClient::connect("127.0.0.1:9", "pass\nword").is_err());
        assert!(QueryClient::connect("127.0.0.1:9", &"p".repeat(129)).is_err());
        assert!(QueryClient::connect("127.0.0.1:9", "pass").is_ok());
    }

    #[test]
    fn test_batch_size_limit() {
        let mut client = QueryClient::connect("127.0.0.1:9", "pass").unwrap();
        let ips = vec!["1.2.3.4"; MAX_BATCH + 1];
        assert!(matches!(client.get_locations(&ips), Err(Error::Client(_))));
    }

    #[test]
    fn test_challenges_are_non_zero_and_vary() {
        let mut client = QueryClient::connect("127.0.0.1:9", "pass").unwrap();
        let challenges: Vec<u32> = (0..16).map(|_| client.next_challenge()).collect();
        assert!(challenges.iter().all(|&c| c != 0));
        let first = challenges[0];
        assert!(challenges.iter().any(|&c| c != first));
    }
}
