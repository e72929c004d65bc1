//! Wire protocol of the query server.
//!
//! A request datagram looks like:
//!
//! ```text
//! [\xff\xff\xff\xff] ip2locRequest \n <password> \n <command>[:<challenge>] \n <args...>
//! ```
//!
//! The optional four `0xFF` bytes select the legacy framing, which is
//! answered with a single quoted line instead of one field per line. The
//! challenge is eight lowercase hex digits echoed back so clients can pair
//! replies with requests.

use crate::lookup::Location;

/// Prefix selecting the legacy framing.
pub const LEGACY_PREFIX: [u8; 4] = [0xFF; 4];

/// Marker opening every request.
pub const REQUEST_MARKER: &[u8] = b"ip2locRequest\n";

/// Header of plain replies.
pub const RESPONSE_MARKER: &[u8] = b"ip2locResponse";

/// Header of legacy replies.
pub const LEGACY_RESPONSE_MARKER: &[u8] = b"ip2LocResponse";

/// Replies are cut at this many bytes.
pub const OUTGOING_BUFFER_SIZE: usize = 512;

/// Length of a challenge in hex digits.
pub const CHALLENGE_LEN: usize = 8;

/// Longest accepted address line.
pub const MAX_ADDRESS_LINE: usize = 127;

pub const CMD_QUIT: &[u8] = b"quit";
pub const CMD_GET_LOCATION_FOR_IP: &[u8] = b"getLocationForIP";

/// Check the framing and password of a datagram.
///
/// Returns whether the legacy framing was used and the payload following
/// the password line, or `None` if the datagram must be dropped.
pub fn authenticate<'a>(datagram: &'a [u8], password: &[u8]) -> Option<(bool, &'a [u8])> {
    if datagram.len() < LEGACY_PREFIX.len() {
        return None;
    }

    let (legacy, rest) = match datagram.strip_prefix(&LEGACY_PREFIX[..]) {
        Some(rest) => (true, rest),
        None => (false, datagram),
    };
    let rest = rest.strip_prefix(REQUEST_MARKER)?;
    let rest = rest.strip_prefix(password)?;
    let rest = rest.strip_prefix(b"\n")?;
    Some((legacy, rest))
}

/// The first line of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLine<'a> {
    /// The whole line as sent, echoed in replies
    pub line: &'a [u8],
    /// Command name, without the challenge
    pub name: &'a [u8],
    /// Challenge digits, without the `:`
    pub challenge: Option<&'a [u8]>,
    /// Bytes after the command line
    pub rest: &'a [u8],
}

/// Split off and validate the command line of a payload.
///
/// The line must end with `\n`. If it contains a `:`, everything after the
/// first one must be exactly eight characters of `[0-9a-f]`.
pub fn parse_command_line(payload: &[u8]) -> Option<CommandLine<'_>> {
    let end = payload.iter().position(|&b| b == b'\n')?;
    let line = &payload[..end];
    let rest = &payload[end + 1..];

    let (name, challenge) = match line.iter().position(|&b| b == b':') {
        Some(colon) => {
            let challenge = &line[colon + 1..];
            if !is_challenge(challenge) {
                return None;
            }
            (&line[..colon], Some(challenge))
        }
        None => (line, None),
    };

    Some(CommandLine {
        line,
        name,
        challenge,
        rest,
    })
}

/// Eight lowercase hex digits.
pub fn is_challenge(text: &[u8]) -> bool {
    text.len() == CHALLENGE_LEN && text.iter().all(|&b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// A request the worker knows how to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    /// Stop the server. Only honoured from the quit address.
    Quit,
    /// Resolve one address.
    GetLocationForIp {
        /// Command line to echo
        command: &'a [u8],
        /// Address line to echo
        address_text: &'a [u8],
        addr: u32,
    },
}

/// Parse an authenticated payload.
///
/// `quit` must be the whole payload and is refused in the legacy framing.
/// `getLocationForIP` takes one address line which must also be the last.
pub fn parse_request(payload: &[u8], legacy: bool) -> Option<Request<'_>> {
    let command = parse_command_line(payload)?;

    if command.name == CMD_QUIT {
        if !command.rest.is_empty() || legacy {
            return None;
        }
        return Some(Request::Quit);
    }

    if command.name == CMD_GET_LOCATION_FOR_IP {
        let end = command.rest.iter().position(|&b| b == b'\n')?;
        if end > MAX_ADDRESS_LINE || end + 1 != command.rest.len() {
            return None;
        }
        let address_text = &command.rest[..end];
        let addr = parse_ipv4(address_text)?;
        return Some(Request::GetLocationForIp {
            command: command.line,
            address_text,
            addr,
        });
    }

    None
}

/// Strict dotted-quad parser.
///
/// Exactly four octets of one to three digits, each at most 255 and without
/// leading zeros unless the octet is `0` itself.
pub fn parse_ipv4(text: &[u8]) -> Option<u32> {
    let mut addr: u32 = 0;
    let mut octets = 0;
    for part in text.split(|&b| b == b'.') {
        if octets == 4 {
            return None;
        }
        if part.is_empty() || part.len() > 3 || !part.iter().all(u8::is_ascii_digit) {
            return None;
        }
        if part.len() > 1 && part[0] == b'0' {
            return None;
        }
        let value = part
            .iter()
            .fold(0u32, |acc, &b| acc * 10 + u32::from(b - b'0'));
        if value > 255 {
            return None;
        }
        addr = (addr << 8) | value;
        octets += 1;
    }
    if octets == 4 {
        Some(addr)
    } else {
        None
    }
}

/// Reply buffer that silently drops bytes past [`OUTGOING_BUFFER_SIZE`].
#[derive(Debug, Default)]
pub struct ReplyWriter {
    buf: Vec<u8>,
}

impl ReplyWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(OUTGOING_BUFFER_SIZE),
        }
    }

    pub fn put(&mut self, bytes: &[u8]) -> &mut Self {
        let room = OUTGOING_BUFFER_SIZE - self.buf.len();
        let take = bytes.len().min(room);
        self.buf.extend_from_slice(&bytes[..take]);
        self
    }

    pub fn line(&mut self, bytes: &[u8]) -> &mut Self {
        self.put(bytes).put(b"\n")
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Build the reply to a `getLocationForIP` request.
pub fn location_reply(
    legacy: bool,
    command: &[u8],
    address_text: &[u8],
    location: &Location<'_>,
) -> Vec<u8> {
    let strings = [
        location.country_code(),
        location.country(),
        location.region(),
        location.city(),
    ];
    let latitude = format_coordinate(location.latitude());
    let longitude = format_coordinate(location.longitude());

    let mut out = ReplyWriter::new();
    if legacy {
        out.put(&LEGACY_PREFIX)
            .put(LEGACY_RESPONSE_MARKER)
            .put(b" \"")
            .put(command)
            .put(b"\" \"")
            .put(address_text)
            .put(b"\" \"");
        for s in strings {
            out.put(s.as_bytes()).put(b"\" \"");
        }
        out.put(latitude.as_bytes())
            .put(b"\" \"")
            .put(longitude.as_bytes())
            .put(b"\"");
    } else {
        out.line(RESPONSE_MARKER)
            .line(command)
            .line(address_text)
            .line(b"");
        for s in strings {
            out.line(s.as_bytes());
        }
        out.line(latitude.as_bytes()).line(longitude.as_bytes());
    }
    out.into_bytes()
}

/// Format a coordinate like C's `%g`: six significant digits, trailing
/// zeros removed, exponent form below 1e-4 and from 1e6 on.
pub fn format_coordinate(value: f64) -> String {
    const PRECISION: i32 = 6;

    if !value.is_finite() {
        return value.to_string();
    }

    let sci = format!("{:.*e}", (PRECISION - 1) as usize, value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exp < -4 || exp >= PRECISION {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let fixed = format!("{:.*}", (PRECISION - 1 - exp) as usize, value);
        trim_fraction(&fixed).to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}
