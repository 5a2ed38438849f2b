//! SSDP message codec
//!
//! SSDP messages are HTTP/1.1 messages carried in UDP datagrams: a start line
//! (request or status line), a block of `NAME: value` headers and a blank line.
//! Header names are matched case-insensitively; when a header is repeated the
//! last occurrence wins.

use std::fmt;
use std::net::SocketAddr;

use crate::error::{Result, SsdpError};
use crate::socket::SsdpPacket;
use crate::{multicast_socket_addr, ROOT_DEVICE};

/// Announcement verb.
pub const NOTIFY: &str = "NOTIFY";
/// Discovery verb.
pub const M_SEARCH: &str = "M-SEARCH";
/// Protocol version used on every start line.
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// `NTS` value announcing a device.
pub const NTS_ALIVE: &str = "ssdp:alive";
/// `NTS` value withdrawing a device.
pub const NTS_BYEBYE: &str = "ssdp:byebye";
/// `NTS` value announcing a changed description.
pub const NTS_UPDATE: &str = "ssdp:update";
/// `MAN` value required on searches.
pub const MAN_DISCOVER: &str = "\"ssdp:discover\"";

/// Header names used by the discovery protocol.
pub mod header {
    pub const HOST: &str = "HOST";
    pub const MAN: &str = "MAN";
    pub const MX: &str = "MX";
    pub const ST: &str = "ST";
    pub const NT: &str = "NT";
    pub const NTS: &str = "NTS";
    pub const USN: &str = "USN";
    pub const LOCATION: &str = "LOCATION";
    pub const CACHE_CONTROL: &str = "CACHE-CONTROL";
    pub const SERVER: &str = "SERVER";
    pub const EXT: &str = "EXT";
    pub const USER_AGENT: &str = "USER-AGENT";
    pub const DATE: &str = "DATE";
}

/// First line of an SSDP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// `METHOD target HTTP/1.1`
    Request {
        method: String,
        target: String,
        version: String,
    },
    /// `HTTP/1.1 status reason`
    Response {
        version: String,
        status: u16,
        reason: String,
    },
}

impl StartLine {
    fn parse(line: &str) -> Result<Self> {
        let line = line.trim();

        if line.starts_with("HTTP/") {
            let mut parts = line.splitn(3, ' ');
            let version = parts.next().unwrap_or_default().to_string();
            let status = parts
                .next()
                .and_then(|s| s.trim().parse::<u16>().ok())
                .ok_or_else(|| SsdpError::MalformedMessage(format!("bad status line: {}", line)))?;
            let reason = parts.next().unwrap_or_default().trim().to_string();
            return Ok(StartLine::Response {
                version,
                status,
                reason,
            });
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [method, target, version] if version.starts_with("HTTP/") => Ok(StartLine::Request {
                method: method.to_string(),
                target: target.to_string(),
                version: version.to_string(),
            }),
            _ => Err(SsdpError::MalformedMessage(format!(
                "bad request line: {}",
                line
            ))),
        }
    }
}

impl fmt::Display for StartLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartLine::Request {
                method,
                target,
                version,
            } => write!(f, "{} {} {}", method, target, version),
            StartLine::Response {
                version,
                status,
                reason,
            } => write!(f, "{} {} {}", version, status, reason),
        }
    }
}

/// Ordered header mapping with case-insensitive, unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a header value, ignoring the case of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Set a header, replacing the value of an existing header with the same name.
    ///
    /// CR and LF are stripped from both name and value so a header always
    /// serializes to exactly one line.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = single_line(name.into());
        let value = single_line(value.into());
        match self
            .entries
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self
            .entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn single_line(text: String) -> String {
    if text.contains(['\r', '\n']) {
        text.replace(['\r', '\n'], "")
    } else {
        text
    }
}

/// A parsed SSDP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpMessage {
    pub start_line: StartLine,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl SsdpMessage {
    /// Create an empty request with the given method and request target.
    pub fn request(method: &str, target: &str) -> Self {
        Self {
            start_line: StartLine::Request {
                method: method.to_string(),
                target: target.to_string(),
                version: HTTP_VERSION.to_string(),
            },
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Create an empty response with the given status.
    pub fn response(status: u16, reason: &str) -> Self {
        Self {
            start_line: StartLine::Response {
                version: HTTP_VERSION.to_string(),
                status,
                reason: reason.to_string(),
            },
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Builder-style header setter.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Parse a single message from a datagram.
    ///
    /// # Errors
    ///
    /// Returns `SsdpError::MalformedMessage` for non UTF-8 input, an invalid start
    /// line, or a header line without a `:` separator.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| SsdpError::MalformedMessage(format!("invalid UTF-8: {}", e)))?;

        let (head, body) = split_head(text);
        let mut lines = head.split('\n').map(|line| line.trim_end_matches('\r'));

        let first = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .ok_or_else(|| SsdpError::MalformedMessage("empty message".to_string()))?;
        let start_line = StartLine::parse(first)?;

        let mut headers = Headers::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                SsdpError::MalformedMessage(format!("header without separator: {}", line))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(SsdpError::MalformedMessage(format!(
                    "header without name: {}",
                    line
                )));
            }
            headers.set(name, value.trim());
        }

        Ok(Self {
            start_line,
            headers,
            body: body.as_bytes().to_vec(),
        })
    }

    /// Serialize to wire format with CRLF line endings and the terminating blank line.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&self.start_line.to_string());
        out.push_str("\r\n");
        for (name, value) in self.headers.iter() {
            if value.is_empty() {
                out.push_str(&format!("{}:\r\n", name));
            } else {
                out.push_str(&format!("{}: {}\r\n", name, value));
            }
        }
        out.push_str("\r\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// `M-SEARCH` request for `search_target` with a response window of `mx` seconds.
    pub fn search_request(search_target: &str, mx: u32, user_agent: &str) -> Self {
        Self::request(M_SEARCH, "*")
            .with_header(header::HOST, multicast_socket_addr().to_string())
            .with_header(header::MAN, MAN_DISCOVER)
            .with_header(header::MX, mx.to_string())
            .with_header(header::ST, search_target)
            .with_header(header::USER_AGENT, user_agent)
    }

    /// Unicast response to a search. `EXT` is always present and empty.
    pub fn search_response(
        search_target: &str,
        usn: &str,
        location: &str,
        max_age: u32,
        server: &str,
    ) -> Self {
        Self::response(200, "OK")
            .with_header(header::CACHE_CONTROL, format!("max-age={}", max_age))
            .with_header(header::EXT, "")
            .with_header(header::LOCATION, location)
            .with_header(header::SERVER, server)
            .with_header(header::ST, search_target)
            .with_header(header::USN, usn)
    }

    /// `NOTIFY ssdp:alive` announcement.
    pub fn notify_alive(
        notification_type: &str,
        usn: &str,
        location: &str,
        max_age: u32,
        server: &str,
    ) -> Self {
        Self::request(NOTIFY, "*")
            .with_header(header::HOST, multicast_socket_addr().to_string())
            .with_header(header::CACHE_CONTROL, format!("max-age={}", max_age))
            .with_header(header::LOCATION, location)
            .with_header(header::NT, notification_type)
            .with_header(header::NTS, NTS_ALIVE)
            .with_header(header::SERVER, server)
            .with_header(header::USN, usn)
    }

    /// `NOTIFY ssdp:byebye` withdrawal.
    pub fn notify_byebye(notification_type: &str, usn: &str) -> Self {
        Self::request(NOTIFY, "*")
            .with_header(header::HOST, multicast_socket_addr().to_string())
            .with_header(header::NT, notification_type)
            .with_header(header::NTS, NTS_BYEBYE)
            .with_header(header::USN, usn)
    }

    pub fn method(&self) -> Option<&str> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match &self.start_line {
            StartLine::Response { status, .. } => Some(*status),
            StartLine::Request { .. } => None,
        }
    }

    /// Announcement (`NOTIFY`) request.
    pub fn is_notify(&self) -> bool {
        self.method()
            .is_some_and(|m| m.eq_ignore_ascii_case(NOTIFY))
    }

    /// Discovery (`M-SEARCH`) request.
    pub fn is_search(&self) -> bool {
        self.method()
            .is_some_and(|m| m.eq_ignore_ascii_case(M_SEARCH))
    }

    /// Successful search response.
    pub fn is_response(&self) -> bool {
        self.status() == Some(200)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn location(&self) -> Option<&str> {
        self.header(header::LOCATION).filter(|v| !v.is_empty())
    }

    pub fn usn(&self) -> Option<&str> {
        self.header(header::USN).filter(|v| !v.is_empty())
    }

    /// Unique device name: the `USN` up to the first `::`.
    pub fn udn(&self) -> Option<&str> {
        let usn = self.usn()?;
        let udn = usn.split("::").next().unwrap_or(usn).trim();
        (!udn.is_empty()).then_some(udn)
    }

    pub fn nt(&self) -> Option<&str> {
        self.header(header::NT)
    }

    pub fn nts(&self) -> Option<&str> {
        self.header(header::NTS)
    }

    pub fn st(&self) -> Option<&str> {
        self.header(header::ST)
    }

    pub fn server(&self) -> Option<&str> {
        self.header(header::SERVER)
    }

    /// Search response window in seconds.
    pub fn mx(&self) -> Option<u32> {
        self.header(header::MX)?.trim().parse().ok()
    }

    /// `max-age` directive of `CACHE-CONTROL`, tolerating spaces around `=`.
    pub fn max_age(&self) -> Option<u32> {
        self.header(header::CACHE_CONTROL)?
            .split(',')
            .map(str::trim)
            .find_map(|directive| {
                let (name, value) = directive.split_once('=')?;
                if name.trim().eq_ignore_ascii_case("max-age") {
                    value.trim().parse().ok()
                } else {
                    None
                }
            })
    }

    /// Notification or search target: `NT` for announcements, `ST` otherwise.
    pub fn target(&self) -> Option<&str> {
        if self.is_notify() {
            self.nt()
        } else {
            self.st()
        }
    }

    pub fn is_alive(&self) -> bool {
        self.is_notify() && self.nts().is_some_and(|v| v.eq_ignore_ascii_case(NTS_ALIVE))
    }

    pub fn is_byebye(&self) -> bool {
        self.is_notify() && self.nts().is_some_and(|v| v.eq_ignore_ascii_case(NTS_BYEBYE))
    }

    /// Message concerns a root device.
    pub fn is_root_device(&self) -> bool {
        self.target().is_some_and(|t| t.eq_ignore_ascii_case(ROOT_DEVICE))
            || self.usn().is_some_and(|usn| usn.ends_with("::upnp:rootdevice"))
    }
}

impl fmt::Display for SsdpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

/// A parsed message together with the address it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message: SsdpMessage,
    pub from: SocketAddr,
}

impl InboundMessage {
    pub fn from_packet(packet: &SsdpPacket) -> Result<Self> {
        Ok(Self {
            message: SsdpMessage::parse(&packet.bytes)?,
            from: packet.from,
        })
    }
}

fn split_head(text: &str) -> (&str, &str) {
    if let Some(index) = text.find("\r\n\r\n") {
        (&text[..index], &text[index + 4..])
    } else if let Some(index) = text.find("\n\n") {
        (&text[..index], &text[index + 2..])
    } else {
        (text, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SONOS_RESPONSE: &str = "HTTP/1.1 200 OK\r\n\
        CACHE-CONTROL: max-age = 1800\r\n\
        EXT:\r\n\
        LOCATION: http://192.168.1.100:1400/xml/device_description.xml\r\n\
        SERVER: Linux UPnP/1.0 Sonos/70.3-88200 (ZPS9)\r\n\
        ST: upnp:rootdevice\r\n\
        USN: uuid:RINCON_000E58A0123456::upnp:rootdevice\r\n\
        \r\n";

    #[test]
    fn test_parse_search_response() {
        let message = SsdpMessage::parse(SONOS_RESPONSE.as_bytes()).unwrap();

        assert!(message.is_response());
        assert!(!message.is_notify());
        assert_eq!(
            message.location(),
            Some("http://192.168.1.100:1400/xml/device_description.xml")
        );
        assert_eq!(message.st(), Some("upnp:rootdevice"));
        assert_eq!(message.udn(), Some("uuid:RINCON_000E58A0123456"));
        assert_eq!(message.max_age(), Some(1800));
        assert_eq!(message.header("EXT"), Some(""));
        assert!(message.is_root_device());
    }

    #[test]
    fn test_parse_case_insensitive_headers() {
        let raw = "NOTIFY * HTTP/1.1\r\n\
            host: 239.255.255.250:1900\r\n\
            nt: upnp:rootdevice\r\n\
            nts: ssdp:byebye\r\n\
            usn: uuid:abc::upnp:rootdevice\r\n\
            \r\n";

        let message = SsdpMessage::parse(raw.as_bytes()).unwrap();
        assert!(message.is_notify());
        assert!(message.is_byebye());
        assert!(!message.is_alive());
        assert_eq!(message.header("NT"), Some("upnp:rootdevice"));
        assert_eq!(message.header("Nts"), Some("ssdp:byebye"));
        assert_eq!(message.udn(), Some("uuid:abc"));
    }

    #[test]
    fn test_duplicate_header_last_wins() {
        let raw = "M-SEARCH * HTTP/1.1\r\nST: first\r\nst: second\r\n\r\n";
        let message = SsdpMessage::parse(raw.as_bytes()).unwrap();

        assert!(message.is_search());
        assert_eq!(message.st(), Some("second"));
        assert_eq!(message.headers.len(), 1);
    }

    #[test]
    fn test_parse_without_blank_line_terminator() {
        let raw = "M-SEARCH * HTTP/1.1\r\nMX: 2\r\nST: ssdp:all";
        let message = SsdpMessage::parse(raw.as_bytes()).unwrap();
        assert_eq!(message.mx(), Some(2));
        assert_eq!(message.st(), Some("ssdp:all"));
    }

    #[test]
    fn test_parse_body_is_preserved() {
        let raw = "NOTIFY * HTTP/1.1\r\nNT: x\r\n\r\npayload";
        let message = SsdpMessage::parse(raw.as_bytes()).unwrap();
        assert_eq!(message.body, b"payload");
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            SsdpMessage::parse(b""),
            Err(SsdpError::MalformedMessage(_))
        ));
        assert!(matches!(
            SsdpMessage::parse(b"This is not a valid SSDP response\r\nSome random text\r\n"),
            Err(SsdpError::MalformedMessage(_))
        ));
        assert!(matches!(
            SsdpMessage::parse(b"HTTP/1.1 abc OK\r\n\r\n"),
            Err(SsdpError::MalformedMessage(_))
        ));
        assert!(matches!(
            SsdpMessage::parse(b"NOTIFY * HTTP/1.1\r\nno separator here\r\n\r\n"),
            Err(SsdpError::MalformedMessage(_))
        ));
        assert!(matches!(
            SsdpMessage::parse(&[0xff, 0xfe, 0x00]),
            Err(SsdpError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_serialize_empty_header_value() {
        let message = SsdpMessage::search_response(
            "upnp:rootdevice",
            "uuid:abc::upnp:rootdevice",
            "http://10.0.0.1/desc.xml",
            1800,
            "test/1.0 UPnP/1.1 upnp-sdk/0.3",
        );
        let text = String::from_utf8(message.to_bytes()).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("\r\nEXT:\r\n"));
        assert!(text.contains("\r\nCACHE-CONTROL: max-age=1800\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_search_request_headers() {
        let message = SsdpMessage::search_request("upnp:rootdevice", 3, "upnp-sdk/0.3");
        let text = String::from_utf8(message.to_bytes()).unwrap();

        assert!(text.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(text.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(text.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(text.contains("MX: 3\r\n"));
        assert!(text.contains("ST: upnp:rootdevice\r\n"));
    }

    #[test]
    fn test_max_age_variants() {
        let with_directives = SsdpMessage::response(200, "OK")
            .with_header(header::CACHE_CONTROL, "no-cache=\"Ext\", max-age=900");
        assert_eq!(with_directives.max_age(), Some(900));

        let missing = SsdpMessage::response(200, "OK");
        assert_eq!(missing.max_age(), None);
    }

    #[test]
    fn test_udn_without_suffix() {
        let message = SsdpMessage::notify_byebye("uuid:device-1", "uuid:device-1");
        assert_eq!(message.udn(), Some("uuid:device-1"));
        assert!(!message.is_root_device());
    }

    #[test]
    fn test_headers_remove() {
        let mut headers = Headers::new();
        headers.set("Location", "a");
        headers.set("ST", "b");
        assert_eq!(headers.remove("location"), Some("a".to_string()));
        assert!(!headers.contains("LOCATION"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_line_breaks_in_header_values_are_stripped() {
        let message = SsdpMessage::search_response(
            "upnp:rootdevice",
            "uuid:a::upnp:rootdevice\r\nLOCATION: http://attacker/evil.xml",
            "http://192.168.1.2/d.xml",
            1800,
            "Linux\nUPnP/1.1 test/1.0",
        );
        let bytes = message.to_bytes();
        let text = String::from_utf8(bytes.clone()).unwrap();

        assert_eq!(text.lines().filter(|l| l.starts_with("LOCATION:")).count(), 1);
        let parsed = SsdpMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.headers.len(), message.headers.len());
        assert_eq!(parsed.location(), Some("http://192.168.1.2/d.xml"));
        assert_eq!(
            parsed.usn(),
            Some("uuid:a::upnp:rootdeviceLOCATION: http://attacker/evil.xml")
        );
        assert_eq!(parsed.server(), Some("LinuxUPnP/1.1 test/1.0"));
    }
}
