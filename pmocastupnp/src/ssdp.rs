/*!
The PMOCast SSDP client is a *control point*.
It must **not** bind to UDP port 1900.

Reason:

* A UPnP device (server mode) must listen on 0.0.0.0:1900 for M-SEARCH.
* A control point only needs to send M-SEARCH and receive unicast HTTP/200
  replies, so it binds an ephemeral port.
* If a client binds 1900 next to a device stack (even with SO_REUSEPORT) the
  kernel load-balances incoming datagrams between sockets and replies are
  lost randomly.

The client still joins the multicast group so NOTIFY traffic can be observed
during debugging; only the unicast search responses are actually consumed.
*/

use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Adresse multicast SSDP
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// Port SSDP
pub const SSDP_PORT: u16 = 1900;

/// Search target used for renderer discovery
pub const SEARCH_TARGET: &str = "upnp:rootdevice";

/// Validity applied when a response carries no usable max-age
pub const DEFAULT_MAX_AGE: u32 = 100;

/// Read deadline on the discovery socket; also paces the discovery loop.
pub const READ_DEADLINE: Duration = Duration::from_secs(5);

/// One qualifying M-SEARCH response.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub location: String,
    pub max_age: u32,
    pub from: SocketAddr,
}

/// Client SSDP: envoie des M-SEARCH et écoute les réponses unicast.
pub struct SsdpClient {
    socket: UdpSocket,
}

impl SsdpClient {
    pub fn new() -> io::Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;

        let bind_addr: SocketAddr = "0.0.0.0:0".parse().unwrap();
        socket2.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket2.into();
        socket.set_read_timeout(Some(READ_DEADLINE))?;
        socket.set_multicast_loop_v4(true)?; // utile en dev local

        for iface in get_if_addrs::get_if_addrs()? {
            if let IpAddr::V4(ipv4) = iface.ip() {
                if !ipv4.is_loopback() {
                    match socket.join_multicast_v4(&SSDP_MULTICAST_ADDR.parse().unwrap(), &ipv4) {
                        Ok(()) => {
                            debug!("SSDP: joined {} on {}", SSDP_MULTICAST_ADDR, ipv4);
                        }
                        Err(e) => {
                            warn!(
                                "SSDP: failed to join {} on {}: {}",
                                SSDP_MULTICAST_ADDR, ipv4, e
                            );
                        }
                    }
                }
            }
        }

        debug!("✅ SSDP client ready on ephemeral port");

        Ok(Self { socket })
    }

    /// Envoie un M-SEARCH pour un type donné
    pub fn send_msearch(&self, st: &str, mx: u32) -> io::Result<()> {
        let mx = mx.max(1); // MX doit être >= 1
        let msg = format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}:{}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {}\r\n\
             ST: {}\r\n\
             USER-AGENT: PMOCast SSDP Client\r\n\
             \r\n",
            SSDP_MULTICAST_ADDR, SSDP_PORT, mx, st
        );

        let addr: SocketAddr = format!("{}:{}", SSDP_MULTICAST_ADDR, SSDP_PORT)
            .parse()
            .unwrap();

        self.socket.send_to(msg.as_bytes(), addr)?;
        trace!("📤 M-SEARCH sent (ST={}, MX={})", st, mx);
        Ok(())
    }

    /// Blocks up to the read deadline for one search response.
    ///
    /// Returns `Ok(None)` on deadline expiry or when the datagram is not a
    /// usable search response (NOTIFY traffic, other control points, ...).
    pub fn recv_response(&self) -> io::Result<Option<SearchResponse>> {
        let mut buf = [0u8; 2048];
        match self.socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                let data = String::from_utf8_lossy(&buf[..n]);
                Ok(parse_search_response(&data, from))
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Parses one datagram as an HTTP/200 search response.
pub fn parse_search_response(data: &str, from: SocketAddr) -> Option<SearchResponse> {
    let mut lines = data.lines();
    let first_line = lines.next()?.trim();
    let upper = first_line.to_ascii_uppercase();

    if !(upper.starts_with("HTTP/") && upper.contains(" 200 ")) {
        trace!("Ignoring SSDP message from {}: {}", from, first_line);
        return None;
    }

    let headers = parse_headers(lines);

    let location = match headers.get("LOCATION") {
        Some(loc) => loc.to_string(),
        None => {
            trace!("M-SEARCH response from {} missing LOCATION header, ignoring", from);
            return None;
        }
    };
    let max_age = parse_max_age(headers.get("CACHE-CONTROL"));

    Some(SearchResponse {
        location,
        max_age,
        from,
    })
}

fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();

        // Empty line marks end of headers
        if line.is_empty() {
            break;
        }

        // Split on first ':' only (values may contain ':')
        if let Some(colon_pos) = line.find(':') {
            let (name, value_with_colon) = line.split_at(colon_pos);
            let value = &value_with_colon[1..];

            let name = name.trim().to_ascii_uppercase();
            let value = value.trim().to_string();

            if !name.is_empty() && !value.is_empty() {
                headers.insert(name, value);
            }
        } else {
            trace!("Skipping line without colon: '{}'", line);
        }
    }
    headers
}

fn parse_max_age(value: Option<&String>) -> u32 {
    if let Some(v) = value {
        let lower = v.to_ascii_lowercase();
        if let Some(idx) = lower.find("max-age") {
            let after_key = &v[idx + 7..];
            let after_eq = after_key.trim_start().trim_start_matches('=').trim_start();
            let digits: String = after_eq
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(age) = digits.parse::<u32>() {
                return age;
            }
        }
        trace!(
            "Could not parse max-age from CACHE-CONTROL: '{}', using default {}",
            v, DEFAULT_MAX_AGE
        );
    }
    DEFAULT_MAX_AGE
}

/// Address of the local interface that routes to `peer`.
///
/// UDP connect does not touch the network; it only asks the OS which
/// interface it would use to reach the target. Falls back to loopback when
/// that fails.
pub fn local_addr_for(peer: SocketAddr) -> String {
    match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => {
            if socket.connect(peer).is_ok() {
                if let Ok(local_addr) = socket.local_addr() {
                    return local_addr.ip().to_string();
                }
            }
            "127.0.0.1".to_string()
        }
        Err(_) => "127.0.0.1".to_string(),
    }
}
