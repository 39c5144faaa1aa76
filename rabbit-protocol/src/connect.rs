//! Connection target descriptor
//!
//! Wire format:
//! ```text
//! +----------+--------------+--------------------------+-----------+
//! | protocol | address type |         address          | port (BE) |
//! |    1     |      1       | 4 / 16 / 1 + len(domain) |     2     |
//! +----------+--------------+--------------------------+-----------+
//! ```
//!
//! Protocol: 0x01 TCP, 0x02 UDP. Address type: 0x01 IPv4, 0x02 IPv6,
//! 0x03 domain (length-prefixed), 0x04 unknown (never encoded).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::codec::{
    Serializable, ADDRESS_TYPE_LEN, IPV4_ADDR_LEN, IPV6_ADDR_LEN, LENGTH_PREFIX_LEN,
    MAX_FIELD_LEN, PORT_LEN, PROTOCOL_TYPE_LEN,
};
use crate::error::ensure_len;
use crate::{Error, Result};

/// Header bytes that precede the address
const CONNECT_PREFIX_LEN: usize = PROTOCOL_TYPE_LEN + ADDRESS_TYPE_LEN;

/// Shortest textual IPv4 address ("0.0.0.0")
const MIN_IPV4_TEXT_LEN: usize = 7;

/// Shortest textual IPv6 address ("::")
const MIN_IPV6_TEXT_LEN: usize = 2;

/// Transport protocol the proxied connection should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolType {
    Tcp = 0x01,
    Udp = 0x02,
    /// Reserved, not encodable yet
    Raw = 0x03,
    /// Reserved, not encodable yet
    Icmp = 0x04,
}

impl ProtocolType {
    /// Check if this protocol can be put on the wire
    pub const fn is_supported(&self) -> bool {
        matches!(self, ProtocolType::Tcp | ProtocolType::Udp)
    }
}

impl TryFrom<u8> for ProtocolType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(ProtocolType::Tcp),
            0x02 => Ok(ProtocolType::Udp),
            other => Err(Error::ProtocolIllegal(other)),
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolType::Tcp => "tcp",
            ProtocolType::Udp => "udp",
            ProtocolType::Raw => "raw",
            ProtocolType::Icmp => "icmp",
        };
        f.write_str(name)
    }
}

/// How the host of a [`ConnectType`] is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AddressType {
    Ipv4 = 0x01,
    Ipv6 = 0x02,
    Domain = 0x03,
    /// Decode fallback only
    Unknown = 0x04,
}

impl AddressType {
    /// Guess the address type from host text
    pub fn detect(host: &str) -> Self {
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => AddressType::Ipv4,
            Ok(IpAddr::V6(_)) => AddressType::Ipv6,
            Err(_) if host.is_empty() => AddressType::Unknown,
            Err(_) => AddressType::Domain,
        }
    }
}

impl TryFrom<u8> for AddressType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(AddressType::Ipv4),
            0x02 => Ok(AddressType::Ipv6),
            0x03 => Ok(AddressType::Domain),
            other => Err(Error::AddressTypeIllegal(other)),
        }
    }
}

/// Destination of a proxied connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectType {
    pub protocol: ProtocolType,
    pub address_type: AddressType,
    /// Dotted-decimal, colon-hex or domain name, per `address_type`
    pub host: String,
    pub port: u16,
}

impl ConnectType {
    /// Create a descriptor, inferring the address type from `host`
    pub fn new(protocol: ProtocolType, host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            protocol,
            address_type: AddressType::detect(&host),
            host,
            port,
        }
    }

    /// TCP connection to `host:port`
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(ProtocolType::Tcp, host, port)
    }

    /// UDP association with `host:port`
    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self::new(ProtocolType::Udp, host, port)
    }

    /// Create a descriptor for a resolved socket address
    pub fn from_socket_addr(protocol: ProtocolType, addr: SocketAddr) -> Self {
        let address_type = match addr {
            SocketAddr::V4(_) => AddressType::Ipv4,
            SocketAddr::V6(_) => AddressType::Ipv6,
        };
        Self {
            protocol,
            address_type,
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    /// `host:port`, bracketing IPv6 hosts
    pub fn target(&self) -> String {
        match self.address_type {
            AddressType::Ipv6 => format!("[{}]:{}", self.host, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }

    /// Bytes still to read once the two-byte prefix and, for domains, the
    /// length byte have been seen
    ///
    /// Returns `Ok(None)` when the prefix is a domain header whose length byte
    /// has not been read yet.
    pub fn remaining_len(prefix: &[u8]) -> Result<Option<usize>> {
        ensure_len(prefix, CONNECT_PREFIX_LEN)?;
        ProtocolType::try_from(prefix[0])?;
        match AddressType::try_from(prefix[PROTOCOL_TYPE_LEN])? {
            AddressType::Ipv4 => Ok(Some(IPV4_ADDR_LEN + PORT_LEN)),
            AddressType::Ipv6 => Ok(Some(IPV6_ADDR_LEN + PORT_LEN)),
            AddressType::Domain if prefix.len() > CONNECT_PREFIX_LEN => {
                Ok(Some(prefix[CONNECT_PREFIX_LEN] as usize + PORT_LEN))
            }
            AddressType::Domain => Ok(None),
            AddressType::Unknown => Err(Error::AddressTypeIllegal(AddressType::Unknown as u8)),
        }
    }

    /// Length of the fixed prefix a reader must fetch first
    pub const fn prefix_len() -> usize {
        CONNECT_PREFIX_LEN
    }

    fn parse_host<T: std::str::FromStr>(&self, min: usize) -> Result<T> {
        if self.host.len() < min {
            return Err(Error::HostTooShort {
                host: self.host.clone(),
                min,
            });
        }
        self.host
            .parse::<T>()
            .map_err(|_| Error::HostIllegal(self.host.clone()))
    }
}

impl Serializable for ConnectType {
    fn marshal(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.protocol.is_supported() {
            return Err(Error::ProtocolIllegal(self.protocol as u8));
        }

        match self.address_type {
            AddressType::Ipv4 => {
                let addr: Ipv4Addr = self.parse_host(MIN_IPV4_TEXT_LEN)?;
                let needed = CONNECT_PREFIX_LEN + IPV4_ADDR_LEN + PORT_LEN;
                ensure_len(buf, needed)?;

                buf[CONNECT_PREFIX_LEN..CONNECT_PREFIX_LEN + IPV4_ADDR_LEN]
                    .copy_from_slice(&addr.octets());
                self.write_header_and_port(buf, needed);
                Ok(needed)
            }
            AddressType::Ipv6 => {
                let addr: Ipv6Addr = self.parse_host(MIN_IPV6_TEXT_LEN)?;
                let needed = CONNECT_PREFIX_LEN + IPV6_ADDR_LEN + PORT_LEN;
                ensure_len(buf, needed)?;

                buf[CONNECT_PREFIX_LEN..CONNECT_PREFIX_LEN + IPV6_ADDR_LEN]
                    .copy_from_slice(&addr.octets());
                self.write_header_and_port(buf, needed);
                Ok(needed)
            }
            AddressType::Domain => {
                let host = self.host.as_bytes();
                if host.len() > MAX_FIELD_LEN {
                    return Err(Error::FieldTooLong {
                        field: "domain",
                        len: host.len(),
                    });
                }
                let needed = self.encoded_len();
                ensure_len(buf, needed)?;

                let start = CONNECT_PREFIX_LEN + LENGTH_PREFIX_LEN;
                buf[CONNECT_PREFIX_LEN] = host.len() as u8;
                buf[start..start + host.len()].copy_from_slice(host);
                self.write_header_and_port(buf, needed);
                Ok(needed)
            }
            AddressType::Unknown => Err(Error::AddressTypeIllegal(AddressType::Unknown as u8)),
        }
    }

    fn unmarshal(buf: &[u8]) -> Result<(Self, usize)> {
        ensure_len(buf, CONNECT_PREFIX_LEN)?;
        let protocol = ProtocolType::try_from(buf[0])?;
        let address_type = AddressType::try_from(buf[PROTOCOL_TYPE_LEN])?;

        let (host, addr_end) = match address_type {
            AddressType::Ipv4 => {
                let end = CONNECT_PREFIX_LEN + IPV4_ADDR_LEN;
                ensure_len(buf, end + PORT_LEN)?;
                let mut octets = [0u8; IPV4_ADDR_LEN];
                octets.copy_from_slice(&buf[CONNECT_PREFIX_LEN..end]);
                (Ipv4Addr::from(octets).to_string(), end)
            }
            AddressType::Ipv6 => {
                let end = CONNECT_PREFIX_LEN + IPV6_ADDR_LEN;
                ensure_len(buf, end + PORT_LEN)?;
                let mut octets = [0u8; IPV6_ADDR_LEN];
                octets.copy_from_slice(&buf[CONNECT_PREFIX_LEN..end]);
                (Ipv6Addr::from(octets).to_string(), end)
            }
            AddressType::Domain => {
                ensure_len(buf, CONNECT_PREFIX_LEN + LENGTH_PREFIX_LEN)?;
                let len = buf[CONNECT_PREFIX_LEN] as usize;
                let start = CONNECT_PREFIX_LEN + LENGTH_PREFIX_LEN;
                let end = start + len;
                ensure_len(buf, end + PORT_LEN)?;
                let host = std::str::from_utf8(&buf[start..end])
                    .map_err(|_| Error::HostIllegal("domain is not valid UTF-8".into()))?;
                (host.to_owned(), end)
            }
            AddressType::Unknown => {
                return Err(Error::AddressTypeIllegal(AddressType::Unknown as u8))
            }
        };

        let port = u16::from_be_bytes([buf[addr_end], buf[addr_end + 1]]);
        Ok((
            Self {
                protocol,
                address_type,
                host,
                port,
            },
            addr_end + PORT_LEN,
        ))
    }

    fn encoded_len(&self) -> usize {
        let addr_len = match self.address_type {
            AddressType::Ipv4 => IPV4_ADDR_LEN,
            AddressType::Ipv6 => IPV6_ADDR_LEN,
            AddressType::Domain => LENGTH_PREFIX_LEN + self.host.len(),
            AddressType::Unknown => 0,
        };
        CONNECT_PREFIX_LEN + addr_len + PORT_LEN
    }
}

impl ConnectType {
    /// Fill in the two type bytes and the trailing port of a checked buffer
    fn write_header_and_port(&self, buf: &mut [u8], end: usize) {
        buf[0] = self.protocol as u8;
        buf[PROTOCOL_TYPE_LEN] = self.address_type as u8;
        buf[end - PORT_LEN..end].copy_from_slice(&self.port.to_be_bytes());
    }
}

impl fmt::Display for ConnectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BufferPool;

    fn roundtrip(connect: &ConnectType) -> (ConnectType, usize) {
        let mut buf = [0u8; 512];
        let n = connect.marshal(&mut buf).unwrap();
        assert_eq!(n, connect.encoded_len());
        let (decoded, consumed) = ConnectType::unmarshal(&buf[..n]).unwrap();
        assert_eq!(consumed, n);
        (decoded, n)
    }

    #[test]
    fn test_connect_domain_roundtrip() {
        let pool = BufferPool::default();
        let mut buf = pool.get();

        let connect = ConnectType::tcp("qiaohong.org", 443);
        assert_eq!(connect.address_type, AddressType::Domain);

        let n = connect.marshal(&mut buf).unwrap();
        assert_eq!(n, 17);
        assert_eq!(&buf[..3], &[0x01, 0x03, 12]);
        assert_eq!(&buf[3..15], b"qiaohong.org");
        assert_eq!(&buf[15..17], &[0x01, 0xBB]);

        let (decoded, consumed) = ConnectType::unmarshal(&buf[..n]).unwrap();
        assert_eq!(consumed, 17);
        assert_eq!(decoded.host, "qiaohong.org");
        assert_eq!(decoded.port, 443);
        assert_eq!(decoded, connect);
    }

    #[test]
    fn test_connect_roundtrip_all_kinds() {
        let cases = [
            ConnectType::tcp("192.168.1.100", 8080),
            ConnectType::udp("8.8.8.8", 53),
            ConnectType::tcp("2001:db8::1", 443),
            ConnectType::udp("::1", 5353),
            ConnectType::udp("example.com", 0),
            ConnectType::tcp("d".repeat(255), u16::MAX),
        ];

        for connect in cases {
            let (decoded, _) = roundtrip(&connect);
            assert_eq!(decoded, connect);
        }
    }

    #[test]
    fn test_connect_wire_lengths() {
        assert_eq!(roundtrip(&ConnectType::tcp("10.0.0.1", 80)).1, 8);
        assert_eq!(roundtrip(&ConnectType::tcp("fe80::1", 80)).1, 20);
    }

    #[test]
    fn test_connect_ipv4_bytes() {
        let mut buf = [0u8; 16];
        let n = ConnectType::udp("1.2.3.4", 0x1234).marshal(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x02, 0x01, 1, 2, 3, 4, 0x12, 0x34]);
    }

    #[test]
    fn test_connect_illegal_protocol_untouched() {
        let mut buf = [0xAAu8; 64];
        for protocol in [ProtocolType::Raw, ProtocolType::Icmp] {
            let connect = ConnectType::new(protocol, "example.com", 80);
            assert!(matches!(
                connect.marshal(&mut buf),
                Err(Error::ProtocolIllegal(_))
            ));
        }
        assert!(buf.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_connect_unknown_address_type() {
        let mut buf = [0u8; 64];
        let connect = ConnectType {
            protocol: ProtocolType::Tcp,
            address_type: AddressType::Unknown,
            host: "whatever".into(),
            port: 1,
        };
        assert!(matches!(
            connect.marshal(&mut buf),
            Err(Error::AddressTypeIllegal(0x04))
        ));
        assert_eq!(AddressType::detect(""), AddressType::Unknown);
    }

    #[test]
    fn test_connect_host_constraints() {
        let mut buf = [0u8; 64];

        let short = ConnectType {
            protocol: ProtocolType::Tcp,
            address_type: AddressType::Ipv4,
            host: "1.2".into(),
            port: 80,
        };
        assert!(matches!(
            short.marshal(&mut buf),
            Err(Error::HostTooShort { min: 7, .. })
        ));

        let garbage = ConnectType {
            address_type: AddressType::Ipv6,
            host: "not-an-address".into(),
            ..short.clone()
        };
        assert!(matches!(
            garbage.marshal(&mut buf),
            Err(Error::HostIllegal(_))
        ));

        let too_long = ConnectType::tcp("d".repeat(256), 80);
        assert!(matches!(
            too_long.marshal(&mut buf),
            Err(Error::FieldTooLong { len: 256, .. })
        ));
    }

    #[test]
    fn test_connect_marshal_buffer_too_short() {
        let connect = ConnectType::tcp("qiaohong.org", 443);
        let mut buf = [0xAAu8; 16];
        assert!(matches!(
            connect.marshal(&mut buf),
            Err(Error::BufferTooShort {
                expected: 17,
                actual: 16
            })
        ));
        assert!(buf.iter().all(|&b| b == 0xAA));

        let mut tiny = [0u8; 7];
        assert!(ConnectType::tcp("10.0.0.1", 80)
            .marshal(&mut tiny)
            .unwrap_err()
            .is_length_limit());
    }

    #[test]
    fn test_connect_unmarshal_errors() {
        assert!(ConnectType::unmarshal(&[0x01]).unwrap_err().is_length_limit());
        assert!(matches!(
            ConnectType::unmarshal(&[0x09, 0x01, 1, 2, 3, 4, 0, 80]),
            Err(Error::ProtocolIllegal(0x09))
        ));
        assert!(matches!(
            ConnectType::unmarshal(&[0x01, 0x04, 1, 2, 3, 4, 0, 80]),
            Err(Error::AddressTypeIllegal(0x04))
        ));
        assert!(matches!(
            ConnectType::unmarshal(&[0x01, 0x07]),
            Err(Error::AddressTypeIllegal(0x07))
        ));

        // Truncated IPv4 port
        assert!(ConnectType::unmarshal(&[0x01, 0x01, 1, 2, 3, 4, 0])
            .unwrap_err()
            .is_length_limit());

        // Domain length byte missing, then lying about its length
        assert!(ConnectType::unmarshal(&[0x01, 0x03])
            .unwrap_err()
            .is_length_limit());
        assert!(ConnectType::unmarshal(&[0x01, 0x03, 255, b'a', b'b', 0, 80])
            .unwrap_err()
            .is_length_limit());
    }

    #[test]
    fn test_connect_remaining_len() {
        assert_eq!(ConnectType::prefix_len(), 2);
        assert_eq!(ConnectType::remaining_len(&[0x01, 0x01]).unwrap(), Some(6));
        assert_eq!(ConnectType::remaining_len(&[0x02, 0x02]).unwrap(), Some(18));
        assert_eq!(ConnectType::remaining_len(&[0x01, 0x03]).unwrap(), None);
        assert_eq!(
            ConnectType::remaining_len(&[0x01, 0x03, 12]).unwrap(),
            Some(14)
        );
        assert!(ConnectType::remaining_len(&[0x05, 0x01]).is_err());
    }

    #[test]
    fn test_connect_helpers() {
        let addr: SocketAddr = "[2001:db8::7]:8443".parse().unwrap();
        let connect = ConnectType::from_socket_addr(ProtocolType::Tcp, addr);
        assert_eq!(connect.address_type, AddressType::Ipv6);
        assert_eq!(connect.target(), "[2001:db8::7]:8443");
        assert_eq!(connect.to_string(), "tcp://[2001:db8::7]:8443");

        assert_eq!(ConnectType::udp("example.com", 53).target(), "example.com:53");
    }
}
