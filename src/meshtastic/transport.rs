//! Byte transports to the gateway device: TCP (client API on port 4403) or serial.
//!
//! Both expose a blocking read half and a blocking write half so the link can run its
//! receive loop and its command worker on separate threads.
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::LinkError;

pub const DEFAULT_TCP_PORT: u16 = 4403;

/// How often a blocked read wakes up to check for shutdown.
pub const READ_POLL: Duration = Duration::from_millis(500);

/// Where the device lives, parsed from the `address` setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAddress {
    Tcp { host: String, port: u16 },
    Serial { path: String, baud_rate: u32 },
}

impl DeviceAddress {
    /// Paths (`/dev/ttyUSB0`, `COM3`) select serial; anything else is a TCP host with an
    /// optional `:port`.
    pub fn parse(address: &str, baud_rate: u32) -> Result<Self, LinkError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(LinkError::Unavailable {
                address: String::new(),
                reason: "no device address configured".to_string(),
            });
        }
        let upper = address.to_ascii_uppercase();
        let is_com = upper.starts_with("COM") && upper[3..].chars().all(|c| c.is_ascii_digit());
        if address.starts_with('/') || is_com {
            return Ok(DeviceAddress::Serial {
                path: address.to_string(),
                baud_rate,
            });
        }
        if let Some(inner) = address.strip_prefix('[') {
            // [v6]:port
            if let Some((host, rest)) = inner.split_once(']') {
                let port = match rest.strip_prefix(':') {
                    Some(p) => parse_port(address, p)?,
                    None => DEFAULT_TCP_PORT,
                };
                return Ok(DeviceAddress::Tcp {
                    host: host.to_string(),
                    port,
                });
            }
        }
        match address.rsplit_once(':') {
            Some((host, p)) if !host.contains(':') => Ok(DeviceAddress::Tcp {
                host: host.to_string(),
                port: parse_port(address, p)?,
            }),
            _ => Ok(DeviceAddress::Tcp {
                host: address.to_string(),
                port: DEFAULT_TCP_PORT,
            }),
        }
    }
}

fn parse_port(address: &str, p: &str) -> Result<u16, LinkError> {
    p.parse::<u16>().map_err(|_| LinkError::Unavailable {
        address: address.to_string(),
        reason: format!("invalid port '{}'", p),
    })
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceAddress::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            DeviceAddress::Serial { path, baud_rate } => write!(f, "{} @ {} baud", path, baud_rate),
        }
    }
}

pub type ReadHalf = Box<dyn Read + Send>;
pub type WriteHalf = Box<dyn Write + Send>;

/// Open the device and split it into independent read/write halves.
///
/// Reads time out after [`READ_POLL`] so the receive loop can observe shutdown.
pub fn open(address: &DeviceAddress, connect_timeout: Duration) -> Result<(ReadHalf, WriteHalf), LinkError> {
    let unavailable = |reason: String| LinkError::Unavailable {
        address: address.to_string(),
        reason,
    };
    match address {
        DeviceAddress::Tcp { host, port } => {
            let addrs: Vec<SocketAddr> = (host.as_str(), *port)
                .to_socket_addrs()
                .map_err(|e| unavailable(format!("resolve failed: {}", e)))?
                .collect();
            let mut last_err = None;
            for addr in addrs {
                match TcpStream::connect_timeout(&addr, connect_timeout) {
                    Ok(stream) => {
                        stream.set_nodelay(true).ok();
                        stream
                            .set_read_timeout(Some(READ_POLL))
                            .map_err(|e| unavailable(e.to_string()))?;
                        let writer = stream.try_clone().map_err(|e| unavailable(e.to_string()))?;
                        return Ok((Box::new(stream), Box::new(writer)));
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            Err(unavailable(
                last_err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "host resolved to no addresses".to_string()),
            ))
        }
        #[cfg(feature = "serial")]
        DeviceAddress::Serial { path, baud_rate } => {
            let port = serialport::new(path, *baud_rate)
                .timeout(READ_POLL)
                .open()
                .map_err(|e| unavailable(e.to_string()))?;
            let writer = port.try_clone().map_err(|e| unavailable(e.to_string()))?;
            Ok((Box::new(port), Box::new(writer)))
        }
        #[cfg(not(feature = "serial"))]
        DeviceAddress::Serial { .. } => Err(unavailable(
            "serial support not compiled in (enable the 'serial' feature)".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_and_serial_addresses() {
        assert_eq!(
            DeviceAddress::parse("192.168.1.50", 115200).unwrap(),
            DeviceAddress::Tcp { host: "192.168.1.50".into(), port: 4403 }
        );
        assert_eq!(
            DeviceAddress::parse("meshnode.local:4500", 115200).unwrap(),
            DeviceAddress::Tcp { host: "meshnode.local".into(), port: 4500 }
        );
        assert_eq!(
            DeviceAddress::parse("[fe80::1]:4403", 115200).unwrap(),
            DeviceAddress::Tcp { host: "fe80::1".into(), port: 4403 }
        );
        assert_eq!(
            DeviceAddress::parse("/dev/ttyUSB0", 921600).unwrap(),
            DeviceAddress::Serial { path: "/dev/ttyUSB0".into(), baud_rate: 921600 }
        );
        assert!(matches!(
            DeviceAddress::parse("com7", 115200).unwrap(),
            DeviceAddress::Serial { .. }
        ));
    }

    #[test]
    fn rejects_empty_address_and_bad_port() {
        assert!(DeviceAddress::parse("  ", 115200).is_err());
        assert!(DeviceAddress::parse("host:notaport", 115200).is_err());
    }
}
