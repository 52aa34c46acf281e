use std::io;
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::Discovery;
use crate::codec;
use crate::error::{CameraError, Result};

/// UDP port camera services listen on for discovery queries.
pub const BEACON_PORT: u16 = 9999;

/// Configuration for [`BeaconDiscovery`].
#[derive(Debug, Clone)]
pub struct BeaconConfig {
    /// Where discovery queries are sent. Broadcast on the beacon port by
    /// default; point it at a unicast address to query one host.
    pub beacon_addr: SocketAddr,
    /// How long to wait for answers before re-sending the query.
    pub poll_interval: Duration,
    /// Bound on connecting, sending and receiving one control exchange.
    pub exchange_timeout: Duration,
    /// Largest control reply accepted, in bytes.
    pub max_message_len: usize,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            beacon_addr: SocketAddr::from(([255, 255, 255, 255], BEACON_PORT)),
            poll_interval: Duration::from_millis(250),
            exchange_timeout: Duration::from_secs(10),
            max_message_len: 16 * 1024 * 1024,
        }
    }
}

/// Discovery query datagram.
///
/// ```text
/// {"nonce": 1234, "name": "picam"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconQuery {
    pub nonce: u64,
    pub name: String,
}

/// Discovery reply datagram.
///
/// `address` is the camera's control endpoint, or `null` when the responder
/// does not advertise `name`. An unspecified host (`0.0.0.0:port`) means
/// "the address this datagram came from".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconReply {
    pub nonce: u64,
    pub name: String,
    pub address: Option<String>,
}

/// Network [`Discovery`]: UDP beacon queries for resolution, one TCP
/// connection per control exchange.
///
/// Control messages are JSON framed with the same `u32` little-endian length
/// prefix as the image stream.
#[derive(Debug, Clone, Default)]
pub struct BeaconDiscovery {
    config: BeaconConfig,
}

impl BeaconDiscovery {
    pub fn new(config: BeaconConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BeaconConfig {
        &self.config
    }

    fn address_from_reply(name: &str, reply: BeaconReply, from: SocketAddr) -> Result<SocketAddr> {
        let Some(text) = reply.address else {
            tracing::debug!(camera = name, responder = %from, "responder does not know camera");
            return Err(CameraError::NotFound(name.to_string()));
        };

        let mut address: SocketAddr = text
            .parse()
            .map_err(|_| CameraError::exchange(format!("beacon reply has invalid address {text:?}")))?;
        if address.ip().is_unspecified() {
            address.set_ip(from.ip());
        }

        tracing::info!(camera = name, %address, "camera resolved");
        Ok(address)
    }
}

impl Discovery for BeaconDiscovery {
    fn resolve(&self, name: &str, timeout: Duration) -> Result<SocketAddr> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_broadcast(true)?;

        let nonce = rand::random::<u64>();
        let query = serde_json::to_vec(&BeaconQuery {
            nonce,
            name: name.to_string(),
        })?;

        // An unrepresentable deadline means wait for an answer indefinitely.
        let deadline = Instant::now().checked_add(timeout);
        let mut buf = [0u8; 2048];

        tracing::debug!(camera = name, beacon = %self.config.beacon_addr, ?timeout, "resolving camera");

        loop {
            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                return Err(CameraError::DiscoveryTimeout {
                    name: name.to_string(),
                    timeout,
                });
            }

            socket.send_to(&query, self.config.beacon_addr)?;
            let round_end = [now.checked_add(self.config.poll_interval), deadline]
                .into_iter()
                .flatten()
                .min();

            loop {
                let remaining = match round_end {
                    Some(end) => match end.checked_duration_since(Instant::now()) {
                        Some(remaining) if !remaining.is_zero() => Some(remaining),
                        _ => break,
                    },
                    None => None,
                };
                socket.set_read_timeout(remaining)?;
                match socket.recv_from(&mut buf) {
                    Ok((len, from)) => match serde_json::from_slice::<BeaconReply>(&buf[..len]) {
                        Ok(reply) if reply.nonce == nonce && reply.name == name => {
                            return Self::address_from_reply(name, reply, from);
                        }
                        Ok(reply) => {
                            tracing::trace!(responder = %from, other = %reply.name, "ignoring reply to another query");
                        }
                        Err(e) => {
                            tracing::trace!(responder = %from, error = %e, "ignoring malformed beacon reply");
                        }
                    },
                    Err(ref e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::WouldBlock
                                | io::ErrorKind::TimedOut
                                | io::ErrorKind::ConnectionReset
                        ) =>
                    {
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    fn exchange(&self, address: SocketAddr, request: &serde_json::Value) -> Result<serde_json::Value> {
        let timeout = self.config.exchange_timeout;
        let mut stream = TcpStream::connect_timeout(&address, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let body = serde_json::to_vec(request)?;
        codec::write_prefixed(&mut stream, &body)?;
        tracing::trace!(%address, bytes = body.len(), "control request sent");

        let reply = codec::read_prefixed(&mut stream, self.config.max_message_len)
            .map_err(|fault| CameraError::exchange(format!("reading reply from {address}: {fault}")))?
            .ok_or_else(|| CameraError::exchange(format!("{address} closed the exchange without replying")))?;
        tracing::trace!(%address, bytes = reply.len(), "control reply received");

        Ok(serde_json::from_slice(&reply)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::TcpListener;
    use std::thread;

    /// Answer beacon queries on loopback with `address` for `name`, `null` otherwise.
    fn responder(name: &'static str, address: Option<&'static str>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let local = socket.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; 2048];
            while let Ok((len, from)) = socket.recv_from(&mut buf) {
                let query: BeaconQuery = serde_json::from_slice(&buf[..len]).unwrap();
                let reply = BeaconReply {
                    nonce: query.nonce,
                    name: query.name.clone(),
                    address: address.filter(|_| query.name == name).map(str::to_string),
                };
                let _ = socket.send_to(&serde_json::to_vec(&reply).unwrap(), from);
            }
        });
        local
    }

    fn discovery(beacon_addr: SocketAddr) -> BeaconDiscovery {
        BeaconDiscovery::new(BeaconConfig {
            beacon_addr,
            poll_interval: Duration::from_millis(50),
            exchange_timeout: Duration::from_secs(2),
            ..BeaconConfig::default()
        })
    }

    #[test]
    fn resolves_advertised_name() {
        let beacon = responder("picam", Some("127.0.0.1:6001"));
        let addr = discovery(beacon)
            .resolve("picam", Duration::from_secs(2))
            .unwrap();
        assert_eq!(addr, "127.0.0.1:6001".parse().unwrap());
    }

    #[test]
    fn unspecified_host_means_sender() {
        let beacon = responder("picam", Some("0.0.0.0:6002"));
        let addr = discovery(beacon)
            .resolve("picam", Duration::from_secs(2))
            .unwrap();
        assert_eq!(addr, "127.0.0.1:6002".parse().unwrap());
    }

    #[test]
    fn null_address_is_not_found() {
        let beacon = responder("picam", Some("127.0.0.1:6003"));
        let err = discovery(beacon)
            .resolve("doorcam", Duration::from_secs(2))
            .unwrap_err();
        assert!(matches!(err, CameraError::NotFound(name) if name == "doorcam"));
    }

    #[test]
    fn silence_is_timeout() {
        // Bound but never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let started = Instant::now();
        let err = discovery(silent.local_addr().unwrap())
            .resolve("picam", Duration::from_millis(300))
            .unwrap_err();
        assert!(matches!(err, CameraError::DiscoveryTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn unbounded_timeout_still_resolves() {
        let beacon = responder("picam", Some("127.0.0.1:6004"));
        let addr = discovery(beacon)
            .resolve("picam", Duration::from_secs(u64::MAX))
            .unwrap();
        assert_eq!(addr, "127.0.0.1:6004".parse().unwrap());
    }

    #[test]
    fn exchange_round_trips_one_json_value() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let request = codec::read_prefixed(&mut conn, 1024).unwrap().unwrap();
            let value: serde_json::Value = serde_json::from_slice(&request).unwrap();
            let reply = json!({ "echo": value });
            codec::write_prefixed(&mut conn, &serde_json::to_vec(&reply).unwrap()).unwrap();
        });

        let reply = discovery(address)
            .exchange(address, &json!("10.0.0.5:7896"))
            .unwrap();
        assert_eq!(reply, json!({ "echo": "10.0.0.5:7896" }));
    }

    #[test]
    fn exchange_without_reply_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let _ = codec::read_prefixed(&mut conn, 1024);
            // drop without replying
        });

        let err = discovery(address)
            .exchange(address, &json!(null))
            .unwrap_err();
        assert!(matches!(err, CameraError::Exchange { .. }));
    }
}
