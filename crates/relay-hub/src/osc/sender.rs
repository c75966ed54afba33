//! UDP transmit side of the bridge.

use std::net::SocketAddr;

use relay_types::RelayError;
use rosc::{OscMessage, OscPacket, encoder};
use tokio::net::{UdpSocket, lookup_host};

/// Sends OSC packets to one fixed target.
#[derive(Debug)]
pub struct OscSender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl OscSender {
    /// Bind an ephemeral local port and resolve `host:port`.
    ///
    /// # Errors
    ///
    /// [`RelayError::Osc`] when the socket cannot be bound or the host does
    /// not resolve.
    pub async fn bind(host: &str, port: u16) -> Result<Self, RelayError> {
        let target = lookup_host((host, port))
            .await
            .map_err(|e| RelayError::Osc(format!("cannot resolve {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| RelayError::Osc(format!("no address for {host}:{port}")))?;

        let local: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| RelayError::Osc(format!("osc socket bind error: {e}")))?;

        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub async fn send(&self, message: OscMessage) -> Result<(), RelayError> {
        let bytes = encoder::encode(&OscPacket::Message(message))
            .map_err(|e| RelayError::Osc(format!("osc encode error: {e:?}")))?;
        self.socket
            .send_to(&bytes, self.target)
            .await
            .map_err(|e| RelayError::Osc(format!("osc send to {}: {e}", self.target)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::{OscType, decoder};

    #[tokio::test]
    async fn message_reaches_target() -> Result<(), Box<dyn std::error::Error>> {
        let receiver = UdpSocket::bind("127.0.0.1:0").await?;
        let port = receiver.local_addr()?.port();

        let sender = OscSender::bind("127.0.0.1", port).await?;
        sender
            .send(OscMessage {
                addr: "/serial".into(),
                args: vec![OscType::String("a".into()), OscType::Float(1.0)],
            })
            .await?;

        let mut buf = [0u8; 1024];
        let (len, _) = receiver.recv_from(&mut buf).await?;
        let (_, packet) = decoder::decode_udp(&buf[..len]).map_err(|e| format!("{e:?}"))?;
        match packet {
            OscPacket::Message(msg) => {
                assert_eq!(msg.addr, "/serial");
                assert_eq!(msg.args.len(), 2);
            }
            other => return Err(format!("unexpected {other:?}").into()),
        }
        Ok(())
    }
}
