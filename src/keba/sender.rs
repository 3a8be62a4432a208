use crate::prelude::*;

use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;

/// Outbound half of a charger connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, command: &str) -> Result<()>;
}

/// Writes commands from its own socket, connected to one charger.
///
/// Replies are not read here; the charger answers to the dispatcher's port.
pub struct Sender {
    addr: SocketAddr,
    socket: UdpSocket,
}

impl Sender {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket
            .connect(addr)
            .await
            .map_err(|err| anyhow!("sender: connect {} failed: {}", addr, err))?;

        Ok(Self { addr, socket })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl Transport for Sender {
    async fn send(&self, command: &str) -> Result<()> {
        debug!("sender: TX {:?} to {}", command, self.addr);

        let sent = self
            .socket
            .send(command.as_bytes())
            .await
            .map_err(|err| anyhow!("sender: send to {} failed: {}", self.addr, err))?;

        if sent != command.len() {
            bail!("sender: short write to {}: {} of {} bytes", self.addr, sent, command.len());
        }

        Ok(())
    }
}
