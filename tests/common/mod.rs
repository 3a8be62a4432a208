#![allow(dead_code)]

pub use keba_bridge::keba::charger::{ChargeStatus, Charger};
pub use keba_bridge::keba::dispatcher::{Dispatcher, RouteKey};
pub use keba_bridge::keba::packet::{Datagram, Message, Report100, Report2, Report3, OK};
pub use keba_bridge::keba::roundtrip::{Expect, Roundtrip};
pub use keba_bridge::keba::sender::{Sender, Transport};
pub use keba_bridge::prelude::*;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Hands every command to the test instead of the network.
pub struct FakeTransport {
    commands: mpsc::UnboundedSender<String>,
    fail: bool,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, command: &str) -> Result<()> {
        if self.fail {
            bail!("sender: send to 192.0.2.10:7090 failed: network unreachable");
        }
        let _ = self.commands.send(command.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub charger: Charger<FakeTransport>,
    pub commands: mpsc::UnboundedReceiver<String>,
    pub inbox: mpsc::Sender<Datagram>,
}

pub struct Factory;

impl Factory {
    pub fn addr() -> SocketAddr {
        "192.0.2.10:7090".parse().unwrap()
    }

    pub fn timeout() -> Duration {
        Duration::from_millis(200)
    }

    pub fn harness() -> Harness {
        Self::harness_with(None, false)
    }

    pub fn harness_with(rfid: Option<config::Rfid>, fail: bool) -> Harness {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (inbox, inbox_rx) = mpsc::channel(32);

        let transport = FakeTransport {
            commands: commands_tx,
            fail,
        };
        let roundtrip = Roundtrip::new("test", transport, inbox_rx, Self::timeout());

        Harness {
            charger: Charger::new(roundtrip, rfid),
            commands,
            inbox,
        }
    }

    pub fn datagram(raw: &str) -> Datagram {
        Datagram {
            from: Self::addr(),
            message: Message::decode(raw.as_bytes()).unwrap(),
        }
    }

    pub fn ok() -> Datagram {
        Self::datagram(OK)
    }
}

/// Wait for `command`, then answer with `raw`.
pub async fn reply(
    commands: &mut mpsc::UnboundedReceiver<String>,
    inbox: &mpsc::Sender<Datagram>,
    command: &str,
    raw: &str,
) -> Result<()> {
    assert_eq!(commands.recv().await.as_deref(), Some(command));
    inbox.send(Factory::datagram(raw)).await?;
    Ok(())
}

pub async fn localhost_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

pub async fn localhost_dispatcher() -> Dispatcher {
    let dispatcher = Dispatcher::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    dispatcher.start().unwrap();
    dispatcher
}

/// Next datagram from `inbox`, or None if nothing shows up in time.
pub async fn next(inbox: &mut mpsc::Receiver<Datagram>) -> Option<Datagram> {
    tokio::time::timeout(Duration::from_secs(2), inbox.recv())
        .await
        .ok()
        .flatten()
}

pub fn expect_error(err: &anyhow::Error) -> &Error {
    err.downcast_ref::<Error>()
        .unwrap_or_else(|| panic!("not a protocol error: {}", err))
}
