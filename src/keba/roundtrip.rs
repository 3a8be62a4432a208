use crate::prelude::*;
use crate::keba::packet::{Datagram, Message, OK};
use crate::keba::sender::Transport;

use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

// Expect {{{
/// What a roundtrip waits for after sending its command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expect {
    /// The `OK` line. Any other bare line is skipped.
    Ack,
    /// The first bare line, whatever it says.
    Line,
    /// The report with this number, which is appended to the command.
    Report(u16),
}

impl From<u16> for Expect {
    fn from(report: u16) -> Self {
        match report {
            0 => Self::Ack,
            n => Self::Report(n),
        }
    }
}

impl Expect {
    pub fn command(&self, command: &str) -> String {
        match self {
            Self::Report(id) => format!("{} {}", command, id),
            Self::Ack | Self::Line => command.to_string(),
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        match (self, message) {
            (Self::Ack, Message::Ack(text)) => text == OK,
            (Self::Line, Message::Ack(_)) => true,
            (Self::Report(want), Message::Report { id, .. }) => want == id,
            _ => false,
        }
    }
} // }}}

/// Sends commands to one charger and picks the matching reply out of its
/// inbox.
///
/// The inbox is locked for the whole exchange, so calls against the same
/// charger queue up behind each other instead of stealing replies.
pub struct Roundtrip<T: Transport> {
    name: String,
    transport: T,
    inbox: Mutex<mpsc::Receiver<Datagram>>,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl<T: Transport> Roundtrip<T> {
    pub fn new(
        name: impl Into<String>,
        transport: T,
        inbox: mpsc::Receiver<Datagram>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            inbox: Mutex::new(inbox),
            timeout,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Abort any call in flight and refuse new ones.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub async fn roundtrip(&self, command: &str, expect: Expect) -> Result<Message> {
        let mut inbox = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(Error::Cancelled.into()),
            inbox = self.inbox.lock() => inbox,
        };

        self.discard_stale(&mut inbox);

        let deadline = Instant::now() + self.timeout;
        let command = expect.command(command);
        self.transport.send(&command).await?;

        match self.receive(&mut inbox, expect, deadline).await? {
            Some(message) => {
                debug!("charger {}: {:?} -> {}", self.name, command, message);
                Ok(message)
            }
            None => Err(Error::Cancelled.into()),
        }
    }

    /// Request a numbered report and decode it.
    pub async fn report<R: DeserializeOwned>(&self, id: u16) -> Result<R> {
        self.roundtrip("report", Expect::Report(id))
            .await?
            .decode_into()
    }

    /// Send a control command and wait for `OK`.
    pub async fn ack(&self, command: &str) -> Result<()> {
        self.roundtrip(command, Expect::Ack).await.map(|_| ())
    }

    /// Send a control command and return the first bare line it gets back.
    pub async fn line(&self, command: &str) -> Result<String> {
        match self.roundtrip(command, Expect::Line).await? {
            Message::Ack(text) => Ok(text),
            other => bail!("charger {}: expected a line, got {}", self.name, other),
        }
    }

    // Ok(None) means we were cancelled
    async fn receive(
        &self,
        inbox: &mut mpsc::Receiver<Datagram>,
        expect: Expect,
        deadline: Instant,
    ) -> Result<Option<Message>> {
        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(None),
                datagram = inbox.recv() => match datagram {
                    Some(datagram) if expect.matches(&datagram.message) => {
                        return Ok(Some(datagram.message));
                    }
                    Some(datagram) => trace!(
                        "charger {}: ignoring {} while waiting for {:?}",
                        self.name, datagram.message, expect
                    ),
                    None => bail!("charger {}: inbox closed", self.name),
                },
                _ = &mut timer => return Err(Error::Timeout.into()),
            }
        }
    }

    fn discard_stale(&self, inbox: &mut mpsc::Receiver<Datagram>) {
        while let Ok(datagram) = inbox.try_recv() {
            debug!("charger {}: discarding stale {}", self.name, datagram.message);
        }
    }
}
