use crate::prelude::*;
use crate::keba::packet::{Datagram, MessageDecoder};

use futures::StreamExt;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, udp::UdpFramed};

/// Per-charger queue depth. Datagrams beyond this are dropped, never waited on.
pub const QUEUE_SIZE: usize = 32;

const SOCKET_ERROR_BACKOFF_MS: u64 = 10;

// RouteKey {{{
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RouteKey {
    /// Serial number carried in report headers.
    Serial(String),
    /// Source address of the datagram.
    Addr(SocketAddr),
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial(serial) => write!(f, "serial {}", serial),
            Self::Addr(addr) => write!(f, "{}", addr),
        }
    }
} // }}}

// Routes {{{
#[derive(Default)]
struct Routes {
    subscribers: HashMap<RouteKey, mpsc::Sender<Datagram>>,
    // source address -> serial, learned from reports. Lets serial-less
    // acknowledgements follow a charger whose replies come from an
    // address nobody subscribed to, e.g. behind NAT.
    learned: HashMap<SocketAddr, String>,
}

impl Routes {
    fn lookup(&self, datagram: &Datagram) -> Option<&mpsc::Sender<Datagram>> {
        let by_serial = |serial: &str| self.subscribers.get(&RouteKey::Serial(serial.to_string()));

        datagram
            .message
            .serial()
            .and_then(by_serial)
            .or_else(|| self.subscribers.get(&RouteKey::Addr(datagram.from)))
            .or_else(|| {
                self.learned
                    .get(&datagram.from)
                    .and_then(|learned| by_serial(learned.as_str()))
            })
    }

    fn learn(&mut self, datagram: &Datagram) {
        let Some(serial) = datagram.message.serial() else {
            return;
        };
        if !self.subscribers.contains_key(&RouteKey::Serial(serial.to_string())) {
            return;
        }
        if self.learned.get(&datagram.from).map(String::as_str) == Some(serial) {
            return;
        }

        info!("dispatcher: serial {} seen from {}", serial, datagram.from);
        self.learned.insert(datagram.from, serial.to_string());
    }
} // }}}

type Subscribers = Arc<Mutex<Routes>>;

/// Owns the listening socket for one port and hands each inbound datagram to
/// the charger it belongs to.
pub struct Dispatcher {
    local_addr: SocketAddr,
    socket: Mutex<Option<UdpSocket>>,
    subscribers: Subscribers,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|err| anyhow!("dispatcher: bind {} failed: {}", addr, err))?;
        let local_addr = socket.local_addr()?;

        info!("dispatcher: bound to {}", local_addr);

        Ok(Self {
            local_addr,
            socket: Mutex::new(Some(socket)),
            subscribers: Arc::new(Mutex::new(Routes::default())),
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// Bind on all IPv4 interfaces.
    pub async fn listen(port: u16) -> Result<Self> {
        Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the read loop. Can only be done once per dispatcher.
    pub fn start(&self) -> Result<()> {
        let socket = lock(&self.socket).take().ok_or(Error::AlreadyStarted)?;

        let handle = tokio::spawn(Self::receiver(
            socket,
            self.subscribers.clone(),
            self.shutdown.clone(),
        ));
        *lock(&self.handle) = Some(handle);

        info!("dispatcher: receiver started on {}", self.local_addr);
        Ok(())
    }

    pub async fn stop(&self) {
        info!("dispatcher: stopping receiver on {}", self.local_addr);
        self.shutdown.cancel();

        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!("dispatcher: receiver task failed: {}", err);
            }
        }
    }

    pub fn subscribe(&self, key: RouteKey, tx: mpsc::Sender<Datagram>) {
        debug!("dispatcher: subscribing {}", key);
        if lock(&self.subscribers).subscribers.insert(key.clone(), tx).is_some() {
            warn!("dispatcher: {} was already subscribed, replacing", key);
        }
    }

    /// Create a queue and subscribe it under every given key.
    pub fn inbox(&self, keys: &[RouteKey]) -> mpsc::Receiver<Datagram> {
        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        for key in keys {
            self.subscribe(key.clone(), tx.clone());
        }
        rx
    }

    /// Queue a datagram would be delivered to, if any.
    ///
    /// Serial first, then source address, then the serial last reported
    /// from that address.
    pub fn route(&self, datagram: &Datagram) -> Option<mpsc::Sender<Datagram>> {
        lock(&self.subscribers).lookup(datagram).cloned()
    }

    fn deliver(subscribers: &Subscribers, datagram: Datagram) {
        let tx = {
            let mut routes = lock(subscribers);
            routes.learn(&datagram);
            routes.lookup(&datagram).cloned()
        };

        let Some(tx) = tx else {
            debug!(
                "dispatcher: no subscriber for {}, dropping {}",
                datagram.from, datagram.message
            );
            return;
        };

        match tx.try_send(datagram) {
            Ok(()) => {}
            Err(TrySendError::Full(datagram)) => warn!(
                "dispatcher: queue for {} full, dropping {}",
                datagram.from, datagram.message
            ),
            Err(TrySendError::Closed(datagram)) => debug!(
                "dispatcher: queue for {} closed, dropping {}",
                datagram.from, datagram.message
            ),
        }
    }

    // network -> chargers
    async fn receiver(socket: UdpSocket, subscribers: Subscribers, shutdown: CancellationToken) {
        let mut frames = UdpFramed::new(socket, MessageDecoder::new());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = frames.next() => match frame {
                    Some(Ok((message, from))) => {
                        trace!("dispatcher: RX {} from {}", message, from);
                        Self::deliver(&subscribers, Datagram { from, message });
                    }
                    Some(Err(err)) => {
                        if err.downcast_ref::<std::io::Error>().is_some() {
                            error!("dispatcher: socket error: {}", err);
                            tokio::time::sleep(Duration::from_millis(SOCKET_ERROR_BACKOFF_MS)).await;
                        } else {
                            warn!("dispatcher: dropping datagram: {}", err);
                        }
                    }
                    None => break,
                }
            }
        }

        info!("dispatcher: receiver exiting");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
