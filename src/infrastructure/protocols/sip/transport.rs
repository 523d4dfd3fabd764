//! SIP transport layer
//!
//! Inbound messages are demultiplexed by Call-ID into per-call FIFOs held in
//! a shared [`CallTable`]. Sessions block on their own FIFO with a timeout;
//! the table's own lock is never held while a reader waits.

use super::message::SipMessage;
use crate::domain::shared::CallId;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex, Notify, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Read timeout on call {0}")]
    Timeout(CallId),

    #[error("No such call: {0}")]
    NoSuchCall(CallId),

    #[error("I/O error: {0}")]
    Io(String),
}

/// A caller lock held across a blocking read.
///
/// The transport drops the guard for the duration of the wait and takes it
/// back before returning, so a watchdog sharing the mutex can inspect the
/// session while its worker is parked.
pub struct HeldLock {
    mutex: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl HeldLock {
    pub async fn acquire(mutex: Arc<Mutex<()>>) -> Self {
        let guard = mutex.clone().lock_owned().await;
        Self {
            mutex,
            guard: Some(guard),
        }
    }

    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }

    async fn released_during<F: Future>(&mut self, fut: F) -> F::Output {
        self.guard = None;
        let out = fut.await;
        self.guard = Some(self.mutex.clone().lock_owned().await);
        out
    }
}

/// Message transport boundary used by call sessions
#[async_trait::async_trait]
pub trait MessageTransport: Send + Sync {
    /// Register a FIFO for a call. Returns false if one already exists.
    async fn add_call(&self, call_id: &CallId) -> bool;

    /// Drop a call's FIFO and anything still buffered in it
    async fn remove_call(&self, call_id: &CallId);

    async fn write(&self, destination: SocketAddr, message: &SipMessage)
        -> Result<(), TransportError>;

    /// Next message for the call, or `TransportError::Timeout`
    async fn read(
        &self,
        call_id: &CallId,
        timeout: Duration,
        lock: Option<&mut HeldLock>,
    ) -> Result<SipMessage, TransportError>;

    async fn try_read(&self, call_id: &CallId) -> Option<SipMessage>;

    /// Queue a message on the call's FIFO. False when the call has none.
    async fn enqueue(&self, call_id: &CallId, message: SipMessage) -> bool;

    /// Buffered message count, -1 when the call has no FIFO
    async fn fifo_size(&self, call_id: &CallId) -> i64;
}

struct CallFifo {
    queue: Mutex<VecDeque<SipMessage>>,
    notify: Notify,
    closed: AtomicBool,
}

impl CallFifo {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }
}

/// Shared per-call FIFO repository
#[derive(Default)]
pub struct CallTable {
    calls: RwLock<HashMap<CallId, Arc<CallFifo>>>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, call_id: &CallId) -> bool {
        let mut calls = self.calls.write().await;
        if calls.contains_key(call_id) {
            return false;
        }
        calls.insert(call_id.clone(), Arc::new(CallFifo::new()));
        true
    }

    pub async fn remove(&self, call_id: &CallId) {
        if let Some(fifo) = self.calls.write().await.remove(call_id) {
            fifo.closed.store(true, Ordering::SeqCst);
            fifo.notify.notify_waiters();
        }
    }

    pub async fn contains(&self, call_id: &CallId) -> bool {
        self.calls.read().await.contains_key(call_id)
    }

    async fn fifo(&self, call_id: &CallId) -> Option<Arc<CallFifo>> {
        self.calls.read().await.get(call_id).cloned()
    }

    /// Queue a message for its call. Hands the message back if the call is
    /// unknown.
    pub async fn push(&self, call_id: &CallId, message: SipMessage) -> Result<(), SipMessage> {
        let Some(fifo) = self.fifo(call_id).await else {
            return Err(message);
        };
        fifo.queue.lock().await.push_back(message);
        fifo.notify.notify_one();
        Ok(())
    }

    pub async fn pop(&self, call_id: &CallId, timeout: Duration) -> Result<SipMessage, TransportError> {
        let fifo = self
            .fifo(call_id)
            .await
            .ok_or_else(|| TransportError::NoSuchCall(call_id.clone()))?;
        let deadline = Instant::now() + timeout;

        loop {
            // Registered before the checks so a push or remove in between
            // still wakes this reader
            let notified = fifo.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = fifo.queue.lock().await.pop_front() {
                return Ok(message);
            }
            if fifo.closed.load(Ordering::SeqCst) {
                return Err(TransportError::NoSuchCall(call_id.clone()));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(TransportError::Timeout(call_id.clone()));
            }
        }
    }

    pub async fn read(
        &self,
        call_id: &CallId,
        timeout: Duration,
        lock: Option<&mut HeldLock>,
    ) -> Result<SipMessage, TransportError> {
        match lock {
            Some(held) => held.released_during(self.pop(call_id, timeout)).await,
            None => self.pop(call_id, timeout).await,
        }
    }

    pub async fn try_pop(&self, call_id: &CallId) -> Option<SipMessage> {
        let fifo = self.fifo(call_id).await?;
        let message = fifo.queue.lock().await.pop_front();
        message
    }

    pub async fn size(&self, call_id: &CallId) -> i64 {
        match self.fifo(call_id).await {
            Some(fifo) => fifo.queue.lock().await.len() as i64,
            None => -1,
        }
    }
}

/// Incoming SIP message with source information
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub message: SipMessage,
    pub source: SocketAddr,
}

/// UDP transport implementation
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    calls: Arc<CallTable>,
}

impl UdpTransport {
    /// Bind and start the receive loop.
    ///
    /// Messages whose Call-ID has no FIFO go to `new_calls` when given, and
    /// are dropped otherwise.
    pub async fn bind(
        bind_addr: SocketAddr,
        calls: Arc<CallTable>,
        new_calls: Option<mpsc::Sender<IncomingMessage>>,
    ) -> Result<Self, TransportError> {
        info!("Starting UDP transport on {}", bind_addr);

        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TransportError::Io(format!("Failed to bind UDP socket: {}", e)))?;
        let socket = Arc::new(socket);

        if let Ok(addr) = socket.local_addr() {
            info!("UDP transport listening on {}", addr);
        }

        let rx_socket = socket.clone();
        let rx_calls = calls.clone();
        tokio::spawn(async move {
            Self::receive_loop(rx_socket, rx_calls, new_calls).await;
        });

        Ok(Self { socket, calls })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn receive_loop(
        socket: Arc<UdpSocket>,
        calls: Arc<CallTable>,
        new_calls: Option<mpsc::Sender<IncomingMessage>>,
    ) {
        let mut buf = vec![0u8; 65535];

        loop {
            let (size, source) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!("Failed to receive UDP packet: {}", e);
                    break;
                }
            };
            debug!("Received {} bytes from {} via UDP", size, source);

            let message = match SipMessage::parse(&buf[..size]) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Failed to parse SIP message from {}: {}", source, e);
                    continue;
                }
            };
            let Some(call_id) = message.call_id().map(CallId::new) else {
                warn!("Dropping SIP message without Call-ID from {}", source);
                continue;
            };

            let Err(message) = calls.push(&call_id, message).await else {
                continue;
            };
            match &new_calls {
                Some(tx) => {
                    if tx.send(IncomingMessage { message, source }).await.is_err() {
                        warn!("New-call channel closed, dropping message for {}", call_id);
                    }
                }
                None => debug!("Dropping message for unknown call {}", call_id),
            }
        }
    }
}

#[async_trait::async_trait]
impl MessageTransport for UdpTransport {
    async fn add_call(&self, call_id: &CallId) -> bool {
        self.calls.add(call_id).await
    }

    async fn remove_call(&self, call_id: &CallId) {
        self.calls.remove(call_id).await
    }

    async fn write(
        &self,
        destination: SocketAddr,
        message: &SipMessage,
    ) -> Result<(), TransportError> {
        let data = message.to_bytes();
        debug!("Sending {} bytes to {} via UDP", data.len(), destination);

        self.socket
            .send_to(&data, destination)
            .await
            .map_err(|e| TransportError::Io(format!("Failed to send UDP packet: {}", e)))?;
        Ok(())
    }

    async fn read(
        &self,
        call_id: &CallId,
        timeout: Duration,
        lock: Option<&mut HeldLock>,
    ) -> Result<SipMessage, TransportError> {
        self.calls.read(call_id, timeout, lock).await
    }

    async fn try_read(&self, call_id: &CallId) -> Option<SipMessage> {
        self.calls.try_pop(call_id).await
    }

    async fn enqueue(&self, call_id: &CallId, message: SipMessage) -> bool {
        self.calls.push(call_id, message).await.is_ok()
    }

    async fn fifo_size(&self, call_id: &CallId) -> i64 {
        self.calls.size(call_id).await
    }
}
