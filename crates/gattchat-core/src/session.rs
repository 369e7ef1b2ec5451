//! Transport Session Manager
//!
//! Owns the scan → connect → negotiate → subscribe → disconnect lifecycle for
//! the single active connection. Every spawned listener for a connection hangs
//! off that connection's [`CancellationToken`], so a disconnect stops the
//! notification stream and any in-flight write together.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ProtocolConfig, SessionConfig};
use crate::connection_state::{SessionEvent, SessionState};
use crate::errors::{ConnectError, StateTransitionError, TransportError, WriteError};
use crate::fragmentation::effective_chunk_size;
use crate::transport::{Transport, TransportLink};
use crate::types::{ConnectionId, DeviceId, DiscoveredDevice};

// ----------------------------------------------------------------------------
// Connection Handle
// ----------------------------------------------------------------------------

/// One active transport session
///
/// Cloned into the receive task and the dispatch worker; all clones share the
/// same link and cancellation token.
pub struct ConnectionHandle<L> {
    id: ConnectionId,
    device: DiscoveredDevice,
    link: Arc<L>,
    cancel: CancellationToken,
    chunk_size: usize,
    write_timeout: Duration,
    state: watch::Receiver<SessionState>,
}

impl<L> Clone for ConnectionHandle<L> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            device: self.device.clone(),
            link: Arc::clone(&self.link),
            cancel: self.cancel.clone(),
            chunk_size: self.chunk_size,
            write_timeout: self.write_timeout,
            state: self.state.clone(),
        }
    }
}

impl<L: TransportLink> ConnectionHandle<L> {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    /// Largest chunk the Fragmenter may produce for this link
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Write one chunk, bounded by the write timeout and the connection's lifetime
    pub async fn write(&self, chunk: &[u8]) -> Result<(), WriteError> {
        if self.cancel.is_cancelled() {
            return Err(WriteError::Cancelled);
        }
        if !self.state.borrow().is_ready() {
            return Err(WriteError::NotReady);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(WriteError::Cancelled),
            result = timeout(self.write_timeout, self.link.write(chunk)) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(WriteError::Timeout {
                    duration_ms: self.write_timeout.as_millis() as u64,
                }),
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Transport Session
// ----------------------------------------------------------------------------

pub struct TransportSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    default_chunk_size: usize,
    att_overhead: usize,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    discovered: Vec<DiscoveredDevice>,
    scan_token: Option<CancellationToken>,
    current: Option<ConnectionHandle<T::Link>>,
    next_connection: u64,
    transitions: Vec<SessionState>,
}

impl<T: Transport> TransportSession<T> {
    pub fn new(transport: T, config: SessionConfig, protocol: &ProtocolConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            transport,
            config,
            default_chunk_size: protocol.default_chunk_size,
            att_overhead: protocol.att_overhead,
            state: SessionState::Idle,
            state_tx,
            discovered: Vec::new(),
            scan_token: None,
            current: None,
            next_connection: 0,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// States entered since the last call, oldest first
    pub fn take_transitions(&mut self) -> Vec<SessionState> {
        std::mem::take(&mut self.transitions)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn apply(&mut self, event: SessionEvent) -> Result<SessionState, StateTransitionError> {
        let from = self.state;
        let to = from.transition(event)?;
        if from != to {
            info!("Session state: {} -> {}", from, to);
            self.state = to;
            self.state_tx.send_replace(to);
            self.transitions.push(to);
        }
        Ok(to)
    }

    fn invalid_state(&self, operation: &'static str) -> TransportError {
        TransportError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Start a fresh scan session
    ///
    /// The returned stream reports each device at most once and ends when the
    /// scan is stopped or a connection is made.
    pub async fn scan(&mut self) -> Result<BoxStream<'static, DiscoveredDevice>, TransportError> {
        if self.state.has_link() || self.state == SessionState::Connecting {
            return Err(self.invalid_state("scan"));
        }
        if let Some(previous) = self.scan_token.take() {
            previous.cancel();
        }

        self.apply(SessionEvent::StartScan)
            .map_err(|_| self.invalid_state("scan"))?;
        self.discovered.clear();

        let devices = match self.transport.scan().await {
            Ok(devices) => devices,
            Err(e) => {
                error!("Failed to start scan: {}", e);
                let _ = self.apply(SessionEvent::StopScan);
                return Err(e);
            }
        };

        let token = CancellationToken::new();
        self.scan_token = Some(token.clone());

        let mut seen = HashSet::new();
        let stream = devices
            .filter(move |device| future::ready(seen.insert(device.id.clone())))
            .take_until(async move { token.cancelled().await })
            .boxed();
        Ok(stream)
    }

    /// Record a device reported by the scan; returns `true` if it is new
    pub fn record_device(&mut self, device: DiscoveredDevice) -> bool {
        if !matches!(self.state, SessionState::Scanning | SessionState::DeviceFound) {
            debug!("Ignoring discovery of {} outside a scan", device.id);
            return false;
        }
        if self.discovered.iter().any(|known| known.id == device.id) {
            return false;
        }

        debug!("Discovered {}", device);
        self.discovered.push(device);
        let _ = self.apply(SessionEvent::DeviceFound);
        true
    }

    pub fn discovered_devices(&self) -> &[DiscoveredDevice] {
        &self.discovered
    }

    pub fn find_device(&self, device_id: &DeviceId) -> Option<&DiscoveredDevice> {
        self.discovered.iter().find(|device| &device.id == device_id)
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_token
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Stop scanning; discovered devices stay available for `connect`
    pub async fn stop_scan(&mut self) -> Result<(), TransportError> {
        let Some(token) = self.scan_token.take() else {
            return Ok(());
        };
        token.cancel();
        if matches!(self.state, SessionState::Scanning | SessionState::DeviceFound) {
            let _ = self.apply(SessionEvent::StopScan);
        }
        self.transport.stop_scan().await
    }

    // ------------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------------

    pub async fn connect(
        &mut self,
        device_id: &DeviceId,
    ) -> Result<ConnectionHandle<T::Link>, TransportError> {
        let device = self
            .find_device(device_id)
            .cloned()
            .ok_or_else(|| TransportError::UnknownDevice {
                device_id: device_id.to_string(),
            })?;
        if self.state != SessionState::DeviceFound {
            return Err(self.invalid_state("connect"));
        }

        if let Err(e) = self.stop_scan().await {
            warn!("Failed to stop scan before connecting: {}", e);
        }
        self.apply(SessionEvent::Connect)
            .map_err(|_| self.invalid_state("connect"))?;
        info!("Connecting to {}", device);

        let attempt = timeout(self.config.connection_timeout, self.transport.connect(&device));
        let link = match attempt.await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                error!("Failed to connect to {}: {}", device, e);
                let _ = self.apply(SessionEvent::ConnectFailed {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
            Err(_) => {
                let e = ConnectError::Timeout {
                    device_id: device.id.to_string(),
                    duration_ms: self.config.connection_timeout.as_millis() as u64,
                };
                error!("{}", e);
                let _ = self.apply(SessionEvent::ConnectFailed {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let _ = self.apply(SessionEvent::LinkEstablished);
        self.next_connection += 1;
        let handle = ConnectionHandle {
            id: ConnectionId::new(self.next_connection),
            device,
            link: Arc::new(link),
            cancel: CancellationToken::new(),
            chunk_size: self.default_chunk_size,
            write_timeout: self.config.write_timeout,
            state: self.state_tx.subscribe(),
        };
        info!("Connected to {} as {}", handle.device, handle.id);
        self.current = Some(handle.clone());
        Ok(handle)
    }

    /// Request the preferred MTU once and derive the chunk size from the answer
    pub async fn negotiate_chunk_size(&mut self, handle: &mut ConnectionHandle<T::Link>) -> usize {
        let chunk_size = match handle.link.request_mtu(self.config.preferred_mtu).await {
            Some(mtu) => {
                let size = effective_chunk_size(mtu, self.att_overhead);
                info!("Negotiated MTU {} for {}, chunk size {}", mtu, handle.id, size);
                size
            }
            None => {
                info!(
                    "MTU negotiation refused for {}, using default chunk size {}",
                    handle.id, self.default_chunk_size
                );
                self.default_chunk_size
            }
        };

        handle.chunk_size = chunk_size;
        if let Some(current) = self.current.as_mut().filter(|c| c.id == handle.id) {
            current.chunk_size = chunk_size;
        }
        chunk_size
    }

    /// Subscribe to notifications; on success the session is `Ready`
    pub async fn subscribe(
        &mut self,
        handle: &ConnectionHandle<T::Link>,
    ) -> Result<BoxStream<'static, Vec<u8>>, TransportError> {
        self.apply(SessionEvent::Subscribe)
            .map_err(|_| self.invalid_state("subscribe"))?;

        let notifications = match handle.link.subscribe().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Subscribe failed on {}: {}", handle.id, e);
                self.disconnect("subscribe failed").await;
                return Err(e);
            }
        };

        let _ = self.apply(SessionEvent::Subscribed);
        let token = handle.cancel.clone();
        Ok(notifications
            .take_until(async move { token.cancelled().await })
            .boxed())
    }

    pub async fn write(
        &self,
        handle: &ConnectionHandle<T::Link>,
        bytes: &[u8],
    ) -> Result<(), WriteError> {
        handle.write(bytes).await
    }

    pub fn active_connection(&self) -> Option<&ConnectionHandle<T::Link>> {
        self.current.as_ref()
    }

    pub fn is_current(&self, id: ConnectionId) -> bool {
        self.current.as_ref().is_some_and(|c| c.id == id)
    }

    /// Tear down the connection and cancel everything bound to it
    ///
    /// Safe to call repeatedly; returns the id of the connection that was
    /// closed, if there was one.
    pub async fn disconnect(&mut self, reason: &str) -> Option<ConnectionId> {
        if let Some(token) = self.scan_token.take() {
            token.cancel();
        }

        let closed = self.current.take().map(|handle| {
            handle.cancel.cancel();
            handle
        });

        if let Some(handle) = &closed {
            info!("Disconnecting {} ({}): {}", handle.device, handle.id, reason);
            if timeout(self.config.connection_timeout, handle.link.disconnect())
                .await
                .is_err()
            {
                warn!("Transport disconnect of {} timed out", handle.id);
            }
        }

        if self.state != SessionState::Disconnected {
            let _ = self.apply(SessionEvent::Disconnect {
                reason: reason.to_string(),
            });
        }
        closed.map(|handle| handle.id)
    }
}
