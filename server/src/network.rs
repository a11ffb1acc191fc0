//! Server network layer: accept loop, per-connection tasks and dispatch

use crate::config::ServerConfig;
use crate::registry::{Client, ConnectionId, ConnectionRegistry, Outbound, RegistryError};
use log::{debug, error, info, warn};
use shared::{encode_broadcast, Frame, FrameCodec, FrameError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::AbortHandle;

/// Events sent from connection tasks to the dispatcher
#[derive(Debug)]
pub enum ConnectionEvent {
    Registered { id: ConnectionId, username: Frame },
    Message { id: ConnectionId, frame: Frame },
    Closed { id: ConnectionId, cause: CloseCause },
}

/// Why a connection stopped being trusted
#[derive(Debug, Error)]
pub enum CloseCause {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("framing error: {0}")]
    Framing(#[from] FrameError),

    #[error("no username received before the handshake timeout")]
    HandshakeTimeout,

    #[error("write failed: {0}")]
    WriteFailed(std::io::Error),

    #[error("outbound queue full")]
    Lagging,

    #[error("outbound queue closed")]
    QueueClosed,
}

/// The two tasks serving one socket
#[derive(Debug)]
pub struct ConnectionTasks {
    pub reader: AbortHandle,
    pub writer: AbortHandle,
}

impl ConnectionTasks {
    /// Stops both tasks, which drops and closes the socket
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// An accepted connection that has not sent its username yet
#[derive(Debug)]
pub struct PendingConnection {
    pub addr: SocketAddr,
    pub tasks: ConnectionTasks,
    /// Queue feeding the connection's writer task
    pub outbound: mpsc::Sender<Outbound>,
}

/// Connection bookkeeping and broadcast logic
///
/// Owns the registry and the watch set and mutates both in the same step.
/// It performs no socket I/O itself: readers report frames through
/// [`ConnectionEvent`]s and broadcasts go out through each client's queue.
#[derive(Debug, Default)]
pub struct Dispatcher {
    registry: ConnectionRegistry,
    /// Tasks of registered connections
    watched: HashMap<ConnectionId, ConnectionTasks>,
    /// Accepted connections still waiting for a username
    pending: HashMap<ConnectionId, PendingConnection>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn is_watched(&self, id: ConnectionId) -> bool {
        self.watched.contains_key(&id)
    }

    pub fn is_pending(&self, id: ConnectionId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// True when the watch set and the registry hold the same connections
    pub fn is_consistent(&self) -> bool {
        self.watched.len() == self.registry.len()
            && self.registry.ids().all(|id| self.watched.contains_key(&id))
    }

    /// Tracks a freshly accepted connection until its username arrives
    pub fn admit(&mut self, id: ConnectionId, connection: PendingConnection) {
        self.pending.insert(id, connection);
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Registered { id, username } => self.activate(id, username),
            ConnectionEvent::Message { id, frame } => self.relay(id, &frame),
            ConnectionEvent::Closed { id, cause } => self.close(id, cause),
        }

        debug_assert!(
            self.is_consistent(),
            "watch set and registry diverged"
        );
    }

    /// Pending -> Active
    fn activate(&mut self, id: ConnectionId, username: Frame) {
        let Some(pending) = self.pending.remove(&id) else {
            debug!("Ignoring username from untracked connection {}", id);
            return;
        };

        let addr = pending.addr;
        let client = Client::new(id, addr, username, pending.outbound);
        let name = client.name();

        if let Err(e) = self.registry.register(client) {
            pending.tasks.abort();
            invariant_violated(e);
            return;
        }
        self.watched.insert(id, pending.tasks);

        info!(
            "Accepted new connection from {}:{} username:{}",
            addr.ip(),
            addr.port(),
            name
        );
    }

    /// Sends `frame` from `id` to every other active connection
    ///
    /// Each peer is tried independently. Peers whose queue is full or gone
    /// are torn down once the pass is complete.
    fn relay(&mut self, id: ConnectionId, frame: &Frame) {
        if !self.is_watched(id) {
            debug!("Dropping message from inactive connection {}", id);
            return;
        }

        let sender = match self.registry.lookup(id) {
            Ok(sender) => sender,
            Err(e) => {
                invariant_violated(e);
                return;
            }
        };

        info!("Received message from {}: {}", sender.name(), frame.text());

        let data: Outbound = encode_broadcast(&sender.username, frame).into();
        let mut failed = Vec::new();

        for peer in self.registry.broadcast_targets(id) {
            match peer.outbound.try_send(Arc::clone(&data)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => failed.push((peer.id, CloseCause::Lagging)),
                Err(TrySendError::Closed(_)) => failed.push((peer.id, CloseCause::QueueClosed)),
            }
        }

        for (peer, cause) in failed {
            self.close(peer, cause);
        }
    }

    /// Moves a connection to Closed, dropping its registry entry and watch
    ///
    /// Both socket tasks are aborted. A writer stuck on a peer that stopped
    /// reading would otherwise hold the socket open indefinitely.
    fn close(&mut self, id: ConnectionId, cause: CloseCause) {
        if let Some(pending) = self.pending.remove(&id) {
            pending.tasks.abort();
            debug!(
                "Dropped connection {} from {} before registration: {}",
                id, pending.addr, cause
            );
            return;
        }

        let Some(tasks) = self.watched.remove(&id) else {
            debug!("Ignoring close of untracked connection {}", id);
            return;
        };
        tasks.abort();

        match self.registry.unregister(id) {
            Ok(client) => match cause {
                CloseCause::PeerClosed => info!("Closed connection from {}", client.name()),
                cause => warn!("Closed connection from {}: {}", client.name(), cause),
            },
            Err(e) => invariant_violated(e),
        }
    }
}

fn invariant_violated(err: RegistryError) {
    error!("Registry invariant violated: {}", err);
    if cfg!(debug_assertions) {
        panic!("registry invariant violated: {err}");
    }
}

/// TCP chat server
pub struct Server {
    listener: TcpListener,
    codec: FrameCodec,
    outbound_queue: usize,
    handshake_timeout: Duration,
    dispatcher: Dispatcher,
    next_id: ConnectionId,

    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Server {
    pub async fn bind(
        config: &ServerConfig,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let codec = config.codec()?;
        let listener = TcpListener::bind(config.bind_addr()).await?;
        info!("Listening on {}...", listener.local_addr()?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            codec,
            outbound_queue: config.outbound_queue.max(1),
            handshake_timeout: config.handshake_timeout,
            dispatcher: Dispatcher::new(),
            next_id: 1,
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept/dispatch loop forever
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                },

                Some(event) = self.events_rx.recv() => {
                    self.dispatcher.handle_event(event);
                },
            }
        }
    }

    /// Splits the stream and starts its reader and writer tasks
    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = self.next_id;
        self.next_id += 1;

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_queue);

        let writer = tokio::spawn(write_loop(
            id,
            write_half,
            outbound_rx,
            self.events_tx.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            id,
            read_half,
            self.codec,
            self.handshake_timeout,
            self.events_tx.clone(),
        ));

        debug!("Connection {} opened from {}", id, addr);
        self.dispatcher.admit(
            id,
            PendingConnection {
                addr,
                tasks: ConnectionTasks {
                    reader: reader.abort_handle(),
                    writer: writer.abort_handle(),
                },
                outbound: outbound_tx,
            },
        );
    }
}

/// Reads the username frame, then chat frames until the connection fails
pub async fn read_loop<R>(
    id: ConnectionId,
    mut reader: R,
    codec: FrameCodec,
    handshake_timeout: Duration,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) where
    R: AsyncRead + Unpin,
{
    let handshake = tokio::time::timeout(handshake_timeout, codec.read_frame(&mut reader)).await;
    let username = match handshake {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => return report_closed(&events, id, CloseCause::PeerClosed),
        Ok(Err(e)) => return report_closed(&events, id, CloseCause::Framing(e)),
        Err(_) => return report_closed(&events, id, CloseCause::HandshakeTimeout),
    };

    if events
        .send(ConnectionEvent::Registered { id, username })
        .is_err()
    {
        return;
    }

    let cause = loop {
        match codec.read_frame(&mut reader).await {
            Ok(Some(frame)) => {
                if events.send(ConnectionEvent::Message { id, frame }).is_err() {
                    return;
                }
            }
            Ok(None) => break CloseCause::PeerClosed,
            Err(e) => break CloseCause::Framing(e),
        }
    };

    report_closed(&events, id, cause);
}

/// Writes queued broadcasts until the queue is dropped or a write fails
pub async fn write_loop<W>(
    id: ConnectionId,
    mut writer: W,
    mut outbound: mpsc::Receiver<Outbound>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(data) = outbound.recv().await {
        if let Err(e) = writer.write_all(&data).await {
            report_closed(&events, id, CloseCause::WriteFailed(e));
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown of connection {} failed: {}", id, e);
    }
}

fn report_closed(
    events: &mpsc::UnboundedSender<ConnectionEvent>,
    id: ConnectionId,
    cause: CloseCause,
) {
    // The dispatcher only goes away with the server itself.
    let _ = events.send(ConnectionEvent::Closed { id, cause });
}
