//! Connection lifecycle, read loop and frame dispatch.
//!
//! A [`Session`] owns one serial channel at a time and moves through
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──opened──▶ Reading
//!      ▲                         │                    │
//!      └──────── open failed ────┘     close / EOF / read error
//!      ▲                                              │
//!      └─────────────────── Closing ◀─────────────────┘
//! ```
//!
//! While `Reading`, a single spawned task owns the read half and the receive
//! buffer. It appends each chunk, runs one scan pass, decodes every complete
//! payload and hands it to the message observer before reading again. The
//! write half stays with the session; `connect`, `send` and `close` are
//! serialized behind one async mutex.
//!
//! The loop never reconnects by itself. After a read error it waits
//! [`SessionConfig::error_backoff`], then tears down; end-of-stream tears down
//! at once. Either way the write half is shut down and released with it, and
//! the reading-state observer sees `false` exactly once.
//!
//! # Observers
//!
//! One message observer and one reading-state observer; registering again
//! replaces the previous one. Both run synchronously on the read task, so a
//! slow observer delays the next read.
//!
//! # Example
//!
//! ```ignore
//! use ohw_bridge_core::{Request, Response, Session, transport::TtyConnector};
//!
//! let session = Session::new(TtyConnector::discover());
//! session.on_message(|response: Response| println!("{response:?}"));
//! session.on_reading_state(|reading| println!("reading: {reading}"));
//!
//! session.connect().await?;
//! session.send_request(&Request::GetVersion).await?;
//! // ...
//! session.close().await;
//! ```

use core::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex as AsyncMutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::{PortSettings, SessionConfig};
use crate::error::{Error, Result};
use crate::frame::{self, FrameBuffer};
use crate::message::{MessageCodec, PostcardCodec};
use crate::transport::Connector;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No channel is open.
    Disconnected,
    /// The connector is acquiring and opening the channel.
    Connecting,
    /// The read loop is running; sends are accepted.
    Reading,
    /// The read loop is tearing down.
    Closing,
}

impl SessionState {
    /// Whether the read loop is running.
    #[must_use]
    pub const fn is_reading(self) -> bool {
        matches!(self, Self::Reading)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Reading => "reading",
            Self::Closing => "closing",
        })
    }
}

type MessageObserver<R> = Arc<dyn Fn(R) + Send + Sync>;
type ReadingObserver = Arc<dyn Fn(bool) + Send + Sync>;

/// State shared between the session handle and its read task.
struct Shared<M: MessageCodec> {
    codec: M,
    on_message: Mutex<Option<MessageObserver<M::Response>>>,
    on_reading: Mutex<Option<ReadingObserver>>,
    state: watch::Sender<SessionState>,
    buffered: AtomicUsize,
}

impl<M: MessageCodec> Shared<M> {
    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "session state");
        }
    }

    fn notify_reading(&self, reading: bool) {
        // Clone out so the observer may re-register without deadlocking.
        let observer = self
            .on_reading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(observer) = observer {
            observer(reading);
        }
    }

    fn dispatch(&self, payload: &[u8]) {
        let message = match self.codec.decode(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, len = payload.len(), "discarding undecodable frame");
                return;
            }
        };

        let observer = self
            .on_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match observer {
            Some(observer) => observer(message),
            None => debug!(len = payload.len(), "no message observer, frame dropped"),
        }
    }

    /// Final teardown step, shared by the read loop and abnormal exits.
    fn finish(&self) {
        self.buffered.store(0, Ordering::Release);
        self.set_state(SessionState::Disconnected);
        self.notify_reading(false);
    }
}

/// An open channel: the write half plus a handle on the read task.
struct Link<W> {
    writer: SharedWriter<W>,
    cancel: oneshot::Sender<()>,
    reader: JoinHandle<()>,
}

/// Write half. The read loop releases it on teardown; `close` covers a
/// loop that panicked.
type SharedWriter<W> = Arc<AsyncMutex<Option<W>>>;

impl<W: AsyncWrite + Unpin> Link<W> {
    /// Stops the read task, then closes the write half. Never fails.
    async fn shutdown<M: MessageCodec>(self, shared: &Shared<M>) {
        // The task may already be gone after EOF or a read error.
        self.cancel.send(()).ok();
        if let Err(err) = self.reader.await {
            warn!(%err, "read task ended abnormally");
            shared.finish();
        }
        release_writer(&self.writer).await;
    }
}

/// Shuts down and drops the write half, if still held.
async fn release_writer<W: AsyncWrite + Unpin>(writer: &SharedWriter<W>) {
    let Some(mut writer) = writer.lock().await.take() else {
        return;
    };
    if let Err(err) = writer.shutdown().await {
        debug!(%err, "write half did not shut down cleanly");
    }
}

/// A framed connection to a hardware wallet.
///
/// `M` decodes payloads for the message observer and encodes requests for
/// [`send_request`](Self::send_request); it defaults to the device schema.
pub struct Session<C: Connector, M: MessageCodec = PostcardCodec> {
    connector: C,
    config: SessionConfig,
    shared: Arc<Shared<M>>,
    link: AsyncMutex<Option<Link<C::Writer>>>,
}

impl<C: Connector> Session<C> {
    /// Creates a disconnected session speaking the device schema.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self::with_codec(connector, PostcardCodec)
    }
}

impl<C: Connector, M: MessageCodec> Session<C, M> {
    /// Creates a disconnected session with a custom payload codec.
    #[must_use]
    pub fn with_codec(connector: C, codec: M) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            connector,
            config: SessionConfig::default(),
            shared: Arc::new(Shared {
                codec,
                on_message: Mutex::new(None),
                on_reading: Mutex::new(None),
                state,
                buffered: AtomicUsize::new(0),
            }),
            link: AsyncMutex::new(None),
        }
    }

    /// Replaces the local tuning. Applies from the next [`connect`](Self::connect).
    #[must_use]
    pub const fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// The local tuning in effect.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The payload codec.
    #[must_use]
    pub fn codec(&self) -> &M {
        &self.shared.codec
    }

    /// Registers the observer for decoded messages, replacing any previous one.
    pub fn on_message<F>(&self, observer: F)
    where
        F: Fn(M::Response) + Send + Sync + 'static,
    {
        *self
            .shared
            .on_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(observer));
    }

    /// Registers the observer for reading-state changes, replacing any
    /// previous one.
    ///
    /// It sees `true` once the read loop starts and `false` once it has
    /// fully torn down.
    pub fn on_reading_state<F>(&self, observer: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        *self
            .shared
            .on_reading
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(observer));
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Whether the read loop is running.
    #[must_use]
    pub fn is_reading(&self) -> bool {
        self.state().is_reading()
    }

    /// Subscribes to lifecycle state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Bytes received but not yet framed. Zero once disconnected.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.shared.buffered.load(Ordering::Acquire)
    }

    /// Opens the channel and starts the read loop.
    ///
    /// Does nothing if the loop is already running. A channel left behind by
    /// a loop that stopped on its own is released first.
    ///
    /// # Errors
    ///
    /// Returns the connector's error ([`Error::TransportUnavailable`] or
    /// [`Error::PortOpen`]); the session is back in
    /// [`SessionState::Disconnected`] in that case.
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;

        if link.is_some() && self.is_reading() {
            debug!("connect while reading, ignored");
            return Ok(());
        }
        if let Some(stale) = link.take() {
            stale.shutdown(&self.shared).await;
        }

        self.shared.set_state(SessionState::Connecting);
        let (reader, writer) = match self.connector.open(&PortSettings::FIXED).await {
            Ok(halves) => halves,
            Err(err) => {
                error!(%err, "failed to open serial channel");
                self.shared.set_state(SessionState::Disconnected);
                return Err(err);
            }
        };

        let (cancel, cancelled) = oneshot::channel();
        let writer = Arc::new(AsyncMutex::new(Some(writer)));
        self.shared.set_state(SessionState::Reading);
        self.shared.notify_reading(true);
        let reader = tokio::spawn(read_loop(
            reader,
            Arc::clone(&writer),
            Arc::clone(&self.shared),
            self.config,
            cancelled,
        ));

        *link = Some(Link {
            writer,
            cancel,
            reader,
        });
        info!("session connected");
        Ok(())
    }

    /// Frames `payload` and writes it to the device.
    ///
    /// # Errors
    ///
    /// - [`Error::NotWritable`] unless the read loop is running
    /// - [`Error::PayloadTooLarge`] if `payload` exceeds the frame limit
    /// - [`Error::Write`] if the channel rejects the write
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        let link = self.link.lock().await;
        let Some(link) = link.as_ref().filter(|_| self.is_reading()) else {
            warn!(len = payload.len(), "send without an open port");
            return Err(Error::NotWritable);
        };

        let packet = frame::encode(payload)?;
        let mut writer = link.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            warn!(len = payload.len(), "send after the channel was released");
            return Err(Error::NotWritable);
        };
        writer.write_all(&packet).await.map_err(Error::Write)?;
        writer.flush().await.map_err(Error::Write)?;

        trace!(len = payload.len(), "frame sent");
        Ok(())
    }

    /// Encodes `request` with the session codec and sends it.
    ///
    /// # Errors
    ///
    /// [`Error::Encode`] if the codec fails, otherwise as [`send`](Self::send).
    pub async fn send_request(&self, request: &M::Request) -> Result<()> {
        let payload = self.shared.codec.encode(request)?;
        self.send(&payload).await
    }

    /// Stops the read loop and releases the channel.
    ///
    /// Idempotent. Teardown problems are logged, never returned.
    pub async fn close(&self) {
        let mut link = self.link.lock().await;
        let Some(active) = link.take() else {
            debug!("close on idle session");
            return;
        };

        active.shutdown(&self.shared).await;
        info!("session closed");
    }
}

impl<C: Connector, M: MessageCodec> fmt::Debug for Session<C, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("buffered", &self.buffered())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Reads until cancelled, end of stream, or a read error.
async fn read_loop<R, W, M>(
    mut reader: R,
    writer: SharedWriter<W>,
    shared: Arc<Shared<M>>,
    config: SessionConfig,
    mut cancelled: oneshot::Receiver<()>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    M: MessageCodec,
{
    let mut frames = FrameBuffer::new();
    let mut chunk = vec![0u8; config.read_chunk_size.max(1)];

    loop {
        tokio::select! {
            biased;
            _ = &mut cancelled => {
                debug!("read loop cancelled");
                break;
            }
            read = reader.read(&mut chunk) => match read {
                Ok(0) => {
                    info!("device closed the channel");
                    break;
                }
                Ok(n) => {
                    trace!(bytes = n, "chunk received");
                    for payload in frames.push(&chunk[..n]) {
                        shared.dispatch(&payload);
                    }
                    shared.buffered.store(frames.len(), Ordering::Release);
                }
                Err(err) => {
                    let err = Error::TransportRead(err.to_string());
                    error!(%err, backoff = ?config.error_backoff, "read loop failed");
                    tokio::select! {
                        biased;
                        _ = &mut cancelled => {}
                        () = tokio::time::sleep(config.error_backoff) => {}
                    }
                    break;
                }
            }
        }
    }

    shared.set_state(SessionState::Closing);
    drop(reader);
    release_writer(&writer).await;
    frames.clear();
    shared.finish();
}
