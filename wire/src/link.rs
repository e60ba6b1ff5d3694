//! Per-connection plumbing: a reader task, a writer task, and a cheap
//! cloneable handle for sending.
//!
//! Every accepted or dialed [`TcpStream`] is wrapped in a [`Link`]. The
//! reader task decodes frames and forwards [`Inbound`] events to the
//! node's router channel; the writer task drains a byte-budgeted outbound
//! queue. Senders never block: a frame that would push the queue past its
//! budget is dropped with [`WireError::SendQueueFull`], and the caller
//! treats that link as suspect.
//!
//! Exactly one [`LinkEvent::Closed`] is reported per link, whichever side
//! (reader error, writer error, explicit [`LinkHandle::close`]) dies
//! first.

use {
    crate::{
        error::{Result, WireError},
        framing,
        message::WireMessage,
    },
    log::{debug, trace, warn},
    std::{
        collections::VecDeque,
        net::SocketAddr,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    },
    tokio::{
        net::TcpStream,
        sync::{mpsc, watch},
    },
};

/// Process-unique identifier for a connection, assigned at accept/dial
/// time, before the remote end has identified itself.
pub type LinkId = u64;

/// Framing and queueing limits for a single link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Maximum JSON body size accepted or produced.
    pub max_frame_len: usize,
    /// Outbound queue byte budget; frames past it are dropped.
    pub send_queue_bytes: usize,
    /// Protocol violations tolerated within `violation_window` before the
    /// link is dropped.
    pub violation_limit: usize,
    /// Sliding window for the violation budget.
    pub violation_window: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_frame_len: 65_536,
            send_queue_bytes: 8_192,
            violation_limit: 3,
            violation_window: Duration::from_secs(10),
        }
    }
}

/// What happened on a link, as seen by the node's router.
#[derive(Debug)]
pub enum LinkEvent {
    /// A decoded message.
    Message(WireMessage),
    /// A malformed frame was dropped (the link survives until the
    /// violation budget runs out).
    Violation,
    /// The link is gone — EOF, I/O error, violation budget exhausted, or
    /// explicit close. Terminal; nothing follows it.
    Closed,
}

/// A link event tagged with its origin.
#[derive(Debug)]
pub struct Inbound {
    /// Which connection produced the event.
    pub link: LinkId,
    /// The remote socket address.
    pub addr: SocketAddr,
    /// The event itself.
    pub event: LinkEvent,
}

/// Cheap cloneable sending/teardown handle for one link.
#[derive(Clone)]
pub struct LinkHandle {
    id: LinkId,
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    queued: Arc<AtomicUsize>,
    close: Arc<watch::Sender<bool>>,
    config: LinkConfig,
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("queued", &self.queued.load(Ordering::Relaxed))
            .finish()
    }
}

impl LinkHandle {
    /// The connection's process-unique id.
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// The remote socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queue a message for sending.
    ///
    /// Never blocks. Fails with [`WireError::SendQueueFull`] when the
    /// byte budget is exceeded and [`WireError::LinkClosed`] when the
    /// writer is gone; callers route both into the suspicion path for
    /// neighbor links.
    pub fn send(&self, msg: &WireMessage) -> Result<()> {
        let frame = msg.to_frame(self.config.max_frame_len)?;
        let queued = self.queued.load(Ordering::Acquire);
        if queued + frame.len() > self.config.send_queue_bytes {
            return Err(WireError::SendQueueFull {
                queued,
                budget: self.config.send_queue_bytes,
            });
        }
        self.queued.fetch_add(frame.len(), Ordering::AcqRel);
        let len = frame.len();
        self.outbound.send(frame).map_err(|_| {
            self.queued.fetch_sub(len, Ordering::AcqRel);
            WireError::LinkClosed
        })?;
        Ok(())
    }

    /// Tear the link down. Both tasks exit and a single
    /// [`LinkEvent::Closed`] is reported. Safe to call more than once.
    pub fn close(&self) {
        let _ = self.close.send(true);
    }

    /// Whether the link has been closed (by either side).
    pub fn is_closed(&self) -> bool {
        *self.close.borrow()
    }
}

/// Spawns the reader/writer task pair for one connection.
pub struct Link;

impl Link {
    /// Wrap `stream`, spawning its reader and writer tasks. Events flow
    /// into `inbound`; `shutdown` is the process-wide stop flag.
    pub fn spawn(
        stream: TcpStream,
        id: LinkId,
        inbound: mpsc::Sender<Inbound>,
        config: LinkConfig,
        shutdown: watch::Receiver<bool>,
    ) -> LinkHandle {
        let addr = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (close_tx, close_rx) = watch::channel(false);
        let close_tx = Arc::new(close_tx);
        let queued = Arc::new(AtomicUsize::new(0));
        let closed_reported = Arc::new(AtomicBool::new(false));

        let handle = LinkHandle {
            id,
            addr,
            outbound: out_tx,
            queued: Arc::clone(&queued),
            close: Arc::clone(&close_tx),
            config: config.clone(),
        };

        tokio::spawn(read_loop(
            read_half,
            id,
            addr,
            inbound,
            config,
            close_rx.clone(),
            Arc::clone(&close_tx),
            Arc::clone(&closed_reported),
            shutdown,
        ));
        tokio::spawn(write_loop(
            write_half,
            id,
            addr,
            out_rx,
            queued,
            close_rx,
            close_tx,
        ));

        handle
    }
}

#[allow(clippy::too_many_arguments)]
async fn read_loop(
    mut stream: tokio::net::tcp::OwnedReadHalf,
    id: LinkId,
    addr: SocketAddr,
    inbound: mpsc::Sender<Inbound>,
    config: LinkConfig,
    mut close_rx: watch::Receiver<bool>,
    close_tx: Arc<watch::Sender<bool>>,
    closed_reported: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut violations: VecDeque<Instant> = VecDeque::new();

    loop {
        let body = tokio::select! {
            _ = close_rx.changed() => break,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            res = framing::read_frame(&mut stream, config.max_frame_len) => match res {
                Ok(Some(body)) => body,
                Ok(None) => break,
                Err(e) => {
                    debug!("link {id} ({addr}): read failed: {e}");
                    break;
                }
            },
        };

        match WireMessage::from_json(&body) {
            Ok(msg) => {
                trace!("link {id} ({addr}): received {}", msg.kind());
                if inbound
                    .send(Inbound {
                        link: id,
                        addr,
                        event: LinkEvent::Message(msg),
                    })
                    .await
                    .is_err()
                {
                    // Router gone — the node is shutting down.
                    break;
                }
            }
            Err(WireError::UnknownType(tag)) => {
                // Forward-compat: skip, keep the link.
                debug!("link {id} ({addr}): ignoring unknown message type {tag:?}");
            }
            Err(e) => {
                warn!("link {id} ({addr}): protocol violation: {e}");
                let now = Instant::now();
                violations.push_back(now);
                while violations
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > config.violation_window)
                {
                    violations.pop_front();
                }
                let _ = inbound
                    .send(Inbound {
                        link: id,
                        addr,
                        event: LinkEvent::Violation,
                    })
                    .await;
                if violations.len() > config.violation_limit {
                    warn!("link {id} ({addr}): violation budget exhausted, dropping link");
                    break;
                }
            }
        }
    }

    let _ = close_tx.send(true);
    if !closed_reported.swap(true, Ordering::AcqRel) {
        let _ = inbound
            .send(Inbound {
                link: id,
                addr,
                event: LinkEvent::Closed,
            })
            .await;
    }
    debug!("link {id} ({addr}): reader exited");
}

async fn write_loop(
    mut stream: tokio::net::tcp::OwnedWriteHalf,
    id: LinkId,
    addr: SocketAddr,
    mut out_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    queued: Arc<AtomicUsize>,
    mut close_rx: watch::Receiver<bool>,
    close_tx: Arc<watch::Sender<bool>>,
) {
    loop {
        let frame = tokio::select! {
            _ = close_rx.changed() => break,
            frame = out_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        queued.fetch_sub(frame.len(), Ordering::AcqRel);
        if let Err(e) = framing::write_all(&mut stream, &frame).await {
            debug!("link {id} ({addr}): write failed: {e}");
            break;
        }
    }
    // Stops the reader too; the reader reports the Closed event.
    let _ = close_tx.send(true);
    debug!("link {id} ({addr}): writer exited");
}
