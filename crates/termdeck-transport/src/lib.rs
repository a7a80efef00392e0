//! WebSocket transport between the terminal core and the backend.
//!
//! The transport owns the connection: it reconnects with exponential backoff
//! and holds outbound messages in a bounded queue while the link is down,
//! flushing them in order once it is back.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use termdeck_protocol::{decode, encode, InboundMessage, OutboundMessage, ProtocolError};
use termdeck_types::ConnectionState;

pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 10_000;
pub const DEFAULT_SEND_QUEUE_LIMIT: usize = 256;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub send_queue_limit: usize,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            send_queue_limit: DEFAULT_SEND_QUEUE_LIMIT,
        }
    }
}

/// Events delivered to the core
#[derive(Debug)]
pub enum TransportEvent {
    ConnectionChanged(ConnectionState),
    Message(InboundMessage),
    /// A frame that could not be decoded; already logged
    ProtocolError(ProtocolError),
}

/// Double the delay, capped at `max`
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    let next = current + current;
    if next > max {
        max
    } else {
        next
    }
}

// ============================================================================
// Send queue
// ============================================================================

/// Outbound messages waiting for a connection.
///
/// When full, the oldest message that is not a signal (interrupt, kill,
/// stop) is dropped. Signals are never dropped, so the queue may exceed its
/// limit if it holds nothing else.
#[derive(Debug)]
pub struct SendQueue {
    items: VecDeque<OutboundMessage>,
    limit: usize,
    dropped: u64,
}

impl SendQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            items: VecDeque::new(),
            limit: limit.max(1),
            dropped: 0,
        }
    }

    /// Enqueue a message. Returns the message that was shed, if any.
    pub fn push(&mut self, msg: OutboundMessage) -> Option<OutboundMessage> {
        if msg.is_query() && self.items.contains(&msg) {
            debug!("Collapsing duplicate {} while disconnected", msg.tag());
            return None;
        }

        let mut shed = None;
        if self.items.len() >= self.limit {
            match self.items.iter().position(|m| !m.is_signal()) {
                Some(pos) => shed = self.items.remove(pos),
                None if !msg.is_signal() => {
                    warn!("Send queue full of signals, dropping {}", msg.tag());
                    self.dropped += 1;
                    return Some(msg);
                }
                None => {}
            }
        }
        if let Some(old) = &shed {
            warn!("Send queue full, dropping oldest {}", old.tag());
            self.dropped += 1;
        }
        self.items.push_back(msg);
        shed
    }

    /// Put back a message whose send failed, ahead of everything else
    pub fn requeue(&mut self, msg: OutboundMessage) {
        self.items.push_front(msg);
    }

    pub fn pop(&mut self) -> Option<OutboundMessage> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Messages shed since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

// ============================================================================
// Connection loop
// ============================================================================

/// Running transport task and the events it produces
pub struct TransportHandle {
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    task: JoinHandle<Result<()>>,
}

impl TransportHandle {
    /// Stop the connection loop
    pub fn shutdown(self) {
        self.task.abort();
    }
}

/// Spawn the connection loop. It runs until `outbound` is closed or the
/// event receiver is dropped.
pub fn spawn(config: TransportConfig, outbound: mpsc::UnboundedReceiver<OutboundMessage>) -> TransportHandle {
    let (tx, events) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let result = run(config, outbound, tx).await;
        if let Err(e) = &result {
            warn!("Transport stopped: {:#}", e);
        }
        result
    });
    TransportHandle { events, task }
}

enum Waited<T> {
    Done(T),
    Closed,
}

/// Drive `fut` to completion while still accepting outbound messages
/// into the queue.
async fn wait_queueing<F: Future>(
    fut: F,
    outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
    queue: &mut SendQueue,
) -> Waited<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Waited::Done(out),
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    queue.push(msg);
                }
                None => return Waited::Closed,
            },
        }
    }
}

fn emit(events: &mpsc::UnboundedSender<TransportEvent>, event: TransportEvent) -> Result<()> {
    events
        .send(event)
        .map_err(|_| anyhow::anyhow!("event receiver dropped"))
}

pub async fn run(
    config: TransportConfig,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> Result<()> {
    let mut queue = SendQueue::new(config.send_queue_limit);
    let mut backoff = config.initial_backoff;
    let mut attempt: u32 = 0;

    emit(&events, TransportEvent::ConnectionChanged(ConnectionState::Connecting))?;

    loop {
        info!("Connecting to {}", config.url);
        let connect = match wait_queueing(connect_async(config.url.clone()), &mut outbound, &mut queue).await {
            Waited::Done(result) => result,
            Waited::Closed => return Ok(()),
        };

        let (ws, _) = match connect {
            Ok(value) => value,
            Err(e) => {
                attempt += 1;
                warn!("Connection to {} failed (attempt {}): {}", config.url, attempt, e);
                emit(&events, TransportEvent::ConnectionChanged(ConnectionState::Reconnecting { attempt }))?;
                if let Waited::Closed = wait_queueing(tokio::time::sleep(backoff), &mut outbound, &mut queue).await {
                    return Ok(());
                }
                backoff = next_backoff(backoff, config.max_backoff);
                continue;
            }
        };

        backoff = config.initial_backoff;
        attempt = 0;
        info!("Connected to {}", config.url);
        emit(&events, TransportEvent::ConnectionChanged(ConnectionState::Connected))?;

        let (mut sink, mut stream) = ws.split();

        // Flush what accumulated while disconnected
        let mut healthy = true;
        if !queue.is_empty() {
            debug!("Flushing {} queued messages", queue.len());
        }
        while let Some(msg) = queue.pop() {
            let text = match encode(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Dropping unencodable {}: {}", msg.tag(), e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                warn!("Send failed while flushing: {}", e);
                queue.requeue(msg);
                healthy = false;
                break;
            }
        }

        while healthy {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match decode(&text) {
                        Ok(msg) => emit(&events, TransportEvent::Message(msg))?,
                        Err(e) => {
                            warn!("Dropping frame: {}", e);
                            emit(&events, TransportEvent::ProtocolError(e))?;
                        }
                    },
                    Some(Ok(Message::Binary(bytes))) => {
                        let e = ProtocolError::Binary(bytes.len());
                        warn!("Dropping frame: {}", e);
                        emit(&events, TransportEvent::ProtocolError(e))?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("Backend closed the connection: {:?}", frame);
                        healthy = false;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        healthy = false;
                    }
                    None => healthy = false,
                },
                msg = outbound.recv() => match msg {
                    Some(msg) => {
                        let text = match encode(&msg) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Dropping unencodable {}: {}", msg.tag(), e);
                                continue;
                            }
                        };
                        debug!("Sending {}", msg.tag());
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!("Send failed: {}", e);
                            queue.requeue(msg);
                            healthy = false;
                        }
                    }
                    None => {
                        info!("Outbound channel closed, closing connection");
                        let _ = sink.close().await;
                        return Ok(());
                    }
                },
            }
        }

        attempt += 1;
        emit(&events, TransportEvent::ConnectionChanged(ConnectionState::Reconnecting { attempt }))
            .context("reporting disconnect")?;
        if let Waited::Closed = wait_queueing(tokio::time::sleep(backoff), &mut outbound, &mut queue).await {
            return Ok(());
        }
        backoff = next_backoff(backoff, config.max_backoff);
    }
}
