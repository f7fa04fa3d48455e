//! Timer channel client.
//!
//! A [`TimerChannel`] is the handle for one server-side countdown streamed
//! over a WebSocket. The server owns the clock; the channel only forwards
//! what it receives. Each channel runs as a background tokio task that
//! decodes frames and pushes [`ChannelMessage`]s into an [`EventSink`]. The
//! receiving loop owns the handles and applies those messages in order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::{Position, Url};

use crate::frame::{RemainingSeconds, TimerFrame, DEFAULT_CONNECT_TIMEOUT, NORMAL_CLOSURE};
use crate::task::TaskId;

/// Where channel events are delivered.
pub type EventSink = mpsc::UnboundedSender<ChannelMessage>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("invalid timer duration: {0}")]
    InvalidDuration(String),

    #[error("timer channel did not open within {0:?}")]
    ConnectionTimeout(Duration),

    #[error("timer channel lost: {reason}")]
    ConnectionLost { code: Option<u16>, reason: String },
}

/// Process-unique identity of one opened channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

impl ChannelId {
    fn next() -> Self {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Open,
    Finished,
    Closed,
    Errored,
}

impl ChannelStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChannelStatus::Finished | ChannelStatus::Closed | ChannelStatus::Errored
        )
    }

    /// Returns the new status if moving to `next` is allowed.
    ///
    /// CONNECTING -> OPEN -> {FINISHED | CLOSED | ERRORED}; a connecting
    /// channel may also close or fail. Terminal states accept nothing.
    pub fn transition(self, next: ChannelStatus) -> Option<ChannelStatus> {
        use ChannelStatus::*;
        match (self, next) {
            (Connecting, Open)
            | (Open, Open)
            | (Open, Finished)
            | (Connecting | Open, Closed)
            | (Connecting | Open, Errored) => Some(next),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Handshake completed; `remaining` is what the channel was opened with.
    Opened { remaining: u64 },
    Tick(u64),
    Finished,
    /// The server closed normally before the countdown finished.
    Closed,
    Failed(ChannelError),
}

impl ChannelEvent {
    /// Status a channel ends up in after this event.
    pub fn status(&self) -> ChannelStatus {
        match self {
            ChannelEvent::Opened { .. } | ChannelEvent::Tick(_) => ChannelStatus::Open,
            ChannelEvent::Finished => ChannelStatus::Finished,
            ChannelEvent::Closed => ChannelStatus::Closed,
            ChannelEvent::Failed(_) => ChannelStatus::Errored,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub task_id: TaskId,
    pub channel: ChannelId,
    pub event: ChannelEvent,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    base: Url,
    connect_timeout: Duration,
}

impl ChannelConfig {
    /// Derives the channel endpoint from the task server URL
    /// (`http` becomes `ws`, `https` becomes `wss`).
    pub fn for_server(server: &Url) -> Result<Self, url::ParseError> {
        let scheme = match server.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        let base = Url::parse(&format!("{scheme}{}", &server[Position::AfterScheme..]))?;
        Ok(Self {
            base,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn endpoint(&self, remaining: RemainingSeconds) -> Url {
        let mut url = self.base.clone();
        let prefix = self.base.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{prefix}/ws/timer/{remaining}"));
        url.set_query(None);
        url
    }
}

/// Handle to one timer channel.
///
/// Dropping the handle tears the connection down the same way [`close`]
/// does.
///
/// [`close`]: TimerChannel::close
#[derive(Debug)]
pub struct TimerChannel {
    id: ChannelId,
    task_id: TaskId,
    opened_with: RemainingSeconds,
    status: ChannelStatus,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TimerChannel {
    /// Opens a channel for `task_id` counting down from `remaining` seconds.
    ///
    /// The duration is validated first; an invalid one fails with
    /// [`ChannelError::InvalidDuration`] and nothing is spawned. Connection
    /// outcomes arrive later through `events`.
    pub fn open<R>(
        config: &ChannelConfig,
        task_id: TaskId,
        remaining: R,
        events: EventSink,
    ) -> Result<Self, ChannelError>
    where
        R: TryInto<RemainingSeconds, Error = ChannelError>,
    {
        let remaining = remaining.try_into()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = ChannelWorker {
            id: ChannelId::next(),
            task_id,
            url: config.endpoint(remaining),
            remaining,
            connect_timeout: config.connect_timeout,
            events,
        };
        let id = worker.id;
        info!(task_id, channel = %id, url = %worker.url, "opening timer channel");
        tokio::spawn(worker.run(shutdown_rx));

        Ok(Self {
            id,
            task_id,
            opened_with: remaining,
            status: ChannelStatus::Connecting,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn opened_with(&self) -> RemainingSeconds {
        self.opened_with
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Applies an event from this channel's worker. Returns `false` when the
    /// state machine refuses it (anything after a terminal state).
    pub fn apply(&mut self, event: &ChannelEvent) -> bool {
        match self.status.transition(event.status()) {
            Some(next) => {
                self.status = next;
                if next.is_terminal() {
                    self.shutdown = None;
                }
                true
            }
            None => false,
        }
    }

    /// Stops the channel. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            debug!(task_id = self.task_id, channel = %self.id, "closing timer channel");
            let _ = shutdown.send(());
        }
        if !self.status.is_terminal() {
            self.status = ChannelStatus::Closed;
        }
    }

    /// Handle with no worker behind it; the receiver observes `close`.
    #[cfg(test)]
    pub(crate) fn detached(task_id: TaskId, remaining: u64) -> (Self, oneshot::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let channel = Self {
            id: ChannelId::next(),
            task_id,
            opened_with: RemainingSeconds::try_from(remaining).unwrap(),
            status: ChannelStatus::Connecting,
            shutdown: Some(shutdown_tx),
        };
        (channel, shutdown_rx)
    }
}

struct ChannelWorker {
    id: ChannelId,
    task_id: TaskId,
    url: Url,
    remaining: RemainingSeconds,
    connect_timeout: Duration,
    events: EventSink,
}

impl ChannelWorker {
    /// Returns `false` once nobody is listening any more.
    fn emit(&self, event: ChannelEvent) -> bool {
        self.events
            .send(ChannelMessage {
                task_id: self.task_id,
                channel: self.id,
                event,
            })
            .is_ok()
    }

    fn fail(&self, error: ChannelError) {
        warn!(task_id = self.task_id, channel = %self.id, "{error}");
        self.emit(ChannelEvent::Failed(error));
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let handshake = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()));

        // A dropped handle resolves `shutdown` with an error, which is handled
        // the same as an explicit close.
        let mut ws = tokio::select! {
            _ = &mut shutdown => {
                debug!(task_id = self.task_id, channel = %self.id, "closed while connecting");
                return;
            }
            result = handshake => match result {
                Err(_) => {
                    self.fail(ChannelError::ConnectionTimeout(self.connect_timeout));
                    return;
                }
                Ok(Err(e)) => {
                    self.fail(ChannelError::ConnectionLost {
                        code: None,
                        reason: format!("connect: {e}"),
                    });
                    return;
                }
                Ok(Ok((ws, _))) => ws,
            }
        };

        info!(task_id = self.task_id, channel = %self.id, "timer channel open");
        if !self.emit(ChannelEvent::Opened {
            remaining: self.remaining.get(),
        }) {
            let _ = ws.close(Some(normal_closure())).await;
            return;
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    let _ = ws.close(Some(normal_closure())).await;
                    return;
                }
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => match TimerFrame::decode(&text) {
                        Ok(TimerFrame::Tick(seconds)) => {
                            debug!(task_id = self.task_id, channel = %self.id, seconds, "tick");
                            if !self.emit(ChannelEvent::Tick(seconds)) {
                                let _ = ws.close(Some(normal_closure())).await;
                                return;
                            }
                        }
                        Ok(TimerFrame::Finished) => {
                            info!(task_id = self.task_id, channel = %self.id, "timer finished");
                            self.emit(ChannelEvent::Finished);
                            let _ = ws.close(Some(normal_closure())).await;
                            return;
                        }
                        Err(e) => {
                            warn!(task_id = self.task_id, channel = %self.id, "ignoring frame: {e}");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        if code == Some(NORMAL_CLOSURE) {
                            info!(task_id = self.task_id, channel = %self.id, "server closed timer channel");
                            self.emit(ChannelEvent::Closed);
                        } else {
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "abnormal closure".to_string());
                            self.fail(ChannelError::ConnectionLost { code, reason });
                        }
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.fail(ChannelError::ConnectionLost {
                            code: None,
                            reason: e.to_string(),
                        });
                        return;
                    }
                    None => {
                        self.fail(ChannelError::ConnectionLost {
                            code: None,
                            reason: "stream ended".to_string(),
                        });
                        return;
                    }
                }
            }
        }
    }
}

fn normal_closure() -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }
}
