//! Streaming connection: one subscriber's server-sent-events feed.
//!
//! DESIGN
//! ======
//! A `Connection` couples a bus subscription to a bounded channel and a
//! heartbeat ticker. The bus listener only `try_send`s into the channel, so
//! `emit` never waits on a slow client; a full or closed channel is reported
//! back to the bus as a failed delivery and the bus evicts the listener.
//! Once the listener (the only sender) is gone, the receiver drains and the
//! stream ends.
//!
//! LIFECYCLE
//! =========
//! 1. Open: caller has already authorized the identity for the board.
//!    Subscribe, queue `connected` + `init`, emit `presence` to the board.
//! 2. Streaming: forward bus events as `data:` frames, heartbeats as
//!    `: heartbeat` comments. The first heartbeat fires one interval in.
//! 3. Closed: client went away, delivery failed, or `close()` was called.
//!    Stop the ticker, cancel the subscription, emit `presence` for the
//!    users still here. Runs once; `Drop` calls it on every other path.

use std::collections::VecDeque;
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::info;
use uuid::Uuid;

use crate::event::{BoardEvent, StreamFrame};
use crate::services::bus::{DeliveryError, EventBus, Subscription};
use crate::storage::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered on the bus; nothing sent yet.
    Open,
    Streaming,
    Closed,
}

pub struct Connection {
    client_id: Uuid,
    board_id: Uuid,
    user_id: Uuid,
    state: ConnectionState,
    bus: EventBus,
    subscription: Option<Subscription>,
    /// Frames queued at open, sent before anything from the channel.
    pending: VecDeque<BoardEvent>,
    rx: mpsc::Receiver<BoardEvent>,
    ticker: Option<Interval>,
}

impl Connection {
    /// Register a new connection for an already authorized `identity`.
    ///
    /// `buffer` bounds the events waiting to be written to this client; it
    /// is raised to 1 if zero.
    #[must_use]
    pub fn open(bus: &EventBus, board_id: Uuid, identity: &Identity, heartbeat: Duration, buffer: usize) -> Self {
        let client_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel::<BoardEvent>(buffer.max(1));

        let subscription = bus.subscribe(
            board_id,
            move |event: &BoardEvent| {
                tx.try_send(event.clone()).map_err(|e| match e {
                    TrySendError::Full(_) => DeliveryError::Full,
                    TrySendError::Closed(_) => DeliveryError::Closed,
                })
            },
            identity.user_id,
            &identity.display_name,
        );

        // Snapshot after subscribing so it includes this connection.
        let connected_users = bus.connected_users(board_id);
        let pending = VecDeque::from([
            BoardEvent::Connected { client_id, user_id: identity.user_id },
            BoardEvent::Init { connected_users: connected_users.clone() },
        ]);
        bus.emit(board_id, &BoardEvent::Presence { connected_users });

        let heartbeat = heartbeat.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            %client_id,
            %board_id,
            user_id = %identity.user_id,
            subscribers = bus.subscriber_count(board_id),
            "stream: opened"
        );
        Self {
            client_id,
            board_id,
            user_id: identity.user_id,
            state: ConnectionState::Open,
            bus: bus.clone(),
            subscription: Some(subscription),
            pending,
            rx,
            ticker: Some(ticker),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Wait for the next frame to write. `None` once the connection is closed.
    pub async fn next_frame(&mut self) -> Option<StreamFrame> {
        if self.state() == ConnectionState::Closed {
            return None;
        }
        if let Some(event) = self.pending.pop_front() {
            self.state = ConnectionState::Streaming;
            return Some(StreamFrame::Event(event));
        }
        let ticker = self.ticker.as_mut()?;

        let frame = tokio::select! {
            biased;
            event = self.rx.recv() => event.map(StreamFrame::Event),
            _ = ticker.tick() => Some(StreamFrame::Heartbeat),
        };
        if frame.is_none() {
            // The bus evicted our listener and everything queued is out.
            self.close();
        }
        frame
    }

    /// Release the connection. Returns `true` only for the call that closed it.
    pub fn close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Closed;
        self.ticker = None;
        self.rx.close();

        let evicted = self.subscription.take().is_some_and(|sub| !sub.cancel());
        let connected_users = self.bus.connected_users(self.board_id);
        let remaining = connected_users.len();
        self.bus.emit(self.board_id, &BoardEvent::Presence { connected_users });

        info!(
            client_id = %self.client_id,
            board_id = %self.board_id,
            user_id = %self.user_id,
            evicted,
            remaining,
            "stream: closed"
        );
        true
    }

    /// Frames until the connection closes. Dropping the stream closes it.
    pub fn into_stream(self) -> impl Stream<Item = StreamFrame> + Send {
        futures::stream::unfold(self, |mut conn| async move {
            let frame = conn.next_frame().await?;
            Some((frame, conn))
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod tests;
