//! Connection bookkeeping for the two sides of the bridge
//!
//! The links manage their own sessions and reconnects; this is only the
//! bridge's view of them.

use tokio::sync::watch;
use tracing::debug;

/// Bridge-side state of one link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

/// What happened to a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectStarted,
    ConnectSucceeded,
    ConnectFailed(String),
    /// The link failed on its own after connecting
    Lost(String),
    Closed,
}

impl LinkState {
    /// Next state after an event (pure function)
    ///
    /// A success that arrives while not connecting is ignored so a late
    /// result cannot resurrect a closed or failed link. Only a connected link
    /// can be lost.
    pub fn next(&self, event: &LinkEvent) -> LinkState {
        match (self, event) {
            (_, LinkEvent::ConnectStarted) => LinkState::Connecting,
            (LinkState::Connecting, LinkEvent::ConnectSucceeded) => LinkState::Connected,
            (current, LinkEvent::ConnectSucceeded) => current.clone(),
            (_, LinkEvent::ConnectFailed(reason)) => LinkState::Failed(reason.clone()),
            (LinkState::Connected, LinkEvent::Lost(reason)) => LinkState::Failed(reason.clone()),
            (current, LinkEvent::Lost(_)) => current.clone(),
            (_, LinkEvent::Closed) => LinkState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

/// Owner of one link's state; the bridge is its only writer
#[derive(Debug)]
pub struct LinkTracker {
    side: &'static str,
    state: watch::Sender<LinkState>,
}

impl LinkTracker {
    pub fn new(side: &'static str) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self { side, state }
    }

    pub fn current(&self) -> LinkState {
        self.state.borrow().clone()
    }

    /// Apply an event and return the new state
    pub fn apply(&self, event: LinkEvent) -> LinkState {
        let mut next = LinkState::Disconnected;
        self.state.send_modify(|state| {
            let updated = state.next(&event);
            let previous = std::mem::replace(state, updated);
            debug!(side = self.side, from = ?previous, to = ?state, "Link state transition");
            next = state.clone();
        });
        next
    }
}
