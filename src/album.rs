use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use crate::platform::InboundMessage;

/// Telegram caps an album at ten items.
pub const MAX_GROUP_MEMBERS: usize = 10;
pub const MAX_OPEN_GROUPS: usize = 32;
const CLOSED_GROUP_MEMORY: usize = 256;

/// How a photo event resolved against the album buffer.
#[derive(Debug, PartialEq)]
pub enum Grouping {
    /// This event opened the group; here are all members seen within the window.
    Album(Vec<InboundMessage>),
    /// Relay this event on its own.
    Single(InboundMessage),
    /// Added to a group that another dispatch is collecting.
    Absorbed,
}

#[derive(Default)]
struct AlbumState {
    open: HashMap<String, Vec<InboundMessage>>,
    closed: VecDeque<String>,
}

/// Bounded correlation buffer that groups album members by `group_id`.
pub struct AlbumCollector {
    window: Duration,
    state: Mutex<AlbumState>,
}

enum Offer {
    Opened(String),
    Joined,
    Rejected(InboundMessage),
}

impl AlbumCollector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(AlbumState::default()),
        }
    }

    /// Resolve one event. The first member of a group waits out the window
    /// and returns the whole album; later members return immediately.
    pub async fn collect(&self, msg: InboundMessage) -> Grouping {
        match self.offer(msg).await {
            Offer::Rejected(msg) => Grouping::Single(msg),
            Offer::Joined => Grouping::Absorbed,
            Offer::Opened(group_id) => {
                tokio::time::sleep(self.window).await;
                Grouping::Album(self.close(&group_id).await)
            }
        }
    }

    async fn offer(&self, msg: InboundMessage) -> Offer {
        let Some(group_id) = msg.group_id.clone() else {
            return Offer::Rejected(msg);
        };

        let mut state = self.state.lock().await;
        if let Some(members) = state.open.get_mut(&group_id) {
            if members.len() >= MAX_GROUP_MEMBERS {
                debug!(group_id = %group_id, "album full; relaying member on its own");
                return Offer::Rejected(msg);
            }
            members.push(msg);
            return Offer::Joined;
        }

        if state.closed.contains(&group_id) {
            debug!(group_id = %group_id, "album member arrived after its window closed");
            return Offer::Rejected(msg);
        }
        if state.open.len() >= MAX_OPEN_GROUPS {
            debug!(group_id = %group_id, "too many open albums; relaying member on its own");
            return Offer::Rejected(msg);
        }

        state.open.insert(group_id.clone(), vec![msg]);
        Offer::Opened(group_id)
    }

    async fn close(&self, group_id: &str) -> Vec<InboundMessage> {
        let mut state = self.state.lock().await;
        let mut members = state.open.remove(group_id).unwrap_or_default();

        state.closed.push_back(group_id.to_string());
        while state.closed.len() > CLOSED_GROUP_MEMORY {
            state.closed.pop_front();
        }

        members.sort_by_key(|m| m.message_id);
        debug!(group_id = %group_id, members = members.len(), "album closed");
        members
    }
}
