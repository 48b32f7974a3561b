//! Session/channel identity management
//!
//! A session identity (the channel id shared out of band between the two
//! peers) deterministically derives the two per-session pub/sub channels.
//! Replacing the identity must unsubscribe the previous identity's channels
//! so no payloads from an abandoned session leak into the new one.

use crate::signaling::protocol::{scoped_channel, ANSWER_CHANNEL_PREFIX, CANDIDATE_CHANNEL_PREFIX};
use crate::signaling::SignalingClient;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// A session identity and its derived channel names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIdentity {
    id: String,
}

impl ChannelIdentity {
    /// Wrap a raw channel id
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }

    /// The raw channel id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Channel the local answer is published to
    pub fn answer_channel(&self) -> String {
        scoped_channel(ANSWER_CHANNEL_PREFIX, &self.id)
    }

    /// Channel candidates are exchanged on
    pub fn candidate_channel(&self) -> String {
        scoped_channel(CANDIDATE_CHANNEL_PREFIX, &self.id)
    }
}

/// Tracks the current identity and cleans up subscriptions on change
pub struct IdentityManager {
    signaling: Arc<SignalingClient>,
    current: Option<ChannelIdentity>,
}

impl IdentityManager {
    /// Create a manager with no identity set
    pub fn new(signaling: Arc<SignalingClient>) -> Self {
        Self {
            signaling,
            current: None,
        }
    }

    /// The current identity, if one is set
    pub fn current(&self) -> Option<&ChannelIdentity> {
        self.current.as_ref()
    }

    /// Adopt a new identity
    ///
    /// Unsubscribes both derived channels of the previous identity first.
    /// Setting the same id again is a no-op; nothing is unsubscribed and
    /// nothing is subscribed twice.
    pub async fn set(&mut self, id: &str) -> Result<()> {
        if self.current.as_ref().map(ChannelIdentity::id) == Some(id) {
            debug!("channel id unchanged: {}", id);
            return Ok(());
        }

        if let Some(old) = self.current.take() {
            debug!("replacing channel id {} with {}", old.id(), id);
            self.signaling.unsubscribe(&old.answer_channel()).await?;
            self.signaling.unsubscribe(&old.candidate_channel()).await?;
        }

        self.current = Some(ChannelIdentity::new(id));
        Ok(())
    }
}
