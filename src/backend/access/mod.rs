//! Channel Access
//!
//! Permission checks and membership lookups are owned by a collaborator
//! outside the chat core. This module defines the seam and a static
//! in-memory implementation used by the standalone server and tests.

use crate::backend::error::AccessError;
use crate::shared::{ChannelId, UserId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[async_trait]
pub trait ChannelAccess: Send + Sync {
    /// Fails with `AccessError::Denied` when `user_id` may not see the channel
    async fn require_channel_access(&self, user_id: UserId, channel_id: ChannelId) -> Result<(), AccessError>;

    /// Current members of a channel
    async fn channel_members(&self, channel_id: ChannelId) -> Result<Vec<UserId>, AccessError>;
}

/// Membership table held in memory
///
/// With `open` set, channels that were never configured with `add_member`
/// admit everyone; the member list of such a channel is whoever joined it so
/// far.
#[derive(Debug, Default)]
pub struct StaticChannelAccess {
    members: RwLock<HashMap<ChannelId, HashSet<UserId>>>,
    configured: RwLock<HashSet<ChannelId>>,
    open: bool,
}

impl StaticChannelAccess {
    /// Only explicitly added members have access
    pub fn closed() -> Self {
        Self::default()
    }

    /// Unknown channels admit any user, who then becomes a member
    pub fn open() -> Self {
        Self {
            open: true,
            ..Self::default()
        }
    }

    pub fn add_member(&self, channel_id: ChannelId, user_id: UserId) {
        if let Ok(mut configured) = self.configured.write() {
            configured.insert(channel_id);
        }
        self.enroll(channel_id, user_id);
    }

    fn enroll(&self, channel_id: ChannelId, user_id: UserId) {
        if let Ok(mut members) = self.members.write() {
            members.entry(channel_id).or_default().insert(user_id);
        }
    }

    pub fn remove_member(&self, channel_id: ChannelId, user_id: UserId) {
        if let Ok(mut members) = self.members.write() {
            if let Some(channel) = members.get_mut(&channel_id) {
                channel.remove(&user_id);
            }
        }
    }
}

fn poisoned<T>(_: T) -> AccessError {
    AccessError::Unavailable("membership lock poisoned".to_string())
}

#[async_trait]
impl ChannelAccess for StaticChannelAccess {
    async fn require_channel_access(&self, user_id: UserId, channel_id: ChannelId) -> Result<(), AccessError> {
        let is_member = self
            .members
            .read()
            .map_err(poisoned)?
            .get(&channel_id)
            .map_or(false, |channel| channel.contains(&user_id));
        if is_member {
            return Ok(());
        }

        let configured = self.configured.read().map_err(poisoned)?.contains(&channel_id);
        if self.open && !configured {
            self.enroll(channel_id, user_id);
            return Ok(());
        }

        tracing::debug!("[Access] Denied user {} on channel {}", user_id, channel_id);
        Err(AccessError::Denied { user_id, channel_id })
    }

    async fn channel_members(&self, channel_id: ChannelId) -> Result<Vec<UserId>, AccessError> {
        let members = self
            .members
            .read()
            .map_err(poisoned)?;
        Ok(members
            .get(&channel_id)
            .map(|channel| channel.iter().copied().collect())
            .unwrap_or_default())
    }
}
