//! Channel Affinity Router
//!
//! Exactly one server in the active set owns each channel and is the only
//! process allowed to assign ordering keys for it. Ownership is a pure
//! function of `(channel_id, server_count)`, so every process computes the
//! same answer without coordination. The server count can change when the
//! active set changes; it is held in an atomic, so lookups take no lock.

use crate::shared::{ChannelId, ServerId, WrongServer};
use std::sync::atomic::{AtomicU32, Ordering};

/// Owner of `channel_id` in a set of `server_count` servers
///
/// Folds the 64-bit id into 32 bits (high word xor low word) and takes the
/// non-negative remainder.
pub fn owner_for(channel_id: ChannelId, server_count: u32) -> ServerId {
    let raw = channel_id.0 as u64;
    let folded = (raw ^ (raw >> 32)) as u32 as i32;
    let count = i64::from(server_count.max(1));
    ServerId(i64::from(folded).rem_euclid(count) as u32)
}

/// Affinity router for one server process
#[derive(Debug)]
pub struct ChannelRouter {
    local: ServerId,
    server_count: AtomicU32,
}

impl ChannelRouter {
    pub fn new(local: ServerId, server_count: u32) -> Self {
        Self {
            local,
            server_count: AtomicU32::new(server_count.max(1)),
        }
    }

    pub fn local_server(&self) -> ServerId {
        self.local
    }

    pub fn server_count(&self) -> u32 {
        self.server_count.load(Ordering::Acquire)
    }

    /// Record a change in the active server set
    pub fn set_server_count(&self, count: u32) {
        let count = count.max(1);
        let previous = self.server_count.swap(count, Ordering::AcqRel);
        if previous != count {
            tracing::info!(
                "[Router] Active server set changed: {} -> {} servers",
                previous,
                count
            );
        }
    }

    pub fn owner_of(&self, channel_id: ChannelId) -> ServerId {
        owner_for(channel_id, self.server_count())
    }

    pub fn is_owner(&self, channel_id: ChannelId) -> bool {
        self.owner_of(channel_id) == self.local
    }

    /// Ok when this process owns the channel, otherwise the redirect signal
    pub fn check(&self, channel_id: ChannelId) -> Result<(), WrongServer> {
        let expected = self.owner_of(channel_id);
        if expected == self.local {
            Ok(())
        } else {
            tracing::debug!(
                "[Router] Channel {} belongs to server {}, redirecting",
                channel_id,
                expected
            );
            Err(WrongServer {
                channel_id,
                expected_server_id: expected,
                actual_server_id: self.local,
            })
        }
    }
}
