//! Ordering-Key Generator
//!
//! Produces `"<millis>.<seq>"` keys for messages accepted by this process.
//! The timestamp/sequence pair sits behind a single mutex: this is the one
//! intentional serialization point on the write path, and it covers key
//! generation only (not persistence or broadcast).
//!
//! Keys are monotonic within the process. They are not globally unique;
//! the message store enforces uniqueness per `(channel_id, ordering_key)`,
//! and channel affinity keeps each channel on a single generator.

use crate::backend::error::OrderingError;
use crate::shared::message::MAX_SEQUENCE;
use crate::shared::{ChannelId, OrderingKey};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> Result<i64, OrderingError>;
}

/// Wall clock backed by `SystemTime`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Result<i64, OrderingError> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| OrderingError::ClockUnavailable(e.to_string()))?;
        i64::try_from(elapsed.as_millis())
            .map_err(|e| OrderingError::ClockUnavailable(e.to_string()))
    }
}

#[derive(Debug, Default)]
struct KeyState {
    last_millis: Option<i64>,
    sequence: u32,
}

/// Process-local ordering-key generator
pub struct OrderingKeyGenerator {
    clock: Arc<dyn Clock>,
    state: Mutex<KeyState>,
}

impl OrderingKeyGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(KeyState::default()),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Next key for a message in `channel_id`
    ///
    /// If the clock has not advanced since the previous key (or went
    /// backwards) the sequence increments; when it advances the sequence
    /// resets to zero. When the sequence is exhausted within one
    /// millisecond the call spins until the clock moves on.
    pub fn next(&self, channel_id: Option<ChannelId>) -> Result<OrderingKey, OrderingError> {
        // KeyState is two plain integers; a panic elsewhere cannot leave it torn.
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        loop {
            let now = self.clock.now_millis().map_err(|e| {
                tracing::error!("[Ordering] Clock failure: {}", e);
                e
            })?;

            match state.last_millis {
                Some(last) if now <= last => {
                    if state.sequence < MAX_SEQUENCE {
                        state.sequence += 1;
                        let key = OrderingKey::from_parts(last, state.sequence);
                        tracing::trace!("[Ordering] {:?} -> {}", channel_id, key);
                        return Ok(key);
                    }
                    std::hint::spin_loop();
                    std::thread::yield_now();
                }
                _ => {
                    state.last_millis = Some(now);
                    state.sequence = 0;
                    let key = OrderingKey::from_parts(now, 0);
                    tracing::trace!("[Ordering] {:?} -> {}", channel_id, key);
                    return Ok(key);
                }
            }
        }
    }
}
