//! Property-based tests for ordering, affinity and read state

use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use xfchat::backend::access::StaticChannelAccess;
use xfchat::backend::chat::InMemoryMessageStore;
use xfchat::backend::error::OrderingError;
use xfchat::backend::ordering::{Clock, OrderingKeyGenerator};
use xfchat::backend::read_state::{InMemoryReadStateMirror, ReadStateTracker, TrackerDeps, WriteBehind};
use xfchat::backend::realtime::LocalBus;
use xfchat::backend::retry::RetryBuffer;
use xfchat::backend::routing::{owner_for, ChannelRouter};
use xfchat::shared::{ChannelId, MessageId, ReadPosition, ServerId, UserId};

/// Returns scripted readings, then repeats the last one
struct ScriptedClock(Mutex<VecDeque<i64>>, Mutex<i64>);

impl ScriptedClock {
    fn new(readings: Vec<i64>) -> Self {
        let last = readings.last().copied().unwrap_or_default();
        Self(Mutex::new(readings.into()), Mutex::new(last))
    }
}

impl Clock for ScriptedClock {
    fn now_millis(&self) -> Result<i64, OrderingError> {
        match self.0.lock().unwrap().pop_front() {
            Some(reading) => Ok(reading),
            None => Ok(*self.1.lock().unwrap()),
        }
    }
}

fn tracker() -> ReadStateTracker {
    let bus = LocalBus::new();
    let (write_behind, _receiver) = WriteBehind::channel(1024, Arc::new(RetryBuffer::new(1024)));
    ReadStateTracker::new(TrackerDeps {
        mirror: Arc::new(InMemoryReadStateMirror::new()),
        store: Arc::new(InMemoryMessageStore::new()),
        access: Arc::new(StaticChannelAccess::open()),
        bus: Arc::new(bus),
        write_behind,
        publish_timeout: Duration::from_millis(20),
        hydration_limit: 1_000,
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

const BASE_MILLIS: i64 = 1_700_000_000_000;

proptest! {
    #[test]
    fn test_keys_strictly_increase_whatever_the_clock_does(
        offsets in prop::collection::vec(0i64..50, 1..200),
    ) {
        let readings: Vec<i64> = offsets.iter().map(|o| BASE_MILLIS + o).collect();
        let count = readings.len();
        let generator = OrderingKeyGenerator::new(Arc::new(ScriptedClock::new(readings)));

        let mut previous = None;
        for _ in 0..count {
            let key = generator.next(Some(ChannelId(1))).unwrap();
            if let Some(previous) = previous {
                prop_assert!(key > previous, "{} not after {}", key, previous);
            }
            previous = Some(key);
        }
    }

    #[test]
    fn test_owner_is_stable_and_in_range(channel in any::<i64>(), count in 1u32..64) {
        let owner = owner_for(ChannelId(channel), count);
        prop_assert!(owner.0 < count);
        prop_assert_eq!(owner, owner_for(ChannelId(channel), count));
    }

    #[test]
    fn test_exactly_one_router_owns_each_channel(channel in any::<i64>(), count in 1u32..16) {
        let owners = (0..count)
            .filter(|id| ChannelRouter::new(ServerId(*id), count).check(ChannelId(channel)).is_ok())
            .count();
        prop_assert_eq!(owners, 1);
    }

    #[test]
    fn test_mark_unread_is_idempotent(positions in prop::collection::vec(1i64..10_000, 1..50)) {
        let rt = runtime();
        let tracker = tracker();
        let user = UserId::new();
        let channel = ChannelId(3);
        let ids: Vec<MessageId> = positions.iter().map(|_| MessageId::new()).collect();

        for (id, position) in ids.iter().zip(&positions) {
            prop_assert!(tracker.mark_unread(user, channel, *id, ReadPosition(*position)).unwrap());
        }
        let count = rt.block_on(tracker.get_unread_count(user, channel)).unwrap();

        for (id, position) in ids.iter().zip(&positions) {
            prop_assert!(!tracker.mark_unread(user, channel, *id, ReadPosition(*position)).unwrap());
        }
        prop_assert_eq!(rt.block_on(tracker.get_unread_count(user, channel)).unwrap(), count);
        prop_assert_eq!(count, positions.len());
    }

    #[test]
    fn test_read_position_is_the_maximum_seen(positions in prop::collection::vec(0i64..1_000_000, 1..30)) {
        let rt = runtime();
        let tracker = tracker();
        let user = UserId::new();
        let channel = ChannelId(4);

        rt.block_on(async {
            for position in &positions {
                tracker.mark_read(user, channel, ReadPosition(*position)).await.unwrap();
            }
        });

        let stored = rt.block_on(tracker.get_read_position(user, channel)).unwrap();
        let expected = positions.iter().copied().max().map(ReadPosition);
        prop_assert_eq!(stored, expected);
    }
}
