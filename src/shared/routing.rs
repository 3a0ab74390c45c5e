//! Wrong-Server Signal
//!
//! Returned when a message targets a channel that the receiving process does
//! not own. The client is expected to reconnect to `expected_server_id`.
use crate::shared::ids::{ChannelId, ServerId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrongServer {
    pub channel_id: ChannelId,
    pub expected_server_id: ServerId,
    pub actual_server_id: ServerId,
}

impl fmt::Display for WrongServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channel {} is owned by server {} (this is server {})",
            self.channel_id, self.expected_server_id, self.actual_server_id
        )
    }
}
