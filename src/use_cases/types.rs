// Change signal payload flowing from ingress into the broadcast loop.

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChanged {
    Joined { player_id: Arc<str> },
    Left { player_id: Arc<str> },
    Moved { player_id: Arc<str> },
    // A connection registered and needs the current state.
    Connected { conn_id: u64 },
}
