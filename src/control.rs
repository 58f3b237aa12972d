use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Carried on a `Connection` packet from the dialing peer: announces its
/// identity before the listener's local record has a live conn-manager entry
/// for it (the Go source's `N2MOnConnection`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionAnnounce {
    pub id: String,
    pub name: String,
}

/// The listener's reply on the same `Connection` packet, carrying its own
/// full node record (`M2NOnConnection`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionAck {
    pub id: String,
    pub name: String,
    pub frontend: bool,
}

/// Carried on a `DisConnection` packet (`N2MOnSessionClose`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClose {
    pub session_id: i64,
}

/// Carried on a `BindConnection` packet (`N2MOnSessionBindServer`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBindServer {
    pub session_id: i64,
    pub uid: i64,
    pub servers: HashMap<String, String>,
}

/// Carried on a `NotifyData` packet. An empty `session_ids` means "broadcast
/// to every session this node currently holds".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyData {
    pub session_ids: Vec<i64>,
    pub payload: Vec<u8>,
}
