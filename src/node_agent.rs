use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use mesh_packet::{Codec, Packet, PacketPool, PacketType};
use mesh_session::{Session, SessionRegistry};
use rand::seq::SliceRandom;
use std::sync::Arc;

use crate::control::SessionBindServer;
use crate::errors::ClusterError;
use crate::node::Node;

/// Local identity, cluster peer view, and the `messageID → nodeName` routing
/// table (`spec.md` §3/§4.6). `conns` is the live outbound-connection table
/// to peers, keyed by their parsed numeric node id — the same shape as a
/// session registry, so it's built on [`SessionRegistry`] directly.
pub struct NodeAgent {
    local: Node,
    nodes_by_name: RwLock<HashMap<String, Vec<Node>>>,
    nodes_by_id: RwLock<HashMap<String, Node>>,
    routes: RwLock<HashMap<i32, String>>,
    conns: SessionRegistry,
    pool: PacketPool,
}

impl NodeAgent {
    #[must_use]
    pub fn new(local: Node) -> Self {
        Self {
            local,
            nodes_by_name: RwLock::new(HashMap::new()),
            nodes_by_id: RwLock::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            conns: SessionRegistry::new(),
            pool: PacketPool::new(),
        }
    }

    #[must_use]
    pub fn local(&self) -> &Node {
        &self.local
    }

    #[must_use]
    pub fn conns(&self) -> &SessionRegistry {
        &self.conns
    }

    /// `storeNodeConn` — the single-parameter form (`spec.md` §9 Open
    /// Question: the `name` parameter is unused downstream in the source).
    pub fn store_node_conn(&self, id: &str, conn: Arc<dyn Session>) {
        let Ok(numeric_id) = id.parse::<i64>() else { return };
        conn.bind_id(numeric_id);
        conn.bind_uid(-1);
        self.conns.store(conn);
    }

    /// Merge a registry `Put(name, value)` event. Returns the peers that are
    /// genuinely new *and* whose id is greater than the local id — those are
    /// the ones the local node must dial (`spec.md` §4.6 point 2: "the side
    /// with the smaller id is the listener").
    pub fn apply_put(&self, name: &str, raw: &[u8]) -> Result<Vec<Node>, ClusterError> {
        let incoming: Vec<Node> = serde_json::from_slice(raw)?;

        let already_known: std::collections::HashSet<String> =
            self.nodes_by_name.read().unwrap().get(name).map(|v| v.iter().map(|n| n.id.clone()).collect()).unwrap_or_default();

        let mut to_dial = Vec::new();
        {
            let mut routes = self.routes.write().unwrap();
            for peer in &incoming {
                for route_id in &peer.routes {
                    routes.insert(*route_id, peer.name.clone());
                }
            }
        }
        for peer in &incoming {
            if already_known.contains(&peer.id) {
                continue;
            }
            if peer.id == self.local.id {
                continue;
            }
            if self.local.id > peer.id {
                continue;
            }
            to_dial.push(peer.clone());
        }

        let mut nodes_by_id = self.nodes_by_id.write().unwrap();
        for peer in &incoming {
            nodes_by_id.insert(peer.id.clone(), peer.clone());
        }
        drop(nodes_by_id);
        self.nodes_by_name.write().unwrap().insert(name.to_owned(), incoming);

        Ok(to_dial)
    }

    /// Merge a registry `Delete(name, id)` event. Per `spec.md` §9's Open
    /// Question on route-table deletion: `routes` is **not** purged here —
    /// a stale `routes[id] -> name` entry can survive until another peer's
    /// `Put` rewrites it, matching the source's actual (non-purging) behavior.
    pub fn apply_delete(&self, name: &str, id: &str) {
        let mut nodes_by_name = self.nodes_by_name.write().unwrap();
        if let Some(list) = nodes_by_name.get_mut(name) {
            list.retain(|n| n.id != id);
            if list.is_empty() {
                nodes_by_name.remove(name);
            }
        }
        drop(nodes_by_name);
        self.nodes_by_id.write().unwrap().remove(id);
    }

    #[must_use]
    pub fn list(&self, name: &str) -> Vec<Node> {
        self.nodes_by_name.read().unwrap().get(name).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn get_groutes(&self, message_id: i32) -> Option<String> {
        self.routes.read().unwrap().get(&message_id).cloned()
    }

    #[must_use]
    pub fn has_groutes(&self, message_id: i32) -> bool {
        self.routes.read().unwrap().contains_key(&message_id)
    }

    /// `getNodeByName` — session-sticky lookup: honor an existing binding,
    /// otherwise fall through to [`NodeAgent::pick`].
    pub async fn get_node_by_name(&self, session: &dyn Session, name: &str) -> Result<Arc<dyn Session>, ClusterError> {
        match session.get_server(name) {
            Some(bound_id) => {
                let numeric = bound_id.parse::<i64>().map_err(|_| ClusterError::NodeNotConnected(bound_id.clone()))?;
                self.conns.get_by_id(numeric).ok_or(ClusterError::NodeNotConnected(bound_id))
            }
            None => self.pick(name, session).await,
        }
    }

    /// `pick` — uniform-random choice among the live peers of `name`,
    /// records the sticky binding on the session, and announces it to the
    /// chosen peer via a `BindConnection` control packet.
    pub async fn pick(&self, name: &str, session: &dyn Session) -> Result<Arc<dyn Session>, ClusterError> {
        let candidates = self.nodes_by_name.read().unwrap().get(name).cloned();
        let candidates = candidates.ok_or_else(|| ClusterError::NodeClassNotFound(name.to_owned()))?;
        if candidates.is_empty() {
            return Err(ClusterError::NodeClassEmpty(name.to_owned()));
        }
        let chosen = candidates.choose(&mut rand::thread_rng()).expect("non-empty checked above");

        let numeric = chosen.id.parse::<i64>().map_err(|_| ClusterError::NodeNotConnected(chosen.id.clone()))?;
        let conn = self.conns.get_by_id(numeric).ok_or_else(|| ClusterError::NodeNotConnected(chosen.id.clone()))?;

        session.bind_server(name, &chosen.id);
        session.bind_server(&self.local.name, &self.local.id);

        let announce = SessionBindServer { session_id: session.id(), uid: session.uid(), servers: session.servers() };
        let payload = Bytes::from(serde_json::to_vec(&announce)?);
        let packet = self.pool.new_packet(PacketType::BindConnection, 0, payload);
        conn.send_data(Codec::encode_one(&packet)).await?;

        Ok(conn)
    }

    /// `getGateNode` — the first bound peer whose `Node.frontend` is true.
    pub fn get_gate_node(&self, session: &dyn Session) -> Result<Arc<dyn Session>, ClusterError> {
        let nodes_by_id = self.nodes_by_id.read().unwrap();
        for bound_id in session.servers().values() {
            let Some(node) = nodes_by_id.get(bound_id) else { continue };
            if !node.frontend {
                continue;
            }
            let numeric = bound_id.parse::<i64>().map_err(|_| ClusterError::NodeNotConnected(bound_id.clone()))?;
            return self.conns.get_by_id(numeric).ok_or_else(|| ClusterError::NodeNotConnected(bound_id.clone()));
        }
        Err(ClusterError::GateNotFound(session.id()))
    }

    /// `notifyCloseSession` — on a gate session's teardown, fan out
    /// `DisConnection(sessionID)` to every non-local node bound in
    /// `session.servers`. Fan-out failures are joined, never short-circuited.
    pub async fn notify_close_session(&self, session: &dyn Session) -> Result<(), ClusterError> {
        let servers = session.servers();
        let close = crate::control::SessionClose { session_id: session.id() };
        let payload = Bytes::from(serde_json::to_vec(&close)?);

        let mut errors = Vec::new();
        let mut attempted = 0;
        for (peer_name, peer_id) in &servers {
            if *peer_name == self.local.name {
                continue;
            }
            attempted += 1;
            let result: Result<(), ClusterError> = async {
                let numeric = peer_id.parse::<i64>().map_err(|_| ClusterError::NodeNotConnected(peer_id.clone()))?;
                let conn = self.conns.get_by_id(numeric).ok_or_else(|| ClusterError::NodeNotConnected(peer_id.clone()))?;
                let packet = self.pool.new_packet(PacketType::DisConnection, 0, payload.clone());
                conn.send_data(Codec::encode_one(&packet)).await?;
                Ok(())
            }
            .await;
            if let Err(e) = result {
                errors.push(e);
            }
        }
        ClusterError::join(attempted, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_put_reports_only_genuinely_new_higher_id_peers_for_dialing() {
        let agent = NodeAgent::new(Node::new("5", "GATE", "127.0.0.1:1", true, vec![]));
        let peers = vec![
            Node::new("3", "GAME", "127.0.0.1:2", false, vec![100]),
            Node::new("9", "GAME", "127.0.0.1:3", false, vec![101]),
        ];
        let raw = serde_json::to_vec(&peers).unwrap();
        let to_dial = agent.apply_put("GAME", &raw).unwrap();
        assert_eq!(to_dial.len(), 1);
        assert_eq!(to_dial[0].id, "9");
        assert_eq!(agent.get_groutes(100).as_deref(), Some("GAME"));
        assert_eq!(agent.get_groutes(101).as_deref(), Some("GAME"));
    }

    #[test]
    fn apply_delete_drops_the_peer_but_keeps_stale_routes() {
        let agent = NodeAgent::new(Node::new("5", "GATE", "127.0.0.1:1", true, vec![]));
        let peers = vec![Node::new("9", "GAME", "127.0.0.1:3", false, vec![103])];
        let raw = serde_json::to_vec(&peers).unwrap();
        agent.apply_put("GAME", &raw).unwrap();

        agent.apply_delete("GAME", "9");
        assert!(agent.list("GAME").is_empty());
        assert!(agent.has_groutes(103), "stale route must survive peer removal");
    }

    #[test]
    fn apply_put_is_idempotent_for_an_already_known_peer() {
        let agent = NodeAgent::new(Node::new("5", "GATE", "127.0.0.1:1", true, vec![]));
        let peers = vec![Node::new("9", "GAME", "127.0.0.1:3", false, vec![])];
        let raw = serde_json::to_vec(&peers).unwrap();
        agent.apply_put("GAME", &raw).unwrap();
        let to_dial_again = agent.apply_put("GAME", &raw).unwrap();
        assert!(to_dial_again.is_empty(), "an already-known peer must not be re-dialed");
    }
}
