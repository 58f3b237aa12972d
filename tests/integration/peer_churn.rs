//! Scenario F — peer churn (`spec.md` §8).
//!
//! A `Delete` for one backend drops it from its node class but leaves a
//! stale route entry in place; a later `Put` for its replacement, carrying
//! the same routed message id, re-installs the route.

use mesh_cluster::{Node, NodeAgent};

#[test]
fn a_replacement_peers_put_heals_the_stale_route() {
    let agent = NodeAgent::new(Node::new("1", "GATE", "127.0.0.1:1", true, vec![]));

    let b1 = Node::new("10", "GAME", "127.0.0.1:10", false, vec![103]);
    agent.apply_put("GAME", &serde_json::to_vec(&vec![b1]).unwrap()).unwrap();
    assert_eq!(agent.list("GAME").len(), 1);
    assert_eq!(agent.get_groutes(103).as_deref(), Some("GAME"));

    agent.apply_delete("GAME", "10");
    assert!(agent.list("GAME").is_empty(), "the deleted peer must drop out of its node class");
    assert_eq!(agent.get_groutes(103).as_deref(), Some("GAME"), "the route survives the delete until another put rewrites it");

    let b2 = Node::new("11", "GAME", "127.0.0.1:11", false, vec![103]);
    agent.apply_put("GAME", &serde_json::to_vec(&vec![b2]).unwrap()).unwrap();
    assert_eq!(agent.list("GAME").len(), 1);
    assert_eq!(agent.list("GAME")[0].id, "11");
    assert_eq!(agent.get_groutes(103).as_deref(), Some("GAME"));
}
