use serde::{Deserialize, Serialize};

/// A cluster member's advertised record, as published to and read back from
/// the service registry (`spec.md` §3/§6): `name` is a service class
/// ("GATE", "GAME"), `id` uniquely identifies the instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub addr: String,
    pub frontend: bool,
    pub routes: Vec<i32>,
}

impl Node {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, addr: impl Into<String>, frontend: bool, routes: Vec<i32>) -> Self {
        Self { id: id.into(), name: name.into(), addr: addr.into(), frontend, routes }
    }
}
