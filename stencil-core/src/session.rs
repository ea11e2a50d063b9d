//! Session model: the persisted device/cluster configuration templates render against.
//!
//! The on-disk schema is owned by the configuration collaborator; by the time a
//! session reaches the generator it already conforms to this shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::types::SessionId;

/// Iterator over every cluster known to the session.
pub const ITER_AVAILABLE_CLUSTER: &str = "available_cluster";
/// Iterator over clusters enabled on any endpoint.
pub const ITER_SELECTED_CLUSTER: &str = "selected_cluster";
/// Iterator over clusters enabled on the server side.
pub const ITER_SELECTED_SERVER_CLUSTER: &str = "selected_server_cluster";
/// Iterator over clusters enabled on the client side.
pub const ITER_SELECTED_CLIENT_CLUSTER: &str = "selected_client_cluster";

const ITERATORS: &[&str] = &[
    ITER_AVAILABLE_CLUSTER,
    ITER_SELECTED_CLUSTER,
    ITER_SELECTED_SERVER_CLUSTER,
    ITER_SELECTED_CLIENT_CLUSTER,
];

/// Cluster side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Server,
    Client,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub code: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub code: u32,
    pub name: String,
}

/// A cluster definition from the session's catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub code: u32,
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub commands: Vec<Command>,
}

/// A cluster enabled on an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointCluster {
    pub code: u32,
    #[serde(default)]
    pub side: Side,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: u16,
    pub device_type: String,
    #[serde(default)]
    pub clusters: Vec<EndpointCluster>,
}

/// A stored configuration session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl Session {
    /// An empty session with the given id.
    pub fn new(id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            options: BTreeMap::new(),
            clusters: Vec::new(),
            endpoints: Vec::new(),
        }
    }

    /// Look up a catalogue cluster by code.
    pub fn cluster(&self, code: u32) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.code == code)
    }

    /// Items produced by the named iterator, serialized for use as render contexts.
    ///
    /// Selected clusters are de-duplicated by code and returned in catalogue order.
    pub fn iterate(&self, name: &str) -> Result<Vec<Value>, StoreError> {
        let selected = |side: Option<Side>| -> Vec<&Cluster> {
            self.clusters
                .iter()
                .filter(|cluster| {
                    self.endpoints.iter().any(|ep| {
                        ep.clusters.iter().any(|ec| {
                            ec.enabled
                                && ec.code == cluster.code
                                && side.map(|s| s == ec.side).unwrap_or(true)
                        })
                    })
                })
                .collect()
        };

        let clusters: Vec<&Cluster> = match name {
            ITER_AVAILABLE_CLUSTER => self.clusters.iter().collect(),
            ITER_SELECTED_CLUSTER => selected(None),
            ITER_SELECTED_SERVER_CLUSTER => selected(Some(Side::Server)),
            ITER_SELECTED_CLIENT_CLUSTER => selected(Some(Side::Client)),
            other => {
                return Err(StoreError::UnknownIterator {
                    name: other.to_string(),
                    valid: ITERATORS.join(", "),
                })
            }
        };

        Ok(clusters
            .into_iter()
            .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let mut s = Session::new("s-1");
        s.clusters = vec![
            Cluster { code: 0x0006, name: "On/Off".into(), attributes: vec![], commands: vec![] },
            Cluster { code: 0x0008, name: "Level Control".into(), attributes: vec![], commands: vec![] },
            Cluster { code: 0x0300, name: "Color Control".into(), attributes: vec![], commands: vec![] },
        ];
        s.endpoints = vec![Endpoint {
            id: 1,
            device_type: "dimmable-light".into(),
            clusters: vec![
                EndpointCluster { code: 0x0006, side: Side::Server, enabled: true },
                EndpointCluster { code: 0x0008, side: Side::Client, enabled: true },
                EndpointCluster { code: 0x0300, side: Side::Server, enabled: false },
            ],
        }];
        s
    }

    #[test]
    fn available_cluster_lists_catalogue() {
        assert_eq!(session().iterate(ITER_AVAILABLE_CLUSTER).unwrap().len(), 3);
    }

    #[test]
    fn selected_clusters_respect_side_and_enabled() {
        let s = session();
        let all = s.iterate(ITER_SELECTED_CLUSTER).unwrap();
        assert_eq!(all.len(), 2, "disabled cluster must be skipped");
        let server = s.iterate(ITER_SELECTED_SERVER_CLUSTER).unwrap();
        assert_eq!(server.len(), 1);
        assert_eq!(server[0]["name"], "On/Off");
        let client = s.iterate(ITER_SELECTED_CLIENT_CLUSTER).unwrap();
        assert_eq!(client[0]["name"], "Level Control");
    }

    #[test]
    fn unknown_iterator_lists_valid_values() {
        let err = session().iterate("bogus").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bogus"));
        assert!(msg.contains(ITER_SELECTED_SERVER_CLUSTER));
    }
}
