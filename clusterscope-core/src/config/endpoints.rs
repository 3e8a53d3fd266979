//! Configured hypervisor and archive-server endpoints

use serde::{Deserialize, Serialize};

/// Which API family an endpoint speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Hypervisor cluster API
    Pve,
    /// Backup archive server API
    Pbs,
}

/// One configured API connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Unique id; every entity produced in a cycle is tagged with it
    pub id: String,

    /// Friendly name used for node display names
    pub name: String,

    /// Base URL, e.g. `https://10.0.0.1:8006`
    pub host: String,

    /// API token id, e.g. `root@pam!monitoring`
    pub token_id: String,

    pub token_secret: String,

    #[serde(default)]
    pub allow_self_signed_certs: bool,

    /// Archive servers only: node name override used when it cannot be
    /// derived from the task list
    #[serde(default)]
    pub node_name: Option<String>,

    /// Archive servers only: restrict namespace discovery to this namespace
    /// (and its children); root is always queried
    #[serde(default)]
    pub namespace: Option<String>,
}

impl EndpointConfig {
    /// Display name of a node reached through this endpoint
    ///
    /// Standalone endpoints show the configured friendly name. Cluster
    /// endpoints prefix the friendly name onto the raw node name unless the
    /// two are identical.
    pub fn node_display_name(&self, node: &str, is_cluster: bool) -> String {
        if !is_cluster {
            self.name.clone()
        } else if self.name == node {
            node.to_string()
        } else {
            format!("{} - {}", self.name, node)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub pve: Vec<EndpointConfig>,
    pub pbs: Vec<EndpointConfig>,
}
