//! Building typed records from hypervisor API payloads

use serde_json::Value;
use std::collections::HashMap;

use crate::client::fields::{
    bool_field, f64_field, f64_list, str_field, string_field, u64_field,
};
use crate::types::{Guest, GuestStatus, GuestType, Node, NodeStatus, StorageInfo};

/// What `/cluster/status` says about one node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterNodeInfo {
    pub ip: Option<String>,
    pub online: Option<bool>,
}

/// Node name → address and liveness from a `/cluster/status` listing
pub fn cluster_node_map(entries: &[Value]) -> HashMap<String, ClusterNodeInfo> {
    entries
        .iter()
        .filter(|entry| str_field(entry, "type") == Some("node"))
        .filter_map(|entry| {
            let name = string_field(entry, "name")?;
            let online = entry.get("online").map(|_| bool_field(entry, "online"));
            Some((
                name,
                ClusterNodeInfo {
                    ip: string_field(entry, "ip"),
                    online,
                },
            ))
        })
        .collect()
}

/// Node skeleton from a `/nodes` entry
pub fn node_from_listing(entry: &Value, endpoint_id: &str, display_name: String) -> Option<Node> {
    let name = str_field(entry, "node")?;
    let mut node = Node::offline(endpoint_id, name, display_name);
    node.status = str_field(entry, "status").map(NodeStatus::from).unwrap_or(NodeStatus::Unknown);
    node.cpu = f64_field(entry, "cpu");
    node.maxcpu = u64_field(entry, "maxcpu").map(|c| c as u32);
    node.mem = u64_field(entry, "mem");
    node.maxmem = u64_field(entry, "maxmem");
    node.disk = u64_field(entry, "disk");
    node.maxdisk = u64_field(entry, "maxdisk");
    node.uptime = u64_field(entry, "uptime").unwrap_or(0);
    Some(node)
}

/// Overlay `/nodes/{node}/status` details onto a listed node
pub fn apply_node_status(node: &mut Node, status: &Value) {
    if let Some(cpu) = f64_field(status, "cpu") {
        node.cpu = Some(cpu);
    }
    if let Some(cpus) = status.get("cpuinfo").and_then(|info| u64_field(info, "cpus")) {
        node.maxcpu = Some(cpus as u32);
    }
    if let Some(memory) = status.get("memory") {
        node.mem = u64_field(memory, "used").or(node.mem);
        node.maxmem = u64_field(memory, "total").or(node.maxmem);
    }
    if let Some(rootfs) = status.get("rootfs") {
        node.disk = u64_field(rootfs, "used").or(node.disk);
        node.maxdisk = u64_field(rootfs, "total").or(node.maxdisk);
    }
    if let Some(uptime) = u64_field(status, "uptime") {
        node.uptime = uptime;
    }
    let loadavg = f64_list(status, "loadavg");
    if !loadavg.is_empty() {
        node.loadavg = loadavg;
    }
}

pub fn storage_from_entry(entry: &Value) -> Option<StorageInfo> {
    Some(StorageInfo {
        storage: string_field(entry, "storage")?,
        storage_type: string_field(entry, "type").unwrap_or_default(),
        content: string_field(entry, "content").unwrap_or_default(),
        shared: bool_field(entry, "shared"),
        enabled: entry.get("enabled").map(|_| bool_field(entry, "enabled")).unwrap_or(true),
        active: entry.get("active").map(|_| bool_field(entry, "active")).unwrap_or(true),
        total: u64_field(entry, "total").unwrap_or(0),
        used: u64_field(entry, "used").unwrap_or(0),
        avail: u64_field(entry, "avail").unwrap_or(0),
    })
}

/// Guest from a `/nodes/{node}/{qemu|lxc}` or `/cluster/resources` entry
pub fn guest_from_entry(
    entry: &Value,
    endpoint_id: &str,
    node: &str,
    guest_type: GuestType,
) -> Option<Guest> {
    let vmid = u64_field(entry, "vmid")? as u32;
    let tags = str_field(entry, "tags")
        .map(|tags| {
            tags.split(|c: char| c == ';' || c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(Guest {
        endpoint_id: endpoint_id.to_string(),
        vmid,
        name: string_field(entry, "name").unwrap_or_else(|| format!("{} {}", guest_type.api_segment(), vmid)),
        guest_type,
        node: str_field(entry, "node").unwrap_or(node).to_string(),
        status: str_field(entry, "status").map(GuestStatus::from).unwrap_or(GuestStatus::Unknown),
        cpu: f64_field(entry, "cpu"),
        cpus: f64_field(entry, "cpus").or_else(|| f64_field(entry, "maxcpu")),
        mem: u64_field(entry, "mem"),
        maxmem: u64_field(entry, "maxmem"),
        disk: u64_field(entry, "disk"),
        maxdisk: u64_field(entry, "maxdisk"),
        uptime: u64_field(entry, "uptime").unwrap_or(0),
        netin: u64_field(entry, "netin"),
        netout: u64_field(entry, "netout"),
        diskread: u64_field(entry, "diskread"),
        diskwrite: u64_field(entry, "diskwrite"),
        agent_enabled: guest_type == GuestType::Qemu && bool_field(entry, "agent"),
        template: bool_field(entry, "template"),
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cluster_node_map() {
        let entries = vec![
            json!({"type": "cluster", "name": "prod", "nodes": 2}),
            json!({"type": "node", "name": "n1", "ip": "10.0.0.1", "online": 1}),
            json!({"type": "node", "name": "n2", "ip": "10.0.0.2", "online": 0}),
        ];

        let map = cluster_node_map(&entries);
        assert_eq!(map.len(), 2);
        assert_eq!(map["n1"].online, Some(true));
        assert_eq!(map["n2"].online, Some(false));
        assert_eq!(map["n2"].ip.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_node_status_overlay() {
        let listing = json!({"node": "n1", "status": "online", "cpu": 0.1, "maxmem": 100, "uptime": 5});
        let mut node = node_from_listing(&listing, "pve-a", "n1".to_string()).unwrap();

        apply_node_status(
            &mut node,
            &json!({
                "cpu": 0.3,
                "cpuinfo": {"cpus": 16},
                "memory": {"used": 40, "total": 128},
                "uptime": 900,
                "loadavg": ["0.50", "0.40", "0.30"]
            }),
        );

        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.cpu, Some(0.3));
        assert_eq!(node.maxcpu, Some(16));
        assert_eq!(node.mem, Some(40));
        assert_eq!(node.maxmem, Some(128));
        assert_eq!(node.uptime, 900);
        assert_eq!(node.loadavg, vec![0.5, 0.4, 0.3]);
    }

    #[test]
    fn test_guest_agent_flag_only_for_vms() {
        let entry = json!({"vmid": 101, "name": "web", "status": "running", "agent": 1, "tags": "prod;web"});

        let vm = guest_from_entry(&entry, "pve-a", "n1", GuestType::Qemu).unwrap();
        assert!(vm.agent_enabled);
        assert!(vm.is_running());
        assert_eq!(vm.tags, vec!["prod".to_string(), "web".to_string()]);

        let ct = guest_from_entry(&entry, "pve-a", "n1", GuestType::Lxc).unwrap();
        assert!(!ct.agent_enabled);
    }
}
