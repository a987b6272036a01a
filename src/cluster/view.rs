//! Static cluster membership as seen from one node.

use std::collections::BTreeMap;

use super::config::{ClusterConfig, NodeConfig, NodeId};

/// Fixed member list plus the local node's identity.
///
/// Who is currently Master is not stored here; that lives in the role
/// manager's published `RoleView`.
#[derive(Debug, Clone)]
pub struct ClusterView {
    self_id: NodeId,
    nodes: BTreeMap<NodeId, NodeConfig>,
}

impl ClusterView {
    /// Returns `None` if `self_id` is not a member.
    pub fn new(config: &ClusterConfig, self_id: NodeId) -> Option<Self> {
        let nodes: BTreeMap<_, _> = config
            .nodes
            .iter()
            .map(|n| (n.node_id, n.clone()))
            .collect();
        nodes.contains_key(&self_id).then_some(Self { self_id, nodes })
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    pub fn local(&self) -> Option<&NodeConfig> {
        self.nodes.get(&self.self_id)
    }

    pub fn node(&self, node_id: NodeId) -> Option<&NodeConfig> {
        self.nodes.get(&node_id)
    }

    /// Every other member, in id order.
    pub fn peers(&self) -> impl Iterator<Item = &NodeConfig> {
        let self_id = self.self_id;
        self.nodes.values().filter(move |n| n.node_id != self_id)
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.peers().map(|n| n.node_id).collect()
    }

    pub fn is_member(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Client address of a node, used in redirect replies.
    pub fn client_addr(&self, node_id: NodeId) -> Option<String> {
        self.nodes.get(&node_id).map(NodeConfig::client_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peers_exclude_self() {
        let config = ClusterConfig::sample("./data");
        let view = ClusterView::new(&config, 2).unwrap();
        assert_eq!(view.peer_ids(), vec![1, 3]);
        assert_eq!(view.client_addr(3).as_deref(), Some("127.0.0.1:7003"));
        assert!(view.is_member(1));
        assert!(!view.is_member(4));
    }

    #[test]
    fn test_unknown_self_rejected() {
        let config = ClusterConfig::sample("./data");
        assert!(ClusterView::new(&config, 7).is_none());
    }
}
