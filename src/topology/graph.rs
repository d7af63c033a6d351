//! The node/link graph and its builder operations.

use std::collections::HashMap;

use log::debug;

use super::interfaces::InterfaceAllocator;
use super::types::{Endpoint, Interface, Link, LinkId, LinkOptions, Node, NodeKind, SwitchOptions};
use crate::ip::{
    parse_address, parse_route, parse_static_route, AddressError, AddressPlan, InterfaceAddress,
    SubnetEntry, SubnetRegistry,
};
use crate::utils::ifname::is_valid_node_name;

/// Structural errors raised while declaring or validating a topology
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Duplicate node name '{0}'")]
    DuplicateName(String),

    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    #[error("Link from '{0}' to itself")]
    SelfLink(String),

    #[error("Interface '{interface}' is already in use on node '{node}'")]
    InterfaceNameConflict { node: String, interface: String },

    #[error("Invalid interface name '{interface}' on node '{node}'")]
    InvalidInterfaceName { node: String, interface: String },

    #[error("Invalid node name '{0}'")]
    InvalidNodeName(String),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("Subnet overlap: {0}")]
    SubnetOverlap(String),
}

/// The declared topology: nodes, links, and the interfaces they imply.
///
/// Every builder call validates its arguments immediately and leaves the
/// graph untouched on failure. Cycles are allowed.
#[derive(Debug, Default)]
pub struct TopologyGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    links: Vec<Link>,
    allocator: InterfaceAllocator,
    interfaces: HashMap<String, Vec<Interface>>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a host with its addresses and an optional default route
    /// (`via 10.1.1.1`, `10.1.1.1` or `dev h1-eth0`).
    pub fn add_host(
        &mut self,
        name: &str,
        addresses: AddressPlan,
        default_route: Option<&str>,
    ) -> Result<(), GraphError> {
        self.check_new_name(name)?;
        let mut node = Node::new(name, NodeKind::Host, addresses);
        node.default_route = default_route.map(parse_route).transpose()?;
        self.insert(node);
        Ok(())
    }

    /// Declare a switch.
    pub fn add_switch(&mut self, name: &str, options: SwitchOptions) -> Result<(), GraphError> {
        self.check_new_name(name)?;
        self.insert(Node::new(name, NodeKind::Switch(options), AddressPlan::none()));
        Ok(())
    }

    /// Declare a router. Forwarding is enabled for it while the topology runs.
    pub fn add_router(&mut self, name: &str, addresses: AddressPlan) -> Result<(), GraphError> {
        self.check_new_name(name)?;
        self.insert(Node::new(name, NodeKind::Router, addresses));
        Ok(())
    }

    /// Set or replace the default route of a host or router.
    pub fn set_default_route(&mut self, node: &str, expression: &str) -> Result<(), GraphError> {
        let target = parse_route(expression)?;
        self.node_mut(node)?.default_route = Some(target);
        Ok(())
    }

    /// Add a static route on `node`, installed after its addresses.
    pub fn add_route(&mut self, node: &str, destination: &str, target: &str) -> Result<(), GraphError> {
        let route = parse_static_route(destination, target)?;
        self.node_mut(node)?.routes.push(route);
        Ok(())
    }

    /// Connect two declared nodes.
    ///
    /// Endpoints without an explicit interface name get `<node>-eth<k>`,
    /// where `k` counts the links already touching that node. An address
    /// given here overrides whatever the node's plan says for the interface.
    pub fn add_link(&mut self, a: &str, b: &str, options: LinkOptions) -> Result<LinkId, GraphError> {
        let node_a = self.node(a).ok_or_else(|| GraphError::UnknownNode(a.to_string()))?;
        let node_b = self.node(b).ok_or_else(|| GraphError::UnknownNode(b.to_string()))?;
        if a == b {
            return Err(GraphError::SelfLink(a.to_string()));
        }

        let a_override = options.a_address.as_deref().map(parse_address).transpose()?;
        let b_override = options.b_address.as_deref().map(parse_address).transpose()?;

        let a_alloc = self.allocator.plan(a, options.a_interface.as_deref())?;
        let b_alloc = self.allocator.plan(b, options.b_interface.as_deref())?;

        let a_address = a_override.or_else(|| planned_address(node_a, &a_alloc.name, a_alloc.index));
        let b_address = b_override.or_else(|| planned_address(node_b, &b_alloc.name, b_alloc.index));

        let id = self.links.len();
        let link = Link {
            id,
            a: Endpoint {
                node: a.to_string(),
                interface: a_alloc.name.clone(),
                address: a_address,
            },
            b: Endpoint {
                node: b.to_string(),
                interface: b_alloc.name.clone(),
                address: b_address,
            },
        };

        self.allocator.commit(a, &a_alloc);
        self.allocator.commit(b, &b_alloc);

        self.interfaces.entry(a.to_string()).or_default().push(Interface {
            node: a.to_string(),
            name: a_alloc.name,
            index: a_alloc.index,
            address: a_address,
            link: id,
            peer: link.b.clone(),
        });
        self.interfaces.entry(b.to_string()).or_default().push(Interface {
            node: b.to_string(),
            name: b_alloc.name,
            index: b_alloc.index,
            address: b_address,
            link: id,
            peer: link.a.clone(),
        });

        debug!("Declared link {}: {}", id, link);
        self.links.push(link);
        Ok(id)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).and_then(|&i| self.nodes.get(i))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Links in declaration order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    /// Interfaces of `node`, in allocation order.
    pub fn interfaces_of(&self, node: &str) -> &[Interface] {
        self.interfaces.get(node).map_or(&[], Vec::as_slice)
    }

    /// Every interface in the topology, grouped by node in declaration order.
    pub fn interfaces(&self) -> Vec<&Interface> {
        self.nodes
            .iter()
            .flat_map(|n| self.interfaces_of(&n.name))
            .collect()
    }

    pub fn switches(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind.is_switch())
    }

    /// Re-check the structural invariants, returning the first violation
    /// in declaration order (nodes first, then links).
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if seen.insert(node.name.as_str(), i).is_some() {
                return Err(GraphError::DuplicateName(node.name.clone()));
            }
        }

        let mut interface_names: HashMap<&str, Vec<&str>> = HashMap::new();
        for link in &self.links {
            for endpoint in [&link.a, &link.b] {
                if !seen.contains_key(endpoint.node.as_str()) {
                    return Err(GraphError::UnknownNode(endpoint.node.clone()));
                }
            }
            if link.a.node == link.b.node {
                return Err(GraphError::SelfLink(link.a.node.clone()));
            }
            for endpoint in [&link.a, &link.b] {
                let names = interface_names.entry(endpoint.node.as_str()).or_default();
                if names.contains(&endpoint.interface.as_str()) {
                    return Err(GraphError::InterfaceNameConflict {
                        node: endpoint.node.clone(),
                        interface: endpoint.interface.clone(),
                    });
                }
                names.push(endpoint.interface.as_str());
            }
        }

        Ok(())
    }

    /// Assign every interface to an L2 segment.
    ///
    /// Both ends of a link share a segment, and a switch joins all of its
    /// interfaces into one. Segment ids are dense and follow declaration
    /// order.
    pub fn segments(&self) -> HashMap<(String, String), usize> {
        let keys: Vec<(String, String)> = self
            .interfaces()
            .into_iter()
            .map(|i| (i.node.clone(), i.name.clone()))
            .collect();
        let position: HashMap<&(String, String), usize> =
            keys.iter().enumerate().map(|(i, k)| (k, i)).collect();

        let mut sets = DisjointSet::new(keys.len());

        for link in &self.links {
            let a = (link.a.node.clone(), link.a.interface.clone());
            let b = (link.b.node.clone(), link.b.interface.clone());
            if let (Some(&x), Some(&y)) = (position.get(&a), position.get(&b)) {
                sets.union(x, y);
            }
        }

        for switch in self.switches() {
            let ports: Vec<usize> = self
                .interfaces_of(&switch.name)
                .iter()
                .filter_map(|i| position.get(&(i.node.clone(), i.name.clone())).copied())
                .collect();
            for pair in ports.windows(2) {
                if let [x, y] = pair {
                    sets.union(*x, *y);
                }
            }
        }

        let mut dense: HashMap<usize, usize> = HashMap::new();
        let mut result = HashMap::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            let root = sets.find(i);
            let next = dense.len();
            let segment = *dense.entry(root).or_insert(next);
            result.insert(key.clone(), segment);
        }
        result
    }

    /// Registry of every address the topology will apply.
    pub fn subnet_registry(&self) -> SubnetRegistry {
        let segments = self.segments();
        let mut registry = SubnetRegistry::new();

        for interface in self.interfaces() {
            if let Some(address) = interface.address {
                let key = (interface.node.clone(), interface.name.clone());
                registry.register(SubnetEntry {
                    node: interface.node.clone(),
                    interface: interface.name.clone(),
                    address,
                    segment: segments.get(&key).copied().unwrap_or_default(),
                });
            }
        }

        registry
    }

    fn check_new_name(&self, name: &str) -> Result<(), GraphError> {
        if !is_valid_node_name(name) {
            return Err(GraphError::InvalidNodeName(name.to_string()));
        }
        if self.contains(name) {
            return Err(GraphError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn insert(&mut self, node: Node) {
        debug!("Declared {} '{}'", node.kind, node.name);
        self.index.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(node);
    }

    fn node_mut(&mut self, name: &str) -> Result<&mut Node, GraphError> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))?;
        self.nodes
            .get_mut(i)
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))
    }
}

/// Address the node's own plan gives the interface `name` at `index`.
fn planned_address(node: &Node, name: &str, index: usize) -> Option<InterfaceAddress> {
    node.addresses.for_interface(name).copied().or_else(|| {
        if index == 0 {
            node.addresses.primary_address().copied()
        } else {
            None
        }
    })
}

/// Union-find over interface positions.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while let Some(&p) = self.parent.get(x) {
            if p == x {
                break;
            }
            let grandparent = self.parent.get(p).copied().unwrap_or(p);
            if let Some(slot) = self.parent.get_mut(x) {
                *slot = grandparent;
            }
            x = p;
        }
        x
    }

    fn union(&mut self, x: usize, y: usize) {
        let (rx, ry) = (self.find(x), self.find(y));
        if rx != ry {
            let (low, high) = if rx < ry { (rx, ry) } else { (ry, rx) };
            if let Some(slot) = self.parent.get_mut(high) {
                *slot = low;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::RouteTarget;

    /// Router r1, switch s1, hosts h1/h2 on 10.1.1.0/24.
    fn single_subnet() -> TopologyGraph {
        let mut graph = TopologyGraph::new();
        graph
            .add_router("r1", AddressPlan::primary("10.1.1.1/24").unwrap())
            .unwrap();
        graph.add_switch("s1", SwitchOptions::default()).unwrap();
        graph
            .add_host("h1", AddressPlan::primary("10.1.1.2/24").unwrap(), Some("via 10.1.1.1"))
            .unwrap();
        graph
            .add_host("h2", AddressPlan::primary("10.1.1.3/24").unwrap(), Some("10.1.1.1"))
            .unwrap();
        graph.add_link("r1", "s1", LinkOptions::new()).unwrap();
        graph.add_link("h1", "s1", LinkOptions::new()).unwrap();
        graph.add_link("h2", "s1", LinkOptions::new()).unwrap();
        graph
    }

    #[test]
    fn test_default_interface_names() {
        let graph = single_subnet();
        let names: Vec<&str> = graph
            .interfaces_of("s1")
            .iter()
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(names, vec!["s1-eth0", "s1-eth1", "s1-eth2"]);
        assert_eq!(graph.interfaces_of("r1")[0].name, "r1-eth0");
        assert_eq!(graph.interfaces_of("h2")[0].name, "h2-eth0");
        assert_eq!(graph.interfaces_of("h2")[0].peer.interface, "s1-eth2");
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_primary_address_lands_on_first_interface() {
        let graph = single_subnet();
        let r1 = &graph.interfaces_of("r1")[0];
        assert_eq!(r1.address.map(|a| a.to_string()), Some("10.1.1.1/24".to_string()));
        assert!(graph.interfaces_of("s1").iter().all(|i| i.address.is_none()));

        let h1 = graph.node("h1").unwrap();
        assert_eq!(
            h1.default_route,
            Some(RouteTarget::Gateway("10.1.1.1".parse().unwrap()))
        );
    }

    #[test]
    fn test_duplicate_names_across_kinds() {
        let mut graph = single_subnet();
        assert_eq!(
            graph.add_host("s1", AddressPlan::none(), None),
            Err(GraphError::DuplicateName("s1".to_string()))
        );
        assert_eq!(
            graph.add_switch("r1", SwitchOptions::default()),
            Err(GraphError::DuplicateName("r1".to_string()))
        );
        assert_eq!(
            graph.add_router("h1", AddressPlan::none()),
            Err(GraphError::DuplicateName("h1".to_string()))
        );
        assert_eq!(graph.nodes().len(), 4);
    }

    #[test]
    fn test_unknown_node_and_self_link() {
        let mut graph = single_subnet();
        assert_eq!(
            graph.add_link("r1", "r9", LinkOptions::new()),
            Err(GraphError::UnknownNode("r9".to_string()))
        );
        assert_eq!(
            graph.add_link("r1", "r1", LinkOptions::new()),
            Err(GraphError::SelfLink("r1".to_string()))
        );
        // Failed calls must not consume interface indices
        let id = graph.add_link("r1", "h1", LinkOptions::new()).unwrap();
        assert_eq!(graph.link(id).unwrap().a.interface, "r1-eth1");
    }

    #[test]
    fn test_explicit_interface_conflict() {
        let mut graph = TopologyGraph::new();
        graph.add_router("r1", AddressPlan::none()).unwrap();
        graph.add_switch("s1", SwitchOptions::default()).unwrap();
        graph.add_switch("s2", SwitchOptions::default()).unwrap();

        graph
            .add_link("r1", "s1", LinkOptions::new().a_interface("r1-eth1"))
            .unwrap();
        assert_eq!(
            graph.add_link("r1", "s2", LinkOptions::new().a_interface("r1-eth1")),
            Err(GraphError::InterfaceNameConflict {
                node: "r1".to_string(),
                interface: "r1-eth1".to_string(),
            })
        );
        assert_eq!(graph.links().len(), 1);
        assert!(graph.interfaces_of("s2").is_empty());
    }

    #[test]
    fn test_generated_name_conflicts_with_explicit() {
        let mut graph = TopologyGraph::new();
        graph.add_host("h1", AddressPlan::none(), None).unwrap();
        graph.add_switch("s1", SwitchOptions::default()).unwrap();
        graph.add_switch("s2", SwitchOptions::default()).unwrap();

        // Link 0 on h1 is explicitly named h1-eth1 ...
        graph
            .add_link("h1", "s1", LinkOptions::new().a_interface("h1-eth1"))
            .unwrap();
        // ... so link 1 cannot take the generated name h1-eth1
        assert!(matches!(
            graph.add_link("h1", "s2", LinkOptions::new()),
            Err(GraphError::InterfaceNameConflict { .. })
        ));
    }

    #[test]
    fn test_link_address_overrides_plan() {
        let mut graph = TopologyGraph::new();
        let plan = AddressPlan::primary("192.32.2.8/24")
            .unwrap()
            .with_interface("r2-eth2", "10.1.2.10/24")
            .unwrap();
        graph.add_router("r1", AddressPlan::none()).unwrap();
        graph.add_router("r2", plan).unwrap();
        graph.add_switch("s2", SwitchOptions::default()).unwrap();
        graph.add_switch("s3", SwitchOptions::default()).unwrap();

        graph
            .add_link(
                "r1",
                "r2",
                LinkOptions::new()
                    .a_interface("r1-eth2")
                    .b_interface("r2-eth1")
                    .a_address("192.31.2.1/24")
                    .b_address("192.32.2.9/24"),
            )
            .unwrap();
        graph
            .add_link("r2", "s2", LinkOptions::new().a_interface("r2-eth2"))
            .unwrap();
        // The generated name for link index 2 is r2-eth2, which is taken
        assert!(graph.add_link("r2", "s3", LinkOptions::new()).is_err());
        graph
            .add_link("r2", "s3", LinkOptions::new().a_interface("r2-eth3"))
            .unwrap();

        let r2 = graph.interfaces_of("r2");
        assert_eq!(r2[0].address.unwrap().to_string(), "192.32.2.9/24");
        assert_eq!(r2[1].address.unwrap().to_string(), "10.1.2.10/24");
        assert_eq!(r2[2].name, "r2-eth3");
        assert!(r2[2].address.is_none());
    }

    #[test]
    fn test_invalid_link_address() {
        let mut graph = single_subnet();
        assert!(matches!(
            graph.add_link("r1", "h1", LinkOptions::new().a_address("10.1.1.999/24")),
            Err(GraphError::Address(AddressError::InvalidAddress { .. }))
        ));
    }

    #[test]
    fn test_invalid_default_route() {
        let mut graph = TopologyGraph::new();
        assert!(matches!(
            graph.add_host("h1", AddressPlan::none(), Some("gw 10.1.1.1")),
            Err(GraphError::Address(AddressError::InvalidRoute { .. }))
        ));
        assert!(!graph.contains("h1"));
    }

    #[test]
    fn test_cycles_are_allowed() {
        let mut graph = TopologyGraph::new();
        for s in ["s1", "s2", "s3"] {
            graph.add_switch(s, SwitchOptions::default()).unwrap();
        }
        graph.add_link("s1", "s2", LinkOptions::new()).unwrap();
        graph.add_link("s2", "s3", LinkOptions::new()).unwrap();
        graph.add_link("s3", "s1", LinkOptions::new()).unwrap();
        assert!(graph.validate().is_ok());
        assert_eq!(graph.links().len(), 3);
    }

    #[test]
    fn test_segments_follow_switches() {
        let mut graph = single_subnet();
        graph.add_host("h3", AddressPlan::none(), None).unwrap();
        graph.add_link("r1", "h3", LinkOptions::new()).unwrap();

        let segments = graph.segments();
        let seg = |node: &str, intf: &str| segments[&(node.to_string(), intf.to_string())];

        assert_eq!(seg("r1", "r1-eth0"), seg("h1", "h1-eth0"));
        assert_eq!(seg("h1", "h1-eth0"), seg("h2", "h2-eth0"));
        assert_eq!(seg("r1", "r1-eth1"), seg("h3", "h3-eth0"));
        assert_ne!(seg("r1", "r1-eth0"), seg("r1", "r1-eth1"));
    }

    #[test]
    fn test_subnet_registry_from_graph() {
        let graph = single_subnet();
        let registry = graph.subnet_registry();
        assert_eq!(registry.entries().len(), 3);
        assert!(registry.overlaps().is_empty());
    }

    #[test]
    fn test_routes_require_known_node() {
        let mut graph = single_subnet();
        graph.add_route("r1", "10.1.2.0/24", "via 10.1.1.2").unwrap();
        assert_eq!(graph.node("r1").unwrap().routes.len(), 1);
        assert_eq!(
            graph.add_route("r7", "10.1.2.0/24", "via 10.1.1.2"),
            Err(GraphError::UnknownNode("r7".to_string()))
        );
        graph.set_default_route("r1", "dev r1-eth0").unwrap();
        assert_eq!(
            graph.node("r1").unwrap().default_route,
            Some(RouteTarget::Device("r1-eth0".to_string()))
        );
    }
}
