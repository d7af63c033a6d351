//! Interface name allocation.
//!
//! Every link occurrence on a node consumes the next index for that node,
//! whether or not the caller supplied an explicit name. With no explicit
//! name the interface is called `<node>-eth<index>`, so the first link on
//! `r1` yields `r1-eth0`, the second `r1-eth1`, and so on.

use std::collections::{BTreeSet, HashMap};

use super::graph::GraphError;
use crate::utils::ifname::is_valid_interface_name;

/// Default interface name for the `index`-th link on `node`.
pub fn default_interface_name(node: &str, index: usize) -> String {
    format!("{}-eth{}", node, index)
}

/// Result of planning an interface for one link endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub name: String,
    pub index: usize,
}

#[derive(Debug, Default)]
struct NodePorts {
    links: usize,
    names: BTreeSet<String>,
}

/// Per-node interface bookkeeping.
#[derive(Debug, Default)]
pub struct InterfaceAllocator {
    ports: HashMap<String, NodePorts>,
}

impl InterfaceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan the next interface on `node` without recording it.
    ///
    /// Fails if the resulting name is already taken on that node, no
    /// matter whether the earlier name was generated or explicit.
    pub fn plan(&self, node: &str, explicit: Option<&str>) -> Result<Allocation, GraphError> {
        let (links, taken) = match self.ports.get(node) {
            Some(ports) => (ports.links, Some(&ports.names)),
            None => (0, None),
        };

        let name = match explicit {
            Some(name) => name.to_string(),
            None => default_interface_name(node, links),
        };

        if !is_valid_interface_name(&name) {
            return Err(GraphError::InvalidInterfaceName {
                node: node.to_string(),
                interface: name,
            });
        }

        if taken.is_some_and(|names| names.contains(&name)) {
            return Err(GraphError::InterfaceNameConflict {
                node: node.to_string(),
                interface: name,
            });
        }

        Ok(Allocation {
            name,
            index: links,
        })
    }

    /// Record a planned allocation.
    pub fn commit(&mut self, node: &str, allocation: &Allocation) {
        let ports = self.ports.entry(node.to_string()).or_default();
        ports.links += 1;
        ports.names.insert(allocation.name.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_default_names() {
        let mut alloc = InterfaceAllocator::new();
        for (index, expected) in ["s1-eth0", "s1-eth1", "s1-eth2"].into_iter().enumerate() {
            let planned = alloc.plan("s1", None).unwrap();
            assert_eq!(planned.name, expected);
            assert_eq!(planned.index, index);
            alloc.commit("s1", &planned);
        }
        assert_eq!(alloc.plan("s2", None).unwrap().index, 0);
    }

    #[test]
    fn test_explicit_names_consume_an_index() {
        let mut alloc = InterfaceAllocator::new();
        let explicit = alloc.plan("r1", Some("r1-eth1")).unwrap();
        assert_eq!(explicit.index, 0);
        alloc.commit("r1", &explicit);

        // The second link gets index 1, whose default name is already taken
        assert!(matches!(
            alloc.plan("r1", None),
            Err(GraphError::InterfaceNameConflict { .. })
        ));

        let next = alloc.plan("r1", Some("r1-eth2")).unwrap();
        assert_eq!(next.index, 1);
    }

    #[test]
    fn test_plan_does_not_record() {
        let alloc = InterfaceAllocator::new();
        let first = alloc.plan("h1", None).unwrap();
        assert_eq!(alloc.plan("h1", None).unwrap(), first);
    }

    #[test]
    fn test_generated_name_length_limit() {
        let alloc = InterfaceAllocator::new();
        assert!(matches!(
            alloc.plan("a-very-long-node", None),
            Err(GraphError::InvalidInterfaceName { .. })
        ));
    }
}
