//! Topology consistency checks.
//!
//! These never fail a build. Each finding is returned as a message that
//! the runtime logs as a warning, since overlapping or half-configured
//! setups are legitimate test scenarios.

use crate::topology::{Node, TopologyGraph};

/// Run every check and collect the findings, in node declaration order.
pub fn check_topology(graph: &TopologyGraph) -> Vec<String> {
    let mut findings = Vec::new();
    for node in graph.nodes() {
        findings.extend(check_gateway_reachable(graph, node));
        findings.extend(check_unapplied_addresses(graph, node));
        findings.extend(check_isolated(graph, node));
    }
    findings
}

/// Warn when a node's default gateway sits outside every prefix the
/// node has on its own interfaces.
///
/// # Examples
/// ```
/// use topolab::ip::AddressPlan;
/// use topolab::topology::{LinkOptions, SwitchOptions, TopologyGraph};
/// use topolab::utils::validation::check_gateway_reachable;
///
/// let mut graph = TopologyGraph::new();
/// graph.add_switch("s1", SwitchOptions::default()).unwrap();
/// graph
///     .add_host("h1", AddressPlan::primary("10.1.1.2/24").unwrap(), Some("via 10.9.9.1"))
///     .unwrap();
/// graph.add_link("h1", "s1", LinkOptions::new()).unwrap();
///
/// let h1 = graph.node("h1").unwrap();
/// assert!(check_gateway_reachable(&graph, h1).is_some());
/// ```
pub fn check_gateway_reachable(graph: &TopologyGraph, node: &Node) -> Option<String> {
    let gateway = node.default_route.as_ref()?.gateway()?;

    let reachable = graph
        .interfaces_of(&node.name)
        .iter()
        .filter_map(|i| i.address)
        .any(|address| address.contains(&gateway));

    if reachable {
        None
    } else {
        Some(format!(
            "Default gateway {} of '{}' is not on any of its subnets",
            gateway, node.name
        ))
    }
}

/// Warn about plan entries that no interface picked up: a named
/// interface that no link created, or a primary address on a node whose
/// first interface got its address elsewhere.
pub fn check_unapplied_addresses(graph: &TopologyGraph, node: &Node) -> Vec<String> {
    let interfaces = graph.interfaces_of(&node.name);
    let mut findings = Vec::new();

    for assignment in node.addresses.assignments() {
        let applied = match &assignment.interface {
            Some(name) => interfaces
                .iter()
                .any(|i| i.name == *name && i.address == Some(assignment.address)),
            None => interfaces
                .iter()
                .any(|i| i.address == Some(assignment.address)),
        };

        if !applied {
            let target = assignment.interface.as_deref().unwrap_or("default interface");
            findings.push(format!(
                "Address {} declared for '{}' ({}) is never applied",
                assignment.address, node.name, target
            ));
        }
    }

    findings
}

/// Warn about nodes that no link touches.
pub fn check_isolated(graph: &TopologyGraph, node: &Node) -> Option<String> {
    if graph.interfaces_of(&node.name).is_empty() {
        Some(format!("{} '{}' has no links", node.kind, node.name))
    } else {
        None
    }
}
