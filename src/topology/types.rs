//! Topology type definitions.
//!
//! Nodes, links and the interfaces derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ip::{AddressPlan, InterfaceAddress, RouteTarget, StaticRoute};

/// What a switch does when no controller is reachable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Drop traffic until a controller installs flows. Needs a controller.
    #[default]
    Secure,
    /// Behave as a learning L2 switch. Runs with or without a controller.
    Standalone,
}

impl fmt::Display for FailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailMode::Secure => write!(f, "secure"),
            FailMode::Standalone => write!(f, "standalone"),
        }
    }
}

/// Options accepted by `add_switch`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SwitchOptions {
    pub fail_mode: FailMode,
}

impl SwitchOptions {
    /// A switch that runs without any controller.
    pub fn standalone() -> Self {
        Self {
            fail_mode: FailMode::Standalone,
        }
    }

    pub fn is_standalone(&self) -> bool {
        self.fail_mode == FailMode::Standalone
    }
}

/// Node kind, carrying the per-kind options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Host,
    Switch(SwitchOptions),
    Router,
}

impl NodeKind {
    pub fn is_switch(&self) -> bool {
        matches!(self, NodeKind::Switch(_))
    }

    pub fn is_router(&self) -> bool {
        matches!(self, NodeKind::Router)
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Host => "host",
            NodeKind::Switch(_) => "switch",
            NodeKind::Router => "router",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A declared topology participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub addresses: AddressPlan,
    pub default_route: Option<RouteTarget>,
    pub routes: Vec<StaticRoute>,
}

impl Node {
    pub(crate) fn new(name: &str, kind: NodeKind, addresses: AddressPlan) -> Self {
        Self {
            name: name.to_string(),
            kind,
            addresses,
            default_route: None,
            routes: Vec::new(),
        }
    }
}

/// Index of a link in declaration order.
pub type LinkId = usize;

/// One side of a link after interface allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub node: String,
    pub interface: String,
    /// Effective address: the endpoint override, else the node's plan
    pub address: Option<InterfaceAddress>,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.interface)
    }
}

/// An undirected connection between two node endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub id: LinkId,
    pub a: Endpoint,
    pub b: Endpoint,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.a, self.b)
    }
}

/// Optional per-endpoint settings for `add_link`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOptions {
    pub a_interface: Option<String>,
    pub b_interface: Option<String>,
    pub a_address: Option<String>,
    pub b_address: Option<String>,
}

impl LinkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn a_interface(mut self, name: &str) -> Self {
        self.a_interface = Some(name.to_string());
        self
    }

    pub fn b_interface(mut self, name: &str) -> Self {
        self.b_interface = Some(name.to_string());
        self
    }

    pub fn a_address(mut self, address: &str) -> Self {
        self.a_address = Some(address.to_string());
        self
    }

    pub fn b_address(mut self, address: &str) -> Self {
        self.b_address = Some(address.to_string());
        self
    }
}

/// An interface derived from a node-link occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub node: String,
    pub name: String,
    /// 0-based position among the links touching this node
    pub index: usize,
    pub address: Option<InterfaceAddress>,
    pub link: LinkId,
    /// The endpoint on the other side of the link
    pub peer: Endpoint,
}
