//! Network topology module.
//!
//! This module contains the declared topology graph: nodes, the links
//! between them, and the interfaces each link occurrence implies.

pub mod graph;
pub mod interfaces;
pub mod types;

// Re-export key types for easier access
pub use graph::{GraphError, TopologyGraph};
pub use interfaces::{default_interface_name, InterfaceAllocator};
pub use types::{Endpoint, FailMode, Interface, Link, LinkId, LinkOptions, Node, NodeKind, SwitchOptions};
