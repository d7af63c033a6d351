//! Shared utilities: interface name rules and topology checks.

pub mod ifname;
pub mod validation;

pub use ifname::{is_valid_interface_name, is_valid_node_name, MAX_INTERFACE_NAME_LEN};
pub use validation::check_topology;
