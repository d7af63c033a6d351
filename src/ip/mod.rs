//! Address plan module.
//!
//! This module parses and validates interface addresses, default-route
//! expressions and static routes, and keeps a registry of the subnets a
//! topology applies so overlaps can be reported.

pub mod address;
pub mod registry;
pub mod route;

// Re-export commonly used types
pub use address::{parse_address, parse_network, AddressAssignment, AddressError, AddressPlan, InterfaceAddress};
pub use registry::{OverlapKind, SubnetEntry, SubnetOverlap, SubnetRegistry};
pub use route::{parse_route, parse_static_route, RouteTarget, StaticRoute};
