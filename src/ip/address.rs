//! Interface address parsing and per-node address plans.
//!
//! Parsing here is pure: nothing in this file looks at live topology state.

use ipnet::{IpNet, Ipv4Net};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// Errors raised while parsing address and route expressions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid address '{input}': {reason}")]
    InvalidAddress { input: String, reason: String },

    #[error("Invalid route '{input}': {reason}")]
    InvalidRoute { input: String, reason: String },
}

impl AddressError {
    pub(crate) fn address(input: &str, reason: impl Into<String>) -> Self {
        AddressError::InvalidAddress {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn route(input: &str, reason: impl Into<String>) -> Self {
        AddressError::InvalidRoute {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// An address bound to an interface together with its prefix length,
/// e.g. `10.1.1.1/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceAddress {
    net: IpNet,
}

impl InterfaceAddress {
    /// The host address (`10.1.1.1` for `10.1.1.1/24`).
    pub fn address(&self) -> IpAddr {
        self.net.addr()
    }

    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    /// The network this address lives in (`10.1.1.0/24` for `10.1.1.1/24`).
    pub fn network(&self) -> IpNet {
        self.net.trunc()
    }

    /// The network address (`10.1.1.0` for `10.1.1.1/24`).
    pub fn network_address(&self) -> IpAddr {
        self.net.network()
    }

    /// Whether `ip` lies inside this address's network.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.net.contains(ip)
    }

    /// Whether the networks of `self` and `other` share any address.
    pub fn overlaps(&self, other: &InterfaceAddress) -> bool {
        let (a, b) = (self.network(), other.network());
        a.contains(&b) || b.contains(&a)
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}

impl FromStr for InterfaceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_address(s)
    }
}

/// Parse an interface address expression such as `10.1.1.2/24`.
///
/// The prefix length is mandatory. Unspecified and multicast addresses
/// are rejected since they can never be assigned to an interface.
pub fn parse_address(input: &str) -> Result<InterfaceAddress, AddressError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AddressError::address(input, "empty address"));
    }
    if !trimmed.contains('/') {
        return Err(AddressError::address(input, "missing prefix length"));
    }

    let net = trimmed
        .parse::<IpNet>()
        .map_err(|e| AddressError::address(input, e.to_string()))?;

    let addr = net.addr();
    if addr.is_unspecified() {
        return Err(AddressError::address(input, "unspecified address"));
    }
    if addr.is_multicast() {
        return Err(AddressError::address(input, "multicast address"));
    }

    Ok(InterfaceAddress { net })
}

/// Parse a destination network such as `10.1.2.0/24`, or `default`.
///
/// Unlike [`parse_address`], the host bits must be zero, matching what
/// `ip route add` accepts.
pub fn parse_network(input: &str) -> Result<IpNet, AddressError> {
    let trimmed = input.trim();
    if trimmed == "default" {
        return Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0)
            .map(IpNet::V4)
            .map_err(|e| AddressError::address(input, e.to_string()));
    }
    if !trimmed.contains('/') {
        return Err(AddressError::address(input, "missing prefix length"));
    }

    let net = trimmed
        .parse::<IpNet>()
        .map_err(|e| AddressError::address(input, e.to_string()))?;

    if net.trunc() != net {
        return Err(AddressError::address(
            input,
            format!("host bits set (did you mean {}?)", net.trunc()),
        ));
    }

    Ok(net)
}

/// One address declaration on a node.
///
/// `interface: None` targets the node's default interface, which is the
/// first interface allocated to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressAssignment {
    pub interface: Option<String>,
    pub address: InterfaceAddress,
}

/// The addresses a node declares up front, before any link exists.
///
/// Link endpoints may carry their own address, which takes precedence
/// over whatever the plan says for that interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressPlan {
    assignments: Vec<AddressAssignment>,
}

impl AddressPlan {
    /// A plan with no addresses (typical for switches).
    pub fn none() -> Self {
        Self::default()
    }

    /// A plan with a single address on the node's default interface.
    pub fn primary(address: &str) -> Result<Self, AddressError> {
        Self::none().with_primary(address)
    }

    /// Set the default interface address, replacing any previous one.
    pub fn with_primary(mut self, address: &str) -> Result<Self, AddressError> {
        let address = parse_address(address)?;
        self.assignments.retain(|a| a.interface.is_some());
        self.assignments.insert(
            0,
            AddressAssignment {
                interface: None,
                address,
            },
        );
        Ok(self)
    }

    /// Declare an address on a named interface, replacing any previous one.
    pub fn with_interface(mut self, interface: &str, address: &str) -> Result<Self, AddressError> {
        let address = parse_address(address)?;
        self.assignments
            .retain(|a| a.interface.as_deref() != Some(interface));
        self.assignments.push(AddressAssignment {
            interface: Some(interface.to_string()),
            address,
        });
        Ok(self)
    }

    /// Address declared for the default interface, if any.
    pub fn primary_address(&self) -> Option<&InterfaceAddress> {
        self.assignments
            .iter()
            .find(|a| a.interface.is_none())
            .map(|a| &a.address)
    }

    /// Address declared for the named interface, if any.
    pub fn for_interface(&self, interface: &str) -> Option<&InterfaceAddress> {
        self.assignments
            .iter()
            .find(|a| a.interface.as_deref() == Some(interface))
            .map(|a| &a.address)
    }

    pub fn assignments(&self) -> &[AddressAssignment] {
        &self.assignments
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}
