//! Default route and static route expressions.

use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;

use super::address::{parse_network, AddressError};
use crate::utils::ifname::is_valid_interface_name;

/// Where a route sends traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteTarget {
    /// Forward to a next-hop gateway (`via 10.1.1.1`).
    Gateway(IpAddr),
    /// Send directly out of a local interface (`dev r1-eth2`).
    Device(String),
}

impl RouteTarget {
    pub fn gateway(&self) -> Option<IpAddr> {
        match self {
            RouteTarget::Gateway(ip) => Some(*ip),
            RouteTarget::Device(_) => None,
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Gateway(ip) => write!(f, "via {}", ip),
            RouteTarget::Device(dev) => write!(f, "dev {}", dev),
        }
    }
}

/// A route installed on a node in addition to its default route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRoute {
    pub destination: IpNet,
    pub target: RouteTarget,
}

impl StaticRoute {
    /// The `ip route add` command line for this route.
    pub fn command_line(&self) -> String {
        format!("ip route add {} {}", self.destination, self.target)
    }
}

impl fmt::Display for StaticRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.destination, self.target)
    }
}

/// Parse a route target expression.
///
/// Accepted forms:
/// - `via 10.1.1.1` or a bare `10.1.1.1`: gateway route
/// - `dev r1-eth2` or a bare `r1-eth2`: device route
pub fn parse_route(expression: &str) -> Result<RouteTarget, AddressError> {
    let tokens: Vec<&str> = expression.split_whitespace().collect();

    match tokens.as_slice() {
        [] => Err(AddressError::route(expression, "empty route expression")),
        ["via", gateway] => parse_gateway(expression, gateway),
        ["dev", device] => parse_device(expression, device),
        [keyword] if *keyword == "via" || *keyword == "dev" => Err(AddressError::route(
            expression,
            format!("'{}' needs an argument", keyword),
        )),
        [single] => {
            if let Ok(ip) = single.parse::<IpAddr>() {
                check_gateway(expression, ip)
            } else {
                parse_device(expression, single)
            }
        }
        [keyword, ..] if *keyword == "via" || *keyword == "dev" => Err(AddressError::route(
            expression,
            format!("'{}' takes exactly one argument", keyword),
        )),
        _ => Err(AddressError::route(
            expression,
            "expected 'via <gateway>' or 'dev <interface>'",
        )),
    }
}

/// Parse a static route from a destination and a target expression.
pub fn parse_static_route(destination: &str, target: &str) -> Result<StaticRoute, AddressError> {
    Ok(StaticRoute {
        destination: parse_network(destination)?,
        target: parse_route(target)?,
    })
}

fn parse_gateway(expression: &str, gateway: &str) -> Result<RouteTarget, AddressError> {
    let ip = gateway
        .parse::<IpAddr>()
        .map_err(|_| AddressError::route(expression, format!("'{}' is not an IP address", gateway)))?;
    check_gateway(expression, ip)
}

fn check_gateway(expression: &str, ip: IpAddr) -> Result<RouteTarget, AddressError> {
    if ip.is_unspecified() || ip.is_multicast() {
        return Err(AddressError::route(
            expression,
            format!("{} cannot be used as a gateway", ip),
        ));
    }
    Ok(RouteTarget::Gateway(ip))
}

fn parse_device(expression: &str, device: &str) -> Result<RouteTarget, AddressError> {
    if !is_valid_interface_name(device) {
        return Err(AddressError::route(
            expression,
            format!("'{}' is not a valid interface name", device),
        ));
    }
    Ok(RouteTarget::Device(device.to_string()))
}
