use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::controller::Controller;
use crate::topology::FailMode;

/// Log levels accepted in `general.log_level`
const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

/// Top-level topology description that mirrors the YAML file
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    /// Controllers, first one is the default. Absent means one implicit
    /// local controller, an empty list means none at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controllers: Option<Vec<Controller>>,
    /// Per-switch controller overrides
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub controller_map: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    #[serde(default)]
    pub switches: Vec<SwitchConfig>,
    #[serde(default)]
    pub routers: Vec<RouterConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    /// Static routes installed while nodes are configured
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
    /// Commands run once the topology is up
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<CommandConfig>,
}

/// General settings
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    /// Log level (default: info)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// How long to keep the topology up before stopping (e.g. "30s")
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub hold: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub name: String,
    /// Address of the default interface, e.g. `10.1.1.2/24`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// `via <gateway>` or `dev <interface>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_route: Option<String>,
    /// Addresses for named interfaces
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub addresses: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchConfig {
    pub name: String,
    #[serde(default)]
    pub fail_mode: FailMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_route: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub addresses: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    pub a: String,
    pub b: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a_intf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b_intf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub node: String,
    /// Destination prefix, or `default`
    pub to: String,
    /// `<gateway>`, `via <gateway>` or `dev <interface>`
    pub via: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    pub node: String,
    pub run: String,
}

impl Config {
    /// Validate the configuration
    ///
    /// Only schema-level checks happen here. Names, addresses and links
    /// are checked when the description is replayed into a graph.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(level) = &self.general.log_level {
            if !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
                return Err(ValidationError::InvalidGeneral(format!(
                    "unknown log_level '{}' (expected one of {})",
                    level,
                    LOG_LEVELS.join(", ")
                )));
            }
        }

        let node_names = self
            .hosts
            .iter()
            .map(|h| &h.name)
            .chain(self.switches.iter().map(|s| &s.name))
            .chain(self.routers.iter().map(|r| &r.name));
        for name in node_names {
            if name.trim().is_empty() {
                return Err(ValidationError::InvalidNode("node name cannot be empty".to_string()));
            }
        }

        if let Some(controllers) = &self.controllers {
            for controller in controllers {
                if controller.name.trim().is_empty() {
                    return Err(ValidationError::InvalidController(
                        "controller name cannot be empty".to_string(),
                    ));
                }
                if controller.port == 0 {
                    return Err(ValidationError::InvalidController(format!(
                        "controller '{}' has port 0",
                        controller.name
                    )));
                }
            }
        }

        for (switch, ids) in &self.controller_map {
            if ids.is_empty() {
                return Err(ValidationError::InvalidController(format!(
                    "controller_map entry for '{}' is empty",
                    switch
                )));
            }
        }

        for (i, link) in self.links.iter().enumerate() {
            if link.a.trim().is_empty() || link.b.trim().is_empty() {
                return Err(ValidationError::InvalidLink(format!(
                    "link #{} needs both endpoints",
                    i
                )));
            }
        }

        for route in &self.routes {
            if route.node.trim().is_empty() || route.to.trim().is_empty() || route.via.trim().is_empty() {
                return Err(ValidationError::InvalidRoute(format!(
                    "route on '{}' needs node, to and via",
                    route.node
                )));
            }
        }

        for command in &self.commands {
            if command.run.trim().is_empty() {
                return Err(ValidationError::InvalidCommand(format!(
                    "empty command for node '{}'",
                    command.node
                )));
            }
        }

        Ok(())
    }

    /// Total number of declared nodes
    pub fn node_count(&self) -> usize {
        self.hosts.len() + self.switches.len() + self.routers.len()
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid general configuration: {0}")]
    InvalidGeneral(String),
    #[error("Invalid node configuration: {0}")]
    InvalidNode(String),
    #[error("Invalid controller configuration: {0}")]
    InvalidController(String),
    #[error("Invalid link configuration: {0}")]
    InvalidLink(String),
    #[error("Invalid route configuration: {0}")]
    InvalidRoute(String),
    #[error("Invalid command configuration: {0}")]
    InvalidCommand(String),
}
