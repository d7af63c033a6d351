//! Switch to controller assignment.
//!
//! A `ControllerAssignment` is built once per topology and passed to the
//! runtime. It knows the declared controllers, which one is the default,
//! which switches override the default and which run without a controller.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Port OpenFlow controllers listen on unless told otherwise.
pub const DEFAULT_CONTROLLER_PORT: u16 = 6653;

/// Name of the implicit controller every topology gets by default.
pub const DEFAULT_CONTROLLER_NAME: &str = "c0";

/// Errors raised while binding or resolving controllers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerBindingError {
    #[error("Switch '{0}' requires a controller but none resolves")]
    NoController(String),

    #[error("Switch '{switch}' is bound to unknown controller '{controller}'")]
    UnknownController { switch: String, controller: String },

    #[error("Empty controller list for switch '{0}'")]
    EmptyBinding(String),

    #[error("Duplicate controller name '{0}'")]
    DuplicateController(String),
}

/// An external control-plane endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Controller {
    pub name: String,
    pub ip: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_CONTROLLER_PORT
}

impl Controller {
    pub fn new(name: &str, ip: IpAddr, port: u16) -> Self {
        Self {
            name: name.to_string(),
            ip,
            port,
        }
    }

    /// A controller on the loopback address and the default port.
    pub fn local(name: &str) -> Self {
        Self::new(name, IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_CONTROLLER_PORT)
    }

    /// Connection target in `ovs-vsctl set-controller` syntax.
    pub fn target(&self) -> String {
        match self.ip {
            IpAddr::V4(ip) => format!("tcp:{}:{}", ip, self.port),
            IpAddr::V6(ip) => format!("tcp:[{}]:{}", ip, self.port),
        }
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.target())
    }
}

/// Maps each switch to the controllers it binds to at start time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerAssignment {
    controllers: Vec<Controller>,
    default: Option<String>,
    overrides: BTreeMap<String, Vec<String>>,
    standalone: BTreeSet<String>,
}

impl Default for ControllerAssignment {
    /// One implicit local controller `c0`, used by every switch.
    fn default() -> Self {
        Self {
            controllers: vec![Controller::local(DEFAULT_CONTROLLER_NAME)],
            default: Some(DEFAULT_CONTROLLER_NAME.to_string()),
            overrides: BTreeMap::new(),
            standalone: BTreeSet::new(),
        }
    }
}

impl ControllerAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// An assignment with no controllers at all.
    pub fn without_default() -> Self {
        Self {
            controllers: Vec::new(),
            default: None,
            overrides: BTreeMap::new(),
            standalone: BTreeSet::new(),
        }
    }

    /// Declare a controller. The first one declared becomes the default.
    pub fn add_controller(&mut self, controller: Controller) -> Result<(), ControllerBindingError> {
        if self.controller(&controller.name).is_some() {
            return Err(ControllerBindingError::DuplicateController(controller.name));
        }
        if self.default.is_none() {
            self.default = Some(controller.name.clone());
        }
        self.controllers.push(controller);
        Ok(())
    }

    /// Record an override for `switch`. A later call replaces an earlier one.
    ///
    /// Duplicate ids are dropped, keeping the first occurrence.
    pub fn bind<S: AsRef<str>>(&mut self, switch: &str, ids: &[S]) -> Result<(), ControllerBindingError> {
        if ids.is_empty() {
            return Err(ControllerBindingError::EmptyBinding(switch.to_string()));
        }

        let mut ordered: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.as_ref();
            if !ordered.iter().any(|existing| existing == id) {
                ordered.push(id.to_string());
            }
        }

        self.overrides.insert(switch.to_string(), ordered);
        Ok(())
    }

    /// Mark `switch` as able to run without a controller.
    pub fn mark_standalone(&mut self, switch: &str) {
        self.standalone.insert(switch.to_string());
    }

    pub fn is_standalone(&self, switch: &str) -> bool {
        self.standalone.contains(switch)
    }

    /// Effective ordered controller ids for `switch`.
    ///
    /// An override wins. Without one, a standalone switch gets nothing and
    /// any other switch gets the default controller, if there is one.
    pub fn resolve(&self, switch: &str) -> Vec<String> {
        if let Some(ids) = self.overrides.get(switch) {
            return ids.clone();
        }
        if self.standalone.contains(switch) {
            return Vec::new();
        }
        self.default.iter().cloned().collect()
    }

    /// Resolve `switch` to controller definitions.
    ///
    /// Fails if an id is undeclared, or if a switch that needs a controller
    /// resolves to none.
    pub fn resolve_controllers(&self, switch: &str) -> Result<Vec<Controller>, ControllerBindingError> {
        let ids = self.resolve(switch);
        if ids.is_empty() && !self.standalone.contains(switch) {
            return Err(ControllerBindingError::NoController(switch.to_string()));
        }

        ids.iter()
            .map(|id| {
                self.controller(id)
                    .cloned()
                    .ok_or_else(|| ControllerBindingError::UnknownController {
                        switch: switch.to_string(),
                        controller: id.clone(),
                    })
            })
            .collect()
    }

    /// Check every override against the declared controllers.
    pub fn check_overrides(&self) -> Result<(), ControllerBindingError> {
        for (switch, ids) in &self.overrides {
            if let Some(missing) = ids.iter().find(|id| self.controller(id).is_none()) {
                return Err(ControllerBindingError::UnknownController {
                    switch: switch.clone(),
                    controller: missing.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn controller(&self, name: &str) -> Option<&Controller> {
        self.controllers.iter().find(|c| c.name == name)
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn default_controller(&self) -> Option<&Controller> {
        self.default.as_deref().and_then(|name| self.controller(name))
    }

    /// Switches with an explicit override.
    pub fn overridden(&self) -> impl Iterator<Item = &str> {
        self.overrides.keys().map(String::as_str)
    }
}
