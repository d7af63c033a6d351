//! Per-node lifecycle state machine.
//!
//! Every node goes `Declared -> Configuring -> Running -> Terminating ->
//! Terminated`. What happens on each edge depends on the node kind and is
//! looked up in a static hook table rather than spread over node types:
//!
//! | kind   | on configure   | on terminating     | on terminated   |
//! |--------|----------------|--------------------|-----------------|
//! | host   | -              | -                  | -               |
//! | switch | -              | release controllers| -               |
//! | router | forwarding on  | -                  | forwarding off  |
//!
//! The state moves before the hook runs, so a node whose hook failed is
//! left in the state it was moving to and can still be torn down.

use log::debug;
use std::fmt;

use crate::backend::{BackendError, ContextHandle, Virtualizer};
use crate::controller::Controller;
use crate::topology::{FailMode, Interface, Node, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Declared,
    Configuring,
    Running,
    Terminating,
    Terminated,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeState::Declared => "declared",
            NodeState::Configuring => "configuring",
            NodeState::Running => "running",
            NodeState::Terminating => "terminating",
            NodeState::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

impl NodeState {
    /// Edges the state machine accepts.
    ///
    /// Besides the main path, a node that failed while configuring may go
    /// straight to `Terminating`, and a node that was never configured
    /// may be retired directly.
    pub fn can_transition(self, to: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, to),
            (Declared, Configuring)
                | (Configuring, Running)
                | (Configuring, Terminating)
                | (Running, Terminating)
                | (Terminating, Terminated)
                | (Declared, Terminated)
                | (Terminated, Declared)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleTransitionError {
    #[error("Node '{node}' cannot go from {from} to {to}")]
    InvalidTransition {
        node: String,
        from: NodeState,
        to: NodeState,
    },

    #[error("Node '{node}': {operation} failed: {source}")]
    Collaborator {
        node: String,
        operation: String,
        #[source]
        source: BackendError,
    },
}

impl LifecycleTransitionError {
    pub fn collaborator(node: &str, operation: &str, source: BackendError) -> Self {
        LifecycleTransitionError::Collaborator {
            node: node.to_string(),
            operation: operation.to_string(),
            source,
        }
    }

    /// Node the failure belongs to.
    pub fn node(&self) -> &str {
        match self {
            LifecycleTransitionError::InvalidTransition { node, .. }
            | LifecycleTransitionError::Collaborator { node, .. } => node,
        }
    }
}

type Hook = fn(&mut NodeLifecycle, &mut dyn Virtualizer, &ContextHandle) -> Result<(), BackendError>;

/// Side effects attached to the lifecycle edges of one node kind.
struct LifecycleHooks {
    on_configure: Option<Hook>,
    on_terminating: Option<Hook>,
    on_terminated: Option<Hook>,
}

static HOST_HOOKS: LifecycleHooks = LifecycleHooks {
    on_configure: None,
    on_terminating: None,
    on_terminated: None,
};

static SWITCH_HOOKS: LifecycleHooks = LifecycleHooks {
    on_configure: None,
    on_terminating: Some(release_controllers),
    on_terminated: None,
};

static ROUTER_HOOKS: LifecycleHooks = LifecycleHooks {
    on_configure: Some(enable_forwarding),
    on_terminating: None,
    on_terminated: Some(disable_forwarding),
};

fn hooks_for(kind: NodeKind) -> &'static LifecycleHooks {
    match kind {
        NodeKind::Host => &HOST_HOOKS,
        NodeKind::Switch(_) => &SWITCH_HOOKS,
        NodeKind::Router => &ROUTER_HOOKS,
    }
}

fn enable_forwarding(
    node: &mut NodeLifecycle,
    backend: &mut dyn Virtualizer,
    handle: &ContextHandle,
) -> Result<(), BackendError> {
    backend.set_forwarding(handle, true)?;
    node.forwarding = true;
    Ok(())
}

fn disable_forwarding(
    node: &mut NodeLifecycle,
    backend: &mut dyn Virtualizer,
    handle: &ContextHandle,
) -> Result<(), BackendError> {
    if !node.forwarding {
        return Ok(());
    }
    backend.set_forwarding(handle, false)?;
    node.forwarding = false;
    Ok(())
}

fn release_controllers(
    node: &mut NodeLifecycle,
    backend: &mut dyn Virtualizer,
    handle: &ContextHandle,
) -> Result<(), BackendError> {
    if node.controllers.is_none() {
        return Ok(());
    }
    backend.release_controllers(handle)?;
    node.controllers = None;
    Ok(())
}

/// Commands that bring a node's interfaces and routes up, in order:
/// addresses and link state per interface, then the default route, then
/// static routes.
pub fn setup_commands(node: &Node, interfaces: &[Interface]) -> Vec<String> {
    let mut commands = Vec::new();

    for interface in interfaces {
        if let Some(address) = &interface.address {
            commands.push(format!("ip addr add {} dev {}", address, interface.name));
        }
        commands.push(format!("ip link set {} up", interface.name));
    }

    if let Some(target) = &node.default_route {
        commands.push(format!("ip route add default {}", target));
    }

    commands.extend(node.routes.iter().map(|r| r.command_line()));
    commands
}

/// Lifecycle of one node.
#[derive(Debug, Clone)]
pub struct NodeLifecycle {
    name: String,
    kind: NodeKind,
    state: NodeState,
    forwarding: bool,
    controllers: Option<Vec<String>>,
}

impl NodeLifecycle {
    pub fn new(name: &str, kind: NodeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            state: NodeState::Declared,
            forwarding: false,
            controllers: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn forwarding_enabled(&self) -> bool {
        self.forwarding
    }

    /// Controllers the switch is currently bound to, by id.
    pub fn bound_controllers(&self) -> Option<&[String]> {
        self.controllers.as_deref()
    }

    fn advance(&mut self, to: NodeState) -> Result<(), LifecycleTransitionError> {
        if !self.state.can_transition(to) {
            return Err(LifecycleTransitionError::InvalidTransition {
                node: self.name.clone(),
                from: self.state,
                to,
            });
        }
        debug!("{} '{}': {} -> {}", self.kind, self.name, self.state, to);
        self.state = to;
        Ok(())
    }

    fn run_hook(
        &mut self,
        hook: Option<Hook>,
        operation: &str,
        backend: &mut dyn Virtualizer,
        handle: &ContextHandle,
    ) -> Result<(), LifecycleTransitionError> {
        match hook {
            Some(hook) => hook(self, backend, handle)
                .map_err(|e| LifecycleTransitionError::collaborator(&self.name, operation, e)),
            None => Ok(()),
        }
    }

    /// `Declared -> Configuring`. Routers get forwarding enabled here.
    pub fn configure(
        &mut self,
        backend: &mut dyn Virtualizer,
        handle: &ContextHandle,
    ) -> Result<(), LifecycleTransitionError> {
        self.advance(NodeState::Configuring)?;
        let hook = hooks_for(self.kind).on_configure;
        self.run_hook(hook, "enable forwarding", backend, handle)
    }

    /// `Configuring -> Running`. Runs `commands` in order and fails on
    /// the first non-zero exit.
    pub fn run(
        &mut self,
        backend: &mut dyn Virtualizer,
        handle: &ContextHandle,
        commands: &[String],
    ) -> Result<(), LifecycleTransitionError> {
        self.advance(NodeState::Running)?;
        for command in commands {
            backend
                .run_command(handle, command)
                .and_then(|output| output.check(command))
                .map_err(|e| LifecycleTransitionError::collaborator(&self.name, "configure interfaces", e))?;
        }
        Ok(())
    }

    /// Bind a running switch to `controllers`.
    pub fn bind_controllers(
        &mut self,
        backend: &mut dyn Virtualizer,
        handle: &ContextHandle,
        controllers: &[Controller],
        fail_mode: FailMode,
    ) -> Result<(), LifecycleTransitionError> {
        if self.state != NodeState::Running || !self.kind.is_switch() {
            return Err(LifecycleTransitionError::InvalidTransition {
                node: self.name.clone(),
                from: self.state,
                to: NodeState::Running,
            });
        }
        backend
            .bind_controllers(handle, controllers, fail_mode)
            .map_err(|e| LifecycleTransitionError::collaborator(&self.name, "bind controllers", e))?;
        self.controllers = Some(controllers.iter().map(|c| c.name.clone()).collect());
        Ok(())
    }

    /// `Running -> Terminating` (or `Configuring -> Terminating` after a
    /// failed start). Switches release their controllers here.
    pub fn terminate(
        &mut self,
        backend: &mut dyn Virtualizer,
        handle: &ContextHandle,
    ) -> Result<(), LifecycleTransitionError> {
        self.advance(NodeState::Terminating)?;
        let hook = hooks_for(self.kind).on_terminating;
        self.run_hook(hook, "release controllers", backend, handle)
    }

    /// `Terminating -> Terminated`. Routers get forwarding disabled here,
    /// while their context still exists.
    pub fn finish(
        &mut self,
        backend: &mut dyn Virtualizer,
        handle: &ContextHandle,
    ) -> Result<(), LifecycleTransitionError> {
        self.advance(NodeState::Terminated)?;
        let hook = hooks_for(self.kind).on_terminated;
        self.run_hook(hook, "disable forwarding", backend, handle)
    }

    /// `Declared -> Terminated` for a node that never got configured.
    pub fn retire(&mut self) -> Result<(), LifecycleTransitionError> {
        self.advance(NodeState::Terminated)
    }

    /// `Terminated -> Declared`, ready for another start.
    pub fn reset(&mut self) -> Result<(), LifecycleTransitionError> {
        self.advance(NodeState::Declared)?;
        self.forwarding = false;
        self.controllers = None;
        Ok(())
    }
}
