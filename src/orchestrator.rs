//! Topology runtime orchestrator.
//!
//! This module drives a validated `TopologyGraph` from declaration to a
//! running topology and back, one phase at a time, delegating every
//! namespace, link and controller operation to a `Virtualizer`.
//!
//! start:
//! 1. create a context per node (declaration order)
//! 2. `Declared -> Configuring` per node (routers: forwarding on)
//! 3. attach every link (declaration order)
//! 4. `Configuring -> Running` per node (addresses, default route, static routes)
//! 5. resolve and bind controllers per switch
//!
//! stop walks the same phases backwards: `Running -> Terminating` (switches
//! release controllers), detach links, `Terminating -> Terminated` (routers:
//! forwarding off), destroy contexts.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;

use crate::backend::{BackendError, CommandOutput, ContextHandle, Virtualizer};
use crate::controller::{ControllerAssignment, ControllerBindingError};
use crate::ip::SubnetOverlap;
use crate::lifecycle::{setup_commands, LifecycleTransitionError, NodeLifecycle, NodeState};
use crate::topology::{FailMode, GraphError, LinkId, NodeKind, TopologyGraph};
use crate::utils::validation::check_topology;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Controller(#[from] ControllerBindingError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleTransitionError),

    #[error("Command on '{node}' failed: {source}")]
    Command {
        node: String,
        #[source]
        source: BackendError,
    },

    #[error("Topology is not running")]
    NotRunning,

    #[error("Teardown finished with {} failure(s): {}", .0.len(), join_errors(.0))]
    Teardown(Vec<RuntimeError>),
}

fn join_errors(errors: &[RuntimeError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Aggregate state of the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Validated, never started
    Built,
    Running,
    Terminated,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeState::Built => write!(f, "built"),
            RuntimeState::Running => write!(f, "running"),
            RuntimeState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Knobs for [`TopologyRuntime::build_with_options`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Treat overlapping subnets on different segments as a build error
    pub strict_subnets: bool,
}

/// A command to run on a node once the topology is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioCommand {
    pub node: String,
    pub command: String,
}

impl ScenarioCommand {
    pub fn new(node: &str, command: &str) -> Self {
        Self {
            node: node.to_string(),
            command: command.to_string(),
        }
    }
}

/// Outcome of one scenario command.
#[derive(Debug, Clone)]
pub struct CommandReport {
    pub node: String,
    pub command: String,
    pub output: CommandOutput,
}

#[derive(Debug)]
struct NodeSlot {
    lifecycle: NodeLifecycle,
    context: Option<ContextHandle>,
}

/// Owns one topology for the length of a run.
pub struct TopologyRuntime<B: Virtualizer> {
    graph: TopologyGraph,
    assignment: ControllerAssignment,
    backend: B,
    /// Parallel to `graph.nodes()`
    slots: Vec<NodeSlot>,
    positions: HashMap<String, usize>,
    /// Links attached so far, in attach order
    attached: Vec<LinkId>,
    state: RuntimeState,
    overlaps: Vec<SubnetOverlap>,
    warnings: Vec<String>,
}

impl<B: Virtualizer> TopologyRuntime<B> {
    /// Validate `graph` and take ownership of it.
    pub fn build(graph: TopologyGraph, assignment: ControllerAssignment, backend: B) -> Result<Self, RuntimeError> {
        Self::build_with_options(graph, assignment, backend, RuntimeOptions::default())
    }

    pub fn build_with_options(
        graph: TopologyGraph,
        mut assignment: ControllerAssignment,
        backend: B,
        options: RuntimeOptions,
    ) -> Result<Self, RuntimeError> {
        graph.validate()?;

        let overridden: Vec<String> = assignment.overridden().map(str::to_string).collect();
        for name in overridden {
            if !graph.node(&name).is_some_and(|n| n.kind.is_switch()) {
                return Err(GraphError::UnknownNode(name).into());
            }
        }
        assignment.check_overrides()?;

        for node in graph.nodes() {
            if let NodeKind::Switch(opts) = node.kind {
                if opts.is_standalone() {
                    assignment.mark_standalone(&node.name);
                }
            }
        }

        let overlaps = graph.subnet_registry().overlaps();
        if let Some(first) = overlaps.first() {
            if options.strict_subnets {
                return Err(GraphError::SubnetOverlap(first.to_string()).into());
            }
            for overlap in &overlaps {
                warn!("Subnet overlap: {}", overlap);
            }
        }

        let warnings = check_topology(&graph);
        for warning in &warnings {
            warn!("{}", warning);
        }

        let mut slots = Vec::with_capacity(graph.nodes().len());
        let mut positions = HashMap::new();
        for (i, node) in graph.nodes().iter().enumerate() {
            positions.insert(node.name.clone(), i);
            slots.push(NodeSlot {
                lifecycle: NodeLifecycle::new(&node.name, node.kind),
                context: None,
            });
        }

        info!(
            "Built topology: {} nodes, {} links, backend {}",
            graph.nodes().len(),
            graph.links().len(),
            backend.name()
        );

        Ok(Self {
            graph,
            assignment,
            backend,
            slots,
            positions,
            attached: Vec::new(),
            state: RuntimeState::Built,
            overlaps,
            warnings,
        })
    }

    /// Bring the topology up. A no-op while already running.
    ///
    /// On failure everything already set up is torn down, best effort,
    /// and the original error is returned.
    pub fn start(&mut self) -> Result<(), RuntimeError> {
        if self.state == RuntimeState::Running {
            debug!("start: already running");
            return Ok(());
        }

        if self.state == RuntimeState::Terminated {
            for slot in &mut self.slots {
                slot.lifecycle.reset()?;
            }
        }

        info!("Starting topology");
        if let Err(e) = self.bring_up() {
            warn!("Start failed, rolling back: {}", e);
            for failure in self.tear_down() {
                warn!("Rollback: {}", failure);
            }
            self.state = RuntimeState::Terminated;
            return Err(e);
        }

        self.state = RuntimeState::Running;
        info!("Topology running");
        Ok(())
    }

    /// Tear the topology down. A no-op unless running.
    ///
    /// Every step is attempted even if earlier ones fail. All failures are
    /// reported together.
    pub fn stop(&mut self) -> Result<(), RuntimeError> {
        if self.state != RuntimeState::Running {
            debug!("stop: topology is {}, nothing to do", self.state);
            return Ok(());
        }

        info!("Stopping topology");
        let failures = self.tear_down();
        self.state = RuntimeState::Terminated;

        if failures.is_empty() {
            info!("Topology stopped");
            Ok(())
        } else {
            for failure in &failures {
                warn!("Teardown: {}", failure);
            }
            Err(RuntimeError::Teardown(failures))
        }
    }

    /// Run `command_line` on a running node.
    pub fn cmd(&mut self, node: &str, command_line: &str) -> Result<CommandOutput, RuntimeError> {
        let slot = self
            .positions
            .get(node)
            .and_then(|&i| self.slots.get(i))
            .ok_or_else(|| GraphError::UnknownNode(node.to_string()))?;
        if self.state != RuntimeState::Running {
            return Err(RuntimeError::NotRunning);
        }
        let handle = slot.context.as_ref().ok_or(RuntimeError::NotRunning)?;

        debug!("{}> {}", node, command_line);
        self.backend
            .run_command(handle, command_line)
            .map_err(|source| RuntimeError::Command {
                node: node.to_string(),
                source,
            })
    }

    /// Run scenario commands in order. A non-zero exit is reported, not fatal.
    pub fn run_commands(&mut self, commands: &[ScenarioCommand]) -> Result<Vec<CommandReport>, RuntimeError> {
        let mut reports = Vec::with_capacity(commands.len());
        for command in commands {
            let output = self.cmd(&command.node, &command.command)?;
            if output.is_success() {
                info!("{}> {}", command.node, command.command);
            } else {
                warn!(
                    "{}> {} exited with {}: {}",
                    command.node,
                    command.command,
                    output.exit_code,
                    output.stderr.trim()
                );
            }
            for line in output.stdout.lines() {
                debug!("{}: {}", command.node, line);
            }
            reports.push(CommandReport {
                node: command.node.clone(),
                command: command.command.clone(),
                output,
            });
        }
        Ok(reports)
    }

    fn bring_up(&mut self) -> Result<(), RuntimeError> {
        // Contexts
        for slot in &mut self.slots {
            let name = slot.lifecycle.name().to_string();
            let handle = self
                .backend
                .create_context(&name, slot.lifecycle.kind())
                .map_err(|e| LifecycleTransitionError::collaborator(&name, "create context", e))?;
            debug!("Created context {} for '{}'", handle, name);
            slot.context = Some(handle);
        }

        // Declared -> Configuring
        for slot in &mut self.slots {
            let handle = require_context(&slot.context, slot.lifecycle.name())?;
            slot.lifecycle.configure(&mut self.backend, handle)?;
        }

        // Links
        for link in self.graph.links() {
            let a = context_for(&self.slots, &self.positions, &link.a.node)?;
            let b = context_for(&self.slots, &self.positions, &link.b.node)?;
            self.backend
                .attach_link(a, &link.a.interface, b, &link.b.interface)
                .map_err(|e| LifecycleTransitionError::collaborator(&link.a.node, "attach link", e))?;
            debug!("Attached link {}", link);
            self.attached.push(link.id);
        }
        info!("Attached {} links", self.attached.len());

        // Configuring -> Running
        for (node, slot) in self.graph.nodes().iter().zip(self.slots.iter_mut()) {
            let commands = setup_commands(node, self.graph.interfaces_of(&node.name));
            let handle = require_context(&slot.context, &node.name)?;
            slot.lifecycle.run(&mut self.backend, handle, &commands)?;
        }

        // Controllers
        for (node, slot) in self.graph.nodes().iter().zip(self.slots.iter_mut()) {
            let NodeKind::Switch(options) = node.kind else {
                continue;
            };
            let controllers = self.assignment.resolve_controllers(&node.name)?;
            let fail_mode = if controllers.is_empty() {
                FailMode::Standalone
            } else {
                options.fail_mode
            };
            let handle = require_context(&slot.context, &node.name)?;
            slot.lifecycle
                .bind_controllers(&mut self.backend, handle, &controllers, fail_mode)?;
            info!(
                "Switch '{}' bound to [{}] (fail-mode {})",
                node.name,
                controllers.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", "),
                fail_mode
            );
        }

        Ok(())
    }

    /// Undo whatever is set up, in reverse order, collecting failures.
    fn tear_down(&mut self) -> Vec<RuntimeError> {
        let mut failures = Vec::new();

        // Running/Configuring -> Terminating
        for slot in self.slots.iter_mut().rev() {
            let state = slot.lifecycle.state();
            if state != NodeState::Running && state != NodeState::Configuring {
                continue;
            }
            if let Some(handle) = slot.context.as_ref() {
                if let Err(e) = slot.lifecycle.terminate(&mut self.backend, handle) {
                    failures.push(e.into());
                }
            }
        }

        // Links
        while let Some(id) = self.attached.pop() {
            let Some(link) = self.graph.link(id) else {
                continue;
            };
            let a = self.positions.get(&link.a.node).and_then(|&i| self.slots.get(i));
            let b = self.positions.get(&link.b.node).and_then(|&i| self.slots.get(i));
            let (Some(a), Some(b)) = (
                a.and_then(|s| s.context.as_ref()),
                b.and_then(|s| s.context.as_ref()),
            ) else {
                continue;
            };
            match self.backend.detach_link(a, &link.a.interface, b, &link.b.interface) {
                Ok(()) => debug!("Detached link {}", link),
                Err(e) => failures.push(LifecycleTransitionError::collaborator(&link.a.node, "detach link", e).into()),
            }
        }

        // Terminating -> Terminated
        for slot in self.slots.iter_mut().rev() {
            let result = match (slot.lifecycle.state(), slot.context.as_ref()) {
                (NodeState::Terminating, Some(handle)) => slot.lifecycle.finish(&mut self.backend, handle),
                (NodeState::Declared, _) => slot.lifecycle.retire(),
                _ => Ok(()),
            };
            if let Err(e) = result {
                failures.push(e.into());
            }
        }

        // Contexts
        for slot in self.slots.iter_mut().rev() {
            if let Some(handle) = slot.context.take() {
                match self.backend.destroy_context(&handle) {
                    Ok(()) => debug!("Destroyed context {}", handle),
                    Err(e) => failures.push(
                        LifecycleTransitionError::collaborator(&handle.node, "destroy context", e).into(),
                    ),
                }
            }
        }

        failures
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn graph(&self) -> &TopologyGraph {
        &self.graph
    }

    pub fn assignment(&self) -> &ControllerAssignment {
        &self.assignment
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Overlaps found at build time.
    pub fn overlaps(&self) -> &[SubnetOverlap] {
        &self.overlaps
    }

    /// Non-fatal findings from the build-time topology checks.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn slot(&self, node: &str) -> Option<&NodeSlot> {
        self.positions.get(node).and_then(|&i| self.slots.get(i))
    }

    pub fn node_state(&self, node: &str) -> Option<NodeState> {
        self.slot(node).map(|s| s.lifecycle.state())
    }

    pub fn forwarding_enabled(&self, node: &str) -> Option<bool> {
        self.slot(node).map(|s| s.lifecycle.forwarding_enabled())
    }

    /// Controllers a switch is bound to, by id. `None` when not bound.
    pub fn bound_controllers(&self, node: &str) -> Option<&[String]> {
        self.slot(node).and_then(|s| s.lifecycle.bound_controllers())
    }
}

fn require_context<'a>(context: &'a Option<ContextHandle>, node: &str) -> Result<&'a ContextHandle, RuntimeError> {
    context.as_ref().ok_or_else(|| {
        LifecycleTransitionError::collaborator(node, "look up context", BackendError::UnknownContext(node.to_string()))
            .into()
    })
}

fn context_for<'a>(
    slots: &'a [NodeSlot],
    positions: &HashMap<String, usize>,
    node: &str,
) -> Result<&'a ContextHandle, RuntimeError> {
    let slot = positions
        .get(node)
        .and_then(|&i| slots.get(i))
        .ok_or_else(|| GraphError::UnknownNode(node.to_string()))?;
    require_context(&slot.context, node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, RecordingBackend};
    use crate::controller::Controller;
    use crate::ip::AddressPlan;
    use crate::topology::{LinkOptions, SwitchOptions};

    fn single_subnet() -> TopologyGraph {
        let mut graph = TopologyGraph::new();
        graph
            .add_router("r1", AddressPlan::primary("10.1.1.1/24").unwrap())
            .unwrap();
        graph.add_switch("s1", SwitchOptions::default()).unwrap();
        graph
            .add_host("h1", AddressPlan::primary("10.1.1.2/24").unwrap(), Some("via 10.1.1.1"))
            .unwrap();
        graph
            .add_host("h2", AddressPlan::primary("10.1.1.3/24").unwrap(), Some("via 10.1.1.1"))
            .unwrap();
        graph.add_link("r1", "s1", LinkOptions::new()).unwrap();
        graph.add_link("h1", "s1", LinkOptions::new()).unwrap();
        graph.add_link("h2", "s1", LinkOptions::new()).unwrap();
        graph
    }

    fn runtime(graph: TopologyGraph) -> TopologyRuntime<RecordingBackend> {
        TopologyRuntime::build(graph, ControllerAssignment::new(), RecordingBackend::new()).unwrap()
    }

    #[test]
    fn test_start_and_stop() {
        let mut rt = runtime(single_subnet());
        rt.start().unwrap();
        assert_eq!(rt.state(), RuntimeState::Running);
        assert_eq!(rt.forwarding_enabled("r1"), Some(true));
        assert_eq!(rt.bound_controllers("s1"), Some(&["c0".to_string()][..]));
        assert_eq!(rt.node_state("h2"), Some(NodeState::Running));

        rt.stop().unwrap();
        assert_eq!(rt.state(), RuntimeState::Terminated);
        assert_eq!(rt.forwarding_enabled("r1"), Some(false));
        assert_eq!(rt.node_state("s1"), Some(NodeState::Terminated));
        assert_eq!(rt.backend().live_contexts(), 0);
        assert_eq!(rt.backend().live_links(), 0);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut rt = runtime(single_subnet());
        rt.start().unwrap();
        let calls = rt.backend().calls().len();
        rt.start().unwrap();
        assert_eq!(rt.backend().calls().len(), calls);
    }

    #[test]
    fn test_stop_before_start() {
        let mut rt = runtime(single_subnet());
        rt.stop().unwrap();
        assert!(rt.backend().calls().is_empty());
        assert_eq!(rt.state(), RuntimeState::Built);
    }

    #[test]
    fn test_restart_after_stop() {
        let mut rt = runtime(single_subnet());
        rt.start().unwrap();
        rt.stop().unwrap();
        rt.start().unwrap();
        assert_eq!(rt.forwarding_enabled("r1"), Some(true));
        assert_eq!(rt.backend().live_contexts(), 4);
        rt.stop().unwrap();
    }

    #[test]
    fn test_attach_failure_rolls_back() {
        let mut backend = RecordingBackend::new();
        backend.fail_nth(1, BackendCall::is_attach);
        let mut rt = TopologyRuntime::build(single_subnet(), ControllerAssignment::new(), backend).unwrap();

        let err = rt.start().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Lifecycle(LifecycleTransitionError::Collaborator { ref operation, .. })
                if operation == "attach link"
        ));
        assert_eq!(rt.state(), RuntimeState::Terminated);
        assert_eq!(rt.backend().live_contexts(), 0);
        assert_eq!(rt.backend().live_links(), 0);
        assert_eq!(rt.forwarding_enabled("r1"), Some(false));

        // The one attached link was detached before contexts went away
        let calls = rt.backend().calls();
        let detach = rt.backend().position(BackendCall::is_detach).unwrap();
        let first_destroy = rt
            .backend()
            .position(|c| matches!(c, BackendCall::DestroyContext { .. }))
            .unwrap();
        assert!(detach < first_destroy);
        assert_eq!(calls.iter().filter(|c| c.is_detach()).count(), 1);

        // A failed start leaves nothing for stop to do
        let before = calls.len();
        rt.stop().unwrap();
        assert_eq!(rt.backend().calls().len(), before);
    }

    #[test]
    fn test_missing_controller_fails_start() {
        let mut rt = TopologyRuntime::build(
            single_subnet(),
            ControllerAssignment::without_default(),
            RecordingBackend::new(),
        )
        .unwrap();
        assert!(matches!(
            rt.start(),
            Err(RuntimeError::Controller(ControllerBindingError::NoController(ref s))) if s == "s1"
        ));
        assert_eq!(rt.backend().live_contexts(), 0);
    }

    #[test]
    fn test_standalone_switch_without_controllers() {
        let mut graph = TopologyGraph::new();
        graph.add_switch("s1", SwitchOptions::standalone()).unwrap();
        graph.add_host("h1", AddressPlan::primary("10.0.0.1/24").unwrap(), None).unwrap();
        graph.add_link("h1", "s1", LinkOptions::new()).unwrap();

        let mut rt = TopologyRuntime::build(graph, ControllerAssignment::without_default(), RecordingBackend::new())
            .unwrap();
        rt.start().unwrap();
        assert_eq!(rt.bound_controllers("s1"), Some(&[][..]));
        assert!(rt.backend().calls().iter().any(|c| matches!(
            c,
            BackendCall::BindControllers { fail_mode: FailMode::Standalone, controllers, .. } if controllers.is_empty()
        )));
    }

    #[test]
    fn test_override_for_unknown_switch() {
        let mut assignment = ControllerAssignment::new();
        assignment.bind("s9", &["c0"]).unwrap();
        assert!(matches!(
            TopologyRuntime::build(single_subnet(), assignment, RecordingBackend::new()),
            Err(RuntimeError::Graph(GraphError::UnknownNode(ref n))) if n == "s9"
        ));

        let mut assignment = ControllerAssignment::new();
        assignment.bind("s1", &["c7"]).unwrap();
        assert!(matches!(
            TopologyRuntime::build(single_subnet(), assignment, RecordingBackend::new()),
            Err(RuntimeError::Controller(ControllerBindingError::UnknownController { .. }))
        ));
    }

    #[test]
    fn test_controller_split() {
        let mut assignment = ControllerAssignment::new();
        assignment
            .add_controller(Controller::new("c1", "127.0.0.1".parse().unwrap(), 6654))
            .unwrap();
        assignment.bind("s1", &["c1"]).unwrap();

        let mut rt = TopologyRuntime::build(single_subnet(), assignment, RecordingBackend::new()).unwrap();
        rt.start().unwrap();
        assert_eq!(rt.bound_controllers("s1"), Some(&["c1".to_string()][..]));
    }

    #[test]
    fn test_strict_subnets() {
        let mut graph = single_subnet();
        graph
            .add_host("h9", AddressPlan::primary("10.1.1.77/16").unwrap(), None)
            .unwrap();
        graph.add_router("r2", AddressPlan::none()).unwrap();
        graph.add_link("h9", "r2", LinkOptions::new()).unwrap();

        let lenient = TopologyRuntime::build(graph, ControllerAssignment::new(), RecordingBackend::new()).unwrap();
        assert_eq!(lenient.overlaps().len(), 3);

        let mut graph = single_subnet();
        graph
            .add_host("h9", AddressPlan::primary("10.1.1.77/16").unwrap(), None)
            .unwrap();
        graph.add_router("r2", AddressPlan::none()).unwrap();
        graph.add_link("h9", "r2", LinkOptions::new()).unwrap();
        let strict = TopologyRuntime::build_with_options(
            graph,
            ControllerAssignment::new(),
            RecordingBackend::new(),
            RuntimeOptions { strict_subnets: true },
        );
        assert!(matches!(strict, Err(RuntimeError::Graph(GraphError::SubnetOverlap(_)))));
    }

    #[test]
    fn test_cmd() {
        let mut rt = runtime(single_subnet());
        assert!(matches!(rt.cmd("h1", "ping -c1 10.1.1.3"), Err(RuntimeError::NotRunning)));
        rt.start().unwrap();
        assert!(rt.cmd("h1", "ping -c1 10.1.1.3").unwrap().is_success());
        assert!(matches!(
            rt.cmd("h7", "true"),
            Err(RuntimeError::Graph(GraphError::UnknownNode(_)))
        ));
        rt.stop().unwrap();
        assert!(matches!(rt.cmd("h1", "true"), Err(RuntimeError::NotRunning)));
    }

    #[test]
    fn test_run_commands_reports_failures() {
        let mut rt = runtime(single_subnet());
        rt.backend_mut()
            .respond("rp_filter", CommandOutput::failure(255, "permission denied"));
        rt.start().unwrap();

        let reports = rt
            .run_commands(&[
                ScenarioCommand::new("h2", "sysctl -w net.ipv4.conf.all.rp_filter=0"),
                ScenarioCommand::new("r1", "ip route"),
            ])
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].output.exit_code, 255);
        assert!(reports[1].output.is_success());
        assert_eq!(rt.state(), RuntimeState::Running);
    }

    #[test]
    fn test_teardown_collects_failures() {
        let mut rt = runtime(single_subnet());
        rt.start().unwrap();
        rt.backend_mut().fail_on(BackendCall::is_detach);
        rt.backend_mut()
            .fail_on(|c| matches!(c, BackendCall::DestroyContext { node } if node == "h1"));

        match rt.stop() {
            Err(RuntimeError::Teardown(failures)) => assert_eq!(failures.len(), 2),
            other => panic!("expected teardown failures, got {:?}", other),
        }
        assert_eq!(rt.state(), RuntimeState::Terminated);
        // Everything else was still released
        assert_eq!(rt.backend().live_contexts(), 1);
        assert_eq!(rt.backend().live_links(), 1);

        let calls = rt.backend().calls().len();
        rt.stop().unwrap();
        assert_eq!(rt.backend().calls().len(), calls);
    }
}
