//! In-memory backend that records every call.
//!
//! Nothing is created on the host. Contexts and links are tracked only so
//! that misuse (using a destroyed context, detaching a link that was never
//! attached) is reported the same way a real backend would report it.

use log::debug;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::{BackendError, CommandOutput, ContextHandle, Virtualizer};
use crate::controller::Controller;
use crate::topology::{FailMode, NodeKind};

/// One successful backend call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BackendCall {
    CreateContext {
        node: String,
        kind: String,
    },
    DestroyContext {
        node: String,
    },
    AttachLink {
        a: String,
        a_interface: String,
        b: String,
        b_interface: String,
    },
    DetachLink {
        a: String,
        a_interface: String,
        b: String,
        b_interface: String,
    },
    SetForwarding {
        node: String,
        enabled: bool,
    },
    RunCommand {
        node: String,
        command: String,
    },
    BindControllers {
        node: String,
        controllers: Vec<String>,
        fail_mode: FailMode,
    },
    ReleaseControllers {
        node: String,
    },
}

impl BackendCall {
    /// Node the call acts on (the `a` side for link calls).
    pub fn node(&self) -> &str {
        match self {
            BackendCall::CreateContext { node, .. }
            | BackendCall::DestroyContext { node }
            | BackendCall::SetForwarding { node, .. }
            | BackendCall::RunCommand { node, .. }
            | BackendCall::BindControllers { node, .. }
            | BackendCall::ReleaseControllers { node } => node,
            BackendCall::AttachLink { a, .. } | BackendCall::DetachLink { a, .. } => a,
        }
    }

    /// Whether the call touches `node` on either side.
    pub fn involves(&self, node: &str) -> bool {
        match self {
            BackendCall::AttachLink { a, b, .. } | BackendCall::DetachLink { a, b, .. } => a == node || b == node,
            other => other.node() == node,
        }
    }

    pub fn is_attach(&self) -> bool {
        matches!(self, BackendCall::AttachLink { .. })
    }

    pub fn is_detach(&self) -> bool {
        matches!(self, BackendCall::DetachLink { .. })
    }
}

impl fmt::Display for BackendCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendCall::CreateContext { node, kind } => write!(f, "create {} {}", kind, node),
            BackendCall::DestroyContext { node } => write!(f, "destroy {}", node),
            BackendCall::AttachLink {
                a,
                a_interface,
                b,
                b_interface,
            } => write!(f, "attach {}:{} <-> {}:{}", a, a_interface, b, b_interface),
            BackendCall::DetachLink {
                a,
                a_interface,
                b,
                b_interface,
            } => write!(f, "detach {}:{} <-> {}:{}", a, a_interface, b, b_interface),
            BackendCall::SetForwarding { node, enabled } => {
                write!(f, "forwarding {} {}", node, if *enabled { "on" } else { "off" })
            }
            BackendCall::RunCommand { node, command } => write!(f, "{}> {}", node, command),
            BackendCall::BindControllers {
                node,
                controllers,
                fail_mode,
            } => {
                if controllers.is_empty() {
                    write!(f, "bind {} (no controller, fail-mode {})", node, fail_mode)
                } else {
                    write!(f, "bind {} -> {} (fail-mode {})", node, controllers.join(","), fail_mode)
                }
            }
            BackendCall::ReleaseControllers { node } => write!(f, "release {}", node),
        }
    }
}

type CallPredicate = Box<dyn Fn(&BackendCall) -> bool>;

/// A scheduled failure: the `skip`-th matching call (0-based) fails.
struct Fault {
    matches: CallPredicate,
    skip: usize,
}

/// Backend that records calls instead of performing them.
#[derive(Default)]
pub struct RecordingBackend {
    calls: Vec<BackendCall>,
    next_id: u64,
    live: HashMap<u64, String>,
    links: BTreeSet<(String, String, String, String)>,
    responses: Vec<(String, CommandOutput)>,
    faults: Vec<Fault>,
}

impl fmt::Debug for RecordingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingBackend")
            .field("calls", &self.calls.len())
            .field("live", &self.live.len())
            .field("links", &self.links.len())
            .field("faults", &self.faults.len())
            .finish()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls that succeeded, in order.
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    /// Drain the recorded calls.
    pub fn take_calls(&mut self) -> Vec<BackendCall> {
        std::mem::take(&mut self.calls)
    }

    /// Position of the first recorded call matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&BackendCall) -> bool) -> Option<usize> {
        self.calls.iter().position(predicate)
    }

    /// Number of contexts that currently exist.
    pub fn live_contexts(&self) -> usize {
        self.live.len()
    }

    /// Number of links that are currently attached.
    pub fn live_links(&self) -> usize {
        self.links.len()
    }

    /// Fail the first call matching `predicate`.
    pub fn fail_on(&mut self, predicate: impl Fn(&BackendCall) -> bool + 'static) {
        self.fail_nth(0, predicate);
    }

    /// Fail the `n`-th (0-based) call matching `predicate`.
    pub fn fail_nth(&mut self, n: usize, predicate: impl Fn(&BackendCall) -> bool + 'static) {
        self.faults.push(Fault {
            matches: Box::new(predicate),
            skip: n,
        });
    }

    /// Answer commands containing `pattern` with `output`.
    ///
    /// Commands that match no pattern succeed with empty output.
    pub fn respond(&mut self, pattern: &str, output: CommandOutput) {
        self.responses.push((pattern.to_string(), output));
    }

    fn check_live(&self, handle: &ContextHandle) -> Result<(), BackendError> {
        match self.live.get(&handle.id) {
            Some(node) if *node == handle.node => Ok(()),
            _ => Err(BackendError::UnknownContext(handle.to_string())),
        }
    }

    /// Record `call` unless a fault fires for it.
    fn record(&mut self, call: BackendCall) -> Result<(), BackendError> {
        let mut fired = None;
        for (i, fault) in self.faults.iter_mut().enumerate() {
            if (fault.matches)(&call) {
                if fault.skip == 0 {
                    fired = Some(i);
                    break;
                }
                fault.skip -= 1;
            }
        }

        if let Some(i) = fired {
            self.faults.remove(i);
            debug!("recording: injected fault on '{}'", call);
            return Err(BackendError::Injected(call.to_string()));
        }

        debug!("recording: {}", call);
        self.calls.push(call);
        Ok(())
    }
}

fn link_key(a: &ContextHandle, a_interface: &str, b: &ContextHandle, b_interface: &str) -> (String, String, String, String) {
    (
        a.node.clone(),
        a_interface.to_string(),
        b.node.clone(),
        b_interface.to_string(),
    )
}

impl Virtualizer for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn create_context(&mut self, node: &str, kind: NodeKind) -> Result<ContextHandle, BackendError> {
        if self.live.values().any(|n| n == node) {
            return Err(BackendError::CommandFailed {
                command: format!("create {}", node),
                code: 1,
                stderr: format!("context for '{}' already exists", node),
            });
        }

        self.record(BackendCall::CreateContext {
            node: node.to_string(),
            kind: kind.label().to_string(),
        })?;

        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, node.to_string());

        Ok(ContextHandle {
            id,
            node: node.to_string(),
            kind,
            name: node.to_string(),
        })
    }

    fn destroy_context(&mut self, handle: &ContextHandle) -> Result<(), BackendError> {
        self.check_live(handle)?;
        self.record(BackendCall::DestroyContext {
            node: handle.node.clone(),
        })?;
        self.live.remove(&handle.id);
        Ok(())
    }

    fn attach_link(
        &mut self,
        a: &ContextHandle,
        a_interface: &str,
        b: &ContextHandle,
        b_interface: &str,
    ) -> Result<(), BackendError> {
        self.check_live(a)?;
        self.check_live(b)?;
        self.record(BackendCall::AttachLink {
            a: a.node.clone(),
            a_interface: a_interface.to_string(),
            b: b.node.clone(),
            b_interface: b_interface.to_string(),
        })?;
        self.links.insert(link_key(a, a_interface, b, b_interface));
        Ok(())
    }

    fn detach_link(
        &mut self,
        a: &ContextHandle,
        a_interface: &str,
        b: &ContextHandle,
        b_interface: &str,
    ) -> Result<(), BackendError> {
        self.check_live(a)?;
        self.check_live(b)?;
        let key = link_key(a, a_interface, b, b_interface);
        if !self.links.contains(&key) {
            return Err(BackendError::CommandFailed {
                command: format!("detach {}:{}", a.node, a_interface),
                code: 1,
                stderr: "link is not attached".to_string(),
            });
        }
        self.record(BackendCall::DetachLink {
            a: a.node.clone(),
            a_interface: a_interface.to_string(),
            b: b.node.clone(),
            b_interface: b_interface.to_string(),
        })?;
        self.links.remove(&key);
        Ok(())
    }

    fn set_forwarding(&mut self, handle: &ContextHandle, enabled: bool) -> Result<(), BackendError> {
        self.check_live(handle)?;
        self.record(BackendCall::SetForwarding {
            node: handle.node.clone(),
            enabled,
        })
    }

    fn run_command(&mut self, handle: &ContextHandle, command_line: &str) -> Result<CommandOutput, BackendError> {
        self.check_live(handle)?;
        self.record(BackendCall::RunCommand {
            node: handle.node.clone(),
            command: command_line.to_string(),
        })?;

        Ok(self
            .responses
            .iter()
            .find(|(pattern, _)| command_line.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    fn bind_controllers(
        &mut self,
        handle: &ContextHandle,
        controllers: &[Controller],
        fail_mode: FailMode,
    ) -> Result<(), BackendError> {
        self.check_live(handle)?;
        self.record(BackendCall::BindControllers {
            node: handle.node.clone(),
            controllers: controllers.iter().map(|c| c.name.clone()).collect(),
            fail_mode,
        })
    }

    fn release_controllers(&mut self, handle: &ContextHandle) -> Result<(), BackendError> {
        self.check_live(handle)?;
        self.record(BackendCall::ReleaseControllers {
            node: handle.node.clone(),
        })
    }
}
