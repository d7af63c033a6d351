//! Virtualization backends.
//!
//! The runtime never creates namespaces, links or bridges itself. It asks a
//! [`Virtualizer`] to, through the small set of calls below. Two backends
//! ship with the crate:
//!
//! - [`NetnsBackend`]: Linux network namespaces for hosts and routers, Open
//!   vSwitch bridges for switches, veth pairs for links.
//! - [`RecordingBackend`]: in-memory, records every call. Used for dry runs
//!   and tests.

pub mod netns;
pub mod recording;

use serde::Serialize;
use std::fmt;

use crate::controller::Controller;
use crate::topology::{FailMode, NodeKind};

pub use netns::{check_privileges, CommandRunner, NetnsBackend, Sudo};
pub use recording::{BackendCall, RecordingBackend};

/// Errors reported by a backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Command failed with exit code {code}: {command}\n{stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Unknown execution context '{0}'")]
    UnknownContext(String),

    #[error("No interface '{interface}' attached to '{context}'")]
    UnknownInterface { context: String, interface: String },

    #[error("Failed to run '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{backend} backend does not support {operation}")]
    Unsupported { backend: String, operation: String },

    #[error("Injected fault on {0}")]
    Injected(String),
}

/// Handle to an execution context created by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    pub id: u64,
    pub node: String,
    pub kind: NodeKind,
    /// Backend-specific name: a namespace, a bridge, or just the node name
    pub name: String,
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Captured result of a command run inside a context.
///
/// Output is opaque text. Only the exit code carries meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failure(exit_code: i32, stderr: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into [`BackendError::CommandFailed`].
    pub fn check(self, command: &str) -> Result<Self, BackendError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(BackendError::CommandFailed {
                command: command.to_string(),
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// The external virtualization collaborator.
///
/// Calls are made from a single control path, one phase at a time.
pub trait Virtualizer {
    /// Short backend name for logs and errors.
    fn name(&self) -> &str;

    /// Create the isolated execution context for `node`.
    fn create_context(&mut self, node: &str, kind: NodeKind) -> Result<ContextHandle, BackendError>;

    /// Destroy a context. Its links must already be detached.
    fn destroy_context(&mut self, handle: &ContextHandle) -> Result<(), BackendError>;

    /// Create a virtual link between `a_interface` in `a` and `b_interface` in `b`.
    fn attach_link(
        &mut self,
        a: &ContextHandle,
        a_interface: &str,
        b: &ContextHandle,
        b_interface: &str,
    ) -> Result<(), BackendError>;

    /// Remove a link created by [`Virtualizer::attach_link`].
    fn detach_link(
        &mut self,
        a: &ContextHandle,
        a_interface: &str,
        b: &ContextHandle,
        b_interface: &str,
    ) -> Result<(), BackendError>;

    /// Turn IP forwarding on or off inside a context.
    fn set_forwarding(&mut self, handle: &ContextHandle, enabled: bool) -> Result<(), BackendError>;

    /// Run a shell command line inside a context.
    ///
    /// A non-zero exit is reported through [`CommandOutput::exit_code`], not
    /// as an error.
    fn run_command(&mut self, handle: &ContextHandle, command_line: &str) -> Result<CommandOutput, BackendError>;

    /// Point a switch at `controllers`. An empty list with
    /// [`FailMode::Standalone`] runs the switch without a controller.
    fn bind_controllers(
        &mut self,
        handle: &ContextHandle,
        controllers: &[Controller],
        fail_mode: FailMode,
    ) -> Result<(), BackendError>;

    /// Disconnect a switch from its controllers.
    fn release_controllers(&mut self, handle: &ContextHandle) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_check() {
        assert!(CommandOutput::success("ok").check("true").is_ok());

        let err = CommandOutput::failure(2, "RTNETLINK answers: File exists\n")
            .check("ip route add default via 10.1.1.1")
            .unwrap_err();
        match err {
            BackendError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, 2);
                assert_eq!(stderr, "RTNETLINK answers: File exists");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
