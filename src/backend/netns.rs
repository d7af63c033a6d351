//! Linux backend: network namespaces, veth pairs and Open vSwitch bridges.
//!
//! Hosts and routers each get a namespace named `tl<run>-<node>`. Their link
//! ends are created directly inside that namespace under the interface name
//! the topology chose. Switches are OVS bridges in the root namespace; the
//! bridge and its port devices get run-scoped names (`tl<run>b<id>`,
//! `tl<run>p<n>`) and the port carries the topology's interface name as its
//! link alias. Nothing outside `tl<run>` is ever created or deleted.
//! Every command goes through a [`CommandRunner`], by default `sudo`.

use log::{debug, warn};
use std::collections::HashMap;
use std::process::Command;

use super::{BackendError, CommandOutput, ContextHandle, Virtualizer};
use crate::controller::Controller;
use crate::topology::{FailMode, NodeKind};

/// Returns `true` if namespaces can be managed here
/// (requires `ip` and passwordless `sudo`).
pub fn check_privileges() -> bool {
    let has_ip = Command::new("ip")
        .arg("netns")
        .output()
        .is_ok_and(|o| o.status.success());

    has_ip
        && Command::new("sudo")
            .args(["-n", "ip", "netns", "list"])
            .output()
            .is_ok_and(|o| o.status.success())
}

/// Runs privileged commands for [`NetnsBackend`].
pub trait CommandRunner {
    /// Run `args` and capture the result. A non-zero exit is not an error.
    fn run(&mut self, args: &[&str]) -> Result<CommandOutput, BackendError>;
}

/// Runs every command as `sudo <args>`.
#[derive(Debug, Default)]
pub struct Sudo;

impl CommandRunner for Sudo {
    fn run(&mut self, args: &[&str]) -> Result<CommandOutput, BackendError> {
        debug!("sudo {}", args.join(" "));
        let output = Command::new("sudo")
            .args(args)
            .output()
            .map_err(|source| BackendError::Io {
                command: format!("sudo {}", args.join(" ")),
                source,
            })?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // Killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Where a context lives.
#[derive(Debug, Clone)]
enum Placement {
    Namespace(String),
    Bridge(String),
}

#[derive(Debug)]
pub struct NetnsBackend<R: CommandRunner = Sudo> {
    run_id: String,
    runner: R,
    next_id: u64,
    next_port: u64,
    contexts: HashMap<u64, Placement>,
    /// (switch context id, interface name) -> root namespace port device
    ports: HashMap<(u64, String), String>,
}

impl NetnsBackend {
    /// A backend with a random run id, so concurrent runs do not collide.
    pub fn new() -> Self {
        Self::with_run_id(&format!("{:04x}", rand::random::<u16>()))
    }

    pub fn with_run_id(run_id: &str) -> Self {
        Self::with_runner(run_id, Sudo)
    }
}

impl Default for NetnsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> NetnsBackend<R> {
    pub fn with_runner(run_id: &str, runner: R) -> Self {
        Self {
            run_id: run_id.to_string(),
            runner,
            next_id: 0,
            next_port: 0,
            contexts: HashMap::new(),
            ports: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Namespace name for a host or router.
    pub fn namespace_name(&self, node: &str) -> String {
        format!("tl{}-{}", self.run_id, node)
    }

    /// Bridge name for the switch context `id`. At most 15 characters for
    /// any node name.
    pub fn bridge_name(&self, id: u64) -> String {
        format!("tl{}b{}", self.run_id, id)
    }

    fn port_name(&mut self) -> String {
        let name = format!("tl{}p{}", self.run_id, self.next_port);
        self.next_port += 1;
        name
    }

    fn exec(&mut self, args: &[&str]) -> Result<(), BackendError> {
        self.runner
            .run(args)?
            .check(&format!("sudo {}", args.join(" ")))
            .map(|_| ())
    }

    fn placement(&self, handle: &ContextHandle) -> Result<Placement, BackendError> {
        self.contexts
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| BackendError::UnknownContext(handle.to_string()))
    }

    /// Device backing `interface` of an attached link.
    fn device_of(&self, handle: &ContextHandle, placement: &Placement, interface: &str) -> Result<String, BackendError> {
        match placement {
            Placement::Namespace(_) => Ok(interface.to_string()),
            Placement::Bridge(_) => self
                .ports
                .get(&(handle.id, interface.to_string()))
                .cloned()
                .ok_or_else(|| BackendError::UnknownInterface {
                    context: handle.to_string(),
                    interface: interface.to_string(),
                }),
        }
    }

    /// Add a fresh switch-side veth end to its bridge.
    fn enslave(&mut self, bridge: &str, device: &str, interface: &str) -> Result<(), BackendError> {
        self.exec(&["ovs-vsctl", "add-port", bridge, device])?;
        self.exec(&["ip", "link", "set", "dev", device, "alias", interface])?;
        self.exec(&["ip", "link", "set", "dev", device, "up"])
    }

    /// Delete a veth pair through one of its ends.
    fn delete_pair(&mut self, placement: &Placement, device: &str) -> Result<(), BackendError> {
        match placement {
            Placement::Namespace(ns) => self.exec(&["ip", "netns", "exec", ns, "ip", "link", "del", "dev", device]),
            Placement::Bridge(bridge) => {
                self.exec(&["ovs-vsctl", "--if-exists", "del-port", bridge, device])?;
                self.exec(&["ip", "link", "del", "dev", device])
            }
        }
    }

    /// Best-effort removal of a pair whose attach failed half way.
    fn discard_pair(&mut self, a: (&Placement, &str), b: (&Placement, &str)) {
        if let Placement::Bridge(bridge) = b.0 {
            if let Err(e) = self.exec(&["ovs-vsctl", "--if-exists", "del-port", bridge, b.1]) {
                warn!("netns: could not remove port {} from {}: {}", b.1, bridge, e);
            }
        }
        if let Err(e) = self.delete_pair(a.0, a.1) {
            warn!("netns: could not delete veth {}: {}", a.1, e);
        }
    }
}

impl<R: CommandRunner> Virtualizer for NetnsBackend<R> {
    fn name(&self) -> &str {
        "netns"
    }

    fn create_context(&mut self, node: &str, kind: NodeKind) -> Result<ContextHandle, BackendError> {
        let id = self.next_id;
        let placement = match kind {
            NodeKind::Switch(_) => {
                let bridge = self.bridge_name(id);
                self.exec(&["ovs-vsctl", "add-br", &bridge])?;
                self.exec(&["ip", "link", "set", "dev", &bridge, "up"])?;
                Placement::Bridge(bridge)
            }
            NodeKind::Host | NodeKind::Router => {
                let ns = self.namespace_name(node);
                self.exec(&["ip", "netns", "add", &ns])?;
                self.exec(&["ip", "netns", "exec", &ns, "ip", "link", "set", "lo", "up"])?;
                Placement::Namespace(ns)
            }
        };

        let name = match &placement {
            Placement::Namespace(name) | Placement::Bridge(name) => name.clone(),
        };
        debug!("netns: created {} context '{}' for '{}'", kind, name, node);

        self.next_id += 1;
        self.contexts.insert(id, placement);

        Ok(ContextHandle {
            id,
            node: node.to_string(),
            kind,
            name,
        })
    }

    fn destroy_context(&mut self, handle: &ContextHandle) -> Result<(), BackendError> {
        match self.placement(handle)? {
            Placement::Namespace(ns) => self.exec(&["ip", "netns", "del", &ns])?,
            Placement::Bridge(bridge) => self.exec(&["ovs-vsctl", "--if-exists", "del-br", &bridge])?,
        }
        self.contexts.remove(&handle.id);
        self.ports.retain(|(id, _), _| *id != handle.id);
        debug!("netns: destroyed context '{}'", handle.name);
        Ok(())
    }

    fn attach_link(
        &mut self,
        a: &ContextHandle,
        a_interface: &str,
        b: &ContextHandle,
        b_interface: &str,
    ) -> Result<(), BackendError> {
        let a_place = self.placement(a)?;
        let b_place = self.placement(b)?;

        let a_device = match a_place {
            Placement::Namespace(_) => a_interface.to_string(),
            Placement::Bridge(_) => self.port_name(),
        };
        let b_device = match b_place {
            Placement::Namespace(_) => b_interface.to_string(),
            Placement::Bridge(_) => self.port_name(),
        };

        // Each end is born in its own namespace
        let mut args = vec!["ip", "link", "add", a_device.as_str()];
        if let Placement::Namespace(ns) = &a_place {
            args.extend(["netns", ns.as_str()]);
        }
        args.extend(["type", "veth", "peer", "name", b_device.as_str()]);
        if let Placement::Namespace(ns) = &b_place {
            args.extend(["netns", ns.as_str()]);
        }
        self.exec(&args)?;

        let mut placed = Ok(());
        for (place, device, interface) in [(&a_place, &a_device, a_interface), (&b_place, &b_device, b_interface)] {
            if let Placement::Bridge(bridge) = place {
                placed = self.enslave(bridge, device, interface);
                if placed.is_err() {
                    break;
                }
            }
        }
        if let Err(e) = placed {
            self.discard_pair((&a_place, a_device.as_str()), (&b_place, b_device.as_str()));
            return Err(e);
        }

        if matches!(a_place, Placement::Bridge(_)) {
            self.ports.insert((a.id, a_interface.to_string()), a_device);
        }
        if matches!(b_place, Placement::Bridge(_)) {
            self.ports.insert((b.id, b_interface.to_string()), b_device);
        }

        debug!(
            "netns: attached {}:{} <-> {}:{}",
            a.node, a_interface, b.node, b_interface
        );
        Ok(())
    }

    fn detach_link(
        &mut self,
        a: &ContextHandle,
        a_interface: &str,
        b: &ContextHandle,
        b_interface: &str,
    ) -> Result<(), BackendError> {
        let a_place = self.placement(a)?;
        let b_place = self.placement(b)?;
        let a_device = self.device_of(a, &a_place, a_interface)?;
        let b_device = self.device_of(b, &b_place, b_interface)?;

        // Deleting one end of a veth pair removes the other
        self.delete_pair(&a_place, &a_device)?;
        self.ports.remove(&(a.id, a_interface.to_string()));
        if let Placement::Bridge(bridge) = &b_place {
            if let Err(e) = self.exec(&["ovs-vsctl", "--if-exists", "del-port", bridge, &b_device]) {
                warn!("netns: could not remove port {} from {}: {}", b_device, bridge, e);
            }
            self.ports.remove(&(b.id, b_interface.to_string()));
        }

        debug!(
            "netns: detached {}:{} <-> {}:{}",
            a.node, a_interface, b.node, b_interface
        );
        Ok(())
    }

    fn set_forwarding(&mut self, handle: &ContextHandle, enabled: bool) -> Result<(), BackendError> {
        let ns = match self.placement(handle)? {
            Placement::Namespace(ns) => ns,
            Placement::Bridge(_) => {
                return Err(BackendError::Unsupported {
                    backend: self.name().to_string(),
                    operation: format!("forwarding on switch '{}'", handle.node),
                })
            }
        };
        let value = format!("net.ipv4.ip_forward={}", u8::from(enabled));
        self.exec(&["ip", "netns", "exec", &ns, "sysctl", "-w", &value])
    }

    fn run_command(&mut self, handle: &ContextHandle, command_line: &str) -> Result<CommandOutput, BackendError> {
        match self.placement(handle)? {
            Placement::Namespace(ns) => self
                .runner
                .run(&["ip", "netns", "exec", &ns, "sh", "-c", command_line]),
            Placement::Bridge(_) => self.runner.run(&["sh", "-c", command_line]),
        }
    }

    fn bind_controllers(
        &mut self,
        handle: &ContextHandle,
        controllers: &[Controller],
        fail_mode: FailMode,
    ) -> Result<(), BackendError> {
        let bridge = self.bridge(handle, "controller binding")?;
        let mode = fail_mode.to_string();
        self.exec(&["ovs-vsctl", "set-fail-mode", &bridge, &mode])?;

        if controllers.is_empty() {
            return self.exec(&["ovs-vsctl", "del-controller", &bridge]);
        }

        let targets: Vec<String> = controllers.iter().map(Controller::target).collect();
        let mut args = vec!["ovs-vsctl", "set-controller", bridge.as_str()];
        args.extend(targets.iter().map(String::as_str));
        self.exec(&args)
    }

    fn release_controllers(&mut self, handle: &ContextHandle) -> Result<(), BackendError> {
        let bridge = self.bridge(handle, "controller release")?;
        self.exec(&["ovs-vsctl", "del-controller", &bridge])
    }
}

impl<R: CommandRunner> NetnsBackend<R> {
    fn bridge(&self, handle: &ContextHandle, operation: &str) -> Result<String, BackendError> {
        match self.placement(handle)? {
            Placement::Bridge(bridge) => Ok(bridge),
            Placement::Namespace(_) => Err(BackendError::Unsupported {
                backend: self.name().to_string(),
                operation: format!("{} on {} '{}'", operation, handle.kind, handle.node),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::SwitchOptions;

    /// Records command lines and fails those containing `fail_on`.
    #[derive(Default)]
    struct Script {
        commands: Vec<String>,
        fail_on: Option<String>,
    }

    impl CommandRunner for Script {
        fn run(&mut self, args: &[&str]) -> Result<CommandOutput, BackendError> {
            let line = args.join(" ");
            let failed = self.fail_on.as_ref().is_some_and(|p| line.contains(p.as_str()));
            self.commands.push(line);
            Ok(if failed {
                CommandOutput::failure(2, "RTNETLINK answers: Operation not permitted")
            } else {
                CommandOutput::success("")
            })
        }
    }

    fn scripted(fail_on: Option<&str>) -> NetnsBackend<Script> {
        NetnsBackend::with_runner(
            "ab12",
            Script {
                commands: Vec::new(),
                fail_on: fail_on.map(str::to_string),
            },
        )
    }

    fn switch() -> NodeKind {
        NodeKind::Switch(SwitchOptions::default())
    }

    #[test]
    fn test_namespace_names() {
        let backend = NetnsBackend::with_run_id("ab12");
        assert_eq!(backend.namespace_name("h1"), "tlab12-h1");
        assert_eq!(backend.run_id(), "ab12");
        assert_eq!(NetnsBackend::new().run_id().len(), 4);
    }

    #[test]
    fn test_unknown_handle() {
        let mut backend = NetnsBackend::with_run_id("0000");
        let handle = ContextHandle {
            id: 7,
            node: "h1".to_string(),
            kind: NodeKind::Host,
            name: "tl0000-h1".to_string(),
        };
        assert!(matches!(
            backend.set_forwarding(&handle, true),
            Err(BackendError::UnknownContext(_))
        ));
    }

    #[test]
    fn test_host_ends_are_created_in_their_namespaces() {
        let mut backend = scripted(None);
        let h1 = backend.create_context("h1", NodeKind::Host).unwrap();
        let h2 = backend.create_context("h2", NodeKind::Host).unwrap();
        backend.attach_link(&h1, "eth0", &h2, "eth0").unwrap();

        let commands = &backend.runner().commands;
        assert!(commands.contains(
            &"ip link add eth0 netns tlab12-h1 type veth peer name eth0 netns tlab12-h2".to_string()
        ));
        // Nothing is ever deleted in the root namespace
        assert!(!commands.iter().any(|c| c.starts_with("ip link del")));

        backend.detach_link(&h1, "eth0", &h2, "eth0").unwrap();
        assert_eq!(
            backend.runner().commands.last().map(String::as_str),
            Some("ip netns exec tlab12-h1 ip link del dev eth0")
        );
    }

    #[test]
    fn test_switch_names_are_run_scoped() {
        let mut backend = scripted(None);
        let s1 = backend
            .create_context("a-very-long-switch-name", switch())
            .unwrap();
        let h1 = backend.create_context("h1", NodeKind::Host).unwrap();
        assert_eq!(s1.name, "tlab12b0");
        assert!(s1.name.len() <= 15);

        backend.attach_link(&s1, "s1-eth0", &h1, "h1-eth0").unwrap();
        let commands = backend.runner().commands.clone();
        assert!(commands.contains(&"ovs-vsctl add-br tlab12b0".to_string()));
        assert!(commands.contains(&"ip link add tlab12p0 type veth peer name h1-eth0 netns tlab12-h1".to_string()));
        assert!(commands.contains(&"ovs-vsctl add-port tlab12b0 tlab12p0".to_string()));
        assert!(commands.contains(&"ip link set dev tlab12p0 alias s1-eth0".to_string()));
        assert!(!commands.iter().any(|c| c.contains("--may-exist")));

        backend.detach_link(&s1, "s1-eth0", &h1, "h1-eth0").unwrap();
        assert!(backend
            .runner()
            .commands
            .ends_with(&["ovs-vsctl --if-exists del-port tlab12b0 tlab12p0".to_string(), "ip link del dev tlab12p0".to_string()]));
        assert!(matches!(
            backend.detach_link(&s1, "s1-eth0", &h1, "h1-eth0"),
            Err(BackendError::UnknownInterface { .. })
        ));
    }

    #[test]
    fn test_failed_attach_deletes_the_pair() {
        let mut backend = scripted(Some("add-port"));
        let h1 = backend.create_context("h1", NodeKind::Host).unwrap();
        let s1 = backend.create_context("s1", switch()).unwrap();

        let err = backend.attach_link(&h1, "h1-eth0", &s1, "s1-eth0").unwrap_err();
        assert!(matches!(err, BackendError::CommandFailed { .. }));

        let commands = &backend.runner().commands;
        let add = commands.iter().position(|c| c.starts_with("ip link add")).unwrap();
        let del = commands
            .iter()
            .position(|c| c == "ip netns exec tlab12-h1 ip link del dev h1-eth0")
            .unwrap();
        assert!(add < del);
        assert!(commands.contains(&"ovs-vsctl --if-exists del-port tlab12b1 tlab12p0".to_string()));

        // The failed link left no port behind
        assert!(matches!(
            backend.detach_link(&h1, "h1-eth0", &s1, "s1-eth0"),
            Err(BackendError::UnknownInterface { .. })
        ));
    }

    #[test]
    fn test_host_and_switch_contexts() {
        if !check_privileges() {
            eprintln!("Skipping: insufficient privileges");
            return;
        }

        let mut backend = NetnsBackend::new();
        let host = backend.create_context("nsth1", NodeKind::Host).unwrap();
        let out = backend.run_command(&host, "ip link").unwrap();
        assert!(out.stdout.contains("lo"), "loopback missing: {}", out.stdout);

        // Both ends use the same name in different namespaces
        let other = backend.create_context("nsth2", NodeKind::Host).unwrap();
        backend.attach_link(&host, "eth0", &other, "eth0").unwrap();
        let out = backend.run_command(&other, "ip link show eth0").unwrap();
        assert!(out.is_success());

        backend.detach_link(&host, "eth0", &other, "eth0").unwrap();
        backend.destroy_context(&other).unwrap();
        backend.destroy_context(&host).unwrap();
    }
}
