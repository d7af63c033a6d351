//! # Topolab - declarative virtual network topologies
//!
//! This library describes a virtual network of hosts, switches and routers,
//! with the links between them and their addressing and routing intent, and
//! then realises that description as a live topology on Linux network
//! namespaces and Open vSwitch bridges.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `ip`: address, prefix and route parsing, subnet registry
//! - `topology`: the node/link graph and interface naming
//! - `controller`: which switch binds to which controllers
//! - `lifecycle`: per-node state machine and per-kind side effects
//! - `backend`: the virtualization collaborator (`Virtualizer`) and its
//!   netns and recording implementations
//! - `orchestrator`: `TopologyRuntime`, driving build, start and stop
//! - `config` / `config_loader`: YAML topology descriptions
//! - `utils`: interface name rules and topology checks
//!
//! ## Example Usage
//!
//! ```rust
//! use topolab::backend::RecordingBackend;
//! use topolab::controller::ControllerAssignment;
//! use topolab::ip::AddressPlan;
//! use topolab::orchestrator::TopologyRuntime;
//! use topolab::topology::{LinkOptions, SwitchOptions, TopologyGraph};
//!
//! let mut graph = TopologyGraph::new();
//! graph.add_router("r1", AddressPlan::primary("10.1.1.1/24")?)?;
//! graph.add_switch("s1", SwitchOptions::default())?;
//! graph.add_host("h1", AddressPlan::primary("10.1.1.2/24")?, Some("via 10.1.1.1"))?;
//! graph.add_link("r1", "s1", LinkOptions::new())?;
//! graph.add_link("h1", "s1", LinkOptions::new())?;
//!
//! let mut runtime = TopologyRuntime::build(graph, ControllerAssignment::new(), RecordingBackend::new())?;
//! runtime.start()?;
//! assert_eq!(runtime.forwarding_enabled("r1"), Some(true));
//! runtime.stop()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Description Format
//!
//! ```yaml
//! hosts:
//!   - name: h1
//!     ip: 10.1.1.2/24
//!     default_route: via 10.1.1.1
//! switches:
//!   - name: s1
//! routers:
//!   - name: r1
//!     ip: 10.1.1.1/24
//! links:
//!   - { a: r1, b: s1 }
//!   - { a: h1, b: s1 }
//! ```
//!
//! ## Error Handling
//!
//! Library components return typed errors defined next to the code that
//! raises them. The description loader and the binary use `color_eyre`
//! for error reporting with context.

pub mod backend;
pub mod config;
pub mod config_loader;
pub mod controller;
pub mod ip;
pub mod lifecycle;
pub mod orchestrator;
pub mod topology;
pub mod utils;
