use crate::config::Config;
use crate::controller::{ControllerAssignment, ControllerBindingError};
use crate::ip::{AddressError, AddressPlan};
use crate::orchestrator::ScenarioCommand;
use crate::topology::{GraphError, LinkOptions, SwitchOptions, TopologyGraph};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{debug, info};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// Everything a description file yields, ready for the runtime
#[derive(Debug)]
pub struct LoadedTopology {
    pub graph: TopologyGraph,
    pub assignment: ControllerAssignment,
    pub commands: Vec<ScenarioCommand>,
}

/// Load and parse a topology description from a YAML file
pub fn load_config(config_path: &Path) -> Result<Config> {
    info!("Loading topology description from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open {}", config_path.display()))?;

    let config: Config = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse {}", config_path.display()))?;

    config.validate()?;

    Ok(config)
}

/// Parse a topology description from a YAML string
pub fn parse_config(yaml: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(yaml).wrap_err("Failed to parse topology description")?;
    config.validate()?;
    Ok(config)
}

/// Load a description file and turn it into a graph, a controller
/// assignment and the scenario commands
pub fn load_topology(config_path: &Path) -> Result<(Config, LoadedTopology)> {
    let config = load_config(config_path)?;
    let loaded = prepare(&config)?;
    Ok((config, loaded))
}

/// Build everything the runtime needs from a parsed description
pub fn prepare(config: &Config) -> Result<LoadedTopology> {
    let graph = build_graph(config).wrap_err("Invalid topology")?;
    let assignment = build_assignment(config).wrap_err("Invalid controller configuration")?;
    let commands = scenario_commands(config);

    info!(
        "Loaded {} nodes, {} links, {} controllers, {} scenario commands",
        graph.nodes().len(),
        graph.links().len(),
        assignment.controllers().len(),
        commands.len()
    );

    Ok(LoadedTopology {
        graph,
        assignment,
        commands,
    })
}

fn address_plan(ip: Option<&str>, addresses: &BTreeMap<String, String>) -> Result<AddressPlan, AddressError> {
    let mut plan = match ip {
        Some(ip) => AddressPlan::primary(ip)?,
        None => AddressPlan::none(),
    };
    for (interface, address) in addresses {
        plan = plan.with_interface(interface, address)?;
    }
    Ok(plan)
}

/// Replay the declarations into a graph: hosts, switches, routers, links,
/// then routes. The first failing declaration is reported.
pub fn build_graph(config: &Config) -> std::result::Result<TopologyGraph, GraphError> {
    let mut graph = TopologyGraph::new();

    for host in &config.hosts {
        let plan = address_plan(host.ip.as_deref(), &host.addresses)?;
        graph.add_host(&host.name, plan, host.default_route.as_deref())?;
    }

    for switch in &config.switches {
        graph.add_switch(
            &switch.name,
            SwitchOptions {
                fail_mode: switch.fail_mode,
            },
        )?;
    }

    for router in &config.routers {
        let plan = address_plan(router.ip.as_deref(), &router.addresses)?;
        graph.add_router(&router.name, plan)?;
        if let Some(route) = &router.default_route {
            graph.set_default_route(&router.name, route)?;
        }
    }

    for link in &config.links {
        let options = LinkOptions {
            a_interface: link.a_intf.clone(),
            b_interface: link.b_intf.clone(),
            a_address: link.a_ip.clone(),
            b_address: link.b_ip.clone(),
        };
        let id = graph.add_link(&link.a, &link.b, options)?;
        debug!("Link {} from description: {} <-> {}", id, link.a, link.b);
    }

    for route in &config.routes {
        if route.to.trim() == "default" {
            graph.set_default_route(&route.node, &route.via)?;
        } else {
            graph.add_route(&route.node, &route.to, &route.via)?;
        }
    }

    graph.validate()?;
    Ok(graph)
}

/// Build the controller assignment from the `controllers` and
/// `controller_map` sections
pub fn build_assignment(config: &Config) -> std::result::Result<ControllerAssignment, ControllerBindingError> {
    let mut assignment = match &config.controllers {
        None => ControllerAssignment::new(),
        Some(controllers) => {
            let mut assignment = ControllerAssignment::without_default();
            for controller in controllers {
                assignment.add_controller(controller.clone())?;
            }
            assignment
        }
    };

    for (switch, ids) in &config.controller_map {
        assignment.bind(switch, ids.as_slice())?;
    }

    Ok(assignment)
}

/// Scenario commands, in file order
pub fn scenario_commands(config: &Config) -> Vec<ScenarioCommand> {
    config
        .commands
        .iter()
        .map(|c| ScenarioCommand::new(&c.node, &c.run))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::RouteTarget;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ROUTER_PAIR: &str = r#"
hosts:
  - name: h1
    ip: 130.132.11.100/24
    default_route: via 130.132.11.9
routers:
  - name: r1
    ip: 130.132.11.9/24
  - name: r2
    ip: 192.32.2.8/24
links:
  - { a: h1, b: r1, b_intf: r1-eth1, b_ip: 130.132.11.9/24 }
  - { a: r1, b: r2, a_intf: r1-eth2, b_intf: r2-eth1, a_ip: 192.31.2.1/24, b_ip: 192.32.2.8/24 }
routes:
  - { node: r1, to: 192.32.2.0/24, via: dev r1-eth2 }
  - { node: r2, to: 192.31.2.0/24, via: dev r2-eth1 }
  - { node: r2, to: default, via: 192.31.2.1 }
commands:
  - { node: r1, run: route }
"#;

    #[test]
    fn test_build_graph_from_description() {
        let config = parse_config(ROUTER_PAIR).unwrap();
        let graph = build_graph(&config).unwrap();

        assert_eq!(graph.nodes().len(), 3);
        let r1: Vec<&str> = graph.interfaces_of("r1").iter().map(|i| i.name.as_str()).collect();
        assert_eq!(r1, vec!["r1-eth1", "r1-eth2"]);
        assert_eq!(graph.interfaces_of("h1")[0].name, "h1-eth0");
        assert_eq!(graph.node("r1").unwrap().routes.len(), 1);
        assert_eq!(
            graph.node("r2").unwrap().default_route,
            Some(RouteTarget::Gateway("192.31.2.1".parse().unwrap()))
        );
        assert_eq!(scenario_commands(&config), vec![ScenarioCommand::new("r1", "route")]);
    }

    #[test]
    fn test_graph_errors_keep_declaration_order() {
        let yaml = r#"
hosts:
  - { name: h1 }
switches:
  - { name: h1 }
links:
  - { a: h1, b: r9 }
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(build_graph(&config).unwrap_err(), GraphError::DuplicateName("h1".to_string()));
    }

    #[test]
    fn test_unknown_link_endpoint() {
        let yaml = "hosts:\n  - { name: h1 }\nlinks:\n  - { a: h1, b: r9 }\n";
        let config = parse_config(yaml).unwrap();
        assert_eq!(build_graph(&config).unwrap_err(), GraphError::UnknownNode("r9".to_string()));
    }

    #[test]
    fn test_build_assignment() {
        let implicit = build_assignment(&parse_config("switches: [{ name: s1 }]").unwrap()).unwrap();
        assert_eq!(implicit.resolve("s1"), vec!["c0"]);

        let yaml = r#"
controllers:
  - { name: c0, ip: 127.0.0.1, port: 6633 }
  - { name: c1, ip: 192.168.56.1, port: 6634 }
controller_map:
  s1: [c1, c0]
"#;
        let assignment = build_assignment(&parse_config(yaml).unwrap()).unwrap();
        assert_eq!(assignment.resolve("s1"), vec!["c1", "c0"]);
        assert_eq!(assignment.resolve("s2"), vec!["c0"]);
        assert_eq!(assignment.default_controller().map(|c| c.port), Some(6633));

        let none = build_assignment(&parse_config("controllers: []").unwrap()).unwrap();
        assert!(none.resolve("s1").is_empty());
    }

    #[test]
    fn test_load_topology_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(ROUTER_PAIR.as_bytes()).unwrap();

        let (config, loaded) = load_topology(file.path()).unwrap();
        assert_eq!(config.routers.len(), 2);
        assert_eq!(loaded.graph.links().len(), 2);
        assert_eq!(loaded.commands.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/topology.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to open"));
    }
}
