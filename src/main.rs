use clap::Parser;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use env_logger::Env;
use log::{info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use topolab::backend::{check_privileges, NetnsBackend, RecordingBackend, Virtualizer};
use topolab::config_loader;
use topolab::orchestrator::{CommandReport, RuntimeOptions, ScenarioCommand, TopologyRuntime};

/// Build and run virtual network topologies on Linux namespaces and Open vSwitch
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the topology description YAML file
    #[arg(short, long)]
    config: PathBuf,

    /// Print the backend calls a run would make instead of touching the host
    #[arg(long)]
    dry_run: bool,

    /// Print the dry-run plan as JSON
    #[arg(long, requires = "dry_run")]
    json: bool,

    /// Fail when subnets on different segments overlap
    #[arg(long)]
    strict_subnets: bool,

    /// Log level, overriding general.log_level
    #[arg(long)]
    log_level: Option<String>,

    /// Keep the topology up until Enter is pressed
    #[arg(long)]
    keep_running: bool,
}

/// How long a session keeps the topology up
enum Hold {
    None,
    For(Duration),
    UntilEnter,
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    let config = config_loader::load_config(&args.config)?;

    let level = args
        .log_level
        .clone()
        .or_else(|| config.general.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    info!("Topology description: {:?}", args.config);

    let loaded = config_loader::prepare(&config)?;
    let options = RuntimeOptions {
        strict_subnets: args.strict_subnets,
    };

    if args.dry_run {
        let mut runtime = TopologyRuntime::build_with_options(
            loaded.graph,
            loaded.assignment,
            RecordingBackend::new(),
            options,
        )?;
        let reports = run_session(&mut runtime, &loaded.commands, Hold::None)?;
        print_reports(&reports);

        let calls = runtime.backend_mut().take_calls();
        if args.json {
            println!("{}", serde_json::to_string_pretty(&calls)?);
        } else {
            for (i, call) in calls.iter().enumerate() {
                println!("{:4}  {}", i + 1, call);
            }
        }
        return Ok(());
    }

    if !check_privileges() {
        return Err(eyre!(
            "Creating namespaces needs the `ip` tool and passwordless sudo; try --dry-run"
        ));
    }

    let hold = if args.keep_running {
        Hold::UntilEnter
    } else {
        config.general.hold.map_or(Hold::None, Hold::For)
    };

    let backend = NetnsBackend::new();
    info!("Run id: {}", backend.run_id());
    let mut runtime = TopologyRuntime::build_with_options(loaded.graph, loaded.assignment, backend, options)?;
    let reports = run_session(&mut runtime, &loaded.commands, hold)?;
    print_reports(&reports);

    Ok(())
}

/// Start, run the scenario, hold, stop. The topology is stopped even when
/// the scenario fails.
fn run_session<B: Virtualizer>(
    runtime: &mut TopologyRuntime<B>,
    commands: &[ScenarioCommand],
    hold: Hold,
) -> Result<Vec<CommandReport>> {
    runtime.start().wrap_err("Failed to start topology")?;

    let reports = match runtime.run_commands(commands) {
        Ok(reports) => reports,
        Err(e) => {
            if let Err(stop_err) = runtime.stop() {
                warn!("{}", stop_err);
            }
            return Err(e).wrap_err("Scenario failed");
        }
    };

    match hold {
        Hold::None => {}
        Hold::For(duration) => {
            info!("Holding topology for {:?}", duration);
            std::thread::sleep(duration);
        }
        Hold::UntilEnter => {
            info!("Topology is up; press Enter to stop");
            let mut line = String::new();
            if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
                warn!("Could not read stdin: {}", e);
            }
        }
    }

    runtime.stop().wrap_err("Failed to stop topology cleanly")?;
    Ok(reports)
}

fn print_reports(reports: &[CommandReport]) {
    for report in reports {
        println!("*** {}> {}", report.node, report.command);
        if !report.output.stdout.is_empty() {
            print!("{}", report.output.stdout);
        }
    }

    let failed = reports.iter().filter(|r| !r.output.is_success()).count();
    if failed > 0 {
        warn!("{} of {} scenario commands exited non-zero", failed, reports.len());
    }
}
