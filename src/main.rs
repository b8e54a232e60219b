use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use env_logger::Env;
use fabricsim::config_loader;
use fabricsim::controller::ControllerSpec;
use fabricsim::engine::{Emulator, NetnsEmulator, RecordingEmulator};
use fabricsim::nested::{run_nested, NestedDescriptor};
use fabricsim::orchestrator::FabricOrchestrator;
use fabricsim::plan::FabricPlan;
use fabricsim::session;
use log::{info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Two-tier SDN test fabric with nested per-node virtual networks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bring the fabric up and open the interactive session
    Run {
        /// Path to the fabric configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Record the commands a run would issue instead of executing them
        #[arg(long)]
        dry_run: bool,

        /// Write the management port registry to this JSON file
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Hold the fabric until stdin closes instead of prompting
        #[arg(long)]
        no_cli: bool,
    },

    /// Resolve topology, ports and placements and write them as YAML
    Plan {
        #[arg(short, long)]
        config: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Nested network engine, spawned inside each physical node
    #[command(hide = true)]
    Nested {
        #[arg(long)]
        descriptor: PathBuf,

        #[arg(long, default_value = "none")]
        controller: ControllerSpec,
    },
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();

    // The nested engine shares the terminal with its parent; keep it quiet
    let default_filter = match cli.command {
        Command::Nested { .. } => "warn",
        _ => "info",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    match cli.command {
        Command::Run { config, dry_run, registry, no_cli } => {
            run(&config, dry_run, registry.as_deref(), no_cli)
        }
        Command::Plan { config, output } => plan(&config, output.as_deref()),
        Command::Nested { descriptor, controller } => nested(&descriptor, &controller),
    }
}

fn run(config_path: &Path, dry_run: bool, registry: Option<&Path>, no_cli: bool) -> Result<()> {
    config_loader::check_config_compatibility(config_path)?;
    let config = config_loader::load_config(config_path)?;

    if dry_run {
        info!("Dry run: commands are recorded, not executed");
        let emulator = RecordingEmulator::new();
        let log = emulator.log();
        let mut orch = FabricOrchestrator::new(config, emulator)?;
        let result = orch
            .bring_up()
            .wrap_err("Failed to bring up the fabric")
            .and_then(|_| write_registry(&orch, registry));
        orch.shutdown()?;
        for event in log.snapshot() {
            println!("{}", event);
        }
        return result;
    }

    let mut orch = FabricOrchestrator::new(config, NetnsEmulator::new())
        .wrap_err("Failed to build the fabric topology")?;
    orch.bring_up().wrap_err("Failed to bring up the fabric")?;

    let result = operate(&mut orch, registry, no_cli);
    info!("Tearing down the fabric");
    let teardown = orch.shutdown().wrap_err("Fabric teardown was incomplete");
    result?;
    teardown
}

fn write_registry<E: Emulator>(orch: &FabricOrchestrator<E>, path: Option<&Path>) -> Result<()> {
    if let Some(path) = path {
        orch.registry()
            .write_json(path)
            .wrap_err_with(|| format!("Failed to write registry '{}'", path.display()))?;
        info!("Management registry written to {:?}", path);
    }
    Ok(())
}

fn operate<E: Emulator>(orch: &mut FabricOrchestrator<E>, registry: Option<&Path>, no_cli: bool) -> Result<()> {
    write_registry(orch, registry)?;
    for skipped in orch.skipped() {
        warn!("Virtual net {} was not provisioned: {}", skipped.spec, skipped.error);
    }

    if no_cli {
        info!("Fabric is up; close stdin to tear it down");
        io::copy(&mut io::stdin().lock(), &mut io::sink())?;
    } else {
        session::run(orch, io::stdin().lock(), io::stdout().lock())?;
    }
    Ok(())
}

fn plan(config_path: &Path, output: Option<&Path>) -> Result<()> {
    config_loader::check_config_compatibility(config_path)?;
    let config = config_loader::load_config(config_path)?;
    let plan = FabricPlan::build(&config)?;
    let yaml = plan.to_yaml().wrap_err("Failed to serialize the plan")?;

    match output {
        Some(path) => {
            fs::write(path, yaml)
                .wrap_err_with(|| format!("Failed to write plan '{}'", path.display()))?;
            info!("Plan written to {:?}", path);
        }
        None => print!("{}", yaml),
    }
    for skipped in &plan.skipped {
        warn!("Virtual net {} would be skipped: {}", skipped.spec, skipped.reason);
    }
    Ok(())
}

fn nested(descriptor_path: &Path, controller: &ControllerSpec) -> Result<()> {
    let descriptor = NestedDescriptor::load(descriptor_path)
        .wrap_err_with(|| format!("Failed to read nested descriptor '{}'", descriptor_path.display()))?;
    let mut emulator = NetnsEmulator::new();
    run_nested(&mut emulator, &descriptor, controller, io::stdin().lock())
        .wrap_err_with(|| format!("Nested network of {} failed", descriptor.node))?;
    Ok(())
}
