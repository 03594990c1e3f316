//! Dobot Bringup CLI
//!
//! Usage:
//!   DOBOT_TYPE=cr3 dobot_bringup
//!   dobot_bringup --robot-type cr5 -a world_file:=/opt/worlds/empty.world
//!   dobot_bringup --robot-type cr3 --profile rsp
//!   dobot_bringup --robot-type cr3 --description-file cr3_robot.urdf --dry-run

use dobot_bringup::{
    BringupArgs, BringupFile, BringupSequencer, DescriptionSource, Supervisor, SupervisorConfig,
};
use std::path::PathBuf;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let args: BringupArgs = argh::from_env();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => "error",
        "warn" => "warn",
        "info" => "info",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };
    let env = env_logger::Env::default().default_filter_or(log_level);
    env_logger::init_from_env(env);

    // Load bringup file
    let bringup_file = match &args.file {
        Some(path) => {
            log::info!("Loading bringup file: {}", path);
            BringupFile::from_file(path)
        }
        None => BringupFile::builtin(),
    };
    let bringup_file = match bringup_file {
        Ok(bf) => bf,
        Err(e) => {
            log::error!("Failed to load bringup file: {}", e);
            std::process::exit(1);
        }
    };

    // Validate only mode
    if args.validate {
        println!(
            "Bringup file '{}' is valid",
            args.file.as_deref().unwrap_or("<built-in>")
        );
        println!("  Version: {}", bringup_file.version);
        println!("  Args: {}", bringup_file.args.len());
        println!("  Stages: {}", bringup_file.stages.iter().count());
        return;
    }

    let Some(robot_type) = args.robot_type() else {
        log::error!("No robot type given: pass --robot-type or set DOBOT_TYPE");
        std::process::exit(1);
    };

    let sequencer = match BringupSequencer::new(&bringup_file, &robot_type, args.arg_overrides())
    {
        Ok(s) => s,
        Err(e) => {
            log::error!("Invalid bringup configuration: {}", e);
            std::process::exit(1);
        }
    };

    let names = sequencer.names();
    log::info!(
        "Robot type '{}': entity '{}', controllers [{}]",
        names.robot_type,
        names.entity_name,
        names.controllers.join(", ")
    );

    // Resolve the robot description
    let source = match &args.description_file {
        Some(path) => DescriptionSource::File(PathBuf::from(path)),
        None => match sequencer.description_source(args.profile) {
            Ok(source) => source,
            Err(e) => {
                log::error!("Failed to locate robot description: {}", e);
                std::process::exit(1);
            }
        },
    };
    let description = match source.resolve().await {
        Ok(d) => d,
        Err(e) => {
            log::error!("Failed to resolve robot description: {}", e);
            std::process::exit(1);
        }
    };

    let plan = match sequencer.plan(args.profile, &description) {
        Ok(plan) => plan,
        Err(e) => {
            log::error!("Failed to build bringup plan: {}", e);
            std::process::exit(1);
        }
    };

    // Dry run mode
    if args.dry_run {
        println!("{}", plan);
        return;
    }

    let mut supervisor = Supervisor::new(SupervisorConfig {
        shutdown_timeout: args.shutdown_timeout(),
    });

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    // Set up Ctrl+C handler
    {
        let shutdown_tx = shutdown_tx.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("Received Ctrl+C, initiating shutdown...");
            let _ = shutdown_tx.send(());
        }) {
            log::error!("Error setting Ctrl+C handler: {}", e);
            std::process::exit(1);
        }
    }

    // Launch immediate actions and wire the exit bindings
    if let Err(e) = supervisor.start(&plan) {
        log::error!("Bringup failed: {}", e);
        supervisor.shutdown().await;
        std::process::exit(1);
    }

    // Dispatch exits until shutdown or all processes are gone
    supervisor.wait(shutdown_rx).await;

    // Shutdown all processes
    supervisor.shutdown().await;

    for chain in supervisor.chains() {
        log::info!("Chain '{}' finished: {}", chain.root(), chain.state());
    }
    for failure in supervisor.triggered_failures() {
        log::warn!(
            "[{}] Never started (triggered by '{}'): {}",
            failure.action,
            failure.trigger,
            failure.error
        );
    }

    log::info!("Dobot bringup exiting");
}
