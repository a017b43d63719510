use std::{error::Error, fs::OpenOptions, path::Path, sync::Mutex};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sublaunch::{
    cli::{Cli, Commands, parse_args},
    config::{LauncherConfig, load_config_or_default},
    error::LauncherError,
    logs::show_logs,
    runtime::LauncherPaths,
    shutdown::{ShutdownCoordinator, ShutdownSignal},
    supervisor::ProcessSupervisor,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args, log_file(&args))?;

    if let Err(err) = dispatch(args) {
        error!("{err}");
        return Err(err.into());
    }

    Ok(())
}

fn dispatch(args: Cli) -> Result<(), LauncherError> {
    let paths = LauncherPaths::resolve(args.app_dir.as_deref())?;

    match args.command {
        Commands::Run { .. } => run(&paths),
        Commands::Init { force } => init(&paths, force),
        Commands::Logs { name, lines } => Ok(show_logs(&paths.log_dir, &name, lines)?),
    }
}

fn log_file(args: &Cli) -> Option<&Path> {
    match &args.command {
        Commands::Run { log_file } => log_file.as_deref(),
        _ => None,
    }
}

fn init_logging(args: &Cli, log_file: Option<&Path>) -> Result<(), LauncherError> {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }

    Ok(())
}

/// Host stand-in: launch, block until SIGINT/SIGTERM, tear down.
fn run(paths: &LauncherPaths) -> Result<(), LauncherError> {
    paths.ensure_directories();
    let config = load_config_or_default(&paths.config_path, &paths.base_dir);

    let signal = ShutdownSignal::install()?;
    let mut supervisor = ProcessSupervisor::from_paths(paths)?;
    let launched = supervisor.launch(&config.entries).len();
    info!(
        "Launched {launched} of {} enabled entries",
        config.enabled_entries().count()
    );

    let coordinator = ShutdownCoordinator::new(supervisor);
    if signal.received() {
        info!("Shutdown requested during launch");
    } else {
        signal.wait();
        info!("Shutdown requested");
    }

    coordinator.trigger();
    if let Some(report) = coordinator.take_report()
        && !report.is_clean()
    {
        warn!("Teardown finished with errors; see above");
    }

    Ok(())
}

fn init(paths: &LauncherPaths, force: bool) -> Result<(), LauncherError> {
    if paths.config_path.exists() && !force {
        warn!(
            "Config already exists at {}; pass --force to overwrite",
            paths.config_path.display()
        );
        return Ok(());
    }

    paths.ensure_directories();
    LauncherConfig::sample(&paths.base_dir).save(&paths.config_path)?;
    println!("{}", paths.config_path.display());
    Ok(())
}
