use anyhow::Context;
use clap::{Parser, Subcommand};
use scanstage::{
    init_logging, list_ports, AppEvent, Config, EventCategory, EventFilter, MotionControl,
    NoOpCapture, NoOpLighting, NoOpStorage, PatternSpec, ScanConfig, ScanOrchestrator,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "scanstage", version, about = "3D scanning stage controller")]
struct Cli {
    /// Config file path; defaults to the platform config directory
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports that look like motion controllers
    ListPorts,
    /// Home the stage and report the position
    Home,
    /// Print the current machine status
    Status,
    /// Run a scan pattern (dry-run collaborators; capture and storage are
    /// provided by the integration, not this binary)
    Scan {
        /// JSON pattern description (grid, cylindrical, or explicit)
        #[arg(long)]
        pattern: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load_or_default().context("loading default config")?,
    };

    match cli.command {
        Command::ListPorts => {
            for port in list_ports().context("enumerating serial ports")? {
                println!("{}\t{}", port.port_name, port.description);
            }
        }
        Command::Home => {
            let controller = scanstage::connect(&config)?;
            controller.home(None).await.context("homing failed")?;
            println!("Homed; position {}", controller.position());
            controller.shutdown().await;
        }
        Command::Status => {
            let controller = scanstage::connect(&config)?;
            let snapshot = controller
                .client()
                .query_status(config.protocol.command_timeout())
                .await
                .context("status query failed")?;
            println!("{} @ {}", snapshot.state, snapshot.position);
            controller.shutdown().await;
        }
        Command::Scan { pattern } => {
            let spec: PatternSpec = serde_json::from_str(
                &std::fs::read_to_string(&pattern)
                    .with_context(|| format!("reading {}", pattern.display()))?,
            )
            .context("parsing pattern")?;
            let points = spec.generate();

            let controller = Arc::new(scanstage::connect(&config)?);
            run_scan(controller, config.scan.clone(), points).await?;
        }
    }

    Ok(())
}

async fn run_scan(
    motion: Arc<scanstage::MotionController>,
    scan_config: ScanConfig,
    points: Vec<scanstage::ScanPoint>,
) -> anyhow::Result<()> {
    // Progress to the console via the event bus, the same channel a UI
    // would subscribe on.
    let _subscription = scanstage::event_bus().subscribe(
        EventFilter::Categories(vec![EventCategory::Scan]),
        |event: AppEvent| println!("{}", event.description()),
    );

    let orchestrator = ScanOrchestrator::new(
        motion,
        Arc::new(NoOpCapture),
        Arc::new(NoOpStorage),
        Arc::new(NoOpLighting),
        scan_config,
    );

    let handle = orchestrator.start(points).context("starting scan")?;
    let report = handle.wait().await.context("scan run")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
