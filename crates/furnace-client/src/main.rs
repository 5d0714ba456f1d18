use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use furnace_client::artifact::ArtifactRef;
use furnace_client::backend::{HttpBackend, ProfilingBackend};
use furnace_client::config::FurnaceConfig;
use furnace_client::logging::{self, LogTarget};
use furnace_client::registry::Target;
use furnace_client::runner::{self, RecordRequest, StopTrigger};
use furnace_client::selection::ColorScheme;
use furnace_client::status::project;
use furnace_client::Result;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Config file (defaults to ./furnace.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Proxy base URL; overrides config and FURNACE_URL
    #[arg(long, global = true)]
    url: Option<String>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, clap::Args)]
struct TargetArgs {
    #[arg(long, short = 'n')]
    namespace: String,
    #[arg(long, short = 'p')]
    pod: String,
}

impl TargetArgs {
    fn target(&self) -> Target {
        Target::new(self.namespace.trim(), self.pod.trim())
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered namespaces and pods
    Targets,
    /// Print the pipeline status of one pod
    Status {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Record, stop, wait for the flamegraph and save it
    Record {
        #[command(flatten)]
        target: TargetArgs,
        /// Stop after this many seconds instead of waiting for Enter
        #[arg(long)]
        duration: Option<u64>,
        #[arg(long, value_enum)]
        colors: Option<ColorScheme>,
        #[arg(long)]
        inverted: Option<bool>,
        /// Resolve symbols through the proxy's symfs
        #[arg(long)]
        symfs: bool,
        /// Viewport width in pixels; the chart is slightly narrower
        #[arg(long)]
        width: Option<u32>,
        /// Output file (defaults to <namespace>_<pod>.svg)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Download the most recent chart of one pod
    Chart {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Terminal UI (target picker + recording controls)
    Tui {
        /// Write logs here; otherwise they are discarded while the UI runs
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let log_target = match &args.cmd {
        Command::Tui { log_file: Some(p) } => LogTarget::File(p.clone()),
        Command::Tui { log_file: None } => LogTarget::Discard,
        _ => LogTarget::Stderr,
    };
    logging::init(log_target)?;

    let mut cfg = FurnaceConfig::resolve(args.config.as_deref())?;
    if let Some(url) = args.url {
        cfg.client.base_url = url;
    }
    cfg.validate()?;

    match args.cmd {
        Command::Targets => cmd_targets(&cfg),
        Command::Status { target } => cmd_status(&cfg, &target.target()),
        Command::Record {
            target,
            duration,
            colors,
            inverted,
            symfs,
            width,
            output,
        } => {
            let mut options = cfg.options();
            if let Some(c) = colors {
                options = options.with_colors(c);
            }
            if let Some(inv) = inverted {
                options = options.with_inverted(inv);
            }
            if symfs {
                options = options.with_symfs(true);
            }
            let req = RecordRequest {
                target: target.target(),
                options,
                viewport_width: width.unwrap_or(cfg.recording.viewport_width),
                output,
            };
            cmd_record(&cfg, &req, duration)
        }
        Command::Chart { target, output } => cmd_chart(&cfg, &target.target(), output),
        Command::Tui { .. } => furnace_client::ui::run_tui(&cfg),
    }
}

fn http_backend(cfg: &FurnaceConfig) -> Result<Arc<dyn ProfilingBackend>> {
    Ok(Arc::new(HttpBackend::new(
        &cfg.client.base_url,
        cfg.request_timeout(),
    )?))
}

fn cmd_targets(cfg: &FurnaceConfig) -> Result<()> {
    let backend = http_backend(cfg)?;
    let targets = backend.list_targets()?;
    let mut registry = furnace_client::registry::TargetRegistry::new();
    registry.apply_fetch(Ok(targets));
    if registry.is_empty() {
        println!("no targets registered");
        return Ok(());
    }
    for ns in registry.namespaces() {
        println!("{ns}");
        for pod in registry.targets_in(&ns) {
            println!("  {pod}");
        }
    }
    Ok(())
}

fn cmd_status(cfg: &FurnaceConfig, target: &Target) -> Result<()> {
    let backend = http_backend(cfg)?;
    let p = project(&backend.status(target)?);
    match p.progress_ratio() {
        Some(r) => println!("{target}: {} ({:.0}%)", p.label, r * 100.0),
        None => println!("{target}: {} (unrecognized)", p.label),
    }
    Ok(())
}

fn cmd_record(cfg: &FurnaceConfig, req: &RecordRequest, duration: Option<u64>) -> Result<()> {
    let backend = http_backend(cfg)?;
    let trigger = match duration {
        Some(secs) => {
            eprintln!("recording {} for {secs}s", req.target);
            StopTrigger::After(Duration::from_secs(secs))
        }
        None => {
            eprintln!("recording {}; press Enter to stop", req.target);
            StopTrigger::on_enter()
        }
    };
    let outcome = runner::record(backend, cfg.session_settings(), req, trigger)?;
    let view = outcome.artifact.view_url(&cfg.client.base_url)?;
    println!("{} ({} bytes)", outcome.path.display(), outcome.bytes);
    println!("{view}");
    Ok(())
}

fn cmd_chart(cfg: &FurnaceConfig, target: &Target, output: Option<PathBuf>) -> Result<()> {
    let backend = http_backend(cfg)?;
    let epoch = chrono::Utc::now().timestamp_millis();
    let artifact = ArtifactRef::new(target.clone(), epoch);
    let path = output.unwrap_or_else(|| PathBuf::from(artifact.suggested_file_name()));
    let bytes = runner::save_chart(backend.as_ref(), &artifact, &path)?;
    println!("{} ({bytes} bytes)", path.display());
    Ok(())
}
