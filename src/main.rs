use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use imds_guard::config::{GuardConfig, Hook, TcDirection, XdpMode};
use imds_guard::inspect::Inspector;
use imds_guard::report::AttemptReport;
use imds_guard::Verdict;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imds-guard")]
#[command(author = "IMDS Guard Team")]
#[command(version = "0.1.0")]
#[command(about = "eBPF guard enforcing IMDSv2 token-only access to the metadata service", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (overrides the config file; RUST_LOG overrides both)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and attach the metadata blocker to a network interface
    Attach {
        /// Network interface name (e.g., eth0, ens5)
        #[arg(short, long)]
        interface: Option<String>,

        /// Path to compiled eBPF program
        #[arg(short, long)]
        program: Option<PathBuf>,

        /// Hook to attach
        #[arg(long, value_enum)]
        hook: Option<Hook>,

        /// XDP attach mode
        #[arg(long, value_enum)]
        xdp_mode: Option<XdpMode>,

        /// TC direction
        #[arg(long, value_enum)]
        tc_direction: Option<TcDirection>,

        /// Seconds between counter reports (0 = only on exit)
        #[arg(long)]
        interval: Option<u64>,

        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify hex-encoded frames from a file without attaching anything
    Inspect {
        /// File with one hex-encoded Ethernet frame per line
        file: PathBuf,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        /// Write the configuration to this path instead of stdout
        #[arg(short, long)]
        write: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => GuardConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => GuardConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    init_logging(&config.logging.level);

    match cli.command {
        Commands::Attach {
            interface,
            program,
            hook,
            xdp_mode,
            tc_direction,
            interval,
            json,
        } => {
            if let Some(interface) = interface {
                config.attach.interface = interface;
            }
            if let Some(program) = program {
                config.attach.program = program;
            }
            if let Some(hook) = hook {
                config.attach.hook = hook;
            }
            if let Some(mode) = xdp_mode {
                config.attach.xdp_mode = mode;
            }
            if let Some(direction) = tc_direction {
                config.attach.tc_direction = direction;
            }
            if let Some(interval) = interval {
                config.reporting.interval_secs = interval;
            }
            config.reporting.json |= json;
            config.validate()?;

            attach::run(&config).await?;
        }
        Commands::Inspect { file, json } => {
            inspect_frames(&file, json)?;
        }
        Commands::Config { write } => match write {
            Some(path) => {
                config.to_file(&path)?;
                println!(
                    "{}",
                    format!("✅ Configuration written to {}", path.display()).bright_green()
                );
            }
            None => print!("{}", config.to_toml()?),
        },
    }

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_report(report: &AttemptReport, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

fn inspect_frames(file: &Path, json: bool) -> Result<()> {
    let inspector = Inspector::new();
    let results = inspector
        .inspect_file(file)
        .with_context(|| format!("Failed to inspect frames from {}", file.display()))?;
    let report = inspector.report();

    if json {
        let output = serde_json::json!({
            "frames": results,
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for frame in &results {
        let verdict = match frame.verdict {
            Verdict::Pass => "PASS ".dimmed(),
            Verdict::Allow => "ALLOW".bright_green(),
            Verdict::Block => "BLOCK".bright_red().bold(),
        };
        let source = frame
            .source
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  line {:>5}  {:>5} bytes  {}  {}",
            frame.line, frame.len, verdict, source
        );
    }
    println!();
    print_report(&report, false)
}

#[cfg(target_os = "linux")]
mod attach {
    use super::print_report;
    use anyhow::Result;
    use colored::Colorize;
    use imds_guard::config::{GuardConfig, Hook};
    use imds_guard::ebpf_loader::EbpfLoader;
    use std::time::Duration;
    use tokio::time::{self, Instant, Interval};

    pub async fn run(config: &GuardConfig) -> Result<()> {
        // Check if running as root (required for XDP and TC)
        if !nix::unistd::Uid::effective().is_root() {
            eprintln!(
                "{}",
                "❌ Error: This program requires root privileges".bright_red()
            );
            eprintln!("   Please run with: sudo imds-guard attach --interface <iface>");
            std::process::exit(1);
        }

        let attach = &config.attach;
        println!(
            "{}",
            "╔════════════════════════════════════════════╗".bright_cyan()
        );
        println!(
            "{}",
            "║   IMDS Guard: metadata service blocker     ║".bright_cyan()
        );
        println!(
            "{}",
            "╚════════════════════════════════════════════╝".bright_cyan()
        );
        println!();
        println!(
            "  Program: {}",
            attach.program.display().to_string().bright_white()
        );
        println!("  Interface: {}", attach.interface.bright_yellow());
        match attach.hook {
            Hook::Xdp => println!("  Hook: XDP ({:?} mode)", attach.xdp_mode),
            Hook::Tc => println!("  Hook: TC ({:?})", attach.tc_direction),
        }
        println!();

        let mut loader = EbpfLoader::load(&attach.program)?;
        loader.init_logging();
        loader.attach(attach)?;

        println!(
            "{}",
            "✅ Metadata blocker loaded and attached successfully!".bright_green()
        );
        println!(
            "{}",
            "Only PUT /latest/api/token may reach 169.254.169.254:80".dimmed()
        );
        println!("{}", "Press Ctrl+C to detach and exit...".dimmed());
        println!();

        let mut ticker = match config.reporting.interval_secs {
            0 => None,
            secs => {
                let period = Duration::from_secs(secs);
                Some(time::interval_at(Instant::now() + period, period))
            }
        };

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    break;
                }
                _ = tick(&mut ticker) => {
                    print_report(&loader.report()?, config.reporting.json)?;
                }
            }
        }

        println!();
        print_report(&loader.report()?, config.reporting.json)?;
        println!("{}", "Detaching metadata blocker...".yellow());
        loader.detach()?;
        println!("{}", "✅ Metadata blocker detached".bright_green());

        Ok(())
    }

    async fn tick(ticker: &mut Option<Interval>) {
        match ticker {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod attach {
    use imds_guard::config::GuardConfig;

    pub async fn run(_config: &GuardConfig) -> anyhow::Result<()> {
        anyhow::bail!("attach is only supported on Linux")
    }
}
