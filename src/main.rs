use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use wiipair::domain::models::{MessageSeverity, PairingReport, PairingStatus};
use wiipair::domain::settings::{Settings, SettingsService};
use wiipair::infrastructure::bluetooth::Backend;
use wiipair::infrastructure::logging;
use wiipair::pairing::{EngineConfig, PairingEngine, PairingListener};

/// Cap for the removal pass: more controllers than this never accumulate on
/// one host.
const REMOVE_PASS_LIMIT: usize = 10;

/// Pair Wii remote controllers over Bluetooth.
#[derive(Parser, Debug)]
#[command(name = "wiipair", version, about)]
struct Cli {
    /// Forget previously paired controllers instead of pairing new ones
    #[arg(long, conflicts_with = "fresh")]
    remove: bool,

    /// Forget old pairings first, then pair fresh
    #[arg(long)]
    fresh: bool,

    /// Stop after this many controllers (0 = no target)
    #[arg(long)]
    count: Option<usize>,

    /// Override the loop poll interval in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,
}

/// Reference consumer of the engine's report stream: prints everything to
/// stdout.
struct ConsoleListener;

impl PairingListener for ConsoleListener {
    fn on_started(&self) {
        println!("Pairing started");
    }

    fn on_console_line(&self, line: &str) {
        println!("{line}");
    }

    fn on_message(&self, message: &str, severity: MessageSeverity) {
        let tag = match severity {
            MessageSeverity::Info => "info",
            MessageSeverity::Success => " ok ",
            MessageSeverity::Error => "fail",
        };
        println!("[{tag}] {message}");
    }

    fn on_progress(&self, report: &PairingReport) {
        match report.status {
            PairingStatus::Running => {
                println!(
                    "[ ok ] {} so far: {}",
                    report.paired_count,
                    report.paired_names.join(", ")
                );
            }
            status => {
                println!(
                    "Session {status:?}: {} device(s) {}",
                    report.paired_count,
                    if report.remove_mode { "removed" } else { "paired" }
                );
            }
        }
    }
}

#[cfg(windows)]
fn host_backend(settings: &Settings) -> Option<Box<dyn Backend + Send>> {
    use wiipair::infrastructure::bluetooth::host::HostBackend;
    Some(Box::new(HostBackend::new(settings.inquiry_timeout_multiplier)))
}

#[cfg(not(windows))]
fn host_backend(_settings: &Settings) -> Option<Box<dyn Backend + Send>> {
    None
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = SettingsService::new()?;
    if let Some(poll_ms) = cli.poll_ms {
        settings.get_mut().poll_interval_ms = poll_ms;
    }
    let _logging_guard = logging::init_logger(&settings.get().log_settings)?;

    let config = EngineConfig {
        poll_interval: Duration::from_millis(settings.get().poll_interval_ms),
    };
    let stop_at = cli.count.unwrap_or(settings.get().default_stop_count);

    // The vendor stack posts its notifications to a window; without a
    // message pump to forward them there is nothing to drive its state
    // machine, so the console front-end runs the host backend only.
    let mut engine = PairingEngine::new(
        host_backend(settings.get()),
        None,
        Arc::new(ConsoleListener),
        config,
    );
    let handle = engine.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.stop();
        }
    });

    let (fresh, remove) = (cli.fresh, cli.remove);
    let report = tokio::task::spawn_blocking(move || {
        if fresh {
            // First forget everything, then run the actual pairing.
            let removal = engine.run(true, REMOVE_PASS_LIMIT);
            if removal.status == PairingStatus::Cancelled {
                return removal;
            }
        }
        if remove {
            engine.run(true, REMOVE_PASS_LIMIT)
        } else {
            engine.run(false, stop_at)
        }
    })
    .await?;

    if report.status == PairingStatus::Failed {
        anyhow::bail!("pairing failed: no bluetooth radios available");
    }
    Ok(())
}
