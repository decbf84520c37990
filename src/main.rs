type Result<T> = color_eyre::eyre::Result<T>;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sigvec_harness::cli::{self, Config};
use sigvec_harness::error::exit_code;
use sigvec_harness::harness::Harness;
use sigvec_harness::interrupt::{CancelToken, InterruptWatcher};
use sigvec_harness::loopback::{LoopbackConfig, LoopbackRouter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;

    let cli = cli::parse_args();
    let config = Config::from_cli(cli)?;

    let default_level = if config.quiet { "warn" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    info!("sigvec-harness starting");

    // An interrupt sets the cancellation token; every loop checks it at its
    // head, so teardown and the summary always run.
    let cancel = CancelToken::new();
    let _watcher = InterruptWatcher::spawn(cancel.clone())?;

    let router = LoopbackRouter::new(LoopbackConfig::default());
    let mut harness = Harness::new(router, config.harness, cancel);

    let outcome = harness.run().await;
    if config.quiet {
        // The progress line never printed a trailing newline.
        println!();
    }
    match &outcome {
        Ok(report) => info!(
            sent = report.sent,
            received = report.received,
            cancelled = report.cancelled,
            "every issued update was received"
        ),
        Err(e) => error!("{e}"),
    }

    let verdict = match &outcome {
        Ok(_) => "\x1b[32mPASSED\x1b[0m",
        Err(_) => "\x1b[31mFAILED\x1b[0m",
    };
    println!("...................Test {verdict}.");
    std::process::exit(exit_code(&outcome));
}
