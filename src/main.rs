use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use curlpit_runner::{
    env::load_environment,
    http::ReqwestSender,
    runner::{
        load_collection, load_run_config, printer, write_report, RequestItem, RequestResult,
        RunConfig, RunObserver, RunSession, Runner,
    },
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "curlpit-runner",
    version,
    about = "Run a request collection with pre-request and post-response scripts"
)]
struct Cli {
    /// Collection file (.json)
    #[arg(value_name = "COLLECTION")]
    collection: PathBuf,

    /// Run only this folder, e.g. users/admin
    #[arg(short, long)]
    folder: Option<String>,

    /// Environment file (.env or .json)
    #[arg(short, long)]
    env: Option<PathBuf>,

    /// runner.json file or directory containing one
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Halt the run after the first failed or errored request
    #[arg(long)]
    stop_on_failure: bool,

    /// Delay between requests in milliseconds (0-10000)
    #[arg(long, value_name = "MS")]
    delay: Option<u64>,

    /// Per-request timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout: Option<u64>,

    /// Per-script timeout in milliseconds
    #[arg(long, value_name = "MS")]
    script_timeout: Option<u64>,

    /// Directory for the JSON run report
    #[arg(long, value_name = "DIR")]
    report_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

struct ProgressObserver {
    bar: ProgressBar,
}

impl RunObserver for ProgressObserver {
    fn run_started(&self, session: &RunSession) {
        self.bar.set_length(session.total_requests() as u64);
    }

    fn request_started(&self, _index: usize, _total: usize, request: &RequestItem) {
        self.bar.set_message(request.name.clone());
    }

    fn request_finished(&self, result: &RequestResult) {
        // println on a hidden bar drops the line; suspend prints either way.
        self.bar
            .suspend(|| printer::print_request_result(result));
        self.bar.inc(1);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let collection_path = resolve_path(&cli.collection)?;
    let collection = load_collection(&collection_path)?;

    let environment = cli
        .env
        .as_ref()
        .map(|path| resolve_path(path).and_then(|p| load_environment(&p)))
        .transpose()
        .context("loading environment")?;

    let config = build_config(&cli, &collection_path)?;
    let bar = progress_bar()?;
    let runner = Runner::new(Arc::new(ReqwestSender::new(config.request_timeout)))
        .with_observer(Arc::new(ProgressObserver { bar: bar.clone() }));

    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; finishing current request");
            cancel.cancel();
        }
    });

    let session = runner
        .run(&collection, cli.folder.as_deref(), environment.as_ref(), config)
        .await
        .with_context(|| format!("running collection {}", collection.name))?;
    bar.finish_and_clear();
    let report = session.generate_report();
    printer::print_summary(&report);

    if let Some(dir) = &cli.report_dir {
        let path = write_report(&report, &resolve_path(dir)?)?;
        println!("Report: {}", path.display());
    }

    if !report.summary.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

fn progress_bar() -> Result<ProgressBar> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .context("building progress style")?
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

/// File values first, then command-line overrides.
fn build_config(cli: &Cli, collection_path: &Path) -> Result<RunConfig> {
    let target = match &cli.config {
        Some(path) => resolve_path(path)?,
        None => collection_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or(std::env::current_dir()?),
    };
    let mut config = load_run_config(&target)
        .context("loading run configuration")?
        .map(|loaded| {
            tracing::debug!(path = %loaded.path.display(), "loaded run configuration");
            loaded.config
        })
        .unwrap_or_default();

    if cli.stop_on_failure {
        config.stop_on_failure = true;
    }
    if let Some(delay) = cli.delay {
        config.delay_ms = delay;
    }
    if let Some(ms) = cli.timeout {
        config.request_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = cli.script_timeout {
        config.script_timeout = Duration::from_millis(ms);
    }
    config.validate().context("invalid run configuration")?;
    Ok(config)
}

fn init_tracing(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn resolve_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
