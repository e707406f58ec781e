use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use corehttpd::acceptor;
use corehttpd::access_log::AccessLog;
use corehttpd::cache::FileCache;
use corehttpd::cli::Cli;
use corehttpd::config::Config;
use corehttpd::queue::ConnectionQueue;
use corehttpd::stats::StatsAggregator;
use corehttpd::worker::{self, ServerContext};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    if cli.daemon {
        tracing::warn!("-d/--daemon accepted for CLI compatibility but daemonization is not implemented");
    }

    ignore_sigpipe();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), corehttpd::StartupError> {
    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
        Config::default()
    };
    cli.apply(&mut config);

    tracing::info!(?config, "starting corehttpd");

    let listener = acceptor::bind(config.port)?;

    let access_log = AccessLog::open(&config.log_file).map_err(|source| corehttpd::StartupError::Log {
        path: config.log_file.clone(),
        source,
    })?;

    let ctx = Arc::new(ServerContext {
        cache: FileCache::new(config.cache_max_bytes()),
        queue: ConnectionQueue::new(config.max_queue_size),
        stats: StatsAggregator::new(),
        access_log,
        document_root: config.document_root.clone(),
        timeout_seconds: config.timeout_seconds,
    });

    register_shutdown_handler(ctx.clone());

    let workers = worker::spawn_workers(ctx.clone(), config.num_workers, config.threads_per_worker);
    tracing::info!(count = workers.len(), "worker pool started");

    acceptor::accept_loop(&listener, &ctx, &SHUTDOWN);

    ctx.queue.shutdown();
    for handle in workers {
        let _ = handle.join();
    }
    ctx.access_log.shutdown();

    Ok(())
}

fn register_shutdown_handler(ctx: Arc<ServerContext>) {
    let result = ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received");
        SHUTDOWN.store(true, Ordering::SeqCst);
        ctx.queue.shutdown();
    });
    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to install Ctrl+C handler");
    }
}

#[cfg(unix)]
fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
fn ignore_sigpipe() {}
