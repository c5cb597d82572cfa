//! Entrypoint: parse CLI flags, load config, stand up logging and the
//! PID file, connect to the database, spawn the worker pool, install
//! signal handling, and run the Producer loop on the main thread until
//! shutdown.

use std::sync::Arc;
use std::thread::JoinHandle;

use clap::Parser;
use log::{error, info};

use rteval_parserd::arbiter::ReportDirArbiter;
use rteval_parserd::cli::Cli;
use rteval_parserd::config::DaemonConfig;
use rteval_parserd::db::{DbGatewayFactory, PgGatewayFactory};
use rteval_parserd::error::{DaemonError, InitError};
use rteval_parserd::extract::{LineReportExtractor, ReportExtractor};
use rteval_parserd::logging;
use rteval_parserd::pidfile::PidFileGuard;
use rteval_parserd::producer::{self, Producer, ProducerOutcome};
use rteval_parserd::queue::JobQueue;
use rteval_parserd::shutdown::ShutdownFlag;
use rteval_parserd::transform::{XsltProcTransformer, XsltTransformer};
use rteval_parserd::worker::WorkerContext;

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            error!("{err}");
            err.exit_code()
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<(), DaemonError> {
    let cli = Cli::parse();
    let config = DaemonConfig::load(&cli).map_err(InitError::from)?;

    logging::init(&config.log, config.loglevel).map_err(InitError::from)?;
    info!(
        "rteval-parserd starting: {} worker thread(s), reportdir={}",
        config.num_threads,
        config.reportdir.display()
    );

    let _pidfile = PidFileGuard::create(&config.pidfile).map_err(InitError::from)?;

    let factory = PgGatewayFactory::new(config.database_url.clone());
    let producer_session = factory.connect().map_err(InitError::from)?;

    let queue = Arc::new(JobQueue::with_capacity(rteval_parserd::queue::DEFAULT_CAPACITY));
    let shutdown = ShutdownFlag::new();
    let arbiter = Arc::new(ReportDirArbiter::new());
    let xslt: Arc<dyn XsltTransformer> = Arc::new(XsltProcTransformer::new(&config.xsltpath));
    let extractor: Arc<dyn ReportExtractor> = Arc::new(LineReportExtractor);

    install_signal_handlers(shutdown.clone()).map_err(InitError::from)?;

    let mut workers = Vec::with_capacity(config.num_threads);
    for worker_id in 0..config.num_threads {
        let db = factory.connect().map_err(|err| {
            shutdown.trigger();
            DaemonError::WorkerStart {
                worker_id,
                reason: err.to_string(),
            }
        })?;
        let context = WorkerContext {
            worker_id,
            db,
            xslt: xslt.clone(),
            extractor: extractor.clone(),
            arbiter: arbiter.clone(),
            report_root: config.reportdir.clone(),
            queue: queue.clone(),
            shutdown: shutdown.clone(),
        };
        let handle: JoinHandle<()> = std::thread::Builder::new()
            .name(format!("rteval-worker-{worker_id}"))
            .spawn(move || context.run())
            .map_err(|err| {
                shutdown.trigger();
                DaemonError::WorkerStart {
                    worker_id,
                    reason: err.to_string(),
                }
            })?;
        workers.push(handle);
    }

    let mut producer = Producer::new(producer_session, queue, shutdown.clone());
    let outcome = producer.run();
    producer::log_outcome(&outcome);

    // Teardown order: stop new claims (producer has already returned),
    // wake workers via the queue's shutdown channel, join them, then
    // drop the remaining session/XSLT handles as this function returns.
    shutdown.trigger();
    for (worker_id, handle) in workers.into_iter().enumerate() {
        if handle.join().is_err() {
            error!("worker {worker_id} panicked");
        }
    }

    match outcome {
        ProducerOutcome::ShutdownRequested => Ok(()),
        ProducerOutcome::Fatal(reason) => Err(DaemonError::ProducerFatal(reason)),
    }
}

/// Spawns a dedicated thread that blocks on SIGINT/SIGTERM delivery and
/// triggers the shutdown flag.
///
/// `signal_hook::low_level::register`'s closure runs inside actual signal
/// handler context, where ordinary logging and lock acquisition (both of
/// which `ShutdownFlag::trigger` does) are not async-signal-safe. Routing
/// delivery through `Signals::forever` on its own thread keeps the only
/// code that runs in handler context inside signal-hook itself, and lets
/// this thread log and trigger shutdown the same way any other thread
/// does.
fn install_signal_handlers(shutdown: Arc<ShutdownFlag>) -> Result<(), std::io::Error> {
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])?;
    std::thread::Builder::new()
        .name("rteval-signals".into())
        .spawn(move || {
            for signal in signals.forever() {
                if shutdown.is_set() {
                    info!("signal {signal} received while shutdown already in progress");
                } else {
                    info!("signal {signal} received, beginning graceful shutdown");
                }
                shutdown.trigger();
            }
        })?;
    Ok(())
}
