//! Run a fixed pool of workers against the target and report statistics.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use yansi::Paint;

use crate::allocator::UrlAllocator;
use crate::config::ClientConfig;
use crate::error::{DriverError, RunError};
use crate::gate::ConcurrencyGate;
use crate::limiter::RateLimiter;
use crate::stats::{Collector, RunCounters, RunInfo, Summary};
use crate::worker::{Shared, Worker};

/// Runs the load generator until the configured duration elapses or `cancel` is triggered.
///
/// Spawns `conns` workers and a single statistics collector. The collector prints a report every
/// `ticker_dump` and the final summary once all workers have returned.
///
/// Unless errors are ignored, the first failed request aborts all workers. The summary is still
/// printed in that case and the failure is returned as [`RunError::Aborted`].
pub async fn run(config: ClientConfig, cancel: CancellationToken) -> Result<Summary, RunError> {
    config.validate()?;

    if !config.defer_start.is_zero() {
        tracing::info!("deferring start by {:?}", config.defer_start);
        tokio::select! {
            _ = tokio::time::sleep(config.defer_start) => {}
            _ = cancel.cancelled() => {}
        }
    }

    let config = Arc::new(config);
    let target = config.base_url();
    let counters = Arc::new(RunCounters::default());

    println!(
        "{} {} (conns: {}, qps: {}, duration: {:?}, size: {}, hit ratio: {})",
        "## Running against".bold(),
        target.as_str().bold().blue(),
        config.conns,
        config.qps,
        config.duration,
        config.resp_size,
        config.hit_ratio,
    );

    let (collector, sender) = Collector::new(
        config.stats_capacity,
        config.ticker_dump,
        Arc::clone(&counters),
        RunInfo {
            target: target.clone(),
            resp_size: config.resp_size,
            disk_ratio: config.disk_ratio,
        },
    );
    let collector = tokio::spawn(collector.run());

    let shared = Arc::new(Shared {
        allocator: UrlAllocator::new(target, config.url_count, config.hit_ratio),
        limiter: RateLimiter::new(config.qps, config.burst),
        gate: ConcurrencyGate::new(config.conns),
        counters,
        deadline: Instant::now() + config.duration,
        cancel,
        config: Arc::clone(&config),
    });

    let mut workers = JoinSet::new();
    for id in 0..config.conns {
        let worker = Worker::new(id, Arc::clone(&shared), sender.clone())?;
        workers.spawn(worker.run());
    }
    // Only the workers hold senders now, so the collector stops once they are all gone.
    drop(sender);

    let failure = join_workers(&mut workers).await;
    // Every exchange has finished before the final report is printed.
    shared.gate.wait_idle().await;
    tracing::debug!(issued = shared.allocator.issued(), "all workers stopped");

    let summary = match collector.await {
        Ok(summary) => summary,
        Err(error) => std::panic::resume_unwind(error.into_panic()),
    };

    match failure {
        Some(error) => Err(RunError::Aborted(error)),
        None => Ok(summary),
    }
}

/// Waits for all workers, aborting the remaining ones after the first failure.
async fn join_workers(workers: &mut JoinSet<Result<(), DriverError>>) -> Option<DriverError> {
    let mut failure = None;

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                if failure.is_none() {
                    tracing::error!("aborting run after failed request");
                    workers.abort_all();
                    failure = Some(error);
                }
            }
            Err(error) if error.is_cancelled() => {}
            Err(error) => std::panic::resume_unwind(error.into_panic()),
        }
    }

    failure
}
