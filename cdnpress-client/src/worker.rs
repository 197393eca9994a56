//! The request loop of a single worker.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::allocator::UrlAllocator;
use crate::config::ClientConfig;
use crate::driver::{self, Exchange, FaultPlan, FaultPoint, Outcome};
use crate::error::DriverError;
use crate::gate::ConcurrencyGate;
use crate::limiter::RateLimiter;
use crate::stats::{MeasurementSender, RunCounters};

/// State shared by all workers of a run.
#[derive(Debug)]
pub(crate) struct Shared {
    pub config: Arc<ClientConfig>,
    pub allocator: UrlAllocator,
    pub limiter: RateLimiter,
    pub gate: ConcurrencyGate,
    pub counters: Arc<RunCounters>,
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl Shared {
    fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Resolves once the deadline elapses or the run is cancelled.
    async fn stopped(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep_until(self.deadline) => {}
        }
    }
}

/// A long running request loop.
#[derive(Debug)]
pub(crate) struct Worker {
    id: usize,
    shared: Arc<Shared>,
    stats: MeasurementSender,
    client: reqwest::Client,
    rng: SmallRng,
}

impl Worker {
    pub fn new(
        id: usize,
        shared: Arc<Shared>,
        stats: MeasurementSender,
    ) -> reqwest::Result<Self> {
        let client = driver::build_client(&shared.config)?;
        Ok(Self {
            id,
            shared,
            stats,
            client,
            rng: SmallRng::from_rng(&mut rand::rng()),
        })
    }

    /// Sends requests until the deadline elapses or the run is cancelled.
    ///
    /// Returns the first error unless errors are ignored.
    pub async fn run(mut self) -> Result<(), DriverError> {
        let shared = Arc::clone(&self.shared);
        let config = &shared.config;

        while !shared.is_done() {
            let admitted = async {
                shared.limiter.wait().await;
                shared.gate.acquire().await
            };
            // Released at the end of the iteration on every path, including errors.
            let _permit = tokio::select! {
                biased;
                _ = shared.stopped() => break,
                permit = admitted => permit,
            };
            // A token that became due right at the deadline must not start another request.
            if shared.is_done() {
                break;
            }

            let target = shared.allocator.next(&mut self.rng);
            let size = config.resp_size.sample(config.disk_ratio, &mut self.rng);
            tracing::trace!(
                worker = self.id,
                kind = ?target.kind,
                index = target.index,
                url = %target.url,
                size,
                "sending request"
            );
            let exchange = Exchange::new(self.id, target.url, size, &mut self.rng);
            let plan = FaultPlan::sample(&config.faults, &mut self.rng);

            let result =
                driver::execute(&self.client, config, &exchange, plan, &mut self.rng).await;
            match result {
                Ok(Outcome::Completed(completed)) => {
                    let measurement = completed.measurement;
                    shared
                        .counters
                        .record_success(completed.bytes, measurement.cache_hit);
                    self.stats.send(measurement);

                    if completed.close_connection {
                        tracing::trace!(worker = self.id, "discarding connection after full read");
                        self.reconnect();
                    }
                }
                Ok(Outcome::Aborted(point)) => {
                    shared.counters.record_abort();
                    match point {
                        FaultPoint::SendClose => tracing::debug!(
                            url = %exchange.url,
                            trace_id = %exchange.trace_id,
                            "closed connection before reading the body"
                        ),
                        FaultPoint::RecvHalfClose { read } => tracing::debug!(
                            url = %exchange.url,
                            trace_id = %exchange.trace_id,
                            read,
                            "closed connection while reading the body"
                        ),
                    }
                }
                Err(error) => {
                    shared.counters.record_failure();
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        worker = self.id,
                        trace_id = %exchange.trace_id,
                        "request failed"
                    );
                    if !config.ignore_errors {
                        return Err(error);
                    }
                }
            }
        }

        Ok(())
    }

    /// Replaces the HTTP client, dropping all pooled connections.
    fn reconnect(&mut self) {
        match driver::build_client(&self.shared.config) {
            Ok(client) => self.client = client,
            Err(error) => tracing::warn!(
                error = &error as &dyn std::error::Error,
                "failed to rebuild HTTP client, keeping the current one"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use cdnpress_test::server::TestServer;

    use super::*;
    use crate::config::FaultProbabilities;
    use crate::stats::{Collector, RunInfo};

    fn shared(config: ClientConfig, run_for: Duration) -> Arc<Shared> {
        Arc::new(Shared {
            allocator: UrlAllocator::new(config.base_url(), config.url_count, config.hit_ratio),
            limiter: RateLimiter::new(config.qps, config.burst),
            gate: ConcurrencyGate::new(config.conns),
            counters: Arc::new(RunCounters::default()),
            deadline: Instant::now() + run_for,
            cancel: CancellationToken::new(),
            config: Arc::new(config),
        })
    }

    fn sender(shared: &Shared) -> MeasurementSender {
        let (_collector, sender) = Collector::new(
            1024,
            Duration::from_secs(1),
            Arc::clone(&shared.counters),
            RunInfo {
                target: shared.config.base_url(),
                resp_size: shared.config.resp_size,
                disk_ratio: shared.config.disk_ratio,
            },
        );
        sender
    }

    async fn run_worker(config: ClientConfig) -> (Arc<Shared>, Result<(), DriverError>) {
        let shared = shared(config, Duration::from_millis(200));
        let worker = Worker::new(0, Arc::clone(&shared), sender(&shared)).unwrap();
        let result = worker.run().await;
        (shared, result)
    }

    #[tokio::test]
    async fn gate_is_idle_after_every_outcome() {
        let server = TestServer::new().await;
        let base = ClientConfig {
            addr: Some(server.addr()),
            conns: 1,
            qps: 0,
            ..Default::default()
        };

        let configs = [
            base.clone(),
            ClientConfig {
                faults: FaultProbabilities {
                    send_close: 1.0,
                    ..Default::default()
                },
                ..base.clone()
            },
            ClientConfig {
                faults: FaultProbabilities {
                    recv_half_close: 1.0,
                    ..Default::default()
                },
                ..base.clone()
            },
            ClientConfig {
                faults: FaultProbabilities {
                    recv_full_close: 1.0,
                    ..Default::default()
                },
                ..base.clone()
            },
            ClientConfig {
                corrupt_checksum: true,
                ..base.clone()
            },
            ClientConfig {
                corrupt_checksum: true,
                ignore_errors: true,
                ..base.clone()
            },
        ];

        for config in configs {
            let (shared, _) = run_worker(config).await;
            assert_eq!(shared.gate.in_use(), 0);
            assert!(shared.counters.snapshot().total > 0);
        }
    }

    #[tokio::test]
    async fn status_failure_releases_gate() {
        let server = TestServer::with_router(
            axum::Router::new().fallback(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        )
        .await;
        let config = ClientConfig {
            addr: Some(server.addr()),
            conns: 1,
            ..Default::default()
        };

        let (shared, result) = run_worker(config).await;
        assert!(matches!(result, Err(DriverError::Status { .. })));
        assert_eq!(shared.gate.in_use(), 0);

        let counters = shared.counters.snapshot();
        assert_eq!(counters.total, 1);
        assert_eq!(counters.failed, 1);
    }

    #[tokio::test]
    async fn transport_failure_releases_gate() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig {
            addr: Some(addr.to_string()),
            conns: 1,
            ..Default::default()
        };

        let (shared, result) = run_worker(config).await;
        assert!(matches!(result, Err(DriverError::Transport { .. })));
        assert_eq!(shared.gate.in_use(), 0);
    }

    #[tokio::test]
    async fn cancelled_worker_stops() {
        let server = TestServer::new().await;
        let config = ClientConfig {
            addr: Some(server.addr()),
            conns: 1,
            ..Default::default()
        };

        let shared = shared(config, Duration::from_secs(60));
        shared.cancel.cancel();
        let worker = Worker::new(0, Arc::clone(&shared), sender(&shared)).unwrap();

        worker.run().await.unwrap();
        assert_eq!(shared.counters.snapshot().total, 0);
    }

    #[tokio::test]
    async fn deadline_interrupts_rate_limit_wait() {
        let server = TestServer::new().await;
        let config = ClientConfig {
            addr: Some(server.addr()),
            conns: 1,
            qps: 1,
            ..Default::default()
        };

        // The first token is free, the second one is only due after the deadline.
        let shared = shared(config, Duration::from_millis(300));
        let worker = Worker::new(0, Arc::clone(&shared), sender(&shared)).unwrap();

        let start = Instant::now();
        worker.run().await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(900), "{:?}", start.elapsed());
        assert_eq!(shared.counters.snapshot().total, 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_rate_limit_wait() {
        let server = TestServer::new().await;
        let config = ClientConfig {
            addr: Some(server.addr()),
            conns: 1,
            qps: 1,
            ..Default::default()
        };

        let shared = shared(config, Duration::from_secs(60));
        let worker = Worker::new(0, Arc::clone(&shared), sender(&shared)).unwrap();
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let cancelled_at = Instant::now();
        shared.cancel.cancel();

        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_millis(500));
        assert_eq!(shared.counters.snapshot().total, 1);
    }

    #[tokio::test]
    async fn waiting_worker_does_not_hold_gate_slot() {
        let server = TestServer::new().await;
        let config = ClientConfig {
            addr: Some(server.addr()),
            conns: 1,
            qps: 1,
            ..Default::default()
        };

        let shared = shared(config, Duration::from_secs(60));
        let worker = Worker::new(0, Arc::clone(&shared), sender(&shared)).unwrap();
        let handle = tokio::spawn(worker.run());

        // After the first request, the worker sits in the rate limiter for about a second.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(shared.counters.snapshot().total, 1);
        assert_eq!(shared.gate.in_use(), 0);

        shared.cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
