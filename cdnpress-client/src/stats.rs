//! Run-wide counters and windowed latency statistics.
//!
//! Workers update the shared [`RunCounters`] directly and send one [`Measurement`] per completed
//! exchange to the [`Collector`]. The collector is the only owner of the [`WindowStats`]; it prints
//! a [`WindowReport`] on every tick and a [`Summary`] once all workers are done.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytesize::ByteSize;
use cdnpress_types::SizeSpec;
use tokio::sync::mpsc;
use tokio::time::Instant;
use yansi::Paint;

/// Timings of a single successful exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Measurement {
    /// Time until the response head was received.
    pub first_byte: Duration,
    /// Time until the full body was received.
    pub full_response: Duration,
    /// Whether the response was marked as a cache hit.
    pub cache_hit: bool,
}

/// Counters shared by all workers.
#[derive(Debug, Default)]
pub struct RunCounters {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    aborted: AtomicU64,
    bytes: AtomicU64,
    cache_hits: AtomicU64,
}

impl RunCounters {
    /// Records a successful exchange that transferred `bytes` body bytes.
    pub fn record_success(&self, bytes: u64, cache_hit: bool) {
        self.success.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed exchange.
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an exchange abandoned by fault injection.
    pub fn record_abort(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }
}

/// A copy of [`RunCounters`] at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    /// All finished exchanges.
    pub total: u64,
    /// Exchanges that completed and passed all checks.
    pub success: u64,
    /// Exchanges that failed.
    pub failed: u64,
    /// Exchanges abandoned by fault injection.
    pub aborted: u64,
    /// Body bytes of successful exchanges.
    pub bytes: u64,
    /// Successful exchanges marked as cache hits.
    pub cache_hits: u64,
}

/// Running min/sum/max of one latency.
#[derive(Clone, Copy, Debug, Default)]
struct LatencyWindow {
    min: Option<Duration>,
    max: Option<Duration>,
    sum: Duration,
}

impl LatencyWindow {
    fn record(&mut self, value: Duration) {
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
        self.max = Some(self.max.map_or(value, |max| max.max(value)));
        self.sum += value;
    }

    fn summarize(&self, count: u64) -> Option<LatencySummary> {
        let (min, max) = (self.min?, self.max?);
        if count == 0 {
            return None;
        }
        let avg = Duration::from_nanos((self.sum.as_nanos() / count as u128) as u64);
        Some(LatencySummary { min, avg, max })
    }
}

/// Min, average and max of one latency over a window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatencySummary {
    /// Smallest observed value.
    pub min: Duration,
    /// Integer mean of all values.
    pub avg: Duration,
    /// Largest observed value.
    pub max: Duration,
}

/// Accumulated measurements of the current reporting window.
#[derive(Debug, Default)]
pub struct WindowStats {
    count: u64,
    hits: u64,
    first_byte: LatencyWindow,
    full_response: LatencyWindow,
}

impl WindowStats {
    /// Adds a measurement to the window.
    pub fn record(&mut self, measurement: &Measurement) {
        self.count += 1;
        if measurement.cache_hit {
            self.hits += 1;
        }
        self.first_byte.record(measurement.first_byte);
        self.full_response.record(measurement.full_response);
    }

    /// Returns the number of measurements in the window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Computes the report for this window.
    pub fn report(&self, round: u64, elapsed: Duration, totals: CountersSnapshot) -> WindowReport {
        WindowReport {
            round,
            count: self.count,
            qps: rate(self.count as f64, elapsed.as_secs_f64()),
            hit_ratio: rate(self.hits as f64 * 100.0, self.count as f64),
            first_byte: self.first_byte.summarize(self.count),
            full_response: self.full_response.summarize(self.count),
            totals,
        }
    }

    /// Clears the window.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Divides, returning zero for a zero denominator.
fn rate(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Statistics of one reporting window.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowReport {
    /// Sequence number of the window, starting at 1.
    pub round: u64,
    /// Measurements received in this window.
    pub count: u64,
    /// Measurements per second in this window.
    pub qps: f64,
    /// Percentage of measurements marked as cache hits.
    pub hit_ratio: f64,
    /// Time to first byte, `None` for an empty window.
    pub first_byte: Option<LatencySummary>,
    /// Time to full response, `None` for an empty window.
    pub full_response: Option<LatencySummary>,
    /// Run-wide counters when the window closed.
    pub totals: CountersSnapshot,
}

struct Latency<'a>(&'a Option<LatencySummary>);

impl fmt::Display for Latency<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(s) => write!(f, "min {:.2?} / avg {:.2?} / max {:.2?}", s.min, s.avg, s.max),
            None => write!(f, "min - / avg - / max -"),
        }
    }
}

impl fmt::Display for WindowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let totals = &self.totals;
        writeln!(
            f,
            "#{}: {} responses, {:.2} qps, hit ratio {:.2}% (total {}, ok {}, failed {}, aborted {}, {})",
            self.round,
            self.count,
            self.qps,
            self.hit_ratio,
            totals.total,
            totals.success,
            totals.failed,
            totals.aborted,
            ByteSize::b(totals.bytes),
        )?;
        writeln!(f, "  first byte:    {}", Latency(&self.first_byte))?;
        write!(f, "  full response: {}", Latency(&self.full_response))
    }
}

/// Final statistics of a run, computed from the run-wide counters.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    /// The target base URL.
    pub target: String,
    /// The requested response sizes.
    pub resp_size: SizeSpec,
    /// Share of small responses for a split size.
    pub disk_ratio: f64,
    /// Final counter values.
    pub counters: CountersSnapshot,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

impl Summary {
    /// Finished exchanges per second.
    pub fn qps(&self) -> f64 {
        rate(self.counters.total as f64, self.elapsed.as_secs_f64())
    }

    /// Percentage of finished exchanges that succeeded.
    pub fn success_rate(&self) -> f64 {
        rate(
            self.counters.success as f64 * 100.0,
            self.counters.total as f64,
        )
    }

    /// Percentage of finished exchanges that were cache hits.
    pub fn hit_rate(&self) -> f64 {
        rate(
            self.counters.cache_hits as f64 * 100.0,
            self.counters.total as f64,
        )
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(f, "target:         {}", self.target)?;
        writeln!(
            f,
            "response size:  {} (small ratio {:.2})",
            self.resp_size, self.disk_ratio
        )?;
        writeln!(f, "requests:       {}", c.total)?;
        writeln!(f, "succeeded:      {}", c.success)?;
        writeln!(f, "failed:         {}", c.failed)?;
        writeln!(f, "aborted:        {}", c.aborted)?;
        writeln!(f, "cache hits:     {} ({:.2}%)", c.cache_hits, self.hit_rate())?;
        writeln!(f, "transferred:    {} ({} bytes)", ByteSize::b(c.bytes), c.bytes)?;
        writeln!(f, "qps:            {:.2}", self.qps())?;
        writeln!(f, "success rate:   {:.2}%", self.success_rate())?;
        write!(f, "elapsed:        {:.2}s", self.elapsed.as_secs_f64())
    }
}

/// Describes the run in the final summary.
#[derive(Clone, Debug)]
pub struct RunInfo {
    /// The target base URL.
    pub target: String,
    /// The requested response sizes.
    pub resp_size: SizeSpec,
    /// Share of small responses for a split size.
    pub disk_ratio: f64,
}

/// The single aggregator of per-request measurements.
#[derive(Debug)]
pub struct Collector {
    receiver: mpsc::Receiver<Measurement>,
    counters: Arc<RunCounters>,
    interval: Duration,
    info: RunInfo,
}

impl Collector {
    /// Creates a collector and the sender half of its bounded measurement channel.
    pub fn new(
        capacity: usize,
        interval: Duration,
        counters: Arc<RunCounters>,
        info: RunInfo,
    ) -> (Self, MeasurementSender) {
        let (sender, receiver) = mpsc::channel(capacity);
        let collector = Self {
            receiver,
            counters,
            interval,
            info,
        };
        (collector, MeasurementSender(sender))
    }

    /// Aggregates measurements until every sender has been dropped.
    ///
    /// Prints a report on every tick and the final summary at the end, which is also returned.
    pub async fn run(mut self) -> Summary {
        let start = Instant::now();
        let mut ticker = tokio::time::interval_at(start + self.interval, self.interval);
        let mut window = WindowStats::default();
        let mut window_start = start;
        let mut round = 0;

        loop {
            tokio::select! {
                measurement = self.receiver.recv() => match measurement {
                    Some(measurement) => window.record(&measurement),
                    None => break,
                },
                now = ticker.tick() => {
                    round += 1;
                    let report = window.report(round, now - window_start, self.counters.snapshot());
                    println!("{} {report}", "STATS".bold().blue());
                    window.reset();
                    window_start = now;
                }
            }
        }

        let summary = Summary {
            target: self.info.target,
            resp_size: self.info.resp_size,
            disk_ratio: self.info.disk_ratio,
            counters: self.counters.snapshot(),
            elapsed: start.elapsed(),
        };

        println!();
        println!("{}", "## SUMMARY".bold());
        println!("{summary}");
        summary
    }
}

/// Producer handle of the measurement channel.
///
/// Sending never blocks: when the channel is full, the measurement is dropped with a warning.
#[derive(Clone, Debug)]
pub struct MeasurementSender(mpsc::Sender<Measurement>);

impl MeasurementSender {
    /// Offers a measurement to the collector, returning `false` if it was dropped.
    pub fn send(&self, measurement: Measurement) -> bool {
        match self.0.try_send(measurement) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("statistics channel is full, dropping measurement");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn measurement(first_byte: u64, full_response: u64, cache_hit: bool) -> Measurement {
        Measurement {
            first_byte: ms(first_byte),
            full_response: ms(full_response),
            cache_hit,
        }
    }

    #[test]
    fn window_min_avg_max() {
        let mut window = WindowStats::default();
        window.record(&measurement(10, 40, true));
        window.record(&measurement(30, 20, false));
        window.record(&measurement(20, 60, false));
        window.record(&measurement(40, 80, true));

        let report = window.report(1, Duration::from_secs(2), CountersSnapshot::default());
        assert_eq!(report.count, 4);
        assert_eq!(report.qps, 2.0);
        assert_eq!(report.hit_ratio, 50.0);
        assert_eq!(
            report.first_byte,
            Some(LatencySummary {
                min: ms(10),
                avg: ms(25),
                max: ms(40)
            })
        );
        assert_eq!(
            report.full_response,
            Some(LatencySummary {
                min: ms(20),
                avg: ms(50),
                max: ms(80)
            })
        );
    }

    #[test]
    fn zero_duration_samples_are_legitimate() {
        let mut window = WindowStats::default();
        window.record(&measurement(0, 0, false));
        window.record(&measurement(5, 9, false));

        let report = window.report(1, Duration::from_secs(1), CountersSnapshot::default());
        let first_byte = report.first_byte.unwrap();
        assert_eq!(first_byte.min, Duration::ZERO);
        assert_eq!(first_byte.max, ms(5));
    }

    #[test]
    fn empty_window_has_placeholders() {
        let window = WindowStats::default();
        let report = window.report(3, Duration::ZERO, CountersSnapshot::default());

        assert_eq!(report.count, 0);
        assert_eq!(report.qps, 0.0);
        assert_eq!(report.hit_ratio, 0.0);
        assert_eq!(report.first_byte, None);

        let printed = report.to_string();
        assert!(printed.contains("#3: 0 responses"));
        assert!(printed.contains("min - / avg - / max -"));
    }

    #[test]
    fn reset_clears_window() {
        let mut window = WindowStats::default();
        window.record(&measurement(1, 2, true));
        window.reset();

        assert_eq!(window.count(), 0);
        let report = window.report(2, Duration::from_secs(1), CountersSnapshot::default());
        assert_eq!(report.full_response, None);
    }

    #[test]
    fn summary_rates_without_requests() {
        let summary = Summary {
            target: "http://localhost:8080".into(),
            resp_size: SizeSpec::Fixed(1024),
            disk_ratio: 0.5,
            counters: CountersSnapshot::default(),
            elapsed: Duration::ZERO,
        };

        assert_eq!(summary.qps(), 0.0);
        assert_eq!(summary.success_rate(), 0.0);
        assert!(summary.to_string().contains("requests:       0"));
    }

    #[test]
    fn counters_accumulate() {
        let counters = RunCounters::default();
        counters.record_success(100, true);
        counters.record_success(50, false);
        counters.record_failure();
        counters.record_abort();

        assert_eq!(
            counters.snapshot(),
            CountersSnapshot {
                total: 4,
                success: 2,
                failed: 1,
                aborted: 1,
                bytes: 150,
                cache_hits: 1,
            }
        );
    }

    #[tokio::test]
    async fn full_channel_drops_measurements() {
        let counters = Arc::new(RunCounters::default());
        let info = RunInfo {
            target: "http://localhost".into(),
            resp_size: SizeSpec::Fixed(1),
            disk_ratio: 0.5,
        };
        let (collector, sender) =
            Collector::new(2, Duration::from_secs(60), Arc::clone(&counters), info);

        assert!(sender.send(measurement(1, 1, false)));
        assert!(sender.send(measurement(1, 1, false)));
        assert!(!sender.send(measurement(1, 1, false)));

        drop(sender);
        let summary = collector.run().await;
        assert_eq!(summary.counters, CountersSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn collector_finishes_when_senders_drop() {
        let counters = Arc::new(RunCounters::default());
        let info = RunInfo {
            target: "http://localhost".into(),
            resp_size: SizeSpec::Fixed(1),
            disk_ratio: 0.5,
        };
        let (collector, sender) =
            Collector::new(16, Duration::from_millis(100), Arc::clone(&counters), info);
        let handle = tokio::spawn(collector.run());

        for _ in 0..3 {
            counters.record_success(10, false);
            sender.send(measurement(1, 2, false));
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        drop(sender);

        let summary = handle.await.unwrap();
        assert_eq!(summary.counters.success, 3);
        assert_eq!(summary.counters.bytes, 30);
    }
}
