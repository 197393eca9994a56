//! Request targets simulating a cache population with a tunable hit ratio.
//!
//! The [`UrlAllocator`] grows a working set of URLs up to `url_count` entries. Each allocation
//! either re-requests a URL that was issued before (a simulated cache hit), issues a new URL, or,
//! once the working set is full, produces a URL that can never have been requested before.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

/// How a [`Target`] relates to previously issued URLs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TargetKind {
    /// The URL was issued before and is requested again.
    Reuse,
    /// The URL extends the working set.
    Fresh,
    /// The working set is full; this URL was never issued and never will be again.
    Miss,
}

/// A single request target produced by the [`UrlAllocator`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Target {
    /// The full URL to request.
    pub url: String,
    /// Whether this URL was reused, freshly issued or a guaranteed miss.
    pub kind: TargetKind,
    /// The working-set index for reused and fresh URLs.
    pub index: Option<u64>,
}

/// Produces request targets with a configurable probability of hitting an already issued URL.
///
/// Issued indices are zero-based and dense: after `n` fresh allocations, exactly the indices
/// `0..n` have been handed out. The allocator is shared between all workers.
pub struct UrlAllocator {
    base: String,
    url_count: u64,
    hit_ratio: f64,
    /// Number of URLs issued so far, which is also the next index to issue.
    issued: AtomicU64,
    /// Sequence that keeps guaranteed-miss URLs unique across workers.
    not_hit: AtomicU64,
}

impl UrlAllocator {
    /// Creates an allocator for URLs below `base`.
    pub fn new(base: impl Into<String>, url_count: u64, hit_ratio: f64) -> Self {
        let base = base.into().trim_end_matches('/').to_owned();
        Self {
            base,
            url_count,
            hit_ratio,
            issued: AtomicU64::new(0),
            not_hit: AtomicU64::new(0),
        }
    }

    /// Returns the number of URLs issued so far.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Acquire)
    }

    /// Selects the next request target.
    pub fn next<R: Rng + ?Sized>(&self, rng: &mut R) -> Target {
        let issued = self.issued();
        if issued > 0 && rng.random::<f64>() < self.hit_ratio {
            let index = rng.random_range(0..issued);
            return self.indexed(index, TargetKind::Reuse);
        }

        // Claim the next index without ever overshooting the population size.
        let claimed = self
            .issued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.url_count).then_some(current + 1)
            });

        match claimed {
            Ok(index) => self.indexed(index, TargetKind::Fresh),
            Err(_) => self.miss(rng),
        }
    }

    fn indexed(&self, index: u64, kind: TargetKind) -> Target {
        Target {
            url: format!("{}/path{index}.js", self.base),
            kind,
            index: Some(index),
        }
    }

    fn miss<R: Rng + ?Sized>(&self, rng: &mut R) -> Target {
        let bucket = rng.random_range(0..self.url_count.saturating_mul(2).max(1));
        let sequence = self.not_hit.fetch_add(1, Ordering::Relaxed) + 1;
        Target {
            url: format!("{}/path{bucket}_nocache_{sequence}.js", self.base),
            kind: TargetKind::Miss,
            index: None,
        }
    }
}

impl fmt::Debug for UrlAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlAllocator")
            .field("base", &self.base)
            .field("url_count", &self.url_count)
            .field("hit_ratio", &self.hit_ratio)
            .field("issued", &self.issued())
            .finish()
    }
}
