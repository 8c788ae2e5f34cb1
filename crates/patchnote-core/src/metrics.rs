//! Per-batch counters.
//!
//! A fresh [`BatchMetrics`] is created for every batch, threaded through the
//! pipeline by reference, and frozen into the report as a
//! [`MetricsSnapshot`]. There is no process-wide state.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
  CandidatesFetched,
  FetchFailures,
  FetchTimeouts,
  FingerprintsComputed,
  SummariesProduced,
  SummariesDegraded,
  /// A commit found the fingerprint or day already taken by another writer.
  LostRaces,
}

#[derive(Debug, Default)]
pub struct BatchMetrics {
  candidates_fetched:    AtomicU64,
  fetch_failures:        AtomicU64,
  fetch_timeouts:        AtomicU64,
  fingerprints_computed: AtomicU64,
  summaries_produced:    AtomicU64,
  summaries_degraded:    AtomicU64,
  lost_races:            AtomicU64,
}

impl BatchMetrics {
  pub fn new() -> Self { Self::default() }

  pub fn incr(&self, counter: Counter) {
    self.slot(counter).fetch_add(1, Ordering::Relaxed);
  }

  pub fn get(&self, counter: Counter) -> u64 { self.slot(counter).load(Ordering::Relaxed) }

  fn slot(&self, counter: Counter) -> &AtomicU64 {
    match counter {
      Counter::CandidatesFetched => &self.candidates_fetched,
      Counter::FetchFailures => &self.fetch_failures,
      Counter::FetchTimeouts => &self.fetch_timeouts,
      Counter::FingerprintsComputed => &self.fingerprints_computed,
      Counter::SummariesProduced => &self.summaries_produced,
      Counter::SummariesDegraded => &self.summaries_degraded,
      Counter::LostRaces => &self.lost_races,
    }
  }

  pub fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      candidates_fetched:    self.get(Counter::CandidatesFetched),
      fetch_failures:        self.get(Counter::FetchFailures),
      fetch_timeouts:        self.get(Counter::FetchTimeouts),
      fingerprints_computed: self.get(Counter::FingerprintsComputed),
      summaries_produced:    self.get(Counter::SummariesProduced),
      summaries_degraded:    self.get(Counter::SummariesDegraded),
      lost_races:            self.get(Counter::LostRaces),
    }
  }
}

/// Frozen counter values, as reported in a batch report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
  pub candidates_fetched:    u64,
  /// Includes timeouts.
  pub fetch_failures:        u64,
  pub fetch_timeouts:        u64,
  pub fingerprints_computed: u64,
  pub summaries_produced:    u64,
  pub summaries_degraded:    u64,
  pub lost_races:            u64,
}
