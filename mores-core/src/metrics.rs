//! Runtime counters and tick-budget instrumentation.
//!
//! Counters are lock-free `AtomicU64`s bumped from the tick's serial phase
//! and read on export. The tick monitor keeps a ring buffer of recent tick
//! timings behind a `parking_lot::Mutex`.
//!
//! Not to be confused with authored metrics ([`crate::definition::MetricDefinition`]);
//! this module measures the engine itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::effects::EffectOutcome;
use crate::evaluator::EvaluationReport;

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Atomic engine counters.
#[derive(Debug)]
pub struct EngineCounters {
    /// Ticks completed.
    pub ticks: AtomicU64,
    /// Observations accepted by at least one metric.
    pub observations: AtomicU64,
    /// Observations no tracked metric took (untracked or LOD-suppressed).
    pub observations_ignored: AtomicU64,
    /// Samples flushed.
    pub samples: AtomicU64,
    /// Samples that ran the evaluator.
    pub evaluations: AtomicU64,
    /// Probability rolls.
    pub rolls: AtomicU64,
    /// Rules fired.
    pub rules_fired: AtomicU64,
    /// Rules skipped by cooldown.
    pub rules_cooling: AtomicU64,
    /// Effects that changed state or dispatched a message.
    pub effects_applied: AtomicU64,
    /// Effects that missed their target.
    pub effects_missed: AtomicU64,
}

impl EngineCounters {
    /// Zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            observations: AtomicU64::new(0),
            observations_ignored: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            evaluations: AtomicU64::new(0),
            rolls: AtomicU64::new(0),
            rules_fired: AtomicU64::new(0),
            rules_cooling: AtomicU64::new(0),
            effects_applied: AtomicU64::new(0),
            effects_missed: AtomicU64::new(0),
        }
    }

    /// Fold an evaluation report in.
    pub fn record_report(&self, report: &EvaluationReport) {
        self.evaluations.fetch_add(report.samples, Ordering::Relaxed);
        self.rolls.fetch_add(report.rolled, Ordering::Relaxed);
        self.rules_fired.fetch_add(report.fired, Ordering::Relaxed);
        self.rules_cooling.fetch_add(report.cooling, Ordering::Relaxed);
    }

    /// Count one effect outcome.
    pub fn record_outcome(&self, outcome: EffectOutcome) {
        if outcome.is_applied() {
            self.effects_applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.effects_missed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            observations: self.observations.load(Ordering::Relaxed),
            observations_ignored: self.observations_ignored.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            rolls: self.rolls.load(Ordering::Relaxed),
            rules_fired: self.rules_fired.load(Ordering::Relaxed),
            rules_cooling: self.rules_cooling.load(Ordering::Relaxed),
            effects_applied: self.effects_applied.load(Ordering::Relaxed),
            effects_missed: self.effects_missed.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter values at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Ticks completed.
    pub ticks: u64,
    /// Observations taken.
    pub observations: u64,
    /// Observations ignored.
    pub observations_ignored: u64,
    /// Samples flushed.
    pub samples: u64,
    /// Evaluator runs.
    pub evaluations: u64,
    /// Probability rolls.
    pub rolls: u64,
    /// Rules fired.
    pub rules_fired: u64,
    /// Cooldown skips.
    pub rules_cooling: u64,
    /// Effects applied.
    pub effects_applied: u64,
    /// Effects missed.
    pub effects_missed: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus text exposition.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows: [(&str, &str, u64); 10] = [
            ("mores_ticks_total", "Ticks completed", self.ticks),
            ("mores_observations_total", "Observations taken by a metric", self.observations),
            ("mores_observations_ignored_total", "Observations no metric took", self.observations_ignored),
            ("mores_samples_total", "Metric samples flushed", self.samples),
            ("mores_evaluations_total", "Samples evaluated against rules", self.evaluations),
            ("mores_rolls_total", "Rule probability rolls", self.rolls),
            ("mores_rules_fired_total", "Rules fired", self.rules_fired),
            ("mores_rules_cooling_total", "Rules skipped by cooldown", self.rules_cooling),
            ("mores_effects_applied_total", "Effects applied", self.effects_applied),
            ("mores_effects_missed_total", "Effects that missed their target", self.effects_missed),
        ];
        let mut out = String::with_capacity(rows.len() * 96);
        for (name, help, value) in rows {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tick Budget Monitor
// ---------------------------------------------------------------------------

const HISTORY_LEN: usize = 256;

/// Tracks wall-clock time per simulation tick against a budget.
///
/// ```rust
/// # use mores_core::metrics::TickBudgetMonitor;
/// let monitor = TickBudgetMonitor::new(2.0);
/// {
///     let _guard = monitor.begin_tick();
///     // ... tick work ...
/// }
/// assert_eq!(monitor.tick_count(), 1);
/// ```
#[derive(Debug)]
pub struct TickBudgetMonitor {
    budget_ms: f64,
    history: Mutex<TickHistory>,
}

#[derive(Debug)]
struct TickHistory {
    timings: Vec<f64>,
    write_idx: usize,
    count: u64,
    last_over_budget: bool,
}

impl TickBudgetMonitor {
    /// Monitor with `budget_ms` per tick.
    #[must_use]
    pub fn new(budget_ms: f64) -> Self {
        Self {
            budget_ms,
            history: Mutex::new(TickHistory {
                timings: vec![0.0; HISTORY_LEN],
                write_idx: 0,
                count: 0,
                last_over_budget: false,
            }),
        }
    }

    /// Start timing a tick; the guard records on drop.
    pub fn begin_tick(&self) -> TickGuard<'_> {
        TickGuard {
            monitor: self,
            start: Instant::now(),
        }
    }

    /// Record a timing in milliseconds. Returns whether it exceeded the budget.
    pub fn record(&self, ms: f64) -> bool {
        let mut h = self.history.lock();
        let idx = h.write_idx;
        h.timings[idx] = ms;
        h.write_idx = (idx + 1) % HISTORY_LEN;
        h.count += 1;
        h.last_over_budget = ms > self.budget_ms;
        h.last_over_budget
    }

    /// Most recent timing.
    #[must_use]
    pub fn last_tick_ms(&self) -> f64 {
        let h = self.history.lock();
        if h.count == 0 {
            return 0.0;
        }
        h.timings[(h.write_idx + HISTORY_LEN - 1) % HISTORY_LEN]
    }

    /// Whether the last tick exceeded the budget.
    #[must_use]
    pub fn is_over_budget(&self) -> bool {
        self.history.lock().last_over_budget
    }

    /// Ticks recorded.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.history.lock().count
    }

    /// Budget in milliseconds.
    #[must_use]
    pub fn budget_ms(&self) -> f64 {
        self.budget_ms
    }

    /// Percentiles over the retained history.
    #[must_use]
    pub fn percentiles(&self) -> TickPercentiles {
        let h = self.history.lock();
        let n = (h.count as usize).min(HISTORY_LEN);
        if n == 0 {
            return TickPercentiles::default();
        }
        let mut sorted = h.timings[..n].to_vec();
        drop(h);
        sorted.sort_by(f64::total_cmp);
        let at = |q: f64| sorted[((n as f64 * q) as usize).min(n - 1)];
        TickPercentiles {
            p50: at(0.5),
            p95: at(0.95),
            p99: at(0.99),
            max: sorted[n - 1],
            over_budget_ratio: sorted.iter().filter(|&&t| t > self.budget_ms).count() as f64
                / n as f64,
        }
    }
}

/// Records elapsed time into its monitor when dropped.
#[derive(Debug)]
pub struct TickGuard<'a> {
    monitor: &'a TickBudgetMonitor,
    start: Instant,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.monitor.record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

/// Tick timing percentiles in milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickPercentiles {
    /// Median.
    pub p50: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
    /// Slowest tick.
    pub max: f64,
    /// Share of ticks over budget, 0 to 1.
    pub over_budget_ratio: f64,
}

impl TickPercentiles {
    /// One-line summary.
    #[must_use]
    pub fn summary(&self, budget_ms: f64) -> String {
        format!(
            "P50={:.2}ms  P95={:.2}ms  P99={:.2}ms  Max={:.2}ms  Budget={budget_ms:.1}ms  \
             Over-budget={:.1}%",
            self.p50,
            self.p95,
            self.p99,
            self.max,
            self.over_budget_ratio * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Span names
// ---------------------------------------------------------------------------

/// Span names used with `tracing::span!`.
pub mod spans {
    /// Whole tick.
    pub const TICK: &str = "mores::tick";
    /// Draining the signal queue into observations.
    pub const OBSERVE: &str = "mores::observe";
    /// Parallel sample + evaluate phase.
    pub const EVALUATE: &str = "mores::evaluate";
    /// Serial effect application phase.
    pub const APPLY: &str = "mores::apply";
    /// Library compilation.
    pub const COMPILE: &str = "mores::compile";
    /// Baked library load.
    pub const BAKE_LOAD: &str = "mores::bake::load";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_fold_reports() {
        let c = EngineCounters::new();
        c.record_report(&EvaluationReport {
            samples: 3,
            rolled: 5,
            fired: 2,
            cooling: 1,
            ..EvaluationReport::default()
        });
        c.record_outcome(EffectOutcome::Missed);
        c.record_outcome(EffectOutcome::Dispatched);
        let snap = c.snapshot();
        assert_eq!(snap.evaluations, 3);
        assert_eq!(snap.rules_fired, 2);
        assert_eq!(snap.effects_applied, 1);
        assert_eq!(snap.effects_missed, 1);
    }

    #[test]
    fn prometheus_text() {
        let c = EngineCounters::new();
        c.ticks.fetch_add(42, Ordering::Relaxed);
        let text = c.snapshot().to_prometheus();
        assert!(text.contains("mores_ticks_total 42"));
        assert!(text.contains("# TYPE mores_rolls_total counter"));
        assert_eq!(text.matches("# HELP").count(), 10);
    }

    #[test]
    fn monitor_records_and_flags() {
        let m = TickBudgetMonitor::new(2.0);
        assert!(!m.record(0.5));
        assert!(m.record(3.0));
        assert!(m.is_over_budget());
        assert_eq!(m.tick_count(), 2);
        assert!((m.last_tick_ms() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn ring_buffer_wraps() {
        let m = TickBudgetMonitor::new(2.0);
        for i in 0..(HISTORY_LEN + 10) {
            m.record(i as f64 * 0.001);
        }
        assert_eq!(m.tick_count(), (HISTORY_LEN + 10) as u64);
        let p = m.percentiles();
        assert!(p.p50 <= p.p95 && p.p95 <= p.p99 && p.p99 <= p.max);
        assert!(p.summary(2.0).contains("Budget=2.0ms"));
    }

    #[test]
    fn guard_records() {
        let m = TickBudgetMonitor::new(100.0);
        drop(m.begin_tick());
        assert_eq!(m.tick_count(), 1);
    }
}
