//! Build and customization timers. The factory reports two families of timer
//! keys: `<BUILD> <simple-name>` for engine construction and
//! `<CUSTOMIZE> <name> <WITH> <customizer>` for each applied customizer.

use crate::customizer::Customizer;
use crate::name::Name;
use fxhash::FxHashMap;
use itertools::Itertools;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Sink for resolution timings. Implementations must be cheap to call; the
/// resolution engine reports every build and customization through it.
#[cfg_attr(test, automock)]
pub trait MetricsSink: Send + Sync {
    fn record_timer(&self, key: &str, duration: Duration);
}

pub type MetricsSinkPtr = Arc<dyn MetricsSink>;

/// Aggregated observations for a single timer key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub count: u64,
    pub total: Duration,
}

/// Default sink storing aggregated timers in memory, used when no sink is
/// supplied to the builder.
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    timers: Mutex<FxHashMap<String, TimerStats>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timer(&self, key: &str) -> Option<TimerStats> {
        self.timers.lock().get(key).copied()
    }

    /// All recorded timers, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, TimerStats)> {
        self.timers
            .lock()
            .iter()
            .map(|(key, stats)| (key.clone(), *stats))
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .collect_vec()
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record_timer(&self, key: &str, duration: Duration) {
        let mut timers = self.timers.lock();
        let stats = timers.entry(key.to_string()).or_default();
        stats.count += 1;
        stats.total += duration;
    }
}

pub(crate) fn build_timer_key(name: &Name) -> String {
    format!("<BUILD> {}", name.simple_type_name())
}

pub(crate) fn customize_timer_key(name: &Name, customizer: &dyn Customizer) -> String {
    format!("<CUSTOMIZE> {name} <WITH> {customizer:?}")
}

#[cfg(test)]
mod tests {
    use crate::metrics::{build_timer_key, InMemoryMetricsSink, MetricsSink};
    use crate::name::Name;
    use std::time::Duration;

    #[test]
    fn should_aggregate_observations_per_key() {
        let sink = InMemoryMetricsSink::new();
        sink.record_timer("<BUILD> String", Duration::from_millis(2));
        sink.record_timer("<BUILD> String", Duration::from_millis(3));
        sink.record_timer("<BUILD> i32", Duration::from_millis(1));

        let stats = sink.timer("<BUILD> String").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total, Duration::from_millis(5));
        assert_eq!(sink.snapshot().len(), 2);
    }

    #[test]
    fn should_use_simple_type_name_in_build_key() {
        let name = Name::of::<Vec<String>>("items");
        assert_eq!(build_timer_key(&name), "<BUILD> Vec");
    }
}
