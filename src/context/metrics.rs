use std::time::Duration;

use chrono::{DateTime, Utc};

use super::snapshot::{CumulativeSnapshot, MetricsSnapshot, TimerEntrySnapshot};

/// Percentage value carried by timer entries until the operation terminates
/// and the real total is known.
pub(crate) const PERCENTAGE_UNSET: f64 = -1.0;

#[derive(Debug, Clone)]
struct TimerEvent {
    name: String,
    started_at: DateTime<Utc>,
    duration: Duration,
    percentage_of_total: f64,
}

#[derive(Debug, Clone)]
struct CumulativeTimer {
    name: String,
    event_count: u64,
    total_duration: Duration,
    total_percentage_of_total: f64,
}

/// Discrete timer events plus a cumulative-by-name aggregation.
///
/// Percentages stay at the sentinel until `finalize` back-fills them in one
/// pass at operation termination; the pass runs once, so events recorded
/// afterwards keep the sentinel and the cumulative order is not re-sorted.
#[derive(Debug, Clone)]
pub(crate) struct OperationMetrics {
    events: Vec<TimerEvent>,
    cumulative: Vec<CumulativeTimer>,
    finalized: bool,
}

impl OperationMetrics {
    pub(crate) fn new() -> Self {
        Self {
            events: Vec::new(),
            cumulative: Vec::new(),
            finalized: false,
        }
    }

    pub(crate) fn record(&mut self, name: String, started_at: DateTime<Utc>, duration: Duration) {
        match self.cumulative.iter_mut().find(|timer| timer.name == name) {
            Some(timer) => {
                timer.event_count += 1;
                timer.total_duration += duration;
            }
            None => self.cumulative.push(CumulativeTimer {
                name: name.clone(),
                event_count: 1,
                total_duration: duration,
                total_percentage_of_total: PERCENTAGE_UNSET,
            }),
        }
        self.events.push(TimerEvent {
            name,
            started_at,
            duration,
            percentage_of_total: PERCENTAGE_UNSET,
        });
    }

    /// Back-fills percentages against the operation's total duration and
    /// sorts the cumulative entries biggest impact first.
    pub(crate) fn finalize(&mut self, total: Duration) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        let total_millis = total.as_secs_f64() * 1_000.0;
        for event in &mut self.events {
            event.percentage_of_total = percentage_of(event.duration, total_millis);
        }
        for timer in &mut self.cumulative {
            timer.total_percentage_of_total = percentage_of(timer.total_duration, total_millis);
        }
        self.cumulative.sort_by(|a, b| {
            b.total_percentage_of_total
                .partial_cmp(&a.total_percentage_of_total)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries: self
                .events
                .iter()
                .map(|event| TimerEntrySnapshot {
                    name: event.name.clone(),
                    started_at: event.started_at.timestamp_millis(),
                    duration: event.duration.as_millis() as u64,
                    percentage_of_total: event.percentage_of_total,
                })
                .collect(),
            cumulative: self
                .cumulative
                .iter()
                .map(|timer| CumulativeSnapshot {
                    name: timer.name.clone(),
                    event_count: timer.event_count,
                    total_duration: timer.total_duration.as_millis() as u64,
                    total_percentage_of_total: timer.total_percentage_of_total,
                })
                .collect(),
        }
    }
}

fn percentage_of(duration: Duration, total_millis: f64) -> f64 {
    if total_millis <= 0.0 {
        return 0.0;
    }
    duration.as_secs_f64() * 1_000.0 / total_millis * 100.0
}
