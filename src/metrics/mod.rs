mod types;

pub use types::{StationCounters, StatsSnapshot};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::models::{Station, Verdict};
use crate::tracker::FrameOutcome;

/// Read-only counters for the operator view. Cloning shares the state.
#[derive(Clone)]
pub struct InspectionStats {
    inner: Arc<Mutex<StatsState>>,
}

struct StatsState {
    started_at: DateTime<Utc>,
    bigface: StationCounters,
    od: StationCounters,
    pulses_issued: u64,
    pulses_failed: u64,
}

impl StatsState {
    fn station(&mut self, station: Station) -> &mut StationCounters {
        match station {
            Station::Bigface => &mut self.bigface,
            Station::Od => &mut self.od,
        }
    }
}

impl InspectionStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatsState {
                started_at: Utc::now(),
                bigface: StationCounters::default(),
                od: StationCounters::default(),
                pulses_issued: 0,
                pulses_failed: 0,
            })),
        }
    }

    pub async fn record_verdict(&self, verdict: &Verdict) {
        let mut state = self.inner.lock().await;
        let counters = state.station(verdict.station);
        counters.inspected += 1;
        if verdict.defective {
            counters.defective += 1;
        } else {
            counters.good += 1;
        }
        for name in verdict.defect_names.iter().filter(|n| *n != crate::models::NO_DEFECT) {
            *counters.defect_breakdown.entry(name.clone()).or_insert(0) += 1;
        }
    }

    pub async fn record_frame(&self, station: Station, outcome: &FrameOutcome) {
        let mut state = self.inner.lock().await;
        let counters = state.station(station);
        counters.frames_inferred += 1;
        counters.unattributed_defects += outcome.dropped as u64;
    }

    pub async fn record_inference_failure(&self, station: Station) {
        self.inner.lock().await.station(station).inference_failures += 1;
    }

    pub async fn record_head_check(&self, ok: bool) {
        let mut state = self.inner.lock().await;
        state.bigface.head_checks += 1;
        if !ok {
            state.bigface.head_failures += 1;
        }
    }

    pub async fn record_upstream_skip(&self) {
        self.inner.lock().await.od.upstream_skips += 1;
    }

    pub async fn record_handoff_violation(&self) {
        self.inner.lock().await.od.handoff_violations += 1;
    }

    pub async fn record_pulse(&self, success: bool) {
        let mut state = self.inner.lock().await;
        if success {
            state.pulses_issued += 1;
        } else {
            state.pulses_failed += 1;
        }
    }

    pub async fn get_snapshot(&self) -> StatsSnapshot {
        let state = self.inner.lock().await;
        let total_inspected = state.bigface.inspected + state.od.inspected;
        let total_defective = state.bigface.defective + state.od.defective;
        let defect_proportion = if total_inspected == 0 {
            0.0
        } else {
            total_defective as f64 / total_inspected as f64
        };

        StatsSnapshot {
            started_at: state.started_at,
            bigface: state.bigface.clone(),
            od: state.od.clone(),
            pulses_issued: state.pulses_issued,
            pulses_failed: state.pulses_failed,
            total_inspected,
            total_defective,
            defect_proportion,
        }
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        state.started_at = Utc::now();
        state.bigface = StationCounters::default();
        state.od = StationCounters::default();
        state.pulses_issued = 0;
        state.pulses_failed = 0;
    }
}

impl Default for InspectionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(station: Station, defective: bool, names: &[&str]) -> Verdict {
        Verdict {
            station,
            roller_id: 1,
            defective,
            defect_names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn counts_verdicts_and_breakdown() {
        let stats = InspectionStats::new();
        stats
            .record_verdict(&verdict(Station::Bigface, true, &["No defect", "rust", "rust"]))
            .await;
        stats
            .record_verdict(&verdict(Station::Bigface, false, &["No defect"]))
            .await;
        stats
            .record_verdict(&verdict(Station::Od, true, &["No defect", "dent"]))
            .await;
        stats.record_pulse(true).await;
        stats.record_pulse(false).await;

        let snapshot = stats.get_snapshot().await;
        assert_eq!(snapshot.bigface.inspected, 2);
        assert_eq!(snapshot.bigface.good, 1);
        assert_eq!(snapshot.bigface.defect_breakdown.get("rust"), Some(&2));
        assert_eq!(snapshot.od.defective, 1);
        assert_eq!(snapshot.total_inspected, 3);
        assert_eq!(snapshot.total_defective, 2);
        assert!((snapshot.defect_proportion - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!((snapshot.pulses_issued, snapshot.pulses_failed), (1, 1));

        stats.reset().await;
        let snapshot = stats.get_snapshot().await;
        assert_eq!(snapshot.total_inspected, 0);
        assert_eq!(snapshot.defect_proportion, 0.0);
    }
}
