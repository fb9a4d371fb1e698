use std::sync::Arc;

use image::RgbImage;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::StationConfig;
use crate::db::{Journal, VerdictOutcome};
use crate::detector::{HeadClassifier, SharedDetector};
use crate::frame::FrameChannel;
use crate::handoff::HandoffTable;
use crate::metrics::InspectionStats;
use crate::models::{RollerRecord, SensorSnapshot, Signal, Station, Verdict};
use crate::settings::SettingsStore;
use crate::storage::{spawn_save, ImageKind, ImageStore};
use crate::utils::RateLimiter;

use super::state::RollerTracker;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "tracker";

use crate::{log_debug, log_error, log_info, log_warn};

const INFERENCE_FAILURE_LOG_EVERY: u64 = 100;

/// How a station takes part in the cross-station handoff.
#[derive(Clone)]
pub enum HandoffRole {
    /// Records each finalized verdict for the downstream station.
    Publish(HandoffTable),
    /// Looks up the upstream verdict and withholds rollers already
    /// rejected upstream.
    Consume(HandoffTable),
    Standalone,
}

/// Auxiliary head classifier run on rising edges of `headClassify`.
pub struct HeadStage {
    pub detector: SharedDetector,
    pub classifier: HeadClassifier,
}

/// Everything one station loop needs. Built by the supervisor.
pub struct StationContext {
    pub station: Station,
    pub config: StationConfig,
    pub sensors: watch::Receiver<SensorSnapshot>,
    pub frames: FrameChannel,
    pub detector: SharedDetector,
    pub head: Option<HeadStage>,
    pub settings: Arc<SettingsStore>,
    pub verdicts: mpsc::UnboundedSender<Verdict>,
    pub handoff: HandoffRole,
    pub stats: InspectionStats,
    pub images: Option<Arc<dyn ImageStore>>,
    pub journal: Option<Journal>,
}

struct StationWorker {
    ctx: StationContext,
    tracker: RollerTracker,
    seen_seq: u64,
    frame_number: u64,
    head_frame_number: u64,
    inference_failures: RateLimiter,
}

pub async fn station_loop(ctx: StationContext, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.config.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let station = ctx.station;
    let mut worker = StationWorker {
        tracker: RollerTracker::new(station, &ctx.config),
        seen_seq: ctx.frames.latest_seq(),
        frame_number: 0,
        head_frame_number: 0,
        inference_failures: RateLimiter::new(INFERENCE_FAILURE_LOG_EVERY),
        ctx,
    };
    log_info!(
        "{station} tracker started (presence {}, finalize on {}, depth {})",
        worker.ctx.config.presence.as_str(),
        worker.ctx.config.finalize_gate.as_str(),
        worker.ctx.config.search_depth
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => worker.tick().await,
            _ = cancel_token.cancelled() => {
                log_info!(
                    "{station} tracker shutting down with {} rollers pending",
                    worker.tracker.pending_len()
                );
                break;
            }
        }
    }
}

impl StationWorker {
    fn level(&self, signal: Signal) -> bool {
        self.ctx.sensors.borrow().get(signal)
    }

    async fn tick(&mut self) {
        let station = self.ctx.station;
        let presence = self.level(self.ctx.config.presence);

        if let Some(id) = self.tracker.observe_presence(presence) {
            log_info!("{station}: new roller {id}");
        }

        if self.ctx.head.is_some() && self.tracker.observe_head(self.level(Signal::HeadClassify)) {
            self.check_head().await;
        }

        if presence {
            if let Some(frame) = self.ctx.frames.snapshot_after(self.seen_seq) {
                self.seen_seq = frame.seq;
                self.inspect(Arc::new(frame.image)).await;
            }
        }

        // Re-read: inference may have taken several poll cycles.
        let gate = self.level(self.ctx.config.finalize_gate);
        if let Some(record) = self.tracker.observe_finalize_gate(gate) {
            self.finalize(record).await;
        }
    }

    async fn inspect(&mut self, image: Arc<RgbImage>) {
        let station = self.ctx.station;
        let confidence = self.ctx.settings.confidence(station);

        let detections = match self.ctx.detector.infer(Arc::clone(&image), confidence).await {
            Ok(detections) => {
                self.inference_failures.reset();
                detections
            }
            Err(err) => {
                if self.inference_failures.hit() {
                    log_warn!(
                        "{station} inference failed ({} in a row), frame skipped: {err:#}",
                        self.inference_failures.count()
                    );
                }
                self.ctx.stats.record_inference_failure(station).await;
                return;
            }
        };

        if detections.is_empty() {
            return;
        }

        let outcome = self.tracker.apply_detections(detections);
        self.ctx.stats.record_frame(station, &outcome).await;
        for (id, label) in &outcome.attributed {
            log_info!("{station}: roller {id} defect '{label}'");
        }
        if outcome.dropped > 0 {
            log_debug!("{station}: {} defect boxes matched no roller", outcome.dropped);
        }

        self.frame_number += 1;
        if let Some(images) = &self.ctx.images {
            if self.ctx.settings.allow_all_images() {
                spawn_save(Arc::clone(images), Arc::clone(&image), station, ImageKind::All, self.frame_number);
            }
            if outcome.has_defects() {
                spawn_save(Arc::clone(images), image, station, ImageKind::Defect, self.frame_number);
            }
        }
    }

    async fn check_head(&mut self) {
        let Some(head) = &self.ctx.head else {
            return;
        };
        let Some(frame) = self.ctx.frames.snapshot() else {
            log_warn!("head check skipped: no frame captured yet");
            return;
        };

        let image = Arc::new(frame.image);
        let confidence = self.ctx.settings.head_confidence();
        let detections = match head.detector.infer(Arc::clone(&image), confidence).await {
            Ok(detections) => detections,
            Err(err) => {
                log_warn!("head inference failed: {err:#}");
                self.ctx.stats.record_head_check(false).await;
                return;
            }
        };

        let (head_type, measurement) = match head.classifier.classify(&detections) {
            Ok(result) => result,
            Err(err) => {
                log_warn!("head check skipped: {err}");
                self.ctx.stats.record_head_check(false).await;
                return;
            }
        };
        self.ctx.stats.record_head_check(true).await;

        log_info!(
            "head: {head_type} (distance {:.1}px, horizontal {:.1}, vertical {:.1})",
            measurement.distance,
            measurement.horizontal,
            measurement.vertical
        );
        if head_type.is_defect() {
            match self.tracker.mark_newest(head_type.as_str()) {
                Some(id) => log_info!("head: roller {id} marked '{head_type}'"),
                None => log_warn!("head: '{head_type}' with no roller pending"),
            }
        }

        self.head_frame_number += 1;
        if let Some(images) = &self.ctx.images {
            let station = self.ctx.station;
            if self.ctx.settings.allow_all_images() {
                spawn_save(Arc::clone(images), Arc::clone(&image), station, ImageKind::Head, self.head_frame_number);
            }
            if head_type.is_defect() {
                spawn_save(Arc::clone(images), image, station, ImageKind::HeadDefect, self.head_frame_number);
            }
        }
    }

    async fn finalize(&mut self, record: RollerRecord) {
        let station = self.ctx.station;
        let verdict = Verdict::from_record(station, record);
        self.ctx.stats.record_verdict(&verdict).await;
        log_info!(
            "{station}: roller {} finalized {} [{}]",
            verdict.roller_id,
            if verdict.defective { "defective" } else { "good" },
            verdict.defect_names.join(", ")
        );

        let outcome = match &self.ctx.handoff {
            HandoffRole::Publish(table) => {
                if let Some(previous) = table.put(verdict.roller_id, verdict.defective) {
                    log_warn!(
                        "handoff: roller {} already had a verdict ({previous}), replaced",
                        verdict.roller_id
                    );
                }
                VerdictOutcome::Forwarded
            }
            HandoffRole::Consume(table) => match table.take(verdict.roller_id) {
                Ok(false) => VerdictOutcome::Forwarded,
                Ok(true) => VerdictOutcome::SkippedUpstreamReject,
                Err(err) => {
                    log_error!("{station}: {err}");
                    self.ctx.stats.record_handoff_violation().await;
                    VerdictOutcome::HandoffViolation
                }
            },
            HandoffRole::Standalone => VerdictOutcome::Forwarded,
        };

        if let Some(journal) = &self.ctx.journal {
            journal.record_verdict(&verdict, outcome);
        }

        if outcome == VerdictOutcome::SkippedUpstreamReject {
            log_info!(
                "{station}: roller {} already rejected upstream, no command",
                verdict.roller_id
            );
            self.ctx.stats.record_upstream_skip().await;
            return;
        }

        if self.ctx.verdicts.send(verdict).is_err() {
            log_error!("{station}: slot controller is gone, verdict dropped");
        }
    }
}
