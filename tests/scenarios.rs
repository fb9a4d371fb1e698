//! Roller walk-throughs driven step by step, without timers or threads.

use rollerline_lib::config::{HeadConfig, StationConfig};
use rollerline_lib::detector::{HeadClassifier, HeadType};
use rollerline_lib::handoff::HandoffTable;
use rollerline_lib::models::{Action, BBox, Detection, Station, Verdict};
use rollerline_lib::slot::SlotGate;
use rollerline_lib::tracker::RollerTracker;
use tokio::sync::mpsc;

fn roller(x1: f32) -> Detection {
    Detection::new("roller", 0, BBox::new(x1, 0.0, x1 + 300.0, 300.0), 0.95)
}

fn defect(label: &str, x1: f32) -> Detection {
    Detection::new(label, 1, BBox::new(x1, 100.0, x1 + 20.0, 120.0), 0.6)
}

/// Tracker plus slot gate of one station, stepped tick by tick.
struct Bench {
    tracker: RollerTracker,
    verdicts: mpsc::UnboundedSender<Verdict>,
    gate: SlotGate,
}

impl Bench {
    fn new(station: Station, config: StationConfig) -> Self {
        let (verdicts, rx) = mpsc::unbounded_channel();
        Self {
            tracker: RollerTracker::new(station, &config),
            verdicts,
            gate: SlotGate::new(station, rx).waiting_for_verdict(config.slot_waits_for_verdict),
        }
    }

    fn presence(&mut self, level: bool) -> Option<u64> {
        self.tracker.observe_presence(level)
    }

    fn finalize(&mut self, level: bool) -> Option<Verdict> {
        let record = self.tracker.observe_finalize_gate(level)?;
        Some(Verdict::from_record(self.tracker.station(), record))
    }

    fn slot(&mut self, level: bool) -> Option<Action> {
        self.gate.observe(level).map(|(intent, _)| intent.action)
    }
}

#[test]
fn rust_on_the_only_roller_is_rejected() {
    let mut bigface = Bench::new(Station::Bigface, StationConfig::bigface());
    assert_eq!(bigface.presence(true), Some(1));

    let outcome = bigface
        .tracker
        .apply_detections(vec![roller(0.0), defect("rust", 50.0)]);
    assert_eq!(outcome.attributed, vec![(1, "rust".to_string())]);
    bigface.presence(false);

    let verdict = bigface.finalize(true).unwrap();
    assert!(verdict.defective);
    bigface.verdicts.send(verdict).unwrap();

    assert_eq!(bigface.slot(true), Some(Action::Reject));
}

#[test]
fn clean_roller_is_accepted() {
    let mut bigface = Bench::new(Station::Bigface, StationConfig::bigface());
    bigface.presence(true);
    for _ in 0..5 {
        let outcome = bigface.tracker.apply_detections(vec![roller(0.0)]);
        assert!(!outcome.has_defects());
    }
    bigface.presence(false);

    let verdict = bigface.finalize(true).unwrap();
    assert_eq!(verdict.defect_names, vec!["No defect".to_string()]);
    bigface.verdicts.send(verdict).unwrap();

    assert_eq!(bigface.slot(true), Some(Action::Accept));
    // Sustained high does not fire again.
    assert_eq!(bigface.slot(true), None);
}

#[test]
fn roller_rejected_at_bigface_gets_no_od_command() {
    let handoff = HandoffTable::new();
    let mut od = Bench::new(Station::Od, StationConfig::od());

    for _ in 0..7 {
        od.presence(true);
        od.presence(false);
    }
    // Rollers 1..=6 passed bigface clean, roller 7 was rejected there.
    for id in 1..=6 {
        handoff.put(id, false);
    }
    handoff.put(7, true);

    let mut commands = Vec::new();
    for _ in 0..7 {
        let verdict = od.finalize(true).unwrap();
        od.finalize(false);
        assert!(!verdict.defective);

        let rejected_upstream = handoff.take(verdict.roller_id).unwrap();
        if !rejected_upstream {
            od.verdicts.send(verdict).unwrap();
        }

        if let Some(action) = od.slot(true) {
            commands.push(action);
        }
        od.slot(false);
    }

    assert_eq!(commands, vec![Action::Accept; 6]);
    assert!(handoff.is_empty());
    assert!(handoff.take(7).is_err());
}

#[test]
fn high_head_marks_the_newest_roller() {
    let mut bigface = Bench::new(Station::Bigface, StationConfig::bigface());
    let classifier = HeadClassifier::new(&HeadConfig::default());

    bigface.presence(true);
    bigface.presence(false);
    bigface.presence(true);
    assert_eq!(bigface.tracker.newest_id(), Some(2));

    assert!(bigface.tracker.observe_head(true));
    // rim 800x700, dimple 500x400: distance 150
    let detections = vec![
        Detection::new("dimple", 0, BBox::new(150.0, 150.0, 650.0, 550.0), 0.9),
        Detection::new("rim", 1, BBox::new(0.0, 0.0, 800.0, 700.0), 0.9),
    ];
    let (head, measurement) = classifier.classify(&detections).unwrap();
    assert_eq!(measurement.distance, 150.0);
    assert_eq!(head, HeadType::High);
    assert_eq!(bigface.tracker.mark_newest(head.as_str()), Some(2));

    let first = bigface.finalize(true).unwrap();
    bigface.finalize(false);
    let second = bigface.finalize(true).unwrap();
    assert!(!first.defective);
    assert!(second.defective);
    assert!(second.defect_names.contains(&"High Head".to_string()));
}

#[test]
fn ids_only_advance_on_rising_edges() {
    let mut od = Bench::new(Station::Od, StationConfig::od());
    let levels = [false, true, true, false, false, true, false, true, true, true];
    let created: Vec<u64> = levels.iter().filter_map(|&level| od.presence(level)).collect();
    assert_eq!(created, vec![1, 2, 3]);
    assert_eq!(od.tracker.counter(), 3);
}
