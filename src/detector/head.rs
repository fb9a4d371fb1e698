use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::HeadConfig;
use crate::models::Detection;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeadError {
    #[error("head frame has no {0} box")]
    MissingClass(&'static str),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HeadType {
    High,
    Down,
    Normal,
}

impl HeadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeadType::High => "High Head",
            HeadType::Down => "Down Head",
            HeadType::Normal => "Normal",
        }
    }

    pub fn is_defect(&self) -> bool {
        !matches!(self, HeadType::Normal)
    }
}

impl fmt::Display for HeadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel gap between the rim outline and the dimple outline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadMeasurement {
    pub horizontal: f32,
    pub vertical: f32,
    pub distance: f32,
}

impl HeadMeasurement {
    pub fn from_widths(rim_width: f32, rim_height: f32, dimple_width: f32, dimple_height: f32) -> Self {
        let horizontal = (rim_width - dimple_width) / 2.0;
        let vertical = (rim_height - dimple_height) / 2.0;
        Self {
            horizontal,
            vertical,
            distance: (horizontal + vertical) / 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeadClassifier {
    dimple_class: u32,
    rim_class: u32,
    high_head_below: f32,
    down_head_above: f32,
}

impl HeadClassifier {
    pub fn new(config: &HeadConfig) -> Self {
        Self {
            dimple_class: config.dimple_class,
            rim_class: config.rim_class,
            high_head_below: config.high_head_below,
            down_head_above: config.down_head_above,
        }
    }

    pub fn classify_distance(&self, distance: f32) -> HeadType {
        if distance < self.high_head_below {
            HeadType::High
        } else if distance > self.down_head_above {
            HeadType::Down
        } else {
            HeadType::Normal
        }
    }

    /// Uses the most confident dimple box and the most confident rim box.
    pub fn measure(&self, detections: &[Detection]) -> Result<HeadMeasurement, HeadError> {
        let best = |class_id: u32| {
            detections
                .iter()
                .filter(|det| det.class_id == class_id)
                .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        };

        let dimple = best(self.dimple_class).ok_or(HeadError::MissingClass("dimple"))?;
        let rim = best(self.rim_class).ok_or(HeadError::MissingClass("rim"))?;

        Ok(HeadMeasurement::from_widths(
            rim.bbox.width(),
            rim.bbox.height(),
            dimple.bbox.width(),
            dimple.bbox.height(),
        ))
    }

    pub fn classify(&self, detections: &[Detection]) -> Result<(HeadType, HeadMeasurement), HeadError> {
        let measurement = self.measure(detections)?;
        Ok((self.classify_distance(measurement.distance), measurement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BBox;

    fn classifier() -> HeadClassifier {
        HeadClassifier::new(&HeadConfig::default())
    }

    #[test]
    fn thresholds_are_exclusive() {
        let c = classifier();
        assert_eq!(c.classify_distance(150.0), HeadType::High);
        assert_eq!(c.classify_distance(180.0), HeadType::Normal);
        assert_eq!(c.classify_distance(240.0), HeadType::Normal);
        assert_eq!(c.classify_distance(240.5), HeadType::Down);
    }

    #[test]
    fn distance_is_mean_of_half_gaps() {
        // rim 800x700, dimple 500x400 -> gaps 150 and 150
        let detections = vec![
            Detection::new("dimple", 0, BBox::new(150.0, 150.0, 650.0, 550.0), 0.9),
            Detection::new("dimple", 0, BBox::new(0.0, 0.0, 10.0, 10.0), 0.3),
            Detection::new("rim", 1, BBox::new(0.0, 0.0, 800.0, 700.0), 0.95),
        ];
        let (head, measurement) = classifier().classify(&detections).unwrap();
        assert_eq!(measurement.horizontal, 150.0);
        assert_eq!(measurement.vertical, 150.0);
        assert_eq!(measurement.distance, 150.0);
        assert_eq!(head, HeadType::High);
        assert!(head.is_defect());
        assert_eq!(head.to_string(), "High Head");
    }

    #[test]
    fn missing_class_is_an_error() {
        let detections = vec![Detection::new("rim", 1, BBox::new(0.0, 0.0, 800.0, 700.0), 0.95)];
        assert_eq!(
            classifier().classify(&detections).unwrap_err(),
            HeadError::MissingClass("dimple")
        );
    }
}
