use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixels, `(x1, y1)` top-left and `(x2, y2)`
/// bottom-right.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Inclusive on every edge.
    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        self.x1 <= x && x <= self.x2 && self.y1 <= y && y <= self.y2
    }

    /// True when either the top-left or the bottom-right corner of `other`
    /// lies inside `self`. This is the roller/defect correlation test.
    pub fn holds_corner_of(&self, other: &BBox) -> bool {
        self.contains_point(other.x1, other.y1) || self.contains_point(other.x2, other.y2)
    }
}

/// One box reported by a detector, with its class already resolved to a
/// label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub label: String,
    pub class_id: u32,
    pub bbox: BBox,
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, class_id: u32, bbox: BBox, confidence: f32) -> Self {
        Self {
            label: label.into(),
            class_id,
            bbox,
            confidence,
        }
    }
}
