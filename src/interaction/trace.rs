// src/interaction/trace.rs
//! Interaction trace data model
//!
//! Serialized shape (consumed by the export/packaging side):
//!
//! ```json
//! {
//!   "events": [{ "type": "click", "timestamp": 250, "x": 120, "y": 80, "target": "div#ad > a" }],
//!   "duration": 15000,
//!   "adSize": { "width": 300, "height": 250 },
//!   "recordedAt": "2024-01-01T00:00:00Z"
//! }
//! ```

use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kinds of recorded input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Click,
    Mousedown,
    Mouseup,
    Mousemove,
    Touchstart,
    Touchmove,
    Touchend,
    Scroll,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Click => "click",
            InteractionKind::Mousedown => "mousedown",
            InteractionKind::Mouseup => "mouseup",
            InteractionKind::Mousemove => "mousemove",
            InteractionKind::Touchstart => "touchstart",
            InteractionKind::Touchmove => "touchmove",
            InteractionKind::Touchend => "touchend",
            InteractionKind::Scroll => "scroll",
        }
    }

    pub fn is_mouse(&self) -> bool {
        matches!(
            self,
            InteractionKind::Click
                | InteractionKind::Mousedown
                | InteractionKind::Mouseup
                | InteractionKind::Mousemove
        )
    }

    pub fn is_touch(&self) -> bool {
        matches!(
            self,
            InteractionKind::Touchstart | InteractionKind::Touchmove | InteractionKind::Touchend
        )
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One touch point, relative to the ad's content area
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchPoint {
    pub identifier: i64,
    pub x: f64,
    pub y: f64,
}

/// A single recorded input event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    #[serde(rename = "type")]
    pub kind: InteractionKind,

    /// Milliseconds since recording start
    pub timestamp: u64,

    /// Position relative to the content area
    pub x: f64,
    pub y: f64,

    /// Structural locator of the target element, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touches: Option<Vec<TouchPoint>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_top: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_left: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<u8>,
}

impl InteractionEvent {
    /// Pointer-style event at a position
    pub fn pointer(kind: InteractionKind, timestamp: u64, x: f64, y: f64) -> Self {
        Self {
            kind,
            timestamp,
            x,
            y,
            target: None,
            touches: None,
            scroll_top: None,
            scroll_left: None,
            button: None,
        }
    }

    pub fn click(timestamp: u64, x: f64, y: f64) -> Self {
        Self::pointer(InteractionKind::Click, timestamp, x, y).with_button(0)
    }

    /// Touch event positioned at its first touch point
    pub fn touch(kind: InteractionKind, timestamp: u64, touches: Vec<TouchPoint>) -> Self {
        let (x, y) = touches.first().map(|t| (t.x, t.y)).unwrap_or_default();
        Self {
            touches: Some(touches),
            ..Self::pointer(kind, timestamp, x, y)
        }
    }

    pub fn scroll(timestamp: u64, scroll_top: f64, scroll_left: f64) -> Self {
        Self {
            scroll_top: Some(scroll_top),
            scroll_left: Some(scroll_left),
            ..Self::pointer(InteractionKind::Scroll, timestamp, 0.0, 0.0)
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_button(mut self, button: u8) -> Self {
        self.button = Some(button);
        self
    }

    fn validate(&self, index: usize) -> Result<()> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(EngineError::InvalidTrace(format!(
                "event {} ({}) has non-finite coordinates",
                index, self.kind
            )));
        }
        if self.kind == InteractionKind::Scroll
            && (self.scroll_top.is_none() || self.scroll_left.is_none())
        {
            return Err(EngineError::InvalidTrace(format!(
                "scroll event {} is missing scroll offsets",
                index
            )));
        }
        if let Some(touches) = &self.touches {
            if touches.iter().any(|t| !t.x.is_finite() || !t.y.is_finite()) {
                return Err(EngineError::InvalidTrace(format!(
                    "event {} has non-finite touch coordinates",
                    index
                )));
            }
        }
        Ok(())
    }
}

/// Ad dimensions at capture time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdSize {
    pub width: u32,
    pub height: u32,
}

impl AdSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for AdSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Ordered, timestamped record of user input against one ad
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionTrace {
    pub events: Vec<InteractionEvent>,

    /// Total recording duration in milliseconds
    pub duration: u64,

    pub ad_size: AdSize,

    pub recorded_at: DateTime<Utc>,
}

impl InteractionTrace {
    /// Build a trace; events are sorted by timestamp (stable)
    pub fn new(mut events: Vec<InteractionEvent>, duration: u64, ad_size: AdSize) -> Self {
        events.sort_by_key(|e| e.timestamp);
        Self {
            events,
            duration,
            ad_size,
            recorded_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_sorted(&self) -> bool {
        self.events
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp)
    }

    /// Stable sort by timestamp, keeping capture order for ties
    pub fn sort(&mut self) {
        self.events.sort_by_key(|e| e.timestamp);
    }

    /// Check every event for structural problems
    pub fn validate(&self) -> Result<()> {
        for (index, event) in self.events.iter().enumerate() {
            event.validate(index)?;
        }
        Ok(())
    }

    /// Timestamp of the last event, or 0
    pub fn last_timestamp(&self) -> u64 {
        self.events.iter().map(|e| e.timestamp).max().unwrap_or(0)
    }

    pub fn counts_by_kind(&self) -> BTreeMap<InteractionKind, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = InteractionEvent::click(250, 10.0, 20.0).with_target("div#ad > a");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "click",
                "timestamp": 250,
                "x": 10.0,
                "y": 20.0,
                "target": "div#ad > a",
                "button": 0
            })
        );
    }

    #[test]
    fn test_scroll_wire_shape() {
        let value = serde_json::to_value(InteractionEvent::scroll(10, 120.0, 0.0)).unwrap();
        assert_eq!(value["type"], "scroll");
        assert_eq!(value["scrollTop"], 120.0);
        assert_eq!(value["scrollLeft"], 0.0);
        assert!(value.get("touches").is_none());
    }

    #[test]
    fn test_trace_wire_shape() {
        let trace = InteractionTrace::new(vec![], 1500, AdSize::new(300, 250));
        let value = serde_json::to_value(&trace).unwrap();
        assert_eq!(value["duration"], 1500);
        assert_eq!(value["adSize"], json!({"width": 300, "height": 250}));
        assert!(value["recordedAt"].is_string());
    }

    #[test]
    fn test_parse_from_json() {
        let raw = json!({
            "events": [
                {"type": "touchstart", "timestamp": 40, "x": 5, "y": 6,
                 "touches": [{"identifier": 0, "x": 5, "y": 6}, {"identifier": 1, "x": 50, "y": 60}]},
                {"type": "mousemove", "timestamp": 10, "x": 1, "y": 2}
            ],
            "duration": 100,
            "adSize": {"width": 320, "height": 50},
            "recordedAt": "2024-05-01T12:00:00Z"
        });
        let trace: InteractionTrace = serde_json::from_value(raw).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.events[0].touches.as_ref().unwrap().len(), 2);
        assert!(!trace.is_sorted());
    }

    #[test]
    fn test_negative_timestamp_rejected() {
        let raw = json!({
            "events": [{"type": "click", "timestamp": -5, "x": 1, "y": 1}],
            "duration": 0,
            "adSize": {"width": 1, "height": 1},
            "recordedAt": "2024-05-01T12:00:00Z"
        });
        assert!(serde_json::from_value::<InteractionTrace>(raw).is_err());
    }

    #[test]
    fn test_new_sorts_stably() {
        let trace = InteractionTrace::new(
            vec![
                InteractionEvent::click(500, 0.0, 0.0),
                InteractionEvent::pointer(InteractionKind::Mousedown, 100, 1.0, 1.0),
                InteractionEvent::pointer(InteractionKind::Mouseup, 100, 2.0, 2.0),
            ],
            600,
            AdSize::new(300, 250),
        );
        assert!(trace.is_sorted());
        assert_eq!(trace.events[0].kind, InteractionKind::Mousedown);
        assert_eq!(trace.events[1].kind, InteractionKind::Mouseup);
        assert_eq!(trace.last_timestamp(), 500);
    }

    #[test]
    fn test_validate() {
        let mut bad_scroll = InteractionEvent::scroll(0, 1.0, 1.0);
        bad_scroll.scroll_left = None;
        let trace = InteractionTrace::new(vec![bad_scroll], 10, AdSize::new(1, 1));
        assert!(matches!(trace.validate(), Err(EngineError::InvalidTrace(_))));

        let trace = InteractionTrace::new(
            vec![InteractionEvent::click(0, f64::NAN, 0.0)],
            10,
            AdSize::new(1, 1),
        );
        assert!(trace.validate().is_err());
    }

    #[test]
    fn test_counts_by_kind() {
        let trace = InteractionTrace::new(
            vec![
                InteractionEvent::click(0, 0.0, 0.0),
                InteractionEvent::click(1, 0.0, 0.0),
                InteractionEvent::scroll(2, 0.0, 0.0),
            ],
            10,
            AdSize::new(1, 1),
        );
        let counts = trace.counts_by_kind();
        assert_eq!(counts[&InteractionKind::Click], 2);
        assert_eq!(counts[&InteractionKind::Scroll], 1);
    }
}
