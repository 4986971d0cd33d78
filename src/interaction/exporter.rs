// src/interaction/exporter.rs
//! Export and import interaction traces
//!
//! Supports:
//! - JSON (single document, consumed by the packaging step)
//! - NDJSON (header line, then one event per line; easy to stream and diff)

use crate::interaction::trace::{AdSize, InteractionEvent, InteractionTrace};
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Trace serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    /// Pretty-printed JSON document
    Json,

    /// Newline-delimited JSON
    Ndjson,
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceFormat::Json => f.write_str("json"),
            TraceFormat::Ndjson => f.write_str("ndjson"),
        }
    }
}

/// First line of an NDJSON trace
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NdjsonHeader {
    duration: u64,
    ad_size: AdSize,
    recorded_at: DateTime<Utc>,
    event_count: usize,
}

/// Exporter for interaction traces
pub struct TraceExporter {
    format: TraceFormat,
}

impl TraceExporter {
    pub fn new(format: TraceFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> TraceFormat {
        self.format
    }

    /// Serialize a trace
    pub fn export(&self, trace: &InteractionTrace) -> Result<String> {
        debug!("Exporting {} events to {} format", trace.len(), self.format);

        match self.format {
            TraceFormat::Json => self.export_json(trace),
            TraceFormat::Ndjson => self.export_ndjson(trace),
        }
    }

    fn export_json(&self, trace: &InteractionTrace) -> Result<String> {
        serde_json::to_string_pretty(trace)
            .map_err(|e| EngineError::ExportFailed(format!("JSON serialization error: {}", e)))
    }

    fn export_ndjson(&self, trace: &InteractionTrace) -> Result<String> {
        let header = NdjsonHeader {
            duration: trace.duration,
            ad_size: trace.ad_size,
            recorded_at: trace.recorded_at,
            event_count: trace.len(),
        };

        let mut out = serde_json::to_string(&header)
            .map_err(|e| EngineError::ExportFailed(format!("NDJSON header error: {}", e)))?;
        out.push('\n');

        for event in &trace.events {
            let line = serde_json::to_string(event)
                .map_err(|e| EngineError::ExportFailed(format!("NDJSON event error: {}", e)))?;
            out.push_str(&line);
            out.push('\n');
        }

        Ok(out)
    }

    /// Parse a trace; the result is validated and sorted by timestamp
    pub fn import(&self, input: &str) -> Result<InteractionTrace> {
        let mut trace = match self.format {
            TraceFormat::Json => serde_json::from_str::<InteractionTrace>(input)
                .map_err(|e| EngineError::InvalidTrace(format!("JSON parse error: {}", e)))?,
            TraceFormat::Ndjson => Self::import_ndjson(input)?,
        };

        trace.validate()?;
        if !trace.is_sorted() {
            debug!("Imported trace out of order, sorting {} events", trace.len());
            trace.sort();
        }
        Ok(trace)
    }

    fn import_ndjson(input: &str) -> Result<InteractionTrace> {
        let mut lines = input
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let (_, first) = lines
            .next()
            .ok_or_else(|| EngineError::InvalidTrace("empty NDJSON input".to_string()))?;
        let header: NdjsonHeader = serde_json::from_str(first)
            .map_err(|e| EngineError::InvalidTrace(format!("NDJSON header: {}", e)))?;

        // the header count is untrusted until the lines are counted
        let mut events = Vec::new();
        for (number, line) in lines {
            let event: InteractionEvent = serde_json::from_str(line).map_err(|e| {
                EngineError::InvalidTrace(format!("NDJSON line {}: {}", number + 1, e))
            })?;
            events.push(event);
        }

        if events.len() != header.event_count {
            return Err(EngineError::InvalidTrace(format!(
                "header declares {} events, found {}",
                header.event_count,
                events.len()
            )));
        }

        Ok(InteractionTrace {
            events,
            duration: header.duration,
            ad_size: header.ad_size,
            recorded_at: header.recorded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::trace::{InteractionKind, TouchPoint};

    fn sample_trace() -> InteractionTrace {
        InteractionTrace::new(
            vec![
                InteractionEvent::click(0, 10.0, 10.0).with_target("div#ad > a"),
                InteractionEvent::touch(
                    InteractionKind::Touchstart,
                    250,
                    vec![TouchPoint {
                        identifier: 0,
                        x: 20.0,
                        y: 30.0,
                    }],
                ),
                InteractionEvent::scroll(500, 100.0, 0.0),
            ],
            1000,
            AdSize::new(300, 250),
        )
    }

    #[test]
    fn test_json_export() {
        let json = TraceExporter::new(TraceFormat::Json)
            .export(&sample_trace())
            .unwrap();
        assert!(json.contains("\"adSize\""));
        assert!(json.contains("div#ad > a"));
        assert!(json.contains("\"scrollTop\""));
    }

    #[test]
    fn test_ndjson_layout() {
        let out = TraceExporter::new(TraceFormat::Ndjson)
            .export(&sample_trace())
            .unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("\"eventCount\":3"));
        assert!(lines[1].contains("\"type\":\"click\""));
        assert!(lines[3].contains("\"type\":\"scroll\""));
    }

    #[test]
    fn test_ndjson_import_matches_source() {
        let exporter = TraceExporter::new(TraceFormat::Ndjson);
        let trace = sample_trace();
        let parsed = exporter.import(&exporter.export(&trace).unwrap()).unwrap();
        assert_eq!(parsed, trace);
    }

    #[test]
    fn test_import_sorts_out_of_order() {
        let input = r#"{
            "events": [
                {"type": "click", "timestamp": 500, "x": 1, "y": 1},
                {"type": "click", "timestamp": 0, "x": 2, "y": 2}
            ],
            "duration": 600,
            "adSize": {"width": 300, "height": 250},
            "recordedAt": "2024-05-01T12:00:00Z"
        }"#;
        let trace = TraceExporter::new(TraceFormat::Json).import(input).unwrap();
        assert!(trace.is_sorted());
        assert_eq!(trace.events[0].x, 2.0);
    }

    #[test]
    fn test_ndjson_header_count_without_events() {
        let ndjson = TraceExporter::new(TraceFormat::Ndjson);
        let header = r#"{"duration":1,"adSize":{"width":1,"height":1},"recordedAt":"2024-05-01T12:00:00Z","eventCount":18446744073709551615}"#;
        assert!(matches!(
            ndjson.import(header),
            Err(EngineError::InvalidTrace(_))
        ));
    }

    #[test]
    fn test_import_rejects_bad_input() {
        let json = TraceExporter::new(TraceFormat::Json);
        assert!(matches!(
            json.import("{not json"),
            Err(EngineError::InvalidTrace(_))
        ));

        let ndjson = TraceExporter::new(TraceFormat::Ndjson);
        assert!(ndjson.import("").is_err());

        let header = r#"{"duration":1,"adSize":{"width":1,"height":1},"recordedAt":"2024-05-01T12:00:00Z","eventCount":2}"#;
        let one_event = format!("{}\n{}\n", header, r#"{"type":"click","timestamp":0,"x":0,"y":0}"#);
        assert!(ndjson.import(&one_event).is_err());
    }

    #[test]
    fn test_import_rejects_scroll_without_offsets() {
        let input = r#"{
            "events": [{"type": "scroll", "timestamp": 0, "x": 0, "y": 0}],
            "duration": 1,
            "adSize": {"width": 1, "height": 1},
            "recordedAt": "2024-05-01T12:00:00Z"
        }"#;
        assert!(TraceExporter::new(TraceFormat::Json).import(input).is_err());
    }
}
