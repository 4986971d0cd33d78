// src/replay/target.rs
//! Replay target seam and synthetic event model
//!
//! Each recorded input is dispatched twice: once as the legacy mouse/touch
//! event and once as its pointer-event counterpart. Ads listen for either
//! family, so both are sent.

use crate::interaction::trace::{InteractionEvent, InteractionKind, TouchPoint};
use std::fmt;
use std::sync::Arc;

/// Opaque reference to an element in a content document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

/// Pointer event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Down,
    Up,
    Move,
    /// Pointer-flavoured click (carries pointer type)
    Click,
}

impl PointerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointerKind::Down => "pointerdown",
            PointerKind::Up => "pointerup",
            PointerKind::Move => "pointermove",
            PointerKind::Click => "click",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerType {
    Mouse,
    Touch,
}

/// An event delivered to the content document
#[derive(Debug, Clone, PartialEq)]
pub enum SyntheticEvent {
    /// Legacy mouse event (click, mousedown, mouseup, mousemove)
    Mouse {
        kind: InteractionKind,
        x: f64,
        y: f64,
        button: u8,
    },

    /// Legacy touch event
    Touch {
        kind: InteractionKind,
        touches: Vec<TouchPoint>,
    },

    /// Modern pointer event
    Pointer {
        kind: PointerKind,
        pointer_type: PointerType,
        pointer_id: i64,
        x: f64,
        y: f64,
        button: u8,
    },

    /// Scroll notification, sent after the offset has been applied
    Scroll { top: f64, left: f64 },
}

impl SyntheticEvent {
    /// DOM event type name
    pub fn type_name(&self) -> &'static str {
        match self {
            SyntheticEvent::Mouse { kind, .. } | SyntheticEvent::Touch { kind, .. } => {
                kind.as_str()
            }
            SyntheticEvent::Pointer { kind, .. } => kind.as_str(),
            SyntheticEvent::Scroll { .. } => "scroll",
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, SyntheticEvent::Pointer { .. })
    }
}

impl fmt::Display for SyntheticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

fn pointer_counterpart(kind: InteractionKind) -> Option<PointerKind> {
    match kind {
        InteractionKind::Mousedown | InteractionKind::Touchstart => Some(PointerKind::Down),
        InteractionKind::Mouseup | InteractionKind::Touchend => Some(PointerKind::Up),
        InteractionKind::Mousemove | InteractionKind::Touchmove => Some(PointerKind::Move),
        InteractionKind::Click => Some(PointerKind::Click),
        InteractionKind::Scroll => None,
    }
}

/// Events to dispatch for one recorded input, in dispatch order
pub fn synthesize(event: &InteractionEvent) -> Vec<SyntheticEvent> {
    if event.kind == InteractionKind::Scroll {
        return vec![SyntheticEvent::Scroll {
            top: event.scroll_top.unwrap_or(0.0),
            left: event.scroll_left.unwrap_or(0.0),
        }];
    }

    let button = event.button.unwrap_or(0);
    let (legacy, pointer_type, pointer_id) = if event.kind.is_touch() {
        let touches = event.touches.clone().unwrap_or_else(|| {
            vec![TouchPoint {
                identifier: 0,
                x: event.x,
                y: event.y,
            }]
        });
        let id = touches.first().map(|t| t.identifier).unwrap_or(0);
        (
            SyntheticEvent::Touch {
                kind: event.kind,
                touches,
            },
            PointerType::Touch,
            id,
        )
    } else {
        (
            SyntheticEvent::Mouse {
                kind: event.kind,
                x: event.x,
                y: event.y,
                button,
            },
            PointerType::Mouse,
            1,
        )
    };

    let mut out = vec![legacy];
    if let Some(kind) = pointer_counterpart(event.kind) {
        out.push(SyntheticEvent::Pointer {
            kind,
            pointer_type,
            pointer_id,
            x: event.x,
            y: event.y,
            button,
        });
    }
    out
}

/// A loaded content document that events can be dispatched into
pub trait ContentDocument: Send + Sync {
    /// Resolve a structural locator, if it still matches
    fn query_locator(&self, locator: &str) -> Option<ElementHandle>;

    /// Hit test at content coordinates
    fn element_from_point(&self, x: f64, y: f64) -> Option<ElementHandle>;

    /// The document's root element
    fn root(&self) -> ElementHandle;

    fn dispatch(&self, target: ElementHandle, event: SyntheticEvent);

    /// Set the scroll offset directly
    fn scroll_to(&self, top: f64, left: f64);
}

/// The content a trace is replayed against
pub trait ReplayTarget: Send + Sync {
    /// The inner document, or `None` when it is not accessible
    /// (cross-origin or not yet loaded)
    fn content(&self) -> Option<Arc<dyn ContentDocument>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_pairs_with_pointer_click() {
        let events = synthesize(&InteractionEvent::click(0, 5.0, 6.0));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].type_name(), "click");
        assert!(!events[0].is_pointer());
        assert!(matches!(
            events[1],
            SyntheticEvent::Pointer {
                kind: PointerKind::Click,
                pointer_type: PointerType::Mouse,
                ..
            }
        ));
    }

    #[test]
    fn test_pointer_mapping() {
        let cases = [
            (InteractionKind::Mousedown, "pointerdown"),
            (InteractionKind::Mouseup, "pointerup"),
            (InteractionKind::Mousemove, "pointermove"),
        ];
        for (kind, expected) in cases {
            let events = synthesize(&InteractionEvent::pointer(kind, 0, 1.0, 1.0));
            assert_eq!(events[0].type_name(), kind.as_str());
            assert_eq!(events[1].type_name(), expected);
        }
    }

    #[test]
    fn test_touch_uses_first_touch_identifier() {
        let touches = vec![
            TouchPoint {
                identifier: 7,
                x: 1.0,
                y: 2.0,
            },
            TouchPoint {
                identifier: 8,
                x: 3.0,
                y: 4.0,
            },
        ];
        let events = synthesize(&InteractionEvent::touch(
            InteractionKind::Touchstart,
            0,
            touches,
        ));
        match (&events[0], &events[1]) {
            (
                SyntheticEvent::Touch { touches, .. },
                SyntheticEvent::Pointer {
                    kind,
                    pointer_type,
                    pointer_id,
                    ..
                },
            ) => {
                assert_eq!(touches.len(), 2);
                assert_eq!(*kind, PointerKind::Down);
                assert_eq!(*pointer_type, PointerType::Touch);
                assert_eq!(*pointer_id, 7);
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_scroll_is_single_notification() {
        let events = synthesize(&InteractionEvent::scroll(0, 120.0, 4.0));
        assert_eq!(
            events,
            vec![SyntheticEvent::Scroll {
                top: 120.0,
                left: 4.0
            }]
        );
    }
}
