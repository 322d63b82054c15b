//! Podcast streaming events.
//!
//! The pipeline publishes an ordered event sequence per generation:
//! `processing*` → `segment_ready*` → exactly one terminal `complete` or
//! `error`. Observers of the same build see identical order: a
//! [`SharedBuild`] records history for late attachers and broadcasts live
//! events; each HTTP connection drains its own bounded forwarder queue.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};

/// Bound on each connection's event queue. A slow client parks only its own
/// forwarder.
pub const EVENT_QUEUE_DEPTH: usize = 4;

/// One event on the podcast generation stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PodcastEvent {
    /// Coarse progress before and between segments.
    Processing {
        progress: f32,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        segment_index: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_segments: Option<usize>,
    },
    /// One finished audio segment.
    SegmentReady {
        segment_index: usize,
        total_segments: usize,
        segment_url: String,
        duration_ms: u64,
        progress: f32,
    },
    /// Terminal success.
    Complete {
        cache_key: String,
        audio_url: String,
        script_url: String,
        progress: f32,
    },
    /// Terminal failure.
    Error { message: String },
}

impl PodcastEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Wire format: one SSE line, `data: <json>\n\n`.
    pub fn to_sse(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_owned());
        format!("data: {json}\n\n")
    }
}

/// Shared event fan-out for one in-flight build.
///
/// The builder publishes through [`publish`]; each observer gets the full
/// history so far plus a live receiver, so first-comers and late attachers
/// observe the same sequence.
///
/// [`publish`]: Self::publish
#[derive(Debug)]
pub struct SharedBuild {
    history: Mutex<Vec<PodcastEvent>>,
    live: broadcast::Sender<PodcastEvent>,
}

impl Default for SharedBuild {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedBuild {
    /// Create an empty build stream.
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(64);
        Self {
            history: Mutex::new(Vec::new()),
            live,
        }
    }

    /// Record and broadcast an event.
    ///
    /// The history push and the broadcast happen under one lock so that an
    /// attaching observer sees every event exactly once: either in its
    /// snapshot or on its live receiver, never both.
    pub fn publish(&self, event: PodcastEvent) {
        match self.history.lock() {
            Ok(mut history) => {
                history.push(event.clone());
                // No receivers is fine; history still serves attachers.
                let _ = self.live.send(event);
            }
            Err(_) => {
                let _ = self.live.send(event);
            }
        }
    }

    /// Attach an observer: returns the history so far and a live receiver.
    ///
    /// Taking the lock before subscribing makes the snapshot and the
    /// subscription atomic with respect to `publish`.
    pub fn attach(&self) -> (Vec<PodcastEvent>, broadcast::Receiver<PodcastEvent>) {
        match self.history.lock() {
            Ok(history) => (history.clone(), self.live.subscribe()),
            Err(_) => (Vec::new(), self.live.subscribe()),
        }
    }

    /// Spawn a forwarder bridging this build into a fresh bounded channel.
    ///
    /// The receiver sees history first, then live events, ending after the
    /// terminal event. Dropping the receiver stops the forwarder.
    pub fn subscribe(self: &std::sync::Arc<Self>) -> mpsc::Receiver<PodcastEvent> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (snapshot, mut live) = self.attach();
        tokio::spawn(async move {
            let mut terminal_seen = false;
            for event in snapshot {
                let is_terminal = event.is_terminal();
                if tx.send(event).await.is_err() {
                    return;
                }
                if is_terminal {
                    terminal_seen = true;
                }
            }
            if terminal_seen {
                return;
            }
            while let Ok(event) = live.recv().await {
                let is_terminal = event.is_terminal();
                if tx.send(event).await.is_err() {
                    return;
                }
                if is_terminal {
                    return;
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn processing(progress: f32) -> PodcastEvent {
        PodcastEvent::Processing {
            progress,
            message: "working".into(),
            segment_index: None,
            total_segments: None,
        }
    }

    fn complete() -> PodcastEvent {
        PodcastEvent::Complete {
            cache_key: "k".into(),
            audio_url: "/a".into(),
            script_url: "/s".into(),
            progress: 1.0,
        }
    }

    #[test]
    fn serde_uses_status_tag() {
        let json = serde_json::to_string(&processing(0.1)).expect("serialize");
        assert!(json.contains(r#""status":"processing""#));
        assert!(!json.contains("segment_index"));

        let json = serde_json::to_string(&complete()).expect("serialize");
        assert!(json.contains(r#""status":"complete""#));
        assert!(json.contains(r#""cache_key":"k""#));
    }

    #[test]
    fn segment_ready_fields_serialize() {
        let event = PodcastEvent::SegmentReady {
            segment_index: 3,
            total_segments: 20,
            segment_url: "/files/seg_3.wav".into(),
            duration_ms: 4_200,
            progress: 0.5,
        };
        let json = serde_json::to_string(&event).expect("serialize");
        let parsed: PodcastEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, event);
    }

    #[test]
    fn terminal_classification() {
        assert!(!processing(0.0).is_terminal());
        assert!(complete().is_terminal());
        assert!(PodcastEvent::Error {
            message: "x".into()
        }
        .is_terminal());
    }

    #[test]
    fn sse_wire_format() {
        let line = processing(0.25).to_sse();
        assert!(line.starts_with("data: {"));
        assert!(line.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn subscriber_sees_history_then_live() {
        let build = Arc::new(SharedBuild::new());
        build.publish(processing(0.1));
        build.publish(processing(0.2));

        let mut rx = build.subscribe();
        assert_eq!(rx.recv().await, Some(processing(0.1)));
        assert_eq!(rx.recv().await, Some(processing(0.2)));

        build.publish(complete());
        assert_eq!(rx.recv().await, Some(complete()));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn late_attacher_after_terminal_gets_full_sequence() {
        let build = Arc::new(SharedBuild::new());
        build.publish(processing(0.5));
        build.publish(complete());

        let mut rx = build.subscribe();
        assert_eq!(rx.recv().await, Some(processing(0.5)));
        assert_eq!(rx.recv().await, Some(complete()));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn two_observers_see_identical_order() {
        let build = Arc::new(SharedBuild::new());
        let mut a = build.subscribe();
        build.publish(processing(0.1));
        let mut b = build.subscribe();
        build.publish(processing(0.9));
        build.publish(complete());

        let mut seen_a = Vec::new();
        while let Some(e) = a.recv().await {
            seen_a.push(e);
        }
        let mut seen_b = Vec::new();
        while let Some(e) = b.recv().await {
            seen_b.push(e);
        }
        assert_eq!(seen_a, seen_b);
        assert_eq!(seen_a.len(), 3);
        assert!(seen_a.last().map(PodcastEvent::is_terminal).unwrap_or(false));
    }

    #[tokio::test]
    async fn dropped_receiver_stops_forwarder() {
        let build = Arc::new(SharedBuild::new());
        let rx = build.subscribe();
        drop(rx);
        // Publishing after the receiver is gone must not panic or block.
        build.publish(processing(0.1));
        build.publish(complete());
    }
}
