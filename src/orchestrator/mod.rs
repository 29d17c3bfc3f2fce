//! SessionOrchestrator - session registry and frame processing
//!
//! ## Responsibilities
//!
//! - Own the registry of (CameraSession, StreamSampler) pairs
//! - Lifecycle entry points for camera.added / camera.removed
//! - Wire sampler output through the scorer into session state transitions
//! - Trigger the alert pair exactly once per sustained excursion
//!
//! The registry is the only shared mutable structure in the system. Every
//! insert/lookup/delete and every session field mutation goes through its
//! single RwLock. Removal takes the entry out of the map before stopping the
//! sampler, so a late frame can never observe a removed session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::events::{CameraAdded, CameraRemoved, OutboundEvent};
use crate::messaging::EventPublisher;
use crate::sampler::StreamSampler;
use crate::scorer::{DrowsinessScorer, ScoreOutcome};
use crate::session::{CameraSession, SampleOutcome};

/// Registry entry: one monitored camera
struct CameraEntry {
    session: CameraSession,
    sampler: StreamSampler,
}

/// Aggregate counters for the metrics surface
#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub total: usize,
    pub active: usize,
    pub alerts: u32,
}

/// Per-session snapshot for the read-only HTTP surface
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub camera_id: String,
    pub started_at: DateTime<Utc>,
    pub last_ear: f64,
    pub frame_counter: u32,
    pub total_alerts: u32,
    pub alert_active: bool,
    pub is_active: bool,
    pub sampler_running: bool,
    pub last_alert_at: Option<DateTime<Utc>>,
}

/// Orchestrator instance
pub struct SessionOrchestrator {
    scorer: Arc<dyn DrowsinessScorer>,
    publisher: Arc<dyn EventPublisher>,
    ear_threshold: f64,
    consecutive_frames: u32,
    sample_interval: Duration,
    registry: RwLock<HashMap<String, CameraEntry>>,
}

impl SessionOrchestrator {
    /// Create a new orchestrator with an empty registry
    pub fn new(
        scorer: Arc<dyn DrowsinessScorer>,
        publisher: Arc<dyn EventPublisher>,
        ear_threshold: f64,
        consecutive_frames: u32,
        sample_interval: Duration,
    ) -> Self {
        Self {
            scorer,
            publisher,
            ear_threshold,
            consecutive_frames,
            sample_interval,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Handler for `camera.added`.
    ///
    /// A missing camera_id/rtsp_url is logged and the message is consumed.
    /// Re-adding an id that is already monitored is rejected with Conflict:
    /// the running session stays authoritative and the hub must remove the
    /// camera first.
    pub async fn handle_camera_added(self: &Arc<Self>, data: serde_json::Value) -> Result<()> {
        let added: CameraAdded = match serde_json::from_value(data) {
            Ok(added) => added,
            Err(e) => {
                tracing::error!(error = %e, "Invalid camera.added event: missing camera_id or rtsp_url");
                return Ok(());
            }
        };

        let mut registry = self.registry.write().await;

        if registry.contains_key(&added.camera_id) {
            return Err(Error::Conflict(format!(
                "camera {} already monitored",
                added.camera_id
            )));
        }

        tracing::info!(camera_id = %added.camera_id, "Adding camera");

        let session = CameraSession::new(&added.camera_id, &added.rtsp_url);
        let (sampler, mut frames) =
            StreamSampler::start(&added.camera_id, &added.rtsp_url, self.sample_interval);

        // Frame pump: drains the sampler's bounded queue into frame
        // processing; exits when the sampler closes its channel
        let orchestrator = self.clone();
        let camera_id = added.camera_id.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                orchestrator.process_frame(&camera_id, &frame).await;
            }
        });

        registry.insert(added.camera_id, CameraEntry { session, sampler });
        Ok(())
    }

    /// Handler for `camera.removed`.
    ///
    /// Unknown ids are a logged no-op. The entry leaves the registry before
    /// the sampler is stopped, so in-flight samples for the id are discarded
    /// by the lookup in `process_frame`.
    pub async fn handle_camera_removed(&self, data: serde_json::Value) -> Result<()> {
        let removed: CameraRemoved = match serde_json::from_value(data) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!(error = %e, "Invalid camera.removed event: missing camera_id");
                return Ok(());
            }
        };

        let entry = self.registry.write().await.remove(&removed.camera_id);

        let Some(mut entry) = entry else {
            tracing::warn!(camera_id = %removed.camera_id, "camera.removed for unknown camera");
            return Ok(());
        };

        tracing::info!(camera_id = %removed.camera_id, "Removing camera");

        entry.session.stop();
        entry.sampler.stop().await;
        Ok(())
    }

    /// Process one sample from a camera's sampler.
    ///
    /// Scoring runs outside the registry lock; the session is re-checked
    /// under the write lock afterwards because a remove may have won the
    /// race in between.
    pub async fn process_frame(&self, camera_id: &str, frame: &[u8]) {
        {
            let registry = self.registry.read().await;
            match registry.get(camera_id) {
                Some(entry) if entry.session.is_active => {}
                _ => return, // removed or stopped: discard
            }
        }

        let score = match self.scorer.score(frame).await {
            Ok(ScoreOutcome::Ear(ear)) => ear,
            Ok(ScoreOutcome::NoFace) => return,
            Err(e) => {
                tracing::warn!(camera_id = %camera_id, error = %e, "Scoring failed, sample skipped");
                return;
            }
        };

        let outcome = {
            let mut registry = self.registry.write().await;
            let Some(entry) = registry.get_mut(camera_id) else {
                return;
            };
            entry
                .session
                .record_score(score, self.ear_threshold, self.consecutive_frames)
        };

        if let SampleOutcome::AlertTriggered {
            ear_value,
            consecutive,
            alert_number,
        } = outcome
        {
            self.emit_alert(camera_id, ear_value, consecutive, alert_number)
                .await;
        }
    }

    /// Publish the DrowsinessDetected/AlertTriggered pair for one crossing.
    ///
    /// Publish failure is a recoverable local failure: logged, never
    /// propagated to the sampling path.
    async fn emit_alert(&self, camera_id: &str, ear_value: f64, consecutive: u32, alert_number: u32) {
        let duration_ms = u64::from(consecutive) * self.sample_interval.as_millis() as u64;

        tracing::warn!(
            camera_id = %camera_id,
            ear_value = ear_value,
            alert_number = alert_number,
            "Drowsiness alert triggered"
        );

        let detected = OutboundEvent::drowsiness_detected(camera_id, ear_value, duration_ms);
        let alert = OutboundEvent::alert_triggered(camera_id, ear_value);

        for event in [detected, alert] {
            let routing_key = event.routing_key();
            if let Err(e) = self.publisher.publish(routing_key, &event).await {
                tracing::error!(
                    camera_id = %camera_id,
                    routing_key = %routing_key,
                    error = %e,
                    "Failed to publish alert event"
                );
            }
        }
    }

    /// Number of currently active sessions
    pub async fn active_count(&self) -> usize {
        self.registry
            .read()
            .await
            .values()
            .filter(|e| e.session.is_active)
            .count()
    }

    /// Aggregate counters, computed from a live registry read
    pub async fn metrics(&self) -> Metrics {
        let registry = self.registry.read().await;
        Metrics {
            total: registry.len(),
            active: registry.values().filter(|e| e.session.is_active).count(),
            alerts: registry.values().map(|e| e.session.total_alerts).sum(),
        }
    }

    /// Per-session snapshots for the HTTP surface
    pub async fn session_snapshots(&self) -> Vec<SessionSnapshot> {
        self.registry
            .read()
            .await
            .values()
            .map(|entry| SessionSnapshot {
                camera_id: entry.session.camera_id.clone(),
                started_at: entry.session.started_at,
                last_ear: entry.session.last_ear,
                frame_counter: entry.session.frame_counter,
                total_alerts: entry.session.total_alerts,
                alert_active: entry.session.alert_active,
                is_active: entry.session.is_active,
                sampler_running: !entry.sampler.is_stopped(),
                last_alert_at: entry.session.last_alert_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    /// Scorer stub: frame bytes are a UTF-8 float, "noface" means no face
    struct StubScorer;

    #[async_trait]
    impl DrowsinessScorer for StubScorer {
        async fn score(&self, frame: &[u8]) -> Result<ScoreOutcome> {
            let text = std::str::from_utf8(frame).unwrap();
            if text == "noface" {
                return Ok(ScoreOutcome::NoFace);
            }
            Ok(ScoreOutcome::Ear(text.parse().unwrap()))
        }
    }

    /// In-memory publisher capturing emitted events
    #[derive(Default)]
    struct MemoryPublisher {
        published: Mutex<Vec<(String, OutboundEvent)>>,
    }

    #[async_trait]
    impl EventPublisher for MemoryPublisher {
        async fn publish(&self, routing_key: &str, event: &OutboundEvent) -> Result<()> {
            self.published
                .lock()
                .await
                .push((routing_key.to_string(), event.clone()));
            Ok(())
        }
    }

    fn orchestrator() -> (Arc<SessionOrchestrator>, Arc<MemoryPublisher>) {
        let publisher = Arc::new(MemoryPublisher::default());
        let orchestrator = Arc::new(SessionOrchestrator::new(
            Arc::new(StubScorer),
            publisher.clone(),
            0.2,
            20,
            Duration::from_millis(33),
        ));
        (orchestrator, publisher)
    }

    fn added(camera_id: &str) -> serde_json::Value {
        serde_json::json!({"camera_id": camera_id, "rtsp_url": format!("rtsp://host/{camera_id}")})
    }

    async fn feed(orchestrator: &SessionOrchestrator, camera_id: &str, score: &str, times: u32) {
        for _ in 0..times {
            orchestrator
                .process_frame(camera_id, score.as_bytes())
                .await;
        }
    }

    #[tokio::test]
    async fn test_add_then_conflict_on_readd() {
        let (orchestrator, _) = orchestrator();
        orchestrator.handle_camera_added(added("cam-1")).await.unwrap();

        let result = orchestrator.handle_camera_added(added("cam-1")).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(orchestrator.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_fields_consumed_silently() {
        let (orchestrator, _) = orchestrator();
        let result = orchestrator
            .handle_camera_added(serde_json::json!({"camera_id": "cam-1"}))
            .await;
        assert!(result.is_ok());
        assert_eq!(orchestrator.metrics().await.total, 0);
    }

    #[tokio::test]
    async fn test_alert_fires_once_per_excursion() {
        let (orchestrator, publisher) = orchestrator();
        orchestrator.handle_camera_added(added("cam-1")).await.unwrap();

        feed(&orchestrator, "cam-1", "0.1", 19).await;
        assert!(publisher.published.lock().await.is_empty());

        // 20th low frame fires exactly one event pair
        feed(&orchestrator, "cam-1", "0.1", 1).await;
        {
            let published = publisher.published.lock().await;
            assert_eq!(published.len(), 2);
            assert_eq!(published[0].0, "drowsiness.detected");
            assert_eq!(published[1].0, "alert.triggered");
        }

        // 21st low frame: no additional alert
        feed(&orchestrator, "cam-1", "0.1", 1).await;
        assert_eq!(publisher.published.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_recovery_then_second_alert() {
        let (orchestrator, publisher) = orchestrator();
        orchestrator.handle_camera_added(added("cam-1")).await.unwrap();

        feed(&orchestrator, "cam-1", "0.1", 20).await;
        feed(&orchestrator, "cam-1", "0.3", 1).await;
        feed(&orchestrator, "cam-1", "0.1", 20).await;

        let published = publisher.published.lock().await;
        assert_eq!(published.len(), 4);

        let metrics = orchestrator.metrics().await;
        assert_eq!(metrics.alerts, 2);
    }

    #[tokio::test]
    async fn test_no_face_leaves_counters_unchanged() {
        let (orchestrator, publisher) = orchestrator();
        orchestrator.handle_camera_added(added("cam-1")).await.unwrap();

        feed(&orchestrator, "cam-1", "0.1", 19).await;
        feed(&orchestrator, "cam-1", "noface", 5).await;
        feed(&orchestrator, "cam-1", "0.1", 1).await;

        // 20 counted low frames despite the no-face samples in between
        assert_eq!(publisher.published.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_removed_camera_discards_frames() {
        let (orchestrator, publisher) = orchestrator();
        orchestrator.handle_camera_added(added("cam-1")).await.unwrap();
        orchestrator
            .handle_camera_removed(serde_json::json!({"camera_id": "cam-1"}))
            .await
            .unwrap();

        feed(&orchestrator, "cam-1", "0.1", 25).await;
        assert!(publisher.published.lock().await.is_empty());
        assert_eq!(orchestrator.metrics().await.total, 0);
    }

    #[tokio::test]
    async fn test_remove_unknown_camera_is_noop() {
        let (orchestrator, _) = orchestrator();
        let result = orchestrator
            .handle_camera_removed(serde_json::json!({"camera_id": "ghost"}))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_independent_camera_counters() {
        let (orchestrator, publisher) = orchestrator();
        orchestrator.handle_camera_added(added("cam-a")).await.unwrap();
        orchestrator.handle_camera_added(added("cam-b")).await.unwrap();

        feed(&orchestrator, "cam-a", "0.1", 20).await;
        feed(&orchestrator, "cam-b", "0.1", 5).await;

        let published = publisher.published.lock().await;
        // Only cam-a alerted
        assert_eq!(published.len(), 2);
        for (_, event) in published.iter() {
            let json = serde_json::to_value(event).unwrap();
            assert_eq!(json["camera_id"], "cam-a");
        }
    }
}
