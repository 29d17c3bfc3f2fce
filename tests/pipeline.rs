//! End-to-end pipeline scenario: lifecycle events through the orchestrator
//! with a stub scorer and an in-memory publisher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use vigileye_plugin::events::OutboundEvent;
use vigileye_plugin::messaging::EventPublisher;
use vigileye_plugin::orchestrator::SessionOrchestrator;
use vigileye_plugin::scorer::{DrowsinessScorer, ScoreOutcome};
use vigileye_plugin::Result;

/// Frames encode their score as UTF-8 text
struct TextScorer;

#[async_trait]
impl DrowsinessScorer for TextScorer {
    async fn score(&self, frame: &[u8]) -> Result<ScoreOutcome> {
        let text = std::str::from_utf8(frame).unwrap();
        if text == "noface" {
            return Ok(ScoreOutcome::NoFace);
        }
        Ok(ScoreOutcome::Ear(text.parse().unwrap()))
    }
}

#[derive(Default)]
struct MemoryPublisher {
    published: Mutex<Vec<(String, serde_json::Value)>>,
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, routing_key: &str, event: &OutboundEvent) -> Result<()> {
        self.published
            .lock()
            .await
            .push((routing_key.to_string(), serde_json::to_value(event)?));
        Ok(())
    }
}

fn pipeline() -> (Arc<SessionOrchestrator>, Arc<MemoryPublisher>) {
    let publisher = Arc::new(MemoryPublisher::default());
    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::new(TextScorer),
        publisher.clone(),
        0.2,
        20,
        Duration::from_millis(33),
    ));
    (orchestrator, publisher)
}

async fn add_camera(orchestrator: &Arc<SessionOrchestrator>, camera_id: &str) {
    orchestrator
        .handle_camera_added(serde_json::json!({
            "camera_id": camera_id,
            "rtsp_url": format!("rtsp://host/{camera_id}"),
        }))
        .await
        .unwrap();
}

async fn feed(orchestrator: &SessionOrchestrator, camera_id: &str, score: &str, times: u32) {
    for _ in 0..times {
        orchestrator.process_frame(camera_id, score.as_bytes()).await;
    }
}

/// Threshold 0.2, consecutive 20. 19 low frames stay
/// silent, the 20th fires one alert pair, the 21st adds nothing, recovery
/// re-arms, and a second excursion produces a second distinct pair.
#[tokio::test]
async fn sustained_excursion_produces_exactly_one_alert_pair() {
    let (orchestrator, publisher) = pipeline();
    add_camera(&orchestrator, "cam-1").await;

    feed(&orchestrator, "cam-1", "0.1", 19).await;
    assert!(publisher.published.lock().await.is_empty());

    feed(&orchestrator, "cam-1", "0.1", 1).await;
    {
        let published = publisher.published.lock().await;
        assert_eq!(published.len(), 2);

        let (key, detected) = &published[0];
        assert_eq!(key, "drowsiness.detected");
        assert_eq!(detected["camera_id"], "cam-1");
        assert_eq!(detected["ear_value"], 0.1);
        assert_eq!(detected["severity"], "high");
        assert_eq!(detected["duration_ms"], 20 * 33);

        let (key, alert) = &published[1];
        assert_eq!(key, "alert.triggered");
        assert_eq!(alert["camera_id"], "cam-1");
        assert_eq!(alert["alert_type"], "drowsiness");
        assert_eq!(alert["priority"], "critical");

        // Timestamps must be well-formed
        for (_, event) in published.iter() {
            let ts = event["timestamp"].as_str().unwrap();
            assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
        }
    }

    // 21st low frame: still exactly one pair
    feed(&orchestrator, "cam-1", "0.1", 1).await;
    assert_eq!(publisher.published.lock().await.len(), 2);

    // Recovery resets the counter and clears alert-active
    feed(&orchestrator, "cam-1", "0.3", 1).await;
    let snapshots = orchestrator.session_snapshots().await;
    assert_eq!(snapshots[0].frame_counter, 0);
    assert!(!snapshots[0].alert_active);

    // Second sustained excursion: second distinct pair, alert count bumped
    feed(&orchestrator, "cam-1", "0.1", 20).await;
    assert_eq!(publisher.published.lock().await.len(), 4);
    assert_eq!(orchestrator.metrics().await.alerts, 2);
}

#[tokio::test]
async fn boundary_score_never_counts_as_low() {
    let (orchestrator, publisher) = pipeline();
    add_camera(&orchestrator, "cam-1").await;

    for _ in 0..30 {
        feed(&orchestrator, "cam-1", "0.2", 1).await;
    }
    assert!(publisher.published.lock().await.is_empty());
    assert_eq!(orchestrator.session_snapshots().await[0].frame_counter, 0);
}

#[tokio::test]
async fn cameras_are_fully_independent() {
    let (orchestrator, publisher) = pipeline();
    add_camera(&orchestrator, "cam-a").await;
    add_camera(&orchestrator, "cam-b").await;

    feed(&orchestrator, "cam-a", "0.1", 20).await;
    feed(&orchestrator, "cam-b", "0.1", 19).await;

    let published = publisher.published.lock().await;
    assert_eq!(published.len(), 2);
    for (_, event) in published.iter() {
        assert_eq!(event["camera_id"], "cam-a");
    }
}

#[tokio::test]
async fn removal_stops_state_changes_and_events() {
    let (orchestrator, publisher) = pipeline();
    add_camera(&orchestrator, "cam-1").await;
    feed(&orchestrator, "cam-1", "0.1", 10).await;

    orchestrator
        .handle_camera_removed(serde_json::json!({"camera_id": "cam-1"}))
        .await
        .unwrap();

    feed(&orchestrator, "cam-1", "0.1", 30).await;
    assert!(publisher.published.lock().await.is_empty());

    let metrics = orchestrator.metrics().await;
    assert_eq!(metrics.total, 0);
    assert_eq!(metrics.active, 0);
}
