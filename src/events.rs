//! Domain events
//!
//! ## Responsibilities
//!
//! - Inbound envelope from the VMS hub (`camera.added` / `camera.removed`)
//! - Outbound events published by the plugin (tagged variants, immutable
//!   facts built by pure constructors)

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Service tag stamped on every outbound event
pub const SOURCE_TAG: &str = "vigileye-plugin";

/// Routing key / event type: drowsiness detected
pub const DROWSINESS_DETECTED: &str = "drowsiness.detected";
/// Routing key / event type: alert triggered
pub const ALERT_TRIGGERED: &str = "alert.triggered";

/// Inbound envelope `{event_type, data}`
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of `camera.added`
#[derive(Debug, Clone, Deserialize)]
pub struct CameraAdded {
    pub camera_id: String,
    pub rtsp_url: String,
}

/// Payload of `camera.removed`
#[derive(Debug, Clone, Deserialize)]
pub struct CameraRemoved {
    pub camera_id: String,
}

/// Outbound event variants
///
/// Serializes flat with an `event_type` tag, matching the hub's envelope:
/// `{"event_type": "...", "timestamp": "...", "source": "...", ...fields}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type")]
pub enum OutboundEvent {
    #[serde(rename = "drowsiness.detected")]
    DrowsinessDetected {
        timestamp: String,
        source: String,
        camera_id: String,
        ear_value: f64,
        severity: String,
        duration_ms: u64,
    },
    #[serde(rename = "alert.triggered")]
    AlertTriggered {
        timestamp: String,
        source: String,
        camera_id: String,
        alert_type: String,
        priority: String,
        message: String,
    },
}

impl OutboundEvent {
    /// Build a drowsiness.detected event
    pub fn drowsiness_detected(camera_id: &str, ear_value: f64, duration_ms: u64) -> Self {
        Self::DrowsinessDetected {
            timestamp: Utc::now().to_rfc3339(),
            source: SOURCE_TAG.to_string(),
            camera_id: camera_id.to_string(),
            ear_value: round3(ear_value),
            severity: "high".to_string(),
            duration_ms,
        }
    }

    /// Build an alert.triggered event
    pub fn alert_triggered(camera_id: &str, ear_value: f64) -> Self {
        Self::AlertTriggered {
            timestamp: Utc::now().to_rfc3339(),
            source: SOURCE_TAG.to_string(),
            camera_id: camera_id.to_string(),
            alert_type: "drowsiness".to_string(),
            priority: "critical".to_string(),
            message: format!("Drowsiness detected - EAR: {:.3}", ear_value),
        }
    }

    /// Routing key for this event (equals its event_type tag)
    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::DrowsinessDetected { .. } => DROWSINESS_DETECTED,
            Self::AlertTriggered { .. } => ALERT_TRIGGERED,
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
