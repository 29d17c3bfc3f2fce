//! CameraSession - per-camera temporal detection state
//!
//! ## Responsibilities
//!
//! - Track the consecutive low-score sample count for one camera
//! - Edge-triggered alert bookkeeping (one alert per sustained excursion)
//! - Lifecycle flag (a stopped session accepts no further updates)
//!
//! Only transitions are reported so the orchestrator can act without
//! re-deriving state.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of feeding one scored sample into a session
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// Score at/above threshold: counter reset, alert-active cleared
    Recovered,
    /// Score below threshold, alert condition not (yet) met
    Counting { consecutive: u32 },
    /// Counter just reached the consecutive threshold with no active alert:
    /// exactly one alert fires for this excursion
    AlertTriggered {
        ear_value: f64,
        consecutive: u32,
        alert_number: u32,
    },
    /// Session is stopped; the sample was discarded
    Discarded,
}

/// Detection session for one monitored camera
#[derive(Debug, Clone, Serialize)]
pub struct CameraSession {
    pub camera_id: String,
    pub rtsp_url: String,
    pub started_at: DateTime<Utc>,
    pub last_ear: f64,
    pub frame_counter: u32,
    pub total_alerts: u32,
    pub alert_active: bool,
    pub is_active: bool,
    pub last_alert_at: Option<DateTime<Utc>>,
}

impl CameraSession {
    /// Create a new active session with zeroed counters
    pub fn new(camera_id: &str, rtsp_url: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            rtsp_url: rtsp_url.to_string(),
            started_at: Utc::now(),
            last_ear: 0.0,
            frame_counter: 0,
            total_alerts: 0,
            alert_active: false,
            is_active: true,
            last_alert_at: None,
        }
    }

    /// Feed one scored sample through the state machine.
    ///
    /// The threshold boundary is strict: a score exactly equal to the
    /// threshold counts as recovered, never as a low sample.
    pub fn record_score(
        &mut self,
        ear_value: f64,
        threshold: f64,
        consecutive_threshold: u32,
    ) -> SampleOutcome {
        if !self.is_active {
            return SampleOutcome::Discarded;
        }

        self.last_ear = ear_value;

        if ear_value >= threshold {
            self.frame_counter = 0;
            self.alert_active = false;
            return SampleOutcome::Recovered;
        }

        self.frame_counter += 1;

        if self.frame_counter >= consecutive_threshold && !self.alert_active {
            self.trigger_alert();
            return SampleOutcome::AlertTriggered {
                ear_value,
                consecutive: self.frame_counter,
                alert_number: self.total_alerts,
            };
        }

        SampleOutcome::Counting {
            consecutive: self.frame_counter,
        }
    }

    /// Record an alert: bump the cumulative count, stamp the time and latch
    /// the alert-active flag until the score recovers
    fn trigger_alert(&mut self) {
        self.total_alerts += 1;
        self.alert_active = true;
        self.last_alert_at = Some(Utc::now());
    }

    /// Stop the session (terminal; no further sample updates accepted)
    pub fn stop(&mut self) {
        self.is_active = false;
    }
}
