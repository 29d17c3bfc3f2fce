//! VigilEye Plugin Library
//!
//! Drowsiness detection plugin for the VMS hub.
//!
//! ## Architecture
//!
//! 1. EventConsumer - camera lifecycle events from the bus (one at a time)
//! 2. SessionOrchestrator - session registry, frame processing, alerting
//! 3. StreamSampler - per-camera RTSP acquisition loop (ffmpeg MJPEG pipe)
//! 4. DrowsinessScorer - external perception collaborator boundary
//! 5. EventPublisher - alert events back to the bus (persistent delivery)
//! 6. WebAPI - read-only health/metrics surface
//!
//! ## Design Principles
//!
//! - The orchestrator's registry is the single shared mutable structure;
//!   all cross-task session mutation goes through its one lock
//! - Alerts are edge-triggered: one pair per sustained excursion below the
//!   EAR threshold, never one per frame
//! - All state is in-memory and ephemeral

pub mod config;
pub mod error;
pub mod events;
pub mod messaging;
pub mod orchestrator;
pub mod sampler;
pub mod scorer;
pub mod session;
pub mod web_api;

pub use error::{Error, Result};
