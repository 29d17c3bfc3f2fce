//! StreamSampler - per-camera RTSP acquisition loop
//!
//! ## Responsibilities
//!
//! - Own one camera's ffmpeg capture process (MJPEG over a pipe)
//! - Deliver JPEG frames into a bounded channel (explicit backpressure)
//! - Cooperative stop with a bounded join; the capture process is killed
//!   on drop either way
//!
//! No automatic reconnection: if the source cannot be opened or reads keep
//! failing, the camera silently stops producing samples until an external
//! remove/add cycle restarts it.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bounded frame queue depth between sampler and orchestrator
const FRAME_QUEUE_DEPTH: usize = 4;

/// Sleep between retries after a failed read
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Bounded wait for the loop task to exit on stop
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// JPEG start-of-image marker
const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Handle to one camera's sampling loop
pub struct StreamSampler {
    camera_id: String,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
}

impl StreamSampler {
    /// Start the acquisition loop for one camera.
    ///
    /// Returns the sampler handle and the receiving end of its frame queue.
    pub fn start(
        camera_id: &str,
        rtsp_url: &str,
        sample_interval: Duration,
    ) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let cancel = CancellationToken::new();
        let stopped = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(sample_loop(
            camera_id.to_string(),
            rtsp_url.to_string(),
            sample_interval,
            tx,
            cancel.clone(),
            stopped.clone(),
        ));

        tracing::info!(camera_id = %camera_id, "Stream sampler started");

        (
            Self {
                camera_id: camera_id.to_string(),
                cancel,
                handle: Some(handle),
                stopped,
            },
            rx,
        )
    }

    /// Whether the loop has exited (source unreachable or stopped)
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Stop the loop cooperatively and wait up to a bounded timeout.
    ///
    /// A loop stuck in a blocking read past the timeout is aborted; dropping
    /// the task drops the ffmpeg child, and kill_on_drop releases the
    /// capture either way.
    pub async fn stop(mut self) {
        self.cancel.cancel();

        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
                Ok(_) => {
                    tracing::info!(camera_id = %self.camera_id, "Stream sampler stopped");
                }
                Err(_) => {
                    handle.abort();
                    tracing::warn!(
                        camera_id = %self.camera_id,
                        timeout_ms = STOP_TIMEOUT.as_millis() as u64,
                        "Sampler did not exit within timeout, task aborted"
                    );
                }
            }
        }
    }
}

/// The acquisition loop: spawn ffmpeg, split MJPEG frames off its stdout,
/// push them into the bounded queue at the configured cadence.
async fn sample_loop(
    camera_id: String,
    rtsp_url: String,
    sample_interval: Duration,
    tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    stopped: Arc<AtomicBool>,
) {
    // fps filter keeps ffmpeg's output near the nominal cadence; drift is
    // not corrected against wall clock
    let fps = (1000 / sample_interval.as_millis().max(1)) as u32;

    let mut child = match Command::new("ffmpeg")
        .args([
            "-rtsp_transport",
            "tcp",
            "-i",
            &rtsp_url,
            "-vf",
            &format!("fps={}", fps.max(1)),
            "-f",
            "image2pipe",
            "-vcodec",
            "mjpeg",
            "-loglevel",
            "error",
            "-",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(camera_id = %camera_id, error = %e, "Failed to open stream source");
            stopped.store(true, Ordering::Relaxed);
            return;
        }
    };

    let mut stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            tracing::error!(camera_id = %camera_id, "No stdout pipe from capture process");
            stopped.store(true, Ordering::Relaxed);
            return;
        }
    };

    let mut buf: Vec<u8> = Vec::with_capacity(64 * 1024);
    let mut chunk = [0u8; 8192];
    let mut read_failed = false;

    loop {
        // Drain any complete frames already buffered before reading more
        if let Some(frame) = split_frame(&mut buf) {
            if tx.send(frame).await.is_err() {
                // Receiver gone, orchestrator dropped this camera
                break;
            }

            // Pacing sleep approximating the nominal cadence
            tokio::select! {
                _ = tokio::time::sleep(sample_interval) => {}
                _ = cancel.cancelled() => break,
            }
            continue;
        }

        let read = tokio::select! {
            read = stdout.read(&mut chunk) => read,
            _ = cancel.cancelled() => break,
        };

        match read {
            Ok(0) | Err(_) => {
                // EOF or read failure: retry the read, never reconnect
                if !read_failed {
                    read_failed = true;
                    tracing::error!(
                        camera_id = %camera_id,
                        "Stream read failed, retrying (no reconnection)"
                    );
                }
                tokio::select! {
                    _ = tokio::time::sleep(READ_RETRY_DELAY) => {}
                    _ = cancel.cancelled() => break,
                }
            }
            Ok(n) => {
                read_failed = false;
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }

    stopped.store(true, Ordering::Relaxed);
    // child is dropped here; kill_on_drop releases the capture
    drop(child);
}

/// Split one complete JPEG frame off the front of the buffer.
///
/// FF bytes inside entropy-coded data are always stuffed as FF00 (restart
/// markers are FFD0-FFD7), so scanning for the EOI marker is unambiguous.
fn split_frame(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let start = find_marker(buf, &SOI)?;
    let end = find_marker(&buf[start + 2..], &EOI)? + start + 2;

    let frame = buf[start..end + 2].to_vec();
    buf.drain(..end + 2);
    Some(frame)
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}
