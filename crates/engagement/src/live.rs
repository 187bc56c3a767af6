//! Live preview stream
//!
//! Reads frames from a [`FrameSource`], analyses them against a shared
//! session pipeline and emits JPEG-encoded frames with their metrics. When
//! the stream is cancelled, the consumer goes away, or the source runs dry,
//! the open question segment is flushed and the source is released before
//! returning.

use std::sync::Arc;
use std::time::Instant;

use camera_capture::{encode_jpeg, CameraConfig, FrameSource};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::analysis::FrameMetrics;
use crate::pipeline::EngagementPipeline;
use crate::session::QuestionMetrics;
use crate::EngagementError;

/// Pipeline shared between the live loop and request handlers
pub type SharedPipeline = Arc<Mutex<EngagementPipeline>>;

/// One emitted preview frame
#[derive(Debug, Clone)]
pub struct LiveFrame {
    pub sequence: u32,
    pub jpeg: Vec<u8>,
    /// `None` when analysis skipped this frame
    pub metrics: Option<FrameMetrics>,
}

/// How a live stream ended
#[derive(Debug, Clone)]
pub struct LiveSummary {
    pub frames_emitted: u64,
    /// Segment flushed on the way out, if it had frames
    pub closed_segment: Option<QuestionMetrics>,
}

/// Owns a started source and stops it when dropped, including while a
/// panicking blocking task unwinds
struct StopOnDrop<S: FrameSource>(S);

impl<S: FrameSource> Drop for StopOnDrop<S> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// Read, analyse and encode one frame
fn step<S: FrameSource>(source: &mut S, pipeline: &SharedPipeline, jpeg_quality: u8) -> Result<Option<LiveFrame>, EngagementError> {
    let Some(frame) = source.read_frame()? else {
        return Ok(None);
    };
    let metrics = pipeline.blocking_lock().process_video_frame(&frame, Instant::now());
    let jpeg = encode_jpeg(&frame, jpeg_quality)?;
    Ok(Some(LiveFrame {
        sequence: frame.sequence,
        jpeg,
        metrics,
    }))
}

/// Run the live loop until cancelled, the consumer drops, or the source ends.
///
/// A source that cannot be opened is reported as
/// [`CameraError::Unavailable`](camera_capture::CameraError::Unavailable).
pub async fn run_live_stream<S>(
    mut source: S,
    pipeline: SharedPipeline,
    sink: mpsc::Sender<LiveFrame>,
    mut shutdown: watch::Receiver<bool>,
    camera: &CameraConfig,
) -> Result<LiveSummary, EngagementError>
where
    S: FrameSource + 'static,
{
    source.start()?;
    let mut source = StopOnDrop(source);
    info!("Live stream started at {} fps", camera.fps);

    let mut ticker = tokio::time::interval(camera.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let quality = camera.jpeg_quality;
    let mut frames_emitted = 0u64;

    let outcome: Result<(), EngagementError> = loop {
        if *shutdown.borrow() {
            break Ok(());
        }
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Live stream cancelled");
                    break Ok(());
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let shared = pipeline.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let result = step(&mut source.0, &shared, quality);
            (source, result)
        });
        let result = match handle.await {
            Ok((returned, result)) => {
                source = returned;
                result
            }
            Err(e) => {
                // The guard stopped the source while the task unwound
                warn!("Live stream task failed: {}", e);
                let closed_segment = pipeline.lock().await.close_segment(Instant::now());
                return Ok(LiveSummary {
                    frames_emitted,
                    closed_segment,
                });
            }
        };

        match result {
            Ok(Some(frame)) => {
                // A consumer that stopped reading must not hold up a stop request
                let sent = tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        info!("Live stream cancelled while the consumer stalled");
                        break Ok(());
                    }
                    sent = sink.send(frame) => sent,
                };
                if sent.is_err() {
                    info!("Live stream consumer disconnected");
                    break Ok(());
                }
                frames_emitted += 1;
            }
            Ok(None) => {
                info!("Live stream source exhausted");
                break Ok(());
            }
            Err(e) => {
                warn!("Live stream read failed: {}", e);
                break Err(e);
            }
        }
    };

    drop(source);
    let closed_segment = pipeline.lock().await.close_segment(Instant::now());
    info!("Live stream stopped after {} frames", frames_emitted);

    outcome.map(|()| LiveSummary {
        frames_emitted,
        closed_segment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngagementConfig;
    use crate::detector::{DetectorBank, Observation, Rect};
    use camera_capture::{CameraError, MemorySource, VideoFrame};
    use image::{GrayImage, Rgb, RgbImage};

    struct AlwaysFrontal;

    impl DetectorBank for AlwaysFrontal {
        fn detect(&self, _gray: &GrayImage) -> Result<Observation, EngagementError> {
            Ok(Observation::Frontal {
                face: Rect::new(2, 2, 12, 12),
                eyes: 2,
                smiling: true,
            })
        }
    }

    fn shared() -> SharedPipeline {
        let pipeline =
            EngagementPipeline::with_detector(EngagementConfig::default(), Box::new(AlwaysFrontal)).unwrap();
        Arc::new(Mutex::new(pipeline))
    }

    fn frames(n: u32) -> Vec<VideoFrame> {
        (0..n)
            .map(|i| VideoFrame::from_rgb(RgbImage::from_pixel(16, 16, Rgb([90, 90, 90]))).with_sequence(i + 1, 0))
            .collect()
    }

    fn fast_camera() -> CameraConfig {
        CameraConfig {
            fps: 1000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_runs_until_source_exhausted() {
        let pipeline = shared();
        let (tx, mut rx) = mpsc::channel(32);
        let (_stop, stop_rx) = watch::channel(false);

        let summary = run_live_stream(MemorySource::new(frames(5)), pipeline.clone(), tx, stop_rx, &fast_camera())
            .await
            .unwrap();
        assert_eq!(summary.frames_emitted, 5);
        assert_eq!(summary.closed_segment.unwrap().frame_count, 5);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(&first.jpeg[..2], &[0xFF, 0xD8]);
        assert!(first.metrics.unwrap().face_visible);

        let analytics = pipeline.lock().await.session_analytics(Instant::now());
        assert_eq!(analytics.total_frames_analyzed, 5);
        assert_eq!(analytics.per_question_metrics.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_flushes_segment() {
        let pipeline = shared();
        let (tx, mut rx) = mpsc::channel(1);
        let (stop, stop_rx) = watch::channel(false);
        let camera = fast_camera();

        let stream = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { run_live_stream(MemorySource::new(frames(1000)), pipeline, tx, stop_rx, &camera).await }
        });
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        stop.send(true).unwrap();
        // Keep draining so the loop is never stuck on a full channel
        while rx.recv().await.is_some() {}

        let summary = stream.await.unwrap().unwrap();
        assert!(summary.frames_emitted >= 3 && summary.frames_emitted < 1000);
        let analytics = pipeline.lock().await.session_analytics(Instant::now());
        assert_eq!(analytics.per_question_metrics.len(), 1);
        assert_eq!(analytics.per_question_metrics[0].frame_count, analytics.total_frames_analyzed);
    }

    #[tokio::test]
    async fn test_cancel_reaches_stalled_consumer() {
        let pipeline = shared();
        let (tx, mut rx) = mpsc::channel(1);
        let (stop, stop_rx) = watch::channel(false);
        let camera = fast_camera();

        let stream = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { run_live_stream(MemorySource::new(frames(1000)), pipeline, tx, stop_rx, &camera).await }
        });
        // Read one frame, then stop reading and let the channel fill up
        rx.recv().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stop.send(true).unwrap();

        let summary = tokio::time::timeout(std::time::Duration::from_secs(5), stream)
            .await
            .expect("stop was not noticed while the channel was full")
            .unwrap()
            .unwrap();
        assert!(summary.frames_emitted >= 1 && summary.frames_emitted < 1000);
        assert!(summary.closed_segment.is_some());
    }

    #[tokio::test]
    async fn test_consumer_drop_stops_stream() {
        let pipeline = shared();
        let (tx, rx) = mpsc::channel(4);
        let (_stop, stop_rx) = watch::channel(false);
        drop(rx);

        let summary = run_live_stream(MemorySource::new(frames(50)), pipeline, tx, stop_rx, &fast_camera())
            .await
            .unwrap();
        assert_eq!(summary.frames_emitted, 0);
        // The one frame analysed before the send failed is still flushed
        assert_eq!(summary.closed_segment.unwrap().frame_count, 1);
    }

    /// Source that panics on read and records whether it was stopped
    struct PanickingSource {
        stopped: Arc<std::sync::atomic::AtomicBool>,
    }

    impl FrameSource for PanickingSource {
        fn start(&mut self) -> Result<(), CameraError> {
            Ok(())
        }

        fn stop(&mut self) {
            self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
        }

        fn is_streaming(&self) -> bool {
            true
        }

        fn read_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
            panic!("sensor fault");
        }
    }

    #[tokio::test]
    async fn test_panicking_read_still_releases_source() {
        let stopped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let source = PanickingSource {
            stopped: stopped.clone(),
        };
        let (tx, _rx) = mpsc::channel(4);
        let (_stop, stop_rx) = watch::channel(false);

        let summary = run_live_stream(source, shared(), tx, stop_rx, &fast_camera()).await.unwrap();
        assert_eq!(summary.frames_emitted, 0);
        assert!(summary.closed_segment.is_none());
        assert!(stopped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unavailable_camera() {
        let (tx, _rx) = mpsc::channel(4);
        let (_stop, stop_rx) = watch::channel(false);
        let err = run_live_stream(MemorySource::unavailable(), shared(), tx, stop_rx, &fast_camera())
            .await
            .unwrap_err();
        assert!(matches!(err, EngagementError::Camera(CameraError::Unavailable(_))));
        assert!(err.to_string().starts_with("camera unavailable"));
    }
}
