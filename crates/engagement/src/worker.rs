//! Session worker
//!
//! One worker owns one session's pipeline, so frames of a session are
//! analysed strictly one at a time. Frames go through a single-slot mailbox
//! with a drop-oldest policy: a frame arriving while another is in flight
//! replaces whatever frame is still waiting, and the newest pending frame is
//! always the next one analysed. Control messages travel on their own
//! channel and are never dropped.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::analysis::FrameMetrics;
use crate::metric_names;
use crate::pipeline::EngagementPipeline;
use crate::session::{QuestionMetrics, SessionAnalytics};
use crate::EngagementError;

/// Capacity of the per-frame metrics channel
const UPDATE_CHANNEL_CAPACITY: usize = 16;
const CONTROL_CHANNEL_CAPACITY: usize = 8;

/// Single-slot frame mailbox
#[derive(Default)]
struct Mailbox {
    slot: Mutex<Option<String>>,
    ready: Notify,
}

impl Mailbox {
    /// Store a payload; returns true when it replaced a waiting one
    fn put(&self, payload: String) -> bool {
        let replaced = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            slot.replace(payload).is_some()
        };
        self.ready.notify_one();
        replaced
    }

    fn take(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

enum Control {
    NewQuestion(oneshot::Sender<Option<QuestionMetrics>>),
    Reset(oneshot::Sender<()>),
    EndSession(oneshot::Sender<SessionAnalytics>),
    Analytics(oneshot::Sender<SessionAnalytics>),
}

enum Event {
    Control(Option<Control>),
    Frame,
}

/// Handle to a running session worker
pub struct SessionWorker {
    mailbox: Arc<Mailbox>,
    control: mpsc::Sender<Control>,
    task: JoinHandle<Option<SessionAnalytics>>,
}

impl SessionWorker {
    /// Spawn a worker around `pipeline`. Metrics of each analysed frame are
    /// delivered on the returned receiver.
    pub fn spawn(pipeline: EngagementPipeline) -> (Self, mpsc::Receiver<FrameMetrics>) {
        let mailbox = Arc::new(Mailbox::default());
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);

        gauge!(metric_names::ACTIVE_SESSIONS).increment(1.0);
        let task = tokio::spawn(run(pipeline, mailbox.clone(), control_rx, update_tx));

        let worker = Self {
            mailbox,
            control: control_tx,
            task,
        };
        (worker, update_rx)
    }

    /// Queue a frame payload. Returns true when a waiting frame was dropped
    /// to make room.
    pub fn submit_frame(&self, payload: impl Into<String>) -> bool {
        let dropped = self.mailbox.put(payload.into());
        if dropped {
            counter!(metric_names::FRAMES_DROPPED).increment(1);
            debug!("Dropped a pending frame in favour of a newer one");
        }
        dropped
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Control) -> Result<T, EngagementError> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(make(tx))
            .await
            .map_err(|_| EngagementError::WorkerClosed)?;
        rx.await.map_err(|_| EngagementError::WorkerClosed)
    }

    /// Close the current question segment and start the next one
    pub async fn new_question(&self) -> Result<Option<QuestionMetrics>, EngagementError> {
        self.request(Control::NewQuestion).await
    }

    pub async fn reset_session(&self) -> Result<(), EngagementError> {
        self.request(Control::Reset).await
    }

    /// Close the open segment and report the whole session
    pub async fn end_session(&self) -> Result<SessionAnalytics, EngagementError> {
        self.request(Control::EndSession).await
    }

    /// Snapshot of the session so far
    pub async fn analytics(&self) -> Result<SessionAnalytics, EngagementError> {
        self.request(Control::Analytics).await
    }

    /// Stop the worker. A frame still waiting in the mailbox is analysed
    /// first, then the open segment is flushed into the returned analytics.
    pub async fn shutdown(self) -> Result<SessionAnalytics, EngagementError> {
        let Self { control, task, .. } = self;
        drop(control);
        match task.await {
            Ok(Some(analytics)) => Ok(analytics),
            Ok(None) => Err(EngagementError::WorkerClosed),
            Err(e) => {
                error!("Session worker failed: {}", e);
                Err(EngagementError::WorkerClosed)
            }
        }
    }
}

/// Analyse one payload on the blocking pool. `None` when the analysis
/// panicked, which ends the session.
async fn analyse(
    mut pipeline: EngagementPipeline,
    payload: String,
) -> Option<(EngagementPipeline, Option<FrameMetrics>)> {
    // Detection is CPU-bound; keep it off the async workers
    let handle = tokio::task::spawn_blocking(move || {
        let metrics = pipeline.process_frame(&payload, Instant::now());
        (pipeline, metrics)
    });
    match handle.await {
        Ok(done) => Some(done),
        Err(e) => {
            error!("Frame analysis panicked, closing session: {}", e);
            gauge!(metric_names::ACTIVE_SESSIONS).decrement(1.0);
            None
        }
    }
}

async fn run(
    mut pipeline: EngagementPipeline,
    mailbox: Arc<Mailbox>,
    mut control: mpsc::Receiver<Control>,
    updates: mpsc::Sender<FrameMetrics>,
) -> Option<SessionAnalytics> {
    info!("Session worker started");

    loop {
        let event = tokio::select! {
            biased;
            msg = control.recv() => Event::Control(msg),
            _ = mailbox.ready.notified() => Event::Frame,
        };

        match event {
            Event::Control(None) => break,
            Event::Control(Some(msg)) => {
                let now = Instant::now();
                match msg {
                    Control::NewQuestion(reply) => {
                        let _ = reply.send(pipeline.new_question(now));
                    }
                    Control::Reset(reply) => {
                        pipeline.reset_session(now);
                        let _ = reply.send(());
                    }
                    Control::EndSession(reply) => {
                        let _ = reply.send(pipeline.end_session(now));
                    }
                    Control::Analytics(reply) => {
                        let _ = reply.send(pipeline.session_analytics(now));
                    }
                }
            }
            Event::Frame => {
                let Some(payload) = mailbox.take() else {
                    continue;
                };
                let (returned, metrics) = analyse(pipeline, payload).await?;
                pipeline = returned;
                if let Some(metrics) = metrics {
                    if updates.send(metrics).await.is_err() {
                        debug!("Metrics receiver gone");
                    }
                }
            }
        }
    }

    if let Some(payload) = mailbox.take() {
        debug!("Analysing the frame still pending at shutdown");
        let (returned, metrics) = analyse(pipeline, payload).await?;
        pipeline = returned;
        // Nobody may be reading any more; the frame still counts in the analytics
        if let Some(metrics) = metrics {
            let _ = updates.try_send(metrics);
        }
    }

    gauge!(metric_names::ACTIVE_SESSIONS).decrement(1.0);
    let analytics = pipeline.end_session(Instant::now());
    info!("Session worker stopped");
    Some(analytics)
}
