use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use idmatch_core::{
    extract_reference, Camera, CameraError, CameraGuard, ConfigError, EmbeddingProvider, Frame,
    FrameReadError, MatchScorer, Progress, ReferenceError, ReferenceFace, SessionError, SessionState,
    VerificationConfig, VerificationSession,
};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    CameraUnavailable(#[from] CameraError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("a verification session is running")]
    Busy,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the controller to the engine thread.
enum EngineRequest {
    Register {
        document: Frame,
        reply: oneshot::Sender<Result<ReferenceFace, EngineError>>,
    },
    Start {
        reply: oneshot::Sender<Result<Progress, EngineError>>,
    },
    Shutdown,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    stop: Arc<AtomicBool>,
    progress: watch::Receiver<Progress>,
}

impl EngineHandle {
    /// Extract and keep the reference face from a document image.
    ///
    /// A failed extraction clears any previously registered reference.
    pub async fn register_document(&self, document: Frame) -> Result<ReferenceFace, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Register {
                document,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Open the camera and start a session against the registered reference.
    pub async fn start(&self) -> Result<Progress, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Start { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Ask the running session to stop before its next frame.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Progress snapshots, updated after every frame.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    /// Resolve once session `id` reaches a terminal state.
    pub async fn wait_finished(&self, id: Uuid) -> Result<Progress, EngineError> {
        let mut rx = self.progress.clone();
        loop {
            {
                let progress = rx.borrow_and_update();
                if progress.session_id == Some(id) && progress.is_terminal() {
                    return Ok(progress.clone());
                }
            }
            rx.changed().await.map_err(|_| EngineError::ChannelClosed)?;
        }
    }

    /// Stop any running session and end the engine thread.
    pub async fn shutdown(&self) {
        self.stop();
        let _ = self.tx.send(EngineRequest::Shutdown).await;
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the session, the detector and the camera. The camera is
/// opened per session and released when the session leaves `Running`.
pub fn spawn_engine<P, S>(
    config: VerificationConfig,
    provider: P,
    scorer: S,
    camera: Box<dyn Camera>,
) -> Result<EngineHandle, EngineError>
where
    P: EmbeddingProvider + 'static,
    S: MatchScorer + 'static,
{
    let session = VerificationSession::new(config, provider, scorer)?;
    let stop = Arc::new(AtomicBool::new(false));
    let (progress_tx, progress_rx) = watch::channel(session.progress());
    let (tx, rx) = mpsc::channel::<EngineRequest>(4);

    let worker = Worker {
        session,
        camera,
        reference: None,
        stop: stop.clone(),
        progress: progress_tx,
    };

    std::thread::Builder::new()
        .name("idmatch-engine".into())
        .spawn(move || worker.run(rx))
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        stop,
        progress: progress_rx,
    })
}

enum Flow {
    Continue,
    Shutdown,
}

struct Worker<P, S> {
    session: VerificationSession<P, S>,
    camera: Box<dyn Camera>,
    reference: Option<ReferenceFace>,
    stop: Arc<AtomicBool>,
    progress: watch::Sender<Progress>,
}

impl<P: EmbeddingProvider, S: MatchScorer> Worker<P, S> {
    fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>) {
        tracing::info!("engine thread started");
        while let Some(req) = rx.blocking_recv() {
            if let Flow::Shutdown = self.handle_idle(req, &mut rx) {
                break;
            }
        }
        tracing::info!("engine thread exiting");
    }

    fn handle_idle(&mut self, req: EngineRequest, rx: &mut mpsc::Receiver<EngineRequest>) -> Flow {
        match req {
            EngineRequest::Register { document, reply } => {
                let _ = reply.send(self.register(&document));
                Flow::Continue
            }
            EngineRequest::Start { reply } => match self.begin() {
                Ok((camera, progress)) => {
                    let _ = reply.send(Ok(progress));
                    self.drive(camera, rx)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "start refused");
                    let _ = reply.send(Err(e));
                    Flow::Continue
                }
            },
            EngineRequest::Shutdown => Flow::Shutdown,
        }
    }

    fn register(&mut self, document: &Frame) -> Result<ReferenceFace, EngineError> {
        match extract_reference(self.session.provider_mut(), document) {
            Ok(reference) => {
                self.reference = Some(reference.clone());
                Ok(reference)
            }
            Err(e) => {
                self.reference = None;
                Err(e.into())
            }
        }
    }

    /// Checks the reference, opens the camera, then enters `Running`.
    fn begin(&mut self) -> Result<(CameraGuard, Progress), EngineError> {
        let Some(reference) = self.reference.as_ref() else {
            return Err(SessionError::NotRegistered.into());
        };
        let camera = CameraGuard::acquire(&mut *self.camera)?;
        self.stop.store(false, Ordering::SeqCst);
        let progress = self.session.start(Some(reference))?;
        self.progress.send_replace(progress.clone());
        Ok((camera, progress))
    }

    /// Frame loop for one session. Requests and the stop flag are checked
    /// between frames. The camera is released before the terminal snapshot
    /// is published.
    ///
    /// A failed read is numbered as the frame after the last one delivered,
    /// so failures and frames share the source's sequence.
    fn drive(&mut self, mut camera: CameraGuard, rx: &mut mpsc::Receiver<EngineRequest>) -> Flow {
        let mut next_sequence = 1u64;
        loop {
            if self.stop.swap(false, Ordering::SeqCst) {
                self.finish_early(camera);
                return Flow::Continue;
            }

            let mut shutdown = false;
            loop {
                match rx.try_recv() {
                    Ok(req) => {
                        if let Flow::Shutdown = self.handle_busy(req) {
                            shutdown = true;
                            break;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        shutdown = true;
                        break;
                    }
                }
            }
            if shutdown {
                self.finish_early(camera);
                return Flow::Shutdown;
            }

            let progress = match camera.read_frame() {
                Ok(frame) => {
                    next_sequence = frame.sequence + 1;
                    self.session.ingest(&frame)
                }
                Err(FrameReadError::EndOfStream) => self.session.abort("frame source ended"),
                Err(e) => {
                    let sequence = next_sequence;
                    next_sequence += 1;
                    self.session.record_frame_failure(sequence, &e.to_string())
                }
            };
            if progress.is_terminal() {
                drop(camera);
                self.progress.send_replace(progress);
                return Flow::Continue;
            }
            self.progress.send_replace(progress);
        }
    }

    fn handle_busy(&mut self, req: EngineRequest) -> Flow {
        match req {
            EngineRequest::Register { reply, .. } => {
                let _ = reply.send(Err(EngineError::Busy));
                Flow::Continue
            }
            EngineRequest::Start { reply } => {
                let _ = reply.send(Err(SessionError::AlreadyRunning.into()));
                Flow::Continue
            }
            EngineRequest::Shutdown => Flow::Shutdown,
        }
    }

    fn finish_early(&mut self, camera: CameraGuard) {
        drop(camera);
        if self.session.state() == SessionState::Running {
            let progress = self.session.stop();
            self.progress.send_replace(progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use idmatch_core::{
        BoundingBox, DetectedFace, Embedding, EuclideanScorer, FrameSource, ProviderError,
    };

    use super::*;

    /// Every frame holds one face equal to the reference.
    struct AlwaysFace;

    impl EmbeddingProvider for AlwaysFace {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<DetectedFace>, ProviderError> {
            Ok(vec![DetectedFace {
                bbox: BoundingBox::new(0.0, 0.0, 4.0, 4.0),
                confidence: 0.9,
                embedding: Embedding::new(vec![0.0, 0.0]),
            }])
        }
    }

    #[derive(Clone, Copy)]
    enum Mode {
        Frames,
        Failing,
        /// One good frame, then read errors.
        FailAfterFirst,
        /// One good frame, then end of stream.
        Single,
        Missing,
    }

    struct TestSource {
        mode: Mode,
        sequence: u64,
        released: Arc<AtomicUsize>,
    }

    impl FrameSource for TestSource {
        fn read_frame(&mut self) -> Result<Frame, FrameReadError> {
            std::thread::sleep(Duration::from_millis(1));
            self.sequence += 1;
            match self.mode {
                Mode::Failing => Err(FrameReadError::Timeout),
                Mode::FailAfterFirst if self.sequence > 1 => Err(FrameReadError::Timeout),
                Mode::Single if self.sequence > 1 => Err(FrameReadError::EndOfStream),
                _ => Ok(Frame::blank(4, 4, self.sequence)),
            }
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TestCamera {
        mode: Mode,
        released: Arc<AtomicUsize>,
    }

    impl Camera for TestCamera {
        fn open(&mut self) -> Result<Box<dyn FrameSource>, CameraError> {
            if let Mode::Missing = self.mode {
                return Err(CameraError::Unavailable("/dev/video0 busy".into()));
            }
            Ok(Box::new(TestSource {
                mode: self.mode,
                sequence: 0,
                released: self.released.clone(),
            }))
        }
    }

    fn engine(mode: Mode, config: VerificationConfig) -> (EngineHandle, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let camera = TestCamera {
            mode,
            released: released.clone(),
        };
        let handle =
            spawn_engine(config, AlwaysFace, EuclideanScorer, Box::new(camera)).unwrap();
        (handle, released)
    }

    fn short_config() -> VerificationConfig {
        VerificationConfig {
            required_frames_per_challenge: 3,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_session_completes_and_releases_camera() {
        let (handle, released) = engine(Mode::Frames, short_config());
        handle.register_document(Frame::blank(4, 4, 0)).await.unwrap();

        let started = handle.start().await.unwrap();
        assert_eq!(started.state, SessionState::Running);

        let id = started.session_id.unwrap();
        let done = handle.wait_finished(id).await.unwrap();
        assert_eq!(done.state, SessionState::Completed);
        let decision = done.decision.unwrap();
        assert_eq!(decision.detected_frames, 18);
        assert!(decision.passed);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_without_document() {
        let (handle, released) = engine(Mode::Frames, short_config());
        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Session(SessionError::NotRegistered)));
        assert_eq!(handle.subscribe().borrow().state, SessionState::Idle);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_camera_unavailable() {
        let (handle, _) = engine(Mode::Missing, short_config());
        handle.register_document(Frame::blank(4, 4, 0)).await.unwrap();
        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, EngineError::CameraUnavailable(_)));
        assert_eq!(handle.subscribe().borrow().state, SessionState::Idle);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_between_frames() {
        let config = VerificationConfig {
            required_frames_per_challenge: 100_000,
            ..Default::default()
        };
        let (handle, released) = engine(Mode::Frames, config);
        handle.register_document(Frame::blank(4, 4, 0)).await.unwrap();
        let id = handle.start().await.unwrap().session_id.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop();

        let done = handle.wait_finished(id).await.unwrap();
        assert_eq!(done.state, SessionState::Stopped);
        assert!(done.decision.is_none());
        assert!(done.stats.detected_frames > 0);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_busy_while_running() {
        let config = VerificationConfig {
            required_frames_per_challenge: 100_000,
            ..Default::default()
        };
        let (handle, _) = engine(Mode::Frames, config);
        handle.register_document(Frame::blank(4, 4, 0)).await.unwrap();
        let id = handle.start().await.unwrap().session_id.unwrap();

        let err = handle.register_document(Frame::blank(4, 4, 0)).await.unwrap_err();
        assert!(matches!(err, EngineError::Busy));
        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Session(SessionError::AlreadyRunning)));

        handle.stop();
        handle.wait_finished(id).await.unwrap();
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_camera_aborts() {
        let (handle, released) = engine(Mode::Failing, short_config());
        handle.register_document(Frame::blank(4, 4, 0)).await.unwrap();
        let id = handle.start().await.unwrap().session_id.unwrap();

        let done = handle.wait_finished(id).await.unwrap();
        assert_eq!(done.state, SessionState::Aborted);
        assert_eq!(done.stats.failed_frames, 3);
        assert!(done.decision.is_none());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_end_of_stream_aborts_with_zero_failure_limit() {
        let config = VerificationConfig {
            max_consecutive_frame_failures: 0,
            ..short_config()
        };
        let (handle, released) = engine(Mode::Single, config);
        handle.register_document(Frame::blank(4, 4, 0)).await.unwrap();
        let id = handle.start().await.unwrap().session_id.unwrap();

        let done = tokio::time::timeout(Duration::from_millis(500), handle.wait_finished(id))
            .await
            .expect("session did not finish")
            .unwrap();
        assert_eq!(done.state, SessionState::Aborted);
        assert_eq!(done.abort_reason.as_deref(), Some("frame source ended"));
        assert_eq!(done.stats.frames_seen, 1);
        assert_eq!(done.stats.failed_frames, 0);
        assert!(done.decision.is_none());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_reads_continue_source_numbering() {
        let (handle, _) = engine(Mode::FailAfterFirst, short_config());
        handle.register_document(Frame::blank(4, 4, 0)).await.unwrap();
        let id = handle.start().await.unwrap().session_id.unwrap();

        let done = handle.wait_finished(id).await.unwrap();
        assert_eq!(done.state, SessionState::Aborted);
        assert_eq!(done.stats.detected_frames, 1);
        assert_eq!(done.stats.failed_frames, 3);
        // Frame 1 was delivered; failures are numbered 2, 3 and 4.
        let report = done.frame.unwrap();
        assert_eq!(report.sequence, 4);
        assert!(report.failure.is_some());
        handle.shutdown().await;
    }
}
