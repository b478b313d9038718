mod events;
mod runner;

pub use events::{SessionStatus, StreamEvent, TrackPoint};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::analytics::{self, ClipReport, Detector, DetectorPlan, FramePipeline, Sensitivity};
use crate::camera::{FfmpegInput, FfmpegSource, FrameSource, SourceError, SyntheticSource};
use crate::config::Config;
use crate::recording::{FfmpegRecorder, RecordingSink, SinkError};
use crate::storage::IncidentStore;

use runner::RunnerContext;

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("analysis task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Opens the collaborators a session needs. Called once per session.
pub trait SessionFactory: Send + Sync + 'static {
    fn open_source(&self) -> Result<Box<dyn FrameSource>, SourceError>;

    /// Used when `open_source` fails. Must always succeed.
    fn fallback_source(&self) -> Box<dyn FrameSource> {
        Box::new(SyntheticSource::new())
    }

    fn detectors(&self) -> Vec<Box<dyn Detector>>;

    fn open_recording(
        &self,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn RecordingSink>, SinkError>;

    fn open_clip(&self, path: &Path) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Camera, recorder and detectors as configured on this machine.
pub struct DeviceFactory {
    camera: FfmpegInput,
    recordings_dir: PathBuf,
    plan: DetectorPlan,
}

impl DeviceFactory {
    pub fn new(config: &Config, plan: DetectorPlan) -> Self {
        Self {
            camera: FfmpegInput::camera(&config.camera),
            recordings_dir: config.storage.recordings_dir(),
            plan,
        }
    }
}

impl SessionFactory for DeviceFactory {
    fn open_source(&self) -> Result<Box<dyn FrameSource>, SourceError> {
        Ok(Box::new(FfmpegSource::open(&self.camera)?))
    }

    fn detectors(&self) -> Vec<Box<dyn Detector>> {
        self.plan.instantiate()
    }

    fn open_recording(
        &self,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn RecordingSink>, SinkError> {
        Ok(Box::new(FfmpegRecorder::start(
            &self.recordings_dir,
            width,
            height,
            fps,
        )?))
    }

    fn open_clip(&self, path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
        let input = FfmpegInput::file(path, self.camera.width, self.camera.height);
        Ok(Box::new(FfmpegSource::open(&input)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyIdle,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub active: bool,
    pub sensitivity: Sensitivity,
    pub total_incidents: usize,
}

struct ActiveSession {
    id: Uuid,
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Clears the active flag when the runner exits, including by panic.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Starts, stops and observes the single surveillance session.
pub struct SessionController {
    config: Arc<Config>,
    factory: Arc<dyn SessionFactory>,
    store: Arc<dyn IncidentStore>,
    events: broadcast::Sender<Arc<StreamEvent>>,
    state: Mutex<Option<ActiveSession>>,
    active: Arc<AtomicBool>,
    sensitivity: std::sync::Mutex<Sensitivity>,
}

impl SessionController {
    pub fn new(
        config: Arc<Config>,
        factory: Arc<dyn SessionFactory>,
        store: Arc<dyn IncidentStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let sensitivity = config.surveillance.sensitivity;
        Self {
            config,
            factory,
            store,
            events,
            state: Mutex::new(None),
            active: Arc::new(AtomicBool::new(false)),
            sensitivity: std::sync::Mutex::new(sensitivity),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn sensitivity(&self) -> Sensitivity {
        *self.sensitivity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> SessionSnapshot {
        SessionSnapshot {
            active: self.is_active(),
            sensitivity: self.sensitivity(),
            total_incidents: self.store.count(),
        }
    }

    pub async fn start(&self, sensitivity: Sensitivity) -> StartOutcome {
        let mut state = self.state.lock().await;

        if let Some(session) = state.as_ref() {
            if self.is_active() {
                tracing::debug!(session = %session.id, "start requested while active");
                return StartOutcome::AlreadyActive;
            }
        }
        // A runner that ended on its own is still joined before replacing it.
        if let Some(finished) = state.take() {
            reap(finished).await;
        }

        *self.sensitivity.lock().unwrap_or_else(PoisonError::into_inner) = sensitivity;

        let id = Uuid::new_v4();
        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = RunnerContext {
            session: id,
            config: Arc::clone(&self.config),
            sensitivity,
            factory: Arc::clone(&self.factory),
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            shutdown: Arc::clone(&shutdown),
        };

        self.active.store(true, Ordering::SeqCst);
        let active = Arc::clone(&self.active);
        let handle = tokio::task::spawn_blocking(move || {
            let _guard = ActiveGuard(active);
            runner::run(ctx);
        });

        *state = Some(ActiveSession {
            id,
            shutdown,
            handle,
        });
        StartOutcome::Started
    }

    /// Signals the runner and waits until it has released its resources.
    pub async fn stop(&self) -> StopOutcome {
        let mut state = self.state.lock().await;
        let Some(session) = state.take() else {
            return StopOutcome::AlreadyIdle;
        };

        let was_running = self.is_active();
        session.shutdown.store(true, Ordering::SeqCst);
        reap(session).await;

        if was_running {
            StopOutcome::Stopped
        } else {
            StopOutcome::AlreadyIdle
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StreamEvent>> {
        self.events.subscribe()
    }

    /// Drops a subscription; losing the last one stops the session when so configured.
    pub async fn release_subscriber(&self, rx: broadcast::Receiver<Arc<StreamEvent>>) {
        drop(rx);
        if self.events.receiver_count() == 0
            && self.config.surveillance.stop_on_disconnect
            && self.is_active()
        {
            tracing::info!("last stream subscriber left, stopping session");
            self.stop().await;
        }
    }

    /// Broadcasts an idle event every heartbeat interval while no session runs.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let period = Duration::from_millis(controller.config.surveillance.heartbeat_interval_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if !controller.is_active() {
                    let _ = controller.events.send(Arc::new(StreamEvent::idle()));
                }
            }
        })
    }

    /// Runs a recorded clip through a fresh clip pipeline and stores its incidents.
    pub async fn analyze_clip(
        &self,
        path: PathBuf,
        sensitivity: Sensitivity,
    ) -> Result<ClipReport, SessionError> {
        let config = Arc::clone(&self.config);
        let factory = Arc::clone(&self.factory);
        let store = Arc::clone(&self.store);

        let report = tokio::task::spawn_blocking(move || -> Result<ClipReport, SourceError> {
            let mut source = factory.open_clip(&path)?;
            let mut pipeline = FramePipeline::clip(&config, sensitivity, factory.detectors());
            Ok(analytics::analyze_clip(
                source.as_mut(),
                &mut pipeline,
                store.as_ref(),
                analytics::CLIP_SAMPLE_EVERY,
            ))
        })
        .await??;

        Ok(report)
    }
}

async fn reap(session: ActiveSession) {
    match session.handle.await {
        Ok(()) => tracing::debug!(session = %session.id, "runner joined"),
        Err(e) if e.is_panic() => {
            tracing::error!(session = %session.id, error = %e, "session runner panicked")
        }
        Err(e) => tracing::warn!(session = %session.id, error = %e, "session runner cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{DetectorError, DetectorKind, IncidentEvent, RawDetection};
    use crate::frame::Frame;
    use crate::storage::StoreError;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::AtomicUsize;

    /// Quiet frames a live source shows before the block first appears.
    const SETTLE_FRAMES: usize = 15;
    const BLOCK: u32 = 40;

    #[derive(Clone, Copy, PartialEq)]
    enum Behaviour {
        /// Endless frames.
        Moving,
        /// `n` frames, then end of stream.
        Finite(usize),
        /// Panics on the read after `n` frames.
        PanicsAfter(usize),
        /// Every `n`-th read fails with a transient error.
        Flaky(usize),
    }

    #[derive(Clone, Copy, PartialEq)]
    enum SinkBehaviour {
        Working,
        OpenFails,
        WriteFails,
    }

    /// A dark 320x120 scene. After `settle` frames a bright block steps one
    /// block width to the right every `stride` frames, wrapping at the edge.
    fn scene(frame: usize, settle: usize, stride: usize) -> Frame {
        let mut image = RgbImage::from_pixel(320, 120, Rgb([30; 3]));
        if frame > settle {
            let step = (frame - settle - 1) / stride;
            let x0 = (step as u32 % 8) * BLOCK;
            for y in 40..40 + BLOCK {
                for x in x0..x0 + BLOCK {
                    image.put_pixel(x, y, Rgb([220; 3]));
                }
            }
        }
        Frame::new(image)
    }

    struct MockSource {
        behaviour: Behaviour,
        settle: usize,
        stride: usize,
        reads: usize,
        frames: usize,
        closed: Arc<AtomicBool>,
    }

    impl FrameSource for MockSource {
        fn read(&mut self) -> Result<Frame, SourceError> {
            self.reads += 1;
            match self.behaviour {
                Behaviour::PanicsAfter(n) if self.frames >= n => panic!("camera driver crashed"),
                Behaviour::Finite(n) if self.frames >= n => return Err(SourceError::EndOfStream),
                Behaviour::Flaky(n) if self.reads % n == 0 => {
                    return Err(SourceError::Read("device busy".into()))
                }
                _ => {}
            }
            self.frames += 1;
            Ok(scene(self.frames, self.settle, self.stride))
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    struct MockSink {
        behaviour: SinkBehaviour,
        writes: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl RecordingSink for MockSink {
        fn write(&mut self, _frame: &Frame) -> Result<(), SinkError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.behaviour == SinkBehaviour::WriteFails {
                return Err(SinkError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Reports one box around the bright block, if any.
    struct BlockDetector;

    impl Detector for BlockDetector {
        fn name(&self) -> &'static str {
            "block"
        }

        fn kind(&self) -> DetectorKind {
            DetectorKind::Person
        }

        fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectorError> {
            Ok(frame
                .image()
                .enumerate_pixels()
                .find(|(_, _, p)| p.0[0] > 128)
                .map(|(x, y, _)| RawDetection {
                    x: x as f32,
                    y: y as f32,
                    width: BLOCK as f32,
                    height: BLOCK as f32,
                    weight: None,
                })
                .into_iter()
                .collect())
        }
    }

    struct MockFactory {
        behaviour: Behaviour,
        sink: SinkBehaviour,
        settle: usize,
        stride: usize,
        available: bool,
        opened: AtomicUsize,
        recordings_opened: AtomicUsize,
        source_closed: Arc<AtomicBool>,
        sink_closed: Arc<AtomicBool>,
        sink_writes: Arc<AtomicUsize>,
        fallback_used: Arc<AtomicBool>,
    }

    impl MockFactory {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                sink: SinkBehaviour::Working,
                settle: SETTLE_FRAMES,
                stride: 1,
                available: true,
                opened: AtomicUsize::new(0),
                recordings_opened: AtomicUsize::new(0),
                source_closed: Arc::new(AtomicBool::new(false)),
                sink_closed: Arc::new(AtomicBool::new(false)),
                sink_writes: Arc::new(AtomicUsize::new(0)),
                fallback_used: Arc::new(AtomicBool::new(false)),
            }
        }

        fn with_sink(mut self, sink: SinkBehaviour) -> Self {
            self.sink = sink;
            self
        }

        fn source(&self) -> Box<dyn FrameSource> {
            Box::new(MockSource {
                behaviour: self.behaviour,
                settle: self.settle,
                stride: self.stride,
                reads: 0,
                frames: 0,
                closed: Arc::clone(&self.source_closed),
            })
        }
    }

    impl SessionFactory for MockFactory {
        fn open_source(&self) -> Result<Box<dyn FrameSource>, SourceError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if !self.available {
                return Err(SourceError::Unavailable("no camera".into()));
            }
            Ok(self.source())
        }

        fn fallback_source(&self) -> Box<dyn FrameSource> {
            self.fallback_used.store(true, Ordering::SeqCst);
            self.source()
        }

        fn detectors(&self) -> Vec<Box<dyn Detector>> {
            vec![Box::new(BlockDetector)]
        }

        fn open_recording(
            &self,
            _width: u32,
            _height: u32,
            _fps: u32,
        ) -> Result<Box<dyn RecordingSink>, SinkError> {
            self.recordings_opened.fetch_add(1, Ordering::SeqCst);
            if self.sink == SinkBehaviour::OpenFails {
                return Err(SinkError::Unavailable("no encoder".into()));
            }
            Ok(Box::new(MockSink {
                behaviour: self.sink,
                writes: Arc::clone(&self.sink_writes),
                closed: Arc::clone(&self.sink_closed),
            }))
        }

        fn open_clip(&self, _path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
            Ok(self.source())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        persisted: AtomicUsize,
    }

    impl IncidentStore for MemoryStore {
        fn persist(&self, _event: &IncidentEvent) -> Result<Uuid, StoreError> {
            self.persisted.fetch_add(1, Ordering::SeqCst);
            Ok(Uuid::new_v4())
        }

        fn count(&self) -> usize {
            self.persisted.load(Ordering::SeqCst)
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.surveillance.frame_interval_ms = 5;
        config.surveillance.heartbeat_interval_ms = 10;
        config.surveillance.cooldown_secs = 60;
        config
    }

    fn controller(factory: Arc<MockFactory>) -> (Arc<SessionController>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let controller = SessionController::new(Arc::new(test_config()), factory, store.clone());
        (Arc::new(controller), store)
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    async fn next_events(
        rx: &mut broadcast::Receiver<Arc<StreamEvent>>,
        count: usize,
    ) -> Vec<Arc<StreamEvent>> {
        let mut events = Vec::with_capacity(count);
        while events.len() < count {
            match rx.recv().await {
                Ok(event) => events.push(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
        events
    }

    #[tokio::test]
    async fn idle_heartbeat_keeps_arriving() {
        let (controller, _) = controller(Arc::new(MockFactory::new(Behaviour::Moving)));
        let mut rx = controller.subscribe();
        let heartbeat = controller.spawn_heartbeat();

        for event in next_events(&mut rx, 3).await {
            assert_eq!(event.status, SessionStatus::Idle);
            assert!(event.frame.is_none());
        }
        heartbeat.abort();
    }

    #[tokio::test]
    async fn stop_releases_source_and_recording() {
        let factory = Arc::new(MockFactory::new(Behaviour::Moving));
        let (controller, _) = controller(factory.clone());

        assert_eq!(controller.start(Sensitivity::High).await, StartOutcome::Started);
        wait_until(|| factory.sink_writes.load(Ordering::SeqCst) > 2).await;
        assert!(controller.is_active());

        assert_eq!(controller.stop().await, StopOutcome::Stopped);
        assert!(!controller.is_active());
        assert!(factory.source_closed.load(Ordering::SeqCst));
        assert!(factory.sink_closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_while_idle_is_a_no_op() {
        let (controller, _) = controller(Arc::new(MockFactory::new(Behaviour::Moving)));
        assert_eq!(controller.stop().await, StopOutcome::AlreadyIdle);
    }

    #[tokio::test]
    async fn second_start_does_not_open_another_source() {
        let factory = Arc::new(MockFactory::new(Behaviour::Moving));
        let (controller, _) = controller(factory.clone());

        assert_eq!(controller.start(Sensitivity::Medium).await, StartOutcome::Started);
        assert_eq!(controller.start(Sensitivity::Low).await, StartOutcome::AlreadyActive);
        wait_until(|| factory.opened.load(Ordering::SeqCst) == 1).await;
        assert_eq!(controller.sensitivity(), Sensitivity::Medium);

        controller.stop().await;
        assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn end_of_stream_ends_session_and_releases() {
        let factory = Arc::new(MockFactory::new(Behaviour::Finite(5)));
        let (controller, _) = controller(factory.clone());

        controller.start(Sensitivity::High).await;
        wait_until(|| !controller.is_active()).await;

        assert!(factory.source_closed.load(Ordering::SeqCst));
        assert!(factory.sink_closed.load(Ordering::SeqCst));
        assert_eq!(factory.sink_writes.load(Ordering::SeqCst), 5);
        assert_eq!(controller.stop().await, StopOutcome::AlreadyIdle);
    }

    #[tokio::test]
    async fn panicking_read_still_releases_source() {
        let factory = Arc::new(MockFactory::new(Behaviour::PanicsAfter(0)));
        let (controller, _) = controller(factory.clone());

        controller.start(Sensitivity::High).await;
        wait_until(|| !controller.is_active()).await;
        controller.stop().await;

        assert!(factory.source_closed.load(Ordering::SeqCst));
        assert_eq!(factory.recordings_opened.load(Ordering::SeqCst), 0);
        assert_eq!(controller.start(Sensitivity::High).await, StartOutcome::Started);
        controller.stop().await;
    }

    #[tokio::test]
    async fn panic_mid_recording_closes_the_sink() {
        let factory = Arc::new(MockFactory::new(Behaviour::PanicsAfter(4)));
        let (controller, _) = controller(factory.clone());

        controller.start(Sensitivity::High).await;
        wait_until(|| !controller.is_active()).await;
        controller.stop().await;

        assert_eq!(factory.sink_writes.load(Ordering::SeqCst), 4);
        assert!(factory.sink_closed.load(Ordering::SeqCst));
        assert!(factory.source_closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn transient_read_failures_keep_the_session_alive() {
        let factory = Arc::new(MockFactory::new(Behaviour::Flaky(3)));
        let (controller, _) = controller(factory.clone());

        let mut rx = controller.subscribe();
        controller.start(Sensitivity::High).await;
        let events = next_events(&mut rx, 12).await;

        let failures = events.iter().filter(|e| e.error.is_some()).count();
        assert_eq!(failures, 4);
        assert!(events.iter().all(|e| e.status == SessionStatus::Active));
        assert!(events
            .iter()
            .filter(|e| e.error.is_some())
            .all(|e| e.frame.is_none() && e.error.as_deref() == Some("frame read failed: device busy")));
        assert!(controller.is_active());

        controller.stop().await;
        assert!(factory.source_closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn recorder_that_cannot_open_leaves_session_running() {
        let factory = Arc::new(MockFactory::new(Behaviour::Moving).with_sink(SinkBehaviour::OpenFails));
        let (controller, _) = controller(factory.clone());

        let mut rx = controller.subscribe();
        controller.start(Sensitivity::High).await;
        let events = next_events(&mut rx, 6).await;

        assert!(events.iter().all(|e| e.status == SessionStatus::Active && !e.recording));
        assert!(events.iter().all(|e| e.frame.is_some()));
        assert_eq!(factory.recordings_opened.load(Ordering::SeqCst), 1);
        assert!(controller.is_active());
        controller.stop().await;
    }

    #[tokio::test]
    async fn failing_recording_write_disables_recording() {
        let factory =
            Arc::new(MockFactory::new(Behaviour::Moving).with_sink(SinkBehaviour::WriteFails));
        let (controller, _) = controller(factory.clone());

        let mut rx = controller.subscribe();
        controller.start(Sensitivity::High).await;
        let events = next_events(&mut rx, 6).await;

        assert!(events.iter().all(|e| e.status == SessionStatus::Active && !e.recording));
        assert_eq!(factory.sink_writes.load(Ordering::SeqCst), 1);
        assert!(factory.sink_closed.load(Ordering::SeqCst));
        assert_eq!(factory.recordings_opened.load(Ordering::SeqCst), 1);
        assert!(controller.is_active());
        controller.stop().await;
    }

    #[tokio::test]
    async fn last_subscriber_leaving_stops_session() {
        let factory = Arc::new(MockFactory::new(Behaviour::Moving));
        let (controller, _) = controller(factory.clone());

        let mut rx = controller.subscribe();
        controller.start(Sensitivity::High).await;

        let event = &next_events(&mut rx, 1).await[0];
        assert_eq!(event.status, SessionStatus::Active);
        assert!(event.frame.is_some());

        controller.release_subscriber(rx).await;
        assert!(!controller.is_active());
        assert!(factory.source_closed.load(Ordering::SeqCst));
        assert!(factory.sink_closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unavailable_camera_falls_back() {
        let mut factory = MockFactory::new(Behaviour::Moving);
        factory.available = false;
        let factory = Arc::new(factory);
        let (controller, _) = controller(factory.clone());

        assert_eq!(controller.start(Sensitivity::High).await, StartOutcome::Started);
        wait_until(|| factory.sink_writes.load(Ordering::SeqCst) > 0).await;
        assert!(factory.fallback_used.load(Ordering::SeqCst));
        controller.stop().await;
    }

    #[tokio::test]
    async fn incidents_respect_session_cooldown() {
        let factory = Arc::new(MockFactory::new(Behaviour::Moving));
        let (controller, store) = controller(factory.clone());

        let mut rx = controller.subscribe();
        controller.start(Sensitivity::High).await;
        let events = next_events(&mut rx, SETTLE_FRAMES + 10).await;
        controller.stop().await;

        // Quiet frames first, then the block keeps moving inside one cooldown.
        assert!(events[..SETTLE_FRAMES].iter().all(|e| !e.motion_detected));
        assert!(events[SETTLE_FRAMES].motion_detected);
        assert!(events[SETTLE_FRAMES].incident_detected);
        assert_eq!(events.iter().filter(|e| e.incident_detected).count(), 1);
        assert_eq!(store.count(), 1);
        assert_eq!(controller.status().total_incidents, 1);
    }

    #[tokio::test]
    async fn clip_analysis_stores_sampled_incidents() {
        let mut factory = MockFactory::new(Behaviour::Finite(150));
        factory.settle = 120;
        factory.stride = 10;
        let factory = Arc::new(factory);
        let (controller, store) = controller(factory.clone());

        let report = controller
            .analyze_clip(PathBuf::from("clip.mp4"), Sensitivity::High)
            .await
            .unwrap();

        assert_eq!(report.frames_processed, 150);
        // Twelve quiet samples settle the model; samples 130, 140 and 150 fire.
        assert_eq!(report.incidents_detected, 3);
        assert_eq!(store.count(), 3);
        assert!(factory.source_closed.load(Ordering::SeqCst));
        assert!(!controller.is_active());
    }
}
