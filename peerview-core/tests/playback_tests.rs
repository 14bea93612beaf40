//! Playback state machine tests
//!
//! Drives a [`PlaybackController`] with a scripted media engine and render
//! surface, firing engine and surface callbacks in the orders a real platform
//! produces them.

use parking_lot::Mutex;
use peerview_core::*;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::TryRecvError;

const SURFACE: SurfaceHandle = SurfaceHandle(1);

#[derive(Default)]
struct EngineLog {
    commands: Mutex<Vec<String>>,
    callbacks: Mutex<Vec<EngineCallbacks>>,
    playing: Mutex<bool>,
}

impl EngineLog {
    fn record(&self, command: impl Into<String>) {
        self.commands.lock().push(command.into());
    }

    fn count(&self, command: &str) -> usize {
        self.commands.lock().iter().filter(|c| *c == command).count()
    }

    fn latest(&self) -> EngineCallbacks {
        self.callbacks.lock().last().cloned().unwrap()
    }

    fn instances(&self) -> usize {
        self.callbacks.lock().len()
    }
}

struct MockEngine {
    log: Arc<EngineLog>,
    video: (u32, u32),
    fail_open: bool,
}

impl MediaEngine for MockEngine {
    fn set_data_source(&mut self, source: &MediaSource) -> Result<(), EngineOpenError> {
        self.log.record(format!("set_data_source({})", source.uri));
        if self.fail_open {
            return Err(EngineOpenError::io("connection refused"));
        }
        Ok(())
    }

    fn set_display(&mut self, surface: Option<SurfaceHandle>) {
        self.log.record(format!("set_display({:?})", surface.map(|h| h.0)));
    }

    fn prepare_async(&mut self) -> Result<(), EngineOpenError> {
        self.log.record("prepare");
        Ok(())
    }

    fn start(&mut self) {
        self.log.record("start");
        *self.log.playing.lock() = true;
    }

    fn pause(&mut self) {
        self.log.record("pause");
        *self.log.playing.lock() = false;
    }

    fn seek_to(&mut self, position_ms: u64) {
        self.log.record(format!("seek({})", position_ms));
    }

    fn stop(&mut self) {
        self.log.record("stop");
        *self.log.playing.lock() = false;
    }

    fn reset(&mut self) {
        self.log.record("reset");
    }

    fn release(&mut self) {
        self.log.record("release");
    }

    fn is_playing(&self) -> bool {
        *self.log.playing.lock()
    }

    fn duration_ms(&self) -> Option<u64> {
        Some(60_000)
    }

    fn current_position_ms(&self) -> u64 {
        1_500
    }

    fn video_width(&self) -> u32 {
        self.video.0
    }

    fn video_height(&self) -> u32 {
        self.video.1
    }

    fn video_sample_aspect_ratio(&self) -> SampleAspectRatio {
        SampleAspectRatio::new(1, 1)
    }
}

struct MockFactory {
    log: Arc<EngineLog>,
    video: (u32, u32),
    fail_open: bool,
}

impl MediaEngineFactory for MockFactory {
    fn create(
        &mut self,
        callbacks: EngineCallbacks,
    ) -> Result<Box<dyn MediaEngine>, EngineOpenError> {
        self.log.callbacks.lock().push(callbacks);
        Ok(Box::new(MockEngine {
            log: self.log.clone(),
            video: self.video,
            fail_open: self.fail_open,
        }))
    }
}

struct MockSurface {
    handle: SurfaceHandle,
    wait_for_resize: bool,
    video_size: Arc<Mutex<Option<(u32, u32)>>>,
}

impl RenderSurface for MockSurface {
    fn handle(&self) -> SurfaceHandle {
        self.handle
    }

    fn set_video_size(&mut self, width: u32, height: u32) {
        *self.video_size.lock() = Some((width, height));
    }

    fn set_sample_aspect_ratio(&mut self, _sar: SampleAspectRatio) {}

    fn set_rotation(&mut self, _degrees: u32) {}

    fn should_wait_for_resize(&self) -> bool {
        self.wait_for_resize
    }
}

struct Fixture {
    controller: PlaybackController,
    surface: SurfaceCallbacks,
    log: Arc<EngineLog>,
    surface_video_size: Arc<Mutex<Option<(u32, u32)>>>,
}

fn fixture(video: (u32, u32), wait_for_resize: bool, fail_open: bool) -> Fixture {
    let log = Arc::new(EngineLog::default());
    let factory = MockFactory {
        log: log.clone(),
        video,
        fail_open,
    };
    let controller =
        PlaybackController::spawn(Box::new(factory), PlaybackConfig::default(), &Handle::current());

    let surface_video_size = Arc::new(Mutex::new(None));
    controller.attach_render_surface(Box::new(MockSurface {
        handle: SURFACE,
        wait_for_resize,
        video_size: surface_video_size.clone(),
    }));
    let surface = controller.surface_callbacks();

    Fixture {
        controller,
        surface,
        log,
        surface_video_size,
    }
}

/// Bring a fixture to the Playing state
async fn playing(f: &Fixture) {
    f.controller.set_source(MediaSource::new("rtsp://camera/live"));
    f.surface.on_created(SURFACE, 1920, 1080);
    f.controller.flush().await;
    f.controller.start();
    f.log.latest().on_prepared();
    f.controller.flush().await;
    assert_eq!(
        f.controller.states(),
        (PlaybackState::Playing, TargetState::Playing)
    );
}

#[tokio::test]
async fn test_source_waits_for_surface() {
    let f = fixture((1920, 1080), false, false);

    f.controller.set_source(MediaSource::new("rtsp://camera/live"));
    assert_eq!(f.controller.state(), PlaybackState::Idle);
    assert_eq!(f.log.instances(), 0);

    f.surface.on_created(SURFACE, 1920, 1080);
    f.controller.flush().await;

    assert_eq!(f.controller.state(), PlaybackState::Preparing);
    assert_eq!(f.log.count("set_data_source(rtsp://camera/live)"), 1);
    assert_eq!(f.log.count("set_display(Some(1))"), 1);
    assert_eq!(f.log.count("prepare"), 1);
}

#[tokio::test]
async fn test_start_before_prepared_is_deferred() {
    let f = fixture((1920, 1080), false, false);
    f.controller.set_source(MediaSource::new("rtsp://camera/live"));
    f.surface.on_created(SURFACE, 1920, 1080);
    f.controller.flush().await;

    f.controller.start();
    assert_eq!(
        f.controller.states(),
        (PlaybackState::Preparing, TargetState::Playing)
    );
    assert_eq!(f.log.count("start"), 0);

    f.log.latest().on_prepared();
    f.controller.flush().await;

    assert_eq!(
        f.controller.states(),
        (PlaybackState::Playing, TargetState::Playing)
    );
    assert_eq!(f.log.count("start"), 1);
    assert_eq!(*f.surface_video_size.lock(), Some((1920, 1080)));
}

#[tokio::test]
async fn test_prepared_without_start_stays_prepared() {
    let f = fixture((1920, 1080), false, false);
    f.controller.set_source(MediaSource::new("rtsp://camera/live"));
    f.surface.on_created(SURFACE, 1920, 1080);
    f.controller.flush().await;

    f.log.latest().on_prepared();
    f.controller.flush().await;

    assert_eq!(
        f.controller.states(),
        (PlaybackState::Prepared, TargetState::Idle)
    );
    assert_eq!(f.log.count("start"), 0);
    assert_eq!(f.controller.duration_ms(), Some(60_000));
}

#[tokio::test]
async fn test_waits_for_surface_resize() {
    let f = fixture((1920, 1080), true, false);
    f.controller.set_source(MediaSource::new("rtsp://camera/live"));
    f.surface.on_created(SURFACE, 1280, 720);
    f.controller.start();
    f.controller.flush().await;

    f.log.latest().on_prepared();
    f.controller.flush().await;
    assert_eq!(
        f.controller.states(),
        (PlaybackState::Prepared, TargetState::Playing)
    );
    assert_eq!(f.log.count("start"), 0);

    // A resize from a replaced surface must not start playback
    f.surface.on_changed(SurfaceHandle(99), 1920, 1080);
    f.controller.flush().await;
    assert_eq!(f.log.count("start"), 0);

    f.surface.on_changed(SURFACE, 1920, 1080);
    f.controller.flush().await;
    assert_eq!(
        f.controller.states(),
        (PlaybackState::Playing, TargetState::Playing)
    );
    assert_eq!(f.log.count("start"), 1);
}

#[tokio::test]
async fn test_matching_surface_size_starts_immediately() {
    let f = fixture((1920, 1080), true, false);
    f.controller.set_source(MediaSource::new("rtsp://camera/live"));
    f.surface.on_created(SURFACE, 1920, 1080);
    f.controller.start();
    f.controller.flush().await;

    f.log.latest().on_prepared();
    f.controller.flush().await;

    assert_eq!(f.controller.state(), PlaybackState::Playing);
    assert_eq!(f.log.count("start"), 1);
}

#[tokio::test]
async fn test_unknown_video_size_starts_on_prepared() {
    let f = fixture((0, 0), true, false);
    f.controller.set_source(MediaSource::new("https://cdn/audio.m4a"));
    f.surface.on_created(SURFACE, 640, 480);
    f.controller.start();
    f.controller.flush().await;

    f.log.latest().on_prepared();
    f.controller.flush().await;

    assert_eq!(f.controller.state(), PlaybackState::Playing);
}

#[tokio::test]
async fn test_seek_before_prepared_applied_once() {
    let f = fixture((1920, 1080), false, false);
    f.controller.seek_to(5_000);
    f.controller.set_source(MediaSource::new("rtsp://camera/live"));
    f.surface.on_created(SURFACE, 1920, 1080);
    f.controller.start();
    f.controller.flush().await;
    assert_eq!(f.controller.pending_seek(), Some(5_000));

    f.log.latest().on_prepared();
    f.controller.flush().await;
    assert_eq!(f.log.count("seek(5000)"), 1);
    assert_eq!(f.controller.pending_seek(), None);

    // Duplicate prepared and a later resize must not re-apply it
    f.log.latest().on_prepared();
    f.surface.on_changed(SURFACE, 1920, 1080);
    f.controller.flush().await;
    assert_eq!(f.log.count("seek(5000)"), 1);
    assert_eq!(f.log.count("start"), 1);
}

#[tokio::test]
async fn test_full_release_forgets_deferred_seek() {
    let f = fixture((1920, 1080), false, false);
    f.controller.set_source(MediaSource::new("rtsp://camera/a"));
    f.surface.on_created(SURFACE, 1920, 1080);
    f.controller.flush().await;
    f.controller.seek_to(5_000);
    assert_eq!(f.controller.pending_seek(), Some(5_000));

    f.controller.release(true);
    assert_eq!(f.controller.pending_seek(), None);

    f.controller.set_source(MediaSource::new("rtsp://camera/b"));
    f.controller.flush().await;
    f.log.latest().on_prepared();
    f.controller.flush().await;
    assert_eq!(f.controller.state(), PlaybackState::Prepared);
    assert_eq!(f.log.count("seek(5000)"), 0);
}

#[tokio::test]
async fn test_stop_playback_forgets_deferred_seek() {
    let f = fixture((1920, 1080), false, false);
    f.controller.set_source(MediaSource::new("rtsp://camera/a"));
    f.surface.on_created(SURFACE, 1920, 1080);
    f.controller.flush().await;
    f.controller.seek_to(7_000);

    f.controller.stop_playback();
    assert_eq!(f.controller.pending_seek(), None);
}

#[tokio::test]
async fn test_seek_while_playing_is_forwarded() {
    let f = fixture((1920, 1080), false, false);
    playing(&f).await;

    f.controller.seek_to(12_000);
    assert_eq!(f.log.count("seek(12000)"), 1);
    assert_eq!(f.controller.pending_seek(), None);
    assert_eq!(f.controller.current_position_ms(), 1_500);
}

#[tokio::test]
async fn test_pause_then_resume() {
    let f = fixture((1920, 1080), false, false);
    playing(&f).await;

    f.controller.pause();
    assert_eq!(
        f.controller.states(),
        (PlaybackState::Paused, TargetState::Paused)
    );
    assert!(!f.controller.is_playing());

    f.controller.start();
    assert_eq!(
        f.controller.states(),
        (PlaybackState::Playing, TargetState::Playing)
    );
    assert_eq!(f.log.count("start"), 2);
}

#[tokio::test]
async fn test_stop_playback_is_idempotent() {
    let f = fixture((1920, 1080), false, false);
    playing(&f).await;

    f.controller.stop_playback();
    assert_eq!(
        f.controller.states(),
        (PlaybackState::Idle, TargetState::Idle)
    );
    assert_eq!(f.log.count("stop"), 1);
    assert_eq!(f.log.count("release"), 1);

    f.controller.stop_playback();
    f.controller.release(true);
    assert_eq!(f.log.count("stop"), 1);
    assert_eq!(f.log.count("release"), 1);
    assert_eq!(f.controller.state(), PlaybackState::Idle);
}

#[tokio::test]
async fn test_stop_disables_open_on_surface_create() {
    let f = fixture((1920, 1080), false, false);
    playing(&f).await;
    f.controller.stop_playback();

    f.surface.on_destroyed(SURFACE);
    f.surface.on_created(SURFACE, 1920, 1080);
    f.controller.flush().await;

    assert_eq!(f.log.instances(), 1);
    assert_eq!(f.controller.state(), PlaybackState::Idle);
}

#[tokio::test]
async fn test_release_keeps_target_unless_cleared() {
    let f = fixture((1920, 1080), false, false);
    playing(&f).await;

    f.controller.release(false);
    assert_eq!(
        f.controller.states(),
        (PlaybackState::Idle, TargetState::Playing)
    );

    f.controller.release(true);
    assert_eq!(
        f.controller.states(),
        (PlaybackState::Idle, TargetState::Idle)
    );
    assert_eq!(f.log.count("reset"), 1);
}

#[tokio::test]
async fn test_engine_error_is_terminal() {
    let f = fixture((1920, 1080), false, false);
    let mut events = f.controller.subscribe();
    playing(&f).await;

    f.log.latest().on_error(1, -1004);
    f.controller.flush().await;
    assert_eq!(
        f.controller.states(),
        (PlaybackState::Error, TargetState::Error)
    );

    let mut saw_error = false;
    loop {
        match events.try_recv() {
            Ok(PlaybackEvent::Error(code)) => {
                assert_eq!(code, EngineErrorCode { code: 1, subcode: -1004 });
                saw_error = true;
            }
            Ok(_) => {}
            Err(TryRecvError::Empty) => break,
            Err(e) => panic!("unexpected receive error: {e:?}"),
        }
    }
    assert!(saw_error);
    match f.controller.last_error() {
        Some(PeerViewError::EngineRuntime { code, subcode }) => {
            assert_eq!((code, subcode), (1, -1004));
        }
        other => panic!("unexpected last error {:?}", other),
    }

    f.controller.start();
    assert_eq!(f.log.count("start"), 1);
    assert_eq!(f.controller.state(), PlaybackState::Error);
}

#[tokio::test]
async fn test_error_handler_suppresses_event() {
    let f = fixture((1920, 1080), false, false);
    let handled = Arc::new(Mutex::new(Vec::new()));
    let sink = handled.clone();
    f.controller.on_error(move |code| {
        sink.lock().push(code);
        true
    });
    let mut events = f.controller.subscribe();
    playing(&f).await;

    f.log.latest().on_error(100, 0);
    f.controller.flush().await;

    assert_eq!(handled.lock().len(), 1);
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, PlaybackEvent::Error(_)));
    }
    assert_eq!(f.controller.state(), PlaybackState::Error);
}

#[tokio::test]
async fn test_open_failure_enters_error() {
    let f = fixture((1920, 1080), false, true);
    let mut events = f.controller.subscribe();

    f.controller.set_source(MediaSource::new("rtsp://unreachable/live"));
    f.surface.on_created(SURFACE, 1920, 1080);
    f.controller.flush().await;

    assert_eq!(
        f.controller.states(),
        (PlaybackState::Error, TargetState::Error)
    );
    let mut codes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PlaybackEvent::Error(code) = event {
            codes.push(code);
        }
    }
    assert_eq!(codes, vec![EngineErrorCode::unknown()]);

    // The failed instance is torn down on release
    f.controller.release(true);
    assert_eq!(f.log.count("release"), 1);
}

#[tokio::test]
async fn test_new_source_recovers_from_error() {
    let f = fixture((1920, 1080), false, false);
    playing(&f).await;
    f.log.latest().on_error(1, 0);
    f.controller.flush().await;
    assert!(f.controller.last_error().is_some());

    f.controller.set_source(MediaSource::new("rtsp://camera/backup"));
    f.controller.flush().await;
    assert_eq!(f.controller.state(), PlaybackState::Preparing);
    assert!(f.controller.last_error().is_none());
    assert_eq!(f.log.instances(), 2);
}

#[tokio::test]
async fn test_stale_generation_is_dropped() {
    let f = fixture((1920, 1080), false, false);
    f.controller.set_source(MediaSource::new("rtsp://camera/one"));
    f.surface.on_created(SURFACE, 1920, 1080);
    f.controller.flush().await;
    let first = f.log.latest();

    f.controller.set_source(MediaSource::new("rtsp://camera/two"));
    let second = f.log.latest();
    assert_ne!(first.generation(), second.generation());

    first.on_prepared();
    first.on_error(1, 0);
    f.controller.flush().await;
    assert_eq!(f.controller.state(), PlaybackState::Preparing);

    second.on_prepared();
    f.controller.flush().await;
    assert_eq!(f.controller.state(), PlaybackState::Prepared);
}

#[tokio::test]
async fn test_completion() {
    let f = fixture((1920, 1080), false, false);
    playing(&f).await;

    f.log.latest().on_completion();
    f.controller.flush().await;

    assert_eq!(
        f.controller.states(),
        (PlaybackState::Completed, TargetState::Completed)
    );
}

#[tokio::test]
async fn test_surface_destroyed_unbinds_engine() {
    let f = fixture((1920, 1080), false, false);
    playing(&f).await;

    f.surface.on_destroyed(SURFACE);
    f.controller.flush().await;
    assert_eq!(f.log.count("set_display(None)"), 1);
    assert!(f.controller.surface_binding().is_none());
    assert_eq!(f.controller.state(), PlaybackState::Playing);

    f.surface.on_created(SURFACE, 1920, 1080);
    f.controller.flush().await;
    assert_eq!(f.log.count("set_display(Some(1))"), 2);
    assert_eq!(f.log.instances(), 1);
}

#[tokio::test]
async fn test_buffering_and_rotation() {
    let f = fixture((1920, 1080), false, false);
    playing(&f).await;

    let callbacks = f.log.latest();
    callbacks.on_buffering_update(42);
    callbacks.on_info(10001, 90);
    f.controller.flush().await;

    assert_eq!(f.controller.buffer_percentage(), 42);
    assert_eq!(f.controller.surface_binding().unwrap().rotation_degrees, 90);
}
