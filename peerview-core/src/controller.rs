//! Serialized playback controller
//!
//! Engine and surface callbacks arrive on arbitrary threads. They are queued
//! and applied to the [`PlaybackMachine`] by a single drain task, under the
//! same lock that guards caller commands, so every transition is serialized.

use crate::engine::{
    EngineErrorCode, EngineEvent, EngineEventSink, EngineGeneration, MediaEngineFactory,
    MediaSource,
};
use crate::error::PeerViewError;
use crate::playback::{
    ErrorHandler, PlaybackConfig, PlaybackEvent, PlaybackMachine, PlaybackState, TargetState,
};
use crate::surface::{RenderSurface, SurfaceBinding, SurfaceEvent, SurfaceHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

enum PlaybackInput {
    Engine(EngineGeneration, EngineEvent),
    Surface(SurfaceEvent),
    Flush(oneshot::Sender<()>),
}

struct QueueSink {
    tx: mpsc::UnboundedSender<PlaybackInput>,
}

impl EngineEventSink for QueueSink {
    fn deliver(&self, generation: EngineGeneration, event: EngineEvent) {
        if self.tx.send(PlaybackInput::Engine(generation, event)).is_err() {
            debug!("Engine callback after controller shutdown");
        }
    }
}

/// Entry points for the platform's surface lifecycle callbacks
#[derive(Clone)]
pub struct SurfaceCallbacks {
    tx: mpsc::UnboundedSender<PlaybackInput>,
}

impl std::fmt::Debug for SurfaceCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceCallbacks").finish_non_exhaustive()
    }
}

impl SurfaceCallbacks {
    /// Surface became usable
    pub fn on_created(&self, handle: SurfaceHandle, width: u32, height: u32) {
        self.send(SurfaceEvent::Created { handle, width, height });
    }

    /// Surface changed size
    pub fn on_changed(&self, handle: SurfaceHandle, width: u32, height: u32) {
        self.send(SurfaceEvent::Changed { handle, width, height });
    }

    /// Surface is gone
    pub fn on_destroyed(&self, handle: SurfaceHandle) {
        self.send(SurfaceEvent::Destroyed { handle });
    }

    /// Forward an already built event
    pub fn send(&self, event: SurfaceEvent) {
        if self.tx.send(PlaybackInput::Surface(event)).is_err() {
            debug!("Surface {} callback after controller shutdown", event.kind());
        }
    }
}

/// Owns the playback machine and the task that drains its callbacks
pub struct PlaybackController {
    machine: Arc<Mutex<PlaybackMachine>>,
    tx: mpsc::UnboundedSender<PlaybackInput>,
    drain: JoinHandle<()>,
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("machine", &*self.machine.lock())
            .finish()
    }
}

impl PlaybackController {
    /// Create the machine and spawn its drain task on `runtime`
    pub fn spawn(
        factory: Box<dyn MediaEngineFactory>,
        config: PlaybackConfig,
        runtime: &Handle,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(QueueSink { tx: tx.clone() });
        let machine = Arc::new(Mutex::new(PlaybackMachine::new(factory, sink, config)));
        let drain = runtime.spawn(drain_inputs(machine.clone(), rx));

        Self { machine, tx, drain }
    }

    /// Callbacks to hand to the platform surface
    pub fn surface_callbacks(&self) -> SurfaceCallbacks {
        SurfaceCallbacks {
            tx: self.tx.clone(),
        }
    }

    /// Wait until every callback queued so far has been applied
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(PlaybackInput::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Subscribe to playback notifications
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.machine.lock().subscribe()
    }

    /// Install or clear the error handler
    pub fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        self.machine.lock().set_error_handler(handler);
    }

    /// Convenience for a closure error handler
    pub fn on_error<F>(&self, handler: F)
    where
        F: FnMut(EngineErrorCode) -> bool + Send + 'static,
    {
        self.set_error_handler(Some(Box::new(handler)));
    }

    /// Install a render target
    pub fn attach_render_surface(&self, surface: Box<dyn RenderSurface>) {
        self.machine.lock().attach_render_surface(surface);
    }

    /// Remove the render target
    pub fn detach_render_surface(&self) -> Option<Box<dyn RenderSurface>> {
        self.machine.lock().detach_render_surface()
    }

    /// Replace the media source
    pub fn set_source(&self, source: MediaSource) {
        self.machine.lock().set_source(source);
    }

    /// Request playback
    pub fn start(&self) {
        self.machine.lock().start();
    }

    /// Request pause
    pub fn pause(&self) {
        self.machine.lock().pause();
    }

    /// Seek now or once prepared
    pub fn seek_to(&self, position_ms: u64) {
        self.machine.lock().seek_to(position_ms);
    }

    /// Stop and release the engine, clearing intent
    pub fn stop_playback(&self) {
        self.machine.lock().stop_playback();
    }

    /// Release the engine, optionally forgetting source and intent
    pub fn release(&self, clear_target: bool) {
        self.machine.lock().release(clear_target);
    }

    /// Actual state
    pub fn state(&self) -> PlaybackState {
        self.machine.lock().state()
    }

    /// Target state
    pub fn target(&self) -> TargetState {
        self.machine.lock().target()
    }

    /// Both states read under one lock
    pub fn states(&self) -> (PlaybackState, TargetState) {
        let machine = self.machine.lock();
        (machine.state(), machine.target())
    }

    /// Whether the engine is presenting frames
    pub fn is_playing(&self) -> bool {
        self.machine.lock().is_playing()
    }

    /// Buffer fill level
    pub fn buffer_percentage(&self) -> u8 {
        self.machine.lock().buffer_percentage()
    }

    /// Media duration once prepared
    pub fn duration_ms(&self) -> Option<u64> {
        self.machine.lock().duration_ms()
    }

    /// Playback position once prepared
    pub fn current_position_ms(&self) -> u64 {
        self.machine.lock().current_position_ms()
    }

    /// Last known decoded video size
    pub fn video_size(&self) -> (u32, u32) {
        self.machine.lock().video_size()
    }

    /// Current surface binding
    pub fn surface_binding(&self) -> Option<SurfaceBinding> {
        self.machine.lock().surface_binding().cloned()
    }

    /// Seek waiting for the engine to become ready
    pub fn pending_seek(&self) -> Option<u64> {
        self.machine.lock().pending_seek()
    }

    /// Runtime error the current engine stopped on, until a new source opens
    pub fn last_error(&self) -> Option<PeerViewError> {
        self.machine.lock().last_error()
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.drain.abort();
        self.machine.lock().release(true);
    }
}

async fn drain_inputs(
    machine: Arc<Mutex<PlaybackMachine>>,
    mut rx: mpsc::UnboundedReceiver<PlaybackInput>,
) {
    while let Some(input) = rx.recv().await {
        match input {
            PlaybackInput::Engine(generation, event) => {
                trace!("Applying engine {} (generation {})", event.kind(), generation.0);
                machine.lock().handle_engine_event(generation, event);
            }
            PlaybackInput::Surface(event) => {
                trace!("Applying surface {} for {}", event.kind(), event.handle());
                machine.lock().handle_surface_event(event);
            }
            PlaybackInput::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
