//! Playback demo for PeerView
//!
//! Drives a video view with a simulated engine that prepares on a background
//! thread, then renders a synthetic frame in follow mode.

use peerview::*;
use std::thread;
use std::time::Duration;

/// Engine that reports itself prepared shortly after `prepare_async`
struct SimulatedEngine {
    callbacks: EngineCallbacks,
    playing: bool,
    position_ms: u64,
}

impl MediaEngine for SimulatedEngine {
    fn set_data_source(&mut self, source: &MediaSource) -> Result<(), EngineOpenError> {
        println!("📂 Opening {}", source.uri);
        Ok(())
    }

    fn set_display(&mut self, surface: Option<SurfaceHandle>) {
        println!("🖥️  Display surface: {:?}", surface);
    }

    fn prepare_async(&mut self) -> Result<(), EngineOpenError> {
        let callbacks = self.callbacks.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            callbacks.on_video_size_changed(1280, 720, 1, 1);
            callbacks.on_prepared();
        });
        Ok(())
    }

    fn start(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn seek_to(&mut self, position_ms: u64) {
        self.position_ms = position_ms;
        self.callbacks.on_seek_complete();
    }

    fn stop(&mut self) {
        self.playing = false;
    }

    fn reset(&mut self) {
        self.position_ms = 0;
    }

    fn release(&mut self) {
        println!("🧹 Engine released");
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn duration_ms(&self) -> Option<u64> {
        Some(60_000)
    }

    fn current_position_ms(&self) -> u64 {
        self.position_ms
    }

    fn video_width(&self) -> u32 {
        1280
    }

    fn video_height(&self) -> u32 {
        720
    }

    fn video_sample_aspect_ratio(&self) -> SampleAspectRatio {
        SampleAspectRatio::new(1, 1)
    }
}

struct SimulatedFactory;

impl MediaEngineFactory for SimulatedFactory {
    fn create(
        &mut self,
        callbacks: EngineCallbacks,
    ) -> Result<Box<dyn MediaEngine>, EngineOpenError> {
        Ok(Box::new(SimulatedEngine {
            callbacks,
            playing: false,
            position_ms: 0,
        }))
    }
}

struct WindowSurface {
    handle: SurfaceHandle,
}

impl RenderSurface for WindowSurface {
    fn handle(&self) -> SurfaceHandle {
        self.handle
    }

    fn set_video_size(&mut self, width: u32, height: u32) {
        println!("📐 Surface sized for {}x{}", width, height);
    }

    fn set_sample_aspect_ratio(&mut self, _sar: SampleAspectRatio) {}

    fn set_rotation(&mut self, _degrees: u32) {}

    fn should_wait_for_resize(&self) -> bool {
        false
    }
}

struct ConsoleTarget(&'static str);

impl FrameTarget for ConsoleTarget {
    fn draw_image(&mut self, image: &image::RgbaImage) {
        let (w, h) = image.dimensions();
        println!("🎨 {} view drew {}x{}", self.0, w, h);
    }

    fn set_visible(&mut self, visible: bool) {
        println!("👁️  {} view visible: {}", self.0, visible);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let peerview = PeerView::init_with(GlobalConfig {
        debug_logging: true,
        ..Default::default()
    })?;

    let view = peerview
        .video_view(Box::new(SimulatedFactory))
        .display_mode(DisplayMode::Follow)
        .build()?;
    let mut events = view.events();

    let handle = SurfaceHandle(1);
    view.attach_render_surface(Box::new(WindowSurface { handle }));
    view.set_video_path("rtsp://camera.local/stream");
    view.start();
    view.surface_callbacks().on_created(handle, 1280, 720);

    peerview.block_on(async {
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(1), events.next()).await
        {
            println!("📣 {}: {:?}", event.event_type(), event);
            if let Event::Playback(PlaybackEvent::StateChanged {
                state: PlaybackState::Playing,
                ..
            }) = event
            {
                break;
            }
        }
    });
    println!(
        "▶️  state={:?} playing={} duration={:?}",
        view.state(),
        view.is_playing(),
        view.duration_ms()
    );

    let (width, height) = (320, 180);
    let frame = DecodedFrame::new(VideoFrame::new(
        width,
        height,
        vec![0x40; (width * height * 4) as usize],
        0,
    ))
    .with_region(TrackedRegion::new(200, 100, 40, 30));
    view.draw(&frame, &mut ConsoleTarget("main"), Some(&mut ConsoleTarget("sub")))?;

    view.set_display_mode(DisplayMode::PictureInPicture);
    view.draw(&frame, &mut ConsoleTarget("main"), Some(&mut ConsoleTarget("sub")))?;

    view.stop_playback();
    println!("⏹️  Stopped, state={:?}", view.state());
    Ok(())
}
