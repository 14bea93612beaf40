//! Event system for playback and peer session notifications

use futures::Stream;
use parking_lot::Mutex;
use peerview_core::PlaybackEvent;
use peerview_signaling::SessionEvent;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Notifications a video view produces
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// From the playback state machine
    Playback(PlaybackEvent),
    /// From the current peer session
    Session(SessionEvent),
}

impl Event {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Playback(event) => match event {
                PlaybackEvent::StateChanged { .. } => "playback_state_changed",
                PlaybackEvent::Prepared { .. } => "playback_prepared",
                PlaybackEvent::VideoSizeChanged { .. } => "video_size_changed",
                PlaybackEvent::Completed => "playback_completed",
                PlaybackEvent::Error(_) => "playback_error",
                PlaybackEvent::SeekComplete => "seek_complete",
                PlaybackEvent::Info(_) => "playback_info",
                PlaybackEvent::TimedText(_) => "timed_text",
            },
            Event::Session(event) => match event {
                SessionEvent::StateChanged(_) => "session_state_changed",
                SessionEvent::RoomConnected(_) => "room_connected",
                SessionEvent::LocalDescriptionSent(_) => "local_description_sent",
                SessionEvent::RemoteDescriptionApplied(_) => "remote_description_applied",
                SessionEvent::IceConnected => "ice_connected",
                SessionEvent::IceDisconnected => "ice_disconnected",
                SessionEvent::DtlsConnected => "dtls_connected",
                SessionEvent::DtlsDisconnected => "dtls_disconnected",
                SessionEvent::Stats(_) => "session_stats",
                SessionEvent::Established(_) => "session_established",
                SessionEvent::Failed { .. } => "session_failed",
                SessionEvent::Closed(_) => "session_closed",
            },
        }
    }

    /// Check if this is a playback event
    pub fn is_playback_event(&self) -> bool {
        matches!(self, Event::Playback(_))
    }

    /// Check if this is a peer session event
    pub fn is_session_event(&self) -> bool {
        matches!(self, Event::Session(_))
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(
            self,
            Event::Playback(PlaybackEvent::Error(_)) | Event::Session(SessionEvent::Failed { .. })
        )
    }
}

/// Stream of view events for async iteration
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Create a new event stream with a receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { receiver }
    }

    /// Get the next event from the stream
    pub async fn next(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Result<Option<Event>, mpsc::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(mpsc::error::TryRecvError::Disconnected)
            }
        }
    }

    /// Close the event stream
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Check if the event stream is closed
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.receiver.poll_recv(cx)
    }
}

/// Event filter for selective event processing
#[derive(Debug, Clone)]
pub struct EventFilter {
    /// Whether to include playback events
    pub include_playback_events: bool,
    /// Whether to include peer session events
    pub include_session_events: bool,
    /// Whether to include error events of either kind
    pub include_error_events: bool,
}

impl EventFilter {
    /// Create a filter that includes all events
    pub fn all() -> Self {
        Self {
            include_playback_events: true,
            include_session_events: true,
            include_error_events: true,
        }
    }

    /// Create a filter that includes only playback events
    pub fn playback_only() -> Self {
        Self {
            include_playback_events: true,
            include_session_events: false,
            include_error_events: false,
        }
    }

    /// Create a filter that includes only peer session events
    pub fn session_only() -> Self {
        Self {
            include_playback_events: false,
            include_session_events: true,
            include_error_events: false,
        }
    }

    /// Create a filter that includes only errors
    pub fn errors_only() -> Self {
        Self {
            include_playback_events: false,
            include_session_events: false,
            include_error_events: true,
        }
    }

    /// Check if an event should be included based on this filter
    pub fn should_include(&self, event: &Event) -> bool {
        (self.include_playback_events && event.is_playback_event())
            || (self.include_session_events && event.is_session_event())
            || (self.include_error_events && event.is_error_event())
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// Filtered event stream that only yields events matching a filter
#[derive(Debug)]
pub struct FilteredEventStream {
    stream: EventStream,
    filter: EventFilter,
}

impl FilteredEventStream {
    /// Create a new filtered event stream
    pub fn new(stream: EventStream, filter: EventFilter) -> Self {
        Self { stream, filter }
    }

    /// Get the next event that matches the filter
    pub async fn next(&mut self) -> Option<Event> {
        while let Some(event) = self.stream.next().await {
            if self.filter.should_include(&event) {
                return Some(event);
            }
        }
        None
    }

    /// Try to get the next filtered event without blocking
    pub fn try_next(&mut self) -> Result<Option<Event>, mpsc::error::TryRecvError> {
        while let Some(event) = self.stream.try_next()? {
            if self.filter.should_include(&event) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Update the filter
    pub fn set_filter(&mut self, filter: EventFilter) {
        self.filter = filter;
    }

    /// Get the current filter
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

/// Fans view events out to every open [`EventStream`]
#[derive(Debug, Default)]
pub(crate) struct EventHub {
    senders: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
}

impl EventHub {
    pub(crate) fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        EventStream::new(rx)
    }

    pub(crate) fn publish(&self, event: Event) {
        let mut senders = self.senders.lock();
        senders.retain(|tx| !tx.is_closed());
        for tx in senders.iter() {
            let _ = tx.send(event.clone());
        }
    }
}

/// Forward a broadcast channel into the hub until its sender goes away
pub(crate) fn forward<T, F>(
    runtime: &Handle,
    mut rx: broadcast::Receiver<T>,
    hub: Arc<EventHub>,
    mut map: F,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
    F: FnMut(T) -> Event + Send + 'static,
{
    runtime.spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => hub.publish(map(event)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event forwarder lagging, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Event forwarder finished");
    })
}
