//! Peer session timeline
//!
//! Records when a session attempt started and how long each negotiation
//! milestone took to arrive, for connection-health reporting.

use chrono::{DateTime, Utc};
use peerview_signaling::{SessionEvent, SessionId};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Negotiation milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Milestone {
    /// The room was joined
    RoomConnected,
    /// Our offer or answer was sent
    LocalDescriptionSent,
    /// The remote offer or answer was applied
    RemoteDescriptionReceived,
    /// ICE connected
    IceConnected,
    /// DTLS connected
    DtlsConnected,
    /// The peer connection is open
    ConnectionCreated,
    /// The attempt failed
    Failed,
    /// The session was closed
    Closed,
}

impl Milestone {
    /// Milestone a session event marks, if any
    pub fn from_event(event: &SessionEvent) -> Option<Self> {
        match event {
            SessionEvent::RoomConnected(_) => Some(Milestone::RoomConnected),
            SessionEvent::LocalDescriptionSent(_) => Some(Milestone::LocalDescriptionSent),
            SessionEvent::RemoteDescriptionApplied(_) => {
                Some(Milestone::RemoteDescriptionReceived)
            }
            SessionEvent::IceConnected => Some(Milestone::IceConnected),
            SessionEvent::DtlsConnected => Some(Milestone::DtlsConnected),
            SessionEvent::Established(_) => Some(Milestone::ConnectionCreated),
            SessionEvent::Failed { .. } => Some(Milestone::Failed),
            SessionEvent::Closed(_) => Some(Milestone::Closed),
            _ => None,
        }
    }
}

/// One recorded milestone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneRecord {
    /// What happened
    pub milestone: Milestone,
    /// Time since the session started
    pub delay: Duration,
    /// Detail, for failures and closes
    pub detail: Option<String>,
}

/// Serializable summary of a timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineReport {
    /// Session id
    pub session: String,
    /// When the attempt started
    pub started_at: DateTime<Utc>,
    /// Milestones in arrival order
    pub milestones: Vec<MilestoneRecord>,
}

/// Milestone recorder for one session attempt
#[derive(Debug, Clone)]
pub struct SessionTimeline {
    session: SessionId,
    started_at: DateTime<Utc>,
    origin: Instant,
    milestones: Vec<MilestoneRecord>,
}

impl SessionTimeline {
    /// Start a timeline now
    pub fn start(session: SessionId) -> Self {
        let started_at = Utc::now();
        info!("Session {} started at {}", session, started_at.to_rfc3339());
        Self {
            session,
            started_at,
            origin: Instant::now(),
            milestones: Vec::new(),
        }
    }

    /// Session id
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// UTC start time
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record a milestone at the current time
    pub fn record(&mut self, milestone: Milestone, detail: Option<String>) -> Duration {
        self.record_at(milestone, detail, Instant::now())
    }

    /// Record a milestone observed at `now`
    pub fn record_at(
        &mut self,
        milestone: Milestone,
        detail: Option<String>,
        now: Instant,
    ) -> Duration {
        let delay = now.saturating_duration_since(self.origin);
        match &detail {
            Some(detail) if milestone == Milestone::Failed => {
                warn!("Session {} {:?} after {}ms: {}", self.session, milestone, delay.as_millis(), detail)
            }
            _ => info!("Session {} {:?}, delay={}ms", self.session, milestone, delay.as_millis()),
        }
        self.milestones.push(MilestoneRecord {
            milestone,
            delay,
            detail,
        });
        delay
    }

    /// Record the milestone a session event marks
    pub fn observe(&mut self, event: &SessionEvent) -> Option<Duration> {
        let milestone = Milestone::from_event(event)?;
        let detail = match event {
            SessionEvent::Failed { code, reason } => Some(format!("{}: {}", code, reason)),
            SessionEvent::Closed(reason) => Some(reason.clone()),
            _ => None,
        };
        Some(self.record(milestone, detail))
    }

    /// Delay of the first occurrence of `milestone`
    pub fn delay_of(&self, milestone: Milestone) -> Option<Duration> {
        self.milestones
            .iter()
            .find(|r| r.milestone == milestone)
            .map(|r| r.delay)
    }

    /// Recorded milestones in arrival order
    pub fn milestones(&self) -> &[MilestoneRecord] {
        &self.milestones
    }

    /// Whether the connection was established
    pub fn is_established(&self) -> bool {
        self.delay_of(Milestone::ConnectionCreated).is_some()
    }

    /// Serializable summary
    pub fn report(&self) -> TimelineReport {
        TimelineReport {
            session: self.session.to_string(),
            started_at: self.started_at,
            milestones: self.milestones.clone(),
        }
    }
}
