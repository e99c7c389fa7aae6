//! Scheduled-event calendar (CONTRACT.md §1.3).
//!
//! During the lead window before a high-impact scheduled event (CPI, FOMC,
//! large unlocks) the screening stage is bypassed: regime rules tuned for
//! quiet tape are the wrong filter when the calendar says otherwise.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub name: String,
    pub scheduled_at: DateTime<Utc>,
    pub impact: Impact,
}

#[derive(Debug, Clone, Default)]
pub struct EventCalendar {
    events: Vec<ScheduledEvent>,
}

impl EventCalendar {
    pub fn new(events: Vec<ScheduledEvent>) -> Self {
        EventCalendar { events }
    }

    pub fn add(&mut self, event: ScheduledEvent) {
        self.events.push(event);
    }

    /// Whether `now` falls inside the lead window of any high-impact event:
    /// `[scheduled_at - lead, scheduled_at]`.
    pub fn is_event_window(&self, now: DateTime<Utc>, lead_minutes: i64) -> bool {
        let lead = Duration::minutes(lead_minutes);
        self.events.iter().any(|e| {
            e.impact == Impact::High && now >= e.scheduled_at - lead && now <= e.scheduled_at
        })
    }

    /// Events scheduled within the next `hours`, soonest first.
    pub fn upcoming(&self, now: DateTime<Utc>, hours: i64) -> Vec<&ScheduledEvent> {
        let horizon = now + Duration::hours(hours);
        let mut upcoming: Vec<&ScheduledEvent> = self
            .events
            .iter()
            .filter(|e| e.scheduled_at >= now && e.scheduled_at <= horizon)
            .collect();
        upcoming.sort_by_key(|e| e.scheduled_at);
        upcoming
    }
}
