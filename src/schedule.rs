use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, NaiveTime};
use std::collections::HashMap;

pub const STATUS_SCHEDULED: &str = "scheduled";
pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_CANCELLED: &str = "cancelled";
pub const STATUS_RESCHEDULED: &str = "rescheduled";

/// Single weekday table for the whole daemon. 0 = Sunday .. 6 = Saturday,
/// matching the numbering stored in class_schedules.weekday.
const WEEKDAY_NAMES: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

pub fn weekday_index(name: &str) -> Option<u32> {
    let t = name.trim().to_ascii_lowercase();
    WEEKDAY_NAMES
        .iter()
        .position(|n| *n == t || n[..3] == t)
        .map(|i| i as u32)
}

pub fn weekday_name(index: u32) -> Option<&'static str> {
    WEEKDAY_NAMES.get(index as usize).copied()
}

pub fn date_weekday_index(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_sunday()
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let t = raw.trim();
    NaiveTime::parse_from_str(t, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M:%S"))
        .ok()
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Half-open interval overlap. Exactly-touching intervals (10:00-11:00 vs
/// 11:00-12:00) do not overlap.
pub fn intervals_overlap(
    new_start: NaiveTime,
    new_end: NaiveTime,
    existing_start: NaiveTime,
    existing_end: NaiveTime,
) -> bool {
    new_start < existing_end && existing_start < new_end
}

/// One enabled-or-not weekly meeting slot. Different weekdays may carry
/// different times.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternSlot {
    pub weekday: u32,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurriculumShape {
    pub phase_count: i64,
    pub sessions_per_phase: i64,
}

impl CurriculumShape {
    pub fn total_sessions(&self) -> i64 {
        self.phase_count * self.sessions_per_phase
    }

    /// Maps a 1-based overall occurrence index to (phase, session_in_phase).
    /// Not capped at phase_count; indices past the nominal curriculum keep
    /// counting into later phase numbers.
    pub fn phase_for_index(&self, index: i64) -> (i64, i64) {
        let phase = (index - 1) / self.sessions_per_phase + 1;
        let session_in_phase = (index - 1) % self.sessions_per_phase + 1;
        (phase, session_in_phase)
    }
}

/// One concrete calendar instance of a weekly slot, already mapped to its
/// phase position and curriculum template.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub index: i64,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub phase_number: i64,
    pub session_in_phase: i64,
    pub template_id: Option<String>,
}

/// Expands a weekly pattern into dated occurrences by walking the calendar
/// one day at a time from `start_date`. A date is accepted when its weekday
/// is enabled and it is not a holiday, so holiday skips push every later
/// occurrence forward instead of leaving gaps in the numbering.
///
/// Returns empty when the pattern has no enabled slot or `total` is not
/// positive. The start date itself is eligible.
pub fn expand<F>(
    start_date: NaiveDate,
    pattern: &[PatternSlot],
    total: i64,
    shape: CurriculumShape,
    templates: &HashMap<(i64, i64), String>,
    is_holiday: F,
) -> Vec<Occurrence>
where
    F: Fn(NaiveDate) -> bool,
{
    let mut by_weekday: HashMap<u32, (NaiveTime, NaiveTime)> = HashMap::new();
    for slot in pattern {
        if slot.enabled {
            by_weekday.insert(slot.weekday, (slot.start, slot.end));
        }
    }
    if by_weekday.is_empty() || total <= 0 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(total as usize);
    let mut date = start_date;
    let mut index: i64 = 1;
    while index <= total {
        if let Some((start, end)) = by_weekday.get(&date_weekday_index(date)) {
            if !is_holiday(date) {
                let (phase_number, session_in_phase) = shape.phase_for_index(index);
                out.push(Occurrence {
                    index,
                    date,
                    start: *start,
                    end: *end,
                    phase_number,
                    session_in_phase,
                    template_id: templates.get(&(phase_number, session_in_phase)).cloned(),
                });
                index += 1;
            }
        }
        date = date + ChronoDuration::days(1);
    }
    out
}

/// Session lifecycle, caller-driven. `rescheduled` rows are created only by
/// the suspension processor and from there move forward like a fresh
/// session; `completed` and `cancelled` are terminal.
pub fn status_transition_allowed(from: &str, to: &str) -> bool {
    match (from, to) {
        (STATUS_SCHEDULED, STATUS_IN_PROGRESS)
        | (STATUS_SCHEDULED, STATUS_COMPLETED)
        | (STATUS_SCHEDULED, STATUS_CANCELLED)
        | (STATUS_IN_PROGRESS, STATUS_COMPLETED)
        | (STATUS_RESCHEDULED, STATUS_COMPLETED)
        | (STATUS_RESCHEDULED, STATUS_CANCELLED) => true,
        _ => false,
    }
}

pub fn is_known_status(status: &str) -> bool {
    matches!(
        status,
        STATUS_SCHEDULED
            | STATUS_IN_PROGRESS
            | STATUS_COMPLETED
            | STATUS_CANCELLED
            | STATUS_RESCHEDULED
    )
}
