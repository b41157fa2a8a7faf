//! Deterministic time-expression extraction
//!
//! Two-stage parser over regex-identified candidate spans. Stage one is
//! a relative-date parser anchored at the injected clock (tomorrow,
//! next Tuesday, 3pm, 2 weeks); stage two is a calendar parser for
//! expressions the first stage rejects (October 21st, 2025-03, Q4,
//! end of month). Candidate patterns are ordered most-specific-first so
//! overlapping spans resolve to the longest match.
//!
//! Durations are a special case: "3 hours" after a past-context word
//! ("after", "took", ...) describes elapsed time, not a timestamp, so
//! the span is kept with `parsed = None`.

use crate::graph::{TimeKind, TimeRef};
use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, Weekday};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Words that mark a preceding duration as describing the past.
const PAST_CONTEXT_WORDS: [&str; 6] = ["for", "after", "took", "spent", "waited", "lasted"];

/// How far back (chars) to look for past-context words.
const PAST_CONTEXT_WINDOW: usize = 50;

const WEEKDAYS: &str = "monday|tuesday|wednesday|thursday|friday|saturday|sunday";
const MONTHS: &str =
    "january|february|march|april|may|june|july|august|september|october|november|december";

fn candidate_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        // Order matters: specific combined forms first so they win
        // overlap resolution against their own fragments.
        let sources = [
            // next/this/last + weekday + clock time
            format!(
                r"(?i)\b(?:next|this|last)\s+(?:{WEEKDAYS})\s+(?:at\s+)?\d{{1,2}}(?::\d{{2}})?\s*(?:am|pm)\b"
            ),
            // relative day words with optional clock time
            r"(?i)\b(?:tomorrow|today|yesterday|tonight)\b(?:\s+at\s+\d{1,2}(?::\d{2})?\s*(?:am|pm)?)?".to_string(),
            // next/this/last + period or weekday
            format!(r"(?i)\b(?:next|this|last)\s+(?:week|month|year|{WEEKDAYS})\b"),
            // month name + day with optional clock time
            format!(
                r"(?i)\b(?:{MONTHS})\s+\d{{1,2}}(?:st|nd|rd|th)?\b(?:\s+at\s+\d{{1,2}}(?::\d{{2}})?\s*(?:am|pm)?)?"
            ),
            // ISO date or month
            r"\b\d{4}-\d{2}(?:-\d{2})?\b".to_string(),
            // standalone clock time
            r"(?i)\b\d{1,2}(?::\d{2})?\s*(?:am|pm)\b".to_string(),
            // end/start of a period
            r"(?i)\b(?:end of|start of)\s+(?:month|week|year|day)\b".to_string(),
            // bare weekday
            format!(r"(?i)\b(?:{WEEKDAYS})\b"),
            // duration
            r"(?i)\b\d+\s+(?:hours?|minutes?|days?|weeks?|months?)\b".to_string(),
            // recurring
            r"(?i)\b(?:weekly|daily|monthly|annually)\b".to_string(),
            // quarters
            r"(?i)\bQ[1-4]\b".to_string(),
        ];
        sources
            .iter()
            .map(|s| Regex::new(s).expect("time pattern"))
            .collect()
    })
}

/// Extract all time references from note text, anchored at `now`.
pub fn extract_time_references(text: &str, now: NaiveDateTime) -> Vec<TimeRef> {
    let mut refs = Vec::new();
    let mut seen_text: HashSet<String> = HashSet::new();
    let mut seen_spans: Vec<(usize, usize)> = Vec::new();

    for pattern in candidate_patterns() {
        for found in pattern.find_iter(text) {
            let span_text = found.as_str();
            let lower = span_text.to_lowercase();
            if seen_text.contains(&lower) {
                continue;
            }
            let overlaps = seen_spans
                .iter()
                .any(|&(start, end)| found.start() < end && found.end() > start);
            if overlaps {
                continue;
            }
            seen_text.insert(lower.clone());
            seen_spans.push((found.start(), found.end()));

            let kind = classify(&lower);
            let parsed = if kind == TimeKind::Duration && in_past_context(text, found.start()) {
                None
            } else {
                parse_relative(&lower, now).or_else(|| parse_calendar(&lower, now))
            };

            refs.push(TimeRef {
                original: span_text.to_string(),
                parsed,
                kind,
            });
        }
    }

    refs
}

/// Classify a (lowercased) expression.
fn classify(lower: &str) -> TimeKind {
    let contains_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if contains_any(&["tomorrow", "next", "today", "yesterday", "last"]) {
        TimeKind::Relative
    } else if contains_any(&["hours", "minutes", "days", "weeks", "months"]) {
        TimeKind::Duration
    } else if contains_any(&["weekly", "daily", "monthly", "annually"]) {
        TimeKind::Recurring
    } else {
        TimeKind::Absolute
    }
}

/// Whether a past-context word appears shortly before `position`.
fn in_past_context(text: &str, position: usize) -> bool {
    let window_start = position.saturating_sub(PAST_CONTEXT_WINDOW);
    // Clamp to char boundaries so slicing cannot panic mid-codepoint
    let start = (window_start..=position)
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(position);
    let before = text[start..position].to_lowercase();
    before
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| PAST_CONTEXT_WORDS.contains(&word))
}

// === Stage 1: relative parser ===

fn weekday_from_name(name: &str) -> Option<Weekday> {
    match name {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Parse `3pm`, `10:30am`, `15:00` into (hour, minute). A bare number
/// without colon or meridiem is not a clock time.
fn find_clock(lower: &str) -> Option<(u32, u32)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b").expect("clock regex")
    });
    for capture in re.captures_iter(lower) {
        let meridiem = capture.get(3).map(|m| m.as_str());
        let has_minutes = capture.get(2).is_some();
        if meridiem.is_none() && !has_minutes {
            continue;
        }
        let hour: u32 = capture[1].parse().ok()?;
        let minute: u32 = capture
            .get(2)
            .map(|m| m.as_str().parse().ok())
            .unwrap_or(Some(0))?;
        if minute > 59 {
            continue;
        }
        let hour = match meridiem {
            Some("am") => hour % 12,
            Some("pm") => hour % 12 + 12,
            _ if hour <= 23 => hour,
            _ => continue,
        };
        return Some((hour, minute));
    }
    None
}

fn at_time(date: NaiveDate, clock: Option<(u32, u32)>) -> Option<NaiveDateTime> {
    let (hour, minute) = clock.unwrap_or((0, 0));
    date.and_hms_opt(hour, minute, 0)
}

/// Resolve expressions anchored at the current clock. Bare weekdays and
/// bare clock times prefer the future.
fn parse_relative(lower: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let today = now.date();
    let clock = find_clock(lower);

    if lower.contains("today") || lower.contains("tonight") {
        return at_time(today, clock);
    }
    if lower.contains("tomorrow") {
        return at_time(today.succ_opt()?, clock);
    }
    if lower.contains("yesterday") {
        return at_time(today.pred_opt()?, clock);
    }

    // next/this/last + period
    for (prefix, forward) in [("next", true), ("last", false)] {
        if let Some(rest) = strip_qualifier(lower, prefix) {
            match rest {
                "week" => {
                    let date = if forward {
                        today.checked_add_days(Days::new(7))?
                    } else {
                        today.checked_sub_days(Days::new(7))?
                    };
                    return at_time(date, clock);
                }
                "month" => {
                    let date = if forward {
                        today.checked_add_months(Months::new(1))?
                    } else {
                        today.checked_sub_months(Months::new(1))?
                    };
                    return at_time(date, clock);
                }
                "year" => {
                    let date = if forward {
                        today.checked_add_months(Months::new(12))?
                    } else {
                        today.checked_sub_months(Months::new(12))?
                    };
                    return at_time(date, clock);
                }
                other => {
                    if let Some(target) = weekday_from_name(first_word(other)) {
                        let date = if forward {
                            let mut diff = days_ahead(today.weekday(), target);
                            if diff == 0 {
                                diff = 7;
                            }
                            today.checked_add_days(Days::new(diff))?
                        } else {
                            let mut diff = days_ahead(target, today.weekday());
                            if diff == 0 {
                                diff = 7;
                            }
                            today.checked_sub_days(Days::new(diff))?
                        };
                        return at_time(date, clock);
                    }
                }
            }
        }
    }
    if let Some(rest) = strip_qualifier(lower, "this") {
        match rest {
            "week" | "month" | "year" => return at_time(today, clock),
            other => {
                if let Some(target) = weekday_from_name(first_word(other)) {
                    let diff = days_ahead(today.weekday(), target);
                    return at_time(today.checked_add_days(Days::new(diff))?, clock);
                }
            }
        }
    }

    // bare weekday, future-preferring
    if let Some(target) = weekday_from_name(lower.trim()) {
        let mut diff = days_ahead(today.weekday(), target);
        if diff == 0 {
            diff = 7;
        }
        return at_time(today.checked_add_days(Days::new(diff))?, clock);
    }

    // durations resolve to now + span
    if let Some(parsed) = parse_duration(lower, now) {
        return Some(parsed);
    }

    // bare clock time: today, or tomorrow if already past
    if clock.is_some() && lower.trim().chars().next()?.is_ascii_digit() {
        let candidate = at_time(today, clock)?;
        return if candidate <= now {
            at_time(today.succ_opt()?, clock)
        } else {
            Some(candidate)
        };
    }

    None
}

/// Strip a `next `/`this `/`last ` prefix, returning the remainder.
fn strip_qualifier<'a>(lower: &'a str, qualifier: &str) -> Option<&'a str> {
    lower
        .trim()
        .strip_prefix(qualifier)
        .map(|rest| rest.trim_start())
        .filter(|rest| !rest.is_empty())
}

fn first_word(s: &str) -> &str {
    s.split_whitespace().next().unwrap_or("")
}

fn days_ahead(from: Weekday, to: Weekday) -> u64 {
    let from = from.num_days_from_monday() as i64;
    let to = to.num_days_from_monday() as i64;
    ((to - from).rem_euclid(7)) as u64
}

fn parse_duration(lower: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^(\d+)\s+(hour|minute|day|week|month)s?$").expect("duration regex")
    });
    let capture = re.captures(lower.trim())?;
    let amount: u64 = capture[1].parse().ok()?;
    match &capture[2] {
        "hour" => now.checked_add_signed(chrono::Duration::hours(amount as i64)),
        "minute" => now.checked_add_signed(chrono::Duration::minutes(amount as i64)),
        "day" => now.checked_add_days(Days::new(amount)),
        "week" => now.checked_add_days(Days::new(amount * 7)),
        "month" => now.checked_add_months(Months::new(amount as u32)),
        _ => None,
    }
}

// === Stage 2: calendar parser ===

fn month_number(name: &str) -> Option<u32> {
    let months = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    months
        .iter()
        .position(|m| *m == name)
        .map(|i| (i + 1) as u32)
}

/// Resolve calendar expressions: month-name dates, ISO dates and
/// months, quarters, period boundaries. Month-day dates without a year
/// prefer the future.
fn parse_calendar(lower: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let today = now.date();

    // Month name + day, optional clock time
    static MONTH_DAY: OnceLock<Regex> = OnceLock::new();
    let month_day = MONTH_DAY.get_or_init(|| {
        Regex::new(&format!(r"^({MONTHS})\s+(\d{{1,2}})(?:st|nd|rd|th)?\b"))
            .expect("month-day regex")
    });
    if let Some(capture) = month_day.captures(lower.trim()) {
        let month = month_number(&capture[1])?;
        let day: u32 = capture[2].parse().ok()?;
        let clock = find_clock(&lower[capture.get(0)?.end()..]);
        let mut date = NaiveDate::from_ymd_opt(today.year(), month, day)?;
        if date < today {
            date = NaiveDate::from_ymd_opt(today.year() + 1, month, day)?;
        }
        return at_time(date, clock);
    }

    // ISO date / ISO month
    static ISO: OnceLock<Regex> = OnceLock::new();
    let iso = ISO.get_or_init(|| Regex::new(r"^(\d{4})-(\d{2})(?:-(\d{2}))?$").expect("iso regex"));
    if let Some(capture) = iso.captures(lower.trim()) {
        let year: i32 = capture[1].parse().ok()?;
        let month: u32 = capture[2].parse().ok()?;
        let day: u32 = capture
            .get(3)
            .map(|d| d.as_str().parse().ok())
            .unwrap_or(Some(1))?;
        return NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0);
    }

    // Quarters: start of the quarter, future-preferring
    static QUARTER: OnceLock<Regex> = OnceLock::new();
    let quarter = QUARTER.get_or_init(|| Regex::new(r"^q([1-4])$").expect("quarter regex"));
    if let Some(capture) = quarter.captures(lower.trim()) {
        let q: u32 = capture[1].parse().ok()?;
        let start_month = (q - 1) * 3 + 1;
        let end_month = start_month + 2;
        let mut year = today.year();
        let quarter_end = last_day_of_month(year, end_month)?;
        if quarter_end < today {
            year += 1;
        }
        return NaiveDate::from_ymd_opt(year, start_month, 1)?.and_hms_opt(0, 0, 0);
    }

    // Period boundaries
    if let Some(rest) = lower.trim().strip_prefix("start of ") {
        let date = match rest {
            "day" => Some(today),
            "week" => today.checked_sub_days(Days::new(
                today.weekday().num_days_from_monday() as u64
            )),
            "month" => NaiveDate::from_ymd_opt(today.year(), today.month(), 1),
            "year" => NaiveDate::from_ymd_opt(today.year(), 1, 1),
            _ => None,
        }?;
        return date.and_hms_opt(0, 0, 0);
    }
    if let Some(rest) = lower.trim().strip_prefix("end of ") {
        return match rest {
            "day" => today.and_hms_opt(23, 59, 59),
            "week" => {
                let to_sunday = 6 - today.weekday().num_days_from_monday() as u64;
                today
                    .checked_add_days(Days::new(to_sunday))?
                    .and_hms_opt(0, 0, 0)
            }
            "month" => last_day_of_month(today.year(), today.month())?.and_hms_opt(0, 0, 0),
            "year" => NaiveDate::from_ymd_opt(today.year(), 12, 31)?.and_hms_opt(0, 0, 0),
            _ => None,
        };
    }

    None
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    first
        .checked_add_months(Months::new(1))?
        .pred_opt()
}
