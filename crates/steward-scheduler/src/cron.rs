//! Lightweight cron matcher.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds, DOW 0 = Sunday)
//! Field syntax: *, */N, A-B, A,B,C (elements may be ranges), N
//! Example: "*/15 8-18 * * 1-5" = every quarter hour, office hours, weekdays
//!
//! All five fields are ANDed, including day-of-month with day-of-week.
//! Classic cron ORs those two when both are restricted; this matcher does not.

use chrono::{DateTime, Datelike, Timelike, Utc};

/// True when `expression` matches the minute containing `at`.
///
/// Malformed expressions are never due. They are logged, not reported as errors.
pub fn is_due(expression: &str, at: DateTime<Utc>) -> bool {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        tracing::warn!(
            "Invalid cron expression: '{}' (need 5 fields: MIN HOUR DOM MON DOW)",
            expression
        );
        return false;
    }

    let values = [
        at.minute(),
        at.hour(),
        at.day(),
        at.month(),
        at.weekday().num_days_from_sunday(),
    ];

    for (field, value) in parts.iter().zip(values) {
        match field_matches(field, value) {
            Some(true) => {}
            Some(false) => return false,
            None => {
                tracing::warn!("Invalid cron field '{}' in '{}'", field, expression);
                return false;
            }
        }
    }
    true
}

/// Match one field against a value. `None` when the field cannot be parsed.
fn field_matches(field: &str, value: u32) -> Option<bool> {
    if field == "*" {
        return Some(true);
    }

    // */N: every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return Some(false);
        }
        return Some(value % n == 0);
    }

    // Comma-separated: "0,15,30,45" or "1-5,10"
    if field.contains(',') {
        let mut hit = false;
        for element in field.split(',') {
            hit |= element_matches(element.trim(), value)?;
        }
        return Some(hit);
    }

    element_matches(field, value)
}

/// A single number or an inclusive `A-B` range.
fn element_matches(element: &str, value: u32) -> Option<bool> {
    if let Some((lo, hi)) = element.split_once('-') {
        let lo: u32 = lo.trim().parse().ok()?;
        let hi: u32 = hi.trim().parse().ok()?;
        return Some(lo <= value && value <= hi);
    }
    let n: u32 = element.parse().ok()?;
    Some(n == value)
}
