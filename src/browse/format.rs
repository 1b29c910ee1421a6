use chrono::{DateTime, Utc};

pub fn format_number(n: i64) -> String {
    let magnitude = n.unsigned_abs();
    if magnitude >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if magnitude >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

/// Relative label for recent posts, calendar date after two days.
pub fn format_date(published: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let hours = (now - published).num_hours();

    if hours < 1 {
        "Just now".to_string()
    } else if hours < 24 {
        format!("{hours}h ago")
    } else if hours < 48 {
        "Yesterday".to_string()
    } else {
        published.format("%b %-d, %Y").to_string()
    }
}

pub fn format_timestamp(published_at: i64, now: DateTime<Utc>) -> String {
    match DateTime::from_timestamp(published_at, 0) {
        Some(published) => format_date(published, now),
        None => String::new(),
    }
}
