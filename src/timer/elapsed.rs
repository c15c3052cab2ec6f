//! Elapsed-time accounting.
//!
//! One pure function computes a session's elapsed minutes from its stored
//! fields and a caller-supplied "now". The controller uses it for the
//! authoritative totals at pause/stop/limit-check time and display callers
//! use the same arithmetic, so both sides always agree.

use chrono::{DateTime, Utc};
use log::error;

use crate::db::models::{SessionState, TimerSession};

/// Clamp a minutes value to a sane non-negative number. A negative or
/// non-finite value means corrupt stored data or clock skew; it is reported
/// and replaced with 0 rather than propagated into display or billing.
pub fn sanitize_minutes(value: f64, source: &str) -> f64 {
    if !value.is_finite() {
        error!("Non-finite elapsed minutes ({value}) for {source}; clamping to 0");
        return 0.0;
    }
    if value < 0.0 {
        error!("Negative elapsed minutes ({value}) for {source}; clamping to 0");
        return 0.0;
    }
    value
}

/// Minutes contributed by the current Running phase, seconds resolution.
/// Zero for any other state, a missing anchor, or a start timestamp ahead
/// of `now` (clock skew).
pub fn running_delta_minutes(session: &TimerSession, now: DateTime<Utc>) -> f64 {
    if session.state != SessionState::Running {
        return 0.0;
    }

    let Some(started_at) = session.started_at else {
        error!(
            "Running session {} has no start anchor; counting no delta",
            session.id
        );
        return 0.0;
    };

    let seconds = (now - started_at).num_seconds();
    if seconds < 0 {
        error!(
            "Session {} started_at is {}s ahead of now; counting no delta",
            session.id, -seconds
        );
        return 0.0;
    }

    seconds as f64 / 60.0
}

/// Total elapsed minutes: the committed total plus the live Running delta.
pub fn elapsed_minutes(session: &TimerSession, now: DateTime<Utc>) -> f64 {
    sanitize_minutes(session.accumulated_minutes, &session.id) + running_delta_minutes(session, now)
}

/// Rounding applied when a value crosses a persistence boundary (the log's
/// final duration). Internal arithmetic keeps full precision.
pub fn round_minutes(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
