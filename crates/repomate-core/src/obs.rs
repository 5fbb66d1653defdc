//! Structured observability for orchestration runs.
//!
//! Every engine operation runs inside a span from [`run_span`] carrying the
//! operation name and a fresh run id, so interleaved runs stay separable in
//! the log. Lifecycle events are emitted through the `emit_*` helpers with a
//! stable `event` field.

use tracing::{info, warn, Span};

use crate::domain::PushFailure;

/// Create a span tagging all events of one run.
///
/// ```ignore
/// async { /* ... */ }.instrument(run_span("setup")).await
/// ```
pub fn run_span(operation: &'static str) -> Span {
    let run_id = uuid::Uuid::new_v4();
    tracing::info_span!("repomate.run", op = operation, run_id = %run_id)
}

pub fn emit_run_started(operation: &str, masters: usize, students: usize) {
    info!(event = "run.started", op = %operation, masters, students);
}

/// A run moved to a new phase.
pub fn emit_phase(phase: &dyn std::fmt::Display) {
    info!(event = "run.phase", phase = %phase);
}

/// One warning per failed push, naming its destination.
pub fn emit_push_failures(failures: &[PushFailure]) {
    for failure in failures {
        warn!(
            event = "push.failed",
            destination = %failure.destination_url,
            reason = %failure.reason,
        );
    }
}

pub fn emit_unresolved_member(team: &str, member: &str) {
    warn!(
        event = "team.member_unresolved",
        team = %team,
        member = %member,
        "no account for member, team created without it"
    );
}

pub fn emit_run_finished(operation: &str, duration_ms: u64, failures: usize) {
    info!(
        event = "run.finished",
        op = %operation,
        duration_ms,
        failures,
        success = failures == 0,
    );
}
