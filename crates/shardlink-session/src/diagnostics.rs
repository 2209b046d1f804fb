//! The diagnostics sink: where recoverable problems get reported.
//!
//! Dropped messages, decode errors, timed-out pending loads, and policy
//! violations are expected under real network conditions. None of them
//! stop the session; each produces exactly one [`DiagnosticsSink::report`]
//! call so the application can count, log, or surface them.

use std::fmt;

use tracing::warn;

/// What kind of problem a report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCategory {
    /// A well-formed message was dropped (wrong state, unknown sender, ...).
    DroppedMessage,
    /// Inbound bytes failed to decode.
    DecodeError,
    /// A pending state record exceeded its reset ceiling or maximum age.
    PendingTimeout,
    /// A pending state record was dropped before it could time out: its
    /// target is not in the dataset, or the queue was cleared on leave.
    /// Counting every lost pending record means counting this and
    /// [`PendingTimeout`](Self::PendingTimeout); see
    /// [`drops_pending_state`](Self::drops_pending_state).
    PendingDiscarded,
    /// The world store refused a state record.
    StateRejected,
    /// A conflicting registration was resolved by last-write-wins.
    PolicyViolation,
    /// The transport refused an outbound frame.
    SendFailed,
}

impl DiagnosticCategory {
    /// Stable lowercase name, used as the structured `category` log field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DroppedMessage => "dropped_message",
            Self::DecodeError => "decode_error",
            Self::PendingTimeout => "pending_timeout",
            Self::PendingDiscarded => "pending_discarded",
            Self::StateRejected => "state_rejected",
            Self::PolicyViolation => "policy_violation",
            Self::SendFailed => "send_failed",
        }
    }
}

impl DiagnosticCategory {
    /// Whether the report means a pending state record was lost.
    pub fn drops_pending_state(self) -> bool {
        matches!(self, Self::PendingTimeout | Self::PendingDiscarded)
    }
}

impl fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives diagnostic reports. Never a failure path: implementations
/// must not panic and the caller ignores whatever they do.
pub trait DiagnosticsSink {
    fn report(&mut self, category: DiagnosticCategory, message: &str);
}

/// Forwards every report to `tracing::warn!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn report(&mut self, category: DiagnosticCategory, message: &str) {
        warn!(category = %category, "{message}");
    }
}

/// One recorded report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub category: DiagnosticCategory,
    pub message: String,
}

/// Keeps every report in memory, in order.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All reports so far, oldest first.
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Number of reports in `category`.
    pub fn count(&self, category: DiagnosticCategory) -> usize {
        self.entries.iter().filter(|d| d.category == category).count()
    }

    /// Pending state records lost for any reason, timed out or discarded.
    pub fn pending_dropped(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.category.drops_pending_state())
            .count()
    }

    /// Takes every report, leaving the log empty.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DiagnosticsSink for DiagnosticLog {
    fn report(&mut self, category: DiagnosticCategory, message: &str) {
        self.entries.push(Diagnostic {
            category,
            message: message.to_owned(),
        });
    }
}
