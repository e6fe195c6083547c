//! One-to-one call signaling: lifecycle state machine, negotiation relay, call logs.

pub mod signaling;
pub mod state;

use serde::{Deserialize, Serialize};

pub use state::{CallLedger, CallSession, CallSignal, CallState};

/// How a call attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    Missed,
    Rejected,
    Ended,
}

/// Direction of a call from the point of view of the log entry's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Structured call-outcome record written into the pair's DM channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub kind: CallOutcome,
    pub direction: CallDirection,
    pub caller: String,
    pub callee: String,
    pub duration_secs: u64,
    pub timestamp: i64,
}

impl CallRecord {
    /// Human-readable line shown in the DM log.
    pub fn render(&self) -> String {
        match (self.kind, self.direction) {
            (CallOutcome::Missed, CallDirection::Outgoing) => "📞 Missed call (no answer)".into(),
            (CallOutcome::Missed, CallDirection::Incoming) => "📞 Missed call".into(),
            (CallOutcome::Rejected, CallDirection::Outgoing) => "📞 Call declined".into(),
            (CallOutcome::Rejected, CallDirection::Incoming) => "📞 Call rejected".into(),
            (CallOutcome::Ended, _) if self.duration_secs > 0 => {
                let mins = self.duration_secs / 60;
                let secs = self.duration_secs % 60;
                if mins > 0 {
                    format!("📞 Call ended • Duration: {mins}m {secs}s")
                } else {
                    format!("📞 Call ended • Duration: {secs}s")
                }
            }
            (CallOutcome::Ended, _) => "📞 Call ended".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: CallOutcome, direction: CallDirection, duration_secs: u64) -> CallRecord {
        CallRecord {
            kind,
            direction,
            caller: "Alice".into(),
            callee: "Bob".into(),
            duration_secs,
            timestamp: 0,
        }
    }

    #[test]
    fn test_render_call_log_lines() {
        assert_eq!(
            record(CallOutcome::Missed, CallDirection::Outgoing, 0).render(),
            "📞 Missed call (no answer)"
        );
        assert_eq!(
            record(CallOutcome::Rejected, CallDirection::Incoming, 0).render(),
            "📞 Call rejected"
        );
        assert_eq!(
            record(CallOutcome::Ended, CallDirection::Outgoing, 65).render(),
            "📞 Call ended • Duration: 1m 5s"
        );
        assert_eq!(
            record(CallOutcome::Ended, CallDirection::Incoming, 0).render(),
            "📞 Call ended"
        );
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let json = serde_json::to_value(record(CallOutcome::Ended, CallDirection::Outgoing, 3)).unwrap();
        assert_eq!(json["kind"], "ended");
        assert_eq!(json["direction"], "outgoing");
        assert_eq!(json["durationSecs"], 3);
    }
}
