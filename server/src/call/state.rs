use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::CallError;
use crate::session::Identity;

/// Lifecycle of one call attempt between two users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Calling,
    Ringing,
    InCall,
    Ended,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Calling => "calling",
            Self::Ringing => "ringing",
            Self::InCall => "in-call",
            Self::Ended => "ended",
        }
    }

    /// Idle and Ended sessions are discarded.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle | Self::Ended)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Calling | Self::Ringing)
    }
}

/// Inputs driving the call state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSignal {
    /// Caller asks to call the callee.
    Request,
    /// The callee's connection was notified of the incoming call.
    Ring,
    /// Callee accepted.
    Accept,
    /// Callee declined.
    Reject,
    /// Caller gave up before an answer.
    Cancel,
    /// Nobody answered within the ring timeout.
    Timeout,
    /// Either side hung up an established call.
    End,
}

impl CallSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Ring => "ring",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
            Self::Timeout => "time out",
            Self::End => "end",
        }
    }
}

/// Pure transition function. `InCall` is only reachable from `Ringing` via `Accept`.
///
/// `Ring` on `Ringing` and `Accept` on `InCall` are no-ops so a node that observes
/// both sides of a call (caller and callee on the same node) can apply each
/// delivered notification without special cases.
pub fn transition(state: CallState, signal: CallSignal) -> Result<CallState, CallError> {
    use CallSignal::*;
    use CallState::*;

    match (state, signal) {
        (Idle, Request) => Ok(Calling),
        (Calling, Ring) | (Ringing, Ring) => Ok(Ringing),
        (Ringing, Accept) | (InCall, Accept) => Ok(InCall),
        (Ringing, Reject) => Ok(Idle),
        (Calling, Cancel) | (Ringing, Cancel) => Ok(Idle),
        (Calling, Timeout) | (Ringing, Timeout) => Ok(Idle),
        (InCall, End) => Ok(Ended),
        (state, signal) => Err(CallError::InvalidTransition {
            state: state.as_str(),
            signal: signal.as_str(),
        }),
    }
}

/// One call attempt as seen by this node.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub caller: Identity,
    pub callee: Identity,
    pub state: CallState,
    /// Distinguishes successive attempts between the same pair (for timeouts).
    pub attempt: Uuid,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

impl CallSession {
    fn new(caller: &Identity, callee: &Identity, state: CallState) -> Self {
        Self {
            caller: caller.clone(),
            callee: callee.clone(),
            state,
            attempt: Uuid::new_v4(),
            started_at: Utc::now(),
            answered_at: None,
        }
    }

    /// The other participant, relative to `me`.
    pub fn peer_of(&self, me: &Identity) -> &Identity {
        if &self.caller == me {
            &self.callee
        } else {
            &self.caller
        }
    }

    /// Whole seconds since the call was answered (0 if it never was).
    pub fn talk_seconds(&self) -> u64 {
        self.answered_at
            .map(|at| (Utc::now() - at).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

/// Call sessions keyed by the unordered participant pair.
///
/// This is not distributed state: each node tracks the view of the calls whose
/// participants it holds, advanced by the requests it handles and the call
/// notifications it delivers.
#[derive(Debug, Default)]
pub struct CallLedger {
    sessions: DashMap<String, CallSession>,
}

fn pair_key(a: &Identity, b: &Identity) -> String {
    crate::dm::channel_id(a, b)
}

impl CallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// `idle -> calling`. Fails if the pair already has a live attempt.
    pub fn request(&self, caller: &Identity, callee: &Identity) -> Result<CallSession, CallError> {
        use dashmap::mapref::entry::Entry;

        match self.sessions.entry(pair_key(caller, callee)) {
            Entry::Occupied(_) => Err(CallError::AlreadyActive(callee.name().to_string())),
            Entry::Vacant(vacant) => {
                let state = transition(CallState::Idle, CallSignal::Request)?;
                let session = CallSession::new(caller, callee, state);
                vacant.insert(session.clone());
                Ok(session)
            }
        }
    }

    /// The callee's connection has been notified.
    ///
    /// Creates the callee-side view if this node has not seen the request.
    /// Returns the session and whether it was created here.
    pub fn ring(&self, caller: &Identity, callee: &Identity) -> Result<(CallSession, bool), CallError> {
        let mut created = false;
        let mut entry = self
            .sessions
            .entry(pair_key(caller, callee))
            .or_insert_with(|| {
                created = true;
                CallSession::new(caller, callee, CallState::Calling)
            });
        entry.state = transition(entry.state, CallSignal::Ring)?;
        Ok((entry.clone(), created))
    }

    /// Apply `signal` to the pair's session.
    ///
    /// Terminal results remove the session; the returned copy carries the final state.
    pub fn apply(&self, a: &Identity, b: &Identity, signal: CallSignal) -> Result<CallSession, CallError> {
        let key = pair_key(a, b);
        let updated = {
            let mut session = self
                .sessions
                .get_mut(&key)
                .ok_or_else(|| CallError::NoSession(b.name().to_string()))?;
            let next = transition(session.state, signal)?;
            if next == CallState::InCall && session.answered_at.is_none() {
                session.answered_at = Some(Utc::now());
            }
            session.state = next;
            session.clone()
        };
        if updated.state.is_terminal() {
            self.sessions.remove(&key);
        }
        Ok(updated)
    }

    /// Discard the pair's session, whatever its state.
    pub fn discard(&self, a: &Identity, b: &Identity) -> Option<CallSession> {
        self.sessions.remove(&pair_key(a, b)).map(|(_, s)| s)
    }

    /// Ring timeout: `calling|ringing -> idle` if `attempt` is still unanswered.
    pub fn expire(&self, a: &Identity, b: &Identity, attempt: Uuid) -> Option<CallSession> {
        self.sessions
            .remove_if(&pair_key(a, b), |_, s| s.attempt == attempt && s.state.is_pending())
            .map(|(_, mut s)| {
                s.state = CallState::Idle;
                s
            })
    }

    pub fn get(&self, a: &Identity, b: &Identity) -> Option<CallSession> {
        self.sessions.get(&pair_key(a, b)).map(|s| s.clone())
    }

    /// Every session `who` takes part in.
    pub fn sessions_of(&self, who: &Identity) -> Vec<CallSession> {
        self.sessions
            .iter()
            .filter(|s| &s.caller == who || &s.callee == who)
            .map(|s| s.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
