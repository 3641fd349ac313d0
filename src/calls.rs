//! Call Sessions
//!
//! State machine for voice-call signaling between exactly two peers. Each
//! session is keyed by an opaque, originator-chosen `callId` and moves
//! Ringing -> Connected; reject and end remove the session, so any later
//! reference to its id is treated as unknown and ignored.
//!
//! There is deliberately no ringing timeout: an unanswered call rings until
//! the callee responds or disconnects.

use std::collections::HashMap;

/// Phase of a live call session. A terminated call has no entry at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Ringing,
    Connected,
}

/// One call between a caller and a callee.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: String,
    pub caller: u64,
    pub callee: u64,
    pub phase: CallPhase,
}

impl CallSession {
    fn involves(&self, user_id: u64) -> bool {
        self.caller == user_id || self.callee == user_id
    }

    /// The counter-party of `user_id`, if they participate at all.
    pub fn peer_of(&self, user_id: u64) -> Option<u64> {
        if self.caller == user_id {
            Some(self.callee)
        } else if self.callee == user_id {
            Some(self.caller)
        } else {
            None
        }
    }
}

/// All live call sessions, keyed by call id.
#[derive(Debug, Default)]
pub struct CallTable {
    sessions: HashMap<String, CallSession>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new ringing session. A live session under the same id is
    /// replaced; id reuse is the caller's choice and each reuse is a new,
    /// distinct session.
    pub fn ring(&mut self, call_id: &str, caller: u64, callee: u64) {
        let session = CallSession {
            call_id: call_id.to_string(),
            caller,
            callee,
            phase: CallPhase::Ringing,
        };
        if self.sessions.insert(call_id.to_string(), session).is_some() {
            log::warn!("Call id {} reused while still live, replacing session", call_id);
        }
        log::info!("Call {} ringing: {} -> {}", call_id, caller, callee);
    }

    /// Callee accepts. Returns the caller to notify, or `None` when the
    /// reference is stale, the session already connected, or `by` is not the
    /// callee of a ring from `claimed_caller`.
    pub fn accept(&mut self, call_id: &str, by: u64, claimed_caller: u64) -> Option<u64> {
        let session = self.sessions.get_mut(call_id)?;
        if session.phase != CallPhase::Ringing
            || session.callee != by
            || session.caller != claimed_caller
        {
            log::debug!("Ignoring invalid accept of call {} by {}", call_id, by);
            return None;
        }
        session.phase = CallPhase::Connected;
        log::info!("Call {} connected", call_id);
        Some(session.caller)
    }

    /// Callee rejects a ringing session. Returns the caller to notify; the
    /// session is removed.
    pub fn reject(&mut self, call_id: &str, by: u64, claimed_caller: u64) -> Option<u64> {
        match self.sessions.get(call_id) {
            Some(s)
                if s.phase == CallPhase::Ringing
                    && s.callee == by
                    && s.caller == claimed_caller => {}
            _ => {
                log::debug!("Ignoring invalid reject of call {} by {}", call_id, by);
                return None;
            }
        }
        let session = self.sessions.remove(call_id)?;
        log::info!("Call {} rejected", call_id);
        Some(session.caller)
    }

    /// Either participant ends the call unilaterally, at any phase. Returns
    /// whether a session was actually ended.
    pub fn end(&mut self, call_id: &str, by: u64) -> bool {
        match self.sessions.get(call_id) {
            Some(s) if s.involves(by) => {
                self.sessions.remove(call_id);
                log::info!("Call {} ended by {}", call_id, by);
                true
            }
            _ => false,
        }
    }

    /// Validate a signaling relay: `from` and `target` must be the two
    /// participants of a live session under `call_id`. Relay is permitted in
    /// both Ringing and Connected phases (early candidates arrive while
    /// ringing).
    pub fn may_relay(&self, call_id: &str, from: u64, target: u64) -> bool {
        match self.sessions.get(call_id) {
            Some(session) => session.peer_of(from) == Some(target),
            None => false,
        }
    }

    pub fn get(&self, call_id: &str) -> Option<&CallSession> {
        self.sessions.get(call_id)
    }

    /// Sessions a user participates in, as `(call_id, counter-party)` pairs.
    pub fn sessions_involving(&self, user_id: u64) -> Vec<(String, u64)> {
        self.sessions
            .values()
            .filter_map(|s| Some((s.call_id.clone(), s.peer_of(user_id)?)))
            .collect()
    }

    /// Remove a session outright, without participant validation. Used when
    /// both parties are gone and nobody is left to end the call.
    pub fn remove(&mut self, call_id: &str) -> Option<CallSession> {
        let session = self.sessions.remove(call_id);
        if session.is_some() {
            log::info!("Call {} dropped, both participants disconnected", call_id);
        }
        session
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_then_accept_connects() {
        let mut calls = CallTable::new();
        calls.ring("c1", 1, 2);
        assert_eq!(calls.get("c1").unwrap().phase, CallPhase::Ringing);

        assert_eq!(calls.accept("c1", 2, 1), Some(1));
        assert_eq!(calls.get("c1").unwrap().phase, CallPhase::Connected);
    }

    #[test]
    fn test_double_accept_is_noop() {
        let mut calls = CallTable::new();
        calls.ring("c1", 1, 2);
        assert_eq!(calls.accept("c1", 2, 1), Some(1));
        assert_eq!(calls.accept("c1", 2, 1), None);
    }

    #[test]
    fn test_only_callee_may_accept() {
        let mut calls = CallTable::new();
        calls.ring("c1", 1, 2);
        // Caller accepting their own call, or a third party, is invalid
        assert_eq!(calls.accept("c1", 1, 1), None);
        assert_eq!(calls.accept("c1", 3, 1), None);
        assert_eq!(calls.get("c1").unwrap().phase, CallPhase::Ringing);
    }

    #[test]
    fn test_reject_removes_session() {
        let mut calls = CallTable::new();
        calls.ring("c1", 1, 2);
        assert_eq!(calls.reject("c1", 2, 1), Some(1));
        assert!(calls.get("c1").is_none());
        // Stale reject
        assert_eq!(calls.reject("c1", 2, 1), None);
    }

    #[test]
    fn test_end_is_unilateral_at_any_phase() {
        let mut calls = CallTable::new();
        calls.ring("c1", 1, 2);
        // Caller may end while still ringing
        assert!(calls.end("c1", 1));
        assert!(calls.is_empty());

        calls.ring("c2", 1, 2);
        calls.accept("c2", 2, 1);
        // Callee may end while connected
        assert!(calls.end("c2", 2));
        // Double end
        assert!(!calls.end("c2", 2));
    }

    #[test]
    fn test_end_by_stranger_is_noop() {
        let mut calls = CallTable::new();
        calls.ring("c1", 1, 2);
        assert!(!calls.end("c1", 3));
        assert!(calls.get("c1").is_some());
    }

    #[test]
    fn test_relay_validation() {
        let mut calls = CallTable::new();
        calls.ring("c1", 1, 2);

        // Both directions, while still ringing
        assert!(calls.may_relay("c1", 1, 2));
        assert!(calls.may_relay("c1", 2, 1));
        // Wrong target, outsider, unknown call
        assert!(!calls.may_relay("c1", 1, 3));
        assert!(!calls.may_relay("c1", 3, 2));
        assert!(!calls.may_relay("nope", 1, 2));

        calls.end("c1", 1);
        // Signaling after end is a no-op
        assert!(!calls.may_relay("c1", 1, 2));
    }

    #[test]
    fn test_call_id_reuse_is_a_new_session() {
        let mut calls = CallTable::new();
        calls.ring("c1", 1, 2);
        calls.end("c1", 2);

        calls.ring("c1", 3, 4);
        let session = calls.get("c1").unwrap();
        assert_eq!((session.caller, session.callee), (3, 4));
        assert_eq!(session.phase, CallPhase::Ringing);
    }

    #[test]
    fn test_sessions_involving_reports_peers() {
        let mut calls = CallTable::new();
        calls.ring("c1", 1, 2);
        calls.ring("c2", 3, 1);
        calls.ring("c3", 3, 4);

        let mut involved = calls.sessions_involving(1);
        involved.sort();
        assert_eq!(involved, vec![("c1".to_string(), 2), ("c2".to_string(), 3)]);
        assert!(calls.sessions_involving(9).is_empty());

        calls.remove("c1");
        assert_eq!(calls.len(), 2);
    }
}
