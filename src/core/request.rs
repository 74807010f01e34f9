//! Request Arbitration
//!
//! Every one-shot fix request and every watch-mode switch gets a fresh,
//! strictly increasing [`RequestId`]. A newer id overwrites the stored
//! "current" one, which turns any older in-flight result into a no-op:
//! whoever resumes after an `.await` must re-check [`RequestArbiter::is_current`]
//! before touching state.

use std::fmt;

/// Monotonic request identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Raw sequence number.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Request families tracked independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// `getCurrentPosition`-style single fix.
    OneShot,
    /// Stop-then-start watch transition.
    ModeSwitch,
}

/// Issues ids and remembers the current one per [`RequestKind`].
#[derive(Debug, Default)]
pub struct RequestArbiter {
    last_issued: u64,
    one_shot: Option<RequestId>,
    mode_switch: Option<RequestId>,
}

impl RequestArbiter {
    /// Create an arbiter with nothing in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a fresh id without making it current for any kind.
    pub fn next_id(&mut self) -> RequestId {
        self.last_issued += 1;
        RequestId(self.last_issued)
    }

    /// Draw a fresh id and make it the current one of `kind`.
    pub fn issue(&mut self, kind: RequestKind) -> RequestId {
        let id = self.next_id();
        *self.slot_mut(kind) = Some(id);
        id
    }

    /// Whether `id` is still the most recently issued id of `kind`.
    pub fn is_current(&self, kind: RequestKind, id: RequestId) -> bool {
        self.slot(kind) == Some(id)
    }

    /// Current id of `kind`, if any.
    pub fn current(&self, kind: RequestKind) -> Option<RequestId> {
        self.slot(kind)
    }

    /// Void whatever is in flight for `kind`.
    pub fn invalidate(&mut self, kind: RequestKind) {
        *self.slot_mut(kind) = None;
    }

    fn slot(&self, kind: RequestKind) -> Option<RequestId> {
        match kind {
            RequestKind::OneShot => self.one_shot,
            RequestKind::ModeSwitch => self.mode_switch,
        }
    }

    fn slot_mut(&mut self, kind: RequestKind) -> &mut Option<RequestId> {
        match kind {
            RequestKind::OneShot => &mut self.one_shot,
            RequestKind::ModeSwitch => &mut self.mode_switch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_strictly_increase() {
        let mut arbiter = RequestArbiter::new();
        let a = arbiter.issue(RequestKind::OneShot);
        let b = arbiter.next_id();
        let c = arbiter.issue(RequestKind::ModeSwitch);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_newer_request_supersedes_older() {
        let mut arbiter = RequestArbiter::new();
        let first = arbiter.issue(RequestKind::OneShot);
        let second = arbiter.issue(RequestKind::OneShot);

        assert!(!arbiter.is_current(RequestKind::OneShot, first));
        assert!(arbiter.is_current(RequestKind::OneShot, second));
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut arbiter = RequestArbiter::new();
        let shot = arbiter.issue(RequestKind::OneShot);
        let switch = arbiter.issue(RequestKind::ModeSwitch);

        assert!(arbiter.is_current(RequestKind::OneShot, shot));
        assert!(arbiter.is_current(RequestKind::ModeSwitch, switch));
        assert!(!arbiter.is_current(RequestKind::ModeSwitch, shot));
    }

    #[test]
    fn test_invalidate() {
        let mut arbiter = RequestArbiter::new();
        let id = arbiter.issue(RequestKind::ModeSwitch);
        arbiter.invalidate(RequestKind::ModeSwitch);
        assert!(!arbiter.is_current(RequestKind::ModeSwitch, id));
        assert_eq!(arbiter.current(RequestKind::ModeSwitch), None);
    }
}
