//! Method identifiers, outcome actions and the per-method legality table.
//!
//! The table mirrors the transition rules of the request and fetch state
//! machines. This module only enforces it; the state machines decide what an
//! outcome means.
use std::fmt;

use serde::Serialize;

/// Which kind of transaction a method runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Client,
    Backend,
}

/// Outcome a compiled method leaves in the handling slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Action {
    Abandon = 1,
    Deliver,
    Error,
    Fail,
    Fetch,
    Hash,
    Lookup,
    Miss,
    Ok,
    Pass,
    Pipe,
    Purge,
    Restart,
    Retry,
    Synth,
    Vcl,
}

impl Action {
    pub const ALL: [Action; 16] = [
        Action::Abandon,
        Action::Deliver,
        Action::Error,
        Action::Fail,
        Action::Fetch,
        Action::Hash,
        Action::Lookup,
        Action::Miss,
        Action::Ok,
        Action::Pass,
        Action::Pipe,
        Action::Purge,
        Action::Restart,
        Action::Retry,
        Action::Synth,
        Action::Vcl,
    ];

    /// Bit of this action in a legality bitmap.
    pub const fn bit(self) -> u32 {
        1 << (self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::Abandon => "abandon",
            Action::Deliver => "deliver",
            Action::Error => "error",
            Action::Fail => "fail",
            Action::Fetch => "fetch",
            Action::Hash => "hash",
            Action::Lookup => "lookup",
            Action::Miss => "miss",
            Action::Ok => "ok",
            Action::Pass => "pass",
            Action::Pipe => "pipe",
            Action::Purge => "purge",
            Action::Restart => "restart",
            Action::Retry => "retry",
            Action::Synth => "synth",
            Action::Vcl => "vcl",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const fn bits(actions: &[Action]) -> u32 {
    let mut out = 0;
    let mut i = 0;
    while i < actions.len() {
        out |= actions[i].bit();
        i += 1;
    }
    out
}

/// A compiled program method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Recv,
    Pipe,
    Pass,
    Hash,
    Purge,
    Miss,
    Hit,
    Deliver,
    Synth,
    BackendFetch,
    BackendResponse,
    BackendError,
}

impl Method {
    pub const ALL: [Method; 12] = [
        Method::Recv,
        Method::Pipe,
        Method::Pass,
        Method::Hash,
        Method::Purge,
        Method::Miss,
        Method::Hit,
        Method::Deliver,
        Method::Synth,
        Method::BackendFetch,
        Method::BackendResponse,
        Method::BackendError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::Recv => "RECV",
            Method::Pipe => "PIPE",
            Method::Pass => "PASS",
            Method::Hash => "HASH",
            Method::Purge => "PURGE",
            Method::Miss => "MISS",
            Method::Hit => "HIT",
            Method::Deliver => "DELIVER",
            Method::Synth => "SYNTH",
            Method::BackendFetch => "BACKEND_FETCH",
            Method::BackendResponse => "BACKEND_RESPONSE",
            Method::BackendError => "BACKEND_ERROR",
        }
    }

    pub fn side(self) -> Side {
        match self {
            Method::BackendFetch | Method::BackendResponse | Method::BackendError => Side::Backend,
            _ => Side::Client,
        }
    }

    /// Bit of this method in a worker's seen-methods set.
    pub const fn bit(self) -> u32 {
        1 << (self as u8)
    }

    /// Legality bitmap of outcomes this method may return.
    pub const fn legal_outcomes(self) -> u32 {
        use Action::*;
        match self {
            Method::Recv => bits(&[Fail, Hash, Pass, Pipe, Purge, Synth, Vcl]),
            Method::Pipe => bits(&[Fail, Pipe, Synth]),
            Method::Pass => bits(&[Fail, Fetch, Restart, Synth]),
            Method::Hash => bits(&[Fail, Lookup]),
            Method::Purge => bits(&[Fail, Restart, Synth]),
            Method::Miss => bits(&[Fail, Fetch, Pass, Restart, Synth]),
            Method::Hit => bits(&[Deliver, Fail, Miss, Pass, Restart, Synth]),
            Method::Deliver => bits(&[Deliver, Fail, Restart, Synth]),
            Method::Synth => bits(&[Deliver, Fail, Restart]),
            Method::BackendFetch => bits(&[Abandon, Error, Fail, Fetch]),
            Method::BackendResponse => bits(&[Abandon, Deliver, Error, Fail, Retry]),
            Method::BackendError => bits(&[Abandon, Deliver, Fail, Retry]),
        }
    }

    pub fn allows(self, action: Action) -> bool {
        self.legal_outcomes() & action.bit() != 0
    }

    /// The legal outcomes as a list, in table order.
    pub fn outcomes(self) -> Vec<Action> {
        Action::ALL
            .into_iter()
            .filter(|action| self.allows(*action))
            .collect()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_method_allows_fail() {
        for method in Method::ALL {
            assert!(
                method.allows(Action::Fail),
                "{method} should allow fail"
            );
        }
    }

    #[test]
    fn test_hash_only_looks_up() {
        assert_eq!(Method::Hash.outcomes(), vec![Action::Fail, Action::Lookup]);
        assert!(!Method::Hash.allows(Action::Pass));
    }

    #[test]
    fn test_recv_bitmap() {
        assert!(Method::Recv.allows(Action::Pipe));
        assert!(Method::Recv.allows(Action::Vcl));
        assert!(!Method::Recv.allows(Action::Deliver));
        assert!(!Method::Recv.allows(Action::Ok));
    }

    #[test]
    fn test_backend_side() {
        assert_eq!(Method::BackendFetch.side(), Side::Backend);
        assert_eq!(Method::BackendError.side(), Side::Backend);
        assert_eq!(Method::Pipe.side(), Side::Client);
        assert!(Method::BackendResponse.allows(Action::Retry));
        assert!(!Method::BackendResponse.allows(Action::Lookup));
    }

    #[test]
    fn test_method_bits_distinct() {
        let mut seen = 0u32;
        for method in Method::ALL {
            assert_eq!(seen & method.bit(), 0);
            seen |= method.bit();
        }
    }
}
