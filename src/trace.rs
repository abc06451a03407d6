/*!
Trace-context propagation.

Transactions and spans don't get submitted anywhere by this crate — the
contract here is propagation only: a [`TraceContext`] rides the ambient
[`crate::Scope`] stack, and events logged under it come out tagged with
the trace ids and transaction name so the remote service can correlate
them with externally-collected traces.
*/

use core::fmt;

use rand::Rng as _;

use crate::scope::{Scope, ScopeGuard};

/**
A 128-bit trace id, rendered as 32 lowercase hex characters.
*/
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(u128);

impl TraceId {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();

        loop {
            let id = rng.gen();
            if id != 0 {
                return TraceId(id);
            }
        }
    }

    pub fn from_u128(id: u128) -> Self {
        TraceId(id)
    }

    pub fn to_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/**
A 64-bit span id, rendered as 16 lowercase hex characters.
*/
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl SpanId {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();

        loop {
            let id = rng.gen();
            if id != 0 {
                return SpanId(id);
            }
        }
    }

    pub fn from_u64(id: u64) -> Self {
        SpanId(id)
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/**
The ambient trace position events are correlated against.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub transaction: Option<String>,
    pub op: Option<String>,
}

/**
Start a transaction: a fresh trace with a root span, active on this
thread until the guard drops.
*/
#[must_use = "the transaction is only active while the guard lives"]
pub fn start_transaction(name: impl Into<String>, op: impl Into<String>) -> ScopeGuard {
    let context = TraceContext {
        trace_id: TraceId::random(),
        span_id: SpanId::random(),
        parent_span_id: None,
        transaction: Some(name.into()),
        op: Some(op.into()),
    };

    Scope::new().with_trace(context).enter()
}

/**
Start a span under the current transaction, or a fresh trace if there
isn't one.
*/
#[must_use = "the span is only active while the guard lives"]
pub fn start_span(op: impl Into<String>) -> ScopeGuard {
    let parent = Scope::current_trace();

    let context = match parent {
        Some(parent) => TraceContext {
            trace_id: parent.trace_id,
            span_id: SpanId::random(),
            parent_span_id: Some(parent.span_id),
            transaction: parent.transaction,
            op: Some(op.into()),
        },
        None => TraceContext {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_span_id: None,
            transaction: None,
            op: Some(op.into()),
        },
    };

    Scope::new().with_trace(context).enter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_format_as_fixed_width_hex() {
        assert_eq!(
            "0000000000000000000000000000002a",
            TraceId::from_u128(42).to_string()
        );
        assert_eq!("000000000000002a", SpanId::from_u64(42).to_string());
    }

    #[test]
    fn spans_inherit_the_transaction() {
        let _tx = start_transaction("checkout", "http.server");
        let outer = Scope::current_trace().unwrap();

        let _span = start_span("db.query");
        let inner = Scope::current_trace().unwrap();

        assert_eq!(outer.trace_id, inner.trace_id);
        assert_eq!(Some(outer.span_id), inner.parent_span_id);
        assert_eq!(Some("checkout".to_owned()), inner.transaction);
        assert_ne!(outer.span_id, inner.span_id);
    }

    #[test]
    fn span_without_transaction_starts_a_trace() {
        let _span = start_span("cache.get");
        let context = Scope::current_trace().unwrap();

        assert_eq!(None, context.parent_span_id);
        assert_eq!(None, context.transaction);
    }
}
