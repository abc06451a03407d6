/*!
Ambient, request-scoped enrichment.

A [`Scope`] carries the user, tags, and context objects that should ride
along with any event logged while it is entered. Scopes stack per
thread: entering pushes a frame, dropping the returned guard pops it,
and the sink captures a merged snapshot of the stack at ingest. The
snapshot is folded into the outbound event at flush time — user fills
the user slot if the event didn't set one, tags merge last-write-wins,
contexts merge per key.

Nothing here is process-global: a scope entered on one thread is
invisible to every other thread.
*/

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::marker::PhantomData;

use faultline_core::Value;

use crate::{event::User, trace::TraceContext};

thread_local! {
    static ACTIVE: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

/**
A frame of ambient enrichment data.

Build one up, then [`Scope::enter`] it for the duration of a request or
unit of work:

```
let _guard = faultline::Scope::new()
    .with_tag("request.id", "r-1")
    .enter();

// events logged here carry the tag
```
*/
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub(crate) user: Option<User>,
    pub(crate) tags: BTreeMap<String, String>,
    pub(crate) contexts: BTreeMap<String, BTreeMap<String, Value>>,
    pub(crate) trace: Option<TraceContext>,
}

impl Scope {
    pub fn new() -> Self {
        Scope::default()
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_context(
        mut self,
        key: impl Into<String>,
        context: BTreeMap<String, Value>,
    ) -> Self {
        self.contexts.insert(key.into(), context);
        self
    }

    pub(crate) fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    /**
    Make this scope active on the current thread until the returned
    guard drops.
    */
    #[must_use = "the scope is only active while the guard lives"]
    pub fn enter(self) -> ScopeGuard {
        ACTIVE.with(|stack| stack.borrow_mut().push(self));

        ScopeGuard {
            _not_send: PhantomData,
        }
    }

    /**
    Run `f` with this scope active.
    */
    pub fn call<R>(self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }

    // Merge the active stack, innermost frame winning
    pub(crate) fn capture() -> Option<ScopeSnapshot> {
        ACTIVE.with(|stack| {
            let stack = stack.borrow();

            if stack.is_empty() {
                return None;
            }

            let mut snapshot = ScopeSnapshot::default();

            for scope in stack.iter() {
                if scope.user.is_some() {
                    snapshot.user = scope.user.clone();
                }

                for (key, value) in &scope.tags {
                    snapshot.tags.insert(key.clone(), value.clone());
                }

                for (key, context) in &scope.contexts {
                    snapshot
                        .contexts
                        .entry(key.clone())
                        .or_default()
                        .extend(context.clone());
                }

                if scope.trace.is_some() {
                    snapshot.trace = scope.trace.clone();
                }
            }

            Some(snapshot)
        })
    }

    pub(crate) fn current_trace() -> Option<TraceContext> {
        ACTIVE.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find_map(|scope| scope.trace.clone())
        })
    }
}

/**
Keeps a [`Scope`] active; dropping it deactivates the scope.

Guards are thread-bound and must drop in reverse entry order, which
ordinary RAII usage gives for free.
*/
pub struct ScopeGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/**
What the sink captures from the active scope stack at ingest.
*/
#[derive(Debug, Clone, Default)]
pub(crate) struct ScopeSnapshot {
    pub(crate) user: Option<User>,
    pub(crate) tags: BTreeMap<String, String>,
    pub(crate) contexts: BTreeMap<String, BTreeMap<String, Value>>,
    pub(crate) trace: Option<TraceContext>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_outside_any_scope_is_none() {
        assert!(Scope::capture().is_none());
    }

    #[test]
    fn nested_scopes_merge_innermost_wins() {
        let _outer = Scope::new()
            .with_tag("env", "prod")
            .with_tag("region", "eu")
            .enter();

        let snapshot = Scope::new()
            .with_tag("env", "canary")
            .call(|| Scope::capture().unwrap());

        assert_eq!("canary", snapshot.tags["env"]);
        assert_eq!("eu", snapshot.tags["region"]);
    }

    #[test]
    fn guard_drop_pops_the_frame() {
        {
            let _guard = Scope::new().with_tag("a", "1").enter();
            assert!(Scope::capture().is_some());
        }

        assert!(Scope::capture().is_none());
    }

    #[test]
    fn user_from_outer_scope_survives_inner_frames() {
        let user = User {
            id: Some("u-1".to_owned()),
            ..Default::default()
        };

        Scope::new().with_user(user.clone()).call(|| {
            Scope::new().with_tag("inner", "yes").call(|| {
                let snapshot = Scope::capture().unwrap();

                assert_eq!(Some(user.clone()), snapshot.user);
            })
        });
    }
}
