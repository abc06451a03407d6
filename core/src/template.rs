/*!
Message-template rendering.

A template is literal text with `{Name}` holes filled from event
properties. Holes may carry a `:format` suffix and a leading `@` or `$`
capture hint; both are recognised and stripped before lookup, and the
format is deliberately not applied — values are written in their
canonical string form. A hole whose name misses in the properties is
preserved verbatim so malformed templates degrade visibly instead of
silently.
*/

use core::fmt::Write as _;
use std::sync::Mutex;

use crate::props::Properties;

// Estimated expansion per property when pre-growing the output buffer
const HOLE_SIZE_HINT: usize = 20;

const MAX_POOLED: usize = 32;

static POOL: Mutex<Vec<String>> = Mutex::new(Vec::new());

/**
Render `template`, filling `{Name}` holes from `props`.

Output buffers are pooled and reused across calls, so rendering on the
hot path doesn't pay a fresh allocation per event once the pool is warm.
*/
pub fn render(template: &str, props: &Properties) -> String {
    let mut buf = pool_get();
    buf.reserve(template.len() + props.len() * HOLE_SIZE_HINT);

    render_into(&mut buf, template, props);

    let rendered = buf.clone();
    pool_put(buf);

    rendered
}

/**
Render `template` into an existing buffer.
*/
pub fn render_into(out: &mut String, template: &str, props: &Properties) {
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        rest = &rest[open..];

        // `rest` starts at `{`; find the matching close. An unmatched
        // `{` is literal text
        let Some(close) = rest.find('}') else {
            out.push('{');
            rest = &rest[1..];
            continue;
        };

        let hole = &rest[1..close];
        let name = strip_hints(hole);

        match props.get(name) {
            Some(value) => {
                let _ = write!(out, "{}", value);
            }
            None => out.push_str(&rest[..=close]),
        }

        rest = &rest[close + 1..];
    }

    out.push_str(rest);
}

// `{Price:F2}` -> `Price`; `{@User}` / `{$State}` -> `User` / `State`
fn strip_hints(hole: &str) -> &str {
    let name = match hole.find(':') {
        Some(colon) => &hole[..colon],
        None => hole,
    };

    name.strip_prefix(['@', '$']).unwrap_or(name)
}

fn pool_get() -> String {
    POOL.lock()
        .map(|mut pool| pool.pop())
        .ok()
        .flatten()
        .unwrap_or_default()
}

fn pool_put(mut buf: String) {
    buf.clear();

    if let Ok(mut pool) = POOL.lock() {
        if pool.len() < MAX_POOLED {
            pool.push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{timestamp::Timestamp, value::Value};
    use core::time::Duration;
    use proptest::prelude::*;

    fn render_str(template: &str, props: &Properties) -> String {
        render(template, props)
    }

    #[test]
    fn render_fills_holes() {
        let props = Properties::new()
            .with("UserId", "u-1")
            .with("Action", "DELETE");

        assert_eq!(
            "User u-1 did DELETE",
            render_str("User {UserId} did {Action}", &props)
        );
    }

    #[test]
    fn render_timestamp_is_rfc3339() {
        let props = Properties::new()
            .with("Timestamp", Timestamp::new(Duration::from_secs(1704164645)));

        let rendered = render_str("At {Timestamp}", &props);

        assert!(rendered.contains("2024-01-02T03:04:05"), "{}", rendered);
    }

    #[test]
    fn render_preserves_misses() {
        let props = Properties::new().with("Known", "yes");

        assert_eq!(
            "{Unknown} and yes",
            render_str("{Unknown} and {Known}", &props)
        );
    }

    #[test]
    fn render_strips_format_and_capture_hints() {
        let props = Properties::new()
            .with("Price", 95.5)
            .with("User", "alice")
            .with("State", "up");

        assert_eq!("95.5", render_str("{Price:F2}", &props));
        assert_eq!("alice", render_str("{@User}", &props));
        assert_eq!("up", render_str("{$State}", &props));
    }

    #[test]
    fn render_unmatched_brace_is_literal() {
        let props = Properties::new().with("A", 1);

        assert_eq!("tail {", render_str("tail {", &props));
        assert_eq!("1 then {", render_str("{A} then {", &props));
        // The first `{` owns the hole up to the first `}`, so the inner
        // name never resolves on its own
        assert_eq!("{no close {A}", render_str("{no close {A}", &props));
        assert_eq!("{}", render_str("{}", &props));
    }

    #[test]
    fn render_null_value() {
        let props = Properties::new().with("Gone", Value::Null);

        assert_eq!("got <nil>", render_str("got {Gone}", &props));
    }

    #[test]
    fn render_error_value_writes_message() {
        let err = "x".parse::<i32>().unwrap_err();
        let props = Properties::new().with("Error", Value::capture_error(&err));

        assert_eq!(
            format!("failed: {}", err),
            render_str("failed: {Error}", &props)
        );
    }

    proptest! {
        #[test]
        fn render_roundtrip(values in proptest::collection::btree_map("[A-Za-z][A-Za-z0-9]{0,8}", "[^{}]{0,16}", 0..4)) {
            let mut template = String::from("begin ");
            let mut expected = String::from("begin ");

            for (name, value) in &values {
                template.push('{');
                template.push_str(name);
                template.push('}');
                template.push(' ');

                expected.push_str(value);
                expected.push(' ');
            }

            let props = values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Properties>();

            prop_assert_eq!(expected, render(&template, &props));
        }

        #[test]
        fn render_without_props_is_identity(template in "[^{}]{0,12}(\\{[A-Za-z]{1,8}\\}[^{}]{0,12}){0,3}") {
            let props = Properties::new();

            prop_assert_eq!(&template, &render(&template, &props));
        }
    }
}
