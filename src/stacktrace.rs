use std::backtrace::{Backtrace, BacktraceStatus};

/**
One frame of an extracted stack trace.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/**
A stack trace extracted for an error-valued property.

Captured on the ingest thread, so the logging call site is on it.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stacktrace {
    pub frames: Vec<Frame>,
}

impl Stacktrace {
    /**
    Capture the current stack.

    Returns `None` when the platform can't produce a capture; callers
    shouldn't cache that outcome.
    */
    pub fn capture() -> Option<Stacktrace> {
        let backtrace = Backtrace::force_capture();

        if !matches!(backtrace.status(), BacktraceStatus::Captured) {
            return None;
        }

        let trace = Self::parse(&backtrace.to_string());

        if trace.frames.is_empty() {
            None
        } else {
            Some(trace)
        }
    }

    // The std backtrace renders as numbered symbol lines, each optionally
    // followed by an indented `at <file>:<line>:<col>` line
    fn parse(rendered: &str) -> Stacktrace {
        let mut frames = Vec::new();

        for line in rendered.lines() {
            let line = line.trim();

            if let Some(location) = line.strip_prefix("at ") {
                if let Some(frame) = frames.last_mut() {
                    attach_location(frame, location);
                }
            } else if let Some((index, function)) = line.split_once(':') {
                if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
                    frames.push(Frame {
                        function: function.trim().to_owned(),
                        file: None,
                        line: None,
                    });
                }
            }
        }

        Stacktrace { frames }
    }
}

fn attach_location(frame: &mut Frame, location: &str) {
    // `<file>:<line>:<col>`, tolerating a missing column
    let mut parts = location.rsplitn(3, ':');

    let last = parts.next();
    let middle = parts.next();
    let rest = parts.next();

    let (file, line) = match (rest, middle, last) {
        (Some(file), Some(line), Some(_col)) if line.bytes().all(|b| b.is_ascii_digit()) => {
            (file, line.parse().ok())
        }
        (None, Some(file), Some(line)) if line.bytes().all(|b| b.is_ascii_digit()) => {
            (file, line.parse().ok())
        }
        _ => (location, None),
    };

    frame.file = Some(file.to_owned());
    frame.line = line;
}
