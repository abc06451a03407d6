use core::{fmt, str::FromStr};

/**
The severity of a [`crate::event::LogEvent`].

Levels are totally ordered from [`Level::Verbose`] up to [`Level::Fatal`];
the adapter routes events into the breadcrumb or tracked-event paths by
comparing against its configured thresholds.
*/
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Verbose,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Debug for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Verbose => "VERBOSE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        })
    }
}

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lvl = s.as_bytes();

        match lvl.first() {
            Some(b'V' | b'v') => {
                parse(lvl, b"VERBOSE", Level::Verbose).or_else(|_| parse(lvl, b"VRB", Level::Verbose))
            }
            Some(b'D' | b'd') => {
                parse(lvl, b"DEBUG", Level::Debug).or_else(|_| parse(lvl, b"DBG", Level::Debug))
            }
            Some(b'I' | b'i') => parse(lvl, b"INFORMATION", Level::Info),
            Some(b'W' | b'w') => {
                parse(lvl, b"WARNING", Level::Warning).or_else(|_| parse(lvl, b"WRN", Level::Warning))
            }
            Some(b'E' | b'e') => parse(lvl, b"ERROR", Level::Error),
            Some(b'F' | b'f') => parse(lvl, b"FATAL", Level::Fatal),
            _ => Err(ParseLevelError {}),
        }
    }
}

fn parse(
    mut input: &[u8],
    mut expected_uppercase: &[u8],
    ok: Level,
) -> Result<Level, ParseLevelError> {
    // Assume the first character has already been matched
    input = &input[1..];
    expected_uppercase = &expected_uppercase[1..];

    // Doesn't require a full match of the expected content
    // For example, `INF` will match `INFORMATION`
    while let Some(b) = input.first() {
        let Some(e) = expected_uppercase.first() else {
            return Err(ParseLevelError {});
        };

        if b.to_ascii_uppercase() != *e {
            return Err(ParseLevelError {});
        }

        expected_uppercase = &expected_uppercase[1..];
        input = &input[1..];
    }

    Ok(ok)
}

/**
An error attempting to parse a [`Level`] from text.
*/
#[derive(Debug)]
pub struct ParseLevelError {}

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the input was not a valid level")
    }
}

impl std::error::Error for ParseLevelError {}

impl Default for Level {
    fn default() -> Self {
        Level::Info
    }
}
