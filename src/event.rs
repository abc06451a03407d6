use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;

use faultline_core::{Level, Timestamp, Value};

use crate::{scope::ScopeSnapshot, stacktrace::Stacktrace};

/**
The tag every outbound event carries with its original message template,
so the remote service can group on the template rather than on rendered
values.
*/
pub const TAG_MESSAGE_TEMPLATE: &str = "message.template";

/**
The severity attached to outbound events and breadcrumbs.

`Verbose` and `Debug` log levels both map here to [`OutboundLevel::Debug`];
the remote service doesn't distinguish them.
*/
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutboundLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl OutboundLevel {
    pub fn from_level(level: Level) -> Self {
        match level {
            Level::Verbose | Level::Debug => OutboundLevel::Debug,
            Level::Info => OutboundLevel::Info,
            Level::Warning => OutboundLevel::Warning,
            Level::Error => OutboundLevel::Error,
            Level::Fatal => OutboundLevel::Fatal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundLevel::Debug => "debug",
            OutboundLevel::Info => "info",
            OutboundLevel::Warning => "warning",
            OutboundLevel::Error => "error",
            OutboundLevel::Fatal => "fatal",
        }
    }
}

impl fmt::Debug for OutboundLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl fmt::Display for OutboundLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/**
A low-severity event retained as context and attached to later tracked
events at flush time.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Breadcrumb {
    pub category: String,
    pub level: OutboundLevel,
    pub message: String,
    pub data: BTreeMap<String, Value>,
    pub timestamp: Timestamp,
}

/**
The user a tracked event is attributed to.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub id: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub ip_address: Option<String>,
}

impl User {
    /**
    Read a user record out of a map-valued property.
    */
    pub fn from_map(map: &BTreeMap<String, Value>) -> Self {
        let field = |key: &str| map.get(key).map(|v| v.to_string());

        User {
            id: field("id"),
            username: field("username"),
            email: field("email"),
            ip_address: field("ip_address"),
        }
    }
}

/**
An exception attached to an outbound event, extracted from an
error-valued property.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub kind: String,
    pub message: String,
    pub stacktrace: Option<Arc<Stacktrace>>,
}

/**
A tracked event on its way to the remote service.

Built on the ingest thread; `breadcrumbs`, scope enrichment, and the
`before_send` hook are applied by the flush worker just before the
transport sees it.
*/
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub message: String,
    pub level: OutboundLevel,
    pub timestamp: Timestamp,
    pub tags: BTreeMap<String, String>,
    pub extra: BTreeMap<String, Value>,
    pub exceptions: Vec<Exception>,
    pub user: Option<User>,
    pub fingerprint: Vec<String>,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub contexts: BTreeMap<String, BTreeMap<String, Value>>,
    pub transaction: Option<String>,
    pub(crate) scope: Option<ScopeSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_mapping_folds_verbose_into_debug() {
        assert_eq!(OutboundLevel::Debug, OutboundLevel::from_level(Level::Verbose));
        assert_eq!(OutboundLevel::Debug, OutboundLevel::from_level(Level::Debug));
        assert_eq!(OutboundLevel::Info, OutboundLevel::from_level(Level::Info));
        assert_eq!(OutboundLevel::Warning, OutboundLevel::from_level(Level::Warning));
        assert_eq!(OutboundLevel::Error, OutboundLevel::from_level(Level::Error));
        assert_eq!(OutboundLevel::Fatal, OutboundLevel::from_level(Level::Fatal));
    }

    #[test]
    fn user_from_map_reads_known_fields() {
        let mut map = BTreeMap::new();
        map.insert("id".to_owned(), Value::from("u-1"));
        map.insert("email".to_owned(), Value::from("u@example.com"));
        map.insert("plan".to_owned(), Value::from("pro"));

        let user = User::from_map(&map);

        assert_eq!(Some("u-1".to_owned()), user.id);
        assert_eq!(Some("u@example.com".to_owned()), user.email);
        assert_eq!(None, user.username);
    }
}
