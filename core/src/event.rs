use crate::{level::Level, props::Properties, template, timestamp::Timestamp, value::Value};

/**
A structured log event delivered by the logging pipeline.

Events are read-only to consumers; the adapter never mutates one it has
been handed. The message [`LogEvent::template`] keeps its original
`{Name}` holes so the remote service can group on the template rather
than on rendered values.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    timestamp: Timestamp,
    level: Level,
    template: String,
    properties: Properties,
}

impl LogEvent {
    pub fn new(timestamp: Timestamp, level: Level, template: impl Into<String>) -> Self {
        LogEvent {
            timestamp,
            level,
            template: template.into(),
            properties: Properties::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key, value);
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /**
    Render the message template against this event's properties.
    */
    pub fn msg(&self) -> String {
        template::render(&self.template, &self.properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[test]
    fn event_renders_its_template() {
        let event = LogEvent::new(
            Timestamp::new(Duration::from_secs(1)),
            Level::Info,
            "order {OrderId} shipped",
        )
        .with("OrderId", "o-42");

        assert_eq!("order o-42 shipped", event.msg());
        assert_eq!("order {OrderId} shipped", event.template());
    }
}
