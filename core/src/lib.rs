/*!
Core data model for `faultline`.

This crate defines the types a structured-logging pipeline hands to the
`faultline` adapter: severity [`Level`]s, [`Timestamp`]s, property
[`Value`]s, and the [`LogEvent`] that carries them, along with the
message-[`template`] renderer that turns `"User {UserId} did {Action}"`
into human-readable text.

It has no opinion on where events come from or where they go; those live
in the `faultline` crate itself.
*/

pub mod clock;
pub mod event;
pub mod level;
pub mod props;
pub mod template;
pub mod timestamp;
pub mod value;

#[doc(inline)]
pub use self::{
    clock::{Clock, ManualClock, SystemClock},
    event::LogEvent,
    level::Level,
    props::Properties,
    timestamp::Timestamp,
    value::{ErrorValue, Value},
};
