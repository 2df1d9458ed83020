//! Engine lifecycle events and the sinks that receive them.
//!
//! Sinks are passed explicitly to the engine and scheduler; there is no
//! process-wide sink.

mod event;
mod sink;

pub use event::{types, EngineEvent};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
