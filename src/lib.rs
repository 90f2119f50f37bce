//! Distributed-trace identities and causality.
//!
//! * [`identity`]: the `(task_id, op_id)` pair naming a trace and a point in it, and its
//!   X-Trace wire text.
//! * [`event`]: events derived from identities, with causal edges and typed attributes.
//! * [`sampling`]: per-operation sampling decisions against swappable settings.
//! * [`context`]: the current identity of an execution unit.
//! * [`sink`]: delivery of finished events.
//! * [`config`]: loading the sampling configuration.

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod identity;
pub mod sampling;
pub mod sink;

pub use context::Context;
pub use error::{Error, Result};
pub use event::{AttrKey, AttrVal, Edge, Event};
pub use identity::{Identity, WireFormat};
pub use sampling::{SampleDecision, SampleRate, SampleSource, Sampler, TracingMode};
pub use sink::{report, Sink, SinkError};
