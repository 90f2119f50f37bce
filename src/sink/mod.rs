//! Delivery of finished events.
//!
//! A [`Sink`] takes `(identity, event)` pairs, where the identity is the context the event
//! was reported from. Sinks deliver or fail; they don't retry or buffer.

mod file;
mod memory;

pub use file::{read_events, FileSink};
pub use memory::MemorySink;

use crate::context::Context;
use crate::event::Event;
use crate::identity::Identity;
use thiserror::Error;

pub trait Sink {
    fn send(&mut self, identity: &Identity, event: &Event) -> Result<(), SinkError>;
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn send(&mut self, identity: &Identity, event: &Event) -> Result<(), SinkError> {
        (**self).send(identity, event)
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn send(&mut self, identity: &Identity, event: &Event) -> Result<(), SinkError> {
        (**self).send(identity, event)
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO Error")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Event(#[from] crate::Error),

    #[error("Encoded event of {0} bytes is too large to frame")]
    FrameTooLarge(usize),

    #[error("Event stream ends in the middle of a frame at byte {offset}")]
    Truncated { offset: usize },
}

/// Send `event` from `ctx`, then move `ctx` forward to it.
///
/// On failure the context is left where it was.
pub fn report<S: Sink + ?Sized>(
    sink: &mut S,
    ctx: &mut Context,
    event: Event,
) -> Result<(), SinkError> {
    sink.send(ctx.get(), &event)?;
    ctx.advance(&event);
    Ok(())
}
