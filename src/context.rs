//! The "current identity" of an execution unit.
//!
//! A [`Context`] is an explicit register that callers thread through their own code. For
//! code that can't, each OS thread also has a default one, reachable through
//! [`with_current`]. Thread defaults are never shared; to carry a trace onto another thread,
//! copy the identity out with [`current`] and set it on the other side.

use crate::error::Result;
use crate::event::Event;
use crate::identity::Identity;
use std::cell::Cell;

thread_local! {
    static THREAD_CONTEXT: Cell<Context> = const { Cell::new(Context::new()) };
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Context {
    identity: Identity,
}

impl Context {
    /// An empty context, holding the blank identity.
    pub const fn new() -> Self {
        Context {
            identity: Identity::blank(),
        }
    }

    pub fn get(&self) -> &Identity {
        &self.identity
    }

    pub fn set(&mut self, identity: Identity) {
        self.identity = identity;
    }

    /// Adopt an inbound wire string.
    ///
    /// Malformed text clears the context. Text whose framing contradicts itself is an
    /// error and leaves the context untouched.
    pub fn set_from_text(&mut self, s: &str) -> Result<()> {
        let identity = Identity::from_text(s)?;
        if !identity.is_valid() {
            tracing::debug!(xtrace = s, "Clearing context for unusable X-Trace");
        }
        self.identity = identity;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.identity = Identity::blank();
    }

    pub fn is_valid(&self) -> bool {
        self.identity.is_valid()
    }

    /// The current identity's wire string, or an empty string if it has none.
    pub fn to_text(&self) -> String {
        self.identity.to_text().unwrap_or_default()
    }

    /// A copy of the current identity, for handing to another thread.
    pub fn copy(&self) -> Identity {
        self.identity
    }

    /// Start an event derived from the current identity.
    pub fn create_event(&self) -> Result<Event> {
        Event::derive(&self.identity)
    }

    /// Begin a brand new trace here, returning its root event.
    ///
    /// The context moves to a new task. The root event shares that task under its own op
    /// id and has no edges; reporting it advances the context onto it.
    pub fn start_trace(&mut self) -> Event {
        self.identity.randomize();
        let root = self.identity.with_fresh_op_id();
        tracing::trace!(context = %self.identity, event = %root, "Started trace in context");
        Event::from_parts(root, Vec::new(), Vec::new())
    }

    /// Move the context forward to a reported event.
    pub fn advance(&mut self, event: &Event) {
        self.identity = *event.identity();
    }
}

impl From<Identity> for Context {
    fn from(identity: Identity) -> Self {
        Context { identity }
    }
}

/// Run `f` against this thread's default context.
///
/// `f` works on a copy that is stored back when it returns, so `f` may itself use the
/// thread default. Changes made by such nested calls are replaced by the outer copy.
pub fn with_current<F, R>(f: F) -> R
where
    F: FnOnce(&mut Context) -> R,
{
    let mut ctx = THREAD_CONTEXT.with(Cell::get);
    let r = f(&mut ctx);
    THREAD_CONTEXT.with(|cell| cell.set(ctx));
    r
}

/// A copy of this thread's current identity.
pub fn current() -> Identity {
    with_current(|ctx| ctx.copy())
}
