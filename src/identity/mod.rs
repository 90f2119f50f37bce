//! Trace identities: the `(task_id, op_id)` pair naming a trace and a position within it.
//!
//! Identities are plain values. Cloning one is a deep copy, and an identity has exactly one
//! owner; handing an identity to another thread or task means copying it.

pub mod wire;

#[cfg(any(test, feature = "test_support"))]
pub mod proptest_strategies;

pub use wire::{WireFormat, MAX_WIRE_LEN};

use crate::error::{Error, Result};
use crate::event::Event;
use rand::RngCore;

/// Maximum length, in bytes, of a task id.
pub const MAX_TASK_ID_LEN: usize = 20;

/// Maximum length, in bytes, of an op id.
pub const MAX_OP_ID_LEN: usize = 8;

/// A trace identity.
///
/// Both ids live in fixed-size buffers; `task_len` and `op_len` say how much of each buffer
/// is in use. Only the in-use bytes take part in comparisons.
#[derive(Clone, Copy)]
pub struct Identity {
    task_id: [u8; MAX_TASK_ID_LEN],
    op_id: [u8; MAX_OP_ID_LEN],
    task_len: usize,
    op_len: usize,
}

impl Identity {
    /// A zeroed identity at canonical lengths. Never valid.
    pub const fn blank() -> Self {
        Identity {
            task_id: [0; MAX_TASK_ID_LEN],
            op_id: [0; MAX_OP_ID_LEN],
            task_len: MAX_TASK_ID_LEN,
            op_len: MAX_OP_ID_LEN,
        }
    }

    /// A fresh identity naming a brand new trace.
    pub fn random() -> Self {
        let mut id = Self::blank();
        id.randomize();
        id
    }

    /// Build an identity from raw id bytes.
    pub fn from_raw_parts(task_id: &[u8], op_id: &[u8]) -> Result<Self> {
        let mut id = Self::blank();
        id.set_lengths(task_id.len(), op_id.len())?;
        id.task_id[..task_id.len()].copy_from_slice(task_id);
        id.op_id[..op_id.len()].copy_from_slice(op_id);
        Ok(id)
    }

    /// Fill both ids with random bytes at their canonical lengths.
    ///
    /// Uses the calling thread's generator, so concurrent callers never contend.
    pub fn randomize(&mut self) {
        let mut rng = rand::thread_rng();
        self.task_len = MAX_TASK_ID_LEN;
        self.op_len = MAX_OP_ID_LEN;
        rng.fill_bytes(&mut self.task_id);
        self.randomize_op_id_with(&mut rng);
    }

    /// Replace only the op id with fresh random bytes, keeping the task.
    pub fn randomize_op_id(&mut self) {
        self.randomize_op_id_with(&mut rand::thread_rng());
    }

    fn randomize_op_id_with<R: RngCore>(&mut self, rng: &mut R) {
        if self.op_len == 0 {
            return;
        }
        // an all-zero op id would make the identity invalid
        loop {
            rng.fill_bytes(&mut self.op_id[..self.op_len]);
            if self.op_id().iter().any(|b| *b != 0) {
                break;
            }
        }
    }

    /// A copy of this identity sharing its task but with a fresh op id.
    pub fn with_fresh_op_id(&self) -> Self {
        let mut next = *self;
        next.randomize_op_id();
        next
    }

    /// Deep copy `other` into `self`.
    ///
    /// Fails with [`Error::InvalidArgument`] when there is nothing to copy from.
    pub fn copy_from(&mut self, other: Option<&Identity>) -> Result<()> {
        let other = other.ok_or_else(|| {
            Error::InvalidArgument("an identity to copy from is required".to_owned())
        })?;
        *self = *other;
        Ok(())
    }

    /// Change the in-use lengths, for legacy ids shorter than the canonical maxima.
    pub fn set_lengths(&mut self, task_len: usize, op_len: usize) -> Result<()> {
        if task_len > MAX_TASK_ID_LEN {
            return Err(Error::InvalidArgument(format!(
                "task id length {task_len} exceeds {MAX_TASK_ID_LEN}"
            )));
        }
        if op_len > MAX_OP_ID_LEN {
            return Err(Error::InvalidArgument(format!(
                "op id length {op_len} exceeds {MAX_OP_ID_LEN}"
            )));
        }
        self.task_len = task_len;
        self.op_len = op_len;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.task_len > 0
            && self.task_len <= MAX_TASK_ID_LEN
            && self.op_len > 0
            && self.op_len <= MAX_OP_ID_LEN
            && self.task_id().iter().any(|b| *b != 0)
            && self.op_id().iter().any(|b| *b != 0)
    }

    pub fn task_id(&self) -> &[u8] {
        &self.task_id[..self.task_len]
    }

    pub fn op_id(&self) -> &[u8] {
        &self.op_id[..self.op_len]
    }

    pub fn task_len(&self) -> usize {
        self.task_len
    }

    pub fn op_len(&self) -> usize {
        self.op_len
    }

    /// Whether `other` belongs to the same trace.
    pub fn same_task(&self, other: &Identity) -> bool {
        self.task_id() == other.task_id()
    }

    /// The canonical wire string.
    pub fn to_text(&self) -> Result<String> {
        wire::encode(self)
    }

    /// Parse a wire string. Malformed text yields an invalid identity; only text whose
    /// framing contradicts itself is an error.
    pub fn from_text(s: &str) -> Result<Self> {
        wire::decode(s)
    }

    /// Render with a display format. Only [`WireFormat::CANONICAL`] output can be parsed.
    pub fn format(&self, fmt: WireFormat) -> Result<String> {
        wire::format(self, fmt)
    }

    /// Start a child event of this identity.
    pub fn create_event(&self) -> Result<Event> {
        Event::derive(self)
    }
}

impl Default for Identity {
    fn default() -> Self {
        Identity::blank()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.task_id() == other.task_id() && self.op_id() == other.op_id()
    }
}

impl Eq for Identity {}

impl std::hash::Hash for Identity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.task_id().hash(state);
        self.op_id().hash(state);
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("task_id", &hex::encode_upper(self.task_id()))
            .field("op_id", &hex::encode_upper(self.op_id()))
            .finish()
    }
}

/// Renders the wire string, or nothing for identities the wire format can't carry.
impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match wire::encode(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => Ok(()),
        }
    }
}

/// The strict parse: anything short of a valid identity is an error.
impl std::str::FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let id = wire::decode(s)?;
        if id.is_valid() {
            Ok(id)
        } else {
            Err(Error::InvalidIdentity)
        }
    }
}
