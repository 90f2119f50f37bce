//! Events: points in a trace, causally linked to the identities they were derived from.
//!
//! An event derived from a parent keeps the parent's task id and gets a fresh op id, with an
//! edge pointing back at the parent's op id. Since the task id never changes along the way,
//! every event of a trace shares it, and the `(op_id, edges)` pairs of a trace form a DAG
//! (usually a tree) rooted at the trace's first event. Extra edges model join points where
//! concurrent branches converge.
//!
//! Events finish by being encoded ([`Event::finish`]), which consumes them.

pub mod protocol;
pub mod types;

pub use types::*;

use crate::error::{Error, Result};
use crate::identity::{Identity, MAX_OP_ID_LEN};

/// A causal link to a parent operation, by op id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    op_id: [u8; MAX_OP_ID_LEN],
    len: usize,
}

impl Edge {
    /// An edge pointing at `parent`'s operation.
    pub fn to(parent: &Identity) -> Self {
        let mut op_id = [0; MAX_OP_ID_LEN];
        op_id[..parent.op_len()].copy_from_slice(parent.op_id());
        Edge {
            op_id,
            len: parent.op_len(),
        }
    }

    pub fn from_op_id(op_id: &[u8]) -> Result<Self> {
        if op_id.is_empty() || op_id.len() > MAX_OP_ID_LEN {
            return Err(Error::InvalidArgument(format!(
                "edge op id must be 1 to {MAX_OP_ID_LEN} bytes, got {}",
                op_id.len()
            )));
        }
        let mut buf = [0; MAX_OP_ID_LEN];
        buf[..op_id.len()].copy_from_slice(op_id);
        Ok(Edge {
            op_id: buf,
            len: op_id.len(),
        })
    }

    pub fn op_id(&self) -> &[u8] {
        &self.op_id[..self.len]
    }

    /// Whether this edge points at `id`'s operation.
    pub fn targets(&self, id: &Identity) -> bool {
        self.op_id() == id.op_id()
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode_upper(self.op_id()))
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Edge({self})")
    }
}

/// Something an edge can be added from: an identity, or its wire string.
#[derive(Clone, Copy, Debug)]
pub enum EdgeRef<'a> {
    Identity(&'a Identity),
    Wire(&'a str),
}

impl<'a> From<&'a Identity> for EdgeRef<'a> {
    fn from(id: &'a Identity) -> Self {
        EdgeRef::Identity(id)
    }
}

impl<'a> From<&'a str> for EdgeRef<'a> {
    fn from(s: &'a str) -> Self {
        EdgeRef::Wire(s)
    }
}

impl<'a> From<&'a String> for EdgeRef<'a> {
    fn from(s: &'a String) -> Self {
        EdgeRef::Wire(s.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    identity: Identity,
    edges: Vec<Edge>,
    attrs: Vec<(AttrKey, AttrVal)>,
}

impl Event {
    /// Start a child of `parent`: same task, fresh op id, one edge back to the parent.
    pub fn derive(parent: &Identity) -> Result<Self> {
        if !parent.is_valid() {
            return Err(Error::InvalidIdentity);
        }
        let mut identity = parent.with_fresh_op_id();
        while identity.op_id() == parent.op_id() {
            identity.randomize_op_id();
        }
        tracing::trace!(parent = %parent, event = %identity, "Derived event");
        Ok(Event {
            identity,
            edges: vec![Edge::to(parent)],
            attrs: Vec::new(),
        })
    }

    /// Start a brand new trace.
    pub fn root() -> Self {
        let identity = Identity::random();
        tracing::trace!(event = %identity, "Started trace");
        Event {
            identity,
            edges: Vec::new(),
            attrs: Vec::new(),
        }
    }

    /// Reassemble an event from its parts, as a decoder does.
    pub(crate) fn from_parts(
        identity: Identity,
        edges: Vec<Edge>,
        attrs: Vec<(AttrKey, AttrVal)>,
    ) -> Self {
        Event {
            identity,
            edges,
            attrs,
        }
    }

    /// Append an attribute.
    pub fn add_info<K: Into<AttrKey>, V: Into<AttrVal>>(&mut self, key: K, value: V) -> Result<()> {
        let key = key.into();
        let k = key.as_ref();
        if k.is_empty() || k.contains('\0') {
            return Err(Error::InvalidArgument(format!(
                "attribute key {k:?} must be non-empty text without NUL"
            )));
        }
        self.attrs.push((key, value.into()));
        Ok(())
    }

    /// Append a causal edge to another operation of the same trace.
    pub fn add_edge<'a, E: Into<EdgeRef<'a>>>(&mut self, edge: E) -> Result<()> {
        let parent = match edge.into() {
            EdgeRef::Identity(id) => *id,
            EdgeRef::Wire(s) => Identity::from_text(s)?,
        };
        if !parent.is_valid() {
            return Err(Error::InvalidIdentity);
        }
        if !parent.same_task(&self.identity) {
            return Err(Error::InvalidArgument(format!(
                "edge to {parent} belongs to a different trace"
            )));
        }
        self.edges.push(Edge::to(&parent));
        Ok(())
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn task_id(&self) -> &[u8] {
        self.identity.task_id()
    }

    pub fn op_id(&self) -> &[u8] {
        self.identity.op_id()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn attrs(&self) -> &[(AttrKey, AttrVal)] {
        &self.attrs
    }

    /// Look up the first attribute with the given key.
    pub fn attr(&self, key: &str) -> Option<&AttrVal> {
        self.attrs
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v)
    }

    /// The event's own wire string, for propagating it downstream.
    pub fn to_text(&self) -> Result<String> {
        self.identity.to_text()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        // surface an unencodable identity as an error rather than empty wire text
        self.identity.to_text()?;
        let mut buf = vec![];
        minicbor::encode(self, &mut buf)?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(minicbor::decode(bytes)?)
    }

    /// Encode and release the event.
    pub fn finish(self) -> Result<Vec<u8>> {
        self.encode()
    }
}
