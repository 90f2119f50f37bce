use super::{Sink, SinkError};
use crate::event::Event;
use crate::identity::Identity;

/// Keeps every reported pair in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Vec<(Identity, Event)>,
}

impl MemorySink {
    pub fn events(&self) -> &[(Identity, Event)] {
        &self.events
    }

    pub fn take(&mut self) -> Vec<(Identity, Event)> {
        std::mem::take(&mut self.events)
    }
}

impl Sink for MemorySink {
    fn send(&mut self, identity: &Identity, event: &Event) -> Result<(), SinkError> {
        self.events.push((*identity, event.clone()));
        Ok(())
    }
}
