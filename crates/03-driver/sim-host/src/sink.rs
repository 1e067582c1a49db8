use sim_protocol::Event;
use smallvec::{Array, SmallVec};

/// Destination for host events.
pub trait EventSink {
    fn emit(&mut self, event: Event);
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) {
        self.push(event);
    }
}

impl<A: Array<Item = Event>> EventSink for SmallVec<A> {
    fn emit(&mut self, event: Event) {
        self.push(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: Event) {
        (**self).emit(event);
    }
}
