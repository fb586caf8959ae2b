//! Double-buffered message queues with independent readers.
//!
//! [`Events`] keeps the messages of the last two update frames. Each reader
//! carries its own cursor into the global message count: a freshly created
//! reader starts at the current tail and only observes messages written after
//! its creation. Messages not read within two updates are dropped.

use crate::change_detection::{Res, ResMut};
use crate::resource::Resource;
use crate::system::{ReadOnlySystemParam, SystemMeta, SystemParam};
use crate::tick::Tick;
use crate::world::{UnsafeWorldCell, World};
use std::marker::PhantomData;

/// A message sent between systems through an [`Events`] resource. Prefer
/// `#[derive(Event)]`.
pub trait Event: Send + Sync + 'static {}

#[derive(Debug)]
enum BufferState {
    A,
    B,
}

/// The event collection for one event type. Holds two frames of messages;
/// [`Events::update`] rotates them, dropping the older frame.
#[derive(Debug)]
pub struct Events<E: Event> {
    events_a: Vec<E>,
    events_b: Vec<E>,
    a_start_event_count: usize,
    b_start_event_count: usize,
    event_count: usize,
    state: BufferState,
}

impl<E: Event> Default for Events<E> {
    fn default() -> Self {
        Self {
            events_a: Vec::new(),
            events_b: Vec::new(),
            a_start_event_count: 0,
            b_start_event_count: 0,
            event_count: 0,
            state: BufferState::A,
        }
    }
}

impl<E: Event> Resource for Events<E> {}

impl<E: Event> Events<E> {
    /// Appends an event to the current frame.
    pub fn send(&mut self, event: E) {
        match self.state {
            BufferState::A => self.events_a.push(event),
            BufferState::B => self.events_b.push(event),
        }
        self.event_count += 1;
    }

    pub fn send_batch(&mut self, events: impl IntoIterator<Item = E>) {
        for event in events {
            self.send(event);
        }
    }

    /// Rotates the frames, dropping events from two updates ago. Call once
    /// per frame ([`event_update_system`] does this).
    pub fn update(&mut self) {
        match self.state {
            BufferState::A => {
                self.events_b.clear();
                self.b_start_event_count = self.event_count;
                self.state = BufferState::B;
            }
            BufferState::B => {
                self.events_a.clear();
                self.a_start_event_count = self.event_count;
                self.state = BufferState::A;
            }
        }
    }

    /// Total number of events ever sent.
    #[inline]
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Number of events currently retained.
    pub fn len(&self) -> usize {
        self.events_a.len() + self.events_b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all retained events without rotating.
    pub fn clear(&mut self) {
        self.events_a.clear();
        self.events_b.clear();
        self.a_start_event_count = self.event_count;
        self.b_start_event_count = self.event_count;
    }

    /// Removes all retained events, yielding them in send order.
    pub fn drain(&mut self) -> impl Iterator<Item = E> + '_ {
        self.a_start_event_count = self.event_count;
        self.b_start_event_count = self.event_count;
        match self.state {
            BufferState::A => self.events_b.drain(..).chain(self.events_a.drain(..)),
            BufferState::B => self.events_a.drain(..).chain(self.events_b.drain(..)),
        }
    }

    /// A cursor positioned at the current tail: it will only see events sent
    /// after this call.
    pub fn get_cursor(&self) -> EventCursor<E> {
        EventCursor {
            last_event_count: self.event_count,
            marker: PhantomData,
        }
    }

    /// A cursor positioned at the oldest retained event.
    pub fn get_cursor_at_start(&self) -> EventCursor<E> {
        EventCursor {
            last_event_count: self
                .a_start_event_count
                .min(self.b_start_event_count),
            marker: PhantomData,
        }
    }

    fn iter_from(&self, last_event_count: usize) -> impl Iterator<Item = &E> {
        let a_index = last_event_count.saturating_sub(self.a_start_event_count);
        let b_index = last_event_count.saturating_sub(self.b_start_event_count);
        let a = self.events_a.get(a_index..).unwrap_or(&[]);
        let b = self.events_b.get(b_index..).unwrap_or(&[]);
        // older frame first, so events come out in send order
        match self.state {
            BufferState::A => b.iter().chain(a.iter()),
            BufferState::B => a.iter().chain(b.iter()),
        }
    }
}

/// Tracks which events a reader has already seen. Detached from the
/// [`Events`] resource so many readers can coexist.
#[derive(Debug)]
pub struct EventCursor<E: Event> {
    last_event_count: usize,
    marker: PhantomData<E>,
}

impl<E: Event> Default for EventCursor<E> {
    fn default() -> Self {
        Self {
            last_event_count: 0,
            marker: PhantomData,
        }
    }
}

impl<E: Event> EventCursor<E> {
    /// Iterates events this cursor has not seen yet, advancing the cursor.
    pub fn read<'a>(&mut self, events: &'a Events<E>) -> impl Iterator<Item = &'a E> {
        let iter = events.iter_from(self.last_event_count);
        self.last_event_count = events.event_count;
        iter
    }

    /// Number of unseen events without advancing.
    pub fn len(&self, events: &Events<E>) -> usize {
        events.iter_from(self.last_event_count).count()
    }

    pub fn is_empty(&self, events: &Events<E>) -> bool {
        self.len(events) == 0
    }

    /// Advances the cursor past all retained events.
    pub fn clear(&mut self, events: &Events<E>) {
        self.last_event_count = events.event_count;
    }
}

/// System param that reads events of type `E` in send order.
pub struct EventReader<'w, 's, E: Event> {
    cursor: &'s mut EventCursor<E>,
    events: Res<'w, Events<E>>,
}

impl<'w, 's, E: Event> EventReader<'w, 's, E> {
    /// Iterates unseen events, advancing this reader's cursor.
    pub fn read(&mut self) -> impl Iterator<Item = &E> {
        self.cursor.read(&self.events)
    }

    pub fn len(&self) -> usize {
        self.cursor.len(&self.events)
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.is_empty(&self.events)
    }

    /// Marks all pending events seen.
    pub fn clear(&mut self) {
        self.cursor.clear(&self.events);
    }
}

/// State of an [`EventReader`] param.
pub struct EventReaderState<E: Event> {
    cursor: EventCursor<E>,
    resource_id: crate::component::ComponentId,
}

unsafe impl<'w2, 's2, E: Event> SystemParam for EventReader<'w2, 's2, E> {
    type State = EventReaderState<E>;
    type Item<'w, 's> = EventReader<'w, 's, E>;

    fn init_state(world: &mut World, system_meta: &mut SystemMeta) -> Self::State {
        world.init_resource::<Events<E>>();
        let resource_id = <Res<Events<E>> as SystemParam>::init_state(world, system_meta);
        // a new reader starts at the current tail
        let cursor = world.resource::<Events<E>>().get_cursor();
        EventReaderState {
            cursor,
            resource_id,
        }
    }

    unsafe fn get_param<'w, 's>(
        state: &'s mut Self::State,
        system_meta: &SystemMeta,
        world: UnsafeWorldCell<'w>,
        this_run: Tick,
    ) -> Self::Item<'w, 's> {
        // SAFETY: read access declared through the inner Res state
        let mut resource_id = state.resource_id;
        let events =
            <Res<Events<E>> as SystemParam>::get_param(&mut resource_id, system_meta, world, this_run);
        EventReader {
            cursor: &mut state.cursor,
            events,
        }
    }
}

unsafe impl<'w2, 's2, E: Event> ReadOnlySystemParam for EventReader<'w2, 's2, E> {}

/// System param that sends events of type `E`.
pub struct EventWriter<'w, E: Event> {
    events: ResMut<'w, Events<E>>,
}

impl<'w, E: Event> EventWriter<'w, E> {
    pub fn send(&mut self, event: E) {
        self.events.send(event);
    }

    pub fn send_batch(&mut self, events: impl IntoIterator<Item = E>) {
        self.events.send_batch(events);
    }
}

unsafe impl<'w2, E: Event> SystemParam for EventWriter<'w2, E> {
    type State = crate::component::ComponentId;
    type Item<'w, 's> = EventWriter<'w, E>;

    fn init_state(world: &mut World, system_meta: &mut SystemMeta) -> Self::State {
        world.init_resource::<Events<E>>();
        <ResMut<Events<E>> as SystemParam>::init_state(world, system_meta)
    }

    unsafe fn get_param<'w, 's>(
        state: &'s mut Self::State,
        system_meta: &SystemMeta,
        world: UnsafeWorldCell<'w>,
        this_run: Tick,
    ) -> Self::Item<'w, 's> {
        // SAFETY: write access declared in init_state
        let events = <ResMut<Events<E>> as SystemParam>::get_param(state, system_meta, world, this_run);
        EventWriter { events }
    }
}

/// Rotates the `Events<E>` frames. Registered once per event type, early in
/// the frame.
pub fn event_update_system<E: Event>(mut events: ResMut<Events<E>>) {
    events.update();
}

impl World {
    /// Sends an event if its queue resource exists. Returns `false` (and
    /// logs) when the event type was never registered.
    pub fn send_event<E: Event>(&mut self, event: E) -> bool {
        let Some(mut events) = self.get_resource_mut::<Events<E>>() else {
            log::warn!(
                "cannot send event {}: Events resource does not exist",
                std::any::type_name::<E>()
            );
            return false;
        };
        events.send(event);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Clone)]
    struct Ping(u32);
    impl Event for Ping {}

    #[test]
    fn readers_see_only_events_after_creation() {
        let mut events = Events::<Ping>::default();
        events.send(Ping(1));
        let mut cursor = events.get_cursor();
        assert_eq!(cursor.read(&events).count(), 0, "starts at the tail");
        events.send(Ping(2));
        let seen: Vec<_> = cursor.read(&events).cloned().collect();
        assert_eq!(seen, vec![Ping(2)]);
    }

    #[test]
    fn two_frame_retention() {
        let mut events = Events::<Ping>::default();
        let mut cursor = events.get_cursor();

        events.send(Ping(1));
        events.update();
        events.send(Ping(2));
        // reader lagging one update still sees both frames, in order
        let seen: Vec<_> = cursor.read(&events).cloned().collect();
        assert_eq!(seen, vec![Ping(1), Ping(2)]);

        let mut late = EventCursor::<Ping>::default();
        events.update();
        events.update();
        // two updates later, everything from before is gone
        assert_eq!(late.read(&events).count(), 0);
    }

    #[test]
    fn each_reader_is_independent() {
        let mut events = Events::<Ping>::default();
        let mut a = events.get_cursor();
        let mut b = events.get_cursor();
        events.send(Ping(7));
        assert_eq!(a.read(&events).count(), 1);
        assert_eq!(a.read(&events).count(), 0, "a consumed its view");
        assert_eq!(b.read(&events).count(), 1, "b unaffected by a");
    }

    #[test]
    fn drain_preserves_send_order_across_frames() {
        let mut events = Events::<Ping>::default();
        events.send(Ping(1));
        events.update();
        events.send(Ping(2));
        events.send(Ping(3));
        let drained: Vec<_> = events.drain().collect();
        assert_eq!(drained, vec![Ping(1), Ping(2), Ping(3)]);
        assert!(events.is_empty());
    }
}
