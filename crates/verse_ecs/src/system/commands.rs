//! Deferred structural mutations.
//!
//! Systems record commands into a per-system FIFO queue; the executor applies
//! queues at explicit [`ApplyDeferred`](crate::schedule::ApplyDeferred)
//! barriers and at schedule end, in record order, under exclusive world
//! access.

use crate::component::Component;
use crate::entity::Entity;
use crate::resource::Resource;
use crate::world::World;

/// Inserts a component value without knowing its type at the call site.
pub trait ErasedComponentValue: Send + Sync {
    fn insert(self: Box<Self>, world: &mut World, entity: Entity) -> bool;
    fn component_name(&self) -> &'static str;
}

impl<T: Component> ErasedComponentValue for T {
    fn insert(self: Box<Self>, world: &mut World, entity: Entity) -> bool {
        world.insert_component(entity, *self)
    }

    fn component_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

pub trait ErasedResourceValue: Send + Sync {
    fn insert(self: Box<Self>, world: &mut World);
}

impl<T: Resource> ErasedResourceValue for T {
    fn insert(self: Box<Self>, world: &mut World) {
        world.insert_resource(*self);
    }
}

/// One deferred mutation.
pub enum Command {
    /// Despawn an entity.
    DestroyEntity(Entity),
    /// Attach (or replace) a component value.
    SetComponent {
        entity: Entity,
        value: Box<dyn ErasedComponentValue>,
    },
    /// Detach a component.
    UnsetComponent {
        entity: Entity,
        remove: fn(&mut World, Entity),
    },
    /// Stamp a component's changed tick.
    SetChanged {
        entity: Entity,
        set_changed: fn(&mut World, Entity),
    },
    /// Insert (or replace) a resource.
    InsertResource(Box<dyn ErasedResourceValue>),
}

/// A FIFO queue of [`Command`]s. Each system owns one.
#[derive(Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Applies all queued commands in record order. Commands referring to
    /// entities that died in the meantime are dropped with a log message.
    pub fn apply(&mut self, world: &mut World) {
        for command in self.commands.drain(..) {
            match command {
                Command::DestroyEntity(entity) => {
                    if !world.despawn(entity) {
                        log::debug!("cannot despawn {entity:?}: already despawned");
                    }
                }
                Command::SetComponent { entity, value } => {
                    let name = value.component_name();
                    if !value.insert(world, entity) {
                        log::warn!("cannot insert {name} into {entity:?}: entity does not exist");
                    }
                }
                Command::UnsetComponent { entity, remove } => {
                    remove(world, entity);
                }
                Command::SetChanged { entity, set_changed } => {
                    set_changed(world, entity);
                }
                Command::InsertResource(value) => {
                    value.insert(world);
                }
            }
        }
    }
}

/// Records deferred mutations into the running system's queue.
pub struct Commands<'a> {
    queue: &'a mut CommandQueue,
}

impl<'a> Commands<'a> {
    pub(crate) fn new(queue: &'a mut CommandQueue) -> Self {
        Self { queue }
    }

    /// A recorder scoped to one entity.
    pub fn entity(&mut self, entity: Entity) -> EntityCommands<'_> {
        EntityCommands {
            entity,
            queue: self.queue,
        }
    }

    /// Queues a resource insert.
    pub fn insert_resource<R: Resource>(&mut self, value: R) {
        self.queue.push(Command::InsertResource(Box::new(value)));
    }
}

/// Command recorder for a single entity.
pub struct EntityCommands<'a> {
    entity: Entity,
    queue: &'a mut CommandQueue,
}

impl<'a> EntityCommands<'a> {
    #[inline]
    pub fn id(&self) -> Entity {
        self.entity
    }

    /// Queues attaching (or replacing) a component.
    pub fn insert<T: Component>(&mut self, value: T) -> &mut Self {
        self.queue.push(Command::SetComponent {
            entity: self.entity,
            value: Box::new(value),
        });
        self
    }

    /// Queues detaching a component.
    pub fn remove<T: Component>(&mut self) -> &mut Self {
        self.queue.push(Command::UnsetComponent {
            entity: self.entity,
            remove: |world, entity| {
                world.remove_component::<T>(entity);
            },
        });
        self
    }

    /// Queues stamping a component's changed tick.
    pub fn set_changed<T: Component>(&mut self) -> &mut Self {
        self.queue.push(Command::SetChanged {
            entity: self.entity,
            set_changed: |world, entity| {
                if !world.set_changed::<T>(entity) {
                    log::debug!("cannot mark {entity:?} changed: entity or component missing");
                }
            },
        });
        self
    }

    /// Queues despawning the entity.
    pub fn despawn(&mut self) {
        self.queue.push(Command::DestroyEntity(self.entity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Health(u32);
    impl Component for Health {}

    #[derive(Default, PartialEq, Debug)]
    struct Score(u32);
    impl Resource for Score {}

    #[test]
    fn commands_apply_in_record_order() {
        let mut world = World::new();
        let entity = world.spawn_empty().id();

        let mut queue = CommandQueue::default();
        {
            let mut commands = Commands::new(&mut queue);
            commands.entity(entity).insert(Health(10));
            commands.entity(entity).insert(Health(20));
            commands.insert_resource(Score(7));
        }
        // nothing happened yet
        assert!(world.get::<Health>(entity).is_none());

        queue.apply(&mut world);
        assert_eq!(world.get::<Health>(entity).unwrap().0, 20);
        assert_eq!(world.resource::<Score>(), &Score(7));
        assert!(queue.is_empty());
    }

    #[test]
    fn destroy_then_touch_is_dropped() {
        let mut world = World::new();
        let entity = world.spawn_empty().id();

        let mut queue = CommandQueue::default();
        {
            let mut commands = Commands::new(&mut queue);
            commands.entity(entity).despawn();
            commands.entity(entity).insert(Health(5));
        }
        queue.apply(&mut world);
        assert!(!world.contains_entity(entity));
    }

    #[test]
    fn remove_and_set_changed() {
        let mut world = World::new();
        let entity = {
            let mut b = world.spawn();
            b.insert(Health(3));
            b.id()
        };
        world.increment_change_tick();

        let mut queue = CommandQueue::default();
        {
            let mut commands = Commands::new(&mut queue);
            commands.entity(entity).set_changed::<Health>();
            commands.entity(entity).remove::<Health>();
        }
        queue.apply(&mut world);
        assert!(world.get::<Health>(entity).is_none());
        assert!(world.contains_entity(entity));
    }
}
