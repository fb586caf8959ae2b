use verse_ecs::prelude::*;

#[derive(Component, Debug, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Component)]
struct Velocity(f32);

#[derive(Component)]
struct Frozen;

#[derive(Resource, Default)]
struct Seen(Vec<Entity>);

#[test]
fn single_component_insert_and_query() {
    let mut world = World::new();
    let entity = {
        let mut builder = world.spawn();
        builder.insert(Position { x: 1.0, y: 2.0 });
        builder.id()
    };

    let query = world.query::<(Entity, &Position)>();
    let results: Vec<(Entity, &Position)> = query.iter(&world).collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, entity);
    assert_eq!(results[0].1, &Position { x: 1.0, y: 2.0 });
}

#[test]
fn with_without_and_optional() {
    let mut world = World::new();
    let plain = {
        let mut b = world.spawn();
        b.insert(Velocity(1.0));
        b.id()
    };
    let frozen = {
        let mut b = world.spawn();
        b.insert(Velocity(2.0)).insert(Frozen);
        b.id()
    };
    let with_position = {
        let mut b = world.spawn();
        b.insert(Velocity(3.0)).insert(Position { x: 0.0, y: 0.0 });
        b.id()
    };

    let moving = world.query_filtered::<Entity, (With<Velocity>, Without<Frozen>)>();
    let mut found: Vec<Entity> = moving.iter(&world).collect();
    found.sort();
    let mut expected = vec![plain, with_position];
    expected.sort();
    assert_eq!(found, expected);

    let optional = world.query::<(&Velocity, Option<&Position>)>();
    let with_some = optional
        .iter(&world)
        .filter(|(_, position)| position.is_some())
        .count();
    assert_eq!(with_some, 1);
    assert_eq!(optional.iter(&world).count(), 3);
    let _ = frozen;
}

#[test]
fn mutation_through_query_updates_values() {
    let mut world = World::new();
    for index in 0..8 {
        let mut b = world.spawn();
        b.insert(Velocity(index as f32));
    }
    let mut query = world.query::<&mut Velocity>();
    for mut velocity in query.iter_mut(&mut world) {
        velocity.0 *= 2.0;
    }
    let reader = world.query::<&Velocity>();
    let total: f32 = reader.iter(&world).map(|v| v.0).sum();
    assert_eq!(total, (0..8).map(|i| (i * 2) as f32).sum());
}

#[test]
fn change_detection_window() {
    #[derive(Resource, Default)]
    struct ChangedCount(usize);

    fn observe(query: Query<&Velocity, Changed<Velocity>>, mut count: ResMut<ChangedCount>) {
        count.0 = query.iter().count();
    }

    #[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
    struct TestLabel;

    let mut world = World::new();
    world.init_resource::<ChangedCount>();
    let entity = {
        let mut b = world.spawn();
        b.insert(Velocity(0.0));
        b.id()
    };

    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems(observe);

    // first run: the insert is newer than the system's initial window
    schedule.run(&mut world);
    assert_eq!(world.resource::<ChangedCount>().0, 1);

    // second run: nothing written since the system's last run
    schedule.run(&mut world);
    assert_eq!(world.resource::<ChangedCount>().0, 0);

    // a write between runs is observed exactly once
    world.get_mut::<Velocity>(entity).unwrap().0 = 9.0;
    schedule.run(&mut world);
    assert_eq!(world.resource::<ChangedCount>().0, 1);
    schedule.run(&mut world);
    assert_eq!(world.resource::<ChangedCount>().0, 0);
}

#[test]
fn added_is_narrower_than_changed() {
    #[derive(Resource, Default)]
    struct Counts {
        added: usize,
        changed: usize,
    }

    fn observe(
        added: Query<Entity, Added<Velocity>>,
        changed: Query<Entity, Changed<Velocity>>,
        mut counts: ResMut<Counts>,
    ) {
        counts.added = added.iter().count();
        counts.changed = changed.iter().count();
    }

    #[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
    struct TestLabel;

    let mut world = World::new();
    world.init_resource::<Counts>();
    let entity = {
        let mut b = world.spawn();
        b.insert(Velocity(0.0));
        b.id()
    };

    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems(observe);

    schedule.run(&mut world);
    assert_eq!(world.resource::<Counts>().added, 1);
    assert_eq!(world.resource::<Counts>().changed, 1);

    // a plain write is a change but not an add
    world.get_mut::<Velocity>(entity).unwrap().0 = 1.0;
    schedule.run(&mut world);
    assert_eq!(world.resource::<Counts>().added, 0);
    assert_eq!(world.resource::<Counts>().changed, 1);
}

#[test]
fn mark_changed_stamps_every_visited_row() {
    #[derive(Resource, Default)]
    struct ChangedCount(usize);

    fn touch_all(_query: Query<Entity, MarkChanged<Velocity>>) {}

    fn observe(query: Query<&Velocity, Changed<Velocity>>, mut count: ResMut<ChangedCount>) {
        count.0 = query.iter().count();
    }

    #[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
    struct Quiet;
    #[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
    struct Marking;

    let mut world = World::new();
    world.init_resource::<ChangedCount>();
    for _ in 0..3 {
        let mut b = world.spawn();
        b.insert(Velocity(0.0));
    }

    // control: with no marking pass, the second run observes nothing
    let mut quiet = Schedule::new(Quiet);
    quiet.add_systems(observe);
    quiet.run(&mut world);
    quiet.run(&mut world);
    assert_eq!(world.resource::<ChangedCount>().0, 0);

    // the marking pass re-stamps every row each tick, so the observer keeps
    // seeing all rows. MarkChanged writes ticks, hence the explicit order.
    let mut marking = Schedule::new(Marking);
    marking.add_systems((touch_all, observe).chain());
    marking.run(&mut world);
    marking.run(&mut world);
    assert_eq!(world.resource::<ChangedCount>().0, 3);
}

#[test]
fn single_and_get() {
    fn expects_single(mut query: Query<(Entity, &Position)>, mut seen: ResMut<Seen>) {
        let (entity, _) = query.single().unwrap();
        seen.0.push(entity);
        assert!(query.get(entity).is_ok());
    }

    #[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
    struct TestLabel;

    let mut world = World::new();
    world.init_resource::<Seen>();
    let entity = {
        let mut b = world.spawn();
        b.insert(Position { x: 0.0, y: 0.0 });
        b.id()
    };
    // another entity that does not match
    world.spawn().insert(Velocity(0.0));

    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems(expects_single);
    schedule.run(&mut world);
    assert_eq!(world.resource::<Seen>().0, vec![entity]);
}

#[test]
fn get_on_missing_entity_fails() {
    let mut world = World::new();
    let entity = world.spawn().id();
    world.despawn(entity);
    let mut query = world.query::<Entity>();
    assert!(query.get_mut(&mut world, entity).is_err());
}

#[test]
fn duplicate_queries_share_a_cache_entry() {
    let mut world = World::new();
    world.spawn().insert(Velocity(0.0));
    // spelled differently, same canonical terms
    let _a = world.query_filtered::<&Velocity, ()>();
    let _b = world.query_filtered::<&Velocity, ()>();
    assert_eq!(world.query_caches().len(), 1);
    let _c = world.query_filtered::<&Velocity, With<Frozen>>();
    assert_eq!(world.query_caches().len(), 2);
}

#[test]
fn matches_track_new_archetypes() {
    let mut world = World::new();
    let query = world.query::<&Velocity>();
    assert_eq!(query.iter(&world).count(), 0);
    world.spawn().insert(Velocity(1.0));
    assert_eq!(query.iter(&world).count(), 1);
    // a second archetype with the component appears later
    let mut b = world.spawn();
    b.insert(Velocity(2.0)).insert(Frozen);
    assert_eq!(query.iter(&world).count(), 2);
}
