use verse_ecs::prelude::*;
use verse_ecs::schedule::ScheduleBuildError;

#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
struct TestLabel;

#[derive(Resource, Default, Debug, PartialEq)]
struct Value(i32);

#[derive(Component)]
struct Marker;

#[test]
fn ordering_edge_resolves_write_write_conflict() {
    fn write_one(mut value: ResMut<Value>) {
        value.0 = 1;
    }
    fn write_two(mut value: ResMut<Value>) {
        value.0 = 2;
    }

    let mut world = World::new();
    world.init_resource::<Value>();
    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems((write_two.after(write_one), write_one));
    schedule.run(&mut world);
    // the edge makes the build succeed and the later write win
    assert_eq!(world.resource::<Value>(), &Value(2));
}

#[test]
fn unordered_conflicting_systems_fail_the_build() {
    fn write_a(mut value: ResMut<Value>) {
        value.0 += 1;
    }
    fn write_b(mut value: ResMut<Value>) {
        value.0 += 1;
    }

    let mut world = World::new();
    world.init_resource::<Value>();
    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems((write_a, write_b));
    let error = schedule.initialize(&mut world).unwrap_err();
    assert!(matches!(error, ScheduleBuildError::Ambiguity(_)));
}

#[test]
fn ambiguous_with_suppresses_the_conflict() {
    fn write_a(mut value: ResMut<Value>) {
        value.0 += 1;
    }
    fn write_b(mut value: ResMut<Value>) {
        value.0 += 1;
    }

    let mut world = World::new();
    world.init_resource::<Value>();
    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems((write_a.ambiguous_with(write_b), write_b));
    schedule.initialize(&mut world).unwrap();
    schedule.run(&mut world);
    assert_eq!(world.resource::<Value>(), &Value(2));
}

#[test]
fn globally_ignored_ids_suppress_the_conflict() {
    fn write_a(mut value: ResMut<Value>) {
        value.0 += 1;
    }
    fn write_b(mut value: ResMut<Value>) {
        value.0 += 1;
    }

    let mut world = World::new();
    world.init_resource::<Value>();
    world.init_resource::<Schedules>();
    let id = world.register_resource::<Value>();
    world
        .resource_mut::<Schedules>()
        .ignored_scheduling_ambiguities
        .insert(id);

    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems((write_a, write_b));
    schedule.initialize(&mut world).unwrap();
}

#[test]
fn dependency_cycle_is_a_build_error() {
    fn first() {}
    fn second() {}

    let mut world = World::new();
    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems((first.before(second), second.before(first)));
    let error = schedule.initialize(&mut world).unwrap_err();
    assert!(matches!(error, ScheduleBuildError::DependencyCycle(_)));
}

#[test]
fn hierarchy_cycle_is_a_build_error() {
    #[derive(SystemSet, Clone, Debug, PartialEq, Eq, Hash)]
    struct Outer;
    #[derive(SystemSet, Clone, Debug, PartialEq, Eq, Hash)]
    struct Inner;

    let mut world = World::new();
    let mut schedule = Schedule::new(TestLabel);
    schedule.configure_sets(Outer.in_set(Inner));
    schedule.configure_sets(Inner.in_set(Outer));
    let error = schedule.initialize(&mut world).unwrap_err();
    assert!(matches!(error, ScheduleBuildError::HierarchyCycle(_)));
}

#[test]
fn set_and_member_cross_dependency_is_a_build_error() {
    #[derive(SystemSet, Clone, Debug, PartialEq, Eq, Hash)]
    struct Group;

    fn member(mut value: ResMut<Value>) {
        value.0 += 1;
    }

    let mut world = World::new();
    world.init_resource::<Value>();
    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems(member.in_set(Group).before(Group));
    let error = schedule.initialize(&mut world).unwrap_err();
    assert!(matches!(error, ScheduleBuildError::CrossDependency(_, _)));
}

#[test]
fn deferred_despawn_applies_at_schedule_end() {
    #[derive(Resource, Default)]
    struct Target(Option<Entity>);
    #[derive(Resource, Default)]
    struct ObservedAlive(bool);

    fn record_despawn(mut commands: Commands, target: Res<Target>) {
        commands.entity(target.0.unwrap()).despawn();
    }

    fn check_still_alive(world: &mut World) {
        let entity = world.resource::<Target>().0.unwrap();
        let alive = world.contains_entity(entity);
        world.resource_mut::<ObservedAlive>().0 = alive;
    }

    let mut world = World::new();
    let entity = {
        let mut b = world.spawn();
        b.insert(Marker);
        b.id()
    };
    world.insert_resource(Target(Some(entity)));
    world.init_resource::<ObservedAlive>();

    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems((record_despawn, check_still_alive.after(record_despawn)));
    schedule.run(&mut world);

    // the system after the recorder still observed the entity; the final
    // flush then applied the despawn
    assert!(world.resource::<ObservedAlive>().0);
    assert!(!world.contains_entity(entity));
}

#[test]
fn apply_deferred_marker_flushes_mid_schedule() {
    #[derive(Resource, Default, PartialEq, Debug)]
    struct Inserted(bool);
    #[derive(Resource, Default)]
    struct Observed(bool);

    fn record(mut commands: Commands) {
        commands.insert_resource(Inserted(true));
    }

    fn observe(inserted: Option<Res<Inserted>>, mut observed: ResMut<Observed>) {
        observed.0 = inserted.is_some();
    }

    let mut world = World::new();
    world.init_resource::<Observed>();
    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems((record, ApplyDeferred, observe).chain());
    schedule.run(&mut world);
    assert!(world.resource::<Observed>().0);
}

#[test]
fn run_if_skips_a_system() {
    fn bump(mut value: ResMut<Value>) {
        value.0 += 1;
    }

    let mut world = World::new();
    world.init_resource::<Value>();
    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems(bump.run_if(|| false));
    schedule.run(&mut world);
    assert_eq!(world.resource::<Value>(), &Value(0));
}

#[test]
fn distributive_run_if_gates_each_system() {
    fn bump_a(mut value: ResMut<Value>) {
        value.0 += 1;
    }
    fn bump_b(mut value: ResMut<Value>) {
        value.0 += 10;
    }

    let mut world = World::new();
    world.init_resource::<Value>();
    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems((bump_a, bump_b).chain().distributive_run_if(|| false));
    schedule.run(&mut world);
    assert_eq!(world.resource::<Value>(), &Value(0));
}

#[test]
fn false_set_condition_skips_all_members() {
    #[derive(SystemSet, Clone, Debug, PartialEq, Eq, Hash)]
    struct Gated;

    fn bump_a(mut value: ResMut<Value>) {
        value.0 += 1;
    }
    fn bump_b(mut value: ResMut<Value>) {
        value.0 += 10;
    }
    fn bump_free(mut value: ResMut<Value>) {
        value.0 += 100;
    }

    let mut world = World::new();
    world.init_resource::<Value>();
    let mut schedule = Schedule::new(TestLabel);
    schedule.configure_sets(Gated.run_if(|| false));
    schedule.add_systems(
        (
            bump_a.in_set(Gated),
            bump_b.in_set(Gated).after(bump_a),
            bump_free.after(bump_b),
        ),
    );
    schedule.run(&mut world);
    // the gated systems were skipped wholesale; the downstream system still ran
    assert_eq!(world.resource::<Value>(), &Value(100));
}

#[test]
fn set_conditions_are_evaluated_once_per_tick() {
    #[derive(SystemSet, Clone, Debug, PartialEq, Eq, Hash)]
    struct Counted;

    let (sender, receiver) = crossbeam_channel::unbounded::<()>();

    fn member_a() {}
    fn member_b() {}

    let mut world = World::new();
    let mut schedule = Schedule::new(TestLabel);
    let condition_sender = sender.clone();
    schedule.configure_sets(Counted.run_if(move || {
        condition_sender.send(()).unwrap();
        true
    }));
    schedule.add_systems((member_a.in_set(Counted), member_b.in_set(Counted)));
    schedule.run(&mut world);
    assert_eq!(receiver.try_iter().count(), 1);
}

#[test]
fn chained_systems_run_in_order() {
    let (sender, receiver) = crossbeam_channel::unbounded::<u32>();

    let mut world = World::new();
    let mut schedule = Schedule::new(TestLabel);
    let (s1, s2, s3) = (sender.clone(), sender.clone(), sender);
    schedule.add_systems(
        (
            move || {
                s1.send(1).unwrap();
            },
            move || {
                s2.send(2).unwrap();
            },
            move || {
                s3.send(3).unwrap();
            },
        )
            .chain(),
    );
    schedule.run(&mut world);
    let order: Vec<u32> = receiver.try_iter().collect();
    assert_eq!(order, vec![1, 2, 3]);
}

#[test]
fn parallel_executor_honors_ordering() {
    let (sender, receiver) = crossbeam_channel::unbounded::<u32>();

    let mut world = World::new();
    let mut schedule = Schedule::new(TestLabel);
    schedule.set_executor_kind(ExecutorKind::MultiThreaded);
    let (s1, s2, s3, s4) = (sender.clone(), sender.clone(), sender.clone(), sender);
    schedule.add_systems((
        (
            move || {
                s1.send(1).unwrap();
            },
            move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                s2.send(2).unwrap();
            },
        )
            .chain(),
        (
            move || {
                s3.send(3).unwrap();
            },
            move || {
                s4.send(4).unwrap();
            },
        )
            .chain(),
    ));
    for _ in 0..3 {
        schedule.run(&mut world);
        let order: Vec<u32> = receiver.try_iter().collect();
        assert_eq!(order.len(), 4);
        let position = |value: u32| order.iter().position(|&v| v == value).unwrap();
        assert!(position(1) < position(2));
        assert!(position(3) < position(4));
    }
}

#[test]
fn parallel_executor_runs_exclusive_systems_alone() {
    #[derive(Resource, Default, PartialEq, Debug)]
    struct Log(Vec<&'static str>);

    fn par_a(mut value: ResMut<Value>) {
        value.0 += 1;
    }

    fn excl(world: &mut World) {
        let value = world.resource::<Value>().0;
        world.resource_mut::<Log>().0.push(if value > 0 { "after" } else { "before" });
    }

    let mut world = World::new();
    world.init_resource::<Value>();
    world.init_resource::<Log>();
    let mut schedule = Schedule::new(TestLabel);
    schedule.set_executor_kind(ExecutorKind::MultiThreaded);
    schedule.add_systems((par_a, excl.after(par_a)));
    schedule.run(&mut world);
    assert_eq!(world.resource::<Log>(), &Log(vec!["after"]));
}

#[test]
fn panicking_system_does_not_abort_the_tick() {
    fn explode() {
        panic!("boom");
    }
    fn bump(mut value: ResMut<Value>) {
        value.0 += 1;
    }

    let mut world = World::new();
    world.init_resource::<Value>();
    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems((explode, bump.after(explode)));
    schedule.run(&mut world);
    // the sibling still ran
    assert_eq!(world.resource::<Value>(), &Value(1));
}

#[test]
fn empty_schedule_run_is_a_noop() {
    let mut world = World::new();
    let mut schedule = Schedule::new(TestLabel);
    schedule.run(&mut world);
    schedule.run(&mut world);
    assert_eq!(world.entities().len(), 0);
}

#[test]
fn run_schedule_by_label_and_reinsertion() {
    #[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
    struct Inner;

    fn bump(mut value: ResMut<Value>) {
        value.0 += 1;
    }

    let mut world = World::new();
    world.init_resource::<Value>();
    let mut inner = Schedule::new(Inner);
    inner.add_systems(bump);
    world.add_schedule(inner);

    world.run_schedule(Inner);
    world.run_schedule(Inner);
    assert_eq!(world.resource::<Value>(), &Value(2));
    // the schedule went back into the container after each run
    assert!(world.resource::<Schedules>().contains(Inner));
}

#[test]
fn running_a_missing_schedule_errors() {
    #[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
    struct Missing;

    let mut world = World::new();
    world.init_resource::<Schedules>();
    assert!(world.try_run_schedule(Missing).is_err());
}

#[test]
fn events_flow_between_systems() {
    #[derive(Event, Debug, Clone, PartialEq)]
    struct Damage(u32);

    #[derive(Resource, Default)]
    struct Total(u32);

    fn produce(mut writer: EventWriter<Damage>) {
        writer.send(Damage(3));
        writer.send(Damage(4));
    }

    fn consume(mut reader: EventReader<Damage>, mut total: ResMut<Total>) {
        for damage in reader.read() {
            total.0 += damage.0;
        }
    }

    let mut world = World::new();
    world.init_resource::<Total>();
    world.init_resource::<Events<Damage>>();
    let mut schedule = Schedule::new(TestLabel);
    schedule.add_systems(
        (
            verse_ecs::event::event_update_system::<Damage>,
            produce.run_if(run_once()),
            consume,
        )
            .chain(),
    );
    schedule.run(&mut world);
    assert_eq!(world.resource::<Total>().0, 7);
    schedule.run(&mut world);
    assert_eq!(world.resource::<Total>().0, 7, "each event is delivered once");
}
