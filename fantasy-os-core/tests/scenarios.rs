use fantasy_os_core::{
    AccessLevel, AchievementCatalog, AchievementEvent, AchievementTracker, BusEvent,
    ContentBundle, FantasyWorld, ManualClock, MemoryStore, PassageCatalog, ProgressPayload,
    ProgressStore, QuestCatalog, QuestEngine, QuestEvent, QuestEventKind, RoomCatalog,
    RoomProgressionEngine, RoomStatusProvider, RoomUpgradeEngine, SecretPassageDiscovery,
    StatusContext, UpgradeCatalog,
};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

fn handles() -> (Rc<dyn ProgressStore>, Rc<ManualClock>) {
    (Rc::new(MemoryStore::new()), Rc::new(ManualClock::default()))
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(ToString::to_string).collect()
}

#[derive(Default)]
struct RoomTable(HashMap<String, (AccessLevel, u32)>);

impl RoomTable {
    fn with(mut self, room: &str, level: AccessLevel, points: u32) -> Self {
        self.0.insert(room.to_string(), (level, points));
        self
    }
}

impl RoomStatusProvider for RoomTable {
    fn access_level(&self, room_id: &str) -> AccessLevel {
        self.0.get(room_id).map_or(AccessLevel::Locked, |entry| entry.0)
    }

    fn mastery_points(&self, room_id: &str) -> u32 {
        self.0.get(room_id).map_or(0, |entry| entry.1)
    }
}

#[test]
fn scenario_a_two_step_quest_completes_once() {
    let catalog = QuestCatalog::from_json(
        r#"{"quests": [{
            "id": "q1",
            "title": "First Steps",
            "steps": [{"id": "s1", "title": "One"}, {"id": "s2", "title": "Two"}]
        }]}"#,
    )
    .unwrap();
    let (store, clock) = handles();
    let mut quests = QuestEngine::new(&catalog, store, clock);

    let completions = Rc::new(RefCell::new(0));
    let seen = Rc::clone(&completions);
    quests
        .events_mut()
        .on(QuestEventKind::Completed, move |_| *seen.borrow_mut() += 1);

    assert!(quests.start_quest("q1"));
    assert!(quests.update_progress("q1", "s1"));
    assert!(quests.is_quest_active("q1"));
    assert!((quests.quest_progress("q1").unwrap().progress - 50.0).abs() < f64::EPSILON);

    assert!(quests.update_progress("q1", "s2"));
    assert!(quests.is_quest_completed("q1"));
    assert!(!quests.is_quest_active("q1"));
    assert_eq!(*completions.borrow(), 1);

    assert!(!quests.update_progress("q1", "s2"));
    assert!(!quests.start_quest("q1"));
    assert_eq!(*completions.borrow(), 1);
}

#[test]
fn scenario_b_single_target_achievement_awards_once() {
    let catalog = AchievementCatalog::from_json(
        r#"{"achievements": [{
            "id": "a1",
            "title": "Begin",
            "type": "quest",
            "requirement": "complete-quest",
            "target": 1,
            "reward": "badge-a1"
        }]}"#,
    )
    .unwrap();
    let (store, clock) = handles();
    let mut tracker = AchievementTracker::new(&catalog, store, clock);
    let payload = ProgressPayload::quest_completed();

    assert!(tracker.check_progress("a1", "complete-quest", &payload));
    assert!(tracker.is_achievement_completed("a1"));
    assert!(!tracker.check_progress("a1", "complete-quest", &payload));

    let rewards: Vec<AchievementEvent> = tracker
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, AchievementEvent::RewardGranted { .. }))
        .collect();
    assert_eq!(rewards.len(), 1);
    assert_eq!(tracker.achievement_progress("a1").unwrap().current, 1);
}

#[test]
fn scenario_c_kitchen_waits_for_its_quest() {
    let catalog = RoomCatalog::from_json(
        r#"{"rooms": [
            {"id": "living-room", "accessLevel": 1},
            {"id": "kitchen", "requiredQuests": ["q1"], "requiredRooms": ["living-room"]}
        ]}"#,
    )
    .unwrap();
    let (store, clock) = handles();
    let mut rooms = RoomProgressionEngine::new(&catalog, store, clock);

    let none = BTreeSet::new();
    let before = StatusContext::empty().with_quests(&none);
    assert!(!rooms.can_unlock_room("kitchen", &before));
    assert!(!rooms.unlock_room("kitchen", &before));
    assert!(!rooms.is_room_accessible("kitchen"));

    let done = set(&["q1"]);
    let after = StatusContext::empty().with_quests(&done);
    assert_eq!(rooms.check_auto_unlock(&after), vec!["kitchen".to_string()]);
    assert!(rooms.is_room_accessible("kitchen"));
}

#[test]
fn scenario_d_fireplace_ignite_reveals_passage() {
    let (store, clock) = handles();
    let mut passages = SecretPassageDiscovery::new(PassageCatalog::default_catalog(), store, clock);
    let rooms = RoomTable::default()
        .with("living-room", AccessLevel::Unlocked, 0)
        .with("kitchen", AccessLevel::Unlocked, 0);
    let ctx = StatusContext::empty().with_rooms(&rooms);

    passages.handle_object_interaction("living-room", "fireplace", "poke", &ctx);
    passages.handle_object_interaction("living-room", "bookshelf", "ignite", &ctx);
    assert!(!passages.state("living-room-to-kitchen").unwrap().unlocked);

    passages.handle_object_interaction("living-room", "fireplace", "ignite", &ctx);
    let state = passages.state("living-room-to-kitchen").unwrap();
    assert!(state.unlocked);
    assert!(state.discovered_at.is_some());
}

#[test]
fn scenario_e_upgrade_gates_then_two_phases() {
    let (store, _) = handles();
    let mut upgrades = RoomUpgradeEngine::new(UpgradeCatalog::default_catalog(), store);
    let quests = set(&["credentials-recovery"]);

    let low = RoomTable::default().with("living-room", AccessLevel::Mastered, 20);
    let ctx = StatusContext::empty().with_quests(&quests).with_rooms(&low);
    assert!(upgrades.has_artifact("fire-crystal", &ctx));
    assert!(!upgrades.can_unlock_upgrade("living-room", "magical-fireplace", &ctx));

    let raised = RoomTable::default().with("living-room", AccessLevel::Mastered, 30);
    let ctx = StatusContext::empty().with_quests(&quests).with_rooms(&raised);
    assert!(upgrades.can_unlock_upgrade("living-room", "magical-fireplace", &ctx));

    assert!(!upgrades.apply_upgrade("living-room", "magical-fireplace"));
    assert!(!upgrades.state("living-room", "magical-fireplace").applied);

    assert!(upgrades.unlock_upgrade("living-room", "magical-fireplace", &ctx));
    assert!(upgrades.apply_upgrade("living-room", "magical-fireplace"));
    let state = upgrades.state("living-room", "magical-fireplace");
    assert!(state.unlocked && state.applied);
    assert!(upgrades.customizations("living-room").is_some());
}

#[test]
fn world_completes_the_main_questline() {
    let store = MemoryStore::new();
    let clock = ManualClock::default();
    let mut world = FantasyWorld::new(
        &ContentBundle::load_from_static(),
        Rc::new(store.clone()),
        Rc::new(clock.clone()),
    );

    for quest_id in [
        "credentials-recovery",
        "ancient-artifacts",
        "magic-system-restoration",
        "portal-network-activation",
    ] {
        complete(&mut world, quest_id);
    }
    for room in ["living-room", "kitchen", "bedroom", "workshop", "library"] {
        assert!(world.enter_room(room), "enter {room}");
    }
    assert!(world.achievements().is_achievement_completed("room-explorer"));

    // The garden also needs the final quest.
    assert!(!world.is_room_accessible("garden"));
    complete(&mut world, "fantasy-os-mastery");
    assert!(world.is_room_accessible("garden"));
    assert!(world.enter_room("garden"));

    let stats = world.progression_stats();
    assert_eq!(stats.unlocked_rooms, 6);
    assert_eq!(stats.explored_rooms, 6);
    assert!(world.spells().contains("fireball"));

    let started: usize = world
        .journal()
        .iter()
        .filter(|e| matches!(e, fantasy_os_core::WorldEvent::Quest(q) if q.kind() == QuestEventKind::Started))
        .count();
    assert_eq!(started, 5);
}

#[test]
fn world_unlocks_rooms_gated_only_on_other_rooms() {
    let content = ContentBundle {
        quests: QuestCatalog::from_json(
            r#"{"quests": [
                {"id": "q1", "title": "Hall Key", "steps": [{"id": "s1", "title": "Find it"}]},
                {"id": "q2", "title": "Cellar Key", "steps": [{"id": "s1", "title": "Find it"}]}
            ]}"#,
        )
        .unwrap(),
        rooms: RoomCatalog::from_json(
            r#"{"rooms": [
                {"id": "living-room", "accessLevel": 1},
                {"id": "hall", "requiredQuests": ["q1"], "requiredRooms": ["living-room"]},
                {"id": "attic", "requiredRooms": ["hall"]},
                {"id": "study", "requiredQuests": ["q1"], "requiredRooms": ["cellar"]},
                {"id": "cellar", "requiredQuests": ["q2"]}
            ]}"#,
        )
        .unwrap(),
        ..ContentBundle::default()
    };
    let (store, clock) = handles();
    let mut world = FantasyWorld::new(&content, store, clock);
    assert!(!world.is_room_accessible("attic"));

    complete(&mut world, "q1");
    assert!(world.is_room_accessible("hall"));
    assert!(world.is_room_accessible("attic"), "attic follows the hall");
    assert!(!world.is_room_accessible("study"), "study still waits on the cellar");

    complete(&mut world, "q2");
    assert!(world.is_room_accessible("cellar"));
    assert!(world.is_room_accessible("study"));
    assert_eq!(world.progression_stats().unlocked_rooms, 5);
}

fn complete(world: &mut FantasyWorld, quest_id: &str) {
    assert!(world.start_quest(quest_id), "start {quest_id}");
    let steps: Vec<String> = world
        .quests()
        .quest_info(quest_id)
        .unwrap()
        .steps
        .iter()
        .map(|step| step.id.clone())
        .collect();
    for step in &steps {
        assert!(world.update_quest_progress(quest_id, step));
    }
    assert!(world.quests().is_quest_completed(quest_id), "{quest_id} not completed");
    let completed = world
        .journal()
        .iter()
        .filter(|e| {
            matches!(e, fantasy_os_core::WorldEvent::Quest(QuestEvent::Completed { quest_id: id, .. }) if id == quest_id)
        })
        .count();
    assert_eq!(completed, 1);
}
