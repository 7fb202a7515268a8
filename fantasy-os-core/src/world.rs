//! The composition root that wires the five progression engines together.
//!
//! Engines never call each other. Every inbound call on [`FantasyWorld`] runs
//! one engine operation and then drains the engine event buses, routing each
//! event to the engines that react to it until nothing new is emitted.
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hasher;
use std::rc::Rc;
use twox_hash::XxHash64;

use crate::achievements::{AchievementCount, AchievementEvent, AchievementTracker, ProgressPayload};
use crate::clock::Clock;
use crate::content::ContentBundle;
use crate::context::StatusContext;
use crate::events::BusEvent;
use crate::passages::{PassageEvent, PassageStats, SecretPassageDiscovery};
use crate::quests::{QuestEngine, QuestEvent, Reward};
use crate::rooms::{
    ProgressionStats, RoomEvent, RoomProgressionEngine, RoomStatus, UnlockAttempt, UnlockKind,
};
use crate::store::{ACHIEVEMENT_STATE_KEY, ProgressStore, QUEST_STATE_KEY, ROOM_PROGRESSION_KEY};
use crate::upgrades::{RoomUpgradeEngine, UpgradeEvent, UpgradeStats};

/// Upper bound on drain rounds per inbound call.
pub const MAX_SETTLE_ROUNDS: usize = 64;
pub const STARTING_MAGIC_LEVEL: u32 = 1;
const FALLBACK_START_ROOM: &str = "living-room";

pub const ACTION_COMPLETE_QUEST: &str = "complete-quest";
pub const ACTION_VISIT_ROOMS: &str = "visit-rooms";
pub const ACTION_MASTER_MAGIC: &str = "master-magic";

/// Full view for engines that only read other engines.
macro_rules! status {
    ($world:expr) => {
        StatusContext::empty()
            .with_quests(&$world.quests)
            .with_achievements(&$world.achievements)
            .with_rooms(&$world.rooms)
    };
}

/// View handed to the room engine itself, which answers room questions on its own.
macro_rules! gate_status {
    ($world:expr) => {
        StatusContext::empty()
            .with_quests(&$world.quests)
            .with_achievements(&$world.achievements)
    };
}

/// Every event any engine emitted, in the order the world processed it.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    Quest(QuestEvent),
    Achievement(AchievementEvent),
    Room(RoomEvent),
    Passage(PassageEvent),
    Upgrade(UpgradeEvent),
}

impl WorldEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Quest(e) => e.kind().as_str(),
            Self::Achievement(e) => e.kind().as_str(),
            Self::Room(e) => e.kind().as_str(),
            Self::Passage(e) => e.kind().as_str(),
            Self::Upgrade(e) => e.kind().as_str(),
        }
    }
}

pub struct FantasyWorld {
    quests: QuestEngine,
    achievements: AchievementTracker,
    rooms: RoomProgressionEngine,
    passages: SecretPassageDiscovery,
    upgrades: RoomUpgradeEngine,
    store: Rc<dyn ProgressStore>,
    start_room: String,
    current_room: String,
    magic_level: u32,
    spells: BTreeSet<String>,
    gestures: BTreeSet<String>,
    features: BTreeSet<String>,
    badges: BTreeSet<String>,
    journal: Vec<WorldEvent>,
}

impl FantasyWorld {
    #[must_use]
    pub fn new(content: &ContentBundle, store: Rc<dyn ProgressStore>, clock: Rc<dyn Clock>) -> Self {
        let start_room = content
            .rooms
            .starting_room()
            .map_or_else(|| FALLBACK_START_ROOM.to_string(), |room| room.id.clone());
        Self {
            quests: QuestEngine::new(&content.quests, Rc::clone(&store), Rc::clone(&clock)),
            achievements: AchievementTracker::new(
                &content.achievements,
                Rc::clone(&store),
                Rc::clone(&clock),
            ),
            rooms: RoomProgressionEngine::new(&content.rooms, Rc::clone(&store), Rc::clone(&clock)),
            passages: SecretPassageDiscovery::new(&content.passages, Rc::clone(&store), clock),
            upgrades: RoomUpgradeEngine::new(&content.upgrades, Rc::clone(&store)),
            store,
            current_room: start_room.clone(),
            start_room,
            magic_level: STARTING_MAGIC_LEVEL,
            spells: BTreeSet::new(),
            gestures: BTreeSet::new(),
            features: BTreeSet::new(),
            badges: BTreeSet::new(),
            journal: Vec::new(),
        }
    }

    /// Restore every engine from the store. Returns `true` if any save was found.
    pub fn load(&mut self) -> bool {
        let loaded = [
            self.quests.load(),
            self.achievements.load(),
            self.rooms.load(),
            self.passages.load(),
            self.upgrades.load(),
        ];
        let any = loaded.iter().any(|&l| l);
        if any {
            info!("progress restored ({} quests completed)", self.quests.completed_quests().len());
        }
        any
    }

    pub fn start_quest(&mut self, quest_id: &str) -> bool {
        let started = self.quests.start_quest(quest_id);
        self.settle();
        started
    }

    pub fn update_quest_progress(&mut self, quest_id: &str, step_id: &str) -> bool {
        let updated = self.quests.update_progress(quest_id, step_id);
        self.settle();
        updated
    }

    /// Complete every open active-quest step that listens for `tag`.
    /// Returns the `(quest, step)` pairs that advanced.
    pub fn trigger(&mut self, tag: &str) -> Vec<(String, String)> {
        let steps = self.quests.steps_triggered_by(tag);
        if steps.is_empty() {
            debug!("no active step listens for {tag}");
        }
        let advanced = steps
            .into_iter()
            .filter(|(quest, step)| self.quests.update_progress(quest, step))
            .collect();
        self.settle();
        advanced
    }

    pub fn check_achievement_progress(
        &mut self,
        achievement_id: &str,
        action: &str,
        payload: &ProgressPayload,
    ) -> bool {
        let moved = self
            .achievements
            .check_progress(achievement_id, action, payload);
        self.settle();
        moved
    }

    /// Report `action` to every achievement that requires it.
    pub fn record_action(&mut self, action: &str, payload: &ProgressPayload) -> Vec<String> {
        let moved = self.achievements.record_action(action, payload);
        self.settle();
        moved
    }

    #[must_use]
    pub fn is_room_accessible(&self, room_id: &str) -> bool {
        self.rooms.is_room_accessible(room_id)
    }

    pub fn unlock_room(&mut self, room_id: &str) -> bool {
        let unlocked = self.rooms.unlock_room(room_id, &gate_status!(self));
        self.settle();
        unlocked
    }

    /// Like [`Self::unlock_room`], reporting what blocked the unlock.
    pub fn attempt_unlock(&mut self, room_id: &str) -> UnlockAttempt {
        let attempt = self
            .rooms
            .attempt_unlock(room_id, UnlockKind::Default, &gate_status!(self));
        self.settle();
        attempt
    }

    pub fn explore_room(&mut self, room_id: &str) -> bool {
        let explored = self.rooms.explore_room(room_id);
        self.settle();
        explored
    }

    /// Walk into `room_id`, making it the current room.
    pub fn enter_room(&mut self, room_id: &str) -> bool {
        if !self.rooms.explore_room(room_id) {
            return false;
        }
        self.current_room = room_id.to_string();
        self.settle();
        true
    }

    pub fn master_room(&mut self, room_id: &str) -> bool {
        let mastered = self.rooms.master_room(room_id);
        self.settle();
        mastered
    }

    pub fn discover_passage(&mut self, passage_id: &str) -> bool {
        let discovered = self.passages.discover_passage(passage_id, &status!(self));
        self.settle();
        discovered
    }

    /// Travel through a discovered passage from whichever end is current.
    pub fn use_passage(&mut self, passage_id: &str) -> bool {
        let used = self.passages.use_passage(passage_id);
        self.settle();
        used
    }

    /// Interact with an object in the current room.
    pub fn object_interaction(&mut self, object: &str, action: &str) -> Vec<String> {
        let room = self.current_room.clone();
        let found = self
            .passages
            .handle_object_interaction(&room, object, action, &status!(self));
        self.settle();
        found
    }

    /// Cast a spell in the current room.
    pub fn cast_spell(&mut self, spell: &str) -> Vec<String> {
        let room = self.current_room.clone();
        let found = self.passages.handle_spell_cast(&room, spell, &status!(self));
        self.settle();
        found
    }

    #[must_use]
    pub fn can_unlock_upgrade(&self, room_id: &str, upgrade_id: &str) -> bool {
        self.upgrades
            .can_unlock_upgrade(room_id, upgrade_id, &status!(self))
    }

    pub fn unlock_upgrade(&mut self, room_id: &str, upgrade_id: &str) -> bool {
        let unlocked = self
            .upgrades
            .unlock_upgrade(room_id, upgrade_id, &status!(self));
        self.settle();
        unlocked
    }

    pub fn apply_upgrade(&mut self, room_id: &str, upgrade_id: &str) -> bool {
        let applied = self.upgrades.apply_upgrade(room_id, upgrade_id);
        self.settle();
        applied
    }

    #[must_use]
    pub fn has_artifact(&self, artifact_id: &str) -> bool {
        self.upgrades.has_artifact(artifact_id, &status!(self))
    }

    #[must_use]
    pub fn status(&self) -> StatusContext<'_> {
        status!(self)
    }

    #[must_use]
    pub fn room_status(&self, room_id: &str) -> Option<RoomStatus> {
        self.rooms.room_status(room_id, &gate_status!(self))
    }

    #[must_use]
    pub fn all_room_status(&self) -> Vec<RoomStatus> {
        self.rooms.all_room_status(&gate_status!(self))
    }

    #[must_use]
    pub fn progression_stats(&self) -> ProgressionStats {
        self.rooms.progression_stats()
    }

    #[must_use]
    pub fn achievement_count(&self) -> AchievementCount {
        self.achievements.achievement_count()
    }

    #[must_use]
    pub fn passage_stats(&self) -> PassageStats {
        self.passages.passage_stats()
    }

    #[must_use]
    pub fn upgrade_stats(&self) -> UpgradeStats {
        self.upgrades.upgrade_stats(&status!(self))
    }

    #[must_use]
    pub const fn quests(&self) -> &QuestEngine {
        &self.quests
    }

    #[must_use]
    pub const fn achievements(&self) -> &AchievementTracker {
        &self.achievements
    }

    #[must_use]
    pub const fn rooms(&self) -> &RoomProgressionEngine {
        &self.rooms
    }

    #[must_use]
    pub const fn passages(&self) -> &SecretPassageDiscovery {
        &self.passages
    }

    #[must_use]
    pub const fn upgrades(&self) -> &RoomUpgradeEngine {
        &self.upgrades
    }

    #[must_use]
    pub const fn magic_level(&self) -> u32 {
        self.magic_level
    }

    #[must_use]
    pub fn current_room(&self) -> &str {
        &self.current_room
    }

    #[must_use]
    pub const fn spells(&self) -> &BTreeSet<String> {
        &self.spells
    }

    #[must_use]
    pub const fn gestures(&self) -> &BTreeSet<String> {
        &self.gestures
    }

    /// Step unlock tags granted so far, e.g. `kitchen-portal`.
    #[must_use]
    pub const fn features(&self) -> &BTreeSet<String> {
        &self.features
    }

    #[must_use]
    pub const fn badges(&self) -> &BTreeSet<String> {
        &self.badges
    }

    #[must_use]
    pub fn journal(&self) -> &[WorldEvent] {
        &self.journal
    }

    pub fn take_journal(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.journal)
    }

    /// Fingerprint of the persisted progress documents.
    #[must_use]
    pub fn progress_digest(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        for key in [QUEST_STATE_KEY, ACHIEVEMENT_STATE_KEY, ROOM_PROGRESSION_KEY] {
            hasher.write(key.as_bytes());
            match self.store.load(key) {
                Ok(Some(json)) => hasher.write(json.as_bytes()),
                Ok(None) => hasher.write_u8(0),
                Err(err) => {
                    warn!("digest could not read {key}: {err}");
                    hasher.write_u8(1);
                }
            }
        }
        hasher.finish()
    }

    /// Start over: every engine back to fresh state, session state cleared.
    pub fn reset_all(&mut self) {
        self.quests.reset();
        self.achievements.reset();
        self.rooms.reset();
        self.passages.reset();
        self.upgrades.reset();
        self.quests.events_mut().clear_pending();
        self.achievements.events_mut().clear_pending();
        self.rooms.events_mut().clear_pending();
        self.passages.events_mut().clear_pending();
        self.upgrades.events_mut().clear_pending();
        self.current_room.clone_from(&self.start_room);
        self.magic_level = STARTING_MAGIC_LEVEL;
        self.spells.clear();
        self.gestures.clear();
        self.features.clear();
        self.badges.clear();
        self.journal.clear();
        info!("all progression reset");
    }

    fn drain_all(&mut self) -> Vec<WorldEvent> {
        let mut batch: Vec<WorldEvent> = Vec::new();
        batch.extend(self.quests.drain_events().into_iter().map(WorldEvent::Quest));
        batch.extend(
            self.achievements
                .drain_events()
                .into_iter()
                .map(WorldEvent::Achievement),
        );
        batch.extend(self.rooms.drain_events().into_iter().map(WorldEvent::Room));
        batch.extend(self.passages.drain_events().into_iter().map(WorldEvent::Passage));
        batch.extend(self.upgrades.drain_events().into_iter().map(WorldEvent::Upgrade));
        batch
    }

    fn settle(&mut self) {
        for _ in 0..MAX_SETTLE_ROUNDS {
            let batch = self.drain_all();
            if batch.is_empty() {
                return;
            }
            for event in batch {
                self.react(&event);
                self.journal.push(event);
            }
        }
        warn!("event propagation still busy after {MAX_SETTLE_ROUNDS} rounds");
    }

    fn react(&mut self, event: &WorldEvent) {
        match event {
            WorldEvent::Quest(event) => self.on_quest(event),
            WorldEvent::Achievement(event) => self.on_achievement(event),
            WorldEvent::Room(event) => self.on_room(event),
            WorldEvent::Passage(event) => self.on_passage(event),
            WorldEvent::Upgrade(UpgradeEvent::Applied { room_id, .. }) => {
                self.rooms.enhance_room(room_id);
            }
            WorldEvent::Upgrade(UpgradeEvent::Unlocked { .. }) => {}
        }
    }

    fn on_quest(&mut self, event: &QuestEvent) {
        match event {
            QuestEvent::Completed { quest_id, .. } => {
                self.achievements
                    .record_action(ACTION_COMPLETE_QUEST, &ProgressPayload::quest_completed());
                self.rooms.check_quest_based_unlocks(&gate_status!(self));
                self.rooms.check_auto_unlock(&gate_status!(self));
                self.passages
                    .handle_quest_completion(quest_id, &status!(self));
                self.upgrades.check_auto_unlock_upgrades(&status!(self));
            }
            QuestEvent::RewardGranted { reward, .. } => self.grant(reward),
            QuestEvent::StepUnlocked { unlock, .. } => {
                self.features.insert(unlock.clone());
            }
            QuestEvent::Started { .. }
            | QuestEvent::StepCompleted { .. }
            | QuestEvent::Available { .. } => {}
        }
    }

    fn grant(&mut self, reward: &Reward) {
        match reward {
            Reward::UnlockRoom(room_id) => {
                let attempt =
                    self.rooms
                        .attempt_unlock(room_id, UnlockKind::QuestBased, &gate_status!(self));
                debug!("reward unlock of {room_id}: {attempt:?}");
            }
            Reward::MagicLevel(levels) => {
                self.magic_level = self.magic_level.saturating_add(*levels);
                self.achievements
                    .record_action(ACTION_MASTER_MAGIC, &ProgressPayload::magic_levels(*levels));
                info!("magic level now {}", self.magic_level);
            }
            Reward::UnlockSpell(spell) => {
                self.spells.insert(spell.clone());
            }
            Reward::UnlockGesture(gesture) => {
                self.gestures.insert(gesture.clone());
            }
            Reward::Other(id) => debug!("reward {id} has no engine effect"),
        }
    }

    fn on_achievement(&mut self, event: &AchievementEvent) {
        match event {
            AchievementEvent::Unlocked { achievement_id } => {
                self.rooms.check_achievement_based_unlocks(&gate_status!(self));
                self.rooms.check_auto_unlock(&gate_status!(self));
                self.passages
                    .handle_achievement(achievement_id, &status!(self));
                self.upgrades.check_auto_unlock_upgrades(&status!(self));
            }
            AchievementEvent::RewardGranted { badge, .. } => {
                self.badges.insert(badge.clone());
            }
            AchievementEvent::Progressed { .. } => {}
        }
    }

    fn on_room(&mut self, event: &RoomEvent) {
        match event {
            RoomEvent::Unlocked { .. } => {
                // A new room can satisfy another room's prerequisites.
                self.rooms.check_auto_unlock(&gate_status!(self));
                self.passages.check_standing_discoveries(&status!(self));
            }
            RoomEvent::Explored { first_visit, .. } => {
                if *first_visit {
                    self.achievements
                        .record_action(ACTION_VISIT_ROOMS, &ProgressPayload::room_visited());
                }
                self.upgrades.check_auto_unlock_upgrades(&status!(self));
            }
            RoomEvent::Mastered {
                room_id,
                mastery_points,
                ..
            } => {
                self.passages
                    .handle_room_mastery(room_id, *mastery_points, &status!(self));
                self.passages.check_standing_discoveries(&status!(self));
                self.upgrades.check_auto_unlock_upgrades(&status!(self));
            }
            RoomEvent::UnlockBlocked { .. } | RoomEvent::Enhanced { .. } => {}
        }
    }

    fn on_passage(&mut self, event: &PassageEvent) {
        if let PassageEvent::Used { from, to, .. } = event {
            let destination = if self.current_room == *to { from } else { to };
            if self.rooms.explore_room(destination) {
                self.current_room.clone_from(destination);
            }
        }
    }
}

impl fmt::Debug for FantasyWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FantasyWorld")
            .field("current_room", &self.current_room)
            .field("magic_level", &self.magic_level)
            .field("quests", &self.quests)
            .field("achievements", &self.achievements)
            .field("rooms", &self.rooms)
            .field("passages", &self.passages)
            .field("upgrades", &self.upgrades)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn world() -> (FantasyWorld, MemoryStore, ManualClock) {
        let store = MemoryStore::new();
        let clock = ManualClock::default();
        let world = FantasyWorld::new(
            &ContentBundle::load_from_static(),
            Rc::new(store.clone()),
            Rc::new(clock.clone()),
        );
        (world, store, clock)
    }

    fn finish_quest(world: &mut FantasyWorld, quest_id: &str) {
        assert!(world.start_quest(quest_id), "start {quest_id}");
        let steps: Vec<String> = world
            .quests()
            .quest_info(quest_id)
            .unwrap()
            .steps
            .iter()
            .map(|s| s.id.clone())
            .collect();
        for step in steps {
            assert!(world.update_quest_progress(quest_id, &step));
        }
        assert!(world.quests().is_quest_completed(quest_id));
    }

    #[test]
    fn first_quest_unlocks_kitchen_and_first_achievement() {
        let (mut world, _, _) = world();
        assert_eq!(world.current_room(), "living-room");
        finish_quest(&mut world, "credentials-recovery");

        assert!(world.achievements().is_achievement_completed("first-quest"));
        assert!(world.is_room_accessible("kitchen"));
        assert!(!world.is_room_accessible("bedroom"));
        assert_eq!(world.magic_level(), STARTING_MAGIC_LEVEL + 10);
        assert!(world.badges().contains("achievement-badge"));
        assert!(world.features().contains("kitchen-portal"));

        let names: Vec<&str> = world.journal().iter().map(WorldEvent::name).collect();
        assert!(names.contains(&"quest-completed"));
        assert!(names.contains(&"achievement-unlocked"));
        assert!(names.contains(&"room-unlocked"));
    }

    #[test]
    fn trigger_advances_listening_steps() {
        let (mut world, _, _) = world();
        assert!(world.trigger("nothing-listens").is_empty());
        assert!(world.start_quest("credentials-recovery"));
        let tag = world
            .quests()
            .quest_info("credentials-recovery")
            .unwrap()
            .steps[0]
            .triggers[0]
            .clone();
        let advanced = world.trigger(&tag);
        assert!(!advanced.is_empty());
        assert!(world.quests().is_step_completed("credentials-recovery", &advanced[0].1));
    }

    #[test]
    fn exploring_counts_toward_room_explorer_once_per_room() {
        let (mut world, _, _) = world();
        assert!(world.enter_room("living-room"));
        assert!(world.explore_room("living-room"));
        let progress = world.achievements().achievement_progress("room-explorer").unwrap();
        assert_eq!(progress.current, 1);
    }

    #[test]
    fn passage_use_moves_between_ends() {
        let (mut world, _, _) = world();
        finish_quest(&mut world, "credentials-recovery");
        assert!(world.enter_room("living-room"));
        assert_eq!(world.object_interaction("fireplace", "ignite"), vec!["living-room-to-kitchen".to_string()]);

        assert!(world.use_passage("living-room-to-kitchen"));
        assert_eq!(world.current_room(), "kitchen");
        assert!(world.use_passage("living-room-to-kitchen"));
        assert_eq!(world.current_room(), "living-room");
        assert_eq!(world.passage_stats().total_usage, 2);
    }

    #[test]
    fn applied_upgrade_enhances_mastered_room() {
        let (mut world, _, clock) = world();
        finish_quest(&mut world, "credentials-recovery");
        for _ in 0..10 {
            assert!(world.explore_room("living-room"));
        }
        clock.advance_minutes(5);
        assert!(world.master_room("living-room"));
        // 10 + 10 visits * 2 + 1 period
        assert_eq!(world.rooms().room("living-room").unwrap().mastery_points, 31);

        assert!(world.has_artifact("fire-crystal"));
        assert!(world.upgrades().state("living-room", "magical-fireplace").unlocked);
        assert!(world.apply_upgrade("living-room", "magical-fireplace"));
        assert_eq!(
            world.rooms().access_level("living-room"),
            crate::rooms::AccessLevel::Enhanced
        );
    }

    #[test]
    fn reset_all_restores_fresh_world() {
        let (mut world, store, _) = world();
        let fresh = world.progress_digest();
        finish_quest(&mut world, "credentials-recovery");
        assert_ne!(world.progress_digest(), fresh);

        world.reset_all();
        assert!(world.journal().is_empty());
        assert_eq!(world.magic_level(), STARTING_MAGIC_LEVEL);
        assert!(!world.is_room_accessible("kitchen"));
        assert!(store.raw(QUEST_STATE_KEY).is_none());
    }
}
