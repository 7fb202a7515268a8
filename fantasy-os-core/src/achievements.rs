//! Achievement definitions and progress accumulation.
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use crate::clock::Clock;
use crate::context::AchievementStatusProvider;
use crate::events::{BusEvent, EventBus};
use crate::store::{self, ACHIEVEMENT_STATE_KEY, ProgressStore};

const DEFAULT_ACHIEVEMENT_DATA: &str = include_str!("../assets/data/achievements.json");

/// Which accumulator an achievement uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AchievementKind {
    Quest,
    Exploration,
    Magic,
    Collection,
    Companion,
    #[default]
    Generic,
}

impl AchievementKind {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Quest => "quest",
            Self::Exploration => "exploration",
            Self::Magic => "magic",
            Self::Collection => "collection",
            Self::Companion => "companion",
            Self::Generic => "generic",
        }
    }

    /// Amount a payload contributes to an achievement of this kind.
    #[must_use]
    pub fn delta(self, payload: &ProgressPayload) -> u32 {
        match self {
            Self::Quest => u32::from(payload.quest_completed),
            Self::Exploration => u32::from(payload.room_visited),
            Self::Magic => payload.magic_level_increased,
            Self::Collection => u32::from(payload.item_collected),
            Self::Companion => payload.trust_increased,
            Self::Generic => payload.progress.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: AchievementKind,
    /// Action tag a `check_progress` call must carry to count.
    pub requirement: String,
    pub target: u32,
    #[serde(default)]
    pub reward: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AchievementCatalog {
    #[serde(default)]
    pub achievements: Vec<Achievement>,
}

impl AchievementCatalog {
    #[must_use]
    pub fn load_from_static() -> Self {
        serde_json::from_str(DEFAULT_ACHIEVEMENT_DATA).unwrap_or_default()
    }

    #[must_use]
    pub fn default_catalog() -> &'static Self {
        static CATALOG: OnceLock<AchievementCatalog> = OnceLock::new();
        CATALOG.get_or_init(Self::load_from_static)
    }

    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into an achievement catalog.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Achievement> {
        self.achievements.iter().find(|a| a.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AchievementProgress {
    pub current: u32,
    pub target: u32,
    #[serde(alias = "progress")]
    pub percent: f64,
}

impl AchievementProgress {
    #[must_use]
    pub const fn new(target: u32) -> Self {
        Self {
            current: 0,
            target,
            percent: 0.0,
        }
    }

    #[must_use]
    pub const fn is_reached(&self) -> bool {
        self.current >= self.target
    }

    fn advance(&mut self, delta: u32) {
        self.current = self.current.saturating_add(delta);
        self.percent = if self.target == 0 {
            100.0
        } else {
            f64::from(self.current) * 100.0 / f64::from(self.target)
        };
    }
}

/// Data accompanying an action, read according to the achievement kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressPayload {
    pub quest_completed: bool,
    pub room_visited: bool,
    pub magic_level_increased: u32,
    pub item_collected: bool,
    pub trust_increased: u32,
    pub progress: Option<u32>,
}

impl ProgressPayload {
    #[must_use]
    pub fn quest_completed() -> Self {
        Self {
            quest_completed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn room_visited() -> Self {
        Self {
            room_visited: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn magic_levels(levels: u32) -> Self {
        Self {
            magic_level_increased: levels,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn item_collected() -> Self {
        Self {
            item_collected: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn trust(amount: u32) -> Self {
        Self {
            trust_increased: amount,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn progress(amount: u32) -> Self {
        Self {
            progress: Some(amount),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementCount {
    pub total: usize,
    pub completed: usize,
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AchievementEvent {
    Progressed {
        achievement_id: String,
        current: u32,
        target: u32,
        percent: f64,
    },
    Unlocked {
        achievement_id: String,
    },
    RewardGranted {
        achievement_id: String,
        badge: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AchievementEventKind {
    Progressed,
    Unlocked,
    RewardGranted,
}

impl AchievementEventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Progressed => "achievement-progress",
            Self::Unlocked => "achievement-unlocked",
            Self::RewardGranted => "achievement-reward",
        }
    }
}

impl BusEvent for AchievementEvent {
    type Kind = AchievementEventKind;

    fn kind(&self) -> AchievementEventKind {
        match self {
            Self::Progressed { .. } => AchievementEventKind::Progressed,
            Self::Unlocked { .. } => AchievementEventKind::Unlocked,
            Self::RewardGranted { .. } => AchievementEventKind::RewardGranted,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AchievementStateDocument {
    completed_achievements: Vec<String>,
    achievement_progress: Vec<(String, AchievementProgress)>,
    timestamp: Option<DateTime<Utc>>,
}

pub struct AchievementTracker {
    definitions: BTreeMap<String, Achievement>,
    progress: BTreeMap<String, AchievementProgress>,
    completed: Vec<String>,
    store: Rc<dyn ProgressStore>,
    clock: Rc<dyn Clock>,
    events: EventBus<AchievementEvent>,
}

impl AchievementTracker {
    #[must_use]
    pub fn new(
        catalog: &AchievementCatalog,
        store: Rc<dyn ProgressStore>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        let definitions: BTreeMap<String, Achievement> = catalog
            .achievements
            .iter()
            .map(|a| (a.id.clone(), a.clone()))
            .collect();
        let progress = fresh_progress(&definitions);
        Self {
            definitions,
            progress,
            completed: Vec::new(),
            store,
            clock,
            events: EventBus::new(),
        }
    }

    /// Restore persisted state; targets always come from the definitions.
    pub fn load(&mut self) -> bool {
        let Some(doc) = store::read_document::<AchievementStateDocument>(
            &*self.store,
            ACHIEVEMENT_STATE_KEY,
        ) else {
            return false;
        };

        self.progress = fresh_progress(&self.definitions);
        self.completed.clear();
        for (id, saved) in doc.achievement_progress {
            if let Some(entry) = self.progress.get_mut(&id) {
                let target = entry.target;
                *entry = AchievementProgress::new(target);
                entry.advance(saved.current);
            } else {
                debug!("ignoring saved progress for unknown achievement {id}");
            }
        }
        for id in doc.completed_achievements {
            if self.definitions.contains_key(&id) && !self.completed.contains(&id) {
                self.completed.push(id);
            }
        }
        true
    }

    /// Feed an action into one achievement.
    ///
    /// Returns `true` only when the achievement accepted the action and its
    /// counter moved.
    pub fn check_progress(
        &mut self,
        achievement_id: &str,
        action: &str,
        payload: &ProgressPayload,
    ) -> bool {
        let Some(achievement) = self.definitions.get(achievement_id) else {
            warn!("achievement {achievement_id} not found");
            return false;
        };
        if self.is_achievement_completed(achievement_id) {
            return false;
        }
        if achievement.requirement != action {
            return false;
        }

        let delta = achievement.kind.delta(payload);
        if delta == 0 {
            return false;
        }
        let target = achievement.target;
        let entry = self
            .progress
            .entry(achievement_id.to_string())
            .or_insert_with(|| AchievementProgress::new(target));
        entry.advance(delta);
        let snapshot = entry.clone();

        if snapshot.is_reached() {
            self.award(achievement_id);
        } else {
            self.persist();
            self.events.emit(AchievementEvent::Progressed {
                achievement_id: achievement_id.to_string(),
                current: snapshot.current,
                target: snapshot.target,
                percent: snapshot.percent,
            });
        }
        true
    }

    /// Run `check_progress` for every achievement with requirement `action`.
    /// Returns the ids that moved.
    pub fn record_action(&mut self, action: &str, payload: &ProgressPayload) -> Vec<String> {
        let ids = self.achievements_requiring(action);
        ids.into_iter()
            .filter(|id| self.check_progress(id, action, payload))
            .collect()
    }

    fn award(&mut self, achievement_id: &str) {
        self.completed.push(achievement_id.to_string());
        self.persist();
        self.events.emit(AchievementEvent::Unlocked {
            achievement_id: achievement_id.to_string(),
        });
        info!("achievement unlocked: {achievement_id}");

        let badge = self
            .definitions
            .get(achievement_id)
            .and_then(|a| a.reward.clone());
        if let Some(badge) = badge {
            self.events.emit(AchievementEvent::RewardGranted {
                achievement_id: achievement_id.to_string(),
                badge,
            });
        }
    }

    #[must_use]
    pub fn is_achievement_completed(&self, achievement_id: &str) -> bool {
        self.completed.iter().any(|id| id == achievement_id)
    }

    #[must_use]
    pub fn achievement_info(&self, achievement_id: &str) -> Option<&Achievement> {
        self.definitions.get(achievement_id)
    }

    #[must_use]
    pub fn achievement_progress(&self, achievement_id: &str) -> Option<&AchievementProgress> {
        self.progress.get(achievement_id)
    }

    /// Completed achievement ids in unlock order.
    #[must_use]
    pub fn completed_achievements(&self) -> &[String] {
        &self.completed
    }

    #[must_use]
    pub fn achievements_requiring(&self, action: &str) -> Vec<String> {
        self.definitions
            .values()
            .filter(|a| a.requirement == action)
            .map(|a| a.id.clone())
            .collect()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Achievement> {
        self.definitions.values()
    }

    #[must_use]
    pub fn achievement_count(&self) -> AchievementCount {
        let total = self.definitions.len();
        let completed = self.completed.len();
        let percent = if total == 0 {
            0
        } else {
            u32::try_from(completed * 100 / total).unwrap_or(100)
        };
        AchievementCount {
            total,
            completed,
            percent,
        }
    }

    pub fn reset(&mut self) {
        self.progress = fresh_progress(&self.definitions);
        self.completed.clear();
        store::clear_document(&*self.store, ACHIEVEMENT_STATE_KEY);
        info!("achievement state reset");
    }

    #[must_use]
    pub const fn events(&self) -> &EventBus<AchievementEvent> {
        &self.events
    }

    pub const fn events_mut(&mut self) -> &mut EventBus<AchievementEvent> {
        &mut self.events
    }

    pub fn drain_events(&mut self) -> Vec<AchievementEvent> {
        self.events.drain()
    }

    fn persist(&self) {
        let doc = AchievementStateDocument {
            completed_achievements: self.completed.clone(),
            achievement_progress: self
                .progress
                .iter()
                .map(|(id, p)| (id.clone(), p.clone()))
                .collect(),
            timestamp: Some(self.clock.now()),
        };
        store::write_document(&*self.store, ACHIEVEMENT_STATE_KEY, &doc);
    }
}

fn fresh_progress(
    definitions: &BTreeMap<String, Achievement>,
) -> BTreeMap<String, AchievementProgress> {
    definitions
        .values()
        .map(|a| (a.id.clone(), AchievementProgress::new(a.target)))
        .collect()
}

impl AchievementStatusProvider for AchievementTracker {
    fn is_achievement_completed(&self, achievement_id: &str) -> bool {
        AchievementTracker::is_achievement_completed(self, achievement_id)
    }
}

impl fmt::Debug for AchievementTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AchievementTracker")
            .field("definitions", &self.definitions.len())
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn tracker_with(store: &MemoryStore) -> AchievementTracker {
        AchievementTracker::new(
            AchievementCatalog::default_catalog(),
            Rc::new(store.clone()),
            Rc::new(ManualClock::default()),
        )
    }

    #[test]
    fn mismatched_action_or_empty_payload_is_ignored() {
        let mut tracker = tracker_with(&MemoryStore::new());
        assert!(!tracker.check_progress("room-explorer", "complete-quest", &ProgressPayload::room_visited()));
        assert!(!tracker.check_progress("room-explorer", "visit-rooms", &ProgressPayload::default()));
        assert!(!tracker.check_progress("nope", "visit-rooms", &ProgressPayload::room_visited()));
        assert_eq!(tracker.achievement_progress("room-explorer").unwrap().current, 0);
        assert!(tracker.drain_events().is_empty());
    }

    #[test]
    fn progress_accumulates_until_target_then_absorbs() {
        let mut tracker = tracker_with(&MemoryStore::new());
        for _ in 0..4 {
            assert!(tracker.check_progress("room-explorer", "visit-rooms", &ProgressPayload::room_visited()));
        }
        let progress = tracker.achievement_progress("room-explorer").unwrap();
        assert_eq!(progress.current, 4);
        assert_eq!(progress.percent, 80.0);
        assert!(!tracker.is_achievement_completed("room-explorer"));

        assert!(tracker.check_progress("room-explorer", "visit-rooms", &ProgressPayload::room_visited()));
        assert!(tracker.is_achievement_completed("room-explorer"));
        assert!(!tracker.check_progress("room-explorer", "visit-rooms", &ProgressPayload::room_visited()));
        assert_eq!(tracker.achievement_progress("room-explorer").unwrap().current, 5);

        let unlocked = tracker
            .drain_events()
            .iter()
            .filter(|e| e.kind() == AchievementEventKind::Unlocked)
            .count();
        assert_eq!(unlocked, 1);
    }

    #[test]
    fn kinds_read_their_own_payload_fields() {
        let mut tracker = tracker_with(&MemoryStore::new());
        assert!(tracker.check_progress("magic-master", "master-magic", &ProgressPayload::magic_levels(4)));
        assert!(tracker.check_progress("hobbit-companion", "hobbit-trust", &ProgressPayload::trust(40)));
        assert!(!tracker.check_progress("hobbit-companion", "hobbit-trust", &ProgressPayload::magic_levels(3)));
        assert_eq!(tracker.achievement_progress("magic-master").unwrap().current, 4);
        assert_eq!(tracker.achievement_progress("hobbit-companion").unwrap().current, 40);
    }

    #[test]
    fn unlock_grants_badge_reward() {
        let mut tracker = tracker_with(&MemoryStore::new());
        tracker.check_progress("first-quest", "complete-quest", &ProgressPayload::quest_completed());
        let events = tracker.drain_events();
        assert!(events.contains(&AchievementEvent::RewardGranted {
            achievement_id: "first-quest".into(),
            badge: "achievement-badge".into(),
        }));
        assert_eq!(tracker.achievement_count().completed, 1);
        assert_eq!(tracker.achievement_count().percent, 20);
    }

    #[test]
    fn saved_progress_survives_reload_with_current_targets() {
        let store = MemoryStore::new();
        let mut tracker = tracker_with(&store);
        tracker.record_action("visit-rooms", &ProgressPayload::room_visited());
        tracker.record_action("complete-quest", &ProgressPayload::quest_completed());

        let raw = store.raw(ACHIEVEMENT_STATE_KEY).unwrap();
        assert!(raw.contains("\"completedAchievements\":[\"first-quest\"]"));

        let mut restored = tracker_with(&store);
        assert!(restored.load());
        assert!(restored.is_achievement_completed("first-quest"));
        let progress = restored.achievement_progress("room-explorer").unwrap();
        assert_eq!((progress.current, progress.target), (1, 5));
    }

    #[test]
    fn legacy_progress_field_is_accepted() {
        let parsed: AchievementProgress =
            serde_json::from_str(r#"{"current":2,"target":4,"progress":50}"#).unwrap();
        assert_eq!(parsed.percent, 50.0);
    }
}
