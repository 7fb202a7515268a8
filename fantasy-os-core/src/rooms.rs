//! Per-room access levels, visits and mastery, plus requirement-gated unlocking.
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use crate::clock::Clock;
use crate::context::{RoomStatusProvider, StatusContext};
use crate::error::InvalidAccessLevel;
use crate::events::{BusEvent, EventBus};
use crate::store::{self, ProgressStore, ROOM_PROGRESSION_KEY, ROOMS_SECTION};

const DEFAULT_ROOM_DATA: &str = include_str!("../assets/data/rooms.json");

/// Points awarded for every mastered room before visits and time are counted.
pub const MASTERY_BASE_POINTS: u32 = 10;
pub const MASTERY_POINTS_PER_VISIT: u32 = 2;
/// Milliseconds between exploring and mastering that earn one extra point.
pub const MASTERY_PERIOD_MS: i64 = 300_000;
pub const MASTERY_POINTS_CAP: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AccessLevel {
    #[default]
    Locked = 0,
    Unlocked = 1,
    Explored = 2,
    Mastered = 3,
    Enhanced = 4,
}

impl AccessLevel {
    pub const ALL: &'static [Self] = &[
        Self::Locked,
        Self::Unlocked,
        Self::Explored,
        Self::Mastered,
        Self::Enhanced,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
            Self::Explored => "explored",
            Self::Mastered => "mastered",
            Self::Enhanced => "enhanced",
        }
    }
}

impl From<AccessLevel> for u8 {
    fn from(level: AccessLevel) -> Self {
        level as Self
    }
}

impl TryFrom<u8> for AccessLevel {
    type Error = InvalidAccessLevel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(InvalidAccessLevel(value))
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Static requirements for one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub required_quests: Vec<String>,
    #[serde(default)]
    pub required_achievements: Vec<String>,
    #[serde(default)]
    pub required_rooms: Vec<String>,
    /// Level the room holds before any progression; the starting room declares `Unlocked`.
    #[serde(default, rename = "accessLevel", alias = "minAccessLevel")]
    pub min_access_level: AccessLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomCatalog {
    #[serde(default)]
    pub rooms: Vec<RoomDefinition>,
}

impl RoomCatalog {
    #[must_use]
    pub fn load_from_static() -> Self {
        serde_json::from_str(DEFAULT_ROOM_DATA).unwrap_or_default()
    }

    #[must_use]
    pub fn default_catalog() -> &'static Self {
        static CATALOG: OnceLock<RoomCatalog> = OnceLock::new();
        CATALOG.get_or_init(Self::load_from_static)
    }

    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into a room catalog.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RoomDefinition> {
        self.rooms.iter().find(|room| room.id == id)
    }

    /// First room that starts accessible.
    #[must_use]
    pub fn starting_room(&self) -> Option<&RoomDefinition> {
        self.rooms
            .iter()
            .find(|room| room.min_access_level >= AccessLevel::Unlocked)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomProgress {
    pub access_level: AccessLevel,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub explored_at: Option<DateTime<Utc>>,
    pub mastered_at: Option<DateTime<Utc>>,
    pub visit_count: u32,
    pub last_visited: Option<DateTime<Utc>>,
    pub mastery_points: u32,
}

impl RoomProgress {
    fn initial(definition: &RoomDefinition, now: DateTime<Utc>) -> Self {
        let access_level = definition.min_access_level;
        Self {
            access_level,
            unlocked_at: (access_level >= AccessLevel::Unlocked).then_some(now),
            ..Self::default()
        }
    }
}

/// `min(100, 10 + visits * 2 + whole five-minute periods between exploring and mastering)`.
#[must_use]
pub fn mastery_points(
    visit_count: u32,
    explored_at: Option<DateTime<Utc>>,
    mastered_at: Option<DateTime<Utc>>,
) -> u32 {
    let elapsed_ms = match (explored_at, mastered_at) {
        (Some(explored), Some(mastered)) => (mastered - explored).num_milliseconds().max(0),
        _ => 0,
    };
    let periods = u32::try_from(elapsed_ms / MASTERY_PERIOD_MS).unwrap_or(u32::MAX);
    MASTERY_BASE_POINTS
        .saturating_add(visit_count.saturating_mul(MASTERY_POINTS_PER_VISIT))
        .saturating_add(periods)
        .min(MASTERY_POINTS_CAP)
}

/// How an unlock was requested; carried on the `room-unlocked` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnlockKind {
    #[default]
    Default,
    QuestBased,
    AchievementBased,
    SecretPassage,
    Mastery,
}

impl UnlockKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::QuestBased => "quest-based",
            Self::AchievementBased => "achievement-based",
            Self::SecretPassage => "secret-passage",
            Self::Mastery => "mastery",
        }
    }
}

/// Requirements of a room that are not yet met.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingRequirements {
    pub quests: Vec<String>,
    pub achievements: Vec<String>,
    pub rooms: Vec<String>,
}

impl MissingRequirements {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quests.is_empty() && self.achievements.is_empty() && self.rooms.is_empty()
    }
}

impl fmt::Display for MissingRequirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.quests.is_empty() {
            parts.push(format!("quests: {}", self.quests.join(", ")));
        }
        if !self.achievements.is_empty() {
            parts.push(format!("achievements: {}", self.achievements.join(", ")));
        }
        if !self.rooms.is_empty() {
            parts.push(format!("rooms: {}", self.rooms.join(", ")));
        }
        f.write_str(&parts.join("; "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockAttempt {
    Unlocked,
    AlreadyAccessible,
    UnknownRoom,
    Blocked(MissingRequirements),
}

impl UnlockAttempt {
    #[must_use]
    pub const fn is_unlocked(&self) -> bool {
        matches!(self, Self::Unlocked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    pub id: String,
    pub name: String,
    pub progress: RoomProgress,
    pub accessible: bool,
    pub can_unlock: bool,
    pub requirements: RoomDefinition,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionStats {
    pub total_rooms: usize,
    pub unlocked_rooms: usize,
    pub explored_rooms: usize,
    pub mastered_rooms: usize,
    pub enhanced_rooms: usize,
    pub total_visits: u32,
    pub total_mastery_points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Unlocked {
        room_id: String,
        kind: UnlockKind,
    },
    UnlockBlocked {
        room_id: String,
        missing: MissingRequirements,
    },
    Explored {
        room_id: String,
        visit_count: u32,
        first_visit: bool,
    },
    Mastered {
        room_id: String,
        mastery_points: u32,
        first_time: bool,
    },
    Enhanced {
        room_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomEventKind {
    Unlocked,
    UnlockBlocked,
    Explored,
    Mastered,
    Enhanced,
}

impl RoomEventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unlocked => "room-unlocked",
            Self::UnlockBlocked => "room-unlock-blocked",
            Self::Explored => "room-explored",
            Self::Mastered => "room-mastered",
            Self::Enhanced => "room-enhanced",
        }
    }
}

impl BusEvent for RoomEvent {
    type Kind = RoomEventKind;

    fn kind(&self) -> RoomEventKind {
        match self {
            Self::Unlocked { .. } => RoomEventKind::Unlocked,
            Self::UnlockBlocked { .. } => RoomEventKind::UnlockBlocked,
            Self::Explored { .. } => RoomEventKind::Explored,
            Self::Mastered { .. } => RoomEventKind::Mastered,
            Self::Enhanced { .. } => RoomEventKind::Enhanced,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportedRooms {
    rooms: BTreeMap<String, serde_json::Value>,
}

pub struct RoomProgressionEngine {
    definitions: Vec<RoomDefinition>,
    rooms: BTreeMap<String, RoomProgress>,
    store: Rc<dyn ProgressStore>,
    clock: Rc<dyn Clock>,
    events: EventBus<RoomEvent>,
}

impl RoomProgressionEngine {
    #[must_use]
    pub fn new(catalog: &RoomCatalog, store: Rc<dyn ProgressStore>, clock: Rc<dyn Clock>) -> Self {
        let mut engine = Self {
            definitions: catalog.rooms.clone(),
            rooms: BTreeMap::new(),
            store,
            clock,
            events: EventBus::new(),
        };
        engine.rooms = engine.initial_rooms();
        engine
    }

    fn initial_rooms(&self) -> BTreeMap<String, RoomProgress> {
        let now = self.clock.now();
        self.definitions
            .iter()
            .map(|def| (def.id.clone(), RoomProgress::initial(def, now)))
            .collect()
    }

    /// Restore saved rooms. Entries for unknown rooms are dropped and a saved
    /// level never falls below the room's starting level.
    pub fn load(&mut self) -> bool {
        let entries = store::read_section(&*self.store, ROOM_PROGRESSION_KEY, ROOMS_SECTION);
        if entries.is_empty() {
            return false;
        }
        self.rooms = self.initial_rooms();
        self.apply_saved(store::parse_entries(ROOMS_SECTION, entries));
        true
    }

    fn apply_saved(&mut self, saved: BTreeMap<String, RoomProgress>) {
        for (id, mut progress) in saved {
            let Some(def) = self.definition(&id) else {
                debug!("ignoring saved progress for unknown room {id}");
                continue;
            };
            progress.access_level = progress.access_level.max(def.min_access_level);
            self.rooms.insert(id, progress);
        }
    }

    #[must_use]
    pub fn definition(&self, room_id: &str) -> Option<&RoomDefinition> {
        self.definitions.iter().find(|def| def.id == room_id)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &RoomDefinition> {
        self.definitions.iter()
    }

    #[must_use]
    pub fn room(&self, room_id: &str) -> Option<&RoomProgress> {
        self.rooms.get(room_id)
    }

    #[must_use]
    pub fn access_level(&self, room_id: &str) -> AccessLevel {
        self.rooms
            .get(room_id)
            .map_or(AccessLevel::Locked, |room| room.access_level)
    }

    #[must_use]
    pub fn is_room_accessible(&self, room_id: &str) -> bool {
        self.access_level(room_id) >= AccessLevel::Unlocked
    }

    /// Requirements of `room_id` that `ctx` does not satisfy, or `None` for an
    /// unknown room. Missing context views count as unmet.
    #[must_use]
    pub fn missing_requirements(
        &self,
        room_id: &str,
        ctx: &StatusContext<'_>,
    ) -> Option<MissingRequirements> {
        let def = self.definition(room_id)?;
        Some(MissingRequirements {
            quests: def
                .required_quests
                .iter()
                .filter(|quest| !ctx.quest_completed(quest))
                .cloned()
                .collect(),
            achievements: def
                .required_achievements
                .iter()
                .filter(|achievement| !ctx.achievement_completed(achievement))
                .cloned()
                .collect(),
            rooms: def
                .required_rooms
                .iter()
                .filter(|room| !self.is_room_accessible(room))
                .cloned()
                .collect(),
        })
    }

    #[must_use]
    pub fn can_unlock_room(&self, room_id: &str, ctx: &StatusContext<'_>) -> bool {
        self.missing_requirements(room_id, ctx)
            .is_some_and(|missing| missing.is_empty())
    }

    pub fn unlock_room(&mut self, room_id: &str, ctx: &StatusContext<'_>) -> bool {
        if self.definition(room_id).is_none() {
            warn!("room {room_id} not found");
            return false;
        }
        if self.is_room_accessible(room_id) || !self.can_unlock_room(room_id, ctx) {
            return false;
        }
        self.apply_unlock(room_id, UnlockKind::Default);
        true
    }

    /// Unlock with a report of why nothing happened. Blocked attempts emit
    /// `room-unlock-blocked` so the UI can show what is missing.
    pub fn attempt_unlock(
        &mut self,
        room_id: &str,
        kind: UnlockKind,
        ctx: &StatusContext<'_>,
    ) -> UnlockAttempt {
        let Some(missing) = self.missing_requirements(room_id, ctx) else {
            warn!("room {room_id} not found");
            return UnlockAttempt::UnknownRoom;
        };
        if self.is_room_accessible(room_id) {
            return UnlockAttempt::AlreadyAccessible;
        }
        if !missing.is_empty() {
            debug!("cannot unlock {room_id} ({}): {missing}", kind.as_str());
            self.events.emit(RoomEvent::UnlockBlocked {
                room_id: room_id.to_string(),
                missing: missing.clone(),
            });
            return UnlockAttempt::Blocked(missing);
        }
        self.apply_unlock(room_id, kind);
        UnlockAttempt::Unlocked
    }

    fn apply_unlock(&mut self, room_id: &str, kind: UnlockKind) {
        let now = self.clock.now();
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        room.access_level = room.access_level.max(AccessLevel::Unlocked);
        room.unlocked_at = Some(now);
        self.persist();
        self.events.emit(RoomEvent::Unlocked {
            room_id: room_id.to_string(),
            kind,
        });
        info!("room unlocked: {room_id} ({})", kind.as_str());
    }

    pub fn explore_room(&mut self, room_id: &str) -> bool {
        let now = self.clock.now();
        let Some(room) = self.rooms.get_mut(room_id) else {
            warn!("room {room_id} not found");
            return false;
        };
        if room.access_level < AccessLevel::Unlocked {
            debug!("cannot explore locked room {room_id}");
            return false;
        }
        let first_visit = room.access_level < AccessLevel::Explored;
        if first_visit {
            room.access_level = AccessLevel::Explored;
            room.explored_at = Some(now);
        }
        room.visit_count = room.visit_count.saturating_add(1);
        room.last_visited = Some(now);
        let visit_count = room.visit_count;
        self.persist();
        self.events.emit(RoomEvent::Explored {
            room_id: room_id.to_string(),
            visit_count,
            first_visit,
        });
        true
    }

    /// Master an explored room.
    ///
    /// Level, `masteredAt` and points are fixed the first time. Later calls
    /// re-announce the mastery without changing the room.
    pub fn master_room(&mut self, room_id: &str) -> bool {
        let now = self.clock.now();
        let Some(room) = self.rooms.get_mut(room_id) else {
            warn!("room {room_id} not found");
            return false;
        };
        if room.access_level < AccessLevel::Explored {
            debug!("cannot master unexplored room {room_id}");
            return false;
        }
        let first_time = room.access_level < AccessLevel::Mastered;
        if first_time {
            room.access_level = AccessLevel::Mastered;
            room.mastered_at = Some(now);
            room.mastery_points = mastery_points(room.visit_count, room.explored_at, Some(now));
        }
        let mastery_points = room.mastery_points;
        if first_time {
            self.persist();
            info!("room mastered: {room_id} ({mastery_points} points)");
        }
        self.events.emit(RoomEvent::Mastered {
            room_id: room_id.to_string(),
            mastery_points,
            first_time,
        });
        true
    }

    /// Raise a mastered room to `Enhanced`, first time only.
    pub fn enhance_room(&mut self, room_id: &str) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        if room.access_level != AccessLevel::Mastered {
            return false;
        }
        room.access_level = AccessLevel::Enhanced;
        self.persist();
        self.events.emit(RoomEvent::Enhanced {
            room_id: room_id.to_string(),
        });
        info!("room enhanced: {room_id}");
        true
    }

    /// Unlock every locked room whose requirements are now met.
    pub fn check_auto_unlock(&mut self, ctx: &StatusContext<'_>) -> Vec<String> {
        self.unlock_matching(UnlockKind::Default, ctx, |_| true)
    }

    /// Like [`Self::check_auto_unlock`], limited to rooms gated by quests.
    pub fn check_quest_based_unlocks(&mut self, ctx: &StatusContext<'_>) -> Vec<String> {
        self.unlock_matching(UnlockKind::QuestBased, ctx, |def| {
            !def.required_quests.is_empty()
        })
    }

    /// Like [`Self::check_auto_unlock`], limited to rooms gated by achievements.
    pub fn check_achievement_based_unlocks(&mut self, ctx: &StatusContext<'_>) -> Vec<String> {
        self.unlock_matching(UnlockKind::AchievementBased, ctx, |def| {
            !def.required_achievements.is_empty()
        })
    }

    fn unlock_matching(
        &mut self,
        kind: UnlockKind,
        ctx: &StatusContext<'_>,
        filter: impl Fn(&RoomDefinition) -> bool,
    ) -> Vec<String> {
        let mut unlocked = Vec::new();
        // Unlocking one room can satisfy a later room's room prerequisite.
        loop {
            let next = self
                .definitions
                .iter()
                .filter(|&def| filter(def))
                .map(|def| def.id.clone())
                .find(|id| !self.is_room_accessible(id) && self.can_unlock_room(id, ctx));
            let Some(id) = next else {
                break;
            };
            self.apply_unlock(&id, kind);
            unlocked.push(id);
        }
        unlocked
    }

    #[must_use]
    pub fn room_status(&self, room_id: &str, ctx: &StatusContext<'_>) -> Option<RoomStatus> {
        let def = self.definition(room_id)?;
        let progress = self.rooms.get(room_id).cloned().unwrap_or_default();
        Some(RoomStatus {
            id: def.id.clone(),
            name: def.name.clone(),
            accessible: progress.access_level >= AccessLevel::Unlocked,
            progress,
            can_unlock: self.can_unlock_room(room_id, ctx),
            requirements: def.clone(),
        })
    }

    #[must_use]
    pub fn all_room_status(&self, ctx: &StatusContext<'_>) -> Vec<RoomStatus> {
        self.definitions
            .iter()
            .filter_map(|def| self.room_status(&def.id, ctx))
            .collect()
    }

    #[must_use]
    pub fn progression_stats(&self) -> ProgressionStats {
        let at_least = |level: AccessLevel| {
            self.rooms
                .values()
                .filter(|room| room.access_level >= level)
                .count()
        };
        ProgressionStats {
            total_rooms: self.definitions.len(),
            unlocked_rooms: at_least(AccessLevel::Unlocked),
            explored_rooms: at_least(AccessLevel::Explored),
            mastered_rooms: at_least(AccessLevel::Mastered),
            enhanced_rooms: at_least(AccessLevel::Enhanced),
            total_visits: self
                .rooms
                .values()
                .fold(0u32, |acc, room| acc.saturating_add(room.visit_count)),
            total_mastery_points: self
                .rooms
                .values()
                .fold(0u32, |acc, room| acc.saturating_add(room.mastery_points)),
        }
    }

    /// Room progress as a standalone JSON document.
    #[must_use]
    pub fn export_progression(&self) -> String {
        let rooms = self
            .rooms
            .iter()
            .filter_map(|(id, room)| serde_json::to_value(room).ok().map(|v| (id.clone(), v)))
            .collect();
        serde_json::to_string_pretty(&ExportedRooms { rooms }).unwrap_or_default()
    }

    /// Replace room progress with an exported document. Returns `false` and
    /// leaves state untouched if `json` is not an export.
    pub fn import_progression(&mut self, json: &str) -> bool {
        let exported: ExportedRooms = match serde_json::from_str(json) {
            Ok(exported) => exported,
            Err(err) => {
                warn!("rejecting room progression import: {err}");
                return false;
            }
        };
        let entries = exported.rooms.into_iter().collect();
        self.rooms = self.initial_rooms();
        self.apply_saved(store::parse_entries(ROOMS_SECTION, entries));
        self.persist();
        info!("room progression imported");
        true
    }

    pub fn reset(&mut self) {
        self.rooms = self.initial_rooms();
        self.persist();
        info!("room progression reset");
    }

    #[must_use]
    pub const fn events(&self) -> &EventBus<RoomEvent> {
        &self.events
    }

    pub const fn events_mut(&mut self) -> &mut EventBus<RoomEvent> {
        &mut self.events
    }

    pub fn drain_events(&mut self) -> Vec<RoomEvent> {
        self.events.drain()
    }

    fn persist(&self) {
        store::write_section(
            &*self.store,
            ROOM_PROGRESSION_KEY,
            ROOMS_SECTION,
            &self.rooms,
        );
    }
}

impl RoomStatusProvider for RoomProgressionEngine {
    fn access_level(&self, room_id: &str) -> AccessLevel {
        RoomProgressionEngine::access_level(self, room_id)
    }

    fn mastery_points(&self, room_id: &str) -> u32 {
        self.rooms.get(room_id).map_or(0, |room| room.mastery_points)
    }
}

impl fmt::Debug for RoomProgressionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let levels: Vec<(&str, AccessLevel)> = self
            .rooms
            .iter()
            .map(|(id, room)| (id.as_str(), room.access_level))
            .collect();
        f.debug_struct("RoomProgressionEngine")
            .field("rooms", &levels)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use std::collections::BTreeSet;

    fn engine(store: &MemoryStore, clock: &ManualClock) -> RoomProgressionEngine {
        RoomProgressionEngine::new(
            RoomCatalog::default_catalog(),
            Rc::new(store.clone()),
            Rc::new(clock.clone()),
        )
    }

    fn completed(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| (*id).to_string()).collect()
    }

    #[test]
    fn access_levels_round_trip_as_integers() {
        assert_eq!(serde_json::to_string(&AccessLevel::Mastered).unwrap(), "3");
        assert_eq!(
            serde_json::from_str::<AccessLevel>("4").unwrap(),
            AccessLevel::Enhanced
        );
        assert!(serde_json::from_str::<AccessLevel>("9").is_err());
    }

    #[test]
    fn mastery_points_formula_caps_at_one_hundred() {
        let explored = DateTime::<Utc>::UNIX_EPOCH;
        let mastered = explored + chrono::TimeDelta::minutes(16);
        assert_eq!(mastery_points(3, Some(explored), Some(mastered)), 19);
        assert_eq!(mastery_points(0, None, None), 10);
        assert_eq!(mastery_points(60, Some(explored), Some(mastered)), 100);
        assert_eq!(mastery_points(0, Some(mastered), Some(explored)), 10);
    }

    #[test]
    fn starting_room_is_unlocked_and_others_locked() {
        let rooms = engine(&MemoryStore::new(), &ManualClock::default());
        assert!(rooms.is_room_accessible("living-room"));
        assert!(!rooms.is_room_accessible("kitchen"));
        assert!(!rooms.is_room_accessible("attic"));
        assert_eq!(rooms.progression_stats().unlocked_rooms, 1);
    }

    #[test]
    fn locked_rooms_cannot_be_explored_or_mastered() {
        let mut rooms = engine(&MemoryStore::new(), &ManualClock::default());
        assert!(!rooms.explore_room("kitchen"));
        assert!(!rooms.master_room("kitchen"));
        assert!(!rooms.master_room("living-room"));
        assert_eq!(rooms.room("kitchen").unwrap().visit_count, 0);
    }

    #[test]
    fn unlock_fails_closed_without_collaborators() {
        let mut rooms = engine(&MemoryStore::new(), &ManualClock::default());
        let ctx = StatusContext::empty();
        assert!(!rooms.can_unlock_room("kitchen", &ctx));
        assert!(!rooms.unlock_room("kitchen", &ctx));

        let quests = completed(&["credentials-recovery"]);
        let achievements = completed(&["first-quest"]);
        let ctx = StatusContext::empty()
            .with_quests(&quests)
            .with_achievements(&achievements);
        assert!(rooms.can_unlock_room("kitchen", &ctx));
        assert!(rooms.unlock_room("kitchen", &ctx));
        assert!(!rooms.unlock_room("kitchen", &ctx));
    }

    #[test]
    fn blocked_attempt_reports_what_is_missing() {
        let mut rooms = engine(&MemoryStore::new(), &ManualClock::default());
        let quests = completed(&["credentials-recovery"]);
        let ctx = StatusContext::empty().with_quests(&quests);
        let attempt = rooms.attempt_unlock("kitchen", UnlockKind::QuestBased, &ctx);
        assert_eq!(
            attempt,
            UnlockAttempt::Blocked(MissingRequirements {
                quests: vec![],
                achievements: vec!["first-quest".into()],
                rooms: vec![],
            })
        );
        assert_eq!(
            rooms.attempt_unlock("living-room", UnlockKind::Default, &ctx),
            UnlockAttempt::AlreadyAccessible
        );
        assert_eq!(
            rooms.attempt_unlock("attic", UnlockKind::Default, &ctx),
            UnlockAttempt::UnknownRoom
        );
        let events = rooms.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), RoomEventKind::UnlockBlocked);
    }

    #[test]
    fn auto_unlock_follows_room_chains() {
        let mut rooms = engine(&MemoryStore::new(), &ManualClock::default());
        let quests = completed(&["credentials-recovery", "ancient-artifacts"]);
        let achievements = completed(&["first-quest"]);
        let ctx = StatusContext::empty()
            .with_quests(&quests)
            .with_achievements(&achievements);
        let unlocked = rooms.check_auto_unlock(&ctx);
        assert_eq!(unlocked, vec!["kitchen".to_string(), "bedroom".to_string()]);
        assert!(rooms.check_auto_unlock(&ctx).is_empty());
    }

    #[test]
    fn exploring_counts_every_visit_and_mastery_uses_elapsed_time() {
        let clock = ManualClock::default();
        let mut rooms = engine(&MemoryStore::new(), &clock);
        assert!(rooms.explore_room("living-room"));
        assert!(rooms.explore_room("living-room"));
        clock.advance_minutes(12);
        assert!(rooms.master_room("living-room"));

        let room = rooms.room("living-room").unwrap();
        assert_eq!(room.access_level, AccessLevel::Mastered);
        assert_eq!(room.visit_count, 2);
        assert_eq!(room.mastery_points, 10 + 4 + 2);

        assert!(rooms.explore_room("living-room"));
        assert_eq!(rooms.access_level("living-room"), AccessLevel::Mastered);
    }

    #[test]
    fn remastering_keeps_first_mastery_points() {
        let clock = ManualClock::default();
        let mut rooms = engine(&MemoryStore::new(), &clock);
        assert!(rooms.explore_room("living-room"));
        assert!(rooms.master_room("living-room"));
        let first = rooms.room("living-room").unwrap().clone();
        assert_eq!(first.mastery_points, 12);

        for _ in 0..20 {
            assert!(rooms.explore_room("living-room"));
        }
        clock.advance_minutes(30);
        assert!(rooms.master_room("living-room"));

        let again = rooms.room("living-room").unwrap();
        assert_eq!(again.mastery_points, first.mastery_points);
        assert_eq!(again.mastered_at, first.mastered_at);
        assert_eq!(again.visit_count, 21);
    }

    #[test]
    fn enhance_requires_mastery() {
        let mut rooms = engine(&MemoryStore::new(), &ManualClock::default());
        assert!(!rooms.enhance_room("living-room"));
        rooms.explore_room("living-room");
        rooms.master_room("living-room");
        assert!(rooms.enhance_room("living-room"));
        assert!(!rooms.enhance_room("living-room"));
        assert_eq!(rooms.progression_stats().enhanced_rooms, 1);
    }

    #[test]
    fn export_and_import_restore_rooms() {
        let mut rooms = engine(&MemoryStore::new(), &ManualClock::default());
        rooms.explore_room("living-room");
        let exported = rooms.export_progression();

        let mut other = engine(&MemoryStore::new(), &ManualClock::default());
        assert!(!other.import_progression("not json"));
        assert!(other.import_progression(&exported));
        assert_eq!(other.room("living-room"), rooms.room("living-room"));
    }

    #[test]
    fn saved_levels_never_drop_below_starting_level() {
        let store = MemoryStore::new();
        store.insert_raw(
            ROOM_PROGRESSION_KEY,
            r#"{"rooms":{"living-room":{"accessLevel":0,"visitCount":5},"kitchen":{"accessLevel":"x"}}}"#,
        );
        let mut rooms = engine(&store, &ManualClock::default());
        assert!(rooms.load());
        let living = rooms.room("living-room").unwrap();
        assert_eq!(living.access_level, AccessLevel::Unlocked);
        assert_eq!(living.visit_count, 5);
        assert_eq!(rooms.access_level("kitchen"), AccessLevel::Locked);
    }
}
