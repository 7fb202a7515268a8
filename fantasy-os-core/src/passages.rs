//! Secret passages: one-time discoverable shortcuts between rooms.
//!
//! Each passage names one discovery rule. The `handle_*` methods are fed the
//! matching gameplay events and discover every passage whose rule they satisfy.
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use crate::clock::Clock;
use crate::context::StatusContext;
use crate::events::{BusEvent, EventBus};
use crate::rooms::AccessLevel;
use crate::store::{self, PASSAGES_SECTION, ProgressStore, ROOM_PROGRESSION_KEY};

const DEFAULT_PASSAGE_DATA: &str = include_str!("../assets/data/passages.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMethod {
    ObjectInteraction,
    SpellCast,
    RoomMastery,
    QuestCompletion,
    Achievement,
}

impl DiscoveryMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ObjectInteraction => "object-interaction",
            Self::SpellCast => "spell-cast",
            Self::RoomMastery => "room-mastery",
            Self::QuestCompletion => "quest-completion",
            Self::Achievement => "achievement",
        }
    }
}

/// Discovery rule together with its matching condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum Discovery {
    ObjectInteraction {
        object: String,
        action: String,
    },
    SpellCast {
        spell: String,
    },
    RoomMastery {
        #[serde(rename = "requiredMastery")]
        required_mastery: u32,
    },
    QuestCompletion {
        quest: String,
    },
    Achievement {
        achievement: String,
    },
}

impl Discovery {
    #[must_use]
    pub const fn method(&self) -> DiscoveryMethod {
        match self {
            Self::ObjectInteraction { .. } => DiscoveryMethod::ObjectInteraction,
            Self::SpellCast { .. } => DiscoveryMethod::SpellCast,
            Self::RoomMastery { .. } => DiscoveryMethod::RoomMastery,
            Self::QuestCompletion { .. } => DiscoveryMethod::QuestCompletion,
            Self::Achievement { .. } => DiscoveryMethod::Achievement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretPassage {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub discovery: Discovery,
    /// Minimum level of the `from` room.
    #[serde(default)]
    pub required_level: AccessLevel,
}

impl SecretPassage {
    /// The endpoint opposite `room_id`, if the passage touches it.
    #[must_use]
    pub fn other_end(&self, room_id: &str) -> Option<&str> {
        if self.from == room_id {
            Some(&self.to)
        } else if self.to == room_id {
            Some(&self.from)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PassageCatalog {
    #[serde(default)]
    pub passages: Vec<SecretPassage>,
}

impl PassageCatalog {
    #[must_use]
    pub fn load_from_static() -> Self {
        serde_json::from_str(DEFAULT_PASSAGE_DATA).unwrap_or_default()
    }

    #[must_use]
    pub fn default_catalog() -> &'static Self {
        static CATALOG: OnceLock<PassageCatalog> = OnceLock::new();
        CATALOG.get_or_init(Self::load_from_static)
    }

    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into a passage catalog.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PassageState {
    pub unlocked: bool,
    pub discovered_at: Option<DateTime<Utc>>,
    pub usage_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassageStats {
    pub total_passages: usize,
    pub discovered_passages: usize,
    pub total_usage: u32,
    pub most_used_passage: Option<String>,
    pub max_usage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassageEvent {
    Discovered {
        passage_id: String,
        from: String,
        to: String,
        method: DiscoveryMethod,
    },
    Used {
        passage_id: String,
        from: String,
        to: String,
        usage_count: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassageEventKind {
    Discovered,
    Used,
}

impl PassageEventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "passage-discovered",
            Self::Used => "passage-used",
        }
    }
}

impl BusEvent for PassageEvent {
    type Kind = PassageEventKind;

    fn kind(&self) -> PassageEventKind {
        match self {
            Self::Discovered { .. } => PassageEventKind::Discovered,
            Self::Used { .. } => PassageEventKind::Used,
        }
    }
}

pub struct SecretPassageDiscovery {
    passages: Vec<SecretPassage>,
    states: BTreeMap<String, PassageState>,
    store: Rc<dyn ProgressStore>,
    clock: Rc<dyn Clock>,
    events: EventBus<PassageEvent>,
}

impl SecretPassageDiscovery {
    #[must_use]
    pub fn new(
        catalog: &PassageCatalog,
        store: Rc<dyn ProgressStore>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        let mut discovery = Self {
            passages: catalog.passages.clone(),
            states: BTreeMap::new(),
            store,
            clock,
            events: EventBus::new(),
        };
        discovery.states = discovery.fresh_states();
        discovery
    }

    fn fresh_states(&self) -> BTreeMap<String, PassageState> {
        self.passages
            .iter()
            .map(|p| (p.id.clone(), PassageState::default()))
            .collect()
    }

    pub fn load(&mut self) -> bool {
        let entries = store::read_section(&*self.store, ROOM_PROGRESSION_KEY, PASSAGES_SECTION);
        if entries.is_empty() {
            return false;
        }
        self.states = self.fresh_states();
        let saved: BTreeMap<String, PassageState> = store::parse_entries(PASSAGES_SECTION, entries);
        for (id, state) in saved {
            if let Some(slot) = self.states.get_mut(&id) {
                *slot = state;
            } else {
                debug!("ignoring saved state for unknown passage {id}");
            }
        }
        true
    }

    #[must_use]
    pub fn passage(&self, passage_id: &str) -> Option<&SecretPassage> {
        self.passages.iter().find(|p| p.id == passage_id)
    }

    #[must_use]
    pub fn state(&self, passage_id: &str) -> Option<&PassageState> {
        self.states.get(passage_id)
    }

    #[must_use]
    pub fn is_discovered(&self, passage_id: &str) -> bool {
        self.states.get(passage_id).is_some_and(|s| s.unlocked)
    }

    /// Both endpoints are accessible and the source room has reached the
    /// passage's required level.
    #[must_use]
    pub fn check_requirements(&self, passage_id: &str, ctx: &StatusContext<'_>) -> bool {
        let Some(passage) = self.passage(passage_id) else {
            return false;
        };
        ctx.room_accessible(&passage.from)
            && ctx.room_accessible(&passage.to)
            && ctx
                .room_level(&passage.from)
                .is_some_and(|level| level >= passage.required_level)
    }

    pub fn discover_passage(&mut self, passage_id: &str, ctx: &StatusContext<'_>) -> bool {
        let Some(passage) = self.passage(passage_id) else {
            warn!("passage {passage_id} not found");
            return false;
        };
        if self.is_discovered(passage_id) {
            return false;
        }
        if !self.check_requirements(passage_id, ctx) {
            debug!("requirements not met for passage {passage_id}");
            return false;
        }
        let event = PassageEvent::Discovered {
            passage_id: passage.id.clone(),
            from: passage.from.clone(),
            to: passage.to.clone(),
            method: passage.discovery.method(),
        };
        let state = self.states.entry(passage_id.to_string()).or_default();
        state.unlocked = true;
        state.discovered_at = Some(self.clock.now());
        self.persist();
        self.events.emit(event);
        info!("secret passage discovered: {passage_id}");
        true
    }

    fn discover_where(
        &mut self,
        ctx: &StatusContext<'_>,
        rule: impl Fn(&SecretPassage) -> bool,
    ) -> Vec<String> {
        let candidates: Vec<String> = self
            .passages
            .iter()
            .filter(|&p| rule(p))
            .map(|p| p.id.clone())
            .collect();
        candidates
            .into_iter()
            .filter(|id| self.discover_passage(id, ctx))
            .collect()
    }

    pub fn handle_object_interaction(
        &mut self,
        room_id: &str,
        object: &str,
        action: &str,
        ctx: &StatusContext<'_>,
    ) -> Vec<String> {
        self.discover_where(ctx, |p| {
            p.from == room_id
                && matches!(&p.discovery, Discovery::ObjectInteraction { object: o, action: a }
                    if o == object && a == action)
        })
    }

    /// Spell text must match the passage's spell exactly.
    pub fn handle_spell_cast(
        &mut self,
        room_id: &str,
        spell: &str,
        ctx: &StatusContext<'_>,
    ) -> Vec<String> {
        self.discover_where(ctx, |p| {
            p.from == room_id
                && matches!(&p.discovery, Discovery::SpellCast { spell: s } if s == spell)
        })
    }

    pub fn handle_room_mastery(
        &mut self,
        room_id: &str,
        mastery_points: u32,
        ctx: &StatusContext<'_>,
    ) -> Vec<String> {
        self.discover_where(ctx, |p| {
            p.from == room_id
                && matches!(&p.discovery, Discovery::RoomMastery { required_mastery }
                    if mastery_points >= *required_mastery)
        })
    }

    /// Matches wherever the player is standing; only the passage requirements gate discovery.
    pub fn handle_quest_completion(
        &mut self,
        quest_id: &str,
        ctx: &StatusContext<'_>,
    ) -> Vec<String> {
        self.discover_where(ctx, |p| {
            matches!(&p.discovery, Discovery::QuestCompletion { quest } if quest == quest_id)
        })
    }

    /// Matches wherever the player is standing; only the passage requirements gate discovery.
    pub fn handle_achievement(
        &mut self,
        achievement_id: &str,
        ctx: &StatusContext<'_>,
    ) -> Vec<String> {
        self.discover_where(ctx, |p| {
            matches!(&p.discovery, Discovery::Achievement { achievement } if achievement == achievement_id)
        })
    }

    /// Re-evaluate quest and achievement rules against current state.
    ///
    /// Those rules fire once, when the quest or achievement completes; if the
    /// rooms were not ready then, this picks the passage up once they are.
    pub fn check_standing_discoveries(&mut self, ctx: &StatusContext<'_>) -> Vec<String> {
        self.discover_where(ctx, |p| match &p.discovery {
            Discovery::QuestCompletion { quest } => ctx.quest_completed(quest),
            Discovery::Achievement { achievement } => ctx.achievement_completed(achievement),
            _ => false,
        })
    }

    pub fn use_passage(&mut self, passage_id: &str) -> bool {
        let Some(passage) = self.passage(passage_id) else {
            warn!("passage {passage_id} not found");
            return false;
        };
        let (from, to) = (passage.from.clone(), passage.to.clone());
        let Some(state) = self.states.get_mut(passage_id).filter(|s| s.unlocked) else {
            debug!("passage {passage_id} is not discovered");
            return false;
        };
        state.usage_count = state.usage_count.saturating_add(1);
        let usage_count = state.usage_count;
        self.persist();
        self.events.emit(PassageEvent::Used {
            passage_id: passage_id.to_string(),
            from,
            to,
            usage_count,
        });
        true
    }

    #[must_use]
    pub fn discovered_passages(&self) -> Vec<&SecretPassage> {
        self.passages
            .iter()
            .filter(|p| self.is_discovered(&p.id))
            .collect()
    }

    #[must_use]
    pub fn passages_from(&self, room_id: &str) -> Vec<&SecretPassage> {
        self.passages.iter().filter(|p| p.from == room_id).collect()
    }

    #[must_use]
    pub fn passages_to(&self, room_id: &str) -> Vec<&SecretPassage> {
        self.passages.iter().filter(|p| p.to == room_id).collect()
    }

    pub fn passages(&self) -> impl Iterator<Item = &SecretPassage> {
        self.passages.iter()
    }

    #[must_use]
    pub fn passage_stats(&self) -> PassageStats {
        let mut stats = PassageStats {
            total_passages: self.passages.len(),
            ..PassageStats::default()
        };
        for passage in &self.passages {
            let Some(state) = self.states.get(&passage.id) else {
                continue;
            };
            if state.unlocked {
                stats.discovered_passages += 1;
            }
            stats.total_usage = stats.total_usage.saturating_add(state.usage_count);
            if state.usage_count > stats.max_usage {
                stats.max_usage = state.usage_count;
                stats.most_used_passage = Some(passage.id.clone());
            }
        }
        stats
    }

    pub fn reset(&mut self) {
        self.states = self.fresh_states();
        self.persist();
        info!("secret passages reset");
    }

    #[must_use]
    pub const fn events(&self) -> &EventBus<PassageEvent> {
        &self.events
    }

    pub const fn events_mut(&mut self) -> &mut EventBus<PassageEvent> {
        &mut self.events
    }

    pub fn drain_events(&mut self) -> Vec<PassageEvent> {
        self.events.drain()
    }

    fn persist(&self) {
        store::write_section(
            &*self.store,
            ROOM_PROGRESSION_KEY,
            PASSAGES_SECTION,
            &self.states,
        );
    }
}

impl fmt::Debug for SecretPassageDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let discovered: Vec<&str> = self
            .states
            .iter()
            .filter(|(_, s)| s.unlocked)
            .map(|(id, _)| id.as_str())
            .collect();
        f.debug_struct("SecretPassageDiscovery")
            .field("passages", &self.passages.len())
            .field("discovered", &discovered)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::context::RoomStatusProvider;
    use crate::store::MemoryStore;
    use std::collections::{BTreeSet, HashMap};

    #[derive(Default)]
    struct Levels(HashMap<String, (AccessLevel, u32)>);

    impl Levels {
        fn set(mut self, room: &str, level: AccessLevel) -> Self {
            self.0.insert(room.to_string(), (level, 0));
            self
        }
    }

    impl RoomStatusProvider for Levels {
        fn access_level(&self, room_id: &str) -> AccessLevel {
            self.0.get(room_id).map_or(AccessLevel::Locked, |(l, _)| *l)
        }

        fn mastery_points(&self, room_id: &str) -> u32 {
            self.0.get(room_id).map_or(0, |(_, p)| *p)
        }
    }

    fn discovery(store: &MemoryStore) -> SecretPassageDiscovery {
        SecretPassageDiscovery::new(
            PassageCatalog::default_catalog(),
            Rc::new(store.clone()),
            Rc::new(ManualClock::default()),
        )
    }

    #[test]
    fn object_interaction_must_match_room_object_and_action() {
        let mut passages = discovery(&MemoryStore::new());
        let rooms = Levels::default()
            .set("living-room", AccessLevel::Explored)
            .set("kitchen", AccessLevel::Unlocked);
        let ctx = StatusContext::empty().with_rooms(&rooms);

        assert!(passages.handle_object_interaction("living-room", "fireplace", "examine", &ctx).is_empty());
        assert!(passages.handle_object_interaction("living-room", "lamp", "ignite", &ctx).is_empty());
        assert!(passages.handle_object_interaction("kitchen", "fireplace", "ignite", &ctx).is_empty());
        assert!(!passages.is_discovered("living-room-to-kitchen"));

        assert_eq!(
            passages.handle_object_interaction("living-room", "fireplace", "ignite", &ctx),
            vec!["living-room-to-kitchen".to_string()]
        );
        assert!(passages.is_discovered("living-room-to-kitchen"));
        assert!(passages.handle_object_interaction("living-room", "fireplace", "ignite", &ctx).is_empty());
    }

    #[test]
    fn required_level_gates_discovery() {
        let mut passages = discovery(&MemoryStore::new());
        let rooms = Levels::default()
            .set("kitchen", AccessLevel::Unlocked)
            .set("workshop", AccessLevel::Unlocked);
        let ctx = StatusContext::empty().with_rooms(&rooms);
        assert!(passages.handle_spell_cast("kitchen", "brew potion", &ctx).is_empty());

        let rooms = rooms.set("kitchen", AccessLevel::Explored);
        let ctx = StatusContext::empty().with_rooms(&rooms);
        assert!(passages.handle_spell_cast("kitchen", "Brew Potion", &ctx).is_empty());
        assert_eq!(passages.handle_spell_cast("kitchen", "brew potion", &ctx).len(), 1);
    }

    #[test]
    fn discovery_fails_closed_without_room_view() {
        let mut passages = discovery(&MemoryStore::new());
        assert!(!passages.discover_passage("living-room-to-kitchen", &StatusContext::empty()));
        assert!(!passages.discover_passage("nowhere", &StatusContext::empty()));
    }

    #[test]
    fn mastery_and_completion_rules() {
        let mut passages = discovery(&MemoryStore::new());
        let rooms = Levels::default()
            .set("bedroom", AccessLevel::Mastered)
            .set("library", AccessLevel::Mastered)
            .set("workshop", AccessLevel::Mastered)
            .set("garden", AccessLevel::Unlocked);
        let ctx = StatusContext::empty().with_rooms(&rooms);

        assert!(passages.handle_room_mastery("bedroom", 49, &ctx).is_empty());
        assert_eq!(passages.handle_room_mastery("bedroom", 50, &ctx), vec!["bedroom-to-library".to_string()]);
        assert_eq!(
            passages.handle_quest_completion("credentials-recovery", &ctx),
            vec!["library-to-garden".to_string()]
        );

        let achievements: BTreeSet<String> = ["room-explorer".to_string()].into_iter().collect();
        let ctx = ctx.with_achievements(&achievements);
        assert_eq!(passages.check_standing_discoveries(&ctx), vec!["workshop-to-garden".to_string()]);
    }

    #[test]
    fn use_requires_discovery_and_counts_usage() {
        let store = MemoryStore::new();
        let mut passages = discovery(&store);
        assert!(!passages.use_passage("living-room-to-kitchen"));

        let rooms = Levels::default()
            .set("living-room", AccessLevel::Unlocked)
            .set("kitchen", AccessLevel::Unlocked);
        let ctx = StatusContext::empty().with_rooms(&rooms);
        assert!(passages.discover_passage("living-room-to-kitchen", &ctx));
        assert!(passages.use_passage("living-room-to-kitchen"));
        assert!(passages.use_passage("living-room-to-kitchen"));

        let stats = passages.passage_stats();
        assert_eq!(stats.discovered_passages, 1);
        assert_eq!(stats.total_usage, 2);
        assert_eq!(stats.most_used_passage.as_deref(), Some("living-room-to-kitchen"));

        let mut restored = discovery(&store);
        assert!(restored.load());
        assert_eq!(restored.state("living-room-to-kitchen").unwrap().usage_count, 2);
    }

    #[test]
    fn passage_endpoints_are_navigable_both_ways() {
        let passages = discovery(&MemoryStore::new());
        let passage = passages.passage("kitchen-to-workshop").unwrap();
        assert_eq!(passage.other_end("kitchen"), Some("workshop"));
        assert_eq!(passage.other_end("workshop"), Some("kitchen"));
        assert_eq!(passage.other_end("garden"), None);
        assert_eq!(passages.passages_to("garden").len(), 2);
    }
}
