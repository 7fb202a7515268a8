//! Per-room upgrades gated on mastery points and artifacts.
//!
//! Artifacts are never stored. Whether the player holds one is recomputed from
//! quest, achievement and room state on every query, see [`has_artifact`].
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use crate::context::StatusContext;
use crate::events::{BusEvent, EventBus};
use crate::rooms::AccessLevel;
use crate::store::{self, ProgressStore, ROOM_PROGRESSION_KEY, UPGRADES_SECTION};

const DEFAULT_UPGRADE_DATA: &str = include_str!("../assets/data/upgrades.json");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    #[default]
    Common,
    Uncommon,
    Rare,
    Legendary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ArtifactSource {
    QuestReward { quest: String },
    AchievementReward { achievement: String },
    /// Held once the room has been explored.
    RoomDiscovery { room: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rarity: Rarity,
    pub source: ArtifactSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpgradeRequirements {
    pub mastery_points: u32,
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpgrade {
    pub id: String,
    pub room_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Display only; unlocking never spends anything.
    #[serde(default)]
    pub cost: u32,
    #[serde(default)]
    pub requirements: UpgradeRequirements,
    #[serde(default)]
    pub effects: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpgradeCatalog {
    #[serde(default)]
    pub upgrades: Vec<RoomUpgrade>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl UpgradeCatalog {
    #[must_use]
    pub fn load_from_static() -> Self {
        serde_json::from_str(DEFAULT_UPGRADE_DATA).unwrap_or_default()
    }

    #[must_use]
    pub fn default_catalog() -> &'static Self {
        static CATALOG: OnceLock<UpgradeCatalog> = OnceLock::new();
        CATALOG.get_or_init(Self::load_from_static)
    }

    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into an upgrade catalog.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn upgrade(&self, room_id: &str, upgrade_id: &str) -> Option<&RoomUpgrade> {
        self.upgrades
            .iter()
            .find(|u| u.room_id == room_id && u.id == upgrade_id)
    }

    #[must_use]
    pub fn artifact(&self, artifact_id: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.id == artifact_id)
    }
}

/// Whether the player currently holds `artifact_id`.
///
/// Unknown artifacts are never held, and a source whose view is missing from
/// `ctx` does not count.
#[must_use]
pub fn has_artifact(artifacts: &[Artifact], artifact_id: &str, ctx: &StatusContext<'_>) -> bool {
    let Some(artifact) = artifacts.iter().find(|a| a.id == artifact_id) else {
        return false;
    };
    match &artifact.source {
        ArtifactSource::QuestReward { quest } => ctx.quest_completed(quest),
        ArtifactSource::AchievementReward { achievement } => ctx.achievement_completed(achievement),
        ArtifactSource::RoomDiscovery { room } => ctx
            .room_level(room)
            .is_some_and(|level| level >= AccessLevel::Explored),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeState {
    pub unlocked: bool,
    pub applied: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeStats {
    pub total_upgrades: usize,
    pub unlocked_upgrades: usize,
    pub applied_upgrades: usize,
    pub total_artifacts: usize,
    pub available_artifacts: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpgradeEvent {
    Unlocked {
        room_id: String,
        upgrade_id: String,
    },
    Applied {
        room_id: String,
        upgrade_id: String,
        effects: Map<String, Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpgradeEventKind {
    Unlocked,
    Applied,
}

impl UpgradeEventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unlocked => "upgrade-unlocked",
            Self::Applied => "upgrade-applied",
        }
    }
}

impl BusEvent for UpgradeEvent {
    type Kind = UpgradeEventKind;

    fn kind(&self) -> UpgradeEventKind {
        match self {
            Self::Unlocked { .. } => UpgradeEventKind::Unlocked,
            Self::Applied { .. } => UpgradeEventKind::Applied,
        }
    }
}

type RoomStates = BTreeMap<String, BTreeMap<String, UpgradeState>>;

pub struct RoomUpgradeEngine {
    catalog: UpgradeCatalog,
    states: RoomStates,
    customizations: BTreeMap<String, Map<String, Value>>,
    store: Rc<dyn ProgressStore>,
    events: EventBus<UpgradeEvent>,
}

impl RoomUpgradeEngine {
    #[must_use]
    pub fn new(catalog: &UpgradeCatalog, store: Rc<dyn ProgressStore>) -> Self {
        let mut engine = Self {
            catalog: catalog.clone(),
            states: RoomStates::new(),
            customizations: BTreeMap::new(),
            store,
            events: EventBus::new(),
        };
        engine.states = engine.fresh_states();
        engine
    }

    fn fresh_states(&self) -> RoomStates {
        let mut states = RoomStates::new();
        for upgrade in &self.catalog.upgrades {
            states
                .entry(upgrade.room_id.clone())
                .or_default()
                .insert(upgrade.id.clone(), UpgradeState::default());
        }
        states
    }

    /// Restore flags and replay applied effects into the customization map.
    pub fn load(&mut self) -> bool {
        let entries = store::read_section(&*self.store, ROOM_PROGRESSION_KEY, UPGRADES_SECTION);
        if entries.is_empty() {
            return false;
        }
        self.states = self.fresh_states();
        self.customizations.clear();
        let saved: RoomStates = store::parse_entries(UPGRADES_SECTION, entries);
        for (room_id, upgrades) in saved {
            let Some(room) = self.states.get_mut(&room_id) else {
                debug!("ignoring saved upgrades for unknown room {room_id}");
                continue;
            };
            for (upgrade_id, state) in upgrades {
                match room.get_mut(&upgrade_id) {
                    Some(slot) => *slot = state,
                    None => debug!("ignoring saved state for unknown upgrade {room_id}/{upgrade_id}"),
                }
            }
        }
        for upgrade in &self.catalog.upgrades {
            if self.state(&upgrade.room_id, &upgrade.id).applied {
                self.customizations
                    .entry(upgrade.room_id.clone())
                    .or_default()
                    .extend(upgrade.effects.clone());
            }
        }
        true
    }

    #[must_use]
    pub fn upgrade(&self, room_id: &str, upgrade_id: &str) -> Option<&RoomUpgrade> {
        self.catalog.upgrade(room_id, upgrade_id)
    }

    #[must_use]
    pub fn state(&self, room_id: &str, upgrade_id: &str) -> UpgradeState {
        self.states
            .get(room_id)
            .and_then(|room| room.get(upgrade_id))
            .copied()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_artifact(&self, artifact_id: &str, ctx: &StatusContext<'_>) -> bool {
        has_artifact(&self.catalog.artifacts, artifact_id, ctx)
    }

    /// Not yet unlocked, the room has enough mastery points, and every
    /// required artifact is held.
    #[must_use]
    pub fn can_unlock_upgrade(&self, room_id: &str, upgrade_id: &str, ctx: &StatusContext<'_>) -> bool {
        let Some(upgrade) = self.upgrade(room_id, upgrade_id) else {
            return false;
        };
        if self.state(room_id, upgrade_id).unlocked {
            return false;
        }
        let Some(points) = ctx.mastery_points(room_id) else {
            return false;
        };
        points >= upgrade.requirements.mastery_points
            && upgrade
                .requirements
                .artifacts
                .iter()
                .all(|artifact| self.has_artifact(artifact, ctx))
    }

    pub fn unlock_upgrade(&mut self, room_id: &str, upgrade_id: &str, ctx: &StatusContext<'_>) -> bool {
        if !self.can_unlock_upgrade(room_id, upgrade_id, ctx) {
            debug!("cannot unlock upgrade {upgrade_id} for room {room_id}");
            return false;
        }
        self.slot(room_id, upgrade_id).unlocked = true;
        self.persist();
        self.events.emit(UpgradeEvent::Unlocked {
            room_id: room_id.to_string(),
            upgrade_id: upgrade_id.to_string(),
        });
        info!("upgrade unlocked: {upgrade_id} for {room_id}");
        true
    }

    /// Second phase: requires an unlocked, not yet applied upgrade.
    pub fn apply_upgrade(&mut self, room_id: &str, upgrade_id: &str) -> bool {
        let Some(effects) = self.upgrade(room_id, upgrade_id).map(|u| u.effects.clone()) else {
            warn!("upgrade {upgrade_id} not found for room {room_id}");
            return false;
        };
        let state = self.state(room_id, upgrade_id);
        if !state.unlocked || state.applied {
            warn!("cannot apply upgrade {upgrade_id} for room {room_id}");
            return false;
        }
        self.slot(room_id, upgrade_id).applied = true;
        self.customizations
            .entry(room_id.to_string())
            .or_default()
            .extend(effects.clone());
        self.persist();
        self.events.emit(UpgradeEvent::Applied {
            room_id: room_id.to_string(),
            upgrade_id: upgrade_id.to_string(),
            effects,
        });
        info!("upgrade applied: {upgrade_id} to {room_id}");
        true
    }

    fn slot(&mut self, room_id: &str, upgrade_id: &str) -> &mut UpgradeState {
        self.states
            .entry(room_id.to_string())
            .or_default()
            .entry(upgrade_id.to_string())
            .or_default()
    }

    /// Unlock every upgrade that has become eligible. Returns `(room, upgrade)` pairs.
    pub fn check_auto_unlock_upgrades(&mut self, ctx: &StatusContext<'_>) -> Vec<(String, String)> {
        let eligible: Vec<(String, String)> = self
            .catalog
            .upgrades
            .iter()
            .filter(|u| self.can_unlock_upgrade(&u.room_id, &u.id, ctx))
            .map(|u| (u.room_id.clone(), u.id.clone()))
            .collect();
        eligible
            .into_iter()
            .filter(|(room, upgrade)| self.unlock_upgrade(room, upgrade, ctx))
            .collect()
    }

    #[must_use]
    pub fn upgrades_for(&self, room_id: &str) -> Vec<&RoomUpgrade> {
        self.catalog
            .upgrades
            .iter()
            .filter(|u| u.room_id == room_id)
            .collect()
    }

    /// Upgrades of `room_id` that could be unlocked right now.
    #[must_use]
    pub fn available_upgrades(&self, room_id: &str, ctx: &StatusContext<'_>) -> Vec<&RoomUpgrade> {
        self.upgrades_for(room_id)
            .into_iter()
            .filter(|u| self.can_unlock_upgrade(room_id, &u.id, ctx))
            .collect()
    }

    #[must_use]
    pub fn applied_upgrades(&self, room_id: &str) -> Vec<&RoomUpgrade> {
        self.upgrades_for(room_id)
            .into_iter()
            .filter(|u| self.state(room_id, &u.id).applied)
            .collect()
    }

    #[must_use]
    pub fn customizations(&self, room_id: &str) -> Option<&Map<String, Value>> {
        self.customizations.get(room_id)
    }

    #[must_use]
    pub fn artifacts(&self) -> &[Artifact] {
        &self.catalog.artifacts
    }

    #[must_use]
    pub fn upgrade_stats(&self, ctx: &StatusContext<'_>) -> UpgradeStats {
        let states = || self.states.values().flat_map(BTreeMap::values);
        UpgradeStats {
            total_upgrades: self.catalog.upgrades.len(),
            unlocked_upgrades: states().filter(|s| s.unlocked).count(),
            applied_upgrades: states().filter(|s| s.applied).count(),
            total_artifacts: self.catalog.artifacts.len(),
            available_artifacts: self
                .catalog
                .artifacts
                .iter()
                .filter(|a| self.has_artifact(&a.id, ctx))
                .count(),
        }
    }

    pub fn reset(&mut self) {
        self.states = self.fresh_states();
        self.customizations.clear();
        self.persist();
        info!("room upgrades reset");
    }

    #[must_use]
    pub const fn events(&self) -> &EventBus<UpgradeEvent> {
        &self.events
    }

    pub const fn events_mut(&mut self) -> &mut EventBus<UpgradeEvent> {
        &mut self.events
    }

    pub fn drain_events(&mut self) -> Vec<UpgradeEvent> {
        self.events.drain()
    }

    fn persist(&self) {
        store::write_section(
            &*self.store,
            ROOM_PROGRESSION_KEY,
            UPGRADES_SECTION,
            &self.states,
        );
    }
}

impl fmt::Debug for RoomUpgradeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomUpgradeEngine")
            .field("upgrades", &self.catalog.upgrades.len())
            .field("states", &self.states)
            .finish_non_exhaustive()
    }
}
