//! Quest definitions, step sequencing and reward dispatch.
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use crate::clock::Clock;
use crate::context::QuestStatusProvider;
use crate::events::{BusEvent, EventBus};
use crate::store::{self, ProgressStore, QUEST_STATE_KEY};

const DEFAULT_QUEST_DATA: &str = include_str!("../assets/data/quests.json");

/// Tags attached to a step: UI trigger names or unlock ids.
pub type TagSet = SmallVec<[String; 4]>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestKind {
    #[default]
    Main,
    Room,
    Side,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestStatus {
    #[default]
    Locked,
    Available,
    Active,
    Completed,
}

impl QuestStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Available => "available",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestStep {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, alias = "triggerTags")]
    pub triggers: TagSet,
    #[serde(default)]
    pub unlocks: TagSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quest {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: QuestKind,
    /// Room a side quest belongs to, if any.
    #[serde(default)]
    pub room: Option<String>,
    pub steps: Vec<QuestStep>,
    #[serde(default)]
    pub rewards: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: QuestStatus,
}

impl Quest {
    #[must_use]
    pub fn step(&self, step_id: &str) -> Option<&QuestStep> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    #[must_use]
    pub fn all_steps_completed(&self) -> bool {
        self.steps.iter().all(|step| step.completed)
    }
}

/// Static quest content.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuestCatalog {
    #[serde(default)]
    pub quests: Vec<Quest>,
}

impl QuestCatalog {
    #[must_use]
    pub fn load_from_static() -> Self {
        serde_json::from_str(DEFAULT_QUEST_DATA).unwrap_or_default()
    }

    #[must_use]
    pub fn default_catalog() -> &'static Self {
        static CATALOG: OnceLock<QuestCatalog> = OnceLock::new();
        CATALOG.get_or_init(Self::load_from_static)
    }

    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into a quest catalog.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Quest> {
        self.quests.iter().find(|quest| quest.id == id)
    }
}

/// A started quest together with its live step flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveQuest {
    #[serde(flatten)]
    pub quest: Quest,
    #[serde(default)]
    pub current_step: usize,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub progress: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestProgress {
    /// Every step id passed to a successful `update_progress`, repeats included.
    pub completed_steps: Vec<String>,
    pub current_step: usize,
    pub progress: f64,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A reward id decoded into the effect it asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reward {
    UnlockRoom(String),
    MagicLevel(u32),
    UnlockSpell(String),
    UnlockGesture(String),
    Other(String),
}

impl Reward {
    #[must_use]
    pub fn from_id(id: &str) -> Self {
        if let Some(spell) = id.strip_prefix("spell-unlock-") {
            Self::UnlockSpell(spell.to_string())
        } else if let Some(gesture) = id.strip_prefix("gesture-unlock-") {
            Self::UnlockGesture(gesture.to_string())
        } else if let Some(room) = id.strip_prefix("unlock-") {
            Self::UnlockRoom(room.to_string())
        } else if let Some(level) = id
            .strip_prefix("magic-level-")
            .and_then(|n| n.parse::<u32>().ok())
        {
            Self::MagicLevel(level)
        } else {
            Self::Other(id.to_string())
        }
    }
}

impl fmt::Display for Reward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnlockRoom(room) => write!(f, "unlock-{room}"),
            Self::MagicLevel(level) => write!(f, "magic-level-{level}"),
            Self::UnlockSpell(spell) => write!(f, "spell-unlock-{spell}"),
            Self::UnlockGesture(gesture) => write!(f, "gesture-unlock-{gesture}"),
            Self::Other(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuestEvent {
    Started {
        quest_id: String,
    },
    StepCompleted {
        quest_id: String,
        step_id: String,
        progress: f64,
    },
    StepUnlocked {
        quest_id: String,
        step_id: String,
        unlock: String,
    },
    Completed {
        quest_id: String,
        completed_at: DateTime<Utc>,
    },
    RewardGranted {
        quest_id: String,
        reward: Reward,
    },
    Available {
        quest_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestEventKind {
    Started,
    StepCompleted,
    StepUnlocked,
    Completed,
    RewardGranted,
    Available,
}

impl QuestEventKind {
    pub const ALL: &'static [Self] = &[
        Self::Started,
        Self::StepCompleted,
        Self::StepUnlocked,
        Self::Completed,
        Self::RewardGranted,
        Self::Available,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "quest-started",
            Self::StepCompleted => "quest-step-completed",
            Self::StepUnlocked => "quest-step-unlock",
            Self::Completed => "quest-completed",
            Self::RewardGranted => "quest-reward",
            Self::Available => "quest-available",
        }
    }
}

impl BusEvent for QuestEvent {
    type Kind = QuestEventKind;

    fn kind(&self) -> QuestEventKind {
        match self {
            Self::Started { .. } => QuestEventKind::Started,
            Self::StepCompleted { .. } => QuestEventKind::StepCompleted,
            Self::StepUnlocked { .. } => QuestEventKind::StepUnlocked,
            Self::Completed { .. } => QuestEventKind::Completed,
            Self::RewardGranted { .. } => QuestEventKind::RewardGranted,
            Self::Available { .. } => QuestEventKind::Available,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct QuestStateDocument {
    active_quests: Vec<(String, ActiveQuest)>,
    completed_quests: Vec<String>,
    quest_progress: Vec<(String, QuestProgress)>,
    timestamp: Option<DateTime<Utc>>,
}

pub struct QuestEngine {
    definitions: BTreeMap<String, Quest>,
    active: BTreeMap<String, ActiveQuest>,
    completed: Vec<String>,
    progress: BTreeMap<String, QuestProgress>,
    store: Rc<dyn ProgressStore>,
    clock: Rc<dyn Clock>,
    events: EventBus<QuestEvent>,
}

impl QuestEngine {
    /// Create an engine with fresh state. Call [`Self::load`] to restore a save.
    #[must_use]
    pub fn new(catalog: &QuestCatalog, store: Rc<dyn ProgressStore>, clock: Rc<dyn Clock>) -> Self {
        let definitions = catalog
            .quests
            .iter()
            .map(|quest| (quest.id.clone(), quest.clone()))
            .collect();
        Self {
            definitions,
            active: BTreeMap::new(),
            completed: Vec::new(),
            progress: BTreeMap::new(),
            store,
            clock,
            events: EventBus::new(),
        }
    }

    /// Restore persisted state. Returns `false` and keeps fresh state when no
    /// usable save exists.
    pub fn load(&mut self) -> bool {
        let Some(doc) = store::read_document::<QuestStateDocument>(&*self.store, QUEST_STATE_KEY)
        else {
            return false;
        };

        self.active.clear();
        self.completed.clear();
        self.progress.clear();

        for (id, record) in doc.quest_progress {
            if self.definitions.contains_key(&id) {
                self.progress.insert(id, record);
            }
        }
        for id in doc.completed_quests {
            if !self.definitions.contains_key(&id) {
                debug!("ignoring saved completion for unknown quest {id}");
            } else if !self.completed.contains(&id) {
                self.completed.push(id);
            }
        }
        for (id, saved) in doc.active_quests {
            if self.completed.contains(&id) {
                continue;
            }
            let Some(definition) = self.definitions.get(&id) else {
                warn!("ignoring saved active quest {id}: no longer defined");
                continue;
            };
            let recorded = self
                .progress
                .get(&id)
                .map(|p| p.completed_steps.as_slice())
                .unwrap_or_default();
            let mut quest = definition.clone();
            quest.status = QuestStatus::Active;
            for step in &mut quest.steps {
                step.completed = recorded.contains(&step.id)
                    || saved.quest.step(&step.id).is_some_and(|s| s.completed);
            }
            self.active.insert(
                id,
                ActiveQuest {
                    quest,
                    current_step: saved.current_step,
                    start_time: saved.start_time,
                    progress: saved.progress,
                },
            );
        }
        info!(
            "restored quest state: {} active, {} completed",
            self.active.len(),
            self.completed.len()
        );
        true
    }

    pub fn start_quest(&mut self, quest_id: &str) -> bool {
        let Some(definition) = self.definitions.get(quest_id) else {
            warn!("quest {quest_id} not found");
            return false;
        };
        if self.active.contains_key(quest_id) || self.is_quest_completed(quest_id) {
            debug!("quest {quest_id} already started");
            return false;
        }
        if !self.check_dependencies(quest_id) {
            debug!("quest {quest_id} dependencies not met");
            return false;
        }

        let mut quest = definition.clone();
        quest.status = QuestStatus::Active;
        for step in &mut quest.steps {
            step.completed = false;
        }
        self.active.insert(
            quest_id.to_string(),
            ActiveQuest {
                quest,
                current_step: 0,
                start_time: self.clock.now(),
                progress: 0.0,
            },
        );
        self.progress
            .insert(quest_id.to_string(), QuestProgress::default());
        self.persist();
        self.events.emit(QuestEvent::Started {
            quest_id: quest_id.to_string(),
        });
        info!("quest started: {quest_id}");
        true
    }

    /// Mark `step_id` of an active quest as done.
    ///
    /// Steps may be completed in any order. Repeating a step succeeds again
    /// and records it again in [`QuestProgress::completed_steps`]; completion
    /// is decided by the per-step flags.
    pub fn update_progress(&mut self, quest_id: &str, step_id: &str) -> bool {
        let Some(active) = self.active.get_mut(quest_id) else {
            debug!("quest {quest_id} is not active");
            return false;
        };
        let Some(index) = active.quest.steps.iter().position(|s| s.id == step_id) else {
            warn!("step {step_id} not found in quest {quest_id}");
            return false;
        };

        active.quest.steps[index].completed = true;
        let total = active.quest.steps.len();
        let unlocks = active.quest.steps[index].unlocks.clone();
        let finished = active.quest.all_steps_completed();

        let record = self.progress.entry(quest_id.to_string()).or_default();
        record.completed_steps.push(step_id.to_string());
        record.current_step = index + 1;
        record.progress = percent_of(record.completed_steps.len(), total);
        active.current_step = record.current_step;
        active.progress = record.progress;
        let progress = record.progress;

        for unlock in unlocks {
            info!("step {step_id} of {quest_id} unlocks {unlock}");
            self.events.emit(QuestEvent::StepUnlocked {
                quest_id: quest_id.to_string(),
                step_id: step_id.to_string(),
                unlock,
            });
        }

        if finished {
            self.complete_quest(quest_id);
        } else {
            self.persist();
            self.events.emit(QuestEvent::StepCompleted {
                quest_id: quest_id.to_string(),
                step_id: step_id.to_string(),
                progress,
            });
        }
        true
    }

    fn complete_quest(&mut self, quest_id: &str) {
        let Some(active) = self.active.remove(quest_id) else {
            return;
        };
        let now = self.clock.now();
        self.completed.push(quest_id.to_string());
        self.progress.entry(quest_id.to_string()).or_default().completed_at = Some(now);
        self.persist();

        self.events.emit(QuestEvent::Completed {
            quest_id: quest_id.to_string(),
            completed_at: now,
        });
        info!("quest completed: {quest_id}");

        for reward_id in &active.quest.rewards {
            let reward = Reward::from_id(reward_id);
            debug!("granting reward {reward} for {quest_id}");
            self.events.emit(QuestEvent::RewardGranted {
                quest_id: quest_id.to_string(),
                reward,
            });
        }

        let newly_available: Vec<String> = self
            .definitions
            .values()
            .filter(|quest| quest.dependencies.iter().any(|dep| dep == quest_id))
            .filter(|quest| self.is_startable(&quest.id))
            .map(|quest| quest.id.clone())
            .collect();
        for id in newly_available {
            info!("new quest available: {id}");
            self.events.emit(QuestEvent::Available { quest_id: id });
        }
    }

    /// True when every dependency of `quest_id` is completed.
    #[must_use]
    pub fn check_dependencies(&self, quest_id: &str) -> bool {
        self.definitions.get(quest_id).is_some_and(|quest| {
            quest
                .dependencies
                .iter()
                .all(|dep| self.is_quest_completed(dep))
        })
    }

    fn is_startable(&self, quest_id: &str) -> bool {
        !self.active.contains_key(quest_id)
            && !self.is_quest_completed(quest_id)
            && self.check_dependencies(quest_id)
    }

    #[must_use]
    pub fn is_quest_completed(&self, quest_id: &str) -> bool {
        self.completed.iter().any(|id| id == quest_id)
    }

    #[must_use]
    pub fn is_quest_active(&self, quest_id: &str) -> bool {
        self.active.contains_key(quest_id)
    }

    #[must_use]
    pub fn is_step_completed(&self, quest_id: &str, step_id: &str) -> bool {
        if let Some(active) = self.active.get(quest_id) {
            return active.quest.step(step_id).is_some_and(|s| s.completed);
        }
        self.is_quest_completed(quest_id)
            && self
                .definitions
                .get(quest_id)
                .is_some_and(|q| q.step(step_id).is_some())
    }

    /// True when each of `step_ids` is completed in `quest_id`.
    #[must_use]
    pub fn has_steps_completed(&self, quest_id: &str, step_ids: &[&str]) -> bool {
        step_ids
            .iter()
            .all(|step_id| self.is_step_completed(quest_id, step_id))
    }

    #[must_use]
    pub fn status(&self, quest_id: &str) -> Option<QuestStatus> {
        self.definitions.get(quest_id)?;
        Some(if self.is_quest_completed(quest_id) {
            QuestStatus::Completed
        } else if self.is_quest_active(quest_id) {
            QuestStatus::Active
        } else if self.check_dependencies(quest_id) {
            QuestStatus::Available
        } else {
            QuestStatus::Locked
        })
    }

    #[must_use]
    pub fn quest_info(&self, quest_id: &str) -> Option<&Quest> {
        self.active
            .get(quest_id)
            .map(|active| &active.quest)
            .or_else(|| self.definitions.get(quest_id))
    }

    #[must_use]
    pub fn active_quest(&self, quest_id: &str) -> Option<&ActiveQuest> {
        self.active.get(quest_id)
    }

    pub fn active_quests(&self) -> impl Iterator<Item = &ActiveQuest> {
        self.active.values()
    }

    /// Completed quest ids in completion order.
    #[must_use]
    pub fn completed_quests(&self) -> &[String] {
        &self.completed
    }

    #[must_use]
    pub fn quest_progress(&self, quest_id: &str) -> Option<&QuestProgress> {
        self.progress.get(quest_id)
    }

    /// Quests that `start_quest` would currently accept.
    #[must_use]
    pub fn available_quests(&self) -> Vec<&Quest> {
        self.definitions
            .values()
            .filter(|quest| self.is_startable(&quest.id))
            .collect()
    }

    /// `(quest, step)` pairs of incomplete active steps listening for `tag`.
    #[must_use]
    pub fn steps_triggered_by(&self, tag: &str) -> Vec<(String, String)> {
        self.active
            .values()
            .flat_map(|active| {
                active
                    .quest
                    .steps
                    .iter()
                    .filter(|step| !step.completed && step.triggers.iter().any(|t| t == tag))
                    .map(|step| (active.quest.id.clone(), step.id.clone()))
            })
            .collect()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Quest> {
        self.definitions.values()
    }

    /// Forget all progress and clear the saved slot.
    pub fn reset(&mut self) {
        self.active.clear();
        self.completed.clear();
        self.progress.clear();
        store::clear_document(&*self.store, QUEST_STATE_KEY);
        info!("quest state reset");
    }

    #[must_use]
    pub const fn events(&self) -> &EventBus<QuestEvent> {
        &self.events
    }

    pub const fn events_mut(&mut self) -> &mut EventBus<QuestEvent> {
        &mut self.events
    }

    pub fn drain_events(&mut self) -> Vec<QuestEvent> {
        self.events.drain()
    }

    fn persist(&self) {
        let doc = QuestStateDocument {
            active_quests: self
                .active
                .iter()
                .map(|(id, quest)| (id.clone(), quest.clone()))
                .collect(),
            completed_quests: self.completed.clone(),
            quest_progress: self
                .progress
                .iter()
                .map(|(id, record)| (id.clone(), record.clone()))
                .collect(),
            timestamp: Some(self.clock.now()),
        };
        store::write_document(&*self.store, QUEST_STATE_KEY, &doc);
    }
}

impl QuestStatusProvider for QuestEngine {
    fn is_quest_completed(&self, quest_id: &str) -> bool {
        QuestEngine::is_quest_completed(self, quest_id)
    }
}

impl fmt::Debug for QuestEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuestEngine")
            .field("definitions", &self.definitions.len())
            .field("active", &self.active.keys().collect::<Vec<_>>())
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent_of(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}
