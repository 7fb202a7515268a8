//! Fantasy OS Progression Engine
//!
//! Platform-agnostic quest, achievement and room progression for the Fantasy OS
//! house. This crate holds the engines and their content without any UI or
//! platform-specific dependencies; platforms supply a [`ProgressStore`].

pub mod achievements;
pub mod clock;
pub mod content;
pub mod context;
pub mod error;
pub mod events;
pub mod passages;
pub mod quests;
pub mod rooms;
pub mod store;
pub mod upgrades;
pub mod world;

// Re-export commonly used types
pub use achievements::{
    Achievement, AchievementCatalog, AchievementCount, AchievementEvent, AchievementEventKind,
    AchievementKind, AchievementProgress, AchievementTracker, ProgressPayload,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use content::{ContentBundle, ContentLoader, StaticContent};
pub use context::{
    AchievementStatusProvider, QuestStatusProvider, RoomStatusProvider, StatusContext,
};
pub use error::{ContentError, InvalidAccessLevel, StorageError};
pub use events::{BusEvent, EventBus, HandlerId};
pub use passages::{
    Discovery, DiscoveryMethod, PassageCatalog, PassageEvent, PassageEventKind, PassageState,
    PassageStats, SecretPassage, SecretPassageDiscovery,
};
pub use quests::{
    ActiveQuest, Quest, QuestCatalog, QuestEngine, QuestEvent, QuestEventKind, QuestKind,
    QuestProgress, QuestStatus, QuestStep, Reward, TagSet,
};
pub use rooms::{
    AccessLevel, MissingRequirements, ProgressionStats, RoomCatalog, RoomDefinition, RoomEvent,
    RoomEventKind, RoomProgress, RoomProgressionEngine, RoomStatus, UnlockAttempt, UnlockKind,
};
pub use store::{MemoryStore, ProgressStore};
pub use upgrades::{
    Artifact, ArtifactSource, Rarity, RoomUpgrade, RoomUpgradeEngine, UpgradeCatalog,
    UpgradeEvent, UpgradeEventKind, UpgradeRequirements, UpgradeState, UpgradeStats,
    has_artifact,
};
pub use world::{FantasyWorld, WorldEvent};
