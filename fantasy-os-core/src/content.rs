//! The full set of content catalogs and their cross-reference checks.
use std::collections::HashSet;

use crate::achievements::AchievementCatalog;
use crate::error::ContentError;
use crate::passages::PassageCatalog;
use crate::quests::{QuestCatalog, Reward};
use crate::rooms::RoomCatalog;
use crate::upgrades::{ArtifactSource, UpgradeCatalog};

/// Everything a [`crate::FantasyWorld`] needs to run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentBundle {
    pub quests: QuestCatalog,
    pub achievements: AchievementCatalog,
    pub rooms: RoomCatalog,
    pub passages: PassageCatalog,
    pub upgrades: UpgradeCatalog,
}

impl ContentBundle {
    /// The embedded catalogs. An asset that fails to parse comes back empty.
    #[must_use]
    pub fn load_from_static() -> Self {
        Self {
            quests: QuestCatalog::default_catalog().clone(),
            achievements: AchievementCatalog::default_catalog().clone(),
            rooms: RoomCatalog::default_catalog().clone(),
            passages: PassageCatalog::default_catalog().clone(),
            upgrades: UpgradeCatalog::default_catalog().clone(),
        }
    }

    /// Parse the embedded catalogs, reporting the first asset that fails.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Parse`] naming the broken asset.
    pub fn try_load_static() -> Result<Self, ContentError> {
        fn parse<T>(
            asset: &'static str,
            json: &str,
            from_json: fn(&str) -> Result<T, serde_json::Error>,
        ) -> Result<T, ContentError> {
            from_json(json).map_err(|source| ContentError::Parse { asset, source })
        }

        Ok(Self {
            quests: parse(
                "quests",
                include_str!("../assets/data/quests.json"),
                QuestCatalog::from_json,
            )?,
            achievements: parse(
                "achievements",
                include_str!("../assets/data/achievements.json"),
                AchievementCatalog::from_json,
            )?,
            rooms: parse(
                "rooms",
                include_str!("../assets/data/rooms.json"),
                RoomCatalog::from_json,
            )?,
            passages: parse(
                "passages",
                include_str!("../assets/data/passages.json"),
                PassageCatalog::from_json,
            )?,
            upgrades: parse(
                "upgrades",
                include_str!("../assets/data/upgrades.json"),
                UpgradeCatalog::from_json,
            )?,
        })
    }

    /// Check ids are unique and every cross reference resolves.
    ///
    /// # Errors
    ///
    /// Returns the first [`ContentError::Duplicate`] or
    /// [`ContentError::DanglingReference`] found.
    pub fn validate(&self) -> Result<(), ContentError> {
        let quests = unique_ids("quest", self.quests.quests.iter().map(|q| q.id.as_str()))?;
        let achievements = unique_ids(
            "achievement",
            self.achievements.achievements.iter().map(|a| a.id.as_str()),
        )?;
        let rooms = unique_ids("room", self.rooms.rooms.iter().map(|r| r.id.as_str()))?;
        unique_ids(
            "passage",
            self.passages.passages.iter().map(|p| p.id.as_str()),
        )?;
        let artifacts = unique_ids(
            "artifact",
            self.upgrades.artifacts.iter().map(|a| a.id.as_str()),
        )?;

        for quest in &self.quests.quests {
            for dependency in &quest.dependencies {
                check_ref("quest", &quest.id, "quest", dependency, &quests)?;
            }
            if let Some(room) = &quest.room {
                check_ref("quest", &quest.id, "room", room, &rooms)?;
            }
            for step in &quest.steps {
                if let Some(room) = &step.room {
                    check_ref("quest step", &step.id, "room", room, &rooms)?;
                }
            }
            for reward in &quest.rewards {
                if let Reward::UnlockRoom(room) = Reward::from_id(reward) {
                    check_ref("quest", &quest.id, "room", &room, &rooms)?;
                }
            }
        }

        for room in &self.rooms.rooms {
            for quest in &room.required_quests {
                check_ref("room", &room.id, "quest", quest, &quests)?;
            }
            for achievement in &room.required_achievements {
                check_ref("room", &room.id, "achievement", achievement, &achievements)?;
            }
            for required in &room.required_rooms {
                check_ref("room", &room.id, "room", required, &rooms)?;
            }
        }

        for passage in &self.passages.passages {
            check_ref("passage", &passage.id, "room", &passage.from, &rooms)?;
            check_ref("passage", &passage.id, "room", &passage.to, &rooms)?;
        }

        for upgrade in &self.upgrades.upgrades {
            check_ref("upgrade", &upgrade.id, "room", &upgrade.room_id, &rooms)?;
            for artifact in &upgrade.requirements.artifacts {
                check_ref("upgrade", &upgrade.id, "artifact", artifact, &artifacts)?;
            }
        }

        for artifact in &self.upgrades.artifacts {
            let (target, reference, known) = match &artifact.source {
                ArtifactSource::QuestReward { quest } => ("quest", quest, &quests),
                ArtifactSource::AchievementReward { achievement } => {
                    ("achievement", achievement, &achievements)
                }
                ArtifactSource::RoomDiscovery { room } => ("room", room, &rooms),
            };
            check_ref("artifact", &artifact.id, target, reference, known)?;
        }

        Ok(())
    }
}

fn unique_ids<'a>(
    kind: &'static str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<HashSet<&'a str>, ContentError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ContentError::Duplicate {
                kind,
                id: id.to_string(),
            });
        }
    }
    Ok(seen)
}

fn check_ref(
    kind: &'static str,
    id: &str,
    target: &'static str,
    reference: &str,
    known: &HashSet<&str>,
) -> Result<(), ContentError> {
    if known.contains(reference) {
        Ok(())
    } else {
        Err(ContentError::DanglingReference {
            kind,
            id: id.to_string(),
            target,
            reference: reference.to_string(),
        })
    }
}

/// Source of content for a platform.
pub trait ContentLoader {
    type Error: std::error::Error + Send + Sync + 'static;

    /// # Errors
    ///
    /// Returns an error if the content cannot be loaded or is inconsistent.
    fn load_content(&self) -> Result<ContentBundle, Self::Error>;
}

/// Loads the catalogs compiled into the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticContent;

impl ContentLoader for StaticContent {
    type Error = ContentError;

    fn load_content(&self) -> Result<ContentBundle, ContentError> {
        let bundle = ContentBundle::try_load_static()?;
        bundle.validate()?;
        Ok(bundle)
    }
}
