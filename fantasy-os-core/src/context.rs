//! Read-only views of other engines, handed to an engine per call.
//!
//! An engine never reaches into another engine's state. Instead the caller
//! builds a [`StatusContext`] from whichever collaborators it has; any view
//! that is absent answers "not satisfied".
use std::collections::{BTreeSet, HashSet};

use crate::rooms::AccessLevel;

pub trait QuestStatusProvider {
    fn is_quest_completed(&self, quest_id: &str) -> bool;
}

pub trait AchievementStatusProvider {
    fn is_achievement_completed(&self, achievement_id: &str) -> bool;
}

pub trait RoomStatusProvider {
    /// Current level of `room_id`; unknown rooms read as `Locked`.
    fn access_level(&self, room_id: &str) -> AccessLevel;

    fn mastery_points(&self, room_id: &str) -> u32;

    fn is_room_accessible(&self, room_id: &str) -> bool {
        self.access_level(room_id) >= AccessLevel::Unlocked
    }
}

macro_rules! impl_completion_set {
    ($trait:ident, $method:ident, $($set:ty),+) => {
        $(impl $trait for $set {
            fn $method(&self, id: &str) -> bool {
                self.contains(id)
            }
        })+
    };
}

impl_completion_set!(
    QuestStatusProvider,
    is_quest_completed,
    HashSet<String>,
    BTreeSet<String>
);
impl_completion_set!(
    AchievementStatusProvider,
    is_achievement_completed,
    HashSet<String>,
    BTreeSet<String>
);

#[derive(Clone, Copy, Default)]
pub struct StatusContext<'a> {
    pub quests: Option<&'a dyn QuestStatusProvider>,
    pub achievements: Option<&'a dyn AchievementStatusProvider>,
    pub rooms: Option<&'a dyn RoomStatusProvider>,
}

impl<'a> StatusContext<'a> {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            quests: None,
            achievements: None,
            rooms: None,
        }
    }

    #[must_use]
    pub fn with_quests(mut self, quests: &'a dyn QuestStatusProvider) -> Self {
        self.quests = Some(quests);
        self
    }

    #[must_use]
    pub fn with_achievements(
        mut self,
        achievements: &'a dyn AchievementStatusProvider,
    ) -> Self {
        self.achievements = Some(achievements);
        self
    }

    #[must_use]
    pub fn with_rooms(mut self, rooms: &'a dyn RoomStatusProvider) -> Self {
        self.rooms = Some(rooms);
        self
    }

    #[must_use]
    pub fn quest_completed(&self, quest_id: &str) -> bool {
        self.quests.is_some_and(|q| q.is_quest_completed(quest_id))
    }

    #[must_use]
    pub fn achievement_completed(&self, achievement_id: &str) -> bool {
        self.achievements
            .is_some_and(|a| a.is_achievement_completed(achievement_id))
    }

    #[must_use]
    pub fn room_level(&self, room_id: &str) -> Option<AccessLevel> {
        self.rooms.map(|r| r.access_level(room_id))
    }

    #[must_use]
    pub fn room_accessible(&self, room_id: &str) -> bool {
        self.rooms.is_some_and(|r| r.is_room_accessible(room_id))
    }

    #[must_use]
    pub fn mastery_points(&self, room_id: &str) -> Option<u32> {
        self.rooms.map(|r| r.mastery_points(room_id))
    }
}

impl std::fmt::Debug for StatusContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusContext")
            .field("quests", &self.quests.is_some())
            .field("achievements", &self.achievements.is_some())
            .field("rooms", &self.rooms.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_views_fail_closed() {
        let ctx = StatusContext::empty();
        assert!(!ctx.quest_completed("credentials-recovery"));
        assert!(!ctx.achievement_completed("first-quest"));
        assert!(!ctx.room_accessible("living-room"));
        assert_eq!(ctx.mastery_points("living-room"), None);
    }

    #[test]
    fn completion_sets_act_as_providers() {
        let quests: BTreeSet<String> = ["q1".to_string()].into_iter().collect();
        let achievements: HashSet<String> = HashSet::new();
        let ctx = StatusContext::empty()
            .with_quests(&quests)
            .with_achievements(&achievements);
        assert!(ctx.quest_completed("q1"));
        assert!(!ctx.quest_completed("q2"));
        assert!(!ctx.achievement_completed("a1"));
    }
}
