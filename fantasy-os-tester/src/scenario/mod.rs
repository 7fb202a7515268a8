use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fantasy_os_core::{
    ContentBundle, ContentLoader, FantasyWorld, ManualClock, ProgressStore, StaticContent,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::rc::Rc;

pub mod catalog;
pub mod walkthrough;

/// Monday 2024-01-01 09:00 UTC; every scenario clock starts here.
const SESSION_START: i64 = 1_704_099_600;

pub type ScenarioFn = fn(&mut ScenarioCtx) -> Result<()>;

/// Everything one scenario iteration plays against.
pub struct ScenarioCtx {
    pub world: FantasyWorld,
    pub clock: ManualClock,
    pub store: Rc<dyn ProgressStore>,
    pub content: ContentBundle,
    pub rng: ChaCha20Rng,
    pub seed: u64,
    pub verbose: bool,
}

impl ScenarioCtx {
    /// Fresh world over `store`, with content loaded and validated.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled content is inconsistent.
    pub fn new(store: Rc<dyn ProgressStore>, seed: u64, verbose: bool) -> Result<Self> {
        let content = StaticContent
            .load_content()
            .context("loading bundled content")?;
        let start = DateTime::<Utc>::from_timestamp(SESSION_START, 0).unwrap_or_default();
        let clock = ManualClock::new(start);
        let world = FantasyWorld::new(&content, Rc::clone(&store), Rc::new(clock.clone()));
        Ok(Self {
            world,
            clock,
            store,
            content,
            rng: ChaCha20Rng::seed_from_u64(seed),
            seed,
            verbose,
        })
    }

    /// A second world over the same store and clock, restored from saves.
    pub fn reopen(&self) -> (FantasyWorld, bool) {
        let mut world = FantasyWorld::new(
            &self.content,
            Rc::clone(&self.store),
            Rc::new(self.clock.clone()),
        );
        let restored = world.load();
        (world, restored)
    }
}

#[derive(Debug, Clone)]
pub struct TestScenario {
    pub key: &'static str,
    pub name: &'static str,
    pub run: ScenarioFn,
}

impl TestScenario {
    #[must_use]
    pub const fn new(key: &'static str, name: &'static str, run: ScenarioFn) -> Self {
        Self { key, name, run }
    }
}

pub fn get_scenario(name: &str) -> Option<TestScenario> {
    let scenario = match name.to_lowercase().as_str() {
        "smoke" | "opening" => TestScenario::new("smoke", "Opening Quest", catalog::smoke),
        "main-questline" | "main" => {
            TestScenario::new("main-questline", "Main Questline", catalog::main_questline)
        }
        "quest-dependencies" | "dependencies" => TestScenario::new(
            "quest-dependencies",
            "Quest Dependency Gates",
            catalog::quest_dependencies,
        ),
        "room-quests" | "side-quests" => {
            TestScenario::new("room-quests", "Room Quests", catalog::room_quests)
        }
        "room-unlocking" | "rooms" => {
            TestScenario::new("room-unlocking", "Room Unlock Gates", catalog::room_unlocking)
        }
        "secret-passages" | "passages" => {
            TestScenario::new("secret-passages", "Secret Passages", catalog::secret_passages)
        }
        "room-upgrades" | "upgrades" => {
            TestScenario::new("room-upgrades", "Room Upgrades", catalog::room_upgrades)
        }
        "persistence-roundtrip" | "persistence" => TestScenario::new(
            "persistence-roundtrip",
            "Save and Restore",
            catalog::persistence_roundtrip,
        ),
        "progress-reset" | "reset" => {
            TestScenario::new("progress-reset", "Progress Reset", catalog::progress_reset)
        }
        "random-walk" | "chaos" => {
            TestScenario::new("random-walk", "Random Walk Invariants", catalog::random_walk)
        }
        _ => return None,
    };
    Some(scenario)
}

pub fn list_scenarios() -> Vec<(&'static str, &'static str)> {
    vec![
        ("smoke", "Opening Quest"),
        ("main-questline", "Main Questline"),
        ("quest-dependencies", "Quest Dependency Gates"),
        ("room-quests", "Room Quests"),
        ("room-unlocking", "Room Unlock Gates"),
        ("secret-passages", "Secret Passages"),
        ("room-upgrades", "Room Upgrades"),
        ("persistence-roundtrip", "Save and Restore"),
        ("progress-reset", "Progress Reset"),
        ("random-walk", "Random Walk Invariants"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use fantasy_os_core::MemoryStore;

    #[test]
    fn every_listed_scenario_resolves() {
        for (key, name) in list_scenarios() {
            let scenario = get_scenario(key).unwrap();
            assert_eq!(scenario.key, key);
            assert_eq!(scenario.name, name);
        }
    }

    #[test]
    fn aliases_resolve_case_insensitively() {
        assert_eq!(get_scenario("PASSAGES").unwrap().key, "secret-passages");
        assert_eq!(get_scenario("chaos").unwrap().key, "random-walk");
        assert!(get_scenario("unknown").is_none());
    }

    #[test]
    fn every_scenario_passes_on_a_fresh_world() {
        for (key, _) in list_scenarios() {
            let scenario = get_scenario(key).unwrap();
            for seed in [1, 1337] {
                let mut ctx = ScenarioCtx::new(Rc::new(MemoryStore::new()), seed, false).unwrap();
                if let Err(err) = (scenario.run)(&mut ctx) {
                    panic!("{key} failed with seed {seed}: {err:#}");
                }
            }
        }
    }

    #[test]
    fn reopen_sees_saved_progress() {
        let mut ctx = ScenarioCtx::new(Rc::new(MemoryStore::new()), 7, false).unwrap();
        let (_, restored) = ctx.reopen();
        assert!(!restored);
        assert!(ctx.world.start_quest("credentials-recovery"));
        let (world, restored) = ctx.reopen();
        assert!(restored);
        assert!(world.quests().is_quest_active("credentials-recovery"));
    }
}
