use anyhow::{Context, Result};
use colored::Colorize;
use fantasy_os_core::{MemoryStore, ProgressStore};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::file_store::FileStore;
use crate::scenario::{ScenarioCtx, TestScenario};
use crate::util::save_slot_dir;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub seed: u64,
    pub passed: bool,
    pub iterations_run: usize,
    pub successful_iterations: usize,
    pub failures: Vec<String>,
    #[serde(with = "duration_serde")]
    pub average_duration: Duration,
    #[serde(with = "duration_vec_serde")]
    pub performance_data: Vec<Duration>,
}

/// Runs scenarios against fresh worlds, one world per iteration.
pub struct LogicTester {
    verbose: bool,
    save_dir: Option<PathBuf>,
}

impl LogicTester {
    pub const fn new(verbose: bool, save_dir: Option<PathBuf>) -> Self {
        Self { verbose, save_dir }
    }

    pub fn run_scenario(
        &self,
        scenario: &TestScenario,
        seeds: &[u64],
        iterations: usize,
    ) -> Vec<ScenarioResult> {
        let mut results = Vec::new();

        for &seed in seeds {
            if self.verbose {
                println!(
                    "🧪 Testing scenario: {} (seed: {seed})",
                    scenario.name.bright_white()
                );
            }
            results.push(self.run_single_scenario(scenario, seed, iterations));
        }

        results
    }

    fn run_single_scenario(
        &self,
        scenario: &TestScenario,
        seed: u64,
        iterations: usize,
    ) -> ScenarioResult {
        let mut successes = 0;
        let mut failures = Vec::new();
        let mut performance_data = Vec::new();

        for i in 0..iterations {
            let start_time = Instant::now();
            let iteration_seed = seed.wrapping_add(u64::try_from(i).unwrap_or(u64::MAX));

            match self.run_iteration(scenario, iteration_seed) {
                Ok(summary) => {
                    successes += 1;
                    let duration = start_time.elapsed();
                    performance_data.push(duration);
                    if self.verbose {
                        println!(
                            "  ✅ Iteration {}/{} passed ({duration:?}) {summary}",
                            i + 1,
                            iterations
                        );
                    }
                }
                Err(err) => {
                    let message = format!("Iteration {} (seed {iteration_seed}): {err:#}", i + 1);
                    if self.verbose {
                        println!(
                            "  ❌ Iteration {}/{} failed: {}",
                            i + 1,
                            iterations,
                            message.clone().red()
                        );
                    }
                    failures.push(message);
                }
            }
        }

        let average_duration = if performance_data.is_empty() {
            Duration::ZERO
        } else {
            performance_data.iter().sum::<Duration>()
                / u32::try_from(performance_data.len()).unwrap_or(1)
        };

        ScenarioResult {
            scenario_name: scenario.name.to_string(),
            seed,
            passed: failures.is_empty(),
            iterations_run: iterations,
            successful_iterations: successes,
            failures,
            average_duration,
            performance_data,
        }
    }

    /// Play one iteration and describe where the world ended up.
    fn run_iteration(&self, scenario: &TestScenario, seed: u64) -> Result<String> {
        let store = self.open_store(scenario, seed)?;
        let mut ctx = ScenarioCtx::new(store, seed, self.verbose)?;
        (scenario.run)(&mut ctx)?;
        Ok(summarize_world(&ctx))
    }

    fn open_store(&self, scenario: &TestScenario, seed: u64) -> Result<Rc<dyn ProgressStore>> {
        match &self.save_dir {
            Some(base) => {
                let dir = save_slot_dir(base, scenario.key, seed);
                let store = FileStore::open(&dir)
                    .with_context(|| format!("opening save directory {}", dir.display()))?;
                debug!("{} seed {seed} saving to {}", scenario.key, store.dir().display());
                Ok(Rc::new(store))
            }
            None => Ok(Rc::new(MemoryStore::new())),
        }
    }
}

fn summarize_world(ctx: &ScenarioCtx) -> String {
    let rooms = ctx.world.progression_stats();
    let achievements = ctx.world.achievement_count();
    let passages = ctx.world.passage_stats();
    format!(
        "quests:{} rooms:{}/{} achievements:{}/{} passages:{}/{}",
        ctx.world.quests().completed_quests().len(),
        rooms.unlocked_rooms,
        rooms.total_rooms,
        achievements.completed,
        achievements.total,
        passages.discovered_passages,
        passages.total_passages
    )
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u128::deserialize(deserializer)?;
        Ok(Duration::from_millis(u64::try_from(millis).unwrap_or(0)))
    }
}

mod duration_vec_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(durations: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis: Vec<u128> = durations.iter().map(Duration::as_millis).collect();
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis_vec = Vec::<u128>::deserialize(deserializer)?;
        Ok(millis_vec
            .into_iter()
            .map(|m| Duration::from_millis(u64::try_from(m).unwrap_or(0)))
            .collect())
    }
}
