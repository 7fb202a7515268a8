//! Reusable play sequences shared by the scenario catalog.
use anyhow::{Result, ensure};
use rand::Rng;
use rand::seq::SliceRandom;

use super::ScenarioCtx;

pub const MAIN_QUESTLINE: [&str; 5] = [
    "credentials-recovery",
    "ancient-artifacts",
    "magic-system-restoration",
    "portal-network-activation",
    "fantasy-os-mastery",
];

pub const ROOM_QUESTS: [&str; 5] = [
    "culinary-magic",
    "dream-walker",
    "master-craftsman",
    "knowledge-seeker",
    "natures-guardian",
];

/// Rooms in the order the main questline opens them.
pub const HOUSE_ROUTE: [&str; 6] = [
    "living-room",
    "kitchen",
    "bedroom",
    "workshop",
    "library",
    "garden",
];

pub fn quest_steps(ctx: &ScenarioCtx, quest_id: &str) -> Vec<String> {
    ctx.world
        .quests()
        .quest_info(quest_id)
        .map(|quest| quest.steps.iter().map(|step| step.id.clone()).collect())
        .unwrap_or_default()
}

/// Start `quest_id` and finish its steps in a seed-dependent order.
pub fn complete_quest(ctx: &mut ScenarioCtx, quest_id: &str) -> Result<()> {
    ensure!(
        ctx.world.start_quest(quest_id),
        "quest {quest_id} could not be started"
    );
    let mut steps = quest_steps(ctx, quest_id);
    ensure!(!steps.is_empty(), "quest {quest_id} has no steps");
    steps.shuffle(&mut ctx.rng);
    finish_steps(ctx, quest_id, &steps)?;
    ensure!(
        ctx.world.quests().is_quest_completed(quest_id),
        "quest {quest_id} did not complete after every step"
    );
    Ok(())
}

pub fn finish_steps(ctx: &mut ScenarioCtx, quest_id: &str, steps: &[String]) -> Result<()> {
    for step in steps {
        ensure!(
            ctx.world.update_quest_progress(quest_id, step),
            "step {quest_id}/{step} was rejected"
        );
        let pause = ctx.rng.gen_range(1..5);
        ctx.clock.advance_minutes(pause);
    }
    Ok(())
}

/// Walk through every room that is currently open. Returns how many were entered.
pub fn tour_open_rooms(ctx: &mut ScenarioCtx) -> usize {
    let mut entered = 0;
    for room in HOUSE_ROUTE {
        if ctx.world.enter_room(room) {
            entered += 1;
            ctx.clock.advance_minutes(1);
        }
    }
    entered
}

pub fn visit(ctx: &mut ScenarioCtx, room: &str, times: u32) -> Result<()> {
    for _ in 0..times {
        ensure!(ctx.world.enter_room(room), "could not enter {room}");
        ctx.clock.advance_minutes(1);
    }
    Ok(())
}

/// Visit a room `visits` more times, then master it. Returns its mastery points.
pub fn master_after_visits(ctx: &mut ScenarioCtx, room: &str, visits: u32) -> Result<u32> {
    visit(ctx, room, visits)?;
    ensure!(ctx.world.master_room(room), "could not master {room}");
    Ok(ctx
        .world
        .rooms()
        .room(room)
        .map_or(0, |progress| progress.mastery_points))
}

/// The five main quests, touring the house each time it grows.
pub fn play_main_questline(ctx: &mut ScenarioCtx) -> Result<()> {
    for quest in MAIN_QUESTLINE {
        complete_quest(ctx, quest)?;
        tour_open_rooms(ctx);
    }
    Ok(())
}
