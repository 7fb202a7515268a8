use anyhow::{Result, bail, ensure};
use fantasy_os_core::{
    AccessLevel, FantasyWorld, ProgressPayload, QuestEvent, UnlockAttempt, WorldEvent,
};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, BTreeSet};

use super::ScenarioCtx;
use super::walkthrough::{
    HOUSE_ROUTE, MAIN_QUESTLINE, ROOM_QUESTS, complete_quest, finish_steps, master_after_visits,
    play_main_questline, quest_steps, tour_open_rooms, visit,
};

const RANDOM_WALK_MOVES: usize = 300;
const UPGRADE_VISITS: u32 = 25;

const TRIGGER_TAGS: &[&str] = &[
    "hobbit-interaction",
    "lamp1-illuminate",
    "lamp2-illuminate",
    "fireplace-ignite",
    "book-browse",
    "portal-spell-cast",
    "vase-examine",
    "artifact-discovery",
    "artifact-analysis",
];

fn completed_quest_events(world: &FantasyWorld, quest_id: &str) -> usize {
    world
        .journal()
        .iter()
        .filter(|event| {
            matches!(event, WorldEvent::Quest(QuestEvent::Completed { quest_id: id, .. }) if id == quest_id)
        })
        .count()
}

pub fn smoke(ctx: &mut ScenarioCtx) -> Result<()> {
    ensure!(
        ctx.world.is_room_accessible("living-room"),
        "living room should be open from the start"
    );
    ensure!(
        !ctx.world.is_room_accessible("kitchen"),
        "kitchen should start locked"
    );

    complete_quest(ctx, "credentials-recovery")?;

    ensure!(
        ctx.world.is_room_accessible("kitchen"),
        "kitchen should unlock after credentials recovery"
    );
    ensure!(
        ctx.world
            .achievements()
            .is_achievement_completed("first-quest"),
        "first-quest achievement should be awarded"
    );
    ensure!(
        ctx.world.magic_level() == 11,
        "magic level should be 11, got {}",
        ctx.world.magic_level()
    );
    ensure!(
        ctx.world.has_artifact("fire-crystal"),
        "fire crystal should be held after the first quest"
    );
    ensure!(
        completed_quest_events(&ctx.world, "credentials-recovery") == 1,
        "credentials recovery should complete exactly once"
    );
    Ok(())
}

pub fn main_questline(ctx: &mut ScenarioCtx) -> Result<()> {
    play_main_questline(ctx)?;

    for quest in MAIN_QUESTLINE {
        ensure!(
            completed_quest_events(&ctx.world, quest) == 1,
            "{quest} should complete exactly once"
        );
    }
    let stats = ctx.world.progression_stats();
    ensure!(
        stats.unlocked_rooms == stats.total_rooms,
        "all rooms should be open, got {}/{}",
        stats.unlocked_rooms,
        stats.total_rooms
    );
    ensure!(
        stats.explored_rooms == stats.total_rooms,
        "all rooms should be explored, got {}",
        stats.explored_rooms
    );
    ensure!(
        ctx.world
            .achievements()
            .is_achievement_completed("room-explorer"),
        "touring the house should award room-explorer"
    );
    ensure!(
        ctx.world.spells().contains("fireball"),
        "fireball spell should be unlocked"
    );
    ensure!(
        ctx.world.gestures().contains("spiral"),
        "spiral gesture should be unlocked"
    );
    Ok(())
}

pub fn quest_dependencies(ctx: &mut ScenarioCtx) -> Result<()> {
    let definitions: BTreeMap<String, Vec<String>> = ctx
        .content
        .quests
        .quests
        .iter()
        .map(|quest| (quest.id.clone(), quest.dependencies.clone()))
        .collect();

    ensure!(
        !ctx.world
            .update_quest_progress("credentials-recovery", "start"),
        "progress on an unstarted quest should be rejected"
    );

    let mut remaining: Vec<String> = definitions.keys().cloned().collect();
    let mut attempts = 0;
    while !remaining.is_empty() {
        attempts += 1;
        if attempts > definitions.len() * definitions.len() * 4 {
            bail!("quests never finished: {}", remaining.join(", "));
        }
        let Some(quest) = remaining.choose(&mut ctx.rng).cloned() else {
            break;
        };
        let ready = definitions[&quest]
            .iter()
            .all(|dep| ctx.world.quests().is_quest_completed(dep));
        if ready {
            complete_quest(ctx, &quest)?;
            ensure!(
                !ctx.world.start_quest(&quest),
                "completed quest {quest} should not restart"
            );
            remaining.retain(|id| id != &quest);
        } else {
            ensure!(
                !ctx.world.start_quest(&quest),
                "{quest} started before its dependencies"
            );
        }
    }

    ensure!(
        ctx.world.quests().available_quests().is_empty(),
        "no quest should remain available"
    );
    ensure!(
        ctx.world.quests().completed_quests().len() == definitions.len(),
        "every quest should be completed"
    );
    Ok(())
}

pub fn room_quests(ctx: &mut ScenarioCtx) -> Result<()> {
    play_main_questline(ctx)?;
    for quest_id in ROOM_QUESTS {
        let room = ctx
            .world
            .quests()
            .quest_info(quest_id)
            .and_then(|quest| quest.room.clone());
        let Some(room) = room else {
            bail!("room quest {quest_id} has no room");
        };
        ensure!(
            ctx.world.is_room_accessible(&room),
            "{quest_id} belongs to {room}, which is still locked"
        );
        ensure!(ctx.world.enter_room(&room), "could not enter {room}");

        // Progress is checked halfway through.
        ensure!(ctx.world.start_quest(quest_id), "{quest_id} did not start");
        let mut steps = quest_steps(ctx, quest_id);
        steps.shuffle(&mut ctx.rng);
        let (first, rest) = steps.split_at(steps.len() / 2);
        finish_steps(ctx, quest_id, first)?;
        ensure!(
            ctx.world.quests().is_quest_active(quest_id),
            "{quest_id} finished early"
        );
        let progress = ctx
            .world
            .quests()
            .quest_progress(quest_id)
            .map_or(0.0, |p| p.progress);
        ensure!(
            progress > 0.0 && progress < 100.0,
            "{quest_id} progress should be partial, got {progress}"
        );
        finish_steps(ctx, quest_id, rest)?;
        ensure!(
            ctx.world.quests().is_quest_completed(quest_id),
            "{quest_id} did not complete"
        );
    }
    ensure!(
        ctx.world.quests().completed_quests().len() == MAIN_QUESTLINE.len() + ROOM_QUESTS.len(),
        "all ten quests should be completed"
    );
    Ok(())
}

pub fn room_unlocking(ctx: &mut ScenarioCtx) -> Result<()> {
    for room in HOUSE_ROUTE.iter().skip(1) {
        match ctx.world.attempt_unlock(room) {
            UnlockAttempt::Blocked(missing) => ensure!(
                !missing.is_empty(),
                "{room} blocked without missing requirements"
            ),
            other => bail!("{room} should start blocked, got {other:?}"),
        }
    }
    ensure!(
        ctx.world.attempt_unlock("attic") == UnlockAttempt::UnknownRoom,
        "unknown rooms should be reported"
    );

    for quest in MAIN_QUESTLINE {
        complete_quest(ctx, quest)?;
        check_room_gates(ctx)?;
        if !ctx.world.is_room_accessible("garden") {
            let missing = ctx
                .world
                .rooms()
                .missing_requirements("garden", &ctx.world.status());
            ensure!(
                missing.is_some_and(|m| !m.is_empty()),
                "locked garden should list what it is missing"
            );
        }
        tour_open_rooms(ctx);
        check_room_gates(ctx)?;
    }

    for room in HOUSE_ROUTE {
        ensure!(
            ctx.world.attempt_unlock(room) == UnlockAttempt::AlreadyAccessible,
            "{room} should already be accessible"
        );
        ensure!(
            !ctx.world.unlock_room(room),
            "unlocking open {room} should report false"
        );
    }
    Ok(())
}

/// Every gated room is open exactly when its requirements hold.
fn check_room_gates(ctx: &ScenarioCtx) -> Result<()> {
    let world = &ctx.world;
    for def in &ctx.content.rooms.rooms {
        if def.min_access_level >= AccessLevel::Unlocked {
            continue;
        }
        let quests = def
            .required_quests
            .iter()
            .all(|q| world.quests().is_quest_completed(q));
        let achievements = def
            .required_achievements
            .iter()
            .all(|a| world.achievements().is_achievement_completed(a));
        let rooms = def
            .required_rooms
            .iter()
            .all(|r| world.is_room_accessible(r));
        let expected = quests && achievements && rooms;
        ensure!(
            world.is_room_accessible(&def.id) == expected,
            "{} accessible={} but requirements met={expected}",
            def.id,
            world.is_room_accessible(&def.id)
        );
    }
    Ok(())
}

pub fn secret_passages(ctx: &mut ScenarioCtx) -> Result<()> {
    ensure!(
        !ctx.world.use_passage("living-room-to-kitchen"),
        "an undiscovered passage should not be usable"
    );
    play_main_questline(ctx)?;
    ensure!(
        ctx.world.passage_stats().discovered_passages == 0,
        "no passage should be found by questing alone"
    );

    ensure!(ctx.world.enter_room("living-room"), "enter living room");
    ensure!(
        ctx.world.object_interaction("fireplace", "poke").is_empty(),
        "the wrong action should reveal nothing"
    );
    let found = ctx.world.object_interaction("fireplace", "ignite");
    ensure!(
        found == ["living-room-to-kitchen"],
        "igniting the fireplace found {found:?}"
    );

    ensure!(ctx.world.enter_room("kitchen"), "enter kitchen");
    let found = ctx.world.cast_spell("brew potion");
    ensure!(
        found == ["kitchen-to-workshop"],
        "brewing in the kitchen found {found:?}"
    );

    let points = master_after_visits(ctx, "bedroom", 20)?;
    ensure!(points >= 50, "bedroom mastery reached only {points}");
    ensure!(
        ctx.world.passages().is_discovered("bedroom-to-library"),
        "mastering the bedroom should open the wardrobe"
    );

    master_after_visits(ctx, "library", 1)?;
    ensure!(
        ctx.world.passages().is_discovered("library-to-garden"),
        "a mastered library should reveal the bookshelf passage"
    );
    master_after_visits(ctx, "workshop", 1)?;
    ensure!(
        ctx.world.passages().is_discovered("workshop-to-garden"),
        "a mastered workshop should reveal the tool shed"
    );

    let total = ctx.world.passage_stats().total_passages;
    ensure!(
        ctx.world.passage_stats().discovered_passages == total,
        "every passage should be discovered"
    );

    ensure!(ctx.world.enter_room("living-room"), "return to living room");
    let trips = ctx.rng.gen_range(2..6);
    for trip in 0..trips {
        ensure!(
            ctx.world.use_passage("living-room-to-kitchen"),
            "fireplace passage trip {trip} failed"
        );
        let expected = if trip % 2 == 0 { "kitchen" } else { "living-room" };
        ensure!(
            ctx.world.current_room() == expected,
            "trip {trip} ended in {} instead of {expected}",
            ctx.world.current_room()
        );
    }
    let stats = ctx.world.passage_stats();
    ensure!(
        stats.total_usage == trips,
        "expected {trips} uses, got {}",
        stats.total_usage
    );
    ensure!(
        stats.most_used_passage.as_deref() == Some("living-room-to-kitchen"),
        "most used passage was {:?}",
        stats.most_used_passage
    );
    Ok(())
}

pub fn room_upgrades(ctx: &mut ScenarioCtx) -> Result<()> {
    play_main_questline(ctx)?;
    ensure!(
        !ctx.world.apply_upgrade("living-room", "magical-fireplace"),
        "a locked upgrade should not apply"
    );
    ensure!(
        !ctx.world.can_unlock_upgrade("living-room", "magical-fireplace"),
        "an unmastered room has no points to spend"
    );

    let mut rooms: Vec<&str> = HOUSE_ROUTE.to_vec();
    rooms.shuffle(&mut ctx.rng);
    for room in rooms {
        ctx.clock.advance_minutes(6);
        let points = master_after_visits(ctx, room, UPGRADE_VISITS)?;
        let upgrade_ids: Vec<String> = ctx
            .world
            .upgrades()
            .upgrades_for(room)
            .iter()
            .map(|upgrade| upgrade.id.clone())
            .collect();
        ensure!(!upgrade_ids.is_empty(), "{room} has no upgrades");
        for upgrade in &upgrade_ids {
            ensure!(
                ctx.world.upgrades().state(room, upgrade).unlocked,
                "{room}/{upgrade} should auto-unlock at {points} points"
            );
            ensure!(
                ctx.world.apply_upgrade(room, upgrade),
                "{room}/{upgrade} did not apply"
            );
            ensure!(
                !ctx.world.apply_upgrade(room, upgrade),
                "{room}/{upgrade} applied twice"
            );
        }
        ensure!(
            ctx.world.rooms().access_level(room) == AccessLevel::Enhanced,
            "{room} should be enhanced"
        );
        ensure!(
            ctx.world
                .upgrades()
                .customizations(room)
                .is_some_and(|effects| !effects.is_empty()),
            "{room} should carry upgrade effects"
        );
    }

    let stats = ctx.world.upgrade_stats();
    ensure!(
        stats.applied_upgrades == stats.total_upgrades,
        "applied {}/{} upgrades",
        stats.applied_upgrades,
        stats.total_upgrades
    );
    ensure!(
        stats.available_artifacts == stats.total_artifacts,
        "holding {}/{} artifacts",
        stats.available_artifacts,
        stats.total_artifacts
    );
    Ok(())
}

pub fn persistence_roundtrip(ctx: &mut ScenarioCtx) -> Result<()> {
    complete_quest(ctx, "credentials-recovery")?;
    ensure!(
        ctx.world.start_quest("ancient-artifacts"),
        "ancient artifacts did not start"
    );
    let mut steps = quest_steps(ctx, "ancient-artifacts");
    steps.shuffle(&mut ctx.rng);
    let done = ctx.rng.gen_range(1..steps.len());
    finish_steps(ctx, "ancient-artifacts", &steps[..done])?;
    visit(ctx, "living-room", 3)?;
    tour_open_rooms(ctx);
    master_after_visits(ctx, "living-room", 2)?;
    ensure!(
        ctx.world.object_interaction("fireplace", "ignite").len() == 1,
        "fireplace passage should be found before saving"
    );

    let digest = ctx.world.progress_digest();
    let (mut restored, found) = ctx.reopen();
    ensure!(found, "saved progress was not found");
    ensure!(
        restored.progress_digest() == digest,
        "restored digest {:x} differs from {digest:x}",
        restored.progress_digest()
    );
    ensure!(
        restored.quests().completed_quests() == ctx.world.quests().completed_quests(),
        "completed quests differ after reload"
    );
    for room in HOUSE_ROUTE {
        ensure!(
            restored.rooms().room(room) == ctx.world.rooms().room(room),
            "{room} progress differs after reload"
        );
    }
    ensure!(
        restored.achievements().completed_achievements()
            == ctx.world.achievements().completed_achievements(),
        "achievements differ after reload"
    );
    ensure!(
        restored.passages().is_discovered("living-room-to-kitchen"),
        "discovered passage lost on reload"
    );

    for step in &steps[done..] {
        ensure!(
            restored.update_quest_progress("ancient-artifacts", step),
            "restored quest rejected {step}"
        );
    }
    ensure!(
        restored.quests().is_quest_completed("ancient-artifacts"),
        "restored quest did not complete"
    );
    ensure!(
        restored.is_room_accessible("bedroom"),
        "bedroom should open in the restored world"
    );
    ctx.world = restored;
    Ok(())
}

pub fn progress_reset(ctx: &mut ScenarioCtx) -> Result<()> {
    complete_quest(ctx, "credentials-recovery")?;
    complete_quest(ctx, "ancient-artifacts")?;
    tour_open_rooms(ctx);
    ensure!(ctx.world.is_room_accessible("bedroom"), "bedroom should be open");

    ctx.world.reset_all();
    ensure!(
        ctx.world.quests().completed_quests().is_empty(),
        "reset should forget quests"
    );
    ensure!(
        !ctx.world.is_room_accessible("kitchen"),
        "reset should relock the kitchen"
    );
    ensure!(
        ctx.world.current_room() == "living-room",
        "reset should return to the living room"
    );
    ensure!(ctx.world.magic_level() == 1, "reset should restore magic level");
    ensure!(ctx.world.journal().is_empty(), "reset should clear the journal");

    let (restored, _) = ctx.reopen();
    ensure!(
        restored.quests().completed_quests().is_empty(),
        "reset progress came back on reload"
    );
    ensure!(
        !restored.is_room_accessible("kitchen"),
        "reloaded kitchen should stay locked"
    );

    complete_quest(ctx, "credentials-recovery")?;
    ensure!(
        ctx.world.is_room_accessible("kitchen"),
        "the questline should replay after a reset"
    );
    Ok(())
}

struct Snapshot {
    levels: BTreeMap<String, AccessLevel>,
    achievement_counts: BTreeMap<String, u32>,
    completed_quests: BTreeSet<String>,
    discovered_passages: usize,
}

impl Snapshot {
    fn take(world: &FantasyWorld) -> Self {
        Self {
            levels: world
                .rooms()
                .definitions()
                .map(|def| (def.id.clone(), world.rooms().access_level(&def.id)))
                .collect(),
            achievement_counts: world
                .achievements()
                .definitions()
                .map(|a| {
                    let current = world
                        .achievements()
                        .achievement_progress(&a.id)
                        .map_or(0, |p| p.current);
                    (a.id.clone(), current)
                })
                .collect(),
            completed_quests: world.quests().completed_quests().iter().cloned().collect(),
            discovered_passages: world.passage_stats().discovered_passages,
        }
    }

    fn ensure_no_regression(&self, next: &Self, step: usize) -> Result<()> {
        for (room, level) in &self.levels {
            let now = next.levels.get(room).copied().unwrap_or_default();
            ensure!(now >= *level, "step {step}: {room} fell from {level} to {now}");
        }
        for (id, count) in &self.achievement_counts {
            let now = next.achievement_counts.get(id).copied().unwrap_or_default();
            ensure!(now >= *count, "step {step}: achievement {id} fell from {count} to {now}");
        }
        ensure!(
            next.completed_quests.is_superset(&self.completed_quests),
            "step {step}: a completed quest was forgotten"
        );
        ensure!(
            next.discovered_passages >= self.discovered_passages,
            "step {step}: a passage was forgotten"
        );
        Ok(())
    }
}

fn random_move(ctx: &mut ScenarioCtx) {
    let room = HOUSE_ROUTE.choose(&mut ctx.rng).copied().unwrap_or("living-room");
    match ctx.rng.gen_range(0..10) {
        0 => {
            let quests: Vec<String> = ctx
                .world
                .quests()
                .definitions()
                .map(|q| q.id.clone())
                .collect();
            if let Some(quest) = quests.choose(&mut ctx.rng) {
                ctx.world.start_quest(quest);
            }
        }
        1 | 2 => {
            let tag = TRIGGER_TAGS.choose(&mut ctx.rng).copied().unwrap_or_default();
            ctx.world.trigger(tag);
        }
        3 | 4 => {
            let open: Vec<(String, String)> = ctx
                .world
                .quests()
                .active_quests()
                .flat_map(|a| a.quest.steps.iter().map(|s| (a.quest.id.clone(), s.id.clone())))
                .collect();
            if let Some((quest, step)) = open.choose(&mut ctx.rng) {
                ctx.world.update_quest_progress(quest, step);
            }
        }
        5 => {
            ctx.world.enter_room(room);
        }
        6 => {
            ctx.world.master_room(room);
        }
        7 => {
            let amount = ctx.rng.gen_range(1..30);
            ctx.world
                .record_action("hobbit-trust", &ProgressPayload::trust(amount));
        }
        8 => {
            ctx.world.object_interaction("fireplace", "ignite");
            ctx.world.cast_spell("brew potion");
        }
        _ => {
            let passages: Vec<String> = ctx
                .world
                .passages()
                .discovered_passages()
                .iter()
                .map(|p| p.id.clone())
                .collect();
            if let Some(passage) = passages.choose(&mut ctx.rng) {
                ctx.world.use_passage(passage);
            }
        }
    }
    let pause = ctx.rng.gen_range(0..4);
    ctx.clock.advance_minutes(pause);
}

pub fn random_walk(ctx: &mut ScenarioCtx) -> Result<()> {
    let mut previous = Snapshot::take(&ctx.world);
    for step in 0..RANDOM_WALK_MOVES {
        random_move(ctx);
        let current = Snapshot::take(&ctx.world);
        previous.ensure_no_regression(&current, step)?;
        for (room, level) in &current.levels {
            if *level == AccessLevel::Locked {
                let visits = ctx
                    .world
                    .rooms()
                    .room(room)
                    .map_or(0, |progress| progress.visit_count);
                ensure!(visits == 0, "step {step}: locked {room} has {visits} visits");
            }
        }
        ensure!(
            ctx.world.is_room_accessible(ctx.world.current_room()),
            "step {step}: standing in locked {}",
            ctx.world.current_room()
        );
        previous = current;
    }
    if ctx.verbose {
        println!(
            "     ↳ seed {} walked {} moves: {} quests, {} rooms open",
            ctx.seed,
            RANDOM_WALK_MOVES,
            previous.completed_quests.len(),
            previous
                .levels
                .values()
                .filter(|level| **level >= AccessLevel::Unlocked)
                .count()
        );
    }
    Ok(())
}
