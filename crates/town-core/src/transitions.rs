//! Transition functions run through [`TownStore::mutate`].
//!
//! Every function here is `&WorldState -> Transition<Result<T,
//! TransitionError>>`. A rejected request comes back as
//! [`Transition::skip`] carrying the error, so nothing is written; an
//! accepted one comes back as [`Transition::commit`] with the edited copy.
//! The store re-derives whatever the edit implies (level, rank,
//! achievements, titles, caps) before persisting, so transitions only
//! touch primary fields.
//!
//! [`TownStore::mutate`]: crate::store::TownStore::mutate

use chrono::{DateTime, Utc};
use rand::Rng;
use town_economy::{
    EconomyError, ItemEffect, RewardRates, active_bonuses, add_item, compute_work_reward,
    debit_gold, item, quantity_of, remove_item,
};
use town_types::{
    ActivityEntry, ActivityKind, BuildingType, Decoration, Footprint, ItemAmount, ItemKind,
    MaterialDrop, MissionGoal, Position, Reward, WorldState,
};
use town_world::{
    UpgradeCost, WorldError, building_for_category, check_placement, decoration_blueprint,
    occupancy_of, upgrade_cost,
};
use tracing::{debug, warn};

use crate::activity::{completion_entry_id, nearest_start, push_entry, start_entry_id};
use crate::error::TransitionError;
use crate::facts::{ReportSnapshot, reward_key};
use crate::missions::record_progress;
use crate::progression::{record_daily, record_materials, title_def};
use crate::store::Transition;

/// Result type of every transition in this module.
pub type Outcome<T> = Transition<Result<T, TransitionError>>;

fn finish<T>(outcome: Result<(WorldState, T), TransitionError>) -> Outcome<T> {
    match outcome {
        Ok((next, value)) => Transition::commit(next, Ok(value)),
        Err(e) => {
            debug!(error = %e, "transition rejected");
            Transition::skip(Err(e))
        }
    }
}

fn event_id(prefix: &str) -> String {
    format!("{prefix}:{}", uuid::Uuid::now_v7())
}

fn parse_building(raw: &str) -> Result<BuildingType, TransitionError> {
    BuildingType::parse(raw)
        .ok_or_else(|| WorldError::UnknownBuilding(raw.to_owned()).into())
}

fn cell(x: i64, y: i64) -> Result<Position, TransitionError> {
    match (u32::try_from(x), u32::try_from(y)) {
        (Ok(x), Ok(y)) => Ok(Position::new(x, y)),
        _ => Err(TransitionError::InvalidInput(format!(
            "coordinates ({x}, {y}) must not be negative"
        ))),
    }
}

fn credit(state: &mut WorldState, reward: Reward) {
    state.town.gold = state.town.gold.saturating_add(reward.gold);
    state.town.xp = state.town.xp.saturating_add(reward.xp);
}

// ---------------------------------------------------------------------------
// Work
// ---------------------------------------------------------------------------

/// A worker picked up a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkStart {
    /// Worker name.
    pub worker: String,
    /// External task id.
    pub task_id: String,
    /// Raw task category.
    pub category: String,
    /// Task title.
    pub title: Option<String>,
    /// Assignment time.
    pub at: DateTime<Utc>,
}

/// Record a `work_start` entry. Returns `false` (and writes nothing) when
/// the start is already logged.
pub fn record_work_start(state: &WorldState, start: &WorkStart) -> Outcome<bool> {
    if start.worker.trim().is_empty() || start.task_id.trim().is_empty() {
        return finish(Err(TransitionError::InvalidInput(
            "work start needs a worker and a task id".to_owned(),
        )));
    }
    let id = start_entry_id(&start.worker, &start.task_id);
    if state.activity_log.iter().any(|e| e.id == id) {
        return Transition::skip(Ok(false));
    }
    let mut next = state.clone();
    push_entry(&mut next.activity_log, start_entry(start, id));
    Transition::commit(next, Ok(true))
}

pub(crate) fn start_entry(start: &WorkStart, id: String) -> ActivityEntry {
    let mut entry = ActivityEntry::new(id, ActivityKind::WorkStart, start.at);
    entry.worker = Some(start.worker.clone());
    entry.task_id = Some(start.task_id.clone());
    entry.category = Some(start.category.clone());
    entry.building_type = Some(building_for_category(&start.category));
    entry.message.clone_from(&start.title);
    entry
}

/// A finished task whose reward has not necessarily been paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkCompletion {
    /// Worker name.
    pub worker: String,
    /// External task id.
    pub task_id: String,
    /// Report identity; a re-delivered report carries the same one.
    pub report_id: String,
    /// Raw task category.
    pub category: String,
    /// Task title.
    pub title: Option<String>,
    /// Assignment time, when known.
    pub assigned_at: Option<DateTime<Utc>>,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

impl WorkCompletion {
    /// Build a completion from a report snapshot. A report without a
    /// completion time is taken to have completed at `now`.
    pub fn from_report(report: &ReportSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            worker: report.worker.clone(),
            task_id: report.task_id.clone(),
            report_id: report.report_id.clone(),
            category: report.category.clone(),
            title: report.title.clone(),
            assigned_at: report.assigned_at,
            completed_at: report.completed_at.unwrap_or(now),
        }
    }

    /// Key recorded in the reward ledger.
    pub fn reward_key(&self) -> String {
        reward_key(&self.worker, &self.task_id, &self.report_id)
    }
}

/// What a completion paid.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletionOutcome {
    /// `true` when the ledger showed the completion as already paid; the
    /// other fields are then empty.
    pub already_paid: bool,
    /// Elapsed whole minutes.
    pub minutes: u64,
    /// Gold and xp after bonuses.
    pub reward: Reward,
    /// Materials dropped.
    pub materials: Vec<ItemAmount>,
}

/// Pay a completion: time reward with bonuses, material drops, mission
/// progress, daily record, stats and an activity entry.
///
/// Idempotent per `(worker, task, report)`: once the dedupe key is in the
/// ledger, re-delivery writes nothing.
pub fn apply_work_completion(
    state: &WorldState,
    completion: &WorkCompletion,
    rates: RewardRates,
    rng: &mut impl Rng,
) -> Outcome<CompletionOutcome> {
    if completion.worker.trim().is_empty() || completion.task_id.trim().is_empty() {
        return finish(Err(TransitionError::InvalidInput(
            "completion needs a worker and a task id".to_owned(),
        )));
    }
    if state.has_reward_key(&completion.reward_key()) {
        debug!(key = %completion.reward_key(), "completion already paid");
        return Transition::skip(Ok(CompletionOutcome {
            already_paid: true,
            ..CompletionOutcome::default()
        }));
    }
    let mut next = state.clone();
    let outcome = pay_completion(&mut next, completion, rates, rng);
    Transition::commit(next, Ok(outcome))
}

/// Apply a completion's payout to `state` in place. Does not consult the
/// ledger; callers check [`WorldState::has_reward_key`] first.
pub fn pay_completion(
    state: &mut WorldState,
    completion: &WorkCompletion,
    rates: RewardRates,
    rng: &mut impl Rng,
) -> CompletionOutcome {
    let key = completion.reward_key();
    let building_type = building_for_category(&completion.category);
    let level = state.building(building_type).map_or(1, |b| b.level);
    let assigned_at = completion.assigned_at.or_else(|| {
        nearest_start(&state.activity_log, &completion.worker, completion.completed_at)
            .map(|e| e.timestamp)
    });
    let bonuses = active_bonuses(state);
    let work = compute_work_reward(
        assigned_at,
        Some(completion.completed_at),
        building_type,
        level,
        &bonuses,
        rates,
        rng,
    );
    let reward = work.reward;

    credit(state, reward);
    let mut collected: u64 = 0;
    for drop in &work.materials {
        match add_item(&mut state.inventory, &drop.item_id, drop.quantity) {
            Ok(added) => collected = collected.saturating_add(u64::from(added)),
            Err(e) => warn!(item_id = %drop.item_id, error = %e, "dropped material not stored"),
        }
    }
    record_materials(&mut state.material_collection, &work.materials);

    let stats = &mut state.stats;
    stats.tasks_completed = stats.tasks_completed.saturating_add(1);
    stats.gold_earned = stats.gold_earned.saturating_add(reward.gold);
    stats.xp_earned = stats.xp_earned.saturating_add(reward.xp);
    stats.materials_collected = stats.materials_collected.saturating_add(collected);

    record_daily(
        &mut state.daily_records,
        completion.completed_at.date_naive(),
        reward.gold,
        reward.xp,
    );
    record_progress(
        &mut state.missions,
        MissionGoal::CompleteTasks,
        Some(completion.category.as_str()),
        1,
    );
    record_progress(&mut state.missions, MissionGoal::EarnGold, None, reward.gold);
    record_progress(&mut state.missions, MissionGoal::CollectMaterials, None, collected);

    if !work.materials.is_empty() {
        state.last_material_drop = Some(MaterialDrop {
            building_type,
            items: work.materials.clone(),
            at: completion.completed_at,
        });
    }

    let mut entry = ActivityEntry::new(
        completion_entry_id(&key),
        ActivityKind::WorkComplete,
        completion.completed_at,
    );
    entry.worker = Some(completion.worker.clone());
    entry.task_id = Some(completion.task_id.clone());
    entry.category = Some(completion.category.clone());
    entry.building_type = Some(building_type);
    entry.message.clone_from(&completion.title);
    entry.gold = Some(reward.gold);
    entry.xp = Some(reward.xp);
    entry.materials.clone_from(&work.materials);
    push_entry(&mut state.activity_log, entry);
    state.reward_ledger.push(key);

    debug!(
        worker = %completion.worker,
        task_id = %completion.task_id,
        minutes = work.minutes,
        gold = reward.gold,
        xp = reward.xp,
        drops = work.materials.len(),
        "completion paid"
    );
    CompletionOutcome {
        already_paid: false,
        minutes: work.minutes,
        reward,
        materials: work.materials,
    }
}

// ---------------------------------------------------------------------------
// Shop and inventory
// ---------------------------------------------------------------------------

/// What a purchase did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOutcome {
    /// Item bought.
    pub item_id: String,
    /// Units bought.
    pub quantity: u32,
    /// Gold debited.
    pub gold_spent: u64,
    /// Ids of decorations created in storage, for decoration items.
    pub decoration_ids: Vec<String>,
}

/// Buy `quantity` of an item. Decorations are created in storage; other
/// items go to the inventory.
pub fn purchase_item(state: &WorldState, item_id: &str, quantity: u32) -> Outcome<PurchaseOutcome> {
    finish(purchase(state, item_id, quantity))
}

fn purchase(
    state: &WorldState,
    item_id: &str,
    quantity: u32,
) -> Result<(WorldState, PurchaseOutcome), TransitionError> {
    let def = item(item_id).ok_or_else(|| EconomyError::UnknownItem(item_id.to_owned()))?;
    let price = def
        .price
        .ok_or_else(|| EconomyError::NotForSale(item_id.to_owned()))?;
    if quantity == 0 {
        return Err(EconomyError::ZeroQuantity.into());
    }
    let total = price
        .checked_mul(u64::from(quantity))
        .ok_or(EconomyError::ArithmeticOverflow)?;

    let mut next = state.clone();
    next.town.gold = debit_gold(next.town.gold, total)?;

    let mut decoration_ids = Vec::new();
    if def.kind == ItemKind::Decoration {
        let blueprint = decoration_blueprint(def.id)
            .ok_or_else(|| EconomyError::NotForSale(item_id.to_owned()))?;
        for _ in 0..quantity {
            let id = format!("deco-{}", uuid::Uuid::now_v7());
            next.decorations.push(Decoration {
                id: id.clone(),
                decoration_type: blueprint.decoration_type.to_owned(),
                level: blueprint.is_upgradable().then_some(1),
                effect: blueprint.effect,
                position: None,
            });
            decoration_ids.push(id);
        }
    } else {
        let room = def
            .max_quantity()
            .saturating_sub(quantity_of(&next.inventory, def.id));
        if def.is_stackable() && quantity > room {
            return Err(TransitionError::InvalidInput(format!(
                "only {room} more {item_id} fit in the inventory"
            )));
        }
        if !def.is_stackable() && quantity > 1 {
            return Err(TransitionError::InvalidInput(format!(
                "{item_id} can only be held once"
            )));
        }
        add_item(&mut next.inventory, def.id, quantity)?;
    }

    next.stats.items_purchased = next.stats.items_purchased.saturating_add(u64::from(quantity));
    record_progress(
        &mut next.missions,
        MissionGoal::PurchaseItems,
        None,
        u64::from(quantity),
    );

    let mut entry = ActivityEntry::new(event_id("purchase"), ActivityKind::Purchase, Utc::now());
    entry.item_id = Some(def.id.to_owned());
    entry.gold = Some(total);
    entry.message = Some(format!("Bought {quantity} x {}", def.name));
    push_entry(&mut next.activity_log, entry);

    Ok((
        next,
        PurchaseOutcome {
            item_id: def.id.to_owned(),
            quantity,
            gold_spent: total,
            decoration_ids,
        },
    ))
}

/// Use up one unit of a consumable and apply its effect. Returns what the
/// item granted.
pub fn consume_item(state: &WorldState, item_id: &str) -> Outcome<Reward> {
    finish(consume(state, item_id))
}

fn consume(state: &WorldState, item_id: &str) -> Result<(WorldState, Reward), TransitionError> {
    let def = item(item_id).ok_or_else(|| EconomyError::UnknownItem(item_id.to_owned()))?;
    if !def.is_consumable() {
        return Err(EconomyError::NotConsumable(item_id.to_owned()).into());
    }
    let mut next = state.clone();
    remove_item(&mut next.inventory, def.id, 1)?;

    let granted = match def.effect {
        ItemEffect::GrantGold(gold) => Reward { gold, xp: 0 },
        ItemEffect::GrantXp(xp) => Reward { gold: 0, xp },
        ItemEffect::None | ItemEffect::Bonus(..) => Reward::default(),
    };
    credit(&mut next, granted);
    next.stats.items_consumed = next.stats.items_consumed.saturating_add(1);

    let mut entry = ActivityEntry::new(event_id("consume"), ActivityKind::ItemConsume, Utc::now());
    entry.item_id = Some(def.id.to_owned());
    entry.gold = (granted.gold > 0).then_some(granted.gold);
    entry.xp = (granted.xp > 0).then_some(granted.xp);
    entry.message = Some(format!("Used {}", def.name));
    push_entry(&mut next.activity_log, entry);
    Ok((next, granted))
}

// ---------------------------------------------------------------------------
// Buildings and decorations
// ---------------------------------------------------------------------------

/// What an upgrade did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeOutcome {
    /// Building upgraded.
    pub building_type: BuildingType,
    /// Level after the upgrade.
    pub level: u8,
    /// What was debited.
    pub cost: UpgradeCost,
}

/// Raise a building one level, paying gold and materials.
pub fn upgrade_building(state: &WorldState, building: &str) -> Outcome<UpgradeOutcome> {
    finish(upgrade(state, building))
}

fn upgrade(
    state: &WorldState,
    building: &str,
) -> Result<(WorldState, UpgradeOutcome), TransitionError> {
    let building_type = parse_building(building)?;
    let current = state
        .building(building_type)
        .ok_or_else(|| WorldError::UnknownBuilding(building.to_owned()))?;
    let cost = upgrade_cost(building_type, current.level)
        .ok_or(WorldError::MaxLevel(building_type))?;

    let mut next = state.clone();
    next.town.gold = debit_gold(next.town.gold, cost.gold)?;
    for material in &cost.materials {
        remove_item(&mut next.inventory, &material.item_id, material.quantity)?;
    }
    let level = match next.building_mut(building_type) {
        Some(b) => {
            b.level = b.level.saturating_add(1);
            b.level
        }
        None => return Err(WorldError::UnknownBuilding(building.to_owned()).into()),
    };
    next.stats.buildings_upgraded = next.stats.buildings_upgraded.saturating_add(1);
    record_progress(&mut next.missions, MissionGoal::UpgradeBuildings, None, 1);

    let mut entry = ActivityEntry::new(
        event_id("upgrade"),
        ActivityKind::BuildingUpgrade,
        Utc::now(),
    );
    entry.building_type = Some(building_type);
    entry.gold = Some(cost.gold);
    entry.materials.clone_from(&cost.materials);
    entry.message = Some(format!("{building_type} reached level {level}"));
    push_entry(&mut next.activity_log, entry);

    Ok((
        next,
        UpgradeOutcome {
            building_type,
            level,
            cost,
        },
    ))
}

/// Move a building so its footprint starts at `(x, y)`. Rejected if the
/// footprint would leave the grid or overlap anything else.
pub fn move_building(state: &WorldState, building: &str, x: i64, y: i64) -> Outcome<Position> {
    finish(relocate_building(state, building, x, y))
}

fn relocate_building(
    state: &WorldState,
    building: &str,
    x: i64,
    y: i64,
) -> Result<(WorldState, Position), TransitionError> {
    let building_type = parse_building(building)?;
    let origin = cell(x, y)?;
    let footprint = state
        .building(building_type)
        .map(|b| b.footprint)
        .ok_or_else(|| WorldError::UnknownBuilding(building.to_owned()))?;
    let occupancy = occupancy_of(state, Some(building_type), None);
    check_placement(&occupancy, origin, footprint)?;

    let mut next = state.clone();
    if let Some(b) = next.building_mut(building_type) {
        b.position = origin;
    }
    Ok((next, origin))
}

/// Place a decoration (from storage or elsewhere on the map) at `(x, y)`.
pub fn place_decoration(state: &WorldState, id: &str, x: i64, y: i64) -> Outcome<Position> {
    finish(place(state, id, x, y))
}

fn place(
    state: &WorldState,
    id: &str,
    x: i64,
    y: i64,
) -> Result<(WorldState, Position), TransitionError> {
    let origin = cell(x, y)?;
    if !state.decorations.iter().any(|d| d.id == id) {
        return Err(WorldError::DecorationNotFound(id.to_owned()).into());
    }
    let occupancy = occupancy_of(state, None, Some(id));
    check_placement(&occupancy, origin, Footprint::UNIT)?;

    let mut next = state.clone();
    if let Some(d) = next.decorations.iter_mut().find(|d| d.id == id) {
        d.position = Some(origin);
    }
    Ok((next, origin))
}

/// Return a placed decoration to storage. Returns `false` (and writes
/// nothing) if it already was in storage.
pub fn store_decoration(state: &WorldState, id: &str) -> Outcome<bool> {
    let Some(decoration) = state.decorations.iter().find(|d| d.id == id) else {
        return finish(Err(WorldError::DecorationNotFound(id.to_owned()).into()));
    };
    if !decoration.is_placed() {
        return Transition::skip(Ok(false));
    }
    let mut next = state.clone();
    if let Some(d) = next.decorations.iter_mut().find(|d| d.id == id) {
        d.position = None;
    }
    Transition::commit(next, Ok(true))
}

// ---------------------------------------------------------------------------
// Missions and titles
// ---------------------------------------------------------------------------

/// Collect a completed mission's reward.
pub fn claim_mission(state: &WorldState, mission_id: &str) -> Outcome<Reward> {
    finish(claim(state, mission_id))
}

fn claim(state: &WorldState, mission_id: &str) -> Result<(WorldState, Reward), TransitionError> {
    let mission = state
        .missions
        .iter()
        .find(|m| m.id == mission_id)
        .ok_or_else(|| TransitionError::NotFound(format!("mission {mission_id}")))?;
    if mission.claimed {
        return Err(TransitionError::InvalidInput(format!(
            "mission {mission_id} is already claimed"
        )));
    }
    if !mission.progress.is_complete() {
        return Err(TransitionError::InvalidInput(format!(
            "mission {mission_id} is not complete ({}/{})",
            mission.progress.current, mission.progress.target
        )));
    }
    let reward = mission.reward;
    let title = mission.title.clone();

    let mut next = state.clone();
    if let Some(m) = next.missions.iter_mut().find(|m| m.id == mission_id) {
        m.claimed = true;
    }
    credit(&mut next, reward);
    let stats = &mut next.stats;
    stats.missions_claimed = stats.missions_claimed.saturating_add(1);
    stats.gold_earned = stats.gold_earned.saturating_add(reward.gold);
    stats.xp_earned = stats.xp_earned.saturating_add(reward.xp);

    let mut entry = ActivityEntry::new(
        event_id("mission"),
        ActivityKind::MissionComplete,
        Utc::now(),
    );
    entry.mission_id = Some(mission_id.to_owned());
    entry.gold = Some(reward.gold);
    entry.xp = Some(reward.xp);
    entry.message = Some(title);
    push_entry(&mut next.activity_log, entry);
    Ok((next, reward))
}

/// Equip an unlocked title, or clear the equipped title with `None`.
/// Returns the title now equipped.
pub fn equip_title(state: &WorldState, title_id: Option<&str>) -> Outcome<Option<String>> {
    let wanted = match title_id.map(str::trim).filter(|t| !t.is_empty()) {
        None => None,
        Some(id) => {
            if title_def(id).is_none() {
                return finish(Err(TransitionError::NotFound(format!("title {id}"))));
            }
            if !state.titles.iter().any(|t| t == id) {
                return finish(Err(TransitionError::InvalidInput(format!(
                    "title {id} is not unlocked"
                ))));
            }
            Some(id.to_owned())
        }
    };
    if state.equipped_title == wanted {
        return Transition::skip(Ok(wanted));
    }
    let mut next = state.clone();
    next.equipped_title.clone_from(&wanted);
    Transition::commit(next, Ok(wanted))
}
