//! Time-based rewards and material drops for completed work.
//!
//! A completion pays `minutes * building_level * rate` gold and xp, where
//! `minutes` is the elapsed assignment time rounded up to whole minutes.
//! Active bonuses (placed decorations and held charms) then scale the
//! gold and xp, and scale the number of material drop rolls:
//!
//! | Building level | Base rolls        |
//! |----------------|-------------------|
//! | 1              | 1                 |
//! | 2              | uniform {1, 2}    |
//! | 3+             | uniform {1, 2, 3} |
//!
//! The base is multiplied by `1 + material_drop_bonus`; the integer part
//! is guaranteed and the fractional remainder is one extra roll granted
//! with that probability. Each roll picks uniformly from the building's
//! material candidates, and the results are aggregated by item id.
//!
//! All randomness comes from a caller-supplied [`Rng`] so tests can seed it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use town_types::{BuildingType, EffectKind, ItemAmount, Reward, WorldState};
use town_world::blueprint;

use crate::items::{ItemEffect, item};

/// Milliseconds per minute.
const MINUTE_MS: i64 = 60_000;

/// Upper bound on any single bonus, so a hand-edited state cannot explode
/// the economy.
const MAX_BONUS: f64 = 4.0;

/// Gold and xp earned per minute per building level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardRates {
    /// Gold per minute per level.
    pub gold_rate: f64,
    /// Xp per minute per level.
    pub xp_rate: f64,
}

impl Default for RewardRates {
    fn default() -> Self {
        Self {
            gold_rate: 1.0,
            xp_rate: 2.0,
        }
    }
}

/// Fractional bonuses currently in effect. `0.0` means no bonus.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bonuses {
    /// Extra material drop rolls, as a fraction of the base.
    pub material_drop: f64,
    /// Extra gold, as a fraction.
    pub gold: f64,
    /// Extra xp, as a fraction.
    pub xp: f64,
}

impl Bonuses {
    fn add(&mut self, kind: EffectKind, amount: f64) {
        let slot = match kind {
            EffectKind::MaterialDrop => &mut self.material_drop,
            EffectKind::GoldBonus => &mut self.gold,
            EffectKind::XpBonus => &mut self.xp,
        };
        *slot = (*slot + amount.max(0.0)).min(MAX_BONUS);
    }

    /// Multiplier applied to the base number of drop rolls.
    pub fn drop_multiplier(&self) -> f64 {
        1.0 + self.material_drop
    }
}

/// Everything a single completion pays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkReward {
    /// Elapsed whole minutes.
    pub minutes: u64,
    /// Time reward before bonuses.
    pub base: Reward,
    /// Time reward after bonuses.
    pub reward: Reward,
    /// Aggregated material drops, sorted by item id.
    pub materials: Vec<ItemAmount>,
}

/// Elapsed minutes between assignment and completion, rounded up.
///
/// Returns 0 when either timestamp is missing or the clock went backwards.
pub fn elapsed_minutes(assigned: Option<DateTime<Utc>>, completed: Option<DateTime<Utc>>) -> u64 {
    let (Some(assigned), Some(completed)) = (assigned, completed) else {
        return 0;
    };
    let elapsed_ms = completed.signed_duration_since(assigned).num_milliseconds();
    if elapsed_ms <= 0 {
        return 0;
    }
    let whole = elapsed_ms / MINUTE_MS;
    let minutes = if elapsed_ms % MINUTE_MS == 0 {
        whole
    } else {
        whole.saturating_add(1)
    };
    u64::try_from(minutes).unwrap_or(0)
}

/// Gold and xp for `minutes` of work at a building of `level`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn time_reward(minutes: u64, level: u8, rates: RewardRates) -> Reward {
    let units = minutes.saturating_mul(u64::from(level)) as f64;
    Reward {
        gold: (units * rates.gold_rate.max(0.0)).floor() as u64,
        xp: (units * rates.xp_rate.max(0.0)).floor() as u64,
    }
}

/// Scale a reward by the active gold and xp bonuses, truncating.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn apply_bonuses(reward: Reward, bonuses: &Bonuses) -> Reward {
    Reward {
        gold: (reward.gold as f64 * (1.0 + bonuses.gold)).floor() as u64,
        xp: (reward.xp as f64 * (1.0 + bonuses.xp)).floor() as u64,
    }
}

/// Collect the bonuses from placed decorations and held charms.
///
/// Decorations in storage contribute nothing. A decoration's bonus is
/// `bonus_per_level * level`.
pub fn active_bonuses(state: &WorldState) -> Bonuses {
    let mut bonuses = Bonuses::default();
    for deco in state.decorations.iter().filter(|d| d.is_placed()) {
        if let Some(effect) = deco.effect {
            let level = f64::from(deco.level.unwrap_or(1));
            bonuses.add(effect.kind, effect.bonus_per_level * level);
        }
    }
    for entry in &state.inventory {
        if let Some(ItemEffect::Bonus(kind, amount)) = item(&entry.item_id).map(|d| d.effect) {
            bonuses.add(kind, amount);
        }
    }
    bonuses
}

/// Base number of drop rolls for a building level.
pub fn base_drop_count(level: u8, rng: &mut impl Rng) -> u32 {
    match level {
        0 | 1 => 1,
        2 => rng.random_range(1..=2),
        _ => rng.random_range(1..=3),
    }
}

/// Scale a base roll count by a multiplier; the fractional remainder is an
/// extra roll granted with probability equal to that remainder.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn scaled_roll_count(base: u32, multiplier: f64, rng: &mut impl Rng) -> u32 {
    let total = f64::from(base) * multiplier.max(0.0);
    let guaranteed = total.floor();
    let remainder = total - guaranteed;
    let mut rolls = guaranteed as u32;
    if remainder > 0.0 && rng.random::<f64>() < remainder {
        rolls = rolls.saturating_add(1);
    }
    rolls
}

/// Roll material drops for a completion at the given building.
pub fn roll_material_drops(
    building_type: BuildingType,
    level: u8,
    bonuses: &Bonuses,
    rng: &mut impl Rng,
) -> Vec<ItemAmount> {
    let candidates = blueprint(building_type).material_candidates;
    if candidates.is_empty() {
        return Vec::new();
    }
    let base = base_drop_count(level, rng);
    let rolls = scaled_roll_count(base, bonuses.drop_multiplier(), rng);

    let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
    for _ in 0..rolls {
        let index = rng.random_range(0..candidates.len());
        if let Some(id) = candidates.get(index) {
            let slot = counts.entry(id).or_insert(0);
            *slot = slot.saturating_add(1);
        }
    }
    counts
        .into_iter()
        .map(|(item_id, quantity)| ItemAmount {
            item_id: item_id.to_owned(),
            quantity,
        })
        .collect()
}

/// Compute everything a completion pays.
pub fn compute_work_reward(
    assigned: Option<DateTime<Utc>>,
    completed: Option<DateTime<Utc>>,
    building_type: BuildingType,
    level: u8,
    bonuses: &Bonuses,
    rates: RewardRates,
    rng: &mut impl Rng,
) -> WorkReward {
    let minutes = elapsed_minutes(assigned, completed);
    let base = time_reward(minutes, level, rates);
    WorkReward {
        minutes,
        base,
        reward: apply_bonuses(base, bonuses),
        materials: roll_material_drops(building_type, level, bonuses, rng),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use town_types::{Decoration, InventoryEntry, PassiveEffect, Position};

    use super::*;

    #[test]
    fn seven_minutes_at_level_three() {
        let t0 = Utc::now();
        let minutes = elapsed_minutes(Some(t0), Some(t0 + Duration::minutes(7)));
        assert_eq!(minutes, 7);
        let reward = time_reward(minutes, 3, RewardRates::default());
        assert_eq!(reward, Reward { gold: 21, xp: 42 });
    }

    #[test]
    fn partial_minutes_round_up() {
        let t0 = Utc::now();
        assert_eq!(elapsed_minutes(Some(t0), Some(t0 + Duration::seconds(361))), 7);
        assert_eq!(elapsed_minutes(Some(t0), Some(t0 + Duration::seconds(1))), 1);
    }

    #[test]
    fn missing_or_regressing_clock_pays_nothing() {
        let t0 = Utc::now();
        assert_eq!(elapsed_minutes(None, Some(t0)), 0);
        assert_eq!(elapsed_minutes(Some(t0), None), 0);
        assert_eq!(elapsed_minutes(Some(t0), Some(t0 - Duration::minutes(3))), 0);
        assert_eq!(time_reward(0, 5, RewardRates::default()), Reward::default());
    }

    #[test]
    fn fractional_rates_truncate() {
        let rates = RewardRates {
            gold_rate: 0.5,
            xp_rate: 1.5,
        };
        assert_eq!(time_reward(3, 1, rates), Reward { gold: 1, xp: 4 });
    }

    #[test]
    fn bonuses_come_from_placed_decorations_and_charms() {
        let mut state = WorldState::default();
        state.decorations.push(Decoration {
            id: "f".to_owned(),
            decoration_type: "fountain".to_owned(),
            level: Some(3),
            effect: Some(PassiveEffect {
                kind: EffectKind::GoldBonus,
                bonus_per_level: 0.5,
            }),
            position: Some(Position::new(0, 0)),
        });
        state.decorations.push(Decoration {
            id: "stored".to_owned(),
            decoration_type: "windmill".to_owned(),
            level: Some(5),
            effect: Some(PassiveEffect {
                kind: EffectKind::MaterialDrop,
                bonus_per_level: 1.0,
            }),
            position: None,
        });
        state.inventory.push(InventoryEntry {
            item_id: "lucky_clover".to_owned(),
            quantity: 1,
        });
        let bonuses = active_bonuses(&state);
        assert!((bonuses.gold - 1.5).abs() < 1e-9);
        assert!((bonuses.material_drop - 0.25).abs() < 1e-9);
        assert!(bonuses.xp.abs() < 1e-9);

        let scaled = apply_bonuses(Reward { gold: 10, xp: 10 }, &bonuses);
        assert_eq!(scaled, Reward { gold: 25, xp: 10 });
    }

    #[test]
    fn level_one_without_bonus_drops_exactly_one() {
        for seed in 0..50 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let drops = roll_material_drops(BuildingType::Forge, 1, &Bonuses::default(), &mut rng);
            let total: u32 = drops.iter().map(|d| d.quantity).sum();
            assert_eq!(total, 1);
            assert!(drops.iter().all(|d| d.item_id == "iron_ore" || d.item_id == "coal"));
        }
    }

    #[test]
    fn level_three_drops_between_one_and_three() {
        let mut seen = [false; 4];
        for seed in 0..200 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let drops =
                roll_material_drops(BuildingType::Library, 3, &Bonuses::default(), &mut rng);
            let total: u32 = drops.iter().map(|d| d.quantity).sum();
            assert!((1..=3).contains(&total));
            if let Some(slot) = seen.get_mut(total as usize) {
                *slot = true;
            }
        }
        assert!(seen.get(1..).unwrap().iter().all(|s| *s));
    }

    #[test]
    fn whole_multiplier_is_guaranteed() {
        let bonuses = Bonuses {
            material_drop: 1.0,
            ..Bonuses::default()
        };
        for seed in 0..20 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let drops = roll_material_drops(BuildingType::Harbor, 1, &bonuses, &mut rng);
            let total: u32 = drops.iter().map(|d| d.quantity).sum();
            assert_eq!(total, 2);
        }
    }

    #[test]
    fn fractional_multiplier_sometimes_adds_a_roll() {
        let mut extra = 0;
        let mut plain = 0;
        for seed in 0..200 {
            let mut rng = SmallRng::seed_from_u64(seed);
            match scaled_roll_count(1, 1.5, &mut rng) {
                1 => plain += 1,
                2 => extra += 1,
                other => panic!("unexpected roll count {other}"),
            }
        }
        assert!(extra > 0 && plain > 0);
    }

    #[test]
    fn drops_are_aggregated_by_item() {
        let bonuses = Bonuses {
            material_drop: 3.0,
            ..Bonuses::default()
        };
        let mut rng = SmallRng::seed_from_u64(7);
        let drops = roll_material_drops(BuildingType::Tavern, 5, &bonuses, &mut rng);
        let ids: Vec<&str> = drops.iter().map(|d| d.item_id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.dedup();
        assert_eq!(ids, sorted);
        assert!(drops.len() <= 2);
    }
}
