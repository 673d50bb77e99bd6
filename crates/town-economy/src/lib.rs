//! Item catalog, inventory bookkeeping and reward calculation.
//!
//! All currency and quantity arithmetic is integer and checked or
//! saturating. Randomness (material drops) always comes from a
//! caller-supplied [`rand::Rng`] so results are reproducible in tests.
//!
//! # Modules
//!
//! - [`error`] -- Reasons a purchase, consumption or debit is refused.
//! - [`items`] -- The fixed item catalog with prices and effects.
//! - [`inventory`] -- Normalization and add/remove/debit operations.
//! - [`rewards`] -- Time-based rewards, active bonuses and material drops.

pub mod error;
pub mod inventory;
pub mod items;
pub mod rewards;

// Re-export primary types at crate root.
pub use error::EconomyError;
pub use inventory::{add_item, debit_gold, has_item, normalize_inventory, quantity_of, remove_item};
pub use items::{ITEMS, ItemDef, ItemEffect, MAX_STACK, is_material, item};
pub use rewards::{
    Bonuses, RewardRates, WorkReward, active_bonuses, apply_bonuses, compute_work_reward,
    elapsed_minutes, roll_material_drops, time_reward,
};
