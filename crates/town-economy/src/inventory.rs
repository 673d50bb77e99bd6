//! Inventory normalization and operations.
//!
//! An inventory is an ordered list of [`InventoryEntry`] slots with unique
//! item ids. After normalization every slot names a cataloged item, holds
//! at least one unit, and respects the item's cap (1 for charms,
//! [`MAX_STACK`](crate::items::MAX_STACK) otherwise). All arithmetic is
//! checked or saturating.

use town_types::InventoryEntry;
use tracing::debug;

use crate::error::EconomyError;
use crate::items::item;

/// Normalize raw `(item_id, quantity)` pairs into an inventory.
///
/// - Unknown item ids are dropped.
/// - Negative quantities clamp to zero, and zero-quantity slots are dropped.
/// - Repeated ids merge into the first slot.
/// - Quantities are capped at the item's maximum.
pub fn normalize_inventory(raw: &[(String, i64)]) -> Vec<InventoryEntry> {
    let mut entries: Vec<InventoryEntry> = Vec::new();
    for (item_id, quantity) in raw {
        let Some(def) = item(item_id) else {
            debug!(item_id = %item_id, "dropping unknown inventory item");
            continue;
        };
        let quantity = u32::try_from((*quantity).max(0)).unwrap_or(u32::MAX);
        if let Some(existing) = entries.iter_mut().find(|e| e.item_id == *item_id) {
            existing.quantity = existing.quantity.saturating_add(quantity);
        } else {
            entries.push(InventoryEntry {
                item_id: def.id.to_owned(),
                quantity,
            });
        }
    }
    for entry in &mut entries {
        let cap = item(&entry.item_id).map_or(0, |d| d.max_quantity());
        entry.quantity = entry.quantity.min(cap);
    }
    entries.retain(|e| e.quantity > 0);
    entries
}

/// Check whether the inventory holds at least `amount` of an item.
pub fn has_item(inventory: &[InventoryEntry], item_id: &str, amount: u32) -> bool {
    quantity_of(inventory, item_id) >= amount
}

/// Quantity held of an item.
pub fn quantity_of(inventory: &[InventoryEntry], item_id: &str) -> u32 {
    inventory
        .iter()
        .find(|e| e.item_id == item_id)
        .map_or(0, |e| e.quantity)
}

/// Add `amount` of an item, saturating at the item's cap.
///
/// Returns the quantity actually added.
///
/// # Errors
///
/// Returns [`EconomyError::UnknownItem`] for an uncataloged id,
/// [`EconomyError::ZeroQuantity`] for `amount == 0`, or
/// [`EconomyError::AlreadyOwned`] when adding a held non-stackable item.
pub fn add_item(
    inventory: &mut Vec<InventoryEntry>,
    item_id: &str,
    amount: u32,
) -> Result<u32, EconomyError> {
    let def = item(item_id).ok_or_else(|| EconomyError::UnknownItem(item_id.to_owned()))?;
    if amount == 0 {
        return Err(EconomyError::ZeroQuantity);
    }
    let cap = def.max_quantity();
    let current = quantity_of(inventory, item_id);
    if !def.is_stackable() && current >= cap {
        return Err(EconomyError::AlreadyOwned(item_id.to_owned()));
    }
    let new_quantity = current.saturating_add(amount).min(cap);
    let added = new_quantity.saturating_sub(current);

    if let Some(entry) = inventory.iter_mut().find(|e| e.item_id == item_id) {
        entry.quantity = new_quantity;
    } else {
        inventory.push(InventoryEntry {
            item_id: def.id.to_owned(),
            quantity: new_quantity,
        });
    }
    Ok(added)
}

/// Remove `amount` of an item. The slot disappears when it reaches zero.
///
/// # Errors
///
/// Returns [`EconomyError::InsufficientItem`] if fewer than `amount` are
/// held; the inventory is left untouched.
pub fn remove_item(
    inventory: &mut Vec<InventoryEntry>,
    item_id: &str,
    amount: u32,
) -> Result<(), EconomyError> {
    let current = quantity_of(inventory, item_id);
    let remaining = current
        .checked_sub(amount)
        .ok_or_else(|| EconomyError::InsufficientItem {
            item_id: item_id.to_owned(),
            requested: amount,
            available: current,
        })?;

    if remaining == 0 {
        inventory.retain(|e| e.item_id != item_id);
    } else if let Some(entry) = inventory.iter_mut().find(|e| e.item_id == item_id) {
        entry.quantity = remaining;
    }
    Ok(())
}

/// Debit gold from a balance.
///
/// # Errors
///
/// Returns [`EconomyError::InsufficientGold`] when the balance is too low.
pub fn debit_gold(balance: u64, amount: u64) -> Result<u64, EconomyError> {
    balance
        .checked_sub(amount)
        .ok_or(EconomyError::InsufficientGold {
            needed: amount,
            available: balance,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(items: &[(&str, i64)]) -> Vec<(String, i64)> {
        items.iter().map(|(i, q)| ((*i).to_owned(), *q)).collect()
    }

    #[test]
    fn negative_quantity_is_dropped() {
        let inv = normalize_inventory(&raw(&[("stone_block", -5)]));
        assert!(inv.is_empty());
    }

    #[test]
    fn unknown_items_dropped_and_duplicates_merged() {
        let inv = normalize_inventory(&raw(&[
            ("timber", 3),
            ("unobtainium", 4),
            ("coal", 1),
            ("timber", 2),
        ]));
        assert_eq!(
            inv,
            vec![
                InventoryEntry {
                    item_id: "timber".to_owned(),
                    quantity: 5
                },
                InventoryEntry {
                    item_id: "coal".to_owned(),
                    quantity: 1
                },
            ]
        );
    }

    #[test]
    fn non_stackable_capped_at_one() {
        let inv = normalize_inventory(&raw(&[("lucky_clover", 3)]));
        assert_eq!(quantity_of(&inv, "lucky_clover"), 1);
    }

    #[test]
    fn add_and_remove() {
        let mut inv = Vec::new();
        assert_eq!(add_item(&mut inv, "ink", 4), Ok(4));
        assert_eq!(add_item(&mut inv, "ink", 2), Ok(2));
        assert!(has_item(&inv, "ink", 6));
        assert!(remove_item(&mut inv, "ink", 6).is_ok());
        assert!(inv.is_empty());
    }

    #[test]
    fn remove_insufficient_leaves_inventory_untouched() {
        let mut inv = normalize_inventory(&raw(&[("ink", 2)]));
        let err = remove_item(&mut inv, "ink", 3);
        assert_eq!(
            err,
            Err(EconomyError::InsufficientItem {
                item_id: "ink".to_owned(),
                requested: 3,
                available: 2
            })
        );
        assert_eq!(quantity_of(&inv, "ink"), 2);
    }

    #[test]
    fn second_charm_is_rejected() {
        let mut inv = Vec::new();
        assert_eq!(add_item(&mut inv, "golden_hammer", 1), Ok(1));
        assert_eq!(
            add_item(&mut inv, "golden_hammer", 1),
            Err(EconomyError::AlreadyOwned("golden_hammer".to_owned()))
        );
    }

    #[test]
    fn debit_gold_checks_balance() {
        assert_eq!(debit_gold(10, 4), Ok(6));
        assert!(debit_gold(3, 4).is_err());
    }
}
