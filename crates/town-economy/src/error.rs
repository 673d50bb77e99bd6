//! Error types for the `town-economy` crate.
//!
//! Every variant describes why a requested purchase, consumption or debit
//! was refused. The caller turns these into an `InvalidInput` or
//! `NotFound` result without writing anything.

/// Errors that can occur in economy operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EconomyError {
    /// The item id is not in the catalog.
    #[error("unknown item: {0}")]
    UnknownItem(String),

    /// The item exists but the shop does not sell it.
    #[error("item is not for sale: {0}")]
    NotForSale(String),

    /// The item has no use effect.
    #[error("item cannot be consumed: {0}")]
    NotConsumable(String),

    /// A zero quantity was requested.
    #[error("quantity must be at least 1")]
    ZeroQuantity,

    /// Not enough gold for the debit.
    #[error("insufficient gold: need {needed}, have {available}")]
    InsufficientGold {
        /// Gold required.
        needed: u64,
        /// Gold held.
        available: u64,
    },

    /// Not enough of an item for the debit.
    #[error("insufficient {item_id}: need {requested}, have {available}")]
    InsufficientItem {
        /// The item.
        item_id: String,
        /// Quantity required.
        requested: u32,
        /// Quantity held.
        available: u32,
    },

    /// The item is non-stackable and one is already held.
    #[error("item is not stackable and already owned: {0}")]
    AlreadyOwned(String),

    /// Arithmetic overflow in a currency or quantity calculation.
    #[error("arithmetic overflow in economy calculation")]
    ArithmeticOverflow,
}
