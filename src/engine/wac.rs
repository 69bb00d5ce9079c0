//! Weighted average cost: a direction-aware running price state.

use crate::domain::{Decimal, PositionAveragePrice, WacMethodData};

/// Scale of the final WAC price. The running cost basis is carried at full
/// working precision and only the derived average is rounded.
pub const WAC_PRICE_SCALE: u32 = 12;

/// Immutable running WAC state.
///
/// `apply_trade` is a pure function of this value and its inputs: no clock,
/// no I/O. Trades must be applied in ascending sequence number; the fold is
/// not order-independent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WacState {
    pub avg_price: Decimal,
    pub total_cost_basis: Decimal,
    pub net_quantity: i64,
    pub last_sequence: i64,
}

impl WacState {
    /// The flat starting state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a persisted price row. The net quantity comes from the
    /// snapshot the price row belongs to, not from the price itself.
    pub fn from_price(price: &PositionAveragePrice, net_quantity: i64) -> Self {
        WacState {
            avg_price: price.price,
            total_cost_basis: price.method_data.total_cost_basis,
            net_quantity,
            last_sequence: price.method_data.last_updated_sequence,
        }
    }

    /// The persistable method state for this running value.
    pub fn method_data(&self) -> WacMethodData {
        WacMethodData {
            total_cost_basis: self.total_cost_basis,
            last_updated_sequence: self.last_sequence,
        }
    }

    /// Apply one trade and return the successor state.
    ///
    /// Exactly one of the direction rules fires:
    /// - cross zero: position flips sign; restart the average at the
    ///   crossing trade's price over the residual quantity
    /// - flat: position closes to zero; average and cost basis reset
    /// - toward zero: partial close; the average is carried unchanged
    /// - from flat / away from zero: the average re-derives from the
    ///   accumulated cost basis
    ///
    /// The average is rounded HALF_UP to 12 fractional digits whenever it is
    /// re-derived, and carried unrounded otherwise.
    pub fn apply_trade(&self, sequence_num: i64, signed_quantity: i64, price: Decimal) -> WacState {
        // Quantities are range-checked at ingestion; a MIN here is a bug.
        assert!(
            signed_quantity != i64::MIN,
            "signed quantity out of range in WAC fold"
        );

        let old = self.net_quantity;
        let new = old + signed_quantity;
        let qty = Decimal::from_i64(signed_quantity);

        let crosses_zero = (old > 0 && new < 0) || (old < 0 && new > 0);
        let toward_zero = old != 0 && (old > 0) != (signed_quantity > 0);

        let (avg_price, total_cost_basis) = if crosses_zero {
            (
                price.round_half_up(WAC_PRICE_SCALE),
                price * Decimal::from_i64(new),
            )
        } else if new == 0 {
            (Decimal::zero(), Decimal::zero())
        } else if toward_zero {
            (self.avg_price, self.total_cost_basis + self.avg_price * qty)
        } else if old == 0 {
            (
                price.round_half_up(WAC_PRICE_SCALE),
                price * Decimal::from_i64(new),
            )
        } else {
            let basis = self.total_cost_basis + price * qty;
            (
                (basis.abs() / Decimal::from_i64(new).abs()).round_half_up(WAC_PRICE_SCALE),
                basis,
            )
        };

        WacState {
            avg_price,
            total_cost_basis,
            net_quantity: new,
            last_sequence: sequence_num,
        }
    }
}
