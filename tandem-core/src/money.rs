/// All amounts in the engine are integer cents.
pub type Cents = i64;

/// Apply a basis-point rate to an amount, rounding half up.
pub fn apply_bps(amount: Cents, bps: u32) -> Cents {
    (amount * bps as i64 + 5_000) / 10_000
}

/// Split a total into (fee, remainder). The remainder is always
/// `total - fee`, never recomputed from the rate, so the parts sum exactly.
pub fn split_bps(total: Cents, bps: u32) -> (Cents, Cents) {
    let fee = apply_bps(total, bps);
    (fee, total - fee)
}
