use bigdecimal::{BigDecimal, Zero};

/// Decimal places kept for percentages
pub const PERCENT_SCALE: i64 = 4;

/// `numerator / basis * 100`, or zero when the basis is not positive
pub fn percent_of(numerator: &BigDecimal, basis: &BigDecimal) -> BigDecimal {
    if *basis <= BigDecimal::zero() {
        return BigDecimal::zero();
    }
    (numerator * BigDecimal::from(100) / basis).round(PERCENT_SCALE)
}
