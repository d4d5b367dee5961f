use rust_decimal::Decimal;

/// Retention options offered to uploaders, in days.
pub const DURATION_OPTIONS: [i64; 3] = [1, 7, 30];

/// Fee for a retention duration. Only the enumerated durations have a
/// price; anything else is rejected by the caller before the payment gate
/// is ever involved.
pub fn price_for(duration_days: i64) -> Option<Decimal> {
    match duration_days {
        1 => Some(Decimal::new(5, 2)),   // $0.05
        7 => Some(Decimal::new(15, 2)),  // $0.15
        30 => Some(Decimal::new(25, 2)), // $0.25
        _ => None,
    }
}

pub fn is_valid_duration(duration_days: i64) -> bool {
    price_for(duration_days).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerated_durations_have_stable_positive_prices() {
        for days in DURATION_OPTIONS {
            let price = price_for(days).unwrap();
            assert!(price > Decimal::ZERO);
            // Deterministic across calls.
            assert_eq!(price_for(days), Some(price));
        }
        assert_eq!(price_for(7).unwrap().to_string(), "0.15");
        assert_eq!(price_for(1).unwrap().to_string(), "0.05");
        assert_eq!(price_for(30).unwrap().to_string(), "0.25");
    }

    #[test]
    fn other_durations_have_no_price() {
        for days in [0, -1, 2, 14, 31, 365] {
            assert_eq!(price_for(days), None);
            assert!(!is_valid_duration(days));
        }
    }
}
