use crate::error::{AppError, Result};
use crate::models::booking::CommissionSplit;

/// Basis points in a whole.
const BPS_DENOMINATOR: i64 = 10_000;

/// Splits `gross_amount` into platform commission and partner payout.
///
/// The commission is `gross * rate_bps / 10000` rounded half-up to the
/// smallest currency unit; the payout is whatever remains, so the two parts
/// always add back to the gross exactly.
pub fn split(gross_amount: i64, rate_bps: i64) -> Result<CommissionSplit> {
    if gross_amount < 0 {
        return Err(AppError::Validation(
            "Gross amount cannot be negative".to_string(),
        ));
    }
    if !(0..=BPS_DENOMINATOR).contains(&rate_bps) {
        return Err(AppError::Validation(format!(
            "Commission rate must be between 0 and {} basis points",
            BPS_DENOMINATOR
        )));
    }

    let scaled = i128::from(gross_amount) * i128::from(rate_bps);
    let rounded = (scaled + i128::from(BPS_DENOMINATOR / 2)) / i128::from(BPS_DENOMINATOR);
    // rounded <= gross_amount because rate_bps <= 10000
    let commission_amount = i64::try_from(rounded)
        .map_err(|_| AppError::Internal("Commission overflow".to_string()))?;

    Ok(CommissionSplit {
        gross_amount,
        commission_amount,
        net_partner_amount: gross_amount - commission_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn quarter_of_fifty_rounds_half_up() {
        let s = split(50, 2500).unwrap();
        assert_eq!(s.commission_amount, 13);
        assert_eq!(s.net_partner_amount, 37);
    }

    #[test]
    fn exact_quarters_are_not_rounded() {
        let s = split(120, 2500).unwrap();
        assert_eq!(s.commission_amount, 30);
        assert_eq!(s.net_partner_amount, 90);
    }

    #[test]
    fn below_half_rounds_down() {
        // 0.25 * 350 = 87.5 -> 88, 0.25 * 1 = 0.25 -> 0, 0.25 * 3 = 0.75 -> 1
        assert_eq!(split(350, 2500).unwrap().commission_amount, 88);
        assert_eq!(split(1, 2500).unwrap().commission_amount, 0);
        assert_eq!(split(3, 2500).unwrap().commission_amount, 1);
    }

    #[test]
    fn zero_gross_splits_to_zero() {
        let s = split(0, 2500).unwrap();
        assert_eq!((s.commission_amount, s.net_partner_amount), (0, 0));
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(split(-1, 2500).is_err());
        assert!(split(100, -1).is_err());
        assert!(split(100, 10_001).is_err());
    }

    proptest! {
        #[test]
        fn parts_always_sum_to_gross(gross in 0i64..=i64::MAX, rate in 0i64..=10_000) {
            let s = split(gross, rate).unwrap();
            prop_assert_eq!(s.commission_amount + s.net_partner_amount, gross);
            prop_assert!(s.commission_amount >= 0);
            prop_assert!(s.net_partner_amount >= 0);
        }

        #[test]
        fn non_terminating_quarters_stay_exact(gross in 0i64..1_000_000_000) {
            let s = split(gross, 2500).unwrap();
            prop_assert_eq!(s.commission_amount, (gross + 2) / 4);
            prop_assert_eq!(s.commission_amount + s.net_partner_amount, gross);
        }
    }
}
