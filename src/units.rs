use rust_decimal::Decimal;

/// Converts between client-facing decimal amounts and the raw u64 base
/// units the ledger accounts in.
#[derive(Debug, Clone, Copy)]
pub struct UnitConverter {
    /// Internal storage scale (e.g. 6 for a USD stable)
    decimals: u32,
    /// Max allowed decimal places for input (e.g. 2 for display)
    display_decimals: u32,
}

impl UnitConverter {
    pub fn new(decimals: u32, display_decimals: u32) -> Self {
        Self { decimals, display_decimals: display_decimals.min(decimals) }
    }

    pub fn to_raw(&self, amount: Decimal) -> Result<u64, String> {
        if amount.is_sign_negative() {
            return Err(format!("Amount {} is negative", amount));
        }
        // Example: if display_decimals is 2, input 1.23 is valid, 1.234 is invalid.
        if amount.normalize().scale() > self.display_decimals {
            return Err(format!(
                "Amount {} exceeds max precision {}",
                amount, self.display_decimals
            ));
        }
        let multiplier = Decimal::from(
            10_u64.checked_pow(self.decimals).ok_or("Decimals too large, overflow")?,
        );

        (amount * multiplier)
            .round()
            .to_string()
            .parse::<u64>()
            .map_err(|_| "Amount overflow".to_string())
    }

    pub fn to_display(&self, raw: u64) -> Option<Decimal> {
        let divisor = Decimal::from(10_u64.checked_pow(self.decimals)?);
        Some(
            (Decimal::from(raw) / divisor).round_dp_with_strategy(
                self.display_decimals,
                rust_decimal::RoundingStrategy::ToZero,
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromStr;

    #[test]
    fn test_raw_conversion() {
        let conv = UnitConverter::new(6, 2);
        let amount = Decimal::from_str("10.50").unwrap();
        assert_eq!(conv.to_raw(amount).unwrap(), 10_500_000);
    }

    #[test]
    fn test_precision_limit() {
        let conv = UnitConverter::new(6, 2);
        let amount = Decimal::from_str("1.234").unwrap();
        let result = conv.to_raw(amount);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err(), "Amount 1.234 exceeds max precision 2");
    }

    #[test]
    fn test_negative_rejected() {
        let conv = UnitConverter::new(6, 2);
        assert!(conv.to_raw(Decimal::from_str("-1").unwrap()).is_err());
    }

    #[test]
    fn test_overflow() {
        let conv = UnitConverter::new(6, 6);
        // 2e13 * 1e6 = 2e19 > u64::MAX
        let amount = Decimal::from_str("20000000000000").unwrap();
        assert!(conv.to_raw(amount).is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let conv = UnitConverter::new(6, 2);
        let display = conv.to_display(10_500_000).unwrap();
        assert_eq!(display.to_string(), "10.50");
        assert_eq!(conv.to_raw(display).unwrap(), 10_500_000);
    }
}
