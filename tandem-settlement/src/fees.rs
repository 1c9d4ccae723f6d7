use tandem_core::config::BusinessRules;

/// Platform fee tier: the discounted rate applies from the package-hours
/// threshold upward.
pub fn fee_bps_for(package_hours: i32, rules: &BusinessRules) -> u32 {
    if package_hours >= rules.package_hours_threshold {
        rules.package_fee_bps
    } else {
        rules.platform_fee_bps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tier() {
        let rules = BusinessRules::default();
        assert_eq!(fee_bps_for(2, &rules), 1_500);
        assert_eq!(fee_bps_for(19, &rules), 1_500);
    }

    #[test]
    fn test_package_tier_from_threshold() {
        let rules = BusinessRules::default();
        assert_eq!(fee_bps_for(20, &rules), 1_000);
        assert_eq!(fee_bps_for(40, &rules), 1_000);
    }
}
