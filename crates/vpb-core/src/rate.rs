//! 订阅速率信息：Hub 权威订阅表的值类型。

/// 每个 `(propId, areaId)` 对的订阅参数。
///
/// `(propId,areaId)` 是否"已订阅"等价于是否存在一条 `RateInfo`。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateInfo {
    pub update_rate_hz: f32,
    pub variable_update_rate: bool,
    pub resolution: f32,
}

/// `updateRateHz` 比较时允许的绝对容差。
///
/// 重复的订阅请求是廉价的 no-op：这是本容差存在的唯一原因，既不应收紧也不应放宽，
/// 除非确认了真实后端的浮点舍入行为。
pub const RATE_HZ_EPSILON: f32 = 1e-3;

impl RateInfo {
    pub fn new(update_rate_hz: f32, variable_update_rate: bool, resolution: f32) -> Self {
        Self {
            update_rate_hz,
            variable_update_rate,
            resolution,
        }
    }

    /// 比较两条 `RateInfo` 是否"实质相同"：`updateRateHz` 允许 `RATE_HZ_EPSILON`
    /// 容差，`variableUpdateRate`/`resolution` 要求严格相等。
    pub fn approximately_equals(&self, other: &RateInfo) -> bool {
        (self.update_rate_hz - other.update_rate_hz).abs() <= RATE_HZ_EPSILON
            && self.variable_update_rate == other.variable_update_rate
            && self.resolution == other.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn identical_rates_are_equal() {
        let a = RateInfo::new(10.0, false, 0.0);
        let b = RateInfo::new(10.0, false, 0.0);
        assert!(a.approximately_equals(&b));
    }

    #[test]
    fn rate_within_epsilon_is_equal() {
        let a = RateInfo::new(10.0, false, 0.0);
        let b = RateInfo::new(10.0 + RATE_HZ_EPSILON / 2.0, false, 0.0);
        assert!(a.approximately_equals(&b));
    }

    #[test]
    fn rate_beyond_epsilon_is_not_equal() {
        let a = RateInfo::new(10.0, false, 0.0);
        let b = RateInfo::new(10.1, false, 0.0);
        assert!(!a.approximately_equals(&b));
    }

    #[test]
    fn vur_and_resolution_require_strict_equality() {
        let a = RateInfo::new(10.0, true, 0.5);
        let b = RateInfo::new(10.0, false, 0.5);
        assert!(!a.approximately_equals(&b));

        let c = RateInfo::new(10.0, true, 0.50001);
        assert!(!a.approximately_equals(&c));
    }

    proptest! {
        #[test]
        fn approx_eq_is_symmetric(a_hz in -100.0f32..100.0, b_hz in -100.0f32..100.0, vur in any::<bool>(), res in -10.0f32..10.0) {
            let a = RateInfo::new(a_hz, vur, res);
            let b = RateInfo::new(b_hz, vur, res);
            prop_assert_eq!(a.approximately_equals(&b), b.approximately_equals(&a));
        }
    }
}
