//! 扫描与中位数的属性测试
//!
//! 使用 proptest 在随机几何/随机批次上验证不变量。

use proptest::prelude::*;
use sonar_driver::{SweepConfig, SweepDirection, SweepScheduler, median};

/// 生成合法的扫描几何：min < max 且跨度是步长的整数倍
fn geometry() -> impl Strategy<Value = SweepConfig> {
    (0i32..3000, 1i32..500, 1i32..40).prop_map(|(min, step, steps)| SweepConfig {
        min_pulse_us: min,
        max_pulse_us: min + step * steps,
        step_us: step,
    })
}

/// 长度为偶数的随机批次
fn even_batch() -> impl Strategy<Value = Vec<f64>> {
    (1usize..10).prop_flat_map(|half| prop::collection::vec(0.0..400.0f64, half * 2))
}

proptest! {
    /// 指令值永不越界，角度永远在 [0, 180]
    #[test]
    fn sweep_never_overshoots(config in geometry(), n in 1usize..400) {
        let mut s = SweepScheduler::new(&config).unwrap();
        for _ in 0..n {
            let p = s.advance();
            prop_assert!(p.command_value >= config.min_pulse_us);
            prop_assert!(p.command_value <= config.max_pulse_us);
            prop_assert!((0.0..=180.0).contains(&p.angle_degrees));
        }
    }

    /// 单程内角度单调，且恰好在边界反向
    #[test]
    fn sweep_legs_are_monotonic_and_reflect_at_bounds(config in geometry()) {
        let mut s = SweepScheduler::new(&config).unwrap();
        let leg = s.positions_per_leg();
        let positions: Vec<_> = (0..leg * 3).map(|_| s.advance()).collect();

        for w in positions.windows(2) {
            let (a, b) = (w[0], w[1]);
            let delta = b.command_value - a.command_value;
            prop_assert_eq!(delta.abs(), config.step_us);
            if delta < 0 {
                prop_assert!(b.angle_degrees < a.angle_degrees);
            } else {
                prop_assert!(b.angle_degrees > a.angle_degrees);
            }
            // 方向只在边界改变
            if a.direction != b.direction {
                prop_assert!(
                    b.command_value == config.min_pulse_us
                        || b.command_value == config.max_pulse_us
                );
            }
        }
    }

    /// 第一个单程从 0° 扫到 180°，覆盖全部端点
    #[test]
    fn sweep_first_leg_covers_full_arc(config in geometry()) {
        let mut s = SweepScheduler::new(&config).unwrap();
        let leg: Vec<_> = (0..s.positions_per_leg()).map(|_| s.advance()).collect();

        prop_assert_eq!(leg[0].angle_degrees, 0.0);
        prop_assert_eq!(leg[0].direction, SweepDirection::Up);
        let last = leg[leg.len() - 1];
        prop_assert_eq!(last.angle_degrees, 180.0);
        prop_assert_eq!(last.command_value, config.max_pulse_us);
    }

    /// 奇数个元素的中位数是原集合中的元素，且两侧数量相等
    #[test]
    fn median_of_odd_batch_splits_evenly(
        mut values in prop::collection::vec(-1000.0..1000.0f64, 1..20)
    ) {
        if values.len() % 2 == 0 {
            values.pop();
        }
        let original = values.clone();
        let m = median(&mut values).unwrap();

        prop_assert!(original.contains(&m));
        let below = original.iter().filter(|v| **v < m).count();
        let above = original.iter().filter(|v| **v > m).count();
        prop_assert!(below <= original.len() / 2);
        prop_assert!(above <= original.len() / 2);
    }

    /// 偶数个元素的中位数是排序后中间两值的平均
    #[test]
    fn median_of_even_batch_is_mean_of_middle(mut even in even_batch()) {
        prop_assert_eq!(even.len() % 2, 0);
        let mut sorted = even.clone();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let expected = (sorted[mid - 1] + sorted[mid]) / 2.0;

        prop_assert_eq!(median(&mut even), Some(expected));
    }

    /// 中位数与输入顺序无关
    #[test]
    fn median_is_order_independent(values in prop::collection::vec(-50.0..450.0f64, 1..15)) {
        let mut forward = values.clone();
        let mut reversed: Vec<f64> = values.iter().rev().copied().collect();
        prop_assert_eq!(median(&mut forward), median(&mut reversed));
    }
}
