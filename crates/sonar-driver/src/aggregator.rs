//! 采样聚合
//!
//! 每个扫描位置连续 ping `batch_size` 次（每次之后静置 `settle_ms`），
//! 过滤后取中位数，抑制单次多径/噪声离群值。
//!
//! # 纳入规则
//!
//! 一次测量仅当同时满足以下条件时参与中位数：
//! - 无故障（超时读数一律排除，不以 0 参与）
//! - `distance_cm >= 0`（偏差大于实测值的负距离直接拒绝，不截断为 0）
//! - `distance_cm < max_range_cm`
//!
//! 没有任何测量满足条件时返回 [`DriverError::NoValidSamples`]。

use crate::config::SamplingConfig;
use crate::error::DriverError;
use crate::metrics::SonarMetrics;
use crate::ranger::{Measurement, MeasurementFault, Ranger};
use sonar_hal::Clock;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// 单次测量的过滤结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleVerdict {
    Included,
    /// Ranger 报告了故障
    Faulted,
    /// 无故障但距离为负或超出量程
    Rejected,
}

/// 按纳入规则判定一次测量
pub fn classify(measurement: &Measurement, max_range_cm: f64) -> SampleVerdict {
    match measurement.outcome() {
        Err(_) => SampleVerdict::Faulted,
        Ok(d) if d >= 0.0 && d < max_range_cm => SampleVerdict::Included,
        Ok(_) => SampleVerdict::Rejected,
    }
}

/// 中位数：奇数取中间值，偶数取中间两值的平均；空集返回 `None`
///
/// 会就地排序 `values`。
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// 一批采样的聚合结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSummary {
    /// 中位数距离（厘米）
    pub distance_cm: f64,
    pub total: usize,
    pub included: usize,
    pub faulted: usize,
    pub rejected: usize,
}

/// 过滤并归约一批测量
pub fn reduce(batch: &[Measurement], max_range_cm: f64) -> Result<BatchSummary, DriverError> {
    let mut included = Vec::with_capacity(batch.len());
    let mut faulted = 0;
    let mut rejected = 0;

    for m in batch {
        match classify(m, max_range_cm) {
            SampleVerdict::Included => included.push(m.distance_cm),
            SampleVerdict::Faulted => faulted += 1,
            SampleVerdict::Rejected => rejected += 1,
        }
    }

    let count = included.len();
    match median(&mut included) {
        Some(distance_cm) => Ok(BatchSummary {
            distance_cm,
            total: batch.len(),
            included: count,
            faulted,
            rejected,
        }),
        None => Err(DriverError::NoValidSamples {
            total: batch.len(),
            faulted,
            rejected,
        }),
    }
}

/// 采样聚合器
pub struct SampleAggregator {
    config: SamplingConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<SonarMetrics>,
    /// 复用的批次缓冲区
    batch: Vec<Measurement>,
}

impl SampleAggregator {
    pub fn new(config: SamplingConfig, clock: Arc<dyn Clock>, metrics: Arc<SonarMetrics>) -> Self {
        let batch = Vec::with_capacity(config.batch_size);
        Self {
            config,
            clock,
            metrics,
            batch,
        }
    }

    /// 采集一批并归约为一个距离
    ///
    /// 耗时上界：`batch_size × (单次 ping 最坏耗时 + settle)`。
    pub fn aggregate(&mut self, ranger: &mut Ranger) -> Result<BatchSummary, DriverError> {
        self.batch.clear();
        for _ in 0..self.config.batch_size {
            let m = ranger.ping();
            self.count(&m);
            self.batch.push(m);
            self.clock.sleep(self.config.settle());
        }

        let result = reduce(&self.batch, self.config.max_range_cm);
        match &result {
            Ok(summary) => {
                self.metrics
                    .rejected_samples
                    .fetch_add(summary.rejected as u64, Ordering::Relaxed);
            },
            Err(DriverError::NoValidSamples { rejected, .. }) => {
                self.metrics
                    .rejected_samples
                    .fetch_add(*rejected as u64, Ordering::Relaxed);
                self.metrics.no_valid_samples.fetch_add(1, Ordering::Relaxed);
            },
            Err(_) => {},
        }
        result
    }

    fn count(&self, m: &Measurement) {
        self.metrics.pings.fetch_add(1, Ordering::Relaxed);
        match m.fault {
            MeasurementFault::None => {},
            MeasurementFault::EchoHighTimeout => {
                self.metrics.echo_high_timeouts.fetch_add(1, Ordering::Relaxed);
            },
            MeasurementFault::EchoLowTimeout => {
                self.metrics.echo_low_timeouts.fetch_add(1, Ordering::Relaxed);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RangerConfig;
    use sonar_hal::sim::{EchoResponse, SimBoard, SimScene};

    fn ok(d: f64) -> Measurement {
        Measurement::echo(0, d)
    }

    #[test]
    fn test_median_odd_even_empty() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut [7.5]), Some(7.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&ok(10.0), 400.0), SampleVerdict::Included);
        assert_eq!(classify(&ok(0.0), 400.0), SampleVerdict::Included);
        assert_eq!(classify(&ok(-2.14), 400.0), SampleVerdict::Rejected);
        assert_eq!(classify(&ok(400.0), 400.0), SampleVerdict::Rejected);
        assert_eq!(
            classify(
                &Measurement::faulted(MeasurementFault::EchoHighTimeout),
                400.0
            ),
            SampleVerdict::Faulted
        );
    }

    #[test]
    fn test_reduce_excludes_faults_instead_of_biasing_to_zero() {
        // 原型机会把 4 个超时读数（0）纳入中位数，得到 0
        let batch = [
            Measurement::faulted(MeasurementFault::EchoHighTimeout),
            Measurement::faulted(MeasurementFault::EchoHighTimeout),
            Measurement::faulted(MeasurementFault::EchoLowTimeout),
            Measurement::faulted(MeasurementFault::EchoHighTimeout),
            ok(120.0),
            ok(118.0),
            ok(500.0),
        ];
        let s = reduce(&batch, 400.0).unwrap();
        assert_eq!(s.distance_cm, 119.0);
        assert_eq!(s.included, 2);
        assert_eq!(s.faulted, 4);
        assert_eq!(s.rejected, 1);
        assert_eq!(s.total, 7);
    }

    #[test]
    fn test_reduce_empty_is_no_valid_samples() {
        let batch = [
            Measurement::faulted(MeasurementFault::EchoHighTimeout),
            ok(-1.0),
        ];
        match reduce(&batch, 400.0) {
            Err(DriverError::NoValidSamples {
                total,
                faulted,
                rejected,
            }) => {
                assert_eq!((total, faulted, rejected), (2, 1, 1));
            },
            other => panic!("Expected NoValidSamples, got {:?}", other),
        }
        assert!(reduce(&[], 400.0).unwrap_err().is_no_valid_samples());
    }

    #[test]
    fn test_aggregate_all_timeouts_is_bounded_and_fails_loudly() {
        let sim = SimBoard::virtual_time(SimScene::scripted());
        let clock = sim.sim_clock().unwrap();
        let board = sim.board();
        let mut ranger = Ranger::new(
            board.trigger,
            board.echo,
            board.clock.clone(),
            RangerConfig::default(),
        );
        let metrics = Arc::new(SonarMetrics::new());
        let mut agg =
            SampleAggregator::new(SamplingConfig::default(), board.clock, metrics.clone());

        let before = clock.now_us();
        let result = agg.aggregate(&mut ranger);
        let spent = clock.now_us() - before;

        assert!(result.unwrap_err().is_no_valid_samples());
        // 7 × (触发 10µs + 超时 28000µs + 一次轮询 + 静置 60ms)
        assert!(spent <= 7 * (10 + 28_001 + 60_000), "spent {}us", spent);

        let snap = metrics.snapshot();
        assert_eq!(snap.pings, 7);
        assert_eq!(snap.echo_high_timeouts, 7);
        assert_eq!(snap.no_valid_samples, 1);
    }

    #[test]
    fn test_aggregate_takes_median_of_scripted_batch() {
        let sim = SimBoard::virtual_time(SimScene::scripted());
        let scene = sim.scene();
        // 宽度 → 距离：0.01715 × w − 9
        for w in [2000u64, 2200, 1800, 6000, 2100] {
            scene.push(EchoResponse::Pulse {
                rise_after_us: 200,
                width_us: w,
            });
        }
        scene.push(EchoResponse::Silent);
        scene.push(EchoResponse::StuckHigh { rise_after_us: 200 });

        let board = sim.board();
        let mut ranger = Ranger::new(
            board.trigger,
            board.echo,
            board.clock.clone(),
            RangerConfig::default(),
        );
        let metrics = Arc::new(SonarMetrics::new());
        let mut agg =
            SampleAggregator::new(SamplingConfig::default(), board.clock, metrics.clone());

        let s = agg.aggregate(&mut ranger).unwrap();
        assert_eq!(s.included, 5);
        assert_eq!(s.faulted, 2);
        let expected = 0.0343 * 2100.0 / 2.0 - 9.0;
        assert!((s.distance_cm - expected).abs() < 1e-9, "{}", s.distance_cm);

        let snap = metrics.snapshot();
        assert_eq!(snap.echo_high_timeouts, 1);
        assert_eq!(snap.echo_low_timeouts, 1);
    }
}
