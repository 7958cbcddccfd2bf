use log::{debug, trace};
use nalgebra::DMatrix;

use super::config::InterpolatorConfig;
use super::sample::{Sample, Timestamp};
use super::solve::{solve_normal_cholesky, solve_qr};

/// Samples closer than this on the sample clock share a slot.
pub const MERGE_WINDOW_NS: u64 = 2_000_000;
/// How far a lone sample may be from the query before it is considered stale.
pub const STARVATION_LIMIT_NS: u64 = 1_000_000_000;

/// Weighted least-squares polynomial extrapolator over a fixed history of
/// samples of an `N`-component signal.
#[derive(Debug, Clone)]
pub struct PolynomialInterpolator<const N: usize> {
    config: InterpolatorConfig,
    slots: Vec<Option<Sample<N>>>,
}

impl<const N: usize> Default for PolynomialInterpolator<N> {
    fn default() -> Self {
        Self::new(InterpolatorConfig::default())
    }
}

impl<const N: usize> PolynomialInterpolator<N> {
    pub fn new(config: InterpolatorConfig) -> Self {
        let capacity = config.stored_samples.max(1);
        Self {
            config,
            slots: vec![None; capacity],
        }
    }

    pub fn reset(&mut self) {
        self.slots.fill(None);
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample<N>> {
        self.slots.iter().flatten()
    }

    pub fn add_sample(&mut self, sample: Sample<N>) {
        let mut free = None;
        let mut oldest: Option<(usize, Timestamp)> = None;
        let mut duplicate = None;

        for (index, slot) in self.slots.iter().enumerate() {
            let Some(existing) = slot else {
                free.get_or_insert(index);
                continue;
            };

            if existing.sample_timestamp.abs_diff(sample.sample_timestamp) < MERGE_WINDOW_NS {
                duplicate = Some((index, existing.production_timestamp));
                break;
            }

            if oldest.is_none_or(|(_, production)| existing.production_timestamp < production) {
                oldest = Some((index, existing.production_timestamp));
            }
        }

        let target = match (duplicate, free, oldest) {
            (Some((index, production)), _, _) => {
                if production >= sample.production_timestamp {
                    return;
                }
                index
            }
            (None, Some(index), _) => index,
            (None, None, Some((index, _))) => index,
            (None, None, None) => return,
        };
        self.store(target, sample);
    }

    fn store(&mut self, index: usize, mut sample: Sample<N>) {
        if self.config.quaternion {
            if let Some(value) = sample.value {
                if let Some(reference) = self.nearest_value(sample.sample_timestamp, Some(index)) {
                    if dot(&reference, &value) < 0.0 {
                        sample.value = Some(value.map(|v| -v));
                        sample.derivative = sample.derivative.map(|d| d.map(|v| -v));
                    }
                }
            }
        }
        self.slots[index] = Some(sample);
    }

    fn nearest_value(&self, timestamp: Timestamp, exclude: Option<usize>) -> Option<[f32; N]> {
        self.nearest_valued(timestamp, exclude).and_then(|sample| sample.value)
    }

    fn nearest_valued(&self, timestamp: Timestamp, exclude: Option<usize>) -> Option<&Sample<N>> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != exclude)
            .filter_map(|(_, slot)| slot.as_ref())
            .filter(|sample| sample.is_valid())
            .min_by_key(|sample| sample.sample_timestamp.abs_diff(timestamp))
    }

    /// Predicts the signal at `timestamp`.
    ///
    /// Queries past the newest production time are clamped to the
    /// extrapolation ceiling. Returns [`Sample::empty`] when there is nothing
    /// usable to extrapolate from.
    pub fn get_at(&self, timestamp: Timestamp) -> Sample<N> {
        let Some(production_timestamp) = self.samples().map(|s| s.production_timestamp).max() else {
            return Sample::empty();
        };
        let timestamp = timestamp.min(production_timestamp.saturating_add(self.config.extrapolation_ceiling_ns()));

        let unknowns = self.config.polynomial_order + 1;
        let window_ns = self.config.window_ns().max(1) as f64;
        let time_constant = f64::from(self.config.time_constant);

        let mut coefficients: Vec<f64> = Vec::with_capacity(2 * self.slots.len() * unknowns);
        let mut targets: Vec<f64> = Vec::with_capacity(2 * self.slots.len() * N);

        for sample in self.samples() {
            let Some(value) = sample.value else {
                continue;
            };

            let offset_ns = sample.sample_timestamp.saturating_sub(timestamp);
            let weight = 1.0 / (1.0 + (offset_ns.unsigned_abs() as f64 / window_ns).powi(3));
            let dt = offset_ns as f64 * 1e-9;

            let mut power = 1.0;
            for _ in 0..unknowns {
                coefficients.push(weight * power);
                power *= dt;
            }
            targets.extend(value.iter().map(|&v| weight * f64::from(v)));

            if let Some(derivative) = sample.derivative {
                coefficients.push(0.0);
                let mut power = 1.0;
                for i in 1..unknowns {
                    coefficients.push(weight * time_constant * i as f64 * power);
                    power *= dt;
                }
                targets.extend(derivative.iter().map(|&d| weight * time_constant * f64::from(d)));
            }
        }

        let rows = coefficients.len() / unknowns;
        if rows < 2 {
            return match self.nearest_valued(timestamp, None) {
                Some(closest) if closest.production_timestamp.abs_diff(timestamp) < STARVATION_LIMIT_NS => *closest,
                _ => Sample::empty(),
            };
        }

        let a = DMatrix::from_row_slice(rows, unknowns, &coefficients);
        let b = DMatrix::from_row_slice(rows, N, &targets);

        let solution = if rows <= unknowns {
            solve_qr(&a, &b)
        } else {
            solve_normal_cholesky(&a, &b).or_else(|| {
                trace!("normal equations singular with {rows} rows, using QR");
                solve_qr(&a, &b)
            })
        };
        let Some(solution) = solution else {
            debug!("no usable fit through {rows} rows at {timestamp}");
            return Sample::empty();
        };

        let value = std::array::from_fn(|i| solution[(0, i)] as f32);
        let derivative = std::array::from_fn(|i| if unknowns > 1 { solution[(1, i)] as f32 } else { 0.0 });

        Sample {
            production_timestamp,
            sample_timestamp: timestamp,
            value: Some(value),
            derivative: Some(derivative),
        }
    }
}

fn dot<const N: usize>(a: &[f32; N], b: &[f32; N]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: i64 = 1_000_000;

    fn quadratic(t: f64) -> (f32, f32) {
        ((1.0 + 2.0 * t - 3.0 * t * t) as f32, (2.0 - 6.0 * t) as f32)
    }

    #[test]
    fn test_empty_history() {
        let interpolator = PolynomialInterpolator::<3>::default();
        assert!(interpolator.is_empty());
        assert!(!interpolator.get_at(0).is_valid());
    }

    #[test]
    fn test_merge_within_window() {
        let mut interpolator = PolynomialInterpolator::<1>::default();
        interpolator.add_sample(Sample::new(10, 100 * MS, [1.0]));
        interpolator.add_sample(Sample::new(20, 101 * MS, [2.0]));
        assert_eq!(interpolator.len(), 1);
        assert_eq!(interpolator.samples().next().unwrap().value, Some([2.0]));

        // Older production never replaces a fresher one.
        interpolator.add_sample(Sample::new(15, 100 * MS, [3.0]));
        assert_eq!(interpolator.len(), 1);
        assert_eq!(interpolator.samples().next().unwrap().value, Some([2.0]));

        // Just outside the merge window.
        interpolator.add_sample(Sample::new(30, 103 * MS, [4.0]));
        assert_eq!(interpolator.len(), 2);
    }

    #[test]
    fn test_eviction_by_production() {
        let mut interpolator = PolynomialInterpolator::<1>::default();
        for i in 0..31 {
            interpolator.add_sample(Sample::new(1_000 + i, i * 10 * MS, [i as f32]));
        }
        assert_eq!(interpolator.len(), 30);
        let oldest = interpolator.samples().map(|s| s.production_timestamp).min().unwrap();
        assert_eq!(oldest, 1_001);
        assert!(interpolator.samples().all(|s| s.sample_timestamp != 0));
    }

    #[test]
    fn test_reset() {
        let mut interpolator = PolynomialInterpolator::<1>::default();
        interpolator.add_sample(Sample::new(0, 0, [1.0]));
        interpolator.reset();
        assert!(interpolator.is_empty());
        assert_eq!(interpolator.samples().count(), 0);
    }

    #[test]
    fn test_quadratic_reproduced_exactly() {
        let mut interpolator = PolynomialInterpolator::<1>::default();
        for k in 0..10 {
            let ts = k * 5 * MS;
            let (value, derivative) = quadratic(ts as f64 * 1e-9);
            interpolator.add_sample(Sample::new(ts, ts, [value]).with_derivative([derivative]));
        }

        for query in [12 * MS, 45 * MS, 60 * MS] {
            let predicted = interpolator.get_at(query);
            let (value, derivative) = quadratic(query as f64 * 1e-9);
            assert_eq!(predicted.sample_timestamp, query);
            assert!((predicted.value.unwrap()[0] - value).abs() < 1e-4);
            assert!((predicted.derivative.unwrap()[0] - derivative).abs() < 1e-2);
        }
    }

    #[test]
    fn test_line_without_derivatives() {
        let mut interpolator = PolynomialInterpolator::<2>::default();
        for k in 0..6 {
            let ts = k * 10 * MS;
            let t = ts as f64 * 1e-9;
            interpolator.add_sample(Sample::new(ts, ts, [(3.0 * t) as f32, (1.0 - t) as f32]));
        }
        let predicted = interpolator.get_at(70 * MS);
        let [x, y] = predicted.value.unwrap();
        let [dx, dy] = predicted.derivative.unwrap();
        assert!((x - 0.21).abs() < 1e-4);
        assert!((y - 0.93).abs() < 1e-4);
        assert!((dx - 3.0).abs() < 1e-2);
        assert!((dy + 1.0).abs() < 1e-2);
    }

    #[test]
    fn test_get_at_is_repeatable() {
        let mut interpolator = PolynomialInterpolator::<1>::default();
        for k in 0..5 {
            interpolator.add_sample(Sample::new(k * 7 * MS, k * 7 * MS, [k as f32 * 0.5]));
        }
        assert_eq!(interpolator.get_at(40 * MS), interpolator.get_at(40 * MS));
    }

    #[test]
    fn test_underdetermined_passes_through_samples() {
        let mut interpolator = PolynomialInterpolator::<1>::default();
        interpolator.add_sample(Sample::new(0, 0, [1.0]));
        interpolator.add_sample(Sample::new(10 * MS, 10 * MS, [2.0]));

        let at_first = interpolator.get_at(0);
        assert!((at_first.value.unwrap()[0] - 1.0).abs() < 1e-4);
        let at_second = interpolator.get_at(10 * MS);
        assert!((at_second.value.unwrap()[0] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_quaternion_hemisphere_continuity() {
        let config = InterpolatorConfig::default().for_quaternion();
        let mut interpolator = PolynomialInterpolator::<4>::new(config);
        let half = std::f32::consts::FRAC_1_SQRT_2;
        for k in 0..8 {
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            let ts = k * 5 * MS;
            interpolator.add_sample(
                Sample::new(ts, ts, [0.0, sign * half, 0.0, sign * half]).with_derivative([sign, 0.0, 0.0, 0.0]),
            );
        }

        let mut stored: Vec<_> = interpolator.samples().copied().collect();
        stored.sort_by_key(|s| s.sample_timestamp);
        for pair in stored.windows(2) {
            assert!(dot(&pair[0].value.unwrap(), &pair[1].value.unwrap()) > 0.0);
            assert_eq!(pair[0].derivative, pair[1].derivative);
        }

        let predicted = interpolator.get_at(40 * MS).value.unwrap();
        let norm = dot(&predicted, &predicted).sqrt();
        assert!((norm - 1.0).abs() < 1e-2, "sign flips would collapse the fit: {norm}");
    }

    #[test]
    fn test_extrapolation_ceiling() {
        let mut interpolator = PolynomialInterpolator::<1>::default();
        for k in 0..4 {
            interpolator.add_sample(Sample::new(1_000 * MS + k * 10 * MS, k * 10 * MS, [k as f32]));
        }
        let newest_production = 1_030 * MS;
        let predicted = interpolator.get_at(newest_production + 10_000 * MS);
        assert_eq!(predicted.sample_timestamp, newest_production + 77 * MS);
        assert_eq!(predicted.production_timestamp, newest_production);
        assert_eq!(predicted, interpolator.get_at(newest_production + 77 * MS));
    }

    #[test]
    fn test_extreme_timestamps() {
        let mut interpolator = PolynomialInterpolator::<1>::default();
        interpolator.add_sample(Sample::new(0, 1_000, [1.0]));
        interpolator.add_sample(Sample::new(1, i64::MIN, [2.0]));
        interpolator.add_sample(Sample::new(2, i64::MAX, [3.0]));
        assert_eq!(interpolator.len(), 3);

        for query in [i64::MIN, 0, i64::MAX] {
            let predicted = interpolator.get_at(query);
            assert!(predicted.is_valid());
            assert!(predicted.sample_timestamp <= 2 + 77 * MS);
        }

        let mut quaternions = PolynomialInterpolator::<4>::new(InterpolatorConfig::default().for_quaternion());
        quaternions.add_sample(Sample::new(0, i64::MAX, [0.0, 0.0, 0.0, 1.0]));
        quaternions.add_sample(Sample::new(1, i64::MIN, [0.0, 0.0, 0.0, -1.0]));
        assert_eq!(quaternions.len(), 2);
        assert!(quaternions.samples().all(|s| s.value.unwrap()[3] > 0.0));
    }

    #[test]
    fn test_starvation_fallback() {
        let mut interpolator = PolynomialInterpolator::<1>::default();
        let lone = Sample::new(5_000 * MS, 4_990 * MS, [7.0]);
        interpolator.add_sample(lone);

        assert_eq!(interpolator.get_at(4_500 * MS), lone);
        // Future queries are clamped, so only far-past ones starve.
        assert_eq!(interpolator.get_at(9_000 * MS), lone);
        assert!(!interpolator.get_at(3_000 * MS).is_valid());
    }

    #[test]
    fn test_derivative_only_samples_add_no_rows() {
        let mut interpolator = PolynomialInterpolator::<1>::default();
        let derivative_only = |ts: i64| Sample {
            production_timestamp: ts,
            sample_timestamp: ts,
            value: None,
            derivative: Some([1.0]),
        };
        interpolator.add_sample(derivative_only(0));
        interpolator.add_sample(derivative_only(10 * MS));
        assert_eq!(interpolator.len(), 2);
        assert!(!interpolator.get_at(5 * MS).is_valid());

        // One value row plus derivative-only slots still falls back.
        let lone = Sample::new(20 * MS, 20 * MS, [3.0]);
        interpolator.add_sample(lone);
        assert_eq!(interpolator.get_at(25 * MS), lone);
    }
}
