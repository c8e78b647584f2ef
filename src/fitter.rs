//! Fitting of parametric elution profiles to mass traces

use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;

use crate::helper_functions::median;

/// The maximal number of Levenberg-Marquardt iterations before the fit is
/// reported as not converged
const MAX_ITERATIONS: usize = 500;
/// The relative cost change below which the fit counts as converged
const RELATIVE_COST_TOLERANCE: f64 = 1e-5;
/// The damping factor above which the fit is abandoned
const MAX_LAMBDA: f64 = 1e12;

/// The elution profile model fitted to a mass trace
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Debug, Serialize, Deserialize)]
pub enum ElutionModel {
    /// A symmetric Gaussian profile
    Gauss,
    /// An exponentially modified Gaussian, modelling the tailing of
    /// chromatographic peaks
    #[default]
    Emg,
}

/// The parameters of a fitted elution profile
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ElutionFit {
    /// The height of the profile
    pub height: f64,
    /// The center of the underlying Gaussian in seconds, for an EMG the
    /// apex lies later
    pub center: f64,
    /// The width of the underlying Gaussian in seconds
    pub sigma: f64,
    /// The exponential decay in seconds, zero for a plain Gaussian
    pub tau: f64,
    /// The remaining sum of squared errors
    pub residual: f64,
    /// The fit quality, one minus the residual over the summed squared
    /// intensities, clamped to [0, 1]
    pub quality: f32,
    /// The number of iterations the optimiser took
    pub iterations: usize,
}

impl ElutionFit {
    /// The retention time of the highest point of the profile. For an EMG
    /// the apex is delayed by roughly tau with respect to the center.
    pub fn apex(&self) -> f64 {
        self.center + self.tau
    }
}

/// The recoverable failure modes of a fit. These are normal return values,
/// the surrounding state machine discards the box and keeps running.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum FitError {
    /// Fewer than four points, nothing sensible can be fitted
    InsufficientPoints,
    /// The optimiser did not reach the cost tolerance, the best iterate is
    /// reported so callers can inspect how far it got
    DidNotConverge(ElutionFit),
}

/// Fits an elution profile to one mass trace with bounded
/// Levenberg-Marquardt least squares
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct TraceFitter {
    model: ElutionModel,
}

impl TraceFitter {
    /// Create a fitter for the given model
    pub const fn new(model: ElutionModel) -> Self {
        Self { model }
    }

    /// The model this fitter uses
    pub const fn model(&self) -> ElutionModel {
        self.model
    }

    /// Fit the profile to the given trace. The retention times have to be
    /// ascending and of the same length as the intensities.
    ///
    /// # Errors
    /// [`FitError::InsufficientPoints`] below four points,
    /// [`FitError::DidNotConverge`] when the optimiser stalls.
    pub fn fit(&self, rt: &[f64], intensity: &[f64]) -> Result<ElutionFit, FitError> {
        if rt.len() < 4 || rt.len() != intensity.len() {
            return Err(FitError::InsufficientPoints);
        }
        let span = rt[rt.len() - 1] - rt[0];
        let steps = rt.windows(2).map(|pair| pair[1] - pair[0]).collect::<Vec<_>>();
        let sigma_min = (0.25 * median(&steps)).max(f64::MIN_POSITIVE);
        let sigma_max = (2.0 * span).max(sigma_min);
        let tau_max = span.max(f64::MIN_POSITIVE);

        let apex = intensity
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(index, _)| index);
        let mut parameters = vec![
            intensity[apex].max(0.0),
            rt[apex],
            (span / 4.0).clamp(sigma_min, sigma_max),
        ];
        let mut lower = vec![0.0, rt[0], sigma_min];
        let mut upper = vec![f64::INFINITY, rt[rt.len() - 1], sigma_max];
        if self.model == ElutionModel::Emg {
            parameters.push(span / 20.0);
            lower.push(0.0);
            upper.push(tau_max);
        }

        let total: f64 = intensity.iter().map(|value| value * value).sum();
        let mut cost = self.cost(&parameters, rt, intensity);
        let mut lambda = 1e-3;
        let mut converged = false;
        let mut iterations = 0;

        for iteration in 0..MAX_ITERATIONS {
            iterations = iteration + 1;
            let Some(step) = self.step(&parameters, rt, intensity, lambda) else {
                lambda *= 10.0;
                if lambda > MAX_LAMBDA {
                    break;
                }
                continue;
            };
            let trial = parameters
                .iter()
                .zip(&step)
                .zip(lower.iter().zip(&upper))
                .map(|((parameter, delta), (low, high))| (parameter + delta).clamp(*low, *high))
                .collect::<Vec<_>>();
            let trial_cost = self.cost(&trial, rt, intensity);
            if trial_cost < cost {
                let improvement = (cost - trial_cost) / cost.max(f64::MIN_POSITIVE);
                parameters = trial;
                cost = trial_cost;
                lambda = (lambda / 10.0).max(1e-12);
                if improvement < RELATIVE_COST_TOLERANCE {
                    converged = true;
                    break;
                }
            } else {
                lambda *= 10.0;
                if lambda > MAX_LAMBDA {
                    break;
                }
            }
        }

        let fit = ElutionFit {
            height: parameters[0],
            center: parameters[1],
            sigma: parameters[2],
            tau: if self.model == ElutionModel::Emg {
                parameters[3]
            } else {
                0.0
            },
            residual: cost,
            quality: if total > 0.0 {
                (1.0 - cost / total).clamp(0.0, 1.0) as f32
            } else {
                0.0
            },
            iterations,
        };
        if converged || cost <= f64::MIN_POSITIVE {
            Ok(fit)
        } else {
            Err(FitError::DidNotConverge(fit))
        }
    }

    /// The profile value at the given retention time
    pub fn value(&self, parameters: &[f64], rt: f64) -> f64 {
        let height = parameters[0];
        let center = parameters[1];
        let sigma = parameters[2];
        let tau = if self.model == ElutionModel::Emg {
            parameters[3]
        } else {
            0.0
        };
        emg_value(height, center, sigma, tau, rt)
    }

    fn cost(&self, parameters: &[f64], rt: &[f64], intensity: &[f64]) -> f64 {
        rt.iter()
            .zip(intensity)
            .map(|(time, observed)| (observed - self.value(parameters, *time)).powi(2))
            .sum()
    }

    /// One damped Gauss-Newton step, `None` if the normal equations are singular
    fn step(
        &self,
        parameters: &[f64],
        rt: &[f64],
        intensity: &[f64],
        lambda: f64,
    ) -> Option<Vec<f64>> {
        let k = parameters.len();
        let mut jtj = vec![vec![0.0; k]; k];
        let mut jtr = vec![0.0; k];

        for (time, observed) in rt.iter().zip(intensity) {
            let value = self.value(parameters, *time);
            let residual = observed - value;
            let mut gradient = vec![0.0; k];
            for (index, slot) in gradient.iter_mut().enumerate() {
                let epsilon = 1e-6 * parameters[index].abs().max(1e-2);
                let mut shifted = parameters.to_vec();
                shifted[index] += epsilon;
                *slot = (self.value(&shifted, *time) - value) / epsilon;
            }
            for row in 0..k {
                for column in 0..k {
                    jtj[row][column] += gradient[row] * gradient[column];
                }
                jtr[row] += gradient[row] * residual;
            }
        }
        for (index, row) in jtj.iter_mut().enumerate() {
            row[index] *= 1.0 + lambda;
        }
        solve(&mut jtj, &mut jtr)
    }
}

/// The exponentially modified Gaussian, evaluated through the scaled
/// complementary error function to stay finite for extreme tau over sigma
/// ratios. A tau of (nearly) zero degenerates to a plain Gaussian.
fn emg_value(height: f64, center: f64, sigma: f64, tau: f64, rt: f64) -> f64 {
    let delta = rt - center;
    let gauss = (-delta * delta / (2.0 * sigma * sigma)).exp();
    if tau <= sigma * 1e-3 {
        return height * gauss;
    }
    let coefficient = height * sigma / tau * std::f64::consts::FRAC_PI_2.sqrt();
    let u = (sigma / tau - delta / sigma) / std::f64::consts::SQRT_2;
    let value = if u < -26.0 {
        // Deep in the tail erfc saturates at two and the exponent collapses
        let exponent = 0.5 * (sigma / tau).powi(2) - delta / tau;
        2.0 * coefficient * exponent.exp()
    } else if u > 26.0 {
        // Asymptotic expansion of the scaled complementary error function
        let erfcx = (1.0 - 0.5 / (u * u)) / (u * std::f64::consts::PI.sqrt());
        coefficient * gauss * erfcx
    } else {
        coefficient * gauss * (u * u).exp() * erfc(u)
    };
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Solve the k by k system in place by Gaussian elimination with partial
/// pivoting, `None` if the matrix is singular
fn solve(matrix: &mut [Vec<f64>], rhs: &mut [f64]) -> Option<Vec<f64>> {
    let k = rhs.len();
    for column in 0..k {
        let pivot = (column..k)
            .max_by(|a, b| matrix[*a][column].abs().total_cmp(&matrix[*b][column].abs()))?;
        if matrix[pivot][column].abs() < 1e-300 {
            return None;
        }
        matrix.swap(column, pivot);
        rhs.swap(column, pivot);
        for row in column + 1..k {
            let factor = matrix[row][column] / matrix[column][column];
            for inner in column..k {
                matrix[row][inner] -= factor * matrix[column][inner];
            }
            rhs[row] -= factor * rhs[column];
        }
    }
    let mut solution = vec![0.0; k];
    for row in (0..k).rev() {
        let mut value = rhs[row];
        for column in row + 1..k {
            value -= matrix[row][column] * solution[column];
        }
        solution[row] = value / matrix[row][row];
    }
    Some(solution)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauss_trace(height: f64, center: f64, sigma: f64) -> (Vec<f64>, Vec<f64>) {
        let rt = (0..9).map(|i| f64::from(i).mul_add(2.0, center - 8.0)).collect::<Vec<_>>();
        let intensity = rt
            .iter()
            .map(|t| height * (-(t - center).powi(2) / (2.0 * sigma * sigma)).exp())
            .collect();
        (rt, intensity)
    }

    #[test]
    fn recovers_a_gaussian() {
        let (rt, intensity) = gauss_trace(100.0, 120.0, 4.0);
        let fit = TraceFitter::new(ElutionModel::Gauss).fit(&rt, &intensity).unwrap();
        assert!((fit.center - 120.0).abs() < 0.1, "center {}", fit.center);
        assert!((fit.height - 100.0).abs() < 1.0, "height {}", fit.height);
        assert!((fit.sigma - 4.0).abs() < 0.2, "sigma {}", fit.sigma);
        assert!(fit.quality > 0.99);
        assert!((fit.apex() - fit.center).abs() < f64::EPSILON);
    }

    #[test]
    fn recovers_an_emg() {
        let fitter = TraceFitter::new(ElutionModel::Emg);
        let rt = (0..13).map(|i| f64::from(i).mul_add(2.0, 110.0)).collect::<Vec<_>>();
        let truth = [100.0, 118.0, 3.0, 4.0];
        let intensity = rt.iter().map(|t| fitter.value(&truth, *t)).collect::<Vec<_>>();
        let fit = fitter.fit(&rt, &intensity).unwrap();
        assert!((fit.center - 118.0).abs() < 1.0, "center {}", fit.center);
        assert!(fit.tau > 1.0, "tau {}", fit.tau);
        assert!(fit.quality > 0.95, "quality {}", fit.quality);
        // The apex of a tailing peak lies after the Gaussian center
        assert!(fit.apex() > fit.center);
    }

    #[test]
    fn emg_degenerates_to_a_gaussian() {
        let value = emg_value(100.0, 120.0, 4.0, 0.0, 120.0);
        assert!((value - 100.0).abs() < 1e-9);
        // A tiny tau approaches the Gaussian limit through the asymptotic branch
        let nearly = emg_value(100.0, 120.0, 4.0, 0.05, 120.0);
        assert!((nearly - 100.0).abs() < 2.0, "value {nearly}");
    }

    #[test]
    fn emg_stays_finite_for_extreme_ratios() {
        for tau in [0.01, 0.1, 1.0, 10.0, 1000.0] {
            for rt in [0.0, 100.0, 120.0, 140.0, 1e4] {
                let value = emg_value(100.0, 120.0, 4.0, tau, rt);
                assert!(value.is_finite(), "tau {tau} rt {rt}");
                assert!(value >= 0.0, "tau {tau} rt {rt} value {value}");
            }
        }
    }

    #[test]
    fn too_few_points() {
        let fitter = TraceFitter::new(ElutionModel::Gauss);
        assert_eq!(
            fitter.fit(&[1.0, 2.0, 3.0], &[1.0, 2.0, 1.0]),
            Err(FitError::InsufficientPoints)
        );
    }

    #[test]
    fn zero_trace_has_zero_quality() {
        let rt = [1.0, 2.0, 3.0, 4.0, 5.0];
        let intensity = [0.0; 5];
        let fit = TraceFitter::new(ElutionModel::Gauss).fit(&rt, &intensity).unwrap();
        assert_eq!(fit.quality, 0.0);
    }

    #[test]
    fn quality_is_bounded() {
        let rt = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let intensity = [5.0, 1.0, 7.0, 2.0, 9.0, 1.0];
        match TraceFitter::new(ElutionModel::Gauss).fit(&rt, &intensity) {
            Ok(fit) => assert!((0.0..=1.0).contains(&fit.quality)),
            Err(FitError::DidNotConverge(fit)) => assert!((0.0..=1.0).contains(&fit.quality)),
            Err(FitError::InsufficientPoints) => unreachable!(),
        }
    }
}
