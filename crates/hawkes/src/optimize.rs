//! Derivative-free minimisation (Nelder–Mead).

/// Outcome of a minimisation run.
#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub fx: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Nelder–Mead settings.
#[derive(Debug, Clone, Copy)]
pub struct NelderMead {
    pub max_iterations: usize,
    /// Stop when the simplex's objective spread drops below this.
    pub tolerance: f64,
    /// Initial simplex edge length.
    pub step: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_iterations: 2_000,
            tolerance: 1e-9,
            step: 0.5,
        }
    }
}

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

impl NelderMead {
    /// Minimise `f` from `start`. Non-finite objective values are treated as +∞.
    pub fn minimize<F>(&self, mut f: F, start: &[f64]) -> Minimum
    where
        F: FnMut(&[f64]) -> f64,
    {
        let n = start.len();
        let mut eval = |x: &[f64]| {
            let v = f(x);
            if v.is_finite() {
                v
            } else {
                f64::INFINITY
            }
        };

        let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
        simplex.push(start.to_vec());
        for i in 0..n {
            let mut vertex = start.to_vec();
            vertex[i] += self.step;
            simplex.push(vertex);
        }
        let mut values: Vec<f64> = simplex.iter().map(|x| eval(x)).collect();

        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;

            let mut order: Vec<usize> = (0..=n).collect();
            order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
            simplex = order.iter().map(|&i| simplex[i].clone()).collect();
            values = order.iter().map(|&i| values[i]).collect();

            let spread = values[n] - values[0];
            if spread.is_finite() && spread.abs() <= self.tolerance {
                converged = true;
                break;
            }

            let mut centroid = vec![0.0; n];
            for vertex in &simplex[..n] {
                for (c, v) in centroid.iter_mut().zip(vertex) {
                    *c += v / n as f64;
                }
            }
            let toward = |coef: f64, from: &[f64]| -> Vec<f64> {
                centroid
                    .iter()
                    .zip(from)
                    .map(|(c, w)| c + coef * (c - w))
                    .collect()
            };

            let reflected = toward(REFLECT, &simplex[n]);
            let f_reflected = eval(&reflected);

            if f_reflected < values[0] {
                let expanded = toward(EXPAND, &simplex[n]);
                let f_expanded = eval(&expanded);
                if f_expanded < f_reflected {
                    simplex[n] = expanded;
                    values[n] = f_expanded;
                } else {
                    simplex[n] = reflected;
                    values[n] = f_reflected;
                }
                continue;
            }

            if f_reflected < values[n - 1] {
                simplex[n] = reflected;
                values[n] = f_reflected;
                continue;
            }

            let contracted = if f_reflected < values[n] {
                toward(CONTRACT, &simplex[n])
            } else {
                toward(-CONTRACT, &simplex[n])
            };
            let f_contracted = eval(&contracted);
            if f_contracted < values[n].min(f_reflected) {
                simplex[n] = contracted;
                values[n] = f_contracted;
                continue;
            }

            let best = simplex[0].clone();
            for i in 1..=n {
                for (x, b) in simplex[i].iter_mut().zip(&best) {
                    *x = b + SHRINK * (*x - b);
                }
                values[i] = eval(&simplex[i]);
            }
        }

        let (best, fx) = simplex
            .into_iter()
            .zip(values)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((start.to_vec(), f64::INFINITY));

        Minimum {
            x: best,
            fx,
            iterations,
            converged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_quadratic_bowl() {
        let nm = NelderMead::default();
        let min = nm.minimize(|x| (x[0] - 3.0).powi(2) + 2.0 * (x[1] + 1.0).powi(2), &[0.0, 0.0]);
        assert!(min.converged);
        assert_abs_diff_eq!(min.x[0], 3.0, epsilon = 1e-3);
        assert_abs_diff_eq!(min.x[1], -1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_rosenbrock() {
        let nm = NelderMead {
            max_iterations: 10_000,
            tolerance: 1e-14,
            step: 0.5,
        };
        let min = nm.minimize(
            |x| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2),
            &[-1.2, 1.0],
        );
        assert_abs_diff_eq!(min.x[0], 1.0, epsilon = 1e-2);
        assert_abs_diff_eq!(min.x[1], 1.0, epsilon = 2e-2);
    }

    #[test]
    fn test_infeasible_region_is_avoided() {
        let nm = NelderMead::default();
        let min = nm.minimize(
            |x| if x[0] < 0.0 { f64::NAN } else { (x[0] - 0.5).powi(2) },
            &[2.0],
        );
        assert_abs_diff_eq!(min.x[0], 0.5, epsilon = 1e-3);
    }
}
