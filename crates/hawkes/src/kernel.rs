//! Excitation kernels.

use alpha_core::config::{HawkesConfig, KernelKind};
use serde::{Deserialize, Serialize};

/// Shape of the excitation kernel `φ(τ)`, scaled by `α` and `β`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Kernel {
    /// `α e^{-βτ}`
    Exponential,
    /// `α / (1 + βτ)^p`
    PowerLaw { exponent: f64 },
}

impl Kernel {
    pub fn from_config(config: &HawkesConfig) -> Self {
        match config.kernel {
            KernelKind::Exponential => Kernel::Exponential,
            KernelKind::PowerLaw => Kernel::PowerLaw {
                exponent: config.power_law_exponent,
            },
        }
    }

    /// `φ(τ)`; 0 for negative lags.
    #[inline]
    pub fn value(&self, alpha: f64, beta: f64, tau: f64) -> f64 {
        if tau < 0.0 {
            return 0.0;
        }
        match *self {
            Kernel::Exponential => alpha * (-beta * tau).exp(),
            Kernel::PowerLaw { exponent } => alpha * (1.0 + beta * tau).powf(-exponent),
        }
    }

    /// `∫_0^τ φ(s) ds`.
    pub fn integral(&self, alpha: f64, beta: f64, tau: f64) -> f64 {
        if tau <= 0.0 {
            return 0.0;
        }
        match *self {
            Kernel::Exponential => alpha / beta * (1.0 - (-beta * tau).exp()),
            Kernel::PowerLaw { exponent } => {
                if (exponent - 1.0).abs() < 1e-12 {
                    alpha / beta * (1.0 + beta * tau).ln()
                } else {
                    alpha / (beta * (exponent - 1.0)) * (1.0 - (1.0 + beta * tau).powf(1.0 - exponent))
                }
            }
        }
    }

    /// `∫_0^∞ φ(s) ds`, the branching ratio; infinite for `p <= 1`.
    pub fn l1_norm(&self, alpha: f64, beta: f64) -> f64 {
        match *self {
            Kernel::Exponential => alpha / beta,
            Kernel::PowerLaw { exponent } => {
                if exponent <= 1.0 {
                    f64::INFINITY
                } else {
                    alpha / (beta * (exponent - 1.0))
                }
            }
        }
    }

    pub fn is_exponential(&self) -> bool {
        matches!(self, Kernel::Exponential)
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::Exponential
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Trapezoid rule reference.
    fn numeric_integral(kernel: Kernel, alpha: f64, beta: f64, tau: f64) -> f64 {
        let n = 200_000;
        let h = tau / n as f64;
        let mut sum = 0.5 * (kernel.value(alpha, beta, 0.0) + kernel.value(alpha, beta, tau));
        for i in 1..n {
            sum += kernel.value(alpha, beta, i as f64 * h);
        }
        sum * h
    }

    #[test]
    fn test_exponential_kernel() {
        let k = Kernel::Exponential;
        assert_relative_eq!(k.value(0.5, 2.0, 0.0), 0.5);
        assert_relative_eq!(k.value(0.5, 2.0, 1.0), 0.5 * (-2.0_f64).exp());
        assert_eq!(k.value(0.5, 2.0, -1.0), 0.0);
        assert_relative_eq!(k.l1_norm(0.5, 2.0), 0.25);
        assert_relative_eq!(k.integral(0.5, 2.0, 3.0), numeric_integral(k, 0.5, 2.0, 3.0), max_relative = 1e-8);
    }

    #[test]
    fn test_power_law_kernel() {
        let k = Kernel::PowerLaw { exponent: 1.5 };
        assert_relative_eq!(k.value(0.3, 1.0, 3.0), 0.3 / 8.0);
        assert_relative_eq!(k.l1_norm(0.3, 1.0), 0.6);
        assert_relative_eq!(k.integral(0.3, 1.0, 5.0), numeric_integral(k, 0.3, 1.0, 5.0), max_relative = 1e-8);
        assert!(Kernel::PowerLaw { exponent: 1.0 }.l1_norm(0.1, 1.0).is_infinite());
    }

    #[test]
    fn test_power_law_unit_exponent_integral() {
        let k = Kernel::PowerLaw { exponent: 1.0 };
        assert_relative_eq!(k.integral(0.2, 2.0, 4.0), numeric_integral(k, 0.2, 2.0, 4.0), max_relative = 1e-8);
    }
}
