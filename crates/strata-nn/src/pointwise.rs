// Pointwise functions — differentiable element-wise activations
//
// An Activation layer runs one of these over its whole input before
// convolving. Each variant knows its value and its derivative; the derivative
// is expressed through the cached input `x` and/or output `y` of the forward
// pass, whichever is cheaper:
//
//   Identity   y = x                               dy = 1
//   ReLU       y = max(x, 0)                       dy = [x > 0]
//   LeakyReLU  y = x > 0 ? x : s·x                 dy = x > 0 ? 1 : s
//   ELU        y = x > 0 ? x : a(eˣ - 1)           dy = x > 0 ? 1 : y + a
//   ISRLU      y = x < 0 ? x / √(1 + a·x²) : x     dy = x < 0 ? (y/x)³ : 1
//   SELU       y = λ(x > 0 ? x : a(eˣ - 1))        dy = x > 0 ? λ : y + λa
//   SiLU       y = x·σ_b(x)                        dy = σ_b(x) + y(1 - σ_b(x))·ln b
//   Sigmoid    y = σ_b(x)                          dy = y(1 - y)·ln b
//
// with σ_b(x) = 1 / (1 + b⁻ˣ); base e gives the usual logistic function.
//   TanH       y = tanh(x)                         dy = 1 - y²
//   ArcTan     y = atan(x)                         dy = 1 / (1 + x²)
//   ArcSinH    y = asinh(x)                        dy = 1 / √(1 + x²)

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_core::error::{ensure_len, Error, Result};

pub const LEAKY_RELU_DEFAULT_SLOPE: f64 = 0.01;
pub const ELU_DEFAULT_ALPHA: f64 = 1.0;
pub const ISRLU_DEFAULT_ALPHA: f64 = 3.0;
pub const SELU_ALPHA: f64 = 1.673_263_242_354_377_3;
pub const SELU_LAMBDA: f64 = 1.050_700_987_355_480_5;
pub const SIGMOID_DEFAULT_BASE: f64 = std::f64::consts::E;

/// A differentiable element-wise function.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Pointwise {
    /// Pass-through.
    #[default]
    Identity,
    ReLU,
    LeakyReLU {
        slope: f64,
    },
    ELU {
        alpha: f64,
    },
    /// Inverse square root linear unit.
    ISRLU {
        alpha: f64,
    },
    /// Scaled ELU. [`Pointwise::selu`] gives the self-normalizing constants.
    SELU {
        alpha: f64,
        lambda: f64,
    },
    /// Sigmoid linear unit over a base-`base` sigmoid.
    SiLU {
        base: f64,
    },
    Sigmoid {
        base: f64,
    },
    TanH,
    ArcTan,
    ArcSinH,
}

fn sigmoid(base: f64, x: f64) -> f64 {
    1.0 / (1.0 + base.powf(-x))
}

impl Pointwise {
    /// LeakyReLU with slope 0.01.
    pub fn leaky_relu() -> Self {
        Pointwise::LeakyReLU {
            slope: LEAKY_RELU_DEFAULT_SLOPE,
        }
    }

    /// ELU with alpha 1.0.
    pub fn elu() -> Self {
        Pointwise::ELU {
            alpha: ELU_DEFAULT_ALPHA,
        }
    }

    /// ISRLU with alpha 3.0.
    pub fn isrlu() -> Self {
        Pointwise::ISRLU {
            alpha: ISRLU_DEFAULT_ALPHA,
        }
    }

    /// SELU with the self-normalizing alpha and lambda.
    pub fn selu() -> Self {
        Pointwise::SELU {
            alpha: SELU_ALPHA,
            lambda: SELU_LAMBDA,
        }
    }

    /// SiLU over the natural sigmoid.
    pub fn silu() -> Self {
        Pointwise::SiLU {
            base: SIGMOID_DEFAULT_BASE,
        }
    }

    /// Sigmoid with base e.
    pub fn sigmoid() -> Self {
        Pointwise::Sigmoid {
            base: SIGMOID_DEFAULT_BASE,
        }
    }

    /// Reject parameters for which the function is undefined or not finite.
    pub fn validate(&self) -> Result<()> {
        let finite = |name: &str, v: f64| {
            if v.is_finite() {
                Ok(())
            } else {
                Err(Error::msg(format!("{}: {name} must be finite, got {v}", self.name())))
            }
        };
        match *self {
            Pointwise::LeakyReLU { slope } => finite("slope", slope),
            Pointwise::ELU { alpha } => finite("alpha", alpha),
            Pointwise::ISRLU { alpha } if alpha < 0.0 => Err(Error::msg(format!(
                "ISRLU: alpha must be non-negative, got {alpha}"
            ))),
            Pointwise::ISRLU { alpha } => finite("alpha", alpha),
            Pointwise::SELU { alpha, lambda } => {
                finite("alpha", alpha)?;
                finite("lambda", lambda)
            }
            Pointwise::SiLU { base } | Pointwise::Sigmoid { base } => {
                if base > 0.0 && base.is_finite() {
                    Ok(())
                } else {
                    Err(Error::msg(format!(
                        "{}: base must be positive and finite, got {base}",
                        self.name()
                    )))
                }
            }
            _ => Ok(()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Pointwise::Identity => "Identity",
            Pointwise::ReLU => "ReLU",
            Pointwise::LeakyReLU { .. } => "LeakyReLU",
            Pointwise::ELU { .. } => "ELU",
            Pointwise::ISRLU { .. } => "ISRLU",
            Pointwise::SELU { .. } => "SELU",
            Pointwise::SiLU { .. } => "SiLU",
            Pointwise::Sigmoid { .. } => "Sigmoid",
            Pointwise::TanH => "TanH",
            Pointwise::ArcTan => "ArcTan",
            Pointwise::ArcSinH => "ArcSinH",
        }
    }

    /// Value at a single point.
    pub fn apply(&self, x: f64) -> f64 {
        match *self {
            Pointwise::Identity => x,
            Pointwise::ReLU => x.max(0.0),
            Pointwise::LeakyReLU { slope } => {
                if x > 0.0 {
                    x
                } else {
                    slope * x
                }
            }
            Pointwise::ELU { alpha } => {
                if x > 0.0 {
                    x
                } else {
                    alpha * (x.exp() - 1.0)
                }
            }
            Pointwise::ISRLU { alpha } => {
                if x < 0.0 {
                    x / (1.0 + alpha * x * x).sqrt()
                } else {
                    x
                }
            }
            Pointwise::SELU { alpha, lambda } => {
                lambda
                    * if x > 0.0 {
                        x
                    } else {
                        alpha * (x.exp() - 1.0)
                    }
            }
            Pointwise::SiLU { base } => x * sigmoid(base, x),
            Pointwise::Sigmoid { base } => sigmoid(base, x),
            Pointwise::TanH => x.tanh(),
            Pointwise::ArcTan => x.atan(),
            Pointwise::ArcSinH => x.asinh(),
        }
    }

    /// Derivative at a single point, given the forward input `x` and output `y`.
    pub fn derivative(&self, x: f64, y: f64) -> f64 {
        match *self {
            Pointwise::Identity => 1.0,
            Pointwise::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Pointwise::LeakyReLU { slope } => {
                if x > 0.0 {
                    1.0
                } else {
                    slope
                }
            }
            Pointwise::ELU { alpha } => {
                if x > 0.0 {
                    1.0
                } else {
                    y + alpha
                }
            }
            Pointwise::ISRLU { .. } => {
                if x < 0.0 {
                    let u = y / x;
                    u * u * u
                } else {
                    1.0
                }
            }
            Pointwise::SELU { alpha, lambda } => {
                if x > 0.0 {
                    lambda
                } else {
                    y + lambda * alpha
                }
            }
            Pointwise::SiLU { base } => {
                let s = sigmoid(base, x);
                s + y * (1.0 - s) * base.ln()
            }
            Pointwise::Sigmoid { base } => y * (1.0 - y) * base.ln(),
            Pointwise::TanH => 1.0 - y * y,
            Pointwise::ArcTan => 1.0 / (1.0 + x * x),
            Pointwise::ArcSinH => 1.0 / (1.0 + x * x).sqrt(),
        }
    }

    /// Apply the function to every element.
    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        if *self == Pointwise::Identity {
            return input.to_vec();
        }
        input.iter().map(|&x| self.apply(x)).collect()
    }

    /// Chain `grad` (w.r.t. the output) through the function, giving the
    /// gradient w.r.t. the input. `input`/`output` are from the forward pass.
    pub fn backward(&self, input: &[f64], output: &[f64], grad: &[f64]) -> Result<Vec<f64>> {
        ensure_len("pointwise backward: cached output", input.len(), output.len())?;
        ensure_len("pointwise backward: gradient", input.len(), grad.len())?;
        if *self == Pointwise::Identity {
            return Ok(grad.to_vec());
        }
        Ok(input
            .iter()
            .zip(output)
            .zip(grad)
            .map(|((&x, &y), &g)| g * self.derivative(x, y))
            .collect())
    }
}

impl fmt::Display for Pointwise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pointwise::LeakyReLU { slope } => write!(f, "LeakyReLU({slope})"),
            Pointwise::ELU { alpha } => write!(f, "ELU({alpha})"),
            Pointwise::ISRLU { alpha } => write!(f, "ISRLU({alpha})"),
            Pointwise::SELU { alpha, lambda } => write!(f, "SELU({alpha}, {lambda})"),
            Pointwise::SiLU { base } => write!(f, "SiLU({base})"),
            Pointwise::Sigmoid { base } => write!(f, "Sigmoid({base})"),
            other => f.write_str(other.name()),
        }
    }
}
