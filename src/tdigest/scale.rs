//! Scale functions define the q→k mapping that controls cluster density.
//!
//! Semantics
//! - `k(q)` stretches quantile space so that one unit of k corresponds to one
//!   cluster's worth of data. Steep regions of `k` (the tails, for every
//!   family except [`ScaleFunction::K0`]) force small clusters and therefore
//!   high resolution there.
//! - `max(q)` is the largest *relative* cluster size allowed at quantile `q`;
//!   multiply by the total weight to get a sample budget.
//! - The normalized forms take a precomputed `normalizer(compression, n)` so
//!   hot loops avoid recomputing logs.
//!
//! Guarantees
//! - `k` is non-decreasing in `q`; `q` inverts `k` away from the 1e-15 clamp.
//! - Normalized and direct forms agree to ~1e-10.
//! - The base families bound cluster count by the compression factor; the
//!   `*NoNorm` variants let it grow with log(n) instead.

use serde::{Deserialize, Serialize};

use std::f64::consts::PI;

/// Scale families for the q→k mapping.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScaleFunction {
    /// Uniform cluster sizes. Mostly useful as a baseline.
    K0,
    /// Cluster sizes proportional to sqrt(q(1-q)).
    K1,
    /// Same shape as K1 but with an approximate asin in the hot path.
    K1Fast,
    /// Cluster sizes proportional to q(1-q). The workhorse (DEFAULT).
    #[default]
    K2,
    /// Cluster sizes proportional to min(q, 1-q); tightest tails.
    K3,
    /// K2 without the normalizer; cluster count grows with log(n).
    K2NoNorm,
    /// K3 without the normalizer; cluster count grows with log(n).
    K3NoNorm,
}

const Q_EPS: f64 = 1e-15;

#[inline]
fn clamp_q(q: f64) -> f64 {
    q.max(Q_EPS).min(1.0 - Q_EPS)
}

// log-odds normalization terms; the +24 / +21 offsets keep the
// normalizer positive for small n.
#[inline]
fn z2(compression: f64, n: f64) -> f64 {
    4.0 * (n / compression).ln() + 24.0
}

#[inline]
fn z3(compression: f64, n: f64) -> f64 {
    4.0 * (n / compression).ln() + 21.0
}

impl ScaleFunction {
    /// Whether this family needs a normalizer that depends on n. Digests with
    /// statically sized buffers reject the families where this is false.
    pub fn is_normalized(self) -> bool {
        !matches!(self, ScaleFunction::K2NoNorm | ScaleFunction::K3NoNorm)
    }

    /// q → k using compression and sample count directly.
    pub fn k(self, q: f64, compression: f64, n: f64) -> f64 {
        match self {
            ScaleFunction::K0 => compression * q / 2.0,
            ScaleFunction::K1 => {
                let q = clamp_q(q);
                compression * (2.0 * q - 1.0).asin() / (2.0 * PI)
            }
            ScaleFunction::K1Fast => {
                let q = q.clamp(0.0, 1.0);
                compression * fast_asin(2.0 * q - 1.0) / (2.0 * PI)
            }
            ScaleFunction::K2 => {
                // degenerate digests put everything at k=0 so any merge is allowed
                if n <= 1.0 {
                    return if q <= 0.0 {
                        -10.0
                    } else if q >= 1.0 {
                        10.0
                    } else {
                        0.0
                    };
                }
                let q = clamp_q(q);
                compression * (q / (1.0 - q)).ln() / z2(compression, n)
            }
            ScaleFunction::K3 => {
                let q = clamp_q(q);
                if q <= 0.5 {
                    compression * (2.0 * q).ln() / z3(compression, n)
                } else {
                    -self.k(1.0 - q, compression, n)
                }
            }
            ScaleFunction::K2NoNorm => {
                let q = clamp_q(q);
                compression * (q / (1.0 - q)).ln()
            }
            ScaleFunction::K3NoNorm => {
                let q = clamp_q(q);
                if q <= 0.5 {
                    compression * (2.0 * q).ln()
                } else {
                    -self.k(1.0 - q, compression, n)
                }
            }
        }
    }

    /// q → k with a precomputed [`normalizer`](Self::normalizer).
    pub fn k_norm(self, q: f64, normalizer: f64) -> f64 {
        match self {
            ScaleFunction::K0 => normalizer * q,
            ScaleFunction::K1 => {
                let q = clamp_q(q);
                normalizer * (2.0 * q - 1.0).asin()
            }
            ScaleFunction::K1Fast => {
                let q = q.clamp(0.0, 1.0);
                normalizer * fast_asin(2.0 * q - 1.0)
            }
            ScaleFunction::K2 | ScaleFunction::K2NoNorm => {
                let q = clamp_q(q);
                (q / (1.0 - q)).ln() * normalizer
            }
            ScaleFunction::K3 | ScaleFunction::K3NoNorm => {
                let q = clamp_q(q);
                if q <= 0.5 {
                    (2.0 * q).ln() * normalizer
                } else {
                    -self.k_norm(1.0 - q, normalizer)
                }
            }
        }
    }

    /// k → q using compression and sample count directly.
    pub fn q(self, k: f64, compression: f64, n: f64) -> f64 {
        match self {
            ScaleFunction::K0 => 2.0 * k / compression,
            ScaleFunction::K1 => {
                let k = k.clamp(-compression / 4.0, compression / 4.0);
                ((k * (2.0 * PI / compression)).sin() + 1.0) / 2.0
            }
            ScaleFunction::K1Fast => ((k * (2.0 * PI / compression)).sin() + 1.0) / 2.0,
            ScaleFunction::K2 => {
                let w = (k * z2(compression, n) / compression).exp();
                w / (1.0 + w)
            }
            ScaleFunction::K3 => {
                if k <= 0.0 {
                    (k * z3(compression, n) / compression).exp() / 2.0
                } else {
                    1.0 - self.q(-k, compression, n)
                }
            }
            ScaleFunction::K2NoNorm => {
                let w = (k / compression).exp();
                w / (1.0 + w)
            }
            ScaleFunction::K3NoNorm => {
                if k <= 0.0 {
                    (k / compression).exp() / 2.0
                } else {
                    1.0 - self.q(-k, compression, n)
                }
            }
        }
    }

    /// k → q with a precomputed [`normalizer`](Self::normalizer).
    pub fn q_norm(self, k: f64, normalizer: f64) -> f64 {
        match self {
            ScaleFunction::K0 => k / normalizer,
            ScaleFunction::K1 => {
                let x = (k / normalizer).clamp(-PI / 2.0, PI / 2.0);
                (x.sin() + 1.0) / 2.0
            }
            ScaleFunction::K1Fast => ((k / normalizer).sin() + 1.0) / 2.0,
            ScaleFunction::K2 | ScaleFunction::K2NoNorm => {
                let w = (k / normalizer).exp();
                w / (1.0 + w)
            }
            ScaleFunction::K3 | ScaleFunction::K3NoNorm => {
                if k <= 0.0 {
                    (k / normalizer).exp() / 2.0
                } else {
                    1.0 - self.q_norm(-k, normalizer)
                }
            }
        }
    }

    /// Largest relative cluster size at quantile q. Multiply by total weight
    /// to get a sample budget. Usually evaluated at several points within a
    /// candidate cluster, with the smallest value used.
    pub fn max(self, q: f64, compression: f64, n: f64) -> f64 {
        match self {
            ScaleFunction::K0 => 2.0 / compression,
            ScaleFunction::K1 | ScaleFunction::K1Fast => {
                if q <= 0.0 || q >= 1.0 {
                    0.0
                } else {
                    2.0 * (PI / compression).sin() * (q * (1.0 - q)).sqrt()
                }
            }
            ScaleFunction::K2 => z2(compression, n) * q * (1.0 - q) / compression,
            ScaleFunction::K3 => z3(compression, n) * q.min(1.0 - q) / compression,
            ScaleFunction::K2NoNorm => q * (1.0 - q) / compression,
            ScaleFunction::K3NoNorm => q.min(1.0 - q) / compression,
        }
    }

    /// Largest relative cluster size, normalized form.
    pub fn max_norm(self, q: f64, normalizer: f64) -> f64 {
        match self {
            ScaleFunction::K0 => 1.0 / normalizer,
            ScaleFunction::K1 | ScaleFunction::K1Fast => {
                if q <= 0.0 || q >= 1.0 {
                    0.0
                } else {
                    2.0 * (0.5 / normalizer).sin() * (q * (1.0 - q)).sqrt()
                }
            }
            ScaleFunction::K2 | ScaleFunction::K2NoNorm => q * (1.0 - q) / normalizer,
            ScaleFunction::K3 | ScaleFunction::K3NoNorm => q.min(1.0 - q) / normalizer,
        }
    }

    /// Precompute the factor that makes `k_norm`/`q_norm`/`max_norm` agree
    /// with the direct forms.
    pub fn normalizer(self, compression: f64, n: f64) -> f64 {
        match self {
            ScaleFunction::K0 => compression / 2.0,
            ScaleFunction::K1 | ScaleFunction::K1Fast => compression / (2.0 * PI),
            ScaleFunction::K2 => compression / z2(compression, n),
            ScaleFunction::K3 => compression / z3(compression, n),
            ScaleFunction::K2NoNorm | ScaleFunction::K3NoNorm => compression,
        }
    }
}

/// Approximates asin to within about 1e-6.
///
/// The range [0,1] is split into five overlapping regions. The first four use
/// rational polynomial models; the last falls back to `f64::asin`. Linear
/// interpolation across the overlaps keeps the result continuous and, as it
/// happens, monotone.
pub fn fast_asin(x: f64) -> f64 {
    if x < 0.0 {
        return -fast_asin(-x);
    }
    if x == 0.0 {
        // the 1/(1-x) model terms leave a few nanoradians of residue here
        return 0.0;
    }
    if x > 1.0 {
        return f64::NAN;
    }

    // Region cutoffs. Ranges overlap; within an overlap we blend linearly.
    const C0_HIGH: f64 = 0.1;
    const C1_HIGH: f64 = 0.55;
    const C2_LOW: f64 = 0.5;
    const C2_HIGH: f64 = 0.8;
    const C3_LOW: f64 = 0.75;
    const C3_HIGH: f64 = 0.9;
    const C4_LOW: f64 = 0.87;

    if x > C3_HIGH {
        return x.asin();
    }

    const M0: [f64; 6] = [
        0.2955302411,
        1.2221903614,
        0.1488583743,
        0.2422015816,
        -0.3688700895,
        0.0733398445,
    ];
    const M1: [f64; 6] = [
        -0.0430991920,
        0.9594035750,
        -0.0362312299,
        0.1204623351,
        0.0457029620,
        -0.0026025285,
    ];
    const M2: [f64; 6] = [
        -0.034873933724,
        1.054796752703,
        -0.194127063385,
        0.283963735636,
        0.023800124916,
        -0.000872727381,
    ];
    const M3: [f64; 6] = [
        -0.37588391875,
        2.61991859025,
        -2.48835406886,
        1.48605387425,
        0.00857627492,
        -0.00015802871,
    ];

    fn eval(model: &[f64; 6], vars: &[f64; 6]) -> f64 {
        model.iter().zip(vars).map(|(m, v)| m * v).sum()
    }

    fn bound(v: f64) -> f64 {
        v.clamp(0.0, 1.0)
    }

    let vars = [
        1.0,
        x,
        x * x,
        x * x * x,
        1.0 / (1.0 - x),
        1.0 / (1.0 - x) / (1.0 - x),
    ];

    let x0 = bound((C0_HIGH - x) / C0_HIGH);
    let x1 = bound((C1_HIGH - x) / (C1_HIGH - C2_LOW));
    let x2 = bound((C2_HIGH - x) / (C2_HIGH - C3_LOW));
    let x3 = bound((C3_HIGH - x) / (C3_HIGH - C4_LOW));

    let mix1 = (1.0 - x0) * x1;
    let mix2 = (1.0 - x1) * x2;
    let mix3 = (1.0 - x2) * x3;
    let mix4 = 1.0 - x3;

    let mut r = 0.0;
    if x0 > 0.0 {
        r += x0 * eval(&M0, &vars);
    }
    if mix1 > 0.0 {
        r += mix1 * eval(&M1, &vars);
    }
    if mix2 > 0.0 {
        r += mix2 * eval(&M2, &vars);
    }
    if mix3 > 0.0 {
        r += mix3 * eval(&M3, &vars);
    }
    if mix4 > 0.0 {
        r += mix4 * x.asin();
    }
    r
}
