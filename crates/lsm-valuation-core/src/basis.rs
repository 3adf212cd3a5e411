//! Regression basis construction.
//!
//! Turns the state variables of every path at one time slice into a
//! path x K design matrix. For each factor the builder emits the
//! non-constant polynomial terms of degree `1..=d` of the chosen family
//! (the raw value alone when `d = 0`), followed by optional pairwise cross
//! products of the raw factors. The regression estimator adds its own
//! intercept, so no constant column is ever produced here.
use serde::de::{self, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LsmError;
use crate::types::PathEnsemble;
use crate::LsmResult;

/// Polynomial family used for the per-factor basis terms.
///
/// Deserializes from a name (`"laguerre"`, `"jacobi"`) or from a single-key
/// object such as `{"jacobi": {"alpha": 0.5, "beta": 2.0}}`. Unknown names
/// surface as a configuration error on `basis.family`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolynomialFamily {
    /// Plain powers `x, x^2, ..., x^d`.
    #[default]
    Power,
    Laguerre,
    Legendre,
    /// Chebyshev polynomials of the first kind.
    Chebyshev,
    /// Physicists' Hermite polynomials.
    Hermite,
    Jacobi { alpha: f64, beta: f64 },
}

impl fmt::Display for PolynomialFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolynomialFamily::Power => write!(f, "power"),
            PolynomialFamily::Laguerre => write!(f, "laguerre"),
            PolynomialFamily::Legendre => write!(f, "legendre"),
            PolynomialFamily::Chebyshev => write!(f, "chebyshev"),
            PolynomialFamily::Hermite => write!(f, "hermite"),
            PolynomialFamily::Jacobi { alpha, beta } => write!(f, "jacobi({alpha}, {beta})"),
        }
    }
}

impl FromStr for PolynomialFamily {
    type Err = LsmError;

    /// Parses a family by name. `"jacobi"` uses `alpha = beta = 1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "power" => Ok(PolynomialFamily::Power),
            "laguerre" => Ok(PolynomialFamily::Laguerre),
            "legendre" => Ok(PolynomialFamily::Legendre),
            "chebyshev" => Ok(PolynomialFamily::Chebyshev),
            "hermite" => Ok(PolynomialFamily::Hermite),
            "jacobi" => Ok(PolynomialFamily::Jacobi {
                alpha: 1.0,
                beta: 1.0,
            }),
            other => Err(LsmError::config(
                "basis.family",
                format!("unsupported polynomial family '{other}'"),
            )),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct JacobiParams {
    alpha: f64,
    beta: f64,
}

struct FamilyVisitor;

impl<'de> Visitor<'de> for FamilyVisitor {
    type Value = PolynomialFamily;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a polynomial family name or {\"jacobi\": {\"alpha\": a, \"beta\": b}}")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let Some(name) = map.next_key::<String>()? else {
            return Err(de::Error::custom(LsmError::config(
                "basis.family",
                "empty family object",
            )));
        };
        let family = if name.trim().eq_ignore_ascii_case("jacobi") {
            let p: JacobiParams = map.next_value()?;
            PolynomialFamily::Jacobi {
                alpha: p.alpha,
                beta: p.beta,
            }
        } else {
            map.next_value::<IgnoredAny>()?;
            name.parse().map_err(<A::Error as de::Error>::custom)?
        };
        if map.next_key::<IgnoredAny>()?.is_some() {
            return Err(de::Error::custom(LsmError::config(
                "basis.family",
                "family object must have exactly one key",
            )));
        }
        Ok(family)
    }
}

impl<'de> Deserialize<'de> for PolynomialFamily {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FamilyVisitor)
    }
}

impl PolynomialFamily {
    /// Appends `P_1(x) ..= P_degree(x)` to `out`.
    fn push_terms(self, x: f64, degree: usize, out: &mut Vec<f64>) {
        if degree == 0 {
            return;
        }
        if let PolynomialFamily::Power = self {
            let mut p = x;
            out.push(p);
            for _ in 2..=degree {
                p *= x;
                out.push(p);
            }
            return;
        }

        // Three-term recurrence from (P_0, P_1).
        let mut prev = 1.0_f64;
        let mut curr = match self {
            PolynomialFamily::Laguerre => 1.0 - x,
            PolynomialFamily::Legendre | PolynomialFamily::Chebyshev => x,
            PolynomialFamily::Hermite => 2.0 * x,
            PolynomialFamily::Jacobi { alpha, beta } => {
                (alpha + 1.0) + 0.5 * (alpha + beta + 2.0) * (x - 1.0)
            }
            PolynomialFamily::Power => x,
        };
        out.push(curr);
        for n in 2..=degree {
            let k = n as f64;
            let next = match self {
                PolynomialFamily::Laguerre => ((2.0 * k - 1.0 - x) * curr - (k - 1.0) * prev) / k,
                PolynomialFamily::Legendre => ((2.0 * k - 1.0) * x * curr - (k - 1.0) * prev) / k,
                PolynomialFamily::Chebyshev => 2.0 * x * curr - prev,
                PolynomialFamily::Hermite => 2.0 * x * curr - 2.0 * (k - 1.0) * prev,
                PolynomialFamily::Jacobi { alpha: a, beta: b } => {
                    let s = 2.0 * k + a + b;
                    let lhs = 2.0 * k * (k + a + b) * (s - 2.0);
                    let c1 = (s - 1.0) * (s * (s - 2.0) * x + a * a - b * b);
                    let c2 = 2.0 * (k + a - 1.0) * (k + b - 1.0) * s;
                    (c1 * curr - c2 * prev) / lhs
                }
                PolynomialFamily::Power => curr * x,
            };
            prev = curr;
            curr = next;
            out.push(curr);
        }
    }
}

fn default_degree() -> u32 {
    2
}

/// Regressor configuration shared by every engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasisConfig {
    #[serde(default)]
    pub family: PolynomialFamily,
    /// Maximum polynomial degree per factor.
    #[serde(default = "default_degree")]
    pub degree: u32,
    /// Append pairwise products of the raw factors.
    #[serde(default)]
    pub cross_products: bool,
}

impl Default for BasisConfig {
    fn default() -> Self {
        Self {
            family: PolynomialFamily::Power,
            degree: default_degree(),
            cross_products: false,
        }
    }
}

impl BasisConfig {
    pub fn new(family: PolynomialFamily, degree: u32, cross_products: bool) -> Self {
        Self {
            family,
            degree,
            cross_products,
        }
    }

    pub fn validate(&self) -> LsmResult<()> {
        if let PolynomialFamily::Jacobi { alpha, beta } = self.family {
            if !alpha.is_finite() || !beta.is_finite() || alpha <= -1.0 || beta <= -1.0 {
                return Err(LsmError::config(
                    "basis.family",
                    "jacobi parameters must be finite and greater than -1",
                ));
            }
        }
        Ok(())
    }

    /// Number of regressors `K` produced for `factors` state variables.
    pub fn columns(&self, factors: usize) -> usize {
        let per_factor = (self.degree as usize).max(1);
        let cross = if self.cross_products && factors > 1 {
            factors * (factors - 1) / 2
        } else {
            0
        };
        factors * per_factor + cross
    }

    /// Builds the design matrix from one time slice laid out path-major
    /// with `factors` values per path.
    pub fn build(&self, states: &[f64], factors: usize) -> LsmResult<BasisMatrix> {
        self.validate()?;
        if factors == 0 {
            return Err(LsmError::config(
                "state_variables",
                "at least one factor is required to build a basis",
            ));
        }
        if states.len() % factors != 0 {
            return Err(LsmError::config(
                "state_variables",
                format!(
                    "slice of {} values is not a multiple of {factors} factors",
                    states.len()
                ),
            ));
        }
        let rows = states.len() / factors;
        let cols = self.columns(factors);
        let degree = self.degree as usize;
        let mut data = Vec::with_capacity(rows * cols);

        for x in states.chunks(factors) {
            for &xi in x {
                if degree == 0 {
                    data.push(xi);
                } else {
                    self.family.push_terms(xi, degree, &mut data);
                }
            }
            if self.cross_products {
                for i in 0..factors {
                    for j in (i + 1)..factors {
                        data.push(x[i] * x[j]);
                    }
                }
            }
        }

        Ok(BasisMatrix { rows, cols, data })
    }

    /// Design matrix of the ensemble slice at time index `t`.
    pub fn build_at(&self, ensemble: &PathEnsemble, t: usize) -> LsmResult<BasisMatrix> {
        self.build(ensemble.slice(t), ensemble.factors())
    }
}

/// Row-major path x K regressor matrix. Row `i` belongs to path `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct BasisMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl BasisMatrix {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }
}
