//! Configuration space: per-dimension bounds and candidate vectors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{NsError, NsResult};
use crate::validation_error;

/// Exclusive upper bound for every dimension of the search space.
///
/// A range table always has at least one dimension and every bound is
/// positive, so `0` is a valid value in each dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct RangeTable {
    bounds: Vec<usize>,
}

impl RangeTable {
    pub fn new(bounds: Vec<usize>) -> NsResult<Self> {
        if bounds.is_empty() {
            return Err(validation_error!("range table must have at least one dimension"));
        }
        if let Some(dim) = bounds.iter().position(|&b| b == 0) {
            return Err(validation_error!(
                "range table bound for dimension {dim} must be positive"
            ));
        }
        Ok(Self { bounds })
    }

    /// Number of dimensions.
    pub fn dims(&self) -> usize {
        self.bounds.len()
    }

    pub fn bound(&self, dim: usize) -> usize {
        self.bounds[dim]
    }

    pub fn bounds(&self) -> &[usize] {
        &self.bounds
    }

    /// Number of points in the space, `None` on overflow.
    pub fn total_size(&self) -> Option<usize> {
        self.bounds
            .iter()
            .try_fold(1usize, |total, &bound| total.checked_mul(bound))
    }

    /// Whether `var` has the right length and every value is within bounds.
    pub fn contains(&self, var: &ConfigVector) -> bool {
        var.len() == self.dims()
            && var
                .values()
                .iter()
                .zip(&self.bounds)
                .all(|(value, bound)| value < bound)
    }

    pub fn zeros(&self) -> ConfigVector {
        ConfigVector::new(vec![0; self.dims()])
    }

    /// Check `var` against the table, reporting the first violation.
    pub fn validate(&self, var: &ConfigVector) -> NsResult<()> {
        if var.len() != self.dims() {
            return Err(validation_error!(
                "config vector {var} has {} dimensions, expected {}",
                var.len(),
                self.dims()
            ));
        }
        if !self.contains(var) {
            return Err(validation_error!(
                "config vector {var} is outside range table {:?}",
                self.bounds
            ));
        }
        Ok(())
    }
}

impl TryFrom<Vec<usize>> for RangeTable {
    type Error = NsError;

    fn try_from(bounds: Vec<usize>) -> NsResult<Self> {
        Self::new(bounds)
    }
}

impl From<RangeTable> for Vec<usize> {
    fn from(table: RangeTable) -> Self {
        table.bounds
    }
}

/// A candidate point in the search space, one value per dimension.
///
/// Renders as `[v0,v1,...]` with no embedded whitespace: remote evaluators
/// split their input on whitespace and must receive it as one token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigVector(Vec<usize>);

impl ConfigVector {
    pub fn new(values: Vec<usize>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[usize] {
        &self.0
    }

    pub fn get(&self, dim: usize) -> Option<usize> {
        self.0.get(dim).copied()
    }

    /// Copy of this vector with `dim` set to `value`.
    pub fn with_value(&self, dim: usize, value: usize) -> Self {
        let mut values = self.0.clone();
        values[dim] = value;
        Self(values)
    }

    /// `len` copies of the same value.
    pub fn replicated(value: usize, len: usize) -> Self {
        Self(vec![value; len])
    }

    pub fn into_inner(self) -> Vec<usize> {
        self.0
    }
}

impl From<Vec<usize>> for ConfigVector {
    fn from(values: Vec<usize>) -> Self {
        Self(values)
    }
}

impl fmt::Display for ConfigVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, "]")
    }
}

impl FromStr for ConfigVector {
    type Err = NsError;

    fn from_str(s: &str) -> NsResult<Self> {
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| validation_error!("config vector must be bracketed: {s:?}"))?;

        if inner.trim().is_empty() {
            return Ok(Self(Vec::new()));
        }

        inner
            .split(',')
            .map(|token| {
                token
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| validation_error!("bad config value {token:?}: {e}"))
            })
            .collect::<NsResult<Vec<_>>>()
            .map(Self)
    }
}
