use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::ExpansionError;
use crate::job::ParameterType;

/// One active dimension after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDimension {
    /// Parameter name.
    pub name: String,
    /// Values in resolution order.
    pub values: Vec<String>,
}

impl ResolvedDimension {
    /// Convenience constructor.
    pub fn new<S: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self { name: name.into(), values: values.into_iter().map(Into::into).collect() }
    }
}

/// Parameters for a single external call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionUnit {
    /// Position in the expanded sequence, from 0.
    pub index: usize,
    /// Base parameters overlaid with one value per used dimension.
    pub parameters: BTreeMap<String, String>,
}

/// Number of units the strategy would produce, saturating instead of overflowing.
pub fn unit_count(kind: ParameterType, dims: &[ResolvedDimension]) -> u128 {
    match kind {
        ParameterType::Single => 1,
        ParameterType::MultiParam => dims.first().map_or(0, |d| d.values.len() as u128),
        ParameterType::Matrix => dims
            .iter()
            .try_fold(1u128, |acc, d| acc.checked_mul(d.values.len() as u128))
            .unwrap_or(u128::MAX),
    }
}

/// Expand resolved dimensions into execution units.
///
/// `dims` must be the active dimensions in ascending `sortOrder`.
/// SINGLE ignores them, MULTI_PARAM only reads the first, MATRIX takes the
/// row-major cartesian product (first dimension slowest, last fastest).
/// Dimension values override base parameters of the same name.
pub fn expand(
    kind: ParameterType,
    base: &BTreeMap<String, String>,
    dims: &[ResolvedDimension],
    ceiling: usize,
) -> Result<Vec<ExecutionUnit>, ExpansionError> {
    let units = unit_count(kind, dims);
    if units > ceiling as u128 {
        return Err(ExpansionError::TooLarge { units, ceiling });
    }

    let unit = |index: usize, picks: &[(&str, &str)]| {
        let mut parameters = base.clone();
        for (k, v) in picks {
            parameters.insert((*k).to_string(), (*v).to_string());
        }
        ExecutionUnit { index, parameters }
    };

    let out = match kind {
        ParameterType::Single => vec![unit(0, &[])],
        ParameterType::MultiParam => match dims.first() {
            Some(d) => d
                .values
                .iter()
                .enumerate()
                .map(|(i, v)| unit(i, &[(d.name.as_str(), v.as_str())]))
                .collect(),
            None => Vec::new(),
        },
        ParameterType::Matrix => {
            let total = units as usize;
            let mut out = Vec::with_capacity(total);
            // Odometer over the dimensions; the last position turns fastest.
            let mut cursor = vec![0usize; dims.len()];
            for index in 0..total {
                let picks: Vec<(&str, &str)> = dims
                    .iter()
                    .zip(&cursor)
                    .map(|(d, &i)| (d.name.as_str(), d.values[i].as_str()))
                    .collect();
                out.push(unit(index, &picks));
                for pos in (0..dims.len()).rev() {
                    cursor[pos] += 1;
                    if cursor[pos] < dims[pos].values.len() {
                        break;
                    }
                    cursor[pos] = 0;
                }
            }
            out
        }
    };
    Ok(out)
}
