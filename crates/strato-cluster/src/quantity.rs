//! Kubernetes resource-quantity parsing.
//!
//! Quantities arrive as strings (`"100m"`, `"128Mi"`, `"2"`) and the
//! accounting maths needs plain numbers: cores for CPU, bytes for memory.

use crate::error::{ClusterError, ClusterResult};

/// Parse a Kubernetes quantity into a plain number.
///
/// CPU quantities come out in cores (`"100m"` → `0.1`), memory quantities
/// in bytes (`"128Mi"` → `134217728.0`). Binary (`Ki`..`Ei`) and decimal
/// (`k`..`E`) suffixes, the milli suffix, scientific notation and plain
/// numbers are all accepted.
pub fn parse_quantity(quantity: &str) -> ClusterResult<f64> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return Err(ClusterError::QuantityParse(quantity.to_owned()));
    }

    let (number, multiplier) = split_suffix(quantity);

    let value: f64 = number
        .parse()
        .map_err(|_| ClusterError::QuantityParse(quantity.to_owned()))?;

    Ok(value * multiplier)
}

fn split_suffix(quantity: &str) -> (&str, f64) {
    const BINARY: [(&str, f64); 6] = [
        ("Ki", 1024.0),
        ("Mi", 1048576.0),
        ("Gi", 1073741824.0),
        ("Ti", 1099511627776.0),
        ("Pi", 1125899906842624.0),
        ("Ei", 1152921504606846976.0),
    ];

    for (suffix, multiplier) in BINARY {
        if let Some(number) = quantity.strip_suffix(suffix) {
            return (number, multiplier);
        }
    }

    // Single-letter decimal suffixes. A trailing `e`/`E` preceded by a
    // digit is scientific notation ("1e3"), not the exa suffix.
    if let Some(last) = quantity.chars().last() {
        let multiplier = match last {
            'm' => Some(1e-3),
            'u' => Some(1e-6),
            'n' => Some(1e-9),
            'k' => Some(1e3),
            'M' => Some(1e6),
            'G' => Some(1e9),
            'T' => Some(1e12),
            'P' => Some(1e15),
            _ => None,
        };
        if let Some(multiplier) = multiplier {
            return (&quantity[..quantity.len() - 1], multiplier);
        }
    }

    (quantity, 1.0)
}
