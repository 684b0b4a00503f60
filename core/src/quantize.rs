//! Gram quantity to `(servings, serving size)` conversion.

use crate::error::{SyncError, SyncResult};
use crate::models::ServingSize;

pub const DEFAULT_MAX_SERVINGS: u32 = 200;

const REMAINDER_TOLERANCE: f64 = 1e-6;

/// Express `quantity_g` as a whole number of one of the candidate units.
///
/// Candidates are tried largest first and the first unit that divides the
/// quantity evenly with a servings count in `1..=max_servings` wins. When none
/// does, the result falls back to whole grams: `(quantity_g.trunc(), OneGram)`.
/// The fallback ignores `max_servings` and drops sub-gram precision, so
/// `quantize(0.5, ..)` yields `(0, OneGram)`.
pub fn quantize(
    quantity_g: f64,
    candidates: &[ServingSize],
    max_servings: u32,
) -> SyncResult<(u32, ServingSize)> {
    if !quantity_g.is_finite() || quantity_g < 0.0 {
        return Err(SyncError::InvalidInput(format!(
            "Quantity must be a non-negative number of grams (got {quantity_g})"
        )));
    }

    let mut sizes = candidates.to_vec();
    sizes.sort_by(|a, b| b.grams().total_cmp(&a.grams()));
    sizes.dedup();

    for size in sizes {
        let grams = size.grams();
        if !divides_evenly(quantity_g, grams) {
            continue;
        }
        let servings = (quantity_g / grams).round();
        if servings >= 1.0 && servings <= f64::from(max_servings) {
            return Ok((servings as u32, size));
        }
    }

    // Saturating cast; counts above max_servings are kept as-is.
    #[allow(clippy::cast_sign_loss)]
    let whole_grams = quantity_g.trunc() as u32;
    Ok((whole_grams, ServingSize::OneGram))
}

/// Quantize against every known unit with the default servings cap.
pub fn quantize_default(quantity_g: f64) -> SyncResult<(u32, ServingSize)> {
    quantize(quantity_g, &ServingSize::ALL, DEFAULT_MAX_SERVINGS)
}

fn divides_evenly(quantity: f64, unit: f64) -> bool {
    let rem = quantity % unit;
    rem.abs() < REMAINDER_TOLERANCE || (unit - rem).abs() < REMAINDER_TOLERANCE
}
