/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Lagrange interpolation of partial signatures.

use std::collections::BTreeMap;

use blstrs::{G2Affine, G2Projective, Scalar};
use ff::Field;
use group::{Curve, Group};

use crate::types::data_types::{OperatorID, SignatureBytes};

use super::ThresholdError;

/// Interpolate the signature of the full secret key from signatures made with its shares.
///
/// Each partial is weighted by the Lagrange coefficient of its operator at `x = 0`, so the result is the
/// full signature exactly when `partials` holds at least as many correct shares as the degree of the
/// sharing polynomial plus one. The result is not verified here.
pub fn reconstruct_signature(
    partials: &BTreeMap<OperatorID, SignatureBytes>,
) -> Result<SignatureBytes, ThresholdError> {
    if partials.is_empty() {
        return Err(ThresholdError::NotEnoughPartials {
            collected: 0,
            required: 1,
        });
    }
    if partials.keys().any(|id| id.int() == 0) {
        return Err(ThresholdError::ZeroOperatorID);
    }

    let xs: Vec<Scalar> = partials.keys().map(|id| Scalar::from(id.int())).collect();

    let mut reconstructed = G2Projective::identity();
    for (i, (signer, partial)) in partials.iter().enumerate() {
        let point = Option::<G2Affine>::from(G2Affine::from_compressed(&partial.bytes()))
            .ok_or(ThresholdError::InvalidPartialEncoding { signer: *signer })?;
        let coefficient = lagrange_coefficient_at_zero(&xs, i)?;
        reconstructed += G2Projective::from(point) * coefficient;
    }
    Ok(SignatureBytes::new(reconstructed.to_affine().to_compressed()))
}

// prod_{j != i} x_j / (x_j - x_i)
fn lagrange_coefficient_at_zero(xs: &[Scalar], i: usize) -> Result<Scalar, ThresholdError> {
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;
    for (j, x_j) in xs.iter().enumerate() {
        if j == i {
            continue;
        }
        numerator *= x_j;
        denominator *= *x_j - xs[i];
    }
    let inverse = Option::<Scalar>::from(denominator.invert()).ok_or(ThresholdError::ZeroOperatorID)?;
    Ok(numerator * inverse)
}
