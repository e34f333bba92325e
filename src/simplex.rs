//! Probability-simplex helpers for the categorical code.
//!
//! Public invariant: we do **not** silently normalize in methods named like “validate”.

use ndarray::{Array2, ArrayView2};

use crate::{Error, Result};

/// Check whether `p` lies on the probability simplex (within `tol`).
pub fn validate_simplex(p: &[f32], tol: f32) -> Result<()> {
    if p.is_empty() {
        return Err(Error::Domain("simplex vector must be non-empty"));
    }
    if !(tol >= 0.0) || !tol.is_finite() {
        return Err(Error::Domain("tol must be finite and >= 0"));
    }
    if p.iter().any(|&x| !x.is_finite()) {
        return Err(Error::Domain("simplex vector contains non-finite values"));
    }
    if p.iter().any(|&x| x < -tol) {
        return Err(Error::Domain("simplex vector has negative entries"));
    }
    let s: f32 = p.iter().sum();
    if (s - 1.0).abs() > tol {
        return Err(Error::Domain(
            "simplex vector does not sum to 1 (within tol)",
        ));
    }
    Ok(())
}

/// One row per class index, a single `1.0` at that index.
pub fn one_hot(classes: &[usize], n_classes: usize) -> Result<Array2<f32>> {
    if classes.iter().any(|&c| c >= n_classes) {
        return Err(Error::Domain("class index out of range"));
    }
    let mut out = Array2::<f32>::zeros((classes.len(), n_classes));
    for (i, &c) in classes.iter().enumerate() {
        out[[i, c]] = 1.0;
    }
    Ok(out)
}

/// Row-wise arg-max. Ties resolve to the smallest index.
pub fn argmax_rows(p: &ArrayView2<f32>) -> Vec<usize> {
    p.rows()
        .into_iter()
        .map(|row| {
            let mut best = 0usize;
            for k in 1..row.len() {
                if row[k] > row[best] {
                    best = k;
                }
            }
            best
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_hot_rows_are_on_simplex() {
        let p = one_hot(&[2, 0, 3], 4).unwrap();
        for row in p.rows() {
            validate_simplex(&row.to_vec(), 0.0).unwrap();
        }
        assert_eq!(argmax_rows(&p.view()), vec![2, 0, 3]);
        assert!(one_hot(&[4], 4).is_err());
    }

    #[test]
    fn argmax_breaks_ties_low() {
        let p = Array2::from_shape_vec((2, 3), vec![0.4, 0.4, 0.2, 0.1, 0.3, 0.3]).unwrap();
        assert_eq!(argmax_rows(&p.view()), vec![0, 1]);
    }

    #[test]
    fn validate_rejects_off_simplex() {
        assert!(validate_simplex(&[0.5, 0.6], 1e-6).is_err());
        assert!(validate_simplex(&[1.2, -0.2], 1e-6).is_err());
        assert!(validate_simplex(&[], 1e-6).is_err());
        assert!(validate_simplex(&[f32::NAN, 1.0], 1e-6).is_err());
    }
}
