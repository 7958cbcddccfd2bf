//! Dense least-squares solves for the interpolator.
//!
//! Systems are at most `2 * stored_samples` rows by `order + 1` columns.

use nalgebra::DMatrix;

/// Least-squares solution of `a * x = b` through Householder QR with column
/// pivoting.
///
/// Rank-deficient and underdetermined systems get the basic solution: the
/// unknowns past the numerical rank are zero.
pub(crate) fn solve_qr(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    debug_assert_eq!(a.nrows(), b.nrows(), "row mismatch between system and right-hand side");

    let (m, n) = a.shape();
    let qr = a.clone().col_piv_qr();
    let r = qr.r();
    let qtb = qr.q().transpose() * b;

    let diagonal = r.diagonal();
    let threshold = diagonal.amax() * f64::EPSILON * m.max(n) as f64;
    let rank = diagonal.iter().take_while(|d| d.abs() > threshold).count();

    let mut x = DMatrix::zeros(n, b.ncols());
    if rank > 0 {
        let leading = r.view((0, 0), (rank, rank));
        let solved = leading.solve_upper_triangular(&qtb.rows(0, rank))?;
        x.rows_mut(0, rank).copy_from(&solved);
    }
    qr.p().inv_permute_rows(&mut x);

    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Least-squares solution through the normal equations `aᵀa x = aᵀb`.
///
/// Returns `None` when the normal matrix is numerically singular.
pub(crate) fn solve_normal_cholesky(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    debug_assert_eq!(a.nrows(), b.nrows(), "row mismatch between system and right-hand side");

    let normal = a.transpose() * a;
    let rhs = a.transpose() * b;
    let tolerance = normal.diagonal().amax() * f64::EPSILON * normal.nrows() as f64;

    let cholesky = normal.cholesky()?;
    if cholesky.l_dirty().diagonal().iter().any(|l| l * l <= tolerance) {
        return None;
    }

    let x = cholesky.solve(&rhs);
    x.iter().all(|v| v.is_finite()).then_some(x)
}
