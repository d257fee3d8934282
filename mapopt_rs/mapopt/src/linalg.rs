//! Small dense solves for the least-squares fits.

const PIVOT_EPS: f64 = 1e-12;

/// Solve `a · x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` when a pivot vanishes relative to the matrix scale.
pub(crate) fn solve<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> Option<[f64; N]> {
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if !(scale.is_finite() && scale > 0.0) {
        return None;
    }

    for col in 0..N {
        let pivot = (col..N).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() <= PIVOT_EPS * scale {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..N {
            let factor = a[row][col] / a[col][col];
            for k in col..N {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; N];
    for row in (0..N).rev() {
        let tail: f64 = (row + 1..N).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Normal equations `XᵀX`, `Xᵀy` for a polynomial basis `1, u, u², ...`.
pub(crate) fn normal_equations<const N: usize>(us: &[f64], ys: &[f64]) -> ([[f64; N]; N], [f64; N]) {
    let mut xtx = [[0.0; N]; N];
    let mut xty = [0.0; N];
    for (&u, &y) in us.iter().zip(ys.iter()) {
        let mut powers = [1.0; N];
        for p in 1..N {
            powers[p] = powers[p - 1] * u;
        }
        for i in 0..N {
            xty[i] += powers[i] * y;
            for j in 0..N {
                xtx[i][j] += powers[i] * powers[j];
            }
        }
    }
    (xtx, xty)
}
