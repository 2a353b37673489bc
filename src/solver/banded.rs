//! Sparse system assembly and banded LU factorization.
//!
//! Tissue operators are assembled by stamping entries into a
//! [`SystemBuilder`]. The builder converts either into a banded matrix that
//! is LU-factorized once ([`BandedLu`]) or into CSR form for iterative solves.
//!
//! Structured-grid numbering keeps every operator banded, so the direct
//! factorization costs `O(n * kl * (kl + ku))` and fill stays inside the band.

use crate::error::{CardiacError, Result};

use super::{LinearSolver, SolveStats};

/// Pivots below this magnitude mark the operator as singular.
const PIVOT_TOLERANCE: f64 = 1e-14;

/// Triplet accumulator for a square sparse system.
#[derive(Debug, Clone)]
pub struct SystemBuilder {
    size: usize,
    entries: Vec<(usize, usize, f64)>,
    pinned: Vec<bool>,
}

impl SystemBuilder {
    /// Create an empty `size x size` system.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            entries: Vec::new(),
            pinned: vec![false; size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Add to matrix element at (row, col).
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.size && col < self.size);
        if value != 0.0 {
            self.entries.push((row, col, value));
        }
    }

    /// Stamp a conductance between two unknowns.
    /// For a conductance G between n1 and n2:
    ///   A[n1,n1] += G
    ///   A[n2,n2] += G
    ///   A[n1,n2] -= G
    ///   A[n2,n1] -= G
    pub fn stamp_conductance(&mut self, n1: Option<usize>, n2: Option<usize>, g: f64) {
        if let Some(i) = n1 {
            self.add(i, i, g);
        }
        if let Some(j) = n2 {
            self.add(j, j, g);
        }
        if let (Some(i), Some(j)) = (n1, n2) {
            self.add(i, j, -g);
            self.add(j, i, -g);
        }
    }

    /// Stamp a conductance coupling row block `rows` against column block
    /// `cols` (off-diagonal block of a two-field system).
    pub fn stamp_coupling(&mut self, rows: [usize; 2], cols: [usize; 2], g: f64) {
        self.add(rows[0], cols[0], g);
        self.add(rows[1], cols[1], g);
        self.add(rows[0], cols[1], -g);
        self.add(rows[1], cols[0], -g);
    }

    /// Replace equation `row` by `x[row] = rhs[row]` (reference potential).
    pub fn pin(&mut self, row: usize) {
        self.pinned[row] = true;
    }

    pub fn is_pinned(&self, row: usize) -> bool {
        self.pinned[row]
    }

    /// Effective entries with pinned rows replaced by identity rows.
    fn effective_entries(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        let identity = (0..self.size)
            .filter(|&r| self.pinned[r])
            .map(|r| (r, r, 1.0));
        self.entries
            .iter()
            .copied()
            .filter(|&(r, _, _)| !self.pinned[r])
            .chain(identity)
    }

    /// Lower and upper bandwidth of the effective matrix.
    pub fn bandwidths(&self) -> (usize, usize) {
        self.effective_entries()
            .fold((0, 0), |(kl, ku), (r, c, _)| {
                if r > c {
                    (kl.max(r - c), ku)
                } else {
                    (kl, ku.max(c - r))
                }
            })
    }

    /// Convert to banded storage and factorize.
    pub fn factor_banded(&self) -> Result<BandedLu> {
        let (kl, ku) = self.bandwidths();
        let mut lu = BandedLu::zeros(self.size, kl, ku);
        for (r, c, v) in self.effective_entries() {
            *lu.at_mut(r, c) += v;
        }
        lu.factor()?;
        Ok(lu)
    }

    /// Convert to compressed sparse rows, summing duplicates.
    pub fn to_csr(&self) -> CsrMatrix {
        let mut entries: Vec<(usize, usize, f64)> = self.effective_entries().collect();
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut row_ptr = vec![0usize; self.size + 1];
        let mut cols: Vec<usize> = Vec::with_capacity(entries.len());
        let mut values: Vec<f64> = Vec::with_capacity(entries.len());
        let mut last: Option<(usize, usize)> = None;

        for (r, c, v) in entries {
            if last == Some((r, c)) {
                if let Some(tail) = values.last_mut() {
                    *tail += v;
                }
                continue;
            }
            cols.push(c);
            values.push(v);
            row_ptr[r + 1] += 1;
            last = Some((r, c));
        }
        for r in 0..self.size {
            row_ptr[r + 1] += row_ptr[r];
        }

        CsrMatrix {
            size: self.size,
            row_ptr,
            cols,
            values,
        }
    }
}

/// Compressed sparse row matrix.
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    size: usize,
    row_ptr: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    pub fn size(&self) -> usize {
        self.size
    }

    /// y = A x
    pub fn mul_vec(&self, x: &[f64], y: &mut [f64]) {
        for (row, out) in y.iter_mut().enumerate() {
            let span = self.row_ptr[row]..self.row_ptr[row + 1];
            *out = self.cols[span.clone()]
                .iter()
                .zip(&self.values[span])
                .map(|(&c, &v)| v * x[c])
                .sum();
        }
    }

    /// Diagonal entries (zero where none is stored).
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.size)
            .map(|row| {
                let span = self.row_ptr[row]..self.row_ptr[row + 1];
                self.cols[span.clone()]
                    .iter()
                    .zip(&self.values[span])
                    .find(|(&c, _)| c == row)
                    .map(|(_, &v)| v)
                    .unwrap_or(0.0)
            })
            .collect()
    }
}

/// Banded matrix holding its own LU factors after [`BandedLu::factor`].
///
/// Row `i` stores columns `i - kl ..= i + kl + ku`; the extra `kl`
/// superdiagonals receive fill from row interchanges.
#[derive(Debug, Clone)]
pub struct BandedLu {
    size: usize,
    kl: usize,
    ku: usize,
    width: usize,
    data: Vec<f64>,
    pivots: Vec<usize>,
}

impl BandedLu {
    fn zeros(size: usize, kl: usize, ku: usize) -> Self {
        let width = 2 * kl + ku + 1;
        Self {
            size,
            kl,
            ku,
            width,
            data: vec![0.0; size * width],
            pivots: (0..size).collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// (lower, upper) bandwidth of the assembled matrix.
    pub fn bandwidths(&self) -> (usize, usize) {
        (self.kl, self.ku)
    }

    fn index(&self, row: usize, col: usize) -> usize {
        debug_assert!(col + self.kl >= row && col <= row + self.kl + self.ku);
        row * self.width + (col + self.kl - row)
    }

    fn at(&self, row: usize, col: usize) -> f64 {
        self.data[self.index(row, col)]
    }

    fn at_mut(&mut self, row: usize, col: usize) -> &mut f64 {
        let idx = self.index(row, col);
        &mut self.data[idx]
    }

    /// LU decomposition with partial pivoting, in place.
    fn factor(&mut self) -> Result<()> {
        let n = self.size;
        let reach = self.kl + self.ku;

        for k in 0..n {
            let last_row = (k + self.kl).min(n - 1);
            let last_col = (k + reach).min(n - 1);

            // Find pivot
            let mut max_val = self.at(k, k).abs();
            let mut max_row = k;
            for i in (k + 1)..=last_row {
                let val = self.at(i, k).abs();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }

            if max_val < PIVOT_TOLERANCE {
                return Err(CardiacError::SingularMatrix { row: k });
            }

            // Swap rows if needed (multipliers left of column k stay in place)
            self.pivots[k] = max_row;
            if max_row != k {
                for j in k..=last_col {
                    let a = self.index(k, j);
                    let b = self.index(max_row, j);
                    self.data.swap(a, b);
                }
            }

            // Eliminate
            let pivot = self.at(k, k);
            for i in (k + 1)..=last_row {
                let factor = self.at(i, k) / pivot;
                if factor == 0.0 {
                    continue;
                }
                *self.at_mut(i, k) = factor;
                for j in (k + 1)..=last_col {
                    let upper = self.at(k, j);
                    *self.at_mut(i, j) -= factor * upper;
                }
            }
        }

        Ok(())
    }
}

impl LinearSolver for BandedLu {
    fn solve(&self, rhs: &[f64], x: &mut [f64]) -> SolveStats {
        let n = self.size;
        let reach = self.kl + self.ku;
        x.copy_from_slice(rhs);

        // Forward substitution (L * y = Pb), interleaving the row swaps
        for k in 0..n {
            let p = self.pivots[k];
            if p != k {
                x.swap(k, p);
            }
            let xk = x[k];
            for i in (k + 1)..=(k + self.kl).min(n.saturating_sub(1)) {
                x[i] -= self.at(i, k) * xk;
            }
        }

        // Back substitution (U * x = y)
        for i in (0..n).rev() {
            let mut sum = x[i];
            for j in (i + 1)..=(i + reach).min(n - 1) {
                sum -= self.at(i, j) * x[j];
            }
            x[i] = sum / self.at(i, i);
        }

        SolveStats {
            iterations: 1,
            residual: 0.0,
            converged: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn residual(builder: &SystemBuilder, x: &[f64], b: &[f64]) -> f64 {
        let csr = builder.to_csr();
        let mut ax = vec![0.0; x.len()];
        csr.mul_vec(x, &mut ax);
        ax.iter().zip(b).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max)
    }

    #[test]
    fn test_conductance_chain_solve() {
        // Resistor ladder grounded at both ends through pinned rows
        let n = 6;
        let mut builder = SystemBuilder::new(n);
        for i in 0..n - 1 {
            builder.stamp_conductance(Some(i), Some(i + 1), 2.0);
        }
        builder.pin(0);
        builder.pin(n - 1);

        let lu = builder.factor_banded().unwrap();
        assert_eq!(lu.bandwidths(), (1, 1));

        let mut b = vec![0.0; n];
        b[0] = 0.0;
        b[n - 1] = 5.0;
        let mut x = vec![0.0; n];
        lu.solve(&b, &mut x);

        for (i, &xi) in x.iter().enumerate() {
            assert_relative_eq!(xi, i as f64, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_pivoting_handles_zero_diagonal() {
        // Saddle-point block [[1, 1], [1, 0]] repeated along a chain
        let mut builder = SystemBuilder::new(4);
        builder.add(0, 0, 1.0);
        builder.add(0, 1, 1.0);
        builder.add(1, 0, 1.0);
        builder.add(1, 2, 0.5);
        builder.add(2, 1, 0.5);
        builder.add(2, 2, 2.0);
        builder.add(2, 3, 1.0);
        builder.add(3, 2, 1.0);

        let lu = builder.factor_banded().unwrap();
        let b = vec![1.0, 2.0, 3.0, 4.0];
        let mut x = vec![0.0; 4];
        lu.solve(&b, &mut x);
        assert!(residual(&builder, &x, &b) < 1e-12);
    }

    #[test]
    fn test_singular_operator_rejected() {
        // Floating conductance pair: constant null space
        let mut builder = SystemBuilder::new(2);
        builder.stamp_conductance(Some(0), Some(1), 1.0);
        let err = builder.factor_banded().unwrap_err();
        assert!(matches!(err, CardiacError::SingularMatrix { .. }));
    }

    #[test]
    fn test_csr_sums_duplicates() {
        let mut builder = SystemBuilder::new(2);
        builder.add(0, 0, 1.0);
        builder.add(0, 0, 2.5);
        builder.add(1, 1, 4.0);
        builder.add(1, 0, -1.0);
        let csr = builder.to_csr();
        assert_eq!(csr.diagonal(), vec![3.5, 4.0]);

        let mut y = vec![0.0; 2];
        csr.mul_vec(&[1.0, 1.0], &mut y);
        assert_eq!(y, vec![3.5, 3.0]);
    }
}
