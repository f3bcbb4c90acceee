// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::RrdError;

/// Row-major dense `f64` matrix.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Result<Self, RrdError> {
        let len = rows.checked_mul(cols).ok_or_else(|| {
            RrdError::resource_limit(format!(
                "matrix size overflow for rows={rows}, cols={cols}"
            ))
        })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|err| {
            RrdError::resource_limit(format!(
                "cannot allocate a {rows}x{cols} matrix: {err}"
            ))
        })?;
        data.resize(len, 0.0);
        Ok(Self { rows, cols, data })
    }

    /// Builds a matrix from equally long rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, RrdError> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut matrix = Self::zeros(rows.len(), cols)?;
        for (r, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(RrdError::dimension_mismatch(format!(
                    "row {r} has {} columns, expected {cols}",
                    row.len()
                )));
            }
            matrix.data[r * cols..(r + 1) * cols].copy_from_slice(row);
        }
        Ok(matrix)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data.get(row * self.cols + col).copied()
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<(), RrdError> {
        if row >= self.rows || col >= self.cols {
            return Err(RrdError::dimension_mismatch(format!(
                "index ({row}, {col}) out of bounds for {}x{} matrix",
                self.rows, self.cols
            )));
        }
        self.data[row * self.cols + col] = value;
        Ok(())
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        &mut self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.rows).map(move |r| self.row(r))
    }

    pub fn column(&self, col: usize) -> Vec<f64> {
        (0..self.rows)
            .map(|r| self.data[r * self.cols + col])
            .collect()
    }

    pub fn transpose(&self) -> Self {
        let mut data = vec![0.0; self.data.len()];
        for r in 0..self.rows {
            for c in 0..self.cols {
                data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        Self {
            rows: self.cols,
            cols: self.rows,
            data,
        }
    }

    /// Copies the listed rows, in order, into a new matrix.
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self, RrdError> {
        let mut out = Self::zeros(indices.len(), self.cols)?;
        for (dst, &src) in indices.iter().enumerate() {
            if src >= self.rows {
                return Err(RrdError::dimension_mismatch(format!(
                    "row index {src} out of bounds for matrix with {} rows",
                    self.rows
                )));
            }
            out.row_mut(dst).copy_from_slice(self.row(src));
        }
        Ok(out)
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.iter_rows().map(<[f64]>::to_vec).collect()
    }
}
