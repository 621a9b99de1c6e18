//! Row-major matrix views with explicit offset arithmetic.

use nmtpack_core::{Error, Result};

/// A borrowed row-major matrix.
#[derive(Debug, Clone, Copy)]
pub struct MatrixView<'a> {
    data: &'a [f32],
    rows: usize,
    cols: usize,
}

impl<'a> MatrixView<'a> {
    /// Wraps `data` as a `rows x cols` matrix.
    pub fn new(data: &'a [f32], rows: usize, cols: usize) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(Error::shape_mismatch(format!(
                "{} values cannot be viewed as {}x{}",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { data, rows, cols })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Rows `start..end` as a matrix of their own. Contiguous, no copy.
    pub fn row_block(&self, start: usize, end: usize) -> Result<MatrixView<'a>> {
        if start > end || end > self.rows {
            return Err(Error::shape_mismatch(format!(
                "row block {}..{} outside {} rows",
                start, end, self.rows
            )));
        }
        Ok(MatrixView {
            data: &self.data[start * self.cols..end * self.cols],
            rows: end - start,
            cols: self.cols,
        })
    }

    /// The first `len` values of row `row`. No copy.
    pub fn row_prefix(&self, row: usize, len: usize) -> Result<&'a [f32]> {
        if row >= self.rows || len > self.cols {
            return Err(Error::shape_mismatch(format!(
                "prefix of {} values from row {} outside {}x{}",
                len, row, self.rows, self.cols
            )));
        }
        let start = row * self.cols;
        Ok(&self.data[start..start + len])
    }

    /// Returns the `cols x rows` transpose as a new buffer.
    pub fn transpose(&self) -> Vec<f32> {
        let mut out = vec![0.0f32; self.data.len()];
        for r in 0..self.rows {
            let row = &self.data[r * self.cols..(r + 1) * self.cols];
            for (c, &v) in row.iter().enumerate() {
                out[c * self.rows + r] = v;
            }
        }
        out
    }
}
