//! Matrix-vector plus bias: `res = W·x + b`.

use crate::core::dropout::row_active;
use crate::core::storage::{
    DenseColMatrix, DenseRowMatrix, DenseVector, Matrix, MatrixStorage, SharedVector,
    SparseColMatrix, SparseRowMatrix, SparseVector, Vector, VectorStorage, Wild,
};
use crate::error::{unimplemented_combination, NNError, Result};

/// Reference kernel, one row at a time.
pub fn gemv_naive(res: &mut [f32], a: &[Wild], x: &[f32], y: &[Wild], row_bits: Option<&[u8]>) {
    let cols = x.len();
    for (row, r) in res.iter_mut().enumerate() {
        *r = 0.0;
        if !row_active(row_bits, row) {
            continue;
        }
        let idx = row * cols;
        for col in 0..cols {
            *r += a[idx + col].get() * x[col];
        }
        *r += y[row].get();
    }
}

/// Row-major kernel with eight independent partial sums per row.
pub fn gemv_row_optimized(
    res: &mut [f32],
    a: &[Wild],
    x: &[f32],
    y: &[Wild],
    row_bits: Option<&[u8]>,
) {
    let cols = x.len();
    let extra = cols - cols % 8;
    for (row, r) in res.iter_mut().enumerate() {
        *r = 0.0;
        if !row_active(row_bits, row) {
            continue;
        }
        let w = &a[row * cols..(row + 1) * cols];
        let (mut p0, mut p1, mut p2, mut p3) = (0f32, 0f32, 0f32, 0f32);
        let (mut p4, mut p5, mut p6, mut p7) = (0f32, 0f32, 0f32, 0f32);
        for (wc, xc) in w.chunks_exact(8).zip(x.chunks_exact(8)) {
            p0 += wc[0].get() * xc[0];
            p1 += wc[1].get() * xc[1];
            p2 += wc[2].get() * xc[2];
            p3 += wc[3].get() * xc[3];
            p4 += wc[4].get() * xc[4];
            p5 += wc[5].get() * xc[5];
            p6 += wc[6].get() * xc[6];
            p7 += wc[7].get() * xc[7];
        }
        *r += p0 + p1 + p2 + p3;
        *r += p4 + p5 + p6 + p7;
        for col in extra..cols {
            *r += w[col].get() * x[col];
        }
        *r += y[row].get();
    }
}

fn check_shapes(res: &DenseVector, a: &Matrix, x: &Vector, y: &SharedVector) -> Result<()> {
    if a.rows() != res.size() || a.rows() != y.size() || a.cols() != x.size() {
        return Err(NNError::LayerShapeMismatch(format!(
            "gemv of {}x{} {} with {} of size {} into {} rows (bias {})",
            a.rows(),
            a.cols(),
            a.kind(),
            x.kind(),
            x.size(),
            res.size(),
            y.size()
        )));
    }
    Ok(())
}

/// Dispatches to the kernel specialised for the (matrix, vector) storage pair.
pub fn gemv(
    res: &mut DenseVector,
    a: &Matrix,
    x: &Vector,
    y: &SharedVector,
    row_bits: Option<&[u8]>,
) -> Result<()> {
    check_shapes(res, a, x, y)?;
    match (a, x) {
        (Matrix::DenseRow(a), Vector::Dense(x)) => {
            gemv_row_optimized(res.raw_mut(), a.raw(), x.raw(), y.raw(), row_bits)
        }
        (Matrix::DenseRow(a), Vector::Sparse(x)) => gemv_row_sparse(res, a, x, y, row_bits),
        (Matrix::DenseCol(a), Vector::Dense(x)) => gemv_col_dense(res, a, x, y, row_bits),
        (Matrix::DenseCol(a), Vector::Sparse(x)) => gemv_col_sparse(res, a, x, y, row_bits),
        (Matrix::SparseRow(a), Vector::Sparse(x)) => {
            gemv_sparse_row_sparse(res, a, x, y, row_bits)
        }
        (Matrix::SparseCol(a), Vector::Sparse(x)) => {
            gemv_sparse_col_sparse(res, a, x, y, row_bits)
        }
        (a, x) => return Err(unimplemented_combination("gemv", a.kind(), x.kind())),
    }
    Ok(())
}

fn gemv_row_sparse(
    res: &mut DenseVector,
    a: &DenseRowMatrix,
    x: &SparseVector,
    y: &SharedVector,
    row_bits: Option<&[u8]>,
) {
    for r in 0..y.size() {
        res.set(r, 0.0);
        if !row_active(row_bits, r) {
            continue;
        }
        for (c, v) in x.iter() {
            res.add(r, a.get(r, c) * v);
        }
        res.add(r, y.get(r));
    }
}

fn gemv_col_dense(
    res: &mut DenseVector,
    a: &DenseColMatrix,
    x: &DenseVector,
    y: &SharedVector,
    row_bits: Option<&[u8]>,
) {
    res.fill(0.0);
    for c in 0..x.size() {
        let val = x.get(c);
        for (r, w) in a.col(c).iter().enumerate() {
            if row_active(row_bits, r) {
                res.add(r, w.get() * val);
            }
        }
    }
    add_bias(res, y, row_bits);
}

fn gemv_col_sparse(
    res: &mut DenseVector,
    a: &DenseColMatrix,
    x: &SparseVector,
    y: &SharedVector,
    row_bits: Option<&[u8]>,
) {
    res.fill(0.0);
    for (c, val) in x.iter() {
        if val == 0.0 {
            continue;
        }
        for (r, w) in a.col(c).iter().enumerate() {
            if row_active(row_bits, r) {
                res.add(r, w.get() * val);
            }
        }
    }
    add_bias(res, y, row_bits);
}

fn gemv_sparse_row_sparse(
    res: &mut DenseVector,
    a: &SparseRowMatrix,
    x: &SparseVector,
    y: &SharedVector,
    row_bits: Option<&[u8]>,
) {
    for r in 0..y.size() {
        res.set(r, 0.0);
        if !row_active(row_bits, r) {
            continue;
        }
        for (&c, &w) in a.row(r) {
            let val = x.get(c);
            if val != 0.0 {
                res.add(r, w * val);
            }
        }
        res.add(r, y.get(r));
    }
}

fn gemv_sparse_col_sparse(
    res: &mut DenseVector,
    a: &SparseColMatrix,
    x: &SparseVector,
    y: &SharedVector,
    row_bits: Option<&[u8]>,
) {
    res.fill(0.0);
    for (c, val) in x.iter() {
        if val == 0.0 {
            continue;
        }
        for (&r, &w) in a.col(c) {
            if row_active(row_bits, r) {
                res.add(r, w * val);
            }
        }
    }
    add_bias(res, y, row_bits);
}

fn add_bias(res: &mut DenseVector, y: &SharedVector, row_bits: Option<&[u8]>) {
    for r in 0..y.size() {
        if row_active(row_bits, r) {
            res.add(r, y.get(r));
        }
    }
}
