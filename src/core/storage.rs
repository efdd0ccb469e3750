use ndarray::{Array1, Array2};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{NNError, Result};

pub trait VectorStorage {
    fn size(&self) -> usize;
    fn get(&self, i: usize) -> f32;
}

pub trait MatrixStorage {
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;
    fn get(&self, row: usize, col: usize) -> f32;
}

/// A float shared between all workers training the same model.
///
/// Loads and stores are relaxed and [`Wild::add`] is a plain load followed by a
/// store. Two workers updating the same cell may lose one of the updates; that
/// collision is treated as noise in the stochastic gradient (Hogwild).
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct Wild(AtomicU32);

impl Wild {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed)
    }

    /// Racy accumulate, not a `fetch_add`.
    #[inline]
    pub fn add(&self, delta: f32) {
        self.set(self.get() + delta)
    }

    #[inline]
    pub fn mul(&self, factor: f32) {
        self.set(self.get() * factor)
    }
}

fn wild_zeros(len: usize) -> Box<[Wild]> {
    (0..len).map(|_| Wild::default()).collect()
}

// ---------------------------------------------------------------------------
// Layer-private vectors
// ---------------------------------------------------------------------------

/// Dense vector over an owned `Array1`, always in standard layout.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseVector {
    data: Array1<f32>,
}

impl DenseVector {
    pub fn zeros(size: usize) -> Self {
        Self { data: Array1::zeros(size) }
    }

    pub fn from_vec(data: Vec<f32>) -> Self {
        Self { data: Array1::from(data) }
    }

    #[inline]
    pub fn set(&mut self, i: usize, value: f32) {
        self.data[i] = value;
    }

    #[inline]
    pub fn add(&mut self, i: usize, value: f32) {
        self.data[i] += value;
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn scale(&mut self, factor: f32) {
        self.data.mapv_inplace(|x| x * factor);
    }

    pub fn array(&self) -> &Array1<f32> {
        &self.data
    }

    pub fn array_mut(&mut self) -> &mut Array1<f32> {
        &mut self.data
    }

    pub fn into_array(self) -> Array1<f32> {
        self.data
    }

    // Owned and never re-strided, so the slice is always the whole vector.
    pub fn raw(&self) -> &[f32] {
        self.data.as_slice().unwrap_or_default()
    }

    pub fn raw_mut(&mut self) -> &mut [f32] {
        self.data.as_slice_mut().unwrap_or_default()
    }

    pub fn max_value(&self) -> f32 {
        self.data.fold(f32::NEG_INFINITY, |m, &x| m.max(x))
    }
}

impl VectorStorage for DenseVector {
    fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn get(&self, i: usize) -> f32 {
        self.data[i]
    }
}

/// Sparse vector: strictly increasing indices with their values, zero elsewhere.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseVector {
    size: usize,
    indices: Vec<usize>,
    values: Vec<f32>,
}

impl SparseVector {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn from_dense(dense: &DenseVector) -> Self {
        let mut sv = Self::new(dense.size());
        for (i, &v) in dense.array().indexed_iter() {
            if v != 0.0 {
                sv.indices.push(i);
                sv.values.push(v);
            }
        }
        sv
    }

    pub fn from_pairs(size: usize, pairs: &[(usize, f32)]) -> Result<Self> {
        let mut sv = Self::new(size);
        for &(i, v) in pairs {
            if i >= size {
                return Err(NNError::InvalidInputShape(format!(
                    "sparse index {} out of bounds for size {}",
                    i, size
                )));
            }
            if sv.indices.last().is_some_and(|&last| last >= i) {
                return Err(NNError::InvalidInputShape(format!(
                    "sparse indices must be strictly increasing, got {} after {:?}",
                    i,
                    sv.indices.last()
                )));
            }
            sv.indices.push(i);
            sv.values.push(v);
        }
        Ok(sv)
    }

    pub fn set(&mut self, i: usize, value: f32) {
        match self.indices.binary_search(&i) {
            Ok(pos) => self.values[pos] = value,
            Err(pos) => {
                self.indices.insert(pos, i);
                self.values.insert(pos, value);
            }
        }
    }

    pub fn add(&mut self, i: usize, value: f32) {
        match self.indices.binary_search(&i) {
            Ok(pos) => self.values[pos] += value,
            Err(_) => self.set(i, value),
        }
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn to_dense(&self) -> DenseVector {
        let mut dv = DenseVector::zeros(self.size);
        for (i, v) in self.iter() {
            dv.set(i, v);
        }
        dv
    }
}

impl VectorStorage for SparseVector {
    fn size(&self) -> usize {
        self.size
    }

    fn get(&self, i: usize) -> f32 {
        match self.indices.binary_search(&i) {
            Ok(pos) => self.values[pos],
            Err(_) => 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Vector {
    Dense(DenseVector),
    Sparse(SparseVector),
}

impl Vector {
    pub fn kind(&self) -> &'static str {
        match self {
            Vector::Dense(_) => "DenseVector",
            Vector::Sparse(_) => "SparseVector",
        }
    }

    pub fn as_dense(&self) -> Option<&DenseVector> {
        match self {
            Vector::Dense(v) => Some(v),
            Vector::Sparse(_) => None,
        }
    }

    pub fn to_dense(&self) -> DenseVector {
        match self {
            Vector::Dense(v) => v.clone(),
            Vector::Sparse(v) => v.to_dense(),
        }
    }
}

impl VectorStorage for Vector {
    fn size(&self) -> usize {
        match self {
            Vector::Dense(v) => v.size(),
            Vector::Sparse(v) => v.size(),
        }
    }

    fn get(&self, i: usize) -> f32 {
        match self {
            Vector::Dense(v) => v.get(i),
            Vector::Sparse(v) => v.get(i),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared model state
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SharedVector {
    data: Box<[Wild]>,
}

impl SharedVector {
    pub fn zeros(size: usize) -> Self {
        Self { data: wild_zeros(size) }
    }

    pub fn from_slice(values: &[f32]) -> Self {
        Self {
            data: values.iter().map(|&v| Wild::new(v)).collect(),
        }
    }

    #[inline]
    pub fn set(&self, i: usize, value: f32) {
        self.data[i].set(value)
    }

    #[inline]
    pub fn add(&self, i: usize, value: f32) {
        self.data[i].add(value)
    }

    pub fn raw(&self) -> &[Wild] {
        &self.data
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().map(Wild::get).collect()
    }

    pub fn copy_from(&self, other: &SharedVector) {
        self.data.iter().zip(other.data.iter()).for_each(|(d, s)| d.set(s.get()));
    }
}

impl VectorStorage for SharedVector {
    fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn get(&self, i: usize) -> f32 {
        self.data[i].get()
    }
}

#[derive(Debug)]
pub struct DenseRowMatrix {
    rows: usize,
    cols: usize,
    data: Box<[Wild]>,
}

impl DenseRowMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: wild_zeros(rows * cols),
        }
    }

    pub fn from_array(array: &Array2<f32>) -> Self {
        let (rows, cols) = array.dim();
        let m = Self::zeros(rows, cols);
        for ((r, c), &v) in array.indexed_iter() {
            m.set(r, c, v);
        }
        m
    }

    pub fn to_array(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.rows, self.cols), |(r, c)| self.get(r, c))
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    #[inline]
    pub fn set(&self, row: usize, col: usize, value: f32) {
        self.data[self.index(row, col)].set(value)
    }

    #[inline]
    pub fn add(&self, row: usize, col: usize, value: f32) {
        self.data[self.index(row, col)].add(value)
    }

    pub fn row(&self, row: usize) -> &[Wild] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn raw(&self) -> &[Wild] {
        &self.data
    }
}

impl MatrixStorage for DenseRowMatrix {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    fn get(&self, row: usize, col: usize) -> f32 {
        self.data[self.index(row, col)].get()
    }
}

#[derive(Debug)]
pub struct DenseColMatrix {
    rows: usize,
    cols: usize,
    data: Box<[Wild]>,
}

impl DenseColMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: wild_zeros(rows * cols),
        }
    }

    pub fn from_array(array: &Array2<f32>) -> Self {
        let (rows, cols) = array.dim();
        let m = Self::zeros(rows, cols);
        for ((r, c), &v) in array.indexed_iter() {
            m.set(r, c, v);
        }
        m
    }

    pub fn to_array(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.rows, self.cols), |(r, c)| self.get(r, c))
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        col * self.rows + row
    }

    #[inline]
    pub fn set(&self, row: usize, col: usize, value: f32) {
        self.data[self.index(row, col)].set(value)
    }

    #[inline]
    pub fn add(&self, row: usize, col: usize, value: f32) {
        self.data[self.index(row, col)].add(value)
    }

    pub fn col(&self, col: usize) -> &[Wild] {
        &self.data[col * self.rows..(col + 1) * self.rows]
    }

    pub fn raw(&self) -> &[Wild] {
        &self.data
    }
}

impl MatrixStorage for DenseColMatrix {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    fn get(&self, row: usize, col: usize) -> f32 {
        self.data[self.index(row, col)].get()
    }
}

/// Sparse matrix stored as one ordered map per row. Read-mostly, not shared.
#[derive(Clone, Debug)]
pub struct SparseRowMatrix {
    cols: usize,
    data: Vec<BTreeMap<usize, f32>>,
}

impl SparseRowMatrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            cols,
            data: vec![BTreeMap::new(); rows],
        }
    }

    pub fn from_array(array: &Array2<f32>) -> Self {
        let (rows, cols) = array.dim();
        let mut m = Self::new(rows, cols);
        for ((r, c), &v) in array.indexed_iter() {
            if v != 0.0 {
                m.set(r, c, v);
            }
        }
        m
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row].insert(col, value);
    }

    pub fn row(&self, row: usize) -> &BTreeMap<usize, f32> {
        &self.data[row]
    }
}

impl MatrixStorage for SparseRowMatrix {
    fn rows(&self) -> usize {
        self.data.len()
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row].get(&col).copied().unwrap_or(0.0)
    }
}

#[derive(Clone, Debug)]
pub struct SparseColMatrix {
    rows: usize,
    data: Vec<BTreeMap<usize, f32>>,
}

impl SparseColMatrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            data: vec![BTreeMap::new(); cols],
        }
    }

    pub fn from_array(array: &Array2<f32>) -> Self {
        let (rows, cols) = array.dim();
        let mut m = Self::new(rows, cols);
        for ((r, c), &v) in array.indexed_iter() {
            if v != 0.0 {
                m.set(r, c, v);
            }
        }
        m
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[col].insert(row, value);
    }

    pub fn col(&self, col: usize) -> &BTreeMap<usize, f32> {
        &self.data[col]
    }
}

impl MatrixStorage for SparseColMatrix {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.data.len()
    }

    fn get(&self, row: usize, col: usize) -> f32 {
        self.data[col].get(&row).copied().unwrap_or(0.0)
    }
}

#[derive(Debug)]
pub enum Matrix {
    DenseRow(DenseRowMatrix),
    DenseCol(DenseColMatrix),
    SparseRow(SparseRowMatrix),
    SparseCol(SparseColMatrix),
}

impl Matrix {
    pub fn kind(&self) -> &'static str {
        match self {
            Matrix::DenseRow(_) => "DenseRowMatrix",
            Matrix::DenseCol(_) => "DenseColMatrix",
            Matrix::SparseRow(_) => "SparseRowMatrix",
            Matrix::SparseCol(_) => "SparseColMatrix",
        }
    }

    /// Position of (row, col) in the raw storage of a dense matrix.
    pub fn dense_index(&self, row: usize, col: usize) -> Option<usize> {
        match self {
            Matrix::DenseRow(m) => Some(m.index(row, col)),
            Matrix::DenseCol(m) => Some(m.index(row, col)),
            _ => None,
        }
    }

    pub fn dense_raw(&self) -> Option<&[Wild]> {
        match self {
            Matrix::DenseRow(m) => Some(m.raw()),
            Matrix::DenseCol(m) => Some(m.raw()),
            _ => None,
        }
    }

    pub fn to_array(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.rows(), self.cols()), |(r, c)| self.get(r, c))
    }
}

impl MatrixStorage for Matrix {
    fn rows(&self) -> usize {
        match self {
            Matrix::DenseRow(m) => m.rows(),
            Matrix::DenseCol(m) => m.rows(),
            Matrix::SparseRow(m) => m.rows(),
            Matrix::SparseCol(m) => m.rows(),
        }
    }

    fn cols(&self) -> usize {
        match self {
            Matrix::DenseRow(m) => m.cols(),
            Matrix::DenseCol(m) => m.cols(),
            Matrix::SparseRow(m) => m.cols(),
            Matrix::SparseCol(m) => m.cols(),
        }
    }

    fn get(&self, row: usize, col: usize) -> f32 {
        match self {
            Matrix::DenseRow(m) => m.get(row, col),
            Matrix::DenseCol(m) => m.get(row, col),
            Matrix::SparseRow(m) => m.get(row, col),
            Matrix::SparseCol(m) => m.get(row, col),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_dense_vector_over_array() {
        let mut dv = DenseVector::from_vec(vec![1.0, -4.0, 2.5]);
        assert_eq!(dv.max_value(), 2.5);
        dv.scale(2.0);
        assert_eq!(dv.array(), &array![2.0f32, -8.0, 5.0]);
        dv.raw_mut()[1] = 3.0;
        assert_eq!(dv.raw(), &[2.0, 3.0, 5.0]);
        dv.fill(0.5);
        assert_eq!(dv.clone().into_array(), Array1::from_elem(3, 0.5f32));
        assert_eq!(DenseVector::zeros(0).max_value(), f32::NEG_INFINITY);
    }

    #[test]
    fn test_sparse_from_dense_skips_zeros() {
        let dv = DenseVector::from_vec(vec![0.0, 1.5, 0.0, -2.0]);
        let sv = SparseVector::from_dense(&dv);
        assert_eq!(sv.nnz(), 2);
        assert_eq!(sv.indices(), &[1, 3]);
        assert_eq!(sv.get(3), -2.0);
        assert_eq!(sv.get(0), 0.0);
        assert_eq!(sv.to_dense(), dv);
    }

    #[test]
    fn test_sparse_set_keeps_order() {
        let mut sv = SparseVector::new(10);
        sv.set(7, 1.0);
        sv.set(2, 2.0);
        sv.add(7, 1.0);
        sv.add(4, 3.0);
        assert_eq!(sv.indices(), &[2, 4, 7]);
        assert_eq!(sv.values(), &[2.0, 3.0, 2.0]);
    }

    #[test]
    fn test_sparse_from_pairs_rejects_duplicates() {
        assert!(SparseVector::from_pairs(5, &[(1, 1.0), (1, 2.0)]).is_err());
        assert!(SparseVector::from_pairs(5, &[(3, 1.0), (1, 2.0)]).is_err());
        assert!(SparseVector::from_pairs(5, &[(5, 1.0)]).is_err());
        assert!(SparseVector::from_pairs(5, &[(0, 1.0), (4, 2.0)]).is_ok());
    }

    #[test]
    fn test_row_and_col_major_agree() {
        let a = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let row = DenseRowMatrix::from_array(&a);
        let col = DenseColMatrix::from_array(&a);
        assert_eq!(row.raw()[1].get(), 2.0);
        assert_eq!(col.raw()[1].get(), 4.0);
        for r in 0..2 {
            for c in 0..3 {
                assert_eq!(row.get(r, c), col.get(r, c));
            }
        }
        assert_eq!(row.to_array(), a);
        assert_eq!(col.to_array(), a);
        assert_eq!(row.row(1).iter().map(Wild::get).collect::<Vec<_>>(), vec![4.0, 5.0, 6.0]);
        assert_eq!(col.col(2).iter().map(Wild::get).collect::<Vec<_>>(), vec![3.0, 6.0]);
    }

    #[test]
    fn test_sparse_matrices_match_dense_content() {
        let a = array![[0.0f32, 2.0, 0.0], [4.0, 0.0, 6.0]];
        let sr = SparseRowMatrix::from_array(&a);
        let sc = SparseColMatrix::from_array(&a);
        assert_eq!(sr.row(1).len(), 2);
        assert_eq!(sc.col(1).len(), 1);
        assert_eq!(Matrix::SparseRow(sr).to_array(), a);
        assert_eq!(Matrix::SparseCol(sc).to_array(), a);
    }

    #[test]
    fn test_wild_add_accumulates() {
        let w = Wild::new(1.0);
        w.add(0.5);
        w.mul(2.0);
        assert_eq!(w.get(), 3.0);
        let shared = SharedVector::from_slice(&[1.0, 2.0]);
        shared.add(1, 1.0);
        assert_eq!(shared.to_vec(), vec![1.0, 3.0]);
    }
}
