//! Memory layouts assigned to tensors once their sparsity is final.
use crate::{spp::SparsityPattern, Error, Symbol};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryLayout {
    Dense(DenseLayout),
    Csc(CscLayout),
}

impl MemoryLayout {
    pub fn dense(shape: &[usize], align_stride: bool) -> Self {
        MemoryLayout::Dense(DenseLayout {
            shape: shape.to_vec(),
            align_stride,
        })
    }

    /// Compressed sparse column storage of `spp`. Only matrices and vectors
    /// (stored as a single column) have a CSC form.
    pub fn csc(name: Symbol, spp: &SparsityPattern) -> Result<Self, Error> {
        let (rows, columns) = match *spp.shape() {
            [rows] => (rows, 1),
            [rows, columns] => (rows, columns),
            _ => {
                return Err(Error::UnsupportedLayout {
                    tensor: name,
                    layout: "CSC",
                    rank: spp.rank(),
                })
            }
        };
        let mut col_ptr = Vec::with_capacity(columns + 1);
        let mut row_index = Vec::new();
        col_ptr.push(0);
        for col in 0..columns {
            for row in 0..rows {
                let occupied = if spp.rank() == 1 {
                    spp.get(&[row])
                } else {
                    spp.get(&[row, col])
                };
                if occupied {
                    row_index.push(row);
                }
            }
            col_ptr.push(row_index.len());
        }
        Ok(MemoryLayout::Csc(CscLayout {
            rows,
            columns,
            col_ptr,
            row_index,
        }))
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, MemoryLayout::Csc(_))
    }

    pub fn align_stride(&self) -> bool {
        match self {
            MemoryLayout::Dense(dense) => dense.align_stride,
            MemoryLayout::Csc(_) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MemoryLayout::Dense(_) => "dense",
            MemoryLayout::Csc(_) => "CSC",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenseLayout {
    pub shape: Vec<usize>,
    /// Pad the leading dimension to the architecture's alignment.
    pub align_stride: bool,
}

impl DenseLayout {
    /// Column-major strides of the unpadded shape.
    pub fn stride(&self) -> Vec<usize> {
        Self::column_major(&self.shape)
    }

    /// The stored shape: the leading dimension is rounded up to a multiple
    /// of `alignment` (in elements) when the stride is aligned.
    pub fn aligned_shape(&self, alignment: usize) -> Vec<usize> {
        let mut shape = self.shape.clone();
        match shape.first_mut() {
            Some(lead) if self.align_stride && alignment > 0 => {
                *lead = lead.div_ceil(alignment) * alignment;
            }
            _ => {}
        }
        shape
    }

    pub fn aligned_stride(&self, alignment: usize) -> Vec<usize> {
        Self::column_major(&self.aligned_shape(alignment))
    }

    /// Number of elements required to store the tensor.
    pub fn required_reals(&self, alignment: usize) -> usize {
        self.aligned_shape(alignment).iter().product()
    }

    fn column_major(shape: &[usize]) -> Vec<usize> {
        let mut stride = Vec::with_capacity(shape.len());
        let mut acc = 1;
        for &extent in shape {
            stride.push(acc);
            acc *= extent;
        }
        stride
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CscLayout {
    pub rows: usize,
    pub columns: usize,
    pub col_ptr: Vec<usize>,
    pub row_index: Vec<usize>,
}

impl CscLayout {
    pub fn nnz(&self) -> usize {
        self.row_index.len()
    }

    /// Row indices stored for column `col`.
    pub fn column(&self, col: usize) -> &[usize] {
        &self.row_index[self.col_ptr[col]..self.col_ptr[col + 1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_shape_pads_leading_dimension() {
        let layout = DenseLayout {
            shape: vec![9, 4],
            align_stride: true,
        };
        assert_eq!(layout.stride(), vec![1, 9]);
        assert_eq!(layout.aligned_shape(8), vec![16, 4]);
        assert_eq!(layout.aligned_stride(8), vec![1, 16]);
        assert_eq!(layout.required_reals(8), 64);

        let unaligned = DenseLayout {
            align_stride: false,
            ..layout
        };
        assert_eq!(unaligned.aligned_shape(8), vec![9, 4]);
    }

    #[test]
    fn csc_of_upper_triangle() {
        let positions: Vec<[usize; 2]> = (0..3)
            .flat_map(|j| (0..=j).map(move |i| [i, j]))
            .collect();
        let spp =
            SparsityPattern::from_positions(&[3, 3], positions.iter().map(|p| &p[..])).unwrap();
        let MemoryLayout::Csc(csc) = MemoryLayout::csc("U".into(), &spp).unwrap() else {
            panic!();
        };
        assert_eq!(csc.col_ptr, vec![0, 1, 3, 6]);
        assert_eq!(csc.column(2), &[0, 1, 2]);
        assert_eq!(csc.nnz(), 6);
    }

    #[test]
    fn csc_requires_matrix() {
        let spp = SparsityPattern::dense(&[2, 2, 2]);
        assert!(matches!(
            MemoryLayout::csc("T".into(), &spp),
            Err(Error::UnsupportedLayout { rank: 3, .. })
        ));
    }
}
