//! Boolean sparsity patterns over a tensor's full index space.
//!
//! Patterns are stored column-major (first coordinate fastest), matching the
//! storage order of the dense and CSC layouts.
use std::fmt::{self, Debug, Formatter};

use crate::{
    indices::{Index, IndexList},
    util::{volume, MultiIndexIter},
    Error,
};

#[derive(Clone)]
pub struct SparsityPattern {
    shape: Vec<usize>,
    /// `None` means every position is occupied.
    mask: Option<Vec<bool>>,
}

impl SparsityPattern {
    pub fn dense(shape: &[usize]) -> Self {
        SparsityPattern {
            shape: shape.to_vec(),
            mask: None,
        }
    }

    pub fn empty(shape: &[usize]) -> Self {
        SparsityPattern {
            shape: shape.to_vec(),
            mask: Some(vec![false; volume(shape)]),
        }
    }

    /// Builds a pattern occupied exactly at `positions` (0-based).
    pub fn from_positions<'a>(
        shape: &[usize],
        positions: impl IntoIterator<Item = &'a [usize]>,
    ) -> Result<Self, Error> {
        let mut spp = Self::empty(shape);
        for position in positions {
            if spp.offset(position).is_none() {
                return Err(Error::InvalidEntry {
                    tensor: None,
                    reason: format!("position {position:?} lies outside of shape {shape:?}"),
                });
            }
            spp.set(position);
        }
        Ok(spp)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_dense(&self) -> bool {
        self.mask.is_none()
    }

    fn offset(&self, position: &[usize]) -> Option<usize> {
        if position.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        let mut stride = 1;
        for (&coord, &extent) in position.iter().zip(&self.shape) {
            if coord >= extent {
                return None;
            }
            offset += coord * stride;
            stride *= extent;
        }
        Some(offset)
    }

    /// Whether `position` is occupied. Positions outside the shape are not.
    pub fn get(&self, position: &[usize]) -> bool {
        match (self.offset(position), &self.mask) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(offset), Some(mask)) => mask[offset],
        }
    }

    pub fn count_nonzero(&self) -> usize {
        match &self.mask {
            None => volume(&self.shape),
            Some(mask) => mask.iter().filter(|&&b| b).count(),
        }
    }

    /// All occupied positions in column-major order.
    pub fn nonzeros(&self) -> impl Iterator<Item = Vec<usize>> + '_ {
        MultiIndexIter::new(&self.shape).filter(move |p| self.get(p))
    }

    /// Elementwise logical or of both patterns.
    pub fn union(&self, other: &SparsityPattern) -> Result<SparsityPattern, Error> {
        if self.shape != other.shape {
            return Err(Error::PatternShapeMismatch(
                self.shape.clone(),
                other.shape.clone(),
            ));
        }
        let mask = match (&self.mask, &other.mask) {
            (None, _) | (_, None) => None,
            (Some(a), Some(b)) => Some(a.iter().zip(b).map(|(&x, &y)| x || y).collect()),
        };
        Ok(SparsityPattern {
            shape: self.shape.clone(),
            mask,
        })
    }

    /// True if every position occupied in `other` is occupied in `self`.
    pub fn is_superset_of(&self, other: &SparsityPattern) -> bool {
        self.shape == other.shape && other.nonzeros().all(|p| self.get(&p))
    }

    /// Reorders dimensions: dimension `d` of the result is dimension
    /// `perm[d]` of `self`.
    pub fn permute(&self, perm: &[usize]) -> SparsityPattern {
        debug_assert_eq!(perm.len(), self.rank());
        let shape: Vec<usize> = perm.iter().map(|&d| self.shape[d]).collect();
        if self.is_dense() {
            return SparsityPattern::dense(&shape);
        }
        let mut result = SparsityPattern::empty(&shape);
        for position in self.nonzeros() {
            let permuted: Vec<usize> = perm.iter().map(|&d| position[d]).collect();
            result.set(&permuted);
        }
        result
    }

    /// Swaps the two leading dimensions.
    pub fn transpose(&self) -> SparsityPattern {
        let mut perm: Vec<usize> = (0..self.rank()).collect();
        if perm.len() >= 2 {
            perm.swap(0, 1);
        }
        self.permute(&perm)
    }

    /// Removes dimension `axis`. A remaining position is occupied iff some
    /// position along `axis` was occupied.
    pub fn project_out(&self, axis: usize) -> SparsityPattern {
        let shape: Vec<usize> = self
            .shape
            .iter()
            .enumerate()
            .filter(|&(d, _)| d != axis)
            .map(|(_, &s)| s)
            .collect();
        if self.is_dense() && self.shape[axis] > 0 {
            return SparsityPattern::dense(&shape);
        }
        let mut result = SparsityPattern::empty(&shape);
        for mut position in self.nonzeros() {
            position.remove(axis);
            result.set(&position);
        }
        result
    }

    /// Aligns the pattern of a view labelled `from` to the index order `to`.
    /// Both lists must hold the same indices.
    pub fn align(&self, from: &IndexList, to: &IndexList) -> Result<SparsityPattern, Error> {
        let perm = to
            .iter()
            .map(|&index| from.find(index))
            .collect::<Option<Vec<_>>>()
            .filter(|perm| perm.len() == from.len())
            .ok_or_else(|| Error::IndexListMismatch(from.clone(), to.clone()))?;
        Ok(self.permute(&perm))
    }

    /// Structural product of two labelled patterns. An output position is
    /// occupied iff some assignment of the indices missing from `out` has
    /// both operands occupied.
    pub fn einsum(
        left: (&SparsityPattern, &IndexList),
        right: (&SparsityPattern, &IndexList),
        out: &IndexList,
    ) -> Result<SparsityPattern, Error> {
        let (lspp, lind) = left;
        let (rspp, rind) = right;
        let mut all: Vec<Index> = out.to_vec();
        for &index in lind.iter().chain(rind.iter()) {
            if !all.contains(&index) {
                all.push(index);
            }
        }
        let mut extents = Vec::with_capacity(all.len());
        for &index in &all {
            let extent = match (lind.find(index), rind.find(index)) {
                (Some(l), _) => lspp.shape[l],
                (None, Some(r)) => rspp.shape[r],
                (None, None) => {
                    return Err(Error::InternalInconsistency(format!(
                        "index {index} of {out} appears in neither {lind} nor {rind}"
                    )))
                }
            };
            extents.push(extent);
        }
        let out_shape = &extents[..out.len()];
        if lspp.is_dense() && rspp.is_dense() && volume(&extents[out.len()..]) > 0 {
            return Ok(SparsityPattern::dense(out_shape));
        }

        let position_of = |index: &Index| all.iter().position(|a| a == index).unwrap_or(0);
        let lpos: Vec<usize> = lind.iter().map(position_of).collect();
        let rpos: Vec<usize> = rind.iter().map(position_of).collect();
        let mut result = SparsityPattern::empty(out_shape);
        let mut lcoord = vec![0; lpos.len()];
        let mut rcoord = vec![0; rpos.len()];
        for position in MultiIndexIter::new(&extents) {
            for (c, &p) in lcoord.iter_mut().zip(&lpos) {
                *c = position[p];
            }
            for (c, &p) in rcoord.iter_mut().zip(&rpos) {
                *c = position[p];
            }
            if lspp.get(&lcoord) && rspp.get(&rcoord) {
                result.set(&position[..out.len()]);
            }
        }
        Ok(result)
    }

    fn set(&mut self, position: &[usize]) {
        if let (Some(offset), Some(mask)) = (self.offset(position), self.mask.as_mut()) {
            mask[offset] = true;
        }
    }
}

impl PartialEq for SparsityPattern {
    fn eq(&self, other: &Self) -> bool {
        if self.shape != other.shape {
            return false;
        }
        match (&self.mask, &other.mask) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            (None, Some(m)) | (Some(m), None) => m.iter().all(|&b| b),
        }
    }
}

impl Eq for SparsityPattern {}

impl Debug for SparsityPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.mask {
            None => write!(f, "Dense{:?}", self.shape),
            Some(_) => write!(
                f,
                "Sparse{:?}({} nonzeros)",
                self.shape,
                self.count_nonzero()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagonal(n: usize) -> SparsityPattern {
        let positions: Vec<[usize; 2]> = (0..n).map(|i| [i, i]).collect();
        SparsityPattern::from_positions(&[n, n], positions.iter().map(|p| &p[..])).unwrap()
    }

    #[test]
    fn positions_outside_the_shape_are_rejected() {
        let bad = [[2usize, 0usize]];
        assert!(matches!(
            SparsityPattern::from_positions(&[2, 2], bad.iter().map(|p| &p[..])),
            Err(Error::InvalidEntry { .. })
        ));
    }

    #[test]
    fn dense_equals_full_mask() {
        let all: Vec<Vec<usize>> = MultiIndexIter::new(&[2, 3]).collect();
        let full = SparsityPattern::from_positions(&[2, 3], all.iter().map(|p| &p[..])).unwrap();
        assert_eq!(full, SparsityPattern::dense(&[2, 3]));
        assert_ne!(diagonal(3), SparsityPattern::dense(&[3, 3]));
    }

    #[test]
    fn union_and_superset() {
        let d = diagonal(3);
        let corner = SparsityPattern::from_positions(&[3, 3], [&[0usize, 2][..]]).unwrap();
        let u = d.union(&corner).unwrap();
        assert_eq!(u.count_nonzero(), 4);
        assert!(u.is_superset_of(&d));
        assert!(u.is_superset_of(&corner));
        assert!(!d.is_superset_of(&corner));
        assert!(d.union(&SparsityPattern::dense(&[3, 3])).unwrap().is_dense());
        assert!(d.union(&SparsityPattern::dense(&[3, 2])).is_err());
    }

    #[test]
    fn projection_is_logical_or() {
        let p = SparsityPattern::from_positions(&[3, 2], [&[0usize, 1][..], &[2, 1][..]]).unwrap();
        let rows = p.project_out(1);
        assert_eq!(rows.shape(), &[3]);
        assert!(rows.get(&[0]) && !rows.get(&[1]) && rows.get(&[2]));
        let cols = p.project_out(0);
        assert!(!cols.get(&[0]) && cols.get(&[1]));
    }

    #[test]
    fn transpose_moves_entries() {
        let p = SparsityPattern::from_positions(&[2, 3], [&[1usize, 2][..]]).unwrap();
        let t = p.transpose();
        assert_eq!(t.shape(), &[3, 2]);
        assert!(t.get(&[2, 1]));
        assert_eq!(t.count_nonzero(), 1);
    }

    #[test]
    fn einsum_of_diagonal_and_dense() {
        let ik = IndexList::parse("ik").unwrap();
        let kj = IndexList::parse("kj").unwrap();
        let dense = SparsityPattern::dense(&[4, 4]);
        let ij = SparsityPattern::einsum(
            (&diagonal(4), &ik),
            (&dense, &kj),
            &IndexList::parse("ij").unwrap(),
        )
        .unwrap();
        assert_eq!(ij.count_nonzero(), 16);
        let ikj = SparsityPattern::einsum(
            (&diagonal(4), &ik),
            (&dense, &kj),
            &IndexList::parse("ikj").unwrap(),
        )
        .unwrap();
        assert_eq!(ikj.count_nonzero(), 16);
        assert!(ikj.get(&[2, 2, 0]) && !ikj.get(&[2, 1, 0]));
    }

    #[test]
    fn align_reorders_dimensions() {
        let p = SparsityPattern::from_positions(&[2, 3], [&[1usize, 2][..]]).unwrap();
        let aligned = p
            .align(&IndexList::parse("ij").unwrap(), &IndexList::parse("ji").unwrap())
            .unwrap();
        assert!(aligned.get(&[2, 1]));
        assert!(p
            .align(&IndexList::parse("ij").unwrap(), &IndexList::parse("ik").unwrap())
            .is_err());
    }
}
