//! Indices, index lists, and the bounding-box algebra used to track the
//! occupied region of every subexpression.
use std::fmt::{self, Display, Formatter};
use std::ops::Deref;

use smallvec::SmallVec;

use crate::{spp::SparsityPattern, Error, Symbol};

/// A single symbolic label naming one tensor dimension.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Index(Symbol);

impl Index {
    pub fn new(label: &str) -> Self {
        Index(Symbol::from(label))
    }

    pub fn symbol(self) -> Symbol {
        self.0
    }
}

impl From<char> for Index {
    fn from(c: char) -> Self {
        let mut buf = [0u8; 4];
        Index::new(c.encode_utf8(&mut buf))
    }
}

impl From<&str> for Index {
    fn from(label: &str) -> Self {
        Index::new(label)
    }
}

impl Display for Index {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered list of distinct indices. The order defines the dimension
/// order of the tensor view it labels.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct IndexList(SmallVec<[Index; 4]>);

impl IndexList {
    pub fn new(indices: impl IntoIterator<Item = Index>) -> Result<Self, Error> {
        let mut list = SmallVec::new();
        for index in indices {
            if list.contains(&index) {
                return Err(Error::DuplicateIndex(index));
            }
            list.push(index);
        }
        Ok(IndexList(list))
    }

    /// Every character of `labels` is one index, so `"ikj"` has three.
    pub fn parse(labels: &str) -> Result<Self, Error> {
        Self::new(labels.chars().map(Index::from))
    }

    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn find(&self, index: Index) -> Option<usize> {
        self.0.iter().position(|&i| i == index)
    }

    pub fn without(&self, index: Index) -> IndexList {
        IndexList(self.0.iter().copied().filter(|&i| i != index).collect())
    }
}

impl Deref for IndexList {
    type Target = [Index];

    fn deref(&self) -> &[Index] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a IndexList {
    type Item = &'a Index;
    type IntoIter = std::slice::Iter<'a, Index>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Display for IndexList {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for index in self.0.iter() {
            write!(f, "{index}")?;
        }
        Ok(())
    }
}

/// A half-open integer interval `[start, stop)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Range {
    pub start: usize,
    pub stop: usize,
}

impl Range {
    pub fn new(start: usize, stop: usize) -> Self {
        Range { start, stop }
    }

    pub fn size(&self) -> usize {
        self.stop.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.stop
    }

    /// The overlap of both ranges, or `None` if they do not overlap.
    pub fn intersect(&self, other: &Range) -> Option<Range> {
        let range = Range::new(self.start.max(other.start), self.stop.min(other.stop));
        (!range.is_empty()).then_some(range)
    }

    /// True if `other` lies within `self`.
    pub fn contains(&self, other: &Range) -> bool {
        self.start <= other.start && other.stop <= self.stop
    }
}

impl Display for Range {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

/// One non-empty range per free index of some subexpression, in the order
/// of that subexpression's [`IndexList`].
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct BoundingBox(SmallVec<[Range; 4]>);

impl BoundingBox {
    pub fn new(ranges: impl IntoIterator<Item = Range>) -> Self {
        let ranges: SmallVec<[Range; 4]> = ranges.into_iter().collect();
        debug_assert!(ranges.iter().all(|r| !r.is_empty()));
        BoundingBox(ranges)
    }

    /// The box spanning a full tensor of the given shape.
    pub fn from_shape(shape: &[usize]) -> Self {
        BoundingBox::new(shape.iter().map(|&extent| Range::new(0, extent)))
    }

    /// The tightest box containing every occupied position of `spp`, or
    /// `None` if nothing is occupied.
    pub fn from_pattern(spp: &SparsityPattern) -> Option<Self> {
        if spp.is_dense() {
            return Some(Self::from_shape(spp.shape()));
        }
        let rank = spp.shape().len();
        let mut lo = vec![usize::MAX; rank];
        let mut hi = vec![0; rank];
        let mut any = false;
        for position in spp.nonzeros() {
            any = true;
            for (dim, &coord) in position.iter().enumerate() {
                lo[dim] = lo[dim].min(coord);
                hi[dim] = hi[dim].max(coord + 1);
            }
        }
        any.then(|| BoundingBox::new(lo.into_iter().zip(hi).map(|(l, h)| Range::new(l, h))))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of positions inside the box. A box without ranges is a scalar
    /// and has size 1.
    pub fn size(&self) -> usize {
        self.0.iter().map(Range::size).product()
    }

    pub fn intersect(&self, other: &BoundingBox) -> Result<BoundingBox, Error> {
        if self.len() != other.len() {
            return Err(Error::DimensionMismatch(self.len(), other.len()));
        }
        let mut ranges = SmallVec::new();
        for (dim, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            ranges.push(a.intersect(b).ok_or(Error::EmptyIntersection { dim })?);
        }
        Ok(BoundingBox(ranges))
    }

    /// The box with the dimension at `position` removed.
    pub fn project_out(&self, position: usize) -> BoundingBox {
        BoundingBox(
            self.0
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != position)
                .map(|(_, r)| *r)
                .collect(),
        )
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.len() == other.len() && self.0.iter().zip(other.0.iter()).all(|(a, b)| a.contains(b))
    }
}

impl Deref for BoundingBox {
    type Target = [Range];

    fn deref(&self) -> &[Range] {
        &self.0
    }
}

impl Display for BoundingBox {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::util::ListDisplay(&self.0[..], " x "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bb(ranges: &[(usize, usize)]) -> BoundingBox {
        BoundingBox::new(ranges.iter().map(|&(a, b)| Range::new(a, b)))
    }

    #[test]
    fn duplicate_indices_are_rejected() {
        assert!(matches!(
            IndexList::parse("iji"),
            Err(Error::DuplicateIndex(i)) if i == Index::from('i')
        ));
        let list = IndexList::parse("ikj").unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.find('j'.into()), Some(2));
        assert_eq!(list.without('k'.into()).to_string(), "ij");
    }

    #[test]
    fn intersection_is_commutative() {
        let boxes = [
            bb(&[(0, 4), (1, 3)]),
            bb(&[(2, 6), (0, 2)]),
            bb(&[(1, 2), (0, 5)]),
            bb(&[(0, 1), (0, 1)]),
        ];
        for a in &boxes {
            assert_eq!(a.intersect(a).unwrap().size(), a.size());
            for b in &boxes {
                match (a.intersect(b), b.intersect(a)) {
                    (Ok(x), Ok(y)) => assert_eq!(x, y),
                    (Err(Error::EmptyIntersection { dim: x }), Err(Error::EmptyIntersection { dim: y })) => {
                        assert_eq!(x, y)
                    }
                    other => panic!("asymmetric intersection: {other:?}"),
                }
            }
        }
    }

    #[test]
    fn empty_intersection_is_not_a_dimension_error() {
        let a = bb(&[(0, 2), (0, 3)]);
        let b = bb(&[(2, 4), (0, 3)]);
        assert!(matches!(a.intersect(&b), Err(Error::EmptyIntersection { dim: 0 })));
        assert!(matches!(
            a.intersect(&bb(&[(0, 1)])),
            Err(Error::DimensionMismatch(2, 1))
        ));
    }

    #[test]
    fn size_and_projection() {
        let a = bb(&[(0, 4), (1, 3), (2, 5)]);
        assert_eq!(a.size(), 24);
        assert_eq!(a.project_out(1), bb(&[(0, 4), (2, 5)]));
        assert_eq!(BoundingBox::default().size(), 1);
        assert!(a.contains(&bb(&[(1, 2), (1, 2), (2, 3)])));
        assert!(!a.contains(&bb(&[(1, 2), (0, 2), (2, 3)])));
    }
}
