use std::fmt::{self, Display, Formatter};

use crate::{
    indices::BoundingBox, memory::MemoryLayout, spp::SparsityPattern, util::IndexMap, Error,
    Symbol,
};

/// A validated tensor name: an identifier, optionally followed by a
/// bracketed family index as in `A[3]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TensorName {
    pub base: Symbol,
    pub index: Option<usize>,
}

impl TensorName {
    pub fn parse(name: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidTensorName(name.to_owned());
        let (base, index) = match name.find('[') {
            Some(open) => {
                let digits = name[open + 1..].strip_suffix(']').ok_or_else(invalid)?;
                // `A[01]` would be displayed and looked up as `A[1]`
                let leading_zero = digits.len() > 1 && digits.starts_with('0');
                if digits.is_empty() || leading_zero || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                let index = digits.parse::<usize>().map_err(|_| invalid())?;
                (&name[..open], Some(index))
            }
            None => (name, None),
        };
        let mut chars = base.chars();
        let starts_well = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !starts_well || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid());
        }
        Ok(TensorName {
            base: base.into(),
            index,
        })
    }
}

impl Display for TensorName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{index}]", self.base),
            None => write!(f, "{}", self.base),
        }
    }
}

/// The value of an explicit entry. Descriptions may only mark a position as
/// structurally nonzero without giving a value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EntryValue {
    Nonzero,
    Value(f64),
}

/// A named tensor of the database. Everything but the group pattern and the
/// memory layout is fixed at construction.
#[derive(Clone, Debug)]
pub struct Tensor {
    name: TensorName,
    shape: Vec<usize>,
    values: Option<IndexMap<Vec<usize>, EntryValue>>,
    spp: SparsityPattern,
    group_spp: Option<SparsityPattern>,
    layout: MemoryLayout,
}

impl Tensor {
    /// Creates a tensor. Without `values` the tensor is fully dense; with
    /// values its pattern is exactly the set of given (0-based) positions.
    pub fn new(
        name: &str,
        shape: &[usize],
        values: Option<IndexMap<Vec<usize>, EntryValue>>,
        align_stride: bool,
    ) -> Result<Self, Error> {
        let name = TensorName::parse(name)?;
        if shape.iter().any(|&extent| extent == 0) {
            return Err(Error::InvalidShape(name.to_string(), shape.to_vec()));
        }
        let spp = match &values {
            None => SparsityPattern::dense(shape),
            Some(values) => SparsityPattern::from_positions(
                shape,
                values.keys().map(|position| &position[..]),
            )
            .map_err(|err| match err {
                Error::InvalidEntry { reason, .. } => Error::InvalidEntry {
                    tensor: Some(name.base),
                    reason,
                },
                err => err,
            })?,
        };
        if spp.count_nonzero() == 0 {
            log::warn!("Tensor {name} has no nonzero entries");
        }
        Ok(Tensor {
            name,
            shape: shape.to_vec(),
            values,
            spp,
            group_spp: None,
            layout: MemoryLayout::dense(shape, align_stride),
        })
    }

    pub fn dense(name: &str, shape: &[usize]) -> Result<Self, Error> {
        Self::new(name, shape, None, false)
    }

    /// A tensor whose nonzero structure is given by `positions`, values
    /// unspecified.
    pub fn sparse<'a>(
        name: &str,
        shape: &[usize],
        positions: impl IntoIterator<Item = &'a [usize]>,
    ) -> Result<Self, Error> {
        let values = positions
            .into_iter()
            .map(|position| (position.to_vec(), EntryValue::Nonzero))
            .collect();
        Self::new(name, shape, Some(values), false)
    }

    /// The full name, including a family index.
    pub fn name(&self) -> Symbol {
        match self.name.index {
            None => self.name.base,
            Some(_) => self.name.to_string().as_str().into(),
        }
    }

    pub fn tensor_name(&self) -> TensorName {
        self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn values(&self) -> Option<&IndexMap<Vec<usize>, EntryValue>> {
        self.values.as_ref()
    }

    /// The effective sparsity pattern: the group pattern once the tensor
    /// belongs to a unified group, its own pattern otherwise.
    pub fn spp(&self) -> &SparsityPattern {
        self.group_spp.as_ref().unwrap_or(&self.spp)
    }

    /// The pattern given by the tensor's own entries.
    pub fn own_spp(&self) -> &SparsityPattern {
        &self.spp
    }

    pub fn has_group_spp(&self) -> bool {
        self.group_spp.is_some()
    }

    pub(crate) fn set_group_spp(&mut self, spp: SparsityPattern) -> Result<(), Error> {
        if spp.shape() != self.shape.as_slice() {
            return Err(Error::PatternShapeMismatch(
                spp.shape().to_vec(),
                self.shape.clone(),
            ));
        }
        self.group_spp = Some(spp);
        Ok(())
    }

    pub fn memory_layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub(crate) fn set_memory_layout(&mut self, layout: MemoryLayout) {
        self.layout = layout;
    }

    /// Tightest box around the effective pattern, `None` without nonzeros.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_pattern(self.spp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_names() {
        let plain = TensorName::parse("kDivM").unwrap();
        assert_eq!(plain.index, None);
        let member = TensorName::parse("star_2[13]").unwrap();
        assert_eq!(member.base, Symbol::from("star_2"));
        assert_eq!(member.index, Some(13));
        assert_eq!(member.to_string(), "star_2[13]");
        for bad in ["", "1A", "A[", "A[]", "A[-1]", "A[1]x", "A-B", "A[1][2]", "A[01]", "A[00]"] {
            assert!(
                matches!(TensorName::parse(bad), Err(Error::InvalidTensorName(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn entries_define_the_pattern() {
        let t = Tensor::sparse("D", &[3, 3], [&[0usize, 0][..], &[2, 2][..]]).unwrap();
        assert_eq!(t.spp().count_nonzero(), 2);
        assert_eq!(t.bounding_box().unwrap().size(), 9);
        assert!(matches!(
            Tensor::sparse("D", &[3, 3], [&[3usize, 0][..]]),
            Err(Error::InvalidEntry { tensor: Some(_), .. })
        ));
        assert!(matches!(
            Tensor::dense("Z", &[3, 0]),
            Err(Error::InvalidShape(..))
        ));
    }

    #[test]
    fn family_member_keeps_full_name() {
        let t = Tensor::dense("A[2]", &[2]).unwrap();
        assert_eq!(t.name(), Symbol::from("A[2]"));
        assert_eq!(t.tensor_name().base, Symbol::from("A"));
        assert!(Tensor::dense("A[0]", &[2]).is_ok());
        assert!(matches!(
            Tensor::dense("A[02]", &[2]),
            Err(Error::InvalidTensorName(_))
        ));
    }
}
