//! Validated descriptions of the kernels an expression is lowered to.
//!
//! A description pairs the result of a kernel with its operands and checks,
//! on construction, that the loop ranges implied by their bounding boxes
//! are consistent. Emitting code for a description is left to external
//! backends; the `generator` functions only hand out the pairing of an
//! [`Architecture`] with a description.
use std::fmt::{self, Display, Formatter};

use crate::{
    exprdag::{ExprDag, NodeId},
    indices::{BoundingBox, Index, IndexList, Range},
    memory::MemoryLayout,
    tensor::Tensor,
    util::IndexMap,
    Error, Symbol,
};

pub mod copyscaleadd;
pub mod fused_gemms;
pub mod product;

/// The target a kernel is generated for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Architecture {
    pub name: Symbol,
    /// Alignment of vector loads, in reals.
    pub alignment: usize,
    pub gemm_backend: Symbol,
    /// Whether an external fused GEMM generator is available.
    pub fused_gemms_backend: bool,
}

impl Architecture {
    pub fn new(name: &str, alignment: usize) -> Self {
        Architecture {
            name: name.into(),
            alignment,
            gemm_backend: "generic".into(),
            fused_gemms_backend: false,
        }
    }

    pub fn with_gemm_backend(mut self, backend: &str) -> Self {
        self.gemm_backend = backend.into();
        self
    }

    pub fn with_fused_gemms_backend(mut self, available: bool) -> Self {
        self.fused_gemms_backend = available;
        self
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Target {
    Cpu,
    Gpu,
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Target::Cpu => write!(f, "cpu"),
            Target::Gpu => write!(f, "gpu"),
        }
    }
}

/// A kernel-emission handle: a validated description paired with the
/// architecture it is generated for.
#[derive(Clone, Copy, Debug)]
pub struct Generator<'a, D> {
    pub arch: &'a Architecture,
    pub description: &'a D,
    pub target: Target,
}

/// A tensor or intermediate result as seen by one kernel: its name, the
/// indices it is labelled with, and the region its loops range over.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedTensorDescription {
    pub name: Symbol,
    pub indices: IndexList,
    pub bounding_box: BoundingBox,
    pub memory_layout: MemoryLayout,
}

impl IndexedTensorDescription {
    /// Fails if `bounding_box` does not have one range per index.
    pub fn new(
        name: &str,
        indices: IndexList,
        bounding_box: BoundingBox,
        memory_layout: MemoryLayout,
    ) -> Result<Self, Error> {
        if indices.len() != bounding_box.len() {
            return Err(Error::RankMismatch {
                indices,
                shape: bounding_box.iter().map(Range::size).collect(),
            });
        }
        Ok(IndexedTensorDescription {
            name: name.into(),
            indices,
            bounding_box,
            memory_layout,
        })
    }

    /// `tensor` labelled with `indices`. The region is the bounding box of
    /// the tensor's effective pattern, or its full shape when it has no
    /// nonzeros.
    pub fn from_tensor(tensor: &Tensor, indices: &str) -> Result<Self, Error> {
        let indices = IndexList::parse(indices)?;
        if indices.len() != tensor.rank() {
            return Err(Error::RankMismatch {
                indices,
                shape: tensor.shape().to_vec(),
            });
        }
        let bounding_box = tensor
            .bounding_box()
            .unwrap_or_else(|| BoundingBox::from_shape(tensor.shape()));
        Ok(IndexedTensorDescription {
            name: tensor.name(),
            indices,
            bounding_box,
            memory_layout: tensor.memory_layout().clone(),
        })
    }

    /// The temporary computed by `id`, stored densely under `name`.
    pub fn from_node(dag: &ExprDag, id: NodeId, name: &str) -> Result<Self, Error> {
        let shape = dag.shape(id);
        let bounding_box = dag
            .bounding_box(id)?
            .cloned()
            .unwrap_or_else(|| BoundingBox::from_shape(shape));
        Ok(IndexedTensorDescription {
            name: name.into(),
            indices: dag.indices(id).clone(),
            bounding_box,
            memory_layout: MemoryLayout::dense(shape, false),
        })
    }
}

/// The range each loop index runs over.
pub type LoopRanges = IndexMap<Index, Range>;

/// Ranges that `term` prescribes for those of `loop_indices` it carries,
/// in the order of `loop_indices`.
pub fn loop_ranges(term: &IndexedTensorDescription, loop_indices: &IndexList) -> LoopRanges {
    loop_indices
        .iter()
        .filter_map(|&index| {
            let pos = term.indices.find(index)?;
            Some((index, term.bounding_box[pos]))
        })
        .collect()
}

/// Indices present in both maps must have equal ranges.
pub fn test_loop_ranges_equal(a: &LoopRanges, b: &LoopRanges) -> Result<(), Error> {
    for (&index, &left) in a {
        match b.get(&index) {
            Some(&right) if right != left => {
                return Err(Error::InconsistentLoopRange { index, left, right })
            }
            _ => (),
        }
    }
    Ok(())
}

/// Indices present in both maps must range within `b`. `term` names the
/// owner of `a` for error reporting.
pub fn test_loop_ranges_a_contained_in_b(
    a: &LoopRanges,
    b: &LoopRanges,
    term: Symbol,
) -> Result<(), Error> {
    for (&index, &range) in a {
        match b.get(&index) {
            Some(&bound) if !bound.contains(&range) => {
                return Err(Error::RangeOverflow {
                    index,
                    term,
                    range,
                    bound,
                })
            }
            _ => (),
        }
    }
    Ok(())
}
