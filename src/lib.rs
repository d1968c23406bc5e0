//! # tensorcost
//! tensorcost is the planning core of a tensor contraction compiler. It
//! consumes expression DAGs over named tensors and
//!
//! - derives the sparsity pattern and bounding box of every subexpression,
//! - estimates the arithmetic cost of alternative tree shapes with one of
//!   several [`cost::CostModel`]s, so a planner can pick the cheapest,
//! - validates the loop ranges of the concrete kernels ([`kernel`]) chosen
//!   for the expression.
//!
//! Tensors come from a [`TensorDatabase`], built from JSON descriptions of
//! matrices and tensors plus an optional memory-layout description.
//!
//! ```
//! use tensorcost::*;
//!
//! let mut db = TensorDatabase::default();
//! db.insert(Tensor::dense("A", &[4, 3]).unwrap()).unwrap();
//! db.insert(Tensor::dense("B", &[3, 5]).unwrap()).unwrap();
//!
//! let mut dag = ExprDag::default();
//! let a = dag.leaf(db.by_name("A").unwrap(), "ik").unwrap();
//! let b = dag.leaf(db.by_name("B").unwrap(), "kj").unwrap();
//! let c = dag.product(a, b, "ij").unwrap();
//!
//! let mut estimator = CostEstimator::new(ShapeCost);
//! assert_eq!(estimator.estimate(&dag, c).unwrap(), 20.0);
//! ```
pub mod cli;
pub mod cost;
pub mod database;
pub mod exprdag;
pub mod indices;
pub mod kernel;
pub mod memory;
pub mod spp;
pub mod tensor;
pub mod util;

use std::path::PathBuf;

use thiserror::Error;

pub use cost::{
    cheapest, BoundingBoxCost, Cost, CostEstimator, CostModel, ExactCost, FusedGemmsCost,
    ShapeCost,
};
pub use database::{
    apply_layout, unify_group, DescriptionOptions, LayoutDescription, MatrixDescription,
    TensorDatabase, TensorDescription,
};
pub use exprdag::{DagId, ExprDag, Node, NodeId, Scalar};
pub use indices::{BoundingBox, Index, IndexList, Range};
pub use memory::{CscLayout, DenseLayout, MemoryLayout};
pub use spp::SparsityPattern;
pub use tensor::{EntryValue, Tensor, TensorName};
use util::ListDisplay;

pub type Symbol = symbol_table::GlobalSymbol;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Operands disagree on the loop range of index {index}: {left} != {right}")]
    InconsistentLoopRange {
        index: Index,
        left: Range,
        right: Range,
    },
    #[error("Range {range} of index {index} in {term} exceeds the range {bound} of the result")]
    RangeOverflow {
        index: Index,
        term: Symbol,
        range: Range,
        bound: Range,
    },
    #[error("Scale-add supports only beta = 0.0 or beta = 1.0, got {0}")]
    UnsupportedBeta(f64),
    #[error("Bounding box intersection is empty in dimension {dim}")]
    EmptyIntersection { dim: usize },
    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),
    #[error("Unrecognized tensor name {0}")]
    UnrecognizedTensorName(String),
    #[error("Bounding boxes of rank {0} and {1} cannot be intersected")]
    DimensionMismatch(usize, usize),
    #[error("Index {0} occurs twice in one index list")]
    DuplicateIndex(Index),
    #[error("Index lists {0} and {1} do not match")]
    IndexListMismatch(IndexList, IndexList),
    #[error("Index list {indices} does not fit shape [{}]", ListDisplay(.shape, ", "))]
    RankMismatch { indices: IndexList, shape: Vec<usize> },
    #[error("Index {index} has extent {left} on one side and {right} on the other")]
    ExtentMismatch {
        index: Index,
        left: usize,
        right: usize,
    },
    #[error("Index {index} is not a free index of {indices}")]
    NotAFreeIndex { index: Index, indices: IndexList },
    #[error("Sparsity patterns of shape {0:?} and {1:?} cannot be combined")]
    PatternShapeMismatch(Vec<usize>, Vec<usize>),
    #[error("Invalid tensor name {0:?}: expected an identifier optionally followed by [n]")]
    InvalidTensorName(String),
    #[error("Tensor {0} has invalid shape {1:?}: every extent must be positive")]
    InvalidShape(String, Vec<usize>),
    #[error("Tensor {0} is defined twice")]
    DuplicateTensor(Symbol),
    #[error("Tensor {0} cannot be in the same group as tensor {1} due to different shapes")]
    GroupShapeMismatch(Symbol, Symbol),
    #[error("Invalid entry{}: {reason}", .tensor.map(|t| format!(" in {t}")).unwrap_or_default())]
    InvalidEntry {
        tensor: Option<Symbol>,
        reason: String,
    },
    #[error("Layout {layout} is not supported for tensor {tensor} of rank {rank}")]
    UnsupportedLayout {
        tensor: Symbol,
        layout: &'static str,
        rank: usize,
    },
    #[error("Estimator is bound to expression DAG {bound:?} but was given {given:?}; call clear() first")]
    ForeignDag { bound: DagId, given: DagId },
    #[error("No candidate expressions to choose from")]
    NoCandidates,
    #[error("No implementation found for {kernel} on target {target}")]
    NoGenerator {
        kernel: &'static str,
        target: kernel::Target,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("IO error: {}: {1}", .0.display())]
    IoError(PathBuf, std::io::Error),
}
