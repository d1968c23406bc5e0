//! Cost estimation over expression DAGs.
//!
//! A [`CostEstimator`] walks a DAG bottom-up, memoizing the total cost of
//! every node it has seen. The incremental cost of a single node is decided
//! by a [`CostModel`]:
//!
//! - [`ShapeCost`] counts one operation per output position, ignoring
//!   sparsity.
//! - [`BoundingBoxCost`] restricts every node to the bounding box of its
//!   nonzeros.
//! - [`FusedGemmsCost`] models the work of one GPU thread in a fused GEMM
//!   kernel, including loads into fast memory.
//! - [`ExactCost`] follows the exact sparsity patterns.
use ordered_float::NotNan;

use crate::{
    exprdag::{DagId, ExprDag, Node, NodeId},
    indices::{BoundingBox, Index, Range},
    spp::SparsityPattern,
    util::{volume, HEntry, HashMap, HashSet},
    Error,
};

pub type Cost = f64;

pub trait CostModel {
    /// The cost of `id` itself, excluding its children. Called once per
    /// distinct node, after all of the node's children.
    fn node_cost(&mut self, dag: &ExprDag, id: NodeId) -> Result<Cost, Error>;

    /// Forgets everything remembered from previous calls.
    fn reset(&mut self) {}
}

/// Memoized bottom-up evaluation of a [`CostModel`].
///
/// The total cost of a node is its own cost plus the totals of its children.
/// A child shared by several parents contributes to each of them, exactly as
/// it would in the fully expanded tree, but its cost is only computed once.
///
/// An estimator is bound to the first DAG it is used with; call
/// [`CostEstimator::clear`] before using it with another one.
pub struct CostEstimator<M> {
    model: M,
    costs: HashMap<NodeId, Cost>,
    dag: Option<DagId>,
}

impl<M: CostModel> CostEstimator<M> {
    pub fn new(model: M) -> Self {
        CostEstimator {
            model,
            costs: HashMap::default(),
            dag: None,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// The memoized total cost of `id`, if it has been estimated.
    pub fn cost_of(&self, id: NodeId) -> Option<Cost> {
        self.costs.get(&id).copied()
    }

    pub fn clear(&mut self) {
        self.costs.clear();
        self.model.reset();
        self.dag = None;
    }

    pub fn estimate(&mut self, dag: &ExprDag, root: NodeId) -> Result<Cost, Error> {
        match self.dag {
            Some(bound) if bound != dag.id() => {
                return Err(Error::ForeignDag {
                    bound,
                    given: dag.id(),
                })
            }
            _ => self.dag = Some(dag.id()),
        }
        if let Some(&cost) = self.costs.get(&root) {
            return Ok(cost);
        }
        let result = self.estimate_uncached(dag, root);
        if result.is_err() {
            self.clear();
        }
        result
    }

    fn estimate_uncached(&mut self, dag: &ExprDag, root: NodeId) -> Result<Cost, Error> {
        for id in dag.post_order(root) {
            if self.costs.contains_key(&id) {
                continue;
            }
            let mut total = 0.0;
            for child in dag.children(id) {
                total += self.costs.get(&child).copied().ok_or_else(|| {
                    Error::InternalInconsistency(format!("{child:?} was not estimated before {id:?}"))
                })?;
            }
            let own = self.model.node_cost(dag, id)?;
            log::debug!("{} {id:?} costs {own} (total {})", dag.node(id).kind(), total + own);
            if let HEntry::Vacant(e) = self.costs.entry(id) {
                e.insert(total + own);
            }
        }
        self.costs
            .get(&root)
            .copied()
            .ok_or_else(|| Error::InternalInconsistency(format!("no cost for root {root:?}")))
    }
}

/// Estimates every candidate root with a fresh model and returns the
/// cheapest one. Ties go to the earlier candidate.
pub fn cheapest<M: CostModel>(
    dag: &ExprDag,
    candidates: &[NodeId],
    mut make_model: impl FnMut() -> M,
) -> Result<(NodeId, Cost), Error> {
    let mut best: Option<(NodeId, NotNan<Cost>)> = None;
    for &candidate in candidates {
        let cost = CostEstimator::new(make_model()).estimate(dag, candidate)?;
        let cost = NotNan::new(cost)
            .map_err(|_| Error::InternalInconsistency(format!("{candidate:?} costs NaN")))?;
        log::debug!("candidate {} costs {cost}", dag.to_string(candidate));
        if best.map_or(true, |(_, best_cost)| cost < best_cost) {
            best = Some((candidate, cost));
        }
    }
    best.map(|(id, cost)| (id, cost.into_inner()))
        .ok_or(Error::NoCandidates)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ShapeCost;

impl CostModel for ShapeCost {
    fn node_cost(&mut self, dag: &ExprDag, id: NodeId) -> Result<Cost, Error> {
        Ok(match *dag.node(id) {
            Node::Product { .. } => volume(dag.shape(id)) as Cost,
            Node::IndexSum { term, sum_index } => {
                let pos = sum_position(dag, term, sum_index)?;
                let reductions = dag.shape(term)[pos].saturating_sub(1);
                (reductions * volume(dag.shape(id))) as Cost
            }
            _ => 0.0,
        })
    }
}

fn sum_position(dag: &ExprDag, term: NodeId, sum_index: Index) -> Result<usize, Error> {
    dag.indices(term).find(sum_index).ok_or_else(|| Error::NotAFreeIndex {
        index: sum_index,
        indices: dag.indices(term).clone(),
    })
}

/// The region a node may write to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Region {
    Box(BoundingBox),
    /// Structurally zero.
    Empty,
}

impl Region {
    pub fn size(&self) -> usize {
        match self {
            Region::Box(bb) => bb.size(),
            Region::Empty => 0,
        }
    }

    pub fn as_box(&self) -> Option<&BoundingBox> {
        match self {
            Region::Box(bb) => Some(bb),
            Region::Empty => None,
        }
    }
}

/// Which operand dimensions a product dimension is taken from.
enum Source {
    Both(usize, usize),
    Left(usize),
    Right(usize),
}

#[derive(Clone, Debug, Default)]
pub struct BoundingBoxCost {
    regions: HashMap<NodeId, Region>,
}

impl BoundingBoxCost {
    pub fn region(&self, id: NodeId) -> Option<&Region> {
        self.regions.get(&id)
    }

    fn operand(&self, id: NodeId) -> Result<&Region, Error> {
        self.regions.get(&id).ok_or_else(|| {
            Error::InternalInconsistency(format!("bounding box of {id:?} requested too early"))
        })
    }

    fn product_region(
        &self,
        dag: &ExprDag,
        id: NodeId,
        left: NodeId,
        right: NodeId,
    ) -> Result<Region, Error> {
        let (lind, rind) = (dag.indices(left), dag.indices(right));
        let indices = dag.indices(id);
        let mut sources = Vec::with_capacity(indices.len());
        for &index in indices {
            sources.push(match (lind.find(index), rind.find(index)) {
                (Some(l), Some(r)) => Source::Both(l, r),
                (Some(l), None) => Source::Left(l),
                (None, Some(r)) => Source::Right(r),
                (None, None) => {
                    return Err(Error::InternalInconsistency(format!(
                        "index {index} of {indices} is free in neither {lind} nor {rind}"
                    )))
                }
            });
        }
        let (Region::Box(lbb), Region::Box(rbb)) = (self.operand(left)?, self.operand(right)?)
        else {
            return Ok(Region::Empty);
        };
        // contracted indices whose ranges do not overlap make the product vanish
        for (lpos, &index) in lind.iter().enumerate() {
            if let (None, Some(rpos)) = (indices.find(index), rind.find(index)) {
                if lbb[lpos].intersect(&rbb[rpos]).is_none() {
                    return Ok(Region::Empty);
                }
            }
        }
        let mut ranges: Vec<Range> = Vec::with_capacity(sources.len());
        for source in sources {
            ranges.push(match source {
                Source::Both(l, r) => match lbb[l].intersect(&rbb[r]) {
                    Some(range) => range,
                    None => return Ok(Region::Empty),
                },
                Source::Left(l) => lbb[l],
                Source::Right(r) => rbb[r],
            });
        }
        Ok(Region::Box(BoundingBox::new(ranges)))
    }
}

impl CostModel for BoundingBoxCost {
    fn node_cost(&mut self, dag: &ExprDag, id: NodeId) -> Result<Cost, Error> {
        let (region, cost) = match *dag.node(id) {
            Node::Product { left, right } => {
                let region = self.product_region(dag, id, left, right)?;
                let cost = region.size();
                (region, cost)
            }
            Node::IndexSum { term, sum_index } => {
                let pos = sum_position(dag, term, sum_index)?;
                let term_region = self.operand(term)?;
                let region = match term_region {
                    Region::Box(bb) => Region::Box(bb.project_out(pos)),
                    Region::Empty => Region::Empty,
                };
                let cost = term_region.size() - region.size();
                (region, cost)
            }
            _ => {
                let region = dag
                    .bounding_box(id)?
                    .cloned()
                    .map_or(Region::Empty, Region::Box);
                (region, 0)
            }
        };
        self.regions.insert(id, region);
        Ok(cost as Cost)
    }

    fn reset(&mut self) {
        self.regions.clear();
    }
}

/// Number of operations one GPU thread performs when the leading output
/// dimension of every product is spread across threads, plus the cost of
/// loading operands into fast memory the first time they are used.
#[derive(Clone, Debug, Default)]
pub struct FusedGemmsCost {
    bbox: BoundingBoxCost,
    lead_dim: usize,
    resident: HashSet<NodeId>,
}

impl FusedGemmsCost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lead_dim(lead_dim: usize) -> Self {
        FusedGemmsCost {
            lead_dim,
            ..Self::default()
        }
    }

    pub fn is_resident(&self, id: NodeId) -> bool {
        self.resident.contains(&id)
    }

    pub fn bounding_boxes(&self) -> &BoundingBoxCost {
        &self.bbox
    }

    /// Extent of the parallel dimension of `id`'s region; 1 for results of
    /// lower rank, 0 for structurally zero results.
    fn lead_extent(&self, id: NodeId) -> Result<usize, Error> {
        Ok(match self.bbox.operand(id)? {
            Region::Box(bb) => bb.get(self.lead_dim).map_or(1, Range::size),
            Region::Empty => 0,
        })
    }

    /// Charges the size of `operand` unless it already is in fast memory.
    fn load(&mut self, operand: NodeId) -> Result<Cost, Error> {
        if !self.resident.insert(operand) {
            return Ok(0.0);
        }
        Ok(self.bbox.operand(operand)?.size() as Cost)
    }
}

impl CostModel for FusedGemmsCost {
    fn node_cost(&mut self, dag: &ExprDag, id: NodeId) -> Result<Cost, Error> {
        match *dag.node(id) {
            Node::Product { left, right } => {
                let cost = self.bbox.node_cost(dag, id)?;
                let lead = self.lead_extent(id)?;
                if lead == 0 {
                    return Ok(0.0);
                }
                let mut cost = cost / lead as Cost;
                cost += self.load(right)?;
                let lead_index = dag.indices(id).get(self.lead_dim);
                if lead_index != dag.indices(left).get(self.lead_dim) {
                    cost += self.load(left)?;
                }
                Ok(cost)
            }
            Node::IndexSum { .. } => {
                let cost = self.bbox.node_cost(dag, id)?;
                let lead = self.lead_extent(id)?;
                self.resident.insert(id);
                Ok(if lead == 0 { 0.0 } else { cost / lead as Cost })
            }
            _ => self.bbox.node_cost(dag, id),
        }
    }

    fn reset(&mut self) {
        self.bbox.reset();
        self.resident.clear();
    }
}

/// Counts the nonzeros actually produced, following exact sparsity patterns.
#[derive(Clone, Debug, Default)]
pub struct ExactCost {
    patterns: HashMap<NodeId, SparsityPattern>,
}

impl ExactCost {
    pub fn pattern(&self, id: NodeId) -> Option<&SparsityPattern> {
        self.patterns.get(&id)
    }

    fn operand(&self, id: NodeId) -> Result<&SparsityPattern, Error> {
        self.patterns.get(&id).ok_or_else(|| {
            Error::InternalInconsistency(format!("pattern of {id:?} requested too early"))
        })
    }
}

impl CostModel for ExactCost {
    fn node_cost(&mut self, dag: &ExprDag, id: NodeId) -> Result<Cost, Error> {
        let (spp, cost) = match *dag.node(id) {
            Node::Product { left, right } => {
                let spp = SparsityPattern::einsum(
                    (self.operand(left)?, dag.indices(left)),
                    (self.operand(right)?, dag.indices(right)),
                    dag.indices(id),
                )?;
                let cost = spp.count_nonzero();
                (spp, cost)
            }
            Node::IndexSum { term, sum_index } => {
                let pos = sum_position(dag, term, sum_index)?;
                let term_spp = self.operand(term)?;
                let spp = term_spp.project_out(pos);
                let cost = term_spp.count_nonzero() - spp.count_nonzero();
                (spp, cost)
            }
            _ => (dag.eqspp(id)?.clone(), 0),
        };
        self.patterns.insert(id, spp);
        Ok(cost as Cost)
    }

    fn reset(&mut self) {
        self.patterns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IndexList, Tensor};

    fn matmul(a: &Tensor, b: &Tensor, out: &str) -> (ExprDag, NodeId) {
        let mut dag = ExprDag::default();
        let l = dag.leaf(a, "ik").unwrap();
        let r = dag.leaf(b, "kj").unwrap();
        let p = dag.product(l, r, out).unwrap();
        (dag, p)
    }

    #[test]
    fn product_without_children_costs() {
        let a = Tensor::dense("A", &[4, 3]).unwrap();
        let b = Tensor::dense("B", &[3, 5]).unwrap();
        let (dag, p) = matmul(&a, &b, "ij");
        assert_eq!(ShapeCost.node_cost(&dag, p).unwrap(), 20.0);
        assert_eq!(CostEstimator::new(ShapeCost).estimate(&dag, p).unwrap(), 20.0);
    }

    #[test]
    fn index_sum_costs() {
        let a = Tensor::dense("A", &[4, 3]).unwrap();
        let b = Tensor::dense("B", &[3, 5]).unwrap();
        let (mut dag, p) = matmul(&a, &b, "ikj");
        let s = dag.index_sum(p, 'k').unwrap();
        // 60 multiplications and 2 * 20 additions
        assert_eq!(CostEstimator::new(ShapeCost).estimate(&dag, s).unwrap(), 100.0);
        assert_eq!(
            CostEstimator::new(BoundingBoxCost::default()).estimate(&dag, s).unwrap(),
            100.0
        );
        assert_eq!(CostEstimator::new(ExactCost::default()).estimate(&dag, s).unwrap(), 100.0);
    }

    #[test]
    fn disjoint_operands_vanish() {
        // A occupies only column 0, B only row 2, so A[ik] B[kj] is zero
        let a = Tensor::sparse("A", &[3, 3], [&[1usize, 0][..]]).unwrap();
        let b = Tensor::sparse("B", &[3, 3], [&[2usize, 1][..]]).unwrap();
        let (dag, p) = matmul(&a, &b, "ij");
        let mut estimator = CostEstimator::new(BoundingBoxCost::default());
        assert_eq!(estimator.estimate(&dag, p).unwrap(), 0.0);
        assert_eq!(estimator.model().region(p), Some(&Region::Empty));
        assert_eq!(CostEstimator::new(ExactCost::default()).estimate(&dag, p).unwrap(), 0.0);
    }

    #[test]
    fn result_index_without_operand_is_inconsistent() {
        let a = Tensor::dense("A", &[2, 2]).unwrap();
        let mut dag = ExprDag::default();
        let l = dag.leaf(&a, "ik").unwrap();
        let r = dag.leaf(&a, "kj").unwrap();
        let p = dag
            .push(
                Node::Product { left: l, right: r },
                IndexList::parse("iz").unwrap(),
                vec![2, 2],
            )
            .unwrap();
        let mut estimator = CostEstimator::new(BoundingBoxCost::default());
        assert!(matches!(
            estimator.estimate(&dag, p),
            Err(Error::InternalInconsistency(_))
        ));
        // failed passes leave nothing behind
        assert_eq!(estimator.cost_of(l), None);
    }

    #[test]
    fn estimator_is_bound_to_one_dag() {
        let a = Tensor::dense("A", &[2, 2]).unwrap();
        let (dag1, p1) = matmul(&a, &a, "ij");
        let (dag2, p2) = matmul(&a, &a, "ij");
        let mut estimator = CostEstimator::new(ShapeCost);
        estimator.estimate(&dag1, p1).unwrap();
        assert!(matches!(
            estimator.estimate(&dag2, p2),
            Err(Error::ForeignDag { .. })
        ));
        estimator.clear();
        assert_eq!(estimator.estimate(&dag2, p2).unwrap(), 4.0);
    }

    #[test]
    fn fused_gemms_divides_by_lead_extent() {
        let a = Tensor::dense("A", &[4, 3]).unwrap();
        let b = Tensor::dense("B", &[3, 5]).unwrap();
        let (dag, p) = matmul(&a, &b, "ij");
        let mut estimator = CostEstimator::new(FusedGemmsCost::new());
        // 20 / 4 per thread, plus loading B once; A keeps its leading index
        assert_eq!(estimator.estimate(&dag, p).unwrap(), 5.0 + 15.0);
        let (left, right) = (dag.children(p)[0], dag.children(p)[1]);
        let model = estimator.into_model();
        assert!(model.is_resident(right));
        assert!(!model.is_resident(left));
    }

    #[test]
    fn cheapest_prefers_the_smaller_chain() {
        // (A B) C versus A (B C) with A: 10x2, B: 2x10, C: 10x2
        let a = Tensor::dense("A", &[10, 2]).unwrap();
        let b = Tensor::dense("B", &[2, 10]).unwrap();
        let c = Tensor::dense("C", &[10, 2]).unwrap();
        let mut dag = ExprDag::default();
        let la = dag.leaf(&a, "ij").unwrap();
        let lb = dag.leaf(&b, "jk").unwrap();
        let lc = dag.leaf(&c, "kl").unwrap();
        let ab = dag.product(la, lb, "ijk").unwrap();
        let ab = dag.index_sum(ab, 'j').unwrap();
        let ab_c = dag.product(ab, lc, "ikl").unwrap();
        let left_first = dag.index_sum(ab_c, 'k').unwrap();
        let bc = dag.product(lb, lc, "jkl").unwrap();
        let bc = dag.index_sum(bc, 'k').unwrap();
        let a_bc = dag.product(la, bc, "ijl").unwrap();
        let right_first = dag.index_sum(a_bc, 'j').unwrap();
        let (best, cost) = cheapest(&dag, &[left_first, right_first], ShapeCost::default).unwrap();
        assert_eq!(best, right_first);
        assert_eq!(cost, 40.0 + 36.0 + 40.0 + 20.0);
        assert!(matches!(
            cheapest(&dag, &[], ShapeCost::default),
            Err(Error::NoCandidates)
        ));
    }
}
