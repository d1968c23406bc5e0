use std::cell::OnceCell;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};

use ordered_float::NotNan;
use smallvec::{smallvec, SmallVec};

use crate::{
    indices::{BoundingBox, Index, IndexList},
    spp::SparsityPattern,
    tensor::Tensor,
    util::HashSet,
    Error, Symbol,
};

static NEXT_DAG_ID: AtomicU32 = AtomicU32::new(0);

/// Identifies one [`ExprDag`] for the lifetime of the process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DagId(u32);

impl DagId {
    fn fresh() -> Self {
        DagId(NEXT_DAG_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Position of a node in its [`ExprDag`]. Children always have smaller ids
/// than their parents.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn from_usize(index: usize) -> Self {
        assert!(u32::MAX as usize >= index, "overflowing NodeId with index {index}");
        NodeId(index as u32)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Scalar {
    Constant(NotNan<f64>),
    Named(Symbol),
}

impl Display for Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Constant(c) => write!(f, "{c}"),
            Scalar::Named(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Leaf { tensor: Symbol },
    Add { terms: [NodeId; 2] },
    /// Binary product. Operand indices missing from the product's own index
    /// list are summed over.
    Product { left: NodeId, right: NodeId },
    IndexSum { term: NodeId, sum_index: Index },
    ScalarMultiplication { scalar: Scalar, term: NodeId },
}

impl Node {
    pub fn children(&self) -> SmallVec<[NodeId; 2]> {
        match *self {
            Node::Leaf { .. } => smallvec![],
            Node::Add { terms } => smallvec![terms[0], terms[1]],
            Node::Product { left, right } => smallvec![left, right],
            Node::IndexSum { term, .. } | Node::ScalarMultiplication { term, .. } => {
                smallvec![term]
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Leaf { .. } => "Leaf",
            Node::Add { .. } => "Add",
            Node::Product { .. } => "Product",
            Node::IndexSum { .. } => "IndexSum",
            Node::ScalarMultiplication { .. } => "ScalarMultiplication",
        }
    }
}

struct NodeData {
    node: Node,
    indices: IndexList,
    shape: Vec<usize>,
    eqspp: OnceCell<SparsityPattern>,
    bounding_box: OnceCell<Option<BoundingBox>>,
}

/// An arena of immutable expression nodes. A node may be the child of several
/// parents; sharing is expressed by reusing its [`NodeId`].
///
/// Nodes lazily cache their equivalent sparsity pattern and bounding box.
/// Ids are only meaningful for the DAG that created them.
pub struct ExprDag {
    id: DagId,
    nodes: Vec<NodeData>,
}

impl Default for ExprDag {
    fn default() -> Self {
        ExprDag {
            id: DagId::fresh(),
            nodes: vec![],
        }
    }
}

/// A clone is a different DAG: its id is fresh, so caches built for the
/// original are not reused.
impl Clone for ExprDag {
    fn clone(&self) -> Self {
        ExprDag {
            id: DagId::fresh(),
            nodes: self
                .nodes
                .iter()
                .map(|data| NodeData {
                    node: data.node.clone(),
                    indices: data.indices.clone(),
                    shape: data.shape.clone(),
                    eqspp: data.eqspp.clone(),
                    bounding_box: data.bounding_box.clone(),
                })
                .collect(),
        }
    }
}

impl ExprDag {
    pub fn id(&self) -> DagId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends a node as built by an external expression builder. Only the
    /// structural preconditions of the arena are checked: children must
    /// exist and `shape` must have one extent per index.
    pub fn push(&mut self, node: Node, indices: IndexList, shape: Vec<usize>) -> Result<NodeId, Error> {
        let id = NodeId::from_usize(self.nodes.len());
        for child in node.children() {
            if child >= id {
                return Err(Error::InternalInconsistency(format!(
                    "{} node refers to unknown child {child:?}",
                    node.kind()
                )));
            }
        }
        if indices.len() != shape.len() {
            return Err(Error::RankMismatch { indices, shape });
        }
        self.nodes.push(NodeData {
            node,
            indices,
            shape,
            eqspp: OnceCell::new(),
            bounding_box: OnceCell::new(),
        });
        Ok(id)
    }

    /// A view of `tensor` labelled with one index per dimension.
    pub fn leaf(&mut self, tensor: &Tensor, indices: &str) -> Result<NodeId, Error> {
        let indices = IndexList::parse(indices)?;
        if indices.len() != tensor.rank() {
            return Err(Error::RankMismatch {
                indices,
                shape: tensor.shape().to_vec(),
            });
        }
        let id = self.push(
            Node::Leaf {
                tensor: tensor.name(),
            },
            indices,
            tensor.shape().to_vec(),
        )?;
        let _ = self.nodes[id.index()].eqspp.set(tensor.spp().clone());
        Ok(id)
    }

    /// Elementwise sum. Both terms must carry the same indices with the same
    /// extents; the sum uses the index order of `a`.
    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, Error> {
        let indices = self.indices(a).clone();
        let other = self.indices(b);
        if other.len() != indices.len() || other.iter().any(|&i| indices.find(i).is_none()) {
            return Err(Error::IndexListMismatch(indices, other.clone()));
        }
        for (pos, &index) in indices.iter().enumerate() {
            self.check_extent(index, a, pos, b)?;
        }
        let shape = self.shape(a).to_vec();
        self.push(Node::Add { terms: [a, b] }, indices, shape)
    }

    /// Product of `left` and `right` with free indices `indices`. Every
    /// result index must be free in an operand; shared operand indices must
    /// agree on their extent.
    pub fn product(&mut self, left: NodeId, right: NodeId, indices: &str) -> Result<NodeId, Error> {
        let indices = IndexList::parse(indices)?;
        let (lind, rind) = (self.indices(left), self.indices(right));
        for (lpos, &index) in lind.iter().enumerate() {
            if rind.find(index).is_some() {
                self.check_extent(index, left, lpos, right)?;
            }
        }
        let mut shape = Vec::with_capacity(indices.len());
        for &index in &indices {
            let extent = match (lind.find(index), rind.find(index)) {
                (Some(pos), _) => self.shape(left)[pos],
                (None, Some(pos)) => self.shape(right)[pos],
                (None, None) => {
                    return Err(Error::NotAFreeIndex {
                        index,
                        indices: lind.clone(),
                    })
                }
            };
            shape.push(extent);
        }
        self.push(Node::Product { left, right }, indices, shape)
    }

    /// Sums `index` out of `term`.
    pub fn index_sum(&mut self, term: NodeId, index: impl Into<Index>) -> Result<NodeId, Error> {
        let sum_index = index.into();
        let pos = self.indices(term).find(sum_index).ok_or_else(|| Error::NotAFreeIndex {
            index: sum_index,
            indices: self.indices(term).clone(),
        })?;
        let indices = self.indices(term).without(sum_index);
        let mut shape = self.shape(term).to_vec();
        shape.remove(pos);
        self.push(Node::IndexSum { term, sum_index }, indices, shape)
    }

    pub fn scalar_mul(&mut self, scalar: Scalar, term: NodeId) -> Result<NodeId, Error> {
        let indices = self.indices(term).clone();
        let shape = self.shape(term).to_vec();
        self.push(Node::ScalarMultiplication { scalar, term }, indices, shape)
    }

    fn check_extent(&self, index: Index, a: NodeId, apos: usize, b: NodeId) -> Result<(), Error> {
        let left = self.shape(a)[apos];
        let right = self.indices(b).find(index).map_or(left, |pos| self.shape(b)[pos]);
        if left != right {
            return Err(Error::ExtentMismatch { index, left, right });
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()].node
    }

    pub fn indices(&self, id: NodeId) -> &IndexList {
        &self.nodes[id.index()].indices
    }

    pub fn shape(&self, id: NodeId) -> &[usize] {
        &self.nodes[id.index()].shape
    }

    pub fn children(&self, id: NodeId) -> SmallVec<[NodeId; 2]> {
        self.node(id).children()
    }

    /// Every node reachable from `root`, each once, children before parents.
    pub fn post_order(&self, root: NodeId) -> Vec<NodeId> {
        self.post_order_until(root, |_| false)
    }

    /// Like [`ExprDag::post_order`], but skips `done` nodes and everything
    /// only reachable through them.
    fn post_order_until(&self, root: NodeId, done: impl Fn(&NodeData) -> bool) -> Vec<NodeId> {
        let mut seen = HashSet::default();
        let mut stack = vec![root];
        let mut order = vec![];
        while let Some(next) = stack.pop() {
            if !seen.insert(next) || done(&self.nodes[next.index()]) {
                continue;
            }
            order.push(next);
            stack.extend(self.children(next));
        }
        order.sort_unstable();
        order
    }

    /// The sparsity pattern of the value computed by `id`, in the order of
    /// its index list.
    pub fn eqspp(&self, id: NodeId) -> Result<&SparsityPattern, Error> {
        if self.nodes[id.index()].eqspp.get().is_none() {
            for next in self.post_order_until(id, |data| data.eqspp.get().is_some()) {
                let data = &self.nodes[next.index()];
                let spp = self.compute_eqspp(next)?;
                log::debug!("eqspp of {next:?}: {spp:?}");
                let _ = data.eqspp.set(spp);
            }
        }
        self.nodes[id.index()]
            .eqspp
            .get()
            .ok_or_else(|| Error::InternalInconsistency(format!("no eqspp for {id:?}")))
    }

    /// Assumes the patterns of all children are cached.
    fn compute_eqspp(&self, id: NodeId) -> Result<SparsityPattern, Error> {
        let cached = |child: NodeId| {
            self.nodes[child.index()].eqspp.get().ok_or_else(|| {
                Error::InternalInconsistency(format!("eqspp of {child:?} requested too early"))
            })
        };
        match *self.node(id) {
            Node::Leaf { tensor } => Err(Error::InternalInconsistency(format!(
                "leaf {tensor} was created without a pattern"
            ))),
            Node::Add { terms: [a, b] } => {
                let aligned = cached(b)?.align(self.indices(b), self.indices(a))?;
                cached(a)?.union(&aligned)
            }
            Node::Product { left, right } => SparsityPattern::einsum(
                (cached(left)?, self.indices(left)),
                (cached(right)?, self.indices(right)),
                self.indices(id),
            ),
            Node::IndexSum { term, sum_index } => {
                let pos = self.indices(term).find(sum_index).ok_or_else(|| Error::NotAFreeIndex {
                    index: sum_index,
                    indices: self.indices(term).clone(),
                })?;
                Ok(cached(term)?.project_out(pos))
            }
            Node::ScalarMultiplication { term, .. } => Ok(cached(term)?.clone()),
        }
    }

    /// Tightest box around the node's pattern; `None` if the node is
    /// structurally zero.
    pub fn bounding_box(&self, id: NodeId) -> Result<Option<&BoundingBox>, Error> {
        let data = &self.nodes[id.index()];
        if data.bounding_box.get().is_none() {
            let bb = BoundingBox::from_pattern(self.eqspp(id)?);
            let _ = data.bounding_box.set(bb);
        }
        Ok(data.bounding_box.get().and_then(Option::as_ref))
    }

    /// Renders the expression below `id` as an s-expression. Shared nodes
    /// are printed once per use.
    pub fn to_string(&self, id: NodeId) -> String {
        enum Item {
            Node(NodeId),
            Text(String),
        }
        let mut out = String::new();
        // use a stack to avoid stack overflow on deep expressions
        let mut stack = vec![Item::Node(id)];
        while let Some(item) = stack.pop() {
            let next = match item {
                Item::Text(text) => {
                    out.push_str(&text);
                    continue;
                }
                Item::Node(next) => next,
            };
            let close = Item::Text(")".to_owned());
            match self.node(next) {
                Node::Leaf { tensor } => out.push_str(&format!("{tensor}[{}]", self.indices(next))),
                Node::Add { terms: [a, b] } => {
                    out.push_str("(+ ");
                    stack.extend([close, Item::Node(*b), Item::Text(" ".to_owned()), Item::Node(*a)]);
                }
                Node::Product { left, right } => {
                    out.push_str("(* ");
                    stack.extend([
                        Item::Text(format!(")[{}]", self.indices(next))),
                        Item::Node(*right),
                        Item::Text(" ".to_owned()),
                        Item::Node(*left),
                    ]);
                }
                Node::IndexSum { term, sum_index } => {
                    out.push_str(&format!("(sum {sum_index} "));
                    stack.extend([close, Item::Node(*term)]);
                }
                Node::ScalarMultiplication { scalar, term } => {
                    out.push_str(&format!("(* {scalar} "));
                    stack.extend([close, Item::Node(*term)]);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(name: &str, shape: &[usize]) -> Tensor {
        Tensor::dense(name, shape).unwrap()
    }

    #[test]
    fn product_shapes_follow_operands() {
        let mut dag = ExprDag::default();
        let a = dag.leaf(&dense("A", &[4, 3]), "ik").unwrap();
        let b = dag.leaf(&dense("B", &[3, 5]), "kj").unwrap();
        let p = dag.product(a, b, "ikj").unwrap();
        assert_eq!(dag.shape(p), &[4, 3, 5]);
        let s = dag.index_sum(p, 'k').unwrap();
        assert_eq!(dag.shape(s), &[4, 5]);
        assert_eq!(dag.indices(s).to_string(), "ij");
        assert_eq!(dag.to_string(s), "(sum k (* A[ik] B[kj])[ikj])");
    }

    #[test]
    fn builder_rejects_malformed_nodes() {
        let mut dag = ExprDag::default();
        let a = dag.leaf(&dense("A", &[4, 3]), "ik").unwrap();
        let b = dag.leaf(&dense("B", &[4, 5]), "kj").unwrap();
        assert!(matches!(
            dag.product(a, b, "ij"),
            Err(Error::ExtentMismatch { left: 3, right: 4, .. })
        ));
        assert!(matches!(dag.index_sum(a, 'x'), Err(Error::NotAFreeIndex { .. })));
        assert!(matches!(
            dag.leaf(&dense("C", &[4]), "ij"),
            Err(Error::RankMismatch { .. })
        ));
        let c = dag.leaf(&dense("C", &[4, 3]), "kl").unwrap();
        assert!(matches!(dag.add(a, c), Err(Error::IndexListMismatch(..))));
    }

    #[test]
    fn eqspp_of_sum_of_products() {
        let diag = Tensor::sparse("D", &[3, 3], [&[0usize, 0][..], &[1, 1][..], &[2, 2][..]]).unwrap();
        let corner = Tensor::sparse("E", &[3, 3], [&[2usize, 0][..]]).unwrap();
        let mut dag = ExprDag::default();
        let d = dag.leaf(&diag, "ij").unwrap();
        let e = dag.leaf(&corner, "ji").unwrap();
        let sum = dag.add(d, e).unwrap();
        let spp = dag.eqspp(sum).unwrap();
        assert_eq!(spp.count_nonzero(), 4);
        // E[ji] has its entry at j=2, i=0, which is ij position (0, 2)
        assert!(spp.get(&[0, 2]));
        let bb = dag.bounding_box(sum).unwrap().unwrap();
        assert_eq!(bb.size(), 9);
        let s = dag.index_sum(sum, 'j').unwrap();
        assert_eq!(dag.eqspp(s).unwrap().count_nonzero(), 3);
    }

    #[test]
    fn post_order_visits_shared_nodes_once() {
        let mut dag = ExprDag::default();
        let a = dag.leaf(&dense("A", &[2, 2]), "ij").unwrap();
        let p1 = dag.product(a, a, "ij").unwrap();
        let p2 = dag.product(a, p1, "ij").unwrap();
        assert_eq!(dag.post_order(p2), vec![a, p1, p2]);
    }

    #[test]
    fn clones_get_fresh_ids() {
        let dag = ExprDag::default();
        assert_ne!(dag.id(), dag.clone().id());
    }
}
