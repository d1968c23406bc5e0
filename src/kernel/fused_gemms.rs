//! Chains of products fused into a single GPU kernel.
use crate::{exprdag::NodeId, Error, Scalar};

use super::{product, Architecture, Generator, IndexedTensorDescription, Target};

#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    /// The product node this step computes.
    pub node: NodeId,
    pub product: product::Description,
    pub scalar: Scalar,
}

/// The steps of a fused kernel, in execution order.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Description {
    steps: Vec<Step>,
}

impl Description {
    /// Every step is `(node, [result, left, right], add, scalar)` and is
    /// validated like a standalone product.
    pub fn new(
        steps: impl IntoIterator<Item = (NodeId, [IndexedTensorDescription; 3], bool, Scalar)>,
    ) -> Result<Self, Error> {
        let steps = steps
            .into_iter()
            .map(|(node, [result, left, right], add, scalar)| {
                Ok(Step {
                    node,
                    product: product::Description::new(add, result, left, right)?,
                    scalar,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Description { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }
}

impl<'a> IntoIterator for &'a Description {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

/// Only GPUs with an external fused GEMM generator can run fused kernels.
pub fn generator<'a>(
    arch: &'a Architecture,
    description: &'a Description,
    target: Target,
) -> Result<Generator<'a, Description>, Error> {
    if target != Target::Gpu || !arch.fused_gemms_backend {
        return Err(Error::NoGenerator {
            kernel: "fused GEMMs",
            target,
        });
    }
    Ok(Generator {
        arch,
        description,
        target,
    })
}
