//! Binary contractions `result (+)= left * right`.
use crate::{indices::IndexList, util::IndexSet, Error};

use super::{
    loop_ranges, test_loop_ranges_a_contained_in_b, test_loop_ranges_equal, Architecture,
    Generator, IndexedTensorDescription, LoopRanges, Target,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Description {
    /// Accumulate into the result instead of overwriting it.
    pub add: bool,
    pub result: IndexedTensorDescription,
    pub left_term: IndexedTensorDescription,
    pub right_term: IndexedTensorDescription,
    pub loop_ranges: LoopRanges,
}

impl Description {
    /// Checks that both operands agree on every index they share and that
    /// neither exceeds the result.
    pub fn new(
        add: bool,
        result: IndexedTensorDescription,
        left_term: IndexedTensorDescription,
        right_term: IndexedTensorDescription,
    ) -> Result<Self, Error> {
        let loop_indices = loop_indices(&result, &left_term, &right_term)?;
        let left = loop_ranges(&left_term, &loop_indices);
        let right = loop_ranges(&right_term, &loop_indices);
        let bound = loop_ranges(&result, &loop_indices);
        test_loop_ranges_equal(&left, &right)?;
        test_loop_ranges_a_contained_in_b(&left, &bound, left_term.name)?;
        test_loop_ranges_a_contained_in_b(&right, &bound, right_term.name)?;

        let loop_ranges: LoopRanges = loop_indices
            .iter()
            .filter_map(|index| {
                let range = right.get(index).or_else(|| left.get(index))?;
                Some((*index, *range))
            })
            .collect();
        log::debug!(
            "{}[{}] {}= {}[{}] * {}[{}]",
            result.name,
            result.indices,
            if add { "+" } else { "" },
            left_term.name,
            left_term.indices,
            right_term.name,
            right_term.indices
        );
        Ok(Description {
            add,
            result,
            left_term,
            right_term,
            loop_ranges,
        })
    }
}

/// The result's indices followed by the contracted ones.
fn loop_indices(
    result: &IndexedTensorDescription,
    left: &IndexedTensorDescription,
    right: &IndexedTensorDescription,
) -> Result<IndexList, Error> {
    let indices: IndexSet<_> = result
        .indices
        .iter()
        .chain(left.indices.iter())
        .chain(right.indices.iter())
        .copied()
        .collect();
    IndexList::new(indices)
}

pub fn generator<'a>(arch: &'a Architecture, description: &'a Description) -> Generator<'a, Description> {
    Generator {
        arch,
        description,
        target: Target::Cpu,
    }
}
