//! `result = alpha * term + beta * result`.
use crate::{Error, Scalar};

use super::{
    loop_ranges, test_loop_ranges_a_contained_in_b, Architecture, Generator,
    IndexedTensorDescription, LoopRanges, Target,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Description {
    pub alpha: Scalar,
    pub beta: f64,
    pub result: IndexedTensorDescription,
    pub term: IndexedTensorDescription,
    pub loop_ranges: LoopRanges,
}

impl Description {
    pub fn new(
        alpha: Scalar,
        beta: f64,
        result: IndexedTensorDescription,
        term: IndexedTensorDescription,
    ) -> Result<Self, Error> {
        if beta != 0.0 && beta != 1.0 {
            return Err(Error::UnsupportedBeta(beta));
        }
        if result.indices != term.indices {
            return Err(Error::IndexListMismatch(
                result.indices.clone(),
                term.indices.clone(),
            ));
        }
        let ranges = loop_ranges(&term, &term.indices);
        let bound = loop_ranges(&result, &result.indices);
        test_loop_ranges_a_contained_in_b(&ranges, &bound, term.name)?;
        Ok(Description {
            alpha,
            beta,
            result,
            term,
            loop_ranges: ranges,
        })
    }
}

pub fn generator<'a>(arch: &'a Architecture, description: &'a Description) -> Generator<'a, Description> {
    Generator {
        arch,
        description,
        target: Target::Cpu,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IndexList, Tensor};
    use ordered_float::NotNan;

    fn one() -> Scalar {
        Scalar::Constant(NotNan::new(1.0).unwrap())
    }

    #[test]
    fn copy_into_sparse_result() {
        let dense = Tensor::dense("Q", &[3, 3]).unwrap();
        let upper = Tensor::sparse("U", &[3, 3], [&[0usize, 1][..], &[1, 2][..]]).unwrap();
        let q = IndexedTensorDescription::from_tensor(&dense, "ij").unwrap();
        let u = IndexedTensorDescription::from_tensor(&upper, "ij").unwrap();

        let descr = Description::new(one(), 0.0, q.clone(), u.clone()).unwrap();
        assert_eq!(descr.loop_ranges.len(), 2);
        assert!(matches!(
            Description::new(one(), 1.0, u.clone(), q.clone()),
            Err(Error::RangeOverflow { .. })
        ));
        assert!(matches!(
            Description::new(one(), 0.5, q.clone(), u.clone()),
            Err(Error::UnsupportedBeta(b)) if b == 0.5
        ));
        let mut transposed = u;
        transposed.indices = IndexList::parse("ji").unwrap();
        assert!(matches!(
            Description::new(one(), 1.0, q, transposed),
            Err(Error::IndexListMismatch(..))
        ));
    }
}
