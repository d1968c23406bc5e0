use std::path::PathBuf;

use hashbrown::HashSet;
use libtest_mimic::Trial;
use tensorcost::database::{read_json_file, MatrixDescription, TensorDescription};
use tensorcost::*;

#[derive(Clone)]
struct Run {
    path: PathBuf,
    transpose: bool,
}

impl Run {
    fn run(&self) {
        let _ = env_logger::builder().is_test(true).try_init();
        let options = DescriptionOptions::default().with_transpose({
            let transpose = self.transpose;
            move |_| transpose
        });
        let mut db = TensorDatabase::default();
        let added = if self.is_tensor_file() {
            let descriptions: Vec<TensorDescription> = read_json_file(&self.path)
                .unwrap_or_else(|err| panic!("Couldn't read {:?}: {err}", self.path));
            db.add_tensors(&descriptions, &options)
        } else {
            let descriptions: Vec<MatrixDescription> = read_json_file(&self.path)
                .unwrap_or_else(|err| panic!("Couldn't read {:?}: {err}", self.path));
            db.add_matrices(&descriptions, &options)
        };
        match added {
            Ok(()) if self.should_fail() => {
                panic!("{:?} should have been rejected", self.path)
            }
            Ok(()) => self.check(&db),
            Err(err) if !self.should_fail() => panic!("Top level error: {err}"),
            Err(err) => log::info!("rejected as expected: {err}"),
        }
    }

    /// Sums out an index of every tensor, multiplies every pair of compatible
    /// matrices, and compares the estimators on the results.
    fn check(&self, db: &TensorDatabase) {
        for tensor in db.iter() {
            match tensor.bounding_box() {
                Some(bb) => {
                    for position in tensor.spp().nonzeros() {
                        let point = BoundingBox::new(position.iter().map(|&p| Range::new(p, p + 1)));
                        assert!(bb.contains(&point), "{} escapes {bb}", tensor.name());
                    }
                }
                None => assert_eq!(tensor.spp().count_nonzero(), 0),
            }
        }

        // summing out the last index of every tensor
        for tensor in db.iter().filter(|t| t.rank() >= 2) {
            let indices = &"ijklmn"[..tensor.rank()];
            let mut dag = ExprDag::default();
            let leaf = dag.leaf(tensor, indices).unwrap();
            let last = indices.chars().last().unwrap();
            let root = dag.index_sum(leaf, last).unwrap();
            self.compare_estimators(&dag, root);
        }

        let matrices: Vec<&Tensor> = db.iter().filter(|t| t.rank() == 2).collect();
        for left in &matrices {
            for right in &matrices {
                if left.shape()[1] != right.shape()[0] {
                    continue;
                }
                let mut dag = ExprDag::default();
                let l = dag.leaf(left, "ik").unwrap();
                let r = dag.leaf(right, "kj").unwrap();
                let p = dag.product(l, r, "ikj").unwrap();
                let root = dag.index_sum(p, 'k').unwrap();
                self.compare_estimators(&dag, root);
            }
        }
    }

    fn compare_estimators(&self, dag: &ExprDag, root: NodeId) {
        let shape = CostEstimator::new(ShapeCost).estimate(dag, root).unwrap();
        let bbox = CostEstimator::new(BoundingBoxCost::default())
            .estimate(dag, root)
            .unwrap();
        let mut exact = CostEstimator::new(ExactCost::default());
        let exact_cost = exact.estimate(dag, root).unwrap();
        let expr = dag.to_string(root);
        log::info!("{expr}: shape {shape}, bounding box {bbox}, exact {exact_cost}");
        assert!(shape >= bbox, "{expr}: {shape} < {bbox}");
        assert!(bbox >= exact_cost, "{expr}: {bbox} < {exact_cost}");
        assert_eq!(
            exact.model().pattern(root),
            Some(dag.eqspp(root).unwrap()),
            "{expr}"
        );
    }

    fn into_trial(self) -> Trial {
        let name = self.name().to_string();
        Trial::test(name, move || {
            self.run();
            Ok(())
        })
    }

    fn name(&self) -> impl std::fmt::Display + '_ {
        struct Wrapper<'a>(&'a Run);
        impl std::fmt::Display for Wrapper<'_> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if self.0.is_tensor_file() {
                    write!(f, "tensors/")?;
                }
                if self.0.should_fail() {
                    write!(f, "fail/")?;
                }
                let stem = self.0.path.file_stem().unwrap();
                let stem_str = stem.to_string_lossy().replace(['.', '-', ' '], "_");
                write!(f, "{stem_str}")?;
                if self.0.transpose {
                    write!(f, "_transposed")?;
                }
                Ok(())
            }
        }
        Wrapper(self)
    }

    /// Files under a `tensors` directory hold tensor descriptions, all
    /// others matrix descriptions.
    fn is_tensor_file(&self) -> bool {
        self.path.components().any(|c| c.as_os_str() == "tensors")
    }

    fn should_fail(&self) -> bool {
        self.path.parent().unwrap().ends_with("fail")
    }
}

fn generate_tests(glob: &str) -> Vec<Trial> {
    let mut trials = vec![];
    for entry in glob::glob(glob).unwrap() {
        let run = Run {
            path: entry.unwrap().clone(),
            transpose: false,
        };
        if !run.should_fail() {
            trials.push(
                Run {
                    transpose: true,
                    ..run.clone()
                }
                .into_trial(),
            );
        }
        trials.push(run.into_trial());
    }
    trials
}

fn main() {
    let args = libtest_mimic::Arguments::from_args();
    let tests = generate_tests("tests/data/**/*.json");
    // ensure all the tests have unique names
    let mut names = HashSet::new();
    for test in &tests {
        let name = test.name().to_string();
        if !names.insert(name.clone()) {
            panic!("Duplicate test name: {}", name);
        }
    }
    libtest_mimic::run(&args, tests).exit();
}
