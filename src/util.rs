use std::fmt::{self, Display};

pub(crate) type BuildHasher = std::hash::BuildHasherDefault<rustc_hash::FxHasher>;
pub(crate) type HashMap<K, V> = hashbrown::HashMap<K, V, BuildHasher>;
pub(crate) type HashSet<K> = hashbrown::HashSet<K, BuildHasher>;
pub(crate) type HEntry<'a, A, B> = hashbrown::hash_map::Entry<'a, A, B, BuildHasher>;
pub type IndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasher>;
pub type IndexSet<K> = indexmap::IndexSet<K, BuildHasher>;

/// Displays the items of a list separated by a fixed string.
pub struct ListDisplay<'a, T>(pub &'a [T], pub &'a str);

impl<T: Display> Display for ListDisplay<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(self.1)?;
            }
            write!(f, "{item}")?;
        }
        Ok(())
    }
}

/// Product of a list of extents. The empty product is 1.
pub fn volume(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Iterates over every multi-index of `shape` in column-major order
/// (first coordinate fastest).
pub(crate) struct MultiIndexIter<'a> {
    shape: &'a [usize],
    current: Vec<usize>,
    done: bool,
}

impl<'a> MultiIndexIter<'a> {
    pub(crate) fn new(shape: &'a [usize]) -> Self {
        Self {
            shape,
            current: vec![0; shape.len()],
            done: shape.iter().any(|&s| s == 0),
        }
    }
}

impl Iterator for MultiIndexIter<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        let item = self.current.clone();
        let mut dim = 0;
        loop {
            if dim == self.shape.len() {
                self.done = true;
                break;
            }
            self.current[dim] += 1;
            if self.current[dim] < self.shape[dim] {
                break;
            }
            self.current[dim] = 0;
            dim += 1;
        }
        Some(item)
    }
}
