//! The tensor registry and its construction from external descriptions.
//!
//! Construction happens in two steps. First, matrix and tensor descriptions
//! are expanded into concrete tensors ([`TensorDatabase::add_matrices`],
//! [`TensorDatabase::add_tensors`]), applying clones and transpositions.
//! Second, a [`LayoutDescription`] finalizes the database: groups get their
//! unified sparsity pattern and every declared tensor gets its memory layout
//! ([`apply_layout`]). Cost estimation only starts after finalization.
use std::io::Read;
use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    memory::MemoryLayout,
    spp::SparsityPattern,
    tensor::{EntryValue, Tensor},
    util::IndexMap,
    Error, Symbol,
};

/// Maps a description name to the names of the tensors it expands into.
pub type Clones = IndexMap<Symbol, Vec<Symbol>>;

type NamePredicate = Box<dyn Fn(&str) -> bool>;

/// How descriptions are expanded into tensors.
pub struct DescriptionOptions {
    pub clones: Clones,
    /// Whether the tensor of the given (output) name is stored transposed.
    pub transpose: NamePredicate,
    /// Whether the tensor of the given name pads its leading dimension.
    pub align_stride: NamePredicate,
}

impl Default for DescriptionOptions {
    fn default() -> Self {
        DescriptionOptions {
            clones: Clones::default(),
            transpose: Box::new(|_| false),
            align_stride: Box::new(|_| false),
        }
    }
}

impl DescriptionOptions {
    pub fn with_clone(mut self, source: &str, names: &[&str]) -> Self {
        self.clones
            .insert(source.into(), names.iter().map(|&n| n.into()).collect());
        self
    }

    pub fn with_transpose(mut self, transpose: impl Fn(&str) -> bool + 'static) -> Self {
        self.transpose = Box::new(transpose);
        self
    }

    pub fn with_align_stride(mut self, align_stride: impl Fn(&str) -> bool + 'static) -> Self {
        self.align_stride = Box::new(align_stride);
        self
    }

    fn names_for(&self, name: &str) -> Vec<Symbol> {
        self.clones
            .get(&Symbol::from(name))
            .cloned()
            .unwrap_or_else(|| vec![name.into()])
    }
}

/// One explicit entry of a matrix description, with 1-based coordinates.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MatrixEntry {
    Pattern(usize, usize),
    Flag(usize, usize, bool),
    Valued(usize, usize, f64),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MatrixDescription {
    pub name: String,
    pub rows: usize,
    pub columns: usize,
    pub entries: Vec<MatrixEntry>,
}

/// One component of a tensor entry. Integers are read as coordinates first.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EntryComponent {
    Coordinate(usize),
    Flag(bool),
    Value(f64),
}

/// A description of a tensor of arbitrary rank. Each entry lists the 1-based
/// coordinates, optionally followed by the value or a flag as in
/// [`MatrixEntry::Flag`].
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TensorDescription {
    pub name: String,
    pub shape: Vec<usize>,
    pub entries: Vec<Vec<EntryComponent>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct GroupDecl {
    pub name: String,
    #[serde(default)]
    pub no_mutual_sparsity_pattern: bool,
    pub members: Vec<String>,
}

/// Assigns a layout to a group, to every clone of a description, or to a
/// single tensor.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct LayoutDecl {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub sparse: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct LayoutDescription {
    #[serde(default)]
    pub groups: Vec<GroupDecl>,
    #[serde(default)]
    pub matrices: Vec<LayoutDecl>,
}

impl LayoutDescription {
    pub fn from_json(reader: impl Read) -> Result<Self, Error> {
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Reads a JSON file into `T`.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let file =
        std::fs::File::open(path).map_err(|err| Error::IoError(path.to_path_buf(), err))?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}

#[derive(Clone, Debug, Default)]
pub struct TensorDatabase {
    tensors: IndexMap<Symbol, Tensor>,
}

impl TensorDatabase {
    pub fn from_json_matrices(
        reader: impl Read,
        options: &DescriptionOptions,
    ) -> Result<Self, Error> {
        let descriptions: Vec<MatrixDescription> = serde_json::from_reader(reader)?;
        let mut db = TensorDatabase::default();
        db.add_matrices(&descriptions, options)?;
        Ok(db)
    }

    pub fn from_json_tensors(
        reader: impl Read,
        options: &DescriptionOptions,
    ) -> Result<Self, Error> {
        let descriptions: Vec<TensorDescription> = serde_json::from_reader(reader)?;
        let mut db = TensorDatabase::default();
        db.add_tensors(&descriptions, options)?;
        Ok(db)
    }

    pub fn insert(&mut self, tensor: Tensor) -> Result<(), Error> {
        let name = tensor.name();
        if self.tensors.contains_key(&name) {
            return Err(Error::DuplicateTensor(name));
        }
        log::debug!("Adding tensor {name} of shape {:?}", tensor.shape());
        self.tensors.insert(name, tensor);
        Ok(())
    }

    pub fn add_matrices(
        &mut self,
        descriptions: &[MatrixDescription],
        options: &DescriptionOptions,
    ) -> Result<(), Error> {
        for description in descriptions {
            for tensor in process_matrix(description, options)? {
                self.insert(tensor)?;
            }
        }
        Ok(())
    }

    pub fn add_tensors(
        &mut self,
        descriptions: &[TensorDescription],
        options: &DescriptionOptions,
    ) -> Result<(), Error> {
        for description in descriptions {
            for tensor in process_tensor(description, options)? {
                self.insert(tensor)?;
            }
        }
        Ok(())
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.tensors.contains_key(&Symbol::from(name))
    }

    pub fn by_name(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(&Symbol::from(name))
    }

    /// Like [`TensorDatabase::by_name`], but unknown names are an error.
    pub fn get(&self, name: &str) -> Result<&Tensor, Error> {
        self.by_name(name)
            .ok_or_else(|| Error::UnrecognizedTensorName(name.to_owned()))
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Tensor, Error> {
        self.tensors
            .get_mut(&Symbol::from(name))
            .ok_or_else(|| Error::UnrecognizedTensorName(name.to_owned()))
    }

    /// The members `base[0]`, `base[1]`, ... of an indexed family, ordered by
    /// their index.
    pub fn family(&self, base: &str) -> Vec<&Tensor> {
        let base = Symbol::from(base);
        let mut members: Vec<&Tensor> = self
            .tensors
            .values()
            .filter(|t| t.tensor_name().base == base && t.tensor_name().index.is_some())
            .collect();
        members.sort_by_key(|t| t.tensor_name().index);
        members
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tensor> {
        self.tensors.values()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

fn coordinate(name: &str, value: usize, extent: usize) -> Result<usize, Error> {
    if value == 0 || value > extent {
        return Err(Error::InvalidEntry {
            tensor: Some(name.into()),
            reason: format!("coordinate {value} is outside of 1..={extent}"),
        });
    }
    Ok(value - 1)
}

fn process_matrix(
    description: &MatrixDescription,
    options: &DescriptionOptions,
) -> Result<Vec<Tensor>, Error> {
    let name = description.name.as_str();
    let mut matrix = IndexMap::<[usize; 2], EntryValue>::default();
    for entry in &description.entries {
        let (row, col, value) = match *entry {
            MatrixEntry::Pattern(row, col) | MatrixEntry::Flag(row, col, true) => {
                (row, col, EntryValue::Nonzero)
            }
            MatrixEntry::Flag(_, _, false) => continue,
            MatrixEntry::Valued(row, col, value) => (row, col, EntryValue::Value(value)),
        };
        let row = coordinate(name, row, description.rows)?;
        let col = coordinate(name, col, description.columns)?;
        matrix.insert([row, col], value);
    }

    let mut tensors = vec![];
    for clone in options.names_for(name) {
        let transpose = (options.transpose)(clone.as_str());
        let mut shape = if transpose {
            vec![description.columns, description.rows]
        } else {
            vec![description.rows, description.columns]
        };
        let mut values: IndexMap<Vec<usize>, EntryValue> = matrix
            .iter()
            .map(|(&[row, col], &value)| {
                let position = if transpose { vec![col, row] } else { vec![row, col] };
                (position, value)
            })
            .collect();
        if shape[1] == 1 {
            shape.truncate(1);
            values = values
                .into_iter()
                .map(|(position, value)| (vec![position[0]], value))
                .collect();
        }
        tensors.push(Tensor::new(
            clone.as_str(),
            &shape,
            Some(values),
            (options.align_stride)(clone.as_str()),
        )?);
    }
    Ok(tensors)
}

fn process_tensor(
    description: &TensorDescription,
    options: &DescriptionOptions,
) -> Result<Vec<Tensor>, Error> {
    let name = description.name.as_str();
    let rank = description.shape.len();
    let mut tensor = IndexMap::<Vec<usize>, EntryValue>::default();
    for entry in &description.entries {
        let invalid = |reason: String| Error::InvalidEntry {
            tensor: Some(name.into()),
            reason,
        };
        let value = match entry.get(rank..) {
            Some([]) => EntryValue::Nonzero,
            Some([EntryComponent::Flag(true)]) => EntryValue::Nonzero,
            Some([EntryComponent::Flag(false)]) => continue,
            Some([EntryComponent::Value(value)]) => EntryValue::Value(*value),
            Some([EntryComponent::Coordinate(value)]) => EntryValue::Value(*value as f64),
            _ => {
                return Err(invalid(format!(
                    "entry has {} components, expected {rank} or {}",
                    entry.len(),
                    rank + 1
                )))
            }
        };
        let mut position = Vec::with_capacity(rank);
        for (component, &extent) in entry.iter().zip(&description.shape) {
            let EntryComponent::Coordinate(c) = *component else {
                return Err(invalid(format!("coordinate {component:?} is not a positive integer")));
            };
            position.push(coordinate(name, c, extent)?);
        }
        tensor.insert(position, value);
    }

    let mut tensors = vec![];
    for clone in options.names_for(name) {
        let transpose = (options.transpose)(clone.as_str()) && rank >= 2;
        let mut shape = description.shape.clone();
        let values = if transpose {
            shape.swap(0, 1);
            tensor
                .iter()
                .map(|(position, &value)| {
                    let mut position = position.clone();
                    position.swap(0, 1);
                    (position, value)
                })
                .collect()
        } else {
            tensor.clone()
        };
        tensors.push(Tensor::new(
            clone.as_str(),
            &shape,
            Some(values),
            (options.align_stride)(clone.as_str()),
        )?);
    }
    Ok(tensors)
}

/// Forces the tensors named in `members` to share one sparsity pattern: the
/// union of every member's own pattern. Returns the unified pattern.
///
/// The union is always taken over the members' own patterns, so unifying an
/// already unified group yields the same pattern again.
pub fn unify_group<S: AsRef<str>>(
    db: &mut TensorDatabase,
    members: &[S],
) -> Result<Option<SparsityPattern>, Error> {
    let mut unified: Option<SparsityPattern> = None;
    let mut previous: Option<&Tensor> = None;
    for member in members {
        let tensor = db.get(member.as_ref())?;
        if let Some(previous) = previous {
            if previous.shape() != tensor.shape() {
                return Err(Error::GroupShapeMismatch(tensor.name(), previous.name()));
            }
        }
        unified = Some(match unified {
            None => tensor.own_spp().clone(),
            Some(spp) => spp.union(tensor.own_spp())?,
        });
        previous = Some(tensor);
    }
    if let Some(spp) = &unified {
        for member in members {
            db.get_mut(member.as_ref())?.set_group_spp(spp.clone())?;
        }
    }
    Ok(unified)
}

/// Finalizes `db`: unifies the sparsity pattern of every group and assigns
/// the declared memory layouts. Any reference to an unknown tensor, group,
/// or clone aborts with [`Error::UnrecognizedTensorName`].
pub fn apply_layout(
    db: &mut TensorDatabase,
    layout: &LayoutDescription,
    clones: &Clones,
) -> Result<(), Error> {
    let mut groups = IndexMap::<&str, &[String]>::default();
    for group in &layout.groups {
        for member in &group.members {
            if !db.contains_name(member) {
                return Err(Error::UnrecognizedTensorName(member.clone()));
            }
        }
        if group.no_mutual_sparsity_pattern {
            let mut members = group.members.iter();
            if let Some(first) = members.next() {
                let first = db.get(first)?;
                for member in members {
                    let tensor = db.get(member)?;
                    if tensor.shape() != first.shape() {
                        return Err(Error::GroupShapeMismatch(tensor.name(), first.name()));
                    }
                }
            }
        } else if let Some(spp) = unify_group(db, &group.members)? {
            log::info!(
                "Group {} shares a pattern with {} nonzeros across {} tensors",
                group.name,
                spp.count_nonzero(),
                group.members.len()
            );
        }
        groups.insert(group.name.as_str(), group.members.as_slice());
    }

    for decl in &layout.matrices {
        let names: Vec<String> = match (&decl.group, &decl.name) {
            (Some(group), _) if groups.contains_key(group.as_str()) => {
                groups[group.as_str()].to_vec()
            }
            (_, Some(name)) if clones.contains_key(&Symbol::from(name.as_str())) => clones
                [&Symbol::from(name.as_str())]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            (_, Some(name)) if db.contains_name(name) => vec![name.clone()],
            (group, name) => {
                let unknown = name.as_ref().or(group.as_ref()).cloned().unwrap_or_default();
                return Err(Error::UnrecognizedTensorName(unknown));
            }
        };
        for name in &names {
            let tensor = db.get_mut(name)?;
            let layout = if decl.sparse {
                MemoryLayout::csc(tensor.name(), tensor.spp())?
            } else {
                MemoryLayout::dense(tensor.shape(), tensor.memory_layout().align_stride())
            };
            log::debug!("Tensor {name} uses a {} layout", layout.kind());
            tensor.set_memory_layout(layout);
        }
    }
    log::info!("Finalized tensor database with {} tensors", db.len());
    Ok(())
}
