//! Column schema: ordered names, unique under case-insensitive comparison.

use std::collections::{HashMap, HashSet};

use crate::{CsvError, CsvResult};

/// The ordered, uniquely-named column set agreed between header and body
/// (reader) or supplied before the first row (writer).
#[derive(Debug, Default, Clone)]
pub struct Schema {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> CsvResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut schema = Self::new();
        for name in names {
            schema.push(name)?;
        }
        Ok(schema)
    }

    /// Appends a column, rejecting a duplicate of any existing name
    /// (case-insensitive).
    pub fn push(&mut self, name: impl Into<String>) -> CsvResult<()> {
        let name = name.into();
        let key = name.to_lowercase();
        if self.index.contains_key(&key) {
            return Err(CsvError::DuplicateColumn(name));
        }
        self.index.insert(key, self.names.len());
        self.names.push(name);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Position of `name`, compared case-insensitively.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.index.get(&name.to_lowercase()).copied()
    }

    /// Validates a requested subset/order of columns against the full set and
    /// returns their positions. Unknown or repeated requested names are fatal;
    /// this runs before any row is written.
    pub fn select<S: AsRef<str>>(&self, requested: &[S]) -> CsvResult<Vec<usize>> {
        let mut seen = HashSet::with_capacity(requested.len());
        let mut positions = Vec::with_capacity(requested.len());
        for name in requested {
            let name = name.as_ref();
            let Some(idx) = self.lookup(name) else {
                return Err(CsvError::UnknownColumn(name.to_string()));
            };
            if !seen.insert(idx) {
                return Err(CsvError::DuplicateColumn(name.to_string()));
            }
            positions.push(idx);
        }
        Ok(positions)
    }
}
