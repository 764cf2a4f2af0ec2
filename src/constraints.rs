use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::{Field, FileIdentifier, VarMip};
use crate::frequency;

/// OR-groups per field, ANDed across fields. An empty group matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConstraintSet {
    pub variable: BTreeSet<String>,
    pub model: BTreeSet<String>,
    pub experiment: BTreeSet<String>,
    pub mip_table: BTreeSet<String>,
}

impl ConstraintSet {
    pub fn new<V, M, E, T>(variables: V, models: M, experiments: E, mip_tables: T) -> Self
    where
        V: IntoIterator<Item = String>,
        M: IntoIterator<Item = String>,
        E: IntoIterator<Item = String>,
        T: IntoIterator<Item = String>,
    {
        Self {
            variable: variables.into_iter().collect(),
            model: models.into_iter().collect(),
            experiment: experiments.into_iter().collect(),
            mip_table: mip_tables.into_iter().collect(),
        }
    }

    /// Adds the MIP tables of every frequency label to the table group.
    pub fn with_frequencies<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mip_table.extend(frequency::expand_all(labels));
        self
    }

    /// Constraints selecting the variables and tables named by compound keys.
    pub fn from_var_mips<'a, I>(keys: I) -> Self
    where
        I: IntoIterator<Item = &'a VarMip>,
    {
        let mut constraints = Self::default();
        for key in keys {
            constraints.variable.insert(key.variable.clone());
            constraints.mip_table.insert(key.mip_table.clone());
        }
        constraints
    }

    pub fn is_unconstrained(&self) -> bool {
        self.groups().iter().all(|(_, group)| group.is_empty())
    }

    fn groups(&self) -> [(Field, &BTreeSet<String>); 4] {
        [
            (Field::Variable, &self.variable),
            (Field::Model, &self.model),
            (Field::Experiment, &self.experiment),
            (Field::MipTable, &self.mip_table),
        ]
    }

    pub fn matches(&self, identifier: &FileIdentifier) -> bool {
        matches(identifier, self)
    }
}

/// True when every non-empty group contains the identifier's value for that field.
pub fn matches(identifier: &FileIdentifier, constraints: &ConstraintSet) -> bool {
    constraints
        .groups()
        .into_iter()
        .filter(|(_, group)| !group.is_empty())
        .all(|(field, group)| group.contains(identifier.field(field)))
}
