//! Parameter Manager.
//!
//! Collects the `@name` parameters a statement needs from every scope that
//! declares them and decides which declaration wins:
//!
//! ```text
//! Filter < TableInfo < QueryLevel < CompositeQueryLevel < Global
//! ```
//!
//! When a subquery is folded into a parent statement its parameters are
//! imported into the parent manager. Names that collide with a different
//! definition are renamed `<name>_<n>`; the returned [`RenameMap`] is applied
//! to the subquery's fragments, which only rewrites placeholders parsed in
//! the subquery's scope.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::error::{QueryBuildingError, QueryResult};
use crate::model::{ParameterLevel, SqlParameter};
use crate::sql::{RenameMap, ScopeId};

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

fn next_scope() -> ScopeId {
    NEXT_SCOPE.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone)]
pub struct ParameterManager {
    scope: ScopeId,
    entries: Vec<(ParameterLevel, SqlParameter)>,
}

impl Default for ParameterManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterManager {
    pub fn new() -> Self {
        Self {
            scope: next_scope(),
            entries: Vec::new(),
        }
    }

    /// A manager pre-loaded with global parameters.
    pub fn with_globals(globals: &[SqlParameter]) -> QueryResult<Self> {
        let mut manager = Self::new();
        manager.add_globals(globals)?;
        Ok(manager)
    }

    /// Scope that placeholders parsed for this manager are tagged with.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// An independent copy of the declarations under a fresh scope.
    pub fn clone_manager(&self) -> Self {
        Self {
            scope: next_scope(),
            entries: self.entries.clone(),
        }
    }

    pub fn add_parameter(&mut self, parameter: SqlParameter, level: ParameterLevel) -> QueryResult<()> {
        let existing = self
            .entries
            .iter()
            .find(|(l, p)| *l == level && p.name == parameter.name);

        match existing {
            Some((_, p)) if p.is_equivalent(&parameter) => Ok(()),
            Some((_, p)) => Err(QueryBuildingError::ParameterConflict {
                name: parameter.name.clone(),
                first: describe(p),
                second: describe(&parameter),
            }),
            None => {
                self.entries.push((level, parameter));
                Ok(())
            }
        }
    }

    /// Register everything a table, filter or query declares at `level`.
    pub fn add_parameters_for<'a, I>(&mut self, parameters: I, level: ParameterLevel) -> QueryResult<()>
    where
        I: IntoIterator<Item = &'a SqlParameter>,
    {
        for p in parameters {
            self.add_parameter(p.clone(), level)?;
        }
        Ok(())
    }

    pub fn add_globals(&mut self, globals: &[SqlParameter]) -> QueryResult<()> {
        self.add_parameters_for(globals, ParameterLevel::Global)
    }

    /// The declaration that wins for `name`.
    pub fn resolve(&self, name: &str) -> Option<&SqlParameter> {
        self.resolve_entry(name).map(|(_, p)| p)
    }

    fn resolve_entry(&self, name: &str) -> Option<(ParameterLevel, &SqlParameter)> {
        self.entries
            .iter()
            .filter(|(_, p)| p.name == name)
            .max_by_key(|(l, _)| *l)
            .map(|(l, p)| (*l, p))
    }

    fn final_entries(&self) -> Vec<(ParameterLevel, &SqlParameter)> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|(_, p)| seen.insert(p.name.as_str()))
            .filter_map(|(_, p)| self.resolve_entry(&p.name))
            .collect()
    }

    /// One declaration per name, in the order names were first registered.
    pub fn final_parameters(&self) -> Vec<SqlParameter> {
        self.final_entries()
            .into_iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear_non_globals(&mut self) {
        self.entries.retain(|(l, _)| *l == ParameterLevel::Global);
    }

    /// Fold a subquery's resolved parameters into this manager.
    ///
    /// - a name declared here as a global binds to the global
    /// - an equivalent declaration already here is reused
    /// - anything else is added at `CompositeQueryLevel`, renamed to the
    ///   first free `<name>_<n>` (n >= 2) when the name is taken
    pub fn import_and_elevate(&mut self, child: &ParameterManager) -> QueryResult<RenameMap> {
        let mut renames = RenameMap::new(child.scope, self.scope);
        let child_names: HashSet<&str> = child.entries.iter().map(|(_, p)| p.name.as_str()).collect();

        for (child_level, p) in child.final_entries() {
            let level = child_level.max(ParameterLevel::CompositeQueryLevel);

            match self.resolve_entry(&p.name) {
                Some((ParameterLevel::Global, _)) => {}
                Some((_, existing)) if existing.is_equivalent(p) => {}
                None => self.entries.push((level, p.clone())),
                Some(_) => {
                    let mut n = 2;
                    let new_name = loop {
                        let candidate = format!("{}_{}", p.name, n);
                        match self.resolve(&candidate) {
                            Some(existing) if existing.is_equivalent(p) => break candidate,
                            None if !child_names.contains(candidate.as_str()) => {
                                self.entries.push((level, p.renamed(&candidate)));
                                break candidate;
                            }
                            _ => n += 1,
                        }
                    };
                    debug!(parameter = %p.name, renamed = %new_name, "renamed colliding parameter");
                    renames.insert(p.name.clone(), new_name);
                }
            }
        }

        Ok(renames)
    }
}

fn describe(p: &SqlParameter) -> String {
    format!("{} = {}", p.data_type, p.value)
}
