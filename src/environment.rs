use std::sync::{Arc, Mutex};

use indexmap::{IndexMap, IndexSet};

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind},
    value::Value,
};

pub type EnvironmentRef = Arc<Mutex<Environment>>;

#[derive(Clone)]
pub struct Entry {
    pub value: Value,
    pub reference_count: u32,
}

#[derive(Default)]
pub struct Environment {
    entries: IndexMap<String, Entry>,
    deleted: IndexSet<String>,
}

impl Environment {
    pub fn new() -> EnvironmentRef {
        Arc::new(Mutex::new(Self::default()))
    }

    // Reallocating a deleted name clears its deleted mark.
    pub fn allocate(&mut self, name: &str, value: Value) {
        if self.deleted.swap_remove(name) {
            self.entries.insert(
                name.to_string(),
                Entry {
                    value,
                    reference_count: 1,
                },
            );
            return;
        }
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.value = value;
                entry.reference_count += 1;
            }
            None => {
                self.entries.insert(
                    name.to_string(),
                    Entry {
                        value,
                        reference_count: 1,
                    },
                );
            }
        }
    }

    pub fn deallocate(&mut self, name: &str) -> Result<(), Diagnostic> {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.reference_count = entry.reference_count.saturating_sub(1);
                if entry.reference_count == 0 {
                    self.entries.swap_remove(name);
                    self.deleted.insert(name.to_string());
                }
                Ok(())
            }
            None => Err(Diagnostic::new(
                DiagnosticKind::UndefinedReference,
                format!("variable `{name}` is not defined and cannot be freed"),
            )),
        }
    }

    pub fn get(&self, name: &str) -> Result<Value, Diagnostic> {
        if self.deleted.contains(name) {
            return Err(Diagnostic::new(
                DiagnosticKind::UndefinedReference,
                format!("variable `{name}` has been deleted"),
            ));
        }
        self.entries
            .get(name)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| {
                Diagnostic::new(
                    DiagnosticKind::UndefinedReference,
                    format!("undefined variable `{name}`"),
                )
            })
    }

    pub fn update(&mut self, name: &str, value: Value) -> Result<(), Diagnostic> {
        if self.deleted.contains(name) {
            return Err(Diagnostic::new(
                DiagnosticKind::UndefinedReference,
                format!("variable `{name}` has been deleted"),
            ));
        }
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.value = value;
                Ok(())
            }
            None => Err(Diagnostic::new(
                DiagnosticKind::UndefinedReference,
                format!("undefined variable `{name}`"),
            )),
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        !self.deleted.contains(name) && self.entries.contains_key(name)
    }

    pub fn reference_count(&self, name: &str) -> Option<u32> {
        self.entries.get(name).map(|entry| entry.reference_count)
    }

    pub fn run_gc(&mut self) {
        let dead: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.reference_count == 0)
            .map(|(name, _)| name.clone())
            .collect();
        for name in dead {
            self.entries.swap_remove(&name);
            self.deleted.insert(name);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: self.entries.clone(),
            deleted: self.deleted.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: Snapshot) {
        self.entries = snapshot.entries;
        self.deleted = snapshot.deleted;
    }
}

pub struct Snapshot {
    entries: IndexMap<String, Entry>,
    deleted: IndexSet<String>,
}
