//! Call graph construction over a structure index.
//!
//! Resolution is closed-world and best-effort: a raw call expression either
//! maps to a unit present in the current index or produces no edge at all.
//! Ambiguous names across files resolve to the first match in sorted file
//! order, a deliberate precision trade-off.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{StructureIndex, Unit, UnitId};

static CALL_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap()
});

/// Keywords and ubiquitous builtins that show up in call position but never
/// name a unit.
fn is_call_keyword(name: &str) -> bool {
    matches!(
        name,
        "if" | "for" | "while" | "return" | "print" | "super" | "isinstance" | "len"
    )
}

/// Mapping from unit id to the unit ids it calls. Edges only point at units
/// present in the index that built the graph; cycles (including direct
/// recursion) are allowed.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    edges: HashMap<UnitId, Vec<UnitId>>,
}

impl CallGraph {
    /// Build the graph for the given index. Never fails: unresolvable call
    /// expressions are dropped silently.
    pub fn build(index: &StructureIndex) -> Self {
        let mut edges: HashMap<UnitId, Vec<UnitId>> = HashMap::new();

        for unit in index.units() {
            let mut seen: HashSet<UnitId> = HashSet::new();
            let mut callees = Vec::new();

            for raw in &unit.call_targets {
                if let Some(target) = resolve_call(index, unit, raw) {
                    if seen.insert(target.clone()) {
                        callees.push(target);
                    }
                }
            }

            if !callees.is_empty() {
                edges.insert(unit.id.clone(), callees);
            }
        }

        Self { edges }
    }

    /// Resolved callees of a unit, in first-seen order. Empty when the unit
    /// has no resolved edges.
    pub fn callees(&self, id: &UnitId) -> &[UnitId] {
        self.edges.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Distinct files, other than `file` itself, that contain at least one
    /// unit with a resolved edge into `file`.
    pub fn referencing_files(&self, file: &str) -> usize {
        let mut callers: HashSet<&str> = HashSet::new();
        for (source, targets) in &self.edges {
            let source_file = match source.as_str().split_once(':') {
                Some((f, _)) => f,
                None => continue,
            };
            if source_file == file {
                continue;
            }
            if targets
                .iter()
                .any(|t| t.as_str().split_once(':').map(|(f, _)| f) == Some(file))
            {
                callers.insert(source_file);
            }
        }
        callers.len()
    }
}

/// Resolve one raw call expression found in `unit`'s body to a unit id, or
/// `None` when nothing in the index matches.
fn resolve_call(index: &StructureIndex, unit: &Unit, raw: &str) -> Option<UnitId> {
    let expr = normalize(raw)?;

    // `self.<name>` resolves inside the owning class of the same file only.
    if let Some(rest) = expr.strip_prefix("self.") {
        let class = unit.owning_class.as_deref()?;
        let id = UnitId::new(&unit.file, &format!("{}.{}", class, rest));
        return index.contains_unit(&id).then_some(id);
    }

    // Same file first, then every other file in sorted order.
    let local = UnitId::new(&unit.file, &expr);
    if index.contains_unit(&local) {
        return Some(local);
    }
    for other in index.file_paths() {
        if other == unit.file {
            continue;
        }
        let id = UnitId::new(other, &expr);
        if index.contains_unit(&id) {
            return Some(id);
        }
    }
    None
}

/// Trim a raw call expression down to its dotted-name part, rejecting
/// anything that is not a plain identifier path.
fn normalize(raw: &str) -> Option<String> {
    let name = raw.split('(').next().unwrap_or("").trim();
    if name.is_empty() || is_call_keyword(name) || !CALL_PATH_RE.is_match(name) {
        return None;
    }
    Some(name.to_string())
}
