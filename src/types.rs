use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// Create our own Result type alias for the crate
pub type Result<T> = std::result::Result<T, DocweaveError>;

#[derive(Debug, Error)]
pub enum DocweaveError {
    #[error("structural extractor failed: {0}")]
    Extractor(String),

    #[error("LLM request failed: {0}")]
    Llm(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl DocweaveError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// One parsed function or method as delivered by the structural extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub method_name: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub decorators: Vec<String>,
    #[serde(default)]
    pub docstring: Option<String>,
    pub source_code: String,
    #[serde(default)]
    pub method_calls: Vec<String>,
}

/// One top-level record in a parsed file: a class with its methods, or a
/// free function. The `type` tag comes straight off the extractor's wire
/// format and is matched exhaustively wherever records are processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileRecord {
    Class {
        name: String,
        #[serde(default)]
        docstring: Option<String>,
        #[serde(default)]
        attributes: Vec<String>,
        methods: Vec<FunctionInfo>,
    },
    Function {
        details: FunctionInfo,
    },
}

/// Composite key for a documentable unit: `<file path>:<qualified name>`,
/// e.g. `pkg/store.py:Store.get` or `pkg/util.py:flatten`. Stable across
/// re-indexes as long as the unit keeps its location and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(file: &str, qualified_name: &str) -> Self {
        Self(format!("{}:{}", file, qualified_name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Function,
    Method,
}

/// A documentable function or method, flattened out of the file records.
/// Units are rebuilt from scratch on every re-index and never persisted.
#[derive(Debug, Clone)]
pub struct Unit {
    pub id: UnitId,
    pub kind: UnitKind,
    pub file: String,
    pub name: String,
    pub owning_class: Option<String>,
    pub source_text: String,
    pub arguments: String,
    pub decorators: Vec<String>,
    pub existing_docstring: Option<String>,
    pub call_targets: Vec<String>,
    /// (record index, member index) within the file; used to apply
    /// mutations in source order.
    pub position: (usize, usize),
}

/// A class with its attribute names and ordered member units.
#[derive(Debug, Clone)]
pub struct ClassRecord {
    pub id: UnitId,
    pub file: String,
    pub name: String,
    pub existing_docstring: Option<String>,
    pub attributes: Vec<String>,
    pub members: Vec<UnitId>,
    pub position: (usize, usize),
}

/// Which scheduler pass a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Leaf,
    Class,
    Refinement,
}

impl PassKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassKind::Leaf => "leaf",
            PassKind::Class => "class",
            PassKind::Refinement => "refinement",
        }
    }
}

/// Ephemeral work item owned by the scheduler for the duration of one pass.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub id: UnitId,
    pub kind: JobKind,
    pub pass: PassKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Unit,
    Class,
}

/// Where in a file a generated docstring should land.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationTarget {
    Function {
        name: String,
        owning_class: Option<String>,
    },
    Class {
        name: String,
    },
}

/// Output of one synthesis call, handed to the mutator and then dropped.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub unit_id: UnitId,
    pub file: String,
    pub raw_model_text: String,
    pub docstring: String,
    pub target: MutationTarget,
    pub position: (usize, usize),
}

/// Immutable snapshot of the parsed source tree for one pass. Rebuilt whole
/// after each pass because mutation shifts line numbers and call text.
///
/// Files are keyed in a `BTreeMap` so every iteration over the index is in
/// sorted path order; call resolution relies on that for determinism.
#[derive(Debug, Clone, Default)]
pub struct StructureIndex {
    files: BTreeMap<String, Vec<FileRecord>>,
    units: BTreeMap<UnitId, Unit>,
    classes: Vec<ClassRecord>,
}

impl StructureIndex {
    pub fn from_records(files: BTreeMap<String, Vec<FileRecord>>) -> Self {
        let mut units = BTreeMap::new();
        let mut classes = Vec::new();

        for (file, records) in &files {
            for (record_idx, record) in records.iter().enumerate() {
                match record {
                    FileRecord::Class {
                        name,
                        docstring,
                        attributes,
                        methods,
                    } => {
                        let mut members = Vec::with_capacity(methods.len());
                        for (member_idx, info) in methods.iter().enumerate() {
                            let unit = Unit {
                                id: UnitId::new(file, &format!("{}.{}", name, info.method_name)),
                                kind: UnitKind::Method,
                                file: file.clone(),
                                name: info.method_name.clone(),
                                owning_class: Some(name.clone()),
                                source_text: info.source_code.clone(),
                                arguments: info.arguments.clone(),
                                decorators: info.decorators.clone(),
                                existing_docstring: info.docstring.clone(),
                                call_targets: info.method_calls.clone(),
                                position: (record_idx, member_idx + 1),
                            };
                            members.push(unit.id.clone());
                            units.insert(unit.id.clone(), unit);
                        }
                        classes.push(ClassRecord {
                            id: UnitId::new(file, name),
                            file: file.clone(),
                            name: name.clone(),
                            existing_docstring: docstring.clone(),
                            attributes: attributes.clone(),
                            members,
                            position: (record_idx, 0),
                        });
                    }
                    FileRecord::Function { details } => {
                        let unit = Unit {
                            id: UnitId::new(file, &details.method_name),
                            kind: UnitKind::Function,
                            file: file.clone(),
                            name: details.method_name.clone(),
                            owning_class: None,
                            source_text: details.source_code.clone(),
                            arguments: details.arguments.clone(),
                            decorators: details.decorators.clone(),
                            existing_docstring: details.docstring.clone(),
                            call_targets: details.method_calls.clone(),
                            position: (record_idx, 0),
                        };
                        units.insert(unit.id.clone(), unit);
                    }
                }
            }
        }

        Self {
            files,
            units,
            classes,
        }
    }

    /// File paths in sorted order.
    pub fn file_paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|s| s.as_str())
    }

    pub fn unit(&self, id: &UnitId) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn contains_unit(&self, id: &UnitId) -> bool {
        self.units.contains_key(id)
    }

    /// All units in sorted id order.
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn classes(&self) -> &[ClassRecord] {
        &self.classes
    }

    pub fn class(&self, id: &UnitId) -> Option<&ClassRecord> {
        self.classes.iter().find(|c| &c.id == id)
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty() && self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function_info(name: &str) -> FunctionInfo {
        FunctionInfo {
            method_name: name.to_string(),
            arguments: "self".to_string(),
            decorators: vec![],
            docstring: None,
            source_code: format!("def {}(self):\n    pass", name),
            method_calls: vec![],
        }
    }

    #[test]
    fn test_unit_id_format() {
        let id = UnitId::new("pkg/store.py", "Store.get");
        assert_eq!(id.as_str(), "pkg/store.py:Store.get");
        assert_eq!(id.to_string(), "pkg/store.py:Store.get");
    }

    #[test]
    fn test_parse_wire_records() {
        let payload = r#"
        {
            "app.py": [
                {
                    "type": "class",
                    "name": "Indexer",
                    "docstring": null,
                    "attributes": ["root", "cache"],
                    "methods": [
                        {
                            "method_name": "scan",
                            "arguments": "self, path",
                            "decorators": [],
                            "docstring": null,
                            "source_code": "def scan(self, path):\n    return walk(path)",
                            "method_calls": ["walk"]
                        }
                    ]
                },
                {
                    "type": "function",
                    "details": {
                        "method_name": "walk",
                        "arguments": "path",
                        "docstring": "Walk a tree.",
                        "source_code": "def walk(path):\n    ...",
                        "method_calls": []
                    }
                }
            ]
        }"#;

        let files: BTreeMap<String, Vec<FileRecord>> = serde_json::from_str(payload).unwrap();
        let index = StructureIndex::from_records(files);

        assert_eq!(index.unit_count(), 2);
        assert_eq!(index.class_count(), 1);

        let scan = index.unit(&UnitId::new("app.py", "Indexer.scan")).unwrap();
        assert_eq!(scan.kind, UnitKind::Method);
        assert_eq!(scan.owning_class.as_deref(), Some("Indexer"));
        assert_eq!(scan.call_targets, vec!["walk".to_string()]);
        assert!(scan.existing_docstring.is_none());

        let walk = index.unit(&UnitId::new("app.py", "walk")).unwrap();
        assert_eq!(walk.kind, UnitKind::Function);
        assert_eq!(walk.existing_docstring.as_deref(), Some("Walk a tree."));

        let class = &index.classes()[0];
        assert_eq!(class.name, "Indexer");
        assert_eq!(class.attributes, vec!["root".to_string(), "cache".to_string()]);
        assert_eq!(class.members, vec![UnitId::new("app.py", "Indexer.scan")]);
    }

    #[test]
    fn test_positions_follow_source_order() {
        let mut files = BTreeMap::new();
        files.insert(
            "m.py".to_string(),
            vec![
                FileRecord::Function {
                    details: function_info("first"),
                },
                FileRecord::Class {
                    name: "C".to_string(),
                    docstring: None,
                    attributes: vec![],
                    methods: vec![function_info("a"), function_info("b")],
                },
            ],
        );
        let index = StructureIndex::from_records(files);

        assert_eq!(index.unit(&UnitId::new("m.py", "first")).unwrap().position, (0, 0));
        assert_eq!(index.classes()[0].position, (1, 0));
        assert_eq!(index.unit(&UnitId::new("m.py", "C.a")).unwrap().position, (1, 1));
        assert_eq!(index.unit(&UnitId::new("m.py", "C.b")).unwrap().position, (1, 2));
    }

    #[test]
    fn test_file_paths_sorted() {
        let mut files = BTreeMap::new();
        for name in ["z.py", "a.py", "m.py"] {
            files.insert(name.to_string(), vec![]);
        }
        let index = StructureIndex::from_records(files);
        let paths: Vec<&str> = index.file_paths().collect();
        assert_eq!(paths, vec!["a.py", "m.py", "z.py"]);
    }

    #[test]
    fn test_empty_index() {
        let index = StructureIndex::default();
        assert!(index.is_empty());
        assert_eq!(index.unit_count(), 0);
        assert_eq!(index.class_count(), 0);
    }
}
