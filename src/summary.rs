//! Project-level summarization: the one-paragraph "main idea" fed back into
//! the refinement pass, and per-directory summaries for documentation-site
//! generation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::warn;
use walkdir::WalkDir;

use crate::graph::CallGraph;
use crate::llm::LlmClient;
use crate::types::{DocweaveError, Result, StructureIndex, UnitKind};

pub struct ProjectSummarizer {
    client: Arc<dyn LlmClient>,
    limiter: Arc<Semaphore>,
    sample_top_n: usize,
}

impl ProjectSummarizer {
    pub fn new(client: Arc<dyn LlmClient>, limiter: Arc<Semaphore>, sample_top_n: usize) -> Self {
        Self {
            client,
            limiter,
            sample_top_n,
        }
    }

    /// Produce the project-wide "main idea" from a bounded sample of central
    /// classes and top-level functions. Centrality is approximated by how
    /// many distinct files call into the defining file; test files are never
    /// sampled.
    pub async fn main_idea(&self, index: &StructureIndex, graph: &CallGraph) -> Result<String> {
        let mut candidates: Vec<(usize, String, String)> = Vec::new();

        for class in index.classes() {
            if is_test_path(&class.file) {
                continue;
            }
            let description = class
                .existing_docstring
                .as_deref()
                .map(first_line)
                .unwrap_or("(undocumented)");
            candidates.push((
                graph.referencing_files(&class.file),
                format!("class {}", class.name),
                description.to_string(),
            ));
        }
        for unit in index.units() {
            if unit.kind != UnitKind::Function || is_test_path(&unit.file) {
                continue;
            }
            let description = unit
                .existing_docstring
                .as_deref()
                .map(first_line)
                .unwrap_or("(undocumented)");
            candidates.push((
                graph.referencing_files(&unit.file),
                format!("function {}", unit.name),
                description.to_string(),
            ));
        }

        if candidates.is_empty() {
            return Err(DocweaveError::Llm(
                "nothing to summarize: index has no documentable units".to_string(),
            ));
        }

        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        candidates.truncate(self.sample_top_n);

        let mut prompt = String::from(
            "In two or three sentences, state the main idea of the software \
             project containing these components. Respond with plain prose, \
             no headings.\n\n",
        );
        for (_, name, description) in &candidates {
            prompt.push_str(&format!("- {}: {}\n", name, description));
        }

        let response = self.send_limited(&prompt).await?;
        Ok(response.trim().to_string())
    }

    /// One short summary per directory that owns documentable units, keyed
    /// by path relative to `root`. The walk is bottom-up and each prompt
    /// covers a directory's direct members only. Failures are logged and
    /// the directory is simply omitted.
    pub async fn module_summaries(
        &self,
        root: &Path,
        index: &StructureIndex,
    ) -> BTreeMap<String, String> {
        let mut summaries = BTreeMap::new();

        for entry in WalkDir::new(root)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
        {
            let rel_dir = match entry.path().strip_prefix(root) {
                Ok(rel) => rel.to_string_lossy().to_string(),
                Err(_) => continue,
            };
            let key = if rel_dir.is_empty() { ".".to_string() } else { rel_dir };

            let members = direct_members(index, &key);
            if members.is_empty() {
                continue;
            }

            let mut prompt = String::from(
                "In one or two sentences, summarize what this source directory \
                 is responsible for, given its members. Respond with plain \
                 prose.\n\n",
            );
            prompt.push_str(&format!("Directory: {}\n", key));
            for (name, description) in &members {
                prompt.push_str(&format!("- {}: {}\n", name, description));
            }

            match self.send_limited(&prompt).await {
                Ok(text) => {
                    summaries.insert(key, text.trim().to_string());
                }
                Err(e) => {
                    warn!(directory = %key, error = %e, "module summary failed, omitting");
                }
            }
        }

        summaries
    }

    async fn send_limited(&self, prompt: &str) -> Result<String> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| DocweaveError::Llm("request limiter closed".to_string()))?;
        self.client.send(prompt).await
    }
}

/// Units and classes defined in files directly inside `dir` (no recursion),
/// paired with the first line of their docstring.
fn direct_members(index: &StructureIndex, dir: &str) -> Vec<(String, String)> {
    let mut members = Vec::new();

    let in_dir = |file: &str| {
        let parent = Path::new(file)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        if dir == "." {
            parent.is_empty()
        } else {
            parent == dir
        }
    };

    for class in index.classes() {
        if in_dir(&class.file) {
            if let Some(doc) = &class.existing_docstring {
                members.push((format!("class {}", class.name), first_line(doc).to_string()));
            }
        }
    }
    for unit in index.units() {
        if unit.kind == UnitKind::Function && unit.owning_class.is_none() && in_dir(&unit.file) {
            if let Some(doc) = &unit.existing_docstring {
                members.push((format!("function {}", unit.name), first_line(doc).to_string()));
            }
        }
    }

    members
}

fn first_line(text: &str) -> &str {
    text.trim_start_matches(['"', '\''])
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim())
        .unwrap_or("")
}

/// Test-convention paths are excluded from main-idea sampling.
pub(crate) fn is_test_path(file: &str) -> bool {
    let path = Path::new(file);
    let in_test_dir = path
        .components()
        .any(|c| matches!(c.as_os_str().to_str(), Some("tests") | Some("test")));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    in_test_dir || name.starts_with("test_") || name.ends_with("_test.py")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileRecord, FunctionInfo};
    use async_trait::async_trait;
    use std::collections::BTreeMap as Map;

    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn send(&self, prompt: &str) -> Result<String> {
            Ok(format!("SUMMARY OF: {}", prompt))
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn send(&self, _prompt: &str) -> Result<String> {
            Err(DocweaveError::Llm("down".to_string()))
        }
    }

    fn func(name: &str, doc: Option<&str>, calls: &[&str]) -> FileRecord {
        FileRecord::Function {
            details: FunctionInfo {
                method_name: name.to_string(),
                arguments: String::new(),
                decorators: vec![],
                docstring: doc.map(|d| d.to_string()),
                source_code: format!("def {}():\n    pass", name),
                method_calls: calls.iter().map(|c| c.to_string()).collect(),
            },
        }
    }

    fn summarizer(client: Arc<dyn LlmClient>, top_n: usize) -> ProjectSummarizer {
        ProjectSummarizer::new(client, Arc::new(Semaphore::new(2)), top_n)
    }

    #[test]
    fn test_is_test_path() {
        assert!(is_test_path("tests/test_store.py"));
        assert!(is_test_path("pkg/test_api.py"));
        assert!(is_test_path("pkg/api_test.py"));
        assert!(!is_test_path("pkg/api.py"));
        assert!(!is_test_path("testing_utils.py"));
    }

    #[tokio::test]
    async fn test_main_idea_samples_central_files_and_skips_tests() {
        let mut files = Map::new();
        files.insert("core.py".to_string(), vec![func("engine", Some("Run the engine."), &[])]);
        files.insert("a.py".to_string(), vec![func("one", None, &["engine"])]);
        files.insert("b.py".to_string(), vec![func("two", None, &["engine"])]);
        files.insert(
            "tests/test_core.py".to_string(),
            vec![func("test_engine", Some("Checks the engine."), &[])],
        );
        let index = StructureIndex::from_records(files);
        let graph = CallGraph::build(&index);

        let idea = summarizer(Arc::new(EchoLlm), 2)
            .main_idea(&index, &graph)
            .await
            .unwrap();

        assert!(idea.contains("function engine"));
        assert!(idea.contains("Run the engine."));
        assert!(!idea.contains("test_engine"));
    }

    #[tokio::test]
    async fn test_main_idea_on_empty_index_is_an_error() {
        let index = StructureIndex::default();
        let graph = CallGraph::build(&index);
        let result = summarizer(Arc::new(EchoLlm), 3).main_idea(&index, &graph).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_module_summaries_cover_directories_with_documented_members() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("pkg/io.py"), "def read():\n    pass\n").unwrap();

        let mut files = Map::new();
        files.insert(
            "pkg/io.py".to_string(),
            vec![func("read", Some("Read the input file."), &[])],
        );
        let index = StructureIndex::from_records(files);

        let summaries = summarizer(Arc::new(EchoLlm), 3)
            .module_summaries(dir.path(), &index)
            .await;

        let pkg = summaries.get("pkg").expect("pkg summary present");
        assert!(pkg.contains("Read the input file."));
        assert!(!summaries.contains_key("."));
    }

    #[tokio::test]
    async fn test_module_summaries_degrade_on_client_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.py"), "def go():\n    pass\n").unwrap();

        let mut files = Map::new();
        files.insert("m.py".to_string(), vec![func("go", Some("Go."), &[])]);
        let index = StructureIndex::from_records(files);

        let summaries = summarizer(Arc::new(FailingLlm), 3)
            .module_summaries(dir.path(), &index)
            .await;

        assert!(summaries.is_empty());
    }
}
