//! Docstring synthesis: prompt assembly, rate-limited LLM calls, and
//! extraction of a well-formed docstring from a possibly malformed response.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::graph::CallGraph;
use crate::llm::LlmClient;
use crate::types::{
    ClassRecord, DocweaveError, MutationTarget, Result, StructureIndex, SynthesisResult, Unit,
};

const DELIM: &str = "\"\"\"";

/// Inserted when a model response yields no recoverable docstring. The fixed
/// text makes these easy to grep for after a run.
pub const PLACEHOLDER_DOCSTRING: &str =
    "\"\"\"Documentation unavailable (model response could not be parsed).\"\"\"";

/// Responses without delimiters shorter than this are junk, not a docstring.
const MIN_PLAUSIBLE_LEN: usize = 40;

/// Cap on callee source embedded as prompt context, in characters.
const CALLEE_CONTEXT_BUDGET: usize = 4_000;

static DEF_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(async\s+)?def\s+.*:\s*$").unwrap());

pub struct Synthesizer {
    client: Arc<dyn LlmClient>,
    limiter: Arc<Semaphore>,
}

impl Synthesizer {
    pub fn new(client: Arc<dyn LlmClient>, rate_limit: usize) -> Self {
        Self {
            client,
            limiter: Arc::new(Semaphore::new(rate_limit.max(1))),
        }
    }

    /// The limiter is shared with every other component that talks to the
    /// model, so one configured rate bounds the whole run.
    pub fn limiter(&self) -> Arc<Semaphore> {
        Arc::clone(&self.limiter)
    }

    /// Generate a docstring for one function or method.
    pub async fn synthesize_unit(
        &self,
        unit: &Unit,
        index: &StructureIndex,
        graph: &CallGraph,
        main_idea: Option<&str>,
    ) -> Result<SynthesisResult> {
        let prompt = unit_prompt(unit, index, graph, main_idea);
        let raw = self.send_limited(&prompt).await?;
        debug!(unit = %unit.id, bytes = raw.len(), "model response received");

        Ok(SynthesisResult {
            unit_id: unit.id.clone(),
            file: unit.file.clone(),
            docstring: extract_docstring(&raw),
            raw_model_text: raw,
            target: MutationTarget::Function {
                name: unit.name.clone(),
                owning_class: unit.owning_class.clone(),
            },
            position: unit.position,
        })
    }

    /// Generate a docstring for a class from its attributes and its members'
    /// already-generated docstrings. Member source is not re-embedded.
    pub async fn synthesize_class(
        &self,
        class: &ClassRecord,
        index: &StructureIndex,
        main_idea: Option<&str>,
    ) -> Result<SynthesisResult> {
        let prompt = class_prompt(class, index, main_idea);
        let raw = self.send_limited(&prompt).await?;
        debug!(class = %class.id, bytes = raw.len(), "model response received");

        Ok(SynthesisResult {
            unit_id: class.id.clone(),
            file: class.file.clone(),
            docstring: extract_docstring(&raw),
            raw_model_text: raw,
            target: MutationTarget::Class {
                name: class.name.clone(),
            },
            position: class.position,
        })
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

fn unit_prompt(
    unit: &Unit,
    index: &StructureIndex,
    graph: &CallGraph,
    main_idea: Option<&str>,
) -> String {
    let mut prompt = String::from(
        "You write Python docstrings. Write one docstring for the function below, \
         describing what it does, its arguments, and its return value. \
         Respond with the docstring only, wrapped in triple double-quotes.\n\n",
    );

    prompt.push_str(&format!("Function: {}\n", unit.name));
    if let Some(class) = &unit.owning_class {
        prompt.push_str(&format!("Method of class: {}\n", class));
    }
    if !unit.arguments.is_empty() {
        prompt.push_str(&format!("Arguments: {}\n", unit.arguments));
    }
    for decorator in &unit.decorators {
        prompt.push_str(&format!("Decorator: @{}\n", decorator));
    }
    prompt.push_str(&format!("\nSource:\n{}\n", unit.source_text));

    let mut budget = CALLEE_CONTEXT_BUDGET;
    let mut wrote_header = false;
    for callee_id in graph.callees(&unit.id) {
        if callee_id == &unit.id {
            continue;
        }
        let Some(callee) = index.unit(callee_id) else {
            continue;
        };
        if callee.source_text.len() > budget {
            break;
        }
        if !wrote_header {
            prompt.push_str("\nContext, the definitions of functions this one calls:\n");
            wrote_header = true;
        }
        prompt.push_str(&format!("\n{}\n", callee.source_text));
        budget -= callee.source_text.len();
    }

    if let Some(idea) = main_idea {
        prompt.push_str(&format!(
            "\nThe project this function belongs to: {}\n\
             Keep the docstring consistent with that description.\n",
            idea
        ));
    }

    prompt
}

fn class_prompt(class: &ClassRecord, index: &StructureIndex, main_idea: Option<&str>) -> String {
    let mut prompt = String::from(
        "You write Python docstrings. Write one class-level docstring for the \
         class described below, summarizing its purpose and responsibilities. \
         Respond with the docstring only, wrapped in triple double-quotes.\n\n",
    );

    prompt.push_str(&format!("Class: {}\n", class.name));
    if !class.attributes.is_empty() {
        prompt.push_str(&format!("Attributes: {}\n", class.attributes.join(", ")));
    }

    prompt.push_str("\nMethods and their docstrings:\n");
    for member_id in &class.members {
        let Some(member) = index.unit(member_id) else {
            continue;
        };
        match &member.existing_docstring {
            Some(doc) => prompt.push_str(&format!("- {}: {}\n", member.name, doc.trim())),
            None => prompt.push_str(&format!("- {}: (undocumented)\n", member.name)),
        }
    }

    if let Some(idea) = main_idea {
        prompt.push_str(&format!(
            "\nThe project this class belongs to: {}\n\
             Keep the docstring consistent with that description.\n",
            idea
        ));
    }

    prompt
}

/// Pull a well-formed `"""` docstring out of a raw model response.
///
/// Tolerates the malformed shapes models actually produce: a closing code
/// fence where the closing triple-quote should be, an echoed `def` line
/// inside the delimiters, or no delimiters at all. Always returns something
/// insertable; irrecoverable responses become [`PLACEHOLDER_DOCSTRING`].
pub fn extract_docstring(raw: &str) -> String {
    if let Some(open) = raw.find(DELIM) {
        let after = &raw[open + DELIM.len()..];

        if let Some(close) = after.find(DELIM) {
            return wrap(strip_signature_lines(&after[..close]));
        }

        // No closing triple-quote: a stray code fence soon after the opening
        // delimiter is treated as a mistaken substitute for it.
        if let Some(fence) = after.find("```") {
            return wrap(strip_signature_lines(&after[..fence]));
        }

        let rest = strip_signature_lines(after);
        if rest.trim().len() >= MIN_PLAUSIBLE_LEN {
            return wrap(ensure_trailing_newline(rest.trim_end().to_string()));
        }
        return PLACEHOLDER_DOCSTRING.to_string();
    }

    let trimmed = raw.trim();
    if trimmed.len() >= MIN_PLAUSIBLE_LEN {
        return wrap(ensure_trailing_newline(trimmed.to_string()));
    }
    PLACEHOLDER_DOCSTRING.to_string()
}

fn wrap(content: String) -> String {
    format!("{}{}{}", DELIM, content, DELIM)
}

fn ensure_trailing_newline(mut content: String) -> String {
    if !content.ends_with('\n') {
        content.push('\n');
    }
    content
}

/// Drop leading lines that echo a `def ...:` signature.
fn strip_signature_lines(content: &str) -> String {
    let mut rest = content;
    loop {
        let line_end = rest.find('\n').map(|i| i + 1).unwrap_or(rest.len());
        let line = &rest[..line_end];
        if DEF_LINE_RE.is_match(line.trim_end_matches('\n')) {
            rest = &rest[line_end..];
        } else {
            break;
        }
    }
    rest.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileRecord, FunctionInfo, UnitId};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_extract_well_formed_round_trip() {
        let doc = "\"\"\"Adds two numbers.\n\nArgs:\n    a: first\n    b: second\n\"\"\"";
        let raw = format!("Sure, here is the docstring:\n{}\nHope that helps!", doc);
        assert_eq!(extract_docstring(&raw), doc);
    }

    #[test]
    fn test_extract_one_liner() {
        let raw = "\"\"\"Flattens a nested list.\"\"\"";
        assert_eq!(extract_docstring(raw), raw);
    }

    #[test]
    fn test_repair_stray_code_fence() {
        let raw = "\"\"\"Reads the config file.\n```";
        assert_eq!(extract_docstring(raw), "\"\"\"Reads the config file.\n\"\"\"");
    }

    #[test]
    fn test_strips_leaked_signature_line() {
        let raw = "\"\"\"def add(a, b):\nAdds two numbers.\n\"\"\"";
        assert_eq!(extract_docstring(raw), "\"\"\"Adds two numbers.\n\"\"\"");
    }

    #[test]
    fn test_strips_leaked_async_signature_line() {
        let raw = "\"\"\"async def fetch(url):\nFetches a URL.\n\"\"\"";
        assert_eq!(extract_docstring(raw), "\"\"\"Fetches a URL.\n\"\"\"");
    }

    #[test]
    fn test_no_delimiters_plausible_length_fallback() {
        let raw = "This function walks the directory tree and yields every Python file in it.";
        let extracted = extract_docstring(raw);
        assert!(extracted.starts_with(DELIM));
        assert!(extracted.ends_with(DELIM));
        assert!(extracted.contains("walks the directory tree"));
    }

    #[test]
    fn test_no_delimiters_short_response_is_placeholder() {
        assert_eq!(extract_docstring("ok"), PLACEHOLDER_DOCSTRING);
        assert_eq!(extract_docstring(""), PLACEHOLDER_DOCSTRING);
    }

    #[test]
    fn test_unterminated_short_response_is_placeholder() {
        assert_eq!(extract_docstring("\"\"\"hm"), PLACEHOLDER_DOCSTRING);
    }

    #[test]
    fn test_extraction_is_pure() {
        let raw = "\"\"\"Stable.\"\"\"";
        assert_eq!(extract_docstring(raw), extract_docstring(raw));
    }

    // -- synthesizer tests ---------------------------------------------------

    struct CountingLlm {
        in_flight: AtomicUsize,
        max_seen: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for CountingLlm {
        async fn send(&self, _prompt: &str) -> crate::types::Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("\"\"\"Does a thing.\"\"\"".to_string())
        }
    }

    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn send(&self, prompt: &str) -> crate::types::Result<String> {
            Ok(format!("\"\"\"PROMPT WAS:\n{}\n\"\"\"", prompt))
        }
    }

    fn sample_index() -> StructureIndex {
        let mut files = BTreeMap::new();
        files.insert(
            "m.py".to_string(),
            vec![
                FileRecord::Function {
                    details: FunctionInfo {
                        method_name: "helper".to_string(),
                        arguments: "x".to_string(),
                        decorators: vec![],
                        docstring: Some("Help out.".to_string()),
                        source_code: "def helper(x):\n    return x * 2".to_string(),
                        method_calls: vec![],
                    },
                },
                FileRecord::Function {
                    details: FunctionInfo {
                        method_name: "main".to_string(),
                        arguments: String::new(),
                        decorators: vec!["cache".to_string()],
                        docstring: None,
                        source_code: "def main():\n    return helper(1)".to_string(),
                        method_calls: vec!["helper".to_string()],
                    },
                },
            ],
        );
        StructureIndex::from_records(files)
    }

    #[tokio::test]
    async fn test_semaphore_bounds_concurrency() {
        let llm = Arc::new(CountingLlm {
            in_flight: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        });
        let synthesizer = Arc::new(Synthesizer::new(llm.clone(), 2));
        let index = Arc::new(sample_index());
        let graph = Arc::new(CallGraph::build(&index));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let synthesizer = Arc::clone(&synthesizer);
            let index = Arc::clone(&index);
            let graph = Arc::clone(&graph);
            handles.push(tokio::spawn(async move {
                let unit = index.unit(&UnitId::new("m.py", "main")).unwrap();
                synthesizer
                    .synthesize_unit(unit, &index, &graph, None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(llm.max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_unit_prompt_includes_callee_source() {
        let synthesizer = Synthesizer::new(Arc::new(EchoLlm), 1);
        let index = sample_index();
        let graph = CallGraph::build(&index);
        let unit = index.unit(&UnitId::new("m.py", "main")).unwrap();

        let result = synthesizer
            .synthesize_unit(unit, &index, &graph, None)
            .await
            .unwrap();

        assert!(result.raw_model_text.contains("def main():"));
        assert!(result.raw_model_text.contains("def helper(x):"));
        assert!(result.raw_model_text.contains("Decorator: @cache"));
        assert_eq!(
            result.target,
            MutationTarget::Function {
                name: "main".to_string(),
                owning_class: None,
            }
        );
    }

    #[tokio::test]
    async fn test_refinement_prompt_carries_main_idea() {
        let synthesizer = Synthesizer::new(Arc::new(EchoLlm), 1);
        let index = sample_index();
        let graph = CallGraph::build(&index);
        let unit = index.unit(&UnitId::new("m.py", "main")).unwrap();

        let result = synthesizer
            .synthesize_unit(unit, &index, &graph, Some("a tiny math toolkit"))
            .await
            .unwrap();

        assert!(result.raw_model_text.contains("a tiny math toolkit"));
    }

    #[tokio::test]
    async fn test_class_prompt_uses_member_docstrings_not_source() {
        let mut files = BTreeMap::new();
        files.insert(
            "m.py".to_string(),
            vec![FileRecord::Class {
                name: "Store".to_string(),
                docstring: None,
                attributes: vec!["path".to_string()],
                methods: vec![
                    FunctionInfo {
                        method_name: "get".to_string(),
                        arguments: "self, key".to_string(),
                        decorators: vec![],
                        docstring: Some("Fetch a value by key.".to_string()),
                        source_code: "def get(self, key):\n    return self.data[key]".to_string(),
                        method_calls: vec![],
                    },
                    FunctionInfo {
                        method_name: "put".to_string(),
                        arguments: "self, key, value".to_string(),
                        decorators: vec![],
                        docstring: None,
                        source_code: "def put(self, key, value):\n    self.data[key] = value"
                            .to_string(),
                        method_calls: vec![],
                    },
                ],
            }],
        );
        let index = StructureIndex::from_records(files);
        let synthesizer = Synthesizer::new(Arc::new(EchoLlm), 1);

        let result = synthesizer
            .synthesize_class(&index.classes()[0], &index, None)
            .await
            .unwrap();

        assert!(result.raw_model_text.contains("Fetch a value by key."));
        assert!(result.raw_model_text.contains("put: (undocumented)"));
        assert!(result.raw_model_text.contains("Attributes: path"));
        assert!(!result.raw_model_text.contains("self.data[key]"));
    }
}
