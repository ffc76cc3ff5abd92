pub mod types;
pub mod config;
pub mod extractor;
pub mod graph;
pub mod llm;
pub mod synth;
pub mod mutate;
pub mod scheduler;
pub mod summary;

// Re-export commonly used types
pub use types::*;
pub use config::DocweaveConfig;
pub use extractor::{CommandExtractor, StructureSource};
pub use graph::CallGraph;
pub use llm::{AnthropicClient, LlmClient};
pub use synth::{extract_docstring, Synthesizer};
pub use mutate::{insert_docstring, upsert_docstring};
pub use scheduler::{GenerationScheduler, PassStats, RunReport};
pub use summary::ProjectSummarizer;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
