//! Pass orchestration: synthesize → mutate → re-index, three times over.
//!
//! The pass structure is fixed: a leaf pass over undocumented functions and
//! methods, a class pass that can see the members documented by the leaf
//! pass, a project summary step, and a refinement pass over everything with
//! the project main idea in context. Each pass works against an immutable
//! index/graph snapshot and the tree is re-indexed from disk in between.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GenerationConfig;
use crate::extractor::StructureSource;
use crate::graph::CallGraph;
use crate::llm::LlmClient;
use crate::mutate::{insert_docstring, upsert_docstring};
use crate::summary::ProjectSummarizer;
use crate::synth::Synthesizer;
use crate::types::{
    DocweaveError, GenerationJob, JobKind, PassKind, Result, StructureIndex, SynthesisResult,
};

/// Snapshot a pass runs against. The main idea is computed once per run and
/// read-only from then on.
#[derive(Clone)]
pub struct PassContext {
    pub index: Arc<StructureIndex>,
    pub graph: Arc<CallGraph>,
    pub main_idea: Option<Arc<str>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassStats {
    pub pass: &'static str,
    pub scheduled: usize,
    pub documented: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub passes: Vec<PassStats>,
    pub main_idea: Option<String>,
    pub module_summaries: BTreeMap<String, String>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

pub struct GenerationScheduler {
    source: Arc<dyn StructureSource>,
    synthesizer: Synthesizer,
    summarizer: ProjectSummarizer,
    cpu_pool: rayon::ThreadPool,
    dry_run: bool,
}

impl GenerationScheduler {
    pub fn new(
        source: Arc<dyn StructureSource>,
        client: Arc<dyn LlmClient>,
        generation: &GenerationConfig,
    ) -> Result<Self> {
        let synthesizer = Synthesizer::new(Arc::clone(&client), generation.rate_limit);
        let summarizer =
            ProjectSummarizer::new(client, synthesizer.limiter(), generation.sample_top_n);
        let cpu_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_cpus::get())
            .build()
            .map_err(|e| DocweaveError::Config(format!("cannot build worker pool: {}", e)))?;

        Ok(Self {
            source,
            synthesizer,
            summarizer,
            cpu_pool,
            dry_run: false,
        })
    }

    /// Synthesize everything but write nothing back.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run the whole pipeline over the tree at `root`. Per-unit failures are
    /// absorbed; only index or file I/O failures abort the run, after the
    /// run's scratch directory has been removed.
    pub async fn run(&self, root: &Path) -> Result<RunReport> {
        let scratch = root.join(format!(".docweave-run-{}", Uuid::new_v4()));
        let result = self.run_inner(root, &scratch).await;
        if scratch.exists() {
            if let Err(e) = std::fs::remove_dir_all(&scratch) {
                warn!(path = %scratch.display(), error = %e, "failed to remove scratch directory");
            }
        }
        result
    }

    async fn run_inner(&self, root: &Path, scratch: &Path) -> Result<RunReport> {
        let started = Instant::now();
        info!(root = %root.display(), "starting docstring generation run");

        // Pass 1: functions and methods before their classes.
        let ctx = self.snapshot(root, None).await?;
        let leaf = self
            .run_pass(root, &ctx, leaf_jobs(&ctx.index), PassKind::Leaf, scratch)
            .await?;

        // Pass 2: classes, with member docstrings now on disk and re-indexed.
        let ctx = self.snapshot(root, None).await?;
        let class = self
            .run_pass(root, &ctx, class_jobs(&ctx.index), PassKind::Class, scratch)
            .await?;

        // Summary step: the main idea that anchors the refinement pass.
        let ctx = self.snapshot(root, None).await?;
        let main_idea = match self.summarizer.main_idea(&ctx.index, &ctx.graph).await {
            Ok(idea) => {
                info!(chars = idea.len(), "project main idea synthesized");
                Some(idea)
            }
            Err(e) => {
                warn!(error = %e, "main idea synthesis failed, refining without it");
                None
            }
        };

        // Pass 3: everything again, anchored on the main idea.
        let ctx = self.snapshot(root, main_idea.clone()).await?;
        let refinement = self
            .run_pass(
                root,
                &ctx,
                refinement_jobs(&ctx.index),
                PassKind::Refinement,
                scratch,
            )
            .await?;

        // Final snapshot feeds the per-directory summaries.
        let ctx = self.snapshot(root, None).await?;
        let module_summaries = self.summarizer.module_summaries(root, &ctx.index).await;

        let report = RunReport {
            passes: vec![leaf, class, refinement],
            main_idea,
            module_summaries,
            finished_at: Utc::now(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            elapsed_ms = report.elapsed_ms,
            "docstring generation run finished"
        );
        Ok(report)
    }

    async fn snapshot(&self, root: &Path, main_idea: Option<String>) -> Result<PassContext> {
        let index = Arc::new(self.source.index(root).await?);
        let graph = Arc::new(CallGraph::build(&index));
        info!(
            units = index.unit_count(),
            classes = index.class_count(),
            edges = graph.edge_count(),
            "tree re-indexed"
        );
        Ok(PassContext {
            index,
            graph,
            main_idea: main_idea.map(Arc::from),
        })
    }

    async fn run_pass(
        &self,
        root: &Path,
        ctx: &PassContext,
        jobs: Vec<GenerationJob>,
        pass: PassKind,
        scratch: &Path,
    ) -> Result<PassStats> {
        let scheduled = jobs.len();
        info!(pass = pass.as_str(), scheduled, "pass started");

        let main_idea = ctx.main_idea.as_deref();
        let futures = jobs.iter().map(|job| async move {
            let outcome = match job.kind {
                JobKind::Unit => match ctx.index.unit(&job.id) {
                    Some(unit) => {
                        self.synthesizer
                            .synthesize_unit(unit, &ctx.index, &ctx.graph, main_idea)
                            .await
                    }
                    None => return None,
                },
                JobKind::Class => match ctx.index.class(&job.id) {
                    Some(class) => {
                        self.synthesizer
                            .synthesize_class(class, &ctx.index, main_idea)
                            .await
                    }
                    None => return None,
                },
            };
            match outcome {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(unit = %job.id, pass = pass.as_str(), error = %e, "synthesis failed, unit skipped");
                    None
                }
            }
        });

        let results: Vec<SynthesisResult> = join_all(futures).await.into_iter().flatten().collect();
        let failed = scheduled - results.len();

        self.stage_raw_responses(scratch, pass, &results);

        let documented = if self.dry_run {
            results.len()
        } else {
            self.apply_mutations(root, results, pass)?
        };

        info!(
            pass = pass.as_str(),
            documented, failed, "pass finished"
        );
        Ok(PassStats {
            pass: pass.as_str(),
            scheduled,
            documented,
            failed,
        })
    }

    /// Apply one pass's synthesis results. Files are independent and handled
    /// in parallel on the CPU pool; within a file, insertions run in source
    /// order against the same buffer so each sees the previous one's effect.
    fn apply_mutations(
        &self,
        root: &Path,
        results: Vec<SynthesisResult>,
        pass: PassKind,
    ) -> Result<usize> {
        let mut by_file: BTreeMap<String, Vec<SynthesisResult>> = BTreeMap::new();
        for result in results {
            by_file.entry(result.file.clone()).or_default().push(result);
        }
        let mut work: Vec<(String, Vec<SynthesisResult>)> = by_file.into_iter().collect();
        for (_, list) in work.iter_mut() {
            list.sort_by_key(|r| r.position);
        }

        let replace = pass == PassKind::Refinement;
        let applied_per_file: Result<Vec<usize>> = self.cpu_pool.install(|| {
            work.par_iter()
                .map(|(file, list)| {
                    let path = root.join(file);
                    let mut text = std::fs::read_to_string(&path)
                        .map_err(|e| DocweaveError::io(path.display().to_string(), e))?;

                    let mut applied = 0;
                    for result in list {
                        let next = if replace {
                            upsert_docstring(&text, &result.target, &result.docstring)
                        } else {
                            insert_docstring(&text, &result.target, &result.docstring)
                        };
                        if next != text {
                            applied += 1;
                            text = next;
                        }
                    }

                    std::fs::write(&path, text)
                        .map_err(|e| DocweaveError::io(path.display().to_string(), e))?;
                    Ok(applied)
                })
                .collect()
        });

        Ok(applied_per_file?.into_iter().sum())
    }

    /// Keep raw model responses around for the duration of the run; purely
    /// best-effort.
    fn stage_raw_responses(&self, scratch: &Path, pass: PassKind, results: &[SynthesisResult]) {
        let dir = scratch.join(pass.as_str());
        if std::fs::create_dir_all(&dir).is_err() {
            return;
        }
        for result in results {
            let name: String = result
                .unit_id
                .as_str()
                .chars()
                .map(|c| if c.is_alphanumeric() { c } else { '_' })
                .collect();
            let _ = std::fs::write(dir.join(format!("{}.txt", name)), &result.raw_model_text);
        }
    }
}

/// Pass 1 cohort: every undocumented function or method.
fn leaf_jobs(index: &StructureIndex) -> Vec<GenerationJob> {
    index
        .units()
        .filter(|u| u.existing_docstring.is_none())
        .map(|u| GenerationJob {
            id: u.id.clone(),
            kind: JobKind::Unit,
            pass: PassKind::Leaf,
        })
        .collect()
}

/// Pass 2 cohort: every undocumented class.
fn class_jobs(index: &StructureIndex) -> Vec<GenerationJob> {
    index
        .classes()
        .iter()
        .filter(|c| c.existing_docstring.is_none())
        .map(|c| GenerationJob {
            id: c.id.clone(),
            kind: JobKind::Class,
            pass: PassKind::Class,
        })
        .collect()
}

/// Pass 3 cohort: every unit and class, documented or not.
fn refinement_jobs(index: &StructureIndex) -> Vec<GenerationJob> {
    let mut jobs: Vec<GenerationJob> = index
        .units()
        .map(|u| GenerationJob {
            id: u.id.clone(),
            kind: JobKind::Unit,
            pass: PassKind::Refinement,
        })
        .collect();
    jobs.extend(index.classes().iter().map(|c| GenerationJob {
        id: c.id.clone(),
        kind: JobKind::Class,
        pass: PassKind::Refinement,
    }));
    jobs
}
