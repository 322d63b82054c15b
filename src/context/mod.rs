//! Prompt context construction.
//!
//! Compresses a [`RepoSnapshot`](crate::ingest::RepoSnapshot) into a
//! token-budgeted [`PromptContext`]. The budget is 90% of the configured
//! model context window; over-budget inputs are reduced in a fixed order:
//! drop the lowest-priority selected files, truncate the README at a
//! paragraph boundary, then collapse file-tree subtrees to counts.

use crate::ingest::RepoSnapshot;

/// What the context will be used for. Influences file selection weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Architecture diagrams favor manifests and top-level structure.
    Diagram,
    /// Podcasts favor the README and prose.
    Podcast,
    /// Q&A favors the full tree plus source files.
    Qa,
}

/// A token-budgeted prompt payload derived from a snapshot.
#[derive(Debug, Clone)]
pub struct PromptContext {
    /// Pretty-printed file tree.
    pub tree_text: String,
    /// README text, possibly truncated.
    pub readme_text: String,
    /// Selected `(path, content)` pairs, most important first.
    pub selected_files: Vec<(String, String)>,
    /// Estimated token count of the assembled payload.
    pub token_estimate: usize,
}

impl PromptContext {
    fn assemble_estimate(&self) -> usize {
        let mut total = estimate_tokens(&self.tree_text) + estimate_tokens(&self.readme_text);
        for (path, content) in &self.selected_files {
            total += estimate_tokens(path) + estimate_tokens(content);
        }
        total
    }
}

/// Rough token estimate: one token per 4 characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Paths from `known` that a question names, matched case-insensitively on
/// the full path or the file name.
///
/// This is the question-time half of QA weighting: a question that mentions
/// `pyproject.toml` pulls that file into the call. Only dotted file names
/// match; bare directory names like `src` fire on too many ordinary words.
pub fn paths_referenced(question: &str, known: &[String]) -> Vec<String> {
    let question = question.to_lowercase();
    known
        .iter()
        .filter(|path| {
            let path_lower = path.to_lowercase();
            let name = path_lower.rsplit('/').next().unwrap_or(&path_lower);
            name.contains('.')
                && (question.contains(&path_lower) || question.contains(name))
        })
        .cloned()
        .collect()
}

/// Builds prompt contexts under a token budget.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    budget: usize,
}

impl ContextBuilder {
    /// Create a builder for a model with the given context window.
    ///
    /// The working budget is 90% of the window, leaving headroom for the
    /// instructions and the response.
    pub fn new(context_window: usize) -> Self {
        Self {
            budget: context_window * 9 / 10,
        }
    }

    /// The effective token budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Build a context for `purpose` from a snapshot, reducing until the
    /// estimate fits the budget.
    pub fn build(&self, snapshot: &RepoSnapshot, purpose: Purpose) -> PromptContext {
        let mut files: Vec<(String, String, u8)> = snapshot
            .files
            .iter()
            .map(|f| (f.path.clone(), f.content.clone(), weight(purpose, f.priority)))
            .collect();
        files.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)));

        let mut context = PromptContext {
            tree_text: snapshot.tree.render(),
            readme_text: snapshot.readme.clone(),
            selected_files: files.into_iter().map(|(p, c, _)| (p, c)).collect(),
            token_estimate: 0,
        };
        context.token_estimate = context.assemble_estimate();

        // Reduction stage 1: drop files, least important first.
        while context.token_estimate > self.budget && !context.selected_files.is_empty() {
            context.selected_files.pop();
            context.token_estimate = context.assemble_estimate();
        }

        // Reduction stage 2: truncate the README at a paragraph boundary.
        if context.token_estimate > self.budget {
            let overshoot = context.token_estimate - self.budget;
            let keep_tokens = estimate_tokens(&context.readme_text).saturating_sub(overshoot);
            context.readme_text = truncate_at_paragraph(&context.readme_text, keep_tokens * 4);
            context.token_estimate = context.assemble_estimate();
        }

        // Reduction stage 3: summarize deep tree subtrees to counts.
        let mut depth = 4usize;
        while context.token_estimate > self.budget && depth >= 1 {
            context.tree_text = snapshot.tree.render_summarized(depth);
            context.token_estimate = context.assemble_estimate();
            depth -= 1;
        }

        tracing::debug!(
            purpose = ?purpose,
            tokens = context.token_estimate,
            budget = self.budget,
            files = context.selected_files.len(),
            "context built"
        );
        context
    }
}

/// Purpose-specific importance of a selection priority. Lower sorts first.
fn weight(purpose: Purpose, priority: u8) -> u8 {
    match purpose {
        // Manifests and top-level files first, deeper sources last.
        Purpose::Diagram => priority,
        // Prose matters most; manifests are still useful, sources least.
        Purpose::Podcast => match priority {
            0 => 0,
            1 => 2,
            _ => 3,
        },
        // Everything is fair game; keep the natural order.
        Purpose::Qa => priority,
    }
}

/// Cut `text` to at most `max_chars`, backing up to the previous blank line
/// when one exists.
fn truncate_at_paragraph(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind("\n\n") {
        Some(pos) if pos > 0 => cut[..pos].to_owned(),
        _ => cut,
    }
}
