//! Podcast script synthesis.
//!
//! Three LLM stages (repository analysis, conversation outline, dialogue)
//! ending in a strict JSON array of `{speaker, text}` turns. The
//! post-processor strips markup, merges consecutive same-speaker turns, and
//! enforces the structural constraints (alternation starting with `host`,
//! 12–60 turns, 8–80 words per turn). One repair re-prompt is allowed; a
//! second failure is `validation_failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::PromptContext;
use crate::error::{Error, Result};
use crate::llm::{strip_code_fences, ChatMessage, ChatParams, LlmClient};

/// Structural bounds on a valid script.
pub const MIN_TURNS: usize = 12;
pub const MAX_TURNS: usize = 60;
pub const MIN_WORDS_PER_TURN: usize = 8;
pub const MAX_WORDS_PER_TURN: usize = 80;

/// Words per minute assumed when sizing and estimating scripts.
const WORDS_PER_MINUTE: usize = 150;

/// Tech terms scanned out of the analysis for episode metadata. Matching is
/// a case-insensitive substring scan capped at eight topics, so list order
/// decides which categories win on term-heavy analyses.
const TOPIC_TERMS: &[&str] = &[
    // Languages & frameworks
    "React", "Vue", "Angular", "Node.js", "TypeScript", "JavaScript", "Java", "Python", "Rust",
    "Go", "Ruby on Rails", "Ruby", "PHP", "Laravel", "Swift", "Kotlin", "C++", "C#", "Django",
    "Flask", "FastAPI",
    // Web & API
    "API", "RESTful", "REST", "GraphQL", "gRPC", "WebSocket", "OpenAPI", "Swagger", "OAuth",
    "JWT", "CORS", "authentication", "authorization",
    // Databases
    "database", "MongoDB", "PostgreSQL", "MySQL", "SQLite", "Redis", "Firebase",
    "Elasticsearch", "Supabase",
    // DevOps & cloud
    "Docker", "Kubernetes", "Helm", "Terraform", "Ansible", "NGINX", "CI/CD", "GitHub Actions",
    "Jenkins", "Netlify", "Vercel", "AWS", "GCP", "Azure",
    // Build tools & config
    "npm", "yarn", "pip", "Maven", "Gradle", "Makefile", "CMake", "Webpack", "Vite", "Babel",
    "package.json", "pyproject.toml", "requirements.txt", "Cargo.toml", "tsconfig.json",
    ".gitignore",
    // Testing & code quality
    "testing", "unit tests", "integration tests", "Jest", "PyTest", "Mocha", "Vitest",
    "Cypress", "test coverage", "mocking", "linting", "Prettier", "ESLint",
    // Frontend & UI
    "frontend", "backend", "TailwindCSS", "Bootstrap", "Material UI", "SCSS", "Storybook",
    // Architecture
    "microservices", "monorepo", "architecture", "design patterns", "SDK", "CLI",
    // AI/ML & vector search
    "Jupyter", "Pandas", "NumPy", "scikit-learn", "TensorFlow", "PyTorch", "HuggingFace",
    "LangChain", "LlamaIndex", "OpenAI", "RAG", "vector database", "embeddings", "Pinecone",
    "Weaviate", "Milvus", "LLM", "prompt engineering",
    // Git & version control
    "git", "commit", "branch", "merge", "rebase", "pull request", "fork", "upstream",
    "submodule",
    // File structure & build artifacts
    "src", "dist", "node_modules", "venv", "assets",
    // Security
    "XSS", "CSRF", "encryption", "hashing", "SSL", "HTTPS", "firewall", "rate limiting",
    "CSP",
    // Monitoring & observability
    "logging", "tracing", "observability", "Prometheus", "Grafana", "Sentry", "DataDog",
    "OpenTelemetry",
    // Automation & scheduling
    "async", "streaming", "caching", "webhook", "cron job", "scheduler",
    // Repo meta
    "README", "LICENSE", "changelog", "semantic versioning", "deployment",
];

/// Podcast speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Host,
    Expert,
}

impl Speaker {
    /// Case-insensitive parse of model output.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "host" => Some(Self::Host),
            "expert" => Some(Self::Expert),
            _ => None,
        }
    }

    /// The other speaker.
    pub fn other(self) -> Self {
        match self {
            Self::Host => Self::Expert,
            Self::Expert => Self::Host,
        }
    }
}

/// One utterance in the script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptTurn {
    pub speaker: Speaker,
    pub text: String,
    pub index: usize,
    /// Start offset in the combined audio; set after synthesis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,
    /// End offset in the combined audio; set after synthesis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,
}

impl ScriptTurn {
    /// Word count of this turn.
    pub fn words(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Episode metadata persisted next to the script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub repo_name: String,
    pub episode_title: String,
    /// `MM:SS` estimate at the assumed speaking rate.
    pub estimated_duration: String,
    pub key_topics: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub turn_count: usize,
    /// Per-turn synthesis warnings (silence substitutions).
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// A validated script plus its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodcastScript {
    pub turns: Vec<ScriptTurn>,
    pub metadata: EpisodeMetadata,
}

/// Runs the three-stage script chain.
pub struct ScriptSynthesizer {
    llm: Arc<dyn LlmClient>,
}

impl ScriptSynthesizer {
    /// Create a synthesizer over the given LLM.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Generate a validated script for `duration_minutes`.
    ///
    /// # Errors
    ///
    /// `validation_failed` when the dialogue still violates constraints
    /// after the repair pass; provider errors pass through.
    pub async fn generate(
        &self,
        context: &PromptContext,
        repo_name: &str,
        duration_minutes: u32,
    ) -> Result<PodcastScript> {
        let analysis = self.analyze(context, repo_name).await?;
        let outline = self.outline(&analysis, duration_minutes).await?;
        let raw = self.dialogue(&outline, repo_name, duration_minutes).await?;

        let turns = match build_turns(&raw) {
            Ok(turns) => turns,
            Err(violations) => {
                tracing::debug!(?violations, "script failed validation, repairing");
                let repaired = self.repair(&raw, &violations).await?;
                build_turns(&repaired).map_err(|violations| {
                    Error::ValidationFailed(format!(
                        "script failed validation after repair: {}",
                        violations.join("; ")
                    ))
                })?
            }
        };

        let metadata = EpisodeMetadata {
            repo_name: repo_name.to_owned(),
            episode_title: format!("Inside {repo_name}"),
            estimated_duration: estimate_duration(&turns),
            key_topics: extract_topics(&analysis),
            generated_at: Utc::now(),
            turn_count: turns.len(),
            warnings: Vec::new(),
        };
        Ok(PodcastScript { turns, metadata })
    }

    /// Stage 1: what is worth talking about.
    async fn analyze(&self, context: &PromptContext, repo_name: &str) -> Result<String> {
        let mut prompt = format!(
            "Analyze the repository {repo_name} for an educational tech \
             podcast. Identify the project type, the key architectural \
             decisions, the technologies in use, and the three or four most \
             educational aspects to discuss.\n\n<file_tree>\n{}\n</file_tree>\n",
            context.tree_text
        );
        if !context.readme_text.is_empty() {
            prompt.push_str(&format!("<readme>\n{}\n</readme>\n", context.readme_text));
        }
        for (path, content) in &context.selected_files {
            prompt.push_str(&format!("<file path=\"{path}\">\n{content}\n</file>\n"));
        }

        let params = ChatParams::default()
            .with_max_output_tokens(2_000)
            .with_system(
                "You analyze codebases and surface what makes them \
                 interesting to practitioners. Be concrete.",
            );
        let text = self.llm.chat(&[ChatMessage::user(prompt)], &params).await?;
        Ok(text.trim().to_owned())
    }

    /// Stage 2: section-by-section conversation outline.
    async fn outline(&self, analysis: &str, duration_minutes: u32) -> Result<String> {
        let prompt = format!(
            "Create a conversation outline for a {duration_minutes}-minute \
             podcast between a curious host and a technical expert, based on \
             this analysis. Sections: introduction, project overview, \
             architecture deep dive, implementation highlights, wrap-up. For \
             each section give the time share, the talking points, and the \
             questions the host asks.\n\n<analysis>\n{analysis}\n</analysis>"
        );
        let params = ChatParams::default()
            .with_max_output_tokens(1_500)
            .with_system("You structure engaging technical conversations.");
        let text = self.llm.chat(&[ChatMessage::user(prompt)], &params).await?;
        Ok(text.trim().to_owned())
    }

    /// Stage 3: the dialogue itself, as a strict JSON array.
    async fn dialogue(
        &self,
        outline: &str,
        repo_name: &str,
        duration_minutes: u32,
    ) -> Result<String> {
        let target_words = duration_minutes as usize * WORDS_PER_MINUTE;
        let prompt = format!(
            "Write the full dialogue for the podcast about {repo_name} \
             following this outline. Total length about {target_words} words. \
             Reply with a JSON array only, no prose and no code fences. Each \
             element is {{\"speaker\": \"host\"|\"expert\", \"text\": \"...\"}}. \
             Speakers strictly alternate starting with the host; each turn is \
             between {MIN_WORDS_PER_TURN} and {MAX_WORDS_PER_TURN} words of \
             plain spoken language with no markup.\n\n<outline>\n{outline}\n</outline>"
        );
        let params = ChatParams::default()
            .with_max_output_tokens(4_000)
            .with_system(
                "You write natural two-person technical dialogue that sounds \
                 good read aloud.",
            );
        self.llm.chat(&[ChatMessage::user(prompt)], &params).await
    }

    /// One repair pass naming the violations.
    async fn repair(&self, previous: &str, violations: &[String]) -> Result<String> {
        let prompt = format!(
            "Your podcast script violates these constraints: {}. Rewrite it \
             as a JSON array only ({{\"speaker\": \"host\"|\"expert\", \
             \"text\": ...}}), alternating speakers starting with the host, \
             {MIN_TURNS}-{MAX_TURNS} turns, {MIN_WORDS_PER_TURN}-{MAX_WORDS_PER_TURN} \
             words per turn.\n\n<previous_script>\n{previous}\n</previous_script>",
            violations.join("; ")
        );
        let params = ChatParams::default().with_max_output_tokens(4_000);
        self.llm.chat(&[ChatMessage::user(prompt)], &params).await
    }
}

/// Parse, normalize, and validate raw dialogue output.
///
/// Returns the violations instead of turns when the result is structurally
/// invalid, so the caller can run the repair pass.
pub fn build_turns(raw: &str) -> std::result::Result<Vec<ScriptTurn>, Vec<String>> {
    let pairs = parse_script_json(raw).map_err(|e| vec![e])?;
    let turns = normalize_turns(pairs);
    let violations = validate_turns(&turns);
    if violations.is_empty() {
        Ok(turns)
    } else {
        Err(violations)
    }
}

/// Parse the JSON array of `{speaker, text}` objects.
fn parse_script_json(raw: &str) -> std::result::Result<Vec<(Speaker, String)>, String> {
    let cleaned = strip_code_fences(raw);
    let value: serde_json::Value = serde_json::from_str(cleaned.trim())
        .map_err(|e| format!("script is not valid JSON: {e}"))?;
    let array = value
        .as_array()
        .ok_or_else(|| "script is not a JSON array".to_owned())?;

    let mut pairs = Vec::with_capacity(array.len());
    for (i, item) in array.iter().enumerate() {
        let speaker = item
            .get("speaker")
            .and_then(|v| v.as_str())
            .and_then(Speaker::from_label)
            .ok_or_else(|| format!("turn {i} has no valid speaker"))?;
        let text = item
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("turn {i} has no text"))?;
        pairs.push((speaker, text.to_owned()));
    }
    Ok(pairs)
}

/// Strip markup, drop empties, merge consecutive same-speaker turns.
fn normalize_turns(pairs: Vec<(Speaker, String)>) -> Vec<ScriptTurn> {
    let mut merged: Vec<(Speaker, String)> = Vec::with_capacity(pairs.len());
    for (speaker, raw_text) in pairs {
        let text = strip_markup(&raw_text);
        if text.is_empty() {
            continue;
        }
        match merged.last_mut() {
            Some((last_speaker, last_text)) if *last_speaker == speaker => {
                last_text.push(' ');
                last_text.push_str(&text);
            }
            _ => merged.push((speaker, text)),
        }
    }

    merged
        .into_iter()
        .enumerate()
        .map(|(index, (speaker, text))| ScriptTurn {
            speaker,
            text,
            index,
            start_ms: None,
            end_ms: None,
        })
        .collect()
}

/// Structural violations of a normalized turn list. Empty means valid.
fn validate_turns(turns: &[ScriptTurn]) -> Vec<String> {
    let mut violations = Vec::new();

    if turns.len() < MIN_TURNS || turns.len() > MAX_TURNS {
        violations.push(format!(
            "turn count {} outside {MIN_TURNS}..={MAX_TURNS}",
            turns.len()
        ));
    }
    if let Some(first) = turns.first() {
        if first.speaker != Speaker::Host {
            violations.push("first speaker is not the host".to_owned());
        }
    }
    for pair in turns.windows(2) {
        if pair[0].speaker == pair[1].speaker {
            violations.push(format!(
                "turns {} and {} have the same speaker",
                pair[0].index, pair[1].index
            ));
            break;
        }
    }
    for turn in turns {
        let words = turn.words();
        if words < MIN_WORDS_PER_TURN || words > MAX_WORDS_PER_TURN {
            violations.push(format!(
                "turn {} has {words} words, outside {MIN_WORDS_PER_TURN}..={MAX_WORDS_PER_TURN}",
                turn.index
            ));
        }
    }
    violations
}

/// Remove markdown artifacts and stage directions from spoken text.
fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' => {}
            _ => out.push(ch),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `MM:SS` estimate from the total word count, rounded to 15 seconds.
fn estimate_duration(turns: &[ScriptTurn]) -> String {
    let words: usize = turns.iter().map(ScriptTurn::words).sum();
    let seconds = words * 60 / WORDS_PER_MINUTE;
    let rounded = (seconds + 7) / 15 * 15;
    format!("{:02}:{:02}", rounded / 60, rounded % 60)
}

/// Key topics mentioned in the analysis, capped at eight.
fn extract_topics(analysis: &str) -> Vec<String> {
    let lower = analysis.to_lowercase();
    TOPIC_TERMS
        .iter()
        .filter(|term| lower.contains(&term.to_lowercase()))
        .take(8)
        .map(|t| (*t).to_owned())
        .collect()
}
