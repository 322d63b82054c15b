//! Repository ingestion.
//!
//! Turns a public repository URL into an immutable [`RepoSnapshot`]: repo
//! metadata, the file tree, the README, and a bounded selection of
//! representative source files. Talks to the GitHub REST API with an
//! optional token; 429s are retried with backoff before surfacing as
//! `upstream_rate_limited`.

pub mod tree;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use tree::{EntryKind, FileTree, TreeEntry};

/// Filenames treated as project manifests (always selected when at the root).
const MANIFEST_NAMES: &[&str] = &[
    "package.json",
    "pyproject.toml",
    "Cargo.toml",
    "go.mod",
    "requirements.txt",
    "setup.py",
    "pom.xml",
    "build.gradle",
    "Gemfile",
    "composer.json",
    "Makefile",
    "Dockerfile",
    "docker-compose.yml",
];

/// Source file extensions eligible for selection.
const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "rb", "c", "cpp", "cs", "swift", "kt",
];

/// Directories whose first level is scanned for entry points.
const SOURCE_DIRS: &[&str] = &["src", "lib", "app", "backend", "server", "cmd"];

/// Parsed owner/name pair from a repository URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl {
    pub owner: String,
    pub name: String,
}

impl RepoUrl {
    /// Parse a repository URL.
    ///
    /// Accepts `https://github.com/owner/name[/...]` (scheme optional,
    /// trailing slash and `.git` stripped) and the bare `owner/name` form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for malformed URLs or unsupported
    /// hosts.
    pub fn parse(url: &str) -> Result<Self> {
        let trimmed = url.trim().trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

        let without_scheme = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);

        let mut parts = without_scheme.split('/');
        let first = parts
            .next()
            .ok_or_else(|| Error::InvalidInput(format!("not a repository URL: {url}")))?;

        let (owner, name) = if first.contains('.') {
            if !first.eq_ignore_ascii_case("github.com") {
                return Err(Error::InvalidInput(format!(
                    "unsupported repository host: {first}"
                )));
            }
            (parts.next(), parts.next())
        } else {
            // Bare owner/name form.
            (Some(first), parts.next())
        };

        match (owner, name) {
            (Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() => Ok(Self {
                owner: owner.to_owned(),
                name: name.to_owned(),
            }),
            _ => Err(Error::InvalidInput(format!(
                "not a repository URL: {url}"
            ))),
        }
    }

    /// Canonical URL form: lowercase host, no trailing slash, no `.git`.
    pub fn normalized(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

/// Basic repository metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    /// Display name.
    pub name: String,
    /// Repository description, if set.
    pub description: Option<String>,
    /// Default branch ref.
    pub default_branch: String,
    /// Primary language, if detected by the host.
    pub language: Option<String>,
    /// Star count.
    pub stars: u64,
}

/// One selected source file with truncated content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedFile {
    pub path: String,
    pub content: String,
    /// Selection priority; lower is more important.
    pub priority: u8,
}

/// Immutable snapshot of a repository's textual surface.
///
/// Built on demand per request and held in memory only.
#[derive(Debug, Clone)]
pub struct RepoSnapshot {
    /// Canonical repository URL.
    pub url: String,
    pub owner: String,
    pub name: String,
    pub info: RepoInfo,
    pub tree: FileTree,
    /// README text, empty when the repository has none.
    pub readme: String,
    /// Selected files ordered by ascending priority.
    pub files: Vec<SelectedFile>,
    /// SHA-256 over tree paths, README, and selected contents.
    pub content_hash: String,
}

// GitHub REST response shapes (only the fields we read).

#[derive(Debug, Deserialize)]
struct ApiRepo {
    name: String,
    description: Option<String>,
    default_branch: String,
    language: Option<String>,
    stargazers_count: u64,
}

#[derive(Debug, Deserialize)]
struct ApiTree {
    tree: Vec<ApiTreeItem>,
}

#[derive(Debug, Deserialize)]
struct ApiTreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    size: Option<u64>,
}

/// Fetches repository snapshots from the GitHub REST API.
pub struct RepoIngestor {
    http: reqwest::Client,
    config: IngestConfig,
}

impl RepoIngestor {
    /// Create an ingestor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the HTTP client cannot be constructed.
    pub fn new(config: IngestConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("repocast")
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// Fetch a full snapshot for the repository at `url`.
    ///
    /// # Errors
    ///
    /// `invalid_input` for bad URLs; `upstream_*` for host failures.
    pub async fn parse(&self, url: &str) -> Result<RepoSnapshot> {
        let repo = RepoUrl::parse(url)?;
        tracing::info!(owner = %repo.owner, name = %repo.name, "fetching repository snapshot");

        let info = self.fetch_info(&repo).await?;
        let (entries, sizes) = self.fetch_tree(&repo, &info.default_branch).await?;
        let tree = FileTree::from_entries(
            &entries,
            self.config.max_tree_nodes,
            self.config.truncate_depth,
        );
        let readme = self.fetch_readme(&repo).await?;

        let mut files = Vec::new();
        for (path, priority) in select_paths(&entries, self.config.max_selected_files) {
            if let Some(size) = sizes.get(&path) {
                if *size as usize > self.config.max_file_bytes {
                    continue;
                }
            }
            if let Some(content) = self.fetch_file(&repo, &path).await? {
                files.push(SelectedFile {
                    path,
                    content,
                    priority,
                });
            }
        }

        let content_hash = snapshot_hash(&tree, &readme, &files);
        tracing::debug!(
            files = files.len(),
            entries = tree.entry_count,
            hash = %content_hash,
            "snapshot ready"
        );

        Ok(RepoSnapshot {
            url: repo.normalized(),
            owner: repo.owner,
            name: repo.name,
            info,
            tree,
            readme,
            files,
            content_hash,
        })
    }

    async fn fetch_info(&self, repo: &RepoUrl) -> Result<RepoInfo> {
        let url = format!(
            "{}/repos/{}/{}",
            self.config.api_base, repo.owner, repo.name
        );
        let api: ApiRepo = self.get_json(&url).await?;
        Ok(RepoInfo {
            name: api.name,
            description: api.description,
            default_branch: api.default_branch,
            language: api.language,
            stars: api.stargazers_count,
        })
    }

    async fn fetch_tree(
        &self,
        repo: &RepoUrl,
        branch: &str,
    ) -> Result<(Vec<TreeEntry>, HashMap<String, u64>)> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.config.api_base, repo.owner, repo.name, branch
        );
        let api: ApiTree = self.get_json(&url).await?;

        let mut entries = Vec::with_capacity(api.tree.len());
        let mut sizes = HashMap::new();
        for item in api.tree {
            let kind = match item.kind.as_str() {
                "tree" => EntryKind::Dir,
                _ => EntryKind::File,
            };
            if kind == EntryKind::File {
                if let Some(size) = item.size {
                    sizes.insert(item.path.clone(), size);
                }
            }
            entries.push(TreeEntry {
                path: item.path,
                kind,
            });
        }
        Ok((entries, sizes))
    }

    /// Fetch the README as raw text. A missing README is not an error.
    async fn fetch_readme(&self, repo: &RepoUrl) -> Result<String> {
        let url = format!(
            "{}/repos/{}/{}/readme",
            self.config.api_base, repo.owner, repo.name
        );
        match self.get_raw(&url).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(Error::UpstreamNotFound(_)) => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    /// Fetch one file's raw content, skipping binaries and oversized bodies.
    ///
    /// Also used at question time: a voice transcript that names a file
    /// pulls it into that call's context.
    ///
    /// # Errors
    ///
    /// `upstream_*` for host failures; a missing path is `Ok(None)`.
    pub async fn fetch_file(&self, repo: &RepoUrl, path: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.config.api_base, repo.owner, repo.name, path
        );
        let bytes = match self.get_raw(&url).await {
            Ok(bytes) => bytes,
            Err(Error::UpstreamNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if bytes.len() > self.config.max_file_bytes || is_binary(&bytes) {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let bytes = self.get_with_retry(url, "application/vnd.github+json").await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::UpstreamNetwork(format!("malformed response from host: {e}")))
    }

    async fn get_raw(&self, url: &str) -> Result<Vec<u8>> {
        self.get_with_retry(url, "application/vnd.github.raw").await
    }

    async fn get_with_retry(&self, url: &str, accept: &str) -> Result<Vec<u8>> {
        let mut last_err = Error::UpstreamNetwork("no attempt made".into());
        for attempt in 0..3u32 {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            match self.get_once(url, accept).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(url, attempt, error = %e, "retrying host request");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn get_once(&self, url: &str, accept: &str) -> Result<Vec<u8>> {
        let mut req = self.http.get(url).header("accept", accept);
        if let Some(token) = &self.config.token {
            req = req.header("authorization", format!("Bearer {token}"));
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::UpstreamNetwork(format!("host request timed out: {e}"))
            } else {
                Error::UpstreamNetwork(format!("host request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| Error::UpstreamNetwork(format!("failed to read body: {e}")))?;
            return Ok(bytes.to_vec());
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_host_error(status.as_u16(), &body))
    }
}

/// Map a GitHub REST error status to a typed error.
fn map_host_error(status: u16, body: &str) -> Error {
    let detail = body.chars().take(300).collect::<String>();
    match status {
        404 => Error::UpstreamNotFound(format!("repository or path not found: {detail}")),
        401 => Error::UpstreamUnauthorized(format!("bad credentials: {detail}")),
        429 => Error::UpstreamRateLimited(format!("host rate limit: {detail}")),
        403 if body.contains("rate limit") => {
            Error::UpstreamRateLimited(format!("host rate limit: {detail}"))
        }
        403 => Error::UpstreamUnauthorized(format!("access forbidden: {detail}")),
        s if s >= 500 => Error::UpstreamNetwork(format!("host error {s}: {detail}")),
        s => Error::UpstreamNetwork(format!("unexpected host status {s}: {detail}")),
    }
}

/// Exponential backoff with jitter: 500ms, 1s, 2s base, ±25%.
fn backoff_delay(attempt: u32) -> Duration {
    use rand::Rng;
    let base_ms = 500u64.saturating_mul(1 << attempt.min(4));
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 2);
    Duration::from_millis(base_ms / 4 * 3 + jitter)
}

/// Whether the first 8 KiB look binary (contain a NUL byte).
fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8 * 1024).any(|&b| b == 0)
}

/// Rank tree entries for selection.
///
/// Priority 0: root manifests. Priority 1: root-level source files.
/// Priority 2: first level of `src/`-like directories. All manifests are
/// always included (they are small); the remainder fills up to `cap`.
fn select_paths(entries: &[TreeEntry], cap: usize) -> Vec<(String, u8)> {
    let mut ranked: Vec<(String, u8)> = Vec::new();

    for entry in entries {
        if entry.kind != EntryKind::File {
            continue;
        }
        let path = entry.path.as_str();
        let depth = entry.depth();
        let name = path.rsplit('/').next().unwrap_or(path);
        let ext = name.rsplit('.').next().unwrap_or("");

        let priority = if depth == 0 && MANIFEST_NAMES.contains(&name) {
            0
        } else if depth == 0 && SOURCE_EXTENSIONS.contains(&ext) {
            1
        } else if depth == 1 && SOURCE_EXTENSIONS.contains(&ext) {
            let dir = path.split('/').next().unwrap_or("");
            if SOURCE_DIRS.contains(&dir) {
                2
            } else {
                continue;
            }
        } else {
            continue;
        };
        ranked.push((path.to_owned(), priority));
    }

    ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let manifests = ranked.iter().filter(|(_, p)| *p == 0).count();
    let cap = cap.max(manifests);
    ranked.truncate(cap);
    ranked
}

/// SHA-256 over the retained tree paths, README, and selected file contents.
fn snapshot_hash(tree: &FileTree, readme: &str, files: &[SelectedFile]) -> String {
    let mut hasher = Sha256::new();
    for path in tree.paths() {
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(readme.as_bytes());
    for file in files {
        hasher.update(file.path.as_bytes());
        hasher.update(file.content.as_bytes());
    }
    hex(&hasher.finalize())
}

/// Lowercase hex encoding.
pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── RepoUrl ───────────────────────────────────────────────

    #[test]
    fn parse_full_url() {
        let repo = RepoUrl::parse("https://github.com/octocat/Hello-World").expect("parse");
        assert_eq!(repo.owner, "octocat");
        assert_eq!(repo.name, "Hello-World");
    }

    #[test]
    fn parse_strips_git_suffix_and_slash() {
        let repo = RepoUrl::parse("https://github.com/octocat/Hello-World.git/").expect("parse");
        assert_eq!(repo.name, "Hello-World");
    }

    #[test]
    fn parse_ignores_extra_path_segments() {
        let repo =
            RepoUrl::parse("https://github.com/octocat/Hello-World/tree/main/src").expect("parse");
        assert_eq!(repo.owner, "octocat");
        assert_eq!(repo.name, "Hello-World");
    }

    #[test]
    fn parse_bare_owner_name() {
        let repo = RepoUrl::parse("octocat/Hello-World").expect("parse");
        assert_eq!(repo.owner, "octocat");
    }

    #[test]
    fn parse_rejects_unsupported_host() {
        let err = RepoUrl::parse("https://example.com/a/b").expect_err("should fail");
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn parse_rejects_missing_name() {
        let err = RepoUrl::parse("https://github.com/octocat").expect_err("should fail");
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn normalized_url_is_canonical() {
        let repo = RepoUrl::parse("https://GitHub.com/octocat/Hello-World.git").expect("parse");
        assert_eq!(repo.normalized(), "https://github.com/octocat/Hello-World");
    }

    // ── Host error mapping ────────────────────────────────────

    #[test]
    fn host_error_mapping() {
        assert_eq!(map_host_error(404, "").code(), "upstream_not_found");
        assert_eq!(map_host_error(401, "").code(), "upstream_unauthorized");
        assert_eq!(map_host_error(429, "").code(), "upstream_rate_limited");
        assert_eq!(
            map_host_error(403, "API rate limit exceeded").code(),
            "upstream_rate_limited"
        );
        assert_eq!(map_host_error(403, "forbidden").code(), "upstream_unauthorized");
        assert_eq!(map_host_error(502, "").code(), "upstream_network");
    }

    // ── Binary detection ──────────────────────────────────────

    #[test]
    fn nul_byte_is_binary() {
        assert!(is_binary(b"\x89PNG\x00\x1a"));
        assert!(!is_binary(b"fn main() {}\n"));
    }

    // ── Selection ─────────────────────────────────────────────

    #[test]
    fn manifests_rank_first() {
        let entries = vec![
            TreeEntry::file("src/main.rs"),
            TreeEntry::file("Cargo.toml"),
            TreeEntry::file("main.py"),
            TreeEntry::dir("src"),
        ];
        let ranked = select_paths(&entries, 10);
        assert_eq!(ranked[0], ("Cargo.toml".to_owned(), 0));
        assert!(ranked.contains(&("main.py".to_owned(), 1)));
        assert!(ranked.contains(&("src/main.rs".to_owned(), 2)));
    }

    #[test]
    fn all_manifests_survive_the_cap() {
        let entries = vec![
            TreeEntry::file("Cargo.toml"),
            TreeEntry::file("package.json"),
            TreeEntry::file("pyproject.toml"),
            TreeEntry::file("main.py"),
        ];
        let ranked = select_paths(&entries, 2);
        let manifests = ranked.iter().filter(|(_, p)| *p == 0).count();
        assert_eq!(manifests, 3);
    }

    #[test]
    fn deep_files_are_not_selected() {
        let entries = vec![TreeEntry::file("src/deep/inner.rs")];
        assert!(select_paths(&entries, 10).is_empty());
    }

    #[test]
    fn non_source_dirs_are_not_selected() {
        let entries = vec![TreeEntry::file("docs/guide.py")];
        assert!(select_paths(&entries, 10).is_empty());
    }

    // ── Hashing ───────────────────────────────────────────────

    #[test]
    fn snapshot_hash_is_deterministic() {
        let tree = FileTree::from_entries(&[TreeEntry::file("a.rs")], 100, 3);
        let files = vec![SelectedFile {
            path: "a.rs".into(),
            content: "fn a() {}".into(),
            priority: 1,
        }];
        let h1 = snapshot_hash(&tree, "readme", &files);
        let h2 = snapshot_hash(&tree, "readme", &files);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);

        let h3 = snapshot_hash(&tree, "readme changed", &files);
        assert_ne!(h1, h3);
    }

    #[test]
    fn hex_encodes_lowercase() {
        assert_eq!(hex(&[0x00, 0xff, 0x1a]), "00ff1a");
    }
}
