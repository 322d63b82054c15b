//! Repository ingestor contract tests against a mocked GitHub REST API.

use repocast::config::IngestConfig;
use repocast::ingest::RepoIngestor;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ingestor_for(server: &MockServer, token: Option<&str>) -> RepoIngestor {
    RepoIngestor::new(IngestConfig {
        api_base: server.uri(),
        token: token.map(str::to_owned),
        ..IngestConfig::default()
    })
    .expect("ingestor")
}

async fn mount_repo(server: &MockServer, default_branch: &str) {
    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Hello-World",
            "description": "My first repository",
            "default_branch": default_branch,
            "language": "Rust",
            "stargazers_count": 42,
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/repos/octocat/Hello-World/git/trees/{default_branch}"
        )))
        .and(query_param("recursive", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tree": [
                {"path": "README", "type": "blob", "size": 13},
                {"path": "Cargo.toml", "type": "blob", "size": 120},
                {"path": "src", "type": "tree"},
                {"path": "src/main.rs", "type": "blob", "size": 45},
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/readme"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Hello World!"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/contents/Cargo.toml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[package]\nname = \"hello\"\n"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/contents/src/main.rs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fn main() {}\n"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn snapshot_carries_tree_readme_and_selected_files() {
    let server = MockServer::start().await;
    mount_repo(&server, "master").await;

    let ingestor = ingestor_for(&server, None);
    let snapshot = ingestor
        .parse("https://github.com/octocat/Hello-World")
        .await
        .expect("snapshot");

    assert_eq!(snapshot.info.name, "Hello-World");
    assert_eq!(snapshot.info.default_branch, "master");
    assert_eq!(snapshot.info.stars, 42);
    assert_eq!(snapshot.readme, "Hello World!");
    assert_eq!(snapshot.url, "https://github.com/octocat/Hello-World");

    let rendered = snapshot.tree.render();
    assert!(rendered.contains("README"));
    assert!(rendered.contains("main.rs"));

    let paths: Vec<&str> = snapshot.files.iter().map(|f| f.path.as_str()).collect();
    assert!(paths.contains(&"Cargo.toml"));
    assert!(paths.contains(&"src/main.rs"));
    // Manifest first: lower priority value sorts earlier.
    assert_eq!(snapshot.files[0].path, "Cargo.toml");
    assert_eq!(snapshot.content_hash.len(), 64);
}

#[tokio::test]
async fn content_hash_is_stable_across_fetches() {
    let server = MockServer::start().await;
    mount_repo(&server, "main").await;

    let ingestor = ingestor_for(&server, None);
    let first = ingestor.parse("octocat/Hello-World").await.expect("first");
    let second = ingestor.parse("octocat/Hello-World").await.expect("second");
    assert_eq!(first.content_hash, second.content_hash);
}

#[tokio::test]
async fn token_is_sent_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World"))
        .and(header("authorization", "Bearer gh-token"))
        .respond_with(ResponseTemplate::new(404).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let ingestor = ingestor_for(&server, Some("gh-token"));
    let err = ingestor
        .parse("octocat/Hello-World")
        .await
        .expect_err("not found");
    assert_eq!(err.code(), "upstream_not_found");
}

#[tokio::test]
async fn missing_repository_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"message": "Not Found"}"#))
        .mount(&server)
        .await;

    let ingestor = ingestor_for(&server, None);
    let err = ingestor
        .parse("https://github.com/octocat/ghost")
        .await
        .expect_err("not found");
    assert_eq!(err.code(), "upstream_not_found");
}

#[tokio::test]
async fn private_repository_without_token_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"message": "Bad credentials"}"#))
        .mount(&server)
        .await;

    let ingestor = ingestor_for(&server, None);
    let err = ingestor
        .parse("octocat/private")
        .await
        .expect_err("unauthorized");
    assert_eq!(err.code(), "upstream_unauthorized");
}

#[tokio::test]
async fn rate_limit_is_retried_then_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).set_body_string("API rate limit exceeded"))
        .expect(3)
        .mount(&server)
        .await;

    let ingestor = ingestor_for(&server, None);
    let err = ingestor
        .parse("octocat/Hello-World")
        .await
        .expect_err("rate limited");
    assert_eq!(err.code(), "upstream_rate_limited");
}

#[tokio::test]
async fn missing_readme_yields_empty_string() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/bare"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "bare",
            "description": null,
            "default_branch": "main",
            "language": null,
            "stargazers_count": 0,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/bare/git/trees/main"))
        .and(query_param("recursive", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"tree": [{"path": "LICENSE", "type": "blob", "size": 9}]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/bare/readme"))
        .respond_with(ResponseTemplate::new(404).set_body_string("{}"))
        .mount(&server)
        .await;

    let ingestor = ingestor_for(&server, None);
    let snapshot = ingestor.parse("octocat/bare").await.expect("snapshot");
    assert!(snapshot.readme.is_empty());
    assert!(snapshot.files.is_empty());
}

#[tokio::test]
async fn binary_selected_file_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/bin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "bin",
            "description": null,
            "default_branch": "main",
            "language": null,
            "stargazers_count": 0,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/bin/git/trees/main"))
        .and(query_param("recursive", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tree": [{"path": "main.py", "type": "blob", "size": 6}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/bin/readme"))
        .respond_with(ResponseTemplate::new(404).set_body_string("{}"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/bin/contents/main.py"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x00\x01\x02".to_vec()))
        .mount(&server)
        .await;

    let ingestor = ingestor_for(&server, None);
    let snapshot = ingestor.parse("octocat/bin").await.expect("snapshot");
    assert!(snapshot.files.is_empty());
}
