//! End-to-end pipeline tests over a real SQLite-backed index.
//!
//! A deterministic character-trigram embedder stands in for the real
//! embedding model, so ranking reflects actual text overlap and every run
//! is reproducible without network access or model downloads.

use anyhow::Result;
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use echodex::advisor::advise;
use echodex::config::Config;
use echodex::context::ContextStore;
use echodex::embedding::Embedder;
use echodex::error::ApiError;
use echodex::indexer::{index_repository, IndexOutcome};
use echodex::models::IndexMode;
use echodex::registry::RepoRegistry;
use echodex::sandbox::Sandbox;
use echodex::search::search_chunks;
use echodex::store::sqlite::SqliteIndex;
use echodex::store::VectorIndex;

// ============ Deterministic test embedder ============

const DIMS: usize = 64;

struct TrigramEmbedder;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn trigram_vector(text: &str) -> Vec<f32> {
    let normalized: Vec<char> = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut vec = vec![0.0f32; DIMS];
    for window in normalized.windows(3) {
        if window.iter().all(|c| *c == ' ') {
            continue;
        }
        let s: String = window.iter().collect();
        let slot = (fnv1a(s.as_bytes()) % DIMS as u64) as usize;
        vec[slot] += 1.0;
    }
    vec
}

#[async_trait]
impl Embedder for TrigramEmbedder {
    fn model_name(&self) -> &str {
        "trigram-test"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| trigram_vector(t)).collect())
    }
}

// ============ Test environment ============

struct TestEnv {
    _tmp: TempDir,
    config: Config,
    sandbox: Sandbox,
    registry: RepoRegistry,
    index: SqliteIndex,
    embedder: TrigramEmbedder,
    root: std::path::PathBuf,
}

async fn setup() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("repos");
    fs::create_dir_all(&root).unwrap();

    let db_path = tmp.path().join("data").join("echodex.sqlite");
    let config = Config::minimal(db_path.clone(), root.clone());

    let pool = echodex::db::connect(&db_path).await.unwrap();
    echodex::migrate::run_migrations(&pool).await.unwrap();

    TestEnv {
        config,
        sandbox: Sandbox::new(&[root.clone()]),
        registry: RepoRegistry::new(pool.clone()),
        index: SqliteIndex::new(pool),
        embedder: TrigramEmbedder,
        root,
        _tmp: tmp,
    }
}

fn write_auth_repo(root: &Path) -> std::path::PathBuf {
    let repo = root.join("webapp");
    fs::create_dir_all(repo.join("src")).unwrap();
    fs::write(
        repo.join("auth.py"),
        "def authenticate_user(credentials):\n    \"\"\"Check the user's credentials against the identity provider.\"\"\"\n    token = credentials.get('token')\n    if token is None:\n        raise ValueError('missing token')\n    claims = decode_token(token)\n    return claims['sub']\n\n\ndef decode_token(token):\n    return parse_jwt(token)\n",
    )
    .unwrap();
    fs::write(
        repo.join("geometry.py"),
        "def circle_area(radius):\n    return 3.14159 * radius * radius\n\n\ndef rectangle_perimeter(width, height):\n    return 2 * (width + height)\n",
    )
    .unwrap();
    repo
}

async fn index_full(env: &TestEnv, user: &str, repo: &Path) -> IndexOutcome {
    index_repository(
        &env.config,
        &env.sandbox,
        &env.registry,
        &env.index,
        &env.embedder,
        user,
        repo.to_str().unwrap(),
        IndexMode::Full,
        &[],
    )
    .await
    .unwrap()
}

async fn search(
    env: &TestEnv,
    user: &str,
    query: &str,
    top_k: i64,
    repo_id: Option<&str>,
) -> Result<Vec<echodex::models::SearchHit>, ApiError> {
    search_chunks(
        &env.config,
        &env.registry,
        &env.index,
        &env.embedder,
        user,
        query,
        Some(top_k),
        repo_id,
    )
    .await
}

// ============ Tenancy ============

#[tokio::test]
async fn test_tenancy_isolation() {
    let env = setup().await;
    let repo = write_auth_repo(&env.root);
    index_full(&env, "u1", &repo).await;

    let mine = search(&env, "u1", "authentication function", 5, None)
        .await
        .unwrap();
    assert!(!mine.is_empty());

    // A different user sees nothing, no matter the query.
    for query in ["authentication function", "circle area", "token"] {
        let theirs = search(&env, "u2", query, 5, None).await.unwrap();
        assert!(theirs.is_empty(), "u2 observed u1's chunks for {query:?}");
    }
}

#[tokio::test]
async fn test_scenario_auth_file_ranked_first() {
    let env = setup().await;
    let repo = write_auth_repo(&env.root);
    index_full(&env, "u1", &repo).await;

    let hits = search(&env, "u1", "authenticate user credentials", 5, None)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].file_path, "auth.py");

    let empty = search(&env, "u2", "authenticate user credentials", 5, None)
        .await
        .unwrap();
    assert!(empty.is_empty());
}

// ============ Soft delete ============

#[tokio::test]
async fn test_soft_delete_respected() {
    let env = setup().await;
    let repo = write_auth_repo(&env.root);
    let outcome = index_full(&env, "u1", &repo).await;

    let physical_before = env.index.chunk_count("u1").await.unwrap();
    assert!(physical_before > 0);

    assert!(env
        .registry
        .deactivate("u1", &outcome.repo_id)
        .await
        .unwrap());

    // The chunks still physically exist but no query can observe them.
    assert_eq!(env.index.chunk_count("u1").await.unwrap(), physical_before);
    let hits = search(&env, "u1", "authenticate user credentials", 5, None)
        .await
        .unwrap();
    assert!(hits.is_empty());

    // Even when the removed repository is named explicitly.
    let hits = search(
        &env,
        "u1",
        "authenticate user credentials",
        5,
        Some(&outcome.repo_id),
    )
    .await
    .unwrap();
    assert!(hits.is_empty());
}

// ============ Idempotent re-index ============

#[tokio::test]
async fn test_idempotent_reindex() {
    let env = setup().await;
    let repo = write_auth_repo(&env.root);

    let first = index_full(&env, "u1", &repo).await;
    let count_after_first = env.index.chunk_count("u1").await.unwrap();

    let second = index_full(&env, "u1", &repo).await;
    let count_after_second = env.index.chunk_count("u1").await.unwrap();

    assert_eq!(first.repo_id, second.repo_id);
    assert_eq!(first.report.chunks_written, second.report.chunks_written);
    assert_eq!(
        count_after_first, count_after_second,
        "re-indexing unchanged files must not grow the index"
    );
}

#[tokio::test]
async fn test_reindex_changed_file_updates_in_place() {
    let env = setup().await;
    let repo = env.root.join("edited");
    fs::create_dir_all(&repo).unwrap();
    let file = repo.join("handler.py");
    fs::write(
        &file,
        "def process(event):\n    return transform_legacy(event)\n",
    )
    .unwrap();

    index_full(&env, "u1", &repo).await;
    let count_before = env.index.chunk_count("u1").await.unwrap();

    // Same line range, new body: the chunk is overwritten, not duplicated.
    fs::write(
        &file,
        "def process(event):\n    return transform_rewritten(event)\n",
    )
    .unwrap();
    index_full(&env, "u1", &repo).await;

    assert_eq!(env.index.chunk_count("u1").await.unwrap(), count_before);
    let hits = search(&env, "u1", "transform_rewritten", 5, None)
        .await
        .unwrap();
    assert!(hits
        .iter()
        .any(|h| h.snippet.contains("transform_rewritten")));
    assert!(hits.iter().all(|h| !h.snippet.contains("transform_legacy")));
}

// ============ Deterministic ranking ============

#[tokio::test]
async fn test_deterministic_ranking() {
    let env = setup().await;
    let repo = write_auth_repo(&env.root);
    index_full(&env, "u1", &repo).await;

    let a = search(&env, "u1", "token claims", 10, None).await.unwrap();
    let b = search(&env, "u1", "token claims", 10, None).await.unwrap();

    let order = |hits: &[echodex::models::SearchHit]| {
        hits.iter()
            .map(|h| (h.file_path.clone(), h.start_line, h.score))
            .collect::<Vec<_>>()
    };
    assert_eq!(order(&a), order(&b));
}

// ============ Indexing modes ============

#[tokio::test]
async fn test_manual_mode_only_selected_files() {
    let env = setup().await;
    let repo = env.root.join("project");
    fs::create_dir_all(repo.join("src")).unwrap();
    fs::write(repo.join("src/a.py"), "def alpha_feature():\n    return 'alpha'\n").unwrap();
    fs::write(repo.join("src/b.py"), "def beta_feature():\n    return 'beta'\n").unwrap();

    let outcome = index_repository(
        &env.config,
        &env.sandbox,
        &env.registry,
        &env.index,
        &env.embedder,
        "u1",
        repo.to_str().unwrap(),
        IndexMode::Manual,
        &["src/a.py".to_string()],
    )
    .await
    .unwrap();

    assert_eq!(outcome.report.files_indexed, 1);
    let hits = search(&env, "u1", "beta_feature", 10, None).await.unwrap();
    assert!(
        hits.iter().all(|h| h.file_path.ends_with("a.py")),
        "sibling file was indexed in manual mode"
    );
}

#[tokio::test]
async fn test_index_outside_sandbox_rejected_before_io() {
    let env = setup().await;
    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("secret.py"), "def leak(): pass").unwrap();

    let err = index_repository(
        &env.config,
        &env.sandbox,
        &env.registry,
        &env.index,
        &env.embedder,
        "u1",
        outside.path().to_str().unwrap(),
        IndexMode::Full,
        &[],
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ApiError::PathNotAllowed(_)));
    assert_eq!(env.index.chunk_count("u1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_unreadable_selection_is_collected_not_fatal() {
    let env = setup().await;
    let repo = env.root.join("partial");
    fs::create_dir_all(&repo).unwrap();
    fs::write(repo.join("ok.py"), "def fine(): pass\n").unwrap();

    let outcome = index_repository(
        &env.config,
        &env.sandbox,
        &env.registry,
        &env.index,
        &env.embedder,
        "u1",
        repo.to_str().unwrap(),
        IndexMode::Manual,
        &["ok.py".to_string(), "missing.py".to_string()],
    )
    .await
    .unwrap();

    assert_eq!(outcome.report.files_indexed, 1);
    assert_eq!(outcome.report.skipped.len(), 1);
    assert_eq!(outcome.report.skipped[0].path, "missing.py");
}

#[tokio::test]
async fn test_binary_files_skipped() {
    let env = setup().await;
    let repo = env.root.join("mixed");
    fs::create_dir_all(&repo).unwrap();
    fs::write(repo.join("code.py"), "def real(): pass\n").unwrap();
    fs::write(repo.join("blob.py"), [0u8, 159, 146, 150, 0, 1, 2]).unwrap();

    let outcome = index_full(&env, "u1", &repo).await;
    assert_eq!(outcome.report.files_indexed, 1);
    assert!(outcome
        .report
        .skipped
        .iter()
        .any(|s| s.path == "blob.py"
            && matches!(s.reason, echodex::models::SkipReason::Binary)));
}

// ============ Query validation ============

#[tokio::test]
async fn test_empty_query_rejected() {
    let env = setup().await;
    let err = search(&env, "u1", "   ", 5, None).await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));
}

#[tokio::test]
async fn test_oversized_query_rejected() {
    let env = setup().await;
    let long = "q".repeat(env.config.retrieval.max_query_chars + 1);
    let err = search(&env, "u1", &long, 5, None).await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));
}

// ============ Advisor ============

#[tokio::test]
async fn test_advisor_always_answers_without_backend() {
    let env = setup().await;
    let repo = write_auth_repo(&env.root);
    index_full(&env, "u1", &repo).await;

    let context = ContextStore::new();
    context.record_transcript("u1", "s1", "how does authenticate_user handle a missing token");

    // advisor.provider defaults to "disabled": the generative path is
    // unreachable, exactly like an unreachable backend.
    let result = advise(
        &env.config,
        &context,
        &env.registry,
        &env.index,
        &env.embedder,
        "u1",
        "s1",
        None,
    )
    .await
    .unwrap();

    assert!(!result.talking_point.is_empty());
    assert_eq!(result.source, echodex::models::AdviceSource::RuleBased);
    assert!(result.confidence > 0.0);
}

#[tokio::test]
async fn test_advise_unknown_session_is_invalid_input() {
    let env = setup().await;
    let context = ContextStore::new();

    let err = advise(
        &env.config,
        &context,
        &env.registry,
        &env.index,
        &env.embedder,
        "u1",
        "never-created",
        None,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ApiError::InvalidInput(_)));
}

#[tokio::test]
async fn test_advisor_search_failure_does_not_fail_advise() {
    let env = setup().await;
    let context = ContextStore::new();
    context.record_transcript("u1", "s1", "talk about the deployment pipeline");

    // Nothing indexed at all; retrieval returns empty, advisor still answers.
    let result = advise(
        &env.config,
        &context,
        &env.registry,
        &env.index,
        &env.embedder,
        "u1",
        "s1",
        Some("weekly sync"),
    )
    .await
    .unwrap();

    assert!(!result.talking_point.is_empty());
}

// ============ Concurrency ============

#[tokio::test]
async fn test_search_during_concurrent_index() {
    let env = Arc::new(setup().await);
    let repo = write_auth_repo(&env.root);

    index_full(&env, "u1", &repo).await;

    // Re-index in the background while searches run; the accepted staleness
    // window means searches may see a mix, but they must never error and
    // never observe another user's data.
    let env_bg = env.clone();
    let repo_bg = repo.clone();
    let indexer = tokio::spawn(async move {
        for _ in 0..3 {
            index_full(&env_bg, "u1", &repo_bg).await;
        }
    });

    for _ in 0..10 {
        let hits = search(&env, "u1", "authenticate user", 5, None).await.unwrap();
        for hit in &hits {
            assert!(!hit.file_path.is_empty());
        }
    }

    indexer.await.unwrap();
}
