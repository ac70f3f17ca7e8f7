//! End-to-end runs of the indexing pipeline against in-memory stores and
//! a filesystem-backed fake Git client.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use repo_context::config::default_denied_extensions;
use repo_context::error::IndexError;
use repo_context::events::{EventKind, RecordingEventSink, Stage};
use repo_context::git::{GitClient, GitRepo};
use repo_context::indexer::{ContentIndexer, FileFilter};
use repo_context::orchestrator::{IndexingOrchestrator, StageTimeouts};
use repo_context::status::IndexingStatusStore;
use repo_context::sync::{RepositorySynchronizer, SyncAction};
use repo_context::workspace::FilesystemWorkspace;
use repo_context_core::chunk::{collection_name, ChunkLimits, MAX_FILE_BYTES};
use repo_context_core::embedding::EmbeddingProvider;
use repo_context_core::models::{ChunkRecord, ContextStatus, Project};
use repo_context_core::store::memory::{InMemoryProjects, InMemoryVectorStore};
use repo_context_core::store::{ProjectSession, SessionFactory, VectorStore};

const PROJECT: &str = "3f2b9c1e-0d4a-4e8b-9a57-1c2d3e4f5a6b";
const URL: &str = "https://git.example.com/team/app.git";
const OTHER_URL: &str = "https://git.example.com/team/app-v2.git";

// ─── Fakes ──────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeGitState {
    remotes: HashMap<String, Vec<(String, String)>>,
    calls: Vec<String>,
    hang: bool,
}

/// Each "remote" is a list of files; a working copy is a directory with
/// `.git/origin` holding its URL.
#[derive(Clone, Default)]
struct FakeGit {
    state: Arc<Mutex<FakeGitState>>,
}

impl FakeGit {
    fn publish(&self, url: &str, files: &[(&str, &str)]) {
        let files = files
            .iter()
            .map(|(path, body)| (path.to_string(), body.to_string()))
            .collect();
        self.state.lock().unwrap().remotes.insert(url.to_string(), files);
    }

    fn hang(&self, hang: bool) {
        self.state.lock().unwrap().hang = hang;
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) -> (HashMap<String, Vec<(String, String)>>, bool) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        (state.remotes.clone(), state.hang)
    }
}

fn checkout(path: &Path, files: &[(String, String)]) -> Result<()> {
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    for (rel, body) in files {
        let target = path.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, body)?;
    }
    Ok(())
}

#[async_trait]
impl GitClient for FakeGit {
    async fn clone_repo(&self, url: &str, path: &Path) -> Result<()> {
        let (remotes, hang) = self.record(format!("clone {}", url));
        if hang {
            std::future::pending::<()>().await;
        }
        // A failed clone leaves a partial directory behind.
        std::fs::create_dir_all(path.join(".git"))?;
        let files = remotes
            .get(url)
            .ok_or_else(|| anyhow!("repository '{}' not found", url))?;
        std::fs::write(path.join(".git/origin"), url)?;
        checkout(path, files)
    }

    async fn open(&self, path: &Path) -> Result<GitRepo> {
        self.record(format!("open {}", path.display()));
        if !path.join(".git/origin").is_file() {
            bail!("not a git repository: {}", path.display());
        }
        Ok(GitRepo {
            path: path.to_path_buf(),
        })
    }

    async fn remote_url(&self, repo: &GitRepo) -> Result<String> {
        Ok(std::fs::read_to_string(repo.path.join(".git/origin"))?)
    }

    async fn fetch(&self, repo: &GitRepo) -> Result<()> {
        let url = self.remote_url(repo).await?;
        let (remotes, _) = self.record(format!("fetch {}", url));
        let files = remotes
            .get(&url)
            .ok_or_else(|| anyhow!("could not read from remote '{}'", url))?;
        checkout(&repo.path, files)
    }
}

/// 26-dim letter histogram.
struct LetterEmbedder;

#[async_trait]
impl EmbeddingProvider for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }
    fn dims(&self) -> usize {
        26
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; 26];
                for c in text.chars().filter(|c| c.is_ascii_alphabetic()) {
                    v[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Never returns.
struct StalledEmbedder;

#[async_trait]
impl EmbeddingProvider for StalledEmbedder {
    fn model_name(&self) -> &str {
        "stalled"
    }
    fn dims(&self) -> usize {
        26
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        std::future::pending().await
    }
}

/// Sessions that fail chosen operations on top of [`InMemoryProjects`].
#[derive(Clone)]
struct ScriptedSessions {
    inner: InMemoryProjects,
    fail_ready_writes: bool,
    fail_get_number: Option<usize>,
    gets: Arc<AtomicUsize>,
}

struct ScriptedSession {
    inner: Box<dyn ProjectSession>,
    script: ScriptedSessions,
}

#[async_trait]
impl SessionFactory for ScriptedSessions {
    async fn open(&self) -> Result<Box<dyn ProjectSession>> {
        Ok(Box::new(ScriptedSession {
            inner: self.inner.open().await?,
            script: self.clone(),
        }))
    }
}

#[async_trait]
impl ProjectSession for ScriptedSession {
    async fn get(&mut self, project_id: &str) -> Result<Option<Project>> {
        let n = self.script.gets.fetch_add(1, Ordering::SeqCst) + 1;
        if self.script.fail_get_number == Some(n) {
            bail!("simulated read failure on get #{}", n);
        }
        self.inner.get(project_id).await
    }

    async fn update_status(&mut self, project: &mut Project, status: ContextStatus) -> Result<()> {
        if self.script.fail_ready_writes && status == ContextStatus::Ready {
            bail!("simulated READY write failure");
        }
        self.inner.update_status(project, status).await
    }

    async fn claim_for_indexing(&mut self, project: &mut Project) -> Result<bool> {
        self.inner.claim_for_indexing(project).await
    }

    fn close(self: Box<Self>) {
        self.inner.close();
    }
}

// ─── Harness ────────────────────────────────────────────────────────

struct Harness {
    _tmp: TempDir,
    workspace: FilesystemWorkspace,
    projects: InMemoryProjects,
    vectors: InMemoryVectorStore,
    git: FakeGit,
    events: RecordingEventSink,
    orchestrator: IndexingOrchestrator,
}

fn indexer(vectors: &InMemoryVectorStore) -> ContentIndexer {
    ContentIndexer::new(
        Arc::new(vectors.clone()),
        Arc::new(LetterEmbedder),
        FileFilter::new(&default_denied_extensions(), &[], MAX_FILE_BYTES).unwrap(),
        ChunkLimits::default(),
    )
}

fn build(timeouts: StageTimeouts) -> Harness {
    let tmp = TempDir::new().unwrap();
    let workspace = FilesystemWorkspace::new(tmp.path().join("clones"));
    let projects = InMemoryProjects::new();
    let vectors = InMemoryVectorStore::new();
    let git = FakeGit::default();
    let events = RecordingEventSink::new();

    let orchestrator = IndexingOrchestrator::new(
        Arc::new(projects.clone()),
        RepositorySynchronizer::new(workspace.clone(), Arc::new(git.clone())),
        indexer(&vectors),
    )
    .with_events(Arc::new(events.clone()))
    .with_timeouts(timeouts);

    Harness {
        _tmp: tmp,
        workspace,
        projects,
        vectors,
        git,
        events,
        orchestrator,
    }
}

fn harness() -> Harness {
    build(StageTimeouts::default())
}

fn scripted(fail_ready_writes: bool, fail_get_number: Option<usize>) -> Harness {
    let mut h = harness();
    let sessions = ScriptedSessions {
        inner: h.projects.clone(),
        fail_ready_writes,
        fail_get_number,
        gets: Arc::new(AtomicUsize::new(0)),
    };
    h.orchestrator = h.orchestrator.clone().with_sessions(Arc::new(sessions));
    h
}

impl Harness {
    fn add_project(&self, url: Option<&str>) -> Project {
        let project = Project::new(PROJECT, "owner-1", "demo", url.map(str::to_string));
        self.projects.insert(project.clone());
        project
    }

    fn set_status(&self, status: ContextStatus) {
        let mut project = self.projects.project(PROJECT).unwrap();
        project.context_status = status;
        self.projects.insert(project);
    }

    fn chunks(&self) -> Option<Vec<ChunkRecord>> {
        self.vectors.records_of(&collection_name(PROJECT))
    }

    fn writes(&self) -> Vec<ContextStatus> {
        self.projects.status_writes(PROJECT)
    }

    fn assert_sessions_balanced(&self, opened: usize) {
        assert_eq!(self.projects.sessions_opened(), opened);
        assert_eq!(self.projects.sessions_closed(), opened);
    }

    async fn run(&self, url: &str) {
        self.orchestrator.synchronize_and_index(PROJECT, url).await;
    }
}

const LONG_LINE: &str = "let total = items.len(); //"; // 27 chars

// ─── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_project_without_repository_stays_none() {
    let h = harness();
    let project = h.add_project(None);
    assert_eq!(project.context_status, ContextStatus::None);

    h.run(URL).await;

    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::None));
    assert!(h.git.calls().is_empty());
    assert!(h.writes().is_empty());
}

#[tokio::test]
async fn test_short_file_is_filtered_but_project_is_ready() {
    let h = harness();
    h.git.publish(URL, &[("a.py", "print('hi')")]);
    h.add_project(Some(URL));

    h.run(URL).await;

    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::Ready));
    assert_eq!(h.writes(), vec![ContextStatus::Indexing, ContextStatus::Ready]);
    assert_eq!(h.chunks(), Some(vec![]));
    h.assert_sessions_balanced(1);
}

#[tokio::test]
async fn test_single_chunk_id_and_metadata() {
    let h = harness();
    let line = "x".repeat(25);
    h.git.publish(URL, &[("a.py", line.as_str())]);
    h.add_project(Some(URL));

    h.run(URL).await;

    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::Ready));
    let chunks = h.chunks().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].id, "a.py::0");
    assert_eq!(chunks[0].document, line);
    assert_eq!(chunks[0].metadata.source, "a.py");
    assert_eq!(chunks[0].metadata.chunk_index, 0);
    assert_eq!(chunks[0].metadata.project_id, PROJECT);
    assert!(h
        .vectors
        .has_collection("project_context_3f2b9c1e_0d4a_4e8b_9a57_1c2d3e4f5a6b"));
}

#[tokio::test]
async fn test_clone_failure_marks_failed_and_removes_working_copy() {
    let h = harness();
    h.add_project(Some("https://unreachable.invalid/repo.git"));

    h.run("https://unreachable.invalid/repo.git").await;

    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::Failed));
    assert_eq!(h.writes(), vec![ContextStatus::Indexing, ContextStatus::Failed]);
    assert!(!h.workspace.exists(PROJECT));
    assert!(!h.vectors.has_collection(&collection_name(PROJECT)));
    assert!(h.vectors.deleted().is_empty());

    let failures = h.events.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage, Stage::Sync);
    h.assert_sessions_balanced(1);
}

#[tokio::test]
async fn test_vector_store_failure_keeps_working_copy() {
    let h = harness();
    h.git.publish(URL, &[("src/lib.rs", LONG_LINE)]);
    h.add_project(Some(URL));
    h.vectors.fail_adds(true);

    h.run(URL).await;

    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::Failed));
    assert_eq!(h.writes(), vec![ContextStatus::Indexing, ContextStatus::Failed]);
    assert!(h.workspace.exists(PROJECT));
    assert!(h.vectors.has_collection(&collection_name(PROJECT)));

    let failures = h.events.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage, Stage::Index);
    h.assert_sessions_balanced(1);
}

#[tokio::test]
async fn test_empty_repository_is_ready() {
    let h = harness();
    h.git.publish(URL, &[]);
    h.add_project(Some(URL));

    h.run(URL).await;

    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::Ready));
    assert_eq!(h.chunks(), Some(vec![]));
}

// ─── Properties ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_reindex_of_unchanged_repository_is_identical() {
    let h = harness();
    h.git.publish(
        URL,
        &[
            ("README.md", "# Demo\n\nThis project demonstrates repository indexing.\n\nshort"),
            ("src/main.rs", "fn main() {\n    println!(\"hello, world\");\n}\n"),
        ],
    );
    h.add_project(Some(URL));

    h.run(URL).await;
    let first = h.chunks().unwrap();

    h.set_status(ContextStatus::Pending);
    h.run(URL).await;
    let second = h.chunks().unwrap();

    assert_eq!(first, second);
    assert_eq!(
        first.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
        vec!["README.md::1", "src/main.rs::0"]
    );
    assert!(h.git.calls().iter().any(|c| c == &format!("fetch {}", URL)));
    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::Ready));
    h.assert_sessions_balanced(2);
}

#[tokio::test]
async fn test_reindex_drops_chunks_of_removed_files() {
    let h = harness();
    h.git.publish(URL, &[("old.md", LONG_LINE), ("keep.md", LONG_LINE)]);
    h.add_project(Some(URL));
    h.run(URL).await;

    h.git.publish(URL, &[("keep.md", LONG_LINE)]);
    h.set_status(ContextStatus::Pending);
    h.run(URL).await;

    let ids: Vec<String> = h.chunks().unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["keep.md::0"]);
    assert_eq!(h.vectors.deleted(), vec![collection_name(PROJECT)]);
}

#[tokio::test]
async fn test_failed_project_is_retried() {
    let h = harness();
    h.add_project(Some(URL));
    h.run(URL).await;
    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::Failed));

    h.git.publish(URL, &[("a.md", LONG_LINE)]);
    h.run(URL).await;

    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::Ready));
    assert_eq!(
        h.writes(),
        vec![
            ContextStatus::Indexing,
            ContextStatus::Failed,
            ContextStatus::Indexing,
            ContextStatus::Ready
        ]
    );
}

#[tokio::test]
async fn test_guard_skips_non_indexable_statuses() {
    for status in [ContextStatus::Ready, ContextStatus::None, ContextStatus::Indexing] {
        let h = harness();
        h.git.publish(URL, &[("a.md", LONG_LINE)]);
        h.add_project(Some(URL));
        h.set_status(status);

        h.run(URL).await;

        assert!(h.git.calls().is_empty(), "git touched for {}", status);
        assert!(h.writes().is_empty(), "status written for {}", status);
        assert_eq!(h.projects.status(PROJECT), Some(status));
        h.assert_sessions_balanced(1);

        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, EventKind::Skipped { .. }));
    }
}

#[tokio::test]
async fn test_url_change_reclones() {
    let h = harness();
    h.git.publish(URL, &[("old.md", LONG_LINE)]);
    h.git.publish(OTHER_URL, &[("new.md", LONG_LINE)]);
    h.add_project(Some(URL));
    h.run(URL).await;

    let mut project = h.projects.project(PROJECT).unwrap();
    assert!(project.set_repository_url(Some(OTHER_URL.to_string())));
    h.projects.insert(project);
    h.run(OTHER_URL).await;

    let calls = h.git.calls();
    assert!(calls.contains(&format!("clone {}", OTHER_URL)));
    assert!(!calls.iter().any(|c| c.starts_with("fetch")));
    let ids: Vec<String> = h.chunks().unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["new.md::0"]);
    assert!(!h.workspace.path_for(PROJECT).join("old.md").exists());
}

#[tokio::test]
async fn test_synchronizer_actions() {
    let tmp = TempDir::new().unwrap();
    let git = FakeGit::default();
    git.publish(URL, &[("a.md", LONG_LINE)]);
    git.publish(OTHER_URL, &[("b.md", LONG_LINE)]);
    let sync = RepositorySynchronizer::new(FilesystemWorkspace::new(tmp.path()), Arc::new(git.clone()));

    let first = sync.sync("p1", URL).await;
    assert_eq!(first.outcome.unwrap(), SyncAction::Cloned);
    assert_eq!(first.path, tmp.path().join("p1"));

    assert_eq!(sync.sync("p1", URL).await.outcome.unwrap(), SyncAction::Fetched);
    assert_eq!(sync.sync("p1", OTHER_URL).await.outcome.unwrap(), SyncAction::Recloned);
    assert!(tmp.path().join("p1/b.md").exists());
    assert!(!tmp.path().join("p1/a.md").exists());
}

#[tokio::test]
async fn test_synchronizer_rejects_corrupt_working_copy() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("p1/src")).unwrap();
    let git = FakeGit::default();
    let sync = RepositorySynchronizer::new(FilesystemWorkspace::new(tmp.path()), Arc::new(git));

    let result = sync.sync("p1", URL).await;
    assert!(!result.ok());
    assert!(result.outcome.unwrap_err().to_string().contains("not a usable git repository"));
}

// ─── Failure handling ───────────────────────────────────────────────

#[tokio::test]
async fn test_missing_project_is_logged_only() {
    let h = harness();
    h.run(URL).await;

    assert!(h.git.calls().is_empty());
    h.assert_sessions_balanced(1);
    assert!(matches!(
        h.events.events()[0].kind,
        EventKind::Skipped { .. }
    ));
}

#[tokio::test]
async fn test_invalid_project_id_opens_no_session() {
    let h = harness();
    h.orchestrator.synchronize_and_index("../escape", URL).await;
    h.orchestrator.remove_workspace("../escape").await;

    assert_eq!(h.projects.sessions_opened(), 0);
    assert!(h.git.calls().is_empty());
}

#[tokio::test]
async fn test_claim_write_failure_leaves_status_untouched() {
    let h = harness();
    h.git.publish(URL, &[("a.md", LONG_LINE)]);
    h.add_project(Some(URL));
    h.projects.fail_writes(true);

    h.run(URL).await;

    assert!(h.git.calls().is_empty());
    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::Pending));
    h.assert_sessions_balanced(1);
}

#[tokio::test]
async fn test_ready_write_failure_falls_back_to_failed() {
    let h = scripted(true, None);
    h.git.publish(URL, &[("a.md", LONG_LINE)]);
    h.add_project(Some(URL));

    h.run(URL).await;

    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::Failed));
    assert_eq!(h.writes(), vec![ContextStatus::Indexing, ContextStatus::Failed]);
    h.assert_sessions_balanced(1);
}

#[tokio::test]
async fn test_final_read_failure_is_forced_to_failed() {
    // get #1 is the entry guard, get #2 the indexer's final read.
    let h = scripted(false, Some(2));
    h.git.publish(URL, &[("a.md", LONG_LINE)]);
    h.add_project(Some(URL));

    h.run(URL).await;

    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::Failed));
    assert_eq!(h.writes(), vec![ContextStatus::Indexing, ContextStatus::Failed]);
    h.assert_sessions_balanced(1);
}

#[tokio::test]
async fn test_project_deleted_during_run_gets_no_final_write() {
    let h = harness();
    h.git.publish(URL, &[("a.md", LONG_LINE)]);
    h.add_project(Some(URL));

    let mut store = IndexingStatusStore::open(&h.projects, Arc::new(h.events.clone()))
        .await
        .unwrap();
    let sync = h.orchestrator.synchronizer().sync(PROJECT, URL).await;
    h.projects.remove(PROJECT);
    let outcome = h
        .orchestrator
        .indexer()
        .index(&mut store, PROJECT, &sync.path)
        .await
        .unwrap();
    store.close();

    assert!(matches!(outcome, repo_context::indexer::IndexOutcome::ProjectMissing));
    assert!(h.writes().is_empty());
}

#[tokio::test]
async fn test_missing_working_copy_is_reported_without_status_write() {
    let h = harness();
    h.add_project(Some(URL));

    let mut store = IndexingStatusStore::open(&h.projects, Arc::new(h.events.clone()))
        .await
        .unwrap();
    let err = h
        .orchestrator
        .indexer()
        .index(&mut store, PROJECT, &h.workspace.path_for(PROJECT))
        .await
        .unwrap_err();
    store.close();

    assert!(matches!(err, IndexError::MissingWorkingCopy(_)));
    assert!(h.writes().is_empty());
}

#[tokio::test]
async fn test_hung_sync_times_out() {
    let h = build(StageTimeouts {
        sync: Duration::from_millis(50),
        index: Duration::from_secs(5),
    });
    h.git.publish(URL, &[("a.md", LONG_LINE)]);
    h.git.hang(true);
    h.add_project(Some(URL));

    h.run(URL).await;

    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::Failed));
    assert!(!h.workspace.exists(PROJECT));
    let failures = h.events.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        &failures[0].kind,
        EventKind::Failed { error } if error.contains("timed out")
    ));
    h.assert_sessions_balanced(1);
}

#[tokio::test]
async fn test_hung_index_times_out_and_keeps_working_copy() {
    let timeouts = StageTimeouts {
        sync: Duration::from_secs(5),
        index: Duration::from_millis(50),
    };
    let h = build(timeouts);
    h.git.publish(URL, &[("a.md", LONG_LINE)]);
    h.add_project(Some(URL));
    let stalled = IndexingOrchestrator::new(
        Arc::new(h.projects.clone()),
        h.orchestrator.synchronizer().clone(),
        ContentIndexer::new(
            Arc::new(h.vectors.clone()),
            Arc::new(StalledEmbedder),
            FileFilter::new(&default_denied_extensions(), &[], MAX_FILE_BYTES).unwrap(),
            ChunkLimits::default(),
        ),
    )
    .with_events(Arc::new(h.events.clone()))
    .with_timeouts(timeouts);

    stalled.synchronize_and_index(PROJECT, URL).await;

    assert_eq!(h.projects.status(PROJECT), Some(ContextStatus::Failed));
    assert_eq!(h.writes(), vec![ContextStatus::Indexing, ContextStatus::Failed]);
    assert!(h.workspace.exists(PROJECT));
    let failures = h.events.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage, Stage::Index);
    assert!(matches!(
        &failures[0].kind,
        EventKind::Failed { error } if error.contains("timed out")
    ));
    h.assert_sessions_balanced(1);
}

// ─── Concurrency, retrieval, cleanup ────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_triggers_index_once() {
    let h = harness();
    h.git.publish(URL, &[("a.md", LONG_LINE)]);
    h.add_project(Some(URL));

    let first = h.orchestrator.spawn(PROJECT, URL);
    let second = h.orchestrator.spawn(PROJECT, URL);
    first.await.unwrap();
    second.await.unwrap();

    let clones = h.git.calls().iter().filter(|c| c.starts_with("clone")).count();
    assert_eq!(clones, 1);
    assert_eq!(h.writes(), vec![ContextStatus::Indexing, ContextStatus::Ready]);
    h.assert_sessions_balanced(2);
}

#[tokio::test]
async fn test_query_context_ranks_matching_chunk_first() {
    let h = harness();
    h.git.publish(
        URL,
        &[
            ("db.md", "zzzz zzzz zzzz zzzz zzzz zzzz"),
            ("web.md", "aaaa bbbb aaaa bbbb aaaa bbbb"),
        ],
    );
    h.add_project(Some(URL));
    h.run(URL).await;

    let hits = h.orchestrator.query_context(PROJECT, "zzz", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.metadata.source, "db.md");

    let none = h.orchestrator.query_context("unindexed", "zzz", 2).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_remove_workspace_and_collection() {
    let h = harness();
    h.git.publish(URL, &[("a.md", LONG_LINE)]);
    h.add_project(Some(URL));
    h.run(URL).await;
    assert!(h.workspace.exists(PROJECT));

    h.orchestrator.remove_workspace(PROJECT).await;
    h.orchestrator.remove_workspace(PROJECT).await;
    h.orchestrator.remove_collection(PROJECT).await;

    assert!(!h.workspace.exists(PROJECT));
    assert!(!h.vectors.has_collection(&collection_name(PROJECT)));
    assert!(h.events.failures().is_empty());
}

#[tokio::test]
async fn test_failed_workspace_removal_is_reported() {
    let h = harness();
    std::fs::create_dir_all(h.workspace.base_dir()).unwrap();
    std::fs::write(h.workspace.path_for(PROJECT), "not a directory").unwrap();

    h.orchestrator.remove_workspace(PROJECT).await;

    let failures = h.events.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage, Stage::Cleanup);
    assert_eq!(failures[0].project_id, PROJECT);
}

#[tokio::test]
async fn test_remove_collection_refuses_invalid_id() {
    let h = harness();
    h.vectors
        .get_or_create_collection(&collection_name(".."), Arc::new(LetterEmbedder))
        .await
        .unwrap();

    h.orchestrator.remove_collection("..").await;

    assert!(h.vectors.has_collection(&collection_name("..")));
    assert!(h.vectors.deleted().is_empty());
}

#[tokio::test]
async fn test_denylisted_and_dotfiles_are_not_indexed() {
    let h = harness();
    h.git.publish(
        URL,
        &[
            ("logo.svg", "<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>"),
            (".env", "DATABASE_URL=postgres://user:secret@db/app"),
            ("yarn.lock", "# THIS IS AN AUTOGENERATED FILE. DO NOT EDIT"),
            ("src/app.ts", "export const answer: number = 42;"),
        ],
    );
    h.add_project(Some(URL));
    h.run(URL).await;

    let ids: Vec<String> = h.chunks().unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["src/app.ts::0"]);
}
