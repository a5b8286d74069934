//! End-to-end pipeline runs against in-memory archive and destination fakes.

use async_trait::async_trait;
use bridge_traits::archive::{ArchiveEntry, ArchiveRef, ArchiveSource};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::retry::RetryPolicy;
use bridge_traits::storage::{
    ChunkProgress, DestinationRecord, DestinationStore, PropertyMap, RecordMetadata,
    ResumableSession, ROOT_PROPERTY_KEY,
};
use bridge_traits::time::FixedClock;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use core_async::sync::CancellationToken;
use core_backup::dedup::DedupIndex;
use core_backup::uploader::keys;
use core_backup::{
    hash_bytes, ArchiveScanner, DateResolver, DateSource, DestinationDedupIndex, ItemState,
    PipelineRunner, RunResult, ScanOptions, ScanRequest, SkipReason,
};
use core_runtime::{BackupConfig, FallbackDatePolicy};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ROOT: &str = "root-folder";

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeArchives {
    archives: Vec<(ArchiveRef, Vec<(String, Vec<u8>)>)>,
}

impl FakeArchives {
    fn with_archive(mut self, name: &str, modified_at: DateTime<Utc>, files: &[(&str, &[u8])]) -> Self {
        let archive = ArchiveRef::new(name, name).with_modified_at(modified_at);
        let files = files.iter().map(|(p, b)| (p.to_string(), b.to_vec())).collect();
        self.archives.push((archive, files));
        self
    }

    fn files(&self, archive: &ArchiveRef) -> BridgeResult<&Vec<(String, Vec<u8>)>> {
        self.archives
            .iter()
            .find(|(a, _)| a.id == archive.id)
            .map(|(_, files)| files)
            .ok_or_else(|| BridgeError::NotFound(archive.id.clone()))
    }
}

#[async_trait]
impl ArchiveSource for FakeArchives {
    async fn list_archives(&self) -> BridgeResult<Vec<ArchiveRef>> {
        Ok(self.archives.iter().map(|(a, _)| a.clone()).collect())
    }

    async fn list_entries(&self, archive: &ArchiveRef) -> BridgeResult<Vec<ArchiveEntry>> {
        Ok(self
            .files(archive)?
            .iter()
            .map(|(p, b)| ArchiveEntry::new(p.clone(), b.len() as u64))
            .collect())
    }

    async fn read_entry(&self, archive: &ArchiveRef, path: &str) -> BridgeResult<Bytes> {
        self.files(archive)?
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, b)| Bytes::from(b.clone()))
            .ok_or_else(|| BridgeError::NotFound(path.to_string()))
    }
}

struct Session {
    metadata: RecordMetadata,
    total: u64,
    received: Vec<u8>,
}

#[derive(Default)]
struct StoreState {
    next_id: u64,
    folders: HashMap<(String, String), String>,
    records: Vec<(DestinationRecord, Vec<u8>)>,
    sessions: HashMap<String, Session>,
    /// Fail this many upcoming chunk requests with 503
    failing_chunks: u32,
    /// Accept this many chunks before `failing_chunks` applies
    chunks_before_failure: u32,
    chunk_attempts: u32,
    folder_creations: u32,
    revoked: bool,
    unreachable: bool,
    /// Answer every property lookup with 503
    lookups_unavailable: bool,
}

impl StoreState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn create_record(&mut self, metadata: &RecordMetadata, data: Vec<u8>) -> DestinationRecord {
        let record = DestinationRecord {
            id: self.id("file"),
            name: metadata.name.clone(),
            parent_id: Some(metadata.parent_id.clone()),
            size: Some(data.len() as u64),
            properties: metadata.properties.clone(),
        };
        self.records.push((record.clone(), data));
        record
    }

    fn check_credential(&self) -> BridgeResult<()> {
        if self.revoked {
            return Err(BridgeError::Unauthorized("token revoked".into()));
        }
        Ok(())
    }
}

/// Drive-shaped destination held in memory.
#[derive(Default)]
struct FakeDrive {
    state: Mutex<StoreState>,
}

impl FakeDrive {
    fn seed(&self, folder: &str, name: &str, data: &[u8], date: &str) {
        let mut properties = PropertyMap::new();
        properties.insert(keys::CONTENT_IDENTITY.into(), hash_bytes(data).to_string());
        properties.insert(keys::CAPTURE_LOCAL_DATE.into(), date.into());
        properties.insert(keys::MIME_TYPE.into(), "image/jpeg".into());
        properties.insert(keys::SOURCE.into(), "google_takeout".into());
        properties.insert(ROOT_PROPERTY_KEY.into(), ROOT.into());
        let metadata = RecordMetadata {
            name: name.into(),
            parent_id: folder.into(),
            mime_type: "image/jpeg".into(),
            properties,
            description: None,
        };
        self.state.lock().unwrap().create_record(&metadata, data.to_vec());
    }

    fn records(&self) -> Vec<DestinationRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .iter()
            .map(|(r, _)| r.clone())
            .collect()
    }

    fn folder_name(&self, id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .folders
            .iter()
            .find(|(_, v)| v.as_str() == id)
            .map(|((_, name), _)| name.clone())
    }

    fn record_named(&self, name: &str) -> DestinationRecord {
        self.records()
            .into_iter()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("no record named {name}"))
    }
}

#[async_trait]
impl DestinationStore for FakeDrive {
    async fn check_root(&self, root_id: &str) -> BridgeResult<()> {
        let state = self.state.lock().unwrap();
        state.check_credential()?;
        if state.unreachable {
            return Err(BridgeError::Network("connection refused".into()));
        }
        if root_id != ROOT {
            return Err(BridgeError::NotFound(root_id.to_string()));
        }
        Ok(())
    }

    async fn ensure_folder(&self, parent_id: &str, name: &str) -> BridgeResult<String> {
        let mut state = self.state.lock().unwrap();
        state.check_credential()?;
        let key = (parent_id.to_string(), name.to_string());
        if let Some(id) = state.folders.get(&key) {
            return Ok(id.clone());
        }
        let id = state.id("folder");
        state.folder_creations += 1;
        state.folders.insert(key, id.clone());
        Ok(id)
    }

    async fn find_by_property(&self, root_id: &str, key: &str, value: &str) -> BridgeResult<Vec<DestinationRecord>> {
        let state = self.state.lock().unwrap();
        state.check_credential()?;
        if state.lookups_unavailable {
            return Err(BridgeError::Http {
                status: 503,
                message: "backend error".into(),
            });
        }
        Ok(state
            .records
            .iter()
            .map(|(r, _)| r)
            .filter(|r| r.property(ROOT_PROPERTY_KEY) == Some(root_id) && r.property(key) == Some(value))
            .cloned()
            .collect())
    }

    async fn upload_multipart(&self, metadata: &RecordMetadata, data: Bytes) -> BridgeResult<DestinationRecord> {
        let mut state = self.state.lock().unwrap();
        state.check_credential()?;
        Ok(state.create_record(metadata, data.to_vec()))
    }

    async fn start_resumable(&self, metadata: &RecordMetadata, total_size: u64) -> BridgeResult<ResumableSession> {
        let mut state = self.state.lock().unwrap();
        state.check_credential()?;
        let uri = state.id("session");
        state.sessions.insert(
            uri.clone(),
            Session {
                metadata: metadata.clone(),
                total: total_size,
                received: Vec::new(),
            },
        );
        Ok(ResumableSession {
            session_uri: uri,
            total_size,
        })
    }

    async fn upload_chunk(&self, session: &ResumableSession, offset: u64, chunk: Bytes) -> BridgeResult<ChunkProgress> {
        let mut state = self.state.lock().unwrap();
        state.check_credential()?;
        state.chunk_attempts += 1;
        if state.chunks_before_failure > 0 {
            state.chunks_before_failure -= 1;
        } else if state.failing_chunks > 0 {
            state.failing_chunks -= 1;
            return Err(BridgeError::Http {
                status: 503,
                message: "backend error".into(),
            });
        }

        let open = state
            .sessions
            .get_mut(&session.session_uri)
            .ok_or_else(|| BridgeError::NotFound(session.session_uri.clone()))?;
        if offset == open.received.len() as u64 {
            open.received.extend_from_slice(&chunk);
        }
        if (open.received.len() as u64) < open.total {
            return Ok(ChunkProgress::Incomplete {
                committed: open.received.len() as u64,
            });
        }

        let Some(done) = state.sessions.remove(&session.session_uri) else {
            return Err(BridgeError::NotFound(session.session_uri.clone()));
        };
        Ok(ChunkProgress::Complete(state.create_record(&done.metadata, done.received)))
    }

    async fn query_resumable(&self, session: &ResumableSession) -> BridgeResult<ChunkProgress> {
        let state = self.state.lock().unwrap();
        let open = state
            .sessions
            .get(&session.session_uri)
            .ok_or_else(|| BridgeError::NotFound(session.session_uri.clone()))?;
        Ok(ChunkProgress::Incomplete {
            committed: open.received.len() as u64,
        })
    }

    async fn cancel_resumable(&self, session: &ResumableSession) -> BridgeResult<()> {
        self.state.lock().unwrap().sessions.remove(&session.session_uri);
        Ok(())
    }

    async fn delete_record(&self, record_id: &str) -> BridgeResult<()> {
        self.state
            .lock()
            .unwrap()
            .records
            .retain(|(r, _)| r.id != record_id);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

const CHUNK: usize = 256 * 1024;

fn sidecar(epoch: i64) -> Vec<u8> {
    format!(r#"{{"title": "ignored", "photoTakenTime": {{"timestamp": "{}"}}}}"#, epoch).into_bytes()
}

fn instant(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(max_attempts)
        .with_base_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(2))
        .with_max_elapsed(None)
        .with_jitter(false)
}

fn config() -> core_runtime::BackupConfigBuilder {
    BackupConfig::builder()
        .drive_root_id(ROOT)
        .target_offset("+09:00")
        .chunk_size_bytes(CHUNK)
        .resumable_threshold_bytes(1024 * 1024)
        .max_concurrent_items(3)
        .upload_retry(fast_retry(4))
        .query_retry(fast_retry(3))
}

struct Harness {
    source: Arc<FakeArchives>,
    drive: Arc<FakeDrive>,
    config: BackupConfig,
}

impl Harness {
    fn new(source: FakeArchives, config: BackupConfig) -> Self {
        Self {
            source: Arc::new(source),
            drive: Arc::new(FakeDrive::default()),
            config,
        }
    }

    fn resolver(&self) -> DateResolver {
        DateResolver::new(
            self.config.target_offset,
            Arc::new(FixedClock::new(instant(2026, 3, 1, 0, 0))),
        )
    }

    async fn run(&self, request: ScanRequest, dry_run: bool) -> RunResult {
        self.run_with(request, dry_run, &CancellationToken::new()).await
    }

    async fn run_with(&self, request: ScanRequest, dry_run: bool, cancel: &CancellationToken) -> RunResult {
        let options = ScanOptions {
            favorites_only: self.config.favorites_only,
            max_archives: self.config.max_archives_per_run,
            fallback: self.config.fallback_policy.clone(),
        };
        let scanner = ArchiveScanner::new(self.source.clone(), self.resolver(), options);
        let plan = scanner.plan(&request, None).await.unwrap();

        let dedup = Arc::new(DestinationDedupIndex::new(
            self.drive.clone(),
            ROOT,
            self.config.query_retry.clone(),
        ));
        let runner = PipelineRunner::new(
            self.source.clone(),
            self.drive.clone(),
            dedup,
            self.resolver(),
            &self.config,
        );
        runner.run(plan, dry_run, cancel).await
    }
}

/// A: capture 2026-02-10 10:00 KST; B: already backed up; C: no sidecar.
fn abc_archives() -> FakeArchives {
    let a_taken = instant(2026, 2, 10, 1, 0).timestamp();
    FakeArchives::default().with_archive(
        "takeout-20260215.zip",
        instant(2026, 2, 15, 3, 0),
        &[
            ("Takeout/Google Photos/A.jpg", b"alpha-bytes"),
            ("Takeout/Google Photos/A.jpg.json", &sidecar(a_taken)),
            ("Takeout/Google Photos/B.jpg", b"bravo-bytes"),
            ("Takeout/Google Photos/B.jpg.json", &sidecar(a_taken)),
            ("Takeout/Google Photos/C.jpg", b"charlie-bytes"),
        ],
    )
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_end_to_end_new_duplicate_and_missing_metadata() {
    let harness = Harness::new(abc_archives(), config().build().unwrap());
    harness.drive.seed("folder-old", "B-earlier.jpg", b"bravo-bytes", "2026-01-01");

    let result = harness.run(ScanRequest::All, false).await;
    let outcome = &result.outcome;

    assert_eq!(outcome.seen, 3);
    assert_eq!(outcome.uploaded, 1);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.uploaded_fallback, 1);
    assert_eq!(outcome.metadata_fallbacks, 1);
    assert!(outcome.fatal.is_none());
    assert!(outcome.is_success());

    let a = harness.drive.record_named("ignored");
    assert_eq!(harness.drive.folder_name(a.parent_id.as_deref().unwrap()).as_deref(), Some("2026-02-10"));
    assert_eq!(a.property(keys::DATE_SOURCE), Some("capture"));
    assert_eq!(a.property(keys::SOURCE), Some("google_takeout"));

    let c = harness.drive.record_named("C.jpg");
    assert_eq!(c.property(keys::CAPTURE_LOCAL_DATE), Some("2026-02-15"));
    assert_eq!(c.property(keys::DATE_SOURCE), Some("fallback"));

    let c_report = outcome
        .items
        .iter()
        .find(|i| i.entry_path.ends_with("C.jpg"))
        .unwrap();
    assert_eq!(c_report.state, ItemState::Uploaded);
    assert_eq!(c_report.date_source, DateSource::Fallback);
    assert_eq!(c_report.metadata_error.as_deref(), Some("no sidecar"));

    let b_report = outcome
        .items
        .iter()
        .find(|i| i.entry_path.ends_with("B.jpg"))
        .unwrap();
    assert_eq!(b_report.skip_reason, Some(SkipReason::Duplicate));

    assert_eq!(
        result.cursor.map(|c| c.archive_name),
        Some("takeout-20260215.zip".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_run_is_idempotent() {
    let harness = Harness::new(abc_archives(), config().build().unwrap());

    let first = harness.run(ScanRequest::All, false).await;
    assert_eq!(first.outcome.uploaded, 2);
    assert_eq!(first.outcome.uploaded_fallback, 1);
    let records_after_first = harness.drive.records().len();

    let second = harness.run(ScanRequest::All, false).await;
    assert_eq!(second.outcome.seen, 3);
    assert_eq!(second.outcome.uploaded, 0);
    assert_eq!(second.outcome.uploaded_fallback, 0);
    assert_eq!(second.outcome.skipped, 3);
    assert_eq!(harness.drive.records().len(), records_after_first);
}

#[tokio::test(start_paused = true)]
async fn test_late_evening_utc_routes_to_next_local_day() {
    let taken = instant(2026, 1, 5, 23, 50).timestamp();
    let source = FakeArchives::default().with_archive(
        "takeout-a.zip",
        instant(2026, 1, 20, 0, 0),
        &[("p/night.jpg", b"night"), ("p/night.jpg.json", &sidecar(taken))],
    );
    let harness = Harness::new(source, config().build().unwrap());

    harness.run(ScanRequest::All, false).await;

    let record = harness.drive.record_named("ignored");
    assert_eq!(record.property(keys::CAPTURE_LOCAL_DATE), Some("2026-01-06"));
    assert_eq!(
        harness.drive.folder_name(record.parent_id.as_deref().unwrap()).as_deref(),
        Some("2026-01-06")
    );
}

#[tokio::test(start_paused = true)]
async fn test_chunk_failures_exhaust_retries_and_leave_nothing() {
    let big = vec![7u8; CHUNK * 2 + 10];
    let source = FakeArchives::default().with_archive(
        "takeout-big.zip",
        instant(2026, 2, 1, 0, 0),
        &[("p/movie.mp4", &big)],
    );
    let harness = Harness::new(source, config().resumable_threshold_bytes(CHUNK as u64).build().unwrap());
    {
        let mut state = harness.drive.state.lock().unwrap();
        state.failing_chunks = u32::MAX;
    }

    let result = harness.run(ScanRequest::All, false).await;

    assert_eq!(result.outcome.failed, 1);
    assert_eq!(result.outcome.uploaded, 0);
    let report = &result.outcome.items[0];
    assert_eq!(report.state, ItemState::Failed);
    assert_eq!(report.failure.as_ref().map(|f| f.0.as_str()), Some("TransientNetworkError"));

    let state = harness.drive.state.lock().unwrap();
    assert_eq!(state.chunk_attempts, 4);
    assert!(state.records.is_empty());
    assert!(state.sessions.is_empty());
    assert!(result.cursor.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_transfer_is_not_counted_as_backed_up() {
    let big = vec![9u8; CHUNK * 3];
    let identity = hash_bytes(&big);
    let source = FakeArchives::default().with_archive(
        "takeout-big.zip",
        instant(2026, 2, 1, 0, 0),
        &[("p/movie.mp4", &big)],
    );
    let harness = Harness::new(source, config().resumable_threshold_bytes(CHUNK as u64).build().unwrap());
    {
        let mut state = harness.drive.state.lock().unwrap();
        state.chunks_before_failure = 1;
        state.failing_chunks = u32::MAX;
    }

    let result = harness.run(ScanRequest::All, false).await;
    assert_eq!(result.outcome.failed, 1);

    let dedup = DestinationDedupIndex::new(harness.drive.clone(), ROOT, fast_retry(1));
    assert!(!dedup.exists(&identity, &CancellationToken::new()).await.unwrap());

    // The destination recovers and the next run completes the item.
    harness.drive.state.lock().unwrap().failing_chunks = 0;
    let retry = harness.run(ScanRequest::All, false).await;
    assert_eq!(retry.outcome.uploaded_fallback, 1);
    assert!(dedup.exists(&identity, &CancellationToken::new()).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_bucket_fallback_and_unparsable_sidecar() {
    let source = FakeArchives::default().with_archive(
        "takeout-a.zip",
        instant(2026, 2, 1, 0, 0),
        &[("p/x.jpg", b"x"), ("p/x.jpg.json", b"{not json")],
    );
    let config = config()
        .fallback_policy(FallbackDatePolicy::Bucket("unknown-date".into()))
        .build()
        .unwrap();
    let harness = Harness::new(source, config);

    let result = harness.run(ScanRequest::All, false).await;

    assert_eq!(result.outcome.uploaded, 0);
    assert_eq!(result.outcome.uploaded_fallback, 1);
    assert_eq!(result.outcome.metadata_fallbacks, 1);
    let record = harness.drive.record_named("x.jpg");
    assert_eq!(record.property(keys::CAPTURE_LOCAL_DATE), Some("unknown-date"));
    assert!(result.outcome.items[0]
        .metadata_error
        .as_deref()
        .is_some_and(|m| m.starts_with("sidecar unparsable")));
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_has_no_side_effects() {
    let harness = Harness::new(abc_archives(), config().build().unwrap());
    harness.drive.seed("folder-old", "B-earlier.jpg", b"bravo-bytes", "2026-01-01");

    let result = harness.run(ScanRequest::All, true).await;

    assert_eq!(result.outcome.seen, 3);
    assert_eq!(result.outcome.uploaded, 0);
    assert_eq!(result.outcome.skipped, 3);
    assert_eq!(result.outcome.would_upload, 2);
    assert!(result.cursor.is_none());

    let state = harness.drive.state.lock().unwrap();
    assert_eq!(state.records.len(), 1);
    assert_eq!(state.folder_creations, 0);
}

#[tokio::test(start_paused = true)]
async fn test_identical_content_in_one_run_uploads_once() {
    let source = FakeArchives::default()
        .with_archive("takeout-1.zip", instant(2026, 2, 1, 0, 0), &[("p/one.jpg", b"same")])
        .with_archive("takeout-2.zip", instant(2026, 2, 2, 0, 0), &[("q/copy.jpg", b"same")]);
    let harness = Harness::new(source, config().build().unwrap());

    let result = harness.run(ScanRequest::All, false).await;

    assert_eq!(result.outcome.uploaded_fallback, 1);
    assert_eq!(result.outcome.skipped, 1);
    assert_eq!(harness.drive.records().len(), 1);
    let reasons: Vec<_> = result.outcome.items.iter().filter_map(|i| i.skip_reason).collect();
    assert_eq!(reasons, vec![SkipReason::DuplicateInRun]);
}

#[tokio::test(start_paused = true)]
async fn test_revoked_credential_aborts_run() {
    let files: Vec<(String, Vec<u8>)> = (0..6)
        .map(|i| (format!("p/{i}.jpg"), format!("content-{i}").into_bytes()))
        .collect();
    let borrowed: Vec<(&str, &[u8])> = files.iter().map(|(p, b)| (p.as_str(), b.as_slice())).collect();
    let source = FakeArchives::default().with_archive("takeout.zip", instant(2026, 2, 1, 0, 0), &borrowed);
    let harness = Harness::new(source, config().max_concurrent_items(1).build().unwrap());

    // The root check succeeds, then the token is revoked before any item runs.
    struct RevokeOnLookup(Arc<FakeDrive>);

    #[async_trait]
    impl DedupIndex for RevokeOnLookup {
        async fn exists(
            &self,
            _identity: &core_backup::ContentIdentity,
            _cancel: &CancellationToken,
        ) -> core_backup::Result<bool> {
            self.0.state.lock().unwrap().revoked = true;
            Ok(false)
        }
    }

    let resolver = harness.resolver();
    let scanner = ArchiveScanner::new(harness.source.clone(), resolver.clone(), ScanOptions::default());
    let plan = scanner.plan(&ScanRequest::All, None).await.unwrap();
    let runner = PipelineRunner::new(
        harness.source.clone(),
        harness.drive.clone(),
        Arc::new(RevokeOnLookup(harness.drive.clone())),
        resolver,
        &harness.config,
    );
    let result = runner.run(plan, false, &CancellationToken::new()).await;
    let outcome = result.outcome;

    assert!(outcome.fatal.as_deref().is_some_and(|f| f.starts_with("AuthError")));
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.abandoned, 5);
    assert_eq!(outcome.uploaded, 0);
    assert!(result.cursor.is_none());
    assert!(outcome.to_markdown().contains("**FATAL**"));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_root_is_fatal_but_reported() {
    let harness = Harness::new(abc_archives(), config().build().unwrap());
    harness.drive.state.lock().unwrap().unreachable = true;

    let result = harness.run(ScanRequest::All, false).await;

    assert!(result.outcome.fatal.as_deref().is_some_and(|f| f.contains("backup root unreachable")));
    assert_eq!(result.outcome.seen, 0);
    assert_eq!(result.outcome.abandoned, 3);
    assert!(result.outcome.finished_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_run_starts_nothing() {
    let harness = Harness::new(abc_archives(), config().build().unwrap());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = harness.run_with(ScanRequest::All, false, &cancel).await;

    assert_eq!(result.outcome.uploaded + result.outcome.uploaded_fallback, 0);
    assert!(harness.drive.records().is_empty());
    assert!(result.cursor.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cursor_stops_at_first_incomplete_archive() {
    let source = FakeArchives::default()
        .with_archive("takeout-1.zip", instant(2026, 2, 1, 0, 0), &[("p/a.jpg", b"a")])
        .with_archive("takeout-2.zip", instant(2026, 2, 2, 0, 0), &[("p/big.mp4", &[1u8; CHUNK + 1])])
        .with_archive("takeout-3.zip", instant(2026, 2, 3, 0, 0), &[("p/c.jpg", b"c")]);
    let harness = Harness::new(
        source,
        config()
            .resumable_threshold_bytes(CHUNK as u64)
            .max_concurrent_items(1)
            .build()
            .unwrap(),
    );
    harness.drive.state.lock().unwrap().failing_chunks = u32::MAX;

    let result = harness.run(ScanRequest::Incremental, false).await;

    assert_eq!(result.outcome.uploaded_fallback, 2);
    assert_eq!(result.outcome.failed, 1);
    assert_eq!(
        result.cursor.map(|c| c.archive_name),
        Some("takeout-1.zip".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_month_range_filters_items() {
    let jan = instant(2026, 1, 15, 0, 0).timestamp();
    let feb = instant(2026, 2, 15, 0, 0).timestamp();
    let source = FakeArchives::default().with_archive(
        "takeout.zip",
        instant(2026, 2, 20, 0, 0),
        &[
            ("p/jan.jpg", b"jan"),
            ("p/jan.jpg.json", &sidecar(jan)),
            ("p/feb.jpg", b"feb"),
            ("p/feb.jpg.json", &sidecar(feb)),
        ],
    );
    let harness = Harness::new(source, config().build().unwrap());

    let result = harness.run(ScanRequest::months("2026-01", "2026-01").unwrap(), false).await;

    assert_eq!(result.outcome.label, "2026-01-01..2026-01-31");
    assert_eq!(result.outcome.seen, 1);
    assert_eq!(harness.drive.records()[0].property(keys::CAPTURE_LOCAL_DATE), Some("2026-01-15"));
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_interrupts_dedup_backoff() {
    let files: Vec<(String, Vec<u8>)> = (0..6)
        .map(|i| (format!("p/{i}.jpg"), format!("slow-{i}").into_bytes()))
        .collect();
    let borrowed: Vec<(&str, &[u8])> = files.iter().map(|(p, b)| (p.as_str(), b.as_slice())).collect();
    let source = FakeArchives::default()
        .with_archive("takeout-1.zip", instant(2026, 2, 1, 0, 0), &borrowed)
        .with_archive("takeout-2.zip", instant(2026, 2, 2, 0, 0), &[("q/late.jpg", b"late")]);
    let slow_queries = RetryPolicy::default()
        .with_max_attempts(5)
        .with_base_delay(Duration::from_secs(60))
        .with_max_delay(Duration::from_secs(600))
        .with_max_elapsed(None)
        .with_jitter(false);
    let config = config()
        .query_retry(slow_queries)
        .max_concurrent_items(3)
        .run_timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    let harness = Harness::new(source, config);
    harness.drive.state.lock().unwrap().lookups_unavailable = true;

    let started = core_async::time::Instant::now();
    let result = harness.run(ScanRequest::Incremental, false).await;
    let elapsed = started.elapsed();
    let outcome = &result.outcome;

    assert!(elapsed >= Duration::from_secs(1), "stopped before the deadline: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "run overran its deadline: {elapsed:?}");
    assert!(outcome.timed_out);
    assert!(outcome.fatal.is_none());
    assert_eq!(outcome.abandoned, 7);
    assert_eq!(outcome.seen, 0);
    assert_eq!(outcome.failed, 0);
    assert!(outcome.to_markdown().contains("- **Timed out**: true"));
    assert!(harness.drive.records().is_empty());
    assert!(result.cursor.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_run_keeps_cursor_on_finished_archives() {
    let source = FakeArchives::default()
        .with_archive("takeout-1.zip", instant(2026, 2, 1, 0, 0), &[("p/a.jpg", b"a")])
        .with_archive("takeout-2.zip", instant(2026, 2, 2, 0, 0), &[("p/b.jpg", b"b")]);
    let config = config()
        .max_concurrent_items(1)
        .query_retry(
            RetryPolicy::default()
                .with_max_attempts(5)
                .with_base_delay(Duration::from_secs(60))
                .with_max_delay(Duration::from_secs(600))
                .with_max_elapsed(None)
                .with_jitter(false),
        )
        .run_timeout(Duration::from_secs(30))
        .build()
        .unwrap();
    let harness = Harness::new(source, config);

    // The first archive completes; lookups then stall until the deadline.
    struct StallAfterFirst {
        drive: Arc<FakeDrive>,
        inner: DestinationDedupIndex,
    }

    #[async_trait]
    impl DedupIndex for StallAfterFirst {
        async fn exists(
            &self,
            identity: &core_backup::ContentIdentity,
            cancel: &CancellationToken,
        ) -> core_backup::Result<bool> {
            let found = self.inner.exists(identity, cancel).await;
            self.drive.state.lock().unwrap().lookups_unavailable = true;
            found
        }
    }

    let resolver = harness.resolver();
    let scanner = ArchiveScanner::new(harness.source.clone(), resolver.clone(), ScanOptions::default());
    let plan = scanner.plan(&ScanRequest::Incremental, None).await.unwrap();
    let dedup = StallAfterFirst {
        drive: harness.drive.clone(),
        inner: DestinationDedupIndex::new(harness.drive.clone(), ROOT, harness.config.query_retry.clone()),
    };
    let runner = PipelineRunner::new(
        harness.source.clone(),
        harness.drive.clone(),
        Arc::new(dedup),
        resolver,
        &harness.config,
    );
    let result = runner.run(plan, false, &CancellationToken::new()).await;

    assert!(result.outcome.timed_out);
    assert_eq!(result.outcome.uploaded_fallback, 1);
    assert_eq!(result.outcome.abandoned, 1);
    assert_eq!(
        result.cursor.map(|c| c.archive_name),
        Some("takeout-1.zip".to_string())
    );
}
