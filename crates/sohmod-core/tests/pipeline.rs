//! End-to-end runs against a local scripted HTTP server.

mod common;

use std::time::Duration;

use common::archive_server::{ArchiveServer, Reply};
use common::fixtures::{config, finished, tree, work_area_leftovers, zip_of};
use sohmod_core::checksum::sha256_reader;
use sohmod_core::config::ConflictPolicy;
use sohmod_core::orchestrator::{
    ConflictError, EventFilter, FailureKind, Orchestrator, PipelineEvent, RequestId, RunState,
    SubmitError, Subscription,
};
use sohmod_core::request::InstallRequest;
use sohmod_core::retry::RetryPolicy;
use tempfile::tempdir;

fn raw(url: &str, name: &str) -> String {
    format!("shipofharkinian:{url},{name},12345")
}

/// Collect state-change events (progress samples dropped) until every id in
/// `ids` has reached a terminal state.
async fn collect_until_done(sub: &mut Subscription, ids: &[RequestId]) -> Vec<PipelineEvent> {
    tokio::time::timeout(Duration::from_secs(30), async {
        let mut events = Vec::new();
        let mut done = 0;
        while let Some(ev) = sub.next().await {
            if ev.progress.is_some() || !ids.contains(&ev.request_id) {
                continue;
            }
            if ev.is_terminal() {
                done += 1;
            }
            events.push(ev);
            if done == ids.len() {
                break;
            }
        }
        events
    })
    .await
    .expect("runs did not finish in time")
}

fn position(events: &[PipelineEvent], id: RequestId, state: &RunState) -> usize {
    events
        .iter()
        .position(|e| e.request_id == id && &e.state == state)
        .unwrap_or_else(|| panic!("no {state} event for {id}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn install_twice_is_idempotent() {
    let archive = zip_of(&[
        ("mod.otr", b"otr-payload".as_slice()),
        ("textures/link.png", b"png".as_slice()),
    ]);
    let server = ArchiveServer::start();
    server.route("/cool.zip", vec![Reply::Body(archive.clone())]);
    let dir = tempdir().unwrap();
    let orch = Orchestrator::new(config(dir.path())).unwrap();

    let first = orch.submit(&raw(&server.url("/cool.zip"), "CoolMod")).unwrap();
    let run = finished(&orch, first).await;
    assert_eq!(run.state, RunState::Succeeded);
    assert_eq!(run.state.exit_code(), Some(0));
    assert_eq!(run.attempt_count, 1);
    assert_eq!(
        run.archive_sha256.as_deref(),
        Some(sha256_reader(archive.as_slice()).unwrap().as_str())
    );
    let installation = run.installation.unwrap();
    assert!(!installation.replaced_previous);
    let once = tree(&installation.path);

    let second = orch.submit(&raw(&server.url("/cool.zip"), "CoolMod")).unwrap();
    let run = finished(&orch, second).await;
    assert_eq!(run.state, RunState::Succeeded);
    assert!(run.installation.as_ref().unwrap().replaced_previous);
    assert_eq!(tree(&dir.path().join("CoolMod")), once);
    assert_eq!(once.len(), 2);
    assert_eq!(once["mod.otr"], b"otr-payload");
    assert!(work_area_leftovers(dir.path()).is_empty());

    let names: Vec<_> = orch
        .layout()
        .installed_mods()
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["CoolMod"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_transition_is_published() {
    let server = ArchiveServer::start();
    server.route("/a.zip", vec![Reply::Body(zip_of(&[("a.txt", b"a".as_slice())]))]);
    let dir = tempdir().unwrap();
    let orch = Orchestrator::new(config(dir.path())).unwrap();
    let mut sub = orch.subscribe(EventFilter::All);

    let id = orch.submit(&raw(&server.url("/a.zip"), "Events")).unwrap();
    let states: Vec<_> = collect_until_done(&mut sub, &[id])
        .await
        .into_iter()
        .map(|e| e.state)
        .collect();
    assert_eq!(
        states,
        vec![
            RunState::Queued,
            RunState::Fetching,
            RunState::Extracting,
            RunState::Committing,
            RunState::Succeeded,
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn traversal_archive_leaves_no_trace() {
    let server = ArchiveServer::start();
    server.route("/good.zip", vec![Reply::Body(zip_of(&[("keep.txt", b"v1".as_slice())]))]);
    server.route(
        "/evil.zip",
        vec![Reply::Body(zip_of(&[
            ("readme.txt", b"hi".as_slice()),
            ("../../evil", b"payload".as_slice()),
        ]))],
    );
    let dir = tempdir().unwrap();
    let root = dir.path().join("mods");
    let orch = Orchestrator::new(config(&root)).unwrap();

    let ok = orch.submit(&raw(&server.url("/good.zip"), "Target")).unwrap();
    assert_eq!(finished(&orch, ok).await.state, RunState::Succeeded);

    let bad = orch.submit(&raw(&server.url("/evil.zip"), "Target")).unwrap();
    let run = finished(&orch, bad).await;
    let failure = run.error().expect("traversal must fail").clone();
    assert_eq!(failure.kind, FailureKind::Extract);
    assert!(failure.message.contains("path traversal"), "{}", failure.message);
    assert_eq!(run.state.exit_code(), Some(3));

    assert!(!root.join("evil").exists());
    assert!(!dir.path().join("evil").exists());
    assert!(work_area_leftovers(&root).is_empty());
    // The earlier installation is untouched.
    assert_eq!(tree(&root.join("Target"))["keep.txt"], b"v1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_503s_then_success_takes_three_attempts() {
    let server = ArchiveServer::start();
    server.route(
        "/flaky.zip",
        vec![
            Reply::Status(503),
            Reply::Status(503),
            Reply::Body(zip_of(&[("x.bin", b"x".as_slice())])),
        ],
    );
    let dir = tempdir().unwrap();
    let orch = Orchestrator::new(config(dir.path())).unwrap();
    let id = orch.submit(&raw(&server.url("/flaky.zip"), "Flaky")).unwrap();
    let run = finished(&orch, id).await;
    assert_eq!(run.state, RunState::Succeeded);
    assert_eq!(run.attempt_count, 3);
    assert_eq!(server.hits("/flaky.zip"), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn not_found_fails_without_retrying() {
    let server = ArchiveServer::start();
    server.route("/missing.zip", vec![Reply::Status(404)]);
    let dir = tempdir().unwrap();
    let orch = Orchestrator::new(config(dir.path())).unwrap();
    let id = orch.submit(&raw(&server.url("/missing.zip"), "Missing")).unwrap();
    let run = finished(&orch, id).await;
    let failure = run.error().unwrap();
    assert_eq!(failure.kind, FailureKind::Fetch);
    assert!(failure.message.contains("404"));
    assert_eq!(run.attempt_count, 1);
    assert_eq!(server.hits("/missing.zip"), 1);
    assert_eq!(run.state.exit_code(), Some(2));
    assert!(work_area_leftovers(dir.path()).is_empty());
    assert!(!dir.path().join("Missing").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversized_and_corrupt_archives_fail_cleanly() {
    let server = ArchiveServer::start();
    server.route("/big.zip", vec![Reply::Body(vec![0u8; 64 * 1024])]);
    server.route("/junk.zip", vec![Reply::Body(b"this is not a zip archive".to_vec())]);
    let dir = tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.fetch.max_bytes = 1024;
    let orch = Orchestrator::new(cfg).unwrap();

    let big = orch.submit(&raw(&server.url("/big.zip"), "Big")).unwrap();
    let junk = orch.submit(&raw(&server.url("/junk.zip"), "Junk")).unwrap();
    let big = finished(&orch, big).await;
    let junk = finished(&orch, junk).await;

    assert_eq!(big.error().unwrap().kind, FailureKind::Fetch);
    assert_eq!(server.hits("/big.zip"), 1, "size limit is not retried");
    assert_eq!(junk.error().unwrap().kind, FailureKind::Extract);
    assert!(junk.error().unwrap().message.contains("corrupt"));
    assert_eq!(server.hits("/junk.zip"), 3, "corrupt archives use up the attempt budget");
    assert_eq!(junk.attempt_count, 3);
    assert!(work_area_leftovers(dir.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_names_run_in_parallel() {
    let slow = |name: &str| Reply::Slow {
        body: zip_of(&[(name, vec![1u8; 8 * 1024].as_slice())]),
        chunks: 4,
        delay: Duration::from_millis(150),
    };
    let server = ArchiveServer::start();
    server.route("/one.zip", vec![slow("one.bin")]);
    server.route("/two.zip", vec![slow("two.bin")]);
    let dir = tempdir().unwrap();
    let orch = Orchestrator::new(config(dir.path())).unwrap();
    let mut sub = orch.subscribe(EventFilter::All);

    let a = orch.submit(&raw(&server.url("/one.zip"), "One")).unwrap();
    let b = orch.submit(&raw(&server.url("/two.zip"), "Two")).unwrap();
    let events = collect_until_done(&mut sub, &[a, b]).await;

    let first_done = events.iter().position(|e| e.is_terminal()).unwrap();
    assert!(position(&events, a, &RunState::Fetching) < first_done);
    assert!(position(&events, b, &RunState::Fetching) < first_done);
    assert!(events.iter().filter(|e| e.is_terminal()).all(|e| e.state == RunState::Succeeded));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_name_requests_are_queued_in_order() {
    let server = ArchiveServer::start();
    server.route(
        "/v1.zip",
        vec![Reply::Slow {
            body: zip_of(&[("version.txt", b"v1".as_slice())]),
            chunks: 3,
            delay: Duration::from_millis(100),
        }],
    );
    server.route("/v2.zip", vec![Reply::Body(zip_of(&[("version.txt", b"v2".as_slice())]))]);
    let dir = tempdir().unwrap();
    let orch = Orchestrator::new(config(dir.path())).unwrap();
    let mut sub = orch.subscribe(EventFilter::All);

    let first = orch.submit(&raw(&server.url("/v1.zip"), "Shared")).unwrap();
    let second = orch.submit(&raw(&server.url("/v2.zip"), "Shared")).unwrap();
    let events = collect_until_done(&mut sub, &[first, second]).await;

    let first_end = position(&events, first, &RunState::Succeeded);
    assert!(position(&events, second, &RunState::Fetching) > first_end);
    assert_eq!(finished(&orch, second).await.state, RunState::Succeeded);
    assert_eq!(tree(&dir.path().join("Shared"))["version.txt"], b"v2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reject_policy_reports_conflict() {
    let server = ArchiveServer::start();
    server.route(
        "/slow.zip",
        vec![Reply::Slow {
            body: zip_of(&[("a", b"a".as_slice())]),
            chunks: 2,
            delay: Duration::from_millis(200),
        }],
    );
    let dir = tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.conflict_policy = ConflictPolicy::Reject;
    let orch = Orchestrator::new(cfg).unwrap();

    let url = server.url("/slow.zip");
    let first = orch.submit(&raw(&url, "Solo")).unwrap();
    let err = orch
        .submit_request(InstallRequest::from_parts(&url, "Solo", None).unwrap())
        .unwrap_err();
    assert!(matches!(
        err,
        SubmitError::Conflict(ConflictError::AlreadyInstalling { .. })
    ));
    assert_eq!(err.exit_code(), 5);
    assert_eq!(finished(&orch, first).await.state, RunState::Succeeded);
    assert_eq!(server.hits("/slow.zip"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_mid_fetch_removes_partial_archive() {
    let server = ArchiveServer::start();
    server.route(
        "/huge.zip",
        vec![Reply::Slow {
            body: vec![0u8; 256 * 1024],
            chunks: 64,
            delay: Duration::from_millis(100),
        }],
    );
    let dir = tempdir().unwrap();
    let orch = Orchestrator::new(config(dir.path())).unwrap();
    let mut sub = orch.subscribe(EventFilter::All);
    let id = orch.submit(&raw(&server.url("/huge.zip"), "Huge")).unwrap();

    // Wait for bytes to be flowing.
    let progress = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let ev = sub.next().await.expect("stream open");
            if let Some(p) = ev.progress {
                if p.bytes_done > 0 {
                    return p;
                }
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(progress.total_bytes, Some(256 * 1024));
    assert!(progress.fraction().unwrap() < 1.0);

    orch.cancel(id).unwrap();
    let run = finished(&orch, id).await;
    assert_eq!(run.state, RunState::Cancelled);
    assert!(work_area_leftovers(dir.path()).is_empty());
    assert!(!dir.path().join("Huge").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn startup_purges_stale_work_areas() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join(".tmp")).unwrap();
    std::fs::create_dir_all(dir.path().join(".staging/deadbeef/sub")).unwrap();
    std::fs::write(dir.path().join(".tmp/deadbeef.archive"), b"half").unwrap();
    std::fs::create_dir_all(dir.path().join("Installed")).unwrap();

    let orch = Orchestrator::new(config(dir.path())).unwrap();
    assert!(work_area_leftovers(dir.path()).is_empty());
    assert!(dir.path().join("Installed").is_dir());
    assert_eq!(orch.layout().installed_mods().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn corrupt_download_is_fetched_again() {
    let archive = zip_of(&[("mod.otr", b"otr-payload".as_slice())]);
    let server = ArchiveServer::start();
    server.route(
        "/flaky.zip",
        vec![
            Reply::Body(b"cdn returned an error page".to_vec()),
            Reply::Body(archive),
        ],
    );
    let dir = tempdir().unwrap();
    let orch = Orchestrator::new(config(dir.path())).unwrap();
    let mut sub = orch.subscribe(EventFilter::All);

    let id = orch.submit(&raw(&server.url("/flaky.zip"), "Flaky")).unwrap();
    let events = collect_until_done(&mut sub, &[id]).await;
    let run = finished(&orch, id).await;

    assert_eq!(run.state, RunState::Succeeded);
    assert_eq!(run.attempt_count, 2);
    assert_eq!(server.hits("/flaky.zip"), 2);
    let states: Vec<&RunState> = events.iter().map(|e| &e.state).collect();
    assert_eq!(
        states,
        vec![
            &RunState::Queued,
            &RunState::Fetching,
            &RunState::Extracting,
            &RunState::Fetching,
            &RunState::Extracting,
            &RunState::Committing,
            &RunState::Succeeded,
        ]
    );
    assert!(work_area_leftovers(dir.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn truncated_body_is_retried() {
    let archive = zip_of(&[("mod.otr", b"otr-payload-that-gets-cut-short".as_slice())]);
    let server = ArchiveServer::start();
    server.route(
        "/cut.zip",
        vec![
            Reply::Truncated {
                body: archive[..archive.len() / 2].to_vec(),
                declared: archive.len() as u64,
            },
            Reply::Body(archive.clone()),
        ],
    );
    let dir = tempdir().unwrap();
    let orch = Orchestrator::new(config(dir.path())).unwrap();

    let id = orch.submit(&raw(&server.url("/cut.zip"), "Cut")).unwrap();
    let run = finished(&orch, id).await;
    assert_eq!(run.state, RunState::Succeeded);
    assert_eq!(run.attempt_count, 2);
    assert_eq!(run.archive_bytes, Some(archive.len() as u64));
    assert_eq!(server.hits("/cut.zip"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_fetch_times_out() {
    let server = ArchiveServer::start();
    server.route(
        "/stall.zip",
        vec![Reply::Slow {
            body: vec![0u8; 64 * 1024],
            chunks: 64,
            delay: Duration::from_millis(100),
        }],
    );
    let dir = tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.fetch.attempt_timeout = Duration::from_secs(1);
    cfg.retry = RetryPolicy::no_retry();
    let orch = Orchestrator::new(cfg).unwrap();

    let id = orch.submit(&raw(&server.url("/stall.zip"), "Stall")).unwrap();
    let run = finished(&orch, id).await;
    let failure = run.error().expect("run should fail");
    assert_eq!(failure.kind, FailureKind::Fetch);
    assert!(failure.message.contains("timed out"), "{}", failure.message);
    assert_eq!(run.state.exit_code(), Some(2));
    assert_eq!(run.attempt_count, 1);
    assert!(work_area_leftovers(dir.path()).is_empty());
    assert!(!dir.path().join("Stall").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_instance_leaves_running_install_alone() {
    let archive = zip_of(&[("mod.otr", b"payload streamed in small pieces".as_slice())]);
    let server = ArchiveServer::start();
    server.route(
        "/slow.zip",
        vec![Reply::Slow {
            body: archive,
            chunks: 20,
            delay: Duration::from_millis(50),
        }],
    );
    let dir = tempdir().unwrap();
    let first = Orchestrator::new(config(dir.path())).unwrap();
    assert!(first.layout().owns_root());
    let mut sub = first.subscribe(EventFilter::All);
    let id = first.submit(&raw(&server.url("/slow.zip"), "Slow")).unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let ev = sub.next().await.expect("stream open");
            if ev.progress.map_or(false, |p| p.bytes_done > 0) {
                return;
            }
        }
    })
    .await
    .unwrap();

    let second = Orchestrator::new(config(dir.path())).unwrap();
    assert!(!second.layout().owns_root());

    let run = finished(&first, id).await;
    assert_eq!(run.state, RunState::Succeeded);
    assert!(dir.path().join("Slow/mod.otr").is_file());
}
