//! Discovery engine tests against a scripted prober

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_console::db::{ActivityRepo, DiscoveryRepo};
use fleet_console::discovery::engine::INTERRUPTED_REASON;
use fleet_console::discovery::{DiscoveryRequest, DiscoveryTask, TaskStatus};
use fleet_console::nodes::Credentials;
use fleet_console::Error;

mod common;
use common::{MockProber, discovery_engine, dump_database, setup_test_db, wait_terminal};

const SECRET: &str = "s3cret-probe-pass";

fn request(cidr: &str) -> DiscoveryRequest {
    DiscoveryRequest {
        cidr: cidr.to_string(),
        port: 9001,
        credentials: Credentials::new("ops", SECRET),
        timeout_seconds: Some(2),
        max_workers: Some(4),
        created_by: "test".to_string(),
    }
}

#[tokio::test]
async fn scan_of_small_range_finds_live_host() {
    let pool = setup_test_db();
    let prober = Arc::new(MockProber::new(&["192.168.1.1"]));
    let engine = discovery_engine(&pool, prober.clone());

    let task = engine.start(request("192.168.1.0/30")).unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.total_ips, 2);

    let done = wait_terminal(&engine, &task.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.total_ips, 2);
    assert_eq!(done.scanned_ips, 2);
    assert_eq!(done.found_nodes, 1);
    assert_eq!(done.failed_ips, 1);
    assert_eq!(done.scanned_ips, done.found_nodes + done.failed_ips);
    assert!(done.error.is_none());
    assert_eq!(prober.probe_count(), 2);

    let results = engine.results(&task.id).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].ip, "192.168.1.1");
    assert_eq!(results[0].port, 9001);
    assert_eq!(results[0].node_name, "supervisor-192.168.1.1");
    assert_eq!(results[0].version.as_deref(), Some("4.2.5"));

    let progress = engine.progress(&task.id).unwrap();
    assert!((progress.percent - 100.0).abs() < f64::EPSILON);
    assert_eq!(engine.active_scans(), 0);
}

#[tokio::test]
async fn progress_never_moves_backward() {
    let pool = setup_test_db();
    let prober = Arc::new(MockProber::new(&["10.0.0.5"]).with_delay(Duration::from_millis(5)));
    let engine = discovery_engine(&pool, prober);

    let mut req = request("10.0.0.0/27");
    req.max_workers = Some(3);
    let task = engine.start(req).unwrap();

    let mut last = 0;
    loop {
        let progress = engine.progress(&task.id).unwrap();
        assert!(progress.scanned_ips >= last);
        assert!(progress.scanned_ips <= progress.total_ips);
        assert!(progress.percent >= 0.0 && progress.percent <= 100.0);
        last = progress.scanned_ips;
        if progress.status.is_terminal() {
            assert_eq!(progress.status, TaskStatus::Completed);
            assert_eq!(progress.scanned_ips, 30);
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn worker_pool_bounds_concurrent_probes() {
    let pool = setup_test_db();
    let prober = Arc::new(MockProber::new(&[]).with_delay(Duration::from_millis(20)));
    let engine = discovery_engine(&pool, prober.clone());

    let mut req = request("10.1.0.0/28");
    req.max_workers = Some(3);
    let task = engine.start(req).unwrap();
    let done = wait_terminal(&engine, &task.id).await;

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.failed_ips, 14);
    assert_eq!(prober.probe_count(), 14);
    assert!(prober.max_in_flight() <= 3);
    assert!(prober.max_in_flight() >= 1);
}

#[tokio::test]
async fn probe_timeout_counts_as_failure() {
    let pool = setup_test_db();
    let prober = Arc::new(MockProber::new(&["10.2.0.1"]).with_delay(Duration::from_secs(5)));
    let engine = discovery_engine(&pool, prober);

    let mut req = request("10.2.0.0/30");
    req.timeout_seconds = Some(1);
    let task = engine.start(req).unwrap();
    let done = wait_terminal(&engine, &task.id).await;

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.scanned_ips, 2);
    assert_eq!(done.found_nodes, 0);
    assert_eq!(done.failed_ips, 2);
}

#[tokio::test]
async fn cancel_freezes_counters() {
    let pool = setup_test_db();
    let prober = Arc::new(MockProber::new(&[]).with_delay(Duration::from_millis(30)));
    let engine = discovery_engine(&pool, prober);

    let mut req = request("10.3.0.0/24");
    req.max_workers = Some(2);
    let task = engine.start(req).unwrap();

    while engine.get(&task.id).unwrap().scanned_ips < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let cancelled = engine.cancel(&task.id).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.scanned_ips < cancelled.total_ips);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let later = engine.get(&task.id).unwrap();
    assert_eq!(later.status, TaskStatus::Cancelled);
    assert_eq!(later.scanned_ips, cancelled.scanned_ips);
    assert_eq!(later.found_nodes, cancelled.found_nodes);
    assert_eq!(later.failed_ips, cancelled.failed_ips);

    // terminal tasks cannot be cancelled again
    assert!(matches!(engine.cancel(&task.id), Err(Error::Conflict(_))));
}

#[tokio::test]
async fn cancel_stops_new_probes() {
    let pool = setup_test_db();
    let prober = Arc::new(MockProber::new(&[]).with_delay(Duration::from_millis(30)));
    let engine = discovery_engine(&pool, prober.clone());

    let mut req = request("10.3.1.0/24");
    req.max_workers = Some(4);
    let task = engine.start(req).unwrap();

    while engine.get(&task.id).unwrap().scanned_ips < 4 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    engine.cancel(&task.id).unwrap();
    let at_cancel = prober.probe_count();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let later = prober.probe_count();
    assert!(later <= at_cancel + 4, "{later} probes after cancel at {at_cancel}");
    assert!(later < 254);
    assert_eq!(engine.active_scans(), 0);
}

#[tokio::test]
async fn storage_failure_fails_the_task() {
    let pool = setup_test_db();
    let prober = Arc::new(
        MockProber::new(&["10.11.0.1", "10.11.0.2", "10.11.0.3"])
            .with_delay(Duration::from_millis(50)),
    );
    let engine = discovery_engine(&pool, prober);

    let mut req = request("10.11.0.0/29");
    req.max_workers = Some(1);
    let task = engine.start(req).unwrap();
    pool.get()
        .unwrap()
        .execute_batch("DROP TABLE discovery_results")
        .unwrap();

    let done = wait_terminal(&engine, &task.id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error.as_deref().unwrap().contains("discovery_results"));
    assert!(done.scanned_ips < done.total_ips);
    assert_eq!(engine.active_scans(), 0);
}

#[tokio::test]
async fn submissions_after_shutdown_are_rejected() {
    let pool = setup_test_db();
    let engine = discovery_engine(&pool, Arc::new(MockProber::new(&[])));

    engine.shutdown();
    assert!(matches!(
        engine.start(request("10.12.0.0/30")),
        Err(Error::Conflict(_))
    ));
    assert_eq!(engine.list(None, None, None).unwrap().total, 0);
}

#[tokio::test]
async fn delete_requires_terminal_status() {
    let pool = setup_test_db();
    let prober = Arc::new(MockProber::new(&["10.4.0.1"]).with_delay(Duration::from_millis(50)));
    let engine = discovery_engine(&pool, prober);

    let mut req = request("10.4.0.0/28");
    req.max_workers = Some(1);
    let task = engine.start(req).unwrap();

    let err = engine.delete(&task.id).unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert!(err.to_string().contains("running"));
    assert!(engine.get(&task.id).is_ok());

    engine.cancel(&task.id).unwrap();
    wait_terminal(&engine, &task.id).await;
    engine.delete(&task.id).unwrap();

    assert!(matches!(engine.get(&task.id), Err(Error::NotFound(_))));
    assert!(matches!(engine.results(&task.id), Err(Error::NotFound(_))));
    assert!(matches!(engine.delete(&task.id), Err(Error::NotFound(_))));
}

#[tokio::test]
async fn delete_removes_results() {
    let pool = setup_test_db();
    let prober = Arc::new(MockProber::new(&["10.5.0.1", "10.5.0.2"]));
    let engine = discovery_engine(&pool, prober);

    let task = engine.start(request("10.5.0.0/30")).unwrap();
    wait_terminal(&engine, &task.id).await;
    assert_eq!(engine.results(&task.id).unwrap().len(), 2);

    engine.delete(&task.id).unwrap();
    assert!(DiscoveryRepo::new(pool.clone()).results(&task.id).unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_active_scan_is_rejected() {
    let pool = setup_test_db();
    let prober = Arc::new(MockProber::new(&[]).with_delay(Duration::from_millis(50)));
    let engine = discovery_engine(&pool, prober);

    let mut req = request("10.6.0.0/28");
    req.max_workers = Some(1);
    let first = engine.start(req.clone()).unwrap();

    // same network once host bits are cleared
    let mut same = req.clone();
    same.cidr = "10.6.0.7/28".to_string();
    assert!(matches!(engine.start(same), Err(Error::Conflict(_))));

    let mut other_port = req.clone();
    other_port.port = 9002;
    let second = engine.start(other_port).unwrap();
    assert_ne!(first.id, second.id);

    engine.cancel(&first.id).unwrap();
    engine.cancel(&second.id).unwrap();
    wait_terminal(&engine, &first.id).await;

    // a finished scan no longer blocks the range
    let again = engine.start(req).unwrap();
    engine.cancel(&again.id).unwrap();
}

#[tokio::test]
async fn invalid_requests_create_no_task() {
    let pool = setup_test_db();
    let engine = discovery_engine(&pool, Arc::new(MockProber::new(&[])));

    let mut bad = vec![request("not-a-cidr"), request(""), request("10.0.0.0/8")];
    let mut no_user = request("10.0.0.0/30");
    no_user.credentials = Credentials::new("", SECRET);
    bad.push(no_user);
    let mut zero_port = request("10.0.0.0/30");
    zero_port.port = 0;
    bad.push(zero_port);
    let mut slow = request("10.0.0.0/30");
    slow.timeout_seconds = Some(61);
    bad.push(slow);
    let mut no_workers = request("10.0.0.0/30");
    no_workers.max_workers = Some(0);
    bad.push(no_workers);

    for req in bad {
        let cidr = req.cidr.clone();
        assert!(
            matches!(engine.start(req), Err(Error::Validation(_))),
            "{cidr} should be rejected"
        );
    }

    assert_eq!(engine.list(None, None, None).unwrap().total, 0);
    assert_eq!(engine.active_scans(), 0);
}

#[tokio::test]
async fn password_never_reaches_storage() {
    let pool = setup_test_db();
    let engine = discovery_engine(&pool, Arc::new(MockProber::new(&["10.7.0.1"])));

    let task = engine.start(request("10.7.0.0/30")).unwrap();
    wait_terminal(&engine, &task.id).await;
    engine.delete(&task.id).unwrap();

    let dump = dump_database(&pool);
    assert!(dump.contains("discovery.start"));
    assert!(dump.contains("ops"));
    assert!(!dump.contains(SECRET));
    assert!(!format!("{task:?}").contains(SECRET));
}

#[tokio::test]
async fn listing_pages_and_filters() {
    let pool = setup_test_db();
    let engine = discovery_engine(&pool, Arc::new(MockProber::new(&[])));

    for i in 0..3 {
        let task = engine.start(request(&format!("10.8.{i}.0/30"))).unwrap();
        wait_terminal(&engine, &task.id).await;
    }

    let page = engine.list(None, None, None).unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.page, 1);
    assert_eq!(page.limit, 20);
    assert_eq!(page.tasks.len(), 3);

    let second = engine.list(Some(2), Some(2), None).unwrap();
    assert_eq!(second.total, 3);
    assert_eq!(second.tasks.len(), 1);

    let capped = engine.list(Some(0), Some(1_000), None).unwrap();
    assert_eq!(capped.page, 1);
    assert_eq!(capped.limit, 100);

    let completed = engine
        .list(None, None, Some(TaskStatus::Completed))
        .unwrap();
    assert_eq!(completed.total, 3);
    let running = engine.list(None, None, Some(TaskStatus::Running)).unwrap();
    assert_eq!(running.total, 0);
    assert!(running.tasks.is_empty());
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let pool = setup_test_db();
    let engine = discovery_engine(&pool, Arc::new(MockProber::new(&[])));

    assert!(matches!(engine.get("missing"), Err(Error::NotFound(_))));
    assert!(matches!(engine.progress("missing"), Err(Error::NotFound(_))));
    assert!(matches!(engine.cancel("missing"), Err(Error::NotFound(_))));
    assert!(matches!(engine.delete("missing"), Err(Error::NotFound(_))));
}

#[tokio::test]
async fn recover_fails_interrupted_tasks() {
    let pool = setup_test_db();
    let repo = DiscoveryRepo::new(pool.clone());
    let now = Utc::now();
    let orphan = DiscoveryTask {
        id: "orphan".to_string(),
        cidr: "10.9.0.0/30".to_string(),
        port: 9001,
        timeout_seconds: 3,
        max_workers: 4,
        created_by: "test".to_string(),
        status: TaskStatus::Running,
        total_ips: 2,
        scanned_ips: 1,
        found_nodes: 0,
        failed_ips: 1,
        error: None,
        created_at: now,
        updated_at: now,
    };
    repo.create(&orphan).unwrap();

    let engine = discovery_engine(&pool, Arc::new(MockProber::new(&[])));
    assert_eq!(engine.recover().unwrap(), 1);

    let task = engine.get("orphan").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some(INTERRUPTED_REASON));
    assert_eq!(task.scanned_ips, 1);
    assert_eq!(engine.recover().unwrap(), 0);

    // the range is free again
    let fresh = engine.start(request("10.9.0.0/30")).unwrap();
    wait_terminal(&engine, &fresh.id).await;
}

#[tokio::test]
async fn lifecycle_is_recorded_in_activity_log() {
    let pool = setup_test_db();
    let engine = discovery_engine(&pool, Arc::new(MockProber::new(&["10.10.0.1"])));

    let task = engine.start(request("10.10.0.0/30")).unwrap();
    wait_terminal(&engine, &task.id).await;
    engine.delete(&task.id).unwrap();

    let actions: Vec<String> = ActivityRepo::new(pool.clone())
        .recent(10)
        .unwrap()
        .into_iter()
        .filter(|e| e.resource == task.id)
        .map(|e| e.action)
        .collect();
    assert!(actions.contains(&"discovery.start".to_string()));
    assert!(actions.contains(&"discovery.complete".to_string()));
    assert!(actions.contains(&"discovery.delete".to_string()));
}
