use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use futures::StreamExt;
use port_scan_rs::config::{DropPolicy, ScanConfig};
use port_scan_rs::error::ScanError;
use port_scan_rs::ports::parse_port_spec;
use port_scan_rs::service::ScanService;
use port_scan_rs::types::{Port, ProgressEvent};
use tokio::net::TcpListener;
use tokio::time::Instant;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

async fn open_listener() -> (TcpListener, Port) {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port() as Port;
    (listener, port)
}

async fn closed_port() -> Port {
    let (listener, port) = open_listener().await;
    drop(listener);
    port
}

fn test_config() -> ScanConfig {
    let mut cfg = ScanConfig::default();
    cfg.concurrency.small = 64;
    cfg.concurrency.medium = 64;
    cfg.concurrency.large = 64;
    cfg.progress_capacity = 10_000;
    cfg.batch_pause = Duration::from_millis(10);
    cfg
}

async fn drain(service: &ScanService, id: &str) -> Vec<ProgressEvent> {
    let stream = service.stream_progress(id).await.expect("session exists");
    tokio::time::timeout(Duration::from_secs(60), stream.collect::<Vec<_>>())
        .await
        .expect("scan completes")
}

#[tokio::test]
async fn end_to_end_open_and_closed() {
    let (_a, open_a) = open_listener().await;
    let (_b, open_b) = open_listener().await;
    let closed = closed_port().await;

    let service = ScanService::new(test_config());
    let ports = parse_port_spec(&format!("{open_a},{open_b},{closed}")).unwrap();
    let id = service.start_scan(LOCALHOST, ports).await.unwrap();

    let events = drain(&service, &id).await;
    let last = events.last().expect("at least the complete event");
    assert!(last.is_complete());
    assert_eq!(last.completed, 3);
    assert_eq!(last.open_ports, 2);

    let mut results = service.poll_results(&id).await.unwrap();
    results.sort_by_key(|r| r.port);
    assert_eq!(results.len(), 3);
    for r in &results {
        assert_eq!(r.host, "127.0.0.1");
        if r.port == closed {
            assert!(!r.open);
            assert!(r.error.as_deref().is_some_and(|e| !e.is_empty()));
        } else {
            assert!(r.open);
            assert!(r.error.is_none());
        }
    }
    assert!(service.session(&id).await.unwrap().is_finished());
}

#[tokio::test]
async fn batched_scan_covers_all_ports_in_chunk_order() {
    let base = closed_port().await.clamp(1_024, 60_000);
    let ports: Vec<Port> = (base..base + 2_500).collect();

    let service = ScanService::new(test_config());
    let id = service.start_scan(LOCALHOST, ports.clone()).await.unwrap();
    let events = drain(&service, &id).await;

    let labels: Vec<String> = events.iter().filter_map(|e| e.batch_label.clone()).collect();
    assert_eq!(
        labels,
        vec!["batch 1/3", "batch 1/3", "batch 2/3", "batch 2/3", "batch 3/3", "batch 3/3"]
    );

    let results = service.poll_results(&id).await.unwrap();
    assert_eq!(results.len(), 2_500);
    let unique: HashSet<Port> = results.iter().map(|r| r.port).collect();
    assert_eq!(unique.len(), 2_500);
    for (i, r) in results.iter().enumerate() {
        let chunk = i / 1_000;
        let lo = base + (chunk as Port) * 1_000;
        assert!((lo..lo + 1_000).contains(&r.port), "port {} outside chunk {}", r.port, chunk + 1);
    }
}

#[tokio::test]
async fn progress_is_monotonic_and_bounded() {
    let base = closed_port().await.clamp(1_024, 60_000);
    let ports: Vec<Port> = (base..base + 400).collect();

    let service = ScanService::new(test_config());
    let id = service.start_scan(LOCALHOST, ports).await.unwrap();
    let events = drain(&service, &id).await;

    let mut last = 0;
    for ev in events.iter().filter(|e| !e.is_complete()) {
        assert!(ev.completed >= last);
        assert!(ev.completed <= ev.total);
        assert!(ev.percent <= 100);
        last = ev.completed;
    }
    assert_eq!(last, 400);
}

async fn wait_finished(service: &ScanService, id: &str) {
    let session = service.session(id).await.expect("session exists");
    tokio::time::timeout(Duration::from_secs(30), async {
        while !session.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("scan finishes");
    // The complete event is offered right after the results are recorded.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn stream_ends_on_idle_when_complete_is_dropped() {
    let mut cfg = test_config();
    cfg.progress_capacity = 1;
    cfg.drop_policy = DropPolicy::DropNewest;
    cfg.stream_idle_timeout = Duration::from_millis(200);
    let service = ScanService::new(cfg);

    let id = service.start_scan(LOCALHOST, vec![closed_port().await]).await.unwrap();
    wait_finished(&service, &id).await;

    let started = Instant::now();
    let events = drain(&service, &id).await;
    assert_eq!(events.len(), 1);
    assert!(!events[0].is_complete());
    assert_eq!(events[0].completed, 1);
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn drop_oldest_delivers_tail_and_complete() {
    let base = closed_port().await.clamp(1_024, 60_000);
    let ports: Vec<Port> = (base..base + 50).collect();

    let mut cfg = test_config();
    cfg.progress_capacity = 2;
    cfg.drop_policy = DropPolicy::DropOldest;
    let service = ScanService::new(cfg);

    let id = service.start_scan(LOCALHOST, ports).await.unwrap();
    wait_finished(&service, &id).await;

    let events = drain(&service, &id).await;
    assert!(!events.is_empty() && events.len() <= 2, "got {} events", events.len());
    let last = events.last().unwrap();
    assert!(last.is_complete());
    assert_eq!(last.completed, 50);
    assert_eq!(service.poll_results(&id).await.unwrap().len(), 50);
}

#[tokio::test]
async fn results_empty_while_running_then_expire() {
    let mut cfg = test_config();
    cfg.grace.small = Duration::from_millis(100);
    cfg.dial_timeout.small = Duration::from_millis(500);
    let service = ScanService::new(cfg);

    let closed = closed_port().await;
    let id = service.start_scan(LOCALHOST, vec![closed]).await.unwrap();
    // Either still running (empty) or already finished (one result); never an error.
    assert!(service.poll_results(&id).await.unwrap().len() <= 1);

    drain(&service, &id).await;
    assert_eq!(service.poll_results(&id).await.unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(matches!(
        service.poll_results(&id).await,
        Err(ScanError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn unknown_session_and_empty_ports() {
    let service = ScanService::new(test_config());
    assert!(matches!(
        service.poll_results("nope").await,
        Err(ScanError::SessionNotFound(_))
    ));
    assert!(service.stream_progress("nope").await.is_err());
    assert!(matches!(
        service.start_scan(LOCALHOST, Vec::new()).await,
        Err(ScanError::NoPorts)
    ));
}

#[tokio::test]
async fn blocking_scan_without_session() {
    let (_l, open) = open_listener().await;
    let service = ScanService::new(test_config());
    let results = service.scan_blocking(LOCALHOST, &[open]).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].open);
    assert!(service.store().is_empty().await);
}

#[tokio::test]
async fn teardown_drops_sessions() {
    let service = ScanService::new(test_config());
    let id = service.start_scan(LOCALHOST, vec![closed_port().await]).await.unwrap();
    service.teardown().await;
    assert!(service.poll_results(&id).await.is_err());
}
