//! End-to-end streaming: a real manager, the sender, and the TCP server.

use binlog_codec::{
    ChecksumAlg, EventBody, EventType, Gtid, GtidSet, RawEvent, RowsEvent, TableMapEvent,
};
use binlog_core::{BinlogConfig, BinlogSession, LogFileManager, NoopCoordinator, RowsKind};
use binlog_replication::{
    DumpClient, DumpRequest, DumpServer, Packet, ReplicaSender, ReplicationConfig,
    ReplicationError, VecSink,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use uuid::Uuid;

const SOURCE: Uuid = Uuid::from_u128(0x3e11_fa47_71ca_11e1_9e33_c80a_a942_9562);

fn config(tmp: &TempDir) -> BinlogConfig {
    BinlogConfig::new(tmp.path().join("log"))
        .server_id(1)
        .gtid_source(SOURCE)
}

fn open_manager(tmp: &TempDir) -> Arc<LogFileManager> {
    Arc::new(LogFileManager::open(config(tmp), &mut NoopCoordinator).unwrap())
}

fn table() -> TableMapEvent {
    TableMapEvent {
        table_id: 5,
        schema: "shop".into(),
        table: "orders".into(),
        column_types: vec![3, 15],
        metadata: vec![0, 0],
        ..TableMapEvent::default()
    }
}

fn rows(payload: &[u8]) -> RowsEvent {
    RowsEvent {
        table_id: 5,
        column_count: 2,
        columns: vec![0b11],
        rows: payload.to_vec(),
        ..RowsEvent::default()
    }
}

/// Commits one row transaction and returns its GTID.
fn commit_rows(mgr: &Arc<LogFileManager>, payload: &[u8]) -> Gtid {
    let mut session = BinlogSession::new(Arc::clone(mgr), 9);
    session.set_schema("shop");
    session.begin();
    session
        .write_rows(&table(), RowsKind::Write, rows(payload), true)
        .unwrap();
    session.end_statement(None).unwrap();
    session.commit(None).unwrap();
    gtid_of_last_group(mgr)
}

fn gtid_of_last_group(mgr: &LogFileManager) -> Gtid {
    file_events(mgr, &mgr.active_file())
        .iter()
        .rev()
        .find_map(|e| match e.decode(ChecksumAlg::Crc32).unwrap().body {
            EventBody::Gtid(marker) => marker.gtid(),
            _ => None,
        })
        .unwrap()
}

fn file_events(mgr: &LogFileManager, name: &str) -> Vec<RawEvent> {
    let mut reader = mgr.open_reader(name).unwrap();
    reader.events().map(|r| r.unwrap().1).collect()
}

/// Splits records into transaction groups, keyed by GTID.
fn groups(events: &[RawEvent], alg: ChecksumAlg) -> Vec<(Gtid, Vec<RawEvent>)> {
    let mut out: Vec<(Gtid, Vec<RawEvent>)> = Vec::new();
    for event in events {
        match event.event_type() {
            EventType::Gtid => {
                let EventBody::Gtid(marker) = event.decode(alg).unwrap().body else {
                    unreachable!()
                };
                out.push((marker.gtid().unwrap(), vec![event.clone()]));
            }
            EventType::FormatDescription
            | EventType::PreviousGtids
            | EventType::Rotate
            | EventType::Stop
            | EventType::Heartbeat => {}
            _ => out.last_mut().unwrap().1.push(event.clone()),
        }
    }
    out
}

fn stream(mgr: &Arc<LogFileManager>, request: DumpRequest) -> Vec<Packet> {
    let mut sink = VecSink::new();
    ReplicaSender::from_request(Arc::clone(mgr), &request.non_blocking(), None)
        .unwrap()
        .run(&mut sink)
        .unwrap();
    sink.into_packets()
}

fn events(packets: &[Packet]) -> Vec<RawEvent> {
    packets.iter().filter_map(Packet::as_event).cloned().collect()
}

#[test]
fn excluded_transaction_is_withheld() {
    let tmp = tempdir().unwrap();
    let mgr = open_manager(&tmp);
    let g = commit_rows(&mgr, b"first");
    let h = commit_rows(&mgr, b"second");
    let on_disk = groups(&file_events(&mgr, "binlog.000001"), ChecksumAlg::Crc32);
    assert_eq!(on_disk.len(), 2);

    let mut exclude = GtidSet::new();
    exclude.add(g);
    let sent = events(&stream(&mgr, DumpRequest::from_start().with_exclude(exclude)));
    let sent_groups = groups(&sent, ChecksumAlg::Crc32);

    assert_eq!(sent_groups.len(), 1);
    assert_eq!(sent_groups[0].0, h);
    assert_eq!(sent_groups[0].1, on_disk[1].1);
    let types: Vec<EventType> = sent_groups[0].1.iter().map(RawEvent::event_type).collect();
    assert_eq!(
        types,
        vec![
            EventType::Gtid,
            EventType::Query,
            EventType::TableMap,
            EventType::WriteRows,
            EventType::Query,
        ]
    );
}

/// Logs one autocommitted statement that changes several
/// non-transactional tables and returns its GTID.
fn commit_non_transactional(mgr: &Arc<LogFileManager>, queries: &[&str]) -> Gtid {
    let mut session = BinlogSession::new(Arc::clone(mgr), 4);
    session.set_schema("shop");
    for (i, query) in queries.iter().enumerate() {
        if i > 0 {
            session
                .write_event(EventBody::Intvar { kind: 2, value: i as u64 }, false)
                .unwrap();
        }
        session.log_statement(query, false).unwrap();
    }
    session.end_statement(None).unwrap();
    gtid_of_last_group(mgr)
}

#[test]
fn excluded_statement_cache_group_is_withheld() {
    let tmp = tempdir().unwrap();
    let statement_mode = config(&tmp).row_based(false);
    let mgr = Arc::new(LogFileManager::open(statement_mode, &mut NoopCoordinator).unwrap());
    let g = commit_non_transactional(
        &mgr,
        &["INSERT INTO myisam_a VALUES (1)", "INSERT INTO myisam_b VALUES (2)"],
    );
    let h = commit_non_transactional(&mgr, &["INSERT INTO myisam_c VALUES (3)"]);

    let mut exclude = GtidSet::new();
    exclude.add(g);
    let sent = events(&stream(&mgr, DumpRequest::from_start().with_exclude(exclude)));
    let queries: Vec<String> = sent
        .iter()
        .filter_map(|e| {
            let body = e.decode(ChecksumAlg::Crc32).unwrap().body;
            body.query_text().map(str::to_string)
        })
        .collect();
    assert_eq!(queries, ["INSERT INTO myisam_c VALUES (3)"]);

    let sent_groups = groups(&sent, ChecksumAlg::Crc32);
    assert_eq!(sent_groups.len(), 1);
    assert_eq!(sent_groups[0].0, h);
}

#[test]
fn excluded_transaction_is_withheld_after_checksum_change() {
    let tmp = tempdir().unwrap();
    let mgr = open_manager(&tmp);
    let g = commit_rows(&mgr, b"first");
    commit_rows(&mgr, b"second");
    let on_disk = groups(&file_events(&mgr, "binlog.000001"), ChecksumAlg::Crc32);

    let mut exclude = GtidSet::new();
    exclude.add(g);
    let request = DumpRequest::from_start()
        .with_exclude(exclude)
        .with_checksum(ChecksumAlg::Off);
    let sent = events(&stream(&mgr, request));
    let sent_groups = groups(&sent, ChecksumAlg::Off);

    assert_eq!(sent_groups.len(), 1);
    for (sent, disk) in sent_groups[0].1.iter().zip(&on_disk[1].1) {
        assert_eq!(
            sent.decode(ChecksumAlg::Off).unwrap().body,
            disk.decode(ChecksumAlg::Crc32).unwrap().body
        );
        assert_eq!(sent.len() + 4, disk.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn sender_emits_exactly_the_missing_transactions(
        count in 1usize..8,
        mask in proptest::collection::vec(any::<bool>(), 8),
        rotate_after in proptest::option::of(0usize..8),
    ) {
        let tmp = tempdir().unwrap();
        let mgr = open_manager(&tmp);
        let mut committed = Vec::new();
        for i in 0..count {
            committed.push(commit_rows(&mgr, format!("row {i}").as_bytes()));
            if rotate_after == Some(i) {
                mgr.rotate(true).unwrap();
            }
        }

        let mut exclude = GtidSet::new();
        let mut expected = Vec::new();
        for (gtid, skip) in committed.iter().zip(&mask) {
            if *skip {
                exclude.add(*gtid);
            } else {
                expected.push(*gtid);
            }
        }

        let sent = events(&stream(&mgr, DumpRequest::from_start().with_exclude(exclude)));
        let sent_gtids: Vec<Gtid> = groups(&sent, ChecksumAlg::Crc32)
            .into_iter()
            .map(|(gtid, _)| gtid)
            .collect();
        prop_assert_eq!(sent_gtids, expected);
    }
}

async fn start_server(
    mgr: &Arc<LogFileManager>,
    config: ReplicationConfig,
) -> (std::net::SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = DumpServer::new(config, Arc::clone(mgr));
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });
    (addr, tx, handle)
}

fn fast_config() -> ReplicationConfig {
    ReplicationConfig::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_default_heartbeat(None)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_dump_matches_local_stream() {
    let tmp = tempdir().unwrap();
    let mgr = open_manager(&tmp);
    commit_rows(&mgr, b"a");
    commit_rows(&mgr, b"b");
    let (addr, shutdown, server) = start_server(&mgr, fast_config()).await;

    let mut client = DumpClient::dump(addr, &DumpRequest::from_start().non_blocking())
        .await
        .unwrap();
    let remote = client.collect(None).await.unwrap();
    assert!(client.next_packet().await.unwrap().is_none());

    let local = events(&stream(&mgr, DumpRequest::from_start()));
    assert_eq!(remote, local);

    shutdown.send(()).unwrap();
    server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_dump_waits_for_new_commits() {
    let tmp = tempdir().unwrap();
    let mgr = open_manager(&tmp);
    let (addr, shutdown, server) = start_server(&mgr, fast_config()).await;

    let end = mgr.end_position();
    let mut client = DumpClient::dump(addr, &DumpRequest::at(end.file.clone(), end.offset))
        .await
        .unwrap();
    let announced = client.collect(Some(2)).await.unwrap();
    assert_eq!(announced[0].event_type(), EventType::Rotate);
    assert_eq!(announced[1].event_type(), EventType::FormatDescription);

    let writer = Arc::clone(&mgr);
    let gtid = tokio::task::spawn_blocking(move || commit_rows(&writer, b"late"))
        .await
        .unwrap();

    let group = client.collect(Some(5)).await.unwrap();
    let EventBody::Gtid(marker) = group[0].decode(ChecksumAlg::Crc32).unwrap().body else {
        panic!("expected a Gtid record, got {}", group[0].event_type());
    };
    assert_eq!(marker.gtid(), Some(gtid));
    assert_eq!(group[4].event_type(), EventType::Query);

    // Shutting the server down ends the session without EOF.
    shutdown.send(()).unwrap();
    server.await.unwrap();
    assert!(client.next_packet().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeats_flow_while_idle() {
    let tmp = tempdir().unwrap();
    let mgr = open_manager(&tmp);
    let (addr, shutdown, server) = start_server(&mgr, fast_config()).await;

    let request = DumpRequest::from_start().with_heartbeat(Duration::from_millis(30));
    let mut client = DumpClient::dump(addr, &request).await.unwrap();
    let mut heartbeats = 0;
    while heartbeats < 2 {
        let event = client.next_event().await.unwrap().unwrap();
        if event.event_type() == EventType::Heartbeat {
            let EventBody::Heartbeat { log_file } =
                event.decode(ChecksumAlg::Crc32).unwrap().body
            else {
                unreachable!()
            };
            assert_eq!(log_file, "binlog.000001");
            heartbeats += 1;
        }
    }

    shutdown.send(()).unwrap();
    server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_start_file_is_reported() {
    let tmp = tempdir().unwrap();
    let mgr = open_manager(&tmp);
    let (addr, shutdown, server) = start_server(&mgr, fast_config()).await;

    let mut client = DumpClient::dump(addr, &DumpRequest::at("binlog.000042", 4))
        .await
        .unwrap();
    match client.next_event().await {
        Err(ReplicationError::Remote(message)) => assert!(message.contains("binlog.000042")),
        other => panic!("expected a remote error, got {other:?}"),
    }

    shutdown.send(()).unwrap();
    server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connection_limit_is_enforced() {
    let tmp = tempdir().unwrap();
    let mgr = open_manager(&tmp);
    let (addr, shutdown, server) =
        start_server(&mgr, fast_config().with_max_connections(1)).await;

    let mut first = DumpClient::dump(addr, &DumpRequest::from_start()).await.unwrap();
    // The first session is streaming once its first record arrives.
    first.next_event().await.unwrap().unwrap();

    let mut second = DumpClient::dump(addr, &DumpRequest::from_start()).await.unwrap();
    match second.next_event().await {
        Err(ReplicationError::Remote(message)) => assert!(message.contains("limit")),
        other => panic!("expected a remote error, got {other:?}"),
    }

    drop(first);
    shutdown.send(()).unwrap();
    server.await.unwrap();
}
