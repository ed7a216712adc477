//! Dump command implementation.
//!
//! Reads records from the log directory, or from a dump server with
//! `--remote`, and prints one line (or JSON object) per record.

use super::{index_files, open_file, OutputFormat};
use crate::error::{CliError, CliResult};
use binlog_codec::{ChecksumAlg, EventBody, EventFlags, EventType, RawEvent, MAGIC_LEN};
use binlog_replication::{DumpClient, DumpRequest};
use serde::Serialize;
use std::path::Path;

/// Record representation for output.
#[derive(Debug, Serialize)]
pub struct EventInfo {
    /// File the record belongs to.
    pub file: String,
    /// Offset of the record in its file.
    pub offset: u64,
    /// Type name.
    pub event_type: String,
    /// Originating server.
    pub server_id: u32,
    /// Seconds since the epoch.
    pub timestamp: u32,
    /// Total record length.
    pub len: u32,
    /// Position of the next record.
    pub end_log_pos: u32,
    /// Header flag bits.
    pub flags: u16,
    /// One-line description of the body.
    pub summary: String,
    /// Statement text (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Group identifier (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gtid: Option<String>,
    /// Two-phase commit id (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xid: Option<u64>,
}

/// Where `dump` starts and how much it prints.
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// File to start in; the oldest file if unset.
    pub file: Option<String>,
    /// Offset in the start file.
    pub start_position: u64,
    /// Maximum number of records.
    pub limit: Option<usize>,
}

/// Runs the dump command against a directory.
pub fn run(dir: &Path, base_name: &str, options: &DumpOptions, format: OutputFormat) -> CliResult<()> {
    let events = read_local(dir, base_name, options)?;
    print(&events, format)
}

/// Runs the dump command against a server.
pub fn run_remote(
    addr: &str,
    server_id: u32,
    options: &DumpOptions,
    format: OutputFormat,
) -> CliResult<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let events = runtime.block_on(read_remote(addr, server_id, options))?;
    print(&events, format)
}

fn print(events: &[EventInfo], format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(events)?),
        OutputFormat::Text => print_text_output(events),
    }
    Ok(())
}

/// Reads records from the start position to the end of the newest file.
pub fn read_local(dir: &Path, base_name: &str, options: &DumpOptions) -> CliResult<Vec<EventInfo>> {
    let files = index_files(dir, base_name)?;
    let start = match &options.file {
        Some(name) => files
            .iter()
            .position(|f| f == name)
            .ok_or_else(|| CliError::usage(format!("{name} is not in the log index")))?,
        None => 0,
    };
    let max_records = options.limit.unwrap_or(usize::MAX);

    let mut out = Vec::new();
    for (i, name) in files.iter().enumerate().skip(start) {
        if out.len() >= max_records {
            break;
        }
        let mut reader = open_file(dir, name)?;
        let alg = reader.checksum_alg();
        if i == start && options.start_position > MAGIC_LEN {
            reader.seek(options.start_position)?;
        }
        for item in reader.events() {
            if out.len() >= max_records {
                break;
            }
            let (offset, event) = item?;
            out.push(describe(name, offset, &event, alg));
        }
    }
    Ok(out)
}

/// Streams records from a dump server until it reports the end of the log.
pub async fn read_remote(
    addr: &str,
    server_id: u32,
    options: &DumpOptions,
) -> CliResult<Vec<EventInfo>> {
    let request = match &options.file {
        Some(file) => DumpRequest::at(file.clone(), options.start_position),
        None => DumpRequest::from_start(),
    }
    .with_server_id(server_id)
    .non_blocking();
    let mut alg = request.checksum;
    let mut file = options.file.clone().unwrap_or_default();

    let mut client = DumpClient::dump(addr, &request).await?;
    let mut out = Vec::new();
    while options.limit.map_or(true, |l| out.len() < l) {
        let Some(event) = client.next_event().await? else {
            break;
        };
        let header = event.header();
        let offset = u64::from(header.log_pos).saturating_sub(u64::from(header.event_len));
        if event.event_type() == EventType::FormatDescription {
            alg = event.effective_alg(alg)?;
        }
        let info = describe(&file, offset, &event, alg);
        if let Ok(EventBody::Rotate { next_file, .. }) = event.decode(alg).map(|e| e.body) {
            file = next_file;
        }
        out.push(info);
    }
    Ok(out)
}

/// Describes one record; bodies that fail to decode are reported in the
/// summary rather than as an error.
pub fn describe(file: &str, offset: u64, event: &RawEvent, alg: ChecksumAlg) -> EventInfo {
    let header = event.header();
    let mut info = EventInfo {
        file: file.to_string(),
        offset,
        event_type: header.event_type.to_string(),
        server_id: header.server_id,
        timestamp: header.timestamp,
        len: header.event_len,
        end_log_pos: header.log_pos,
        flags: header.flags.bits(),
        summary: String::new(),
        query: None,
        gtid: None,
        xid: None,
    };
    let body = match event.decode(alg) {
        Ok(decoded) => decoded.body,
        Err(e) => {
            info.summary = format!("<undecodable: {e}>");
            return info;
        }
    };
    info.summary = match body {
        EventBody::Query(q) => {
            let summary = format!("thread={} schema=`{}` {}", q.thread_id, q.schema, q.query);
            info.query = Some(q.query);
            summary
        }
        EventBody::Stop => "end of log".to_string(),
        EventBody::Rotate { position, next_file } => format!("next={next_file} pos={position}"),
        EventBody::Intvar { kind, value } => format!("kind={kind} value={value}"),
        EventBody::AppendBlock { file_id, block } | EventBody::BeginLoadQuery { file_id, block } => {
            format!("file_id={file_id} block={} bytes", block.len())
        }
        EventBody::DeleteFile { file_id } => format!("file_id={file_id}"),
        EventBody::Rand { seed1, seed2 } => format!("seed1={seed1} seed2={seed2}"),
        EventBody::UserVar(uv) => match uv.value {
            None => format!("@`{}`=NULL", uv.name),
            Some(v) => format!(
                "@`{}` type={} charset={} {} bytes",
                uv.name,
                v.value_type,
                v.charset,
                v.bytes.len()
            ),
        },
        EventBody::FormatDescription(fde) => format!(
            "binlog_version={} server_version={} checksum={:?}",
            fde.binlog_version, fde.server_version, fde.checksum_alg
        ),
        EventBody::Xid { xid } => {
            info.xid = Some(xid);
            format!("xid={xid}")
        }
        EventBody::ExecuteLoadQuery(e) => {
            let summary = format!("file_id={} {}", e.file_id, e.query.query);
            info.query = Some(e.query.query);
            summary
        }
        EventBody::TableMap(tm) => format!(
            "table_id={} `{}`.`{}` columns={}",
            tm.table_id,
            tm.schema,
            tm.table,
            tm.column_types.len()
        ),
        EventBody::Incident { kind, message } => format!("kind={kind} {message}"),
        EventBody::Heartbeat { log_file } => format!("file={log_file}"),
        EventBody::RowsQuery { query } => {
            let summary = query.clone();
            info.query = Some(query);
            summary
        }
        EventBody::WriteRows(rows) | EventBody::UpdateRows(rows) | EventBody::DeleteRows(rows) => {
            format!(
                "table_id={} columns={} rows={} bytes{}",
                rows.table_id,
                rows.column_count,
                rows.rows.len(),
                if rows.is_stmt_end() { " stmt_end" } else { "" }
            )
        }
        EventBody::Gtid(g) => {
            let summary = format!(
                "{}:{} last_committed={} sequence_number={}",
                g.sid, g.gno, g.last_committed, g.sequence_number
            );
            info.gtid = Some(format!("{}:{}", g.sid, g.gno));
            summary
        }
        EventBody::AnonymousGtid(g) => format!(
            "last_committed={} sequence_number={}",
            g.last_committed, g.sequence_number
        ),
        EventBody::PreviousGtids(set) => {
            if set.is_empty() {
                "[]".to_string()
            } else {
                format!("[{set}]")
            }
        }
        EventBody::XaPrepare { one_phase, xid } => format!(
            "one_phase={one_phase} format_id={} gtrid={} bqual={}",
            xid.format_id,
            hex_encode(&xid.gtrid),
            hex_encode(&xid.bqual)
        ),
        EventBody::TransactionPayload {
            compression,
            uncompressed_size,
            payload,
        } => format!(
            "compression={compression} size={} uncompressed={uncompressed_size}",
            payload.len()
        ),
    };
    info
}

fn print_text_output(events: &[EventInfo]) {
    println!("Binlog records ({} total)", events.len());
    println!("================");
    println!();

    for event in events {
        print!(
            "[{}:{:08}] {:20} server_id={} end_log_pos={}",
            event.file, event.offset, event.event_type, event.server_id, event.end_log_pos
        );
        let flags = EventFlags::from_bits(event.flags);
        if flags.contains(EventFlags::ARTIFICIAL) {
            print!(" artificial");
        }
        if flags.contains(EventFlags::BINLOG_IN_USE) {
            print!(" in_use");
        }
        println!("  {}", event.summary);
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use binlog_replication::{DumpServer, ReplicationConfig};
    use binlog_testkit::TempBinlog;
    use std::sync::Arc;

    #[test]
    fn local_dump_walks_every_file() {
        let log = TempBinlog::new();
        log.commit_statement("INSERT INTO t VALUES (1)");
        log.rotate(true).unwrap();
        log.commit_statement("INSERT INTO t VALUES (2)");

        let events = read_local(&log.path(), "binlog", &DumpOptions::default()).unwrap();
        let queries: Vec<_> = events.iter().filter_map(|e| e.query.as_deref()).collect();
        assert_eq!(
            queries,
            vec![
                "BEGIN",
                "INSERT INTO t VALUES (1)",
                "COMMIT",
                "BEGIN",
                "INSERT INTO t VALUES (2)",
                "COMMIT"
            ]
        );
        assert_eq!(events[0].event_type, "Format_desc");
        assert_eq!(events[0].offset, 4);
        assert!(events.iter().any(|e| e.event_type == "Rotate" && e.file == "binlog.000001"));
    }

    #[test]
    fn start_position_and_limit_narrow_the_dump() {
        let log = TempBinlog::new();
        let first = log.commit_statement("INSERT INTO t VALUES (1)");
        log.commit_statement("INSERT INTO t VALUES (2)");

        let options = DumpOptions {
            file: Some(first.file.clone()),
            start_position: first.offset,
            limit: Some(3),
        };
        let events = read_local(&log.path(), "binlog", &options).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].offset, first.offset);
        assert_eq!(events[1].query.as_deref(), Some("BEGIN"));
        assert_eq!(events[2].query.as_deref(), Some("INSERT INTO t VALUES (2)"));
    }

    #[test]
    fn unknown_file_is_a_usage_error() {
        let log = TempBinlog::new();
        let options = DumpOptions {
            file: Some("binlog.000099".to_string()),
            ..DumpOptions::default()
        };
        assert!(matches!(
            read_local(&log.path(), "binlog", &options),
            Err(CliError::Usage(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn remote_dump_matches_local_dump() {
        let log = TempBinlog::new();
        log.commit_statement("INSERT INTO t VALUES (1)");
        log.commit_statement("INSERT INTO t VALUES (2)");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(DumpServer::new(
            ReplicationConfig::new(addr),
            Arc::clone(&log.manager),
        ));
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn({
            let server = Arc::clone(&server);
            async move {
                server
                    .serve(listener, async {
                        let _ = stop_rx.await;
                    })
                    .await
            }
        });

        let remote = read_remote(&addr.to_string(), 42, &DumpOptions::default())
            .await
            .unwrap();
        let local = read_local(&log.path(), "binlog", &DumpOptions::default()).unwrap();

        let remote_queries: Vec<_> = remote.iter().filter_map(|e| e.query.clone()).collect();
        let local_queries: Vec<_> = local.iter().filter_map(|e| e.query.clone()).collect();
        assert_eq!(remote_queries, local_queries);
        assert_eq!(remote[0].event_type, "Rotate");
        assert_eq!(remote[1].file, "binlog.000001");

        let _ = stop_tx.send(());
        handle.await.unwrap().unwrap();
    }
}
