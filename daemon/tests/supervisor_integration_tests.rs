//! End-to-end integration test: UDP datagram in, SQLite partition row out,
//! through the real `Supervisor`-assembled receiver/batcher/backend chain.

use std::net::UdpSocket as StdUdpSocket;
use std::time::Duration;

use syslogd_core::config::Config;
use syslogd::supervisor::Supervisor;

#[tokio::test]
async fn datagram_round_trips_through_supervisor_into_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("syslog.sqlite3");

    let mut config = Config::default();
    config.bind_ip = "127.0.0.1".parse().unwrap();
    config.bind_port = 15142;
    config.batch_size = 1;
    config.sqlite.database = db_path.display().to_string();

    let mut supervisor = Supervisor::build_from_config(config).await.unwrap();

    // Give the receiver task a moment to bind before sending.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sender = StdUdpSocket::bind("127.0.0.1:0").unwrap();
    sender
        .send_to(
            b"<34>Jan 15 12:00:00 myhost sshd: integration test message",
            "127.0.0.1:15142",
        )
        .unwrap();

    // Give the datagram time to flow receiver -> parser -> batcher -> backend.
    tokio::time::sleep(Duration::from_millis(200)).await;

    supervisor.shutdown().await.unwrap();

    let partition_name = format!("syslog_{}.sqlite3", chrono::Utc::now().format("%Y%m"));
    let partition_path = dir.path().join(partition_name);
    assert!(
        partition_path.exists(),
        "expected partition file at {}",
        partition_path.display()
    );

    let conn = rusqlite::Connection::open(&partition_path).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM syslog", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);

    let message: String = conn
        .query_row("SELECT Message FROM syslog LIMIT 1", [], |row| row.get(0))
        .unwrap();
    assert!(message.contains("integration test message"));
}
