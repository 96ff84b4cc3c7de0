//! 설정 파일 로드/검증 통합 테스트 — TOML 파일 시스템 I/O를 거치는 전체 경로.

use syslogd_core::config::{Config, Driver};
use syslogd_core::error::ConfigError;

#[tokio::test]
async fn loads_partial_toml_and_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("syslogd.toml");
    tokio::fs::write(
        &path,
        r#"
        bind_port = 6514
        driver = "search"

        [search]
        url = "http://localhost:7700"
        api_key = "masterKey"
        "#,
    )
    .await
    .unwrap();

    let config = Config::load(&path).await.unwrap();
    assert_eq!(config.bind_port, 6514);
    assert!(matches!(config.driver, Driver::Search));
    assert_eq!(config.search.url, "http://localhost:7700");
    // Untouched fields keep their defaults.
    assert_eq!(config.batch_size, 100);
    assert_eq!(config.batch_timeout_secs, 5);
}

#[tokio::test]
async fn malformed_toml_reports_parse_failed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("syslogd.toml");
    tokio::fs::write(&path, "bind_port = [not valid").await.unwrap();

    let err = Config::load(&path).await.unwrap_err();
    assert!(matches!(err, ConfigError::ParseFailed { .. }));
}

#[tokio::test]
async fn valid_toml_with_invalid_values_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("syslogd.toml");
    tokio::fs::write(&path, "batch_size = 0\n").await.unwrap();

    let err = Config::load(&path).await.unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "batch_size"));
}

#[tokio::test]
async fn sqlite_driver_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("syslogd.toml");
    tokio::fs::write(
        &path,
        r#"
        [sqlite]
        database = "archive.sqlite3"
        "#,
    )
    .await
    .unwrap();

    let config = Config::load(&path).await.unwrap();
    assert!(matches!(config.driver, Driver::Sqlite));
    assert_eq!(config.sqlite.database, "archive.sqlite3");
}
