//! 설정 — 코어가 소비하는 결정된(resolved) 설정 레코드
//!
//! `spec.md`는 설정 파일 파싱/기본값 합성 자체를 out-of-scope로 두지만,
//! 데몬 바이너리는 여전히 이 레코드를 어디선가 만들어야 한다. 이 모듈은
//! 데몬의 `Config::load`/`validate`/`Default` 관례를 그대로 따른다
//! (§6 Configuration surface).

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 백엔드 선택자 (§6 `driver`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Sqlite,
    Search,
}

impl Default for Driver {
    fn default() -> Self {
        Self::Sqlite
    }
}

/// 데몬 전역 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub bind_ip: IpAddr,
    pub bind_port: u16,
    pub driver: Driver,
    pub batch_size: usize,
    pub batch_timeout_secs: u64,
    pub queue_capacity: usize,
    pub sqlite: SqliteConfig,
    pub search: SearchConfig,
    pub metrics: MetricsConfig,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port: 5140,
            driver: Driver::default(),
            batch_size: 100,
            batch_timeout_secs: 5,
            queue_capacity: 1000,
            sqlite: SqliteConfig::default(),
            search: SearchConfig::default(),
            metrics: MetricsConfig::default(),
            debug: false,
        }
    }
}

impl Config {
    /// TOML 파일에서 설정을 로드한다.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::FileNotFound {
                path: path.display().to_string(),
            })?;
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 설정 값의 일관성을 검증한다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_size".to_owned(),
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.batch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_timeout_secs".to_owned(),
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.queue_capacity < self.batch_size {
            return Err(ConfigError::InvalidValue {
                field: "queue_capacity".to_owned(),
                reason: "must be at least batch_size".to_owned(),
            });
        }
        if self.bind_port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bind_port".to_owned(),
                reason: "must be nonzero".to_owned(),
            });
        }
        match self.driver {
            Driver::Sqlite => {
                if self.sqlite.database.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "sqlite.database".to_owned(),
                        reason: "must not be empty when driver = sqlite".to_owned(),
                    });
                }
            }
            Driver::Search => {
                if self.search.url.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "search.url".to_owned(),
                        reason: "must not be empty when driver = search".to_owned(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// 일반 런타임 설정 (로깅 등).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub log_format: String,
    pub pid_file: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
            pid_file: None,
        }
    }
}

/// SQLite 백엔드 설정 (§4.3.1, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// 파티션 파일명 템플릿 (`<prefix>_YYYYMM.<ext>`를 만들 때 쓰인다).
    pub database: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            database: "syslog.sqlite3".to_owned(),
        }
    }
}

/// 검색 엔진 백엔드 설정 (§4.3.2, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub url: String,
    pub api_key: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
        }
    }
}

/// Prometheus 메트릭 엔드포인트 설정 (ambient, §11).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:9898".to_owned(),
            endpoint: "/metrics".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut config = Config::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_batch_timeout_rejected() {
        let mut config = Config::default();
        config.batch_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn queue_capacity_below_batch_size_rejected() {
        let mut config = Config::default();
        config.batch_size = 500;
        config.queue_capacity = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_bind_port_rejected() {
        let mut config = Config::default();
        config.bind_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn sqlite_driver_requires_database_path() {
        let mut config = Config::default();
        config.sqlite.database = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn search_driver_requires_url() {
        let mut config = Config {
            driver: Driver::Search,
            ..Config::default()
        };
        assert!(config.validate().is_err());
        config.search.url = "http://localhost:7700".to_owned();
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn load_missing_file_returns_file_not_found() {
        let err = Config::load(Path::new("/nonexistent/syslogd.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn load_parses_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syslogd.toml");
        tokio::fs::write(&path, "bind_port = 5141\nbatch_size = 50\n")
            .await
            .unwrap();
        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.bind_port, 5141);
        assert_eq!(config.batch_size, 50);
    }
}
