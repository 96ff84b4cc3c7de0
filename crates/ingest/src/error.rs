//! 파이프라인 에러 타입
//!
//! [`IngestError`]는 `syslogd-ingest` 내부에서 발생하는 모든 에러를 표현한다.
//! `syslogd_core::error::SyslogdError`로의 변환이 구현되어 있어 상위 레이어에서
//! `?` 연산자로 전파할 수 있다.

pub use syslogd_core::error::{BackendError, ParseError, QueueError};
use syslogd_core::error::SyslogdError;

/// 파이프라인 도메인 에러 — 파싱/큐/백엔드/수신기 에러를 포괄한다.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// 수신기 소켓 바인딩/구성 실패 (기동 시점 치명적 에러)
    #[error("failed to bind UDP socket on {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IngestError> for SyslogdError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Parse(e) => SyslogdError::Parse(e),
            IngestError::Queue(e) => SyslogdError::Queue(e),
            IngestError::Backend(e) => SyslogdError::Backend(e),
            IngestError::Io(e) => SyslogdError::Io(e),
            IngestError::BindFailed { addr, reason } => {
                SyslogdError::Io(std::io::Error::other(format!(
                    "bind failed on {addr}: {reason}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_failed_displays_addr_and_reason() {
        let err = IngestError::BindFailed {
            addr: "0.0.0.0:5140".to_owned(),
            reason: "address already in use".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0.0.0.0:5140"));
        assert!(msg.contains("address already in use"));
    }

    #[test]
    fn parse_error_converts_transparently() {
        let err: IngestError = ParseError::EmptyPayload.into();
        assert!(matches!(err, IngestError::Parse(ParseError::EmptyPayload)));
    }

    #[test]
    fn converts_to_syslogd_error() {
        let err = IngestError::Queue(QueueError::Full { capacity: 1000 });
        let top: SyslogdError = err.into();
        assert!(matches!(top, SyslogdError::Queue(_)));
    }
}
