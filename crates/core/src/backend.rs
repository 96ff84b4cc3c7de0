//! 스토리지 백엔드 추상 계약 (§4.3) 및 헬스 상태 (ambient, §12)
//!
//! [`StorageBackend`]는 RPITIT(return-position impl Trait in traits)로
//! async 메서드를 선언한다. `dyn StorageBackend`가 필요한 지점(배처가 구성 시점에 두
//! 구현체 중 하나를 선택해 보유하는 경우)에서는 [`DynStorageBackend`]의
//! `BoxFuture` 기반 blanket impl을 사용한다.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::types::{LogRecord, PartitionKey};

/// dyn-compatible Future 타입 별칭.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// §4.3의 추상 스토리지 백엔드 계약.
///
/// `ensure_partition`/`write_batch`/`close`는 배처(consumer task)에서만
/// 호출된다 — 활성 파티션에 대한 단일 writer 규칙(§5)을 트레잇 바깥에서
/// 호출자가 보장한다.
pub trait StorageBackend: Send + Sync {
    /// 파티션의 스키마/인덱스를 준비한다. 멱등적이다.
    fn ensure_partition(
        &mut self,
        key: PartitionKey,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// 레코드 배치를 기록한다. 호출자 관점에서 원자적이다: 전부 받아들여지거나
    /// 전혀 받아들여지지 않는다. 실제로 기록된 레코드 수를 반환한다.
    ///
    /// 호출 전 `ensure_partition(key)`가 최소 한 번 호출되었어야 한다.
    fn write_batch(
        &mut self,
        key: PartitionKey,
        records: Vec<LogRecord>,
    ) -> impl Future<Output = Result<usize, BackendError>> + Send;

    /// 진행 중인 상태를 플러시하고 리소스를 해제한다. 멱등적이다.
    fn close(&mut self) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// dyn-compatible 스토리지 백엔드 trait.
pub trait DynStorageBackend: Send + Sync {
    fn ensure_partition(&mut self, key: PartitionKey) -> BoxFuture<'_, Result<(), BackendError>>;
    fn write_batch(
        &mut self,
        key: PartitionKey,
        records: Vec<LogRecord>,
    ) -> BoxFuture<'_, Result<usize, BackendError>>;
    fn close(&mut self) -> BoxFuture<'_, Result<(), BackendError>>;
}

impl<T: StorageBackend> DynStorageBackend for T {
    fn ensure_partition(&mut self, key: PartitionKey) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(StorageBackend::ensure_partition(self, key))
    }

    fn write_batch(
        &mut self,
        key: PartitionKey,
        records: Vec<LogRecord>,
    ) -> BoxFuture<'_, Result<usize, BackendError>> {
        Box::pin(StorageBackend::write_batch(self, key, records))
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(StorageBackend::close(self))
    }
}

/// 수퍼바이저가 집계하는 헬스 상태 (수신기 소켓 + 배처 큐 사용률 + 백엔드
/// 마지막 기록 결과의 worst-of 집계).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }

    /// 두 상태 중 더 나쁜 쪽을 반환한다 (Unhealthy > Degraded > Healthy).
    pub fn worse_of(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy(a), _) => Self::Unhealthy(a),
            (_, Self::Unhealthy(b)) => Self::Unhealthy(b),
            (Self::Degraded(a), _) => Self::Degraded(a),
            (_, Self::Degraded(b)) => Self::Degraded(b),
            (Self::Healthy, Self::Healthy) => Self::Healthy,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}
