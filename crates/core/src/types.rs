//! 도메인 타입 — 파서와 백엔드가 공유하는 레코드/파티션 타입

use bytes::Bytes;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// 파서가 생성하고 백엔드가 소비하는 표준 로그 레코드.
///
/// older/newer 두 syslog 와이어 포맷은 모두 이 레코드로 수렴한다 (bridge).
/// `id`는 백엔드가 파티션 내에서 단조 증가하도록 채번한다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// 백엔드가 채번하는 단조 증가 ID. 파서 단계에서는 아직 결정되지 않는다.
    pub id: Option<i64>,
    /// PRI에서 추출한 facility (0-23).
    pub facility: u8,
    /// PRI에서 추출한 severity (0-7).
    pub severity: u8,
    /// PRI 원값 (0-191), `facility * 8 + severity`와 항상 같다.
    pub priority: u8,
    /// 메시지에서 파싱한 타임스탬프. 파싱 불가 시 `received_at`로 대체된다.
    pub timestamp: DateTime<Utc>,
    /// FromHost. 메시지에 없으면 송신자 주소로 대체된다.
    pub hostname: String,
    /// 콜론 앞의 태그. 콜론이 없으면 빈 문자열.
    pub tag: String,
    /// 태그 뒤 본문.
    pub message: String,
    /// 서버 수신 시각.
    pub received_at: DateTime<Utc>,
    /// 파싱된 메시지 타임스탬프와 동일하거나, 없으면 `received_at`과 동일.
    pub device_reported_time: DateTime<Utc>,
    /// 원본 데이터그램 페이로드.
    pub raw: Bytes,
}

impl LogRecord {
    /// `priority = facility * 8 + severity` 불변식을 검증한다.
    pub fn priority_is_consistent(&self) -> bool {
        u16::from(self.facility) * 8 + u16::from(self.severity) == u16::from(self.priority)
    }

    /// 이 레코드가 속하는 파티션 키를 `received_at` 기준으로 계산한다.
    ///
    /// `received_at`이 고정된 기준(UTC)으로 쓰인다 — §3의 "year+month in
    /// UTC-or-local, implementer choice, but fixed" 조항에 따른 결정.
    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::from_datetime(&self.received_at)
    }
}

/// `(year, month)`로 식별되는 논리적 파티션.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub year: i32,
    pub month: u32,
}

impl PartitionKey {
    pub fn from_datetime(dt: &DateTime<Utc>) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
        }
    }

    /// `<prefix>_YYYYMM` 형태의 구성 요소를 만든다 (§6 파일/인덱스 명명 규칙).
    pub fn as_yyyymm(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    /// 다음 달의 파티션 키.
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_yyyymm())
    }
}
