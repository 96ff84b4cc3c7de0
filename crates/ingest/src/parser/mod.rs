//! Syslog 파서 (§4.1)
//!
//! 두 가지 와이어 포맷을 하나의 [`LogRecord`]로 수렴시킨다:
//! - older format: `<PRI>Mmm dd HH:MM:SS HOST TAG: MSG`
//! - newer format: `<PRI>1 ISO-TIMESTAMP HOST APP PID MSGID [SD] MSG`
//!
//! newer 포맷은 older 포맷 텍스트로 재조립(bridge)된 뒤 older 파싱 경로로
//! 되먹임된다 — 하위 계층(배처, 백엔드)은 older 한 가지 형태만 다루면 된다.

use std::net::IpAddr;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use syslogd_core::error::ParseError;
use syslogd_core::types::LogRecord;

/// 단일 UDP 데이터그램의 상한 (IPv4/IPv6 UDP 페이로드의 실무 상한보다 여유 있게).
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// RFC 3164/5424에서 유효한 최대 PRI 값: facility 23 * 8 + severity 7 = 191.
const MAX_PRI: u32 = 191;

/// 원시 데이터그램을 [`LogRecord`]로 파싱한다.
///
/// `sender_addr`는 메시지에 호스트명이 없을 때의 폴백으로, `received_at`은
/// 타임스탬프가 없거나 파싱 불가할 때의 폴백으로 쓰인다.
pub fn parse(
    raw: &[u8],
    sender_addr: IpAddr,
    received_at: DateTime<Utc>,
) -> Result<LogRecord, ParseError> {
    if raw.is_empty() {
        return Err(ParseError::EmptyPayload);
    }
    if raw.len() > MAX_DATAGRAM_SIZE {
        return Err(ParseError::TooLarge {
            size: raw.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }

    let text = String::from_utf8_lossy(raw);
    let record = parse_text(&text, sender_addr, received_at)?;
    Ok(LogRecord {
        raw: Bytes::copy_from_slice(raw),
        ..record
    })
}

/// 텍스트 형태에 대한 재귀 진입점. newer 포맷은 bridge 후 자기 자신을
/// 한 번 더 호출한다 (bridge 결과는 항상 older 포맷 텍스트이므로 재귀는
/// 최대 깊이 1이다).
fn parse_text(
    text: &str,
    sender_addr: IpAddr,
    received_at: DateTime<Utc>,
) -> Result<LogRecord, ParseError> {
    let (pri, rest) = parse_pri(text)?;
    if is_newer_format(rest) {
        let bridged = bridge_newer_to_older(rest, received_at)?;
        return parse_text(&format!("<{pri}>{bridged}"), sender_addr, received_at);
    }
    parse_older_format(pri, rest, sender_addr, received_at)
}

/// `<NNN>` 헤더를 읽고 (pri, 이후 텍스트)를 반환한다.
fn parse_pri(input: &str) -> Result<(u8, &str), ParseError> {
    if !input.starts_with('<') {
        return Err(ParseError::MalformedPri {
            reason: "missing leading '<'".to_owned(),
        });
    }
    let end = input.find('>').ok_or_else(|| ParseError::MalformedPri {
        reason: "unterminated PRI field (missing '>')".to_owned(),
    })?;
    let digits = &input[1..end];
    if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::MalformedPri {
            reason: format!("invalid PRI digits: '{digits}'"),
        });
    }
    // digits.len() <= 3 and all-ASCII-digit, so this never overflows u32.
    let value: u32 = digits.parse().expect("validated all-digit PRI");
    if value > MAX_PRI {
        return Err(ParseError::PriOutOfRange { value });
    }
    Ok((value as u8, &input[end + 1..]))
}

/// `<PRI>` 다음이 `숫자 + 공백`으로 시작하면 newer 포맷(버전 마커)이다.
fn is_newer_format(rest: &str) -> bool {
    let mut chars = rest.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(c), Some(' ')) if c.is_ascii_digit()
    )
}

/// 다음 공백류(run) 전까지의 토큰과, 그 뒤 선행 공백을 건너뛴 나머지를 반환한다.
fn take_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(idx) => Some((&s[..idx], s[idx..].trim_start())),
        None => Some((s, "")),
    }
}

fn nilvalue_to_empty(value: &str) -> &str {
    if value == "-" { "" } else { value }
}

// ─── newer → older bridge ──────────────────────────────────────────────

/// `rest`는 `<PRI>` 다음 텍스트로, `VERSION TIMESTAMP HOST APP PROCID MSGID [SD]MSG` 형태다.
/// older 포맷 바디(`TIMESTAMP HOST TAG: MSG`)로 재조립한다. 반환값에 `<PRI>`는 포함하지 않는다.
fn bridge_newer_to_older(rest: &str, received_at: DateTime<Utc>) -> Result<String, ParseError> {
    let (_version, body) = take_token(rest).ok_or_else(|| ParseError::MalformedPri {
        reason: "newer-format header missing version token".to_owned(),
    })?;

    let parts: Vec<&str> = body.splitn(6, ' ').collect();
    if parts.len() < 6 {
        return Err(ParseError::MalformedPri {
            reason: format!(
                "newer-format header requires 6 fields after version, got {}",
                parts.len()
            ),
        });
    }

    let timestamp_str = nilvalue_to_empty(parts[0]);
    let hostname = nilvalue_to_empty(parts[1]);
    let appname = nilvalue_to_empty(parts[2]);
    let procid = nilvalue_to_empty(parts[3]);
    // parts[4] is MSGID — dropped per §4.1 step 2.
    let sd_and_msg = parts[5];

    let message = if sd_and_msg.starts_with('[') {
        split_sd_and_message(sd_and_msg).1
    } else if let Some(msg) = sd_and_msg.strip_prefix("- ") {
        msg.to_owned()
    } else if sd_and_msg == "-" {
        String::new()
    } else {
        sd_and_msg.to_owned()
    };

    let dt = DateTime::parse_from_rfc3339(timestamp_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(received_at);
    let older_timestamp = dt.format("%b %e %H:%M:%S").to_string();

    let tag = match (appname.is_empty(), procid.is_empty()) {
        (true, _) => String::new(),
        (false, true) => appname.to_owned(),
        (false, false) => format!("{appname}[{procid}]"),
    };
    let host = if hostname.is_empty() { "-" } else { hostname };

    Ok(format!("{older_timestamp} {host} {tag}: {message}"))
}

/// Structured Data 블록(`[...]`가 균형 잡힌 깊이로 끝나는 지점)과 그 뒤 메시지를 분리한다.
fn split_sd_and_message(input: &str) -> (String, String) {
    let mut sd_part = String::new();
    let mut depth = 0;
    let mut in_quote = false;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        if escaped {
            sd_part.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quote => {
                sd_part.push(ch);
                escaped = true;
            }
            '"' => {
                sd_part.push(ch);
                in_quote = !in_quote;
            }
            '[' if !in_quote => {
                sd_part.push(ch);
                depth += 1;
            }
            ']' if !in_quote => {
                sd_part.push(ch);
                depth -= 1;
                if depth == 0 {
                    let remaining = &input[idx + ch.len_utf8()..];
                    return (sd_part, remaining.trim_start().to_owned());
                }
            }
            _ => sd_part.push(ch),
        }
    }
    (sd_part, String::new())
}

// ─── older-format parsing ──────────────────────────────────────────────

fn parse_older_format(
    pri: u8,
    rest: &str,
    sender_addr: IpAddr,
    received_at: DateTime<Utc>,
) -> Result<LogRecord, ParseError> {
    let facility = pri / 8;
    let severity = pri % 8;

    let (timestamp, device_reported_time, remainder) =
        match try_parse_timestamp(rest, received_at) {
            Some((dt, rem)) => (dt, dt, rem),
            None => (received_at, received_at, rest),
        };

    let (hostname, remainder) = match take_token(remainder) {
        Some((tok, rem)) if tok != "-" => (tok.to_owned(), rem),
        Some((_, rem)) => (sender_addr.to_string(), rem),
        None => (sender_addr.to_string(), ""),
    };

    let (tag, message) = match find_tag_colon(remainder) {
        Some(idx) => (
            remainder[..idx].trim().to_owned(),
            remainder[idx + 1..].trim_start().to_owned(),
        ),
        None => (String::new(), remainder.trim().to_owned()),
    };

    Ok(LogRecord {
        id: None,
        facility,
        severity,
        priority: pri,
        timestamp,
        hostname,
        tag,
        message,
        received_at,
        device_reported_time,
        raw: Bytes::new(),
    })
}

/// tag/message 경계가 되는 첫 콜론의 위치를 찾는다 (§4.1 step 6: "공백이 아닌
/// 문자 바로 다음에 오는 첫 콜론"). 선행 문자가 없거나(콜론이 맨 앞) 공백인
/// 콜론은 건너뛴다.
fn find_tag_colon(s: &str) -> Option<usize> {
    let mut prev: Option<char> = None;
    for (idx, ch) in s.char_indices() {
        if ch == ':' {
            if let Some(p) = prev {
                if !p.is_whitespace() {
                    return Some(idx);
                }
            }
        }
        prev = Some(ch);
    }
    None
}

/// `Mmm dd HH:MM:SS` 세 토큰을 시도하여 파싱한다. 실패 시 `None`을 반환하고
/// 호출자는 전체 `rest`를 그대로 다음 단계로 넘긴다.
fn try_parse_timestamp<'a>(rest: &'a str, now: DateTime<Utc>) -> Option<(DateTime<Utc>, &'a str)> {
    let (month_tok, r1) = take_token(rest)?;
    let (day_tok, r2) = take_token(r1)?;
    let (time_tok, r3) = take_token(r2)?;

    let month = month_from_abbrev(month_tok)?;
    let day: u32 = day_tok.parse().ok()?;
    let (hour, minute, second) = parse_hms(time_tok)?;

    let year = infer_year(month, now);
    let naive_date = NaiveDate::from_ymd_opt(year, month, day)?;
    let naive = naive_date.and_hms_opt(hour, minute, second)?;
    let dt = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc);
    Some((dt, r3))
}

fn month_from_abbrev(token: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    if token.len() != 3 {
        return None;
    }
    let lower = token.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == lower)
        .map(|idx| idx as u32 + 1)
}

fn parse_hms(token: &str) -> Option<(u32, u32, u32)> {
    let mut parts = token.splitn(3, ':');
    let h: u32 = parts.next()?.parse().ok()?;
    let m: u32 = parts.next()?.parse().ok()?;
    let s: u32 = parts.next()?.parse().ok()?;
    if h > 23 || m > 59 || s > 60 {
        return None;
    }
    Some((h, m, s))
}

/// 파싱된 월이 현재 월보다 6개월을 초과하여 "미래"로 보이면 작년으로 간주한다 (§4.1).
fn infer_year(month: u32, now: DateTime<Utc>) -> i32 {
    use chrono::Datelike;
    let current_month = now.month();
    if month > current_month + 6 {
        now.year() - 1
    } else {
        now.year()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn sender() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9))
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn empty_payload_is_parse_error() {
        assert!(matches!(
            parse(b"", sender(), now()),
            Err(ParseError::EmptyPayload)
        ));
    }

    #[test]
    fn too_large_payload_is_parse_error() {
        let raw = vec![b'a'; MAX_DATAGRAM_SIZE + 1];
        assert!(matches!(
            parse(&raw, sender(), now()),
            Err(ParseError::TooLarge { .. })
        ));
    }

    #[test]
    fn missing_pri_is_malformed() {
        let err = parse(b"no pri here", sender(), now()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedPri { .. }));
    }

    #[test]
    fn unterminated_pri_is_malformed() {
        let err = parse(b"<34 rest", sender(), now()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedPri { .. }));
    }

    #[test]
    fn negative_pri_is_malformed() {
        let err = parse(b"<-1>Jan 1 00:00:00 host tag: msg", sender(), now()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedPri { .. }));
    }

    #[test]
    fn pri_192_is_out_of_range() {
        let err = parse(b"<192>Jan 1 00:00:00 host tag: msg", sender(), now()).unwrap_err();
        assert!(matches!(err, ParseError::PriOutOfRange { value: 192 }));
    }

    #[test]
    fn pri_0_is_accepted() {
        let record = parse(b"<0>Jan 1 00:00:00 host tag: msg", sender(), now()).unwrap();
        assert_eq!(record.priority, 0);
        assert_eq!(record.facility, 0);
        assert_eq!(record.severity, 0);
    }

    #[test]
    fn pri_191_is_accepted() {
        let record = parse(b"<191>Jan 1 00:00:00 host tag: msg", sender(), now()).unwrap();
        assert_eq!(record.priority, 191);
        assert_eq!(record.facility, 23);
        assert_eq!(record.severity, 7);
    }

    #[test]
    fn older_format_happy_path() {
        let record = parse(
            b"<34>Mar 15 12:00:00 web-01 sshd: Failed password for root",
            sender(),
            now(),
        )
        .unwrap();
        assert_eq!(record.facility, 4);
        assert_eq!(record.severity, 2);
        assert_eq!(record.hostname, "web-01");
        assert_eq!(record.tag, "sshd");
        assert_eq!(record.message, "Failed password for root");
        assert!(record.priority_is_consistent());
    }

    #[test]
    fn older_format_single_digit_day_with_double_space() {
        let record = parse(b"<34>Mar  5 12:00:00 web-01 sshd: boot", sender(), now()).unwrap();
        assert_eq!(record.timestamp.format("%b %e").to_string(), "Mar  5");
    }

    #[test]
    fn older_format_no_colon_entire_remainder_is_message() {
        let record = parse(b"<34>Mar 15 12:00:00 host just a message", sender(), now()).unwrap();
        assert_eq!(record.tag, "");
        assert_eq!(record.message, "just a message");
    }

    #[test]
    fn older_format_colon_preceded_by_space_does_not_terminate_tag() {
        let record = parse(
            b"<34>Mar 15 12:00:00 host just a message : trailing",
            sender(),
            now(),
        )
        .unwrap();
        assert_eq!(record.tag, "");
        assert_eq!(record.message, "just a message : trailing");
    }

    #[test]
    fn older_format_missing_hostname_falls_back_to_sender() {
        let record = parse(b"<34>Mar 15 12:00:00", sender(), now()).unwrap();
        assert_eq!(record.hostname, sender().to_string());
    }

    #[test]
    fn older_format_unparseable_timestamp_falls_back_to_received_at() {
        let record = parse(b"<34>not a timestamp host tag: msg", sender(), now()).unwrap();
        assert_eq!(record.timestamp, now());
        assert_eq!(record.device_reported_time, now());
    }

    #[test]
    fn newer_format_bridge_basic() {
        let record = parse(
            b"<34>1 2024-03-15T12:00:00Z host1 app 1234 ID1 [meta x=\"y\"] hello world",
            sender(),
            now(),
        )
        .unwrap();
        assert_eq!(record.facility, 4);
        assert_eq!(record.severity, 2);
        assert_eq!(record.hostname, "host1");
        assert_eq!(record.tag, "app[1234]");
        assert!(record.message.starts_with("hello world"));
    }

    #[test]
    fn newer_format_nilvalue_fields() {
        let record = parse(
            b"<34>1 2024-03-15T12:00:00Z - - - - - only message",
            sender(),
            now(),
        )
        .unwrap();
        assert_eq!(record.hostname, sender().to_string());
        assert_eq!(record.tag, "");
        assert_eq!(record.message, "only message");
    }

    #[test]
    fn newer_format_no_structured_data() {
        let record = parse(
            b"<34>1 2024-03-15T12:00:00Z host app - - - plain message",
            sender(),
            now(),
        )
        .unwrap();
        assert_eq!(record.tag, "app");
        assert_eq!(record.message, "plain message");
    }

    #[test]
    fn newer_format_preserves_original_raw_bytes() {
        let raw: &[u8] = b"<34>1 2024-03-15T12:00:00Z host app - - - hi";
        let record = parse(raw, sender(), now()).unwrap();
        assert_eq!(record.raw.as_ref(), raw);
    }

    #[test]
    fn newer_format_incomplete_header_is_parse_error() {
        let err = parse(b"<34>1 2024-03-15T12:00:00Z host app", sender(), now()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedPri { .. }));
    }

    #[test]
    fn bridged_reparse_matches_original_fields() {
        let raw: &[u8] =
            b"<34>1 2024-03-15T12:00:00Z host1 app 1234 ID1 [meta x=\"y\"] hello world";
        let direct = parse(raw, sender(), now()).unwrap();

        // Manually perform the same bridge + reparse the implementation does,
        // to assert the round-trip property independent of internal reuse.
        let (pri, rest) = parse_pri(&String::from_utf8_lossy(raw)).unwrap();
        let bridged_body = bridge_newer_to_older(rest, now()).unwrap();
        let bridged_full = format!("<{pri}>{bridged_body}");
        let reparsed = parse(bridged_full.as_bytes(), sender(), now()).unwrap();

        assert_eq!(direct.facility, reparsed.facility);
        assert_eq!(direct.severity, reparsed.severity);
        assert_eq!(direct.hostname, reparsed.hostname);
        assert_eq!(direct.message, reparsed.message);
    }

    #[test]
    fn infer_year_assumes_previous_year_when_far_in_future() {
        // "now" is March 2024; December looks more than 6 months ahead -> previous year.
        assert_eq!(infer_year(12, now()), 2023);
    }

    #[test]
    fn infer_year_uses_current_year_within_window() {
        assert_eq!(infer_year(6, now()), 2024);
    }

    #[test]
    fn structured_data_multiple_elements_dropped_from_bridge() {
        let record = parse(
            b"<34>1 2024-03-15T12:00:00Z host app - - [id1 a=\"1\"][id2 b=\"2\"] msg",
            sender(),
            now(),
        )
        .unwrap();
        assert_eq!(record.message, "msg");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_arbitrary_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
                let _ = parse(&bytes, sender(), now());
            }

            #[test]
            fn valid_pri_range_is_always_accepted(pri in 0u32..=191) {
                let raw = format!("<{pri}>Mar 15 12:00:00 host tag: msg");
                let record = parse(raw.as_bytes(), sender(), now()).unwrap();
                prop_assert_eq!(record.priority as u32, pri);
                prop_assert!(record.priority_is_consistent());
            }

            #[test]
            fn pri_above_191_is_always_rejected(pri in 192u32..1000) {
                let raw = format!("<{pri}>Mar 15 12:00:00 host tag: msg");
                let result = parse(raw.as_bytes(), sender(), now());
                prop_assert!(result.is_err());
            }

            #[test]
            fn arbitrary_hostname_does_not_panic(hostname in "[a-zA-Z0-9-]{1,64}") {
                let raw = format!("<34>Mar 15 12:00:00 {hostname} tag: msg");
                let _ = parse(raw.as_bytes(), sender(), now());
            }
        }
    }
}
