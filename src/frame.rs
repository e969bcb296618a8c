//! MSRP 프레임 코덱
//!
//! SEND 요청, 응답, REPORT 요청 세 종류의 텍스트 프레임을 인코딩/디코딩한다.
//!
//! ```text
//! MSRP <tx> SEND
//! From-Path: msrp://a.example.com:7654/jshA7we;tcp
//! To-Path: msrp://b.example.com:7654/iau39;tcp
//! Message-ID: 12339sdqwer
//! Byte-Range: 1-4096/10000
//! Content-Type: application/octet-stream
//!
//! <body>
//! -------<tx>+
//! ```
//!
//! 본문 길이 헤더가 없으므로 본문의 끝은 `CRLF "-------" tx` 로만 식별된다.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ParseError;

/// 프로토콜 이름
pub const MSRP_PROTOCOL: &str = "MSRP";

/// 종료 줄 접두사
pub const END_LINE_PREFIX: &str = "-------";

pub const METHOD_SEND: &str = "SEND";
pub const METHOD_REPORT: &str = "REPORT";

pub const HEADER_FROM_PATH: &str = "From-Path";
pub const HEADER_TO_PATH: &str = "To-Path";
pub const HEADER_MESSAGE_ID: &str = "Message-ID";
pub const HEADER_BYTE_RANGE: &str = "Byte-Range";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_FAILURE_REPORT: &str = "Failure-Report";
pub const HEADER_SUCCESS_REPORT: &str = "Success-Report";
pub const HEADER_STATUS: &str = "Status";

const CRLF: &[u8] = b"\r\n";

/// 종료 줄의 연속 플래그
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationFlag {
    /// `+` 뒤에 청크가 더 있음
    More,

    /// `$` 마지막 청크
    Last,

    /// `#` 전송 중단
    Abort,
}

impl ContinuationFlag {
    pub fn as_byte(self) -> u8 {
        match self {
            ContinuationFlag::More => b'+',
            ContinuationFlag::Last => b'$',
            ContinuationFlag::Abort => b'#',
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, ParseError> {
        match byte {
            b'+' => Ok(ContinuationFlag::More),
            b'$' => Ok(ContinuationFlag::Last),
            b'#' => Ok(ContinuationFlag::Abort),
            other => Err(ParseError::InvalidFlag(other)),
        }
    }
}

/// `first-last/total` 바이트 범위 (1부터 시작, 양끝 포함)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub first: u64,
    pub last: u64,
    pub total: u64,
}

impl ByteRange {
    pub fn new(first: u64, last: u64, total: u64) -> Self {
        Self { first, last, total }
    }

    /// 범위에 포함된 바이트 수
    pub fn len(&self) -> u64 {
        self.last.saturating_add(1).saturating_sub(self.first)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 콘텐츠의 마지막 바이트까지 덮는지 여부
    pub fn is_final(&self) -> bool {
        self.last == self.total
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}/{}", self.first, self.last, self.total)
    }
}

impl FromStr for ByteRange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidByteRange(s.to_string());

        let (range, total) = s.trim().split_once('/').ok_or_else(invalid)?;
        let (first, last) = range.split_once('-').ok_or_else(invalid)?;

        let first: u64 = first.parse().map_err(|_| invalid())?;
        let last: u64 = last.parse().map_err(|_| invalid())?;
        let total: u64 = total.parse().map_err(|_| invalid())?;

        // last 는 u64::MAX 미만이어야 빈 범위(first = last + 1)를 표현할 수 있다
        let end = last.checked_add(1).ok_or_else(invalid)?;
        if first == 0 || first > end || last > total {
            return Err(invalid());
        }

        Ok(Self { first, last, total })
    }
}

/// 삽입 순서를 유지하는 헤더 목록
///
/// 이름 비교는 대소문자를 구분하지 않는다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 헤더 추가 후 자신을 반환 (빌더용)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// 같은 이름이 있으면 그 자리에서 값 교체, 없으면 끝에 추가
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn require(&self, name: &'static str) -> Result<&str, ParseError> {
        self.get(name).ok_or(ParseError::MissingHeader(name))
    }
}

/// REPORT 의 `Status: <namespace> <code> [comment]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub namespace: u16,
    pub code: u16,
    pub comment: Option<String>,
}

impl Status {
    /// `000 200 OK`
    pub fn ok() -> Self {
        Self {
            namespace: 0,
            code: 200,
            comment: Some("OK".into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 200
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03} {:03}", self.namespace, self.code)?;
        if let Some(comment) = &self.comment {
            write!(f, " {}", comment)?;
        }
        Ok(())
    }
}

impl FromStr for Status {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidStatus(s.to_string());
        let mut parts = s.trim().splitn(3, ' ');

        let namespace = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let code = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let comment = parts.next().map(str::to_string);

        Ok(Self {
            namespace,
            code,
            comment,
        })
    }
}

/// SEND 요청 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFrame {
    pub transaction_id: String,

    /// From-Path, To-Path, Message-ID 등 공통 헤더 (순서 유지)
    pub headers: Headers,

    pub byte_range: ByteRange,

    pub content_type: Option<String>,

    /// false 이면 `Failure-Report: no` 기록
    pub failure_report: bool,

    /// true 이면 `Success-Report: yes` 기록
    pub success_report: bool,

    pub body: Bytes,

    pub flag: ContinuationFlag,
}

impl SendFrame {
    pub fn from_path(&self) -> Option<&str> {
        self.headers.get(HEADER_FROM_PATH)
    }

    pub fn to_path(&self) -> Option<&str> {
        self.headers.get(HEADER_TO_PATH)
    }

    pub fn message_id(&self) -> Option<&str> {
        self.headers.get(HEADER_MESSAGE_ID)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256 + self.body.len());
        put_start_line(&mut buf, &self.transaction_id, METHOD_SEND);
        for (name, value) in self.headers.iter() {
            put_header(&mut buf, name, value);
        }
        put_header(&mut buf, HEADER_BYTE_RANGE, &self.byte_range.to_string());
        if let Some(content_type) = &self.content_type {
            put_header(&mut buf, HEADER_CONTENT_TYPE, content_type);
        }
        if !self.failure_report {
            put_header(&mut buf, HEADER_FAILURE_REPORT, "no");
        }
        if self.success_report {
            put_header(&mut buf, HEADER_SUCCESS_REPORT, "yes");
        }
        buf.put_slice(CRLF);
        buf.put_slice(&self.body);
        buf.put_slice(CRLF);
        put_end_line(&mut buf, &self.transaction_id, self.flag);
        buf.freeze()
    }
}

/// 트랜잭션 응답 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub transaction_id: String,
    pub code: u16,
    pub comment: Option<String>,
    pub from_path: String,
    pub to_path: String,
    pub byte_range: Option<ByteRange>,
}

impl ResponseFrame {
    /// 수신한 SEND 에 대한 응답 생성 (From/To 경로 교체, Byte-Range 에코)
    pub fn for_request(
        request: &SendFrame,
        code: u16,
        comment: Option<&str>,
    ) -> Result<Self, ParseError> {
        Ok(Self {
            transaction_id: request.transaction_id.clone(),
            code,
            comment: comment.map(str::to_string),
            from_path: request.headers.require(HEADER_TO_PATH)?.to_string(),
            to_path: request.headers.require(HEADER_FROM_PATH)?.to_string(),
            byte_range: Some(request.byte_range),
        })
    }

    pub fn is_success(&self) -> bool {
        self.code == 200
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        let status = match &self.comment {
            Some(comment) => format!("{:03} {}", self.code, comment),
            None => format!("{:03}", self.code),
        };
        put_start_line(&mut buf, &self.transaction_id, &status);
        put_header(&mut buf, HEADER_FROM_PATH, &self.from_path);
        put_header(&mut buf, HEADER_TO_PATH, &self.to_path);
        if let Some(range) = &self.byte_range {
            put_header(&mut buf, HEADER_BYTE_RANGE, &range.to_string());
        }
        put_end_line(&mut buf, &self.transaction_id, ContinuationFlag::Last);
        buf.freeze()
    }
}

/// REPORT 요청 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFrame {
    pub transaction_id: String,
    pub message_id: String,
    pub from_path: String,
    pub to_path: String,
    pub byte_range: ByteRange,
    pub status: Status,
}

impl ReportFrame {
    /// 완료된 수신 메시지에 대한 REPORT 생성
    ///
    /// Byte-Range 는 `1-<received>/<total>`.
    pub fn for_request(
        transaction_id: String,
        request: &SendFrame,
        received: u64,
        status: Status,
    ) -> Result<Self, ParseError> {
        Ok(Self {
            transaction_id,
            message_id: request.headers.require(HEADER_MESSAGE_ID)?.to_string(),
            from_path: request.headers.require(HEADER_TO_PATH)?.to_string(),
            to_path: request.headers.require(HEADER_FROM_PATH)?.to_string(),
            byte_range: ByteRange::new(1, received, request.byte_range.total),
            status,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        put_start_line(&mut buf, &self.transaction_id, METHOD_REPORT);
        put_header(&mut buf, HEADER_MESSAGE_ID, &self.message_id);
        put_header(&mut buf, HEADER_FROM_PATH, &self.from_path);
        put_header(&mut buf, HEADER_TO_PATH, &self.to_path);
        put_header(&mut buf, HEADER_BYTE_RANGE, &self.byte_range.to_string());
        put_header(&mut buf, HEADER_STATUS, &self.status.to_string());
        put_end_line(&mut buf, &self.transaction_id, ContinuationFlag::Last);
        buf.freeze()
    }
}

/// 통합 프레임 enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Send(SendFrame),
    Response(ResponseFrame),
    Report(ReportFrame),
}

impl Frame {
    pub fn transaction_id(&self) -> &str {
        match self {
            Frame::Send(f) => &f.transaction_id,
            Frame::Response(f) => &f.transaction_id,
            Frame::Report(f) => &f.transaction_id,
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Frame::Send(f) => f.encode(),
            Frame::Response(f) => f.encode(),
            Frame::Report(f) => f.encode(),
        }
    }

    /// 버퍼 앞쪽의 완전한 프레임 하나를 디코딩
    pub fn decode(buf: &[u8]) -> Result<Frame, ParseError> {
        match parse_frame(buf, usize::MAX, usize::MAX)? {
            Some((frame, _)) => Ok(frame),
            None => Err(ParseError::Truncated),
        }
    }
}

/// 바이트 스트림용 점진적 디코더
///
/// TCP 세그먼트 경계에 걸친 부분 프레임을 내부 버퍼에 보관한다.
/// 종료 줄이 오지 않는 본문은 `max_body_size` 를 넘는 순간 에러가 된다.
pub struct FrameDecoder {
    buf: BytesMut,
    max_header_size: usize,
    max_body_size: usize,
}

impl FrameDecoder {
    pub fn new(max_header_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(16 * 1024),
            max_header_size,
            max_body_size: crate::MAX_BODY_SIZE,
        }
    }

    /// 본문 크기 상한 지정
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// 수신 바이트 추가
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// 완성된 다음 프레임 추출 (미완성이면 None)
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ParseError> {
        match parse_frame(&self.buf, self.max_header_size, self.max_body_size)? {
            Some((frame, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    /// 아직 프레임이 되지 못한 바이트 수
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(crate::MAX_HEADER_SIZE)
    }
}

fn put_start_line(buf: &mut BytesMut, transaction_id: &str, method_or_status: &str) {
    buf.put_slice(MSRP_PROTOCOL.as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(transaction_id.as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(method_or_status.as_bytes());
    buf.put_slice(CRLF);
}

fn put_header(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(CRLF);
}

fn put_end_line(buf: &mut BytesMut, transaction_id: &str, flag: ContinuationFlag) {
    buf.put_slice(END_LINE_PREFIX.as_bytes());
    buf.put_slice(transaction_id.as_bytes());
    buf.put_u8(flag.as_byte());
    buf.put_slice(CRLF);
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.len() > haystack.len() - from {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// 시작 줄 종류
enum StartLine<'a> {
    Send,
    Report,
    Response { code: u16, comment: Option<&'a str> },
}

fn parse_start_line(line: &str) -> Result<(&str, StartLine<'_>), ParseError> {
    let invalid = || ParseError::InvalidStartLine(line.to_string());
    let mut parts = line.splitn(3, ' ');

    if parts.next() != Some(MSRP_PROTOCOL) {
        return Err(invalid());
    }
    let transaction_id = parts.next().filter(|t| !t.is_empty()).ok_or_else(invalid)?;
    let rest = parts.next().ok_or_else(invalid)?;

    let kind = match rest {
        METHOD_SEND => StartLine::Send,
        METHOD_REPORT => StartLine::Report,
        _ => {
            let (code, comment) = match rest.split_once(' ') {
                Some((code, comment)) => (code, Some(comment)),
                None => (rest, None),
            };
            if code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit()) {
                let code = code.parse().map_err(|_| invalid())?;
                StartLine::Response { code, comment }
            } else {
                return Err(ParseError::UnknownMethod(rest.to_string()));
            }
        }
    };

    Ok((transaction_id, kind))
}

/// 버퍼 앞쪽의 프레임 하나를 파싱
///
/// 프레임이 아직 완성되지 않았으면 `Ok(None)`, 완성되면 프레임과 소비한 바이트 수.
pub(crate) fn parse_frame(
    buf: &[u8],
    max_header_size: usize,
    max_body_size: usize,
) -> Result<Option<(Frame, usize)>, ParseError> {
    let line_end = match find(buf, CRLF, 0) {
        Some(pos) => pos,
        None if buf.len() > max_header_size => {
            return Err(ParseError::HeaderTooLarge {
                max: max_header_size,
            })
        }
        None => return Ok(None),
    };

    let start = std::str::from_utf8(&buf[..line_end]).map_err(|_| ParseError::InvalidUtf8)?;
    let (transaction_id, kind) = parse_start_line(start)?;
    let end_marker = format!("{}{}", END_LINE_PREFIX, transaction_id);

    let mut headers = Headers::new();
    let mut pos = line_end + 2;

    // 헤더 영역: 종료 줄(본문 없음) 또는 빈 줄(본문 시작)까지
    let (body, flag_pos) = loop {
        let eol = match find(buf, CRLF, pos) {
            Some(eol) => eol,
            None if buf.len() > max_header_size => {
                return Err(ParseError::HeaderTooLarge {
                    max: max_header_size,
                })
            }
            None => return Ok(None),
        };
        let line = &buf[pos..eol];

        if line.len() == end_marker.len() + 1 && line.starts_with(end_marker.as_bytes()) {
            break (None, pos + end_marker.len());
        }

        if line.is_empty() {
            let body_start = eol + 2;
            let mut needle = Vec::with_capacity(2 + end_marker.len());
            needle.extend_from_slice(CRLF);
            needle.extend_from_slice(end_marker.as_bytes());
            let too_large = ParseError::BodyTooLarge { max: max_body_size };
            match find(buf, &needle, body_start) {
                Some(body_end) if body_end - body_start > max_body_size => return Err(too_large),
                Some(body_end) => break (Some(body_start..body_end), body_end + needle.len()),
                // 종료 줄 일부가 걸쳐 있을 수 있으므로 needle 길이만큼 여유
                None if buf.len() - body_start > max_body_size.saturating_add(needle.len()) => {
                    return Err(too_large)
                }
                None => return Ok(None),
            }
        }

        let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;
        let (name, value) = text
            .split_once(':')
            .ok_or_else(|| ParseError::InvalidHeader(text.to_string()))?;
        headers.entries.push((name.trim().to_string(), value.trim().to_string()));

        pos = eol + 2;
        if pos > max_header_size {
            return Err(ParseError::HeaderTooLarge {
                max: max_header_size,
            });
        }
    };

    // 플래그 1바이트 + CRLF
    if buf.len() < flag_pos + 3 {
        return Ok(None);
    }
    let flag = ContinuationFlag::from_byte(buf[flag_pos])?;
    if &buf[flag_pos + 1..flag_pos + 3] != CRLF {
        return Err(ParseError::InvalidHeader(format!(
            "종료 줄 뒤에 CRLF 없음 ({})",
            end_marker
        )));
    }
    let consumed = flag_pos + 3;

    let body = body
        .map(|range| Bytes::copy_from_slice(&buf[range]))
        .unwrap_or_default();
    let transaction_id = transaction_id.to_string();

    let frame = match kind {
        StartLine::Send => Frame::Send(build_send(transaction_id, headers, body, flag)?),
        StartLine::Response { code, comment } => {
            let byte_range = headers
                .get(HEADER_BYTE_RANGE)
                .map(str::parse::<ByteRange>)
                .transpose()?;
            Frame::Response(ResponseFrame {
                transaction_id,
                code,
                comment: comment.map(str::to_string),
                from_path: headers.require(HEADER_FROM_PATH)?.to_string(),
                to_path: headers.require(HEADER_TO_PATH)?.to_string(),
                byte_range,
            })
        }
        StartLine::Report => Frame::Report(ReportFrame {
            transaction_id,
            message_id: headers.require(HEADER_MESSAGE_ID)?.to_string(),
            from_path: headers.require(HEADER_FROM_PATH)?.to_string(),
            to_path: headers.require(HEADER_TO_PATH)?.to_string(),
            byte_range: headers.require(HEADER_BYTE_RANGE)?.parse()?,
            status: headers.require(HEADER_STATUS)?.parse()?,
        }),
    };

    Ok(Some((frame, consumed)))
}

fn build_send(
    transaction_id: String,
    mut headers: Headers,
    body: Bytes,
    flag: ContinuationFlag,
) -> Result<SendFrame, ParseError> {
    headers.require(HEADER_FROM_PATH)?;
    headers.require(HEADER_TO_PATH)?;

    // Byte-Range 가 없으면 본문 전체가 하나의 콘텐츠
    let byte_range = match headers.remove(HEADER_BYTE_RANGE) {
        Some(value) => value.parse()?,
        None => {
            let len = body.len() as u64;
            ByteRange::new(1, len, len)
        }
    };
    if byte_range.len() != body.len() as u64 && flag != ContinuationFlag::Abort {
        return Err(ParseError::InvalidByteRange(format!(
            "{} (본문 {} bytes)",
            byte_range,
            body.len()
        )));
    }

    let content_type = headers.remove(HEADER_CONTENT_TYPE);
    let failure_report = headers
        .remove(HEADER_FAILURE_REPORT)
        .map(|v| !v.eq_ignore_ascii_case("no"))
        .unwrap_or(true);
    let success_report = headers
        .remove(HEADER_SUCCESS_REPORT)
        .map(|v| v.eq_ignore_ascii_case("yes"))
        .unwrap_or(false);

    Ok(SendFrame {
        transaction_id,
        headers,
        byte_range,
        content_type,
        failure_report,
        success_report,
        body,
        flag,
    })
}
