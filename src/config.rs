//! 세션 설정

use std::time::Duration;

use crate::writer::WriteMode;
use crate::{
    Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_RESPONSE_TIMEOUT_MS, MAX_BODY_SIZE, MAX_HEADER_SIZE,
};

/// 청크 쓰기 경로 선택 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteStrategy {
    /// Failure report 요청 시 큐, 아니면 호출 스레드에서 직접 쓰기
    #[default]
    FollowFailureReport,

    /// 항상 writer 스레드 큐를 통해 쓰기
    Queued,

    /// 항상 호출 스레드에서 직접 쓰기
    Direct,
}

impl WriteStrategy {
    /// 현재 failure report 옵션에 대한 쓰기 모드 결정
    pub fn resolve(self, failure_report: bool) -> WriteMode {
        match self {
            WriteStrategy::FollowFailureReport if failure_report => WriteMode::Queued,
            WriteStrategy::FollowFailureReport => WriteMode::Direct,
            WriteStrategy::Queued => WriteMode::Queued,
            WriteStrategy::Direct => WriteMode::Direct,
        }
    }
}

/// MSRP 세션 설정
///
/// 세션 생성 시 한 번 주입되며 코어는 전역 상태를 읽지 않는다.
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 최대 페이로드 크기 (바이트)
    pub chunk_size: usize,

    /// 청크별 응답 요청 (Failure-Report) 기본값
    pub failure_report: bool,

    /// 전송 완료 REPORT 요청 (Success-Report) 기본값
    pub success_report: bool,

    /// 청크 응답 대기 타임아웃 (밀리초)
    pub response_timeout_ms: u64,

    /// 큐/직접 쓰기 전략
    pub write_strategy: WriteStrategy,

    /// 디코더가 허용하는 최대 헤더 영역 크기
    pub max_header_size: usize,

    /// 디코더가 허용하는 최대 본문 크기 (chunk_size 이상)
    pub max_body_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            failure_report: true,
            success_report: false,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            write_strategy: WriteStrategy::default(),
            max_header_size: MAX_HEADER_SIZE,
            max_body_size: MAX_BODY_SIZE,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 응답 대기 타임아웃
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Configuration("chunk_size는 0보다 커야 함".into()));
        }
        if self.max_header_size == 0 {
            return Err(Error::Configuration("max_header_size는 0보다 커야 함".into()));
        }
        if self.max_body_size < self.chunk_size {
            return Err(Error::Configuration(format!(
                "max_body_size({})는 chunk_size({}) 이상이어야 함",
                self.max_body_size, self.chunk_size
            )));
        }
        Ok(())
    }

    /// 응답 없이 전송하는 설정 (채팅 등)
    pub fn unacknowledged() -> Self {
        Self {
            failure_report: false,
            success_report: false,
            ..Self::default()
        }
    }

    /// 전송 완료 REPORT를 기다리는 설정 (파일 전송용)
    pub fn confirmed() -> Self {
        Self {
            failure_report: true,
            success_report: true,
            chunk_size: 32 * 1024,
            ..Self::default()
        }
    }
}
