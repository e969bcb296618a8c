//! # MSRP 청크 전송 엔진
//!
//! MSRP(Message Session Relay Protocol) 세션에서 콘텐츠를 청크 단위로
//! 보내고 받는 엔진
//!
//! ## 핵심 특징
//! - **청크 분할**: 콘텐츠를 `Byte-Range` 가 붙은 SEND 청크로 분할
//! - **응답 흐름 제어**: Failure-Report 요청 시 청크마다 200 응답 대기,
//!   응답을 기다리는 청크는 항상 하나 이하
//! - **완료 확인**: Success-Report 요청 시 마지막 청크 후 REPORT 대기
//! - **수신 조립**: 청크를 도착 순서대로 누적, 마지막 청크에서 전달 후 비움
//! - **쓰기 경로**: writer 스레드 큐 또는 호출 스레드 직접 쓰기
//! - **세션 종료**: `close` 는 모든 대기를 즉시 해제

pub mod chunk;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod listener;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod signal;
pub mod stats;
pub mod transaction;
pub mod writer;

#[cfg(test)]
mod test_util;

pub use chunk::ReceiveBuffer;
pub use config::{Config, WriteStrategy};
pub use connection::{Connection, TcpConnection};
pub use error::{Error, ParseError, Result};
pub use frame::{
    ByteRange, ContinuationFlag, Frame, FrameDecoder, Headers, ReportFrame, ResponseFrame,
    SendFrame, Status,
};
pub use listener::TransferListener;
pub use session::{InboundState, OutboundState, TransferSession};
pub use signal::{Signal, WaitOutcome};
pub use stats::TransferStats;
pub use transaction::TransactionIdGenerator;
pub use writer::{ChunkSender, OutboundQueue, WriteMode};

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024; // 10KB

/// 기본 응답 대기 타임아웃 (밀리초)
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 10_000;

/// 프레임 헤더 영역 최대 크기 (바이트)
pub const MAX_HEADER_SIZE: usize = 16 * 1024; // 16KB

/// 프레임 본문 최대 크기 (바이트)
pub const MAX_BODY_SIZE: usize = 1024 * 1024; // 1MB
