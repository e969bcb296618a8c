//! 에러 타입 정의

use thiserror::Error;

/// MSRP 엔진 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    /// From/To 경로 또는 연결이 설정되지 않음
    #[error("설정 에러: {0}")]
    Configuration(String),

    #[error("프레임 파싱 에러: {0}")]
    Parse(#[from] ParseError),

    /// 소스 읽기 또는 프레임 쓰기 실패
    #[error("전송 에러: {0}")]
    Transfer(#[source] std::io::Error),

    /// 200 이외의 응답 코드
    #[error("상대측 에러 응답: {code}{}", comment.as_deref().map(|c| format!(" {}", c)).unwrap_or_default())]
    Peer { code: u16, comment: Option<String> },

    #[error("채널 에러")]
    ChannelError,

    #[error("연결 종료")]
    ConnectionClosed,
}

/// 프레임 디코딩 에러
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("프레임이 잘림")]
    Truncated,

    #[error("유효하지 않은 시작 줄: {0}")]
    InvalidStartLine(String),

    #[error("알 수 없는 메소드: {0}")]
    UnknownMethod(String),

    #[error("필수 헤더 누락: {0}")]
    MissingHeader(&'static str),

    #[error("유효하지 않은 헤더: {0}")]
    InvalidHeader(String),

    #[error("유효하지 않은 Byte-Range: {0}")]
    InvalidByteRange(String),

    #[error("유효하지 않은 Status: {0}")]
    InvalidStatus(String),

    #[error("유효하지 않은 연속 플래그: {0:#04x}")]
    InvalidFlag(u8),

    #[error("헤더 크기 초과: 최대 {max} bytes")]
    HeaderTooLarge { max: usize },

    #[error("본문 크기 초과: 최대 {max} bytes")]
    BodyTooLarge { max: usize },

    #[error("UTF-8 이 아닌 헤더")]
    InvalidUtf8,
}

impl Error {
    /// 프레임 쓰기 경로의 에러를 전송 에러로 정리
    pub(crate) fn into_transfer(self) -> Error {
        match self {
            Error::Io(e) => Error::Transfer(e),
            Error::ChannelError => Error::Transfer(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "송신 채널 닫힘",
            )),
            other => other,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
