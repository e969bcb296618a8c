//! 전송 이벤트 리스너

use bytes::Bytes;

use crate::Error;

/// 전송 수명 주기 콜백
///
/// 송신 쪽 콜백은 `send` 를 호출한 스레드에서, 수신 쪽 콜백은 연결의
/// 디스패치 스레드에서 호출된다. 모든 메소드는 기본 구현이 비어 있다.
pub trait TransferListener: Send + Sync {
    /// 진행 상황 (현재 바이트, 전체 바이트)
    fn on_progress(&self, _current: u64, _total: u64) {}

    /// 송신 전송 완료
    fn on_completed(&self) {}

    /// 수신 전송 완료
    fn on_data_received(&self, _payload: Bytes, _content_type: Option<&str>) {}

    /// 상대측이 전송을 중단함
    fn on_aborted(&self) {}

    /// 전송 에러 (에러 응답, 송신 실패)
    fn on_error(&self, _error: &Error) {}
}
