//! MSRP 전송 세션
//!
//! 세션 하나는 한 연결 위의 송신/수신 전송 상태를 가진다.
//!
//! - 송신: `send` 를 호출한 스레드가 청크를 읽고 보내며 응답/REPORT 를 기다림
//! - 수신: 연결의 디스패치 스레드가 `on_*_received` 를 호출하며 이 스레드는
//!   자신이 해제하는 대기에서 절대 블록하지 않음
//! - 쓰기: 연결의 writer 스레드가 큐를 비움
//!
//! 응답 대기는 전송 ID 와 짝지어지지 않는다. 어떤 응답이든 현재 대기를
//! 해제하므로 동시에 응답을 기다리는 청크는 항상 하나 이하여야 한다.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, info_span, Span};

use crate::chunk::ReceiveBuffer;
use crate::connection::Connection;
use crate::frame::Frame;
use crate::listener::TransferListener;
use crate::signal::Signal;
use crate::stats::TransferStats;
use crate::transaction::TransactionIdGenerator;
use crate::writer::WriteMode;
use crate::{Config, Error, Result};

/// 송신 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    Idle,
    Sending,
    Completed,
    /// `cancel` 로 중단되어 abort 청크를 보냄
    Aborted,
    /// `close` 로 중단됨
    Cancelled,
    Error,
}

/// 수신 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundState {
    Idle,
    Receiving,
    Completed,
    Aborted,
}

/// MSRP 전송 세션
pub struct TransferSession {
    /// 설정
    pub(crate) config: Config,

    failure_report: AtomicBool,
    success_report: AtomicBool,

    from_path: RwLock<Option<String>>,
    to_path: RwLock<Option<String>>,

    /// 송신 루프가 청크마다 확인하는 취소 플래그
    pub(crate) cancel_requested: AtomicBool,

    closed: AtomicBool,

    /// 수신 중인 콘텐츠 (디스패치 스레드만 변경)
    pub(crate) receive_buffer: Mutex<ReceiveBuffer>,

    listener: RwLock<Option<Arc<dyn TransferListener>>>,

    /// 연결 역참조 (연결 수명은 세션이 관리하지 않음)
    connection: RwLock<Option<Weak<dyn Connection>>>,

    /// 청크 응답 대기
    pub(crate) response_signal: Signal,

    /// 최종 REPORT 대기
    pub(crate) report_signal: Signal,

    pub(crate) ids: TransactionIdGenerator,

    pub(crate) stats: RwLock<TransferStats>,

    /// 응답을 기다리는 청크 수
    pub(crate) unacknowledged: AtomicU64,

    outbound_state: Mutex<OutboundState>,
    inbound_state: Mutex<InboundState>,

    span: Span,
}

impl TransferSession {
    /// 새 세션 생성
    pub fn new(config: Config) -> Self {
        let span = info_span!("msrp_session");
        Self::with_span(config, span)
    }

    /// 주입된 로깅 span 으로 세션 생성
    pub fn with_span(config: Config, span: Span) -> Self {
        Self {
            failure_report: AtomicBool::new(config.failure_report),
            success_report: AtomicBool::new(config.success_report),
            config,
            from_path: RwLock::new(None),
            to_path: RwLock::new(None),
            cancel_requested: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            receive_buffer: Mutex::new(ReceiveBuffer::new()),
            listener: RwLock::new(None),
            connection: RwLock::new(None),
            response_signal: Signal::new(),
            report_signal: Signal::new(),
            ids: TransactionIdGenerator::new(),
            stats: RwLock::new(TransferStats::new()),
            unacknowledged: AtomicU64::new(0),
            outbound_state: Mutex::new(OutboundState::Idle),
            inbound_state: Mutex::new(InboundState::Idle),
            span,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn is_failure_report_requested(&self) -> bool {
        self.failure_report.load(Ordering::SeqCst)
    }

    pub fn set_failure_report_option(&self, enabled: bool) {
        self.failure_report.store(enabled, Ordering::SeqCst);
    }

    pub fn is_success_report_requested(&self) -> bool {
        self.success_report.load(Ordering::SeqCst)
    }

    pub fn set_success_report_option(&self, enabled: bool) {
        self.success_report.store(enabled, Ordering::SeqCst);
    }

    pub fn from_path(&self) -> Option<String> {
        self.from_path.read().clone()
    }

    pub fn set_from_path(&self, path: impl Into<String>) {
        *self.from_path.write() = Some(path.into());
    }

    pub fn to_path(&self) -> Option<String> {
        self.to_path.read().clone()
    }

    pub fn set_to_path(&self, path: impl Into<String>) {
        *self.to_path.write() = Some(path.into());
    }

    /// 리스너 설정 (이전 리스너는 교체됨)
    pub fn set_listener(&self, listener: Arc<dyn TransferListener>) {
        *self.listener.write() = Some(listener);
    }

    /// 연결 바인딩. 세션은 약한 참조만 보관한다.
    pub fn set_connection(&self, connection: &Arc<dyn Connection>) {
        *self.connection.write() = Some(Arc::downgrade(connection));
    }

    pub(crate) fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.read().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn notify(&self, event: impl FnOnce(&dyn TransferListener)) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            event(listener.as_ref());
        }
    }

    /// 현재 옵션 기준 쓰기 경로
    pub(crate) fn write_mode(&self) -> WriteMode {
        self.config
            .write_strategy
            .resolve(self.is_failure_report_requested())
    }

    /// 인코딩된 프레임을 연결로 전송
    pub(crate) fn transmit(&self, frame: Bytes) -> Result<()> {
        let connection = self.connection().ok_or(Error::ConnectionClosed)?;
        connection.send_chunk(frame, self.write_mode())
    }

    /// close 또는 cancel 요청 여부
    pub(crate) fn transfer_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst) || self.is_closed()
    }

    /// 진행 중인 송신 전송 중단 요청 (연결은 유지)
    ///
    /// 송신 루프는 다음 청크 전에 멈추고 abort 청크를 보낸다.
    pub fn cancel(&self) {
        debug!(parent: &self.span, "전송 취소 요청");
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.response_signal.release();
    }

    /// 세션 종료
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(parent: &self.span, "세션 종료");

        self.cancel_requested.store(true, Ordering::SeqCst);

        if let Some(connection) = self.connection() {
            connection.close();
        }

        self.response_signal.close();
        self.report_signal.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 수신된 프레임을 종류별 처리기로 전달
    pub fn dispatch(&self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Send(send) => self.on_send_received(send),
            Frame::Response(response) => {
                self.on_response_received(&response);
                Ok(())
            }
            Frame::Report(report) => {
                self.on_report_received(&report);
                Ok(())
            }
        }
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    pub fn outbound_state(&self) -> OutboundState {
        *self.outbound_state.lock()
    }

    pub(crate) fn set_outbound_state(&self, state: OutboundState) {
        *self.outbound_state.lock() = state;
    }

    pub fn inbound_state(&self) -> InboundState {
        *self.inbound_state.lock()
    }

    pub(crate) fn set_inbound_state(&self, state: InboundState) {
        *self.inbound_state.lock() = state;
    }

    /// 조립 중인 수신 콘텐츠 크기
    pub fn pending_receive_size(&self) -> u64 {
        self.receive_buffer.lock().current_size()
    }
}

impl Default for TransferSession {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        if !self.is_closed() {
            info!(parent: &self.span, "세션 해제: {}", self.stats.read().summary());
        }
    }
}
