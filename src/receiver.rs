//! 수신 처리
//!
//! 연결의 디스패치 스레드에서 호출된다.
//!
//! - SEND: 필요 시 200 응답, 청크 조립, 마지막 청크에서 REPORT 및 콜백
//! - 응답: 송신 스레드의 응답 대기 해제
//! - REPORT: 송신 스레드의 최종 REPORT 대기 해제

use tracing::{debug, info, warn};

use crate::frame::{ContinuationFlag, ReportFrame, ResponseFrame, SendFrame, Status};
use crate::session::{InboundState, TransferSession};
use crate::{Error, Result};

impl TransferSession {
    /// 수신한 SEND 청크 처리
    pub fn on_send_received(&self, frame: SendFrame) -> Result<()> {
        debug!(
            parent: self.span(),
            "SEND 수신: tx={}, range={}, flag={}, {} bytes",
            frame.transaction_id,
            frame.byte_range,
            frame.flag.as_byte() as char,
            frame.body.len()
        );

        // 다음 청크를 처리하기 전에 응답 전송
        if frame.failure_report {
            let response = ResponseFrame::for_request(&frame, 200, Some("OK"))?;
            self.transmit(response.encode())
                .map_err(Error::into_transfer)?;
        }

        // 통계 업데이트
        {
            let mut stats = self.stats.write();
            stats.chunks_received += 1;
            stats.bytes_received += frame.body.len() as u64;
        }

        let total = frame.byte_range.total;
        let received = {
            let mut buffer = self.receive_buffer.lock();
            buffer.add_chunk(&frame.body);
            buffer.current_size()
        };

        match frame.flag {
            ContinuationFlag::More => {
                self.set_inbound_state(InboundState::Receiving);
                self.notify(|l| l.on_progress(received, total));
            }

            ContinuationFlag::Last => {
                let payload = self.receive_buffer.lock().take();
                self.set_inbound_state(InboundState::Completed);
                info!(
                    parent: self.span(),
                    "콘텐츠 수신 완료: message={}, {} bytes",
                    frame.message_id().unwrap_or("-"),
                    payload.len()
                );

                if frame.success_report {
                    self.send_report(&frame, received);
                }

                self.stats.write().completed_receives += 1;
                self.notify(|l| l.on_data_received(payload, frame.content_type.as_deref()));
            }

            ContinuationFlag::Abort => {
                self.receive_buffer.lock().reset();
                self.set_inbound_state(InboundState::Aborted);
                info!(
                    parent: self.span(),
                    "상대측 전송 중단: message={}",
                    frame.message_id().unwrap_or("-")
                );
                self.notify(|l| l.on_aborted());
            }
        }

        Ok(())
    }

    /// 완료 REPORT 전송. 보고 대상 SEND 의 트랜잭션 ID 를 그대로 쓴다.
    /// 실패해도 수신 데이터는 전달한다.
    fn send_report(&self, frame: &SendFrame, received: u64) {
        let transaction_id = frame.transaction_id.clone();
        let report = match ReportFrame::for_request(transaction_id, frame, received, Status::ok()) {
            Ok(report) => report,
            Err(e) => {
                warn!(parent: self.span(), "REPORT 생성 실패: {}", e);
                return;
            }
        };

        match self.transmit(report.encode()) {
            Ok(()) => {
                self.stats.write().reports_sent += 1;
                debug!(
                    parent: self.span(),
                    "REPORT 전송: tx={}, range={}",
                    report.transaction_id,
                    report.byte_range
                );
            }
            Err(e) => warn!(parent: self.span(), "REPORT 전송 실패: {}", e),
        }
    }

    /// 수신한 응답 처리
    pub fn on_response_received(&self, response: &ResponseFrame) {
        info!(
            parent: self.span(),
            "응답 수신: code={}, tx={}",
            response.code,
            response.transaction_id
        );

        self.acknowledge();
        {
            let mut stats = self.stats.write();
            stats.responses_received += 1;
            if !response.is_success() {
                stats.error_responses += 1;
            }
        }
        self.response_signal.release();

        if !response.is_success() {
            let error = Error::Peer {
                code: response.code,
                comment: response.comment.clone(),
            };
            warn!(parent: self.span(), "{}", error);
            self.notify(|l| l.on_error(&error));
        }
    }

    /// 수신한 REPORT 처리
    pub fn on_report_received(&self, report: &ReportFrame) {
        info!(
            parent: self.span(),
            "REPORT 수신: message={}, range={}, status={}",
            report.message_id,
            report.byte_range,
            report.status
        );
        if !report.status.is_success() {
            warn!(parent: self.span(), "REPORT 실패 상태: {}", report.status);
        }

        self.stats.write().reports_received += 1;
        self.report_signal.release();
    }
}
