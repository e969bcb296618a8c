//! 전송 통계

use std::time::{Duration, Instant};

/// 세션 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 송신한 SEND 청크 수
    pub chunks_sent: u64,

    /// 송신한 페이로드 바이트
    pub bytes_sent: u64,

    /// 수신한 SEND 청크 수
    pub chunks_received: u64,

    /// 수신한 페이로드 바이트
    pub bytes_received: u64,

    /// 수신한 응답 수
    pub responses_received: u64,

    /// 200 이외 응답 수
    pub error_responses: u64,

    /// 응답 대기 타임아웃 횟수
    pub response_timeouts: u64,

    /// 송신한 REPORT 수
    pub reports_sent: u64,

    /// 수신한 REPORT 수
    pub reports_received: u64,

    /// 완료된 송신 전송 수
    pub completed_sends: u64,

    /// 완료된 수신 전송 수
    pub completed_receives: u64,

    /// 동시에 응답을 기다린 청크 수의 최댓값
    pub max_unacknowledged: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            chunks_sent: 0,
            bytes_sent: 0,
            chunks_received: 0,
            bytes_received: 0,
            responses_received: 0,
            error_responses: 0,
            response_timeouts: 0,
            reports_sent: 0,
            reports_received: 0,
            completed_sends: 0,
            completed_receives: 0,
            max_unacknowledged: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 송신 처리율 (bytes/sec)
    pub fn send_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_sent as f64 / elapsed
    }

    /// 수신 처리율 (bytes/sec)
    pub fn receive_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_received as f64 / elapsed
    }

    /// 응답 타임아웃 비율
    pub fn timeout_rate(&self) -> f64 {
        if self.chunks_sent == 0 {
            return 0.0;
        }
        self.response_timeouts as f64 / self.chunks_sent as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} chunks / {} bytes ({:.2} MB/s) | Received: {} chunks / {} bytes | Responses: {} ({} errors, {} timeouts) | Reports: {} sent / {} received",
            self.elapsed().as_secs_f64(),
            self.chunks_sent,
            self.bytes_sent,
            self.send_throughput() / 1_000_000.0,
            self.chunks_received,
            self.bytes_received,
            self.responses_received,
            self.error_responses,
            self.response_timeouts,
            self.reports_sent,
            self.reports_received,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
