//! 송신 전송
//!
//! - 소스를 `chunk_size` 단위로 읽어 SEND 청크로 전송
//! - Failure-Report 요청 시 청크마다 응답 대기 (미확인 청크 최대 1개)
//! - Success-Report 요청 시 마지막 청크 후 REPORT 대기

use std::io::{self, Read};
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::frame::{
    ByteRange, ContinuationFlag, Headers, SendFrame, HEADER_FROM_PATH, HEADER_MESSAGE_ID,
    HEADER_TO_PATH,
};
use crate::session::{OutboundState, TransferSession};
use crate::signal::WaitOutcome;
use crate::{Error, Result};

/// 송신 루프 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendOutcome {
    Completed,
    /// cancel 로 중단, abort 청크 전송됨
    Aborted,
    /// close 로 중단
    Cancelled,
}

impl TransferSession {
    /// 콘텐츠 송신
    ///
    /// 호출 스레드에서 전송이 끝날 때까지 블록한다. 세션이 닫혀 전송이
    /// 중단된 경우에도 `Ok(())` 를 반환하며 `on_completed` 는 호출되지 않는다.
    pub fn send<R: Read>(&self, mut source: R, content_type: &str, total_size: u64) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.config.validate()?;

        let from_path = self
            .from_path()
            .ok_or_else(|| Error::Configuration("From-Path 가 설정되지 않음".into()))?;
        let to_path = self
            .to_path()
            .ok_or_else(|| Error::Configuration("To-Path 가 설정되지 않음".into()))?;
        if self.connection().is_none() {
            return Err(Error::Configuration("연결이 설정되지 않음".into()));
        }

        let message_id = self.ids.next_id();
        let headers = Headers::new()
            .with(HEADER_FROM_PATH, from_path)
            .with(HEADER_TO_PATH, to_path)
            .with(HEADER_MESSAGE_ID, message_id.clone());

        info!(
            parent: self.span(),
            "콘텐츠 송신 시작: message={}, {} ({} bytes)",
            message_id,
            content_type,
            total_size
        );

        self.cancel_requested.store(false, Ordering::SeqCst);
        self.report_signal.arm();
        self.set_outbound_state(OutboundState::Sending);

        match self.send_chunks(&mut source, content_type, total_size, &headers) {
            Ok(SendOutcome::Completed) => {
                self.set_outbound_state(OutboundState::Completed);
                self.stats.write().completed_sends += 1;
                info!(parent: self.span(), "콘텐츠 송신 완료: message={}", message_id);
                self.notify(|l| l.on_completed());
                Ok(())
            }
            Ok(SendOutcome::Aborted) => {
                self.set_outbound_state(OutboundState::Aborted);
                info!(parent: self.span(), "콘텐츠 송신 취소: message={}", message_id);
                Ok(())
            }
            Ok(SendOutcome::Cancelled) => {
                self.set_outbound_state(OutboundState::Cancelled);
                info!(parent: self.span(), "세션 종료로 송신 중단: message={}", message_id);
                Ok(())
            }
            Err(_) if self.is_closed() => {
                self.set_outbound_state(OutboundState::Cancelled);
                debug!(parent: self.span(), "세션 종료 중 송신 실패 (무시)");
                Ok(())
            }
            Err(e) => {
                self.set_outbound_state(OutboundState::Error);
                error!(parent: self.span(), "콘텐츠 송신 실패: {}", e);
                self.notify(|l| l.on_error(&e));
                Err(e)
            }
        }
    }

    /// 메모리 버퍼 송신
    pub fn send_bytes(&self, data: &[u8], content_type: &str) -> Result<()> {
        self.send(data, content_type, data.len() as u64)
    }

    fn send_chunks<R: Read>(
        &self,
        source: &mut R,
        content_type: &str,
        total_size: u64,
        headers: &Headers,
    ) -> Result<SendOutcome> {
        let timeout = self.config.response_timeout();
        let mut data = vec![0u8; self.config.chunk_size];
        let mut first_byte: u64 = 1;
        let mut last_byte: u64 = 0;

        while !self.transfer_cancelled() {
            let len = read_chunk(source, &mut data).map_err(Error::Transfer)?;
            if len == 0 {
                break;
            }

            last_byte += len as u64;
            if last_byte > total_size {
                return Err(Error::Transfer(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("소스가 선언된 크기보다 큼: {} bytes 초과", last_byte - total_size),
                )));
            }

            let byte_range = ByteRange::new(first_byte, last_byte, total_size);
            let flag = if byte_range.is_final() {
                ContinuationFlag::Last
            } else {
                ContinuationFlag::More
            };

            self.send_chunk_frame(
                headers,
                content_type,
                byte_range,
                Bytes::copy_from_slice(&data[..len]),
                flag,
                timeout,
            )?;
            first_byte += len as u64;

            if !self.transfer_cancelled() {
                self.notify(|l| l.on_progress(last_byte, total_size));
            }
        }

        if self.transfer_cancelled() {
            if self.is_closed() {
                return Ok(SendOutcome::Cancelled);
            }

            // 빈 abort 청크로 수신측 조립 버퍼를 비움
            let byte_range = ByteRange::new(first_byte, last_byte, total_size);
            if let Err(e) = self.send_chunk_frame(
                headers,
                content_type,
                byte_range,
                Bytes::new(),
                ContinuationFlag::Abort,
                timeout,
            ) {
                warn!(parent: self.span(), "abort 청크 전송 실패: {}", e);
            }
            return Ok(SendOutcome::Aborted);
        }

        if last_byte < total_size {
            warn!(
                parent: self.span(),
                "소스가 선언된 크기보다 일찍 끝남: {}/{} bytes",
                last_byte,
                total_size
            );
        }

        if self.is_success_report_requested() {
            debug!(parent: self.span(), "REPORT 대기");
            match self.report_signal.wait(None) {
                WaitOutcome::Released => {}
                WaitOutcome::TimedOut | WaitOutcome::Closed => {
                    return Ok(SendOutcome::Cancelled);
                }
            }
        }

        Ok(SendOutcome::Completed)
    }

    /// SEND 청크 하나 전송 후 필요하면 응답 대기
    fn send_chunk_frame(
        &self,
        headers: &Headers,
        content_type: &str,
        byte_range: ByteRange,
        body: Bytes,
        flag: ContinuationFlag,
        timeout: Duration,
    ) -> Result<()> {
        let failure_report = self.is_failure_report_requested();
        let awaits_response = failure_report && flag != ContinuationFlag::Abort;
        let body_len = body.len() as u64;

        let frame = SendFrame {
            transaction_id: self.ids.next_id(),
            headers: headers.clone(),
            byte_range,
            content_type: Some(content_type.to_string()),
            failure_report,
            success_report: self.is_success_report_requested(),
            body,
            flag,
        };

        if awaits_response {
            self.response_signal.arm();
            let outstanding = self.unacknowledged.fetch_add(1, Ordering::SeqCst) + 1;
            let mut stats = self.stats.write();
            stats.max_unacknowledged = stats.max_unacknowledged.max(outstanding);
        }

        debug!(
            parent: self.span(),
            "SEND 전송: tx={}, range={}, flag={}",
            frame.transaction_id,
            frame.byte_range,
            flag.as_byte() as char
        );

        if let Err(e) = self.transmit(frame.encode()) {
            if awaits_response {
                self.acknowledge();
            }
            return Err(e.into_transfer());
        }

        // 통계 업데이트
        {
            let mut stats = self.stats.write();
            stats.chunks_sent += 1;
            stats.bytes_sent += body_len;
        }

        if awaits_response {
            match self.response_signal.wait(Some(timeout)) {
                WaitOutcome::Released => {}
                WaitOutcome::TimedOut => {
                    warn!(
                        parent: self.span(),
                        "응답 대기 타임아웃: tx={} ({:?})",
                        frame.transaction_id,
                        timeout
                    );
                    self.stats.write().response_timeouts += 1;
                }
                WaitOutcome::Closed => {
                    debug!(parent: self.span(), "세션 종료로 응답 대기 해제");
                }
            }
        }

        Ok(())
    }

    /// 미확인 청크 수 감소
    pub(crate) fn acknowledge(&self) {
        let _ = self
            .unacknowledged
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }
}

/// 버퍼가 차거나 소스가 끝날 때까지 읽기
fn read_chunk<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{Event, MockConnection, RecordingListener};
    use crate::writer::WriteMode;
    use crate::Config;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Instant;

    fn session_with(config: Config) -> (Arc<TransferSession>, Arc<RecordingListener>) {
        let session = Arc::new(TransferSession::new(config));
        session.set_from_path("msrp://alice.example.com:7777/s1;tcp");
        session.set_to_path("msrp://bob.example.com:8888/s2;tcp");
        let listener = Arc::new(RecordingListener::default());
        session.set_listener(listener.clone());
        (session, listener)
    }

    fn config(chunk_size: usize, failure_report: bool, success_report: bool) -> Config {
        Config {
            chunk_size,
            failure_report,
            success_report,
            response_timeout_ms: 5_000,
            ..Config::default()
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// 청크가 연속된 구간으로 콘텐츠 전체를 덮는지 확인
    fn assert_covers(frames: &[SendFrame], content: &[u8]) {
        let total = content.len() as u64;
        let mut next_first = 1;
        let mut joined = Vec::new();

        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.byte_range.first, next_first);
            assert_eq!(frame.byte_range.total, total);
            assert_eq!(frame.byte_range.len(), frame.body.len() as u64);
            let expected = if i + 1 == frames.len() {
                ContinuationFlag::Last
            } else {
                ContinuationFlag::More
            };
            assert_eq!(frame.flag, expected);
            next_first = frame.byte_range.last + 1;
            joined.extend_from_slice(&frame.body);
        }

        if !frames.is_empty() {
            assert_eq!(next_first - 1, total);
        }
        assert_eq!(joined, content);
    }

    #[test]
    fn test_send_splits_into_chunks() {
        let (session, listener) = session_with(config(4096, true, false));
        let connection = MockConnection::responding(200).attach(&session);
        let content = payload(10_000);

        session
            .send(&content[..], "application/octet-stream", 10_000)
            .unwrap();

        let frames = connection.send_frames();
        assert_eq!(frames.len(), 3);
        let ranges: Vec<String> = frames.iter().map(|f| f.byte_range.to_string()).collect();
        assert_eq!(ranges, ["1-4096/10000", "4097-8192/10000", "8193-10000/10000"]);
        assert_covers(&frames, &content);

        // 같은 메시지 헤더, 청크마다 다른 전송 ID
        assert!(frames
            .iter()
            .all(|f| f.message_id() == frames[0].message_id()));
        assert_ne!(frames[0].transaction_id, frames[1].transaction_id);
        assert!(frames.iter().all(|f| f.failure_report && !f.success_report));
        assert!(connection.modes().iter().all(|m| *m == WriteMode::Queued));

        assert_eq!(
            listener.events(),
            vec![
                Event::Progress(4096, 10_000),
                Event::Progress(8192, 10_000),
                Event::Progress(10_000, 10_000),
                Event::Completed,
            ]
        );
        assert_eq!(session.outbound_state(), OutboundState::Completed);

        let stats = session.stats();
        assert_eq!(stats.chunks_sent, 3);
        assert_eq!(stats.bytes_sent, 10_000);
        assert_eq!(stats.responses_received, 3);
        assert_eq!(stats.completed_sends, 1);
    }

    #[test]
    fn test_chunks_cover_content() {
        for len in [1usize, 511, 512, 513, 1024, 3000, 4097] {
            let (session, _) = session_with(config(512, false, false));
            let connection = MockConnection::default().attach(&session);
            let content = payload(len);

            session.send_bytes(&content, "text/plain").unwrap();

            let frames = connection.send_frames();
            assert_eq!(frames.len(), (len + 511) / 512, "len={}", len);
            assert_covers(&frames, &content);
        }
    }

    #[test]
    fn test_empty_content_sends_nothing() {
        let (session, listener) = session_with(config(512, true, false));
        let connection = MockConnection::responding(200).attach(&session);

        session.send_bytes(&[], "text/plain").unwrap();

        assert!(connection.frames().is_empty());
        assert_eq!(listener.events(), vec![Event::Completed]);
    }

    #[test]
    fn test_without_failure_report_does_not_wait() {
        let (session, listener) = session_with(config(1024, false, false));
        // 응답하지 않는 상대
        let connection = MockConnection::default().attach(&session);
        let content = payload(8 * 1024);

        let started = Instant::now();
        session.send_bytes(&content, "text/plain").unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        let frames = connection.send_frames();
        assert_eq!(frames.len(), 8);
        assert!(frames.iter().all(|f| !f.failure_report));
        assert!(connection.modes().iter().all(|m| *m == WriteMode::Direct));
        assert_eq!(listener.count(|e| *e == Event::Completed), 1);
        assert_eq!(session.stats().max_unacknowledged, 0);
    }

    #[test]
    fn test_at_most_one_unacknowledged_chunk() {
        let (session, _) = session_with(config(256, true, false));
        let connection = MockConnection::responding(200)
            .with_response_delay(Duration::from_millis(2))
            .attach(&session);

        session.send_bytes(&payload(256 * 20), "text/plain").unwrap();

        assert_eq!(connection.send_frames().len(), 20);
        assert_eq!(connection.max_outstanding(), 1);
        assert_eq!(session.stats().max_unacknowledged, 1);
        assert_eq!(session.unacknowledged.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_response_timeout_continues() {
        let mut config = config(100, true, false);
        config.response_timeout_ms = 20;
        let (session, listener) = session_with(config);
        let connection = MockConnection::default().attach(&session);

        session.send_bytes(&payload(250), "text/plain").unwrap();

        assert_eq!(connection.send_frames().len(), 3);
        assert_eq!(session.stats().response_timeouts, 3);
        assert_eq!(listener.count(|e| *e == Event::Completed), 1);
    }

    #[test]
    fn test_error_response_does_not_abort() {
        let (session, listener) = session_with(config(100, true, false));
        let connection = MockConnection::responding(481).attach(&session);

        session.send_bytes(&payload(300), "text/plain").unwrap();

        assert_eq!(connection.send_frames().len(), 3);
        assert_eq!(
            listener.count(|e| matches!(e, Event::Error(msg) if msg.contains("481"))),
            3
        );
        assert_eq!(listener.count(|e| *e == Event::Completed), 1);
        assert_eq!(session.stats().error_responses, 3);
    }

    #[test]
    fn test_success_report_completes_transfer() {
        let (session, listener) = session_with(config(1000, true, true));
        let connection = MockConnection::responding(200)
            .with_reports()
            .attach(&session);

        session.send_bytes(&payload(2500), "text/plain").unwrap();

        let frames = connection.send_frames();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.success_report));
        assert_eq!(listener.count(|e| *e == Event::Completed), 1);
        assert_eq!(session.stats().reports_received, 1);
    }

    #[test]
    fn test_close_releases_response_wait() {
        let (session, listener) = session_with(config(100, true, false));
        // 응답하지 않는 상대, 타임아웃 5초
        let connection = MockConnection::default().attach(&session);

        let handle = {
            let session = session.clone();
            std::thread::spawn(move || {
                let started = Instant::now();
                let result = session.send_bytes(&payload(1000), "text/plain");
                (result, started.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(100));
        session.close();

        let (result, elapsed) = handle.join().unwrap();
        assert!(result.is_ok());
        assert!(elapsed < Duration::from_secs(4));
        assert_eq!(connection.send_frames().len(), 1);
        assert_eq!(connection.close_count(), 1);
        assert_eq!(listener.count(|e| *e == Event::Completed), 0);
        assert_eq!(session.outbound_state(), OutboundState::Cancelled);
    }

    #[test]
    fn test_close_releases_report_wait() {
        let (session, listener) = session_with(config(1000, true, true));
        // 응답은 하지만 REPORT 는 보내지 않는 상대
        let connection = MockConnection::responding(200).attach(&session);

        let handle = {
            let session = session.clone();
            std::thread::spawn(move || session.send_bytes(&payload(1500), "text/plain"))
        };

        assert!(crate::test_util::wait_until(Duration::from_secs(5), || {
            connection.send_frames().len() == 2
        }));
        std::thread::sleep(Duration::from_millis(50));
        session.close();

        assert!(handle.join().unwrap().is_ok());
        assert_eq!(listener.count(|e| *e == Event::Completed), 0);
        assert_eq!(session.outbound_state(), OutboundState::Cancelled);
    }

    /// 지정 횟수 읽은 뒤 세션 취소 또는 종료를 요청하는 소스
    struct InterruptingReader {
        inner: io::Cursor<Vec<u8>>,
        session: Arc<TransferSession>,
        reads_left: usize,
        close: bool,
    }

    impl Read for InterruptingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.reads_left == 0 {
                if self.close {
                    self.session.close();
                } else {
                    self.session.cancel();
                }
            }
            self.reads_left = self.reads_left.saturating_sub(1);
            self.inner.read(buf)
        }
    }

    #[test]
    fn test_cancel_sends_abort_chunk() {
        let (session, listener) = session_with(config(100, false, false));
        let connection = MockConnection::default().attach(&session);
        let source = InterruptingReader {
            inner: io::Cursor::new(payload(1000)),
            session: session.clone(),
            reads_left: 2,
            close: false,
        };

        session.send(source, "text/plain", 1000).unwrap();

        let frames = connection.send_frames();
        // 청크 3개를 보낸 뒤 다음 청크 전에 중단
        assert_eq!(frames.len(), 4);
        let abort = frames.last().unwrap();
        assert_eq!(abort.flag, ContinuationFlag::Abort);
        assert!(abort.body.is_empty());
        assert_eq!(abort.byte_range.to_string(), "301-300/1000");
        assert_eq!(session.outbound_state(), OutboundState::Aborted);
        assert_eq!(listener.count(|e| *e == Event::Completed), 0);
        assert_eq!(connection.close_count(), 0);
    }

    #[test]
    fn test_close_during_send_skips_abort_chunk() {
        let (session, listener) = session_with(config(100, false, false));
        let connection = MockConnection::default().attach(&session);
        let source = InterruptingReader {
            inner: io::Cursor::new(payload(1000)),
            session: session.clone(),
            reads_left: 1,
            close: true,
        };

        session.send(source, "text/plain", 1000).unwrap();

        assert!(connection
            .send_frames()
            .iter()
            .all(|f| f.flag != ContinuationFlag::Abort));
        assert_eq!(session.outbound_state(), OutboundState::Cancelled);
        assert_eq!(listener.count(|e| *e == Event::Completed), 0);
        assert!(matches!(
            session.send_bytes(b"again", "text/plain"),
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn test_send_from_file() {
        let content = payload(50_000);
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&content).unwrap();
        file.flush().unwrap();
        std::io::Seek::rewind(&mut file).unwrap();

        let (session, _) = session_with(Config::unacknowledged());
        session.set_from_path("msrp://a/1;tcp");
        session.set_to_path("msrp://b/2;tcp");
        let connection = MockConnection::default().attach(&session);

        session.send(file, "image/png", 50_000).unwrap();

        let frames = connection.send_frames();
        assert_eq!(frames.len(), 5);
        assert_covers(&frames, &content);
        assert!(frames
            .iter()
            .all(|f| f.content_type.as_deref() == Some("image/png")));
    }

    #[test]
    fn test_oversized_source_is_transfer_error() {
        let (session, listener) = session_with(config(100, false, false));
        let _connection = MockConnection::default().attach(&session);

        let result = session.send(&payload(300)[..], "text/plain", 150);

        assert!(matches!(result, Err(Error::Transfer(_))));
        assert_eq!(session.outbound_state(), OutboundState::Error);
        assert_eq!(listener.count(|e| matches!(e, Event::Error(_))), 1);
    }

    #[test]
    fn test_short_source_still_completes() {
        let (session, listener) = session_with(config(100, false, false));
        let connection = MockConnection::default().attach(&session);

        session.send(&payload(150)[..], "text/plain", 400).unwrap();

        let frames = connection.send_frames();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.flag == ContinuationFlag::More));
        assert_eq!(listener.count(|e| *e == Event::Completed), 1);
    }

    struct BrokenSource;

    impl Read for BrokenSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk gone"))
        }
    }

    #[test]
    fn test_source_read_error() {
        let (session, listener) = session_with(config(100, false, false));
        let _connection = MockConnection::default().attach(&session);

        let result = session.send(BrokenSource, "text/plain", 10);

        assert!(matches!(result, Err(Error::Transfer(_))));
        assert_eq!(listener.count(|e| matches!(e, Event::Error(_))), 1);
    }

    #[test]
    fn test_write_failure_is_transfer_error() {
        let (session, _) = session_with(config(100, true, false));
        let _connection = MockConnection::failing().attach(&session);

        let result = session.send_bytes(&payload(300), "text/plain");

        assert!(matches!(result, Err(Error::Transfer(_))));
        assert_eq!(session.unacknowledged.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_configuration() {
        let session = Arc::new(TransferSession::default());
        let _connection = MockConnection::default().attach(&session);
        assert!(matches!(
            session.send_bytes(b"x", "text/plain"),
            Err(Error::Configuration(_))
        ));

        let unbound = TransferSession::default();
        unbound.set_from_path("msrp://a/1;tcp");
        unbound.set_to_path("msrp://b/2;tcp");
        assert!(matches!(
            unbound.send_bytes(b"x", "text/plain"),
            Err(Error::Configuration(_))
        ));

        let invalid = TransferSession::new(Config {
            chunk_size: 0,
            ..Config::default()
        });
        assert!(matches!(
            invalid.send_bytes(b"x", "text/plain"),
            Err(Error::Configuration(_))
        ));
        assert_eq!(session.stats().chunks_sent, 0);
    }
}
