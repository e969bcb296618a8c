//! 테스트 보조 타입

use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::connection::Connection;
use crate::frame::{ContinuationFlag, Frame, ReportFrame, ResponseFrame, SendFrame, Status};
use crate::listener::TransferListener;
use crate::session::TransferSession;
use crate::writer::WriteMode;
use crate::{Error, Result};

/// 조건이 참이 될 때까지 폴링
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// 스레드 간 공유 가능한 쓰기 버퍼
#[derive(Debug, Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 항상 실패하는 writer
pub struct FailingWriter;

impl Write for FailingWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
    }
}

/// 기록된 리스너 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Progress(u64, u64),
    Completed,
    Data(Bytes, Option<String>),
    Aborted,
    Error(String),
}

/// 이벤트를 순서대로 기록하는 리스너
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl TransferListener for RecordingListener {
    fn on_progress(&self, current: u64, total: u64) {
        self.events.lock().push(Event::Progress(current, total));
    }

    fn on_completed(&self) {
        self.events.lock().push(Event::Completed);
    }

    fn on_data_received(&self, payload: Bytes, content_type: Option<&str>) {
        self.events
            .lock()
            .push(Event::Data(payload, content_type.map(str::to_string)));
    }

    fn on_aborted(&self) {
        self.events.lock().push(Event::Aborted);
    }

    fn on_error(&self, error: &Error) {
        self.events.lock().push(Event::Error(error.to_string()));
    }
}

/// 프레임을 기록하고 선택적으로 상대측을 흉내내는 연결
///
/// 응답/REPORT 는 별도 스레드에서 세션에 전달되어 실제 디스패치 스레드처럼
/// 동작한다.
#[derive(Default)]
pub struct MockConnection {
    respond_with: Option<u16>,
    response_delay: Duration,
    send_reports: bool,
    fail_sends: bool,
    session: Mutex<Option<Weak<TransferSession>>>,
    frames: Mutex<Vec<(Frame, WriteMode)>>,
    outstanding: Arc<Mutex<HashSet<String>>>,
    max_outstanding: AtomicUsize,
    closed: AtomicBool,
    close_count: AtomicUsize,
}

impl MockConnection {
    /// 청크마다 주어진 코드로 응답하는 상대
    pub fn responding(code: u16) -> Self {
        Self {
            respond_with: Some(code),
            ..Self::default()
        }
    }

    /// 모든 쓰기가 실패하는 연결
    pub fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// 마지막 청크에 REPORT 로 답함
    pub fn with_reports(mut self) -> Self {
        self.send_reports = true;
        self
    }

    /// 세션에 바인딩
    pub fn attach(self, session: &Arc<TransferSession>) -> Arc<Self> {
        *self.session.lock() = Some(Arc::downgrade(session));
        let connection = Arc::new(self);
        let dyn_connection: Arc<dyn Connection> = connection.clone();
        session.set_connection(&dyn_connection);
        connection
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().iter().map(|(f, _)| f.clone()).collect()
    }

    pub fn send_frames(&self) -> Vec<SendFrame> {
        self.frames
            .lock()
            .iter()
            .filter_map(|(f, _)| match f {
                Frame::Send(send) => Some(send.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn modes(&self) -> Vec<WriteMode> {
        self.frames.lock().iter().map(|(_, m)| *m).collect()
    }

    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    fn answer(&self, send: &SendFrame) {
        let session = match self.session.lock().as_ref().and_then(Weak::upgrade) {
            Some(session) => session,
            None => return,
        };

        if let Some(code) = self.respond_with {
            if send.failure_report && send.flag != ContinuationFlag::Abort {
                {
                    let mut outstanding = self.outstanding.lock();
                    outstanding.insert(send.transaction_id.clone());
                    self.max_outstanding
                        .fetch_max(outstanding.len(), Ordering::SeqCst);
                }

                let response = ResponseFrame::for_request(send, code, Some("OK")).unwrap();
                let outstanding = self.outstanding.clone();
                let session = session.clone();
                let delay = self.response_delay;
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    outstanding.lock().remove(&response.transaction_id);
                    session.on_response_received(&response);
                });
            }
        }

        if self.send_reports && send.success_report && send.flag == ContinuationFlag::Last {
            let report = ReportFrame::for_request(
                send.transaction_id.clone(),
                send,
                send.byte_range.total,
                Status::ok(),
            )
            .unwrap();
            std::thread::spawn(move || session.on_report_received(&report));
        }
    }
}

impl Connection for MockConnection {
    fn send_chunk(&self, chunk: Bytes, mode: WriteMode) -> Result<()> {
        if self.fail_sends {
            return Err(Error::Transfer(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        let frame = Frame::decode(&chunk).unwrap();
        self.frames.lock().push((frame.clone(), mode));
        if let Frame::Send(send) = &frame {
            self.answer(send);
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}
