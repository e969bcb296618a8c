//! 청크 송신기
//!
//! - `OutboundQueue`: 인코딩된 프레임의 무제한 FIFO 큐
//! - `ChunkSender`: 큐를 비우는 전용 writer 스레드 + 호출 스레드 직접 쓰기 경로
//!
//! 하나의 연결에 대한 쓰기는 모두 이 타입을 거쳐 직렬화된다.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, Span};

use crate::{Error, Result};

/// 프레임 하나의 쓰기 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// writer 스레드 큐를 통해 전송
    Queued,

    /// 호출 스레드에서 즉시 쓰기 + flush
    Direct,
}

/// 송신 대기 프레임 큐
pub struct OutboundQueue {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,

    /// drop 시 대기 중인 dequeue 를 깨움
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,

    terminated: AtomicBool,
}

impl OutboundQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = unbounded();
        Self {
            tx,
            rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            terminated: AtomicBool::new(false),
        }
    }

    /// 프레임 추가
    pub fn enqueue(&self, frame: Bytes) -> Result<()> {
        if self.is_terminated() {
            return Err(Error::ConnectionClosed);
        }
        self.tx.send(frame).map_err(|_| Error::ChannelError)
    }

    /// 다음 프레임을 꺼냄. 큐가 비어 있으면 블록, 종료되면 None.
    pub fn dequeue(&self) -> Option<Bytes> {
        if self.is_terminated() {
            return None;
        }
        select! {
            recv(self.rx) -> frame => frame.ok(),
            recv(self.shutdown_rx) -> _ => None,
        }
    }

    /// 대기 해제 및 종료 표시
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.shutdown_tx.lock().take();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// 연결 하나에 대한 청크 송신기
pub struct ChunkSender<W: Write + Send + 'static> {
    queue: Arc<OutboundQueue>,
    stream: Arc<Mutex<W>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl<W: Write + Send + 'static> ChunkSender<W> {
    /// writer 스레드 시작
    pub fn start(stream: W, span: Span) -> Result<Self> {
        let queue = Arc::new(OutboundQueue::new());
        let stream = Arc::new(Mutex::new(stream));

        let handle = {
            let queue = queue.clone();
            let stream = stream.clone();
            let span = span.clone();
            std::thread::Builder::new()
                .name("msrp-writer".into())
                .spawn(move || write_loop(&queue, &stream, span))?
        };

        Ok(Self {
            queue,
            stream,
            handle: Mutex::new(Some(handle)),
            span,
        })
    }

    /// 청크 전송
    pub fn send_chunk(&self, chunk: Bytes, mode: WriteMode) -> Result<()> {
        match mode {
            WriteMode::Queued => self.queue.enqueue(chunk),
            WriteMode::Direct => {
                if self.queue.is_terminated() {
                    return Err(Error::ConnectionClosed);
                }
                let mut stream = self.stream.lock();
                stream.write_all(&chunk).map_err(Error::Transfer)?;
                stream.flush().map_err(Error::Transfer)?;
                debug!(parent: &self.span, "MSRP 프레임 직접 전송: {} bytes", chunk.len());
                Ok(())
            }
        }
    }

    /// writer 종료 요청
    pub fn terminate(&self) {
        self.queue.terminate();
        debug!(parent: &self.span, "청크 송신기 종료 요청");
    }

    /// writer 스레드 종료 대기
    pub fn join(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// 큐에 남은 프레임 수
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.queue.is_terminated()
    }
}

impl<W: Write + Send + 'static> Drop for ChunkSender<W> {
    fn drop(&mut self) {
        self.queue.terminate();
    }
}

fn write_loop<W: Write>(queue: &OutboundQueue, stream: &Mutex<W>, span: Span) {
    let _entered = span.enter();
    debug!("writer 스레드 시작");

    while let Some(frame) = queue.dequeue() {
        if queue.is_terminated() {
            break;
        }

        let result = {
            let mut stream = stream.lock();
            stream.write_all(&frame).and_then(|_| stream.flush())
        };

        match result {
            Ok(()) => debug!("MSRP 프레임 전송: {} bytes", frame.len()),
            Err(e) if queue.is_terminated() => {
                debug!("종료 중 쓰기 실패 (무시): {}", e);
                break;
            }
            Err(e) => {
                error!("청크 송신 실패: {}", e);
                queue.terminate();
                break;
            }
        }
    }

    debug!("writer 스레드 종료");
}
