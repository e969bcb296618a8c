//! MSRP 연결
//!
//! 세션은 `Connection` 을 약한 참조로만 들고 프레임 송신과 종료 요청에 사용한다.
//! `TcpConnection` 은 TCP 스트림 위의 기본 구현으로, writer 스레드와
//! 프레임을 읽어 세션에 디스패치하는 reader 스레드를 가진다.

use std::io::Read;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, info, info_span, warn, Span};

use crate::frame::FrameDecoder;
use crate::session::TransferSession;
use crate::writer::{ChunkSender, WriteMode};
use crate::{Error, Result};

/// 세션이 사용하는 연결 인터페이스
pub trait Connection: Send + Sync {
    /// 인코딩된 프레임 전송
    fn send_chunk(&self, chunk: Bytes, mode: WriteMode) -> Result<()>;

    /// 연결 종료 (여러 번 호출 가능)
    fn close(&self);
}

/// TCP 연결
pub struct TcpConnection {
    stream: TcpStream,
    sender: ChunkSender<TcpStream>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    peer_addr: SocketAddr,
    span: Span,
}

impl TcpConnection {
    /// 주소로 연결 후 세션에 바인딩
    pub fn connect(addr: SocketAddr, session: Arc<TransferSession>) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr)?;
        Self::open(stream, session)
    }

    /// 이미 연결된 스트림으로 연결 생성
    ///
    /// writer/reader 스레드를 시작하고 세션에 자신을 바인딩한다.
    /// 반환된 `Arc` 를 들고 있는 동안만 연결이 유지된다.
    pub fn open(stream: TcpStream, session: Arc<TransferSession>) -> Result<Arc<Self>> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        let span = info_span!(parent: session.span(), "msrp_connection", peer = %peer_addr);

        let sender = ChunkSender::start(stream.try_clone()?, span.clone())?;

        let connection = Arc::new(Self {
            stream: stream.try_clone()?,
            sender,
            reader: Mutex::new(None),
            closed: AtomicBool::new(false),
            peer_addr,
            span: span.clone(),
        });

        let dyn_connection: Arc<dyn Connection> = connection.clone();
        session.set_connection(&dyn_connection);

        let decoder = FrameDecoder::new(session.config().max_header_size)
            .with_max_body_size(session.config().max_body_size);
        let handle = std::thread::Builder::new()
            .name("msrp-reader".into())
            .spawn(move || read_loop(stream, session, decoder, span))?;
        *connection.reader.lock() = Some(handle);

        info!(parent: &connection.span, "MSRP 연결 열림: {}", peer_addr);
        Ok(connection)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// writer/reader 스레드 종료 대기
    pub fn join(&self) {
        self.sender.join();
        if let Some(handle) = self.reader.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Connection for TcpConnection {
    fn send_chunk(&self, chunk: Bytes, mode: WriteMode) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.sender.send_chunk(chunk, mode)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sender.terminate();
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!(parent: &self.span, "소켓 종료 실패: {}", e);
        }
        info!(parent: &self.span, "MSRP 연결 종료: {}", self.peer_addr);
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop(
    mut stream: TcpStream,
    session: Arc<TransferSession>,
    mut decoder: FrameDecoder,
    span: Span,
) {
    let _entered = span.enter();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let len = match stream.read(&mut buf) {
            Ok(0) => {
                debug!("상대측 연결 종료");
                break;
            }
            Ok(len) => len,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !session.is_closed() {
                    warn!("수신 에러: {}", e);
                }
                break;
            }
        };

        decoder.extend(&buf[..len]);
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    if let Err(e) = session.dispatch(frame) {
                        warn!("프레임 처리 에러: {}", e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("프레임 파싱 실패, 연결 종료: {}", e);
                    session.close();
                    return;
                }
            }
        }
    }

    session.close();
}
