//! MSRP 수신기 - 연결 하나를 받아 콘텐츠를 파일로 저장
//!
//! 사용법:
//!   cargo run --release --bin msrp-recv -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin msrp-recv -- --bind 0.0.0.0:2855 --file received.bin

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, info_span, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use msrp::{Config, TcpConnection, TransferListener, TransferSession};

/// 수신기 설정
struct ReceiverArgs {
    bind_addr: SocketAddr,
    output_path: PathBuf,
    verbose: bool,
    config: Config,
}

impl Default for ReceiverArgs {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 2855)),
            output_path: PathBuf::from("received.bin"),
            verbose: false,
            config: Config::default(),
        }
    }
}

fn parse_args() -> ReceiverArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ReceiverArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    config.output_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--no-failure-report" => {
                config.config.failure_report = false;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"msrp-recv - MSRP 청크 수신기

TCP 연결 하나를 받아 수신한 콘텐츠를 파일로 저장한다.
응답/REPORT 는 상대가 보낸 Failure-Report / Success-Report 헤더를 따른다.

사용법:
  cargo run --release --bin msrp-recv -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:2855)
  -f, --file <PATH>       저장 경로 (기본: received.bin)
  --no-failure-report     응답 프레임을 writer 큐 대신 직접 쓰기
  -v, --verbose           프레임 단위 디버그 로그
  -h, --help              이 도움말 출력

로그 필터는 RUST_LOG 로도 지정할 수 있다.
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

/// 수신 이벤트
enum Received {
    Data(Bytes, Option<String>),
    Aborted,
}

/// 수신 이벤트를 메인 태스크로 넘기는 리스너
struct ForwardingListener {
    tx: mpsc::UnboundedSender<Received>,
    logged_decile: AtomicU64,
}

impl TransferListener for ForwardingListener {
    fn on_progress(&self, current: u64, total: u64) {
        let decile = if total > 0 { current * 10 / total } else { 0 };
        if self.logged_decile.fetch_max(decile, Ordering::Relaxed) < decile {
            info!("수신 진행: {}/{} bytes", current, total);
        }
    }

    fn on_data_received(&self, payload: Bytes, content_type: Option<&str>) {
        let _ = self
            .tx
            .send(Received::Data(payload, content_type.map(str::to_string)));
    }

    fn on_aborted(&self) {
        let _ = self.tx.send(Received::Aborted);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    // 로깅 설정
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    args.config.validate()?;

    let listener = TcpListener::bind(args.bind_addr).await?;
    info!("MSRP 수신기 대기 중: {}", listener.local_addr()?);

    let (stream, peer) = tokio::select! {
        accepted = listener.accept() => accepted?,
        _ = tokio::signal::ctrl_c() => {
            info!("중단됨");
            return Ok(());
        }
    };
    info!("연결 수락: {}", peer);

    // 세션은 블로킹 스레드에서 동작
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;

    let span = info_span!("msrp_session", peer = %peer);
    let session = Arc::new(TransferSession::with_span(args.config.clone(), span));
    let (tx, mut rx) = mpsc::unbounded_channel();
    session.set_listener(Arc::new(ForwardingListener {
        tx,
        logged_decile: AtomicU64::new(0),
    }));
    let connection = TcpConnection::open(stream, session.clone())?;

    let mut closed_check = tokio::time::interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => handle_event(event, &args.output_path).await?,
                None => break,
            },
            _ = closed_check.tick() => {
                if session.is_closed() {
                    // 종료 직전에 도착한 이벤트 처리
                    while let Ok(event) = rx.try_recv() {
                        handle_event(event, &args.output_path).await?;
                    }
                    info!("상대측 연결 종료");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("중단 요청, 세션 종료");
                break;
            }
        }
    }

    session.close();
    tokio::task::spawn_blocking(move || connection.join()).await?;
    info!("{}", session.stats().summary());

    Ok(())
}

async fn handle_event(event: Received, output_path: &Path) -> std::io::Result<()> {
    match event {
        Received::Data(payload, content_type) => {
            let digest = crc32fast::hash(&payload);
            tokio::fs::write(output_path, &payload).await?;
            info!(
                "콘텐츠 저장: {:?} ({} bytes, {}, crc32={:08x})",
                output_path,
                payload.len(),
                content_type.as_deref().unwrap_or("-"),
                digest
            );
        }
        Received::Aborted => warn!("송신측이 전송을 중단함"),
    }
    Ok(())
}
