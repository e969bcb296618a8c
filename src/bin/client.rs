//! MSRP 송신기 - 파일 하나를 청크로 전송
//!
//! 사용법:
//!   cargo run --release --bin msrp-send -- [OPTIONS]
//!
//! 예시:
//!   # 청크마다 응답 대기 + 완료 REPORT 대기
//!   cargo run --release --bin msrp-send -- -s 127.0.0.1:2855 -f data.bin --success-report
//!
//!   # 응답 없이 빠르게 전송
//!   cargo run --release --bin msrp-send -- -f data.bin --no-failure-report

use std::fs::File;
use std::io::{BufReader, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use msrp::{Config, Error, TcpConnection, TransactionIdGenerator, TransferListener, TransferSession};

/// 송신기 설정
struct SenderArgs {
    server_addr: SocketAddr,
    file_path: Option<PathBuf>,
    content_type: String,
    verbose: bool,
    config: Config,
}

impl Default for SenderArgs {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 2855)),
            file_path: None,
            content_type: "application/octet-stream".into(),
            verbose: false,
            config: Config::default(),
        }
    }
}

fn parse_args() -> SenderArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config = SenderArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    config.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    config.file_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--content-type" => {
                if i + 1 < args.len() {
                    config.content_type = args[i + 1].clone();
                    i += 1;
                }
            }
            "--chunk-size" => {
                if i + 1 < args.len() {
                    config.config.chunk_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--timeout-ms" => {
                if i + 1 < args.len() {
                    config.config.response_timeout_ms =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--no-failure-report" => {
                config.config.failure_report = false;
            }
            "--success-report" => {
                config.config.success_report = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"msrp-send - MSRP 청크 송신기

파일을 SEND 청크로 나누어 수신기로 전송한다.

사용법:
  cargo run --release --bin msrp-send -- [OPTIONS]

옵션:
  -s, --server <ADDR>     수신기 주소 (기본: 127.0.0.1:2855)
  -f, --file <PATH>       전송할 파일 경로 (없으면 1MB 테스트 데이터)
  --content-type <TYPE>   Content-Type (기본: application/octet-stream)
  --chunk-size <SIZE>     청크 크기 바이트 (기본: 10240)
  --timeout-ms <MS>       청크 응답 대기 타임아웃 (기본: 10000)
  --no-failure-report     청크 응답을 요청하지 않음
  --success-report        완료 REPORT 를 요청하고 대기
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

/// 진행률을 10% 단위로 기록하는 리스너
#[derive(Default)]
struct ProgressLogger {
    logged_decile: AtomicU64,
}

impl TransferListener for ProgressLogger {
    fn on_progress(&self, current: u64, total: u64) {
        let decile = if total > 0 { current * 10 / total } else { 0 };
        if self.logged_decile.fetch_max(decile, Ordering::Relaxed) < decile {
            info!("송신 진행: {}/{} bytes ({}%)", current, total, decile * 10);
        }
    }

    fn on_completed(&self) {
        info!("수신기가 전송 완료를 확인함");
    }

    fn on_error(&self, error: &Error) {
        warn!("전송 에러: {}", error);
    }
}

/// 파일 CRC32 계산
fn file_crc32(path: &Path) -> std::io::Result<u32> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let len = reader.read(&mut buf)?;
        if len == 0 {
            break;
        }
        hasher.update(&buf[..len]);
    }
    Ok(hasher.finalize())
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

    info!("MSRP 송신기 시작");
    info!("Server: {}", args.server_addr);
    info!("Chunk size: {} bytes", args.config.chunk_size);
    info!(
        "Failure-Report: {}, Success-Report: {}",
        args.config.failure_report, args.config.success_report
    );

    let stream = TcpStream::connect(args.server_addr).await?;
    let local = stream.local_addr()?;
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;

    let ids = TransactionIdGenerator::new();
    let span = info_span!("msrp_session", peer = %args.server_addr);
    let session = Arc::new(TransferSession::with_span(args.config.clone(), span));
    session.set_from_path(format!("msrp://{}/{};tcp", local, ids.next_id()));
    session.set_to_path(format!("msrp://{}/{};tcp", args.server_addr, ids.next_id()));
    session.set_listener(Arc::new(ProgressLogger::default()));
    let connection = TcpConnection::open(stream, session.clone())?;

    let send_task = {
        let session = session.clone();
        let file_path = args.file_path.clone();
        let content_type = args.content_type.clone();
        tokio::task::spawn_blocking(move || -> msrp::Result<()> {
            match file_path {
                Some(path) => {
                    let total = std::fs::metadata(&path)?.len();
                    info!(
                        "파일 전송: {:?} ({} bytes, crc32={:08x})",
                        path,
                        total,
                        file_crc32(&path)?
                    );
                    let file = BufReader::new(File::open(&path)?);
                    session.send(file, &content_type, total)
                }
                None => {
                    // 테스트용 더미 데이터 (1MB)
                    let data = vec![0xABu8; 1024 * 1024];
                    info!(
                        "테스트 데이터 전송 ({} bytes, crc32={:08x})",
                        data.len(),
                        crc32fast::hash(&data)
                    );
                    session.send_bytes(&data, &content_type)
                }
            }
        })
    };
    tokio::pin!(send_task);

    let result = tokio::select! {
        result = &mut send_task => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("중단 요청, 세션 종료");
            session.close();
            send_task.await?
        }
    };

    match &result {
        Ok(()) => info!("송신 종료: {:?}", session.outbound_state()),
        Err(e) => error!("송신 실패: {}", e),
    }

    session.close();
    tokio::task::spawn_blocking(move || connection.join()).await?;
    info!("{}", session.stats().summary());

    result.map_err(Into::into)
}
