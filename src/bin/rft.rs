//! RFT - Reliable File Transfer over UDP
//!
//! 인자가 없으면 서버(수신), `<ip>[:port] <filename>`이면 클라이언트(송신).
//!
//! 사용법:
//!   cargo run --release --bin rft -- [OPTIONS]
//!   cargo run --release --bin rft -- [OPTIONS] <IP[:PORT]> <FILE>
//!
//! 예시:
//!   # 수신 대기 (포트 30000)
//!   cargo run --release --bin rft -- -o ./received
//!
//!   # 파일 전송
//!   cargo run --release --bin rft -- 127.0.0.1 photo.png

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rft::session::{ReceiveSession, SendSession, SessionEvent};
use rft::transfer::OutgoingFile;
use rft::Config;

enum Role {
    Server,
    Client { server: SocketAddr, file: PathBuf },
}

struct Cli {
    role: Role,
    config: Config,
}

fn print_help() {
    println!(
        r#"RFT - Reliable File Transfer over UDP

신뢰성 계층(시퀀스/ACK/RTT) + Good/Bad 흐름 제어 위의 파일 전송

사용법:
  rft [OPTIONS]                      수신 대기 (서버)
  rft [OPTIONS] <IP[:PORT]> <FILE>   파일 전송 (클라이언트)

옵션:
  -o, --output <DIR>      수신 파일 저장 디렉터리 (기본: .)
  -p, --port <PORT>       서버: 대기 포트, 클라이언트: 바인드 포트
                          (기본: 서버 30000, 클라이언트 30001)
  -h, --help              이 도움말 출력

환경 변수:
  RUST_LOG                로그 필터 (기본: info, 통계는 debug)
"#
    );
}

fn parse_args() -> Result<Cli, Box<dyn Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config = Config::default();
    let mut port: Option<u16> = None;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--output" | "-o" => {
                let dir = args.get(i + 1).ok_or("--output 에 디렉터리 필요")?;
                config.output_dir = PathBuf::from(dir);
                i += 1;
            }
            "--port" | "-p" => {
                let value = args.get(i + 1).ok_or("--port 에 포트 번호 필요")?;
                port = Some(value.parse().map_err(|_| format!("유효하지 않은 포트: {}", value))?);
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                return Err(format!("알 수 없는 옵션: {} (--help 참고)", other).into());
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let role = match positional.as_slice() {
        [] => {
            if let Some(port) = port {
                config.server_port = port;
            }
            Role::Server
        }
        [address, file] => {
            if let Some(port) = port {
                config.client_port = port;
            }
            Role::Client {
                server: parse_server_addr(address, config.server_port)?,
                file: PathBuf::from(file),
            }
        }
        _ => return Err("사용법: rft [OPTIONS] [<IP[:PORT]> <FILE>] (--help 참고)".into()),
    };

    Ok(Cli { role, config })
}

/// `ip` 또는 `ip:port`
fn parse_server_addr(input: &str, default_port: u16) -> rft::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }
    input
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, default_port))
        .map_err(|_| rft::Error::InvalidAddress(input.to_string()))
}

fn report(event: &SessionEvent) {
    match event {
        SessionEvent::Connected { peer } => info!("Connected: {}", peer),
        SessionEvent::Disconnected { peer } => warn!("Disconnected: {}", peer),
        SessionEvent::TransferStarted {
            filename,
            file_size,
            total_slices,
        } => info!(
            "Transfer started: {} ({} bytes, {} slices)",
            filename, file_size, total_slices
        ),
        SessionEvent::TransferComplete { stats, path } => {
            info!("Transfer completed: {}", stats.summary());
            info!("Saved to {}", path.display());
        }
        SessionEvent::TransferFailed { filename, reason } => {
            warn!("Transfer failed: {} ({})", filename, reason)
        }
        SessionEvent::SendComplete { stats, drained } => {
            info!("Send complete: {}", stats.summary());
            if !drained {
                warn!("Some packets were still unacknowledged at exit");
            }
        }
    }
}

async fn run_server(config: Config) -> Result<(), Box<dyn Error>> {
    std::fs::create_dir_all(&config.output_dir)?;

    let socket = rft::socket::bind(config.server_port).await?;
    info!("Server listening on port {}", config.server_port);
    info!("Saving files to {}", config.output_dir.display());

    let mut session = ReceiveSession::new(socket, &config);
    let mut interval = tokio::time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            _ = interval.tick() => {
                // 서버는 소켓 에러로 멈추지 않음
                match session.tick(config.tick_interval) {
                    Ok(events) => events.iter().for_each(report),
                    Err(e) => warn!("Tick failed: {}", e),
                }
            }
        }
    }

    Ok(())
}

async fn run_client(config: Config, server: SocketAddr, file: PathBuf) -> Result<(), Box<dyn Error>> {
    let outgoing = OutgoingFile::begin(&file)?;
    let meta = outgoing.metadata();
    info!(
        "Sending {} ({} bytes, {} slices) to {}",
        meta.filename, meta.file_size, meta.total_slices, server
    );

    let socket = rft::socket::bind(config.client_port).await?;
    let mut session = SendSession::new(socket, &config, outgoing, server);

    let mut interval = tokio::time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !session.is_finished() {
        interval.tick().await;
        for event in session.tick(config.tick_interval)? {
            report(&event);
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = parse_args()?;

    match cli.role {
        Role::Server => run_server(cli.config).await,
        Role::Client { server, file } => run_client(cli.config, server, file).await,
    }
}
