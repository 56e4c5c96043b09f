//! TARQ 로봇 - 핸드쉐이크 응답자
//!
//! UDP를 무선 링크 삼아 랜드베이스의 HANDSHAKE를 기다리고, 링크 테스트에 응답한다.
//! - TEXT "ECHO..."는 그대로 돌려보냄 (지연 테스트)
//! - TEXT/IMAGE 수신량을 세다가 "STOP"을 받으면 "DONE ..."으로 보고 (처리율/손실 테스트)
//! - 하트비트가 끊기면 재부팅 후 다시 핸드쉐이크 대기
//!
//! 사용법:
//!   cargo run --release --bin tarq-robot -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin tarq-robot -- --bind 0.0.0.0:9100
//!   RUST_LOG=tarq=debug cargo run --bin tarq-robot -- --config robot.toml

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tarq::medium::UdpMedium;
use tarq::message::{HeartbeatMessage, MotorCommand};
use tarq::{Config, Error, LinkMonitor, MediumSet, Mode, Packet, PacketType, Payload, Role, Session};

/// 로봇 실행 설정
struct RobotOptions {
    bind_addr: SocketAddr,
    peer_addr: Option<SocketAddr>,
    config_path: Option<PathBuf>,
    window_size: Option<usize>,
    tx_timeout_ms: Option<u64>,
}

impl Default for RobotOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9100)),
            peer_addr: None,
            config_path: None,
            window_size: None,
            tx_timeout_ms: None,
        }
    }
}

fn value<T: std::str::FromStr>(args: &[String], i: usize, name: &str) -> Result<T, String> {
    args.get(i + 1)
        .ok_or_else(|| format!("{}: 값이 필요함", name))?
        .parse()
        .map_err(|_| format!("{}: 유효하지 않은 값", name))
}

fn parse_args() -> Result<RobotOptions, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = RobotOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                options.bind_addr = value(&args, i, "--bind")?;
                i += 1;
            }
            "--peer" | "-p" => {
                options.peer_addr = Some(value(&args, i, "--peer")?);
                i += 1;
            }
            "--config" | "-c" => {
                options.config_path = Some(value(&args, i, "--config")?);
                i += 1;
            }
            "--window" | "-w" => {
                options.window_size = Some(value(&args, i, "--window")?);
                i += 1;
            }
            "--tx-timeout" => {
                options.tx_timeout_ms = Some(value(&args, i, "--tx-timeout")?);
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"TARQ Robot - 핸드쉐이크 응답자

사용법:
  cargo run --release --bin tarq-robot -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:9100)
  -p, --peer <ADDR>       랜드베이스 주소 (기본: 첫 수신 주소 학습)
  -c, --config <PATH>     TOML 설정 파일
  -w, --window <N>        윈도우 크기 (기본: 8)
  --tx-timeout <MS>       재전송 타임아웃 밀리초 (기본: 1500)
  -h, --help              이 도움말 출력

로그 레벨은 RUST_LOG로 조정 (기본: info)
"#
                );
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {}", other)),
        }
        i += 1;
    }

    Ok(options)
}

/// 링크 테스트 수신 카운터
#[derive(Default)]
struct TestCounters {
    text: u64,
    image: u64,
    bytes: u64,
    started: Option<Instant>,
}

impl TestCounters {
    fn record(&mut self, packet: &Packet) {
        self.started.get_or_insert_with(Instant::now);
        self.bytes += packet.len() as u64;
        match packet.kind {
            PacketType::Image => self.image += 1,
            _ => self.text += 1,
        }
    }

    fn report(&self) -> String {
        let elapsed_ms = self.started.map_or(0, |s| s.elapsed().as_millis());
        format!(
            "DONE text={} image={} bytes={} elapsed_ms={}",
            self.text, self.image, self.bytes, elapsed_ms
        )
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = parse_args()?;

    let mut config = match &options.config_path {
        Some(path) => Config::load(path)?,
        None => Config::radio(),
    };
    config.role = Role::Responder;
    if let Some(window) = options.window_size {
        config.window_size = window;
    }
    if let Some(timeout) = options.tx_timeout_ms {
        config.tx_timeout_ms = timeout;
    }

    info!("TARQ Robot starting...");
    info!("Bind address: {}", options.bind_addr);
    info!("Window size: {}", config.window_size);
    info!("TX timeout: {} ms", config.tx_timeout_ms);

    let radio = UdpMedium::bind(options.bind_addr, options.peer_addr, config.flush_timeout()).await?;
    let mediums = MediumSet::new().with(Arc::new(radio));
    let session = Session::new(config.clone(), mediums)?;

    loop {
        info!("랜드베이스 HANDSHAKE 대기...");
        match session.reboot(Mode::Handshake).await {
            Ok(()) => {}
            Err(Error::HandshakeTimeout { .. }) => continue,
            Err(e) => return Err(e.into()),
        }

        tokio::select! {
            result = serve(&session, &config) => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("종료 신호 수신");
                break;
            }
        }
    }

    let _ = session.stop().await;
    info!("{}", session.stats().summary());
    Ok(())
}

/// 연결된 동안 패킷 처리. 링크 손실 시 반환
async fn serve(session: &Session, config: &Config) -> tarq::Result<()> {
    let mut monitor = LinkMonitor::new(config.lost_link_timeout());
    let heartbeat_every = config.lost_link_timeout() / 4;
    let mut last_heartbeat = Instant::now();
    let mut counters = TestCounters::default();

    loop {
        let now = Instant::now();
        if monitor.is_lost(now) {
            warn!("링크 손실: {:?} 동안 수신 없음", monitor.silence(now));
            return Ok(());
        }
        if now.duration_since(last_heartbeat) >= heartbeat_every {
            session.send_async(monitor.next_heartbeat().to_packet()?).await?;
            last_heartbeat = now;
        }

        let Some(packet) = session.recv_timeout(Duration::from_millis(100)).await else {
            continue;
        };
        monitor.observe(&packet, Instant::now());

        match packet.kind {
            PacketType::Text if packet.payload.starts_with(b"ECHO") => {
                session.send_async(Packet::new(PacketType::Text, packet.payload.clone())?).await?;
            }
            PacketType::Text if &packet.payload[..] == b"STOP" => {
                let report = counters.report();
                info!("링크 테스트 종료: {}", report);
                session.send_async(Packet::text(&report)?).await?;
                counters = TestCounters::default();
            }
            PacketType::Text | PacketType::Image => counters.record(&packet),
            PacketType::HeartbeatReq => {
                session.send_async(HeartbeatMessage::new(0).to_packet()?).await?;
            }
            PacketType::MtrCmd => match MotorCommand::from_packet(&packet) {
                Ok(command) => info!("모터 명령: left={:.2} right={:.2}", command.left, command.right),
                Err(e) => warn!("모터 명령 해석 실패: {}", e),
            },
            PacketType::Handshake => {
                info!("랜드베이스 재연결");
                counters = TestCounters::default();
            }
            PacketType::Heartbeat => {}
            other => info!("수신: {:?} ({} 바이트)", other, packet.len()),
        }
    }
}
