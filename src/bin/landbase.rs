//! TARQ 랜드베이스 - 핸드쉐이크 개시자 + 링크 테스트벤치
//!
//! 로봇(`tarq-robot`)과 핸드쉐이크 후 다음 테스트를 실행한다.
//! - throughput: TEXT 패킷을 연속 전송, 로봇 보고 기준 처리율
//! - latency: "ECHO" 왕복 시간
//! - loss: IMAGE(기본 비신뢰) 전송 후 로봇이 받은 개수로 손실률 계산
//!
//! 사용법:
//!   cargo run --release --bin tarq-landbase -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin tarq-landbase -- --robot 127.0.0.1:9100 --test all
//!   cargo run --release --bin tarq-landbase -- --robot 10.0.0.7:9100 --test latency --count 50

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tarq::medium::UdpMedium;
use tarq::{Config, MediumSet, Mode, Packet, PacketType, Role, Session};

/// 실행할 테스트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestKind {
    Throughput,
    Latency,
    Loss,
    All,
}

impl std::str::FromStr for TestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "throughput" => Ok(TestKind::Throughput),
            "latency" => Ok(TestKind::Latency),
            "loss" => Ok(TestKind::Loss),
            "all" => Ok(TestKind::All),
            other => Err(format!("알 수 없는 테스트: {}", other)),
        }
    }
}

/// 랜드베이스 실행 설정
struct LandbaseOptions {
    bind_addr: SocketAddr,
    robot_addr: SocketAddr,
    config_path: Option<PathBuf>,
    test: TestKind,
    count: Option<usize>,
    size: Option<usize>,
    window_size: Option<usize>,
}

impl Default for LandbaseOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            robot_addr: SocketAddr::from(([127, 0, 0, 1], 9100)),
            config_path: None,
            test: TestKind::All,
            count: None,
            size: None,
            window_size: None,
        }
    }
}

fn value<T: std::str::FromStr>(args: &[String], i: usize, name: &str) -> Result<T, String> {
    args.get(i + 1)
        .ok_or_else(|| format!("{}: 값이 필요함", name))?
        .parse()
        .map_err(|_| format!("{}: 유효하지 않은 값", name))
}

fn parse_args() -> Result<LandbaseOptions, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = LandbaseOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                options.bind_addr = value(&args, i, "--bind")?;
                i += 1;
            }
            "--robot" | "-r" => {
                options.robot_addr = value(&args, i, "--robot")?;
                i += 1;
            }
            "--config" | "-c" => {
                options.config_path = Some(value(&args, i, "--config")?);
                i += 1;
            }
            "--test" | "-t" => {
                options.test = value(&args, i, "--test")?;
                i += 1;
            }
            "--count" | "-n" => {
                options.count = Some(value(&args, i, "--count")?);
                i += 1;
            }
            "--size" | "-s" => {
                options.size = Some(value(&args, i, "--size")?);
                i += 1;
            }
            "--window" | "-w" => {
                options.window_size = Some(value(&args, i, "--window")?);
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"TARQ Landbase - 핸드쉐이크 개시자 + 링크 테스트벤치

사용법:
  cargo run --release --bin tarq-landbase -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:0)
  -r, --robot <ADDR>      로봇 주소 (기본: 127.0.0.1:9100)
  -c, --config <PATH>     TOML 설정 파일
  -t, --test <KIND>       throughput | latency | loss | all (기본: all)
  -n, --count <N>         테스트당 패킷 수 (기본: 테스트별)
  -s, --size <BYTES>      페이로드 크기 (기본: 테스트별)
  -w, --window <N>        윈도우 크기 (기본: 8)
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

/// 로봇의 "DONE ..." 보고
#[derive(Debug, Default)]
struct RobotReport {
    text: u64,
    image: u64,
    bytes: u64,
    elapsed_ms: u64,
}

impl RobotReport {
    fn parse(payload: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(payload).ok()?;
        let mut fields = text.split_whitespace();
        if fields.next()? != "DONE" {
            return None;
        }

        let mut report = RobotReport::default();
        for field in fields {
            let (key, value) = field.split_once('=')?;
            let value: u64 = value.parse().ok()?;
            match key {
                "text" => report.text = value,
                "image" => report.image = value,
                "bytes" => report.bytes = value,
                "elapsed_ms" => report.elapsed_ms = value,
                _ => {}
            }
        }
        Some(report)
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
    config.role = Role::Initiator;
    if let Some(window) = options.window_size {
        config.window_size = window;
    }

    info!("TARQ Landbase starting...");
    info!("Robot address: {}", options.robot_addr);
    info!("Window size: {}", config.window_size);

    let radio = UdpMedium::bind(
        options.bind_addr,
        Some(options.robot_addr),
        config.flush_timeout(),
    )
    .await?;
    let mediums = MediumSet::new().with(Arc::new(radio));
    let session = Session::new(config, mediums)?;

    session.start(Mode::Handshake).await?;
    info!("연결됨: {} 모드", session.mode());

    let test = options.test;
    if matches!(test, TestKind::Throughput | TestKind::All) {
        throughput_test(&session, options.count.unwrap_or(40), options.size.unwrap_or(256)).await?;
    }
    if matches!(test, TestKind::Latency | TestKind::All) {
        latency_test(&session, options.count.unwrap_or(20), options.size.unwrap_or(32)).await?;
    }
    if matches!(test, TestKind::Loss | TestKind::All) {
        loss_test(&session, options.count.unwrap_or(100), options.size.unwrap_or(512)).await?;
    }

    // 마지막 ACK가 나갈 시간을 준다
    tokio::time::sleep(Duration::from_millis(200)).await;
    session.stop().await?;

    let stats = session.stats();
    info!("{}", stats.summary());
    info!("재전송 비율: {:.2}%", stats.retransmit_ratio() * 100.0);
    Ok(())
}

/// 로봇 보고를 기다림. 다른 패킷은 버린다
async fn wait_for_report(session: &Session, timeout: Duration) -> Option<RobotReport> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let Some(packet) = session.recv_timeout(Duration::from_millis(100)).await else {
            continue;
        };
        if packet.kind == PacketType::Text {
            if let Some(report) = RobotReport::parse(&packet.payload) {
                return Some(report);
            }
        }
    }
    None
}

fn report_timeout(session: &Session) -> Duration {
    session.config().tx_timeout() * 20
}

async fn throughput_test(session: &Session, count: usize, size: usize) -> tarq::Result<()> {
    info!("== 처리율 테스트: {} x {} 바이트 ==", count, size);
    let payload = vec![b'T'; size];

    let start = Instant::now();
    for _ in 0..count {
        session
            .send_async(Packet::new(PacketType::Text, payload.clone())?)
            .await?;
    }
    session.send_async(Packet::text("STOP")?).await?;

    match wait_for_report(session, report_timeout(session)).await {
        Some(report) => {
            let elapsed = start.elapsed().as_secs_f64();
            let sent = (count * size) as f64;
            info!(
                "수신 {}/{} 패킷, {} 바이트, {:.2} KB/s (로봇 측 {} ms)",
                report.text,
                count,
                report.bytes,
                sent / elapsed / 1024.0,
                report.elapsed_ms
            );
        }
        None => warn!("처리율 테스트: 로봇 보고 없음"),
    }
    Ok(())
}

async fn latency_test(session: &Session, count: usize, size: usize) -> tarq::Result<()> {
    info!("== 지연 테스트: {} 회, {} 바이트 ==", count, size);
    let mut samples = Vec::with_capacity(count);

    for i in 0..count {
        let mut payload = format!("ECHO {}", i).into_bytes();
        payload.resize(size.max(payload.len()), b' ');

        let sent_at = Instant::now();
        session
            .send_async(Packet::new(PacketType::Text, payload.clone())?)
            .await?;

        let deadline = sent_at + report_timeout(session);
        while Instant::now() < deadline {
            match session.recv_timeout(Duration::from_millis(100)).await {
                Some(packet) if packet.kind == PacketType::Text && packet.payload[..] == payload[..] => {
                    samples.push(sent_at.elapsed());
                    break;
                }
                _ => {}
            }
        }
    }

    if samples.is_empty() {
        warn!("지연 테스트: 응답 없음");
        return Ok(());
    }
    let total: Duration = samples.iter().sum();
    let min = samples.iter().min().copied().unwrap_or_default();
    let max = samples.iter().max().copied().unwrap_or_default();
    info!(
        "응답 {}/{}, RTT 평균 {:?} 최소 {:?} 최대 {:?}",
        samples.len(),
        count,
        total / samples.len() as u32,
        min,
        max
    );
    Ok(())
}

async fn loss_test(session: &Session, count: usize, size: usize) -> tarq::Result<()> {
    info!("== 손실 테스트: IMAGE {} x {} 바이트 ==", count, size);
    let payload = vec![0x5A; size];

    for _ in 0..count {
        session
            .send_async(Packet::new(PacketType::Image, payload.clone())?)
            .await?;
    }
    session.send_async(Packet::text("STOP")?).await?;

    match wait_for_report(session, report_timeout(session)).await {
        Some(report) => {
            let lost = (count as u64).saturating_sub(report.image);
            info!(
                "IMAGE 수신 {}/{}, 손실률 {:.2}%",
                report.image,
                count,
                lost as f64 / count.max(1) as f64 * 100.0
            );
        }
        None => warn!("손실 테스트: 로봇 보고 없음"),
    }
    Ok(())
}
