//! 세션 통합 테스트: 메모리 링크 위에서 두 세션을 실제 태스크로 돌린다

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use tarq::medium::{LinkFaults, LinkMedium, Medium};
use tarq::{Config, Error, MediumKind, MediumSet, Mode, Packet, PacketType, Role, Session};

fn test_config(role: Role) -> Config {
    Config {
        window_size: 4,
        tx_timeout_ms: 80,
        handshake_timeout_ms: 3_000,
        poll_interval_ms: 2,
        initial_seq: Some(100),
        ..Config::default()
    }
    .with_role(role)
}

fn session_pair(kind: MediumKind, reliable: bool, faults: LinkFaults) -> (Session, Session) {
    let (a, b) = LinkMedium::pair_with(kind, reliable, faults);
    let initiator = Session::new(test_config(Role::Initiator), MediumSet::new().with(Arc::new(a))).unwrap();
    let responder = Session::new(test_config(Role::Responder), MediumSet::new().with(Arc::new(b))).unwrap();
    (initiator, responder)
}

async fn connect(initiator: &Session, responder: &Session) {
    let (a, b) = tokio::join!(initiator.start(Mode::Handshake), responder.start(Mode::Handshake));
    a.unwrap();
    b.unwrap();
}

/// 핸드쉐이크 알림을 건너뛰고 데이터 패킷만 최대 `count`개 수집
async fn collect_data(session: &Session, count: usize, timeout: Duration) -> Vec<Packet> {
    let deadline = Instant::now() + timeout;
    let mut packets = Vec::new();
    while packets.len() < count && Instant::now() < deadline {
        if let Some(packet) = session.recv_timeout(Duration::from_millis(50)).await {
            if !packet.kind.is_handshake() {
                packets.push(packet);
            }
        }
    }
    packets
}

fn bodies(packets: &[Packet]) -> Vec<String> {
    packets
        .iter()
        .map(|p| String::from_utf8_lossy(&p.payload).into_owned())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handshake_then_hello() {
    let (initiator, responder) = session_pair(MediumKind::Radio, false, LinkFaults::default());
    connect(&initiator, &responder).await;

    assert_eq!(initiator.mode(), Mode::Radio);
    assert_eq!(responder.mode(), Mode::Radio);

    let status = initiator.window_status();
    assert_eq!((status.tx_base, status.rx_base), (101, 100));
    let status = responder.window_status();
    assert_eq!((status.tx_base, status.rx_base), (100, 101));

    initiator.send_async(Packet::text("hello").unwrap()).await.unwrap();
    let received = collect_data(&responder, 1, Duration::from_secs(2)).await;
    assert_eq!(bodies(&received), vec!["hello"]);
    assert_eq!(received[0].id, 101);

    responder.send_async(Packet::text("world").unwrap()).await.unwrap();
    let received = collect_data(&initiator, 1, Duration::from_secs(2)).await;
    assert_eq!(bodies(&received), vec!["world"]);

    initiator.stop().await.unwrap();
    responder.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lossy_link_delivers_exactly_once_in_order() {
    let faults = LinkFaults {
        loss_rate: 0.2,
        duplicate_rate: 0.1,
        seed: 7,
        ..LinkFaults::default()
    };
    let (initiator, responder) = session_pair(MediumKind::Radio, false, faults);
    connect(&initiator, &responder).await;

    let expected: Vec<String> = (0..40).map(|i| format!("msg {}", i)).collect();
    for body in &expected {
        initiator.send_async(Packet::text(body).unwrap()).await.unwrap();
    }

    let received = collect_data(&responder, expected.len(), Duration::from_secs(30)).await;
    assert_eq!(bodies(&received), expected);

    // 중복이 뒤늦게 도착해도 다시 전달되지 않음
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(collect_data(&responder, 1, Duration::from_millis(100)).await.is_empty());
    assert!(initiator.stats().retransmissions > 0);

    initiator.stop().await.unwrap();
    responder.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reordering_link_delivers_in_order() {
    let faults = LinkFaults {
        loss_rate: 0.1,
        reorder_rate: 0.3,
        seed: 11,
        ..LinkFaults::default()
    };
    let (initiator, responder) = session_pair(MediumKind::Debug, false, faults);
    initiator.start(Mode::Debug).await.unwrap();
    responder.start(Mode::Debug).await.unwrap();

    let expected: Vec<String> = (0..30).map(|i| format!("frame {}", i)).collect();
    for body in &expected {
        initiator.send_async(Packet::text(body).unwrap()).await.unwrap();
    }

    let received = collect_data(&responder, expected.len(), Duration::from_secs(30)).await;
    assert_eq!(bodies(&received), expected);
    assert_eq!(received[0].id, 100);

    initiator.stop().await.unwrap();
    responder.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dropped_packet_is_retransmitted() {
    let faults = LinkFaults {
        drop_first_of: vec![102],
        ..LinkFaults::default()
    };
    let (initiator, responder) = session_pair(MediumKind::Radio, false, faults);
    connect(&initiator, &responder).await;

    for body in ["a", "b", "c", "d", "e"] {
        initiator.send_async(Packet::text(body).unwrap()).await.unwrap();
    }

    let received = collect_data(&responder, 5, Duration::from_secs(5)).await;
    assert_eq!(bodies(&received), vec!["a", "b", "c", "d", "e"]);
    let ids: Vec<_> = received.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![101, 102, 103, 104, 105]);
    assert!(initiator.stats().retransmissions >= 1);

    initiator.stop().await.unwrap();
    responder.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handshake_timeout_without_peer() {
    let (a, _b) = LinkMedium::pair(MediumKind::Radio);
    let config = Config {
        handshake_timeout_ms: 200,
        ..test_config(Role::Initiator)
    };
    let session = Session::new(config, MediumSet::new().with(Arc::new(a))).unwrap();

    let started = Instant::now();
    let result = session.start(Mode::Handshake).await;
    assert!(matches!(result, Err(Error::HandshakeTimeout { timeout_ms: 200 })));
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(!session.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reboot_clears_queues_and_reconnects() {
    let (initiator, responder) = session_pair(MediumKind::Radio, false, LinkFaults::default());
    connect(&initiator, &responder).await;

    initiator.send_async(Packet::text("before").unwrap()).await.unwrap();
    assert_eq!(bodies(&collect_data(&responder, 1, Duration::from_secs(2)).await), vec!["before"]);

    // 개시자 수신 큐에 읽지 않은 패킷을 남긴다
    while initiator.try_receive().is_some() {}
    responder.send_async(Packet::text("stale").unwrap()).await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while !initiator.has_pending() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(initiator.has_pending());

    initiator.reboot(Mode::Handshake).await.unwrap();
    assert!(collect_data(&initiator, 1, Duration::from_millis(100)).await.is_empty());
    assert_eq!(initiator.stats().handshakes, 1);

    initiator.send_async(Packet::text("after").unwrap()).await.unwrap();
    let received = collect_data(&responder, 1, Duration::from_secs(2)).await;
    assert_eq!(bodies(&received), vec!["after"]);
    assert_eq!(received[0].id, 101);

    initiator.stop().await.unwrap();
    responder.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reliable_satellite_bypasses_window() {
    let (initiator, responder) = session_pair(MediumKind::Satellite, true, LinkFaults::default());
    initiator.start(Mode::Satellite).await.unwrap();
    responder.start(Mode::Satellite).await.unwrap();

    for body in ["one", "two", "three"] {
        initiator.send_async(Packet::text(body).unwrap()).await.unwrap();
    }

    let received = collect_data(&responder, 3, Duration::from_secs(2)).await;
    assert_eq!(bodies(&received), vec!["one", "two", "three"]);
    assert!(received.iter().all(|p| p.medium == Some(MediumKind::Satellite)));

    let stats = initiator.stats();
    assert_eq!(stats.simple_sent, 3);
    assert_eq!(stats.reliable_sent, 0);
    assert_eq!(initiator.window_status().in_flight, 0);

    initiator.stop().await.unwrap();
    responder.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lifecycle_errors() {
    let (a, _b) = LinkMedium::pair(MediumKind::Debug);
    let session = Session::new(test_config(Role::Responder), MediumSet::new().with(Arc::new(a))).unwrap();

    assert!(matches!(session.stop().await, Err(Error::NotRunning)));

    session.start(Mode::Debug).await.unwrap();
    assert!(session.is_running());
    assert!(matches!(session.start(Mode::Debug).await, Err(Error::AlreadyRunning)));

    session.stop().await.unwrap();
    assert!(!session.is_running());

    // 없는 매체로는 시작 불가
    assert!(matches!(
        session.start(Mode::Radio).await,
        Err(Error::MediumUnavailable(_))
    ));
    assert!(Session::new(Config::default(), MediumSet::new()).is_err());
}

/// 열리지 않는 위성 모뎀
struct DeadModem;

impl Medium for DeadModem {
    fn start(&self) -> tarq::Result<()> {
        Err(Error::MediumUnavailable("modem not attached".into()))
    }

    fn close(&self) {}

    fn write(&self, _frame: &[u8]) -> tarq::Result<()> {
        Err(Error::MediumUnavailable("modem not attached".into()))
    }

    fn read_next(&self) -> Option<Bytes> {
        None
    }

    fn is_reliable(&self) -> bool {
        true
    }

    fn kind(&self) -> MediumKind {
        MediumKind::Satellite
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_medium_start_closes_opened_mediums() {
    let (a, _b) = LinkMedium::pair(MediumKind::Radio);
    let radio = Arc::new(a);
    let mediums = MediumSet::new().with(radio.clone()).with(Arc::new(DeadModem));
    let session = Session::new(test_config(Role::Initiator), mediums).unwrap();

    // radio가 먼저 열리고 satellite에서 실패
    assert!(matches!(
        session.start(Mode::Handshake).await,
        Err(Error::MediumUnavailable(_))
    ));
    assert!(!session.is_running());
    assert!(radio.write(b"frame").is_err());

    session.start(Mode::Radio).await.unwrap();
    assert!(radio.write(b"frame").is_ok());
    session.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handshake_enqueue_failure_leaves_session_stopped() {
    let (a, _b) = LinkMedium::pair(MediumKind::Radio);
    let radio = Arc::new(a);
    let config = Config {
        outbound_capacity: 1,
        ..test_config(Role::Initiator)
    };
    let session = Session::new(config, MediumSet::new().with(radio.clone())).unwrap();

    // 정지 중에 송신 큐를 채워 HANDSHAKE가 들어갈 자리가 없다
    session.try_send(Packet::text("early").unwrap()).unwrap();

    assert!(matches!(session.start(Mode::Handshake).await, Err(Error::QueueFull)));
    assert!(!session.is_running());
    assert!(radio.write(b"frame").is_err());
    assert!(matches!(session.stop().await, Err(Error::NotRunning)));

    // 워커가 남아 있지 않으므로 AlreadyRunning이 아니라 같은 이유로 실패
    assert!(matches!(session.start(Mode::Handshake).await, Err(Error::QueueFull)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreliable_image_is_not_retransmitted() {
    let faults = LinkFaults {
        loss_rate: 1.0,
        ..LinkFaults::default()
    };
    let (a, b) = LinkMedium::pair_with(MediumKind::Debug, false, faults);
    let sender = Session::new(test_config(Role::Initiator), MediumSet::new().with(Arc::new(a))).unwrap();
    let receiver = Session::new(test_config(Role::Responder), MediumSet::new().with(Arc::new(b))).unwrap();
    sender.start(Mode::Debug).await.unwrap();
    receiver.start(Mode::Debug).await.unwrap();

    sender
        .send_async(Packet::new(PacketType::Image, vec![0u8; 64]).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stats = sender.stats();
    assert_eq!(stats.simple_sent, 1);
    assert_eq!(stats.retransmissions, 0);
    assert!(!receiver.has_pending());

    sender.stop().await.unwrap();
    receiver.stop().await.unwrap();
}
