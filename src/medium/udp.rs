//! UDP 매체
//!
//! IP 망 위에서 무선 모뎀을 대신한다. 데이터그램을 바이트 스트림처럼 디프레이머에
//! 밀어 넣으므로 한 데이터그램에 여러 패킷이 있거나 패킷이 잘려 와도 처리된다.
//! 상대 주소를 모르면 처음 수신한 데이터그램의 송신 주소를 사용한다.
//!
//! 소켓은 tokio 런타임에 등록되며, 매체 인터페이스가 동기이므로 `try_send_to` /
//! `try_recv_from`으로만 다룬다. 준비 상태는 런타임 I/O 드라이버가 갱신한다.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::{Medium, MediumKind};
use crate::framer::Deframer;
use crate::{Error, Result};

/// UDP 매체
#[derive(Debug)]
pub struct UdpMedium {
    kind: MediumKind,
    reliable: bool,
    socket: UdpSocket,
    peer: RwLock<Option<SocketAddr>>,
    deframer: Mutex<Deframer>,
    open: AtomicBool,
}

impl UdpMedium {
    /// 소켓 바인딩 (tokio 런타임 안에서 호출)
    pub async fn bind(
        local: SocketAddr,
        peer: Option<SocketAddr>,
        flush_timeout: Duration,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        // 첫 송신이 준비 상태 미확인으로 버려지지 않도록
        socket.writable().await?;

        info!("UDP 매체 바인딩: {} (상대: {:?})", socket.local_addr()?, peer);

        Ok(Self {
            kind: MediumKind::Radio,
            reliable: false,
            socket,
            peer: RwLock::new(peer),
            deframer: Mutex::new(Deframer::new(flush_timeout)),
            open: AtomicBool::new(false),
        })
    }

    /// 매체 종류 지정 (기본: Radio)
    pub fn with_kind(mut self, kind: MediumKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn reliable(mut self, reliable: bool) -> Self {
        self.reliable = reliable;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        *self.peer.read()
    }

    fn drain_socket(&self) {
        let mut buf = [0u8; 65535];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("UDP 드레인 에러: {}", e);
                    break;
                }
            }
        }
    }
}

impl Medium for UdpMedium {
    fn start(&self) -> Result<()> {
        self.drain_socket();
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let mut deframer = self.deframer.lock();
        let stale = deframer.buffered();
        if stale > 0 {
            debug!("UDP 매체 종료: 미완성 {} 바이트 폐기", stale);
        }
        deframer.clear();
    }

    fn write(&self, frame: &[u8]) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::MediumUnavailable(format!("udp {} (closed)", self.kind)));
        }

        let Some(peer) = self.peer() else {
            debug!("상대 주소 미정: {} 바이트 폐기", frame.len());
            return Ok(());
        };

        match self.socket.try_send_to(frame, peer) {
            Ok(_) => Ok(()),
            // 송신 버퍼가 가득 찬 경우는 손실로 취급 (재전송으로 복구)
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                warn!("UDP 송신 버퍼 가득 참: 프레임 손실");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_next(&self) -> Option<Bytes> {
        if !self.open.load(Ordering::SeqCst) {
            return None;
        }

        let mut deframer = self.deframer.lock();
        if let Some(frame) = deframer.next_frame() {
            return Some(frame);
        }

        let mut buf = [0u8; 65535];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((len, from)) => {
                    if self.peer.read().is_none() {
                        info!("UDP 상대 주소 학습: {}", from);
                        *self.peer.write() = Some(from);
                    }
                    deframer.push(&buf[..len]);
                    if let Some(frame) = deframer.next_frame() {
                        return Some(frame);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    // ICMP port unreachable 등: 상대가 아직 없음
                    debug!("UDP 수신 에러: {}", e);
                    break;
                }
            }
        }

        deframer.flush_if_stale(Instant::now());
        None
    }

    fn is_reliable(&self) -> bool {
        self.reliable
    }

    fn kind(&self) -> MediumKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Packet, PacketType};

    fn loopback_addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn recv_frame(medium: &UdpMedium) -> Bytes {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(frame) = medium.read_next() {
                return frame;
            }
            assert!(Instant::now() < deadline, "UDP 프레임 수신 타임아웃");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_udp_exchange_learns_peer() {
        let flush = Duration::from_secs(10);
        let robot = UdpMedium::bind(loopback_addr(), None, flush).await.unwrap();
        let landbase = UdpMedium::bind(loopback_addr(), Some(robot.local_addr().unwrap()), flush)
            .await
            .unwrap();
        robot.start().unwrap();
        landbase.start().unwrap();

        // 상대를 모르는 쪽의 송신은 조용히 버려짐
        robot.write(&Packet::control(PacketType::Sack, 1).encode()).unwrap();

        let mut hello = Packet::text("hello").unwrap().with_id(3);
        hello.seal();
        landbase.write(&hello.encode()).unwrap();

        let frame = recv_frame(&robot).await;
        assert_eq!(Packet::decode(&frame).unwrap(), hello);
        assert_eq!(robot.peer(), Some(landbase.local_addr().unwrap()));

        robot.write(&Packet::control(PacketType::Sack, 3).encode()).unwrap();
        let ack = Packet::decode(&recv_frame(&landbase).await).unwrap();
        assert_eq!((ack.kind, ack.id), (PacketType::Sack, 3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_udp_datagram_with_two_frames() {
        let flush = Duration::from_secs(10);
        let robot = UdpMedium::bind(loopback_addr(), None, flush).await.unwrap();
        let landbase = UdpMedium::bind(loopback_addr(), Some(robot.local_addr().unwrap()), flush)
            .await
            .unwrap();
        robot.start().unwrap();
        landbase.start().unwrap();

        let mut datagram = Packet::control(PacketType::Cack, 4).encode();
        datagram.extend(Packet::control(PacketType::Dack, 5).encode());
        landbase.write(&datagram).unwrap();

        let first = Packet::decode(&recv_frame(&robot).await).unwrap();
        let second = Packet::decode(&recv_frame(&robot).await).unwrap();
        assert_eq!((first.kind, first.id), (PacketType::Cack, 4));
        assert_eq!((second.kind, second.id), (PacketType::Dack, 5));
    }

    #[tokio::test]
    async fn test_closed_udp_rejects_write() {
        let medium = UdpMedium::bind(loopback_addr(), None, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(medium.write(b"x").is_err());
        assert!(medium.read_next().is_none());
    }
}
