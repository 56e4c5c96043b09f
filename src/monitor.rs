//! 상대 생존 감시
//!
//! 수신 트래픽 시각을 기록하고, `lost_link_timeout` 동안 아무것도 오지 않으면
//! 링크 손실로 판정한다. 판정 후의 조치(보통 `Session::reboot`)는 애플리케이션 몫이다.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::message::{HeartbeatMessage, Payload};
use crate::packet::{Packet, PacketType};

/// 링크 감시기
#[derive(Debug, Clone)]
pub struct LinkMonitor {
    timeout: Duration,
    last_seen: Instant,
    heartbeats_seen: u64,
    next_sequence: u64,
}

impl LinkMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_seen: Instant::now(),
            heartbeats_seen: 0,
            next_sequence: 0,
        }
    }

    /// 수신 패킷 기록
    pub fn observe(&mut self, packet: &Packet, now: Instant) {
        self.last_seen = now;
        if packet.kind == PacketType::Heartbeat {
            self.heartbeats_seen += 1;
            if let Ok(beat) = HeartbeatMessage::from_packet(packet) {
                debug!("하트비트 수신: seq={}", beat.sequence);
            }
        }
    }

    pub fn is_lost(&self, now: Instant) -> bool {
        self.silence(now) >= self.timeout
    }

    /// 마지막 수신 후 경과 시간
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    pub fn heartbeats_seen(&self) -> u64 {
        self.heartbeats_seen
    }

    /// 재연결 후 타이머 재시작
    pub fn reset(&mut self, now: Instant) {
        self.last_seen = now;
    }

    /// 다음으로 보낼 하트비트
    pub fn next_heartbeat(&mut self) -> HeartbeatMessage {
        let beat = HeartbeatMessage::new(self.next_sequence);
        self.next_sequence += 1;
        beat
    }
}
