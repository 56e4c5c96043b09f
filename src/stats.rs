//! 링크 통계

use std::time::{Duration, Instant};

/// 링크 통계 카운터
#[derive(Debug, Clone)]
pub struct LinkStats {
    /// 시작 시간 (start/reboot 시 재설정)
    pub start_time: Instant,

    /// 매체에 쓴 총 프레임 수 (ACK, 재전송 포함)
    pub frames_sent: u64,

    /// 매체에 쓴 총 바이트
    pub bytes_sent: u64,

    /// 윈도우로 전송된 패킷 수
    pub reliable_sent: u64,

    /// 윈도우 없이 전송된 패킷 수
    pub simple_sent: u64,

    /// 재전송 수
    pub retransmissions: u64,

    /// 보낸 ACK 수 (SACK/CACK/DACK)
    pub acks_sent: u64,

    /// 받은 ACK 수
    pub acks_received: u64,

    /// 검증을 통과한 수신 프레임 수
    pub frames_received: u64,

    /// 수신 바이트
    pub bytes_received: u64,

    /// 애플리케이션에 전달된 패킷 수
    pub delivered: u64,

    /// 중복 수신 (DACK로 응답)
    pub duplicates: u64,

    /// 체크섬 불일치로 폐기
    pub checksum_errors: u64,

    /// 형식 에러로 폐기
    pub format_errors: u64,

    /// 윈도우와 무관한 오래된 패킷
    pub stale_dropped: u64,

    /// 흐름 제어 에러
    pub flow_errors: u64,

    /// 윈도우가 가득 차 송신 큐로 되돌린 횟수
    pub requeued: u64,

    /// 큐가 가득 차 버린 패킷 수
    pub queue_drops: u64,

    /// 완료된 핸드쉐이크 수
    pub handshakes: u64,

    /// 매체 쓰기 실패 수
    pub write_errors: u64,
}

impl LinkStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_sent: 0,
            bytes_sent: 0,
            reliable_sent: 0,
            simple_sent: 0,
            retransmissions: 0,
            acks_sent: 0,
            acks_received: 0,
            frames_received: 0,
            bytes_received: 0,
            delivered: 0,
            duplicates: 0,
            checksum_errors: 0,
            format_errors: 0,
            stale_dropped: 0,
            flow_errors: 0,
            requeued: 0,
            queue_drops: 0,
            handshakes: 0,
            write_errors: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.frames_received += 1;
        self.bytes_received += bytes as u64;
    }

    /// 신뢰 전송 대비 재전송 비율
    pub fn retransmit_ratio(&self) -> f64 {
        if self.reliable_sent == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / self.reliable_sent as f64
    }

    /// 송신 처리율 (bytes/sec)
    pub fn send_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_sent as f64 / elapsed
    }

    /// 수신 중 폐기된 프레임 수
    pub fn dropped(&self) -> u64 {
        self.checksum_errors + self.format_errors + self.stale_dropped
    }

    /// 통계 리셋
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} ({} B, {} retx, {:.1}%) | Recv: {} | Delivered: {} | Dup: {} | Dropped: {} | Requeued: {}",
            self.elapsed().as_secs_f64(),
            self.frames_sent,
            self.bytes_sent,
            self.retransmissions,
            self.retransmit_ratio() * 100.0,
            self.frames_received,
            self.delivered,
            self.duplicates,
            self.dropped(),
            self.requeued,
        )
    }
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}
