//! 바이트 스트림 디프레이머
//!
//! 시리얼/UDP처럼 경계 없는 바이트열에서 동기 워드를 찾아 패킷 프레임을 잘라낸다.
//! - 동기 워드 앞의 쓰레기 바이트는 버림
//! - 체크섬 불일치/알 수 없는 타입이면 한 바이트 건너뛰고 다음 동기 워드를 찾음
//! - 잘린 패킷은 바이트가 더 올 때까지 대기
//! - 일정 시간 새 바이트가 없으면 남은 버퍼를 비움

use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::FormatError;
use crate::packet::Packet;
use crate::SYNC_WORD;

/// 스트림 디프레이머
#[derive(Debug)]
pub struct Deframer {
    /// 수신 버퍼
    buf: BytesMut,

    /// 유휴 플러시 타임아웃
    flush_timeout: Duration,

    /// 마지막으로 바이트가 들어온 시간
    last_data: Instant,

    /// 버려진 바이트 수
    discarded: u64,
}

impl Deframer {
    pub fn new(flush_timeout: Duration) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            flush_timeout,
            last_data: Instant::now(),
            discarded: 0,
        }
    }

    /// 수신 바이트 추가
    pub fn push(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.buf.extend_from_slice(data);
        self.last_data = Instant::now();
    }

    /// 검증된 다음 프레임 (없으면 None)
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            if !self.seek_sync() {
                return None;
            }

            match Packet::decode_prefix(&self.buf) {
                Ok((packet, used)) => {
                    if packet.verify().is_ok() {
                        return Some(self.buf.split_to(used).freeze());
                    }
                    debug!(
                        "체크섬 불일치로 프레임 폐기 (ID: {}, stored {:04X}, actual {:04X})",
                        packet.id,
                        packet.checksum,
                        packet.calc_checksum()
                    );
                    self.skip(1);
                }
                Err(FormatError::TooShort { .. }) | Err(FormatError::Truncated { .. }) => {
                    return None;
                }
                Err(e) => {
                    debug!("형식 에러로 프레임 폐기: {}", e);
                    self.skip(1);
                }
            }
        }
    }

    /// 유휴 시간이 지난 잔여 버퍼 정리
    pub fn flush_if_stale(&mut self, now: Instant) -> bool {
        if self.buf.is_empty() || now.duration_since(self.last_data) < self.flush_timeout {
            return false;
        }
        warn!("디프레이머 버퍼 플러시: {} 바이트 (유휴 타임아웃)", self.buf.len());
        self.clear();
        true
    }

    /// 현재 버퍼에 남은 바이트 수
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// 누적 폐기 바이트 수
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// 버퍼 비우기 (매체 재시작 시)
    pub fn clear(&mut self) {
        let len = self.buf.len();
        self.skip(len);
    }

    /// 버퍼 선두를 동기 워드로 맞춤. 동기 워드가 없으면 false
    fn seek_sync(&mut self) -> bool {
        match self.buf.windows(SYNC_WORD.len()).position(|w| w == SYNC_WORD) {
            Some(0) => true,
            Some(pos) => {
                debug!("동기 워드로 이동: {} 바이트 건너뜀", pos);
                self.skip(pos);
                true
            }
            None => {
                // 동기 워드의 앞부분일 수 있는 꼬리는 남김
                let keep = (SYNC_WORD.len() - 1).min(self.buf.len());
                let drop = self.buf.len() - keep;
                self.skip(drop);
                false
            }
        }
    }

    fn skip(&mut self, count: usize) {
        self.buf.advance(count);
        self.discarded += count as u64;
    }
}
