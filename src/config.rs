//! 링크 설정
//!
//! 코드에서 직접 만들거나 TOML 파일에서 읽는다. 파일에 없는 키는 기본값을 쓴다.
//!
//! ```toml
//! window_size = 8
//! tx_timeout_ms = 2500
//! role = "initiator"
//! reliable_img = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result, MAX_ID};

/// 핸드쉐이크에서의 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// HANDSHAKE를 먼저 보내는 쪽 (랜드베이스)
    Initiator,
    /// HANDSHAKE를 기다리는 쪽 (로봇)
    Responder,
}

/// TARQ 링크 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 송신/수신 윈도우 크기 (슬롯 수)
    pub window_size: usize,

    /// 재전송 타임아웃 (밀리초)
    pub tx_timeout_ms: u64,

    /// 핸드쉐이크 대기 타임아웃 (밀리초)
    /// 위성 전용 배치에서는 한 시간 단위
    pub handshake_timeout_ms: u64,

    /// 순서 보장 전달
    /// false면 윈도우 안의 패킷을 도착 즉시 전달
    pub ordered_delivery: bool,

    /// IMAGE 패킷도 윈도우로 신뢰 전송
    pub reliable_img: bool,

    /// MTR_CMD 패킷도 윈도우로 신뢰 전송
    pub reliable_mtr_cmd: bool,

    /// 핸드쉐이크 역할
    pub role: Role,

    /// 고정 초기 시퀀스 번호 (None이면 핸드쉐이크마다 무작위)
    pub initial_seq: Option<u32>,

    /// 송신 큐 용량
    pub outbound_capacity: usize,

    /// 수신 큐 용량
    pub inbound_capacity: usize,

    /// 워커 루프 유휴 대기 간격 (밀리초)
    pub poll_interval_ms: u64,

    /// 하트비트 무응답 시 링크 손실 판정 (밀리초)
    pub lost_link_timeout_ms: u64,

    /// 스트림 디프레이머 유휴 플러시 (밀리초)
    pub flush_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: 8,
            tx_timeout_ms: 2500,                 // 2.5초
            handshake_timeout_ms: 3_600_000,     // 1시간
            ordered_delivery: true,
            reliable_img: false,                 // 영상은 최선 전송
            reliable_mtr_cmd: false,             // 모터 명령은 저지연 우선
            role: Role::Responder,
            initial_seq: None,
            outbound_capacity: 256,
            inbound_capacity: 256,
            poll_interval_ms: 10,
            lost_link_timeout_ms: 60_000,        // 1분
            flush_timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 무선 모뎀용 설정
    pub fn radio() -> Self {
        Self {
            tx_timeout_ms: 1500,
            handshake_timeout_ms: 30_000,        // 30초
            lost_link_timeout_ms: 20_000,
            flush_timeout_ms: 2_000,
            ..Self::default()
        }
    }

    /// 위성 모뎀용 설정
    pub fn satellite() -> Self {
        Self {
            window_size: 4,
            tx_timeout_ms: 120_000,              // 저장 후 전달 지연
            handshake_timeout_ms: 3_600_000,
            poll_interval_ms: 100,
            lost_link_timeout_ms: 1_800_000,     // 30분
            ..Self::default()
        }
    }

    /// 역할 지정
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// TOML 문자열에서 읽기
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 읽기
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::Config("window_size는 1 이상이어야 함".into()));
        }
        if self.window_size > (MAX_ID / 2) as usize {
            return Err(Error::Config(format!(
                "window_size {}가 시퀀스 공간의 절반을 넘음",
                self.window_size
            )));
        }
        if self.outbound_capacity == 0 || self.inbound_capacity == 0 {
            return Err(Error::Config("큐 용량은 1 이상이어야 함".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms는 1 이상이어야 함".into()));
        }
        Ok(())
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lost_link_timeout(&self) -> Duration {
        Duration::from_millis(self.lost_link_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}
