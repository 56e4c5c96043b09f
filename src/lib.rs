//! # TARQ (Tethered ARQ)
//!
//! 원격 조종 로봇의 명령/텔레메트리 링크용 선택적 재전송 ARQ
//!
//! ## 핵심 특징
//! - **고정 윈도우 선택적 재전송**: SACK/CACK/DACK, 폴링 기반 재전송 타이머
//! - **핸드쉐이크**: 세션마다 기준 ID 협상, 재부팅으로 복구
//! - **모드 중재**: 무선/위성/디버그, 무선 우선
//! - **매체 추상화**: 신뢰 매체와 최선 전송 타입은 윈도우 우회
//! - **Internet checksum**: 저사양 하드웨어용 16비트 1의 보수 체크섬

pub mod config;
mod engine;
pub mod error;
pub mod framer;
pub mod medium;
pub mod message;
pub mod monitor;
pub mod packet;
pub mod session;
pub mod stats;
pub mod window;

pub use config::{Config, Role};
pub use engine::{Mode, WindowStatus};
pub use error::{Error, FlowControlError, FormatError, Result};
pub use medium::{Medium, MediumKind, MediumSet};
pub use message::Payload;
pub use monitor::LinkMonitor;
pub use packet::{Packet, PacketType, SeqId};
pub use session::Session;
pub use stats::LinkStats;

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 동기 워드 (재동기화용)
pub const SYNC_WORD: [u8; 4] = [0xAA; 4];

/// 시퀀스 ID 모듈러스 (3바이트)
pub const MAX_ID: u32 = 1 << 24;

/// 최소 패킷 크기 (헤더만)
pub const MIN_PACKET_SIZE: usize = 12;

/// 최대 페이로드 크기
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;
