//! 에러 타입 정의

use thiserror::Error;

use crate::packet::PacketType;

/// 패킷 형식 에러 (코덱 단계)
///
/// 매체 쪽에서 다음 동기 워드까지 건너뛰고 복구하므로 치명적이지 않다.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("패킷이 너무 짧음: 최소 {min} 바이트 필요, {got} 바이트 수신")]
    TooShort { min: usize, got: usize },

    #[error("동기 워드 불일치")]
    BadSyncWord,

    #[error("알 수 없는 패킷 타입: {0:#04X}")]
    UnknownType(u8),

    #[error("페이로드 잘림: 선언 {declared} 바이트, 실제 {available} 바이트")]
    Truncated { declared: usize, available: usize },

    #[error("페이로드가 너무 큼: {0} 바이트 (최대 65535)")]
    PayloadTooLarge(usize),
}

/// 흐름 제어 에러 (엔진 내부 불변식 위반)
///
/// 프로토콜 비동기화를 뜻하며 재전송 또는 다음 핸드쉐이크로 자가 복구된다.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowControlError {
    #[error("윈도우 밖의 ID: id={id}, base={base}")]
    OutsideWindow { id: u32, base: u32 },

    #[error("비어 있는 슬롯에 대한 ACK: id={0}")]
    EmptySlot(u32),

    #[error("이미 ACK된 슬롯: id={0}")]
    AlreadyAcked(u32),

    #[error("이미 사용 중인 슬롯: id={0}")]
    SlotOccupied(u32),

    #[error("대기 중이 아닌 핸드쉐이크 응답: id={0}")]
    StaleHandshake(u32),
}

/// TARQ 링크 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("설정 파싱 에러: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("유효하지 않은 설정: {0}")]
    Config(String),

    #[error("패킷 형식 에러: {0}")]
    Format(#[from] FormatError),

    #[error("체크섬 불일치: expected {expected:04X}, got {got:04X}")]
    ChecksumMismatch { expected: u16, got: u16 },

    #[error("예상과 다른 패킷 타입: expected {expected:?}, got {got:?}")]
    UnexpectedType { expected: PacketType, got: PacketType },

    #[error("흐름 제어 에러: {0}")]
    FlowControl(#[from] FlowControlError),

    #[error("핸드쉐이크 타임아웃: {timeout_ms}ms 내에 응답 없음")]
    HandshakeTimeout { timeout_ms: u64 },

    #[error("매체 사용 불가: {0}")]
    MediumUnavailable(String),

    #[error("세션이 이미 실행 중")]
    AlreadyRunning,

    #[error("세션이 실행 중이 아님")]
    NotRunning,

    #[error("송신 큐가 가득 참")]
    QueueFull,

    #[error("채널 에러")]
    ChannelClosed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
