use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

pub const FRAME_MAGIC: u32 = 0x564F4C59;
pub const FRAME_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
}

impl FrameHeader {
    pub fn new(sequence: u32) -> Self {
        Self {
            magic: FRAME_MAGIC,
            version: FRAME_VERSION,
            sequence,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == FRAME_MAGIC && self.version == FRAME_VERSION
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum FramePayload {
    ConnectRequest { salt: u64 },
    ConnectAccepted { peer_id: u32 },
    ConnectDenied,
    Data(Vec<u8>),
    Ping,
    Pong,
    KeepAlive,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: FramePayload,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl Frame {
    pub fn new(sequence: u32, payload: FramePayload) -> Self {
        Self {
            header: FrameHeader::new(sequence),
            payload,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, FrameError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(FrameError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, FrameError> {
        // Receive buffers carry no alignment guarantee.
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(FrameError::Deserialize)
    }
}
