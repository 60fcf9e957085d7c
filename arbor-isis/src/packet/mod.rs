//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod consts;
pub mod error;
pub mod pdu;
pub mod tlv;

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::packet::error::{DecodeError, DecodeResult};

// Represent an IS-IS level, or a combination of both of them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelType {
    L1,
    L2,
    All,
}

// Represents a single IS-IS level.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LevelNumber {
    L1 = 1,
    L2 = 2,
}

// Container for storing separate values for level 1 and level 2.
#[derive(Clone, Debug, Default)]
pub struct Levels<T> {
    pub l1: T,
    pub l2: T,
}

// Represents an IS-IS Area Address.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AreaAddr(SmallVec<[u8; 13]>);

// Represents an IS-IS System ID.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct SystemId([u8; 6]);

// Represents an IS-IS LAN ID.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LanId {
    pub system_id: SystemId,
    pub pseudonode: u8,
}

// Represents an IS-IS LSP ID.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LspId {
    pub system_id: SystemId,
    pub pseudonode: u8,
    pub fragment: u8,
}

// ===== impl LevelType =====

impl LevelType {
    pub fn levels(self) -> impl Iterator<Item = LevelNumber> {
        match self {
            LevelType::L1 => vec![LevelNumber::L1],
            LevelType::L2 => vec![LevelNumber::L2],
            LevelType::All => vec![LevelNumber::L1, LevelNumber::L2],
        }
        .into_iter()
    }

    pub fn intersects(&self, level: impl Into<LevelType>) -> bool {
        let level = level.into();
        match self {
            LevelType::L1 => matches!(level, LevelType::L1 | LevelType::All),
            LevelType::L2 => matches!(level, LevelType::L2 | LevelType::All),
            LevelType::All => true,
        }
    }

    pub fn intersection(
        &self,
        level: impl Into<LevelType>,
    ) -> Option<LevelType> {
        let level = level.into();
        match (self, level) {
            (LevelType::L1, LevelType::L1) => Some(LevelType::L1),
            (LevelType::L2, LevelType::L2) => Some(LevelType::L2),
            (LevelType::All, _) => Some(level),
            (_, LevelType::All) => Some(*self),
            _ => None,
        }
    }
}

impl From<LevelNumber> for LevelType {
    fn from(level: LevelNumber) -> LevelType {
        match level {
            LevelNumber::L1 => LevelType::L1,
            LevelNumber::L2 => LevelType::L2,
        }
    }
}

// ===== impl Levels =====

impl<T> Levels<T> {
    pub fn get(&self, level: LevelNumber) -> &T {
        match level {
            LevelNumber::L1 => &self.l1,
            LevelNumber::L2 => &self.l2,
        }
    }

    pub fn get_mut(&mut self, level: LevelNumber) -> &mut T {
        match level {
            LevelNumber::L1 => &mut self.l1,
            LevelNumber::L2 => &mut self.l2,
        }
    }
}

// ===== impl AreaAddr =====

impl AreaAddr {
    pub const MAX_LEN: u8 = 13;

    pub fn new(bytes: SmallVec<[u8; 13]>) -> AreaAddr {
        AreaAddr(bytes)
    }

    pub(crate) fn decode(
        len: u8,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        if len > Self::MAX_LEN || len == 0 {
            return Err(DecodeError::InvalidAreaAddrLength(len));
        }
        let mut bytes = SmallVec::new();
        for _ in 0..len {
            bytes.push(buf.try_get_u8()?);
        }
        Ok(AreaAddr(bytes))
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.0.len() as u8);
        buf.put_slice(&self.0);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for AreaAddr {
    fn from(bytes: &[u8]) -> AreaAddr {
        AreaAddr(SmallVec::from_slice(bytes))
    }
}

impl std::fmt::Display for AreaAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for byte in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{byte:02x}")?;
            first = false;
        }
        Ok(())
    }
}

// ===== impl SystemId =====

impl SystemId {
    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self, TryGetError> {
        let mut system_id = [0; 6];
        buf.try_copy_to_slice(&mut system_id)?;
        Ok(SystemId(system_id))
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }
}

impl AsRef<[u8]> for SystemId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 6]> for SystemId {
    fn from(bytes: [u8; 6]) -> SystemId {
        SystemId(bytes)
    }
}

impl std::fmt::Display for SystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}{:02x}.{:02x}{:02x}.{:02x}{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5],
        )
    }
}

// ===== impl LanId =====

impl LanId {
    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self, TryGetError> {
        let mut bytes = [0; 7];
        buf.try_copy_to_slice(&mut bytes)?;
        Ok(Self::from(bytes))
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.system_id.encode(buf);
        buf.put_u8(self.pseudonode);
    }

    pub const fn is_pseudonode(&self) -> bool {
        self.pseudonode != 0
    }
}

impl From<[u8; 7]> for LanId {
    fn from(bytes: [u8; 7]) -> LanId {
        LanId {
            system_id: SystemId::from([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
            ]),
            pseudonode: bytes[6],
        }
    }
}

impl From<(SystemId, u8)> for LanId {
    fn from(components: (SystemId, u8)) -> LanId {
        LanId {
            system_id: components.0,
            pseudonode: components.1,
        }
    }
}

impl std::fmt::Display for LanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02x}", self.system_id, self.pseudonode)
    }
}

// ===== impl LspId =====

impl LspId {
    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self, TryGetError> {
        let mut bytes = [0; 8];
        buf.try_copy_to_slice(&mut bytes)?;
        Ok(Self::from(bytes))
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.system_id.encode(buf);
        buf.put_u8(self.pseudonode);
        buf.put_u8(self.fragment);
    }

    pub const fn is_pseudonode(&self) -> bool {
        self.pseudonode != 0
    }
}

impl From<[u8; 8]> for LspId {
    fn from(bytes: [u8; 8]) -> LspId {
        LspId {
            system_id: SystemId::from([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
            ]),
            pseudonode: bytes[6],
            fragment: bytes[7],
        }
    }
}

impl From<(SystemId, u8, u8)> for LspId {
    fn from(components: (SystemId, u8, u8)) -> LspId {
        LspId {
            system_id: components.0,
            pseudonode: components.1,
            fragment: components.2,
        }
    }
}

impl From<(LanId, u8)> for LspId {
    fn from(components: (LanId, u8)) -> LspId {
        LspId {
            system_id: components.0.system_id,
            pseudonode: components.0.pseudonode,
            fragment: components.1,
        }
    }
}

impl std::fmt::Display for LspId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{:02x}-{:02x}",
            self.system_id, self.pseudonode, self.fragment
        )
    }
}
