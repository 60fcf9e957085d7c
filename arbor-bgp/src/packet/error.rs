//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

use crate::packet::consts::{
    ErrorCode, MessageHeaderErrorSubcode, OpenMessageErrorSubcode,
    UpdateMessageErrorSubcode,
};

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// BGP message decoding errors, mapping directly to the NOTIFICATION error
// code and subcode sent back to the peer.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DecodeError {
    MessageHeader(MessageHeaderError),
    OpenMessage(OpenMessageError),
    UpdateMessage(UpdateMessageError),
    Incomplete,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum MessageHeaderError {
    ConnectionNotSynchronized,
    BadMessageLength(u16),
    BadMessageType(u8),
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OpenMessageError {
    UnsupportedVersion(u8),
    BadPeerAs,
    BadBgpIdentifier,
    MalformedOptParam,
    UnacceptableHoldTime,
    UnsupportedCapability,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum UpdateMessageError {
    MalformedAttributeList,
    UnrecognizedWellKnownAttribute(u8),
    MissingWellKnownAttribute(u8),
    AttributeFlagsError(u8),
    AttributeLengthError(u8),
    InvalidOriginAttribute(u8),
    InvalidNexthopAttribute,
    OptionalAttributeError,
    InvalidNetworkField,
    MalformedAsPath,
}

// ===== impl DecodeError =====

impl DecodeError {
    // Returns the NOTIFICATION error code and subcode for this error.
    pub fn code_subcode(&self) -> (u8, u8) {
        match self {
            DecodeError::MessageHeader(error) => {
                let subcode = match error {
                    MessageHeaderError::ConnectionNotSynchronized => {
                        MessageHeaderErrorSubcode::ConnectionNotSynchronized
                    }
                    MessageHeaderError::BadMessageLength(..) => {
                        MessageHeaderErrorSubcode::BadMessageLength
                    }
                    MessageHeaderError::BadMessageType(..) => {
                        MessageHeaderErrorSubcode::BadMessageType
                    }
                };
                (ErrorCode::MessageHeaderError as u8, subcode as u8)
            }
            DecodeError::OpenMessage(error) => {
                let subcode = match error {
                    OpenMessageError::UnsupportedVersion(..) => {
                        OpenMessageErrorSubcode::UnsupportedVersionNumber
                    }
                    OpenMessageError::BadPeerAs => {
                        OpenMessageErrorSubcode::BadPeerAs
                    }
                    OpenMessageError::BadBgpIdentifier => {
                        OpenMessageErrorSubcode::BadBgpIdentifier
                    }
                    OpenMessageError::MalformedOptParam => {
                        OpenMessageErrorSubcode::UnsupportedOptParam
                    }
                    OpenMessageError::UnacceptableHoldTime => {
                        OpenMessageErrorSubcode::UnacceptableHoldTime
                    }
                    OpenMessageError::UnsupportedCapability => {
                        OpenMessageErrorSubcode::UnsupportedCapability
                    }
                };
                (ErrorCode::OpenMessageError as u8, subcode as u8)
            }
            DecodeError::UpdateMessage(error) => {
                let subcode = match error {
                    UpdateMessageError::MalformedAttributeList => {
                        UpdateMessageErrorSubcode::MalformedAttributeList
                    }
                    UpdateMessageError::UnrecognizedWellKnownAttribute(..) => {
                        UpdateMessageErrorSubcode::UnrecognizedWellKnownAttribute
                    }
                    UpdateMessageError::MissingWellKnownAttribute(..) => {
                        UpdateMessageErrorSubcode::MissingWellKnownAttribute
                    }
                    UpdateMessageError::AttributeFlagsError(..) => {
                        UpdateMessageErrorSubcode::AttributeFlagsError
                    }
                    UpdateMessageError::AttributeLengthError(..) => {
                        UpdateMessageErrorSubcode::AttributeLengthError
                    }
                    UpdateMessageError::InvalidOriginAttribute(..) => {
                        UpdateMessageErrorSubcode::InvalidOriginAttribute
                    }
                    UpdateMessageError::InvalidNexthopAttribute => {
                        UpdateMessageErrorSubcode::InvalidNexthopAttribute
                    }
                    UpdateMessageError::OptionalAttributeError => {
                        UpdateMessageErrorSubcode::OptionalAttributeError
                    }
                    UpdateMessageError::InvalidNetworkField => {
                        UpdateMessageErrorSubcode::InvalidNetworkField
                    }
                    UpdateMessageError::MalformedAsPath => {
                        UpdateMessageErrorSubcode::MalformedAsPath
                    }
                };
                (ErrorCode::UpdateMessageError as u8, subcode as u8)
            }
            DecodeError::Incomplete => {
                (
                    ErrorCode::MessageHeaderError as u8,
                    MessageHeaderErrorSubcode::BadMessageLength as u8,
                )
            }
        }
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::MessageHeader(error) => {
                write!(f, "message header error: {error:?}")
            }
            DecodeError::OpenMessage(error) => {
                write!(f, "OPEN message error: {error:?}")
            }
            DecodeError::UpdateMessage(error) => {
                write!(f, "UPDATE message error: {error:?}")
            }
            DecodeError::Incomplete => {
                write!(f, "incomplete message")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::Incomplete
    }
}

impl From<MessageHeaderError> for DecodeError {
    fn from(error: MessageHeaderError) -> DecodeError {
        DecodeError::MessageHeader(error)
    }
}

impl From<OpenMessageError> for DecodeError {
    fn from(error: OpenMessageError) -> DecodeError {
        DecodeError::OpenMessage(error)
    }
}

impl From<UpdateMessageError> for DecodeError {
    fn from(error: UpdateMessageError) -> DecodeError {
        DecodeError::UpdateMessage(error)
    }
}
