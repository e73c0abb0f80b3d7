//! Typed views over the raw [`Sv2NetMsg`]s the transport produces and
//! consumes.

use binary_sv2::{to_bytes, Decodable, Encodable};
use codec_sv2::Sv2NetMsg;
use common_messages_sv2::{SetupConnection, SetupConnectionError, SetupConnectionSuccess};
use const_sv2::{
    MESSAGE_TYPE_COINBASE_OUTPUT_CONSTRAINTS, MESSAGE_TYPE_NEW_TEMPLATE,
    MESSAGE_TYPE_REQUEST_TRANSACTION_DATA, MESSAGE_TYPE_REQUEST_TRANSACTION_DATA_ERROR,
    MESSAGE_TYPE_REQUEST_TRANSACTION_DATA_SUCCESS, MESSAGE_TYPE_SETUP_CONNECTION,
    MESSAGE_TYPE_SETUP_CONNECTION_ERROR, MESSAGE_TYPE_SETUP_CONNECTION_SUCCESS,
    MESSAGE_TYPE_SET_NEW_PREV_HASH, MESSAGE_TYPE_SUBMIT_SOLUTION,
};
use template_distribution_sv2::{
    CoinbaseOutputConstraints, NewTemplate, RequestTransactionData, RequestTransactionDataError,
    RequestTransactionDataSuccess, SetNewPrevHash, SubmitSolution,
};

/// Messages the Template Provider sends to a peer.
#[derive(Debug, Clone)]
pub enum TpMessage {
    SetupConnectionSuccess(SetupConnectionSuccess),
    SetupConnectionError(SetupConnectionError),
    NewTemplate(NewTemplate),
    SetNewPrevHash(SetNewPrevHash),
    RequestTransactionDataSuccess(RequestTransactionDataSuccess),
    RequestTransactionDataError(RequestTransactionDataError),
}

impl TpMessage {
    pub fn message_type(&self) -> u8 {
        match self {
            TpMessage::SetupConnectionSuccess(_) => MESSAGE_TYPE_SETUP_CONNECTION_SUCCESS,
            TpMessage::SetupConnectionError(_) => MESSAGE_TYPE_SETUP_CONNECTION_ERROR,
            TpMessage::NewTemplate(_) => MESSAGE_TYPE_NEW_TEMPLATE,
            TpMessage::SetNewPrevHash(_) => MESSAGE_TYPE_SET_NEW_PREV_HASH,
            TpMessage::RequestTransactionDataSuccess(_) => {
                MESSAGE_TYPE_REQUEST_TRANSACTION_DATA_SUCCESS
            }
            TpMessage::RequestTransactionDataError(_) => {
                MESSAGE_TYPE_REQUEST_TRANSACTION_DATA_ERROR
            }
        }
    }

    /// Serialized payload size, used for send-queue accounting.
    pub fn payload_len(&self) -> usize {
        match self {
            TpMessage::SetupConnectionSuccess(m) => m.encoded_size(),
            TpMessage::SetupConnectionError(m) => m.encoded_size(),
            TpMessage::NewTemplate(m) => m.encoded_size(),
            TpMessage::SetNewPrevHash(m) => m.encoded_size(),
            TpMessage::RequestTransactionDataSuccess(m) => m.encoded_size(),
            TpMessage::RequestTransactionDataError(m) => m.encoded_size(),
        }
    }

    pub fn to_net_msg(&self) -> Sv2NetMsg {
        let payload = match self {
            TpMessage::SetupConnectionSuccess(m) => to_bytes(m),
            TpMessage::SetupConnectionError(m) => to_bytes(m),
            TpMessage::NewTemplate(m) => to_bytes(m),
            TpMessage::SetNewPrevHash(m) => to_bytes(m),
            TpMessage::RequestTransactionDataSuccess(m) => to_bytes(m),
            TpMessage::RequestTransactionDataError(m) => to_bytes(m),
        };
        Sv2NetMsg::new(self.message_type(), payload)
    }
}

impl core::fmt::Display for TpMessage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TpMessage::SetupConnectionSuccess(m) => write!(f, "{}", m),
            TpMessage::SetupConnectionError(m) => write!(f, "{}", m),
            TpMessage::NewTemplate(m) => write!(f, "{}", m),
            TpMessage::SetNewPrevHash(m) => write!(f, "{}", m),
            TpMessage::RequestTransactionDataSuccess(m) => write!(f, "{}", m),
            TpMessage::RequestTransactionDataError(m) => write!(f, "{}", m),
        }
    }
}

/// Messages a peer may legitimately send to the Template Provider.
#[derive(Debug, Clone)]
pub enum PeerMessage {
    SetupConnection(SetupConnection),
    CoinbaseOutputConstraints(CoinbaseOutputConstraints),
    RequestTransactionData(RequestTransactionData),
    SubmitSolution(SubmitSolution),
}

#[derive(Debug)]
pub enum ParseError {
    /// The message type has no meaning in the Template Distribution
    /// protocol's client-to-server direction.
    UnknownMessageType(u8),
    /// The payload does not decode as the declared type.
    Decode(binary_sv2::Error),
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParseError::UnknownMessageType(t) => write!(f, "unknown message type 0x{:02x}", t),
            ParseError::Decode(e) => write!(f, "malformed payload: {}", e),
        }
    }
}

impl From<binary_sv2::Error> for ParseError {
    fn from(e: binary_sv2::Error) -> Self {
        ParseError::Decode(e)
    }
}

impl PeerMessage {
    pub fn parse(msg: &Sv2NetMsg) -> Result<Self, ParseError> {
        match msg.msg_type {
            MESSAGE_TYPE_SETUP_CONNECTION => Ok(PeerMessage::SetupConnection(
                SetupConnection::from_bytes(&msg.payload)?,
            )),
            MESSAGE_TYPE_COINBASE_OUTPUT_CONSTRAINTS => Ok(PeerMessage::CoinbaseOutputConstraints(
                CoinbaseOutputConstraints::from_bytes(&msg.payload)?,
            )),
            MESSAGE_TYPE_REQUEST_TRANSACTION_DATA => Ok(PeerMessage::RequestTransactionData(
                RequestTransactionData::from_bytes(&msg.payload)?,
            )),
            MESSAGE_TYPE_SUBMIT_SOLUTION => Ok(PeerMessage::SubmitSolution(
                SubmitSolution::from_bytes(&msg.payload)?,
            )),
            other => Err(ParseError::UnknownMessageType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_server_to_client_types() {
        let msg = Sv2NetMsg::new(MESSAGE_TYPE_NEW_TEMPLATE, vec![]);
        assert!(matches!(
            PeerMessage::parse(&msg),
            Err(ParseError::UnknownMessageType(0x71))
        ));
    }

    #[test]
    fn request_transaction_data_round_trip() {
        let wire = Sv2NetMsg::new(
            MESSAGE_TYPE_REQUEST_TRANSACTION_DATA,
            9u64.to_le_bytes().to_vec(),
        );
        match PeerMessage::parse(&wire).unwrap() {
            PeerMessage::RequestTransactionData(m) => assert_eq!(m.template_id, 9),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn payload_len_matches_serialization() {
        let msg = TpMessage::SetupConnectionSuccess(SetupConnectionSuccess {
            used_version: 2,
            flags: 0,
        });
        assert_eq!(msg.payload_len(), msg.to_net_msg().payload.len());
    }
}
