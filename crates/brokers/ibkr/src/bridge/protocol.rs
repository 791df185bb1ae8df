use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::contract::{BarData, Contract, HistoricalDataRequest, Ticker};
use quoteline_core::BrokerError;

/// Largest frame we are willing to allocate for.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Messages sent from the Rust client TO the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// First message on a new connection.
    Hello { client_id: i32 },
    QualifyContracts {
        request_id: u64,
        contracts: Vec<Contract>,
    },
    ReqHistoricalData {
        request_id: u64,
        contract: Contract,
        request: HistoricalDataRequest,
    },
    ReqTickers {
        request_id: u64,
        contracts: Vec<Contract>,
    },
    ReqMarketDataType {
        request_id: u64,
        market_data_type: i32,
    },
}

/// Messages received FROM the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Connection established.
    Connected { version: String },
    /// Same contracts, in the same order, with `con_id` filled in where resolved.
    ContractsQualified {
        request_id: u64,
        contracts: Vec<Contract>,
    },
    HistoricalData { request_id: u64, bars: Vec<BarData> },
    Tickers {
        request_id: u64,
        tickers: Vec<Ticker>,
    },
    Ack { request_id: u64 },
    /// Error reported by TWS or the bridge itself.
    Error {
        #[serde(default)]
        request_id: Option<u64>,
        #[serde(default)]
        code: Option<i32>,
        message: String,
    },
}

impl InboundMessage {
    /// The request this message answers, if any.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            InboundMessage::Connected { .. } => None,
            InboundMessage::ContractsQualified { request_id, .. }
            | InboundMessage::HistoricalData { request_id, .. }
            | InboundMessage::Tickers { request_id, .. }
            | InboundMessage::Ack { request_id } => Some(*request_id),
            InboundMessage::Error { request_id, .. } => *request_id,
        }
    }
}

/// Frame a message with a 4-byte length prefix (big-endian).
pub fn frame_message(msg: &[u8]) -> Vec<u8> {
    let len = msg.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(msg);
    framed
}

pub async fn write_message<W, M>(writer: &mut W, msg: &M) -> Result<(), BrokerError>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let json = serde_json::to_vec(msg)
        .map_err(|e| BrokerError::Other(format!("Serialization error: {}", e)))?;
    writer
        .write_all(&frame_message(&json))
        .await
        .map_err(|e| BrokerError::ConnectionFailed(format!("Write error: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| BrokerError::ConnectionFailed(format!("Write error: {}", e)))
}

/// Read a single framed message.
pub async fn read_message<R>(reader: &mut R) -> Result<InboundMessage, BrokerError>
where
    R: AsyncRead + Unpin,
{
    // Read 4-byte length prefix
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| BrokerError::ConnectionFailed(format!("Read error: {}", e)))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(BrokerError::Protocol(format!(
            "Frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_LEN
        )));
    }

    // Read message body
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| BrokerError::ConnectionFailed(format!("Read error: {}", e)))?;

    serde_json::from_slice(&body)
        .map_err(|e| BrokerError::Protocol(format!("Deserialization error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::SecType;

    #[test]
    fn test_frame_message() {
        let framed = frame_message(b"{}");
        assert_eq!(framed, vec![0, 0, 0, 2, b'{', b'}']);
    }

    #[test]
    fn test_outbound_message_tags() {
        let msg = OutboundMessage::ReqMarketDataType {
            request_id: 7,
            market_data_type: 4,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "req_market_data_type");
        assert_eq!(json["market_data_type"], 4);
    }

    #[tokio::test]
    async fn test_tickers_with_missing_prices_survive_the_wire() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut ticker = Ticker::empty(Contract::new(SecType::Stock));
        ticker.bid = 101.5;

        write_message(
            &mut server,
            &InboundMessage::Tickers {
                request_id: 3,
                tickers: vec![ticker],
            },
        )
        .await
        .unwrap();

        match read_message(&mut client).await.unwrap() {
            InboundMessage::Tickers { request_id, tickers } => {
                assert_eq!(request_id, 3);
                assert_eq!(tickers[0].bid, 101.5);
                assert!(tickers[0].ask.is_nan());
                assert!(tickers[0].close.is_nan());
            }
            other => panic!("Unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_without_request_id() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let body = br#"{"type": "error", "message": "TWS not running"}"#;
        server.write_all(&frame_message(body)).await.unwrap();

        let msg = read_message(&mut client).await.unwrap();
        assert_eq!(msg.request_id(), None);
        assert!(matches!(msg, InboundMessage::Error { code: None, .. }));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        let result = read_message(&mut client).await;
        assert!(matches!(result, Err(BrokerError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_garbage_body_is_a_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(&frame_message(b"not json")).await.unwrap();

        let result = read_message(&mut client).await;
        assert!(matches!(result, Err(BrokerError::Protocol(_))));
    }
}
