use async_trait::async_trait;
use quoteline_core::BrokerError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::protocol::*;
use crate::client::IbClient;
use crate::config::BridgeConfig;
use crate::contract::{BarData, Contract, HistoricalDataRequest, MarketDataType, Ticker};

/// [`IbClient`] talking to a gateway bridge over TCP.
///
/// The bridge runs next to TWS or IB Gateway and relays requests using
/// length-prefixed JSON messages. Requests are serialized over a single
/// connection.
pub struct BridgeClient {
    config: BridgeConfig,
    stream: Mutex<Option<TcpStream>>,
    next_request_id: AtomicU64,
    /// Set by the handshake, cleared whenever the stream is dropped.
    server_version: StdMutex<Option<String>>,
}

impl BridgeClient {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            stream: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
            server_version: StdMutex::new(None),
        }
    }

    /// Open the connection and complete the hello handshake.
    pub async fn connect(&mut self) -> Result<(), BrokerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Connecting to IB bridge at {}", addr);

        let limit = self.config.connect_timeout_secs;
        let mut stream = timeout(Duration::from_secs(limit), TcpStream::connect(&addr))
            .await
            .map_err(|_| BrokerError::Timeout(limit))?
            .map_err(|e| BrokerError::ConnectionFailed(format!("TCP connect failed: {}", e)))?;

        write_message(
            &mut stream,
            &OutboundMessage::Hello {
                client_id: self.config.client_id,
            },
        )
        .await?;

        // Wait for Connected message
        let msg = timeout(Duration::from_secs(limit), read_message(&mut stream))
            .await
            .map_err(|_| BrokerError::Timeout(limit))??;
        match msg {
            InboundMessage::Connected { version } => {
                info!("Connected to IB bridge v{}", version);
                *self.version() = Some(version);
            }
            InboundMessage::Error { message, .. } => {
                return Err(BrokerError::ConnectionFailed(message));
            }
            _ => {
                return Err(BrokerError::ConnectionFailed(
                    "Unexpected initial message".to_string(),
                ));
            }
        }

        *self.stream.get_mut() = Some(stream);
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), BrokerError> {
        if let Some(mut stream) = self.stream.get_mut().take() {
            let _ = stream.shutdown().await;
        }
        *self.version() = None;
        info!("Disconnected from IB bridge");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.version().is_some()
    }

    pub fn server_version(&self) -> Option<String> {
        self.version().clone()
    }

    fn version(&self) -> MutexGuard<'_, Option<String>> {
        self.server_version
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a request and wait for the reply carrying the same request id.
    ///
    /// A timeout or I/O failure can leave a partial frame on the socket, so the
    /// connection is dropped and later calls fail with `NotConnected`.
    async fn request(
        &self,
        request_id: u64,
        msg: &OutboundMessage,
    ) -> Result<InboundMessage, BrokerError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(BrokerError::NotConnected)?;

        let limit = self.config.request_timeout_secs;
        let exchanged = timeout(Duration::from_secs(limit), exchange(stream, request_id, msg))
            .await
            .map_err(|_| BrokerError::Timeout(limit))
            .and_then(|reply| reply);

        let reply = match exchanged {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Dropping IB bridge connection");
                *guard = None;
                *self.version() = None;
                return Err(e);
            }
        };

        match reply {
            InboundMessage::Error { code, message, .. } => Err(BrokerError::Rejected(match code {
                Some(code) => format!("[{}] {}", code, message),
                None => message,
            })),
            reply => Ok(reply),
        }
    }
}

/// Write one request and read until its reply arrives.
async fn exchange(
    stream: &mut TcpStream,
    request_id: u64,
    msg: &OutboundMessage,
) -> Result<InboundMessage, BrokerError> {
    write_message(&mut *stream, msg).await?;
    loop {
        let reply = read_message(&mut *stream).await?;
        match reply.request_id() {
            Some(id) if id == request_id => return Ok(reply),
            _ => match reply {
                InboundMessage::Error { code, message, .. } => {
                    warn!(?code, "IB bridge: {}", message)
                }
                other => debug!(?other, "Skipping unrelated message"),
            },
        }
    }
}

fn unexpected(reply: InboundMessage) -> BrokerError {
    BrokerError::Protocol(format!("Unexpected reply: {:?}", reply))
}

#[async_trait]
impl IbClient for BridgeClient {
    async fn qualify_contracts(&self, contracts: &mut [Contract]) -> Result<(), BrokerError> {
        let request_id = self.request_id();
        let msg = OutboundMessage::QualifyContracts {
            request_id,
            contracts: contracts.to_vec(),
        };
        match self.request(request_id, &msg).await? {
            InboundMessage::ContractsQualified {
                contracts: qualified,
                ..
            } => {
                if qualified.len() != contracts.len() {
                    return Err(BrokerError::Protocol(format!(
                        "Asked to qualify {} contracts, got {}",
                        contracts.len(),
                        qualified.len()
                    )));
                }
                for (slot, contract) in contracts.iter_mut().zip(qualified) {
                    *slot = contract;
                }
                Ok(())
            }
            other => Err(unexpected(other)),
        }
    }

    async fn req_historical_data(
        &self,
        contract: &Contract,
        request: &HistoricalDataRequest,
    ) -> Result<Vec<BarData>, BrokerError> {
        let request_id = self.request_id();
        let msg = OutboundMessage::ReqHistoricalData {
            request_id,
            contract: contract.clone(),
            request: request.clone(),
        };
        match self.request(request_id, &msg).await? {
            InboundMessage::HistoricalData { bars, .. } => Ok(bars),
            other => Err(unexpected(other)),
        }
    }

    async fn req_tickers(&self, contracts: &[Contract]) -> Result<Vec<Ticker>, BrokerError> {
        let request_id = self.request_id();
        let msg = OutboundMessage::ReqTickers {
            request_id,
            contracts: contracts.to_vec(),
        };
        match self.request(request_id, &msg).await? {
            InboundMessage::Tickers { tickers, .. } => Ok(tickers),
            other => Err(unexpected(other)),
        }
    }

    async fn req_market_data_type(&self, data_type: MarketDataType) -> Result<(), BrokerError> {
        let request_id = self.request_id();
        let msg = OutboundMessage::ReqMarketDataType {
            request_id,
            market_data_type: data_type.code(),
        };
        match self.request(request_id, &msg).await? {
            InboundMessage::Ack { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::SecType;
    use tokio::net::TcpListener;

    /// Accept one connection, greet it, then answer each request with `reply`.
    async fn fake_bridge<F>(reply: F) -> BridgeConfig
    where
        F: Fn(OutboundMessage) -> Vec<InboundMessage> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let hello = read_outbound(&mut socket).await.unwrap();
            assert!(matches!(hello, OutboundMessage::Hello { client_id: 7 }));
            write_message(
                &mut socket,
                &InboundMessage::Connected {
                    version: "1.0".to_string(),
                },
            )
            .await
            .unwrap();

            while let Some(msg) = read_outbound(&mut socket).await {
                for answer in reply(msg) {
                    write_message(&mut socket, &answer).await.unwrap();
                }
            }
        });

        BridgeConfig {
            port,
            client_id: 7,
            request_timeout_secs: 5,
            ..Default::default()
        }
    }

    async fn read_outbound(socket: &mut TcpStream) -> Option<OutboundMessage> {
        use tokio::io::AsyncReadExt;
        let mut len_buf = [0u8; 4];
        socket.read_exact(&mut len_buf).await.ok()?;
        let mut body = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        socket.read_exact(&mut body).await.ok()?;
        serde_json::from_slice(&body).ok()
    }

    async fn connected(config: BridgeConfig) -> BridgeClient {
        let mut client = BridgeClient::new(config);
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_connect_handshake() {
        let config = fake_bridge(|_| Vec::new()).await;
        let mut client = connected(config).await;
        assert!(client.is_connected());
        assert_eq!(client.server_version().as_deref(), Some("1.0"));

        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_request_before_connect() {
        let client = BridgeClient::new(BridgeConfig::default());
        let result = client.req_market_data_type(MarketDataType::Live).await;
        assert!(matches!(result, Err(BrokerError::NotConnected)));
    }

    /// Accept one connection and complete the handshake, handing the socket back.
    async fn handshake_only() -> (BridgeConfig, tokio::task::JoinHandle<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_outbound(&mut socket).await.unwrap();
            write_message(
                &mut socket,
                &InboundMessage::Connected {
                    version: "1.0".to_string(),
                },
            )
            .await
            .unwrap();
            socket
        });
        let config = BridgeConfig {
            port,
            client_id: 7,
            request_timeout_secs: 1,
            ..Default::default()
        };
        (config, server)
    }

    #[tokio::test]
    async fn test_timeout_mid_frame_drops_connection() {
        let (config, server) = handshake_only().await;
        let client = connected(config).await;
        let mut socket = server.await.unwrap();

        let stalling = tokio::spawn(async move {
            let request_id = match read_outbound(&mut socket).await {
                Some(OutboundMessage::ReqMarketDataType { request_id, .. }) => request_id,
                other => panic!("Unexpected request {:?}", other),
            };
            let body = serde_json::to_vec(&InboundMessage::Ack { request_id }).unwrap();
            let framed = frame_message(&body);
            socket.write_all(&framed[..6]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1500)).await;
            let _ = socket.write_all(&framed[6..]).await;
            socket
        });

        let first = client.req_market_data_type(MarketDataType::Live).await;
        assert!(matches!(first, Err(BrokerError::Timeout(1))));
        assert!(!client.is_connected());
        assert_eq!(client.server_version(), None);

        let second = client.req_market_data_type(MarketDataType::Live).await;
        assert!(matches!(second, Err(BrokerError::NotConnected)));
        stalling.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_marks_client_disconnected() {
        let (config, server) = handshake_only().await;
        let client = connected(config).await;
        drop(server.await.unwrap());

        let result = client.req_tickers(&[Contract::new(SecType::Stock)]).await;
        assert!(matches!(result, Err(BrokerError::ConnectionFailed(_))));
        assert!(!client.is_connected());
        assert!(matches!(
            client.req_tickers(&[]).await,
            Err(BrokerError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_qualify_contracts_copies_results_in_place() {
        let config = fake_bridge(|msg| match msg {
            OutboundMessage::QualifyContracts {
                request_id,
                mut contracts,
            } => {
                for (i, contract) in contracts.iter_mut().enumerate() {
                    contract.con_id = 100 + i as i64;
                    contract.primary_exchange = "NASDAQ".to_string();
                }
                vec![InboundMessage::ContractsQualified {
                    request_id,
                    contracts,
                }]
            }
            _ => Vec::new(),
        })
        .await;
        let client = connected(config).await;

        let mut contracts = vec![Contract::new(SecType::Stock), Contract::new(SecType::Stock)];
        client.qualify_contracts(&mut contracts).await.unwrap();
        assert_eq!(contracts[0].con_id, 100);
        assert_eq!(contracts[1].con_id, 101);
        assert_eq!(contracts[1].primary_exchange, "NASDAQ");
    }

    #[tokio::test]
    async fn test_unrelated_messages_are_skipped() {
        let config = fake_bridge(|msg| match msg {
            OutboundMessage::ReqTickers {
                request_id,
                contracts,
            } => vec![
                InboundMessage::Error {
                    request_id: None,
                    code: Some(2104),
                    message: "Market data farm connection is OK".to_string(),
                },
                InboundMessage::Ack {
                    request_id: request_id + 100,
                },
                InboundMessage::Tickers {
                    request_id,
                    tickers: contracts.into_iter().map(Ticker::empty).collect(),
                },
            ],
            _ => Vec::new(),
        })
        .await;
        let client = connected(config).await;

        let tickers = client
            .req_tickers(&[Contract::new(SecType::Forex)])
            .await
            .unwrap();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].contract.sec_type, SecType::Forex);
    }

    #[tokio::test]
    async fn test_error_reply_is_rejected() {
        let config = fake_bridge(|msg| match msg {
            OutboundMessage::ReqHistoricalData { request_id, .. } => vec![InboundMessage::Error {
                request_id: Some(request_id),
                code: Some(162),
                message: "HMDS query returned no data".to_string(),
            }],
            _ => Vec::new(),
        })
        .await;
        let client = connected(config).await;

        let err = client
            .req_historical_data(&Contract::new(SecType::Stock), &HistoricalDataRequest::default())
            .await
            .unwrap_err();
        match err {
            BrokerError::Rejected(message) => assert_eq!(message, "[162] HMDS query returned no data"),
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_reply_type_is_a_protocol_error() {
        let config = fake_bridge(|msg| match msg {
            OutboundMessage::ReqMarketDataType { request_id, .. } => vec![InboundMessage::HistoricalData {
                request_id,
                bars: Vec::new(),
            }],
            _ => Vec::new(),
        })
        .await;
        let client = connected(config).await;

        let result = client.req_market_data_type(MarketDataType::Delayed).await;
        assert!(matches!(result, Err(BrokerError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_market_data_type_is_sent_as_code() {
        let config = fake_bridge(|msg| match msg {
            OutboundMessage::ReqMarketDataType {
                request_id,
                market_data_type: 4,
            } => vec![InboundMessage::Ack { request_id }],
            _ => Vec::new(),
        })
        .await;
        let client = connected(config).await;

        client
            .req_market_data_type(MarketDataType::DelayedFrozen)
            .await
            .unwrap();
    }
}
