//! Coinbase websocket source (tier 1)

use crate::{
    constants::COINBASE_WS_URL,
    error::SourceError,
    source::StreamSource,
    types::{SourceTick, SourceTier, Symbol},
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Serialize)]
struct SubscribeRequest {
    #[serde(rename = "type")]
    kind: &'static str,
    channels: Vec<SubscribeChannel>,
}

#[derive(Serialize)]
struct SubscribeChannel {
    name: &'static str,
    product_ids: Vec<String>,
}

#[derive(Deserialize)]
struct InboundMessage {
    #[serde(rename = "type")]
    kind: String,
    product_id: Option<String>,
    price: Option<String>,
    volume_24h: Option<String>,
}

/// Streaming adapter for the Coinbase ticker channel
pub struct CoinbaseSource {
    ws_url: String,
    symbols: Vec<Symbol>,
    stream: Option<WsStream>,
}

impl CoinbaseSource {
    /// Creates a source subscribed to the given symbols
    pub fn new(symbols: &[Symbol]) -> Self {
        Self {
            ws_url: COINBASE_WS_URL.to_string(),
            symbols: symbols.to_vec(),
            stream: None,
        }
    }

    fn subscribe_request(&self) -> SubscribeRequest {
        SubscribeRequest {
            kind: "subscribe",
            channels: vec![SubscribeChannel {
                name: "ticker",
                product_ids: self
                    .symbols
                    .iter()
                    .filter_map(|s| s.coinbase_product_id())
                    .map(str::to_string)
                    .collect(),
            }],
        }
    }

    /// Parses one inbound frame into a tick.
    ///
    /// `Ok(None)` for valid but irrelevant messages (subscription acks,
    /// heartbeats, unmapped products); `Err` only for malformed payloads.
    pub(crate) fn parse_message(text: &str) -> Result<Option<SourceTick>, SourceError> {
        let message: InboundMessage =
            serde_json::from_str(text).map_err(|e| SourceError::parse(e.to_string()))?;

        if message.kind != "ticker" {
            return Ok(None);
        }

        let symbol = match message
            .product_id
            .as_deref()
            .and_then(Symbol::from_coinbase_product_id)
        {
            Some(symbol) => symbol,
            None => return Ok(None),
        };

        let price = message
            .price
            .as_deref()
            .ok_or_else(|| SourceError::parse("ticker missing price"))?
            .parse::<f64>()
            .map_err(|e| SourceError::parse(format!("bad price: {e}")))?;

        Ok(Some(SourceTick {
            symbol,
            price,
            change_percent: None,
            volume: message.volume_24h.and_then(|v| v.parse().ok()),
            market_cap: None,
        }))
    }
}

#[async_trait]
impl StreamSource for CoinbaseSource {
    fn tier(&self) -> SourceTier {
        SourceTier::CoinbaseWs
    }

    async fn connect(&mut self) -> Result<(), SourceError> {
        let (mut ws_stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| SourceError::connection(e.to_string()))?;

        let request = serde_json::to_string(&self.subscribe_request())
            .map_err(|e| SourceError::parse(e.to_string()))?;
        ws_stream
            .send(Message::Text(request))
            .await
            .map_err(|e| SourceError::connection(e.to_string()))?;

        self.stream = Some(ws_stream);
        tracing::info!(symbols = self.symbols.len(), "Connected to Coinbase feed");
        Ok(())
    }

    async fn next_ticks(&mut self) -> Result<Vec<SourceTick>, SourceError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SourceError::connection("not connected"))?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match Self::parse_message(&text) {
                    Ok(Some(tick)) => return Ok(vec![tick]),
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping malformed Coinbase message");
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Err(SourceError::StreamClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SourceError::connection(e.to_string())),
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
