//! Kraken websocket source (tier 2)

use crate::{
    constants::KRAKEN_WS_URL,
    error::SourceError,
    source::StreamSource,
    types::{SourceTick, SourceTier, Symbol},
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Serialize)]
struct SubscribeRequest {
    event: &'static str,
    pair: Vec<String>,
    subscription: Subscription,
}

#[derive(Serialize)]
struct Subscription {
    name: &'static str,
}

/// Inner ticker payload of a Kraken channel message.
///
/// `c[0]` is the last trade price, `v[1]` the 24h volume.
#[derive(Deserialize)]
struct TickerData {
    c: Vec<String>,
    #[serde(default)]
    v: Vec<String>,
}

/// Streaming adapter for the Kraken ticker channel
pub struct KrakenSource {
    ws_url: String,
    symbols: Vec<Symbol>,
    stream: Option<WsStream>,
}

impl KrakenSource {
    /// Creates a source subscribed to the given symbols
    pub fn new(symbols: &[Symbol]) -> Self {
        Self {
            ws_url: KRAKEN_WS_URL.to_string(),
            symbols: symbols.to_vec(),
            stream: None,
        }
    }

    fn subscribe_request(&self) -> SubscribeRequest {
        SubscribeRequest {
            event: "subscribe",
            pair: self
                .symbols
                .iter()
                .filter_map(|s| s.kraken_pair())
                .map(str::to_string)
                .collect(),
            subscription: Subscription { name: "ticker" },
        }
    }

    /// Parses one inbound frame into a tick.
    ///
    /// Kraken sends object-shaped events (heartbeat, systemStatus,
    /// subscriptionStatus) and array-shaped channel messages
    /// `[channel_id, data, "ticker", pair]`. Everything but a ticker array
    /// for a mapped pair yields `Ok(None)`.
    pub(crate) fn parse_message(text: &str) -> Result<Option<SourceTick>, SourceError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| SourceError::parse(e.to_string()))?;

        let parts = match value.as_array() {
            Some(parts) => parts,
            // Object-shaped events are expected noise.
            None => return Ok(None),
        };

        if parts.len() != 4 || parts[2].as_str() != Some("ticker") {
            return Ok(None);
        }

        let symbol = match parts[3].as_str().and_then(Symbol::from_kraken_pair) {
            Some(symbol) => symbol,
            None => return Ok(None),
        };

        let data: TickerData = serde_json::from_value(parts[1].clone())
            .map_err(|e| SourceError::parse(format!("bad ticker payload: {e}")))?;

        let price = data
            .c
            .first()
            .ok_or_else(|| SourceError::parse("ticker missing last price"))?
            .parse::<f64>()
            .map_err(|e| SourceError::parse(format!("bad price: {e}")))?;

        Ok(Some(SourceTick {
            symbol,
            price,
            change_percent: None,
            volume: data.v.get(1).and_then(|v| v.parse().ok()),
            market_cap: None,
        }))
    }
}

#[async_trait]
impl StreamSource for KrakenSource {
    fn tier(&self) -> SourceTier {
        SourceTier::KrakenWs
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
        tracing::info!(symbols = self.symbols.len(), "Connected to Kraken feed");
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
                        tracing::warn!(error = %e, "Dropping malformed Kraken message");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ticker_array() {
        let text = r#"[340,{"a":["67251.10",1,"1.0"],"b":["67250.00",2,"2.0"],"c":["67250.50","0.015"],"v":["123.45","12345.67"]},"ticker","XBT/USD"]"#;
        let tick = KrakenSource::parse_message(text).unwrap().unwrap();
        assert_eq!(tick.symbol, Symbol::BTC);
        assert_eq!(tick.price, 67250.50);
        assert_eq!(tick.volume, Some(12345.67));
    }

    #[test]
    fn test_object_events_ignored() {
        let heartbeat = r#"{"event":"heartbeat"}"#;
        assert!(KrakenSource::parse_message(heartbeat).unwrap().is_none());

        let status = r#"{"event":"subscriptionStatus","status":"subscribed","pair":"XBT/USD"}"#;
        assert!(KrakenSource::parse_message(status).unwrap().is_none());
    }

    #[test]
    fn test_unmapped_pair_dropped() {
        let text = r#"[340,{"c":["1.0"],"v":["1","2"]},"ticker","SHIB/USD"]"#;
        assert!(KrakenSource::parse_message(text).unwrap().is_none());
    }

    #[test]
    fn test_bad_payload_is_parse_error() {
        let missing_last = r#"[340,{"c":[],"v":["1","2"]},"ticker","XBT/USD"]"#;
        assert!(matches!(
            KrakenSource::parse_message(missing_last),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn test_subscribe_request_shape() {
        let source = KrakenSource::new(&[Symbol::BTC, Symbol::DOGE]);
        let request = serde_json::to_value(source.subscribe_request()).unwrap();
        assert_eq!(request["event"], "subscribe");
        assert_eq!(request["subscription"]["name"], "ticker");
        assert_eq!(request["pair"], serde_json::json!(["XBT/USD", "XDG/USD"]));
    }
}
