//! Home Assistant recorder statistics over the websocket API.
//!
//! Each operation opens a connection, authenticates with a long-lived access token,
//! issues one command and closes. The recorder keys external statistics by
//! `source:object_id` and upserts rows with the same `start`.

use crate::config::HassConfig;
use crate::error::StorageError;
use crate::model::{LastStatistic, StatisticMetadata, StatisticRecord};
use crate::store::StatisticsStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde_derive::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct HomeAssistantStore {
    config: HassConfig,
}

impl HomeAssistantStore {
    pub fn new(config: HassConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<Connection, StorageError> {
        Connection::open(&self.config.websocket_url(), &self.config.token).await
    }

    async fn find_last_statistic(
        &self,
        connection: &mut Connection,
        statistic_id: &str,
    ) -> Result<Option<LastStatistic>, StorageError> {
        let start_time = Utc::now() - chrono::Duration::days(self.config.lookback_days as i64);
        let result = connection
            .command(json!({
                "type": "recorder/statistics_during_period",
                "start_time": start_time.to_rfc3339(),
                "statistic_ids": [statistic_id],
                "period": "hour",
                "types": ["sum"],
            }))
            .await?;

        let rows = match result.get(statistic_id) {
            Some(rows) => serde_json::from_value::<Vec<StatisticRow>>(rows.clone())
                .map_err(|e| StorageError::protocol(format!("invalid statistics rows: {}", e)))?,
            None => Vec::new(),
        };
        if let Some(row) = rows.last() {
            return Ok(Some(LastStatistic {
                start: row.start.to_utc()?,
                sum: row.sum.unwrap_or(0.0),
            }));
        }

        // An empty window restarts the running sum, which rewrites older hours.
        let metadata = connection
            .command(json!({
                "type": "recorder/get_statistics_metadata",
                "statistic_ids": [statistic_id],
            }))
            .await?;
        if metadata.as_array().is_some_and(|known| !known.is_empty()) {
            tracing::warn!(
                statistic_id,
                lookback_days = self.config.lookback_days,
                "Statistic exists but has no rows within the lookback window, the sum restarts at zero"
            );
        }
        Ok(None)
    }
}

struct Connection {
    socket: Socket,
    next_id: u64,
}

impl Connection {
    async fn open(url: &str, token: &str) -> Result<Self, StorageError> {
        let (socket, _) = connect_async(url).await.map_err(|err| {
            tracing::warn!(url, error = %err, "Home Assistant websocket connect failed");
            StorageError::connection_failed(url)
        })?;
        let mut connection = Self { socket, next_id: 1 };
        connection.authenticate(token).await?;
        Ok(connection)
    }

    async fn authenticate(&mut self, token: &str) -> Result<(), StorageError> {
        let hello = self.receive().await?;
        if hello["type"] != "auth_required" {
            return Err(StorageError::protocol(format!(
                "expected auth_required, got {}",
                hello
            )));
        }
        self.send(json!({ "type": "auth", "access_token": token }))
            .await?;

        let reply = self.receive().await?;
        match reply["type"].as_str() {
            Some("auth_ok") => {
                tracing::debug!(
                    ha_version = reply["ha_version"].as_str().unwrap_or("unknown"),
                    "Authenticated with Home Assistant"
                );
                Ok(())
            }
            Some("auth_invalid") => Err(StorageError::AuthFailed(
                reply["message"]
                    .as_str()
                    .unwrap_or("invalid access token")
                    .to_string(),
            )),
            _ => Err(StorageError::protocol(format!(
                "unexpected auth reply {}",
                reply
            ))),
        }
    }

    async fn send(&mut self, payload: Value) -> Result<(), StorageError> {
        self.socket
            .send(Message::Text(payload.to_string().into()))
            .await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Value, StorageError> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| StorageError::protocol(format!("invalid JSON: {}", e)))
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(StorageError::protocol("connection closed by Home Assistant"))
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    /// Sends a command and waits for its result message.
    async fn command(&mut self, mut payload: Value) -> Result<Value, StorageError> {
        let id = self.next_id;
        self.next_id += 1;
        payload["id"] = json!(id);
        let command = payload["type"].as_str().unwrap_or_default().to_string();
        self.send(payload).await?;

        loop {
            let message = self.receive().await?;
            if message["id"] != id || message["type"] != "result" {
                continue;
            }
            if message["success"] == true {
                return Ok(message["result"].clone());
            }
            return Err(StorageError::QueryFailed(format!(
                "{} failed: {}",
                command,
                message["error"]["message"].as_str().unwrap_or("unknown error")
            )));
        }
    }

    async fn close(mut self) {
        if let Err(err) = self.socket.close(None).await {
            tracing::debug!(error = %err, "Error closing Home Assistant websocket");
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RowTime {
    Millis(f64),
    Text(String),
}

impl RowTime {
    fn to_utc(&self) -> Result<DateTime<Utc>, StorageError> {
        match self {
            RowTime::Millis(ms) => DateTime::from_timestamp_millis(*ms as i64)
                .ok_or_else(|| StorageError::protocol(format!("timestamp out of range: {}", ms))),
            RowTime::Text(text) => DateTime::parse_from_rfc3339(text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| StorageError::protocol(format!("invalid start '{}': {}", text, e))),
        }
    }
}

#[derive(Deserialize)]
struct StatisticRow {
    start: RowTime,
    #[serde(default)]
    sum: Option<f64>,
}

fn metadata_payload(metadata: &StatisticMetadata) -> Value {
    json!({
        "has_sum": metadata.has_sum,
        "mean_type": if metadata.has_mean { 1 } else { 0 },
        "name": metadata.name,
        "source": metadata.source,
        "statistic_id": metadata.statistic_id,
        "unit_of_measurement": metadata.unit_of_measurement.to_string(),
        "unit_class": Value::Null,
    })
}

fn record_payload(record: &StatisticRecord) -> Value {
    json!({
        "start": record.start.to_rfc3339(),
        "state": record.state,
        "sum": record.sum,
    })
}

#[async_trait]
impl StatisticsStore for HomeAssistantStore {
    async fn last_statistic(
        &self,
        statistic_id: &str,
    ) -> Result<Option<LastStatistic>, StorageError> {
        let mut connection = self.connect().await?;
        let result = self.find_last_statistic(&mut connection, statistic_id).await;
        connection.close().await;
        result
    }

    async fn add_external_statistics(
        &self,
        metadata: &StatisticMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), StorageError> {
        let stats: Vec<Value> = records.iter().map(record_payload).collect();
        let mut connection = self.connect().await?;
        let result = connection
            .command(json!({
                "type": "recorder/import_statistics",
                "metadata": metadata_payload(metadata),
                "stats": stats,
            }))
            .await;
        connection.close().await;

        result.map_err(|err| StorageError::write_failed(records.len(), err))?;
        tracing::info!(
            statistic_id = %metadata.statistic_id,
            count = records.len(),
            "Home Assistant accepted statistics"
        );
        Ok(())
    }
}
