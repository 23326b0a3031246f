//! Mock implementations and server helpers for testing.
//!
//! A mockito server playing the ESB Networks portal and its identity provider, a fake
//! Home Assistant websocket endpoint, and in-memory stand-ins for the source and
//! store seams.

use crate::error::{EsbError, StorageError};
use crate::model::{LastStatistic, StatisticMetadata, StatisticRecord, UsageData};
use crate::source::UsageSource;
use crate::store::StatisticsStore;
use crate::test_utils::fixtures::{self, constants::*};
use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const POLICY_PATH: &str = "/esbntwkscustportalprdb2c01.onmicrosoft.com/B2C_1A_signup_signin";
const POLICY: &str = "B2C_1A_signup_signin";
const SESSION_COOKIE: &str = ".AspNetCore.Cookies=portal-session-abc";

/// Builder for a mockito server answering every step of the sign-in walk.
pub struct MockEsbPortalBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl MockEsbPortalBuilder {
    pub async fn new() -> Self {
        Self {
            server: Server::new_async().await,
            mocks: Vec::new(),
        }
    }

    pub fn url(&self) -> String {
        self.server.url()
    }

    /// The portal landing page, served both as the sign-in page and after the handshake.
    pub async fn mock_sign_in_page(mut self) -> Self {
        let mock = self
            .server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_header("set-cookie", "x-ms-cpim-csrf=csrf-cookie; path=/")
            .with_body(fixtures::sign_in_page(CSRF, TRANS_ID))
            .expect_at_least(1)
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// The credential POST, answering with `body`.
    pub async fn mock_credentials(mut self, body: &str) -> Self {
        let mock = self
            .server
            .mock("POST", format!("{}/SelfAsserted", POLICY_PATH).as_str())
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("tx".into(), TRANS_ID.into()),
                Matcher::UrlEncoded("p".into(), POLICY.into()),
            ]))
            .match_header("x-csrf-token", CSRF)
            .match_header("x-requested-with", "XMLHttpRequest")
            .match_header("cookie", Matcher::Regex("x-ms-cpim-csrf=csrf-cookie".into()))
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("signInName".into(), EMAIL.into()),
                Matcher::UrlEncoded("password".into(), PASSWORD.into()),
                Matcher::UrlEncoded("request_type".into(), "RESPONSE".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// The sign-in confirmation, answering with `body`.
    pub async fn mock_confirmation(mut self, body: &str) -> Self {
        let mock = self
            .server
            .mock(
                "GET",
                format!("{}/api/CombinedSigninAndSignup/confirmed", POLICY_PATH).as_str(),
            )
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("rememberMe".into(), "False".into()),
                Matcher::UrlEncoded("csrf_token".into(), CSRF.into()),
                Matcher::UrlEncoded("tx".into(), TRANS_ID.into()),
                Matcher::UrlEncoded("p".into(), POLICY.into()),
            ]))
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body(body)
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    async fn mock_handshake(mut self) -> Self {
        let mock = self
            .server
            .mock("POST", "/signin-oidc")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("state".into(), FORM_STATE.into()),
                Matcher::UrlEncoded("client_info".into(), FORM_CLIENT_INFO.into()),
                Matcher::UrlEncoded("code".into(), FORM_CODE.into()),
            ]))
            .with_status(302)
            .with_header("location", "/")
            .with_header("set-cookie", &format!("{}; path=/; httponly", SESSION_COOKIE))
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    async fn mock_consumption_page(mut self) -> Self {
        let mock = self
            .server
            .mock("GET", "/Api/HistoricConsumption")
            .with_status(200)
            .with_body("<html><body>Historic consumption</body></html>")
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    async fn mock_download_token(mut self) -> Self {
        let mock = self
            .server
            .mock("GET", "/af/t")
            .match_header(
                "x-returnurl",
                Matcher::Regex("/Api/HistoricConsumption$".into()),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "token": DOWNLOAD_TOKEN }).to_string())
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    async fn mock_download(mut self, body: &str) -> Self {
        let mock = self
            .server
            .mock("POST", "/DataHub/DownloadHdfPeriodic")
            .match_header("x-xsrf-token", DOWNLOAD_TOKEN)
            .match_header("cookie", Matcher::Regex(regex::escape(SESSION_COOKIE)))
            .match_body(Matcher::PartialJson(
                json!({ "mprn": MPRN, "searchType": "intervalkwh" }),
            ))
            .with_status(200)
            .with_header("content-type", "text/csv")
            .with_body(body)
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Every step of a successful walk, ending with `csv` as the download.
    pub async fn mock_full_walk(self, csv: &str) -> Self {
        let action = format!("{}/signin-oidc", self.url());
        self.mock_sign_in_page()
            .await
            .mock_credentials(r#"{"status":"200"}"#)
            .await
            .mock_confirmation(&fixtures::confirmed_page(&action))
            .await
            .mock_handshake()
            .await
            .mock_consumption_page()
            .await
            .mock_download_token()
            .await
            .mock_download(csv)
            .await
    }

    pub fn assert_all_called(&self) {
        for mock in &self.mocks {
            mock.assert();
        }
    }
}

/// Usage source returning a fixed result and counting its calls.
pub struct CountingUsageSource {
    data: Option<UsageData>,
    calls: AtomicUsize,
}

impl CountingUsageSource {
    pub fn succeeding(data: UsageData) -> Self {
        Self {
            data: Some(data),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every fetch with a login failure.
    pub fn failing() -> Self {
        Self {
            data: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageSource for CountingUsageSource {
    fn name(&self) -> &str {
        MPRN
    }

    async fn fetch_usage(&self) -> Result<UsageData, EsbError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.data {
            Some(data) => Ok(data.clone()),
            None => Err(EsbError::login_failed("too many retries or session error")),
        }
    }
}

/// Statistics store keeping everything in memory, upserting rows by start hour.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<String, Vec<StatisticRecord>>>,
    metadata: Mutex<HashMap<String, StatisticMetadata>>,
    writes: AtomicUsize,
    failing: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn records(&self, statistic_id: &str) -> Vec<StatisticRecord> {
        self.records
            .lock()
            .unwrap()
            .get(statistic_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn metadata(&self, statistic_id: &str) -> Option<StatisticMetadata> {
        self.metadata.lock().unwrap().get(statistic_id).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatisticsStore for InMemoryStore {
    async fn last_statistic(
        &self,
        statistic_id: &str,
    ) -> Result<Option<LastStatistic>, StorageError> {
        if self.failing {
            return Err(StorageError::QueryFailed("store unavailable".to_string()));
        }
        Ok(self.records(statistic_id).last().map(|record| LastStatistic {
            start: record.start.with_timezone(&Utc),
            sum: record.sum,
        }))
    }

    async fn add_external_statistics(
        &self,
        metadata: &StatisticMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), StorageError> {
        if self.failing {
            return Err(StorageError::write_failed(records.len(), "store unavailable"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.metadata
            .lock()
            .unwrap()
            .insert(metadata.statistic_id.clone(), metadata.clone());

        let mut all = self.records.lock().unwrap();
        let stored = all.entry(metadata.statistic_id.clone()).or_default();
        for record in records {
            stored.retain(|existing| existing.start != record.start);
            stored.push(record.clone());
        }
        stored.sort_by_key(|record| record.start);
        Ok(())
    }
}

enum HassBehaviour {
    Respond(Box<dyn Fn(&Value) -> Value + Send + Sync>),
    RejectAuth,
    Fail(String),
}

/// A websocket server speaking enough of the Home Assistant API for the recorder
/// commands.
pub struct FakeHomeAssistant {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<Value>>>,
    task: JoinHandle<()>,
}

impl FakeHomeAssistant {
    /// Answers every command successfully with `respond(command)` as the result.
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self::spawn(HassBehaviour::Respond(Box::new(respond))).await
    }

    pub async fn start_rejecting_auth() -> Self {
        Self::spawn(HassBehaviour::RejectAuth).await
    }

    /// Answers every command with an error carrying `message`.
    pub async fn start_failing(message: &str) -> Self {
        Self::spawn(HassBehaviour::Fail(message.to_string())).await
    }

    async fn spawn(behaviour: HassBehaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&commands);
        let behaviour = Arc::new(behaviour);

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_hass_connection(
                    stream,
                    Arc::clone(&behaviour),
                    Arc::clone(&recorded),
                ));
            }
        });

        Self {
            addr,
            commands,
            task,
        }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Commands received so far, authentication excluded.
    pub fn commands(&self) -> Vec<Value> {
        self.commands.lock().unwrap().clone()
    }
}

impl Drop for FakeHomeAssistant {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_hass_connection(
    stream: TcpStream,
    behaviour: Arc<HassBehaviour>,
    commands: Arc<Mutex<Vec<Value>>>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let frame = |value: Value| Message::Text(value.to_string().into());

    let _ = ws
        .send(frame(json!({ "type": "auth_required", "ha_version": "2025.6.0" })))
        .await;
    match ws.next().await {
        Some(Ok(Message::Text(_))) => {}
        _ => return,
    }
    if let HassBehaviour::RejectAuth = *behaviour {
        let _ = ws
            .send(frame(json!({
                "type": "auth_invalid",
                "message": "Invalid access token or password"
            })))
            .await;
        return;
    }
    let _ = ws
        .send(frame(json!({ "type": "auth_ok", "ha_version": "2025.6.0" })))
        .await;

    while let Some(Ok(message)) = ws.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let command: Value = serde_json::from_str(&text).unwrap();
        commands.lock().unwrap().push(command.clone());

        let reply = match &*behaviour {
            HassBehaviour::Respond(respond) => json!({
                "id": command["id"],
                "type": "result",
                "success": true,
                "result": respond(&command),
            }),
            HassBehaviour::Fail(message) => json!({
                "id": command["id"],
                "type": "result",
                "success": false,
                "error": { "code": "invalid_format", "message": message },
            }),
            HassBehaviour::RejectAuth => break,
        };
        if ws.send(frame(reply)).await.is_err() {
            break;
        }
    }
}
