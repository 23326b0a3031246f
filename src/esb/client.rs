//! Browser-emulating session against the ESB Networks customer portal.
//!
//! A fetch is one fresh session: a cookie jar shared by two HTTP clients (one
//! following redirects, one not) walks the B2C sign-in, completes the OpenID
//! handshake, and downloads the half-hourly interval CSV for the meter.

use crate::config::EsbConfig;
use crate::entries::MeterEntry;
use crate::error::EsbError;
use crate::esb::pacing::{self, Pacing};
use crate::esb::pages::{self, LoginSettings};
use crate::esb::usage_csv::parse_usage_csv;
use crate::model::UsageData;
use crate::source::UsageSource;
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde_json::json;
use std::sync::Arc;

pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:142.0) Gecko/20100101 Firefox/142.0";

const CONSUMPTION_PATH: &str = "/Api/HistoricConsumption";
const DOWNLOAD_TOKEN_PATH: &str = "/af/t";
const DOWNLOAD_PATH: &str = "/DataHub/DownloadHdfPeriodic";
const SEARCH_TYPE: &str = "intervalkwh";

pub struct Client {
    entry: MeterEntry,
    config: EsbConfig,
    pacing: Pacing,
}

impl Client {
    pub fn new(entry: MeterEntry, config: EsbConfig) -> Self {
        let pacing = Pacing::new(config.request_delays);
        Self {
            entry,
            config,
            pacing,
        }
    }

    pub fn mprn(&self) -> &str {
        &self.entry.mprn
    }

    /// Signs in and downloads the interval readings for this meter.
    pub async fn get_usage_data(&self) -> Result<UsageData, EsbError> {
        tracing::info!(mprn = %self.entry.mprn, "Fetching fresh data from ESB Networks...");
        let session = Session::open(&self.config)?;

        let settings = session.load_sign_in_page().await?;
        self.pacing.pause(pacing::AFTER_SIGN_IN_PAGE).await;

        session.submit_credentials(&self.entry, &settings).await?;
        let form = session.confirm_sign_in(&settings).await?;
        self.pacing.pause(pacing::AFTER_CONFIRMATION).await;

        session.complete_handshake(&form).await?;
        session.open_portal().await?;
        self.pacing.pause(pacing::AFTER_PORTAL).await;

        session.open_consumption_page().await?;
        self.pacing.pause(pacing::AFTER_CONSUMPTION_PAGE).await;

        let token = session.download_token().await?;
        let body = session.download_usage(&self.entry.mprn, &token).await?;

        let readings = parse_usage_csv(&body)?;
        tracing::info!(
            mprn = %self.entry.mprn,
            readings = readings.len(),
            "Successfully fetched readings"
        );
        Ok(UsageData::from_readings(readings))
    }
}

#[async_trait]
impl UsageSource for Client {
    fn name(&self) -> &str {
        self.mprn()
    }

    async fn fetch_usage(&self) -> Result<UsageData, EsbError> {
        self.get_usage_data().await.inspect_err(|err| {
            tracing::error!(mprn = %self.entry.mprn, error = %err, "Error fetching ESB data");
        })
    }
}

/// One sign-in walk; dropped (with its cookies) when the fetch ends.
struct Session<'a> {
    config: &'a EsbConfig,
    follow: HttpClient,
    no_redirect: HttpClient,
}

impl<'a> Session<'a> {
    fn open(config: &'a EsbConfig) -> Result<Self, EsbError> {
        let jar = Arc::new(Jar::default());
        Ok(Self {
            config,
            follow: build_http_client(config, Arc::clone(&jar), Policy::default())?,
            no_redirect: build_http_client(config, jar, Policy::none())?,
        })
    }

    fn portal(&self, path: &str) -> String {
        format!("{}{}", self.config.portal_url.trim_end_matches('/'), path)
    }

    fn login_origin(&self) -> &str {
        self.config.login_url.trim_end_matches('/')
    }

    // Step 1
    async fn load_sign_in_page(&self) -> Result<LoginSettings, EsbError> {
        tracing::info!("Fetching ESB login page...");
        let response = send("sign-in page", self.follow.get(self.portal("/"))).await?;
        let body = read_text(response).await?;
        Ok(pages::extract_login_settings(&body)?)
    }

    // Step 2
    async fn submit_credentials(
        &self,
        entry: &MeterEntry,
        settings: &LoginSettings,
    ) -> Result<(), EsbError> {
        tracing::info!("Logging in to ESB Networks...");
        let url = format!(
            "{}/SelfAsserted?tx={}&p={}",
            self.config.policy_url(),
            settings.trans_id,
            self.config.policy
        );
        let request = self
            .no_redirect
            .post(url)
            .header("x-csrf-token", &settings.csrf)
            .header("Accept", "application/json, text/javascript, */*; q=0.01")
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Origin", self.login_origin())
            .form(&[
                ("signInName", entry.email.as_str()),
                ("password", entry.password.as_str()),
                ("request_type", "RESPONSE"),
            ]);
        let response = send("credentials", request).await?;
        let body = read_text(response).await?;
        if let Some(reason) = pages::self_asserted_rejection(&body) {
            return Err(EsbError::InvalidCredentials(reason));
        }
        Ok(())
    }

    // Step 3
    async fn confirm_sign_in(&self, settings: &LoginSettings) -> Result<pages::AutoForm, EsbError> {
        let url = format!(
            "{}/api/CombinedSigninAndSignup/confirmed",
            self.config.policy_url()
        );
        let request = self.follow.get(url).query(&[
            ("rememberMe", "False"),
            ("csrf_token", settings.csrf.as_str()),
            ("tx", settings.trans_id.as_str()),
            ("p", self.config.policy.as_str()),
        ]);
        let response = send("confirmation", request).await?;
        let body = read_text(response).await?;
        if !pages::is_confirmed_page(&body) {
            return Err(EsbError::login_failed("too many retries or session error"));
        }
        Ok(pages::parse_auto_form(&body)?)
    }

    // Step 4
    async fn complete_handshake(&self, form: &pages::AutoForm) -> Result<(), EsbError> {
        let request = self
            .no_redirect
            .post(&form.action)
            .header("Origin", self.login_origin())
            .header("Referer", format!("{}/", self.login_origin()))
            .form(&form.fields());
        send("handshake", request).await?;
        Ok(())
    }

    // Step 5
    async fn open_portal(&self) -> Result<(), EsbError> {
        send("portal", self.follow.get(self.portal("/"))).await?;
        Ok(())
    }

    // Step 6
    async fn open_consumption_page(&self) -> Result<(), EsbError> {
        send(
            "consumption page",
            self.follow.get(self.portal(CONSUMPTION_PATH)),
        )
        .await?;
        Ok(())
    }

    // Step 7
    async fn download_token(&self) -> Result<String, EsbError> {
        tracing::info!("Getting download token...");
        let request = self
            .follow
            .get(self.portal(DOWNLOAD_TOKEN_PATH))
            .header("X-Returnurl", self.portal(CONSUMPTION_PATH));
        let response = send("download token", request).await?;
        let body = read_text(response).await?;
        Ok(pages::parse_download_token(&body)?)
    }

    // Step 8
    async fn download_usage(&self, mprn: &str, token: &str) -> Result<String, EsbError> {
        tracing::info!("Downloading usage data...");
        let request = self
            .follow
            .post(self.portal(DOWNLOAD_PATH))
            .header("X-Xsrf-Token", token)
            .json(&json!({ "mprn": mprn, "searchType": SEARCH_TYPE }));
        let response = send("download", request).await?;
        read_text(response).await
    }
}

fn build_http_client(
    config: &EsbConfig,
    jar: Arc<Jar>,
    policy: Policy,
) -> Result<HttpClient, EsbError> {
    Ok(HttpClient::builder()
        .user_agent(USER_AGENT)
        .cookie_provider(jar)
        .redirect(policy)
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .build()?)
}

async fn send(step: &'static str, request: RequestBuilder) -> Result<Response, EsbError> {
    let response = request.send().await.map_err(EsbError::from_request)?;
    let status = response.status();
    tracing::debug!(step, status = status.as_u16(), "ESB response");
    if status.is_client_error() || status.is_server_error() {
        return Err(EsbError::ServerError {
            step,
            status: status.as_u16(),
        });
    }
    Ok(response)
}

async fn read_text(response: Response) -> Result<String, EsbError> {
    response.text().await.map_err(EsbError::from_request)
}
