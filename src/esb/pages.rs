//! Extraction of the tokens the login walk carries from one page to the next.
//!
//! The identity provider embeds its anti-forgery token and transaction id in an inline
//! `var SETTINGS = {...};` script, hands the authorization code back through an
//! auto-submitting `form#auto`, and the portal returns the download token as JSON.

use crate::error::ParseError;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_derive::Deserialize;
use std::sync::OnceLock;

/// First bytes of the page served after a successful sign-in.
pub const CONFIRMED_PAGE_PREFIX: &str = "<!DOCTYPE html PUBLIC";

const AUTO_FORM_SELECTOR: &str = "form#auto";

fn settings_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"var SETTINGS = (\S*);").expect("invalid regex: SETTINGS"))
}

/// Anti-forgery values of the sign-in page.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LoginSettings {
    pub csrf: String,
    #[serde(rename = "transId")]
    pub trans_id: String,
}

pub fn extract_login_settings(body: &str) -> Result<LoginSettings, ParseError> {
    let captures = settings_pattern().captures(body).ok_or_else(|| {
        ParseError::UnexpectedStructure("no SETTINGS script on the sign-in page".to_string())
    })?;
    serde_json::from_str(&captures[1]).map_err(|e| ParseError::json("sign-in SETTINGS", e))
}

#[derive(Deserialize)]
struct SelfAssertedResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Returns the identity provider's complaint when the credential POST was refused.
///
/// Bodies that are not the provider's JSON status object are not judged here; the
/// confirmation page decides those.
pub fn self_asserted_rejection(body: &str) -> Option<String> {
    let response: SelfAssertedResponse = serde_json::from_str(body).ok()?;
    if response.status == "200" {
        return None;
    }
    Some(
        response
            .message
            .unwrap_or_else(|| format!("status {}", response.status)),
    )
}

pub fn is_confirmed_page(body: &str) -> bool {
    body.starts_with(CONFIRMED_PAGE_PREFIX)
}

/// The auto-submitting form that completes the OpenID handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoForm {
    pub action: String,
    pub state: String,
    pub client_info: String,
    pub code: String,
}

impl AutoForm {
    pub fn fields(&self) -> [(&'static str, &str); 3] {
        [
            ("state", self.state.as_str()),
            ("client_info", self.client_info.as_str()),
            ("code", self.code.as_str()),
        ]
    }
}

pub(crate) fn html_selector(selector: &str) -> Result<Selector, ParseError> {
    Selector::parse(selector).map_err(|e| ParseError::invalid_selector(selector, e))
}

fn input_value(form: &ElementRef, name: &str) -> Result<String, ParseError> {
    let selector = format!(r#"input[name="{}"]"#, name);
    let input = form
        .select(&html_selector(&selector)?)
        .next()
        .ok_or_else(|| ParseError::element_not_found(&selector))?;
    input
        .value()
        .attr("value")
        .map(str::to_string)
        .ok_or_else(|| ParseError::missing_attribute(&selector, "value"))
}

pub fn parse_auto_form(body: &str) -> Result<AutoForm, ParseError> {
    let document = Html::parse_document(body);
    let form = document
        .select(&html_selector(AUTO_FORM_SELECTOR)?)
        .next()
        .ok_or_else(|| ParseError::element_not_found(AUTO_FORM_SELECTOR))?;
    let action = form
        .value()
        .attr("action")
        .ok_or_else(|| ParseError::missing_attribute(AUTO_FORM_SELECTOR, "action"))?
        .to_string();

    Ok(AutoForm {
        action,
        state: input_value(&form, "state")?,
        client_info: input_value(&form, "client_info")?,
        code: input_value(&form, "code")?,
    })
}

#[derive(Deserialize)]
struct DownloadToken {
    token: String,
}

pub fn parse_download_token(body: &str) -> Result<String, ParseError> {
    serde_json::from_str::<DownloadToken>(body)
        .map(|t| t.token)
        .map_err(|e| ParseError::json("download token", e))
}
