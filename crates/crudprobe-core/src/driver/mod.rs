//! System-under-test driver abstraction.
//!
//! A [`Driver`] exposes the capability set every validator is written
//! against: `navigate`, `act`, `set_field`, `wait_for_visible`,
//! `is_visible`, `call`, plus tenant switching and diagnostics. Three
//! variants ship with the crate:
//!
//! - [`http::HttpDriver`]: direct REST calls with tenant header and credential
//! - [`webdriver::WebDriverDriver`]: browser automation over the W3C WebDriver protocol
//! - [`twin::TwinDriver`]: in-process multi-tenant twin of the SUT
//!
//! Every capability returns `Result<_, OperationError>`; a capability a
//! variant does not offer returns [`OperationError::Unsupported`] so callers
//! pattern-match instead of relying on exceptions.

pub mod http;
pub mod twin;
pub mod webdriver;

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::{DriverTarget, ProbeConfig},
    error::OperationError,
    Result,
};

/// Test id of the submit button on create/edit forms.
pub const SUBMIT_TEST_ID: &str = "form-submit";

/// Test id of the confirmation button shown after a delete trigger.
pub const CONFIRM_DELETE_TEST_ID: &str = "confirm-delete";

/// Interval between visibility polls.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Active organizational scope (a farm) a request operates under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// UI element locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "kebab-case")]
pub enum Locator {
    /// `data-testid` attribute
    TestId(String),
    /// Exact visible text
    Text(String),
    /// Raw CSS selector
    Css(String),
}

impl Locator {
    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TestId(id) => write!(f, "testid={id}"),
            Self::Text(text) => write!(f, "text={text}"),
            Self::Css(css) => write!(f, "css={css}"),
        }
    }
}

/// HTTP verb used by [`Driver::call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// A REST call against the SUT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Send without credentials
    pub anonymous: bool,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            anonymous: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub const fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    /// Value of the first query parameter named `key`.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response of a [`Driver::call`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    #[must_use]
    pub const fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Unwrap the `{success, data}` envelope.
    ///
    /// HTTP errors map through [`OperationError::from_status`]; an envelope
    /// with `success: false` becomes [`OperationError::Rejected`]. Bodies
    /// without an envelope are returned whole.
    pub fn into_data(self) -> std::result::Result<Value, OperationError> {
        if self.status >= 400 {
            return Err(OperationError::from_status(
                self.status,
                error_message(&self.body),
            ));
        }
        match self.body {
            Value::Object(mut map) => {
                if map.get("success").and_then(Value::as_bool) == Some(false) {
                    return Err(OperationError::Rejected(error_message(&Value::Object(
                        map,
                    ))));
                }
                if map.contains_key("data") {
                    Ok(map.remove("data").unwrap_or(Value::Null))
                } else {
                    Ok(Value::Object(map))
                }
            }
            other => Ok(other),
        }
    }
}

fn error_message(body: &Value) -> String {
    let from_error = body.get("error").and_then(|e| match e {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("message").and_then(Value::as_str).map(str::to_string),
        _ => None,
    });
    from_error
        .or_else(|| body.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| match body {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
}

/// Extract an entity id (string or number) from a record.
pub fn entity_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Which surface a driver automates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DriverKind {
    /// REST calls only; UI capabilities are unsupported
    Api,
    /// Browser automation; `call` runs inside the page session
    Ui,
}

/// Diagnostic snapshot captured after a failing test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub extension: &'static str,
    pub contents: Vec<u8>,
}

impl Artifact {
    pub fn json(value: &Value) -> Self {
        Self {
            extension: "json",
            contents: serde_json::to_vec_pretty(value).unwrap_or_default(),
        }
    }

    pub fn html(source: String) -> Self {
        Self {
            extension: "html",
            contents: source.into_bytes(),
        }
    }
}

/// Capability set of a system-under-test driver.
///
/// Implementations use interior mutability for session state so a single
/// driver can be shared (`Arc<dyn Driver>`) by concurrent stress operations.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Surface this driver automates.
    fn kind(&self) -> DriverKind;

    /// Open a page by application path.
    async fn navigate(&self, path: &str) -> std::result::Result<(), OperationError>;

    /// Click/activate the element behind `trigger`.
    async fn act(&self, trigger: &Locator) -> std::result::Result<(), OperationError>;

    /// Fill a named form field.
    async fn set_field(&self, name: &str, value: &Value) -> std::result::Result<(), OperationError>;

    /// Wait until `locator` is visible, failing with `Timeout` after `timeout`.
    async fn wait_for_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> std::result::Result<(), OperationError>;

    /// Whether `locator` is currently visible.
    async fn is_visible(&self, locator: &Locator) -> std::result::Result<bool, OperationError>;

    /// Issue a REST call. The active tenant accompanies every call.
    async fn call(&self, request: ApiRequest) -> std::result::Result<ApiResponse, OperationError>;

    /// Select the active tenant (or clear it with `None`).
    ///
    /// Returns only once the switch has fully settled.
    async fn switch_tenant(
        &self,
        tenant: Option<&TenantId>,
    ) -> std::result::Result<(), OperationError>;

    /// Currently selected tenant.
    fn active_tenant(&self) -> Option<TenantId>;

    /// Establish the authenticated session.
    async fn authenticate(&self) -> std::result::Result<(), OperationError> {
        Ok(())
    }

    /// Capture a diagnostic artifact of the current state.
    async fn snapshot(&self) -> std::result::Result<Artifact, OperationError>;

    /// Release session resources.
    async fn shutdown(&self) -> std::result::Result<(), OperationError> {
        Ok(())
    }
}

/// Poll [`Driver::is_visible`] until it reports true or `timeout` elapses.
pub async fn poll_visible<D: Driver + ?Sized>(
    driver: &D,
    locator: &Locator,
    timeout: Duration,
) -> std::result::Result<(), OperationError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if driver.is_visible(locator).await? {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(OperationError::Timeout);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Build the driver selected by `config.target`.
pub fn connect(config: &ProbeConfig) -> Result<Arc<dyn Driver>> {
    match config.target {
        DriverTarget::Http => Ok(Arc::new(http::HttpDriver::new(config)?)),
        DriverTarget::Webdriver => Ok(Arc::new(webdriver::WebDriverDriver::new(config)?)),
        DriverTarget::Twin => Ok(Arc::new(twin::TwinDriver::api())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_into_data_unwraps_envelope() {
        let response = ApiResponse::new(200, json!({"success": true, "data": [{"id": "1"}]}));
        assert_eq!(response.into_data(), Ok(json!([{"id": "1"}])));
    }

    #[test]
    fn test_into_data_rejected_envelope() {
        let response = ApiResponse::new(200, json!({"success": false, "error": "duplicate name"}));
        assert_eq!(
            response.into_data(),
            Err(OperationError::Rejected("duplicate name".to_string()))
        );
    }

    #[test]
    fn test_into_data_status_mapping() {
        let unauth = ApiResponse::new(401, json!({"error": {"message": "login"}}));
        assert_eq!(unauth.into_data(), Err(OperationError::Unauthenticated));

        let conflict = ApiResponse::new(409, json!({"success": false, "error": "in use"}));
        assert_eq!(
            conflict.into_data(),
            Err(OperationError::Http {
                status: 409,
                message: "in use".to_string()
            })
        );
    }

    #[test]
    fn test_into_data_without_envelope() {
        let response = ApiResponse::new(200, json!({"id": "7", "name": "x"}));
        assert_eq!(response.into_data(), Ok(json!({"id": "7", "name": "x"})));
    }

    #[test]
    fn test_entity_id_accepts_numbers() {
        assert_eq!(entity_id(&json!({"id": 42})), Some("42".to_string()));
        assert_eq!(entity_id(&json!({"id": "abc"})), Some("abc".to_string()));
        assert_eq!(entity_id(&json!({"name": "x"})), None);
    }

    #[test]
    fn test_request_builders() {
        let request = ApiRequest::delete("/api/crops")
            .with_query("id", "c-1")
            .anonymous();
        assert_eq!(request.method, Method::Delete);
        assert_eq!(request.query_value("id"), Some("c-1"));
        assert!(request.anonymous);
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::test_id("x").to_string(), "testid=x");
        assert_eq!(Locator::text("Seed").to_string(), "text=Seed");
    }
}
