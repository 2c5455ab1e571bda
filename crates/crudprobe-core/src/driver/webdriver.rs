//! Browser automation over the W3C WebDriver protocol.
//!
//! The driver talks to a WebDriver endpoint (chromedriver, geckodriver) with
//! plain JSON requests. `call` runs `fetch` inside the page so REST calls
//! share the browser session's cookies. The tenant is selected by writing the
//! application's storage key and reloading.

use std::{
    sync::{PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    poll_visible, ApiRequest, ApiResponse, Artifact, Driver, DriverKind, Locator, TenantId,
    POLL_INTERVAL,
};
use crate::{
    config::{AuthConfig, ProbeConfig},
    error::OperationError,
    Error, Result,
};

type OpResult<T> = std::result::Result<T, OperationError>;

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const FETCH_SCRIPT: &str = r"
const [method, url, headers, body, credentials, done] = arguments;
fetch(url, { method, headers, body, credentials })
  .then(async (r) => done({ status: r.status, text: await r.text() }))
  .catch((e) => done({ status: 0, text: String(e) }));
";

/// WebDriver-backed UI driver.
#[derive(Debug)]
pub struct WebDriverDriver {
    client: reqwest::Client,
    webdriver_url: String,
    app_url: String,
    browser: String,
    tenant_header: String,
    tenant_storage_key: String,
    settle_timeout: Duration,
    auth: AuthConfig,
    session: Mutex<Option<String>>,
    tenant: RwLock<Option<TenantId>>,
    token: RwLock<Option<String>>,
}

/// Locator to a W3C `(using, value)` strategy pair.
fn strategy(locator: &Locator) -> (&'static str, String) {
    match locator {
        Locator::TestId(id) => ("css selector", format!("[data-testid=\"{id}\"]")),
        Locator::Text(text) => (
            "xpath",
            format!("//*[normalize-space(text())={}]", xpath_literal(text)),
        ),
        Locator::Css(css) => ("css selector", css.clone()),
    }
}

/// Quote `text` as an XPath string literal.
fn xpath_literal(text: &str) -> String {
    if !text.contains('"') {
        format!("\"{text}\"")
    } else if !text.contains('\'') {
        format!("'{text}'")
    } else {
        let parts: Vec<String> = text.split('"').map(|p| format!("\"{p}\"")).collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}

fn element_id(value: &Value) -> Option<String> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Map a W3C error payload to an operation error.
fn protocol_error(status: u16, value: &Value) -> OperationError {
    let code = value.get("error").and_then(Value::as_str).unwrap_or_default();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(code)
        .to_string();
    match code {
        "no such element" | "stale element reference" => OperationError::ElementNotFound(message),
        "timeout" | "script timeout" => OperationError::Timeout,
        _ => OperationError::Http { status, message },
    }
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl WebDriverDriver {
    /// Build a driver from configuration. The browser session is opened
    /// lazily on first use.
    ///
    /// # Errors
    ///
    /// Returns `Error::Setup` if the HTTP client cannot be constructed.
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout())
            .build()
            .map_err(|e| Error::Setup(format!("failed to build WebDriver client: {e}")))?;
        let token = match &config.auth {
            AuthConfig::Bearer { token } => Some(token.clone()),
            AuthConfig::None | AuthConfig::Login { .. } => None,
        };
        Ok(Self {
            client,
            webdriver_url: config.webdriver.url.trim_end_matches('/').to_string(),
            app_url: config.base_url.trim_end_matches('/').to_string(),
            browser: config.webdriver.browser.clone(),
            tenant_header: config.tenant_header.clone(),
            tenant_storage_key: config.webdriver.tenant_storage_key.clone(),
            settle_timeout: config.settle_timeout(),
            auth: config.auth.clone(),
            session: Mutex::new(None),
            tenant: RwLock::new(None),
            token: RwLock::new(token),
        })
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: String,
        body: Option<Value>,
    ) -> OpResult<Value> {
        let mut builder = self.client.request(method, url);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                OperationError::Timeout
            } else {
                OperationError::Transport(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| OperationError::Decode(e.to_string()))?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);
        if status >= 400 {
            return Err(protocol_error(status, &value));
        }
        Ok(value)
    }

    async fn session_id(&self) -> OpResult<String> {
        let mut session = self.session.lock().await;
        if let Some(id) = session.as_ref() {
            return Ok(id.clone());
        }
        let capabilities = json!({
            "capabilities": {"alwaysMatch": {"browserName": self.browser}}
        });
        let value = self
            .send(
                reqwest::Method::POST,
                format!("{}/session", self.webdriver_url),
                Some(capabilities),
            )
            .await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| OperationError::Decode("new session carries no id".to_string()))?;
        info!(session = %id, browser = %self.browser, "WebDriver session opened");
        *session = Some(id.clone());
        Ok(id)
    }

    async fn command(
        &self,
        method: reqwest::Method,
        suffix: &str,
        body: Option<Value>,
    ) -> OpResult<Value> {
        let session = self.session_id().await?;
        let url = format!("{}/session/{session}/{suffix}", self.webdriver_url);
        self.send(method, url, body).await
    }

    async fn execute(&self, script: &str, args: Value) -> OpResult<Value> {
        self.command(
            reqwest::Method::POST,
            "execute/sync",
            Some(json!({"script": script, "args": args})),
        )
        .await
    }

    async fn find(&self, locator: &Locator) -> OpResult<Option<String>> {
        let (using, value) = strategy(locator);
        let found = self
            .command(
                reqwest::Method::POST,
                "elements",
                Some(json!({"using": using, "value": value})),
            )
            .await?;
        Ok(found
            .as_array()
            .and_then(|elements| elements.iter().find_map(element_id)))
    }

    async fn require(&self, locator: &Locator) -> OpResult<String> {
        self.find(locator)
            .await?
            .ok_or_else(|| OperationError::ElementNotFound(locator.to_string()))
    }

    async fn wait_ready(&self) -> OpResult<()> {
        let deadline = tokio::time::Instant::now() + self.settle_timeout;
        loop {
            let state = self.execute("return document.readyState;", json!([])).await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(OperationError::Timeout);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Make sure the browser is on the application origin so storage and
    /// in-page fetches target it.
    async fn ensure_on_app(&self) -> OpResult<()> {
        let current = self.command(reqwest::Method::GET, "url", None).await?;
        if current
            .as_str()
            .is_some_and(|url| url.starts_with(&self.app_url))
        {
            return Ok(());
        }
        self.navigate("/").await
    }

    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn request_url(&self, request: &ApiRequest) -> OpResult<String> {
        let base = format!("{}{}", self.app_url, request.path);
        reqwest::Url::parse_with_params(&base, &request.query)
            .map(String::from)
            .map_err(|e| OperationError::Decode(format!("invalid request URL {base}: {e}")))
    }
}

#[async_trait]
impl Driver for WebDriverDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Ui
    }

    async fn navigate(&self, path: &str) -> OpResult<()> {
        let url = format!("{}{path}", self.app_url);
        debug!(%url, "navigate");
        self.command(reqwest::Method::POST, "url", Some(json!({"url": url})))
            .await?;
        self.wait_ready().await
    }

    async fn act(&self, trigger: &Locator) -> OpResult<()> {
        let element = self.require(trigger).await?;
        self.command(
            reqwest::Method::POST,
            &format!("element/{element}/click"),
            Some(json!({})),
        )
        .await
        .map(|_| ())
    }

    async fn set_field(&self, name: &str, value: &Value) -> OpResult<()> {
        let element = self
            .require(&Locator::Css(format!("[name=\"{name}\"]")))
            .await?;
        self.command(
            reqwest::Method::POST,
            &format!("element/{element}/clear"),
            Some(json!({})),
        )
        .await?;
        self.command(
            reqwest::Method::POST,
            &format!("element/{element}/value"),
            Some(json!({"text": field_text(value)})),
        )
        .await
        .map(|_| ())
    }

    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> OpResult<()> {
        poll_visible(self, locator, timeout).await
    }

    async fn is_visible(&self, locator: &Locator) -> OpResult<bool> {
        let Some(element) = self.find(locator).await? else {
            return Ok(false);
        };
        match self
            .command(
                reqwest::Method::GET,
                &format!("element/{element}/displayed"),
                None,
            )
            .await
        {
            Ok(displayed) => Ok(displayed.as_bool().unwrap_or(false)),
            Err(OperationError::ElementNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn call(&self, request: ApiRequest) -> OpResult<ApiResponse> {
        let url = self.request_url(&request)?;
        let mut headers = serde_json::Map::new();
        headers.insert(
            "Content-Type".to_string(),
            Value::String("application/json".to_string()),
        );
        if let Some(tenant) = self.active_tenant() {
            headers.insert(
                self.tenant_header.clone(),
                Value::String(tenant.as_str().to_string()),
            );
        }
        if !request.anonymous {
            if let Some(token) = self.token() {
                headers.insert(
                    "Authorization".to_string(),
                    Value::String(format!("Bearer {token}")),
                );
            }
        }
        for (name, value) in &request.headers {
            headers.insert(name.clone(), Value::String(value.clone()));
        }
        let body = request.body.as_ref().map(Value::to_string);
        let credentials = if request.anonymous { "omit" } else { "include" };

        let result = self
            .command(
                reqwest::Method::POST,
                "execute/async",
                Some(json!({
                    "script": FETCH_SCRIPT,
                    "args": [request.method.to_string(), url, headers, body, credentials],
                })),
            )
            .await?;
        let status = result
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(0);
        let text = result.get("text").and_then(Value::as_str).unwrap_or_default();
        if status == 0 {
            return Err(OperationError::Transport(text.to_string()));
        }
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        };
        debug!(method = %request.method, path = %request.path, status, "in-page call");
        Ok(ApiResponse::new(status, body))
    }

    async fn switch_tenant(&self, tenant: Option<&TenantId>) -> OpResult<()> {
        self.ensure_on_app().await?;
        match tenant {
            Some(tenant) => {
                self.execute(
                    "localStorage.setItem(arguments[0], arguments[1]);",
                    json!([self.tenant_storage_key, tenant.as_str()]),
                )
                .await?;
            }
            None => {
                self.execute(
                    "localStorage.removeItem(arguments[0]);",
                    json!([self.tenant_storage_key]),
                )
                .await?;
            }
        }
        self.command(reqwest::Method::POST, "refresh", Some(json!({})))
            .await?;
        self.wait_ready().await?;
        *self.tenant.write().unwrap_or_else(PoisonError::into_inner) = tenant.cloned();
        Ok(())
    }

    fn active_tenant(&self) -> Option<TenantId> {
        self.tenant
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn authenticate(&self) -> OpResult<()> {
        self.ensure_on_app().await?;
        let AuthConfig::Login {
            path,
            email,
            password,
        } = &self.auth
        else {
            return Ok(());
        };
        let data = self
            .call(ApiRequest::post(
                path.clone(),
                json!({"email": email, "password": password}),
            ))
            .await?
            .into_data()?;
        if let Some(token) = data.get("token").and_then(Value::as_str) {
            *self.token.write().unwrap_or_else(PoisonError::into_inner) =
                Some(token.to_string());
        }
        Ok(())
    }

    async fn snapshot(&self) -> OpResult<Artifact> {
        let source = self.command(reqwest::Method::GET, "source", None).await?;
        Ok(Artifact::html(field_text(&source)))
    }

    async fn shutdown(&self) -> OpResult<()> {
        let Some(id) = self.session.lock().await.take() else {
            return Ok(());
        };
        let url = format!("{}/session/{id}", self.webdriver_url);
        if let Err(err) = self.send(reqwest::Method::DELETE, url, None).await {
            warn!(session = %id, error = %err, "failed to close WebDriver session");
            return Err(err);
        }
        info!(session = %id, "WebDriver session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_for_test_id() {
        assert_eq!(
            strategy(&Locator::test_id("crops-create")),
            ("css selector", "[data-testid=\"crops-create\"]".to_string())
        );
    }

    #[test]
    fn test_strategy_for_text_uses_xpath() {
        let (using, value) = strategy(&Locator::text("AUTO_TEST_Crop_1"));
        assert_eq!(using, "xpath");
        assert_eq!(value, "//*[normalize-space(text())=\"AUTO_TEST_Crop_1\"]");
    }

    #[test]
    fn test_xpath_literal_quoting() {
        assert_eq!(xpath_literal("plain"), "\"plain\"");
        assert_eq!(xpath_literal("say \"hi\""), "'say \"hi\"'");
        assert_eq!(
            xpath_literal("it's \"x\""),
            "concat(\"it's \", '\"', \"x\", '\"', \"\")"
        );
    }

    #[test]
    fn test_element_id_extraction() {
        let value = json!({ELEMENT_KEY: "abc"});
        assert_eq!(element_id(&value), Some("abc".to_string()));
        assert_eq!(element_id(&json!({})), None);
    }

    #[test]
    fn test_protocol_error_mapping() {
        let missing = protocol_error(404, &json!({"error": "no such element", "message": "gone"}));
        assert_eq!(missing, OperationError::ElementNotFound("gone".to_string()));
        assert_eq!(
            protocol_error(500, &json!({"error": "script timeout"})),
            OperationError::Timeout
        );
    }

    #[test]
    fn test_request_url_encodes_query() -> Result<()> {
        let driver = WebDriverDriver::new(&ProbeConfig::default())?;
        let url = driver.request_url(&ApiRequest::delete("/api/crops").with_query("id", "a b"))?;
        assert_eq!(url, "http://localhost:3000/api/crops?id=a+b");
        Ok(())
    }

    #[test]
    fn test_field_text() {
        assert_eq!(field_text(&json!("x")), "x");
        assert_eq!(field_text(&json!(12)), "12");
        assert_eq!(field_text(&Value::Null), "");
    }
}
