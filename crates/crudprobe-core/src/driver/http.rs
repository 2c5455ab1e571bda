//! REST driver over `reqwest`.
//!
//! Every call carries the active tenant in the configured header and, unless
//! the request is anonymous, the bearer credential. Anonymous requests go
//! through a second client without a cookie store, so a login session never
//! leaks into them. UI capabilities are not available on this driver.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{ApiRequest, ApiResponse, Artifact, Driver, DriverKind, Locator, Method, TenantId};
use crate::{
    config::{AuthConfig, ProbeConfig},
    error::OperationError,
    Error, Result,
};

type OpResult<T> = std::result::Result<T, OperationError>;

/// Direct REST driver.
#[derive(Debug)]
pub struct HttpDriver {
    client: reqwest::Client,
    anonymous_client: reqwest::Client,
    base_url: String,
    tenant_header: String,
    auth: AuthConfig,
    tenant: RwLock<Option<TenantId>>,
    token: RwLock<Option<String>>,
    last_exchange: RwLock<Option<Value>>,
}

impl HttpDriver {
    /// Build a driver from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Setup` if an HTTP client cannot be constructed.
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let build = |cookies: bool| {
            reqwest::Client::builder()
                .timeout(config.call_timeout())
                .cookie_store(cookies)
                .build()
                .map_err(|e| Error::Setup(format!("failed to build HTTP client: {e}")))
        };
        let client = build(true)?;
        let anonymous_client = build(false)?;
        let token = match &config.auth {
            AuthConfig::Bearer { token } => Some(token.clone()),
            AuthConfig::None | AuthConfig::Login { .. } => None,
        };
        Ok(Self {
            client,
            anonymous_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tenant_header: config.tenant_header.clone(),
            auth: config.auth.clone(),
            tenant: RwLock::new(None),
            token: RwLock::new(token),
            last_exchange: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_exchange(&self, request: &ApiRequest, response: &ApiResponse) {
        let exchange = json!({
            "request": {
                "method": request.method.to_string(),
                "path": request.path,
                "query": request.query,
                "body": request.body,
            },
            "response": {
                "status": response.status,
                "body": response.body,
            },
        });
        *self
            .last_exchange
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(exchange);
    }

    async fn send(&self, client: &reqwest::Client, request: ApiRequest) -> OpResult<ApiResponse> {
        let mut builder = client
            .request(reqwest_method(request.method), self.url(&request.path))
            .query(&request.query);
        if let Some(tenant) = self.active_tenant() {
            builder = builder.header(self.tenant_header.as_str(), tenant.as_str());
        }
        if !request.anonymous {
            if let Some(token) = self.token() {
                builder = builder.bearer_auth(token);
            }
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| transport_error(&e))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| transport_error(&e))?;
        let response = ApiResponse::new(status, parse_body(&text));
        debug!(method = %request.method, path = %request.path, status, "http call");
        self.record_exchange(&request, &response);
        Ok(response)
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn transport_error(err: &reqwest::Error) -> OperationError {
    if err.is_timeout() {
        OperationError::Timeout
    } else {
        OperationError::Transport(err.to_string())
    }
}

/// Parse a body as JSON, keeping non-JSON text as a string value.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[async_trait]
impl Driver for HttpDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Api
    }

    async fn navigate(&self, _path: &str) -> OpResult<()> {
        Err(OperationError::Unsupported("navigate"))
    }

    async fn act(&self, _trigger: &Locator) -> OpResult<()> {
        Err(OperationError::Unsupported("act"))
    }

    async fn set_field(&self, _name: &str, _value: &Value) -> OpResult<()> {
        Err(OperationError::Unsupported("set_field"))
    }

    async fn wait_for_visible(
        &self,
        _locator: &Locator,
        _timeout: std::time::Duration,
    ) -> OpResult<()> {
        Err(OperationError::Unsupported("wait_for_visible"))
    }

    async fn is_visible(&self, _locator: &Locator) -> OpResult<bool> {
        Err(OperationError::Unsupported("is_visible"))
    }

    async fn call(&self, request: ApiRequest) -> OpResult<ApiResponse> {
        let client = if request.anonymous {
            &self.anonymous_client
        } else {
            &self.client
        };
        self.send(client, request).await
    }

    async fn switch_tenant(&self, tenant: Option<&TenantId>) -> OpResult<()> {
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
        let AuthConfig::Login {
            path,
            email,
            password,
        } = &self.auth
        else {
            return Ok(());
        };
        // Sent without a bearer but through the session client, whose cookie
        // store keeps a cookie session.
        let login = ApiRequest::post(path.clone(), json!({"email": email, "password": password}))
            .anonymous();
        let data = self.send(&self.client, login).await?.into_data()?;
        if let Some(token) = data.get("token").and_then(Value::as_str) {
            *self.token.write().unwrap_or_else(PoisonError::into_inner) =
                Some(token.to_string());
        }
        Ok(())
    }

    async fn snapshot(&self) -> OpResult<Artifact> {
        let exchange = self
            .last_exchange
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| json!({}));
        Ok(Artifact::json(&exchange))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(base_url: &str) -> Result<HttpDriver> {
        HttpDriver::new(&ProbeConfig {
            base_url: base_url.to_string(),
            auth: AuthConfig::Bearer {
                token: "secret".to_string(),
            },
            ..ProbeConfig::default()
        })
    }

    #[test]
    fn test_url_joins_paths() -> Result<()> {
        let driver = driver("http://localhost:3000/")?;
        assert_eq!(driver.url("/api/crops"), "http://localhost:3000/api/crops");
        assert_eq!(driver.url("api/crops"), "http://localhost:3000/api/crops");
        Ok(())
    }

    #[test]
    fn test_bearer_token_preset() -> Result<()> {
        let driver = driver("http://localhost:3000")?;
        assert_eq!(driver.token().as_deref(), Some("secret"));
        Ok(())
    }

    #[test]
    fn test_parse_body_keeps_text() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_body("Bad Gateway"), json!("Bad Gateway"));
    }

    #[tokio::test]
    async fn test_ui_capabilities_unsupported() -> Result<()> {
        let driver = driver("http://localhost:3000")?;
        assert_eq!(
            driver.act(&Locator::test_id("x")).await,
            Err(OperationError::Unsupported("act"))
        );
        assert_eq!(driver.kind(), DriverKind::Api);
        Ok(())
    }

    #[tokio::test]
    async fn test_tenant_switch() -> Result<()> {
        let driver = driver("http://localhost:3000")?;
        driver.switch_tenant(Some(&TenantId::new("farm-a"))).await?;
        assert_eq!(driver.active_tenant(), Some(TenantId::new("farm-a")));
        driver.switch_tenant(None).await?;
        assert_eq!(driver.active_tenant(), None);
        Ok(())
    }
}
