//! Configuration loading and validation
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. TOML file: `--config <path>`, else `./crudprobe.toml` when present
//! 3. Environment variables: `CRUDPROBE_*`
//! 4. CLI flags (applied by the binary, followed by [`ProbeConfig::validate`])
//!
//! # Example Config
//!
//! ```toml
//! base_url = "http://localhost:3000"
//! tenant_header = "X-Farm-ID"
//! retries = 1
//!
//! [tenants]
//! primary = "farm-a"
//! secondary = "farm-b"
//!
//! [auth]
//! mode = "login"
//! path = "/api/auth/login"
//! email = "probe@example.test"
//! password = "secret"
//!
//! [stress]
//! operations = 10
//! threshold = 0.7
//!
//! [entities.seedVariety]
//! base_path = "/inventory/seeds"
//! ```

use std::{collections::BTreeMap, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{driver::TenantId, registry::EntityRegistry, Error, Result};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "crudprobe.toml";

const MIN_TIMEOUT_MS: u64 = 100;
const MAX_TIMEOUT_MS: u64 = 600_000;

/// `FromStr`-backed deserialization shared by the policy enums.
macro_rules! deserialize_via_from_str {
    ($ty:ty) => {
        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::from_str(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Which driver variant a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverTarget {
    #[default]
    Http,
    Webdriver,
    Twin,
}

impl FromStr for DriverTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "http" | "api" => Ok(Self::Http),
            "webdriver" | "ui" | "browser" => Ok(Self::Webdriver),
            "twin" => Ok(Self::Twin),
            _ => Err(Error::Config(format!(
                "Invalid target: {s}. Must be one of: http, webdriver, twin"
            ))),
        }
    }
}

deserialize_via_from_str!(DriverTarget);

/// How a `"restricted"` cascade outcome is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RestrictedPolicy {
    /// Blocking deletion of a referenced parent is acceptable
    #[default]
    Pass,
    /// The deployment requires cascading deletes
    Fail,
}

impl FromStr for RestrictedPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            _ => Err(Error::Config(format!(
                "Invalid restricted policy: {s}. Must be one of: pass, fail"
            ))),
        }
    }
}

deserialize_via_from_str!(RestrictedPolicy);

/// Which array elements the structural validator inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArraySampling {
    /// Only the first element is checked against the element shape
    #[default]
    First,
    /// Every element is checked
    All,
}

impl FromStr for ArraySampling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "first" => Ok(Self::First),
            "all" => Ok(Self::All),
            _ => Err(Error::Config(format!(
                "Invalid array sampling: {s}. Must be one of: first, all"
            ))),
        }
    }
}

deserialize_via_from_str!(ArraySampling);

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    pub target: DriverTarget,
    pub base_url: String,
    pub tenant_header: String,
    pub tenants: TenantsConfig,
    pub auth: AuthConfig,
    pub call_timeout_ms: u64,
    pub settle_timeout_ms: u64,
    pub artifacts_dir: String,
    pub retries: u32,
    pub stress: StressConfig,
    pub shape: ShapeConfig,
    pub cascade: CascadeConfig,
    pub webdriver: WebDriverConfig,
    pub entities: BTreeMap<String, EntityOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TenantsConfig {
    pub primary: String,
    pub secondary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Login {
        path: String,
        email: String,
        password: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StressConfig {
    pub entity: String,
    pub operations: usize,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ShapeConfig {
    pub array_sampling: ArraySampling,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CascadeConfig {
    pub restricted: RestrictedPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebDriverConfig {
    pub url: String,
    pub browser: String,
    /// localStorage key the application reads the selected farm from
    pub tenant_storage_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct EntityOverride {
    pub base_path: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target: DriverTarget::default(),
            base_url: "http://localhost:3000".to_string(),
            tenant_header: "X-Farm-ID".to_string(),
            tenants: TenantsConfig::default(),
            auth: AuthConfig::default(),
            call_timeout_ms: 10_000,
            settle_timeout_ms: 5_000,
            artifacts_dir: "probe-artifacts".to_string(),
            retries: 0,
            stress: StressConfig::default(),
            shape: ShapeConfig::default(),
            cascade: CascadeConfig::default(),
            webdriver: WebDriverConfig::default(),
            entities: BTreeMap::new(),
        }
    }
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self {
            primary: "farm-a".to_string(),
            secondary: "farm-b".to_string(),
        }
    }
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            entity: "seedVariety".to_string(),
            operations: 10,
            threshold: 0.7,
        }
    }
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9515".to_string(),
            browser: "chrome".to_string(),
            tenant_storage_key: "selectedFarmId".to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration: defaults, then the TOML file, then `CRUDPROBE_*` env vars.
///
/// An explicit `path` must exist; the implicit `./crudprobe.toml` is optional.
///
/// # Errors
///
/// Returns `Error::Io` for an unreadable explicit file, `Error::Parse` for
/// malformed TOML, and `Error::Config` when the merged result is invalid.
pub async fn load_config(path: Option<&Path>) -> Result<ProbeConfig> {
    let mut config = match path {
        Some(path) => load_toml_file(path).await?,
        None => {
            let implicit = Path::new(DEFAULT_CONFIG_FILE);
            if tokio::fs::try_exists(implicit).await.unwrap_or(false) {
                load_toml_file(implicit).await?
            } else {
                ProbeConfig::default()
            }
        }
    };
    config.apply_env_vars()?;
    config.validate()?;
    Ok(config)
}

async fn load_toml_file(path: &Path) -> Result<ProbeConfig> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Io(format!("Failed to read config {}: {e}", path.display())))?;
    ProbeConfig::from_toml(&contents)
}

impl ProbeConfig {
    /// Parse a TOML document over the defaults.
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `CRUDPROBE_*` environment overrides.
    fn apply_env_vars(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("CRUDPROBE_TARGET") {
            self.target = value.parse()?;
        }
        if let Ok(value) = std::env::var("CRUDPROBE_BASE_URL") {
            self.base_url = value;
        }
        if let Ok(value) = std::env::var("CRUDPROBE_TOKEN") {
            self.auth = AuthConfig::Bearer { token: value };
        }
        if let Ok(value) = std::env::var("CRUDPROBE_TENANT_A") {
            self.tenants.primary = value;
        }
        if let Ok(value) = std::env::var("CRUDPROBE_TENANT_B") {
            self.tenants.secondary = value;
        }
        if let Ok(value) = std::env::var("CRUDPROBE_CALL_TIMEOUT_MS") {
            self.call_timeout_ms = value
                .parse()
                .map_err(|e| Error::Config(format!("CRUDPROBE_CALL_TIMEOUT_MS: {e}")))?;
        }
        if let Ok(value) = std::env::var("CRUDPROBE_STRESS_THRESHOLD") {
            self.stress.threshold = value
                .parse()
                .map_err(|e| Error::Config(format!("CRUDPROBE_STRESS_THRESHOLD: {e}")))?;
        }
        if let Ok(value) = std::env::var("CRUDPROBE_ARTIFACTS_DIR") {
            self.artifacts_dir = value;
        }
        if let Ok(value) = std::env::var("CRUDPROBE_WEBDRIVER_URL") {
            self.webdriver.url = value;
        }
        Ok(())
    }

    /// Check ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.stress.threshold)?;
        if self.stress.operations == 0 {
            return Err(Error::Config(
                "stress.operations must be greater than 0".to_string(),
            ));
        }
        for (name, value) in [
            ("call_timeout_ms", self.call_timeout_ms),
            ("settle_timeout_ms", self.settle_timeout_ms),
        ] {
            if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&value) {
                return Err(Error::Config(format!(
                    "{name} must be between {MIN_TIMEOUT_MS} and {MAX_TIMEOUT_MS}, got {value}"
                )));
            }
        }
        if self.tenants.primary.trim().is_empty() || self.tenants.secondary.trim().is_empty() {
            return Err(Error::Config("tenant ids must not be empty".to_string()));
        }
        if self.tenants.primary == self.tenants.secondary {
            return Err(Error::Config(format!(
                "tenants.primary and tenants.secondary must differ (both '{}')",
                self.tenants.primary
            )));
        }
        if self.tenant_header.trim().is_empty() {
            return Err(Error::Config("tenant_header must not be empty".to_string()));
        }
        Ok(())
    }

    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub const fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn tenant_a(&self) -> TenantId {
        TenantId::new(self.tenants.primary.clone())
    }

    pub fn tenant_b(&self) -> TenantId {
        TenantId::new(self.tenants.secondary.clone())
    }

    /// Apply `[entities.*]` overrides to a registry.
    ///
    /// # Errors
    ///
    /// Returns `Error::Registration` when a key names no registered entity type.
    pub fn apply_entity_overrides(&self, registry: &mut EntityRegistry) -> Result<()> {
        for (type_name, entity) in &self.entities {
            if let Some(base_path) = &entity.base_path {
                registry.override_base_path(type_name, base_path)?;
            }
        }
        Ok(())
    }
}

/// Thresholds are fractions of successful operations.
pub fn validate_threshold(threshold: f64) -> Result<()> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "stress threshold must be within [0, 1], got {threshold}"
        )))
    }
}
