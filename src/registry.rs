//! Sandbox type registry.
//!
//! Maps an open-ended set of sandbox type tags to the implementation class
//! that serves them and its [`SandboxConfig`]. The registry is filled by an
//! explicit registration pass at startup ([`SandboxRegistry::with_builtins`]
//! plus any [`SandboxRegistry::register`] calls) and is shared read-only
//! behind an `Arc` once a manager owns it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{ManagerError, Result};

/// Tags declared at compile time. Anything else is a dynamic tag.
pub const BUILTIN_TYPES: &[&str] = &["base", "browser", "filesystem", "gui", "training"];

/// Image repository used for the built-in sandbox images.
const BUILTIN_IMAGE_REPOSITORY: &str = "sandpool/runtime";

/// Sandbox type tag.
///
/// Open-ended: new tags can be registered at runtime. Use
/// [`SandboxRegistry::contains`] before relying on a tag being known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SandboxType(String);

impl SandboxType {
    /// Creates a tag. Tags are case-insensitive and stored lowercase.
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(tag.as_ref().trim().to_lowercase())
    }

    /// The `base` tag, the default sandbox type.
    pub fn base() -> Self {
        Self::new("base")
    }

    /// Returns the tag string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for tags declared at compile time.
    pub fn is_builtin(&self) -> bool {
        BUILTIN_TYPES.contains(&self.0.as_str())
    }
}

impl Default for SandboxType {
    fn default() -> Self {
        Self::base()
    }
}

impl fmt::Display for SandboxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SandboxType {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(ManagerError::config("sandbox type tag must not be empty"));
        }
        Ok(Self::new(s))
    }
}

impl From<&str> for SandboxType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for SandboxType {
    fn from(tag: String) -> Self {
        Self::new(tag)
    }
}

impl From<SandboxType> for String {
    fn from(tag: SandboxType) -> Self {
        tag.0
    }
}

/// Resource limits requested for a sandbox type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit (e.g., "8g", "512m").
    #[serde(default)]
    pub memory: Option<String>,
    /// CPU limit in cores.
    #[serde(default)]
    pub cpus: Option<f64>,
}

/// Informational security level of a sandbox type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Trusted workloads.
    Low,
    /// Default.
    #[default]
    Medium,
    /// Untrusted workloads.
    High,
}

/// Immutable configuration attached to a registered sandbox type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Image reference used to create containers of this type.
    pub image_name: String,
    /// Tag this config is registered under.
    pub sandbox_type: SandboxType,
    /// Limits as requested at registration.
    pub resource_limits: Option<ResourceLimits>,
    /// Informational security level.
    pub security_level: SecurityLevel,
    /// Timeout in seconds.
    pub timeout: u64,
    /// Human description.
    pub description: String,
    /// Default environment. `None` marks a variable that must be supplied
    /// but has no value; creating a sandbox with it unset fails.
    pub environment: BTreeMap<String, Option<String>>,
    /// Backend runtime options, including normalized resource limits.
    pub runtime_config: Map<String, Value>,
}

/// Arguments to [`SandboxRegistry::register`].
#[derive(Debug, Clone)]
pub struct RegistrationSpec {
    class_name: String,
    image_name: String,
    sandbox_type: SandboxType,
    resource_limits: Option<ResourceLimits>,
    security_level: SecurityLevel,
    timeout: u64,
    description: String,
    environment: BTreeMap<String, Option<String>>,
    runtime_config: Map<String, Value>,
}

impl RegistrationSpec {
    /// Starts a registration for `class_name` serving `sandbox_type` from `image_name`.
    pub fn new(
        class_name: impl Into<String>,
        image_name: impl Into<String>,
        sandbox_type: impl Into<SandboxType>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            image_name: image_name.into(),
            sandbox_type: sandbox_type.into(),
            resource_limits: None,
            security_level: SecurityLevel::default(),
            timeout: 60,
            description: String::new(),
            environment: BTreeMap::new(),
            runtime_config: Map::new(),
        }
    }

    /// Sets resource limits.
    #[must_use]
    pub fn resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = Some(limits);
        self
    }

    /// Sets the security level.
    #[must_use]
    pub fn security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    /// Sets the timeout in seconds.
    #[must_use]
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a default environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.environment.insert(key.into(), value);
        self
    }

    /// Adds a runtime option (node selector, tolerations, `shm_size`, ...).
    #[must_use]
    pub fn runtime_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.runtime_config.insert(key.into(), value);
        self
    }
}

/// A registered implementation class and its config.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredSandbox {
    /// Implementation class name.
    pub class_name: String,
    /// Config computed at registration.
    pub config: SandboxConfig,
}

/// Process-wide table of sandbox types.
#[derive(Debug, Clone, Default)]
pub struct SandboxRegistry {
    /// type -> class
    classes: HashMap<SandboxType, String>,
    /// class -> config
    configs: HashMap<String, SandboxConfig>,
}

impl SandboxRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in sandbox types, with images
    /// tagged `image_tag`.
    pub fn with_builtins(image_tag: &str) -> Result<Self> {
        let mut registry = Self::new();
        for spec in builtin_specs(image_tag) {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    /// Registers a sandbox class.
    ///
    /// Resource limits are normalized into `mem_limit` (bytes) and
    /// `nano_cpus` runtime options here, once.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateSandboxType` if the tag is already registered, or
    /// `Config` if a resource limit cannot be parsed.
    pub fn register(&mut self, spec: RegistrationSpec) -> Result<()> {
        if self.classes.contains_key(&spec.sandbox_type) {
            return Err(ManagerError::duplicate_sandbox_type(spec.sandbox_type.as_str()));
        }

        let mut runtime_config = spec.runtime_config;
        if let Some(limits) = &spec.resource_limits {
            if let Some(memory) = &limits.memory {
                runtime_config.insert("mem_limit".to_string(), parse_memory_limit(memory)?.into());
            }
            if let Some(cpus) = limits.cpus {
                if cpus <= 0.0 {
                    return Err(ManagerError::config(format!("Invalid cpu limit: {cpus}")));
                }
                #[allow(clippy::cast_possible_truncation)]
                let nano_cpus = (cpus * 1_000_000_000.0) as i64;
                runtime_config.insert("nano_cpus".to_string(), nano_cpus.into());
            }
        }

        debug!(
            sandbox_type = %spec.sandbox_type,
            class = %spec.class_name,
            image = %spec.image_name,
            dynamic = !spec.sandbox_type.is_builtin(),
            "Registering sandbox type"
        );

        let config = SandboxConfig {
            image_name: spec.image_name,
            sandbox_type: spec.sandbox_type.clone(),
            resource_limits: spec.resource_limits,
            security_level: spec.security_level,
            timeout: spec.timeout,
            description: spec.description,
            environment: spec.environment,
            runtime_config,
        };

        self.configs.insert(spec.class_name.clone(), config);
        self.classes.insert(spec.sandbox_type, spec.class_name);
        Ok(())
    }

    /// Returns true if `sandbox_type` is registered.
    pub fn contains(&self, sandbox_type: &SandboxType) -> bool {
        self.classes.contains_key(sandbox_type)
    }

    /// Class registered for `sandbox_type`.
    pub fn classes_by_type(&self, sandbox_type: &SandboxType) -> Option<&str> {
        self.classes.get(sandbox_type).map(String::as_str)
    }

    /// Image registered for `sandbox_type`.
    pub fn image_by_type(&self, sandbox_type: &SandboxType) -> Option<&str> {
        self.config_by_type(sandbox_type)
            .map(|config| config.image_name.as_str())
    }

    /// Config registered for `sandbox_type`.
    pub fn config_by_type(&self, sandbox_type: &SandboxType) -> Option<&SandboxConfig> {
        self.classes
            .get(sandbox_type)
            .and_then(|class| self.configs.get(class))
    }

    /// All registered entries, sorted by tag.
    pub fn entries(&self) -> Vec<RegisteredSandbox> {
        let mut entries: Vec<_> = self
            .classes
            .values()
            .filter_map(|class| {
                self.configs.get(class).map(|config| RegisteredSandbox {
                    class_name: class.clone(),
                    config: config.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.config.sandbox_type.cmp(&b.config.sandbox_type));
        entries
    }
}

fn builtin_specs(image_tag: &str) -> Vec<RegistrationSpec> {
    let image = |name: &str| format!("{BUILTIN_IMAGE_REPOSITORY}-{name}:{image_tag}");

    vec![
        RegistrationSpec::new("BaseSandbox", image("base"), "base")
            .timeout(30)
            .description("Shell and Python execution"),
        RegistrationSpec::new("BrowserSandbox", image("browser"), "browser")
            .timeout(60)
            .resource_limits(ResourceLimits {
                memory: Some("2g".to_string()),
                cpus: None,
            })
            .runtime_option("shm_size", Value::String("2g".to_string()))
            .description("Headless browser automation"),
        RegistrationSpec::new("FilesystemSandbox", image("filesystem"), "filesystem")
            .timeout(60)
            .description("Filesystem tools over the mounted workspace"),
        RegistrationSpec::new("GuiSandbox", image("gui"), "gui")
            .timeout(60)
            .resource_limits(ResourceLimits {
                memory: Some("4g".to_string()),
                cpus: Some(2.0),
            })
            .description("Desktop GUI session"),
        RegistrationSpec::new("TrainingSandbox", image("training"), "training")
            .timeout(300)
            .security_level(SecurityLevel::High)
            .env("INSTANCE_ID", Some("default".to_string()))
            .description("Training environment server"),
    ]
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
pub(crate) fn parse_memory_limit(limit: &str) -> Result<i64> {
    let limit = limit.trim().to_lowercase();
    let invalid = || ManagerError::config(format!("Invalid memory limit: {limit}"));

    let (num, unit) = if let Some(num) = limit.strip_suffix('g') {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        (num, 1024 * 1024)
    } else {
        (limit.as_str(), 1)
    };

    let value: i64 = num.parse().map_err(|_| invalid())?;
    if value <= 0 {
        return Err(invalid());
    }
    value.checked_mul(unit).ok_or_else(invalid)
}
