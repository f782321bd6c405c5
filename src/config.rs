//! Configuration for the relay and the chat binary.
//!
//! Settings are layered, lowest precedence first: built-in defaults, the
//! `AZURE_AI_FOUNDRY_*` environment variables, an optional YAML file, and the
//! command line.  The three required settings (endpoint, key, agent id) are
//! checked once when the layers are resolved; a missing or invalid value is a
//! [`Error::Configuration`] and must stop startup.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Environment variable holding the project endpoint URL.
pub const ENDPOINT_VAR: &str = "AZURE_AI_FOUNDRY_ENDPOINT";
/// Environment variable holding the access key.
pub const API_KEY_VAR: &str = "AZURE_AI_FOUNDRY_API_KEY";
/// Environment variable holding the agent identifier.
pub const AGENT_ID_VAR: &str = "AZURE_AI_FOUNDRY_AGENT_ID";

const DEFAULT_API_VERSION: &str = "v1";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Default bound on one turn, submission and streaming together.
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How the access key is presented to the service.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    #[default]
    Bearer,

    /// `api-key: <key>`
    ApiKey,
}

/// How replies are obtained from the agent.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Stream run events and forward text deltas as they arrive.
    #[default]
    Stream,

    /// Poll the run until it finishes, then deliver the reply in one piece.
    Poll,
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::Stream => f.write_str("stream"),
            ResponseMode::Poll => f.write_str("poll"),
        }
    }
}

impl FromStr for ResponseMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stream" => Ok(ResponseMode::Stream),
            "poll" => Ok(ResponseMode::Poll),
            _ => Err(Error::configuration(
                format!("unknown response mode '{s}' (expected stream or poll)"),
                Some("mode".to_string()),
            )),
        }
    }
}

/// Resolved configuration for talking to one hosted agent.
#[derive(Clone, PartialEq)]
pub struct RelayConfig {
    /// Base URL of the agents project endpoint.
    pub endpoint: Url,
    /// Access key.
    pub api_key: String,
    /// Identifier of the agent that answers messages.
    pub agent_id: String,
    /// Value of the `api-version` query parameter.
    pub api_version: String,
    /// How the key is sent.
    pub auth: AuthScheme,
    /// Timeout applied to every HTTP request.
    pub request_timeout: Duration,
    /// Deadline for one whole turn, submission through last fragment.
    pub turn_timeout: Duration,
    /// Interval between run status checks in poll mode.
    pub poll_interval: Duration,
    /// Streaming or polling.
    pub mode: ResponseMode,
}

// Keep the key out of debug output.
impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"<redacted>")
            .field("agent_id", &self.agent_id)
            .field("api_version", &self.api_version)
            .field("auth", &self.auth)
            .field("request_timeout", &self.request_timeout)
            .field("turn_timeout", &self.turn_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("mode", &self.mode)
            .finish()
    }
}

impl RelayConfig {
    /// Creates a configuration with default timeouts and streaming mode.
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Result<Self> {
        ConfigLayer {
            endpoint: Some(endpoint.to_string()),
            api_key: Some(api_key.into()),
            agent_id: Some(agent_id.into()),
            ..ConfigLayer::default()
        }
        .resolve()
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        ConfigLayer::from_env().resolve()
    }

    /// Sets the per-turn deadline.
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    /// Sets the HTTP request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the poll-mode status check interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the response mode.
    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the authentication scheme.
    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.auth = auth;
        self
    }
}

/// One partially specified source of configuration.
///
/// Layers are merged with [`ConfigLayer::merge`], where values in the later
/// layer win, and then [`ConfigLayer::resolve`]d into a [`RelayConfig`].
/// The YAML config file deserializes directly into this type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    /// Project endpoint URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Access key.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Agent identifier.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// API version query parameter.
    #[serde(default)]
    pub api_version: Option<String>,
    /// Authentication scheme.
    #[serde(default)]
    pub auth: Option<AuthScheme>,
    /// HTTP request timeout in seconds.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Turn deadline in seconds.
    #[serde(default)]
    pub turn_timeout_secs: Option<u64>,
    /// Poll interval in milliseconds.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Response mode.
    #[serde(default)]
    pub mode: Option<ResponseMode>,
}

impl ConfigLayer {
    /// Reads the three required settings from the process environment.
    pub fn from_env() -> Self {
        let vars = [ENDPOINT_VAR, API_KEY_VAR, AGENT_ID_VAR]
            .into_iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
            .collect();
        Self::from_vars(&vars)
    }

    /// Builds a layer from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |name: &str| {
            vars.get(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            endpoint: get(ENDPOINT_VAR),
            api_key: get(API_KEY_VAR),
            agent_id: get(AGENT_ID_VAR),
            ..Self::default()
        }
    }

    /// Loads a layer from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::io(
                format!("failed to read config file {}", path.display()),
                err,
            )
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parses a layer from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|err| {
            Error::configuration(format!("invalid config file: {err}"), None)
        })
    }

    /// Overlays `other` on top of `self`.
    pub fn merge(self, other: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            endpoint: other.endpoint.or(self.endpoint),
            api_key: other.api_key.or(self.api_key),
            agent_id: other.agent_id.or(self.agent_id),
            api_version: other.api_version.or(self.api_version),
            auth: other.auth.or(self.auth),
            request_timeout_secs: other.request_timeout_secs.or(self.request_timeout_secs),
            turn_timeout_secs: other.turn_timeout_secs.or(self.turn_timeout_secs),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            mode: other.mode.or(self.mode),
        }
    }

    /// Validates the layer and fills in defaults.
    ///
    /// Every missing required setting is named in a single error.
    pub fn resolve(self) -> Result<RelayConfig> {
        let mut missing = Vec::new();
        if self.endpoint.is_none() {
            missing.push(ENDPOINT_VAR);
        }
        if self.api_key.is_none() {
            missing.push(API_KEY_VAR);
        }
        if self.agent_id.is_none() {
            missing.push(AGENT_ID_VAR);
        }
        let (Some(endpoint), Some(api_key), Some(agent_id)) =
            (self.endpoint, self.api_key, self.agent_id)
        else {
            let list = missing
                .iter()
                .map(|name| format!("- {name}"))
                .collect::<Vec<_>>()
                .join("\n");
            return Err(Error::configuration(
                format!(
                    "Missing required configuration. Please ensure you have set:\n{list}"
                ),
                Some(missing.join(",")),
            ));
        };

        let endpoint = parse_endpoint(&endpoint)?;
        if api_key.trim().is_empty() {
            return Err(Error::configuration(
                "access key is empty",
                Some(API_KEY_VAR.to_string()),
            ));
        }
        if agent_id.trim().is_empty() {
            return Err(Error::configuration(
                "agent id is empty",
                Some(AGENT_ID_VAR.to_string()),
            ));
        }
        let request_timeout = positive(
            self.request_timeout_secs.map(Duration::from_secs),
            DEFAULT_REQUEST_TIMEOUT,
            "request_timeout_secs",
        )?;
        let turn_timeout = positive(
            self.turn_timeout_secs.map(Duration::from_secs),
            DEFAULT_TURN_TIMEOUT,
            "turn_timeout_secs",
        )?;
        let poll_interval = positive(
            self.poll_interval_ms.map(Duration::from_millis),
            DEFAULT_POLL_INTERVAL,
            "poll_interval_ms",
        )?;

        Ok(RelayConfig {
            endpoint,
            api_key,
            agent_id,
            api_version: self
                .api_version
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            auth: self.auth.unwrap_or_default(),
            request_timeout,
            turn_timeout,
            poll_interval,
            mode: self.mode.unwrap_or_default(),
        })
    }
}

/// Falls back to `default` and rejects a zero duration.
fn positive(value: Option<Duration>, default: Duration, key: &str) -> Result<Duration> {
    let value = value.unwrap_or(default);
    if value.is_zero() {
        return Err(Error::configuration(
            format!("{key} must be positive"),
            Some(key.to_string()),
        ));
    }
    Ok(value)
}

/// Parses the endpoint and normalizes it to end in a slash so relative paths
/// join under it.
fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint.trim()).map_err(|err| {
        Error::configuration(
            format!("endpoint '{endpoint}' is not a valid URL: {err}"),
            Some(ENDPOINT_VAR.to_string()),
        )
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::configuration(
            format!("endpoint '{endpoint}' must use http or https"),
            Some(ENDPOINT_VAR.to_string()),
        ));
    }
    if url.cannot_be_a_base() {
        return Err(Error::configuration(
            format!("endpoint '{endpoint}' cannot be used as a base URL"),
            Some(ENDPOINT_VAR.to_string()),
        ));
    }
    url.set_query(None);
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Command-line arguments for the foundry-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// YAML configuration file.
    #[arrrg(optional, "YAML config file layered over the environment", "FILE")]
    pub config: Option<String>,

    /// Project endpoint URL.
    #[arrrg(optional, "Agents endpoint URL (overrides AZURE_AI_FOUNDRY_ENDPOINT)", "URL")]
    pub endpoint: Option<String>,

    /// Agent identifier.
    #[arrrg(optional, "Agent id (overrides AZURE_AI_FOUNDRY_AGENT_ID)", "ID")]
    pub agent_id: Option<String>,

    /// API version.
    #[arrrg(optional, "api-version query parameter (default: v1)", "VERSION")]
    pub api_version: Option<String>,

    /// Turn timeout in seconds.
    #[arrrg(optional, "Seconds to wait for a reply (default: 60)", "SECS")]
    pub timeout: Option<u64>,

    /// Poll for complete replies instead of streaming.
    #[arrrg(flag, "Poll for complete replies instead of streaming")]
    pub poll: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// JSON-lines event log.
    #[arrrg(optional, "Append relay events as JSON lines to FILE", "FILE")]
    pub log_file: Option<String>,
}

impl ChatArgs {
    /// The configuration layer contributed by the command line.
    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            endpoint: self.endpoint.clone(),
            agent_id: self.agent_id.clone(),
            api_version: self.api_version.clone(),
            turn_timeout_secs: self.timeout,
            mode: self.poll.then_some(ResponseMode::Poll),
            ..ConfigLayer::default()
        }
    }

    /// Resolves environment, config file, and command line into a config.
    pub fn resolve(&self, env: ConfigLayer) -> Result<RelayConfig> {
        let file = match &self.config {
            Some(path) => ConfigLayer::from_yaml_file(path)?,
            None => ConfigLayer::default(),
        };
        env.merge(file).merge(self.layer()).resolve()
    }
}
