//! Broker host settings.
//!
//! Settings are immutable once built. They carry no transport behavior;
//! a [`ConnectionContext`](crate::ConnectionContext) only holds them for
//! diagnostics and for the broker connection that was opened from them.

use serde::Serialize;
use url::Url;

use crate::{Error, Result};

/// Default AMQP port.
pub const DEFAULT_PORT: u16 = 5672;

/// Default AMQP-over-TLS port.
pub const DEFAULT_TLS_PORT: u16 = 5671;

/// Broker endpoint configuration.
///
/// The password is never serialized, so settings can be written into probe
/// output and log lines as-is.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct HostSettings {
    // ---
    /// Broker host name.
    pub host: String,

    /// Broker port.
    pub port: u16,

    /// Virtual host, `/` by default.
    pub virtual_host: String,

    /// Login user.
    pub username: String,

    #[serde(skip)]
    password: Option<String>,

    /// Heartbeat interval in seconds (0 to disable).
    pub heartbeat_secs: u16,

    /// Whether the connection uses TLS.
    pub use_tls: bool,

    /// Client-provided connection name shown by the broker.
    pub connection_name: Option<String>,
}

impl HostSettings {
    /// Start building settings.
    pub fn builder() -> HostSettingsBuilder {
        HostSettingsBuilder::new()
    }

    /// Parse `amqp://[user[:password]@]host[:port][/vhost]`.
    ///
    /// `amqps://` selects TLS and port 5671. User, password and virtual host
    /// are percent-decoded; a missing virtual host means `/`, and so does
    /// `%2f`.
    ///
    /// # Example
    ///
    /// ```
    /// # use mom_transport::HostSettings;
    /// let settings = HostSettings::from_uri("amqp://guest@localhost:5673/orders")?;
    /// assert_eq!(settings.host, "localhost");
    /// assert_eq!(settings.port, 5673);
    /// assert_eq!(settings.virtual_host, "orders");
    /// assert_eq!(settings.username, "guest");
    /// # Ok::<(), mom_transport::Error>(())
    /// ```
    pub fn from_uri(uri: &str) -> Result<Self> {
        // ---
        let url = Url::parse(uri)
            .map_err(|err| Error::InvalidConfig(format!("invalid uri {uri:?}: {err}")))?;

        let mut builder = match url.scheme() {
            "amqp" => HostSettingsBuilder::new(),
            "amqps" => HostSettingsBuilder::new().use_tls(true),
            other => {
                return Err(Error::InvalidConfig(format!(
                    "unsupported scheme {other:?}"
                )))
            }
        };

        if let Some(host) = url.host_str() {
            builder = builder.host(host);
        }
        if let Some(port) = url.port() {
            builder = builder.port(port);
        }
        if !url.username().is_empty() {
            builder = builder.username(decode(url.username(), "username")?);
        }
        if let Some(password) = url.password() {
            builder = builder.password(decode(password, "password")?);
        }

        let vhost = url.path().strip_prefix('/').unwrap_or(url.path());
        if !vhost.is_empty() {
            builder = builder.virtual_host(decode(vhost, "virtual host")?);
        }

        builder.build()
    }

    /// Password, if one was configured.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// `host:port/vhost`, used in log lines and probes.
    pub fn describe(&self) -> String {
        format!("{}:{}{}", self.host, self.port, display_vhost(&self.virtual_host))
    }
}

fn decode(component: &str, what: &str) -> Result<String> {
    urlencoding::decode(component)
        .map(|decoded| decoded.into_owned())
        .map_err(|err| Error::InvalidConfig(format!("invalid {what} encoding: {err}")))
}

fn display_vhost(vhost: &str) -> String {
    if vhost.starts_with('/') {
        vhost.to_string()
    } else {
        format!("/{vhost}")
    }
}

impl std::fmt::Debug for HostSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("virtual_host", &self.virtual_host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("heartbeat_secs", &self.heartbeat_secs)
            .field("use_tls", &self.use_tls)
            .field("connection_name", &self.connection_name)
            .finish()
    }
}

/// Fluent builder for [`HostSettings`].
///
/// `host` is required; everything else has a default.
///
/// ```
/// # use mom_transport::HostSettings;
/// let settings = HostSettings::builder()
///     .host("broker.internal")
///     .username("svc")
///     .password("secret")
///     .heartbeat_secs(30)
///     .build()?;
///
/// assert_eq!(settings.port, 5672);
/// assert_eq!(settings.virtual_host, "/");
/// # Ok::<(), mom_transport::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct HostSettingsBuilder {
    host: Option<String>,
    port: Option<u16>,
    virtual_host: Option<String>,
    username: Option<String>,
    password: Option<String>,
    heartbeat_secs: Option<u16>,
    use_tls: bool,
    connection_name: Option<String>,
}

impl HostSettingsBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker host (required).
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Broker port. Defaults to 5672, or 5671 with TLS.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Virtual host. Defaults to `/`.
    pub fn virtual_host(mut self, vhost: impl Into<String>) -> Self {
        self.virtual_host = Some(vhost.into());
        self
    }

    /// Login user. Defaults to `guest`.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Heartbeat interval in seconds. Defaults to 10.
    pub fn heartbeat_secs(mut self, secs: u16) -> Self {
        self.heartbeat_secs = Some(secs);
        self
    }

    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    /// Validate and build the settings.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingConfig`] if no host was set
    /// - [`Error::InvalidConfig`] for an empty host, port 0 or an empty user
    pub fn build(self) -> Result<HostSettings> {
        // ---
        let host = self
            .host
            .ok_or_else(|| Error::MissingConfig("host".into()))?;
        if host.trim().is_empty() {
            return Err(Error::InvalidConfig("host must not be empty".into()));
        }

        let port = match self.port {
            Some(0) => return Err(Error::InvalidConfig("port must not be 0".into())),
            Some(port) => port,
            None if self.use_tls => DEFAULT_TLS_PORT,
            None => DEFAULT_PORT,
        };

        let username = self.username.unwrap_or_else(|| "guest".to_string());
        if username.is_empty() {
            return Err(Error::InvalidConfig("username must not be empty".into()));
        }

        Ok(HostSettings {
            host,
            port,
            virtual_host: self.virtual_host.unwrap_or_else(|| "/".to_string()),
            username,
            password: self.password,
            heartbeat_secs: self.heartbeat_secs.unwrap_or(10),
            use_tls: self.use_tls,
            connection_name: self.connection_name,
        })
    }
}
