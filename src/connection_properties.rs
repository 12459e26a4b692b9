use crate::{
    auth::{AuthProvider, SASLMechanism},
    recovery_config::RecoveryConfig,
    types::{AMQPValue, FieldTable, LongString, ShortString},
};
use std::{fmt, sync::Arc, time::Duration};

/// Client-side settings for a connection, on top of what the URI carries.
#[derive(Clone)]
pub struct ConnectionProperties {
    pub(crate) locale: String,
    pub(crate) client_properties: FieldTable,
    pub(crate) mechanism: SASLMechanism,
    pub(crate) auth_provider: Option<Arc<dyn AuthProvider>>,
    pub(crate) rpc_timeout: Option<Duration>,
    pub(crate) close_timeout: Duration,
    pub(crate) recovery_config: Option<RecoveryConfig>,
    pub(crate) auto_close: bool,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            locale: "en_US".into(),
            client_properties: FieldTable::default(),
            mechanism: SASLMechanism::default(),
            auth_provider: None,
            rpc_timeout: None,
            close_timeout: Duration::from_secs(10),
            recovery_config: None,
            auto_close: false,
        }
    }
}

impl ConnectionProperties {
    #[must_use]
    pub fn with_locale(mut self, locale: String) -> Self {
        self.locale = locale;
        self
    }

    #[must_use]
    pub fn with_client_property(mut self, key: ShortString, value: LongString) -> Self {
        self.client_properties
            .insert(key, AMQPValue::LongString(value));
        self
    }

    #[must_use]
    pub fn with_connection_name(self, connection_name: LongString) -> Self {
        self.with_client_property("connection_name".into(), connection_name)
    }

    #[must_use]
    pub fn with_auth_mechanism(mut self, mechanism: SASLMechanism) -> Self {
        self.mechanism = mechanism;
        self
    }

    /// Replace the URI credentials by a custom SASL exchange.
    #[must_use]
    pub fn with_auth_provider<AP: AuthProvider>(mut self, provider: AP) -> Self {
        self.auth_provider = Some(Arc::new(provider));
        self
    }

    /// How long a synchronous call waits for its reply. Unbounded by default.
    #[must_use]
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    /// How long closing a channel or the connection waits for the server's acknowledgement.
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_recovery_config(mut self, config: RecoveryConfig) -> Self {
        self.recovery_config = Some(config);
        self
    }

    /// Close the connection once its last channel is closed.
    #[must_use]
    pub fn with_auto_close(mut self, auto_close: bool) -> Self {
        self.auto_close = auto_close;
        self
    }

    pub(crate) fn auto_recover(&self) -> bool {
        self.recovery_config
            .as_ref()
            .map_or(false, |config| config.auto_recover)
    }
}

impl fmt::Debug for ConnectionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProperties")
            .field("locale", &self.locale)
            .field("client_properties", &self.client_properties)
            .field("mechanism", &self.mechanism)
            .field("rpc_timeout", &self.rpc_timeout)
            .field("close_timeout", &self.close_timeout)
            .field("recovery_config", &self.recovery_config)
            .field("auto_close", &self.auto_close)
            .finish_non_exhaustive()
    }
}
