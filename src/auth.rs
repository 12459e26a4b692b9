//! SASL authentication performed during the connection handshake.

use crate::{
    format::field::gen_field_table,
    types::{AMQPValue, FieldTable, LongString, ShortString},
};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The SASL mechanisms supported by the default authentication provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum SASLMechanism {
    /// RabbitMQ's legacy mechanism: a field table holding LOGIN and PASSWORD
    AMQPlain,
    /// Delegate authentication to the transport, typically a TLS client certificate
    External,
    /// `\0username\0password`
    #[default]
    Plain,
}

impl SASLMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            SASLMechanism::AMQPlain => "AMQPLAIN",
            SASLMechanism::External => "EXTERNAL",
            SASLMechanism::Plain => "PLAIN",
        }
    }
}

impl fmt::Display for SASLMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The initial response to send along `connection.start-ok`.
    pub fn sasl_auth_string(&self, mechanism: SASLMechanism) -> LongString {
        match mechanism {
            SASLMechanism::AMQPlain => {
                let mut table = FieldTable::default();
                table.insert(
                    "LOGIN".into(),
                    AMQPValue::LongString(self.username.as_str().into()),
                );
                table.insert(
                    "PASSWORD".into(),
                    AMQPValue::LongString(self.password.as_str().into()),
                );
                let mut buf = BytesMut::new();
                // Credentials are far below the long string limit
                if gen_field_table(&mut buf, &table).is_err() {
                    return LongString::default();
                }
                // the response is the table content without its length prefix
                buf[4..].to_vec().into()
            }
            SASLMechanism::External => LongString::default(),
            SASLMechanism::Plain => format!("\0{}\0{}", self.username, self.password).into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A trait used to integrate a custom authentication process during connection
pub trait AuthProvider: Send + Sync + 'static {
    /// The name of the auth mechanism as understood by the server
    fn mechanism(&self) -> ShortString {
        SASLMechanism::External.name().into()
    }

    /// The initial data to provide to the server for authentication
    fn auth_starter(&self) -> Result<LongString, String> {
        Ok("".into())
    }

    /// The answer to the received challenge, sent as `connection.secure-ok`
    fn continue_auth(&self, challenge: LongString) -> Result<LongString, String> {
        Err(format!(
            "Received connection.secure with challenge '{}' but we don't know how to handle it for {}.",
            challenge,
            self.mechanism(),
        ))
    }
}

pub(crate) struct DefaultAuthProvider {
    credentials: Credentials,
    mechanism: SASLMechanism,
}

impl DefaultAuthProvider {
    pub(crate) fn new(credentials: Credentials, mechanism: SASLMechanism) -> Self {
        Self {
            credentials,
            mechanism,
        }
    }
}

impl AuthProvider for DefaultAuthProvider {
    fn mechanism(&self) -> ShortString {
        self.mechanism.name().into()
    }

    fn auth_starter(&self) -> Result<LongString, String> {
        Ok(self.credentials.sasl_auth_string(self.mechanism))
    }
}
