//! Connection negotiation, run synchronously on the socket before the io loop takes it over.

use crate::{
    auth::AuthProvider,
    configuration::{Configuration, Tuning},
    connection_properties::ConnectionProperties,
    connection_status::ConnectionState,
    format::frame::{gen_frame, parse_frame, AMQPFrame, ProtocolVersion},
    protocol::{connection, constants::FRAME_MIN_SIZE, AMQPClass, AMQPError},
    types::{AMQPValue, FieldTable, LongString},
    Error, Result,
};
use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use tracing::{debug, trace};

pub(crate) struct Handshake<'a, S> {
    stream: &'a mut S,
    buffer: BytesMut,
}

impl<'a, S: Read + Write> Handshake<'a, S> {
    pub(crate) fn new(stream: &'a mut S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(FRAME_MIN_SIZE as usize),
        }
    }

    /// Run the whole negotiation up to `connection.open-ok`.
    ///
    /// Returns whatever was read past the last handshake frame, for the reader to start from.
    pub(crate) fn run(
        mut self,
        vhost: &str,
        properties: &ConnectionProperties,
        auth: &dyn AuthProvider,
        tuning: Tuning,
        configuration: &Configuration,
    ) -> Result<BytesMut> {
        self.send(AMQPFrame::ProtocolHeader(ProtocolVersion::amqp_0_9_1()))?;

        let start = match self.recv_connection_method()? {
            connection::AMQPMethod::Start(start) => start,
            method => return Err(unexpected(method)),
        };
        debug!(
            version_major = start.version_major,
            version_minor = start.version_minor,
            mechanisms = %start.mechanisms,
            "connection.start received"
        );
        let mechanism = auth.mechanism();
        let offered = String::from_utf8_lossy(start.mechanisms.as_bytes()).into_owned();
        if !offered.split_whitespace().any(|m| m == mechanism.as_str()) {
            return Err(Error::UnsupportedMechanism(mechanism.into_string()));
        }
        let response = auth
            .auth_starter()
            .map_err(|_| Error::UnsupportedMechanism(mechanism.as_str().to_owned()))?;
        self.send_method(connection::AMQPMethod::StartOk(connection::StartOk {
            client_properties: client_properties(properties),
            mechanism: mechanism.clone(),
            response,
            locale: properties.locale.as_str().into(),
        }))?;

        let tune = loop {
            match self.recv_connection_method()? {
                connection::AMQPMethod::Secure(secure) => {
                    let response = auth
                        .continue_auth(secure.challenge)
                        .map_err(|_| Error::UnsupportedMechanism(mechanism.as_str().to_owned()))?;
                    self.send_method(connection::AMQPMethod::SecureOk(connection::SecureOk {
                        response,
                    }))?;
                }
                connection::AMQPMethod::Tune(tune) => break tune,
                method => return Err(unexpected(method)),
            }
        };
        let tune_ok = configuration.tune(&tune, tuning);
        debug!(
            channel_max = tune_ok.channel_max,
            frame_max = tune_ok.frame_max,
            heartbeat = tune_ok.heartbeat,
            "connection tuned"
        );
        self.send_method(connection::AMQPMethod::TuneOk(tune_ok))?;

        self.send_method(connection::AMQPMethod::Open(connection::Open {
            virtual_host: vhost.into(),
        }))?;
        match self.recv_connection_method()? {
            connection::AMQPMethod::OpenOk(_) => Ok(self.buffer),
            method => Err(unexpected(method)),
        }
    }

    fn send_method(&mut self, method: connection::AMQPMethod) -> Result<()> {
        self.send(AMQPFrame::Method(0, AMQPClass::Connection(method)))
    }

    fn send(&mut self, frame: AMQPFrame) -> Result<()> {
        trace!(%frame, "Sending frame");
        let mut buf = BytesMut::new();
        gen_frame(&mut buf, &frame)?;
        self.stream.write_all(&buf)?;
        self.stream.flush()?;
        Ok(())
    }

    fn recv_connection_method(&mut self) -> Result<connection::AMQPMethod> {
        loop {
            match self.recv()? {
                AMQPFrame::Method(0, AMQPClass::Connection(method)) => return Ok(method),
                AMQPFrame::Heartbeat(_) => continue,
                AMQPFrame::ProtocolHeader(version) => {
                    return Err(Error::ProtocolVersionMismatch(version))
                }
                AMQPFrame::Method(_, method) => return Err(Error::InvalidMethod(Box::new(method))),
                _ => return Err(Error::InvalidFrameReceived),
            }
        }
    }

    fn recv(&mut self) -> Result<AMQPFrame> {
        loop {
            match parse_frame(&self.buffer) {
                Ok((rest, frame)) => {
                    let consumed = self.buffer.len() - rest.len();
                    self.buffer.advance(consumed);
                    trace!(%frame, "Received frame");
                    return Ok(frame);
                }
                Err(nom::Err::Incomplete(_)) => self.fill()?,
                Err(nom::Err::Error(err)) | Err(nom::Err::Failure(err)) => return Err(err.into()),
            }
        }
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0; 4096];
        let read = self.stream.read(&mut chunk)?;
        if read == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        self.buffer.extend_from_slice(&chunk[..read]);
        Ok(())
    }
}

fn unexpected(method: connection::AMQPMethod) -> Error {
    match method {
        connection::AMQPMethod::Close(close) => AMQPError::from_id(close.reply_code, close.reply_text)
            .map(Error::ProtocolError)
            .unwrap_or(Error::InvalidConnectionState(ConnectionState::Closed)),
        method => Error::InvalidMethod(Box::new(AMQPClass::Connection(method))),
    }
}

fn client_properties(properties: &ConnectionProperties) -> FieldTable {
    let mut capabilities = FieldTable::default();
    for capability in [
        "publisher_confirms",
        "exchange_exchange_bindings",
        "basic.nack",
        "consumer_cancel_notify",
        "connection.blocked",
        "authentication_failure_close",
    ] {
        capabilities.insert(capability.into(), AMQPValue::Boolean(true));
    }
    let mut client_properties = properties.client_properties.clone();
    for (key, value) in [
        ("product", env!("CARGO_PKG_NAME")),
        ("version", env!("CARGO_PKG_VERSION")),
        ("platform", "rust"),
        ("information", env!("CARGO_PKG_DESCRIPTION")),
    ] {
        if !client_properties.contains_key(key) {
            client_properties.insert(key.into(), AMQPValue::LongString(LongString::from(value)));
        }
    }
    client_properties.insert("capabilities".into(), capabilities.into());
    client_properties
}
