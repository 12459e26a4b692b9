use crate::{
    configuration::Configuration,
    connection_status::{ConnectionState, ConnectionStatus},
    format::frame::{gen_frame, parse_frame, AMQPFrame},
    frames::{FrameSender, Outbound},
    killswitch::KillSwitch,
    protocol::{connection, AMQPClass},
    session_manager::SessionManager,
    thread::ThreadHandle,
    types::Heartbeat,
    Error, Result,
};
use bytes::{Buf, BytesMut};
use flume::{Receiver, RecvTimeoutError};
use std::{
    fmt,
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, error, trace, warn};

const READ_CHUNK: usize = 16 * 1024;

pub(crate) type OnFailure = Arc<dyn Fn(Error) + Send + Sync + 'static>;

/// The reader and writer threads of one physical connection.
pub(crate) struct IoLoop {
    stream: TcpStream,
    configuration: Configuration,
    status: ConnectionStatus,
    sessions: SessionManager,
    frames: FrameSender,
    outbound: Receiver<Outbound>,
    buffer: BytesMut,
    on_failure: OnFailure,
}

impl IoLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        stream: TcpStream,
        configuration: Configuration,
        status: ConnectionStatus,
        sessions: SessionManager,
        frames: FrameSender,
        outbound: Receiver<Outbound>,
        buffer: BytesMut,
        on_failure: OnFailure,
    ) -> Self {
        Self {
            stream,
            configuration,
            status,
            sessions,
            frames,
            outbound,
            buffer,
            on_failure,
        }
    }

    /// Spawn the writer then the reader, returning their handles in that order.
    pub(crate) fn start(self) -> Result<(ThreadHandle, ThreadHandle)> {
        let heartbeat = self.configuration.heartbeat();
        // blocking reads must not outlive twice the heartbeat interval
        self.stream
            .set_read_timeout(interval(heartbeat).map(|half| half * 4))?;
        self.stream.set_nodelay(true)?;
        let teardown = Teardown {
            killswitch: KillSwitch::default(),
            status: self.status.clone(),
            sessions: self.sessions.clone(),
            frames: self.frames.clone(),
            on_failure: self.on_failure.clone(),
        };
        let writer = Writer {
            stream: self.stream.try_clone()?,
            outbound: self.outbound,
            heartbeat,
            teardown: teardown.clone(),
        };
        let reader = Reader {
            stream: self.stream,
            status: self.status,
            sessions: self.sessions,
            buffer: self.buffer,
            teardown,
        };
        let writer = ThreadHandle::spawn("warren-writer", move || writer.run())?;
        let reader = ThreadHandle::spawn("warren-reader", move || reader.run())?;
        Ok((writer, reader))
    }
}

impl fmt::Debug for IoLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoLoop")
            .field("configuration", &self.configuration)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Half the negotiated heartbeat, the writer's idle delay. `None` when heartbeats are disabled.
fn interval(heartbeat: Heartbeat) -> Option<Duration> {
    (heartbeat != 0).then(|| Duration::from_millis(u64::from(heartbeat) * 500))
}

struct Writer {
    stream: TcpStream,
    outbound: Receiver<Outbound>,
    heartbeat: Heartbeat,
    teardown: Teardown,
}

impl Writer {
    fn run(mut self) -> Result<()> {
        if let Err(err) = self.write_loop() {
            error!(%err, "failed to write to the socket");
            self.teardown.run(err, false);
            let _ = self.stream.shutdown(Shutdown::Both);
        }
        Ok(())
    }

    fn write_loop(&mut self) -> Result<()> {
        let heartbeat = heartbeat_frame()?;
        loop {
            let next = match interval(self.heartbeat) {
                Some(idle) => match self.outbound.recv_timeout(idle) {
                    Ok(next) => next,
                    Err(RecvTimeoutError::Timeout) => {
                        trace!("idle, sending heartbeat");
                        self.stream.write_all(&heartbeat)?;
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => return Ok(()),
                },
                None => match self.outbound.recv() {
                    Ok(next) => next,
                    Err(_) => return Ok(()),
                },
            };
            match next {
                Outbound::Frames(bytes) => self.stream.write_all(&bytes)?,
                Outbound::Shutdown => {
                    debug!("writer shutting down");
                    let _ = self.stream.flush();
                    let _ = self.stream.shutdown(Shutdown::Both);
                    return Ok(());
                }
            }
        }
    }
}

fn heartbeat_frame() -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    gen_frame(&mut buf, &AMQPFrame::Heartbeat(0))?;
    Ok(buf)
}

struct Reader {
    stream: TcpStream,
    status: ConnectionStatus,
    sessions: SessionManager,
    buffer: BytesMut,
    teardown: Teardown,
}

impl Reader {
    fn run(mut self) -> Result<()> {
        let (err, from_peer) = self.read_loop();
        if matches!(
            self.status.state(),
            ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Error
        ) {
            debug!(%err, "reader stopping");
        } else {
            self.teardown.run(err, from_peer);
        }
        Ok(())
    }

    /// Read until something breaks. The flag tells whether the peer closed the connection itself.
    fn read_loop(&mut self) -> (Error, bool) {
        let mut chunk = vec![0; READ_CHUNK];
        loop {
            if let Err(failure) = self.parse() {
                return failure;
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return (
                        io::Error::from(io::ErrorKind::ConnectionAborted).into(),
                        false,
                    )
                }
                Ok(read) => self.buffer.extend_from_slice(&chunk[..read]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return (Error::MissingHeartbeat, false)
                }
                Err(e) => return (e.into(), false),
            }
        }
    }

    /// Dispatch every complete frame of the buffer.
    fn parse(&mut self) -> std::result::Result<(), (Error, bool)> {
        loop {
            let frame = match parse_frame(&self.buffer) {
                Ok((rest, frame)) => {
                    let consumed = self.buffer.len() - rest.len();
                    self.buffer.advance(consumed);
                    frame
                }
                Err(nom::Err::Incomplete(_)) => return Ok(()),
                Err(nom::Err::Error(err)) | Err(nom::Err::Failure(err)) => {
                    error!(%err, "failed to parse incoming frame");
                    return Err((err.into(), false));
                }
            };
            trace!(%frame, "Received frame");
            let channel_id = frame.channel_id();
            if let Err(err) = self.sessions.handle_frame(frame) {
                // everything going wrong on channel 0 is about the connection itself
                if channel_id == 0 {
                    let from_peer = matches!(
                        err,
                        Error::ProtocolError(_) | Error::InvalidConnectionState(_)
                    );
                    return Err((err, from_peer));
                }
                if err.is_connection_fatal() {
                    return Err((err, false));
                }
                warn!(channel = channel_id, %err, "failed to handle frame");
            }
        }
    }
}

/// Runs once per connection, from whichever io thread fails first.
#[derive(Clone)]
struct Teardown {
    killswitch: KillSwitch,
    status: ConnectionStatus,
    sessions: SessionManager,
    frames: FrameSender,
    on_failure: OnFailure,
}

impl Teardown {
    fn run(&self, error: Error, from_peer: bool) {
        if !self.killswitch.kill() {
            return;
        }
        if !from_peer && notifies_peer(&error) {
            let close = AMQPFrame::Method(
                0,
                AMQPClass::Connection(connection::AMQPMethod::Close(connection::Close {
                    reply_code: error.reply_code(),
                    reply_text: error.to_string().chars().take(255).collect::<String>().into(),
                    class_id: 0,
                    method_id: 0,
                })),
            );
            if let Err(err) = self.frames.send_frame(close) {
                warn!(%err, "failed to send connection.close");
            }
        }
        self.sessions.set_connection_error(error.clone());
        self.status.transition(ConnectionState::Error);
        self.frames.shutdown();
        (self.on_failure)(error);
    }
}

/// Protocol violations are reported to the peer before hanging up.
fn notifies_peer(error: &Error) -> bool {
    matches!(
        error.cause(),
        Error::ParsingError(_)
            | Error::InvalidChannel(_)
            | Error::InvalidFrameReceived
            | Error::InvalidBodyReceived
            | Error::InvalidMethod(_)
    )
}
