//! The connection class: negotiation, tuning, close and flow notifications.

use crate::{
    format::{field::*, GenResult, ParserError, ParserResult},
    types::*,
};
use bytes::{BufMut, BytesMut};

pub const CLASS_ID: Identifier = 10;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Start {
    pub version_major: ShortShortUInt,
    pub version_minor: ShortShortUInt,
    pub server_properties: FieldTable,
    pub mechanisms: LongString,
    pub locales: LongString,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StartOk {
    pub client_properties: FieldTable,
    pub mechanism: ShortString,
    pub response: LongString,
    pub locale: ShortString,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Secure {
    pub challenge: LongString,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SecureOk {
    pub response: LongString,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tune {
    pub channel_max: ShortUInt,
    pub frame_max: LongUInt,
    pub heartbeat: ShortUInt,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TuneOk {
    pub channel_max: ShortUInt,
    pub frame_max: LongUInt,
    pub heartbeat: ShortUInt,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Open {
    pub virtual_host: ShortString,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OpenOk {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Close {
    pub reply_code: ReplyCode,
    pub reply_text: ShortString,
    pub class_id: Identifier,
    pub method_id: Identifier,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CloseOk {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Blocked {
    pub reason: ShortString,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Unblocked {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateSecret {
    pub new_secret: LongString,
    pub reason: ShortString,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateSecretOk {}

#[derive(Clone, Debug, PartialEq)]
pub enum AMQPMethod {
    Start(Start),
    StartOk(StartOk),
    Secure(Secure),
    SecureOk(SecureOk),
    Tune(Tune),
    TuneOk(TuneOk),
    Open(Open),
    OpenOk(OpenOk),
    Close(Close),
    CloseOk(CloseOk),
    Blocked(Blocked),
    Unblocked(Unblocked),
    UpdateSecret(UpdateSecret),
    UpdateSecretOk(UpdateSecretOk),
}

impl AMQPMethod {
    pub fn method_id(&self) -> Identifier {
        match self {
            AMQPMethod::Start(_) => 10,
            AMQPMethod::StartOk(_) => 11,
            AMQPMethod::Secure(_) => 20,
            AMQPMethod::SecureOk(_) => 21,
            AMQPMethod::Tune(_) => 30,
            AMQPMethod::TuneOk(_) => 31,
            AMQPMethod::Open(_) => 40,
            AMQPMethod::OpenOk(_) => 41,
            AMQPMethod::Close(_) => 50,
            AMQPMethod::CloseOk(_) => 51,
            AMQPMethod::Blocked(_) => 60,
            AMQPMethod::Unblocked(_) => 61,
            AMQPMethod::UpdateSecret(_) => 70,
            AMQPMethod::UpdateSecretOk(_) => 71,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AMQPMethod::Start(_) => "start",
            AMQPMethod::StartOk(_) => "start-ok",
            AMQPMethod::Secure(_) => "secure",
            AMQPMethod::SecureOk(_) => "secure-ok",
            AMQPMethod::Tune(_) => "tune",
            AMQPMethod::TuneOk(_) => "tune-ok",
            AMQPMethod::Open(_) => "open",
            AMQPMethod::OpenOk(_) => "open-ok",
            AMQPMethod::Close(_) => "close",
            AMQPMethod::CloseOk(_) => "close-ok",
            AMQPMethod::Blocked(_) => "blocked",
            AMQPMethod::Unblocked(_) => "unblocked",
            AMQPMethod::UpdateSecret(_) => "update-secret",
            AMQPMethod::UpdateSecretOk(_) => "update-secret-ok",
        }
    }

    pub(crate) fn gen(&self, buf: &mut BytesMut) -> GenResult {
        buf.put_u16(self.method_id());
        match self {
            AMQPMethod::Start(m) => {
                buf.put_u8(m.version_major);
                buf.put_u8(m.version_minor);
                gen_field_table(buf, &m.server_properties)?;
                gen_long_string(buf, m.mechanisms.as_bytes())?;
                gen_long_string(buf, m.locales.as_bytes())
            }
            AMQPMethod::StartOk(m) => {
                gen_field_table(buf, &m.client_properties)?;
                gen_short_string(buf, m.mechanism.as_str())?;
                gen_long_string(buf, m.response.as_bytes())?;
                gen_short_string(buf, m.locale.as_str())
            }
            AMQPMethod::Secure(m) => gen_long_string(buf, m.challenge.as_bytes()),
            AMQPMethod::SecureOk(m) => gen_long_string(buf, m.response.as_bytes()),
            AMQPMethod::Tune(Tune {
                channel_max,
                frame_max,
                heartbeat,
            })
            | AMQPMethod::TuneOk(TuneOk {
                channel_max,
                frame_max,
                heartbeat,
            }) => {
                buf.put_u16(*channel_max);
                buf.put_u32(*frame_max);
                buf.put_u16(*heartbeat);
                Ok(())
            }
            AMQPMethod::Open(m) => {
                gen_short_string(buf, m.virtual_host.as_str())?;
                // capabilities, insist
                gen_short_string(buf, "")?;
                gen_bits(buf, &[false]);
                Ok(())
            }
            AMQPMethod::OpenOk(_) => gen_short_string(buf, ""),
            AMQPMethod::Close(m) => {
                buf.put_u16(m.reply_code);
                gen_short_string(buf, m.reply_text.as_str())?;
                buf.put_u16(m.class_id);
                buf.put_u16(m.method_id);
                Ok(())
            }
            AMQPMethod::Blocked(m) => gen_short_string(buf, m.reason.as_str()),
            AMQPMethod::UpdateSecret(m) => {
                gen_long_string(buf, m.new_secret.as_bytes())?;
                gen_short_string(buf, m.reason.as_str())
            }
            AMQPMethod::CloseOk(_) | AMQPMethod::Unblocked(_) | AMQPMethod::UpdateSecretOk(_) => {
                Ok(())
            }
        }
    }
}

pub(crate) fn parse_method(method_id: Identifier, i: &[u8]) -> ParserResult<'_, AMQPMethod> {
    match method_id {
        10 => {
            let (i, version_major) = parse_octet(i)?;
            let (i, version_minor) = parse_octet(i)?;
            let (i, server_properties) = parse_field_table(i)?;
            let (i, mechanisms) = parse_long_string(i)?;
            let (i, locales) = parse_long_string(i)?;
            Ok((
                i,
                AMQPMethod::Start(Start {
                    version_major,
                    version_minor,
                    server_properties,
                    mechanisms,
                    locales,
                }),
            ))
        }
        11 => {
            let (i, client_properties) = parse_field_table(i)?;
            let (i, mechanism) = parse_short_string(i)?;
            let (i, response) = parse_long_string(i)?;
            let (i, locale) = parse_short_string(i)?;
            Ok((
                i,
                AMQPMethod::StartOk(StartOk {
                    client_properties,
                    mechanism,
                    response,
                    locale,
                }),
            ))
        }
        20 => {
            let (i, challenge) = parse_long_string(i)?;
            Ok((i, AMQPMethod::Secure(Secure { challenge })))
        }
        21 => {
            let (i, response) = parse_long_string(i)?;
            Ok((i, AMQPMethod::SecureOk(SecureOk { response })))
        }
        30 | 31 => {
            let (i, channel_max) = parse_short(i)?;
            let (i, frame_max) = parse_long(i)?;
            let (i, heartbeat) = parse_short(i)?;
            let method = if method_id == 30 {
                AMQPMethod::Tune(Tune {
                    channel_max,
                    frame_max,
                    heartbeat,
                })
            } else {
                AMQPMethod::TuneOk(TuneOk {
                    channel_max,
                    frame_max,
                    heartbeat,
                })
            };
            Ok((i, method))
        }
        40 => {
            let (i, virtual_host) = parse_short_string(i)?;
            let (i, _capabilities) = parse_short_string(i)?;
            let (i, _insist) = parse_bits::<1>(i)?;
            Ok((i, AMQPMethod::Open(Open { virtual_host })))
        }
        41 => {
            let (i, _known_hosts) = parse_short_string(i)?;
            Ok((i, AMQPMethod::OpenOk(OpenOk {})))
        }
        50 => {
            let (i, reply_code) = parse_short(i)?;
            let (i, reply_text) = parse_short_string(i)?;
            let (i, class_id) = parse_short(i)?;
            let (i, method_id) = parse_short(i)?;
            Ok((
                i,
                AMQPMethod::Close(Close {
                    reply_code,
                    reply_text,
                    class_id,
                    method_id,
                }),
            ))
        }
        51 => Ok((i, AMQPMethod::CloseOk(CloseOk {}))),
        60 => {
            let (i, reason) = parse_short_string(i)?;
            Ok((i, AMQPMethod::Blocked(Blocked { reason })))
        }
        61 => Ok((i, AMQPMethod::Unblocked(Unblocked {}))),
        70 => {
            let (i, new_secret) = parse_long_string(i)?;
            let (i, reason) = parse_short_string(i)?;
            Ok((
                i,
                AMQPMethod::UpdateSecret(UpdateSecret { new_secret, reason }),
            ))
        }
        71 => Ok((i, AMQPMethod::UpdateSecretOk(UpdateSecretOk {}))),
        method_id => fail(ParserError::UnknownMethod {
            class_id: CLASS_ID,
            method_id,
        }),
    }
}
