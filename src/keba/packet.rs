use crate::prelude::*;

use bytes::{Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use std::net::SocketAddr;
use tokio_util::codec::Decoder;

/// UDP port the charger listens on and replies to.
pub const PORT: u16 = 7090;

/// Acknowledgement line sent for accepted control commands.
pub const OK: &str = "TCH-OK :done";

// Header {{{
// Only the routing fields; the rest of the object is decoded by the caller.
#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Header {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(rename = "ID")]
    id: Option<u16>,

    #[serde(rename = "Report")]
    report: Option<ReportRef>,

    #[serde(rename = "Serial")]
    serial: Option<String>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct ReportRef {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(rename = "ID")]
    id: u16,
}

impl Header {
    fn id(&self) -> Option<u16> {
        self.id.or_else(|| self.report.as_ref().map(|r| r.id))
    }
} // }}}

// Message {{{
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// A bare line, e.g. `TCH-OK :done`.
    Ack(String),
    /// A numbered report; `body` holds the complete JSON object.
    Report {
        id: u16,
        serial: Option<String>,
        body: Bytes,
    },
    /// A JSON object without a report id, pushed by the charger on its own.
    Push { serial: Option<String>, body: Bytes },
}

impl Message {
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim();

        if !text.starts_with('{') {
            return Ok(Self::Ack(text.to_string()));
        }

        let header: Header = serde_json::from_str(text).map_err(Error::Malformed)?;
        let body = Bytes::copy_from_slice(text.as_bytes());

        Ok(match header.id() {
            Some(id) => Self::Report {
                id,
                serial: header.serial,
                body,
            },
            None => Self::Push {
                serial: header.serial,
                body,
            },
        })
    }

    pub fn report_id(&self) -> Option<u16> {
        match self {
            Self::Report { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn serial(&self) -> Option<&str> {
        match self {
            Self::Report { serial, .. } | Self::Push { serial, .. } => serial.as_deref(),
            Self::Ack(_) => None,
        }
    }

    /// Second pass over a report body into the struct the caller asked for.
    pub fn decode_into<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Self::Report { id, body, .. } => serde_json::from_slice(body).map_err(|source| {
                Error::Decode {
                    report: *id,
                    source,
                }
                .into()
            }),
            other => Err(Error::NotAReport(other.to_string()).into()),
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ack(text) => write!(f, "ack {:?}", text),
            Self::Report { id, body, .. } => {
                write!(f, "report {} {}", id, String::from_utf8_lossy(body))
            }
            Self::Push { body, .. } => write!(f, "push {}", String::from_utf8_lossy(body)),
        }
    }
} // }}}

/// One inbound message together with the address it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    pub from: SocketAddr,
    pub message: Message,
}

// MessageDecoder {{{
#[derive(Debug, Default)]
pub struct MessageDecoder;

impl MessageDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for MessageDecoder {
    type Item = Message;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.is_empty() {
            return Ok(None);
        }

        // one datagram is one message. consume it up front so a bad one is
        // never handed back to us.
        let raw = src.split();
        Message::decode(&raw).map(Some)
    }
} // }}}

// Plug {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Plug {
    Unplugged = 0,
    Station = 1,
    StationLocked = 3,
    Vehicle = 5,
    VehicleLocked = 7,
} // }}}

// State {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum State {
    Starting = 0,
    NotReady = 1,
    Ready = 2,
    Charging = 3,
    Error = 4,
    AuthRejected = 5,
} // }}}

// Report2 {{{
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Report2 {
    #[serde(rename = "State")]
    pub state: u8,
    #[serde(rename = "Error1")]
    pub error1: u32,
    #[serde(rename = "Error2")]
    pub error2: u32,
    #[serde(rename = "Plug")]
    pub plug: u8,
    #[serde(rename = "AuthON")]
    pub auth_on: u8,
    #[serde(rename = "AuthReq", alias = "Authreq")]
    pub auth_req: u8,
    #[serde(rename = "Enable sys")]
    pub enable_sys: u8,
    #[serde(rename = "Enable user")]
    pub enable_user: u8,
    #[serde(rename = "Max curr")]
    pub max_curr: u32,
    #[serde(rename = "Max curr %")]
    pub max_curr_pct: u32,
    #[serde(rename = "Curr HW")]
    pub curr_hw: u32,
    #[serde(rename = "Curr user")]
    pub curr_user: u32,
    #[serde(rename = "Curr FS")]
    pub curr_fs: u32,
    #[serde(rename = "Tmo FS")]
    pub tmo_fs: u32,
    #[serde(rename = "Curr timer")]
    pub curr_timer: u32,
    #[serde(rename = "Tmo CT")]
    pub tmo_ct: u32,
    #[serde(rename = "Setenergy")]
    pub set_energy: u32,
    #[serde(rename = "Output")]
    pub output: u32,
    #[serde(rename = "Input")]
    pub input: u32,
    #[serde(rename = "Serial")]
    pub serial: String,
    #[serde(rename = "Sec")]
    pub sec: u64,
}

impl Report2 {
    pub fn enabled(&self) -> bool {
        self.enable_sys == 1 || self.enable_user == 1
    }

    pub fn auth_required(&self) -> bool {
        self.auth_req != 0
    }
} // }}}

// Report3 {{{
/// Metering. Currents in mA, power in mW, energy in 0.1 Wh.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Report3 {
    #[serde(rename = "U1")]
    pub u1: u32,
    #[serde(rename = "U2")]
    pub u2: u32,
    #[serde(rename = "U3")]
    pub u3: u32,
    #[serde(rename = "I1")]
    pub i1: u32,
    #[serde(rename = "I2")]
    pub i2: u32,
    #[serde(rename = "I3")]
    pub i3: u32,
    #[serde(rename = "P")]
    pub p: u64,
    #[serde(rename = "PF")]
    pub pf: u32,
    #[serde(rename = "E pres")]
    pub e_pres: u64,
    #[serde(rename = "E total")]
    pub e_total: u64,
    #[serde(rename = "Serial")]
    pub serial: String,
    #[serde(rename = "Sec")]
    pub sec: u64,
} // }}}

// Report100 {{{
/// Most recent charging session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Report100 {
    #[serde(rename = "Session ID")]
    pub session_id: u64,
    #[serde(rename = "Curr HW")]
    pub curr_hw: u32,
    #[serde(rename = "E start")]
    pub e_start: u64,
    #[serde(rename = "E pres")]
    pub e_pres: u64,
    #[serde(rename = "started[s]")]
    pub started_secs: u64,
    #[serde(rename = "ended[s]")]
    pub ended_secs: u64,
    #[serde(rename = "reason")]
    pub reason: u32,
    #[serde(rename = "RFID tag")]
    pub rfid_tag: String,
    #[serde(rename = "RFID class")]
    pub rfid_class: String,
    #[serde(rename = "Serial")]
    pub serial: String,
    #[serde(rename = "Sec")]
    pub sec: u64,
} // }}}
