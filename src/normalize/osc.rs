//! OSC 1.0 message decoding and normalization
//!
//! Wire format: a null-terminated address padded to 4 bytes, a type tag
//! string starting with `,` (also padded), then big-endian arguments.
//! Only the first argument is used as the control value.

use super::Normalizer;
use crate::error::MalformedMessage;
use crate::event::{ControlEvent, ControlIdentity};
use tokio::time::Instant;

/// Decoded OSC argument
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Double(f64),
    Str(String),
    Bool(bool),
}

/// Decoded OSC message
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

/// Length of an OSC-string including its terminator and padding
fn padded_len(len: usize) -> usize {
    (len + 4) & !3
}

/// Read an OSC-string at `offset`, returning the string and the next offset
fn read_string(data: &[u8], offset: usize) -> Result<(String, usize), String> {
    let rest = data.get(offset..).ok_or("truncated packet")?;
    let end = rest
        .iter()
        .position(|b| *b == 0)
        .ok_or("unterminated string")?;
    let text = std::str::from_utf8(&rest[..end])
        .map_err(|_| "string is not UTF-8".to_string())?
        .to_string();
    let next = offset + padded_len(end);
    if next > data.len() {
        return Err("string padding truncated".to_string());
    }
    Ok((text, next))
}

fn read_4(data: &[u8], offset: usize) -> Result<[u8; 4], String> {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| "truncated argument".to_string())
}

impl OscMessage {
    /// Decode a single OSC message.
    ///
    /// Returns `Ok(None)` for bundles, which are not consumed.
    pub fn decode(data: &[u8]) -> Result<Option<Self>, String> {
        if data.starts_with(b"#bundle\0") {
            return Ok(None);
        }
        if data.len() % 4 != 0 {
            return Err(format!("packet length {} is not a multiple of 4", data.len()));
        }

        let (address, offset) = read_string(data, 0)?;
        if !address.starts_with('/') {
            return Err(format!("invalid address '{}'", address));
        }

        // A message without type tags carries no arguments
        if offset == data.len() {
            return Ok(Some(OscMessage {
                address,
                args: Vec::new(),
            }));
        }

        let (tags, mut offset) = read_string(data, offset)?;
        let tags = tags
            .strip_prefix(',')
            .ok_or_else(|| format!("type tags '{}' missing ','", tags))?;

        let mut args = Vec::with_capacity(tags.len());
        for tag in tags.chars() {
            let arg = match tag {
                'i' => {
                    let v = i32::from_be_bytes(read_4(data, offset)?);
                    offset += 4;
                    OscArg::Int(v)
                }
                'f' => {
                    let v = f32::from_be_bytes(read_4(data, offset)?);
                    offset += 4;
                    OscArg::Float(v)
                }
                'd' => {
                    let hi = read_4(data, offset)?;
                    let lo = read_4(data, offset + 4)?;
                    let mut bytes = [0u8; 8];
                    bytes[..4].copy_from_slice(&hi);
                    bytes[4..].copy_from_slice(&lo);
                    offset += 8;
                    OscArg::Double(f64::from_be_bytes(bytes))
                }
                's' => {
                    let (s, next) = read_string(data, offset)?;
                    offset = next;
                    OscArg::Str(s)
                }
                'T' => OscArg::Bool(true),
                'F' => OscArg::Bool(false),
                other => return Err(format!("unsupported type tag '{}'", other)),
            };
            args.push(arg);
        }

        Ok(Some(OscMessage { address, args }))
    }

    /// Encode as an OSC packet
    pub fn encode(&self) -> Vec<u8> {
        fn push_string(out: &mut Vec<u8>, s: &str) {
            out.extend_from_slice(s.as_bytes());
            out.resize(out.len() + padded_len(s.len()) - s.len(), 0);
        }

        let mut out = Vec::new();
        push_string(&mut out, &self.address);

        let mut tags = String::from(",");
        for arg in &self.args {
            tags.push(match arg {
                OscArg::Int(_) => 'i',
                OscArg::Float(_) => 'f',
                OscArg::Double(_) => 'd',
                OscArg::Str(_) => 's',
                OscArg::Bool(true) => 'T',
                OscArg::Bool(false) => 'F',
            });
        }
        push_string(&mut out, &tags);

        for arg in &self.args {
            match arg {
                OscArg::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
                OscArg::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
                OscArg::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
                OscArg::Str(s) => push_string(&mut out, s),
                OscArg::Bool(_) => {}
            }
        }
        out
    }
}

/// Normalizer for OSC datagrams
///
/// Identities use `"<source><address>"` as the source id so that each OSC
/// address is its own control: `osc` + `/1/fader1` → `osc/1/fader1`.
#[derive(Debug, Clone)]
pub struct OscNormalizer {
    source_id: String,
}

impl OscNormalizer {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> MalformedMessage {
        MalformedMessage::new(&self.source_id, reason)
    }

    /// Normalize an already decoded message
    pub fn to_event(&self, message: &OscMessage, at: Instant) -> Result<ControlEvent, MalformedMessage> {
        let control = format!("{}{}", self.source_id, message.address);
        let arg = message
            .args
            .first()
            .ok_or_else(|| self.malformed(format!("{} has no arguments", message.address)))?;

        let unit = |v: f64| {
            ControlEvent::continuous(ControlIdentity::continuous(&control, 0, 0), v, v, at)
                .ok_or_else(|| {
                    self.malformed(format!("{} value {} outside [0, 1]", message.address, v))
                })
        };

        match arg {
            OscArg::Float(v) => unit(*v as f64),
            OscArg::Double(v) => unit(*v),
            OscArg::Int(v) => Ok(ControlEvent::discrete(
                ControlIdentity::discrete(&control, 0, 0),
                *v as f64,
                *v != 0,
                at,
            )),
            OscArg::Bool(b) => Ok(ControlEvent::discrete(
                ControlIdentity::discrete(&control, 0, 0),
                if *b { 1.0 } else { 0.0 },
                *b,
                at,
            )),
            OscArg::Str(_) => Err(self.malformed(format!(
                "{} carries a string, expected a number or bool",
                message.address
            ))),
        }
    }
}

impl Normalizer for OscNormalizer {
    type Raw = Vec<u8>;

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn decode(&self, raw: &Vec<u8>, at: Instant) -> Result<Option<ControlEvent>, MalformedMessage> {
        match OscMessage::decode(raw).map_err(|reason| self.malformed(reason))? {
            Some(message) => self.to_event(&message, at).map(Some),
            None => Ok(None),
        }
    }
}
