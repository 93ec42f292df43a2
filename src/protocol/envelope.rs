use std::io;

use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::{Map, Value};
use tracing::debug;

use super::{CodecError, CommandId};

/// Flat key/value payload of an envelope. Keys keep insertion order, which the
/// signature depends on.
pub type CommandData = Map<String, Value>;

/// A command or telemetry unit as exchanged with the device
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub command: CommandId,
    /// Unix timestamp in seconds
    pub time: i64,
    pub data: CommandData,
    /// Signature as received; `None` for envelopes built locally
    pub sig: Option<String>,
}

impl CommandEnvelope {
    pub fn new(command: CommandId, time: i64, data: CommandData) -> Self {
        Self {
            command,
            time,
            data,
            sig: None,
        }
    }
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    #[serde(rename = "cmdId")]
    cmd_id: u32,
    time: i64,
    data: &'a CommandData,
    #[serde(skip_serializing_if = "Option::is_none")]
    sig: Option<&'a str>,
}

/// Compact JSON that escapes every non-ASCII character as `\uXXXX`, with
/// surrogate pairs above the BMP. This is the byte form devices sign and verify.
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (index, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..index])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = index + ch.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }
}

fn to_wire_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, AsciiFormatter);
    value.serialize(&mut serializer)?;
    // Only ASCII is ever written
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Computes the envelope signature over an unsigned compact serialization.
pub fn sign(unsigned_json: &str, signing_key: &str) -> String {
    let body = unsigned_json
        .strip_prefix('{')
        .and_then(|inner| inner.strip_suffix('}'))
        .unwrap_or(unsigned_json);

    let digest = Md5::digest(format!("{},{}", body, signing_key).as_bytes());
    hex::encode(digest)
}

/// Serializes and signs an envelope.
///
/// Serializes `{cmdId, time, data}`, signs that text, then serializes again with
/// `sig` appended as the fourth field. Any `sig` already present on the envelope
/// is ignored.
pub fn encode(envelope: &CommandEnvelope, signing_key: &str) -> Result<Vec<u8>, CodecError> {
    let mut wire = WireEnvelope {
        cmd_id: envelope.command.code(),
        time: envelope.time,
        data: &envelope.data,
        sig: None,
    };

    let unsigned = to_wire_json(&wire)?;
    let sig = sign(&unsigned, signing_key);
    wire.sig = Some(&sig);

    let signed = to_wire_json(&wire)?.into_bytes();
    debug!("Encoded {} envelope ({} bytes)", envelope.command, signed.len());
    Ok(signed)
}

/// Checks an inbound envelope's signature.
///
/// Not applied on the inbound path; devices are trusted through the broker.
pub fn verify_signature(envelope: &CommandEnvelope, signing_key: &str) -> bool {
    let Some(received) = envelope.sig.as_deref() else {
        return false;
    };

    let wire = WireEnvelope {
        cmd_id: envelope.command.code(),
        time: envelope.time,
        data: &envelope.data,
        sig: None,
    };

    match to_wire_json(&wire) {
        Ok(unsigned) => sign(&unsigned, signing_key).eq_ignore_ascii_case(received),
        Err(_) => false,
    }
}

/// Parses an inbound envelope.
pub fn decode(bytes: &[u8]) -> Result<CommandEnvelope, CodecError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| CodecError::MalformedEnvelope(format!("invalid JSON: {}", e)))?;

    let Value::Object(object) = value else {
        return Err(CodecError::MalformedEnvelope(
            "envelope is not a JSON object".to_string(),
        ));
    };

    let code = object
        .get("cmdId")
        .and_then(Value::as_u64)
        .ok_or_else(|| CodecError::MalformedEnvelope("missing or invalid cmdId".to_string()))?;
    let command = CommandId::try_from(code)?;

    let time = object.get("time").and_then(Value::as_i64).unwrap_or(0);

    let data = match object.get("data") {
        Some(Value::Object(data)) => data.clone(),
        None | Some(Value::Null) => CommandData::new(),
        Some(other) => {
            return Err(CodecError::MalformedEnvelope(format!(
                "data is not an object: {}",
                other
            )))
        }
    };

    let sig = object.get("sig").and_then(Value::as_str).map(str::to_owned);

    Ok(CommandEnvelope {
        command,
        time,
        data,
        sig,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn control_data() -> CommandData {
        let mut data = CommandData::new();
        data.insert("power".into(), json!(1));
        data.insert("mode".into(), json!(1));
        data.insert("cadr".into(), json!(40));
        data.insert("lock".into(), json!(0));
        data.insert("uv".into(), json!(1));
        data.insert("anion".into(), json!(0));
        data
    }

    fn control_envelope() -> CommandEnvelope {
        CommandEnvelope::new(CommandId::Control, 1_700_000_000, control_data())
    }

    #[test]
    fn encode_matches_firmware_reference() {
        let bytes = encode(&control_envelope(), "secret").unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert_eq!(
            text,
            r#"{"cmdId":1000,"time":1700000000,"data":{"power":1,"mode":1,"cadr":40,"lock":0,"uv":1,"anion":0},"sig":"525baf3b62d9803458c550c2b688e37e"}"#
        );
    }

    #[test]
    fn non_ascii_is_escaped_before_signing() {
        let mut data = CommandData::new();
        data.insert("name".into(), json!("é"));
        let envelope = CommandEnvelope::new(CommandId::Control, 1_700_000_000, data);

        let text = String::from_utf8(encode(&envelope, "secret").unwrap()).unwrap();
        assert_eq!(
            text,
            r#"{"cmdId":1000,"time":1700000000,"data":{"name":"\u00e9"},"sig":"8cfd743565651f2604e7f325bac308ad"}"#
        );

        let decoded = decode(text.as_bytes()).unwrap();
        assert_eq!(decoded.data["name"], json!("é"));
        assert!(verify_signature(&decoded, "secret"));
    }

    #[test]
    fn characters_above_the_bmp_use_surrogate_pairs() {
        let mut data = CommandData::new();
        data.insert("ssid".into(), json!("a😀\"q\n"));

        let json = to_wire_json(&data).unwrap();
        assert_eq!(json, r#"{"ssid":"a\ud83d\ude00\"q\n"}"#);
    }

    #[test]
    fn encode_is_reproducible() {
        let first = encode(&control_envelope(), "secret").unwrap();
        let second = encode(&control_envelope(), "secret").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn signature_changes_with_payload_and_key() {
        let reference = decode(&encode(&control_envelope(), "secret").unwrap()).unwrap();

        let mut changed = control_envelope();
        changed.data.insert("cadr".into(), json!(41));
        let changed = decode(&encode(&changed, "secret").unwrap()).unwrap();

        let other_key = decode(&encode(&control_envelope(), "other").unwrap()).unwrap();

        assert_ne!(reference.sig, changed.sig);
        assert_ne!(reference.sig, other_key.sig);
    }

    #[test]
    fn decode_round_trips_command_and_payload() {
        let envelope = control_envelope();
        let decoded = decode(&encode(&envelope, "secret").unwrap()).unwrap();

        assert_eq!(decoded.command, envelope.command);
        assert_eq!(decoded.time, envelope.time);
        assert_eq!(decoded.data, envelope.data);
        assert!(verify_signature(&decoded, "secret"));
        assert!(!verify_signature(&decoded, "wrong"));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode(b"not json"),
            Err(CodecError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            decode(b"[1, 2]"),
            Err(CodecError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            decode(br#"{"time": 1, "data": {}}"#),
            Err(CodecError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            decode(br#"{"cmdId": 1001, "data": 5}"#),
            Err(CodecError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn decode_reports_unknown_command() {
        assert!(matches!(
            decode(br#"{"cmdId": 4242, "time": 1, "data": {}}"#),
            Err(CodecError::UnknownCommandId(4242))
        ));
    }

    #[test]
    fn decode_tolerates_missing_data() {
        let envelope = decode(br#"{"cmdId": 1012}"#).unwrap();
        assert_eq!(envelope.command, CommandId::SterilizationInfo);
        assert_eq!(envelope.time, 0);
        assert!(envelope.data.is_empty());
        assert!(envelope.sig.is_none());
    }
}
