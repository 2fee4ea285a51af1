//! Realtime event types.
//!
//! Both directions share a flat JSON envelope: `{ "type": "...", ...payload }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::config::SessionSettings;
use crate::error::VoiceError;

/// Events the client sends to the realtime endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    /// Session configuration, sent once after `session.created`.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    /// One captured frame of wire audio, base64 encoded.
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    AudioCommit,

    /// Ask the peer to answer the committed input.
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl OutboundEvent {
    /// Wire name of the event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::AudioAppend { .. } => "input_audio_buffer.append",
            Self::AudioCommit => "input_audio_buffer.commit",
            Self::ResponseCreate => "response.create",
        }
    }

    /// Serialize into the JSON envelope with a fresh client `event_id`.
    pub fn encode(&self) -> Result<String, VoiceError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert(
                "event_id".into(),
                Value::String(format!("evt_{}", Uuid::new_v4().simple())),
            );
        }
        serde_json::to_string(&value).map_err(VoiceError::from)
    }
}

/// Events received from the realtime endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    SessionCreated {
        session_id: String,
    },
    SessionUpdated {
        session_id: Option<String>,
    },
    SpeechStarted {
        item_id: Option<String>,
        audio_start_ms: Option<u64>,
    },
    SpeechStopped {
        item_id: Option<String>,
        audio_end_ms: Option<u64>,
    },
    InputAudioCommitted {
        item_id: Option<String>,
    },
    TranscriptionDelta {
        item_id: Option<String>,
        delta: String,
    },
    TranscriptionCompleted {
        item_id: Option<String>,
        transcript: String,
    },
    TranscriptionFailed {
        item_id: Option<String>,
        message: String,
    },
    ResponseCreated {
        response_id: Option<String>,
    },
    AudioDelta {
        response_id: Option<String>,
        delta: String,
    },
    AudioDone {
        response_id: Option<String>,
    },
    AudioTranscriptDelta {
        response_id: Option<String>,
        delta: String,
    },
    TextDelta {
        response_id: Option<String>,
        delta: String,
    },
    ResponseDone {
        response_id: Option<String>,
        status: Option<String>,
    },
    Error {
        code: Option<String>,
        error_type: Option<String>,
        message: String,
    },
    Unknown {
        event_type: String,
    },
}

impl InboundEvent {
    /// Decode one text frame.
    ///
    /// Frames that are not a JSON object with a string `type`, or that lack
    /// the payload their type requires, are protocol errors.
    pub fn decode(text: &str) -> Result<Self, VoiceError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|error| VoiceError::Protocol(format!("invalid JSON envelope: {error}")))?;
        Self::from_server_payload(&value)
    }

    /// Parse a server event payload into a typed realtime event.
    pub fn from_server_payload(payload: &Value) -> Result<Self, VoiceError> {
        if !payload.is_object() {
            return Err(VoiceError::Protocol("envelope is not a JSON object".into()));
        }
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| VoiceError::Protocol("envelope has no string `type`".into()))?;

        let event = match event_type {
            "session.created" => Self::SessionCreated {
                session_id: string_at(payload, &["session", "id"])
                    .or_else(|| string_field(payload, "session_id"))
                    .unwrap_or_else(|| "unknown".to_string()),
            },
            "session.updated" => Self::SessionUpdated {
                session_id: string_at(payload, &["session", "id"])
                    .or_else(|| string_field(payload, "session_id")),
            },
            "input_audio_buffer.speech_started" => Self::SpeechStarted {
                item_id: string_field(payload, "item_id"),
                audio_start_ms: payload.get("audio_start_ms").and_then(Value::as_u64),
            },
            "input_audio_buffer.speech_stopped" => Self::SpeechStopped {
                item_id: string_field(payload, "item_id"),
                audio_end_ms: payload.get("audio_end_ms").and_then(Value::as_u64),
            },
            "input_audio_buffer.committed" => Self::InputAudioCommitted {
                item_id: string_field(payload, "item_id"),
            },
            "conversation.item.input_audio_transcription.delta" => Self::TranscriptionDelta {
                item_id: string_field(payload, "item_id"),
                delta: required(payload, event_type, "delta")?,
            },
            "conversation.item.input_audio_transcription.completed" => {
                Self::TranscriptionCompleted {
                    item_id: string_field(payload, "item_id"),
                    transcript: string_field(payload, "transcript")
                        .or_else(|| string_field(payload, "text"))
                        .ok_or_else(|| missing(event_type, "transcript"))?,
                }
            }
            "conversation.item.input_audio_transcription.failed" => Self::TranscriptionFailed {
                item_id: string_field(payload, "item_id"),
                message: string_at(payload, &["error", "message"])
                    .unwrap_or_else(|| "transcription failed".to_string()),
            },
            "response.created" => Self::ResponseCreated {
                response_id: string_at(payload, &["response", "id"]),
            },
            "response.audio.delta" => Self::AudioDelta {
                response_id: string_field(payload, "response_id"),
                delta: required(payload, event_type, "delta")?,
            },
            "response.audio.done" => Self::AudioDone {
                response_id: string_field(payload, "response_id"),
            },
            "response.audio_transcript.delta" => Self::AudioTranscriptDelta {
                response_id: string_field(payload, "response_id"),
                delta: required(payload, event_type, "delta")?,
            },
            "response.text.delta" => Self::TextDelta {
                response_id: string_field(payload, "response_id"),
                delta: required(payload, event_type, "delta")?,
            },
            "response.done" => Self::ResponseDone {
                response_id: string_at(payload, &["response", "id"]),
                status: string_at(payload, &["response", "status"]),
            },
            "error" => Self::Error {
                code: string_at(payload, &["error", "code"]),
                error_type: string_at(payload, &["error", "type"]),
                message: string_at(payload, &["error", "message"])
                    .or_else(|| string_field(payload, "message"))
                    .unwrap_or_else(|| "Realtime server error".to_string()),
            },
            _ => Self::Unknown {
                event_type: event_type.to_string(),
            },
        };
        Ok(event)
    }
}

fn required(payload: &Value, event_type: &str, field: &str) -> Result<String, VoiceError> {
    string_field(payload, field).ok_or_else(|| missing(event_type, field))
}

fn missing(event_type: &str, field: &str) -> VoiceError {
    VoiceError::Protocol(format!("`{event_type}` event without `{field}`"))
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str().map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn outbound_events_use_flat_envelope_with_event_id() {
        let encoded = OutboundEvent::AudioAppend {
            audio: "AQACAA==".into(),
        }
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "input_audio_buffer.append");
        assert_eq!(value["audio"], "AQACAA==");
        assert!(value["event_id"].as_str().unwrap().starts_with("evt_"));

        let commit: Value =
            serde_json::from_str(&OutboundEvent::AudioCommit.encode().unwrap()).unwrap();
        assert_eq!(commit["type"], "input_audio_buffer.commit");
        let response: Value =
            serde_json::from_str(&OutboundEvent::ResponseCreate.encode().unwrap()).unwrap();
        assert_eq!(response["type"], OutboundEvent::ResponseCreate.event_type());
    }

    #[test]
    fn encoded_events_decode_back_ignoring_event_id() {
        let event = OutboundEvent::AudioCommit;
        let decoded: OutboundEvent = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn session_lifecycle_events_parse() {
        let created = InboundEvent::decode(
            &json!({"type": "session.created", "session": {"id": "sess_1"}}).to_string(),
        )
        .unwrap();
        assert_eq!(
            created,
            InboundEvent::SessionCreated {
                session_id: "sess_1".into()
            }
        );

        let updated = InboundEvent::decode(r#"{"type":"session.updated"}"#).unwrap();
        assert_eq!(updated, InboundEvent::SessionUpdated { session_id: None });
    }

    #[test]
    fn transcription_and_audio_events_parse() {
        let completed = InboundEvent::from_server_payload(&json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "item_id": "item_1",
            "transcript": "hello there"
        }))
        .unwrap();
        assert_eq!(
            completed,
            InboundEvent::TranscriptionCompleted {
                item_id: Some("item_1".into()),
                transcript: "hello there".into()
            }
        );

        let audio = InboundEvent::from_server_payload(&json!({
            "type": "response.audio.delta",
            "response_id": "resp_1",
            "delta": "AQACAA=="
        }))
        .unwrap();
        assert!(matches!(audio, InboundEvent::AudioDelta { .. }));

        let done = InboundEvent::from_server_payload(&json!({
            "type": "response.done",
            "response": {"id": "resp_1", "status": "completed"}
        }))
        .unwrap();
        assert_eq!(
            done,
            InboundEvent::ResponseDone {
                response_id: Some("resp_1".into()),
                status: Some("completed".into())
            }
        );
    }

    #[test]
    fn error_event_carries_code_and_message() {
        let error = InboundEvent::from_server_payload(&json!({
            "type": "error",
            "error": {
                "type": "invalid_request_error",
                "code": "invalid_api_key",
                "message": "Incorrect API key provided"
            }
        }))
        .unwrap();
        assert_eq!(
            error,
            InboundEvent::Error {
                code: Some("invalid_api_key".into()),
                error_type: Some("invalid_request_error".into()),
                message: "Incorrect API key provided".into()
            }
        );
    }

    #[test]
    fn malformed_envelopes_are_protocol_errors() {
        for text in [
            "not json",
            "[1, 2, 3]",
            r#"{"delta": "AAAA"}"#,
            r#"{"type": 42}"#,
            r#"{"type": "response.audio.delta"}"#,
        ] {
            assert!(
                matches!(InboundEvent::decode(text), Err(VoiceError::Protocol(_))),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn unrecognized_types_are_kept_as_unknown() {
        let event = InboundEvent::decode(r#"{"type":"rate_limits.updated","rate_limits":[]}"#)
            .unwrap();
        assert_eq!(
            event,
            InboundEvent::Unknown {
                event_type: "rate_limits.updated".into()
            }
        );
    }
}
