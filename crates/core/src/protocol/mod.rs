//! JSON messages exchanged with the dialogue service.
//!
//! Outbound commands flatten the per-entity settings into numbered fields
//! (`system1`, `voice2`, ...). Inbound messages are dispatched on their
//! `type` field; unrecognised types are surfaced as [`ServerEvent::Unknown`]
//! so the caller can log and skip them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DuetError, EntityConfig, EntityId, EntityPair, Result, Voice};

/// Commands sent to the dialogue service.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Start(EntityPair<EntityConfig>),
    Stop,
    /// Acknowledges that the current turn has finished, with or without audio.
    AudioFinished,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Stop => "stop",
            Self::AudioFinished => "audio_finished",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let text = match self {
            Self::Start(entities) => serde_json::to_string(&StartFrame::new(entities))?,
            Self::Stop | Self::AudioFinished => {
                serde_json::to_string(&BareFrame { kind: self.name() })?
            }
        };
        Ok(text)
    }
}

#[derive(Serialize)]
struct BareFrame {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    system1: &'a str,
    system2: &'a str,
    voice1: Voice,
    voice2: Voice,
    speed1: f32,
    speed2: f32,
    temperature1: f32,
    temperature2: f32,
    top_p1: f32,
    top_p2: f32,
    response_length1: u32,
    response_length2: u32,
}

impl<'a> StartFrame<'a> {
    fn new(entities: &'a EntityPair<EntityConfig>) -> Self {
        let one = &entities[EntityId::One];
        let two = &entities[EntityId::Two];
        Self {
            kind: "start",
            system1: &one.system_prompt,
            system2: &two.system_prompt,
            voice1: one.voice,
            voice2: two.voice,
            speed1: one.speed,
            speed2: two.speed,
            temperature1: one.temperature,
            temperature2: two.temperature,
            top_p1: one.top_p,
            top_p2: two.top_p,
            response_length1: one.response_length.budget(),
            response_length2: two.response_length.budget(),
        }
    }
}

/// One spoken turn announced by the service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TurnEvent {
    pub entity: EntityId,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "audioUrl", default)]
    pub audio_ref: Option<String>,
}

/// Messages received from the dialogue service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Speaking(TurnEvent),
    FinishedSpeaking,
    Stopped,
    Error { message: Option<String> },
    Unknown(String),
}

impl ServerEvent {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DuetError::transport("message without a `type` field"))?
            .to_string();

        let event = match kind.as_str() {
            "speaking" => {
                let mut turn: TurnEvent = serde_json::from_value(value)?;
                turn.audio_ref = turn.audio_ref.filter(|url| !url.is_empty());
                Self::Speaking(turn)
            }
            "finished_speaking" => Self::FinishedSpeaking,
            "stopped" => Self::Stopped,
            "error" => Self::Error {
                message: value
                    .get("message")
                    .and_then(Value::as_str)
                    .filter(|message| !message.is_empty())
                    .map(str::to_string),
            },
            _ => Self::Unknown(kind),
        };
        Ok(event)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Speaking(_) => "speaking",
            Self::FinishedSpeaking => "finished_speaking",
            Self::Stopped => "stopped",
            Self::Error { .. } => "error",
            Self::Unknown(kind) => kind,
        }
    }
}
