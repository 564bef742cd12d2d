use std::{fmt, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{DuetError, EntityId, EntityPair, Result};

/// Hard limit on a system prompt, in characters.
pub const MAX_PROMPT_CHARS: usize = 375;
/// Prompts longer than this are flagged but still accepted.
pub const PROMPT_WARNING_CHARS: usize = 300;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server_url: String,
    pub timing: TimingConfig,
    pub audio: AudioConfig,
    pub entities: EntityPair<EntityConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8000/ws".to_string(),
            timing: TimingConfig::default(),
            audio: AudioConfig::default(),
            entities: EntityPair::new(
                EntityConfig::with_voice(Voice::Brian),
                EntityConfig::with_voice(Voice::Ava),
            ),
        }
    }
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|err| DuetError::Config(format!("{}: {err}", path.display())))
    }
}

/// Fixed delays used by the session state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub connect_poll_interval_ms: u64,
    pub connect_poll_attempts: u32,
    pub silent_turn_ms: u64,
    pub restart_cooldown_ms: u64,
    pub frame_interval_ms: u64,
    /// How long a volume change stays on the status line.
    pub status_reset_ms: u64,
    /// Opacity gained per frame while a visualization fades in. Fading out
    /// runs at twice this rate.
    pub fade_step: f32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_poll_interval_ms: 100,
            connect_poll_attempts: 50,
            silent_turn_ms: 2_000,
            restart_cooldown_ms: 1_000,
            frame_interval_ms: 16,
            status_reset_ms: 1_500,
            fade_step: 0.05,
        }
    }
}

impl TimingConfig {
    pub fn connect_poll_interval(&self) -> Duration {
        Duration::from_millis(self.connect_poll_interval_ms)
    }

    pub fn silent_turn(&self) -> Duration {
        Duration::from_millis(self.silent_turn_ms)
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_millis(self.restart_cooldown_ms)
    }

    pub fn status_reset(&self) -> Duration {
        Duration::from_millis(self.status_reset_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub volume: f32,
    pub muted: bool,
    pub analysis_block: usize,
    pub smoothing: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
            analysis_block: 256,
            smoothing: 0.8,
        }
    }
}

/// Per-speaker generation settings. Frozen for the duration of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    pub system_prompt: String,
    pub voice: Voice,
    pub speed: f32,
    pub temperature: f32,
    pub top_p: f32,
    pub response_length: ResponseLength,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self::with_voice(Voice::Brian)
    }
}

impl EntityConfig {
    pub fn with_voice(voice: Voice) -> Self {
        Self {
            system_prompt: String::new(),
            voice,
            speed: 1.0,
            temperature: 0.7,
            top_p: 1.0,
            response_length: ResponseLength::Medium,
        }
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// Length budget forwarded to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl ResponseLength {
    pub fn budget(self) -> u32 {
        match self {
            Self::Short => 35,
            Self::Medium => 60,
            Self::Long => 90,
        }
    }
}

impl FromStr for ResponseLength {
    type Err = DuetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "medium" => Ok(Self::Medium),
            "long" => Ok(Self::Long),
            _ => Err(DuetError::Config(format!("unknown response length `{s}`"))),
        }
    }
}

macro_rules! voices {
    ($($name:ident),+ $(,)?) => {
        /// Voices offered by the speech backend.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Voice {
            $($name,)+
        }

        impl Voice {
            pub const ALL: &'static [Voice] = &[$(Voice::$name,)+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Voice::$name => stringify!($name),)+
                }
            }
        }
    };
}

voices!(
    Adam, Alloy, Amanda, Andrew, Ava, Brandon, Brian, Christopher, Cora, Davis, Derek, Dustin,
    Echo, Emma, Evelyn, Fable, Jenny, Lewis, Lola, Nancy, Nova, Onyx, Phoebe, Ryan, Samuel,
    Serena, Shimmer, Steffan,
);

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = DuetError;

    fn from_str(s: &str) -> Result<Self> {
        Voice::ALL
            .iter()
            .copied()
            .find(|voice| voice.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DuetError::Config(format!("unknown voice `{s}`")))
    }
}

/// Styling hint for a prompt's character counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptGauge {
    Normal,
    Warning,
    Error,
}

/// Classifies a prompt length for display. Only [`MAX_PROMPT_CHARS`] is
/// enforced, by [`validate_entities`].
pub fn prompt_gauge(chars: usize) -> PromptGauge {
    if chars >= MAX_PROMPT_CHARS {
        PromptGauge::Error
    } else if chars > PROMPT_WARNING_CHARS {
        PromptGauge::Warning
    } else {
        PromptGauge::Normal
    }
}

/// Prompts whose length is worth flagging, with their character count.
pub fn prompt_hints(entities: &EntityPair<EntityConfig>) -> Vec<(EntityId, usize, PromptGauge)> {
    entities
        .iter()
        .filter_map(|(entity, config)| {
            let chars = config.system_prompt.trim().chars().count();
            match prompt_gauge(chars) {
                PromptGauge::Normal => None,
                gauge => Some((entity, chars, gauge)),
            }
        })
        .collect()
}

/// Trims both prompts and checks they hold 1..=375 characters.
pub fn validate_entities(entities: EntityPair<EntityConfig>) -> Result<EntityPair<EntityConfig>> {
    let entities = entities.map(|_, mut config| {
        config.system_prompt = config.system_prompt.trim().to_string();
        config
    });

    if entities.iter().any(|(_, config)| config.system_prompt.is_empty()) {
        return Err(DuetError::validation(
            "Please enter system prompts for both entities.",
        ));
    }

    entities.try_map(|entity, config| {
        check_prompt_length(entity, &config.system_prompt)?;
        Ok(config)
    })
}

fn check_prompt_length(entity: EntityId, prompt: &str) -> Result<()> {
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(DuetError::validation(format!(
            "System prompt for {entity} must be {MAX_PROMPT_CHARS} characters or less."
        )));
    }
    Ok(())
}
