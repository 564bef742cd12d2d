//! Line-oriented control commands read from stdin.

use duet_core::{
    prompt_hints, EntityConfig, EntityPair, PromptGauge, SessionInput, UserCommand,
    MAX_PROMPT_CHARS,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};

use crate::presets;

pub const HELP: &str = "\
commands:
  start            start a conversation with the current prompts
  stop             stop the conversation
  toggle           start or stop, depending on the current state
  mute             mute or unmute audio
  volume <0-100>   set the playback volume
  preset <name>    load a sample conversation (riddles, political, jokes)
  ack              dismiss the current error
  help             show this list
  quit             stop and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Toggle,
    Mute,
    Volume(u8),
    Preset(String),
    Ack,
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let argument = words.next();

    let command = match head.to_ascii_lowercase().as_str() {
        "start" => Command::Start,
        "stop" => Command::Stop,
        "toggle" | "t" => Command::Toggle,
        "mute" | "unmute" | "m" => Command::Mute,
        "volume" | "vol" => {
            let value = argument.ok_or("usage: volume <0-100>")?;
            match value.parse::<u8>() {
                Ok(percent) if percent <= 100 => Command::Volume(percent),
                _ => return Err(format!("volume must be between 0 and 100, got `{value}`")),
            }
        }
        "preset" => Command::Preset(argument.ok_or("usage: preset <name>")?.to_string()),
        "ack" | "ok" => Command::Ack,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command `{other}`; type `help`")),
    };
    Ok(Some(command))
}

/// Turns a command into a session input, updating the prompts held by the
/// reader where needed. Commands handled locally yield `None`.
pub fn to_input(
    command: Command,
    entities: &mut EntityPair<EntityConfig>,
) -> Result<Option<UserCommand>, String> {
    let input = match command {
        Command::Start => UserCommand::Start(entities.clone()),
        Command::Stop => UserCommand::Stop,
        Command::Toggle => UserCommand::Toggle(entities.clone()),
        Command::Mute => UserCommand::ToggleMute,
        Command::Volume(percent) => UserCommand::SetVolume(percent),
        Command::Ack => UserCommand::AcknowledgeError,
        Command::Quit => UserCommand::Shutdown,
        Command::Preset(name) => {
            let preset = presets::find(&name).ok_or(format!("unknown preset `{name}`"))?;
            preset.apply(entities);
            eprintln!("loaded preset `{}`", preset.name);
            warn_long_prompts(entities);
            return Ok(None);
        }
        Command::Help => {
            eprintln!("{HELP}");
            return Ok(None);
        }
    };
    Ok(Some(input))
}

/// Logs a warning for prompts close to or at the length limit.
pub fn warn_long_prompts(entities: &EntityPair<EntityConfig>) -> usize {
    let hints = prompt_hints(entities);
    for (entity, chars, gauge) in &hints {
        match gauge {
            PromptGauge::Error => tracing::warn!(
                %entity, chars, limit = MAX_PROMPT_CHARS, "system prompt is at the length limit"
            ),
            _ => tracing::warn!(
                %entity, chars, limit = MAX_PROMPT_CHARS, "system prompt is getting long"
            ),
        }
    }
    hints.len()
}

/// Forwards stdin commands to the session until `quit` or end of input, then
/// requests a shutdown.
pub async fn read_stdin(
    inputs: mpsc::UnboundedSender<SessionInput>,
    mut entities: EntityPair<EntityConfig>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "stdin read failed");
                break;
            }
        };

        let input = parse(&line).and_then(|command| match command {
            Some(command) => to_input(command, &mut entities),
            None => Ok(None),
        });
        match input {
            Ok(Some(UserCommand::Shutdown)) => break,
            Ok(Some(command)) => {
                if inputs.send(SessionInput::User(command)).is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(message) => eprintln!("{message}"),
        }
    }
    let _ = inputs.send(SessionInput::User(UserCommand::Shutdown));
}

#[cfg(test)]
mod tests {
    use duet_core::{EntityId, Voice};

    use super::*;

    #[test]
    fn parses_commands_and_arguments() {
        assert_eq!(parse("  start "), Ok(Some(Command::Start)));
        assert_eq!(parse("VOLUME 35"), Ok(Some(Command::Volume(35))));
        assert_eq!(
            parse("preset jokes"),
            Ok(Some(Command::Preset("jokes".into())))
        );
        assert_eq!(parse(""), Ok(None));
    }

    #[test]
    fn rejects_bad_volume_and_unknown_words() {
        assert!(parse("volume").is_err());
        assert!(parse("volume 101").is_err());
        assert!(parse("volume loud").is_err());
        assert!(parse("dance").is_err());
    }

    #[test]
    fn preset_updates_prompts_for_later_starts() {
        let mut entities = EntityPair::new(
            EntityConfig::with_voice(Voice::Brian),
            EntityConfig::with_voice(Voice::Ava),
        );

        let input = to_input(Command::Preset("riddles".into()), &mut entities).unwrap();
        assert!(input.is_none());

        let Some(UserCommand::Start(sent)) = to_input(Command::Start, &mut entities).unwrap()
        else {
            panic!("expected a start command");
        };
        assert!(sent[EntityId::One].system_prompt.starts_with("You engage"));
        assert_eq!(sent[EntityId::Two].voice, Voice::Ava);
    }

    #[test]
    fn unknown_preset_is_reported() {
        let mut entities = EntityPair::default();
        assert!(to_input(Command::Preset("poetry".into()), &mut entities).is_err());
    }

    #[test]
    fn long_prompts_are_counted_once_each() {
        let entities = EntityPair::new(
            EntityConfig::with_voice(Voice::Brian).prompt("x".repeat(320)),
            EntityConfig::with_voice(Voice::Ava).prompt("y".repeat(375)),
        );
        assert_eq!(warn_long_prompts(&entities), 2);
        assert_eq!(warn_long_prompts(&EntityPair::default()), 0);
    }
}
