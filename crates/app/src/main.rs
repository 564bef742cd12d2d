mod commands;
mod console;
mod feed;
mod meter;
mod output;
mod presets;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use duet_core::{
    AppConfig, DuetError, EntityId, NullRenderer, RadialPulse, Renderer, ResponseLength,
    Session, SessionDriver, SessionInput, SessionParts, UserCommand, Voice, WaveFill,
    WsTransport,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> duet_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Presets => {
            presets::print();
            Ok(())
        }
        Commands::Voices => {
            for voice in Voice::ALL {
                println!("{voice}");
            }
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> duet_core::Result<()> {
    let config = load_config(&args)?;
    tracing::info!(server = %config.server_url, preset = args.preset.as_deref(), "starting duet");

    let (inputs, events) = mpsc::unbounded_channel();
    let clips = feed::ClipFeed::default();
    let output = output::RodioOutput::new(
        &config.server_url,
        &config.audio,
        inputs.clone(),
        clips.clone(),
    )?;
    let renderer: Box<dyn Renderer> = match args.visual {
        Visual::Off => Box::new(NullRenderer),
        Visual::Wave => Box::new(meter::TerminalRenderer::new(Box::new(WaveFill))),
        Visual::Radial => Box::new(meter::TerminalRenderer::new(Box::new(RadialPulse))),
    };
    let session = Session::new(
        &config,
        SessionParts {
            transport: Box::new(WsTransport::new(config.server_url.clone(), inputs.clone())),
            output: Box::new(output),
            renderer,
            feed: Box::new(clips),
            observer: Box::new(console::ConsoleObserver::default()),
        },
    );

    let ready = config
        .entities
        .iter()
        .all(|(_, entity)| !entity.system_prompt.trim().is_empty());
    if ready {
        let _ = inputs.send(SessionInput::User(UserCommand::Start(config.entities.clone())));
    } else {
        eprintln!("No prompts yet: load one with `preset <name>`, then type `start`.");
    }
    eprintln!("{}", commands::HELP);

    tokio::spawn(commands::read_stdin(inputs.clone(), config.entities.clone()));
    tokio::spawn(shutdown_on_ctrl_c(inputs));

    SessionDriver::new(session, events).run().await;
    tracing::info!("bye");
    Ok(())
}

fn load_config(args: &RunArgs) -> duet_core::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    if let Some(server) = &args.server {
        config.server_url = server.clone();
    }
    if let Some(name) = &args.preset {
        let preset = presets::find(name)
            .ok_or_else(|| DuetError::Config(format!("unknown preset `{name}`")))?;
        preset.apply(&mut config.entities);
    }

    let overrides = [
        (EntityId::One, &args.prompt1, args.voice1, args.length1),
        (EntityId::Two, &args.prompt2, args.voice2, args.length2),
    ];
    for (entity, prompt, voice, length) in overrides {
        let settings = &mut config.entities[entity];
        if let Some(prompt) = prompt {
            settings.system_prompt = prompt.clone();
        }
        if let Some(voice) = voice {
            settings.voice = voice;
        }
        if let Some(length) = length {
            settings.response_length = length;
        }
    }

    commands::warn_long_prompts(&config.entities);

    if let Some(volume) = args.volume {
        config.audio.volume = f32::from(volume) / 100.0;
    }
    if args.muted {
        config.audio.muted = true;
    }
    Ok(config)
}

async fn shutdown_on_ctrl_c(inputs: mpsc::UnboundedSender<SessionInput>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("interrupt received; shutting down");
        let _ = inputs.send(SessionInput::User(UserCommand::Shutdown));
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Two-voice spoken dialogue client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the dialogue server and run a conversation.
    Run(RunArgs),
    /// List the sample conversations.
    Presets,
    /// List the available voices.
    Voices,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// WebSocket address of the dialogue server.
    #[arg(short, long)]
    server: Option<String>,
    /// Sample conversation to load (see `duet presets`).
    #[arg(short, long)]
    preset: Option<String>,
    /// System prompt for entity 1.
    #[arg(long)]
    prompt1: Option<String>,
    /// System prompt for entity 2.
    #[arg(long)]
    prompt2: Option<String>,
    #[arg(long)]
    voice1: Option<Voice>,
    #[arg(long)]
    voice2: Option<Voice>,
    /// Response length for entity 1: short, medium or long.
    #[arg(long)]
    length1: Option<ResponseLength>,
    /// Response length for entity 2: short, medium or long.
    #[arg(long)]
    length2: Option<ResponseLength>,
    /// Speaking indicator drawn on stderr.
    #[arg(long, value_enum, default_value_t = Visual::Off)]
    visual: Visual,
    /// Playback volume in percent.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    volume: Option<u8>,
    /// Start with audio muted.
    #[arg(long)]
    muted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Visual {
    Off,
    Wave,
    Radial,
}
