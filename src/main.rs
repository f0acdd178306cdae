use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sprout_gateway::Config;
use sprout_gateway::api::ApiServerBuilder;
use sprout_gateway::voice::SpeechRequest;

/// Sprout - voice companion gateway for children
#[derive(Parser)]
#[command(name = "sprout", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/sprout/config.toml)
    #[arg(short, long, env = "SPROUT_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default)
    Serve,
    /// Classify a transcript with the configured quality thresholds
    Evaluate {
        /// Finalized transcript
        transcript: String,
        /// Recognizer confidence (0..1)
        #[arg(short, long, default_value = "1.0")]
        confidence: f64,
        /// Utterance duration in milliseconds
        #[arg(short, long, default_value = "1000")]
        duration_ms: u64,
    },
    /// Synthesize speech and write it to a file
    Synthesize {
        /// Text to speak
        #[arg(default_value = "Hi there! Want to hear a story?")]
        text: String,
        /// Output file
        #[arg(short, long, default_value = "sprout.mp3")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,sprout_gateway=info",
        1 => "info,sprout_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, cli.port).await,
        Command::Evaluate {
            transcript,
            confidence,
            duration_ms,
        } => {
            let verdict = config.quality.evaluate(&transcript, confidence, duration_ms);
            println!("{verdict}");
            Ok(())
        }
        Command::Synthesize { text, output } => synthesize(&config, &text, &output).await,
    }
}

async fn serve(config: &Config, port: Option<u16>) -> anyhow::Result<()> {
    let mut builder = ApiServerBuilder::from_config(config)?;
    if let Some(port) = port {
        builder = builder.port(port);
    }

    tracing::info!(
        port = port.unwrap_or(config.server.port),
        stt_model = %config.recognizer.params.model,
        chat_model = %config.chat_model,
        "starting sprout gateway"
    );

    let server = builder.build();

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    Ok(())
}

async fn synthesize(config: &Config, text: &str, output: &std::path::Path) -> anyhow::Result<()> {
    let builder = ApiServerBuilder::from_config(config)?;
    let Some(synthesizer) = builder.build().synthesizer() else {
        anyhow::bail!("no TTS key configured for provider {:?}", config.tts.provider);
    };

    let audio = synthesizer.synthesize(&SpeechRequest::new(text)).await?;
    tokio::fs::write(output, &audio.bytes).await?;

    println!(
        "wrote {} bytes of {} audio to {}",
        audio.bytes.len(),
        audio.encoding,
        output.display()
    );
    Ok(())
}
