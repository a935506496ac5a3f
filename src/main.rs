use clap::Parser;

use anyhow::anyhow;

use homevoice_engine::{EngineConfig, TransportKind, VoiceSessionEngine};

/// HomeVoice - realtime voice conversations about a property
#[derive(Parser, Debug)]
#[command(name = "homevoice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Identifier of the property to talk about
    #[arg(short = 'p', long = "property-id")]
    property_id: String,

    /// Transport variant: websocket or webrtc (overrides HOMEVOICE_TRANSPORT)
    #[arg(short = 't', long = "transport")]
    transport: Option<TransportKind>,

    /// Voice id to request from the provider
    #[arg(long = "voice")]
    voice: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = EngineConfig::from_env();
    if let Some(transport) = cli.transport {
        config.transport = transport;
    }
    if cli.voice.is_some() {
        config.voice = cli.voice;
    }

    println!(
        "Starting voice session for property {} over {}",
        cli.property_id, config.transport
    );

    let engine = VoiceSessionEngine::new(config);
    if let Err(e) = engine.start_session(&cli.property_id).await {
        if let Some(message) = engine.error_message() {
            eprintln!("{}", message);
        }
        return Err(anyhow!(e));
    }

    println!("Session active. Press Ctrl-C to hang up.");
    tokio::signal::ctrl_c().await?;

    println!("Hanging up...");
    engine.stop_session().await;

    Ok(())
}
