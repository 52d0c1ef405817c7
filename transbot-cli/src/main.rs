use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use transbot::{
    Bot, Config, Context, GoogleTranslator, Model, TelegramClient, TelegramTransport,
    WhisperEngine,
};

#[derive(Parser)]
#[command(
    name = "transbot-cli",
    about = "Telegram bot that transcribes and translates audio/video"
)]
struct Cli {
    /// Path to the TOML config file. A missing file means defaults plus environment.
    #[arg(short, long, default_value = "transbot.toml")]
    config: PathBuf,

    /// List available whisper models and the ones already cached.
    #[arg(long)]
    list_models: bool,

    /// Download a whisper model into the cache and exit.
    #[arg(long)]
    download_model: Option<String>,

    /// Validate the configuration, print it (token redacted) and exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Model management works without bot credentials, so only load the file here.
    let file_config = match Config::load_from(&cli.config) {
        Ok(c) => c,
        Err(e) => fail(&format!("Error reading {}: {e}", cli.config.display())),
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(file_config.logging.level.as_directive())
        });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if cli.list_models {
        list_models(&file_config);
        return;
    }

    if let Some(name) = &cli.download_model {
        let Some(model) = Model::parse_name(name) else {
            eprintln!("Unknown model: {name}");
            fail("Use --list-models to see available models");
        };
        let cache_dir = file_config.transcription.resolve_cache_dir();
        match transbot::model::ensure_model(&model, &cache_dir).await {
            Ok(path) => println!("Model ready: {}", path.display()),
            Err(e) => fail(&format!("Error: {e}")),
        }
        return;
    }

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => fail(&format!("Error: {e}")),
    };

    if cli.check_config {
        match toml::to_string_pretty(&config.redacted()) {
            Ok(text) => print!("{text}"),
            Err(e) => fail(&format!("Error: {e}")),
        }
        return;
    }

    if let Err(e) = run(config).await {
        fail(&format!("Error: {e}"));
    }
}

async fn run(config: Config) -> transbot::Result<()> {
    tokio::fs::create_dir_all(&config.media.uploads_dir).await?;

    let operator = config
        .telegram
        .operator_chat_id
        .ok_or_else(|| transbot::Error::Config("ADMIN_USER_ID is not set".into()))?;
    let client = Arc::new(TelegramClient::new(&config.telegram.api_base, &config.telegram.token));

    info!(model = %config.transcription.model, "loading speech model");
    let speech = WhisperEngine::load(&config.transcription).await?;
    let translator = GoogleTranslator::new(&config.translation.endpoint);

    info!(
        target = %config.translation.target,
        uploads = %config.media.uploads_dir.display(),
        "starting bot"
    );
    let ctx = Context::new(
        config,
        Arc::new(TelegramTransport::new(Arc::clone(&client), operator)),
        Arc::new(speech),
        Arc::new(translator),
    );

    Bot::new(client, Arc::new(ctx))
        .run(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
}

fn list_models(config: &Config) {
    println!("{:<16} SIZE", "MODEL");
    println!("{:<16} ----", "-----");
    for (name, size) in Model::CATALOGUE {
        println!("{name:<16} {size}");
    }

    let cache_dir = config.transcription.resolve_cache_dir();
    let cached = transbot::model::list_cached_models(&cache_dir);
    if !cached.is_empty() {
        println!("\nCached models in {}:", cache_dir.display());
        for path in cached {
            let size = std::fs::metadata(&path)
                .map(|m| format_bytes(m.len()))
                .unwrap_or_default();
            println!(
                "  {} ({size})",
                path.file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default()
            );
        }
    }
}

fn fail(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.0} MB", bytes as f64 / 1_000_000.0)
    } else {
        format!("{:.0} KB", bytes as f64 / 1_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli::parse_from(["transbot-cli"]);
        assert_eq!(cli.config, PathBuf::from("transbot.toml"));
        assert!(!cli.list_models);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(466_000_000), "466 MB");
        assert_eq!(format_bytes(2_900_000_000), "2.9 GB");
        assert_eq!(format_bytes(5_000), "5 KB");
    }
}
