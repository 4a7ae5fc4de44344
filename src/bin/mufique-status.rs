// One-shot now-playing lookup, no audio device needed
use anyhow::Result;
use clap::Parser;
use mufique_radio::{
    config::Config,
    metadata::{process_metadata, IcecastClient, StatusSource},
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mufique-status", version, about = "Print what Mufique Radio is playing")]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    metadata_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let url = cli.metadata_url.unwrap_or(config.metadata_url);

    let source = IcecastClient::new(url).fetch_status().await?;
    let Some(source) = source else {
        anyhow::bail!("status document has no source");
    };

    match source.title.as_deref().filter(|t| !t.is_empty()) {
        Some(raw) => {
            let now_playing = process_metadata(raw, &config.default_artist);
            println!("{} - {}", now_playing.artist, now_playing.title);
        }
        None => println!("{}", config.default_artist),
    }
    if let Some(listeners) = source.listeners {
        println!("{} listeners", listeners);
    }
    Ok(())
}
