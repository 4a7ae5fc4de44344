use anyhow::Result;
use clap::{Parser, Subcommand};
use crossterm::{
    event::{
        self, Event, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
        PushKeyboardEnhancementFlags,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{info, warn};
use mufique_radio::{
    actions::Response,
    app::AppController,
    audio::{Playback, StreamPlayer},
    cache::{HttpFetcher, OfflineCache},
    config::{self, Config},
    media_session::{MediaSession, TerminalTitle},
    metadata::{IcecastClient, MetadataPoller},
    theme, ui,
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "mufique-radio", version, about = "Listen to Mufique Radio in the terminal")]
struct Cli {
    /// Config file (default: <config_dir>/mufique-radio/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    stream_url: Option<String>,

    #[arg(long)]
    metadata_url: Option<String>,

    /// Initial volume, 0.0 to 1.0
    #[arg(long)]
    volume: Option<f32>,

    /// Leave the terminal title and media keys alone
    #[arg(long)]
    no_media_session: bool,

    /// Log file (default: <cache_dir>/mufique-radio/mufique.log)
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the offline copy of the web player's shell assets
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Download every manifest asset into the current bucket
    Install,
    /// Delete buckets from older versions
    Activate,
    /// Print an asset, from the cache when present
    Fetch { path: String },
    /// List buckets
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.stream_url {
        config.stream_url = url;
    }
    if let Some(url) = cli.metadata_url {
        config.metadata_url = url;
    }
    if let Some(volume) = cli.volume {
        config.initial_volume = volume;
    }
    if cli.no_media_session {
        config.media_session = false;
    }

    if let Some(Command::Cache { action }) = cli.command {
        env_logger::init();
        return run_cache_command(&config, action).await;
    }

    let log_file = cli
        .log_file
        .unwrap_or_else(|| config::cache_dir().join("mufique.log"));
    init_file_logging(&log_file)?;

    // Open the output device before touching the terminal so failures print normally
    let audio_player = StreamPlayer::new()?;

    // Set up panic handler to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic);
    }));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let enhanced_keys = config.media_session
        && crossterm::terminal::supports_keyboard_enhancement().unwrap_or(false)
        && execute!(
            stdout,
            PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES)
        )
        .is_ok();
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (tx, mut rx) = mpsc::channel::<Response>(32);
    let shutdown = CancellationToken::new();

    let poller = MetadataPoller::spawn(
        IcecastClient::new(config.metadata_url.clone()),
        Duration::from_secs(config.metadata_interval_secs),
        tx.clone(),
        shutdown.child_token(),
    );
    let theme_ticker = theme::spawn_ticker(
        Duration::from_secs(config.theme_interval_secs),
        tx.clone(),
        shutdown.child_token(),
    );
    register_offline_cache(&config, tx.clone());
    drop(tx);

    let media_session = MediaSession::new(config.media_session, Box::new(TerminalTitle));
    let mut app_controller = AppController::new(audio_player, &config, media_session);
    info!("Mufique Radio started");

    // Run the main loop
    let res = run_app(&mut terminal, &mut app_controller, &mut rx).await;

    shutdown.cancel();
    poller.join().await;
    let _ = theme_ticker.await;

    // Restore terminal
    if enhanced_keys {
        let _ = execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags);
    }
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

async fn run_app<P: Playback>(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app_controller: &mut AppController<P>,
    rx: &mut mpsc::Receiver<Response>,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui::render_ui(f, app_controller))?;

        // ~60 FPS: the poll timeout doubles as the frame delay
        if event::poll(Duration::from_millis(16))? {
            match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    if app_controller.handle_key_event(key.code).await? {
                        break; // Quit was requested
                    }
                }
                Ok(_) => {} // Resize is picked up by the next draw
                Err(e) => warn!("Failed to read terminal event: {}", e),
            }
        }

        while let Ok(resp) = rx.try_recv() {
            app_controller.process_response(resp);
        }

        app_controller.on_frame();

        if app_controller.should_quit() {
            break;
        }
    }

    Ok(())
}

fn init_file_logging(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

/// Install and activate the asset cache in the background.
fn register_offline_cache(config: &Config, tx: mpsc::Sender<Response>) {
    if config.cache.shell_base_url.is_none() {
        info!("No shell_base_url configured, offline cache not registered");
        return;
    }

    let cache_config = config.cache.clone();
    tokio::spawn(async move {
        let result = match OfflineCache::from_config(&cache_config, HttpFetcher::new()) {
            Ok(cache) => cache.register().await,
            Err(e) => Err(e),
        };
        let _ = tx.send(Response::CacheRegistered(result)).await;
    });
}

async fn run_cache_command(config: &Config, action: CacheAction) -> Result<()> {
    let cache = OfflineCache::from_config(&config.cache, HttpFetcher::new())?;
    match action {
        CacheAction::Install => {
            cache.install().await?;
            println!("Installed {}", cache.name());
        }
        CacheAction::Activate => {
            for name in cache.activate().await? {
                println!("Deleted {}", name);
            }
        }
        CacheAction::Fetch { path } => {
            let body = cache.fetch(&path).await?;
            io::Write::write_all(&mut io::stdout(), &body)?;
        }
        CacheAction::List => {
            for name in cache.storage().keys().await? {
                let marker = if name == cache.name() { "*" } else { " " };
                println!("{} {}", marker, name);
            }
        }
    }
    Ok(())
}
