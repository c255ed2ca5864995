use anyhow::Result;
use kbchat_core::Config;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

#[tokio::main]
async fn main() -> Result<()> {
    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    // Logs go to a file since the TUI owns the terminal
    let log_dir = Config::log_dir()?;
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "kbchat.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .init();

    if let Some(e) = config_error {
        warn!(error = %e, "failed to load config, using defaults");
    }
    info!(api_url = %config.api_url, "starting kbchat");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let result = run(&mut terminal, config).await;

    tui::restore()?;
    result
}

async fn run(terminal: &mut tui::Tui, config: Config) -> Result<()> {
    let mut events = EventHandler::new();
    let mut app = App::new(config, events.sender(), events.stream_sender())?;
    app.refresh_documents();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        let Some(event) = events.next().await else {
            break;
        };
        handler::handle_event(&mut app, event)?;
    }

    app.cancel_stream();
    info!("exiting");
    Ok(())
}
