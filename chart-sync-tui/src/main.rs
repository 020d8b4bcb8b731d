mod ui;
mod view;

use chart_sync::{ChartConfig, ChartEngine};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use parking_lot::Mutex;
use ratatui::{backend::CrosstermBackend, Terminal};
use rustls::crypto::ring::default_provider;
use std::{error::Error, fs::File, io, sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;
use view::ChartView;

const TICK_RATE: Duration = Duration::from_millis(250);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

const DEFAULT_LOG_FILE: &str = "chart-sync.log";

/// Log to a file; the terminal itself is owned by the UI.
fn init_logging() -> Result<(), Box<dyn Error>> {
    let path = std::env::var("CHART_LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
    let file = File::create(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = default_provider().install_default();
    init_logging()?;

    let config = ChartConfig::from_env();
    info!(backend = %config.backend_url, "Starting chart-sync-tui");

    let view = Arc::new(Mutex::new(ChartView::new(config.visible_bars)));
    let engine = ChartEngine::spawn(config, Arc::clone(&view))?;

    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(info);
    }));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &view);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    let stats = engine.shutdown_timeout(SHUTDOWN_TIMEOUT).await;
    info!(?stats, "chart-sync-tui exited");

    res?;
    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    view: &Mutex<ChartView>,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui::ui(f, &view.lock()))?;

        if !event::poll(TICK_RATE)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        let mut view = view.lock();
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Tab => view.focus_next(),
            KeyCode::Left => view.scroll(-1),
            KeyCode::Right => view.scroll(1),
            KeyCode::Up => view.zoom(0.8),
            KeyCode::Down => view.zoom(1.25),
            KeyCode::Char('f') => view.toggle_follow(),
            _ => {}
        }
    }
}
