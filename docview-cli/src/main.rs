mod chrome;
mod find;
mod viewer;

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, Event, KeyEvent, KeyEventKind};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use docview_core::types::RendererType;
use docview_core::{
    AppOptions, Collaborators, DocumentSource, EventBus, FileHistoryBackend, OpenArgs,
    SessionController, TokioIdleScheduler, ViewHistoryFactory,
};
use docview_engine::PdfiumEngine;
use docview_tty::{write_status_line, EventMapper, StatusLine, UiEvent};
use serde_json::{Map, Value};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};
use url::Url;

use crate::chrome::{TerminalChrome, TerminalPasswordPrompt};
use crate::find::TerminalFind;
use crate::viewer::{TerminalLinks, TerminalViewer};

#[derive(Debug, Parser)]
#[command(
    name = "docview",
    version,
    about = "Terminal PDF viewer that remembers where you left off"
)]
struct Args {
    /// Position to open at, e.g. `page=3` or `page=2&zoom=1.5,0,0`
    #[arg(short = 'b', long = "bookmark")]
    bookmark: Option<String>,

    /// Page to open on (1-based)
    #[arg(short = 'p', long = "page", conflicts_with = "bookmark")]
    page: Option<usize>,

    /// Options file to read instead of the one in the config directory
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Override a single option, e.g. `--set view_on_load=1`
    #[arg(long = "set", value_name = "NAME=VALUE")]
    overrides: Vec<String>,

    /// Password for an encrypted document
    #[arg(long = "password")]
    password: Option<String>,

    /// PDF file to open
    file: PathBuf,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("org", "docview", "docview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;
    let options = load_options(&args, &project_dirs)?;

    let history_path = project_dirs.data_local_dir().join("history.json");
    let backend = Arc::new(FileHistoryBackend::new(history_path)?);
    let cache_size = usize::try_from(options.get_i64("history_cache_size")).unwrap_or(20);
    let idle_delay =
        Duration::from_millis(u64::try_from(options.get_i64("idle_callback_delay_ms")).unwrap_or(1_000));
    let renderer = options
        .get_str("renderer")
        .parse()
        .unwrap_or(RendererType::Canvas);

    let bus = EventBus::new();
    let viewer = TerminalViewer::new(bus.clone(), renderer);
    let chrome = TerminalChrome::new(bus.clone());
    let parts = Collaborators {
        engine: Arc::new(PdfiumEngine::new()?),
        history: Arc::new(ViewHistoryFactory::new(backend, cache_size)),
        viewer: Arc::new(viewer.clone()),
        thumbnails: Arc::new(chrome.clone()),
        rendering_queue: Arc::new(viewer.clone()),
        link_service: Arc::new(TerminalLinks::new(viewer.clone())),
        sidebar: Arc::new(chrome.clone()),
        toolbar: Arc::new(chrome.clone()),
        outline: Arc::new(chrome.clone()),
        attachments: Arc::new(chrome.clone()),
        layers: Arc::new(chrome.clone()),
        find_controller: Arc::new(TerminalFind::new(bus.clone())),
        find_bar: Arc::new(chrome.clone()),
        properties: Arc::new(chrome.clone()),
        scripting: Arc::new(chrome.clone()),
        password_prompt: Arc::new(TerminalPasswordPrompt),
        progress: Arc::new(chrome.clone()),
        errors: Arc::new(chrome.clone()),
        services: Arc::new(chrome.clone()),
        idle: Arc::new(TokioIdleScheduler::new(idle_delay)),
        bus,
    };
    let controller = SessionController::new(parts, options);

    let url = file_url(&args.file)?;
    let mut overrides = Map::new();
    if let Some(password) = &args.password {
        overrides.insert("password".to_owned(), Value::from(password.as_str()));
    }
    let open_args = OpenArgs {
        bookmark: args
            .bookmark
            .clone()
            .or_else(|| args.page.map(|page| format!("page={page}"))),
        overrides,
        ..OpenArgs::default()
    };
    info!(%url, "opening document");
    controller
        .open(DocumentSource::Url(url.to_string()), open_args)
        .await
        .with_context(|| format!("failed to open {}", args.file.display()))?;

    let result = run(&controller, &viewer, &chrome).await;
    controller.close().await;
    result
}

async fn run(
    controller: &SessionController,
    viewer: &TerminalViewer,
    chrome: &TerminalChrome,
) -> Result<()> {
    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide, Clear(ClearType::All))?;
    let mut event_mapper = EventMapper::new();
    let mut dirty = true;

    loop {
        if chrome.take_dirty() || dirty {
            let (scroll_mode, spread_mode) = viewer.view_modes();
            event_mapper.sync_view_modes(scroll_mode, spread_mode);
            redraw(&mut stdout, chrome, event_mapper.pending_input())?;
            dirty = false;
        }

        if !tokio::task::block_in_place(|| event::poll(Duration::from_millis(100)))? {
            continue;
        }
        let ev = event::read()?;
        if matches!(
            ev,
            Event::Key(KeyEvent {
                kind: KeyEventKind::Release,
                ..
            })
        ) {
            continue;
        }
        dirty = true;
        if chrome.properties_visible() && matches!(ev, Event::Key(_)) {
            chrome.hide_properties();
            continue;
        }
        match event_mapper.map_event(ev) {
            UiEvent::Quit => break,
            UiEvent::Viewer(event) => controller.bus().dispatch(event),
            UiEvent::BeginSearch
            | UiEvent::SearchQueryChanged { .. }
            | UiEvent::SearchCancel
            | UiEvent::None => {}
        }
    }

    crossterm::execute!(stdout, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    Ok(())
}

fn redraw(stdout: &mut io::Stdout, chrome: &TerminalChrome, pending: Option<String>) -> Result<()> {
    let (cols, rows) = terminal::size()?;
    let body_rows = usize::from(rows.saturating_sub(1));
    crossterm::queue!(stdout, Clear(ClearType::All))?;
    for (row, line) in chrome.panel_lines().iter().take(body_rows).enumerate() {
        let line: String = line.chars().take(usize::from(cols)).collect();
        crossterm::queue!(stdout, cursor::MoveTo(0, row as u16), Print(line))?;
    }
    stdout.flush()?;
    draw_status_line(stdout, &chrome.status_line(pending), rows)
}

fn draw_status_line(stdout: &mut io::Stdout, status: &StatusLine, rows: u16) -> Result<()> {
    crossterm::execute!(
        stdout,
        cursor::MoveTo(0, rows.saturating_sub(1)),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(stdout, status)?;
    Ok(())
}

fn file_url(path: &Path) -> Result<Url> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .context("failed to read the working directory")?
            .join(path)
    };
    Url::from_file_path(&absolute)
        .map_err(|_| anyhow!("cannot express {} as a file URL", absolute.display()))
}

fn load_options(args: &Args, project_dirs: &ProjectDirs) -> Result<AppOptions> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("options.toml"));
    let mut options = AppOptions::load(&path)
        .with_context(|| format!("failed to load options from {}", path.display()))?;
    for entry in &args.overrides {
        let (name, value) = parse_override(entry)?;
        options
            .set(&name, value)
            .with_context(|| format!("invalid option override `{entry}`"))?;
    }
    Ok(options)
}

/// Splits `name=value`; the value is read as JSON and falls back to a string.
fn parse_override(entry: &str) -> Result<(String, Value)> {
    let (name, raw) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got `{entry}`"))?;
    let raw = raw.trim();
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw));
    Ok((name.trim().to_owned(), value))
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "docview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    if env::var_os(docview_engine::PDFIUM_LIBRARY_ENV).is_none() {
        warn!(
            "{} is not set; looking for pdfium next to the binary and on the system path",
            docview_engine::PDFIUM_LIBRARY_ENV
        );
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overrides_parse_json_or_fall_back_to_strings() {
        let (name, value) = parse_override("view_on_load=1").unwrap();
        assert_eq!(name, "view_on_load");
        assert_eq!(value, json!(1));

        assert_eq!(
            parse_override("default_zoom_value = page-fit").unwrap().1,
            json!("page-fit")
        );
        assert_eq!(
            parse_override("enable_scripting=true").unwrap().1,
            json!(true)
        );
        assert!(parse_override("view_on_load").is_err());
    }

    #[test]
    fn relative_paths_become_file_urls() {
        let url = file_url(Path::new("docs/report.pdf")).unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/docs/report.pdf"));
    }

    #[test]
    fn args_reject_page_with_bookmark() {
        assert!(Args::try_parse_from(["docview", "-p", "3", "-b", "page=2", "a.pdf"]).is_err());
        let args = Args::try_parse_from([
            "docview",
            "--set",
            "view_on_load=1",
            "--set",
            "renderer=\"svg\"",
            "a.pdf",
        ])
        .unwrap();
        assert_eq!(args.overrides.len(), 2);
        assert_eq!(args.file, PathBuf::from("a.pdf"));
    }
}
