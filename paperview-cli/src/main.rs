use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use paperview_core::{Location, Point, Surface, ViewState, Viewer};
use paperview_render::PdfiumEngineFactory;
use paperview_tty::{write_status_line, DrawParams, GestureMapper, KittyRenderer, ViewportEvent};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "paperview",
    version,
    about = "continuous-scroll PDF viewer for kitty-compatible terminals"
)]
struct Args {
    /// Path to the PDF file to open
    file: PathBuf,

    /// Page to open on (0-based, overrides the saved view)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Initial zoom factor (overrides the saved view)
    #[arg(short = 'z', long = "zoom")]
    zoom: Option<f32>,

    /// Acceleration-cache path handed to the engine
    #[arg(long = "accel")]
    accel: Option<PathBuf>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
    }
}

/// Terminal cell geometry, used to convert between the cell grid crossterm
/// reports and the pixel surface the viewport paints.
#[derive(Debug, Clone, Copy)]
struct CellMetrics {
    columns: u16,
    rows: u16,
    cell_width: f32,
    cell_height: f32,
}

impl CellMetrics {
    fn measure() -> Result<Self> {
        let window = terminal::window_size()?;
        let columns = window.columns.max(1);
        let rows = window.rows.max(1);
        // terminals without pixel reporting get a typical kitty cell size
        let cell_width = if window.width > 0 {
            window.width as f32 / columns as f32
        } else {
            8.0
        };
        let cell_height = if window.height > 0 {
            window.height as f32 / rows as f32
        } else {
            16.0
        };
        Ok(Self {
            columns,
            rows,
            cell_width,
            cell_height,
        })
    }

    /// Pixel area available for the document; the bottom row is reserved for
    /// the status line.
    fn surface_extent(&self) -> (u32, u32) {
        let image_rows = self.rows.saturating_sub(1).max(1);
        (
            (self.cell_width * self.columns as f32).round().max(1.0) as u32,
            (self.cell_height * image_rows as f32).round().max(1.0) as u32,
        )
    }

    fn image_rows(&self) -> u32 {
        u32::from(self.rows.saturating_sub(1).max(1))
    }

    fn cell_to_point(&self, column: u16, row: u16) -> Point {
        Point::new(
            (column as f32 + 0.5) * self.cell_width,
            (row as f32 + 0.5) * self.cell_height,
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "paperview", "paperview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let provider = PdfiumEngineFactory::new()?;
    let mut viewer = Viewer::open(&provider, &args.file, args.accel.as_deref())
        .await
        .with_context(|| format!("failed to open {:?}", args.file))?;

    let state_path = view_state_path(&project_dirs, &args.file);
    let restored = restore_saved_view(&mut viewer, &state_path);

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide, EnableMouseCapture)?;
    let mut renderer = KittyRenderer::new(stdout);
    let mut mapper = GestureMapper::new();

    let mut metrics = CellMetrics::measure()?;
    let (width, height) = metrics.surface_extent();
    viewer.handle_resize(width, height)?;

    if let Some(page) = args.page {
        viewer.goto(Location::new(0, page))?;
    }
    if let Some(zoom) = args.zoom {
        let anchor = Point::new(width as f32 / 2.0, height as f32 / 2.0);
        viewer.zoom_around(zoom - viewer.zoom(), anchor)?;
    }
    if !restored {
        viewer.center_current_page()?;
    }

    renderer.clear_all()?;
    let mut dirty = true;

    loop {
        if dirty {
            redraw(&mut renderer, &mut viewer, &metrics, mapper.pending_input())?;
            dirty = false;
        }

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let ev = event::read()?;
        if let Event::Resize(..) = ev {
            metrics = CellMetrics::measure()?;
            let (width, height) = metrics.surface_extent();
            viewer.handle_resize(width, height)?;
            renderer.clear_all()?;
            dirty = true;
            continue;
        }

        match mapper.map_event(ev) {
            ViewportEvent::Scroll { delta_x, delta_y } => {
                viewer.scroll_by(delta_x, delta_y)?;
                dirty = true;
            }
            ViewportEvent::Zoom { delta, anchor } => {
                let anchor = anchor.map(|(column, row)| metrics.cell_to_point(column, row));
                viewer.handle_scroll(0.0, delta, true, anchor)?;
                dirty = true;
            }
            ViewportEvent::ZoomReset => {
                let (width, height) = metrics.surface_extent();
                let anchor = Point::new(width as f32 / 2.0, height as f32 / 2.0);
                viewer.zoom_around(1.0 - viewer.zoom(), anchor)?;
                dirty = true;
            }
            ViewportEvent::Click {
                column,
                row,
                button,
            } => {
                let point = metrics.cell_to_point(column, row);
                if let Some(action) = viewer.handle_click(point, button)? {
                    info!(?action, "link activated");
                }
                dirty = true;
            }
            ViewportEvent::CenterPage => {
                viewer.center_current_page()?;
                dirty = true;
            }
            ViewportEvent::Rotate => {
                viewer.rotate_clockwise()?;
                dirty = true;
            }
            ViewportEvent::GotoStart => {
                viewer.goto(Location::default())?;
                dirty = true;
            }
            ViewportEvent::GotoEnd => {
                viewer.goto_last_page()?;
                dirty = true;
            }
            ViewportEvent::Quit => break,
            ViewportEvent::None => {}
        }
    }

    renderer.clear_all()?;
    save_view(&viewer, &state_path);
    Ok(())
}

fn redraw(
    renderer: &mut KittyRenderer<io::Stdout>,
    viewer: &mut Viewer,
    metrics: &CellMetrics,
    pending: Option<String>,
) -> Result<()> {
    let (width, height) = metrics.surface_extent();
    let mut surface = Surface::new(width, height);
    viewer.paint(&mut surface)?;

    renderer.begin_sync_update()?;
    {
        let mut writer = renderer.writer();
        crossterm::execute!(&mut writer, cursor::MoveTo(0, 0))?;
    }
    renderer.draw(
        &surface,
        DrawParams::clamped(u32::from(metrics.columns), metrics.image_rows()),
    )?;
    draw_status_line(renderer, metrics, &status_text(viewer, pending.as_deref()))?;
    renderer.end_sync_update()?;
    Ok(())
}

fn status_text(viewer: &Viewer, pending: Option<&str>) -> String {
    let location = viewer.location();
    let zoom_percent = viewer.zoom() * 100.0;
    let mut status = format!("page {} | {:.0}%", location, zoom_percent);
    if viewer.rotation().degrees() != 0 {
        status.push_str(&format!(" | {}deg", viewer.rotation().degrees()));
    }
    if let Some(pending) = pending.filter(|s| !s.is_empty()) {
        status.push_str(" | ");
        status.push_str(pending);
    }
    status
}

fn draw_status_line(
    renderer: &mut KittyRenderer<io::Stdout>,
    metrics: &CellMetrics,
    status: &str,
) -> Result<()> {
    let status_row = metrics.rows.saturating_sub(1);
    let mut writer = renderer.writer();
    crossterm::execute!(
        &mut writer,
        cursor::MoveTo(0, status_row),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(&mut writer, status)?;
    Ok(())
}

fn view_state_path(project_dirs: &ProjectDirs, document: &Path) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    document.hash(&mut hasher);
    project_dirs
        .data_local_dir()
        .join("state")
        .join(format!("{:016x}.json", hasher.finish()))
}

fn restore_saved_view(viewer: &mut Viewer, path: &Path) -> bool {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return false,
    };
    match serde_json::from_str::<ViewState>(&raw) {
        Ok(state) => match viewer.restore_view_state(state) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "saved view no longer matches the document");
                false
            }
        },
        Err(err) => {
            warn!(error = %err, path = %path.display(), "unreadable view state");
            false
        }
    }
}

fn save_view(viewer: &Viewer, path: &Path) {
    let state = viewer.view_state();
    let write = || -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&state)?)?;
        Ok(())
    };
    if let Err(err) = write() {
        warn!(error = %err, path = %path.display(), "failed to save view state");
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "paperview.log");
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

    Ok(guard)
}
