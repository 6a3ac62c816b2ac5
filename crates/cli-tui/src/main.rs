use anyhow::{Context, Result};
use archiver::{manifest::load_all_records, BatchConfig, FileState, ManifestRecord};
use chrono::Local;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode};
use humansize::{format_size, DECIMAL};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use std::io::stdout;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use sysinfo::System;

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

struct App {
    records: Vec<ManifestRecord>,
    load_error: Option<String>,
    system: System,
    table_state: TableState,
    should_quit: bool,
    state_dir: PathBuf,
    project_id: String,
}

impl App {
    fn new(state_dir: PathBuf, project_id: String) -> Self {
        Self {
            records: Vec::new(),
            load_error: None,
            system: System::new(),
            table_state: TableState::default(),
            should_quit: false,
            state_dir,
            project_id,
        }
    }

    fn refresh(&mut self) {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        match load_all_records(&self.state_dir) {
            Ok(mut records) => {
                // Most recently touched first
                records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                self.records = records;
                self.load_error = None;
            }
            Err(e) => {
                self.records.clear();
                self.load_error = Some(e.to_string());
            }
        }
    }

    fn count_by_state(&self, state: FileState) -> usize {
        self.records.iter().filter(|r| r.state == state).count()
    }
}

/// Terminal monitor for the autotranscode processing manifest
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Project root whose manifest to show
    #[arg(short, long)]
    project_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = BatchConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(dir) = args.project_dir {
        cfg.project_dir = dir;
    }

    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = stdout();
    crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(cfg.state_path(), cfg.resolved_project_id());
    let result = run(&mut terminal, &mut app);

    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        crossterm::terminal::LeaveAlternateScreen
    )?;

    result
}

fn run(terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>, app: &mut App) -> Result<()> {
    app.refresh();
    let mut last_refresh = Instant::now();

    while !app.should_quit {
        if last_refresh.elapsed() >= REFRESH_INTERVAL {
            app.refresh();
            last_refresh = Instant::now();
        }

        terminal.draw(|f| ui(f, app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') => app.should_quit = true,
                    KeyCode::Char('r') => {
                        app.refresh();
                        last_refresh = Instant::now();
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

fn ui(f: &mut Frame, app: &mut App) {
    let size = f.size();

    if size.height < 10 || size.width < 80 {
        let error_msg = Paragraph::new("Terminal too small! Please resize to at least 80x10.")
            .block(Block::default().borders(Borders::ALL).title("Error"))
            .style(Style::default().fg(Color::Red));
        f.render_widget(error_msg, size);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // CPU/Memory
            Constraint::Min(3),    // Manifest table
            Constraint::Length(3), // Status bar
        ])
        .split(size);

    render_top_bar(f, app, chunks[0]);
    render_record_table(f, app, chunks[1]);
    render_status_bar(f, app, chunks[2]);
}

fn render_top_bar(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let cpu_usage = clamp_percent(app.system.global_cpu_usage() as f64);
    let memory_percent = if app.system.total_memory() == 0 {
        0.0
    } else {
        clamp_percent(app.system.used_memory() as f64 / app.system.total_memory() as f64 * 100.0)
    };

    let cpu_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("CPU"))
        .gauge_style(Style::default().fg(Color::Cyan))
        .percent(cpu_usage as u16)
        .label(format!("{:.1}%", cpu_usage));
    f.render_widget(cpu_gauge, chunks[0]);

    let memory_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Memory"))
        .gauge_style(Style::default().fg(Color::Green))
        .percent(memory_percent as u16)
        .label(format!(
            "{:.1}% ({} / {})",
            memory_percent,
            format_size(app.system.used_memory(), DECIMAL),
            format_size(app.system.total_memory(), DECIMAL)
        ));
    f.render_widget(memory_gauge, chunks[1]);
}

fn state_style(state: FileState) -> Style {
    match state {
        FileState::Archived => Style::default().fg(Color::Green),
        FileState::TranscodeFailed | FileState::ArchiveFailed => Style::default().fg(Color::Red),
        FileState::Transcoding | FileState::Archiving => Style::default().fg(Color::Yellow),
        FileState::Skipped => Style::default().fg(Color::DarkGray),
        _ => Style::default(),
    }
}

fn render_record_table(f: &mut Frame, app: &mut App, area: Rect) {
    // Top border, header, bottom border
    let max_rows = (area.height as usize).saturating_sub(3);

    let header = Row::new(vec!["ST", "SOURCE", "OUTPUT", "ORIG", "OUT", "UPDATED", "REASON"])
        .style(Style::default().add_modifier(Modifier::BOLD))
        .height(1);

    let rows: Vec<Row> = if app.records.is_empty() {
        let note = match &app.load_error {
            Some(e) => format!("Error: {}", e),
            None => format!("No records in {}", app.state_dir.display()),
        };
        vec![Row::new(vec!["-".to_string(), note])]
    } else {
        app.records
            .iter()
            .take(max_rows)
            .map(|record| {
                Row::new(vec![
                    record.state.short_label().to_string(),
                    truncate_string(&record.source_name, 30),
                    truncate_string(record.output_name.as_deref().unwrap_or("-"), 45),
                    optional_size(record.original_bytes),
                    optional_size(record.output_bytes),
                    record.updated_at.with_timezone(&Local).format("%m-%d %H:%M").to_string(),
                    truncate_string(record.reason.as_deref().unwrap_or("-"), 40),
                ])
                .style(state_style(record.state))
                .height(1)
            })
            .collect()
    };

    let widths = [
        Constraint::Length(5),
        Constraint::Percentage(20),
        Constraint::Percentage(30),
        Constraint::Length(9),
        Constraint::Length(9),
        Constraint::Length(11),
        Constraint::Percentage(25),
    ];

    let title = format!(
        "Project {} ({}/{})",
        app.project_id,
        app.records.len().min(max_rows),
        app.records.len()
    );

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .column_spacing(1);

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let in_flight = app.count_by_state(FileState::Transcoding) + app.count_by_state(FileState::Archiving);
    let status_text = format!(
        "Total: {} | Archived: {} | In flight: {} | Transcoded: {} | Skipped: {} | Failed: {} | Dir: {} | q=quit r=refresh",
        app.records.len(),
        app.count_by_state(FileState::Archived),
        in_flight,
        app.count_by_state(FileState::Transcoded),
        app.count_by_state(FileState::Skipped),
        app.records.iter().filter(|r| r.state.is_failure()).count(),
        truncate_string(&app.state_dir.display().to_string(), 35)
    );

    let paragraph = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .wrap(Wrap { trim: true });

    f.render_widget(paragraph, area);
}

fn optional_size(bytes: Option<u64>) -> String {
    bytes
        .map(|b| format_size(b, DECIMAL))
        .unwrap_or_else(|| "-".to_string())
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn truncate_string(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
