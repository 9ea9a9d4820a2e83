//! Fleet TUI - live dashboard for one vehicle or the whole fleet
//!
//! Runs a monitoring session and displays:
//! - Vehicle marker (position, vehicle, driver, fuel, tilt, valve)
//! - Live alerts, most recent first, styled by category
//! - Fuel trend of the tracked sensor (0-100)
//! - Stream status and focus phase

use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use fleet_telemetry::domain::types::{format_time, AlertCategory, SensorId};
use fleet_telemetry::infra::{Config, Metrics};
use fleet_telemetry::io::{DirectoryClient, StreamStatus};
use fleet_telemetry::services::{DashboardView, MonitorSession, Phase, HISTORY_CAPACITY};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, Gauge, GraphType, List, ListItem, Paragraph},
    Frame, Terminal,
};
use std::fs::File;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Fleet TUI - live fuel, alert and position dashboard
#[derive(Parser, Debug)]
#[command(name = "fleet-tui", version, about)]
struct Args {
    /// Path to TOML configuration file [default: $CONFIG_FILE, then config/dev.toml]
    #[arg(short, long)]
    config: Option<String>,

    /// Bearer token from `fleet-monitor login`
    #[arg(long, env = "FLEET_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Sensor to focus on start; omit for broadcast mode
    #[arg(long, env = "FLEET_SENSOR")]
    sensor: Option<String>,

    /// Log file (the terminal is taken by the dashboard)
    #[arg(long, default_value = "fleet-tui.log")]
    log_file: String,
}

/// Keyboard state that never reaches the engine
#[derive(Debug, Default)]
struct UiState {
    /// Sensor id being typed after pressing 'f'
    input: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(File::create(&args.log_file)?))
        .init();

    let config = Config::load(args.config.as_deref()).with_overrides(args.token, args.sensor);
    let directory = DirectoryClient::new(
        config.directory_url(),
        config.token().map(str::to_string),
        Duration::from_millis(config.directory_timeout_ms()),
    )?;
    let session = MonitorSession::start(&config, Arc::new(directory), Arc::new(Metrics::new()))?;
    session.focus(config.target_sensor().map(SensorId::from)).await;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_ui(&mut terminal, &session, session.subscribe()).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    session.shutdown().await;
    result
}

async fn run_ui(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    session: &MonitorSession,
    view_rx: watch::Receiver<DashboardView>,
) -> Result<(), Box<dyn std::error::Error>> {
    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();
    let mut ui = UiState::default();

    loop {
        let view = view_rx.borrow().clone();
        terminal.draw(|f| draw_ui(f, &view, &ui))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if let Some(ref mut input) = ui.input {
                    match key.code {
                        KeyCode::Enter => {
                            let sensor = input.trim().to_string();
                            ui.input = None;
                            if !sensor.is_empty() {
                                session.focus(Some(SensorId::new(sensor))).await;
                            }
                        }
                        KeyCode::Esc => ui.input = None,
                        KeyCode::Backspace => {
                            input.pop();
                        }
                        KeyCode::Char(c) => input.push(c),
                        _ => {}
                    }
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    KeyCode::Char('f') => ui.input = Some(String::new()),
                    KeyCode::Char('b') => session.focus(None).await,
                    KeyCode::Char('r') => session.refresh().await,
                    _ => {}
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }
}

fn draw_ui(f: &mut Frame, view: &DashboardView, ui: &UiState) {
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // Header
            Constraint::Length(11), // Marker + alerts
            Constraint::Min(0),     // Trend
        ])
        .split(f.area());

    draw_header(f, main_chunks[0], view, ui);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(main_chunks[1]);

    draw_marker_panel(f, middle[0], view);
    draw_alert_panel(f, middle[1], view);
    draw_trend_panel(f, main_chunks[2], view);
}

fn stream_label(status: &StreamStatus) -> (String, Color) {
    match status {
        StreamStatus::Connected => ("LIVE".to_string(), Color::Green),
        StreamStatus::Connecting => ("CONNECTING".to_string(), Color::Yellow),
        StreamStatus::Reconnecting { backoff_ms } => {
            (format!("RETRY {:.1}s", *backoff_ms as f64 / 1000.0), Color::Yellow)
        }
        StreamStatus::Disconnected { .. } => ("DISCONNECTED".to_string(), Color::Red),
        StreamStatus::Closed => ("CLOSED".to_string(), Color::Red),
    }
}

fn draw_header(f: &mut Frame, area: Rect, view: &DashboardView, ui: &UiState) {
    let (stream_text, stream_color) = stream_label(&view.stream);

    let focus = match (view.phase, &view.target) {
        (Phase::Unfocused, _) | (_, None) => "all vehicles".to_string(),
        (Phase::FocusedNoData, Some(s)) => format!("{} (no data)", s),
        (Phase::Focused, Some(s)) => s.to_string(),
    };

    let mut spans = vec![
        Span::styled("Fleet ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw("| "),
        Span::styled(stream_text, Style::default().fg(stream_color)),
        Span::raw(" | Focus: "),
        Span::styled(focus, Style::default().fg(Color::Yellow)),
    ];
    match ui.input {
        Some(ref input) => {
            spans.push(Span::raw(" | Sensor: "));
            spans.push(Span::styled(
                format!("{}_", input),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ));
        }
        None => spans.push(Span::raw(" | f focus  b all  r refresh  q quit")),
    }

    let header = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(header, area);
}

fn yes_no(flag: bool, yes: &'static str, no: &'static str, alarm: bool) -> Span<'static> {
    let color = if flag == alarm { Color::Red } else { Color::Green };
    Span::styled(if flag { yes } else { no }, Style::default().fg(color))
}

fn draw_marker_panel(f: &mut Frame, area: Rect, view: &DashboardView) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(area);

    let dash = || "-".to_string();
    let vehicle = view.entity.as_ref().map(|e| e.vehicle_number.clone()).unwrap_or_else(dash);
    let driver = view.entity.as_ref().map(|e| e.assigned_driver.clone()).unwrap_or_else(dash);

    let mut lines = vec![
        Line::from(format!("Position:  {:.4}, {:.4}", view.center.lat, view.center.lng)),
        Line::from(format!("Vehicle:   {}", vehicle)),
        Line::from(format!("Driver:    {}", driver)),
    ];
    match view.current {
        Some(ref reading) => {
            lines.push(Line::from(vec![
                Span::raw("Tilt:      "),
                yes_no(reading.tilt_detected, "Yes", "No", true),
            ]));
            lines.push(Line::from(vec![
                Span::raw("Valve:     "),
                yes_no(reading.valve_open, "Open", "Closed", true),
            ]));
            lines.push(Line::from(format!("Updated:   {}", format_time(reading.timestamp))));
        }
        None => lines.push(Line::styled("No reading yet", Style::default().fg(Color::DarkGray))),
    }

    let marker = Paragraph::new(lines).block(
        Block::default()
            .title(" Vehicle ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue)),
    );
    f.render_widget(marker, chunks[0]);

    let fuel = view.current.as_ref().map(|r| r.fuel_level.clamp(0.0, 100.0)).unwrap_or(0.0);
    let fuel_color = if fuel < 20.0 {
        Color::Red
    } else if fuel < 50.0 {
        Color::Yellow
    } else {
        Color::Green
    };
    let gauge = Gauge::default()
        .block(Block::default().title(" Fuel ").borders(Borders::ALL))
        .gauge_style(Style::default().fg(fuel_color))
        .ratio(fuel / 100.0)
        .label(match view.current {
            Some(_) => format!("{:.0}%", fuel),
            None => "-".to_string(),
        });
    f.render_widget(gauge, chunks[1]);
}

fn category_style(category: AlertCategory) -> (&'static str, Color) {
    match category {
        AlertCategory::Fuel => ("⛽", Color::Yellow),
        AlertCategory::Geofence => ("⚠", Color::Red),
        AlertCategory::Other => ("·", Color::White),
    }
}

fn draw_alert_panel(f: &mut Frame, area: Rect, view: &DashboardView) {
    let items: Vec<ListItem> = view
        .feed
        .iter()
        .map(|alert| {
            let (icon, color) = category_style(alert.classify());
            ListItem::new(Line::from(vec![
                Span::styled(icon, Style::default().fg(color)),
                Span::raw(format!(" {} ", format_time(alert.timestamp))),
                Span::styled(format!("{:<8} ", alert.sensor_id), Style::default().fg(Color::Cyan)),
                Span::styled(alert.category.clone(), Style::default().fg(color)),
            ]))
        })
        .collect();

    let title = format!(" Live Alerts ({}) ", view.feed.len());
    let list = List::new(items).block(
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)),
    );
    f.render_widget(list, area);
}

fn draw_trend_panel(f: &mut Frame, area: Rect, view: &DashboardView) {
    let points: Vec<(f64, f64)> =
        view.history.iter().enumerate().map(|(i, p)| (i as f64, p.fuel_level)).collect();

    let first = view.history.first().map(|p| p.time.clone()).unwrap_or_default();
    let last = view.history.last().map(|p| p.time.clone()).unwrap_or_default();

    let dataset = Dataset::default()
        .name("fuel %")
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Cyan))
        .data(&points);

    let chart = Chart::new(vec![dataset])
        .block(
            Block::default()
                .title(" Fuel Trend ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Green)),
        )
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds([0.0, (HISTORY_CAPACITY - 1) as f64])
                .labels(vec![Span::raw(first), Span::raw(last)]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds([0.0, 100.0])
                .labels(vec![Span::raw("0"), Span::raw("50"), Span::raw("100")]),
        );
    f.render_widget(chart, area);
}
