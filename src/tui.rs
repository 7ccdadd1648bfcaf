use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Wrap};

use crate::app::{EventLevel, Progress, ProgressEvent, ProgressSink};
use crate::error::DogError;
use crate::transfer::CancelToken;

const LOGS_MAX: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Verify,
    Resolve,
    Transfer,
    Manifest,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Verify => "Verify",
            Phase::Resolve => "Resolve",
            Phase::Transfer => "Transfer",
            Phase::Manifest => "Manifest",
        }
    }
}

/// What the run is about, shown above the gauge.
#[derive(Debug, Clone)]
pub struct TuiHeader {
    pub selection: String,
    pub limit: String,
    pub destination: String,
}

#[derive(Debug)]
struct LogLine {
    level: EventLevel,
    text: String,
}

#[derive(Debug)]
struct TuiState {
    status: String,
    phase: Phase,
    progress: Option<Progress>,
    uploaded: usize,
    failures: usize,
    logs: VecDeque<LogLine>,
    started: Instant,
    cancelling: bool,
}

impl TuiState {
    fn new() -> Self {
        Self {
            status: "starting".to_string(),
            phase: Phase::Verify,
            progress: None,
            uploaded: 0,
            failures: 0,
            logs: VecDeque::new(),
            started: Instant::now(),
            cancelling: false,
        }
    }

    fn apply(&mut self, event: ProgressEvent) {
        let message = event.message.trim().to_string();
        if let Some((phase, payload)) = parse_phase(&message) {
            self.phase = phase;
            self.status = payload.to_string();
        } else {
            self.status = message.clone();
        }
        if let Some(progress) = event.progress {
            self.progress = Some(progress);
            match event.level {
                EventLevel::Info => self.uploaded += 1,
                EventLevel::Error => self.failures += 1,
                EventLevel::Warning | EventLevel::Success => {}
            }
        }
        let text = match event.elapsed {
            Some(elapsed) => format!("[{}] {message} ({} ms)", timestamp(), elapsed.as_millis()),
            None => format!("[{}] {message}", timestamp()),
        };
        push_log(
            &mut self.logs,
            LogLine {
                level: event.level,
                text,
            },
        );
    }
}

pub struct Tui {
    header: TuiHeader,
    cancel: CancelToken,
    state: Arc<Mutex<TuiState>>,
}

struct TuiProgress {
    state: Arc<Mutex<TuiState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            state.apply(event);
        }
    }
}

impl Tui {
    pub fn new(header: TuiHeader, cancel: CancelToken) -> Self {
        Self {
            header,
            cancel,
            state: Arc::new(Mutex::new(TuiState::new())),
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. `q`, `Esc` or
    /// Ctrl-C request cancellation; the view stays up until the worker returns.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, DogError> + Send + 'static,
        R: Send + 'static,
    {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let result = loop {
            if let Ok(state) = self.state.lock() {
                if let Err(err) = terminal.draw(|frame| draw_ui(frame, &self.header, &state)) {
                    break Err(miette::Report::msg(err.to_string()));
                }
            }

            if let Ok(result) = rx.try_recv() {
                break result.map_err(miette::Report::new);
            }

            match event::poll(Duration::from_millis(120)) {
                Ok(true) => {
                    if let Ok(Event::Key(key)) = event::read() {
                        self.handle_key(key);
                    }
                }
                Ok(false) => {}
                Err(err) => break Err(miette::Report::msg(err.to_string())),
            }
        };

        restore_terminal()?;
        handle.join().ok();
        result
    }

    fn handle_key(&self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        let cancel = match key.code {
            KeyCode::Char('q') | KeyCode::Esc => true,
            KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
            _ => false,
        };
        if cancel && !self.cancel.is_cancelled() {
            self.cancel.cancel();
            if let Ok(mut state) = self.state.lock() {
                state.cancelling = true;
                state.status = "cancelling after the current request".to_string();
            }
        }
    }
}

fn restore_terminal() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    io::stdout()
        .execute(LeaveAlternateScreen)
        .into_diagnostic()?;
    Ok(())
}

fn draw_ui(frame: &mut ratatui::Frame, header: &TuiHeader, state: &TuiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(1),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(header, state), chunks[0]);
    frame.render_widget(draw_gauge(state), chunks[1]);
    let visible = chunks[2].height.saturating_sub(2) as usize;
    frame.render_widget(draw_logs(state, visible), chunks[2]);
    frame.render_widget(draw_footer(state), chunks[3]);
}

fn draw_header(header: &TuiHeader, state: &TuiState) -> Paragraph<'static> {
    let title = Line::from(vec![
        Span::styled(
            "DOGBATCH",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Phase: "),
        Span::styled(state.phase.label(), Style::default().fg(Color::Cyan)),
        Span::raw(format!("   {}s", state.started.elapsed().as_secs())),
    ]);
    let selection = Line::from(vec![
        Span::styled("Selection: ", Style::default().fg(Color::Gray)),
        Span::raw(header.selection.clone()),
        Span::styled("   Limit: ", Style::default().fg(Color::Gray)),
        Span::raw(header.limit.clone()),
        Span::styled("   Destination: ", Style::default().fg(Color::Gray)),
        Span::raw(header.destination.clone()),
    ]);
    let status = Line::from(vec![
        Span::styled("Status: ", Style::default().fg(Color::Gray)),
        Span::raw(state.status.clone()),
    ]);
    Paragraph::new(vec![title, selection, status]).block(Block::default().borders(Borders::BOTTOM))
}

fn draw_gauge(state: &TuiState) -> Gauge<'static> {
    let (ratio, label) = match state.progress {
        Some(progress) if progress.total > 0 => (
            progress.done as f64 / progress.total as f64,
            format!(
                "unit {}/{}  image {}/{}  uploaded {}  failed {}",
                progress.unit,
                progress.units,
                progress.done,
                progress.total,
                state.uploaded,
                state.failures
            ),
        ),
        _ => (0.0, "waiting for images".to_string()),
    };
    let color = if state.cancelling {
        Color::Yellow
    } else {
        Color::Green
    };
    Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(color))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(label)
}

fn draw_logs(state: &TuiState, visible: usize) -> Paragraph<'static> {
    let skip = state.logs.len().saturating_sub(visible);
    let lines = state
        .logs
        .iter()
        .skip(skip)
        .map(|line| {
            Line::from(Span::styled(
                line.text.clone(),
                Style::default().fg(level_color(line.level)),
            ))
        })
        .collect::<Vec<_>>();
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Log"))
        .wrap(Wrap { trim: true })
}

fn draw_footer(state: &TuiState) -> Paragraph<'static> {
    let hint = if state.cancelling {
        "cancelling..."
    } else {
        "q / Esc: cancel"
    };
    Paragraph::new(Line::from(Span::styled(hint, Style::default().fg(Color::Gray))))
}

fn level_color(level: EventLevel) -> Color {
    match level {
        EventLevel::Info => Color::White,
        EventLevel::Warning => Color::Yellow,
        EventLevel::Error => Color::Red,
        EventLevel::Success => Color::Green,
    }
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let (name, rest) = message.strip_prefix("phase=")?.split_once(';')?;
    let phase = match name {
        "Verify" => Phase::Verify,
        "Resolve" => Phase::Resolve,
        "Transfer" => Phase::Transfer,
        "Manifest" => Phase::Manifest,
        _ => return None,
    };
    Some((phase, rest.trim()))
}

fn push_log(buffer: &mut VecDeque<LogLine>, item: LogLine) {
    buffer.push_back(item);
    while buffer.len() > LOGS_MAX {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
