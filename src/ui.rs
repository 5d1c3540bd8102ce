use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        Bar, BarChart, BarGroup, Block, Borders, List, ListItem, Paragraph,
        canvas::{Canvas, Line as CanvasLine, Points},
    },
};
use std::{
    io::{self, Stdout},
    time::Duration,
};

use crate::render::{spectrum_bars, vibration_path};
use crate::session::Session;
use crate::types::{AudioStatus, MotionStatus};

const BORDER: Color = Color::Rgb(96, 160, 192);
const LABEL: Color = Color::Rgb(128, 160, 192);
const KEY: Color = Color::Rgb(255, 255, 0);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Quit,
    ToggleMicrophone,
}

pub struct App {
    pub should_quit: bool,
    pub session: Session,
    pub audio_device: Option<(String, u32)>,
}

impl App {
    pub fn new(session: Session) -> App {
        App {
            should_quit: false,
            session,
            audio_device: None,
        }
    }
}

pub type TerminalType = Terminal<CrosstermBackend<Stdout>>;

pub fn init_terminal() -> Result<TerminalType, anyhow::Error> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

pub fn restore_terminal() -> Result<(), anyhow::Error> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture)?;
    Ok(())
}

pub fn handle_events() -> Result<Option<Action>, anyhow::Error> {
    if event::poll(Duration::from_millis(0))? {
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                return Ok(match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        Some(Action::Quit)
                    }
                    KeyCode::Char('m') | KeyCode::Char('M') => Some(Action::ToggleMicrophone),
                    _ => None,
                });
            }
        }
    }
    Ok(None)
}

fn panel(title: String) -> Block<'static> {
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER))
}

pub fn draw_ui(f: &mut Frame, app: &App) {
    let size = f.area();

    if size.width < 40 || size.height < 16 {
        let error_msg = Paragraph::new("Terminal too small!\nMinimum: 40x16")
            .style(Style::default().fg(Color::Red))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(error_msg, size);
        return;
    }

    let has_log = app.session.log.is_some();
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),                           // Title
            Constraint::Min(8),                              // Graphs
            Constraint::Length(if has_log { 8 } else { 0 }), // Event log
            Constraint::Length(4),                           // Status bar
        ])
        .split(size);

    let graphs = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(main_layout[1]);

    draw_title(f, main_layout[0]);
    draw_vibration_graph(f, graphs[0], app);
    draw_sound_spectrum(f, graphs[1], app);
    if has_log {
        draw_event_log(f, main_layout[2], app);
    }
    draw_status_bar(f, main_layout[3], app);
}

fn draw_title(f: &mut Frame, area: Rect) {
    let title = Paragraph::new("Vibra Vibration & Sound Monitor")
        .style(
            Style::default()
                .fg(Color::Rgb(128, 224, 208))
                .add_modifier(Modifier::BOLD),
        )
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(BORDER)),
        );
    f.render_widget(title, area);
}

fn draw_vibration_graph(f: &mut Frame, area: Rect, app: &App) {
    let title = match (app.session.last_magnitude, app.session.vibration.latest()) {
        (Some(m), Some(detected)) => {
            format!(" Vibration: {:.2} (last detected {:.2}) ", m, detected)
        }
        (Some(m), None) => format!(" Vibration: {:.2} ", m),
        _ => " Vibration ".to_string(),
    };
    let block = panel(title);
    let inner = block.inner(area);

    // braille cells are 2x4 dots
    let width = inner.width as f64 * 2.0;
    let height = inner.height as f64 * 4.0;
    let path = vibration_path(&app.session.vibration, width, height);

    if path.is_empty() {
        let waiting = Paragraph::new(format!(
            "No vibration above {:.1} yet",
            app.session.settings().vibration_threshold
        ))
        .style(Style::default().fg(Color::Rgb(128, 128, 128)))
        .alignment(Alignment::Center)
        .block(block);
        f.render_widget(waiting, area);
        return;
    }

    let color = Color::Rgb(50, 150, 255);
    let canvas = Canvas::default()
        .block(block)
        .marker(Marker::Braille)
        .x_bounds([0.0, width])
        .y_bounds([0.0, height])
        .paint(move |ctx| {
            // canvas y grows upwards
            for pair in path.windows(2) {
                let (x1, y1) = pair[0];
                let (x2, y2) = pair[1];
                ctx.draw(&CanvasLine::new(x1, height - y1, x2, height - y2, color));
            }
            if let [(x, y)] = path.as_slice() {
                ctx.draw(&Points {
                    coords: &[(*x, height - y)],
                    color,
                });
            }
        });
    f.render_widget(canvas, area);
}

fn draw_sound_spectrum(f: &mut Frame, area: Rect, app: &App) {
    let title = match app.session.last_decibels {
        Some(db) => format!(" Sound: {:.2} dB ", db),
        None => " Sound ".to_string(),
    };
    let block = panel(title);

    if app.session.audio_status != AudioStatus::Measuring {
        let waiting = Paragraph::new(audio_status_text(&app.session.audio_status))
            .style(Style::default().fg(Color::Rgb(128, 128, 128)))
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(waiting, area);
        return;
    }

    let inner = block.inner(area);
    f.render_widget(block, area);

    // bar plus one-cell gap
    let max_bars = (inner.width as usize).div_ceil(2);
    let bars: Vec<Bar> = spectrum_bars(&app.session.spectrum, max_bars)
        .into_iter()
        .map(|bar| {
            let (r, g, b) = bar.color;
            Bar::default()
                .value(bar.height as u64)
                .text_value(String::new())
                .style(Style::default().fg(Color::Rgb(r, g, b)))
        })
        .collect();

    let barchart = BarChart::default()
        .block(Block::default())
        .data(BarGroup::default().bars(&bars))
        .max(255)
        .bar_width(1)
        .bar_gap(1);

    f.render_widget(barchart, inner);
}

fn draw_event_log(f: &mut Frame, area: Rect, app: &App) {
    let Some(log) = &app.session.log else {
        return;
    };
    let block = panel(format!(
        " Event Log ({} recorded, sound >= {:.0} dB) ",
        log.total_recorded(),
        log.sound_threshold()
    ));
    if log.is_empty() {
        let waiting = Paragraph::new("No events yet")
            .style(Style::default().fg(Color::Rgb(128, 128, 128)))
            .block(block);
        f.render_widget(waiting, area);
        return;
    }
    let rows = block.inner(area).height as usize;

    // newest at the bottom
    let mut items: Vec<ListItem> = log
        .entries()
        .rev()
        .take(rows)
        .map(|entry| {
            ListItem::new(entry.to_string()).style(Style::default().fg(Color::Rgb(200, 200, 200)))
        })
        .collect();
    items.reverse();

    f.render_widget(List::new(items).block(block), area);
}

fn motion_status_text(status: &MotionStatus) -> String {
    match status {
        MotionStatus::Starting => "waiting for motion data".to_string(),
        MotionStatus::Detecting => "detecting vibration".to_string(),
        MotionStatus::Unsupported => "motion sensor not available".to_string(),
        MotionStatus::Stopped => "off".to_string(),
        MotionStatus::Failed(reason) => format!("failed: {reason}"),
    }
}

fn audio_status_text(status: &AudioStatus) -> String {
    match status {
        AudioStatus::AwaitingConsent => "press M to allow microphone access".to_string(),
        AudioStatus::Measuring => "measuring".to_string(),
        AudioStatus::Paused => "paused, press M to resume".to_string(),
        AudioStatus::Unsupported(reason) => format!("audio capture not available: {reason}"),
        AudioStatus::AccessDenied(reason) => format!("microphone access denied: {reason}"),
        AudioStatus::Failed(reason) => format!("audio failed: {reason}"),
    }
}

fn draw_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let mut status_line = vec![
        Span::styled("Motion: ", Style::default().fg(LABEL)),
        Span::styled(
            motion_status_text(&app.session.motion_status),
            Style::default().fg(Color::White),
        ),
        Span::styled(" | Sound: ", Style::default().fg(LABEL)),
        Span::styled(
            audio_status_text(&app.session.audio_status),
            Style::default().fg(Color::White),
        ),
    ];
    if let Some((name, rate)) = &app.audio_device {
        status_line.push(Span::styled(
            format!(" ({name}, {rate} Hz)"),
            Style::default().fg(Color::Rgb(160, 160, 160)),
        ));
    }

    let status_text = vec![
        Line::from(status_line),
        Line::from(vec![
            Span::styled("Q", Style::default().fg(KEY).add_modifier(Modifier::BOLD)),
            Span::styled("/", Style::default().fg(LABEL)),
            Span::styled("ESC", Style::default().fg(KEY).add_modifier(Modifier::BOLD)),
            Span::styled(" to quit, ", Style::default().fg(Color::White)),
            Span::styled("M", Style::default().fg(KEY).add_modifier(Modifier::BOLD)),
            Span::styled(" to toggle microphone", Style::default().fg(Color::White)),
        ]),
    ];

    let status = Paragraph::new(status_text).alignment(Alignment::Center);
    f.render_widget(status, inner);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Profile, Settings};
    use crate::types::AccelerationSample;
    use ratatui::backend::TestBackend;

    fn render(app: &App, width: u16, height: u16) -> String {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        terminal.draw(|f| draw_ui(f, app)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content()
            .chunks(width as usize)
            .map(|row| row.iter().map(|c| c.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn empty_session_renders() {
        let app = App::new(Session::new(Settings::for_profile(Profile::Basic)));
        let screen = render(&app, 100, 30);
        assert!(screen.contains("No vibration above 15.0 yet"));
        assert!(screen.contains("press M to allow microphone access"));
        assert!(!screen.contains("Event Log"));
    }

    #[test]
    fn logging_profile_shows_entries() {
        let mut session = Session::new(Settings::for_profile(Profile::Logging));
        session.on_motion(&AccelerationSample::new(20.0, 0.0, 0.0));
        session.on_motion(&AccelerationSample::new(30.0, 0.0, 0.0));
        session.set_audio_status(AudioStatus::Measuring);
        session.on_spectrum(&[129u8; 128]);

        let app = App::new(session);
        let screen = render(&app, 120, 30);
        assert!(screen.contains("Vibration: 30.00 (last detected 30.00)"));
        assert!(screen.contains("Event Log (3 recorded"));
        assert!(screen.contains("vibration 20.00"));
    }

    #[test]
    fn paused_microphone_hides_stale_reading() {
        let mut session = Session::new(Settings::for_profile(Profile::Basic));
        session.set_audio_status(AudioStatus::Measuring);
        session.on_spectrum(&[129u8; 128]);
        session.set_audio_status(AudioStatus::Paused);

        let screen = render(&App::new(session), 100, 30);
        assert!(!screen.contains(" dB "));
        assert!(screen.contains("paused, press M to resume"));
    }

    #[test]
    fn tiny_terminal_shows_warning() {
        let app = App::new(Session::new(Settings::for_profile(Profile::Basic)));
        assert!(render(&app, 30, 10).contains("Terminal too small!"));
    }
}
