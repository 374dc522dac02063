use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use crossterm::event::{
    self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use vision_core::client::ApiClient;
use vision_core::controller::{PasteOutcome, QueryOutcome, VisionController};
use vision_core::session::SessionStore;

pub mod result_tree;

use result_tree::{flatten, ExpandedRows, TreeLine};

const TICK_RATE: Duration = Duration::from_millis(100);
const SPINNER_DELAY: Duration = Duration::from_millis(500);
const SPINNER_FRAMES: [&str; 4] = ["|", "/", "-", "\\"];

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Dataset,
    QueryEditor,
    ParamsEditor,
    Results,
}

impl Pane {
    fn next(self) -> Self {
        match self {
            Self::Dataset => Self::QueryEditor,
            Self::QueryEditor => Self::ParamsEditor,
            Self::ParamsEditor => Self::Results,
            Self::Results => Self::Dataset,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Dataset => "Dataset",
            Self::QueryEditor => "Query",
            Self::ParamsEditor => "Params",
            Self::Results => "Results",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    NextPane,
    RunQuery,
    ToggleListen,
    Input(char),
    Backspace,
    Enter,
    Navigate(DirectionKey),
    GrowEditors,
    ShrinkEditors,
    Paste(String),
    Tick,
}

struct ConsoleApp<C: ApiClient, S: SessionStore> {
    controller: VisionController<C, S>,
    pane: Pane,
    show_help: bool,
    should_quit: bool,
    expanded: ExpandedRows,
    results_cursor: usize,
    spinner_frame: usize,
    status_line: String,
}

impl<C: ApiClient, S: SessionStore> ConsoleApp<C, S> {
    fn new(controller: VisionController<C, S>) -> Self {
        Self {
            controller,
            pane: Pane::QueryEditor,
            show_help: false,
            should_quit: false,
            expanded: ExpandedRows::new(),
            results_cursor: 0,
            spinner_frame: 0,
            status_line: "Ctrl+R runs the query, Ctrl+L listens, F1 shows help".to_string(),
        }
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => {
                self.controller.teardown();
                self.should_quit = true;
            }
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::NextPane => {
                self.pane = self.pane.next();
                self.status_line = format!("Focus: {}", self.pane.name());
            }
            Msg::RunQuery => self.run_query(),
            Msg::ToggleListen => self.toggle_listen(),
            Msg::Input(character) => self.edit(|text| text.push(character)),
            Msg::Backspace => self.edit(|text| {
                text.pop();
            }),
            Msg::Enter => match self.pane {
                Pane::QueryEditor | Pane::ParamsEditor => self.edit(|text| text.push('\n')),
                Pane::Results => self.toggle_row(),
                Pane::Dataset => {}
            },
            Msg::Navigate(direction) => self.navigate(direction),
            Msg::GrowEditors => {
                let height = self.controller.editor_height().saturating_add(1);
                self.controller.change_editor_height(height);
            }
            Msg::ShrinkEditors => {
                let height = self.controller.editor_height().saturating_sub(1);
                self.controller.change_editor_height(height);
            }
            Msg::Paste(text) => self.paste(&text),
            Msg::Tick => {
                let applied = self.controller.drain_events();
                if applied > 0 {
                    debug!(applied, "applied client events");
                    self.refresh_status();
                }
                self.spinner_frame = self.spinner_frame.wrapping_add(1);
            }
        }
    }

    fn run_query(&mut self) {
        self.reset_results_view();
        if self.controller.run_query() {
            self.status_line = "Running query...".to_string();
        } else {
            self.refresh_status();
        }
    }

    fn toggle_listen(&mut self) {
        let was_listening = self.controller.is_listening();
        self.reset_results_view();
        if self.controller.toggle_listen() {
            self.status_line = "Listening for mutations...".to_string();
        } else if was_listening {
            self.status_line = "Stopped listening".to_string();
        } else {
            self.refresh_status();
        }
    }

    fn refresh_status(&mut self) {
        self.status_line = if let Some(error) = self.controller.error() {
            format!("Error: {error}")
        } else if let Some(outcome) = self.controller.outcome() {
            format_timing(outcome)
        } else if self.controller.draft().query().trim().is_empty() {
            "Nothing to run: the query is empty".to_string()
        } else {
            self.status_line.clone()
        };
    }

    fn edit(&mut self, change: impl FnOnce(&mut String)) {
        match self.pane {
            Pane::QueryEditor => {
                let mut query = self.controller.draft().query().to_string();
                change(&mut query);
                self.controller.set_query(query);
            }
            Pane::ParamsEditor => {
                let mut params = self.controller.draft().raw_params().to_string();
                change(&mut params);
                self.controller.set_params(params);
            }
            Pane::Dataset | Pane::Results => {}
        }
    }

    fn paste(&mut self, text: &str) {
        match self.controller.handle_paste(text) {
            PasteOutcome::Consumed => {
                self.reset_results_view();
                self.status_line = format!(
                    "Loaded query from URL for dataset `{}`",
                    self.controller.current_dataset()
                );
            }
            PasteOutcome::Ignored => self.edit(|current| current.push_str(text)),
        }
    }

    fn navigate(&mut self, direction: DirectionKey) {
        match self.pane {
            Pane::Dataset => self.cycle_dataset(direction),
            Pane::Results => self.move_results_cursor(direction),
            Pane::QueryEditor | Pane::ParamsEditor => {}
        }
    }

    fn cycle_dataset(&mut self, direction: DirectionKey) {
        let datasets = self.controller.datasets();
        if datasets.is_empty() {
            self.status_line = "No datasets available".to_string();
            return;
        }

        let current = self.controller.current_dataset();
        let index = datasets
            .iter()
            .position(|dataset| *dataset == current)
            .unwrap_or(0);
        let next_index = match direction {
            DirectionKey::Up | DirectionKey::Left => {
                index.checked_sub(1).unwrap_or(datasets.len() - 1)
            }
            DirectionKey::Down | DirectionKey::Right => (index + 1) % datasets.len(),
        };

        let next = datasets[next_index].clone();
        if next == current {
            return;
        }
        self.reset_results_view();
        self.controller.change_dataset(&next);
        self.status_line = format!("Switched to dataset `{next}`");
    }

    fn move_results_cursor(&mut self, direction: DirectionKey) {
        let line_count = self.result_lines().len();
        if line_count == 0 {
            self.status_line = "No results to browse".to_string();
            return;
        }

        match direction {
            DirectionKey::Up | DirectionKey::Left => {
                self.results_cursor = self.results_cursor.saturating_sub(1);
            }
            DirectionKey::Down | DirectionKey::Right => {
                self.results_cursor = (self.results_cursor + 1).min(line_count - 1);
            }
        }
    }

    fn toggle_row(&mut self) {
        let lines = self.result_lines();
        let Some(line) = lines.get(self.results_cursor) else {
            return;
        };
        if line.expandable {
            self.expanded = self.expanded.toggled(&line.path);
        }
    }

    fn reset_results_view(&mut self) {
        self.expanded = ExpandedRows::new();
        self.results_cursor = 0;
    }

    fn result_lines(&self) -> Vec<TreeLine> {
        if self.controller.has_result() {
            if let Some(outcome) = self.controller.outcome() {
                return flatten(&outcome.result, &self.expanded);
            }
        }

        let feed = self.controller.listen_feed();
        if feed.is_empty() {
            return Vec::new();
        }
        let mutations = Value::Array(feed.iter().cloned().collect());
        flatten(&mutations, &self.expanded)
    }

    fn run_state(&self) -> &'static str {
        if self.controller.is_query_running() {
            "running"
        } else if self.controller.is_listening() {
            "listening"
        } else {
            "idle"
        }
    }
}

fn format_timing(outcome: &QueryOutcome) -> String {
    format!(
        "Query time: {}ms (end-to-end: {}ms)",
        outcome.server_time_ms,
        outcome.end_to_end.as_millis()
    )
}

fn no_results_message(query: &str, dataset: &str) -> String {
    format!("No documents found in dataset `{dataset}` for query `{query}`")
}

pub fn run<C: ApiClient, S: SessionStore>(
    controller: VisionController<C, S>,
) -> Result<(), TuiError> {
    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, controller);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableBracketedPaste
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop<C: ApiClient, S: SessionStore>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    controller: VisionController<C, S>,
) -> Result<(), TuiError> {
    let mut app = ConsoleApp::new(controller);
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|frame| render(frame, &app))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if let Some(message) = map_key_event(key) {
                        app.handle(message);
                    }
                }
                Event::Paste(text) => app.handle(Msg::Paste(text)),
                _ => {}
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.handle(Msg::Tick);
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn render<C: ApiClient, S: SessionStore>(frame: &mut Frame<'_>, app: &ConsoleApp<C, S>) {
    let editor_rows = app.controller.editor_height().saturating_add(2);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(editor_rows),
            Constraint::Length(1),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    render_editors(frame, app, chunks[1]);

    if let Some(outcome) = app.controller.outcome() {
        frame.render_widget(Paragraph::new(format_timing(outcome)), chunks[2]);
    }

    render_results(frame, app, chunks[3]);

    let footer = Paragraph::new(vec![
        Line::from("Tab: focus | Ctrl+R: run | Ctrl+L: listen | Ctrl+Up/Down: editor size | F1: help | Ctrl+Q: quit"),
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(Block::default().borders(Borders::ALL).title("Keys"));
    frame.render_widget(footer, chunks[4]);

    if app.show_help {
        render_help_popup(frame);
    }
}

fn focus_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    }
}

fn render_header<C: ApiClient, S: SessionStore>(
    frame: &mut Frame<'_>,
    app: &ConsoleApp<C, S>,
    area: Rect,
) {
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" Dataset: {} ", app.controller.current_dataset()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!("State: {}", app.run_state())),
        Span::raw(" | "),
        Span::raw(format!("Focus: {}", app.pane.name())),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(focus_style(app.pane == Pane::Dataset))
            .title("Vision"),
    );
    frame.render_widget(header, area);
}

fn render_editors<C: ApiClient, S: SessionStore>(
    frame: &mut Frame<'_>,
    app: &ConsoleApp<C, S>,
    area: Rect,
) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let draft = app.controller.draft();
    let query = Paragraph::new(draft.query())
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(focus_style(app.pane == Pane::QueryEditor))
                .title("Query"),
        );
    frame.render_widget(query, columns[0]);

    let (params_title, params_style) = match draft.params_error() {
        Some(error) => (
            format!("Params (invalid: {error})"),
            Style::default().fg(Color::Red),
        ),
        None => (
            "Params".to_string(),
            focus_style(app.pane == Pane::ParamsEditor),
        ),
    };
    let params = Paragraph::new(draft.raw_params())
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(params_style)
                .title(params_title),
        );
    frame.render_widget(params, columns[1]);
}

fn render_results<C: ApiClient, S: SessionStore>(
    frame: &mut Frame<'_>,
    app: &ConsoleApp<C, S>,
    area: Rect,
) {
    let controller = &app.controller;
    let mut lines = Vec::new();

    if let Some(elapsed) = controller.query_elapsed() {
        if elapsed >= SPINNER_DELAY {
            let spinner = SPINNER_FRAMES[app.spinner_frame % SPINNER_FRAMES.len()];
            lines.push(Line::from(format!("{spinner} Running query...")));
        }
    }

    if let Some(error) = controller.error() {
        lines.push(Line::styled(
            format!("Error: {error}"),
            Style::default().fg(Color::Red),
        ));
    }

    if let Some(outcome) = controller.outcome().filter(|_| controller.has_result()) {
        if outcome.is_empty_result() {
            lines.push(Line::from(no_results_message(
                &outcome.query,
                &controller.current_dataset(),
            )));
        }
    }

    if controller.is_listening() && controller.listen_feed().is_empty() {
        lines.push(Line::from("Waiting for mutations..."));
    }

    let tree = app.result_lines();
    let visible_limit = usize::from(area.height.saturating_sub(2)).max(1);
    let cursor = app.results_cursor.min(tree.len().saturating_sub(1));
    let window_start = cursor.saturating_sub(visible_limit / 2);
    for (offset, line) in tree
        .iter()
        .skip(window_start)
        .take(visible_limit.saturating_sub(lines.len()))
        .enumerate()
    {
        let marker = if app.pane == Pane::Results && window_start + offset == cursor {
            ">"
        } else {
            " "
        };
        lines.push(Line::from(format!("{marker} {}", line.text)));
    }

    let title = if controller.listen_feed().is_empty() {
        "Result".to_string()
    } else {
        format!("Mutations ({})", controller.listen_feed().len())
    };
    let body = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(focus_style(app.pane == Pane::Results))
                .title(title),
        )
        .alignment(Alignment::Left);
    frame.render_widget(body, area);
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 60, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Global keymap"),
        Line::from("Ctrl+Q / Ctrl+C: quit"),
        Line::from("F1: toggle help"),
        Line::from("Tab: cycle focus (dataset, query, params, results)"),
        Line::from("Ctrl+R: run query"),
        Line::from("Ctrl+L: start or stop listening"),
        Line::from("Ctrl+Up / Ctrl+Down: shrink or grow editors"),
        Line::from("Arrows on dataset: switch dataset"),
        Line::from("Arrows + Enter on results: move and expand/collapse"),
        Line::from("Paste an API URL to load its dataset, query and params"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent) -> Option<Msg> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('q' | 'c')) => Some(Msg::Quit),
        (KeyModifiers::CONTROL, KeyCode::Char('r')) => Some(Msg::RunQuery),
        (KeyModifiers::CONTROL, KeyCode::Char('l')) => Some(Msg::ToggleListen),
        (KeyModifiers::CONTROL, KeyCode::Up) => Some(Msg::ShrinkEditors),
        (KeyModifiers::CONTROL, KeyCode::Down) => Some(Msg::GrowEditors),
        (_, KeyCode::F(1)) => Some(Msg::ToggleHelp),
        (_, KeyCode::Tab) => Some(Msg::NextPane),
        (_, KeyCode::Enter) => Some(Msg::Enter),
        (_, KeyCode::Backspace) => Some(Msg::Backspace),
        (_, KeyCode::Up) => Some(Msg::Navigate(DirectionKey::Up)),
        (_, KeyCode::Down) => Some(Msg::Navigate(DirectionKey::Down)),
        (_, KeyCode::Left) => Some(Msg::Navigate(DirectionKey::Left)),
        (_, KeyCode::Right) => Some(Msg::Navigate(DirectionKey::Right)),
        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(character)) => {
            Some(Msg::Input(character))
        }
        _ => None,
    }
}
