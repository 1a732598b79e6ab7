use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use quality_check::pipeline::{self, RunHandle, RunOutcome, RunRequest, RunSummary};
use quality_check::ReconConfig;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::path::PathBuf;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Primary,
    Secondary,
    Template,
    Output,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Primary, Field::Secondary, Field::Template, Field::Output];

    pub fn next(&self) -> Self {
        match self {
            Field::Primary => Field::Secondary,
            Field::Secondary => Field::Template,
            Field::Template => Field::Output,
            Field::Output => Field::Primary,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Field::Primary => Field::Output,
            Field::Secondary => Field::Primary,
            Field::Template => Field::Secondary,
            Field::Output => Field::Template,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Field::Primary => "Complot CSV File",
            Field::Secondary => "Layer Excel File",
            Field::Template => "Recommendations Template",
            Field::Output => "Output Excel File",
        }
    }

    fn missing_message(&self) -> &str {
        match self {
            Field::Primary => "Please select Complot CSV file",
            Field::Secondary => "Please select Layer Excel file",
            Field::Template => "Please select Recommendations template file",
            Field::Output => "Please select output file location",
        }
    }

    fn index(&self) -> usize {
        match self {
            Field::Primary => 0,
            Field::Secondary => 1,
            Field::Template => 2,
            Field::Output => 3,
        }
    }
}

pub struct App {
    pub paths: [String; 4],
    pub focus: Field,
    pub config: ReconConfig,
    pub status: String,
    pub progress: u16,
    pub result_lines: Vec<String>,
    pub result_is_error: bool,
    handle: Option<RunHandle>,
}

impl App {
    pub fn new(config: ReconConfig) -> Self {
        Self {
            paths: Default::default(),
            focus: Field::Primary,
            config,
            status: "Ready to start".to_string(),
            progress: 0,
            result_lines: Vec::new(),
            result_is_error: false,
            handle: None,
        }
    }

    pub fn path(&self, field: Field) -> &str {
        &self.paths[field.index()]
    }

    pub fn set_path(&mut self, field: Field, value: &str) {
        self.paths[field.index()] = value.to_string();
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn input_char(&mut self, c: char) {
        if !self.is_running() {
            self.paths[self.focus.index()].push(c);
        }
    }

    pub fn backspace(&mut self) {
        if !self.is_running() {
            self.paths[self.focus.index()].pop();
        }
    }

    pub fn clear_field(&mut self) {
        if !self.is_running() {
            self.paths[self.focus.index()].clear();
        }
    }

    /// Validate the four paths into a request, or explain what is missing
    pub fn request(&self) -> Result<RunRequest, String> {
        for field in Field::ALL {
            if self.path(field).trim().is_empty() {
                return Err(field.missing_message().to_string());
            }
        }

        let path = |field: Field| PathBuf::from(self.path(field).trim());
        Ok(RunRequest {
            primary: path(Field::Primary),
            secondary: path(Field::Secondary),
            template: path(Field::Template),
            output: path(Field::Output),
        })
    }

    pub fn start_run(&mut self) {
        if self.is_running() {
            return;
        }

        match self.request() {
            Ok(request) => {
                self.status = "Processing...".to_string();
                self.progress = 0;
                self.result_lines.clear();
                self.result_is_error = false;
                self.handle = Some(pipeline::spawn(request, self.config.clone()));
            }
            Err(message) => {
                self.status = message;
            }
        }
    }

    /// Pull progress and the outcome from the background run
    pub fn tick(&mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };

        let outcome = handle.poll().cloned();
        self.progress = handle.progress();
        if let Some(stage) = handle.stage() {
            self.status = format!("{}...", stage.label());
        }

        match outcome {
            Some(RunOutcome::Finished(summary)) => {
                self.handle = None;
                self.show_success(&summary);
            }
            Some(RunOutcome::Failed(message)) => {
                self.handle = None;
                self.show_error(&message);
            }
            None => {}
        }
    }

    fn show_success(&mut self, summary: &RunSummary) {
        self.progress = 100;
        self.status = "Process completed successfully!".to_string();
        self.result_is_error = false;
        self.result_lines = vec![
            "Process completed successfully!".to_string(),
            String::new(),
            "Results:".to_string(),
            format!("- Perfect matches: {}", summary.perfect_matches),
            format!("- Partial matches: {}", summary.partial_matches),
            format!("- Total rows: {}", summary.total_rows),
            String::new(),
            "Output files:".to_string(),
            format!("- Filled table: {}", summary.filled_path.display()),
            format!("- Report: {}", summary.report_path.display()),
        ];
    }

    fn show_error(&mut self, message: &str) {
        self.progress = 0;
        self.status = "Error occurred".to_string();
        self.result_is_error = true;
        self.result_lines = vec![
            "Error occurred during processing:".to_string(),
            String::new(),
            message.to_string(),
        ];
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        app.tick();
        terminal.draw(|f| ui(f, app))?;

        // Poll instead of blocking so progress keeps moving during a run
        if !event::poll(TICK)? {
            continue;
        }

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Esc => return Ok(()),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
                KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => app.clear_field(),
                KeyCode::Enter => app.start_run(),
                KeyCode::Tab | KeyCode::Down => app.focus = app.focus.next(),
                KeyCode::BackTab | KeyCode::Up => app.focus = app.focus.previous(),
                KeyCode::Backspace => app.backspace(),
                KeyCode::Char(c) => app.input_char(c),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // Title
            Constraint::Length(12), // Path inputs
            Constraint::Length(3),  // Progress
            Constraint::Min(0),     // Results
            Constraint::Length(3),  // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0]);
    render_inputs(f, chunks[1], app);
    render_progress(f, chunks[2], app);
    render_results(f, chunks[3], app);
    render_status_bar(f, chunks[4], app);
}

fn render_header(f: &mut Frame, area: Rect) {
    let header = Paragraph::new(Line::from(Span::styled(
        "Quality Check - Automatic Table Filling System",
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    )))
    .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_inputs(f: &mut Frame, area: Rect, app: &App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3); 4])
        .split(area);

    for (field, row) in Field::ALL.iter().zip(rows.iter()) {
        let focused = *field == app.focus;
        let border = if focused {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        let mut text = app.path(*field).to_string();
        if focused && !app.is_running() {
            text.push('▏');
        }

        let input = Paragraph::new(text).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border)
                .title(format!(" {} ", field.title())),
        );
        f.render_widget(input, *row);
    }
}

fn render_progress(f: &mut Frame, area: Rect, app: &App) {
    let color = if app.result_is_error { Color::Red } else { Color::Green };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Progress "))
        .gauge_style(Style::default().fg(color))
        .percent(app.progress.min(100));

    f.render_widget(gauge, area);
}

fn render_results(f: &mut Frame, area: Rect, app: &App) {
    let style = if app.result_is_error {
        Style::default().fg(Color::Red)
    } else {
        Style::default().fg(Color::White)
    };

    let lines: Vec<Line> = app
        .result_lines
        .iter()
        .map(|l| Line::from(Span::styled(l.as_str(), style)))
        .collect();

    let results = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(" Results "));

    f.render_widget(results, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let status_spans = vec![
        Span::styled(format!(" {} ", app.status), Style::default().fg(Color::Cyan)),
        Span::raw(" | "),
        Span::styled("Tab", Style::default().fg(Color::Yellow)),
        Span::raw(" Field | "),
        Span::styled("Enter", Style::default().fg(Color::Yellow)),
        Span::raw(" Run | "),
        Span::styled("Ctrl+U", Style::default().fg(Color::Yellow)),
        Span::raw(" Clear | "),
        Span::styled("Esc", Style::default().fg(Color::Red)),
        Span::raw(" Quit"),
    ];

    let status_bar = Paragraph::new(Line::from(status_spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}
