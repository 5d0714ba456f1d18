use std::collections::VecDeque;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap};

use crate::artifact::ArtifactPresenter;
use crate::backend::{HttpBackend, ProfilingBackend};
use crate::config::FurnaceConfig;
use crate::error::{Error, Result};
use crate::log_sanitize::sanitize_log_line;
use crate::runner::save_chart;
use crate::session::{Phase, SessionController};
use crate::status::MAX_ORDINAL;

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Namespaces,
    Pods,
}

struct App {
    ctl: SessionController,
    backend: Arc<dyn ProfilingBackend>,
    base_url: String,
    viewport_width: u32,
    measure_width: fn() -> Option<u32>,
    focus: Focus,
    ns_list: ListState,
    pod_list: ListState,
    presenter: ArtifactPresenter,
    log: VecDeque<String>,
    download_tx: Sender<Result<(PathBuf, usize)>>,
    download_rx: Receiver<Result<(PathBuf, usize)>>,
    downloading: bool,
}

impl App {
    fn new(
        ctl: SessionController,
        backend: Arc<dyn ProfilingBackend>,
        base_url: String,
        viewport_width: u32,
    ) -> Self {
        let (download_tx, download_rx) = mpsc::channel();
        Self {
            ctl,
            backend,
            base_url,
            viewport_width,
            measure_width: window_pixel_width,
            focus: Focus::Namespaces,
            ns_list: ListState::default(),
            pod_list: ListState::default(),
            presenter: ArtifactPresenter::new(),
            log: VecDeque::new(),
            download_tx,
            download_rx,
            downloading: false,
        }
    }

    fn push_log(&mut self, line: impl AsRef<str>) {
        let ts = chrono::Local::now().format("%H:%M:%S");
        push_bounded(
            &mut self.log,
            format!("{ts} {}", sanitize_log_line(line.as_ref())),
            MAX_LOG_LINES,
        );
    }

    fn tick(&mut self, now: Instant) {
        self.ctl.tick(now);
        for ev in self.ctl.drain_events() {
            self.push_log(ev.to_string());
        }
        if self.presenter.sync(self.ctl.artifact()) {
            let url = self
                .presenter
                .current()
                .map(|a| a.view_url(&self.base_url));
            if let Some(Ok(url)) = url {
                self.push_log(format!("chart: {url}"));
            }
        }
        while let Ok(done) = self.download_rx.try_recv() {
            self.downloading = false;
            match done {
                Ok((path, bytes)) => {
                    self.push_log(format!("saved {} ({bytes} bytes)", path.display()))
                }
                Err(e) => self.push_log(format!("download failed: {e}")),
            }
        }
        self.clamp_cursors();
    }

    fn namespaces(&self) -> Vec<String> {
        self.ctl.registry().namespaces()
    }

    fn pods(&self) -> Vec<String> {
        match self.ctl.selection().namespace() {
            Some(ns) => self.ctl.registry().targets_in(ns),
            None => Vec::new(),
        }
    }

    fn clamp_cursors(&mut self) {
        let ns_len = self.namespaces().len();
        let pod_len = self.pods().len();
        clamp(&mut self.ns_list, ns_len);
        clamp(&mut self.pod_list, pod_len);
    }

    fn move_cursor(&mut self, delta: isize) {
        let (state, len) = match self.focus {
            Focus::Namespaces => (&mut self.ns_list, self.ctl.registry().namespaces().len()),
            Focus::Pods => {
                let len = match self.ctl.selection().namespace() {
                    Some(ns) => self.ctl.registry().targets_in(ns).len(),
                    None => 0,
                };
                (&mut self.pod_list, len)
            }
        };
        if len == 0 {
            state.select(None);
            return;
        }
        let cur = state.selected().unwrap_or(0) as isize;
        let next = (cur + delta).rem_euclid(len as isize) as usize;
        state.select(Some(next));
    }

    fn choose(&mut self) {
        match self.focus {
            Focus::Namespaces => {
                let Some(ns) = self
                    .ns_list
                    .selected()
                    .and_then(|i| self.namespaces().get(i).cloned())
                else {
                    return;
                };
                match self.ctl.select_namespace(&ns) {
                    Ok(()) => {
                        self.pod_list.select(None);
                        self.focus = Focus::Pods;
                        self.move_cursor(0);
                    }
                    Err(e) => self.push_log(format!("! {e}")),
                }
            }
            Focus::Pods => {
                let Some(pod) = self
                    .pod_list
                    .selected()
                    .and_then(|i| self.pods().get(i).cloned())
                else {
                    return;
                };
                if let Err(e) = self.ctl.select_target(&pod) {
                    self.push_log(format!("! {e}"));
                }
            }
        }
    }

    // Pixel width of the window at the moment of the call; the configured
    // width when the terminal does not report one.
    fn stop_width(&self) -> u32 {
        (self.measure_width)().unwrap_or(self.viewport_width)
    }

    fn toggle_recording(&mut self) {
        let res = if self.ctl.phase() == Phase::Recording {
            self.ctl.stop(self.stop_width())
        } else {
            self.ctl.start()
        };
        if let Err(e) = res {
            self.push_log(format!("! {e}"));
        }
    }

    fn start_download(&mut self) {
        if self.downloading {
            self.push_log("! a download is already running");
            return;
        }
        let Some(artifact) = self.ctl.artifact() else {
            self.push_log("! no chart to download yet");
            return;
        };
        self.downloading = true;
        let backend = Arc::clone(&self.backend);
        let tx = self.download_tx.clone();
        std::thread::spawn(move || {
            let path = PathBuf::from(artifact.suggested_file_name());
            let res = save_chart(backend.as_ref(), &artifact, &path).map(|n| (path, n));
            let _ = tx.send(res);
        });
    }

    fn handle_key(&mut self, code: KeyCode, mods: KeyModifiers) -> bool {
        if mods.contains(KeyModifiers::CONTROL) && matches!(code, KeyCode::Char('c')) {
            return true;
        }
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Tab | KeyCode::Left | KeyCode::Right => {
                self.focus = match self.focus {
                    Focus::Namespaces => Focus::Pods,
                    Focus::Pods => Focus::Namespaces,
                };
                self.move_cursor(0);
            }
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-1),
            KeyCode::Enter => self.choose(),
            KeyCode::Char('s') => self.toggle_recording(),
            KeyCode::Char('c') => {
                let opts = self.ctl.options();
                self.ctl.set_options(opts.with_colors(opts.colors.next()));
            }
            KeyCode::Char('i') => {
                let opts = self.ctl.options();
                self.ctl.set_options(opts.with_inverted(!opts.inverted));
            }
            KeyCode::Char('y') => {
                let opts = self.ctl.options();
                self.ctl.set_options(opts.with_symfs(!opts.use_symfs));
            }
            KeyCode::Char('d') => self.start_download(),
            KeyCode::Char('r') => {
                self.ctl.refresh_targets();
                self.push_log("refreshing targets");
            }
            _ => {}
        }
        false
    }

    fn draw(&self, f: &mut ratatui::Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Min(0),
                Constraint::Length(2),
            ])
            .split(f.area());

        self.draw_header(f, chunks[0]);
        self.draw_main(f, chunks[1]);
        self.draw_footer(f, chunks[2]);
    }

    fn draw_header(&self, f: &mut ratatui::Frame, area: Rect) {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let refreshed = self
            .ctl
            .registry()
            .refreshed_at()
            .map(|t| format!("targets @ {}", t.format("%H:%M:%S")))
            .unwrap_or_else(|| "targets: waiting".into());
        let mut spans = vec![
            Span::styled("Furnace", Style::default().fg(Color::Cyan)),
            Span::raw("  "),
            Span::styled(self.base_url.clone(), Style::default().fg(Color::Gray)),
            Span::raw("  "),
            Span::styled(refreshed, Style::default().fg(Color::LightBlue)),
            Span::raw("  "),
            Span::styled(now, Style::default().fg(Color::Yellow)),
        ];
        if self.ctl.registry().consecutive_failures() > 0 {
            spans.push(Span::raw("  "));
            spans.push(Span::styled("registry unreachable", Style::default().fg(Color::Red)));
        }
        let p = Paragraph::new(Text::from(Line::from(spans))).block(
            Block::default()
                .borders(Borders::BOTTOM)
                .border_type(BorderType::Plain),
        );
        f.render_widget(p, area);
    }

    fn draw_footer(&self, f: &mut ratatui::Frame, area: Rect) {
        let hint = "[Tab] Pane  [j/k] Move  [Enter] Select  [s] Start/Stop  [c] Colors  [i] Inverted  [y] Symfs  [d] Download  [r] Refresh  [q] Quit";
        let p = Paragraph::new(hint)
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::TOP));
        f.render_widget(p, area);
    }

    fn draw_main(&self, f: &mut ratatui::Frame, area: Rect) {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(22),
                Constraint::Percentage(28),
                Constraint::Percentage(50),
            ])
            .split(area);

        let chosen_ns = self.ctl.selection().namespace();
        self.draw_list(
            f,
            cols[0],
            "Namespaces",
            &self.namespaces(),
            chosen_ns,
            &self.ns_list,
            self.focus == Focus::Namespaces,
        );
        self.draw_list(
            f,
            cols[1],
            "Pods",
            &self.pods(),
            self.ctl.selection().pod(),
            &self.pod_list,
            self.focus == Focus::Pods,
        );

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(5),
                Constraint::Length(4),
                Constraint::Min(3),
            ])
            .split(cols[2]);
        self.draw_session(f, rows[0]);
        self.draw_options(f, rows[1]);
        self.draw_chart(f, rows[2]);
        self.draw_log(f, rows[3]);
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_list(
        &self,
        f: &mut ratatui::Frame,
        area: Rect,
        title: &str,
        entries: &[String],
        chosen: Option<&str>,
        state: &ListState,
        focused: bool,
    ) {
        let items: Vec<ListItem> = entries
            .iter()
            .map(|e| {
                let mark = if Some(e.as_str()) == chosen { "* " } else { "  " };
                ListItem::new(format!("{mark}{e}"))
            })
            .collect();
        let border = if focused {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default()
        };
        let list = List::new(items)
            .block(
                Block::default()
                    .title(title.to_string())
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded)
                    .border_style(border),
            )
            .highlight_style(Style::default().fg(Color::Black).bg(Color::LightYellow))
            .highlight_symbol("> ");
        let mut state = state.clone();
        f.render_stateful_widget(list, area, &mut state);
    }

    fn draw_session(&self, f: &mut ratatui::Frame, area: Rect) {
        let mut title = format!("Session: {}", self.ctl.phase());
        if self.ctl.busy() {
            title.push_str(" (waiting for proxy)");
        }
        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded);

        match self.ctl.display_status() {
            Some(p) => match p.progress_ratio() {
                Some(ratio) => {
                    let g = Gauge::default()
                        .block(block)
                        .gauge_style(Style::default().fg(Color::Green))
                        .ratio(ratio)
                        .label(format!("{} ({}/{})", p.label, p.ordinal + 1, MAX_ORDINAL + 1));
                    f.render_widget(g, area);
                }
                None => {
                    let line = Line::from(vec![
                        Span::raw("status: "),
                        Span::styled(p.label, Style::default().fg(Color::Yellow)),
                    ]);
                    f.render_widget(Paragraph::new(line).block(block), area);
                }
            },
            None => {
                let text = match self.ctl.selection().target() {
                    Some(t) => format!("target {t}"),
                    None => "no target selected".into(),
                };
                f.render_widget(Paragraph::new(text).block(block), area);
            }
        }
    }

    fn draw_options(&self, f: &mut ratatui::Frame, area: Rect) {
        let opts = self.ctl.options();
        let flag = |b: bool| if b { "[x]" } else { "[ ]" };
        let lines = vec![
            Line::from(format!("colors    {}", opts.colors)),
            Line::from(format!("{} inverted", flag(opts.inverted))),
            Line::from(format!("{} symfs", flag(opts.use_symfs))),
        ];
        let p = Paragraph::new(lines).block(
            Block::default()
                .title(format!("Options (width {})", self.stop_width()))
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        );
        f.render_widget(p, area);
    }

    fn draw_chart(&self, f: &mut ratatui::Frame, area: Rect) {
        let lines = match self.presenter.current() {
            Some(a) => {
                let view = a
                    .view_url(&self.base_url)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|e| e.to_string());
                let mut lines = vec![Line::from(Span::styled(
                    view,
                    Style::default().add_modifier(Modifier::UNDERLINED),
                ))];
                let dl = if self.downloading {
                    "downloading...".to_string()
                } else {
                    format!("[d] save as {}", a.suggested_file_name())
                };
                lines.push(Line::from(dl));
                lines
            }
            None => vec![Line::from("no chart yet")],
        };
        let p = Paragraph::new(lines).wrap(Wrap { trim: false }).block(
            Block::default()
                .title("Flamegraph")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        );
        f.render_widget(p, area);
    }

    fn draw_log(&self, f: &mut ratatui::Frame, area: Rect) {
        let visible = area.height.saturating_sub(2) as usize;
        let skip = self.log.len().saturating_sub(visible);
        let lines: Vec<Line> = self
            .log
            .iter()
            .skip(skip)
            .map(|l| {
                let style = if l.contains("! ") || l.contains("failed") {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default()
                };
                Line::from(Span::styled(l.clone(), style))
            })
            .collect();
        let p = Paragraph::new(lines).block(
            Block::default()
                .title("Log")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        );
        f.render_widget(p, area);
    }
}

pub fn run_tui(cfg: &FurnaceConfig) -> Result<()> {
    let backend: Arc<dyn ProfilingBackend> =
        Arc::new(HttpBackend::new(&cfg.client.base_url, cfg.request_timeout())?);
    let mut ctl = SessionController::threaded(Arc::clone(&backend), cfg.session_settings());
    ctl.set_options(cfg.options());
    ctl.open(Instant::now());
    let app = App::new(
        ctl,
        backend,
        cfg.client.base_url.clone(),
        cfg.recording.viewport_width,
    );

    let mut stdout = io::stdout();
    enable_raw_mode().map_err(|e| Error::msg(e.to_string()))?;
    execute!(stdout, EnterAlternateScreen, Hide).map_err(|e| Error::msg(e.to_string()))?;
    let term_backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(term_backend).map_err(|e| Error::msg(e.to_string()))?;
    terminal
        .clear()
        .map_err(|e| Error::msg(format!("tui clear failed: {e}")))?;

    let result = run_loop(&mut terminal, app);

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen, Show).ok();
    result
}

fn run_loop(terminal: &mut Terminal<CrosstermBackend<Stdout>>, mut app: App) -> Result<()> {
    let tick = Duration::from_millis(100);
    loop {
        app.tick(Instant::now());
        terminal
            .draw(|f| app.draw(f))
            .map_err(|e| Error::msg(format!("tui draw failed: {e}")))?;

        if event::poll(tick).map_err(|e| Error::msg(e.to_string()))? {
            if let Event::Key(k) = event::read().map_err(|e| Error::msg(e.to_string()))? {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if app.handle_key(k.code, k.modifiers) {
                    break;
                }
            }
        }
    }
    app.ctl.shutdown();
    Ok(())
}

fn window_pixel_width() -> Option<u32> {
    crossterm::terminal::window_size()
        .ok()
        .map(|w| u32::from(w.width))
        .filter(|w| *w > 0)
}

fn push_bounded(q: &mut VecDeque<String>, v: String, max: usize) {
    if max == 0 {
        return;
    }
    while q.len() >= max {
        q.pop_front();
    }
    q.push_back(v);
}

fn clamp(state: &mut ListState, len: usize) {
    match state.selected() {
        _ if len == 0 => state.select(None),
        Some(i) if i >= len => state.select(Some(len - 1)),
        None => state.select(Some(0)),
        _ => {}
    }
}
