mod export;
mod help;
#[cfg(feature = "native-dialogs")]
mod picker;
mod state;

use crate::cli::{build_config, Cli};
use crate::engine::SystemLauncher;
use crate::model::{JobEvent, JobState, PathCategory, PickKind, Selection};
use crate::orchestrator::{self, UiCommand};
use crate::storage::{PathCache, StorageError};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Terminal,
};
use state::{PathPrompt, UiState};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli, cache: PathCache, selection: Selection) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<JobEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let cfg = build_config(&args);

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle = std::thread::spawn(move || run_threaded(cache, selection, event_rx, cmd_tx));

    let res = orchestrator::run_controller(&cfg, Arc::new(SystemLauncher), event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// What the key handler wants the loop to do next.
enum Flow {
    Continue,
    Quit,
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    mut cache: PathCache,
    selection: Selection,
    mut event_rx: UnboundedReceiver<JobEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    // Cache write failures are not fatal, but the user should see them.
    let (diag_tx, diag_rx) = std_mpsc::channel::<String>();
    cache.set_diagnostics(Box::new(move |e: &StorageError| {
        let _ = diag_tx.send(format!("Could not save path cache: {e}"));
    }));

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        selection,
        info: format!("Path cache: {}", cache.path().display()),
        ..Default::default()
    };

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive; order is preserved by the channel.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }
        while let Ok(msg) = diag_rx.try_recv() {
            state.info = msg;
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state, &cache)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                let flow = if state.prompt.is_some() {
                    handle_prompt_key(&mut state, &mut cache, k);
                    Flow::Continue
                } else {
                    handle_key(&mut state, &mut cache, &cmd_tx, k)
                };
                if let Flow::Quit = flow {
                    let _ = cmd_tx.send(UiCommand::Quit);
                    break Ok(());
                }
                // Redraw right away so typing feels immediate.
                last_tick = Instant::now() - tick_rate;
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn handle_prompt_key(state: &mut UiState, cache: &mut PathCache, k: KeyEvent) {
    let Some(prompt) = state.prompt.as_mut() else {
        return;
    };
    match k.code {
        KeyCode::Enter => {
            let PathPrompt { category, input } = prompt.clone();
            state.prompt = None;
            state.choose_path(cache, category, Some(&input));
        }
        KeyCode::Esc => {
            let category = prompt.category;
            state.prompt = None;
            state.choose_path(cache, category, None);
        }
        KeyCode::Backspace => {
            prompt.input.pop();
        }
        KeyCode::Char('u') if k.modifiers.contains(KeyModifiers::CONTROL) => {
            prompt.input.clear();
        }
        KeyCode::Char(c) => prompt.input.push(c),
        _ => {}
    }
}

fn handle_key(
    state: &mut UiState,
    cache: &mut PathCache,
    cmd_tx: &UnboundedSender<UiCommand>,
    k: KeyEvent,
) -> Flow {
    match (k.modifiers, k.code) {
        // The controller stops a running build before it exits.
        (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => return Flow::Quit,
        (_, KeyCode::Char('?')) => state.show_help = !state.show_help,
        (_, KeyCode::Tab) => state.focus_next(),
        (_, KeyCode::BackTab) => state.focus_prev(),
        (_, KeyCode::Up) | (_, KeyCode::Char('k')) => state.move_highlight(cache, -1),
        (_, KeyCode::Down) | (_, KeyCode::Char('j')) => state.move_highlight(cache, 1),
        (_, KeyCode::Enter) => state.select_highlighted(cache),
        (_, KeyCode::Char('b')) => state.open_prompt(cache),
        (_, KeyCode::Char('o')) => open_native_dialog(state, cache),
        (_, KeyCode::Char('d')) | (_, KeyCode::Delete) => state.delete_selected(cache),
        (_, KeyCode::Char('m')) | (_, KeyCode::F(5)) => {
            if state.can_start() {
                state.start_pending = true;
                state.info = "Starting migration…".into();
                let _ = cmd_tx.send(UiCommand::Start(state.selection.clone()));
            } else {
                state.info = "A migration is already running".into();
            }
        }
        (_, KeyCode::Char('x')) | (_, KeyCode::Esc) => {
            if state.show_help {
                state.show_help = false;
            } else if state.can_stop() {
                state.cancel_requested = true;
                state.info = "Stop requested…".into();
                let _ = cmd_tx.send(UiCommand::Cancel);
            }
        }
        (_, KeyCode::PageUp) => state.scroll_log(10),
        (_, KeyCode::PageDown) => state.scroll_log(-10),
        (_, KeyCode::End) => state.log_scroll = 0,
        (_, KeyCode::Char('e')) => match export::export_log(state) {
            Ok(p) => {
                state.info = format!("Exported build output: {}", p.display());
            }
            Err(e) => state.info = format!("Export failed: {e:#}"),
        },
        (_, KeyCode::Char('y')) => match state.last_command.clone() {
            Some(command) => match export::copy_to_clipboard(&command) {
                Ok(()) => state.info = "✓ Copied command to clipboard".into(),
                Err(e) => state.info = format!("Clipboard copy failed: {e:#}"),
            },
            None => state.info = "No command to copy yet. Start a migration first (m)".into(),
        },
        _ => {}
    }
    Flow::Continue
}

#[cfg(feature = "native-dialogs")]
fn open_native_dialog(state: &mut UiState, cache: &mut PathCache) {
    let category = state.focus;
    let current = state
        .selection
        .get(category)
        .or_else(|| cache.front(category))
        .map(str::to_string);
    let picked = picker::pick(category, current.as_deref());
    state.choose_path(cache, category, picked.as_deref());
}

#[cfg(not(feature = "native-dialogs"))]
fn open_native_dialog(state: &mut UiState, _cache: &mut PathCache) {
    state.info = "Native dialogs are not built in (feature `native-dialogs`); press b to type a path".into();
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState, cache: &PathCache) {
    let recent_height = (cache.entries(state.focus).len().clamp(1, 10) + 2) as u16;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(recent_height),
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);

    draw_title(chunks[0], f, state);
    for (i, category) in PathCategory::ALL.into_iter().enumerate() {
        draw_path_row(chunks[1 + i], f, state, category);
    }
    draw_recent(chunks[4], f, state, cache);
    draw_controls(chunks[5], f, state);
    draw_log(chunks[6], f, state);
    draw_status(chunks[7], f, state);

    if let Some(prompt) = &state.prompt {
        draw_prompt(centered(area, 80, 3), f, prompt);
    }
    if state.show_help {
        help::draw_help(centered(area, 60, 20), f);
    }
}

fn draw_title(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let (label, color) = match (state.running, state.last_job.as_ref().map(|j| j.state)) {
        (Some(id), _) => (format!("RUNNING {id}"), Color::Yellow),
        (None, Some(JobState::Succeeded)) => ("SUCCEEDED".to_string(), Color::Green),
        (None, Some(JobState::Failed)) => ("FAILED".to_string(), Color::Red),
        (None, Some(JobState::Cancelled)) => ("CANCELLED".to_string(), Color::Magenta),
        _ => ("IDLE".to_string(), Color::Gray),
    };
    let line = Line::from(vec![
        Span::styled(
            "Unreal Plugin Migration Tool",
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(label, Style::default().fg(color)),
        Span::styled("   ? for help", Style::default().fg(Color::DarkGray)),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn draw_path_row(area: Rect, f: &mut ratatui::Frame, state: &UiState, category: PathCategory) {
    let focused = state.focus == category;
    let border = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let value = match state.selection.get(category) {
        Some(p) => Span::raw(p.to_string()),
        None => Span::styled("<none selected>", Style::default().fg(Color::DarkGray)),
    };
    let p = Paragraph::new(Line::from(value)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border)
            .title(format!("Select {}", category.label())),
    );
    f.render_widget(p, area);
}

fn draw_recent(area: Rect, f: &mut ratatui::Frame, state: &UiState, cache: &PathCache) {
    let entries = cache.entries(state.focus);
    let highlighted = state.highlighted[state.focus.index()];
    let lines: Vec<Line> = if entries.is_empty() {
        vec![Line::from(Span::styled(
            "Nothing remembered yet (b to type a path)",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        entries
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let selected = state.selection.get(state.focus) == Some(p.as_str());
                let marker = if selected { "● " } else { "  " };
                let style = if i == highlighted {
                    Style::default().fg(Color::Black).bg(Color::Cyan)
                } else {
                    Style::default()
                };
                Line::from(Span::styled(format!("{marker}{p}"), style))
            })
            .collect()
    };
    let p = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Recent {} (enter to select, d to delete)", state.focus.label())),
    );
    f.render_widget(p, area);
}

fn draw_controls(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let enabled = |on: bool, color: Color| {
        if on {
            Style::default().fg(color).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        }
    };
    let line = Line::from(vec![
        Span::styled("[m] Begin Migration", enabled(state.can_start(), Color::Green)),
        Span::raw("   "),
        Span::styled("[x] Stop", enabled(state.can_stop(), Color::Red)),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn draw_log(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let inner_height = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .visible_log(inner_height)
        .iter()
        .map(|l| Line::from(l.as_str()))
        .collect();
    let title = if state.log_scroll > 0 {
        format!("Build output (scrolled {} lines, End to follow)", state.log_scroll)
    } else {
        "Build output".to_string()
    };
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let p = Paragraph::new(Line::from(Span::styled(
        state.info.clone(),
        Style::default().fg(Color::Gray),
    )))
    .wrap(Wrap { trim: true });
    f.render_widget(p, area);
}

fn draw_prompt(area: Rect, f: &mut ratatui::Frame, prompt: &PathPrompt) {
    f.render_widget(Clear, area);
    let p = Paragraph::new(Line::from(vec![
        Span::raw(prompt.input.clone()),
        Span::styled("▏", Style::default().fg(Color::Cyan)),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(format!(
                "{} {} (enter to accept, esc for none)",
                prompt.category.label(),
                match prompt.category.pick_kind() {
                    PickKind::File { extension } => format!("path, *.{extension}"),
                    PickKind::Folder => "folder path".to_string(),
                }
            )),
    );
    f.render_widget(p, area);
}

/// A `width` x `height` rectangle centred in `area`, shrunk to fit.
fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    Rect {
        x: area.x + (area.width - w) / 2,
        y: area.y + (area.height - h) / 2,
        width: w,
        height: h,
    }
}
