use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

const KEYS: &[(&str, &str)] = &[
    ("tab / shift-tab", "Move between path rows"),
    ("↑/↓ or j/k", "Browse remembered paths"),
    ("enter", "Select highlighted path"),
    ("b", "Type a path"),
    ("o", "Open native file/folder dialog"),
    ("d / del", "Delete selected path from cache"),
    ("m / F5", "Begin migration"),
    ("x / esc", "Stop migration"),
    ("pgup/pgdn", "Scroll build output"),
    ("end", "Follow build output"),
    ("e", "Export build output to a file"),
    ("y", "Copy last command to clipboard"),
    ("?", "Toggle this help"),
    ("q / ctrl-c", "Quit"),
];

pub fn draw_help(area: Rect, f: &mut Frame) {
    let mut lines = vec![Line::from("Keybinds:")];
    lines.extend(KEYS.iter().map(|(key, what)| {
        Line::from(vec![
            Span::raw("  "),
            Span::styled(format!("{key:<16}"), Style::default().fg(Color::Magenta)),
            Span::raw(*what),
        ])
    }));
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Packages land in <destination>/Migrated.",
        Style::default().fg(Color::Gray),
    )));

    f.render_widget(Clear, area);
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
