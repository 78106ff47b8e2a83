use std::time::Duration;

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};
use tokio::time::Instant;

use crate::app::{App, AppState, LoginFocus, ProtectedView};
use crate::utils::{format_clock, format_remaining, truncate_string};

use super::styles;

/// Longest protected message shown before truncation
const MAX_MESSAGE_LENGTH: usize = 200;

pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title bar
            Constraint::Min(10),   // Main content
            Constraint::Length(2), // Status bar
        ])
        .split(frame.area());

    render_title_bar(frame, app, chunks[0]);
    if matches!(app.state, AppState::Dashboard)
        || (app.state == AppState::ConfirmingQuit && app.is_authenticated())
    {
        render_dashboard(frame, app, chunks[1]);
    }
    render_status_bar(frame, app, chunks[2]);

    // Render overlays
    if app.state.is_form() || (app.state == AppState::ConfirmingQuit && !app.is_authenticated()) {
        render_form_overlay(frame, app);
    }

    if matches!(app.state, AppState::ConfirmingQuit) {
        render_quit_overlay(frame);
    }
}

fn render_title_bar(frame: &mut Frame, app: &App, area: Rect) {
    let title = "  sessionward";
    let who = app
        .snapshot()
        .identity
        .map(|identity| format!("signed in as {}", identity))
        .unwrap_or_else(|| "signed out".to_string());

    let title_line = Line::from(vec![
        Span::styled(title, styles::title_style()),
        Span::raw(" ".repeat(
            area.width
                .saturating_sub(title.len() as u16 + who.len() as u16 + 2)
                as usize,
        )),
        Span::styled(who, styles::muted_style()),
    ]);

    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(styles::muted_style());

    let paragraph = Paragraph::new(title_line).block(block);
    frame.render_widget(paragraph, area);
}

fn countdown_line(label: &str, remaining: Duration) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("  {:<22}", label), styles::muted_style()),
        Span::styled(format_remaining(remaining), styles::countdown_style(remaining)),
    ])
}

fn render_dashboard(frame: &mut Frame, app: &App, area: Rect) {
    let snapshot = app.snapshot();
    let now = Instant::now();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(8), Constraint::Min(3)])
        .split(area);

    let mut lines = vec![Line::from("")];
    if let Some(started_at) = snapshot.started_at {
        lines.push(Line::from(vec![
            Span::styled(format!("  {:<22}", "Signed in at"), styles::muted_style()),
            Span::styled(format_clock(started_at), styles::list_item_style()),
        ]));
    }
    lines.push(countdown_line("Access token expires", snapshot.access_remaining(now)));
    lines.push(countdown_line("Session expires", snapshot.session_remaining(now)));
    lines.push(countdown_line("Idle logout in", snapshot.idle_remaining(now)));

    let session_block = Block::default()
        .title(" Session ")
        .borders(Borders::ALL)
        .border_style(styles::border_style(true));
    frame.render_widget(Paragraph::new(lines).block(session_block), chunks[0]);

    let protected = match &app.protected {
        ProtectedView::Idle => Line::from(Span::styled("  Press [r] to load", styles::muted_style())),
        ProtectedView::Loading => Line::from(Span::styled("  Loading...", styles::muted_style())),
        ProtectedView::Loaded(message) => Line::from(Span::styled(
            format!("  {}", truncate_string(message, MAX_MESSAGE_LENGTH)),
            styles::list_item_style(),
        )),
        ProtectedView::Failed(message) => Line::from(Span::styled(
            format!("  {}", truncate_string(message, MAX_MESSAGE_LENGTH)),
            styles::error_style(),
        )),
    };

    let protected_block = Block::default()
        .title(" Protected data ")
        .borders(Borders::ALL)
        .border_style(styles::border_style(false));
    let paragraph = Paragraph::new(vec![Line::from(""), protected])
        .block(protected_block)
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, chunks[1]);
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let shortcuts = match app.state {
        AppState::Dashboard => "[r]eload | [l]ogout | [q]uit",
        AppState::LoggingIn => "[Ctrl+S] sign up | [Ctrl+R] remember | [Esc] quit",
        AppState::SigningUp => "[Ctrl+S] log in | [Ctrl+R] remember | [Esc] quit",
        AppState::ConfirmingQuit | AppState::Quitting => "",
    };

    let left_text = match app.status_message {
        Some(ref msg) => format!(" {} ", msg),
        None => String::from(" "),
    };
    let right_text = format!(" {} ", shortcuts);

    let width = area.width as usize;
    let padding_len = width.saturating_sub(left_text.len()).saturating_sub(right_text.len());
    let status_line = Line::from(vec![
        Span::styled(left_text, styles::highlight_style()),
        Span::raw(" ".repeat(padding_len)),
        Span::styled(right_text, styles::muted_style()),
    ]);
    let paragraph = Paragraph::new(status_line).style(styles::status_bar_style());
    frame.render_widget(paragraph, area);
}

fn field_line<'a>(label: &'a str, value: String, focused: bool) -> Line<'a> {
    let style = if focused {
        styles::selected_style()
    } else {
        styles::list_item_style()
    };
    let cursor = if focused { "▌" } else { "" };
    Line::from(vec![
        Span::raw("      "),
        Span::styled(label, styles::muted_style()),
        Span::styled(format!("{:<16}{}", value, cursor), style),
        Span::styled("]", styles::muted_style()),
    ])
}

fn render_form_overlay(frame: &mut Frame, app: &App) {
    let signing_up = app.state == AppState::SigningUp;
    let height = if app.login_error.is_some() { 13 } else { 11 };
    let area = centered_rect_fixed(46, height, frame.area());

    frame.render_widget(Clear, area);

    let mut lines = vec![Line::from("")];

    // Show the tail of long usernames so the cursor stays visible
    let username: String = {
        let chars: Vec<char> = app.login_username.chars().collect();
        chars[chars.len().saturating_sub(16)..].iter().collect()
    };
    lines.push(field_line(
        "Username: [",
        username,
        app.login_focus == LoginFocus::Username,
    ));
    lines.push(field_line(
        "Password: [",
        "*".repeat(app.login_password.chars().count().min(16)),
        app.login_focus == LoginFocus::Password,
    ));

    let remember = if app.config.remember_password { "[x]" } else { "[ ]" };
    lines.push(Line::from(vec![
        Span::raw("      "),
        Span::styled(format!("{} remember password", remember), styles::muted_style()),
    ]));

    // Submit button (centered)
    let action = if signing_up { "Sign up" } else { "Login" };
    let button_focused = app.login_focus == LoginFocus::Button;
    let button_style = if button_focused {
        styles::selected_style()
    } else {
        styles::list_item_style()
    };
    let label = if button_focused {
        format!(" ▶ {:^7} ◀ ", action)
    } else {
        format!("   {:^7}   ", action)
    };
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::raw("            ["),
        Span::styled(label, button_style),
        Span::raw("]"),
    ]));

    if let Some(ref error) = app.login_error {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!(" {}", error),
            styles::error_style(),
        )));
    }

    let title = if signing_up { " Create account " } else { " Log in " };
    let block = Block::default()
        .title(Span::styled(title, styles::title_style()))
        .borders(Borders::ALL)
        .border_style(styles::border_style(true))
        .style(Style::default());

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

/// Create a centered rectangle with fixed dimensions
fn centered_rect_fixed(width: u16, height: u16, r: Rect) -> Rect {
    let x = r.x + (r.width.saturating_sub(width)) / 2;
    let y = r.y + (r.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width.min(r.width), height.min(r.height))
}

fn render_quit_overlay(frame: &mut Frame) {
    let area = centered_rect_fixed(46, 7, frame.area());

    frame.render_widget(Clear, area);

    let lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            "   Are you sure you want to quit?",
            styles::highlight_style(),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled("   Press ", styles::muted_style()),
            Span::styled("[Y]", styles::help_key_style()),
            Span::styled(" to quit, ", styles::muted_style()),
            Span::styled("[N]", styles::help_key_style()),
            Span::styled(" to cancel", styles::muted_style()),
        ]),
    ];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(true))
        .style(Style::default());

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}
