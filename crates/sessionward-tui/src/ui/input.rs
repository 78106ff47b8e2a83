//! Keyboard input handling for the TUI.
//!
//! Translates key events into application state changes, and raw terminal
//! events into activity signals for the session.

use anyhow::Result;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEventKind};

use sessionward_core::ActivitySignal;

use crate::app::{can_add_password_char, can_add_username_char, App, AppState, LoginFocus};

/// Map a raw terminal event to the presence signal it represents, if any
pub fn activity_signal(event: &Event) -> Option<ActivitySignal> {
    match event {
        Event::Key(_) | Event::Paste(_) => Some(ActivitySignal::KeyPress),
        Event::Mouse(mouse) => match mouse.kind {
            MouseEventKind::Moved | MouseEventKind::Drag(_) => Some(ActivitySignal::PointerMove),
            MouseEventKind::Down(_) => Some(ActivitySignal::Click),
            MouseEventKind::ScrollUp
            | MouseEventKind::ScrollDown
            | MouseEventKind::ScrollLeft
            | MouseEventKind::ScrollRight => Some(ActivitySignal::Scroll),
            MouseEventKind::Up(_) => None,
        },
        _ => None,
    }
}

/// The key press this event carries, if it should drive the UI.
/// Releases and repeats only count as activity.
pub fn pressed_key(event: &Event) -> Option<KeyEvent> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => Some(*key),
        _ => None,
    }
}

/// Ctrl+C quits from any screen
pub fn is_interrupt(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
}

/// Handle keyboard input. Returns true if the app should quit.
pub async fn handle_input(app: &mut App, key: KeyEvent) -> Result<bool> {
    match app.state {
        AppState::LoggingIn | AppState::SigningUp => handle_form_input(app, key).await,
        AppState::ConfirmingQuit => {
            match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                    app.state = AppState::Quitting;
                    return Ok(true);
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.cancel_quit(),
                _ => {}
            }
            Ok(false)
        }
        AppState::Dashboard => {
            handle_dashboard_input(app, key).await;
            Ok(false)
        }
        AppState::Quitting => Ok(true),
    }
}

async fn handle_dashboard_input(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('l') | KeyCode::Char('L') => app.logout().await,
        KeyCode::Char('r') | KeyCode::Char('R') => app.fetch_protected(),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => app.confirm_quit(),
        _ => {}
    }
}

async fn handle_form_input(app: &mut App, key: KeyEvent) -> Result<bool> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('s') => app.toggle_form(),
            KeyCode::Char('r') => app.toggle_remember_password(),
            _ => {}
        }
        return Ok(false);
    }

    match key.code {
        KeyCode::Esc => app.confirm_quit(),
        KeyCode::Down | KeyCode::Tab => {
            app.login_focus = app.login_focus.next();
        }
        KeyCode::Up | KeyCode::BackTab => {
            app.login_focus = app.login_focus.prev();
        }
        KeyCode::Enter => match app.login_focus {
            LoginFocus::Username => app.login_focus = LoginFocus::Password,
            LoginFocus::Password | LoginFocus::Button => {
                // On failure the form shows login_error
                let _ = match app.state {
                    AppState::SigningUp => app.attempt_signup().await,
                    _ => app.attempt_login().await,
                };
            }
        },
        KeyCode::Backspace => match app.login_focus {
            LoginFocus::Username => {
                app.login_username.pop();
            }
            LoginFocus::Password => {
                app.login_password.pop();
            }
            LoginFocus::Button => {}
        },
        KeyCode::Char(c) => match app.login_focus {
            LoginFocus::Username => {
                if can_add_username_char(app.login_username.chars().count(), c) {
                    app.login_username.push(c);
                }
            }
            LoginFocus::Password => {
                if can_add_password_char(app.login_password.chars().count(), c) {
                    app.login_password.push(c);
                }
            }
            LoginFocus::Button => {}
        },
        _ => {}
    }
    Ok(false)
}
