use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use crate::app::{App, FocusPane, InputMode, SidebarEntry};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick(),
        AppEvent::Stream(id, update) => app.apply_stream_update(id, update),
        AppEvent::DocumentsLoaded(result) => app.documents_loaded(result),
        AppEvent::DocumentDeleted { id, result } => app.document_deleted(id, result),
        AppEvent::UploadFinished { file_name, result } => app.upload_finished(file_name, result),
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.cancel_stream();
        app.should_quit = true;
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_composer_editing(app, key),
        InputMode::UploadPath => handle_upload_editing(app, key),
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => {
            app.cancel_stream();
            app.should_quit = true;
        }

        // Stop the reply in flight
        KeyCode::Esc => app.cancel_stream(),

        // Tab cycles focus: Sidebar -> Transcript -> Composer
        KeyCode::Tab => {
            app.focus = match app.focus {
                FocusPane::Sidebar => FocusPane::Transcript,
                FocusPane::Transcript => FocusPane::Composer,
                FocusPane::Composer => FocusPane::Sidebar,
            };
            if app.focus == FocusPane::Composer {
                app.input_mode = InputMode::Editing;
            }
        }

        // Half-page scroll
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_chat_down(app.chat_height / 2);
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_chat_up(app.chat_height / 2);
        }

        KeyCode::Char('i') | KeyCode::Char('a') => {
            app.focus = FocusPane::Composer;
            app.input_mode = InputMode::Editing;
        }
        KeyCode::Char('u') => app.open_upload_prompt(),
        KeyCode::Char('r') => app.refresh_documents(),
        KeyCode::Char('D') => app.toggle_documents(),
        KeyCode::Char('t') => app.toggle_theme(),

        _ => match app.focus {
            FocusPane::Sidebar => handle_sidebar(app, key),
            FocusPane::Transcript | FocusPane::Composer => handle_transcript(app, key),
        },
    }
}

fn handle_sidebar(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.sidebar_down(),
        KeyCode::Char('k') | KeyCode::Up => app.sidebar_up(),
        KeyCode::Char('g') => app.sidebar_state.select(Some(0)),
        KeyCode::Char('G') => {
            let last = app.sidebar_entries().len().saturating_sub(1);
            app.sidebar_state.select(Some(last));
        }
        KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => app.sidebar_activate(),
        KeyCode::Char(' ') => app.toggle_document_selection(),
        KeyCode::Char('d') => app.request_delete_selected(),
        KeyCode::Char('h') | KeyCode::Left => {
            // Collapse the document list from anywhere inside it
            if matches!(app.selected_entry(), Some(SidebarEntry::Document(_))) {
                app.toggle_documents();
                app.sidebar_state.select(Some(1));
            }
        }
        _ => {}
    }
}

fn handle_transcript(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.scroll_chat_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_chat_up(1),
        KeyCode::Char('g') => app.chat_scroll = 0,
        KeyCode::Char('G') => app.scroll_chat_to_bottom(),
        KeyCode::Enter => {
            app.focus = FocusPane::Composer;
            app.input_mode = InputMode::Editing;
        }
        _ => {}
    }
}

fn handle_composer_editing(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            if app.is_streaming() {
                app.cancel_stream();
            } else {
                app.input_mode = InputMode::Normal;
            }
        }
        KeyCode::Tab => {
            app.input_mode = InputMode::Normal;
            app.focus = FocusPane::Sidebar;
        }
        // Shift+Enter inserts a newline, Enter sends
        KeyCode::Enter if key.modifiers.contains(KeyModifiers::SHIFT) => {
            insert_char(&mut app.composer_input, &mut app.composer_cursor, '\n');
        }
        KeyCode::Enter => app.submit_composer(),
        KeyCode::Backspace => {
            if app.composer_cursor > 0 {
                app.composer_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.composer_input, app.composer_cursor);
                app.composer_input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.composer_input.chars().count();
            if app.composer_cursor < char_count {
                let byte_pos = char_to_byte_index(&app.composer_input, app.composer_cursor);
                app.composer_input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.composer_cursor = app.composer_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.composer_input.chars().count();
            app.composer_cursor = (app.composer_cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.composer_cursor = 0;
        }
        KeyCode::End => {
            app.composer_cursor = app.composer_input.chars().count();
        }
        KeyCode::Char(c) => insert_char(&mut app.composer_input, &mut app.composer_cursor, c),
        _ => {}
    }
}

fn handle_upload_editing(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.upload_input.clear();
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => app.submit_upload(),
        KeyCode::Backspace => {
            app.upload_input.pop();
        }
        KeyCode::Char(c) => app.upload_input.push(c),
        _ => {}
    }
}

fn insert_char(input: &mut String, cursor: &mut usize, c: char) {
    let byte_pos = char_to_byte_index(input, *cursor);
    input.insert(byte_pos, c);
    *cursor += 1;
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let x = mouse.column;
    let y = mouse.row;

    // Determine which area the mouse is in (position-based scrolling)
    let in_sidebar = app.sidebar_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);
    let in_transcript = app.transcript_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);
    let in_composer = app.composer_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);

    match mouse.kind {
        MouseEventKind::ScrollDown => {
            if in_transcript {
                app.scroll_chat_down(3);
            } else if in_sidebar {
                app.sidebar_down();
            }
        }
        MouseEventKind::ScrollUp => {
            if in_transcript {
                app.scroll_chat_up(3);
            } else if in_sidebar {
                app.sidebar_up();
            }
        }
        MouseEventKind::Down(_) => {
            if in_sidebar {
                app.focus = FocusPane::Sidebar;
                app.input_mode = InputMode::Normal;
            } else if in_transcript {
                app.focus = FocusPane::Transcript;
                app.input_mode = InputMode::Normal;
            } else if in_composer {
                app.focus = FocusPane::Composer;
                app.input_mode = InputMode::Editing;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventKind, KeyEventState};
    use kbchat_core::Config;
    use tokio::sync::mpsc;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    fn test_app() -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (stream_tx, _stream_rx) = mpsc::unbounded_channel();
        let config = Config {
            api_url: "http://127.0.0.1:9".to_string(),
            ..Config::default()
        };
        App::new(config, tx, stream_tx).unwrap()
    }

    #[test]
    fn test_char_to_byte_index_multibyte() {
        assert_eq!(char_to_byte_index("héllo", 2), 3);
        assert_eq!(char_to_byte_index("héllo", 10), "héllo".len());
    }

    #[tokio::test]
    async fn test_typing_and_editing_composer() {
        let mut app = test_app();
        for c in "helo".chars() {
            handle_key(&mut app, key(KeyCode::Char(c)));
        }
        handle_key(&mut app, key(KeyCode::Left));
        handle_key(&mut app, key(KeyCode::Char('l')));
        assert_eq!(app.composer_input, "hello");

        handle_key(&mut app, key(KeyCode::Home));
        handle_key(&mut app, key(KeyCode::Delete));
        assert_eq!(app.composer_input, "ello");
        assert_eq!(app.composer_cursor, 0);
    }

    #[tokio::test]
    async fn test_enter_sends_and_esc_cancels() {
        let mut app = test_app();
        for c in "hi".chars() {
            handle_key(&mut app, key(KeyCode::Char(c)));
        }
        handle_key(&mut app, key(KeyCode::Enter));
        assert!(app.is_streaming());

        handle_key(&mut app, key(KeyCode::Esc));
        assert!(!app.is_streaming());
        assert!(!app.conversation.is_streaming());
        assert_eq!(app.input_mode, InputMode::Editing);

        handle_key(&mut app, key(KeyCode::Esc));
        assert_eq!(app.input_mode, InputMode::Normal);
    }

    #[tokio::test]
    async fn test_tab_cycles_focus() {
        let mut app = test_app();
        handle_key(&mut app, key(KeyCode::Tab));
        assert_eq!(app.focus, FocusPane::Sidebar);
        assert_eq!(app.input_mode, InputMode::Normal);

        handle_key(&mut app, key(KeyCode::Tab));
        assert_eq!(app.focus, FocusPane::Transcript);

        handle_key(&mut app, key(KeyCode::Tab));
        assert_eq!(app.focus, FocusPane::Composer);
        assert_eq!(app.input_mode, InputMode::Editing);
    }

    #[tokio::test]
    async fn test_upload_prompt_escape_discards_input() {
        let mut app = test_app();
        app.input_mode = InputMode::Normal;
        handle_key(&mut app, key(KeyCode::Char('u')));
        assert_eq!(app.input_mode, InputMode::UploadPath);

        handle_key(&mut app, key(KeyCode::Char('x')));
        handle_key(&mut app, key(KeyCode::Esc));
        assert!(app.upload_input.is_empty());
        assert_eq!(app.input_mode, InputMode::Normal);
        assert!(app.upload_indicator.is_none());
    }
}
