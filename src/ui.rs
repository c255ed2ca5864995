use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use kbchat_core::{ChatMessage, ChatRole, Theme, UploadStatus};
use crate::app::{App, FocusPane, InputMode, SidebarEntry, UploadIndicator};

/// Colors for one theme
struct Palette {
    bg: Color,
    fg: Color,
    muted: Color,
    accent: Color,
    user: Color,
    assistant: Color,
    chip: Color,
    bar: Color,
}

impl Palette {
    fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self {
                bg: Color::Reset,
                fg: Color::Gray,
                muted: Color::DarkGray,
                accent: Color::Cyan,
                user: Color::LightBlue,
                assistant: Color::Yellow,
                chip: Color::LightBlue,
                bar: Color::DarkGray,
            },
            Theme::Light => Self {
                bg: Color::White,
                fg: Color::Black,
                muted: Color::Gray,
                accent: Color::Blue,
                user: Color::Blue,
                assistant: Color::Magenta,
                chip: Color::Blue,
                bar: Color::Gray,
            },
        }
    }
}

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            // Consume the second *
            chars.next();

            // Push any accumulated plain text
            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;

            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next(); // consume second *
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    // Push any remaining text
    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();
    let palette = Palette::for_theme(app.theme);

    frame.render_widget(Block::default().style(Style::default().bg(palette.bg).fg(palette.fg)), area);

    // Main layout: sidebar on the left, chat on the right
    let [sidebar_area, main_area] = Layout::horizontal([
        Constraint::Length(30),
        Constraint::Min(0),
    ])
    .areas(area);

    let [header_area, transcript_area, composer_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(main_area);

    // Store areas for mouse hit-testing
    app.sidebar_area = Some(sidebar_area);
    app.transcript_area = Some(transcript_area);
    app.composer_area = Some(composer_area);

    render_sidebar(app, frame, sidebar_area, &palette);
    render_header(app, frame, header_area, &palette);
    render_transcript(app, frame, transcript_area, &palette);
    render_composer(app, frame, composer_area, &palette);
    render_footer(app, frame, footer_area, &palette);

    if app.input_mode == InputMode::UploadPath {
        render_upload_prompt(app, frame, area, &palette);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect, palette: &Palette) {
    let scope = if app.selected_docs.is_empty() {
        " all documents ".to_string()
    } else {
        format!(" {} selected ", app.selected_docs.len())
    };

    let title = Line::from(vec![
        Span::styled(" AI Assistant ", Style::default().fg(palette.accent).bold()),
        Span::styled(scope, Style::default().fg(Color::White)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::White),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(palette.bar));
    frame.render_widget(header, area);
}

fn render_sidebar(app: &mut App, frame: &mut Frame, area: Rect, palette: &Palette) {
    let focused = app.focus == FocusPane::Sidebar;
    let border_color = if focused { palette.accent } else { palette.muted };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" My Knowledge Base ");

    let items: Vec<ListItem> = app
        .sidebar_entries()
        .into_iter()
        .map(|entry| match entry {
            SidebarEntry::Chat => ListItem::new(" Chat"),
            SidebarEntry::Documents => {
                let arrow = if app.show_documents { "v" } else { ">" };
                let suffix = if app.documents_loading {
                    " (loading...)"
                } else if app.show_documents && app.documents.is_empty() {
                    " (none yet)"
                } else {
                    ""
                };
                ListItem::new(format!(" {} Documents{}", arrow, suffix))
            }
            SidebarEntry::Document(i) => {
                let doc = &app.documents[i];
                let marker = if app.selected_docs.contains(&doc.filename) { "[x]" } else { "[ ]" };
                let pages = doc
                    .page_count
                    .map(|p| format!(" ({} pages)", p))
                    .unwrap_or_default();
                let style = if app.pending_delete == Some(doc.id) {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default()
                };
                ListItem::new(Line::from(vec![
                    Span::raw(format!("   {} {}", marker, doc.filename)),
                    Span::styled(pages, Style::default().fg(palette.muted)),
                ]))
                .style(style)
            }
            SidebarEntry::Theme => {
                let name = match app.theme {
                    Theme::Dark => "Dark",
                    Theme::Light => "Light",
                };
                ListItem::new(format!(" Theme: {}", name))
            }
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(if focused {
            Style::default()
                .bg(palette.accent)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().add_modifier(Modifier::BOLD)
        })
        .highlight_symbol(">");

    frame.render_stateful_widget(list, area, &mut app.sidebar_state);
}

/// Lines for one message, as laid out in the transcript
fn message_lines(msg: &ChatMessage, animation_frame: u8, palette: &Palette) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let (label, color, alignment) = match msg.role {
        ChatRole::User => ("You", palette.user, Alignment::Right),
        ChatRole::Assistant => ("Assistant", palette.assistant, Alignment::Left),
    };

    lines.push(
        Line::from(Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)))
            .alignment(alignment),
    );

    if msg.content.is_empty() {
        lines.push(Line::from("...").alignment(alignment));
    } else {
        for line in msg.content.lines() {
            let line = match msg.role {
                ChatRole::Assistant => parse_markdown_line(line),
                ChatRole::User => Line::from(line.to_string()),
            };
            lines.push(line.alignment(alignment));
        }
    }

    if let Some(attachment) = &msg.attachment {
        let (prefix, color) = match attachment.status {
            UploadStatus::Success => ("Uploaded", Color::Green),
            UploadStatus::Error => ("Failed", Color::Red),
        };
        lines.push(
            Line::from(Span::styled(
                format!("{}: {}", prefix, attachment.name),
                Style::default().fg(color),
            ))
            .alignment(alignment),
        );
    }

    if msg.is_streaming {
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            dots,
            Style::default().fg(palette.muted).add_modifier(Modifier::ITALIC),
        )));
    }

    if !msg.citations.is_empty() {
        lines.push(Line::from(Span::styled(
            "Sources:",
            Style::default().fg(palette.muted).add_modifier(Modifier::BOLD),
        )));
        for (i, citation) in msg.citations.iter().enumerate() {
            lines.push(Line::from(Span::styled(
                format!("[{}] {}", i + 1, citation),
                Style::default().fg(palette.chip),
            )));
        }
    }

    lines.push(Line::default());
    lines
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect, palette: &Palette) {
    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let focused = app.focus == FocusPane::Transcript;
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if focused { palette.accent } else { palette.muted }))
        .title(" Chat ");

    if app.conversation.is_empty() {
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let welcome = Text::from(vec![
            Line::default(),
            Line::from(Span::styled(
                "Your Private AI Assistant",
                Style::default().fg(palette.fg).add_modifier(Modifier::BOLD),
            )),
            Line::default(),
            Line::from(Span::styled(
                "Upload documents and ask anything — your data never leaves your machine",
                Style::default().fg(palette.muted),
            )),
        ]);
        let top = inner.height / 3;
        let welcome_area = Rect::new(inner.x, inner.y + top, inner.width, inner.height.saturating_sub(top));
        frame.render_widget(
            Paragraph::new(welcome).alignment(Alignment::Center).wrap(Wrap { trim: true }),
            welcome_area,
        );
        return;
    }

    let lines: Vec<Line> = app
        .conversation
        .messages()
        .iter()
        .flat_map(|msg| message_lines(msg, app.animation_frame, palette))
        .collect();

    let chat = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_composer(app: &App, frame: &mut Frame, area: Rect, palette: &Palette) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing {
        palette.assistant
    } else if app.focus == FocusPane::Composer {
        palette.accent
    } else {
        palette.muted
    };

    let upload = match app.upload_indicator {
        Some((UploadIndicator::Uploading, _)) => Span::styled(" uploading... ", Style::default().fg(palette.accent)),
        Some((UploadIndicator::Success, _)) => Span::styled(" upload ok ", Style::default().fg(Color::Green)),
        Some((UploadIndicator::Error, _)) => Span::styled(" upload failed ", Style::default().fg(Color::Red)),
        None => Span::raw(""),
    };

    let title = if app.is_streaming() {
        " Streaming reply (Esc to stop) "
    } else {
        " Ask anything or upload documents "
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title)
        .title(Line::from(upload).alignment(Alignment::Right));

    // Calculate visible portion of input with horizontal scrolling
    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.composer_cursor;

    // Calculate scroll offset to keep cursor visible
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    // Newlines are shown as a return symbol on the single-line composer
    let visible_text: String = app
        .composer_input
        .chars()
        .map(|c| if c == '\n' { '↵' } else { c })
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(palette.user))
        .block(input_block);

    frame.render_widget(input, area);

    // Show cursor when editing
    if editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect, palette: &Palette) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing | InputMode::UploadPath => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INSERT ",
        InputMode::UploadPath => " UPLOAD ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(palette.bar).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut spans = vec![Span::styled(mode_text, mode_style)];

    if let Some(status) = &app.status {
        spans.push(Span::styled(format!(" {} ", status), Style::default().fg(palette.assistant)));
    } else {
        let hints: Vec<(&str, &str)> = match (app.input_mode, app.focus) {
            (InputMode::Editing, _) => vec![
                ("Enter", "send"),
                ("S-Enter", "newline"),
                ("Esc", if app.is_streaming() { "stop" } else { "normal" }),
                ("Tab", "sidebar"),
            ],
            (InputMode::UploadPath, _) => vec![("Enter", "upload"), ("Esc", "cancel")],
            (InputMode::Normal, FocusPane::Sidebar) => vec![
                ("j/k", "nav"),
                ("Enter", "open"),
                ("Space", "select doc"),
                ("d", "delete"),
                ("u", "upload"),
                ("r", "refresh"),
                ("q", "quit"),
            ],
            (InputMode::Normal, _) => vec![
                ("j/k", "scroll"),
                ("i", "compose"),
                ("u", "upload"),
                ("D", "documents"),
                ("t", "theme"),
                ("Tab", "focus"),
                ("q", "quit"),
            ],
        };

        for (key, label) in hints {
            spans.push(Span::styled(format!(" {} ", key), key_style));
            spans.push(Span::styled(format!(" {} ", label), label_style));
        }
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_upload_prompt(app: &App, frame: &mut Frame, area: Rect, palette: &Palette) {
    // Calculate popup size and position (centered)
    let popup_width = 64.min(area.width.saturating_sub(4));
    let popup_height = 7;

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.assistant))
        .title(" Upload Document ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Path to a PDF, DOCX, TXT, MD or CSV file (up to 50MB)")
        .style(Style::default().fg(palette.muted));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    // Keep the end of long paths visible
    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let width = input_area.width as usize;
    let char_count = app.upload_input.chars().count();
    let skip = char_count.saturating_sub(width.saturating_sub(1));
    let visible: String = app.upload_input.chars().skip(skip).collect();

    frame.render_widget(
        Paragraph::new(visible.clone()).style(Style::default().fg(palette.user)),
        input_area,
    );
    frame.set_cursor_position((input_area.x + visible.chars().count() as u16, input_area.y));

    let status = Paragraph::new("Enter to upload, Esc to cancel").style(Style::default().fg(palette.muted));
    frame.render_widget(status, Rect::new(inner.x, inner.y + 4, inner.width, 1));
}
