use ratatui::layout::Alignment;
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Paragraph, Wrap};

use crate::theme;

pub(crate) fn wrapped_paragraph<'a, T>(text: T) -> Paragraph<'a>
where
    T: Into<Text<'a>>,
{
    Paragraph::new(text).wrap(Wrap { trim: false })
}

pub(crate) fn key_hint_paragraph<'a, T>(text: T) -> Paragraph<'a>
where
    T: Into<Text<'a>>,
{
    wrapped_paragraph(text).alignment(Alignment::Center)
}

/// Height of a bordered key-hint block that wraps `text` to `total_width`.
pub(crate) fn key_hint_height(total_width: u16, text: &str) -> u16 {
    let content_width = total_width.saturating_sub(2).max(1) as usize;
    let lines: usize = text
        .split('\n')
        .map(|line| line.chars().count().max(1).div_ceil(content_width))
        .sum();
    u16::try_from(lines.max(1))
        .unwrap_or(u16::MAX)
        .saturating_add(2)
}

pub(crate) fn compact_hint<'a>(width: u16, full: &'a str, compact: &'a str) -> &'a str {
    if width >= 96 { full } else { compact }
}

pub(crate) fn focus_line(message: impl Into<String>) -> Line<'static> {
    Line::from(Span::styled(message.into(), theme::focus_prompt()))
}

pub(crate) fn label_value_line(
    label: impl Into<String>,
    value: impl Into<String>,
) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{}: ", label.into()), theme::secondary_text()),
        Span::raw(value.into()),
    ])
}

pub(crate) fn yes_no(value: bool) -> &'static str {
    if value { "Yes" } else { "No" }
}
