//! Plain-text rendering of conversation snapshots and reports.

use std::fmt::Write;

use uuid::Uuid;
use xsimple_core::{ConversationState, ReportPayload, Role};

/// Widest bar drawn for a report point.
const BAR_WIDTH: usize = 30;

const ASSISTANT_PREFIX: &str = "assistant> ";

/// The assistant message being printed.
#[derive(Debug)]
struct Followed {
    id: Uuid,
    bytes: usize,
    closed: bool,
}

/// Turns successive snapshots into the text to append to the terminal.
///
/// Only the last assistant message is followed. Each message is printed
/// once: its prefix, then every newly grown suffix, then a newline when the
/// conversation goes idle. A discarded cycle leaves the log ending on the
/// answer before it, which is never printed again.
#[derive(Debug, Default)]
pub struct AnswerPrinter {
    current: Option<Followed>,
    /// Assistant message that preceded `current` in the log.
    before: Option<Uuid>,
}

impl AnswerPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, state: &ConversationState) -> Option<String> {
        let last = state
            .messages
            .last()
            .filter(|m| m.role == Role::Assistant)?;

        let mut out = String::new();
        if self.current.as_ref().map(|f| f.id) != Some(last.id) {
            if self.before == Some(last.id) {
                return None;
            }
            self.before = state
                .messages
                .iter()
                .rev()
                .skip(1)
                .find(|m| m.role == Role::Assistant)
                .map(|m| m.id);
            self.current = Some(Followed {
                id: last.id,
                bytes: 0,
                closed: false,
            });
            out.push_str(ASSISTANT_PREFIX);
        }

        let followed = self.current.as_mut()?;
        if followed.closed {
            return None;
        }

        if let Some(delta) = last.content.get(followed.bytes..) {
            out.push_str(delta);
            followed.bytes = last.content.len();
        }
        if !state.is_streaming {
            out.push('\n');
            followed.closed = true;
        }

        (!out.is_empty()).then_some(out)
    }

    /// Close an answer that was cut off. Returns the line break to print,
    /// if one was open.
    pub fn interrupt(&mut self) -> Option<String> {
        let followed = self.current.as_mut().filter(|f| !f.closed)?;
        followed.closed = true;
        Some("\n".to_string())
    }
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// Title, one text bar per point scaled to the largest magnitude, and the
/// insights.
pub fn render_report(report: &ReportPayload) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", report.title);

    if report.series.is_empty() {
        out.push_str("(no data)\n");
    }

    let max_abs = report.max_magnitude();

    for point in &report.series {
        let len = if max_abs > 0.0 {
            ((point.value.abs() / max_abs) * BAR_WIDTH as f64).round() as usize
        } else {
            0
        };
        let glyph = if point.value < 0.0 { "▒" } else { "█" };
        let _ = writeln!(
            out,
            "{} {:<width$} {}",
            point.label,
            glyph.repeat(len),
            format_value(point.value),
            width = BAR_WIDTH
        );
    }

    if !report.insights.is_empty() {
        out.push_str("insights:\n");
        for insight in &report.insights {
            let _ = writeln!(out, "  - {}", insight);
        }
    }
    out
}
