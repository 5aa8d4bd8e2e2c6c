//! Display text shaping and the per-field diff cache.
//!
//! Redrawing a line makes the panel's LCD visibly flicker, so every field is
//! retransmitted only when its text changed since the last write that
//! actually went out.

/// The independently tracked display fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Station = 0,
    Position = 1,
    TitleTop = 2,
    TitleBottom = 3,
    Clock = 4,
}

#[derive(Default)]
pub struct DisplayTracker {
    sent: [Option<String>; 5],
}

impl DisplayTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything previously written, forcing a full repaint.
    pub fn invalidate_all(&mut self) {
        self.sent = Default::default();
    }

    /// True when `text` differs from the last successfully written value.
    pub fn needs_write(&self, field: Field, text: &str) -> bool {
        self.sent[field as usize].as_deref() != Some(text)
    }

    /// Record a write the link accepted.  Failed writes never get here, so
    /// their text stays dirty and the next tick retries it.
    pub fn mark_written(&mut self, field: Field, text: &str) {
        self.sent[field as usize] = Some(text.to_string());
    }
}

/// Drop characters the panel's character LCD cannot render, trim, and
/// upper-case the rest.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii)
        .collect::<String>()
        .trim()
        .to_uppercase()
}

/// Cut to the column width on a character boundary.
pub fn truncate(text: &str, width: usize) -> &str {
    match text.char_indices().nth(width) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Greedy word wrap.  Words longer than the width are split so no output
/// line ever exceeds it.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return Vec::new();
    }
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word = word;
        loop {
            let needed = if current.is_empty() {
                word.len()
            } else {
                current.len() + 1 + word.len()
            };
            if needed <= width {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
                break;
            }
            if current.is_empty() {
                let cut = word
                    .char_indices()
                    .nth(width)
                    .map(|(idx, _)| idx)
                    .unwrap_or(word.len());
                let (head, tail) = word.split_at(cut);
                lines.push(head.to_string());
                word = tail;
                continue;
            }
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Lay the title out on the two title rows.  A title that wraps to fewer
/// than two lines sits whole on the bottom row with the top row blank,
/// matching how the panel firmware spaces its layout.
pub fn title_rows(title: &str, width: usize) -> (String, String) {
    let lines = wrap(title, width);
    if lines.len() >= 2 {
        (lines[0].clone(), lines[1].clone())
    } else {
        (String::new(), truncate(title, width).to_string())
    }
}
