//! ANSI SGR escape translation.
//!
//! Only foreground colours (`ESC[30m`..`ESC[37m`), bold (`ESC[1m`) and reset
//! (`ESC[0m` / `ESC[m`) are understood. Any other escape sequence is kept in
//! the text verbatim.

use termdeck_types::{Color, Style, StyleSpan};

const ESC: char = '\x1b';

/// Text with escape codes removed and the styles they described
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Annotated {
    pub text: String,
    pub spans: Vec<StyleSpan>,
}

/// Translate recognised SGR sequences in `input` into style spans.
///
/// `initial` is the style in effect before the first character, so styles
/// can carry across line boundaries. The style in effect at the end is
/// returned alongside the annotated text.
pub fn annotate_with(input: &str, initial: Style) -> (Annotated, Style) {
    let mut out = Annotated::default();
    let mut style = initial;
    let mut span_start = 0usize;
    let mut chars = input.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if ch != ESC {
            out.text.push(ch);
            continue;
        }

        if chars.peek().map(|(_, c)| *c) != Some('[') {
            out.text.push(ch);
            continue;
        }
        chars.next();

        // Collect parameter bytes up to the final byte
        let mut params = String::new();
        let mut final_byte = None;
        for (_, c) in chars.by_ref() {
            if ('\x40'..='\x7e').contains(&c) {
                final_byte = Some(c);
                break;
            }
            params.push(c);
        }

        let raw_end = match final_byte {
            Some(c) => {
                let consumed = 2 + params.len() + c.len_utf8();
                idx + consumed
            }
            None => input.len(),
        };

        let next_style = match final_byte {
            Some('m') => apply_sgr(style, &params),
            _ => None,
        };

        match next_style {
            Some(next) => {
                if next != style {
                    close_span(&mut out, span_start, style);
                    span_start = out.text.len();
                    style = next;
                }
            }
            None => out.text.push_str(&input[idx..raw_end]),
        }
    }

    close_span(&mut out, span_start, style);
    (out, style)
}

/// Annotate a single self-contained piece of text
pub fn annotate(input: &str) -> Annotated {
    annotate_with(input, Style::default()).0
}

/// Remove recognised SGR sequences, keeping everything else
pub fn strip(input: &str) -> String {
    annotate(input).text
}

fn close_span(out: &mut Annotated, start: usize, style: Style) {
    let end = out.text.len();
    if end > start && !style.is_plain() {
        out.spans.push(StyleSpan { start, end, style });
    }
}

/// Returns `None` if any parameter is outside the supported set.
fn apply_sgr(current: Style, params: &str) -> Option<Style> {
    let mut style = current;
    if params.is_empty() {
        return Some(Style::default());
    }

    for part in params.split(';') {
        let code: u8 = if part.is_empty() { 0 } else { part.parse().ok()? };
        match code {
            0 => style = Style::default(),
            1 => style.bold = true,
            30..=37 => style.fg = Color::from_sgr(code),
            _ => return None,
        }
    }
    Some(style)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn red() -> Style {
        Style { fg: Some(Color::Red), bold: false }
    }

    #[test]
    fn test_plain_text_untouched() {
        let a = annotate("hello world");
        assert_eq!(a.text, "hello world");
        assert!(a.spans.is_empty());
    }

    #[test]
    fn test_color_and_reset() {
        let a = annotate("ok \x1b[31merror\x1b[0m done");
        assert_eq!(a.text, "ok error done");
        assert_eq!(a.spans, vec![StyleSpan { start: 3, end: 8, style: red() }]);
    }

    #[test]
    fn test_bold_combined_with_color() {
        let a = annotate("\x1b[1;32mPASS\x1b[m");
        assert_eq!(a.text, "PASS");
        assert_eq!(
            a.spans,
            vec![StyleSpan {
                start: 0,
                end: 4,
                style: Style { fg: Some(Color::Green), bold: true },
            }]
        );
    }

    #[test]
    fn test_unrecognized_sequences_pass_through() {
        let input = "\x1b[38;5;208morange\x1b[2Kx";
        let a = annotate(input);
        assert_eq!(a.text, input);
        assert!(a.spans.is_empty());
    }

    #[test]
    fn test_lone_escape_and_truncated_sequence() {
        assert_eq!(strip("a\x1bb"), "a\x1bb");
        assert_eq!(strip("tail\x1b[3"), "tail\x1b[3");
    }

    #[test]
    fn test_style_carries_across_calls() {
        let (first, carried) = annotate_with("\x1b[33mwarn", Style::default());
        assert_eq!(first.spans.len(), 1);
        let (second, end) = annotate_with("still yellow\x1b[0m", carried);
        assert_eq!(
            second.spans,
            vec![StyleSpan {
                start: 0,
                end: 12,
                style: Style { fg: Some(Color::Yellow), bold: false },
            }]
        );
        assert!(end.is_plain());
    }

    #[test]
    fn test_multibyte_offsets() {
        let a = annotate("é\x1b[34mü\x1b[0m");
        assert_eq!(a.text, "éü");
        assert_eq!(a.spans[0].start, 2);
        assert_eq!(a.spans[0].end, 4);
    }
}
