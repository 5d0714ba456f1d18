pub const MAX_LINE_CHARS: usize = 512;

const TRUNCATED_SUFFIX: &str = " ...[truncated]";

#[derive(Clone, Copy)]
enum Escape {
    Start,
    Csi,
    // OSC/DCS/SOS/PM/APC strings end with BEL (OSC only) or ST.
    Str { bel_ends: bool, saw_esc: bool },
}

pub fn sanitize_log_line(input: &str) -> String {
    sanitize_with_limit(input, MAX_LINE_CHARS)
}

pub fn sanitize_with_limit(input: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_chars));
    let mut escape: Option<Escape> = None;
    let mut kept = 0usize;

    for c in input.chars() {
        if let Some(state) = escape {
            escape = step_escape(state, c);
            continue;
        }
        match c {
            '\x1b' => escape = Some(Escape::Start),
            '\t' => {
                out.push(' ');
                kept += 1;
            }
            c if c.is_control() || is_bidi_control(c) => {}
            c => {
                out.push(c);
                kept += 1;
            }
        }
        if kept >= max_chars {
            out.push_str(TRUNCATED_SUFFIX);
            break;
        }
    }

    out.trim().to_string()
}

fn step_escape(state: Escape, c: char) -> Option<Escape> {
    match state {
        Escape::Start => match c {
            '[' => Some(Escape::Csi),
            ']' => Some(Escape::Str {
                bel_ends: true,
                saw_esc: false,
            }),
            'P' | 'X' | '^' | '_' => Some(Escape::Str {
                bel_ends: false,
                saw_esc: false,
            }),
            _ => None,
        },
        Escape::Csi => {
            if ('@'..='~').contains(&c) {
                None
            } else {
                Some(Escape::Csi)
            }
        }
        Escape::Str { bel_ends, saw_esc } => {
            if bel_ends && c == '\x07' {
                return None;
            }
            if saw_esc && c == '\\' {
                return None;
            }
            Some(Escape::Str {
                bel_ends,
                saw_esc: c == '\x1b',
            })
        }
    }
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}')
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}
