//! Text passes run on raw answer text before it is parsed.
//!
//! Every pass leaves code regions alone. [`normalize`] repeats the passes until
//! the text settles, so normalizing its output again changes nothing; a
//! streaming answer is normalized from scratch each time it grows.

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::ops::Range;
use std::sync::LazyLock;

/// Current citation marker: `[ID:k]`.
pub static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[ID:(\d+)\]").unwrap());

/// Older marker spellings, upgraded in this order.
static LEGACY_MARKER_RULES: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"##(\d+)\$\$").unwrap(),
        Regex::new(r"~~(\d+)==").unwrap(),
    ]
});

static DISPLAY_MATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\\[([\s\S]*?)\\\]").unwrap());
static INLINE_MATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\\(([\s\S]*?)\\\)").unwrap());

static THINK_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</?think>").unwrap());

pub const REASONING_OPEN: &str = r#"<details class="think">"#;
pub const REASONING_OPEN_STREAMING: &str = r#"<details class="think" data-streaming="true">"#;
pub const REASONING_CLOSE: &str = "</details>";

/// Upper bound on normalizing rounds; real answers settle in two or three.
const MAX_ROUNDS: usize = 16;

/// Run every pass, in order, until the text stops changing.
///
/// One round can expose input for another: bracket math written right after
/// `##k` turns into a legacy marker, and a reasoning tag moved onto its own
/// line can start a code fence. Every round that changes the text removes at
/// least one legacy marker, bracket delimiter pair or reasoning tag.
pub fn normalize(text: &str) -> String {
    let mut text = trim_partial_tag(text).to_owned();
    for _ in 0..MAX_ROUNDS {
        match normalize_once(&text) {
            Some(next) => text = next,
            None => return text,
        }
    }
    tracing::warn!(rounds = MAX_ROUNDS, "normalizing did not settle");
    text
}

/// One round of every pass, `None` when nothing was rewritten.
fn normalize_once(text: &str) -> Option<String> {
    let upgraded = upgrade_legacy_markers(text);
    let math = normalize_math_delimiters(&upgraded);
    let reasoning = extract_reasoning_sections(&math);
    let changed = matches!(upgraded, Cow::Owned(_))
        || matches!(math, Cow::Owned(_))
        || matches!(reasoning, Cow::Owned(_));
    changed.then(|| reasoning.into_owned())
}

/// Drop a reasoning tag cut off at the end of a streaming prefix, like `<thi`.
///
/// A lone `<` is kept.
pub fn trim_partial_tag(text: &str) -> &str {
    let mut text = text;
    loop {
        let cut = ["<think>", "</think>"]
            .into_iter()
            .flat_map(|tag| (2..tag.len()).map(move |n| &tag[..n]))
            .filter(|prefix| text.ends_with(prefix))
            .map(str::len)
            .max();
        match cut {
            Some(len) => text = &text[..text.len() - len],
            None => return text,
        }
    }
}

/// Rewrite `##k$$` and `~~k==` markers to `[ID:k]`.
pub fn upgrade_legacy_markers(text: &str) -> Cow<'_, str> {
    let mut out = Cow::Borrowed(text);
    for rule in LEGACY_MARKER_RULES.iter() {
        let code = code_ranges(&out);
        let upgraded = match rewrite_outside_code(&out, &code, rule, |caps| {
            format!("[ID:{}]", &caps[1])
        }) {
            Cow::Owned(upgraded) => Some(upgraded),
            Cow::Borrowed(_) => None,
        };
        if let Some(upgraded) = upgraded {
            out = Cow::Owned(upgraded);
        }
    }
    out
}

/// Rewrite `\[..\]` to `$$..$$` and `\(..\)` to `$..$`.
pub fn normalize_math_delimiters(text: &str) -> Cow<'_, str> {
    let code = code_ranges(text);
    let display = rewrite_outside_code(text, &code, &DISPLAY_MATH_RE, |caps| {
        format!("$${}$$", &caps[1])
    });
    let code = match &display {
        Cow::Borrowed(_) => code,
        Cow::Owned(rewritten) => code_ranges(rewritten),
    };
    let inline = match rewrite_outside_code(&display, &code, &INLINE_MATH_RE, |caps| {
        format!("${}$", &caps[1])
    }) {
        Cow::Owned(rewritten) => Some(rewritten),
        Cow::Borrowed(_) => None,
    };
    match inline {
        Some(rewritten) => Cow::Owned(rewritten),
        None => display,
    }
}

/// Turn `<think>..</think>` into a collapsible `<details class="think">` block.
///
/// An opener with no closer yet gets `data-streaming="true"` and a synthesized
/// closer. Nested openers and unmatched closers are dropped.
pub fn extract_reasoning_sections(text: &str) -> Cow<'_, str> {
    let code = code_ranges(text);
    let tags: Vec<(Range<usize>, bool)> = THINK_TAG_RE
        .find_iter(text)
        .filter(|m| !overlaps_code(&code, m.range()))
        .map(|m| (m.range(), m.as_str() == "<think>"))
        .collect();
    if tags.is_empty() {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 64);
    let mut cursor = 0;
    let mut open = false;
    for (i, (range, is_open)) in tags.iter().enumerate() {
        out.push_str(&text[cursor..range.start]);
        cursor = range.end;
        match (*is_open, open) {
            (true, false) => {
                let closed = tags[i + 1..].iter().any(|(_, o)| !*o);
                out.push_str("\n\n");
                out.push_str(if closed {
                    REASONING_OPEN
                } else {
                    REASONING_OPEN_STREAMING
                });
                out.push_str("\n\n");
                open = true;
            }
            (false, true) => {
                out.push_str("\n\n");
                out.push_str(REASONING_CLOSE);
                out.push_str("\n\n");
                open = false;
            }
            // nested opener or stray closer
            _ => {}
        }
    }
    out.push_str(&text[cursor..]);
    if open {
        tracing::debug!("reasoning section still open at end of text");
        if let Some(fence) = open_fence(&out) {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&fence);
            out.push('\n');
        }
        out.push_str("\n\n");
        out.push_str(REASONING_CLOSE);
        out.push_str("\n");
    }
    Cow::Owned(out)
}

/// Byte ranges of fenced code blocks and inline code spans.
///
/// A fence that is never closed runs to the end of the text, which is what a
/// streaming answer looks like halfway through a code block.
pub fn code_ranges(text: &str) -> Vec<Range<usize>> {
    let (mut ranges, fence) = scan_code(text);
    if let Some((_, _, open_at)) = fence {
        ranges.push(open_at..text.len());
    }
    ranges
}

/// The fence that would close a code block left open at the end of `text`.
pub fn open_fence(text: &str) -> Option<String> {
    let (_, fence) = scan_code(text);
    fence.map(|(ch, len, _)| char::from(ch).to_string().repeat(len))
}

/// Closed code ranges, plus the fence still open at the end as
/// (fence char, fence length, byte offset of the opening line).
fn scan_code(text: &str) -> (Vec<Range<usize>>, Option<(u8, usize, usize)>) {
    let mut ranges = Vec::new();
    let mut fence: Option<(u8, usize, usize)> = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let trimmed = line.trim_start_matches(' ');
        let marker = if line.len() - trimmed.len() <= 3 {
            fence_marker(trimmed)
        } else {
            None
        };
        match fence {
            Some((ch, len, open_at)) => {
                if let Some((c, l)) = marker {
                    if c == ch && l >= len && trimmed[l..].trim().is_empty() {
                        ranges.push(open_at..offset);
                        fence = None;
                    }
                }
            }
            None => match marker {
                Some((c, l)) => fence = Some((c, l, start)),
                None => inline_code_spans(line, start, &mut ranges),
            },
        }
    }
    (ranges, fence)
}

fn fence_marker(line: &str) -> Option<(u8, usize)> {
    let bytes = line.as_bytes();
    let ch = *bytes.first()?;
    if ch != b'`' && ch != b'~' {
        return None;
    }
    let len = bytes.iter().take_while(|&&b| b == ch).count();
    if len < 3 {
        return None;
    }
    // backtick fences cannot carry backticks in their info string
    if ch == b'`' && line[len..].contains('`') {
        return None;
    }
    Some((ch, len))
}

fn inline_code_spans(line: &str, base: usize, out: &mut Vec<Range<usize>>) {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let run = bytes[i..].iter().take_while(|&&b| b == b'`').count();
        let mut j = i + run;
        let mut closed = None;
        while j < bytes.len() {
            if bytes[j] == b'`' {
                let close = bytes[j..].iter().take_while(|&&b| b == b'`').count();
                if close == run {
                    closed = Some(j + close);
                    break;
                }
                j += close;
            } else {
                j += 1;
            }
        }
        match closed {
            Some(end) => {
                out.push(base + i..base + end);
                i = end;
            }
            None => i += run,
        }
    }
}

#[inline]
fn overlaps_code(code: &[Range<usize>], range: Range<usize>) -> bool {
    code.iter()
        .any(|c| range.start < c.end && c.start < range.end)
}

fn rewrite_outside_code<'t>(
    text: &'t str,
    code: &[Range<usize>],
    re: &Regex,
    mut replace: impl FnMut(&Captures<'_>) -> String,
) -> Cow<'t, str> {
    let mut out: Option<String> = None;
    let mut cursor = 0;
    for caps in re.captures_iter(text) {
        let Some(m) = caps.get(0) else { continue };
        if overlaps_code(code, m.range()) {
            continue;
        }
        let buf = out.get_or_insert_with(|| String::with_capacity(text.len()));
        buf.push_str(&text[cursor..m.start()]);
        buf.push_str(&replace(&caps));
        cursor = m.end();
    }
    match out {
        Some(mut buf) => {
            buf.push_str(&text[cursor..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(text),
    }
}
