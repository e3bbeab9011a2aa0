//! Text helpers for forwarded content

/// Prefix of announcements for open threads
pub const OPEN_PREFIX: &str = "[OPEN] ";
/// Prefix of announcements for closed threads
pub const DONE_PREFIX: &str = "[DONE] ";

/// `1st`, `2nd`, `3rd`, `4th`, ..., `11th`, `12th`, `13th`, `21st`, ...
pub fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Remove any status prefixes, repeated or not
pub fn strip_status(text: &str) -> &str {
    let mut rest = text;
    loop {
        let trimmed = rest.trim_start();
        match trimmed
            .strip_prefix(OPEN_PREFIX.trim_end())
            .or_else(|| trimmed.strip_prefix(DONE_PREFIX.trim_end()))
        {
            Some(stripped) => rest = stripped,
            None => return trimmed,
        }
    }
}

/// Replace whatever status an announcement carries with `prefix`
pub fn with_status(prefix: &str, text: &str) -> String {
    format!("{prefix}{}", strip_status(text))
}

/// Drop the quoted-reply preamble from a plain body
///
/// Quoted lines start with `>`. A line immediately before a quote block that
/// ends in `wrote:` is the attribution of that quote and goes too.
pub fn strip_quotes(body: &str) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with('>') {
            continue;
        }
        let opens_quote = lines
            .get(i + 1)
            .is_some_and(|next| next.trim_start().starts_with('>'));
        if opens_quote && line.trim_end().ends_with("wrote:") {
            continue;
        }
        kept.push(line);
    }

    while kept.first().is_some_and(|l| l.trim().is_empty()) {
        kept.remove(0);
    }
    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }
    kept.join("\n")
}

/// Drop `<mx-reply>` fallbacks and `<blockquote>` blocks from an HTML body
///
/// Blocks may be nested and carry attributes; an unterminated block swallows
/// the rest of the body.
pub fn strip_html_quotes(html: &str) -> String {
    let without_reply = remove_elements(html, "mx-reply");
    remove_elements(&without_reply, "blockquote")
        .trim()
        .to_string()
}

fn remove_elements(html: &str, tag: &str) -> String {
    // ASCII lowercasing keeps byte offsets valid for `html`
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}");

    let mut out = String::with_capacity(html.len());
    let mut depth = 0usize;
    let mut kept_from = 0;
    let mut pos = 0;
    while let Some(offset) = lower[pos..].find('<') {
        let start = pos + offset;
        let candidate = &lower[start..];
        if let Some(after) = tag_name_end(candidate, &open) {
            let end = tag_end(&lower, start + after);
            if depth == 0 {
                out.push_str(&html[kept_from..start]);
            }
            depth += 1;
            pos = end;
        } else if let Some(after) = tag_name_end(candidate, &close) {
            let end = tag_end(&lower, start + after);
            if depth > 0 {
                depth -= 1;
                if depth == 0 {
                    kept_from = end;
                }
            }
            pos = end;
        } else {
            pos = start + 1;
        }
    }
    if depth == 0 {
        out.push_str(&html[kept_from..]);
    }
    out
}

/// Length of `name` at the start of `text` if it is a whole tag name
fn tag_name_end(text: &str, name: &str) -> Option<usize> {
    let rest = text.strip_prefix(name)?;
    match rest.chars().next() {
        None => Some(name.len()),
        Some(c) if c == '>' || c == '/' || c.is_ascii_whitespace() => Some(name.len()),
        Some(_) => None,
    }
}

/// Offset just past the `>` closing a tag, skipping quoted attribute values
fn tag_end(text: &str, from: usize) -> usize {
    let mut quote: Option<char> = None;
    for (i, c) in text[from..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return from + i + 1,
            (None, _) => {}
        }
    }
    text.len()
}
