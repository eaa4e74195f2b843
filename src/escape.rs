use std::borrow::Cow;

/// Replaces HTML-significant characters with character references.
///
/// The replacement set matches what the renderer applies to every
/// interpolated value when autoescaping is enabled: `&`, `>`, `<`, `"`,
/// `'` and the backtick. A single left-to-right pass; escaping text that
/// already contains references escapes the `&` again. Borrows when the
/// input needs no replacement.
pub fn escape_html(text: &str) -> Cow<'_, str> {
    let Some(first) = text.find(needs_escape) else {
        return Cow::Borrowed(text);
    };

    let mut out = String::with_capacity(text.len() + 8);
    out.push_str(&text[..first]);
    for c in text[first..].chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '>' => out.push_str("&gt;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '`' => out.push_str("&#96;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn needs_escape(c: char) -> bool {
    matches!(c, '&' | '>' | '<' | '"' | '\'' | '`')
}
