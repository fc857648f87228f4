//! Snapshot markup normalization.
//!
//! While a reply is being generated the upstream renders code in two
//! co-existing forms: literal backtick fences for text it has not finalized
//! yet, and `<pre>`/`<code>`/`<p>`-wrapped HTML for text it has. Lists
//! arrive as `<ol>`/`<ul>` markup, sometimes with stale numbering baked into
//! the items. This module rewrites one raw snapshot into markdown-ish plain
//! text, keeping the intermediate markup around because the fence-close
//! correction in the reconciler scans it.

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static OL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<ol>(.*?)</ol>").unwrap());
static UL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<ul>(.*?)</ul>").unwrap());
static LI_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<li>\s*\d*\.*\s*").unwrap());
static LI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<li>(.*?)</li>").unwrap());

/// One snapshot after normalization.
pub struct NormalizedSnapshot {
    /// Markup with code markers rewritten and lists reformatted, tags still
    /// present. The fence-close scan runs against this form.
    pub markup: String,
    /// Final plain text: tags stripped, entities decoded, trailing newlines
    /// trimmed.
    pub plain: String,
}

/// Normalize one raw snapshot.
pub fn normalize(raw: &str) -> NormalizedSnapshot {
    let markup = rewrite_code_markers(raw);
    let markup = rewrite_code_closers(&markup);
    let markup = reformat_lists(&markup);
    let plain = decode_entities(&strip_tags(&markup))
        .trim_end_matches('\n')
        .to_string();
    NormalizedSnapshot { markup, plain }
}

#[derive(PartialEq)]
enum BlockTag {
    Pre,
    Paragraph,
}

/// Nearest enclosing block tag before `prefix`'s end: `<pre>` means the
/// following code marker is a fence boundary, `<p>` means inline code.
fn nearest_block_tag(prefix: &str) -> Option<BlockTag> {
    let p = prefix.rfind("<p>");
    let pre = prefix.rfind("<pre>");
    match (p, pre) {
        (Some(p), Some(pre)) if pre > p => Some(BlockTag::Pre),
        (Some(_), _) => Some(BlockTag::Paragraph),
        (None, Some(_)) => Some(BlockTag::Pre),
        (None, None) => None,
    }
}

/// Rewrite `<code>` markers: fence open inside `<pre>`, inline backtick
/// inside `<p>`. Markers with no enclosing block tag are left for the strip
/// pass.
fn rewrite_code_markers(msg: &str) -> String {
    const MARKER: &str = "<code>";
    let mut out = String::with_capacity(msg.len());
    let mut prev = 0;

    for (idx, _) in msg.match_indices(MARKER) {
        match nearest_block_tag(&msg[..idx]) {
            Some(BlockTag::Pre) => {
                out.push_str(&msg[prev..idx]);
                out.push_str("```\n");
                prev = idx + MARKER.len();
            }
            Some(BlockTag::Paragraph) => {
                out.push_str(&msg[prev..idx]);
                out.push('`');
                prev = idx + MARKER.len();
            }
            None => {}
        }
    }

    out.push_str(&msg[prev..]);
    out
}

/// Rewrite `</code>` markers for inline code only. Fence closes stay in the
/// markup: while the fence is still streaming, the literal closing backticks
/// have not been rendered yet, and the reconciler repairs the transition.
fn rewrite_code_closers(msg: &str) -> String {
    const MARKER: &str = "</code>";
    let mut out = String::with_capacity(msg.len());
    let mut prev = 0;

    for (idx, _) in msg.match_indices(MARKER) {
        if nearest_block_tag(&msg[..idx]) == Some(BlockTag::Paragraph) {
            out.push_str(&msg[prev..idx]);
            out.push('`');
            prev = idx + MARKER.len();
        }
    }

    out.push_str(&msg[prev..]);
    out
}

/// Renumber `<ol>` items and re-bullet `<ul>` items from scratch, stripping
/// whatever numbering the upstream already rendered into them. Items whose
/// content starts with a backtick are rendered code blocks, not prose; they
/// are left untouched.
fn reformat_lists(html: &str) -> String {
    let html = reformat_list_kind(html, &OL_RE, true);
    reformat_list_kind(&html, &UL_RE, false)
}

fn reformat_list_kind(html: &str, list_re: &Regex, numbered: bool) -> String {
    let mut out = html.to_string();

    for caps in list_re.captures_iter(html) {
        let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if inner.is_empty() {
            continue;
        }

        let cleaned = LI_PREFIX_RE.replace_all(inner, "<li>");
        let mut rebuilt = String::new();
        let mut count = 1usize;

        for item in LI_RE.captures_iter(&cleaned) {
            let content = item.get(1).map(|m| m.as_str()).unwrap_or_default();
            if content.trim().starts_with('`') {
                rebuilt.push_str(item.get(0).map(|m| m.as_str()).unwrap_or_default());
                continue;
            }

            if numbered {
                rebuilt.push_str(&format!("{count}.{}", content.trim()));
            } else {
                rebuilt.push_str(&format!("- {}", content.trim()));
            }
            rebuilt.push('\n');
            count += 1;
        }

        out = out.replacen(inner, &rebuilt, 1);
    }

    out
}

fn strip_tags(msg: &str) -> String {
    TAG_RE.replace_all(msg, "").into_owned()
}

/// Decode the HTML entities the upstream emits. Unrecognized sequences are
/// left as-is.
fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        match rest.find(';') {
            Some(end) if end > 1 && end <= 32 => {
                if let Some(decoded) = decode_entity(&rest[1..end]) {
                    out.push(decoded);
                    rest = &rest[end + 1..];
                    continue;
                }
            }
            _ => {}
        }

        out.push('&');
        rest = &rest[1..];
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse().ok()?
            } else {
                return None;
            };
            char::from_u32(code)
        }
    }
}
