//! Minimal markup extraction for the exchange's server-rendered pages.
//!
//! The pages are machine-generated and regular, so a handful of patterns
//! covers everything the pipelines read: table body rows, anchors, and
//! elements selected by id, class or tag name. Element selection balances
//! start and end tags, so a selection never runs past its closing tag.

use once_cell::sync::Lazy;
use regex::Regex;

static TBODY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<tbody[^>]*>(.*?)</tbody>").unwrap());
static TR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap());
static TD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").unwrap());
static ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#).unwrap()
});
static TAG_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<(/?)([a-zA-Z][a-zA-Z0-9]*)\b[^>]*?(/?)>").unwrap());
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static NUMERIC_ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#(x?)([0-9a-fA-F]+);").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const VOID_ELEMENTS: [&str; 13] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// A link and its inner markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub href: String,
    pub inner: String,
}

/// One start or end tag.
struct Tag<'a> {
    name: &'a str,
    markup: &'a str,
    closing: bool,
    self_closing: bool,
    start: usize,
    end: usize,
}

impl<'a> Tag<'a> {
    /// Whether a matching end tag is expected.
    fn opens(&self) -> bool {
        !self.closing
            && !self.self_closing
            && !VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(self.name))
    }

    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    fn attribute(&self, name: &str) -> Option<&'a str> {
        let attrs = &self.markup[1 + self.name.len()..];
        ATTRIBUTE
            .captures_iter(attrs)
            .find(|c| c[1].eq_ignore_ascii_case(name))
            .and_then(|c| c.get(2).or_else(|| c.get(3)))
            .map(|m| m.as_str())
    }

    fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }
}

fn tags(html: &str) -> impl Iterator<Item = Tag<'_>> {
    TAG_TOKEN.captures_iter(html).filter_map(|c| {
        let whole = c.get(0)?;
        Some(Tag {
            name: c.get(2)?.as_str(),
            markup: whole.as_str(),
            closing: !c[1].is_empty(),
            self_closing: !c[3].is_empty(),
            start: whole.start(),
            end: whole.end(),
        })
    })
}

/// Inner markup of the element whose start tag begins at byte `open`.
///
/// An element that is never closed extends to the end of `html`.
fn inner_at(html: &str, open: usize) -> Option<&str> {
    let rest = &html[open..];
    let mut found = tags(rest);
    let first = found.next().filter(|t| t.start == 0 && !t.closing)?;
    if !first.opens() {
        return Some("");
    }

    let mut depth = 1usize;
    for tag in found.filter(|t| t.is(first.name)) {
        if tag.closing {
            depth -= 1;
            if depth == 0 {
                return Some(&rest[first.end..tag.start]);
            }
        } else if tag.opens() {
            depth += 1;
        }
    }
    Some(&rest[first.end..])
}

/// Cell text of every `<tbody>` row, in document order.
pub fn table_rows(html: &str) -> Vec<Vec<String>> {
    TBODY
        .captures_iter(html)
        .flat_map(|body| {
            let body = body.get(1).map_or("", |m| m.as_str()).to_string();
            TR.captures_iter(&body)
                .map(|row| {
                    let row = row.get(1).map_or("", |m| m.as_str());
                    TD.captures_iter(row)
                        .map(|cell| text(cell.get(1).map_or("", |m| m.as_str())))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

pub fn anchors(html: &str) -> Vec<Anchor> {
    ANCHOR
        .captures_iter(html)
        .map(|c| Anchor {
            href: decode_entities(c.get(1).map_or("", |m| m.as_str())),
            inner: c.get(2).map_or("", |m| m.as_str()).to_string(),
        })
        .collect()
}

/// Inner markup of the element with `id`.
pub fn element_by_id<'a>(html: &'a str, id: &str) -> Option<&'a str> {
    let open = tags(html).find(|t| !t.closing && t.attribute("id") == Some(id))?;
    inner_at(html, open.start)
}

/// Inner markup of the first `name` element.
pub fn element_by_tag<'a>(html: &'a str, name: &str) -> Option<&'a str> {
    let open = tags(html).find(|t| !t.closing && t.is(name))?;
    inner_at(html, open.start)
}

/// Inner markup of every element carrying `class`, in document order.
pub fn elements_by_class<'a>(html: &'a str, class: &str) -> Vec<&'a str> {
    tags(html)
        .filter(|t| !t.closing && t.has_class(class))
        .filter_map(|t| inner_at(html, t.start))
        .collect()
}

/// Inner markup of the `name` elements directly inside `html`.
pub fn children<'a>(html: &'a str, name: &str) -> Vec<&'a str> {
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut open = None;
    for tag in tags(html) {
        if tag.closing {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                if let Some(start) = open.take() {
                    if tag.is(name) {
                        found.push(&html[start..tag.start]);
                    }
                }
            }
        } else if tag.opens() {
            if depth == 0 && tag.is(name) {
                open = Some(tag.end);
            }
            depth += 1;
        }
    }
    found
}

/// Text of the first element carrying `class`.
pub fn text_by_class(html: &str, class: &str) -> Option<String> {
    let open = tags(html).find(|t| !t.closing && t.has_class(class))?;
    inner_at(html, open.start)
        .map(text)
        .filter(|t| !t.is_empty())
}

/// Text of every paragraph directly inside `html`.
pub fn paragraphs(html: &str) -> Vec<String> {
    children(html, "p").into_iter().map(text).collect()
}

/// Strip tags, decode entities and collapse whitespace.
pub fn text(fragment: &str) -> String {
    let stripped = TAG.replace_all(fragment, " ");
    let decoded = decode_entities(&stripped);
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}

pub fn decode_entities(s: &str) -> String {
    let named = s
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'");
    let numeric = NUMERIC_ENTITY.replace_all(&named, |c: &regex::Captures<'_>| {
        let radix = if &c[1] == "x" { 16 } else { 10 };
        u32::from_str_radix(&c[2], radix)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    // Last, so "&amp;lt;" stays "&lt;".
    numeric.replace("&amp;", "&")
}
