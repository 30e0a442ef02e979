//! Next-page cursor extraction
//!
//! The cursor is the literal URL of the next relation. It is never
//! validated or dereferenced here. Malformed headers mean "no next page".

use transport::{HeaderMap, header};

/// Where an endpoint advertises its next page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PageLinks {
    /// `Link: <url>; rel="next"` (RFC 8288)
    #[default]
    LinkHeader,
    /// `Location: <url>`
    Location,
    /// The endpoint is not paginated
    Disabled,
}

impl PageLinks {
    /// Cursor for the next page, if the response advertises one.
    pub fn next_url(&self, headers: &HeaderMap) -> Option<String> {
        match self {
            PageLinks::LinkHeader => headers
                .get_all(header::LINK)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .find_map(next_link),
            PageLinks::Location => headers
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            PageLinks::Disabled => None,
        }
    }
}

/// Target of the first `rel="next"` entry of a `Link` header value.
pub fn next_link(value: &str) -> Option<String> {
    split_outside(value, ',').into_iter().find_map(|entry| {
        let rest = entry.trim().strip_prefix('<')?;
        let (target, params) = rest.split_once('>')?;
        let params = params.trim_start();
        if !params.is_empty() && !params.starts_with(';') {
            return None;
        }

        let is_next = split_outside(params, ';').into_iter().any(|param| {
            let Some((name, value)) = param.split_once('=') else {
                return false;
            };
            name.trim().eq_ignore_ascii_case("rel")
                && unquote(value.trim())
                    .split_whitespace()
                    .any(|rel| rel.eq_ignore_ascii_case("next"))
        });

        let target = target.trim();
        (is_next && !target.is_empty()).then(|| target.to_string())
    })
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Split on `sep` outside of `<...>` targets and quoted strings.
fn split_outside(value: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut bracketed = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' if !bracketed => quoted = !quoted,
            '<' if !quoted => bracketed = true,
            '>' if !quoted => bracketed = false,
            c if c == sep && !quoted && !bracketed => {
                parts.push(&value[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}
