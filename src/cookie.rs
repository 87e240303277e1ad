//! Request cookie parsing and `Set-Cookie` construction.

use std::collections::HashMap;

use http::header::COOKIE;
use http::HeaderMap;

/// Cookies carried by a request, parsed lazily from the `Cookie` header.
///
/// Tokens are split on `;`, trimmed, and split on the first `=`;
/// surrounding double quotes on the value are stripped and empty names
/// are dropped. Name lookup is case-sensitive.
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    pairs: HashMap<String, String>,
}

impl CookieJar {
    /// Parse every `Cookie` header present in `headers`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut pairs = HashMap::new();
        for raw in headers.get_all(COOKIE) {
            if let Ok(raw) = raw.to_str() {
                parse_cookie_header(raw, &mut pairs);
            }
        }
        Self { pairs }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs.get(name).map(String::as_str)
    }

    /// Case-insensitive scan, used for the canonical `sessionId` cookie.
    pub fn get_ignore_case(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Whitespace stripped around cookie tokens, names, and values.
const COOKIE_WS: &[char] = &[' ', '\t', '\r', '\n'];

fn parse_cookie_header(raw: &str, out: &mut HashMap<String, String>) {
    for token in raw.split(';') {
        let token = token.trim_matches(COOKIE_WS);
        if token.is_empty() {
            continue;
        }
        let (name, value) = match token.split_once('=') {
            Some((n, v)) => (n.trim_matches(COOKIE_WS), v.trim_matches(COOKIE_WS)),
            None => (token, ""),
        };
        if name.is_empty() {
            continue;
        }
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        out.insert(name.to_string(), value.to_string());
    }
}

/// `SameSite` attribute of a response cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Builder for a `Set-Cookie` response header.
///
/// A builder without both a name and a non-empty value serializes to the
/// empty string, which callers treat as "drop this cookie".
///
/// `Max-Age` and `Expires` may both be present; they are emitted in the
/// fixed attribute order `Expires`, `Path`, `Domain`, `Max-Age`,
/// `SameSite`.
#[derive(Debug, Default, Clone)]
pub struct SetCookie {
    name: Option<String>,
    value: Option<String>,
    expires: Option<String>,
    max_age: Option<i64>,
    path: Option<String>,
    domain: Option<String>,
    same_site: Option<SameSite>,
    secure: bool,
    http_only: bool,
}

impl SetCookie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// HTTP-date form, passed through verbatim.
    pub fn expires(mut self, expires: impl Into<String>) -> Self {
        self.expires = Some(expires.into());
        self
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Serialize to the header value, or an empty string when the cookie
    /// must be dropped. `Secure` is forced whenever `SameSite=None`.
    pub fn encode(&self) -> String {
        let (name, value) = match (&self.name, &self.value) {
            (Some(n), Some(v)) if !n.is_empty() && !v.is_empty() => (n, v),
            _ => return String::new(),
        };

        let mut out = format!("{name}={value}");

        if let Some(expires) = self.expires.as_deref().filter(|e| !e.is_empty()) {
            out.push_str("; Expires=");
            out.push_str(expires);
        }
        if let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(domain) = self.domain.as_deref().filter(|d| !d.is_empty()) {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.max_age {
            out.push_str("; Max-Age=");
            out.push_str(&max_age.to_string());
        }
        if let Some(same_site) = self.same_site {
            out.push_str("; SameSite=");
            out.push_str(same_site.as_str());
        }
        if self.same_site == Some(SameSite::None) || self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }

        out
    }
}
