//! Route template validation.

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest accepted template.
const MAX_TEMPLATE_LEN: usize = 2048;

/// URL-safe literal characters plus single-level `{name}` parameters.
static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/([A-Za-z0-9\-._~!$&'()*+,;=:@/?%#\[\]]|\{[A-Za-z0-9_\-]*\})*$")
        .expect("template regex must compile")
});

/// Whether `template` is a well-formed route template: non-empty, starts
/// with `/`, at most 2048 bytes, braces balanced without nesting, and no
/// `..` outside of parameter names.
pub(crate) fn is_valid_template(template: &str) -> bool {
    if template.is_empty() || template.len() > MAX_TEMPLATE_LEN || !template.starts_with('/') {
        return false;
    }

    if !TEMPLATE_RE.is_match(template) {
        return false;
    }

    // Braces must pair up, one level deep.
    let mut depth = 0u32;
    for c in template.chars() {
        match c {
            '{' => {
                if depth > 0 {
                    return false;
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return false;
    }

    // The literal projection may not traverse upward.
    let mut projection = String::with_capacity(template.len());
    let mut in_brace = false;
    for c in template.chars() {
        match c {
            '{' => in_brace = true,
            '}' => in_brace = false,
            _ if !in_brace => projection.push(c),
            _ => {}
        }
    }
    !projection.contains("..")
}
