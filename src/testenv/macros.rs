//! `$NAME` macro expansion
//!
//! A macro reference is `$` followed by one or more ASCII alphanumerics or
//! underscores. Known names are substituted and the result rescanned, so a
//! value may itself reference other macros. Unknown names stay in the output
//! verbatim, which lets a value be expanded in stages.

use super::ConfigMapping;

/// Upper bound on substitutions for a single value.
///
/// Only reached by self-referential definitions such as `A=$A`.
pub const MAX_SUBSTITUTIONS: usize = 256;

/// Byte range of one `$NAME` reference within a string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MacroRef {
    /// Offset of the `$`
    start: usize,
    /// Offset one past the last name character
    end: usize,
}

impl MacroRef {
    fn name<'a>(&self, s: &'a str) -> &'a str {
        &s[self.start + 1..self.end]
    }
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Find the first `$NAME` reference; a `$` not followed by a name is skipped
fn find_macro(s: &str) -> Option<MacroRef> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let end = bytes[i + 1..]
                .iter()
                .position(|&b| !is_name_char(b))
                .map_or(bytes.len(), |n| i + 1 + n);
            if end > i + 1 {
                return Some(MacroRef { start: i, end });
            }
        }
        i += 1;
    }
    None
}

/// Expand every known `$NAME` in `value` against `macros`
pub fn expand(value: &str, macros: &ConfigMapping) -> String {
    let mut done = String::with_capacity(value.len());
    let mut rest = value.to_string();
    let mut substitutions = 0;

    while let Some(m) = find_macro(&rest) {
        match macros.get(m.name(&rest)) {
            Some(replacement) if substitutions < MAX_SUBSTITUTIONS => {
                substitutions += 1;
                rest = format!("{}{}{}", &rest[..m.start], replacement, &rest[m.end..]);
            }
            _ => {
                // Keep the reference and move on to the remainder
                done.push_str(&rest[..m.end]);
                rest.drain(..m.end);
            }
        }
    }

    done.push_str(&rest);
    done
}

/// Expand each element of `values`, preserving order and count
pub fn expand_all<S: AsRef<str>>(values: &[S], macros: &ConfigMapping) -> Vec<String> {
    values.iter().map(|v| expand(v.as_ref(), macros)).collect()
}

/// Whether `value` still contains a `$NAME` reference
pub fn has_macros(value: &str) -> bool {
    find_macro(value).is_some()
}

/// Whether any element of `values` still contains a `$NAME` reference
pub fn any_has_macros<S: AsRef<str>>(values: &[S]) -> bool {
    values.iter().any(|v| has_macros(v.as_ref()))
}
