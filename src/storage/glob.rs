//! Shell-style patterns for KEYS.
//!
//! - `*` matches any run of bytes, including none
//! - `?` matches exactly one byte
//! - `[abc]`, `[a-z]`, `[^abc]` match one byte from (or outside) a class
//! - everything else, `.` and `\` included, matches itself
//!
//! A pattern must match the whole key.

#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: Vec<u8>,
}

impl GlobPattern {
    pub fn new(pattern: impl AsRef<[u8]>) -> Self {
        Self {
            pattern: pattern.as_ref().to_vec(),
        }
    }

    /// True when the pattern is a bare `*`.
    pub fn matches_everything(&self) -> bool {
        self.pattern == b"*"
    }

    pub fn matches(&self, text: &[u8]) -> bool {
        let pattern = &self.pattern[..];
        let (mut p, mut t) = (0, 0);
        // Position of the last `*` seen and the text offset it was tried at.
        let mut star: Option<(usize, usize)> = None;

        while t < text.len() {
            if p < pattern.len() {
                match pattern[p] {
                    b'*' => {
                        star = Some((p, t));
                        p += 1;
                        continue;
                    }
                    b'?' => {
                        p += 1;
                        t += 1;
                        continue;
                    }
                    b'[' => {
                        if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                            if matched {
                                p = next;
                                t += 1;
                                continue;
                            }
                        } else if text[t] == b'[' {
                            // Unterminated class: the bracket is literal.
                            p += 1;
                            t += 1;
                            continue;
                        }
                    }
                    c if c == text[t] => {
                        p += 1;
                        t += 1;
                        continue;
                    }
                    _ => {}
                }
            }

            match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            }
        }

        pattern[p..].iter().all(|&c| c == b'*')
    }
}

/// Evaluates the class starting at `pattern[start] == b'['` against `byte`.
/// Returns whether it matched and the index just past the closing `]`, or
/// `None` if the class is never closed.
fn match_class(pattern: &[u8], start: usize, byte: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pattern.len() && (pattern[i] != b']' || first) {
        first = false;
        if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = (pattern[i].min(pattern[i + 2]), pattern[i].max(pattern[i + 2]));
            if (lo..=hi).contains(&byte) {
                matched = true;
            }
            i += 3;
        } else {
            if pattern[i] == byte {
                matched = true;
            }
            i += 1;
        }
    }

    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(p: &str, t: &str) -> bool {
        GlobPattern::new(p).matches(t.as_bytes())
    }

    #[test]
    fn test_star() {
        assert!(glob("*", ""));
        assert!(glob("*", "anything"));
        assert!(glob("h*llo", "hllo"));
        assert!(glob("h*llo", "heeeello"));
        assert!(!glob("h*llo", "hello!"));
        assert!(glob("user:*:name", "user:42:name"));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob("h?llo", "hallo"));
        assert!(!glob("h?llo", "hllo"));
        assert!(!glob("h?llo", "heello"));
    }

    #[test]
    fn test_dot_and_backslash_are_literal() {
        assert!(glob("a.b", "a.b"));
        assert!(!glob("a.b", "axb"));
        assert!(glob("a\\b", "a\\b"));
        assert!(!glob("a\\*", "a*x"));
        assert!(glob("a\\*", "a\\xyz"));
    }

    #[test]
    fn test_classes() {
        assert!(glob("h[ae]llo", "hello"));
        assert!(glob("h[ae]llo", "hallo"));
        assert!(!glob("h[ae]llo", "hillo"));
        assert!(glob("h[a-f]llo", "hdllo"));
        assert!(!glob("h[^e]llo", "hello"));
        assert!(glob("h[^e]llo", "hallo"));
    }

    #[test]
    fn test_full_match_required() {
        assert!(!glob("abc", "abcd"));
        assert!(!glob("bcd", "abcd"));
    }
}
