//! Glob-style key matching with Redis `KEYS`/`SCAN MATCH` semantics.
//!
//! Supported syntax:
//!
//! - `*` matches any sequence, including the empty one
//! - `?` matches exactly one byte
//! - `[abc]`, `[a-z]`, `[^a]` byte classes (`^` negates)
//! - `\x` matches `x` literally
//!
//! Matching works on bytes, like Redis, so `?` consumes one byte of a
//! multibyte character. The in-memory backend uses this to emulate Redis,
//! so both backends agree on which keys a pattern such as `posts:*` covers.

/// Return `true` if `key` matches the glob `pattern`.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    match_from(pattern.as_bytes(), key.as_bytes())
}

fn match_from(p: &[u8], k: &[u8]) -> bool {
    let (mut pi, mut ki) = (0usize, 0usize);
    // Backtrack point for the most recent `*`: (pattern index after star, key index)
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() {
            match p[pi] {
                b'*' => {
                    while pi < p.len() && p[pi] == b'*' {
                        pi += 1;
                    }
                    if pi == p.len() {
                        return true;
                    }
                    star = Some((pi, ki));
                    continue;
                }
                b'?' => {
                    pi += 1;
                    ki += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(p, pi, k[ki]) {
                        if matched {
                            pi = next;
                            ki += 1;
                            continue;
                        }
                    } else if k[ki] == b'[' {
                        // Unterminated class: treat `[` literally
                        pi += 1;
                        ki += 1;
                        continue;
                    }
                }
                b'\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == k[ki] {
                        pi += 2;
                        ki += 1;
                        continue;
                    }
                }
                c => {
                    if c == k[ki] {
                        pi += 1;
                        ki += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((star_pi, star_ki)) => {
                pi = star_pi;
                ki = star_ki + 1;
                star = Some((star_pi, star_ki + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Evaluate the class starting at `p[start] == b'['` against byte `c`.
///
/// Returns `(matched, index after ']')`, or `None` if the class never closes.
fn match_class(p: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = i < p.len() && p[i] == b'^';
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < p.len() {
        if p[i] == b']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        let lo = if p[i] == b'\\' && i + 1 < p.len() {
            i += 1;
            p[i]
        } else {
            p[i]
        };

        if i + 2 < p.len() && p[i + 1] == b'-' && p[i + 2] != b']' {
            let hi = p[i + 2];
            let (a, b) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            if a <= c && c <= b {
                matched = true;
            }
            i += 3;
        } else {
            if lo == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}

/// Escape glob metacharacters so `segment` matches only itself.
pub fn escape_glob(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Whether `s` contains any glob metacharacter.
pub fn has_glob_chars(s: &str) -> bool {
    s.chars().any(|c| matches!(c, '*' | '?' | '[' | ']' | '\\'))
}
