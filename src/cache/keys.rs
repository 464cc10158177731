//! Physical key naming for cache entries, tag indexes and populate locks.
//!
//! Every entry written through [`CacheManager`](super::CacheManager) lives
//! under `cache:<key>[:<tag>...]`. Tags take part in identity: the same
//! logical key stored with a different tag set is a different entry.

/// Namespace prefix shared by every cache entry.
pub const KEY_NAMESPACE: &str = "cache";
/// Prefix of the set entries that index physical keys by tag.
pub const TAG_INDEX_PREFIX: &str = "tag";
/// Prefix of the ephemeral markers used during stampede-protected fetches.
pub const LOCK_PREFIX: &str = "lock";
/// Prefix of logical keys produced by the response cache middleware.
pub const RESPONSE_PREFIX: &str = "response";

/// Sort and deduplicate a tag list so that equal tag sets name one entry.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Resolve the physical store key for a logical key and tag set.
pub fn physical_key(key: &str, tags: &[String]) -> String {
    let tags = normalize_tags(tags);
    let mut physical = format!("{KEY_NAMESPACE}:{key}");
    for tag in tags {
        physical.push(':');
        physical.push_str(&tag);
    }
    physical
}

pub fn tag_index_key(tag: &str) -> String {
    format!("{TAG_INDEX_PREFIX}:{}", tag.trim())
}

pub fn lock_key(physical: &str) -> String {
    format!("{LOCK_PREFIX}:{physical}")
}

/// Scope a caller-supplied glob to the cache namespace.
pub fn namespaced_pattern(pattern: &str) -> String {
    let namespace = format!("{KEY_NAMESPACE}:");
    if pattern.starts_with(&namespace) {
        pattern.to_string()
    } else {
        format!("{namespace}{pattern}")
    }
}

/// Order query parameters so that `?b=2&a=1` and `?a=1&b=2` share a key.
pub fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<&str> = query.split('&').filter(|pair| !pair.is_empty()).collect();
    pairs.sort_unstable();
    pairs.join("&")
}

/// Redis-style glob matching: `*`, `?`, `[a-z]`, `[^x]` and `\` escapes.
pub fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut pi, mut ci) = (0, 0);
    // (pattern index of the last `*`, candidate index it is currently absorbing up to)
    let mut backtrack: Option<(usize, usize)> = None;

    while ci < candidate.len() {
        if pi < pattern.len() {
            match pattern[pi] {
                '*' => {
                    backtrack = Some((pi, ci));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ci += 1;
                    continue;
                }
                '[' => match match_class(&pattern, pi, candidate[ci]) {
                    Some((true, next)) => {
                        pi = next;
                        ci += 1;
                        continue;
                    }
                    Some((false, _)) => {}
                    None => {
                        if candidate[ci] == '[' {
                            pi += 1;
                            ci += 1;
                            continue;
                        }
                    }
                },
                '\\' if pi + 1 < pattern.len() => {
                    if pattern[pi + 1] == candidate[ci] {
                        pi += 2;
                        ci += 1;
                        continue;
                    }
                }
                literal => {
                    if literal == candidate[ci] {
                        pi += 1;
                        ci += 1;
                        continue;
                    }
                }
            }
        }

        match backtrack {
            Some((star_pi, star_ci)) => {
                backtrack = Some((star_pi, star_ci + 1));
                pi = star_pi + 1;
                ci = star_ci + 1;
            }
            None => return false,
        }
    }

    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }
    pi == pattern.len()
}

/// Match one character against the class opening at `start`.
///
/// Returns whether it matched and the index just past the closing `]`, or
/// `None` when the class is unterminated.
fn match_class(pattern: &[char], start: usize, ch: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = matches!(pattern.get(i), Some('^') | Some('!'));
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        let current = pattern[i];
        if current == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        if current == '\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == ch;
            i += 2;
            continue;
        }

        if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let (low, high) = if current <= pattern[i + 2] {
                (current, pattern[i + 2])
            } else {
                (pattern[i + 2], current)
            };
            matched |= (low..=high).contains(&ch);
            i += 3;
            continue;
        }

        matched |= current == ch;
        i += 1;
    }

    None
}
