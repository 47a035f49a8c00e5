//! Exclude rules.
//!
//! Two kinds of patterns, in the order they appear in `[ignore]`:
//! - `name/` is a folder rule. It matches any path that contains `name` as a
//!   run of whole components (`TEMP/` matches `TEMP/a` and `x/TEMP/b`).
//! - anything else is an fnmatch-style glob (`*`, `?`, `[abc]`, `[!abc]`)
//!   tested against the whole relative path, where `*` also crosses `/`.
//!   A glob without `/` is tested against the last component as well.

use regex::Regex;

/// One compiled exclude pattern.
#[derive(Debug, Clone)]
enum ExcludeRule {
    Folder(String),
    Glob { regex: Regex, basename_only: bool },
}

/// Ordered list of exclude patterns; a path is excluded if any rule matches.
#[derive(Debug, Clone, Default)]
pub struct ExcludeRuleSet {
    rules: Vec<ExcludeRule>,
}

impl ExcludeRuleSet {
    /// Compile patterns. Blank patterns are ignored.
    ///
    /// # Errors
    /// Returns the offending pattern if it cannot be compiled.
    pub fn new<I, S>(patterns: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = ExcludeRuleSet::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            let normalized = pattern.replace('\\', "/");
            let rule = if let Some(folder) = normalized.strip_suffix('/') {
                ExcludeRule::Folder(folder.trim_matches('/').to_string())
            } else {
                let regex = Regex::new(&glob_to_regex(&normalized))
                    .map_err(|e| format!("invalid exclude pattern '{}': {}", pattern, e))?;
                ExcludeRule::Glob {
                    regex,
                    basename_only: !normalized.contains('/'),
                }
            };
            set.rules.push(rule);
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check a forward-slash relative path against every rule.
    pub fn is_excluded(&self, rel_path: &str) -> bool {
        let rel_path = rel_path.trim_matches('/');
        if rel_path.is_empty() {
            return false;
        }
        let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);

        self.rules.iter().any(|rule| match rule {
            ExcludeRule::Folder(folder) => {
                !folder.is_empty() && format!("/{}/", rel_path).contains(&format!("/{}/", folder))
            }
            ExcludeRule::Glob {
                regex,
                basename_only,
            } => regex.is_match(rel_path) || (*basename_only && regex.is_match(basename)),
        })
    }
}

/// Translate an fnmatch pattern into an anchored regex.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // Find the closing bracket; an unterminated '[' is literal.
                let mut j = i + 1;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str(r"\[");
                } else {
                    let mut class: String = chars[i + 1..j].iter().collect();
                    let negated = class.starts_with('!');
                    if negated {
                        class.remove(0);
                    }
                    let class = class.replace('\\', r"\\");
                    out.push('[');
                    if negated {
                        out.push('^');
                    } else if class.starts_with('^') {
                        out.push('\\');
                    }
                    out.push_str(&class);
                    out.push(']');
                    i = j;
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}
