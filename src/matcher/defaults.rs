//! Default match-type implementations.
//!
//! String matching is case-insensitive unless the primitive carries the
//! `case_sensitive` modifier, mirroring SIGMA semantics.

use super::cache::global_regex_cache;
use super::types::MatchFn;
use std::sync::Arc;

fn case_sensitive(modifiers: &[&str]) -> bool {
    modifiers.contains(&"case_sensitive")
}

/// `equals`: the field value equals any of the values.
pub fn create_exact_match() -> MatchFn {
    Arc::new(|field_value, values, modifiers| {
        let cased = case_sensitive(modifiers);
        Ok(values.iter().any(|&value| {
            if cased {
                field_value == value
            } else {
                field_value.eq_ignore_ascii_case(value)
            }
        }))
    })
}

/// `contains`: the field value contains any value as a substring.
pub fn create_contains_match() -> MatchFn {
    Arc::new(|field_value, values, modifiers| {
        if case_sensitive(modifiers) {
            Ok(values.iter().any(|&value| field_value.contains(value)))
        } else {
            let haystack = field_value.to_ascii_lowercase();
            Ok(values
                .iter()
                .any(|&value| haystack.contains(&value.to_ascii_lowercase())))
        }
    })
}

/// `startswith`: the field value starts with any value.
pub fn create_startswith_match() -> MatchFn {
    Arc::new(|field_value, values, modifiers| {
        if case_sensitive(modifiers) {
            Ok(values.iter().any(|&value| field_value.starts_with(value)))
        } else {
            let haystack = field_value.to_ascii_lowercase();
            Ok(values
                .iter()
                .any(|&value| haystack.starts_with(&value.to_ascii_lowercase())))
        }
    })
}

/// `endswith`: the field value ends with any value.
pub fn create_endswith_match() -> MatchFn {
    Arc::new(|field_value, values, modifiers| {
        if case_sensitive(modifiers) {
            Ok(values.iter().any(|&value| field_value.ends_with(value)))
        } else {
            let haystack = field_value.to_ascii_lowercase();
            Ok(values
                .iter()
                .any(|&value| haystack.ends_with(&value.to_ascii_lowercase())))
        }
    })
}

/// `regex`: the field value matches any pattern. Patterns compile through
/// the process-wide cache.
pub fn create_regex_match() -> MatchFn {
    Arc::new(|field_value, values, _modifiers| {
        for &pattern in values {
            let regex = global_regex_cache().get_or_compile(pattern)?;
            if regex.is_match(field_value) {
                return Ok(true);
            }
        }
        Ok(false)
    })
}

/// `glob`: the field value matches any glob pattern (`*` any run, `?` one
/// character).
pub fn create_glob_match() -> MatchFn {
    Arc::new(|field_value, values, modifiers| {
        let cased = case_sensitive(modifiers);
        let haystack = if cased {
            field_value.to_string()
        } else {
            field_value.to_ascii_lowercase()
        };
        Ok(values.iter().any(|&pattern| {
            if cased {
                glob_match(pattern, &haystack)
            } else {
                glob_match(&pattern.to_ascii_lowercase(), &haystack)
            }
        }))
    })
}

/// Two-pointer glob matcher with backtracking over the last `*`.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < txt.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_default_insensitive() {
        let exact = create_exact_match();
        assert!(exact("Test", &["test"], &[]).unwrap());
        assert!(exact("TEST", &["test"], &[]).unwrap());
        assert!(!exact("other", &["test"], &[]).unwrap());
        assert!(exact("b", &["a", "b", "c"], &[]).unwrap());
    }

    #[test]
    fn test_exact_match_case_sensitive() {
        let exact = create_exact_match();
        assert!(!exact("Test", &["test"], &["case_sensitive"]).unwrap());
        assert!(exact("test", &["test"], &["case_sensitive"]).unwrap());
    }

    #[test]
    fn test_contains_match() {
        let contains = create_contains_match();
        assert!(contains("powershell -EncodedCommand", &["encodedcommand"], &[]).unwrap());
        assert!(!contains("cmd /c dir", &["powershell"], &[]).unwrap());
        assert!(
            !contains("ABC", &["abc"], &["case_sensitive"]).unwrap()
        );
    }

    #[test]
    fn test_startswith_and_endswith() {
        let starts = create_startswith_match();
        assert!(starts("C:\\Windows\\explorer.exe", &["c:\\windows"], &[]).unwrap());
        assert!(!starts("explorer.exe", &["cmd"], &[]).unwrap());

        let ends = create_endswith_match();
        assert!(ends("C:\\Windows\\explorer.exe", &["EXPLORER.EXE"], &[]).unwrap());
        assert!(!ends("explorer.exe", &[".dll"], &[]).unwrap());
    }

    #[test]
    fn test_regex_match() {
        let regex = create_regex_match();
        assert!(regex("user123", &[r"\d+"], &[]).unwrap());
        assert!(!regex("user", &[r"^\d+$"], &[]).unwrap());
        assert!(regex("abc", &[r"x", r"b"], &[]).unwrap());
        assert!(regex("x", &["["], &[]).is_err());
    }

    #[test]
    fn test_glob_match_fn() {
        let glob = create_glob_match();
        assert!(glob("C:\\Windows\\explorer.exe", &["*\\explorer.exe"], &[]).unwrap());
        assert!(glob("report_2024.pdf", &["report_????.pdf"], &[]).unwrap());
        assert!(!glob("report_24.pdf", &["report_????.pdf"], &[]).unwrap());
        assert!(glob("ABC.TXT", &["*.txt"], &[]).unwrap());
        assert!(!glob("ABC.TXT", &["*.txt"], &["case_sensitive"]).unwrap());
    }

    #[test]
    fn test_glob_primitive() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("a*c", "ac"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("abc", "abcd"));
    }
}
