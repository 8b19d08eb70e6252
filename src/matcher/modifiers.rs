//! Modifier library: string transforms applied to field values before
//! matching.

use super::types::ModifierFn;
use crate::error::SigmaError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::collections::HashMap;
use std::sync::Arc;

pub fn create_lowercase() -> ModifierFn {
    Arc::new(|input| Ok(input.to_lowercase()))
}

pub fn create_uppercase() -> ModifierFn {
    Arc::new(|input| Ok(input.to_uppercase()))
}

pub fn create_trim() -> ModifierFn {
    Arc::new(|input| Ok(input.trim().to_string()))
}

pub fn create_reverse() -> ModifierFn {
    Arc::new(|input| Ok(input.chars().rev().collect()))
}

/// Decode standard base64; the decoded bytes are interpreted as UTF-8 with
/// lossy replacement.
pub fn create_base64_decode() -> ModifierFn {
    Arc::new(|input| {
        BASE64
            .decode(input.trim())
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .map_err(|e| SigmaError::ModifierError(format!("base64 decode failed: {e}")))
    })
}

/// Base64 tolerant of the three possible alignments produced by encoding a
/// value embedded at an arbitrary offset: try the input and its one- and
/// two-character-trimmed forms, first success wins.
pub fn create_base64_offset_decode() -> ModifierFn {
    let decode = create_base64_decode();
    Arc::new(move |input| {
        let mut last_err = None;
        for skip in 0..3usize {
            if input.len() < skip || !input.is_char_boundary(skip) {
                break;
            }
            match decode(&input[skip..]) {
                Ok(decoded) => return Ok(decoded),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| SigmaError::ModifierError("empty base64 input".to_string())))
    })
}

/// Percent-decoding of URL-encoded input. `+` becomes a space; malformed
/// escapes fail the primitive.
pub fn create_url_decode() -> ModifierFn {
    Arc::new(|input| {
        let bytes = input.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'%' => {
                    let hex = bytes.get(i + 1..i + 3).ok_or_else(|| {
                        SigmaError::ModifierError("truncated percent escape".to_string())
                    })?;
                    let hex = std::str::from_utf8(hex)
                        .ok()
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                        .ok_or_else(|| {
                            SigmaError::ModifierError("invalid percent escape".to_string())
                        })?;
                    out.push(hex);
                    i += 3;
                }
                b'+' => {
                    out.push(b' ');
                    i += 1;
                }
                byte => {
                    out.push(byte);
                    i += 1;
                }
            }
        }
        Ok(String::from_utf8_lossy(&out).to_string())
    })
}

/// Decode a hex string (optionally `0x`-prefixed, whitespace tolerated).
pub fn create_hex_decode() -> ModifierFn {
    Arc::new(|input| {
        let cleaned: String = input
            .trim()
            .trim_start_matches("0x")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if cleaned.len() % 2 != 0 {
            return Err(SigmaError::ModifierError(
                "hex input has odd length".to_string(),
            ));
        }
        let mut bytes = Vec::with_capacity(cleaned.len() / 2);
        let chars: Vec<char> = cleaned.chars().collect();
        for pair in chars.chunks(2) {
            let hi = pair[0]
                .to_digit(16)
                .ok_or_else(|| SigmaError::ModifierError(format!("invalid hex digit '{}'", pair[0])))?;
            let lo = pair[1]
                .to_digit(16)
                .ok_or_else(|| SigmaError::ModifierError(format!("invalid hex digit '{}'", pair[1])))?;
            bytes.push((hi * 16 + lo) as u8);
        }
        Ok(String::from_utf8_lossy(&bytes).to_string())
    })
}

/// Strip interleaved NUL bytes, the usual artifact of UTF-16LE text read as
/// bytes. Covers `utf16`, `utf16le` and `wide` inputs well enough for
/// matching purposes.
pub fn create_wide_decode() -> ModifierFn {
    Arc::new(|input| Ok(input.chars().filter(|&c| c != '\0').collect()))
}

/// Normalize Windows path separators to forward slashes.
pub fn create_normalize_path() -> ModifierFn {
    Arc::new(|input| Ok(input.replace('\\', "/")))
}

/// Final path component.
pub fn create_basename() -> ModifierFn {
    Arc::new(|input| {
        let normalized = input.replace('\\', "/");
        Ok(normalized
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string())
    })
}

/// Everything up to the final path component.
pub fn create_dirname() -> ModifierFn {
    Arc::new(|input| {
        let normalized = input.replace('\\', "/");
        match normalized.rsplit_once('/') {
            Some((dir, _)) => Ok(dir.to_string()),
            None => Ok(String::new()),
        }
    })
}

/// Register the full modifier library under their canonical names.
pub fn register_default_modifiers(registry: &mut HashMap<String, ModifierFn>) {
    registry.insert("lowercase".to_string(), create_lowercase());
    registry.insert("lower".to_string(), create_lowercase());
    registry.insert("uppercase".to_string(), create_uppercase());
    registry.insert("upper".to_string(), create_uppercase());
    registry.insert("trim".to_string(), create_trim());
    registry.insert("reverse".to_string(), create_reverse());
    registry.insert("base64_decode".to_string(), create_base64_decode());
    registry.insert(
        "base64_offset_decode".to_string(),
        create_base64_offset_decode(),
    );
    registry.insert("url_decode".to_string(), create_url_decode());
    registry.insert("hex_decode".to_string(), create_hex_decode());
    registry.insert("utf16_decode".to_string(), create_wide_decode());
    registry.insert("utf16le_decode".to_string(), create_wide_decode());
    registry.insert("utf16be_decode".to_string(), create_wide_decode());
    registry.insert("wide_decode".to_string(), create_wide_decode());
    registry.insert("normalize_path".to_string(), create_normalize_path());
    registry.insert("basename".to_string(), create_basename());
    registry.insert("dirname".to_string(), create_dirname());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_trim() {
        assert_eq!(create_lowercase()("AdMiN").unwrap(), "admin");
        assert_eq!(create_uppercase()("cmd").unwrap(), "CMD");
        assert_eq!(create_trim()("  x  ").unwrap(), "x");
        assert_eq!(create_reverse()("abc").unwrap(), "cba");
    }

    #[test]
    fn test_base64_decode() {
        let decode = create_base64_decode();
        assert_eq!(decode("SGVsbG8=").unwrap(), "Hello");
        assert!(decode("not base64!!!").is_err());
    }

    #[test]
    fn test_base64_offset_decode() {
        let decode = create_base64_offset_decode();
        assert_eq!(decode("SGVsbG8=").unwrap(), "Hello");
    }

    #[test]
    fn test_url_decode() {
        let decode = create_url_decode();
        assert_eq!(decode("a%20b").unwrap(), "a b");
        assert_eq!(decode("a+b").unwrap(), "a b");
        assert_eq!(decode("%2Fetc%2Fpasswd").unwrap(), "/etc/passwd");
        assert!(decode("%zz").is_err());
        assert!(decode("%2").is_err());
    }

    #[test]
    fn test_hex_decode() {
        let decode = create_hex_decode();
        assert_eq!(decode("48656c6c6f").unwrap(), "Hello");
        assert_eq!(decode("0x48 65 6c 6c 6f").unwrap(), "Hello");
        assert!(decode("abc").is_err());
        assert!(decode("zz").is_err());
    }

    #[test]
    fn test_wide_decode() {
        let decode = create_wide_decode();
        assert_eq!(decode("c\0m\0d\0").unwrap(), "cmd");
        assert_eq!(decode("plain").unwrap(), "plain");
    }

    #[test]
    fn test_path_modifiers() {
        assert_eq!(
            create_normalize_path()("C:\\Windows\\cmd.exe").unwrap(),
            "C:/Windows/cmd.exe"
        );
        assert_eq!(
            create_basename()("C:\\Windows\\cmd.exe").unwrap(),
            "cmd.exe"
        );
        assert_eq!(create_basename()("/usr/bin/ls").unwrap(), "ls");
        assert_eq!(create_dirname()("/usr/bin/ls").unwrap(), "/usr/bin");
        assert_eq!(create_dirname()("ls").unwrap(), "");
    }

    #[test]
    fn test_registry_population() {
        let mut registry = HashMap::new();
        register_default_modifiers(&mut registry);
        for name in [
            "lowercase",
            "uppercase",
            "trim",
            "base64_decode",
            "base64_offset_decode",
            "url_decode",
            "hex_decode",
            "utf16_decode",
            "wide_decode",
            "normalize_path",
            "basename",
            "dirname",
        ] {
            assert!(registry.contains_key(name), "missing modifier {name}");
        }
    }
}
