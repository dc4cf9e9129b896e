//! Transformers applied to values before operators see them.
//!
//! Rules name their transformers in order (`"transformers": ["lowercase",
//! "url_decode"]`); the chain runs per string leaf at evaluation time.

use crate::error::AppsecError;
use crate::matcher::types::ModifierFn;
use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;
use std::sync::Arc;

/// Register every supported transformer.
pub fn register_transformers(modifier_registry: &mut HashMap<String, ModifierFn>) {
    // Encoding/Decoding
    modifier_registry.insert("url_decode".to_string(), create_url_decode());
    modifier_registry.insert("base64_decode".to_string(), create_base64_decode());

    // String normalization
    modifier_registry.insert("lowercase".to_string(), create_lowercase());
    modifier_registry.insert("remove_nulls".to_string(), create_remove_nulls());
    modifier_registry.insert("compress_whitespace".to_string(), create_compress_whitespace());
    modifier_registry.insert("normalize_path".to_string(), create_normalize_path());
}

fn create_lowercase() -> ModifierFn {
    Arc::new(|input| Ok(input.to_lowercase()))
}

fn create_remove_nulls() -> ModifierFn {
    Arc::new(|input| Ok(input.chars().filter(|c| *c != '\0').collect()))
}

fn create_compress_whitespace() -> ModifierFn {
    Arc::new(|input| {
        let mut out = String::with_capacity(input.len());
        let mut previous_space = false;
        for c in input.chars() {
            if c == ' ' {
                if !previous_space {
                    out.push(c);
                }
                previous_space = true;
            } else {
                out.push(c);
                previous_space = false;
            }
        }
        Ok(out)
    })
}

fn create_url_decode() -> ModifierFn {
    Arc::new(|input| {
        let bytes = input.as_bytes();
        let mut decoded = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'%' if i + 2 < bytes.len() => {
                    match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                        (Some(high), Some(low)) => {
                            decoded.push(high << 4 | low);
                            i += 3;
                        }
                        _ => {
                            decoded.push(b'%');
                            i += 1;
                        }
                    }
                }
                b'+' => {
                    decoded.push(b' ');
                    i += 1;
                }
                other => {
                    decoded.push(other);
                    i += 1;
                }
            }
        }
        Ok(String::from_utf8_lossy(&decoded).into_owned())
    })
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}

fn create_base64_decode() -> ModifierFn {
    Arc::new(|input| {
        general_purpose::STANDARD
            .decode(input.trim())
            .map_err(|e| AppsecError::RuleCompilation(format!("Base64 decode failed: {e}")))
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    })
}

/// Resolve `.` and `..` segments and collapse repeated slashes.
fn create_normalize_path() -> ModifierFn {
    Arc::new(|input| {
        let unified = input.replace('\\', "/");
        let absolute = unified.starts_with('/');
        let trailing = unified.ends_with('/') && unified.len() > 1;

        let mut segments: Vec<&str> = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }

        let mut normalized = segments.join("/");
        if absolute {
            normalized.insert(0, '/');
        }
        if trailing && !normalized.ends_with('/') {
            normalized.push('/');
        }
        Ok(normalized)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> HashMap<String, ModifierFn> {
        let mut registry = HashMap::new();
        register_transformers(&mut registry);
        registry
    }

    fn apply(name: &str, input: &str) -> String {
        registry()[name](input).unwrap()
    }

    #[test]
    fn test_registry_contents() {
        let registry = registry();
        assert_eq!(registry.len(), 6);
        assert!(registry.contains_key("lowercase"));
        assert!(!registry.contains_key("squash"));
    }

    #[test]
    fn test_lowercase_and_nulls() {
        assert_eq!(apply("lowercase", "AcUnEtIx"), "acunetix");
        assert_eq!(apply("remove_nulls", "a\0b\0"), "ab");
    }

    #[test]
    fn test_compress_whitespace() {
        assert_eq!(apply("compress_whitespace", "a    b  c "), "a b c ");
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(apply("url_decode", "%3Cscript%3E+x"), "<script> x");
        assert_eq!(apply("url_decode", "100%"), "100%");
        assert_eq!(apply("url_decode", "%zz"), "%zz");
        assert_eq!(apply("url_decode", "%4"), "%4");
    }

    #[test]
    fn test_base64_decode() {
        assert_eq!(apply("base64_decode", "SGVsbG8="), "Hello");
        assert!(registry()["base64_decode"]("not base64!").is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(apply("normalize_path", "/a/./b/../c//d"), "/a/c/d");
        assert_eq!(apply("normalize_path", "..\\..\\etc\\passwd"), "etc/passwd");
        assert_eq!(apply("normalize_path", "/static/"), "/static/");
        assert_eq!(apply("normalize_path", "/"), "/");
    }
}
