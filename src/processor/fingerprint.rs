//! Request fingerprints: fixed-format strings built from truncated hashes of
//! selected inputs.
//!
//! Every hash is the first four bytes of a SHA-256 digest, hex encoded. An
//! empty input hashes to an empty segment so fingerprints stay comparable
//! when parts of the request are absent.

use crate::parameter::Parameter;
use sha2::{Digest, Sha256};

/// Headers carrying client addresses, in lookup order.
pub const NETWORK_HEADERS: [&str; 10] = [
    "x-forwarded-for",
    "x-real-ip",
    "true-client-ip",
    "x-client-ip",
    "x-forwarded",
    "forwarded-for",
    "x-cluster-client-ip",
    "fastly-client-ip",
    "cf-connecting-ip",
    "cf-connecting-ipv6",
];

/// Well-known headers whose presence is encoded as a bitmask.
pub const KNOWN_HEADERS: [&str; 10] = [
    "referer",
    "connection",
    "accept-encoding",
    "content-encoding",
    "cache-control",
    "te",
    "accept-charset",
    "content-type",
    "accept",
    "accept-language",
];

/// Truncated SHA-256 of `input`, empty for empty input.
pub fn hash_prefix(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..4])
}

/// `http-<method>-<uri path hash>-<query keys hash>-<body keys hash>`.
///
/// Returns `None` without a method or a URI.
pub fn endpoint(
    method: Option<&Parameter>,
    uri_raw: Option<&Parameter>,
    query: Option<&Parameter>,
    body: Option<&Parameter>,
) -> Option<String> {
    let method = method.and_then(first_string)?.to_lowercase();
    let uri = uri_raw.and_then(first_string)?;
    let path = uri.split(['?', '#']).next().unwrap_or_default();

    Some(format!(
        "http-{method}-{}-{}-{}",
        hash_prefix(path),
        hash_prefix(&sorted_keys(query).join(",")),
        hash_prefix(&sorted_keys(body).join(","))
    ))
}

/// `net-<client ip count>-<network header bitmask>`.
///
/// Returns `None` without headers.
pub fn network(headers: Option<&Parameter>) -> Option<String> {
    let headers = lowercase_headers(headers?)?;
    let mask = bitmask(&NETWORK_HEADERS, &headers);

    let count = NETWORK_HEADERS
        .iter()
        .find_map(|name| header_value(&headers, name))
        .map(|value| value.split(',').filter(|ip| !ip.trim().is_empty()).count())
        .unwrap_or(0);

    Some(format!("net-{count}-{mask}"))
}

/// `hdr-<known header bitmask>-<user agent hash>-<unknown header count>-<unknown headers hash>`.
///
/// Returns `None` without headers.
pub fn header(headers: Option<&Parameter>) -> Option<String> {
    let headers = lowercase_headers(headers?)?;
    let mask = bitmask(&KNOWN_HEADERS, &headers);
    let user_agent = header_value(&headers, "user-agent").unwrap_or_default();

    let mut unknown: Vec<&str> = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| {
            !KNOWN_HEADERS.contains(name)
                && !NETWORK_HEADERS.contains(name)
                && *name != "user-agent"
                && *name != "cookie"
                && !name.starts_with("x-datadog")
        })
        .collect();
    unknown.sort_unstable();
    unknown.dedup();

    Some(format!(
        "hdr-{mask}-{}-{}-{}",
        hash_prefix(user_agent),
        unknown.len(),
        hash_prefix(&unknown.join(","))
    ))
}

/// `ssn-<user id hash>-<cookie names hash>-<cookie values hash>-<session id hash>`.
///
/// Returns `None` when none of the inputs is present.
pub fn session(
    cookies: Option<&Parameter>,
    session_id: Option<&Parameter>,
    user_id: Option<&Parameter>,
) -> Option<String> {
    if cookies.is_none() && session_id.is_none() && user_id.is_none() {
        return None;
    }

    let user = user_id.and_then(first_string).unwrap_or_default();
    let session = session_id.and_then(first_string).unwrap_or_default();

    let mut pairs: Vec<(&str, &str)> = cookies
        .and_then(Parameter::as_map)
        .map(|entries| {
            entries
                .iter()
                .map(|(k, v)| (k.as_str(), first_string(v).unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();
    pairs.sort_unstable();
    let names: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();
    let values: Vec<&str> = pairs.iter().map(|(_, v)| *v).collect();

    Some(format!(
        "ssn-{}-{}-{}-{}",
        hash_prefix(user),
        hash_prefix(&names.join(",")),
        hash_prefix(&values.join(",")),
        hash_prefix(session)
    ))
}

/// A string scalar, or the first string of an array.
fn first_string(value: &Parameter) -> Option<&str> {
    match value {
        Parameter::String(s) => Some(s),
        Parameter::Array(items) => items.iter().find_map(Parameter::as_str),
        _ => None,
    }
}

fn sorted_keys(value: Option<&Parameter>) -> Vec<&str> {
    let mut keys: Vec<&str> = value.map(|v| v.keys().collect()).unwrap_or_default();
    keys.sort_unstable();
    keys
}

fn lowercase_headers(headers: &Parameter) -> Option<Vec<(String, &Parameter)>> {
    headers.as_map().map(|entries| {
        entries
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect()
    })
}

fn header_value<'a>(headers: &[(String, &'a Parameter)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .and_then(|(_, v)| first_string(v))
}

fn bitmask(names: &[&str], headers: &[(String, &Parameter)]) -> String {
    names
        .iter()
        .map(|name| {
            if headers.iter().any(|(k, _)| k == name) {
                '1'
            } else {
                '0'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(value: serde_json::Value) -> Parameter {
        Parameter::from(value)
    }

    #[test]
    fn test_hash_prefix() {
        assert_eq!(hash_prefix(""), "");
        // sha256("abc") = ba7816bf...
        assert_eq!(hash_prefix("abc"), "ba7816bf");
    }

    #[test]
    fn test_endpoint() {
        let method = p(json!("GET"));
        let uri = p(json!("/login?next=/"));
        let query = p(json!({"next": "/", "a": "1"}));

        let fp = endpoint(Some(&method), Some(&uri), Some(&query), None).unwrap();
        let expected = format!("http-get-{}-{}-", hash_prefix("/login"), hash_prefix("a,next"));
        assert_eq!(fp, expected);

        assert!(endpoint(None, Some(&uri), None, None).is_none());
    }

    #[test]
    fn test_network() {
        let headers = p(json!({"X-Forwarded-For": "1.2.3.4, 5.6.7.8", "user-agent": "x"}));
        assert_eq!(network(Some(&headers)).unwrap(), "net-2-1000000000");

        let none = p(json!({"accept": "*/*"}));
        assert_eq!(network(Some(&none)).unwrap(), "net-0-0000000000");
        assert!(network(None).is_none());
    }

    #[test]
    fn test_header() {
        let headers = p(json!({
            "Referer": "https://example.com",
            "Accept": "*/*",
            "User-Agent": "curl/8.0",
            "X-Custom": "1",
            "cookie": "a=b",
            "x-forwarded-for": "1.1.1.1"
        }));
        let fp = header(Some(&headers)).unwrap();
        let expected = format!(
            "hdr-1000000010-{}-1-{}",
            hash_prefix("curl/8.0"),
            hash_prefix("x-custom")
        );
        assert_eq!(fp, expected);
    }

    #[test]
    fn test_session() {
        let cookies = p(json!({"sid": "abc", "lang": "en"}));
        let user = p(json!("admin"));
        let fp = session(Some(&cookies), None, Some(&user)).unwrap();
        let expected = format!(
            "ssn-{}-{}-{}-",
            hash_prefix("admin"),
            hash_prefix("lang,sid"),
            hash_prefix("en,abc")
        );
        assert_eq!(fp, expected);

        assert!(session(None, None, None).is_none());
    }
}
