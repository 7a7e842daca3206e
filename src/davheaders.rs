//
// Typed headers for the webdav methods, and the helpers that the
// handlers use to get at them.
//
use std::fmt;
use std::time::{Duration, UNIX_EPOCH};

use headers::{Header, HeaderMapExt};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use regex::Regex;

use crate::lock::{DEFAULT_TIMEOUT, MAX_TIMEOUT};
use crate::store::StoredObject;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
    static ref IF_TOKEN_RE: Regex = Regex::new(r"\(\s*<([^>]*)>").unwrap();
}

// helper.
fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(invalid)?;
    if values.next().is_some() {
        return Err(invalid());
    }
    Ok(v)
}

// helper
fn invalid() -> headers::Error {
    headers::Error::invalid()
}

// the token itself, without the "opaquelocktoken:" style uri scheme.
fn strip_token_scheme(token: &str) -> String {
    let token = token.trim();
    match token.find("locktoken:") {
        Some(idx) => token[idx + "locktoken:".len()..].to_string(),
        None => token.to_string(),
    }
}

/// Depth: header.
///
/// Anything that is not "0" or "1" means infinity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        match value.as_bytes() {
            b"0" => Ok(Depth::Zero),
            b"1" => Ok(Depth::One),
            _ => Ok(Depth::Infinity),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "Infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Depth::Zero => write!(f, "0"),
            Depth::One => write!(f, "1"),
            Depth::Infinity => write!(f, "Infinity"),
        }
    }
}

/// The Depth: of a request. Absent means infinity.
pub fn get_depth(headers: &HeaderMap) -> Depth {
    headers.typed_get::<Depth>().unwrap_or(Depth::Infinity)
}

/// Overwrite: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let line = one(values)?;
        match line.as_bytes() {
            b"F" | b"f" => Ok(Overwrite(false)),
            b"T" | b"t" => Ok(Overwrite(true)),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// The Overwrite: flag of a request. Absent means "T".
///
/// Returns `None` if the header is present but is neither "T" nor "F".
pub fn get_overwrite(headers: &HeaderMap) -> Option<bool> {
    if !headers.contains_key(&*OVERWRITE) {
        return Some(true);
    }
    headers.typed_get::<Overwrite>().map(|o| o.0)
}

/// Timeout: header, as sent with LOCK.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timeout(pub Duration);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?.to_str().map_err(|_| invalid())?;
        // only the first of a list of timeouts is used.
        let first = value.split(',').next().unwrap_or("").trim();
        let secs = if let Some(num) = first.strip_prefix("Second-") {
            num.trim().parse::<i64>().unwrap_or(MAX_TIMEOUT.as_secs() as i64)
        } else if first.eq_ignore_ascii_case("infinite") || first.eq_ignore_ascii_case("infinity") {
            MAX_TIMEOUT.as_secs() as i64
        } else {
            first.parse::<i64>().unwrap_or(MAX_TIMEOUT.as_secs() as i64)
        };
        let timeout = if secs <= 0 {
            DEFAULT_TIMEOUT
        } else {
            Duration::from_secs(secs as u64).min(MAX_TIMEOUT)
        };
        Ok(Timeout(timeout))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = format!("Second-{}", self.0.as_secs());
        if let Ok(value) = HeaderValue::from_str(&value) {
            values.extend(std::iter::once(value));
        }
    }
}

/// The lock timeout a client asked for, within limits.
pub fn get_timeout(headers: &HeaderMap) -> Duration {
    headers
        .typed_get::<Timeout>()
        .map(|t| t.0)
        .unwrap_or(DEFAULT_TIMEOUT)
}

/// Lock-Token: header. Holds the bare token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?.to_str().map_err(|_| invalid())?.trim();
        let inner = value
            .strip_prefix('<')
            .and_then(|v| v.strip_suffix('>'))
            .ok_or_else(invalid)?;
        let token = strip_token_scheme(inner);
        if token.is_empty() {
            return Err(invalid());
        }
        Ok(LockToken(token))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = format!("<opaquelocktoken:{}>", self.0);
        if let Ok(value) = HeaderValue::from_str(&value) {
            values.extend(std::iter::once(value));
        }
    }
}

/// The lock token from the Lock-Token: header.
pub fn get_lock_id_from_lock_token_header(headers: &HeaderMap) -> Option<String> {
    headers.typed_get::<LockToken>().map(|t| t.0)
}

/// If: header, reduced to the lock tokens it mentions.
///
/// Only the first and the last token list entry are kept, which is
/// enough for the "source and destination" form that COPY/MOVE
/// clients send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfTokens(pub Vec<String>);

impl Header for IfTokens {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut found = Vec::new();
        for value in values {
            let value = value.to_str().map_err(|_| invalid())?;
            for cap in IF_TOKEN_RE.captures_iter(value) {
                found.push(strip_token_scheme(&cap[1]));
            }
        }
        let mut tokens = Vec::new();
        if let Some(first) = found.first() {
            tokens.push(first.clone());
        }
        if found.len() > 1 {
            tokens.push(found[found.len() - 1].clone());
        }
        Ok(IfTokens(tokens))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = self
            .0
            .iter()
            .map(|t| format!("(<opaquelocktoken:{}>)", t))
            .collect::<Vec<_>>()
            .join(" ");
        if let Ok(value) = HeaderValue::from_str(&value) {
            values.extend(std::iter::once(value));
        }
    }
}

/// The lock tokens (at most two) from the If: header.
pub fn get_lock_ids_from_if_header(headers: &HeaderMap) -> Vec<String> {
    headers
        .typed_get::<IfTokens>()
        .map(|t| t.0)
        .unwrap_or_default()
}

/// Weak entity tag for a stored object: `W/"<length>-<modified millis>"`.
///
/// Folders, null resources and absent objects get `W/"-"`.
pub fn get_etag(so: Option<&StoredObject>) -> String {
    match so {
        Some(so) if so.is_resource() => {
            let modified = so
                .last_modified
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis())
                .unwrap_or(0);
            format!("W/\"{}-{}\"", so.resource_length, modified)
        }
        _ => "W/\"-\"".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.append(*k, HeaderValue::from_static(v));
        }
        h
    }

    #[test]
    fn test_depth() {
        assert_eq!(get_depth(&headers(&[])), Depth::Infinity);
        assert_eq!(get_depth(&headers(&[("depth", "0")])), Depth::Zero);
        assert_eq!(get_depth(&headers(&[("depth", "1")])), Depth::One);
        assert_eq!(get_depth(&headers(&[("depth", "infinity")])), Depth::Infinity);
        assert_eq!(get_depth(&headers(&[("depth", "2")])), Depth::Infinity);
    }

    #[test]
    fn test_overwrite() {
        assert_eq!(get_overwrite(&headers(&[])), Some(true));
        assert_eq!(get_overwrite(&headers(&[("overwrite", "F")])), Some(false));
        assert_eq!(get_overwrite(&headers(&[("overwrite", "T")])), Some(true));
        assert_eq!(get_overwrite(&headers(&[("overwrite", "maybe")])), None);
    }

    #[test]
    fn test_timeout() {
        assert_eq!(get_timeout(&headers(&[])), DEFAULT_TIMEOUT);
        assert_eq!(
            get_timeout(&headers(&[("timeout", "Second-100")])),
            Duration::from_secs(100)
        );
        assert_eq!(
            get_timeout(&headers(&[("timeout", "Second-60, Infinite")])),
            Duration::from_secs(60)
        );
        assert_eq!(get_timeout(&headers(&[("timeout", "Infinite")])), MAX_TIMEOUT);
        assert_eq!(
            get_timeout(&headers(&[("timeout", "Second-99999999")])),
            MAX_TIMEOUT
        );
        assert_eq!(get_timeout(&headers(&[("timeout", "Second-0")])), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_lock_token() {
        let h = headers(&[("lock-token", "<opaquelocktoken:1234-abcd>")]);
        assert_eq!(get_lock_id_from_lock_token_header(&h), Some("1234-abcd".to_string()));
        let h = headers(&[("lock-token", "opaquelocktoken:1234-abcd")]);
        assert_eq!(get_lock_id_from_lock_token_header(&h), None);
    }

    #[test]
    fn test_if_tokens() {
        let h = headers(&[("if", "(<opaquelocktoken:aaa>)")]);
        assert_eq!(get_lock_ids_from_if_header(&h), vec!["aaa".to_string()]);

        let h = headers(&[(
            "if",
            "</src> (<opaquelocktoken:aaa>) </dst> (<opaquelocktoken:bbb>)",
        )]);
        assert_eq!(
            get_lock_ids_from_if_header(&h),
            vec!["aaa".to_string(), "bbb".to_string()]
        );

        assert!(get_lock_ids_from_if_header(&headers(&[])).is_empty());
        assert!(get_lock_ids_from_if_header(&headers(&[("if", "([\"etag\"])")])).is_empty());
    }

    #[test]
    fn test_etag() {
        let t = UNIX_EPOCH + Duration::from_millis(1500);
        let so = StoredObject {
            is_folder: false,
            is_null_resource: false,
            last_modified: Some(t),
            creation_date: Some(t),
            resource_length: 42,
        };
        assert_eq!(get_etag(Some(&so)), "W/\"42-1500\"");
        let dir = StoredObject {
            is_folder: true,
            last_modified: Some(SystemTime::now()),
            ..so
        };
        assert_eq!(get_etag(Some(&dir)), "W/\"-\"");
        assert_eq!(get_etag(None), "W/\"-\"");
    }
}
