//! Utility module to handle the path part of an URL as a filesystem path.
//!
//! A [`DavPath`] is the canonical, percent-decoded resource path that is
//! handed to the store and used as the key in the lock table. It remembers
//! the prefix it was mounted under, so it can be turned back into an URL
//! for `href` elements and `Location` headers.
use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::errors::DavError;
use crate::DavResult;

// Encode all non-unreserved characters, except '/'.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'+');

/// URL path, with hidden prefix.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DavPath {
    // decoded, starts with '/', no trailing slash unless it is the root.
    path: String,
    collection: bool,
    star: bool,
    prefix: String,
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_url_string())
    }
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_url_string_with_prefix())
    }
}

// Split into segments, resolving "." and "..". Fails if ".." would
// climb above the root.
fn normalize(path: &str) -> Option<String> {
    let mut segs: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segs.pop()?;
            }
            s => segs.push(s),
        }
    }
    Some(format!("/{}", segs.join("/")))
}

// strip "prefix" if "path" is inside it.
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path;
    }
    match path.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    }
}

fn decode(raw: &str) -> DavResult<String> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| DavError::InvalidPath)?;
    if decoded.contains('\0') {
        return Err(DavError::InvalidPath);
    }
    Ok(decoded.into_owned())
}

impl DavPath {
    fn build(decoded: &str, prefix: &str) -> Option<DavPath> {
        let collection = decoded.ends_with('/');
        let path = normalize(decoded)?;
        Some(DavPath {
            collection: collection && path != "/",
            path,
            star: false,
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }

    /// Path without a prefix, from a percent-encoded string.
    pub fn new(src: &str) -> Option<DavPath> {
        DavPath::from_str_and_prefix(src, "").ok()
    }

    /// Canonical path of a request URL.
    ///
    /// The prefix is stripped, the rest is percent-decoded. A literal '+'
    /// stays a '+'. An empty path becomes "/".
    pub(crate) fn from_str_and_prefix(src: &str, prefix: &str) -> DavResult<DavPath> {
        if src == "*" {
            return Ok(DavPath {
                path: "/".to_string(),
                collection: false,
                star: true,
                prefix: prefix.trim_end_matches('/').to_string(),
            });
        }
        let raw = strip_prefix(src, prefix);
        let raw = raw.replace('+', "%2B");
        let decoded = decode(&raw)?;
        let decoded = if decoded.is_empty() { "/".to_string() } else { decoded };
        DavPath::build(&decoded, prefix).ok_or(DavError::InvalidPath)
    }

    /// Canonical path of a request.
    pub(crate) fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> DavResult<DavPath> {
        DavPath::from_str_and_prefix(uri.path(), prefix)
    }

    /// Parse the value of a Destination: header.
    ///
    /// Scheme, host and port are dropped, the path is decoded and
    /// normalized, then the prefix is stripped. Returns `None` if the
    /// value is unusable, for example if ".." climbs out of the root.
    pub fn from_destination(value: &str, prefix: &str) -> Option<DavPath> {
        let value = value.trim();
        let mut path = match value.find("://") {
            Some(idx) => {
                let rest = &value[idx + 3..];
                match rest.find('/') {
                    Some(slash) => &rest[slash..],
                    None => "/",
                }
            }
            None => value,
        };
        if let Some(idx) = path.find(&['?', '#'][..]) {
            path = &path[..idx];
        }
        let decoded = decode(&path.replace('+', "%2B")).ok()?;
        if decoded.is_empty() {
            return None;
        }
        let collection = decoded.ends_with('/');
        let normalized = normalize(&decoded)?;
        let stripped = strip_prefix(&normalized, prefix);
        let mut stripped = if stripped.is_empty() { "/".to_string() } else { stripped.to_string() };
        if collection && stripped != "/" {
            stripped.push('/');
        }
        DavPath::build(&stripped, prefix)
    }

    /// The decoded path, without the prefix.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Did the URL end in a slash.
    pub fn is_collection(&self) -> bool {
        self.collection
    }

    /// Is this the OPTIONS "*" request target.
    pub fn is_star(&self) -> bool {
        self.star
    }

    pub fn add_slash(&mut self) {
        if !self.is_root() {
            self.collection = true;
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Last segment of the path. Empty for the root.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// Parent directory. The parent of the root is the root.
    pub fn parent(&self) -> DavPath {
        let path = match self.path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => self.path[..idx].to_string(),
        };
        DavPath {
            collection: path != "/",
            path,
            star: false,
            prefix: self.prefix.clone(),
        }
    }

    /// Path of a child entry.
    pub fn join(&self, name: &str) -> DavPath {
        let path = if self.is_root() {
            format!("/{}", name)
        } else {
            format!("{}/{}", self.path, name)
        };
        DavPath {
            path,
            collection: false,
            star: false,
            prefix: self.prefix.clone(),
        }
    }

    /// Is `other` strictly below this path.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other
            .path
            .strip_prefix(&self.path)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
    }

    /// Another path under the same prefix, from its decoded form (a lock
    /// table key, for example).
    pub(crate) fn with_path(&self, decoded: &str) -> Option<DavPath> {
        DavPath::build(decoded, &self.prefix)
    }

    /// Percent-encoded path, without the prefix.
    pub fn as_url_string(&self) -> String {
        let mut s = utf8_percent_encode(&self.path, PATH_ENCODE_SET).to_string();
        if self.collection {
            s.push('/');
        }
        s
    }

    /// Percent-encoded path, including the prefix.
    pub fn as_url_string_with_prefix(&self) -> String {
        let encoded = self.as_url_string();
        if self.prefix.is_empty() {
            encoded
        } else {
            format!("{}{}", self.prefix, encoded)
        }
    }
}
