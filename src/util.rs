use std::io::{Cursor, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use bytes::Bytes;
use headers::Header;
use time::format_description::well_known::Rfc3339;
use time::macros::offset;

use crate::errors::DavError;
use crate::DavResult;

bitflags! {
    /// The webdav methods, as a set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethod: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const OPTIONS = 0x0010;
        const PROPFIND = 0x0020;
        const PROPPATCH = 0x0040;
        const MKCOL = 0x0080;
        const COPY = 0x0100;
        const MOVE = 0x0200;
        const DELETE = 0x0400;
        const LOCK = 0x0800;
        const UNLOCK = 0x1000;

        const HTTP_RO = Self::HEAD.bits() | Self::GET.bits() | Self::OPTIONS.bits();
        const HTTP_RW = Self::HTTP_RO.bits() | Self::PUT.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits();
        const WEBDAV_BODY = Self::PUT.bits() | Self::PROPFIND.bits()
            | Self::PROPPATCH.bits() | Self::LOCK.bits();
        const WEBDAV_WRITE = Self::PUT.bits() | Self::PROPPATCH.bits() | Self::MKCOL.bits()
            | Self::COPY.bits() | Self::MOVE.bits() | Self::DELETE.bits()
            | Self::LOCK.bits() | Self::UNLOCK.bits();
    }
}

impl DavMethod {
    pub const WEBDAV_RW: Self = Self::all();
}

/// A set of allowed methods.
pub type DavMethodSet = DavMethod;

// translate method into our own enum that has webdav methods as well.
pub(crate) fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::HEAD,
        http::Method::GET => DavMethod::GET,
        http::Method::PUT => DavMethod::PUT,
        http::Method::DELETE => DavMethod::DELETE,
        http::Method::OPTIONS => DavMethod::OPTIONS,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PROPFIND,
            "PROPPATCH" => DavMethod::PROPPATCH,
            "MKCOL" => DavMethod::MKCOL,
            "COPY" => DavMethod::COPY,
            "MOVE" => DavMethod::MOVE,
            "LOCK" => DavMethod::LOCK,
            "UNLOCK" => DavMethod::UNLOCK,
            _ => {
                return Err(DavError::UnknownDavMethod);
            }
        },
    };
    Ok(m)
}

const METHOD_NAMES: &[(DavMethod, &str)] = &[
    (DavMethod::HEAD, "HEAD"),
    (DavMethod::GET, "GET"),
    (DavMethod::PUT, "PUT"),
    (DavMethod::OPTIONS, "OPTIONS"),
    (DavMethod::PROPFIND, "PROPFIND"),
    (DavMethod::PROPPATCH, "PROPPATCH"),
    (DavMethod::MKCOL, "MKCOL"),
    (DavMethod::COPY, "COPY"),
    (DavMethod::MOVE, "MOVE"),
    (DavMethod::DELETE, "DELETE"),
    (DavMethod::LOCK, "LOCK"),
    (DavMethod::UNLOCK, "UNLOCK"),
];

// the canonical name of a single method.
pub(crate) fn dav_method_name(m: DavMethod) -> &'static str {
    METHOD_NAMES
        .iter()
        .find(|(method, _)| *method == m)
        .map(|(_, name)| *name)
        .unwrap_or("UNKNOWN")
}

// names of the methods in a set, in a fixed order.
pub(crate) fn dav_method_names(set: DavMethodSet) -> Vec<&'static str> {
    METHOD_NAMES
        .iter()
        .filter(|(method, _)| set.contains(*method))
        .map(|(_, name)| *name)
        .collect()
}

pub(crate) fn systemtime_to_offsetdatetime(t: SystemTime) -> time::OffsetDateTime {
    let epoch = time::OffsetDateTime::UNIX_EPOCH.to_offset(offset!(UTC));
    match t.duration_since(UNIX_EPOCH) {
        Ok(t) => time::OffsetDateTime::from_unix_timestamp(t.as_secs() as i64)
            .map(|tm| tm.to_offset(offset!(UTC)))
            .unwrap_or(epoch),
        Err(_) => epoch,
    }
}

pub(crate) fn systemtime_to_httpdate(t: SystemTime) -> String {
    let d = headers::Date::from(t);
    let mut v = Vec::new();
    d.encode(&mut v);
    v.first()
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_owned())
        .unwrap_or_default()
}

pub(crate) fn systemtime_to_rfc3339(t: SystemTime) -> String {
    // 1996-12-19T16:39:57Z
    systemtime_to_offsetdatetime(t)
        .format(&Rfc3339)
        .unwrap_or_default()
}

// A buffer that implements "Write".
#[derive(Clone)]
pub(crate) struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    pub fn new() -> MemBuffer {
        MemBuffer(Cursor::new(Vec::new()))
    }

    pub fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_rfc3339() {
        assert!(systemtime_to_rfc3339(UNIX_EPOCH) == "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_httpdate() {
        let t = UNIX_EPOCH + Duration::from_secs(784111777);
        assert_eq!(systemtime_to_httpdate(t), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_dav_method() {
        let m = http::Method::from_bytes(b"PROPFIND").unwrap();
        assert_eq!(dav_method(&m).unwrap(), DavMethod::PROPFIND);
        let m = http::Method::from_bytes(b"BREW").unwrap();
        assert!(dav_method(&m).is_err());
        assert_eq!(dav_method_name(DavMethod::MKCOL), "MKCOL");
        assert!(DavMethod::WEBDAV_WRITE.contains(DavMethod::LOCK));
        assert!(!DavMethod::WEBDAV_WRITE.contains(DavMethod::GET));
    }
}
