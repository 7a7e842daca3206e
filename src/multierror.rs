//
// Collects per-path failures of a recursive operation and renders them
// as a 207 Multi-Status report.
//
use std::collections::BTreeMap;

use http::{Response, StatusCode};
use xml::common::XmlVersion;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as XmlWEvent};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::util::MemBuffer;
use crate::DavResult;

/// Path → status map of the parts of an operation that failed.
#[derive(Debug, Default, Clone)]
pub struct MultiError {
    // keyed by decoded path, value is (href, status).
    errors: BTreeMap<String, (String, StatusCode)>,
}

impl MultiError {
    pub fn new() -> MultiError {
        MultiError::default()
    }

    /// Single-entry report, as sent for a lock conflict.
    pub fn single(path: &DavPath, status: StatusCode) -> MultiError {
        let mut errors = MultiError::new();
        errors.add(path, status);
        errors
    }

    pub fn add(&mut self, path: &DavPath, status: StatusCode) {
        debug!("multi-status: {} {}", path, status);
        self.errors.insert(
            path.as_str().to_string(),
            (path.as_url_string_with_prefix(), status),
        );
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Status recorded for a (decoded) path.
    pub fn get(&self, path: &str) -> Option<StatusCode> {
        self.errors.get(path).map(|(_, status)| *status)
    }

    /// Iterate over `(path, status)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, StatusCode)> {
        self.errors.iter().map(|(p, (_, s))| (p.as_str(), *s))
    }

    /// The XML body of the report.
    pub(crate) fn to_xml(&self) -> DavResult<bytes::Bytes> {
        let mut xw = EventWriter::new_with_config(
            MemBuffer::new(),
            EmitterConfig::new().perform_indent(true),
        );
        xw.write(XmlWEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("utf-8"),
            standalone: None,
        })?;
        xw.write(XmlWEvent::start_element("D:multistatus").ns("D", "DAV:"))?;
        for (href, status) in self.errors.values() {
            xw.write(XmlWEvent::start_element("D:response"))?;
            xw.write(XmlWEvent::start_element("D:href"))?;
            xw.write(XmlWEvent::characters(href))?;
            xw.write(XmlWEvent::end_element())?;
            xw.write(XmlWEvent::start_element("D:status"))?;
            xw.write(XmlWEvent::characters(&format!("HTTP/1.1 {}", status)))?;
            xw.write(XmlWEvent::end_element())?;
            xw.write(XmlWEvent::end_element())?;
        }
        xw.write(XmlWEvent::end_element())?;
        Ok(xw.into_inner().take())
    }

    /// The full 207 response.
    pub(crate) fn into_response(self) -> DavResult<Response<Body>> {
        let body = self.to_xml()?;
        let mut res = Response::new(Body::from(body));
        *res.status_mut() = StatusCode::MULTI_STATUS;
        res.headers_mut().insert(
            "content-type",
            http::HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        Ok(res)
    }
}
