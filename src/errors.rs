use std::io;

use http::StatusCode;

use crate::lock::LockError;
use crate::multierror::MultiError;
use crate::store::StoreError;
use crate::util::DavMethodSet;

/// Errors that end a request.
///
/// Every variant maps to a HTTP status code; the dispatcher turns the
/// error into the response.
#[derive(Debug, thiserror::Error)]
pub(crate) enum DavError {
    #[error("status {0}")]
    Status(StatusCode),
    #[error("status {0} (closing connection)")]
    StatusClose(StatusCode),
    #[error("method not allowed, allowed: {0:?}")]
    NotAllowed(DavMethodSet),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("XML parse error")]
    XmlParse,
    #[error("XML write error: {0}")]
    XmlWrite(#[from] xml::writer::Error),
    #[error("invalid header value")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    #[error("invalid path")]
    InvalidPath,
    #[error("unknown DAV method")]
    UnknownDavMethod,
    #[error("authorization required")]
    Unauthorized,
    #[error("multi-status report with {} entries", .0.len())]
    MultiStatus(MultiError),
    #[error(transparent)]
    Lock(#[from] LockError),
}

pub(crate) type DavResult<T> = Result<T, DavError>;

impl From<StatusCode> for DavError {
    fn from(status: StatusCode) -> Self {
        DavError::Status(status)
    }
}

impl DavError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::Status(s) | DavError::StatusClose(s) => *s,
            DavError::NotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            DavError::Store(e) => e.statuscode(),
            DavError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::XmlParse => StatusCode::BAD_REQUEST,
            DavError::XmlWrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::InvalidHeaderValue(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::Unauthorized => StatusCode::UNAUTHORIZED,
            DavError::MultiStatus(_) => StatusCode::MULTI_STATUS,
            DavError::Lock(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        matches!(self, DavError::StatusClose(_) | DavError::Io(_))
    }
}
