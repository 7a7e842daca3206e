//! Contains the resource store contract, and the bundled stores.
//!
//! The handler does not touch storage itself. Everything goes through
//! a [`DavStore`]: one call per primitive operation, each taking the
//! authorization token of the request and the canonical path.
//!
//! Every method returns a boxed future, so the trait can be used as
//! `Arc<dyn DavStore>`.
use std::fmt::Debug;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::FutureExt;
use http::StatusCode;

use crate::davpath::DavPath;

#[cfg(any(docsrs, feature = "localstore"))]
#[cfg_attr(docsrs, doc(cfg(feature = "localstore")))]
pub mod localstore;
#[cfg(any(docsrs, feature = "memstore"))]
#[cfg_attr(docsrs, doc(cfg(feature = "memstore")))]
pub mod memstore;

/// Errors a store can return.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not authenticated")]
    Unauthenticated,
    #[error("access denied")]
    AccessDenied,
    #[error("object not found")]
    ObjectNotFound,
    #[error("object already exists")]
    ObjectAlreadyExists,
    #[error("not implemented")]
    NotImplemented,
    #[error("I/O error: {0}")]
    Io(io::Error),
    #[error("{0}")]
    General(String),
}

impl StoreError {
    /// HTTP status for this error when it ends a request.
    pub fn statuscode(&self) -> StatusCode {
        match self {
            StoreError::Unauthenticated => StatusCode::UNAUTHORIZED,
            StoreError::AccessDenied => StatusCode::FORBIDDEN,
            StoreError::ObjectNotFound => StatusCode::NOT_FOUND,
            StoreError::ObjectAlreadyExists => StatusCode::CONFLICT,
            StoreError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            StoreError::Io(_) | StoreError::General(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => StoreError::ObjectNotFound,
            io::ErrorKind::PermissionDenied => StoreError::AccessDenied,
            io::ErrorKind::AlreadyExists => StoreError::ObjectAlreadyExists,
            _ => StoreError::Io(e),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Future returned by almost all of the DavStore methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Resource content, as a stream of chunks.
pub type ContentStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// The opaque credentials of a request (the value of the
/// `Authorization` header). Passed to every store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken(pub String);

impl AuthToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What the store knows about one path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredObject {
    pub is_folder: bool,
    /// Placeholder created by LOCK on a path that did not exist.
    pub is_null_resource: bool,
    pub last_modified: Option<SystemTime>,
    pub creation_date: Option<SystemTime>,
    pub resource_length: u64,
}

impl StoredObject {
    pub fn folder(created: Option<SystemTime>, modified: Option<SystemTime>) -> StoredObject {
        StoredObject {
            is_folder: true,
            creation_date: created,
            last_modified: modified,
            ..StoredObject::default()
        }
    }

    pub fn resource(
        length: u64,
        created: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> StoredObject {
        StoredObject {
            resource_length: length,
            creation_date: created,
            last_modified: modified,
            ..StoredObject::default()
        }
    }

    /// A regular resource: not a folder, not a placeholder.
    pub fn is_resource(&self) -> bool {
        !self.is_folder && !self.is_null_resource
    }
}

/// The store contract.
///
/// `begin`, `commit` and `rollback` bracket every request, so a store
/// can map them onto a transaction. The default implementations do
/// nothing.
pub trait DavStore: Debug + Send + Sync {
    fn begin<'a>(&'a self) -> StoreFuture<'a, ()> {
        async move { Ok(()) }.boxed()
    }

    fn check_authentication<'a>(&'a self, _auth: &'a AuthToken) -> StoreFuture<'a, ()> {
        async move { Ok(()) }.boxed()
    }

    fn commit<'a>(&'a self, _auth: &'a AuthToken) -> StoreFuture<'a, ()> {
        async move { Ok(()) }.boxed()
    }

    fn rollback<'a>(&'a self, _auth: &'a AuthToken) -> StoreFuture<'a, ()> {
        async move { Ok(()) }.boxed()
    }

    fn create_folder<'a>(&'a self, auth: &'a AuthToken, path: &'a DavPath) -> StoreFuture<'a, ()>;

    /// Create an empty resource.
    fn create_resource<'a>(&'a self, auth: &'a AuthToken, path: &'a DavPath)
        -> StoreFuture<'a, ()>;

    /// Create a lock-null placeholder. Writing content to it turns it
    /// into a regular resource.
    fn create_null_resource<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ()> {
        self.create_resource(auth, path)
    }

    fn get_resource_content<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ContentStream<'static>>;

    /// Replace the content of a resource. Returns the number of bytes
    /// written.
    fn set_resource_content<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
        content: ContentStream<'a>,
        content_type: Option<&'a str>,
        encoding: Option<&'a str>,
    ) -> StoreFuture<'a, u64>;

    /// Names of the entries of a folder, ordered. `None` if the path is
    /// not a folder.
    fn get_children_names<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Option<Vec<String>>>;

    fn get_resource_length<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, u64>;

    /// Remove a resource, a placeholder or an empty folder.
    fn remove_object<'a>(&'a self, auth: &'a AuthToken, path: &'a DavPath) -> StoreFuture<'a, ()>;

    /// `None` if nothing exists at the path.
    fn get_stored_object<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Option<StoredObject>>;

    /// Can the store rename an object within one folder by itself.
    fn supports_direct_move(&self) -> bool {
        false
    }

    fn do_direct_move<'a>(
        &'a self,
        _auth: &'a AuthToken,
        _from: &'a DavPath,
        _to: &'a DavPath,
    ) -> StoreFuture<'a, ()> {
        async move { Err(StoreError::NotImplemented) }.boxed()
    }
}
