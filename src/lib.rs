//! ## Async WebDAV handler over a pluggable resource store
//!
//! [`Webdav`] (RFC4918) is defined as
//! HTTP (GET/HEAD/PUT/DELETE) plus a bunch of extension methods (PROPFIND, etc).
//! These extension methods are used to manage collections (like unix directories),
//! get information on collections (like unix `ls` or `readdir`), rename and
//! copy items, lock/unlock items, etc.
//!
//! A `handler` is a piece of code that takes a `http::Request`, processes it in some
//! way, and then generates a `http::Response`. This library is a `handler` that maps
//! the HTTP/Webdav protocol onto a [store][DavStore]: a small set of primitive
//! operations (create folder, create resource, read and write content, list
//! children, remove, stat, and optionally rename). Included are a store for the
//! local filesystem ([`LocalStore`]) and an in-memory store ([`MemStore`]).
//!
//! ## Locking.
//!
//! The handler owns a hierarchical lock manager, [`ResourceLocks`]. It keeps
//! two trees of locks that mirror the resource namespace:
//!
//! - *persistent* locks, created with LOCK and removed with UNLOCK or by
//!   their timeout. Write methods on a locked path must present the lock
//!   token in the `If:` header, or get a `423 Locked` multi-status report.
//! - *temporary* locks, which every method handler takes around its own
//!   critical section so that concurrent requests on overlapping paths are
//!   serialized. They are released when the handler returns, on every
//!   exit path.
//!
//! ## Partial failures.
//!
//! COPY, MOVE and DELETE walk a tree. A failure on one child does not stop
//! the walk: it is recorded and reported in a `207 Multi-Status` response.
//! A MOVE that is carried out as copy-then-delete only deletes the source
//! if every child was copied.
//!
//! ## Example.
//!
//! Example server using [hyper] that serves an in-memory store. A runnable
//! version with more options lives in `demos/server.rs`.
//!
//! ```no_run
//! use std::convert::Infallible;
//! use storedav::{DavHandler, Store};
//!
//! #[tokio::main]
//! async fn main() {
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!
//!     let dav_server = DavHandler::builder(Store::Mem)
//!         .realm("storedav")
//!         .build();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav_server = dav_server.clone();
//!         async move {
//!             let func = move |req| {
//!                 let dav_server = dav_server.clone();
//!                 async move {
//!                     Ok::<_, Infallible>(dav_server.handle(req).await)
//!                 }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     let _ = hyper::Server::bind(&addr)
//!         .serve(make_service)
//!         .await
//!         .map_err(|e| eprintln!("server error: {}", e));
//! }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918
//! [hyper]: https://hyper.rs/

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod davhandler;
mod davheaders;
mod errors;
mod multierror;
mod util;

pub mod body;
pub mod davpath;
pub mod lock;
pub mod store;

pub(crate) use crate::errors::DavResult;

pub use crate::davhandler::{DavBuilder, DavHandler, Store};
pub use crate::davheaders::Depth;
pub use crate::lock::{LockType, LockedObject, ResourceLocks, TempLockGuard};
pub use crate::multierror::MultiError;
#[cfg(any(docsrs, feature = "localstore"))]
pub use crate::store::localstore::LocalStore;
#[cfg(any(docsrs, feature = "memstore"))]
pub use crate::store::memstore::MemStore;
pub use crate::store::{
    AuthToken, ContentStream, DavStore, StoreError, StoreFuture, StoreResult, StoredObject,
};
pub use crate::util::{DavMethod, DavMethodSet};
