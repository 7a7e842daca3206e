#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use http::{HeaderMap, Request, StatusCode};

use storedav::body::Body;
use storedav::davpath::DavPath;
use storedav::{
    AuthToken, ContentStream, DavHandler, DavStore, MemStore, StoreError, StoreFuture,
    StoredObject,
};

pub const AUTH: &str = "Basic dGVzdDp0ZXN0";

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// (href, status) pairs of a multistatus report. Propstat-level
    /// status lines are not included.
    pub fn multistatus(&self) -> Vec<(String, String)> {
        let tree = xmltree::Element::parse(self.body.as_bytes()).expect("multistatus xml");
        assert_eq!(tree.name, "multistatus");
        tree.children
            .iter()
            .filter_map(|n| n.as_element())
            .map(|resp| {
                let href = resp
                    .get_child("href")
                    .and_then(|h| h.get_text())
                    .map(|t| t.trim().to_string())
                    .unwrap_or_default();
                let status = resp
                    .get_child("status")
                    .and_then(|s| s.get_text())
                    .map(|t| t.trim().to_string())
                    .unwrap_or_default();
                (href, status)
            })
            .collect()
    }

    /// The bare token from the Lock-Token header.
    pub fn lock_token(&self) -> String {
        let value = self.header("lock-token").expect("lock-token header");
        value
            .trim_start_matches('<')
            .trim_end_matches('>')
            .trim_start_matches("opaquelocktoken:")
            .to_string()
    }
}

pub async fn send(
    dh: &DavHandler,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> Reply {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(Body::from(body.to_string())).unwrap();
    let res = dh.handle(req).await;
    let (parts, body) = res.into_parts();
    let body = body.into_bytes().await.unwrap();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

/// Request with credentials.
pub async fn req(
    dh: &DavHandler,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> Reply {
    let mut all = vec![("authorization", AUTH)];
    all.extend_from_slice(headers);
    send(dh, method, path, &all, body).await
}

/// A memory store that fails to read the content of one path or to
/// remove another, and counts the calls that move content around.
#[derive(Debug)]
pub struct TestStore {
    pub inner: Arc<MemStore>,
    fail_read: Option<String>,
    fail_remove: Option<String>,
    pub content_reads: AtomicUsize,
    pub content_writes: AtomicUsize,
    pub direct_moves: AtomicUsize,
}

impl TestStore {
    pub fn new(inner: Arc<MemStore>, fail_read: Option<&str>) -> Arc<TestStore> {
        Arc::new(TestStore::build(inner, fail_read, None))
    }

    pub fn failing_remove(inner: Arc<MemStore>, path: &str) -> Arc<TestStore> {
        Arc::new(TestStore::build(inner, None, Some(path)))
    }

    fn build(inner: Arc<MemStore>, fail_read: Option<&str>, fail_remove: Option<&str>) -> TestStore {
        TestStore {
            inner,
            fail_read: fail_read.map(|s| s.to_string()),
            fail_remove: fail_remove.map(|s| s.to_string()),
            content_reads: AtomicUsize::new(0),
            content_writes: AtomicUsize::new(0),
            direct_moves: AtomicUsize::new(0),
        }
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.content_reads.load(Ordering::SeqCst),
            self.content_writes.load(Ordering::SeqCst),
            self.direct_moves.load(Ordering::SeqCst),
        )
    }
}

impl DavStore for TestStore {
    fn create_folder<'a>(&'a self, auth: &'a AuthToken, path: &'a DavPath) -> StoreFuture<'a, ()> {
        self.inner.create_folder(auth, path)
    }

    fn create_resource<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ()> {
        self.inner.create_resource(auth, path)
    }

    fn create_null_resource<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ()> {
        self.inner.create_null_resource(auth, path)
    }

    fn get_resource_content<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ContentStream<'static>> {
        self.content_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_read.as_deref() == Some(path.as_str()) {
            return Box::pin(async move {
                Err::<ContentStream<'static>, _>(StoreError::General("injected failure".into()))
            });
        }
        self.inner.get_resource_content(auth, path)
    }

    fn set_resource_content<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
        content: ContentStream<'a>,
        content_type: Option<&'a str>,
        encoding: Option<&'a str>,
    ) -> StoreFuture<'a, u64> {
        self.content_writes.fetch_add(1, Ordering::SeqCst);
        self.inner
            .set_resource_content(auth, path, content, content_type, encoding)
    }

    fn get_children_names<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Option<Vec<String>>> {
        self.inner.get_children_names(auth, path)
    }

    fn get_resource_length<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, u64> {
        self.inner.get_resource_length(auth, path)
    }

    fn remove_object<'a>(&'a self, auth: &'a AuthToken, path: &'a DavPath) -> StoreFuture<'a, ()> {
        if self.fail_remove.as_deref() == Some(path.as_str()) {
            return Box::pin(async move { Err::<(), _>(StoreError::AccessDenied) });
        }
        self.inner.remove_object(auth, path)
    }

    fn get_stored_object<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Option<StoredObject>> {
        self.inner.get_stored_object(auth, path)
    }

    fn supports_direct_move(&self) -> bool {
        self.inner.supports_direct_move()
    }

    fn do_direct_move<'a>(
        &'a self,
        auth: &'a AuthToken,
        from: &'a DavPath,
        to: &'a DavPath,
    ) -> StoreFuture<'a, ()> {
        self.direct_moves.fetch_add(1, Ordering::SeqCst);
        self.inner.do_direct_move(auth, from, to)
    }
}

/// A store that refuses every set of credentials.
#[derive(Debug)]
pub struct LockedOutStore(pub Arc<MemStore>);

impl DavStore for LockedOutStore {
    fn check_authentication<'a>(&'a self, _auth: &'a AuthToken) -> StoreFuture<'a, ()> {
        Box::pin(async move { Err::<(), _>(StoreError::Unauthenticated) })
    }

    fn create_folder<'a>(&'a self, auth: &'a AuthToken, path: &'a DavPath) -> StoreFuture<'a, ()> {
        self.0.create_folder(auth, path)
    }

    fn create_resource<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ()> {
        self.0.create_resource(auth, path)
    }

    fn get_resource_content<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ContentStream<'static>> {
        self.0.get_resource_content(auth, path)
    }

    fn set_resource_content<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
        content: ContentStream<'a>,
        content_type: Option<&'a str>,
        encoding: Option<&'a str>,
    ) -> StoreFuture<'a, u64> {
        self.0
            .set_resource_content(auth, path, content, content_type, encoding)
    }

    fn get_children_names<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Option<Vec<String>>> {
        self.0.get_children_names(auth, path)
    }

    fn get_resource_length<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, u64> {
        self.0.get_resource_length(auth, path)
    }

    fn remove_object<'a>(&'a self, auth: &'a AuthToken, path: &'a DavPath) -> StoreFuture<'a, ()> {
        self.0.remove_object(auth, path)
    }

    fn get_stored_object<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Option<StoredObject>> {
        self.0.get_stored_object(auth, path)
    }
}
