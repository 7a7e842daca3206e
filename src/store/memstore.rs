//! Simple in-memory store.
//!
//! This implementation has state, so if you create a new instance
//! in a handler(), it will be empty every time.
//!
//! The tree is kept in one ordered map from path to node, so the
//! entries of a folder are a range scan.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use futures_util::{stream, FutureExt, StreamExt};
use parking_lot::Mutex;

use crate::davpath::DavPath;
use crate::store::*;

#[derive(Debug, Clone)]
enum MemNode {
    Folder {
        created: SystemTime,
        modified: SystemTime,
    },
    Resource {
        data: Bytes,
        created: SystemTime,
        modified: SystemTime,
        null: bool,
    },
}

impl MemNode {
    fn is_folder(&self) -> bool {
        matches!(self, MemNode::Folder { .. })
    }

    fn stored_object(&self) -> StoredObject {
        match self {
            MemNode::Folder { created, modified } => {
                StoredObject::folder(Some(*created), Some(*modified))
            }
            MemNode::Resource {
                data,
                created,
                modified,
                null,
            } => StoredObject {
                is_null_resource: *null,
                ..StoredObject::resource(data.len() as u64, Some(*created), Some(*modified))
            },
        }
    }
}

/// Ephemeral in-memory store.
#[derive(Debug)]
pub struct MemStore {
    tree: Mutex<BTreeMap<String, MemNode>>,
    direct_move: bool,
}

// prefix that all entries of a folder share.
fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}

impl MemStore {
    /// Create a new, empty store.
    pub fn new() -> Arc<MemStore> {
        Arc::new(MemStore::build(false))
    }

    /// Like `new()`, but the store renames objects within a folder
    /// itself (see [`DavStore::supports_direct_move`]).
    pub fn with_direct_move() -> Arc<MemStore> {
        Arc::new(MemStore::build(true))
    }

    fn build(direct_move: bool) -> MemStore {
        let now = SystemTime::now();
        let mut tree = BTreeMap::new();
        tree.insert(
            "/".to_string(),
            MemNode::Folder {
                created: now,
                modified: now,
            },
        );
        MemStore {
            tree: Mutex::new(tree),
            direct_move,
        }
    }

    // insert a new node below an existing folder.
    fn insert(&self, path: &DavPath, node: MemNode) -> StoreResult<()> {
        let mut tree = self.tree.lock();
        if tree.contains_key(path.as_str()) {
            return Err(StoreError::ObjectAlreadyExists);
        }
        match tree.get(path.parent().as_str()) {
            Some(parent) if parent.is_folder() => {}
            Some(_) => return Err(StoreError::AccessDenied),
            None => return Err(StoreError::ObjectNotFound),
        }
        tree.insert(path.as_str().to_string(), node);
        Ok(())
    }

    fn new_resource(null: bool) -> MemNode {
        let now = SystemTime::now();
        MemNode::Resource {
            data: Bytes::new(),
            created: now,
            modified: now,
            null,
        }
    }
}

impl DavStore for MemStore {
    fn create_folder<'a>(&'a self, _auth: &'a AuthToken, path: &'a DavPath) -> StoreFuture<'a, ()> {
        async move {
            trace!("memstore: create_folder {}", path);
            let now = SystemTime::now();
            self.insert(
                path,
                MemNode::Folder {
                    created: now,
                    modified: now,
                },
            )
        }
        .boxed()
    }

    fn create_resource<'a>(
        &'a self,
        _auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ()> {
        async move {
            trace!("memstore: create_resource {}", path);
            self.insert(path, MemStore::new_resource(false))
        }
        .boxed()
    }

    fn create_null_resource<'a>(
        &'a self,
        _auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ()> {
        async move {
            trace!("memstore: create_null_resource {}", path);
            self.insert(path, MemStore::new_resource(true))
        }
        .boxed()
    }

    fn get_resource_content<'a>(
        &'a self,
        _auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ContentStream<'static>> {
        async move {
            trace!("memstore: get_resource_content {}", path);
            let tree = self.tree.lock();
            match tree.get(path.as_str()) {
                Some(MemNode::Resource { data, .. }) => {
                    let data = data.clone();
                    Ok(stream::once(async move { Ok(data) }).boxed())
                }
                Some(MemNode::Folder { .. }) => Err(StoreError::AccessDenied),
                None => Err(StoreError::ObjectNotFound),
            }
        }
        .boxed()
    }

    fn set_resource_content<'a>(
        &'a self,
        _auth: &'a AuthToken,
        path: &'a DavPath,
        mut content: ContentStream<'a>,
        _content_type: Option<&'a str>,
        _encoding: Option<&'a str>,
    ) -> StoreFuture<'a, u64> {
        async move {
            trace!("memstore: set_resource_content {}", path);
            // read everything before taking the lock.
            let mut buf = BytesMut::new();
            while let Some(chunk) = content.next().await {
                buf.extend_from_slice(&chunk?);
            }
            let mut tree = self.tree.lock();
            match tree.get_mut(path.as_str()) {
                Some(MemNode::Resource {
                    data,
                    modified,
                    null,
                    ..
                }) => {
                    *data = buf.freeze();
                    *modified = SystemTime::now();
                    *null = false;
                    Ok(data.len() as u64)
                }
                Some(MemNode::Folder { .. }) => Err(StoreError::AccessDenied),
                None => Err(StoreError::ObjectNotFound),
            }
        }
        .boxed()
    }

    fn get_children_names<'a>(
        &'a self,
        _auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Option<Vec<String>>> {
        async move {
            trace!("memstore: get_children_names {}", path);
            let tree = self.tree.lock();
            match tree.get(path.as_str()) {
                Some(node) if node.is_folder() => {}
                Some(_) => return Ok(None),
                None => return Err(StoreError::ObjectNotFound),
            }
            let prefix = child_prefix(path.as_str());
            let names = tree
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .filter_map(|(k, _)| {
                    let name = &k[prefix.len()..];
                    (!name.is_empty() && !name.contains('/')).then(|| name.to_string())
                })
                .collect();
            Ok(Some(names))
        }
        .boxed()
    }

    fn get_resource_length<'a>(
        &'a self,
        _auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, u64> {
        async move {
            let tree = self.tree.lock();
            match tree.get(path.as_str()) {
                Some(MemNode::Resource { data, .. }) => Ok(data.len() as u64),
                Some(MemNode::Folder { .. }) => Ok(0),
                None => Err(StoreError::ObjectNotFound),
            }
        }
        .boxed()
    }

    fn remove_object<'a>(&'a self, _auth: &'a AuthToken, path: &'a DavPath) -> StoreFuture<'a, ()> {
        async move {
            trace!("memstore: remove_object {}", path);
            if path.is_root() {
                return Err(StoreError::AccessDenied);
            }
            let mut tree = self.tree.lock();
            let prefix = child_prefix(path.as_str());
            match tree.get(path.as_str()) {
                Some(node) if node.is_folder() => {
                    let has_children = tree
                        .range(prefix.clone()..)
                        .next()
                        .map(|(k, _)| k.starts_with(&prefix))
                        .unwrap_or(false);
                    if has_children {
                        return Err(StoreError::General(format!("{}: folder not empty", path)));
                    }
                }
                Some(_) => {}
                None => return Err(StoreError::ObjectNotFound),
            }
            tree.remove(path.as_str());
            Ok(())
        }
        .boxed()
    }

    fn get_stored_object<'a>(
        &'a self,
        _auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Option<StoredObject>> {
        async move {
            let tree = self.tree.lock();
            Ok(tree.get(path.as_str()).map(|n| n.stored_object()))
        }
        .boxed()
    }

    fn supports_direct_move(&self) -> bool {
        self.direct_move
    }

    fn do_direct_move<'a>(
        &'a self,
        _auth: &'a AuthToken,
        from: &'a DavPath,
        to: &'a DavPath,
    ) -> StoreFuture<'a, ()> {
        async move {
            trace!("memstore: do_direct_move {} {}", from, to);
            if !self.direct_move {
                return Err(StoreError::NotImplemented);
            }
            let mut tree = self.tree.lock();
            if !tree.contains_key(from.as_str()) {
                return Err(StoreError::ObjectNotFound);
            }
            if tree.contains_key(to.as_str()) {
                return Err(StoreError::ObjectAlreadyExists);
            }
            let prefix = child_prefix(from.as_str());
            let moved: Vec<String> = tree
                .keys()
                .filter(|k| k.as_str() == from.as_str() || k.starts_with(&prefix))
                .cloned()
                .collect();
            for old in moved {
                if let Some(node) = tree.remove(&old) {
                    let new = format!("{}{}", to.as_str(), &old[from.as_str().len()..]);
                    tree.insert(new, node);
                }
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    fn auth() -> AuthToken {
        AuthToken("Basic dGVzdDp0ZXN0".to_string())
    }

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    async fn put(store: &MemStore, path: &str, data: &'static str) {
        let auth = auth();
        let path = p(path);
        store.create_resource(&auth, &path).await.unwrap();
        let content = stream::once(async move { Ok(Bytes::from(data)) }).boxed();
        store
            .set_resource_content(&auth, &path, content, None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tree() {
        let store = MemStore::new();
        let auth = auth();
        store.create_folder(&auth, &p("/a")).await.unwrap();
        put(&store, "/a/x", "hello").await;
        put(&store, "/a/y", "").await;
        store.create_folder(&auth, &p("/a/z")).await.unwrap();
        put(&store, "/b", "top").await;

        let names = store.get_children_names(&auth, &p("/a")).await.unwrap();
        assert_eq!(names, Some(vec!["x".to_string(), "y".to_string(), "z".to_string()]));
        let names = store.get_children_names(&auth, &p("/")).await.unwrap();
        assert_eq!(names, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(store.get_children_names(&auth, &p("/b")).await.unwrap(), None);

        assert_eq!(store.get_resource_length(&auth, &p("/a/x")).await.unwrap(), 5);
        let data: Vec<Bytes> = store
            .get_resource_content(&auth, &p("/a/x"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(data.concat(), b"hello");

        assert!(matches!(
            store.create_resource(&auth, &p("/nope/x")).await,
            Err(StoreError::ObjectNotFound)
        ));
        assert!(matches!(
            store.create_folder(&auth, &p("/a")).await,
            Err(StoreError::ObjectAlreadyExists)
        ));
        assert!(store.remove_object(&auth, &p("/a")).await.is_err());
    }

    #[tokio::test]
    async fn test_null_resource() {
        let store = MemStore::new();
        let auth = auth();
        store.create_null_resource(&auth, &p("/n")).await.unwrap();
        let so = store.get_stored_object(&auth, &p("/n")).await.unwrap().unwrap();
        assert!(so.is_null_resource);
        put_existing(&store, "/n").await;
        let so = store.get_stored_object(&auth, &p("/n")).await.unwrap().unwrap();
        assert!(so.is_resource());
    }

    async fn put_existing(store: &MemStore, path: &str) {
        let content = stream::once(async { Ok(Bytes::from_static(b"x")) }).boxed();
        store
            .set_resource_content(&auth(), &p(path), content, None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_direct_move() {
        let store = MemStore::with_direct_move();
        let auth = auth();
        store.create_folder(&auth, &p("/ds")).await.unwrap();
        store.create_folder(&auth, &p("/ds/a")).await.unwrap();
        put(&store, "/ds/a/f", "data").await;
        store
            .do_direct_move(&auth, &p("/ds/a"), &p("/ds/b"))
            .await
            .unwrap();
        assert!(store.get_stored_object(&auth, &p("/ds/a")).await.unwrap().is_none());
        assert_eq!(store.get_resource_length(&auth, &p("/ds/b/f")).await.unwrap(), 4);

        let plain = MemStore::new();
        assert!(!plain.supports_direct_move());
    }
}
