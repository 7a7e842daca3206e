//! Local filesystem store.
//!
//! Serves a directory. Folders are directories, resources are files.
//! Lock-null placeholders are empty files whose paths are remembered
//! in memory, so they do not survive a restart.
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_stream::stream;
use bytes::BytesMut;
use futures_util::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::davpath::DavPath;
use crate::store::*;

const READ_BUF_SIZE: usize = 16384;

/// Local filesystem store.
#[derive(Debug)]
pub struct LocalStore {
    basedir: PathBuf,
    public: bool,
    null_resources: Mutex<HashSet<String>>,
}

impl LocalStore {
    /// Create a new LocalStore, serving "base".
    ///
    /// If "public" is set to true, all files and directories created will be
    /// publically readable (mode 644/755), otherwise they will be private
    /// (mode 600/700). Umask still overrides this.
    pub fn new(base: impl Into<PathBuf>, public: bool) -> Arc<LocalStore> {
        Arc::new(LocalStore {
            basedir: base.into(),
            public,
            null_resources: Mutex::new(HashSet::new()),
        })
    }

    fn abs_path(&self, path: &DavPath) -> PathBuf {
        let mut pathbuf = self.basedir.clone();
        let rel = path.as_str().trim_start_matches('/');
        if !rel.is_empty() {
            pathbuf.push(rel);
        }
        pathbuf
    }

    fn is_null_resource(&self, path: &DavPath) -> bool {
        self.null_resources.lock().contains(path.as_str())
    }

    async fn create_file(&self, path: &DavPath) -> StoreResult<()> {
        let abs = self.abs_path(path);
        let mut opt = tokio::fs::OpenOptions::new();
        opt.write(true).create_new(true);
        #[cfg(unix)]
        opt.mode(if self.public { 0o644 } else { 0o600 });
        opt.open(abs).await?;
        Ok(())
    }
}

impl DavStore for LocalStore {
    fn create_folder<'a>(&'a self, _auth: &'a AuthToken, path: &'a DavPath) -> StoreFuture<'a, ()> {
        async move {
            trace!("localstore: create_folder {}", path);
            let abs = self.abs_path(path);
            #[allow(unused_mut)]
            let mut dir = tokio::fs::DirBuilder::new();
            #[cfg(unix)]
            dir.mode(if self.public { 0o755 } else { 0o700 });
            Ok(dir.create(abs).await?)
        }
        .boxed()
    }

    fn create_resource<'a>(
        &'a self,
        _auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ()> {
        async move {
            trace!("localstore: create_resource {}", path);
            self.create_file(path).await
        }
        .boxed()
    }

    fn create_null_resource<'a>(
        &'a self,
        _auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ()> {
        async move {
            trace!("localstore: create_null_resource {}", path);
            self.create_file(path).await?;
            self.null_resources.lock().insert(path.as_str().to_string());
            Ok(())
        }
        .boxed()
    }

    fn get_resource_content<'a>(
        &'a self,
        _auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, ContentStream<'static>> {
        async move {
            trace!("localstore: get_resource_content {}", path);
            let abs = self.abs_path(path);
            let mut file = tokio::fs::File::open(&abs).await?;
            if file.metadata().await?.is_dir() {
                return Err(StoreError::AccessDenied);
            }
            let strm = stream! {
                loop {
                    let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);
                    match file.read_buf(&mut buf).await {
                        Ok(0) => break,
                        Ok(_) => yield Ok(buf.freeze()),
                        Err(e) => {
                            error!("localstore: read {:?}: {}", abs, e);
                            yield Err(e);
                            break;
                        }
                    }
                }
            };
            Ok(strm.boxed())
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
            trace!("localstore: set_resource_content {}", path);
            let abs = self.abs_path(path);
            let mut opt = tokio::fs::OpenOptions::new();
            opt.write(true).truncate(true);
            let mut file = opt.open(abs).await?;
            let mut written = 0u64;
            while let Some(chunk) = content.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            self.null_resources.lock().remove(path.as_str());
            Ok(written)
        }
        .boxed()
    }

    fn get_children_names<'a>(
        &'a self,
        _auth: &'a AuthToken,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Option<Vec<String>>> {
        async move {
            trace!("localstore: get_children_names {}", path);
            let abs = self.abs_path(path);
            if !tokio::fs::metadata(&abs).await?.is_dir() {
                return Ok(None);
            }
            let mut read_dir = tokio::fs::read_dir(&abs).await?;
            let mut names = Vec::new();
            while let Some(entry) = read_dir.next_entry().await? {
                match entry.file_name().into_string() {
                    Ok(name) => names.push(name),
                    Err(name) => debug!("localstore: skipping non-utf8 name {:?}", name),
                }
            }
            names.sort();
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
            let meta = tokio::fs::metadata(self.abs_path(path)).await?;
            Ok(if meta.is_dir() { 0 } else { meta.len() })
        }
        .boxed()
    }

    fn remove_object<'a>(&'a self, _auth: &'a AuthToken, path: &'a DavPath) -> StoreFuture<'a, ()> {
        async move {
            trace!("localstore: remove_object {}", path);
            if path.is_root() {
                return Err(StoreError::AccessDenied);
            }
            let abs = self.abs_path(path);
            if tokio::fs::symlink_metadata(&abs).await?.is_dir() {
                tokio::fs::remove_dir(abs).await?;
            } else {
                tokio::fs::remove_file(abs).await?;
            }
            self.null_resources.lock().remove(path.as_str());
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
            let meta = match tokio::fs::metadata(self.abs_path(path)).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let created = meta.created().ok();
            let modified = meta.modified().ok();
            let so = if meta.is_dir() {
                StoredObject::folder(created, modified)
            } else {
                StoredObject {
                    is_null_resource: self.is_null_resource(path),
                    ..StoredObject::resource(meta.len(), created, modified)
                }
            };
            Ok(Some(so))
        }
        .boxed()
    }

    fn supports_direct_move(&self) -> bool {
        true
    }

    fn do_direct_move<'a>(
        &'a self,
        _auth: &'a AuthToken,
        from: &'a DavPath,
        to: &'a DavPath,
    ) -> StoreFuture<'a, ()> {
        async move {
            trace!("localstore: do_direct_move {} {}", from, to);
            if from.is_root() {
                return Err(StoreError::AccessDenied);
            }
            tokio::fs::rename(self.abs_path(from), self.abs_path(to)).await?;
            let mut nulls = self.null_resources.lock();
            if nulls.remove(from.as_str()) {
                nulls.insert(to.as_str().to_string());
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::{stream, TryStreamExt};

    fn auth() -> AuthToken {
        AuthToken("Basic dXNlcjpwdw==".to_string())
    }

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), false);
        let auth = auth();

        store.create_folder(&auth, &p("/docs")).await.unwrap();
        store.create_resource(&auth, &p("/docs/a%20b.txt")).await.unwrap();
        let content = stream::once(async { Ok(Bytes::from_static(b"contents")) }).boxed();
        let n = store
            .set_resource_content(&auth, &p("/docs/a%20b.txt"), content, Some("text/plain"), None)
            .await
            .unwrap();
        assert_eq!(n, 8);
        assert!(dir.path().join("docs").join("a b.txt").is_file());

        let names = store.get_children_names(&auth, &p("/docs")).await.unwrap();
        assert_eq!(names, Some(vec!["a b.txt".to_string()]));
        let chunks: Vec<Bytes> = store
            .get_resource_content(&auth, &p("/docs/a%20b.txt"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), b"contents");

        let so = store.get_stored_object(&auth, &p("/docs")).await.unwrap().unwrap();
        assert!(so.is_folder);
        assert!(store.get_stored_object(&auth, &p("/none")).await.unwrap().is_none());
        assert!(matches!(
            store.get_resource_length(&auth, &p("/none")).await,
            Err(StoreError::ObjectNotFound)
        ));
    }

    #[tokio::test]
    async fn test_null_resource_and_move() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), true);
        let auth = auth();

        store.create_null_resource(&auth, &p("/n")).await.unwrap();
        let so = store.get_stored_object(&auth, &p("/n")).await.unwrap().unwrap();
        assert!(so.is_null_resource);

        store.do_direct_move(&auth, &p("/n"), &p("/m")).await.unwrap();
        let so = store.get_stored_object(&auth, &p("/m")).await.unwrap().unwrap();
        assert!(so.is_null_resource);

        store.remove_object(&auth, &p("/m")).await.unwrap();
        assert!(store.get_stored_object(&auth, &p("/m")).await.unwrap().is_none());
    }
}
