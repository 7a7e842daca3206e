use futures_util::future::{BoxFuture, FutureExt};
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::status_response;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::multierror::MultiError;
use crate::store::AuthToken;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    // Delete the children of a folder, depth first, then the folder
    // itself. A child that cannot be removed is recorded in `errors` and
    // the walk goes on. Removing the folder is attempted in any case; if
    // that fails after a child failed, it is one more entry in `errors`.
    fn delete_folder<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: &'a DavPath,
        errors: &'a mut MultiError,
    ) -> BoxFuture<'a, DavResult<()>> {
        async move {
            let names = self
                .store
                .get_children_names(auth, path)
                .await?
                .unwrap_or_default();
            for name in names {
                let child = path.join(&name);
                if let Err(e) = self.delete_resource(auth, &child, errors).await {
                    debug!("delete {}: {}", child, e);
                    errors.add(&child, e.statuscode());
                }
            }
            match self.store.remove_object(auth, path).await {
                Ok(()) => {
                    self.locks.remove_locks(path.as_str());
                    Ok(())
                }
                Err(e) if !errors.is_empty() => {
                    errors.add(path, e.statuscode());
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    // Remove whatever is at `path`. Failures below `path` end up in
    // `errors`, a failure on `path` itself is returned. Locks on what
    // was removed go with it.
    pub(crate) async fn delete_resource(
        &self,
        auth: &AuthToken,
        path: &DavPath,
        errors: &mut MultiError,
    ) -> DavResult<()> {
        let so = match self.stored(auth, path).await? {
            Some(so) => so,
            None => return Err(StatusCode::NOT_FOUND.into()),
        };
        if !so.is_folder {
            trace!("delete {}", path);
            self.store.remove_object(auth, path).await?;
            self.locks.remove_locks(path.as_str());
            return Ok(());
        }
        let mut dir = path.clone();
        dir.add_slash();
        self.delete_folder(auth, &dir, errors).await
    }

    pub(crate) async fn handle_delete(
        &self,
        req: &Request<()>,
        auth: &AuthToken,
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        if path.is_root() {
            return Err(StatusCode::FORBIDDEN.into());
        }

        self.check_locks(req, &path.parent())?;
        self.check_locks(req, &path)?;
        let _guard = self.temp_lock(DavMethod::DELETE, &path, true, Depth::Infinity)?;

        let mut errors = MultiError::new();
        self.delete_resource(auth, &path, &mut errors).await?;
        if !errors.is_empty() {
            return errors.into_response();
        }
        Ok(status_response(StatusCode::NO_CONTENT))
    }
}
