use futures_util::future::{BoxFuture, FutureExt};
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::status_response;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::lock::TempLockGuard;
use crate::multierror::MultiError;
use crate::store::AuthToken;
use crate::util::{dav_method_name, DavMethod};
use crate::DavResult;

impl crate::DavHandler {
    // Copy `src` to `dst`. With a folder, `depth` decides how far down
    // the walk goes. A child that fails is recorded under its
    // destination path and the remaining children are still copied.
    fn copy_tree<'a>(
        &'a self,
        auth: &'a AuthToken,
        src: &'a DavPath,
        dst: &'a DavPath,
        depth: Depth,
        errors: &'a mut MultiError,
    ) -> BoxFuture<'a, DavResult<()>> {
        async move {
            let so = match self.stored(auth, src).await? {
                Some(so) => so,
                None => return Err(StatusCode::NOT_FOUND.into()),
            };
            if so.is_null_resource {
                trace!("copy {}: skipping null resource", src);
                return Ok(());
            }

            if !so.is_folder {
                trace!("copy {} -> {}", src, dst);
                self.store.create_resource(auth, dst).await?;
                let content = self.store.get_resource_content(auth, src).await?;
                self.store
                    .set_resource_content(auth, dst, content, None, None)
                    .await?;
                return Ok(());
            }

            trace!("copy folder {} -> {}", src, dst);
            self.store.create_folder(auth, dst).await?;
            let child_depth = match depth {
                Depth::Zero => return Ok(()),
                Depth::One => Depth::Zero,
                Depth::Infinity => Depth::Infinity,
            };
            let names = self
                .store
                .get_children_names(auth, src)
                .await?
                .unwrap_or_default();
            for name in names {
                let nsrc = src.join(&name);
                let ndst = dst.join(&name);
                if let Err(e) = self.copy_tree(auth, &nsrc, &ndst, child_depth, errors).await {
                    debug!("copy {} -> {}: {}", nsrc, ndst, e);
                    errors.add(&ndst, e.statuscode());
                }
            }
            Ok(())
        }
        .boxed()
    }

    // Everything COPY and MOVE check about the destination before any
    // content moves. Returns the guard on the destination and whether
    // the destination existed. If clearing an existing destination
    // partially failed, `errors` is not empty on return.
    async fn prepare_target(
        &self,
        req: &Request<()>,
        auth: &AuthToken,
        method: DavMethod,
        src: &DavPath,
        dst: &DavPath,
        errors: &mut MultiError,
    ) -> DavResult<(TempLockGuard, bool)> {
        if src.as_str() == dst.as_str() {
            return Err(StatusCode::FORBIDDEN.into());
        }
        if src.is_ancestor_of(dst) || dst.is_ancestor_of(src) {
            debug!("{} and {} overlap", src, dst);
            return Err(StatusCode::FORBIDDEN.into());
        }

        self.check_locks(req, &dst.parent())?;
        self.check_locks(req, dst)?;

        let overwrite = match davheaders::get_overwrite(req.headers()) {
            Some(o) => o,
            None => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let guard = self.temp_lock(method, dst, true, Depth::Infinity)?;

        let so = match self.stored(auth, src).await? {
            Some(so) => so,
            None => return Err(StatusCode::NOT_FOUND.into()),
        };
        if so.is_null_resource {
            return Err(DavError::NotAllowed(self.allowed_methods(Some(&so), false)));
        }

        match self.stored(auth, &dst.parent()).await? {
            Some(pso) if pso.is_folder => {}
            _ => return Err(StatusCode::CONFLICT.into()),
        }

        let existed = match self.stored(auth, dst).await? {
            None => false,
            Some(_) if !overwrite => return Err(StatusCode::PRECONDITION_FAILED.into()),
            Some(_) => {
                debug!("{} {}: overwriting {}", dav_method_name(method), src, dst);
                self.delete_resource(auth, dst, errors).await?;
                true
            }
        };
        Ok((guard, existed))
    }

    pub(crate) async fn handle_copy(
        &self,
        req: &Request<()>,
        auth: &AuthToken,
    ) -> DavResult<Response<Body>> {
        let src = self.path(req)?;
        let dst = self.destination(req)?;
        let depth = davheaders::get_depth(req.headers());

        let _src_guard = self.temp_lock(DavMethod::COPY, &src, false, Depth::Infinity)?;

        let mut errors = MultiError::new();
        let (_dst_guard, existed) = self
            .prepare_target(req, auth, DavMethod::COPY, &src, &dst, &mut errors)
            .await?;
        if !errors.is_empty() {
            return errors.into_response();
        }

        self.copy_tree(auth, &src, &dst, depth, &mut errors).await?;
        if !errors.is_empty() {
            return errors.into_response();
        }
        Ok(status_response(created_or_replaced(existed)))
    }

    pub(crate) async fn handle_move(
        &self,
        req: &Request<()>,
        auth: &AuthToken,
    ) -> DavResult<Response<Body>> {
        let src = self.path(req)?;
        if src.is_root() {
            return Err(StatusCode::FORBIDDEN.into());
        }
        let dst = self.destination(req)?;

        self.check_locks(req, &src.parent())?;
        self.check_locks(req, &src)?;
        let _src_guard = self.temp_lock(DavMethod::MOVE, &src, true, Depth::Infinity)?;

        let mut errors = MultiError::new();
        let (_dst_guard, existed) = self
            .prepare_target(req, auth, DavMethod::MOVE, &src, &dst, &mut errors)
            .await?;
        if !errors.is_empty() {
            return errors.into_response();
        }

        // a rename within one folder can be left to the store.
        if self.store.supports_direct_move() && src.parent().as_str() == dst.parent().as_str() {
            debug!("MOVE {} -> {}: direct", src, dst);
            self.store.do_direct_move(auth, &src, &dst).await?;
            self.locks.remove_locks(src.as_str());
            return Ok(status_response(created_or_replaced(existed)));
        }

        self.copy_tree(auth, &src, &dst, Depth::Infinity, &mut errors)
            .await?;
        if !errors.is_empty() {
            // the source stays, nothing that failed to copy is lost.
            debug!("MOVE {} -> {}: copy incomplete, keeping source", src, dst);
            return errors.into_response();
        }

        self.delete_resource(auth, &src, &mut errors).await?;
        if !errors.is_empty() {
            return errors.into_response();
        }
        Ok(status_response(created_or_replaced(existed)))
    }
}

fn created_or_replaced(existed: bool) -> StatusCode {
    if existed {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::CREATED
    }
}
