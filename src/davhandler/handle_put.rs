use http::{header, Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::status_response;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::multierror::MultiError;
use crate::store::{AuthToken, ContentStream};
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_put(
        &self,
        req: &Request<()>,
        auth: &AuthToken,
        body: ContentStream<'static>,
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        if path.is_root() || path.is_collection() {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }
        let parent = path.parent();

        self.check_locks(req, &parent)?;
        self.check_locks(req, &path)?;
        let _guard = self.temp_lock(DavMethod::PUT, &path, true, Depth::Infinity)?;

        match self.stored(auth, &parent).await? {
            Some(pso) if !pso.is_folder => return Err(StatusCode::FORBIDDEN.into()),
            Some(_) => {}
            None if self.lazy_folder_creation_on_put => {
                debug!("PUT {}: creating parent {}", path, parent);
                self.store.create_folder(auth, &parent).await?;
            }
            None => {
                return MultiError::single(&parent, StatusCode::NOT_FOUND).into_response();
            }
        }

        let created = match self.stored(auth, &path).await? {
            None => {
                self.store.create_resource(auth, &path).await?;
                true
            }
            Some(so) if so.is_null_resource => {
                self.promote_null_resource(req, &path)?;
                true
            }
            Some(so) if so.is_folder => {
                return Err(DavError::NotAllowed(
                    self.allowed_methods(Some(&so), path.is_root()),
                ));
            }
            Some(_) => false,
        };

        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let encoding = req
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok());
        let len = self
            .store
            .set_resource_content(auth, &path, body, content_type, encoding)
            .await
            .map_err(|e| {
                error!("PUT {}: writing content failed: {}", path, e);
                e
            })?;
        debug!("PUT {}: {} bytes", path, len);

        let transmit = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.contains("Transmit"))
            .unwrap_or(false);
        let status = if created && !transmit {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        };
        Ok(status_response(status))
    }

    // A lock-null placeholder becomes a real object when the client that
    // holds its lock writes to it. The lock is released on the way. Once
    // the lock has expired or was released, anyone may take it over.
    pub(crate) fn promote_null_resource(&self, req: &Request<()>, path: &DavPath) -> DavResult<()> {
        let lo = match self.locks.get_locked_object_by_path(path.as_str()) {
            Some(lo) if lo.has_owners() => lo,
            _ => {
                debug!("{}: null resource is no longer locked", path);
                return Ok(());
            }
        };
        let tokens = davheaders::get_lock_ids_from_if_header(req.headers());
        let token = match tokens.first() {
            Some(token) => token,
            None => return Err(StatusCode::BAD_REQUEST.into()),
        };
        if lo.id() != Some(token.as_str()) {
            return Err(DavError::MultiStatus(MultiError::single(
                path,
                StatusCode::LOCKED,
            )));
        }
        for owner in lo.owners() {
            if !self.locks.unlock(token, owner) {
                error!("{}: releasing lock of {} failed", path, owner);
                return Err(StatusCode::INTERNAL_SERVER_ERROR.into());
            }
        }
        Ok(())
    }
}
