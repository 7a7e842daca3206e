use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::status_response;
use crate::davheaders::Depth;
use crate::errors::DavError;
use crate::store::AuthToken;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(
        &self,
        req: &Request<()>,
        auth: &AuthToken,
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let parent = path.parent();

        self.check_locks(req, &parent)?;
        self.check_locks(req, &path)?;
        let _guard = self.temp_lock(DavMethod::MKCOL, &path, true, Depth::Zero)?;

        match self.stored(auth, &parent).await? {
            Some(pso) if pso.is_folder => {}
            Some(pso) => {
                return Err(DavError::NotAllowed(
                    self.allowed_methods(Some(&pso), parent.is_root()),
                ))
            }
            None => return Err(StatusCode::CONFLICT.into()),
        }

        match self.stored(auth, &path).await? {
            None => {}
            Some(so) if so.is_null_resource => {
                // the lock holder turns the placeholder into a folder.
                self.promote_null_resource(req, &path)?;
                self.store.remove_object(auth, &path).await?;
            }
            Some(so) => {
                return Err(DavError::NotAllowed(
                    self.allowed_methods(Some(&so), path.is_root()),
                ))
            }
        }

        self.store.create_folder(auth, &path).await?;
        Ok(status_response(StatusCode::CREATED))
    }
}
