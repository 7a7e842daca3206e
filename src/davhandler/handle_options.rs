use headers::HeaderMapExt;
use http::{Request, Response};

use crate::body::Body;
use crate::store::{AuthToken, StoredObject};
use crate::util::{dav_method_names, DavMethod, DavMethodSet};
use crate::DavResult;

// what can be done with a path, by the kind of object that lives there.
pub(crate) fn methods_for(so: Option<&StoredObject>, is_root: bool) -> DavMethodSet {
    match so {
        None => DavMethod::OPTIONS | DavMethod::MKCOL | DavMethod::PUT | DavMethod::LOCK,
        Some(so) if so.is_null_resource => {
            DavMethod::OPTIONS
                | DavMethod::MKCOL
                | DavMethod::PUT
                | DavMethod::PROPFIND
                | DavMethod::LOCK
                | DavMethod::UNLOCK
        }
        Some(so) => {
            let mut m = DavMethod::HEAD
                | DavMethod::GET
                | DavMethod::OPTIONS
                | DavMethod::PROPFIND
                | DavMethod::PROPPATCH
                | DavMethod::COPY
                | DavMethod::MOVE
                | DavMethod::DELETE
                | DavMethod::LOCK
                | DavMethod::UNLOCK;
            if !so.is_folder {
                m |= DavMethod::PUT;
            }
            if is_root {
                m.remove(DavMethod::MOVE | DavMethod::DELETE);
            }
            m
        }
    }
}

impl crate::DavHandler {
    // The methods that are possible on a path and that this handler
    // is configured to serve.
    pub(crate) fn allowed_methods(&self, so: Option<&StoredObject>, is_root: bool) -> DavMethodSet {
        let mut m = methods_for(so, is_root) & self.allow;
        if self.read_only {
            m.remove(DavMethod::WEBDAV_WRITE);
        }
        m
    }

    pub(crate) async fn handle_options(
        &self,
        req: &Request<()>,
        auth: &AuthToken,
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let path = self.path(req)?;
        let allow = if path.is_star() {
            self.allowed_methods(Some(&StoredObject::default()), false)
        } else {
            let so = self.stored(auth, &path).await?;
            self.allowed_methods(so.as_ref(), path.is_root())
        };

        let h = res.headers_mut();

        // We advertise class 2 even if LOCK is not in the allowed set,
        // since there might be LOCK/UNLOCK support elsewhere in the URL space.
        h.insert("DAV", http::HeaderValue::from_static("1, 2"));
        h.insert("MS-Author-Via", http::HeaderValue::from_static("DAV"));
        h.typed_insert(headers::ContentLength(0));
        h.insert("allow", dav_method_names(allow).join(", ").parse()?);

        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_methods_for() {
        let absent = methods_for(None, false);
        assert_eq!(dav_method_names(absent), vec!["PUT", "OPTIONS", "MKCOL", "LOCK"]);

        let null = StoredObject {
            is_null_resource: true,
            ..StoredObject::default()
        };
        let m = methods_for(Some(&null), false);
        assert!(m.contains(DavMethod::UNLOCK));
        assert!(!m.contains(DavMethod::GET));

        let folder = StoredObject::folder(None, None);
        assert!(!methods_for(Some(&folder), false).contains(DavMethod::PUT));
        assert!(!methods_for(Some(&folder), true).contains(DavMethod::DELETE));
        let file = StoredObject::resource(1, None, None);
        assert!(methods_for(Some(&file), false).contains(DavMethod::PUT));
    }
}
