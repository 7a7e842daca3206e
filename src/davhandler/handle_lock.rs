use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use headers::HeaderMapExt;
use http::{header, Request, Response, StatusCode};
use uuid::Uuid;
use xml::common::XmlVersion;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as XmlWEvent};
use xmltree::Element;

use crate::body::Body;
use crate::davhandler::status_response;
use crate::davheaders::{self, Depth, LockToken};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::lock::LockedObject;
use crate::store::AuthToken;
use crate::util::{DavMethod, MemBuffer};
use crate::DavResult;

// what a LOCK request asks for.
struct LockRequest {
    exclusive: bool,
    owner: String,
}

// <D:lockinfo> body of a LOCK request.
fn parse_lockinfo(xmldata: &[u8]) -> DavResult<LockRequest> {
    let tree = Element::parse(xmldata).map_err(|_| DavError::XmlParse)?;
    if tree.name != "lockinfo" {
        return Err(DavError::XmlParse);
    }

    let scope = tree.get_child("lockscope").ok_or(DavError::XmlParse)?;
    let exclusive = if scope.get_child("exclusive").is_some() {
        true
    } else if scope.get_child("shared").is_some() {
        false
    } else {
        return Err(DavError::XmlParse);
    };

    // only write locks exist.
    if let Some(locktype) = tree.get_child("locktype") {
        if locktype.get_child("write").is_none() {
            return Err(DavError::XmlParse);
        }
    }

    let owner = tree
        .get_child("owner")
        .and_then(|o| {
            o.get_child("href")
                .and_then(|h| h.get_text())
                .or_else(|| o.get_text())
        })
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .unwrap_or_else(|| format!("owner-{}", Uuid::new_v4()));

    Ok(LockRequest { exclusive, owner })
}

fn write_text<W: Write>(xw: &mut EventWriter<W>, name: &str, text: &str) -> DavResult<()> {
    xw.write(XmlWEvent::start_element(name))?;
    xw.write(XmlWEvent::characters(text))?;
    xw.write(XmlWEvent::end_element())?;
    Ok(())
}

/// One `<D:activelock>` element, for `owner`'s share of `lo`.
///
/// `base` is any path under the handler's prefix; the lock root href is
/// built from it.
pub(crate) fn write_activelock<W: Write>(
    xw: &mut EventWriter<W>,
    lo: &LockedObject,
    owner: &str,
    base: &DavPath,
) -> DavResult<()> {
    let id = match lo.id() {
        Some(id) => id,
        None => return Ok(()),
    };
    xw.write(XmlWEvent::start_element("D:activelock"))?;

    xw.write(XmlWEvent::start_element("D:locktype"))?;
    xw.write(XmlWEvent::start_element("D:write"))?;
    xw.write(XmlWEvent::end_element())?;
    xw.write(XmlWEvent::end_element())?;

    xw.write(XmlWEvent::start_element("D:lockscope"))?;
    if lo.is_exclusive() {
        xw.write(XmlWEvent::start_element("D:exclusive"))?;
    } else {
        xw.write(XmlWEvent::start_element("D:shared"))?;
    }
    xw.write(XmlWEvent::end_element())?;
    xw.write(XmlWEvent::end_element())?;

    write_text(xw, "D:depth", &lo.depth().to_string())?;
    write_text(xw, "D:owner", owner)?;
    write_text(xw, "D:timeout", &format!("Second-{}", lo.remaining().as_secs()))?;

    xw.write(XmlWEvent::start_element("D:locktoken"))?;
    write_text(xw, "D:href", &format!("opaquelocktoken:{}", id))?;
    xw.write(XmlWEvent::end_element())?;

    let root = base
        .with_path(lo.path())
        .map(|p| p.as_url_string_with_prefix())
        .unwrap_or_else(|| lo.path().to_string());
    xw.write(XmlWEvent::start_element("D:lockroot"))?;
    write_text(xw, "D:href", &root)?;
    xw.write(XmlWEvent::end_element())?;

    xw.write(XmlWEvent::end_element())?;
    Ok(())
}

// <D:prop><D:lockdiscovery> body of a LOCK response.
fn lock_response(
    lo: &LockedObject,
    owner: &str,
    path: &DavPath,
    status: StatusCode,
) -> DavResult<Response<Body>> {
    let mut xw = EventWriter::new_with_config(
        MemBuffer::new(),
        EmitterConfig::new().perform_indent(true),
    );
    xw.write(XmlWEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    xw.write(XmlWEvent::start_element("D:prop").ns("D", "DAV:"))?;
    xw.write(XmlWEvent::start_element("D:lockdiscovery"))?;
    write_activelock(&mut xw, lo, owner, path)?;
    xw.write(XmlWEvent::end_element())?;
    xw.write(XmlWEvent::end_element())?;
    let body = xw.into_inner().take();

    let mut res = Response::new(Body::from(body));
    *res.status_mut() = status;
    let h = res.headers_mut();
    h.insert(
        header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/xml; charset=utf-8"),
    );
    if let Some(id) = lo.id() {
        h.typed_insert(LockToken(id.to_string()));
    }
    Ok(res)
}

impl crate::DavHandler {
    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        auth: &AuthToken,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let timeout = davheaders::get_timeout(req.headers());
        let tokens = davheaders::get_lock_ids_from_if_header(req.headers());

        // no body and a token: refresh.
        if xmldata.is_empty() {
            if let Some(token) = tokens.first() {
                let lo = match self.locks.refresh(token, timeout) {
                    Some(lo) => lo,
                    None => {
                        debug!("LOCK {}: refresh of unknown token {}", path, token);
                        return Err(StatusCode::PRECONDITION_FAILED.into());
                    }
                };
                let owner = lo.owners().first().cloned().unwrap_or_default();
                return lock_response(&lo, &owner, &path, StatusCode::OK);
            }
        }

        let depth = davheaders::get_depth(req.headers());
        if depth == Depth::One {
            return Err(StatusCode::BAD_REQUEST.into());
        }

        let lreq = if xmldata.is_empty() {
            // the macOS finder locks without a body.
            let ua = req
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if !ua.contains("Darwin") {
                return Err(StatusCode::BAD_REQUEST.into());
            }
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            LockRequest {
                exclusive: true,
                owner: format!("{}{}", ua, millis),
            }
        } else {
            parse_lockinfo(xmldata)?
        };

        let _guard = self.temp_lock(DavMethod::LOCK, &path, true, Depth::Zero)?;

        // locking an unmapped url creates a placeholder.
        let mut created = false;
        if self.stored(auth, &path).await?.is_none() {
            let parent = path.parent();
            match self.stored(auth, &parent).await? {
                Some(pso) if pso.is_folder => {}
                Some(_) => return Err(StatusCode::PRECONDITION_FAILED.into()),
                None => self.store.create_folder(auth, &parent).await?,
            }
            self.store.create_null_resource(auth, &path).await?;
            created = true;
        }

        if let Some(lo) = self.locks.get_locked_object_by_path(path.as_str()) {
            if lo.owners().iter().any(|o| o == &lreq.owner) {
                debug!("LOCK {}: {} already holds a lock", path, lreq.owner);
                return Err(StatusCode::LOCKED.into());
            }
        }

        let locked = self.locks.lock(
            path.as_str(),
            &lreq.owner,
            lreq.exclusive,
            depth,
            timeout,
            false,
        )?;
        if !locked {
            if created {
                if let Err(e) = self.store.remove_object(auth, &path).await {
                    warn!("LOCK {}: removing placeholder failed: {}", path, e);
                }
            }
            return Err(StatusCode::LOCKED.into());
        }

        let lo = match self.locks.get_locked_object_by_path(path.as_str()) {
            Some(lo) => lo,
            None => return Err(StatusCode::INTERNAL_SERVER_ERROR.into()),
        };
        debug!("LOCK {}: {} holds {:?}", path, lreq.owner, lo.id());
        let status = if created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        lock_response(&lo, &lreq.owner, &path, status)
    }

    pub(crate) async fn handle_unlock(
        &self,
        req: &Request<()>,
        auth: &AuthToken,
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let token = match davheaders::get_lock_id_from_lock_token_header(req.headers()) {
            Some(t) => t,
            None => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let lo = match self.locks.get_locked_object_by_id(&token) {
            Some(lo) => lo,
            None => {
                debug!("UNLOCK {}: unknown token {}", path, token);
                return Err(StatusCode::BAD_REQUEST.into());
            }
        };

        if !lo.covers(path.as_str()) {
            debug!("UNLOCK {}: token {} locks {}", path, token, lo.path());
            return Err(StatusCode::CONFLICT.into());
        }
        let locked = match path.with_path(lo.path()) {
            Some(p) => p,
            None => return Err(StatusCode::INTERNAL_SERVER_ERROR.into()),
        };

        let _guard = self.temp_lock(DavMethod::UNLOCK, &locked, true, Depth::Zero)?;

        let owners = lo.owners().to_vec();
        for owner in &owners {
            if !self.locks.unlock(&token, owner) {
                debug!("UNLOCK {}: {} does not hold {}", path, owner, token);
                return Err(StatusCode::CONFLICT.into());
            }
        }

        // the placeholder belongs to the lock, not to the request url.
        if let Some(so) = self.stored(auth, &locked).await? {
            if so.is_null_resource {
                self.store.remove_object(auth, &locked).await?;
            }
        }
        Ok(status_response(StatusCode::NO_CONTENT))
    }
}
