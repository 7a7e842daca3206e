use std::fmt::Write;

use headers::HeaderMapExt;
use http::{header, Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::status_response;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::store::{AuthToken, StoredObject};
use crate::util::{systemtime_to_httpdate, DavMethod};
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_get(
        &self,
        req: &Request<()>,
        auth: &AuthToken,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let method = if head { DavMethod::HEAD } else { DavMethod::GET };
        let mut path = self.path(req)?;
        let _guard = self.temp_lock(method, &path, false, Depth::Zero)?;

        let so = match self.stored(auth, &path).await? {
            Some(so) => so,
            None => {
                let alt = match self.instead_of_404 {
                    Some(ref alt) => alt,
                    None => return Err(StatusCode::NOT_FOUND.into()),
                };
                debug!("{} not found, serving {}", path, alt);
                path = DavPath::from_str_and_prefix(alt, "")?;
                self.stored(auth, &path)
                    .await?
                    .ok_or(DavError::Status(StatusCode::NOT_FOUND))?
            }
        };

        if so.is_null_resource {
            return Err(DavError::NotAllowed(self.allowed_methods(Some(&so), false)));
        }

        if so.is_folder {
            if let Some(ref index) = self.default_index_file {
                let mut target = path.clone();
                target.add_slash();
                let location = format!("{}{}", target.as_url_string_with_prefix(), index);
                let mut res = status_response(StatusCode::FOUND);
                res.headers_mut().insert(header::LOCATION, location.parse()?);
                return Ok(res);
            }
            return self.handle_folder_index(auth, &path, &so, head).await;
        }

        // "/file/" is not "/file".
        if path.is_collection() {
            return Err(StatusCode::NOT_FOUND.into());
        }

        let etag = davheaders::get_etag(Some(&so));
        let mut res = Response::new(Body::empty());
        {
            let h = res.headers_mut();
            h.insert(header::ETAG, etag.parse()?);
            if let Some(modified) = so.last_modified {
                h.insert(header::LAST_MODIFIED, systemtime_to_httpdate(modified).parse()?);
            }
            let mime = mime_guess::from_path(path.file_name()).first_or_octet_stream();
            h.insert(header::CONTENT_TYPE, mime.as_ref().parse()?);
            h.insert(header::ACCEPT_RANGES, http::HeaderValue::from_static("none"));
        }

        if if_none_match(req, &etag) {
            *res.status_mut() = StatusCode::NOT_MODIFIED;
            return Ok(res);
        }

        if !self.no_content_length_headers {
            res.headers_mut()
                .typed_insert(headers::ContentLength(so.resource_length));
        }
        if !head {
            let content = self.store.get_resource_content(auth, &path).await?;
            *res.body_mut() = Body::content(content, Some(so.resource_length));
        }
        Ok(res)
    }

    // Simple HTML listing of a folder.
    async fn handle_folder_index(
        &self,
        auth: &AuthToken,
        path: &DavPath,
        so: &StoredObject,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());
        {
            let h = res.headers_mut();
            h.insert(
                header::CONTENT_TYPE,
                http::HeaderValue::from_static("text/html; charset=utf-8"),
            );
            if let Some(modified) = so.last_modified {
                h.insert(header::LAST_MODIFIED, systemtime_to_httpdate(modified).parse()?);
            }
        }
        if head {
            return Ok(res);
        }

        let names = self
            .store
            .get_children_names(auth, path)
            .await?
            .unwrap_or_default();

        let mut dir = path.clone();
        dir.add_slash();
        let upath = htmlescape::encode_minimal(&dir.as_url_string_with_prefix());
        let mut w = String::new();
        w.push_str(
            "<html><head>\n\
             <meta charset=\"utf-8\">\n\
             <style>\n\
             table { border-collapse: separate; border-spacing: 1.5em 0.25em; }\n\
             td.size { text-align: right; }\n\
             </style>\n",
        );
        let _ = writeln!(w, "<title>Index of {}</title>", upath);
        w.push_str("</head><body>\n");
        let _ = writeln!(w, "<h1>Index of {}</h1>", upath);
        w.push_str("<table>\n<tr><th>Name</th><th>Last modified</th><th>Size</th></tr>\n");
        if !path.is_root() {
            w.push_str("<tr><td><a href=\"..\">Parent Directory</a></td><td>&nbsp;</td><td class=\"size\">-</td></tr>\n");
        }
        for name in names {
            let child = dir.join(&name);
            let cso = match self.store.get_stored_object(auth, &child).await {
                Ok(Some(cso)) if !cso.is_null_resource => cso,
                Ok(_) => continue,
                Err(e) => {
                    debug!("index of {}: skipping {}: {}", path, child, e);
                    continue;
                }
            };
            let mut child = child;
            if cso.is_folder {
                child.add_slash();
            }
            let modified = cso
                .last_modified
                .map(systemtime_to_httpdate)
                .unwrap_or_default();
            let size = if cso.is_folder {
                "[DIR]".to_string()
            } else {
                cso.resource_length.to_string()
            };
            let display = if cso.is_folder { format!("{}/", name) } else { name };
            let _ = writeln!(
                w,
                "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td class=\"size\">{}</td></tr>",
                htmlescape::encode_minimal(&child.as_url_string_with_prefix()),
                htmlescape::encode_minimal(&display),
                modified,
                size
            );
        }
        w.push_str("</table></body></html>\n");

        if !self.no_content_length_headers {
            res.headers_mut()
                .typed_insert(headers::ContentLength(w.len() as u64));
        }
        *res.body_mut() = Body::from(w);
        Ok(res)
    }
}

// If-None-Match: matches the current entity tag.
fn if_none_match(req: &Request<()>, etag: &str) -> bool {
    let value = match req
        .headers()
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        Some(v) => v,
        None => return false,
    };
    value
        .split(',')
        .map(|t| t.trim())
        .any(|t| t == "*" || t == etag)
}
