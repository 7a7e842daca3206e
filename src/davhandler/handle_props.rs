use futures_util::future::{BoxFuture, FutureExt};
use http::{header, Request, Response, StatusCode};
use xml::common::XmlVersion;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as XmlWEvent};
use xmltree::{Element, XMLNode};

use crate::body::Body;
use crate::davhandler::handle_lock::write_activelock;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::store::{AuthToken, StoredObject};
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339, DavMethod, MemBuffer};
use crate::DavResult;

const NS_DAV_URI: &str = "DAV:";

// properties returned by PROPFIND <allprop/>, <propname/> or an empty body.
const ALLPROP: &[&str] = &[
    "creationdate",
    "displayname",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "lockdiscovery",
    "resourcetype",
    "supportedlock",
];

type Emitter = EventWriter<MemBuffer>;

// A requested property: local name plus namespace.
#[derive(Debug, Clone, PartialEq)]
struct PropName {
    name: String,
    namespace: Option<String>,
}

impl PropName {
    fn dav(name: &str) -> PropName {
        PropName {
            name: name.to_string(),
            namespace: Some(NS_DAV_URI.to_string()),
        }
    }

    fn from_element(e: &Element) -> PropName {
        PropName {
            name: e.name.clone(),
            namespace: e.namespace.clone(),
        }
    }

    fn is_dav(&self) -> bool {
        self.namespace.as_deref() == Some(NS_DAV_URI)
    }

    // empty element, in the DAV: prefix or with its own namespace.
    fn write_empty(&self, xw: &mut Emitter) -> DavResult<()> {
        if self.is_dav() {
            xw.write(XmlWEvent::start_element(format!("D:{}", self.name).as_str()))?;
        } else {
            match self.namespace.as_deref() {
                Some(ns) => xw.write(XmlWEvent::start_element(self.name.as_str()).default_ns(ns))?,
                None => xw.write(XmlWEvent::start_element(self.name.as_str()))?,
            }
        }
        xw.write(XmlWEvent::end_element())?;
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
enum PropFind {
    AllProp,
    PropName,
    Prop(Vec<PropName>),
}

fn child_elements(e: &Element) -> impl Iterator<Item = &Element> {
    e.children.iter().filter_map(XMLNode::as_element)
}

fn parse_propfind(xmldata: &[u8]) -> DavResult<PropFind> {
    if xmldata.is_empty() {
        return Ok(PropFind::AllProp);
    }
    let tree = Element::parse(xmldata).map_err(|_| DavError::XmlParse)?;
    if tree.name != "propfind" {
        return Err(DavError::XmlParse);
    }
    for elem in child_elements(&tree) {
        match elem.name.as_str() {
            "allprop" => return Ok(PropFind::AllProp),
            "propname" => return Ok(PropFind::PropName),
            "prop" => {
                let props = child_elements(elem).map(PropName::from_element).collect();
                return Ok(PropFind::Prop(props));
            }
            _ => {}
        }
    }
    Err(DavError::XmlParse)
}

// the property names of a PROPPATCH body, set and remove alike.
fn parse_propertyupdate(xmldata: &[u8]) -> DavResult<Vec<PropName>> {
    let tree = Element::parse(xmldata).map_err(|_| DavError::XmlParse)?;
    if tree.name != "propertyupdate" {
        return Err(DavError::XmlParse);
    }
    let mut names = Vec::new();
    for elem in child_elements(&tree) {
        if elem.name != "set" && elem.name != "remove" {
            continue;
        }
        if let Some(prop) = elem.get_child("prop") {
            names.extend(child_elements(prop).map(PropName::from_element));
        }
    }
    Ok(names)
}

fn start_multistatus() -> DavResult<Emitter> {
    let mut xw = EventWriter::new_with_config(
        MemBuffer::new(),
        EmitterConfig::new().perform_indent(true),
    );
    xw.write(XmlWEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    xw.write(XmlWEvent::start_element("D:multistatus").ns("D", NS_DAV_URI))?;
    Ok(xw)
}

fn finish_multistatus(mut xw: Emitter) -> DavResult<Response<Body>> {
    xw.write(XmlWEvent::end_element())?;
    let body = xw.into_inner().take();
    let mut res = Response::new(Body::from(body));
    *res.status_mut() = StatusCode::MULTI_STATUS;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/xml; charset=utf-8"),
    );
    Ok(res)
}

fn write_text(xw: &mut Emitter, name: &str, text: &str) -> DavResult<()> {
    xw.write(XmlWEvent::start_element(name))?;
    xw.write(XmlWEvent::characters(text))?;
    xw.write(XmlWEvent::end_element())?;
    Ok(())
}

fn write_status(xw: &mut Emitter, status: StatusCode) -> DavResult<()> {
    write_text(xw, "D:status", &format!("HTTP/1.1 {}", status))
}

// can this live property be produced for the object.
fn has_prop(name: &str, so: &StoredObject) -> bool {
    match name {
        "creationdate" => so.creation_date.is_some(),
        "displayname" | "resourcetype" | "supportedlock" | "lockdiscovery" => true,
        "getcontentlength" | "getcontenttype" | "getetag" => so.is_resource(),
        "getlastmodified" => so.last_modified.is_some() && !so.is_null_resource,
        _ => false,
    }
}

impl crate::DavHandler {
    // Collect `path` and, depending on depth, what is below it.
    fn collect_entries<'a>(
        &'a self,
        auth: &'a AuthToken,
        path: DavPath,
        so: StoredObject,
        depth: Depth,
        out: &'a mut Vec<(DavPath, StoredObject)>,
    ) -> BoxFuture<'a, DavResult<()>> {
        async move {
            let mut path = path;
            let recurse = so.is_folder && depth != Depth::Zero;
            if so.is_folder {
                path.add_slash();
            }
            out.push((path.clone(), so));
            if !recurse {
                return Ok(());
            }
            let child_depth = match depth {
                Depth::One => Depth::Zero,
                d => d,
            };
            let names = self
                .store
                .get_children_names(auth, &path)
                .await?
                .unwrap_or_default();
            for name in names {
                let child = path.join(&name);
                match self.stored(auth, &child).await {
                    Ok(Some(cso)) => {
                        self.collect_entries(auth, child, cso, child_depth, out)
                            .await?
                    }
                    Ok(None) => {}
                    Err(e) => debug!("propfind: skipping {}: {}", child, e),
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn write_prop(
        &self,
        xw: &mut Emitter,
        name: &str,
        path: &DavPath,
        so: &StoredObject,
    ) -> DavResult<()> {
        let qname = format!("D:{}", name);
        match name {
            "creationdate" => {
                if let Some(created) = so.creation_date {
                    write_text(xw, &qname, &systemtime_to_rfc3339(created))?;
                }
            }
            "displayname" => write_text(xw, &qname, path.file_name())?,
            "getcontentlength" => write_text(xw, &qname, &so.resource_length.to_string())?,
            "getcontenttype" => {
                let mime = mime_guess::from_path(path.file_name()).first_or_octet_stream();
                write_text(xw, &qname, mime.as_ref())?;
            }
            "getetag" => write_text(xw, &qname, &davheaders::get_etag(Some(so)))?,
            "getlastmodified" => {
                if let Some(modified) = so.last_modified {
                    write_text(xw, &qname, &systemtime_to_httpdate(modified))?;
                }
            }
            "resourcetype" => {
                xw.write(XmlWEvent::start_element(qname.as_str()))?;
                if so.is_folder {
                    xw.write(XmlWEvent::start_element("D:collection"))?;
                    xw.write(XmlWEvent::end_element())?;
                }
                xw.write(XmlWEvent::end_element())?;
            }
            "supportedlock" => {
                xw.write(XmlWEvent::start_element(qname.as_str()))?;
                for scope in &["D:exclusive", "D:shared"] {
                    xw.write(XmlWEvent::start_element("D:lockentry"))?;
                    xw.write(XmlWEvent::start_element("D:lockscope"))?;
                    xw.write(XmlWEvent::start_element(*scope))?;
                    xw.write(XmlWEvent::end_element())?;
                    xw.write(XmlWEvent::end_element())?;
                    xw.write(XmlWEvent::start_element("D:locktype"))?;
                    xw.write(XmlWEvent::start_element("D:write"))?;
                    xw.write(XmlWEvent::end_element())?;
                    xw.write(XmlWEvent::end_element())?;
                    xw.write(XmlWEvent::end_element())?;
                }
                xw.write(XmlWEvent::end_element())?;
            }
            "lockdiscovery" => {
                xw.write(XmlWEvent::start_element(qname.as_str()))?;
                for lo in self.locks.covering_locks(path.as_str()) {
                    for owner in lo.owners() {
                        write_activelock(xw, &lo, owner, path)?;
                    }
                }
                xw.write(XmlWEvent::end_element())?;
            }
            _ => {}
        }
        Ok(())
    }

    // One <D:response> element of a PROPFIND report.
    fn write_response(
        &self,
        xw: &mut Emitter,
        req: &PropFind,
        path: &DavPath,
        so: &StoredObject,
    ) -> DavResult<()> {
        xw.write(XmlWEvent::start_element("D:response"))?;
        write_text(xw, "D:href", &path.as_url_string_with_prefix())?;

        let (found, missing): (Vec<PropName>, Vec<PropName>) = match req {
            PropFind::AllProp | PropFind::PropName => (
                ALLPROP
                    .iter()
                    .filter(|name| has_prop(name, so))
                    .map(|name| PropName::dav(name))
                    .collect(),
                Vec::new(),
            ),
            PropFind::Prop(props) => props
                .iter()
                .cloned()
                .partition(|p| p.is_dav() && has_prop(&p.name, so)),
        };

        if !found.is_empty() {
            xw.write(XmlWEvent::start_element("D:propstat"))?;
            xw.write(XmlWEvent::start_element("D:prop"))?;
            for prop in &found {
                if *req == PropFind::PropName {
                    prop.write_empty(xw)?;
                } else {
                    self.write_prop(xw, &prop.name, path, so)?;
                }
            }
            xw.write(XmlWEvent::end_element())?;
            write_status(xw, StatusCode::OK)?;
            xw.write(XmlWEvent::end_element())?;
        }

        if !missing.is_empty() {
            xw.write(XmlWEvent::start_element("D:propstat"))?;
            xw.write(XmlWEvent::start_element("D:prop"))?;
            for prop in &missing {
                prop.write_empty(xw)?;
            }
            xw.write(XmlWEvent::end_element())?;
            write_status(xw, StatusCode::NOT_FOUND)?;
            xw.write(XmlWEvent::end_element())?;
        }

        xw.write(XmlWEvent::end_element())?;
        Ok(())
    }

    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        auth: &AuthToken,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let depth = davheaders::get_depth(req.headers());
        let propfind = parse_propfind(xmldata)?;
        debug!("PROPFIND {} depth {}: {:?}", path, depth, propfind);

        let _guard = self.temp_lock(DavMethod::PROPFIND, &path, false, Depth::Zero)?;

        let so = match self.stored(auth, &path).await? {
            Some(so) => so,
            None => return Err(StatusCode::NOT_FOUND.into()),
        };

        let mut entries = Vec::new();
        self.collect_entries(auth, path, so, depth, &mut entries)
            .await?;

        let mut xw = start_multistatus()?;
        for (path, so) in &entries {
            self.write_response(&mut xw, &propfind, path, so)?;
        }
        finish_multistatus(xw)
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        auth: &AuthToken,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        self.check_locks(req, &path)?;
        let _guard = self.temp_lock(DavMethod::PROPPATCH, &path, true, Depth::Zero)?;

        let so = match self.stored(auth, &path).await? {
            Some(so) => so,
            None => return Err(StatusCode::NOT_FOUND.into()),
        };
        if so.is_folder {
            path.add_slash();
        }
        let names = parse_propertyupdate(xmldata)?;
        debug!("PROPPATCH {}: {} properties", path, names.len());

        // properties are not stored; every name is acknowledged.
        let mut xw = start_multistatus()?;
        xw.write(XmlWEvent::start_element("D:response"))?;
        write_text(&mut xw, "D:href", &path.as_url_string_with_prefix())?;
        xw.write(XmlWEvent::start_element("D:propstat"))?;
        xw.write(XmlWEvent::start_element("D:prop"))?;
        for prop in &names {
            prop.write_empty(&mut xw)?;
        }
        xw.write(XmlWEvent::end_element())?;
        write_status(&mut xw, StatusCode::OK)?;
        xw.write(XmlWEvent::end_element())?;
        xw.write(XmlWEvent::end_element())?;
        finish_multistatus(xw)
    }
}
