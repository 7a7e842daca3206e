//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
#[cfg(any(docsrs, feature = "localstore"))]
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_stream::stream;
use bytes::Buf;
use futures_util::StreamExt;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;
use uuid::Uuid;

use crate::body::Body;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::lock::{ResourceLocks, TempLockGuard};
use crate::multierror::MultiError;
use crate::store::{AuthToken, ContentStream, DavStore, StoredObject};
use crate::util::{dav_method, dav_method_name, dav_method_names, DavMethod, DavMethodSet};
use crate::DavResult;

pub mod handle_copymove;
pub mod handle_delete;
pub mod handle_gethead;
pub mod handle_lock;
pub mod handle_mkcol;
pub mod handle_options;
pub mod handle_props;
pub mod handle_put;

// maximum size of a request body, PUT excepted.
const MAX_REQUEST_BODY: usize = 65536;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Store backend.
    store: Store,
    /// Lock table, if it is shared with other handlers.
    locks: Option<Arc<ResourceLocks>>,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// Refuse every method that changes something.
    read_only: bool,
    /// PUT creates a missing parent folder.
    lazy_folder_creation_on_put: bool,
    /// GET on a folder redirects to this file inside it.
    default_index_file: Option<String>,
    /// GET on a missing path serves this path instead.
    instead_of_404: Option<String>,
    /// Leave out Content-Length on GET/HEAD.
    no_content_length_headers: bool,
    /// Realm for the WWW-Authenticate header.
    realm: String,
}

/// Store backend.
#[derive(Clone)]
pub enum Store {
    #[cfg(any(docsrs, feature = "memstore"))]
    Mem,
    #[cfg(any(docsrs, feature = "localstore"))]
    Local {
        /// Path to the root directory.
        base: PathBuf,
        public: bool,
    },
    /// Any other store.
    Custom(Arc<dyn DavStore>),
}

impl Store {
    /// Serve a local directory
    #[cfg(any(docsrs, feature = "localstore"))]
    pub fn local(path: impl Into<PathBuf>, public: bool) -> Self {
        Store::Local {
            base: path.into(),
            public,
        }
    }

    /// Serve from a store of your own.
    pub fn custom(store: Arc<dyn DavStore>) -> Self {
        Store::Custom(store)
    }

    fn build(self) -> Arc<dyn DavStore> {
        match self {
            #[cfg(any(docsrs, feature = "memstore"))]
            Store::Mem => crate::store::memstore::MemStore::new(),
            #[cfg(any(docsrs, feature = "localstore"))]
            Store::Local { base, public } => crate::store::localstore::LocalStore::new(base, public),
            Store::Custom(store) => store,
        }
    }
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(store: Store) -> DavBuilder {
        Self {
            prefix: String::new(),
            store,
            locks: None,
            allow: DavMethodSet::all(),
            read_only: false,
            lazy_folder_creation_on_put: false,
            default_index_file: None,
            instead_of_404: None,
            no_content_length_headers: false,
            realm: "storedav".to_string(),
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a store path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Which methods to allow (default is all methods). Methods that
    /// are left out are answered with 403.
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Refuse all methods that change something (default false).
    pub fn read_only(self, read_only: bool) -> Self {
        let mut this = self;
        this.read_only = read_only;
        this
    }

    /// Create a missing parent folder on PUT (default false).
    pub fn lazy_folder_creation_on_put(self, lazy: bool) -> Self {
        let mut this = self;
        this.lazy_folder_creation_on_put = lazy;
        this
    }

    /// GET on a folder redirects to this file in the folder.
    pub fn default_index_file(self, name: impl Into<String>) -> Self {
        let mut this = self;
        this.default_index_file = Some(name.into());
        this
    }

    /// GET on a path that does not exist serves this path instead.
    pub fn instead_of_404(self, path: impl Into<String>) -> Self {
        let mut this = self;
        this.instead_of_404 = Some(path.into());
        this
    }

    /// Do not send Content-Length with GET and HEAD responses.
    pub fn no_content_length_headers(self, no: bool) -> Self {
        let mut this = self;
        this.no_content_length_headers = no;
        this
    }

    /// Realm to send in the `WWW-Authenticate` header.
    pub fn realm(self, realm: impl Into<String>) -> Self {
        let mut this = self;
        this.realm = realm.into();
        this
    }

    /// Use this lock table instead of a private one.
    pub fn locks(self, locks: Arc<ResourceLocks>) -> Self {
        let mut this = self;
        this.locks = Some(locks);
        this
    }
}

/// The webdav handler struct.
///
/// The `builder` method is used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
/// Clones share the store and the lock table.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) store: Arc<dyn DavStore>,
    pub(crate) locks: Arc<ResourceLocks>,
    pub(crate) allow: DavMethodSet,
    pub(crate) read_only: bool,
    pub(crate) lazy_folder_creation_on_put: bool,
    pub(crate) default_index_file: Option<Arc<String>>,
    pub(crate) instead_of_404: Option<Arc<String>>,
    pub(crate) no_content_length_headers: bool,
    pub(crate) realm: Arc<String>,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            store: cfg.store.build(),
            locks: cfg.locks.unwrap_or_else(ResourceLocks::new),
            allow: cfg.allow,
            read_only: cfg.read_only,
            lazy_folder_creation_on_put: cfg.lazy_folder_creation_on_put,
            default_index_file: cfg.default_index_file.map(Arc::new),
            instead_of_404: cfg.instead_of_404.map(Arc::new),
            no_content_length_headers: cfg.no_content_length_headers,
            realm: Arc::new(cfg.realm),
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(store: Store) -> DavBuilder {
        DavBuilder::new(store)
    }

    /// The lock table of this handler.
    pub fn locks(&self) -> &Arc<ResourceLocks> {
        &self.locks
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, with an extra prefix appended to the
    /// configured one.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        this.handle_inner(req).await
    }
}

impl DavHandler {
    // helper.
    pub(crate) fn path(&self, req: &Request<()>) -> DavResult<DavPath> {
        DavPath::from_uri_and_prefix(req.uri(), &self.prefix)
    }

    // helper.
    pub(crate) async fn stored(
        &self,
        auth: &AuthToken,
        path: &DavPath,
    ) -> DavResult<Option<StoredObject>> {
        Ok(self.store.get_stored_object(auth, path).await?)
    }

    // The Destination: header of COPY and MOVE.
    pub(crate) fn destination(&self, req: &Request<()>) -> DavResult<DavPath> {
        let value = req
            .headers()
            .get("destination")
            .and_then(|v| v.to_str().ok())
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        DavPath::from_destination(value, &self.prefix).ok_or_else(|| {
            debug!("bad destination {:?}", value);
            DavError::Status(StatusCode::BAD_REQUEST)
        })
    }

    // Check the persistent locks that cover path. A shared lock does not
    // stop anybody; an exclusive one needs its token in the If: header.
    pub(crate) fn check_locks(&self, req: &Request<()>, path: &DavPath) -> DavResult<()> {
        let tokens = davheaders::get_lock_ids_from_if_header(req.headers());
        for lo in self.locks.covering_locks(path.as_str()) {
            if lo.is_shared() {
                continue;
            }
            let held = lo
                .id()
                .map(|id| tokens.iter().any(|t| t == id))
                .unwrap_or(false);
            if !held {
                debug!("{} is locked by {}", path, lo.path());
                return Err(DavError::MultiStatus(MultiError::single(
                    path,
                    StatusCode::LOCKED,
                )));
            }
        }
        Ok(())
    }

    // Take a temporary lock around the critical section of a handler.
    // Released when the guard goes out of scope.
    pub(crate) fn temp_lock(
        &self,
        method: DavMethod,
        path: &DavPath,
        exclusive: bool,
        depth: Depth,
    ) -> DavResult<TempLockGuard> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let owner = format!("{}{}-{}", dav_method_name(method), millis, Uuid::new_v4());
        match self.locks.temp_lock(path.as_str(), owner, exclusive, depth)? {
            Some(guard) => Ok(guard),
            None => {
                debug!("{} {}: busy", dav_method_name(method), path);
                Err(DavError::Status(StatusCode::LOCKED))
            }
        }
    }

    // drain request body and return it.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof"))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(DavError::StatusClose(StatusCode::PAYLOAD_TOO_LARGE));
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // turn an error into a response.
    fn error_response(&self, err: DavError) -> Response<Body> {
        let err = match err {
            DavError::MultiStatus(errors) => match errors.into_response() {
                Ok(resp) => return resp,
                Err(e) => e,
            },
            err => err,
        };
        let status = err.statuscode();
        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = status;
        let h = resp.headers_mut();
        h.insert("content-length", http::HeaderValue::from_static("0"));
        if let DavError::NotAllowed(allow) = &err {
            if let Ok(v) = dav_method_names(*allow).join(", ").parse() {
                h.insert("allow", v);
            }
        }
        if status == StatusCode::UNAUTHORIZED {
            let challenge = format!("Basic realm=\"{}\"", self.realm);
            match http::HeaderValue::from_str(&challenge) {
                Ok(v) => {
                    h.insert("www-authenticate", v);
                }
                Err(e) => error!("invalid realm {:?}: {}", self.realm, e),
            }
        }
        if err.must_close() {
            h.insert("connection", http::HeaderValue::from_static("close"));
        }
        resp
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // Turn any DavError results into a HTTP error response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {}", err);
                self.error_response(err)
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                if self.read_only {
                    return Err(StatusCode::FORBIDDEN.into());
                }
                return Err(e);
            }
        };

        // see if method is allowed.
        if !self.allow.contains(method)
            || (self.read_only && DavMethod::WEBDAV_WRITE.contains(method))
        {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::FORBIDDEN));
        }

        // make sure the request path is valid.
        let path = self.path(&req)?;

        // no credentials, no service.
        let auth = match req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            Some(auth) => AuthToken(auth.to_string()),
            None => return Err(DavError::Unauthorized),
        };

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expected no body, or a pre-read Vec<u8>.
        let (body_strm, body_data) = if method == DavMethod::PUT {
            (Some(body_stream(body)), Vec::new())
        } else {
            (None, self.read_request(body, MAX_REQUEST_BODY).await?)
        };

        // Not all methods accept a body.
        if !DavMethod::WEBDAV_BODY.contains(method) && !body_data.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {} {}", dav_method_name(method), path);

        self.store.begin().await?;
        let res = match self.store.check_authentication(&auth).await {
            Ok(()) => self.dispatch(method, &req, &auth, body_data, body_strm).await,
            Err(e) => Err(e.into()),
        };
        match res {
            Ok(resp) => {
                self.store.commit(&auth).await?;
                Ok(resp)
            }
            Err(err) => {
                if let Err(e) = self.store.rollback(&auth).await {
                    error!("{} {}: rollback failed: {}", dav_method_name(method), path, e);
                }
                Err(err)
            }
        }
    }

    async fn dispatch(
        &self,
        method: DavMethod,
        req: &Request<()>,
        auth: &AuthToken,
        body_data: Vec<u8>,
        body_strm: Option<ContentStream<'static>>,
    ) -> DavResult<Response<Body>> {
        match method {
            m if m == DavMethod::OPTIONS => self.handle_options(req, auth).await,
            m if m == DavMethod::PROPFIND => self.handle_propfind(req, auth, &body_data).await,
            m if m == DavMethod::PROPPATCH => self.handle_proppatch(req, auth, &body_data).await,
            m if m == DavMethod::MKCOL => self.handle_mkcol(req, auth).await,
            m if m == DavMethod::DELETE => self.handle_delete(req, auth).await,
            m if m == DavMethod::LOCK => self.handle_lock(req, auth, &body_data).await,
            m if m == DavMethod::UNLOCK => self.handle_unlock(req, auth).await,
            m if m == DavMethod::HEAD => self.handle_get(req, auth, true).await,
            m if m == DavMethod::GET => self.handle_get(req, auth, false).await,
            m if m == DavMethod::COPY => self.handle_copy(req, auth).await,
            m if m == DavMethod::MOVE => self.handle_move(req, auth).await,
            m if m == DavMethod::PUT => match body_strm {
                Some(body) => self.handle_put(req, auth, body).await,
                None => Err(StatusCode::BAD_REQUEST.into()),
            },
            _ => Err(DavError::UnknownDavMethod),
        }
    }
}

// The request body as a content stream, for PUT.
fn body_stream<ReqBody, ReqData, ReqError>(body: ReqBody) -> ContentStream<'static>
where
    ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
    ReqData: Buf + Send + 'static,
    ReqError: StdError + Send + Sync + 'static,
{
    let strm = stream! {
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            match res {
                Ok(mut buf) => {
                    let chunk = buf.copy_to_bytes(buf.remaining());
                    yield Ok(chunk);
                }
                Err(e) => {
                    yield Err(io::Error::new(io::ErrorKind::UnexpectedEof, e));
                    break;
                }
            }
        }
    };
    strm.boxed()
}

// A response with only a status.
pub(crate) fn status_response(status: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = status;
    res
}
