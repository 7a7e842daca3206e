//
//  Sample application.
//
//  Listens on localhost:4918, plain http, no ssl.
//  Connect to http://localhost:4918/
//

use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::str::FromStr;

use clap::Parser;
use futures_util::future::TryFutureExt;

use storedav::{body::Body, DavHandler, Store};

// "anonymous:" as basic credentials.
const ANONYMOUS: &str = "Basic YW5vbnltb3VzOg==";

#[derive(Clone)]
struct Server {
    dh: DavHandler,
    auth: bool,
}

impl Server {
    pub fn new(directory: Option<String>, read_only: bool, realm: String, auth: bool) -> Self {
        let store = match directory {
            Some(dir) => Store::local(dir, true),
            None => Store::Mem,
        };
        let dh = DavHandler::builder(store)
            .read_only(read_only)
            .realm(realm)
            .lazy_folder_creation_on_put(true)
            .build();
        Server { dh, auth }
    }

    async fn handle(
        &self,
        mut req: hyper::Request<hyper::Body>,
    ) -> Result<hyper::Response<Body>, Infallible> {
        // without --auth, requests that carry no credentials are anonymous.
        if !self.auth && !req.headers().contains_key(http::header::AUTHORIZATION) {
            req.headers_mut().insert(
                http::header::AUTHORIZATION,
                http::HeaderValue::from_static(ANONYMOUS),
            );
        }
        Ok(self.dh.handle(req).await)
    }
}

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value = "4918")]
    port: u16,
    /// local directory to serve (default: an in-memory store)
    #[arg(short, long)]
    dir: Option<String>,
    /// refuse all methods that change something
    #[arg(short, long)]
    read_only: bool,
    /// realm sent with 401 responses
    #[arg(long, default_value = "storedav")]
    realm: String,
    /// require clients to send credentials
    #[arg(short, long)]
    auth: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let Cli {
        port,
        dir,
        read_only,
        realm,
        auth,
    } = Cli::parse();

    let name = dir.clone().unwrap_or_else(|| "memory store".to_string());
    let dav_server = Server::new(dir, read_only, realm, auth);
    let make_service = hyper::service::make_service_fn(|_| {
        let dav_server = dav_server.clone();
        async move {
            let func = move |req| {
                let dav_server = dav_server.clone();
                async move { dav_server.handle(req).await }
            };
            Ok::<_, hyper::Error>(hyper::service::service_fn(func))
        }
    });

    let addr = format!("0.0.0.0:{}", port);
    let addr = SocketAddr::from_str(&addr)?;

    let server = hyper::Server::try_bind(&addr)?
        .serve(make_service)
        .map_err(|e| eprintln!("server error: {}", e));

    println!("Serving {} on {}", name, port);
    let _ = server.await;
    Ok(())
}
