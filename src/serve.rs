//! Live page server.
//!
//! Built on `tiny_http` with a fixed pool of worker threads. Each request is
//! routed through the dynamic route table and rendered on the spot; nothing
//! is read from the output directory.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐   ┌────────────────────┐
//! │  HTTP workers    │   │  tokio runtime   │   │  notifier threads  │
//! │  (N threads)     │   │                  │   │  (pages, catalog)  │
//! └────────┬─────────┘   └────────┬─────────┘   └─────────┬──────────┘
//!          │ block_on             │                       │
//!          ▼                      ▼                       ▼
//!    dispatch + render     drivers, compiles,       change events
//!                          regeneration
//! ```
//!
//! Ctrl+C flips the shutdown flag, unblocks every worker and waits for the
//! pipeline to wind down.

use crate::{
    config::SiteConfig,
    debug,
    generator::Regenerator,
    log,
    portal::Portal,
    render::{render_path, with_doctype},
    watch,
};
use anyhow::{Context, Result};
use handlebars::html_escape;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    thread,
};
use tiny_http::{Header, Method, Request, Response, Server};
use tokio::runtime::{Handle, Runtime};

// ============================================================================
// Constants - HTML Templates
// ============================================================================

/// 404 page (embedded at compile time)
const NOT_FOUND_TEMPLATE: &str = include_str!("embed/serve/not_found.html");

/// 500 page (embedded at compile time)
const INTERNAL_ERROR_TEMPLATE: &str = include_str!("embed/serve/internal_error.html");

/// Try binding to port, retry with incremented port if in use
const MAX_PORT_RETRIES: u16 = 10;

// ============================================================================
// Server Entry Point
// ============================================================================

/// Serve pages until Ctrl+C.
///
/// 1. Starts the regeneration worker and queues the first pass
/// 2. Starts the page and catalog watchers (if enabled)
/// 3. Binds (with auto-retry on port conflict) and runs the worker pool
/// 4. On Ctrl+C: signals shutdown and waits for the pipeline tasks
pub fn serve_site(portal: Arc<Portal>, runtime: &Runtime) -> Result<()> {
    let config: &'static SiteConfig = portal.config;
    let _guard = runtime.enter();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut tasks = Vec::new();

    let regen = if config.serve.generate {
        let (regen, worker) = Regenerator::spawn(Arc::clone(&portal), config.build.output.clone());
        regen.trigger();
        tasks.push(worker);
        Some(regen)
    } else {
        None
    };

    if config.serve.watch {
        tasks.extend(watch::start(Arc::clone(&portal), regen.clone(), shutdown_rx)?);
    }
    // Workers exit once the pipeline drops its copies.
    drop(regen);

    let interface: IpAddr = config
        .serve
        .interface
        .parse()
        .with_context(|| format!("Invalid interface `{}`", config.serve.interface))?;
    let (server, addr) = try_bind_port(interface, config.serve.port, MAX_PORT_RETRIES)?;
    let server = Arc::new(server);
    let workers = config.serve.workers;

    // Set up Ctrl+C handler for graceful shutdown
    let server_for_signal = Arc::clone(&server);
    ctrlc::set_handler(move || {
        log!("serve"; "shutting down...");
        shutdown_tx.send_replace(true);
        for _ in 0..workers {
            server_for_signal.unblock();
        }
    })
    .context("Failed to set Ctrl+C handler")?;

    log!("serve"; "http://{}", addr);

    let handles: Vec<_> = (0..workers)
        .map(|index| {
            let server = Arc::clone(&server);
            let portal = Arc::clone(&portal);
            let runtime = runtime.handle().clone();
            thread::Builder::new()
                .name(format!("http-{index}"))
                .spawn(move || worker_loop(&server, &portal, &runtime))
        })
        .collect::<std::io::Result<_>>()
        .context("Failed to spawn HTTP workers")?;

    for handle in handles {
        handle.join().ok();
    }

    runtime.block_on(async {
        for task in tasks {
            task.await.ok();
        }
    });
    Ok(())
}

/// Try to bind to a port, retrying with incremented port numbers if in use.
fn try_bind_port(interface: IpAddr, base_port: u16, max_retries: u16) -> Result<(Server, SocketAddr)> {
    let mut last_error = None;

    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::new(interface, port);

        match Server::http(addr) {
            Ok(server) => {
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", base_port, port);
                }
                return Ok((server, addr));
            }
            Err(err) => last_error = Some(err),
        }
    }

    Err(anyhow::anyhow!(
        "Failed to bind after {} attempts (ports {}-{}): {}",
        max_retries,
        base_port,
        base_port.saturating_add(max_retries.saturating_sub(1)),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

// ============================================================================
// Request Handling
// ============================================================================

fn worker_loop(server: &Server, portal: &Portal, runtime: &Handle) {
    // `recv` fails once the server is unblocked for shutdown.
    while let Ok(request) = server.recv() {
        if let Err(e) = handle_request(request, portal, runtime) {
            log!("serve"; "request error: {e}");
        }
    }
}

/// Handle a single HTTP request.
///
/// GET and HEAD are dispatched through the route table; tiny_http drops the
/// body for HEAD. Anything else is 405.
fn handle_request(request: Request, portal: &Portal, runtime: &Handle) -> Result<()> {
    if !matches!(request.method(), Method::Get | Method::Head) {
        return respond(request, 405, "text/plain; charset=utf-8", "405 Method Not Allowed".into());
    }

    let path = request_path(request.url());
    let result = runtime.block_on(render_path(&portal.routes, &portal.cache, &portal.models, &path));

    match result {
        Ok(markup) => respond(request, 200, "text/html; charset=utf-8", with_doctype(markup)),
        Err(err) => {
            let status = err.status();
            if status >= 500 {
                log!("error"; "{path}: {err}");
            } else {
                debug!("serve"; "{path}: {err}");
            }
            respond(request, status, "text/html; charset=utf-8", error_page(status, &path))
        }
    }
}

/// Decode the URL and strip the query string.
///
/// `/plugins/tag/a%20b.html?t=1` → `/plugins/tag/a b.html`
fn request_path(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    urlencoding::decode(without_query)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| without_query.to_owned())
}

// `{path}` and `{version}` are template placeholders, not format args
#[allow(clippy::literal_string_with_formatting_args)]
fn error_page(status: u16, path: &str) -> String {
    let template = if status >= 500 {
        INTERNAL_ERROR_TEMPLATE
    } else {
        NOT_FOUND_TEMPLATE
    };
    template
        .replace("{path}", &html_escape(path))
        .replace("{version}", env!("CARGO_PKG_VERSION"))
}

fn respond(request: Request, status: u16, content_type: &str, body: String) -> Result<()> {
    let header = Header::from_bytes("Content-Type", content_type)
        .map_err(|()| anyhow::anyhow!("invalid content type `{content_type}`"))?;
    let response = Response::from_string(body)
        .with_status_code(status)
        .with_header(header);
    request.respond(response)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::tests::test_site;
    use std::{
        io::{Read, Write},
        net::TcpStream,
    };

    /// Send one request and return the status code and body.
    fn fetch(addr: SocketAddr, method: &str, path: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(
            stream,
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        )
        .unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        let status = response
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap();
        let body = response
            .split_once("\r\n\r\n")
            .map(|(_, body)| body.to_owned())
            .unwrap_or_default();
        (status, body)
    }

    #[test]
    fn test_worker_answers_requests() {
        let (_dir, config) = test_site(&[
            ("index", "home"),
            ("plugin", "{{!-- @location plugin --}}<h1>{{location.title}}</h1>"),
            ("broken", "{{missing.field}}"),
        ]);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let portal = Arc::new(Portal::load(config).unwrap());
        assert!(runtime.block_on(portal.compile_all()).is_empty());

        let (server, _) = try_bind_port("127.0.0.1".parse().unwrap(), 0, 1).unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let server = Arc::new(server);
        let worker = thread::spawn({
            let server = Arc::clone(&server);
            let portal = Arc::clone(&portal);
            let handle = runtime.handle().clone();
            move || worker_loop(&server, &portal, &handle)
        });

        assert_eq!(fetch(addr, "GET", "/"), (200, "<!DOCTYPE html>\nhome".to_owned()));
        assert_eq!(
            fetch(addr, "GET", "/plugins/ktor-auth.html?from=index"),
            (200, "<!DOCTYPE html>\n<h1>Authentication</h1>".to_owned())
        );

        let (status, body) = fetch(addr, "GET", "/plugins/ktor-nope.html");
        assert_eq!(status, 404);
        assert!(body.contains("404 Not Found"));
        assert!(body.contains("/plugins/ktor-nope.html"));

        assert_eq!(fetch(addr, "GET", "/missing.html").0, 404);

        let (status, body) = fetch(addr, "GET", "/broken.html");
        assert_eq!(status, 500);
        assert!(body.contains("500 Internal Error"));

        assert_eq!(fetch(addr, "POST", "/").0, 405);
        assert_eq!(fetch(addr, "HEAD", "/"), (200, String::new()));

        server.unblock();
        worker.join().unwrap();
    }

    #[test]
    fn test_request_path() {
        assert_eq!(request_path("/"), "/");
        assert_eq!(request_path("/plugins/ktor-auth.html?t=123"), "/plugins/ktor-auth.html");
        assert_eq!(request_path("/plugins/tag/a%20b.html"), "/plugins/tag/a b.html");
        assert_eq!(request_path("/index.html#top"), "/index.html");
    }

    #[test]
    fn test_error_page_escapes_path() {
        let page = error_page(404, "/<script>");
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>"));
        assert!(page.contains(env!("CARGO_PKG_VERSION")));

        assert!(error_page(500, "/x").contains("500 Internal Error"));
    }

    #[test]
    fn test_try_bind_port_skips_taken_port() {
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();
        let (first, addr) = try_bind_port(localhost, 0, 1).unwrap();
        let taken = first.server_addr().to_ip().map(|a| a.port()).unwrap_or(addr.port());

        let (_second, addr) = try_bind_port(localhost, taken, 5).unwrap();
        assert_ne!(addr.port(), taken);
    }
}
