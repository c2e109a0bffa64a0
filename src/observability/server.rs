//! Scrape endpoint for decode metrics while a session runs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow};
use hyper::body::Bytes;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use tokio::sync::oneshot;

use super::MetricsCollector;

pub struct MetricsServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    address: SocketAddr,
}

impl MetricsServer {
    pub fn start(listen: SocketAddr, collector: MetricsCollector) -> Result<Self> {
        let (tx, rx) = oneshot::channel::<()>();
        let (addr_tx, addr_rx) = mpsc::channel::<Result<SocketAddr, String>>();
        let collector = Arc::new(collector);

        let thread = std::thread::Builder::new()
            .name("metrics-server".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = addr_tx.send(Err(format!("failed to build runtime: {err}")));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let make_svc = make_service_fn(move |_| {
                        let collector = collector.clone();
                        async move {
                            Ok::<_, hyper::Error>(service_fn(move |req| {
                                let collector = collector.clone();
                                async move { handle_request(req, collector).await }
                            }))
                        }
                    });

                    let builder = match hyper::Server::try_bind(&listen) {
                        Ok(builder) => builder,
                        Err(err) => {
                            let _ = addr_tx.send(Err(format!("failed to bind {listen}: {err}")));
                            return;
                        }
                    };
                    let _ = addr_tx.send(Ok(builder.local_addr()));
                    let server = builder.serve(make_svc);
                    let graceful = server.with_graceful_shutdown(async move {
                        let _ = rx.await;
                    });

                    if let Err(err) = graceful.await {
                        tracing::error!(error = %err, "Metrics server error");
                    }
                });
            })
            .context("failed to spawn metrics server thread")?;

        let address = match addr_rx.recv() {
            Ok(Ok(address)) => address,
            Ok(Err(message)) => {
                let _ = thread.join();
                return Err(anyhow!(message));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(anyhow!("metrics server thread exited during startup"));
            }
        };

        Ok(Self {
            shutdown_tx: Some(tx),
            thread: Some(thread),
            address,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_request(
    req: Request<Body>,
    collector: Arc<MetricsCollector>,
) -> Result<Response<Body>, hyper::Error> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Response::new(Body::from(collector.snapshot().to_prometheus())),
        (&Method::GET, "/metrics.json") => {
            let body = serde_json::to_vec(&collector.snapshot()).unwrap_or_else(|_| b"{}".to_vec());
            let mut response = Response::new(Body::from(body));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("application/json"),
            );
            response
        }
        _ => {
            let mut response = Response::new(Body::from(Bytes::from_static(b"Not Found")));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    };
    Ok(response)
}
