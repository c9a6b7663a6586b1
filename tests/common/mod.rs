#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use strata::middleware::{self, Chain};
use strata::{
    AuthStore, Logger, MemoryAuthStore, MemoryLogger, MemoryPool, Method, Pool, Request, Response,
    Router, Server,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A server running on an ephemeral port. Dropping it does not stop the
/// server; call [`TestServer::stop`].
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), strata::Error>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        self.task.await.unwrap().unwrap();
    }
}

pub async fn spawn(router: Router, logger: Arc<dyn Logger>) -> TestServer {
    spawn_with(router, |server| server.logger(logger)).await
}

/// Like [`spawn`], with a hook to adjust the server before it starts.
pub async fn spawn_with(router: Router, configure: impl FnOnce(Server) -> Server) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, rx) = oneshot::channel::<()>();
    let server = configure(Server::from_listener(listener));
    let task = tokio::spawn(server.serve_with_shutdown(router, async move {
        let _ = rx.await;
    }));
    TestServer { addr, shutdown, task }
}

/// Everything a test needs to inspect after driving the app.
pub struct App {
    pub pool: MemoryPool,
    pub sessions: MemoryAuthStore,
    pub log: MemoryLogger,
}

impl App {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool: MemoryPool::new(pool_size),
            sessions: MemoryAuthStore::new(),
            log: MemoryLogger::new(),
        }
    }

    pub fn logger(&self) -> Arc<dyn Logger> {
        Arc::new(self.log.clone())
    }

    /// The full stack in its usual order: access log, recovery, database
    /// session, method filter, authorization.
    pub fn protected(&self, methods: &[Method]) -> Chain {
        let pool: Arc<dyn Pool> = Arc::new(self.pool.clone());
        let store: Arc<dyn AuthStore> = Arc::new(self.sessions.clone());
        self.open(methods)
            .with(middleware::db_session(pool))
            .with(middleware::auth(store))
    }

    /// Access log, recovery and the method filter only.
    pub fn open(&self, methods: &[Method]) -> Chain {
        Chain::new()
            .with(middleware::logging(self.logger()))
            .with(middleware::recovery(self.logger()))
            .with(middleware::method(methods.iter().cloned()))
    }
}

pub async fn list_users(req: Request) -> Result<Response, strata::Error> {
    let Some(db) = req.session() else {
        return Err(strata::Error::handler("no session"));
    };
    let users = db.find("users", &serde_json::Value::Null).await?;
    Ok(Response::json(serde_json::to_vec(&users).map_err(strata::Error::handler)?))
}

pub async fn explode(_req: Request) -> Response {
    let slots: Vec<u8> = Vec::new();
    Response::text(slots[7].to_string())
}

/// A default client: keep-alive on, idle connections pooled.
pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}
