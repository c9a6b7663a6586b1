//! Small CRUD site on top of strata: accounts, a users endpoint, comments,
//! a cart and static files.
//!
//! Run with:
//!   cargo run --example webapp                 # defaults, 127.0.0.1:8000
//!   cargo run --example webapp -- strata.toml  # with a config file
//!
//! Try:
//!   curl -X POST localhost:8000/register -d '{"name":"ada","password":"lovelace"}'
//!   curl -i -X POST localhost:8000/login -d '{"name":"ada","password":"lovelace"}'
//!   curl localhost:8000/users -H 'authorization: <token>' -b 'session_id=<token>'
//!   curl -X PATCH localhost:8000/users                # 405
//!   curl localhost:8000/test/error                    # 500, details in the log
//!   curl localhost:8000/static/index.html             # files under ./static

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use strata::middleware::{self, Chain};
use strata::{
    AuthStore, BoxedHandler, Config, ContentType, Error, Logger, MemoryAuthStore, MemoryPool,
    Method, Pool, Request, Response, Router, Server, StatusCode, TracingLogger, health,
    init_tracing,
};

const STATIC_DIR: &str = "static";

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    }
    .apply_env()?;
    init_tracing(&config.logging);

    let log: Arc<dyn Logger> = Arc::new(TracingLogger);
    let pool = MemoryPool::with_timeout(config.database.pool_size, config.checkout_timeout());
    let app = routes(&config, log.clone(), Arc::new(pool), MemoryAuthStore::new(), STATIC_DIR.into());

    Server::at(config.socket_addr()?)
        .logger(log)
        .max_body_bytes(config.server.max_body_bytes)
        .serve(app)
        .await
}

/// What the account pages share: the live sessions, the cookie they travel
/// in, and the site-wide password secret.
#[derive(Clone)]
struct Accounts {
    sessions: MemoryAuthStore,
    cookie: Arc<str>,
    pepper: Arc<str>,
}

/// The route table. Every page runs through the same outer layers:
/// access log, recovery, database session, then the method filter.
fn routes(
    config: &Config,
    log: Arc<dyn Logger>,
    pool: Arc<dyn Pool>,
    sessions: MemoryAuthStore,
    static_dir: PathBuf,
) -> Router {
    let page = |methods: &[Method]| {
        Chain::new()
            .with(middleware::logging(log.clone()))
            .with(middleware::recovery(log.clone()))
            .with(middleware::db_session(pool.clone()))
            .with(middleware::method(methods.iter().cloned()))
    };
    let store: Arc<dyn AuthStore> = Arc::new(sessions.clone());
    let accounts = Accounts {
        sessions,
        cookie: config.auth.cookie_name.as_str().into(),
        pepper: config.auth.password_salt.as_str().into(),
    };
    let both = [Method::GET, Method::POST];

    Router::new()
        .route("/", page(&[Method::GET]).then(index))
        .route("/register", page(&both).then(register(accounts.clone())))
        .route("/login", page(&both).then(login(accounts.clone())))
        .route("/logout", page(&both).then(logout(accounts)))
        .route(
            "/users",
            page(&[Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .with(middleware::auth(store).cookie_name(&config.auth.cookie_name))
                .then(users),
        )
        .route("/cart", page(&both).then(cart))
        .route("/test/error", page(&both).then(explode))
        .route("/test/comments", page(&both).then(comments))
        .route(
            "/static/{*path}",
            Chain::new()
                .with(middleware::logging(log.clone()))
                .with(middleware::recovery(log.clone()))
                .with(middleware::method([Method::GET]))
                .then(static_files(static_dir)),
        )
        .route("/healthz", health::liveness)
        .route("/readyz", health::readiness(pool.clone()))
}

// ── Pages ─────────────────────────────────────────────────────────────────────

const ACCOUNT_FORM: &str = "<form method=\"post\">\
    <input name=\"name\"><input name=\"password\" type=\"password\"></form>";

async fn index(_req: Request) -> Response {
    Response::html("<h1>strata</h1><p><a href=\"/login\">log in</a></p>")
}

#[derive(Deserialize)]
struct Credentials {
    name: String,
    password: String,
}

fn credentials(req: &Request) -> Option<Credentials> {
    serde_json::from_slice::<Credentials>(req.body())
        .ok()
        .filter(|c| !c.name.is_empty() && !c.password.is_empty())
}

/// SHA-256 over the site secret, the user's own salt and the password.
fn hash_password(pepper: &str, salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pepper.as_bytes());
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex(&hasher.finalize())
}

/// 256 random bits, hex encoded. Used for salts and session ids.
fn random_token() -> String {
    hex(&rand::random::<[u8; 32]>())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn register(accounts: Accounts) -> BoxedHandler {
    BoxedHandler::new(move |req: Request| sign_up(accounts.clone(), req))
}

async fn sign_up(accounts: Accounts, req: Request) -> Result<Response, Error> {
    if req.method() == Method::GET {
        return Ok(Response::html(ACCOUNT_FORM));
    }
    let (Some(db), Some(creds)) = (req.session(), credentials(&req)) else {
        return Ok(Response::error(StatusCode::BAD_REQUEST));
    };
    if !db.find("users", &json!({ "name": creds.name })).await?.is_empty() {
        return Ok(Response::error(StatusCode::CONFLICT));
    }
    let salt = random_token();
    let hash = hash_password(&accounts.pepper, &salt, &creds.password);
    db.insert("users", json!({ "name": creds.name, "salt": salt, "password_hash": hash }))
        .await?;
    Ok(Response::status(StatusCode::CREATED))
}

fn login(accounts: Accounts) -> BoxedHandler {
    BoxedHandler::new(move |req: Request| sign_in(accounts.clone(), req))
}

async fn sign_in(accounts: Accounts, req: Request) -> Result<Response, Error> {
    if req.method() == Method::GET {
        return Ok(Response::html(ACCOUNT_FORM));
    }
    let (Some(db), Some(creds)) = (req.session(), credentials(&req)) else {
        return Ok(Response::error(StatusCode::BAD_REQUEST));
    };
    let found = db.find("users", &json!({ "name": creds.name })).await?;
    let verified = found.first().is_some_and(|user| {
        let salt = user["salt"].as_str().unwrap_or_default();
        let stored = user["password_hash"].as_str().unwrap_or_default();
        hash_password(&accounts.pepper, salt, &creds.password) == stored
    });
    if !verified {
        return Ok(Response::error(StatusCode::FORBIDDEN));
    }

    let id = random_token();
    accounts.sessions.grant(id.clone());
    let body = serde_json::to_vec(&json!({ "token": id })).map_err(Error::handler)?;
    Ok(Response::builder()
        .header("set-cookie", &format!("{}={id}; Path=/; HttpOnly", accounts.cookie))
        .json(body))
}

fn logout(accounts: Accounts) -> BoxedHandler {
    BoxedHandler::new(move |req: Request| {
        let accounts = accounts.clone();
        async move {
            if let Some(id) = req.cookie(&accounts.cookie) {
                accounts.sessions.revoke(id);
            }
            Response::builder()
                .header("set-cookie", &format!("{}=; Path=/; Max-Age=0", accounts.cookie))
                .text("bye")
        }
    })
}

// ── Users API ─────────────────────────────────────────────────────────────────

async fn users(req: Request) -> Result<Response, Error> {
    let Some(db) = req.session() else {
        return Err(Error::handler("users endpoint mounted without a database session"));
    };
    let name_filter = req
        .query()
        .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("name=")))
        .map(|name| json!({ "name": name }))
        .unwrap_or(Value::Null);

    match *req.method() {
        Method::GET => {
            let found: Vec<Value> = db
                .find("users", &name_filter)
                .await?
                .into_iter()
                .map(without_secrets)
                .collect();
            Ok(Response::json(serde_json::to_vec(&found).map_err(Error::handler)?))
        }
        Method::POST => {
            let doc: Value = serde_json::from_slice(req.body()).map_err(Error::handler)?;
            db.insert("users", doc).await?;
            Ok(Response::status(StatusCode::CREATED))
        }
        Method::PUT => {
            let changes: Value = serde_json::from_slice(req.body()).map_err(Error::handler)?;
            let n = db.update("users", &name_filter, &changes).await?;
            Ok(Response::text(n.to_string()))
        }
        Method::DELETE => {
            let n = db.remove("users", &name_filter).await?;
            Ok(Response::text(n.to_string()))
        }
        _ => Ok(Response::error(StatusCode::METHOD_NOT_ALLOWED)),
    }
}

fn without_secrets(mut user: Value) -> Value {
    if let Value::Object(fields) = &mut user {
        fields.remove("salt");
        fields.remove("password_hash");
    }
    user
}

// ── Comments, cart and the fault demo ─────────────────────────────────────────

#[derive(Deserialize)]
struct Comment {
    #[serde(default)]
    author: Option<String>,
    text: String,
}

async fn comments(req: Request) -> Result<Response, Error> {
    let Some(db) = req.session() else {
        return Err(Error::handler("comments mounted without a database session"));
    };
    if req.method() == Method::POST {
        let Ok(comment) = serde_json::from_slice::<Comment>(req.body()) else {
            return Ok(Response::error(StatusCode::BAD_REQUEST));
        };
        let author = comment.author.unwrap_or_else(|| "anonymous".to_owned());
        db.insert("comments", json!({ "author": author, "text": comment.text })).await?;
        return Ok(Response::status(StatusCode::CREATED));
    }
    let all = db.find("comments", &Value::Null).await?;
    Ok(Response::json(serde_json::to_vec(&all).map_err(Error::handler)?))
}

async fn cart(req: Request) -> Response {
    if req.method() == Method::POST {
        return Response::status(StatusCode::ACCEPTED);
    }
    Response::json(br#"{"items":[],"total":0}"#.to_vec())
}

async fn explode(_req: Request) -> Response {
    panic!("test error")
}

// ── Static files ──────────────────────────────────────────────────────────────

fn static_files(root: PathBuf) -> BoxedHandler {
    let root: Arc<Path> = root.into();
    BoxedHandler::new(move |req: Request| serve_file(Arc::clone(&root), req))
}

async fn serve_file(root: Arc<Path>, req: Request) -> Result<Response, Error> {
    let Some(path) = req.param("path").and_then(|rel| resolve(&root, rel)) else {
        return Ok(Response::error(StatusCode::NOT_FOUND));
    };
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Response::error(StatusCode::NOT_FOUND));
        }
        Err(e) => return Err(e.into()),
    };
    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => ContentType::Html,
        Some("css") => ContentType::Css,
        Some("js") => ContentType::JavaScript,
        Some("json") => ContentType::Json,
        Some("txt") => ContentType::Text,
        _ => ContentType::OctetStream,
    };
    Ok(Response::builder().bytes(content_type, data))
}

/// Joins `rel` onto `root`, refusing anything that could leave it.
fn resolve(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel = Path::new(rel);
    let plain = rel.components().all(|c| matches!(c, Component::Normal(_)));
    (plain && !rel.as_os_str().is_empty()).then(|| root.join(rel))
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;

    struct Site {
        base: String,
        shutdown: oneshot::Sender<()>,
        task: tokio::task::JoinHandle<Result<(), Error>>,
    }

    async fn start(static_dir: PathBuf) -> Site {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let log: Arc<dyn Logger> = Arc::new(strata::MemoryLogger::new());
        let app = routes(
            &Config::default(),
            log.clone(),
            Arc::new(MemoryPool::new(4)),
            MemoryAuthStore::new(),
            static_dir,
        );
        let (shutdown, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(Server::from_listener(listener).logger(log).serve_with_shutdown(
            app,
            async move {
                let _ = rx.await;
            },
        ));
        Site { base, shutdown, task }
    }

    impl Site {
        async fn stop(self) {
            let _ = self.shutdown.send(());
            self.task.await.unwrap().unwrap();
        }
    }

    async fn post(client: &reqwest::Client, url: String, body: Value) -> reqwest::Response {
        client.post(url).body(body.to_string()).send().await.unwrap()
    }

    #[tokio::test]
    async fn accounts_need_the_right_password() {
        let site = start(PathBuf::from(STATIC_DIR)).await;
        let client = reqwest::Client::new();
        let ada = json!({ "name": "ada", "password": "lovelace" });

        let res = post(&client, format!("{}/register", site.base), ada.clone()).await;
        assert_eq!(res.status().as_u16(), 201);
        let res = post(&client, format!("{}/register", site.base), ada.clone()).await;
        assert_eq!(res.status().as_u16(), 409);

        let wrong = json!({ "name": "ada", "password": "babbage" });
        let res = post(&client, format!("{}/login", site.base), wrong).await;
        assert_eq!(res.status().as_u16(), 403);
        let nobody = json!({ "name": "eve", "password": "lovelace" });
        let res = post(&client, format!("{}/login", site.base), nobody).await;
        assert_eq!(res.status().as_u16(), 403);

        let res = post(&client, format!("{}/login", site.base), ada.clone()).await;
        assert_eq!(res.status().as_u16(), 200);
        let body: Value = serde_json::from_str(&res.text().await.unwrap()).unwrap();
        let token = body["token"].as_str().unwrap().to_owned();
        assert_eq!(token.len(), 64);
        assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));

        let res = client
            .get(format!("{}/users", site.base))
            .header("authorization", token.as_str())
            .header("cookie", format!("session_id={token}"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 200);
        let listed = res.text().await.unwrap();
        assert!(listed.contains("\"ada\""), "{listed}");
        assert!(!listed.contains("password_hash") && !listed.contains("salt"), "{listed}");

        let res = client
            .post(format!("{}/logout", site.base))
            .header("cookie", format!("session_id={token}"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 200);
        let res = client
            .get(format!("{}/users", site.base))
            .header("authorization", token.as_str())
            .header("cookie", format!("session_id={token}"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 403);

        site.stop().await;
    }

    #[test]
    fn hashes_depend_on_salt_and_pepper() {
        let base = hash_password("", "s1", "pw");
        assert_eq!(base.len(), 64);
        assert_eq!(base, hash_password("", "s1", "pw"));
        assert_ne!(base, hash_password("", "s2", "pw"));
        assert_ne!(base, hash_password("site", "s1", "pw"));
        assert_ne!(random_token(), random_token());
    }

    #[tokio::test]
    async fn comments_are_stored_and_listed() {
        let site = start(PathBuf::from(STATIC_DIR)).await;
        let client = reqwest::Client::new();

        let res = post(&client, format!("{}/test/comments", site.base), json!({ "text": "hi" })).await;
        assert_eq!(res.status().as_u16(), 201);
        let res = post(&client, format!("{}/test/comments", site.base), json!({ "nope": 1 })).await;
        assert_eq!(res.status().as_u16(), 400);

        let res = client.get(format!("{}/test/comments", site.base)).send().await.unwrap();
        let listed: Value = serde_json::from_str(&res.text().await.unwrap()).unwrap();
        assert_eq!(listed, json!([{ "author": "anonymous", "text": "hi" }]));

        site.stop().await;
    }

    #[tokio::test]
    async fn static_files_are_served_from_the_root() {
        let root = std::env::temp_dir().join(format!("strata-static-{}", random_token()));
        std::fs::create_dir_all(root.join("css")).unwrap();
        std::fs::write(root.join("css/site.css"), "body{}").unwrap();
        let site = start(root.clone()).await;
        let client = reqwest::Client::new();

        let res = client.get(format!("{}/static/css/site.css", site.base)).send().await.unwrap();
        assert_eq!(res.status().as_u16(), 200);
        assert_eq!(res.headers()["content-type"], "text/css; charset=utf-8");
        assert_eq!(res.text().await.unwrap(), "body{}");

        let res = client.get(format!("{}/static/missing.js", site.base)).send().await.unwrap();
        assert_eq!(res.status().as_u16(), 404);

        site.stop().await;
        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn resolve_stays_under_the_root() {
        let root = Path::new("/srv/static");
        assert_eq!(resolve(root, "css/site.css"), Some(root.join("css/site.css")));
        assert_eq!(resolve(root, "../secret"), None);
        assert_eq!(resolve(root, "css/../../secret"), None);
        assert_eq!(resolve(root, "/etc/passwd"), None);
        assert_eq!(resolve(root, ""), None);
    }
}
