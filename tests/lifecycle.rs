//! Session lease accounting under concurrency and injected faults, driving
//! composed handlers directly.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use strata::middleware::{self, Chain};
use strata::{
    BoxedHandler, Error, Level, Logger, MemoryLogger, MemoryPool, Middleware, Pool, Request,
    Response, StatusCode,
};

fn get(uri: &str) -> Request {
    Request::from(http::Request::get(uri).body(Bytes::new()).unwrap())
}

/// Panics for `n % 3 == 0`, fails for `n % 3 == 1`, succeeds otherwise.
async fn flaky(req: Request) -> Result<Response, Error> {
    let n: u32 = req
        .query()
        .and_then(|q| q.strip_prefix("n="))
        .and_then(|n| n.parse().ok())
        .unwrap_or_default();
    let db = req.session().ok_or_else(|| Error::handler("no session"))?;
    db.insert("hits", serde_json::json!({ "n": n })).await?;
    tokio::task::yield_now().await;
    match n % 3 {
        0 => panic!("injected fault {n}"),
        1 => Err(Error::handler(format!("injected error {n}"))),
        _ => Ok(Response::text(n.to_string())),
    }
}

fn stack(pool: &MemoryPool, log: &MemoryLogger) -> BoxedHandler {
    let pool: Arc<dyn Pool> = Arc::new(pool.clone());
    let log: Arc<dyn Logger> = Arc::new(log.clone());
    Chain::new()
        .with(middleware::logging(log.clone()))
        .with(middleware::recovery(log))
        .with(middleware::db_session(pool))
        .then(flaky)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_lease_is_released_under_concurrent_faults() {
    const N: u32 = 60;
    let pool = MemoryPool::new(4);
    let log = MemoryLogger::new();
    let app = stack(&pool, &log);

    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..N {
        let app = app.clone();
        tasks.spawn(async move { (n, app.call(get(&format!("/work?n={n}"))).await) });
    }

    let mut ok = 0;
    while let Some(joined) = tasks.join_next().await {
        let (n, res) = joined.unwrap();
        let res = res.unwrap();
        if n % 3 == 2 {
            assert_eq!(res.status_code(), StatusCode::OK);
            assert_eq!(res.body(), n.to_string().as_bytes());
            ok += 1;
        } else {
            assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(res.body(), b"Internal Server Error");
        }
    }

    assert_eq!(ok, N / 3);
    assert_eq!(pool.checkouts(), N as usize);
    assert_eq!(pool.releases(), N as usize);
    assert_eq!(pool.in_use(), 0);

    let fatal = log.at(Level::Fatal);
    assert_eq!(fatal.len(), (2 * N / 3) as usize);
    assert_eq!(fatal.iter().filter(|l| l.starts_with("Error: injected fault")).count(), 20);
    let errors = fatal
        .iter()
        .filter(|l| l.starts_with("Error: handler failed\n  caused by: injected error"))
        .count();
    assert_eq!(errors, 20);
    assert_eq!(log.at(Level::Info).len(), N as usize);
}

#[tokio::test]
async fn exhausted_pool_becomes_a_500() {
    let pool = MemoryPool::with_timeout(1, Duration::from_millis(20));
    let log = MemoryLogger::new();
    let app = stack(&pool, &log);

    let held = pool.checkout().await.unwrap();
    let res = app.call(get("/work?n=2")).await.unwrap();
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

    let fatal = log.at(Level::Fatal);
    assert_eq!(fatal.len(), 1);
    assert!(fatal[0].starts_with("Error: database pool failure\n  caused by: no session"), "{}", fatal[0]);

    drop(held);
    let res = app.call(get("/work?n=2")).await.unwrap();
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test]
async fn sessions_are_not_shared_between_requests() {
    let pool = MemoryPool::new(2);
    let seen = MemoryLogger::new();
    let record = {
        let seen = seen.clone();
        move |req: Request| {
            let seen = seen.clone();
            async move {
                seen.info(&format!("{:?}", req.session().is_some()));
                tokio::time::sleep(Duration::from_millis(10)).await;
                Response::text("done")
            }
        }
    };
    let layers: Vec<Box<dyn Middleware>> =
        vec![Box::new(middleware::db_session(Arc::new(pool.clone())))];
    let app = middleware::chain(record, layers);

    let (a, b) = tokio::join!(app.call(get("/a")), app.call(get("/b")));
    assert_eq!(a.unwrap().body(), b"done");
    assert_eq!(b.unwrap().body(), b"done");

    assert_eq!(seen.at(Level::Info), vec!["true", "true"]);
    assert_eq!(pool.checkouts(), 2);
    assert_eq!(pool.releases(), 2);
}
