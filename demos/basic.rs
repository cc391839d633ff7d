//! Minimal tollgate example: a public login endpoint handing out tokens and
//! a JWT-protected group of user endpoints.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic [config.toml]
//!
//! Try:
//!   TOKEN=$(curl -s -X POST http://localhost:8888/login -d alice)
//!   curl http://localhost:8888/api/users/me -H "authorization: Bearer $TOKEN"
//!   curl http://localhost:8888/api/users/42?access_token=$TOKEN
//!   curl -i http://localhost:8888/api/users/42          # 401
//!   curl -i http://localhost:8888/nowhere               # custom 404

use std::path::Path;

use tollgate::auth::AuthError;
use tollgate::auth::token::{encode, Claims};
use tollgate::middleware::{from_fn, Next};
use tollgate::route::{with_jwt_transition, with_prefix, with_priority};
use tollgate::server::{with_not_found_handler, with_unauthorized_callback};
use tollgate::{Request, Response, RestConf, Route, Server, StatusCode};

const SECRET: &str = "current-demo-secret";
const PREV_SECRET: &str = "previous-demo-secret";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let conf = match std::env::args().nth(1) {
        Some(path) => RestConf::load(Path::new(&path)).expect("config error"),
        None => RestConf { name: "basic".into(), ..RestConf::default() },
    };

    let mut server = Server::must_new(
        conf,
        [
            with_not_found_handler(|req: Request| async move {
                Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .json(format!(r#"{{"error":"no route for {}"}}"#, req.path()))
            }),
            with_unauthorized_callback(|_req: &Request, err: &AuthError| {
                Response::builder()
                    .status(StatusCode::UNAUTHORIZED)
                    .json(format!(r#"{{"error":"{err}"}}"#))
            }),
        ],
    );

    server.use_middleware(from_fn(|req: Request, next: Next| async move {
        let user = req.claims().and_then(|c| c.subject()).unwrap_or("-").to_owned();
        let res = next.run(req).await;
        tracing::info!(%user, status = %res.status_code(), "handled");
        res
    }));

    server.must_add_routes(vec![Route::post("/login", login)], []);
    server.must_add_routes(
        vec![Route::get("/users/{id}", get_user)],
        [with_prefix("/api"), with_jwt_transition(SECRET, PREV_SECRET)],
    );
    server.must_add_routes(
        vec![Route::get("/users/me", me)],
        [with_prefix("/api"), with_priority(), with_jwt_transition(SECRET, PREV_SECRET)],
    );

    server.start().await;
}

// POST /login with the user name as body
async fn login(req: Request) -> Response {
    let name = String::from_utf8_lossy(req.body()).trim().to_owned();
    if name.is_empty() {
        return Response::status(StatusCode::BAD_REQUEST);
    }
    let claims = Claims::new().with("sub", name);
    match encode(&claims, SECRET.as_bytes()) {
        Ok(token) => Response::text(token),
        Err(_) => Response::status(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// GET /api/users/{id}
async fn get_user(req: Request) -> Response {
    let id = req.param("id").unwrap_or("unknown");
    Response::json(format!(r#"{{"id":"{id}"}}"#))
}

// GET /api/users/me
async fn me(req: Request) -> Response {
    let name = req.claims().and_then(|c| c.subject()).unwrap_or("unknown");
    Response::json(format!(r#"{{"name":"{name}"}}"#))
}
