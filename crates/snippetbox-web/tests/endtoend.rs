use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::{Extension, Router};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use regex::Regex;
use tempfile::TempDir;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;

use snippetbox_db::Database;
use snippetbox_web::session::Session;
use snippetbox_web::{AppStateInner, middleware, router};

/// Drives the full router through `oneshot`, carrying cookies between
/// requests like a browser would.
struct TestApp {
    _dir: TempDir,
    db: Database,
    app: Router,
    cookies: HashMap<String, String>,
}

impl TestApp {
    fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let db = Database::open(&dir.path().join("test.db")).expect("open database");
        let state = Arc::new(AppStateInner { db: db.clone() });
        let app = router(state, &dir.path().join("static"));
        Self {
            _dir: dir,
            db,
            app,
            cookies: HashMap::new(),
        }
    }

    async fn request(
        &mut self,
        method: &str,
        path: &str,
        form: Option<&[(&str, &str)]>,
    ) -> (StatusCode, HeaderMap, String) {
        let mut builder = Request::builder().method(method).uri(path);

        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(header::COOKIE, cookie);
        }

        let body = match form {
            Some(fields) => {
                builder = builder.header(
                    header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                );
                Body::from(serde_urlencoded::to_string(fields).unwrap())
            }
            None => Body::empty(),
        };

        let res = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = res.status();
        let headers = res.headers().clone();

        for value in headers.get_all(header::SET_COOKIE) {
            if let Some((name, rest)) = value.to_str().unwrap_or("").split_once('=') {
                let value = rest.split(';').next().unwrap_or("").to_string();
                self.cookies.insert(name.to_string(), value);
            }
        }

        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn get(&mut self, path: &str) -> (StatusCode, HeaderMap, String) {
        self.request("GET", path, None).await
    }

    async fn post_form(
        &mut self,
        path: &str,
        form: &[(&str, &str)],
    ) -> (StatusCode, HeaderMap, String) {
        self.request("POST", path, Some(form)).await
    }

    /// Visit a page with a form on it and pull out its CSRF token.
    async fn csrf_token_from(&mut self, path: &str) -> String {
        let (status, _, body) = self.get(path).await;
        assert_eq!(status, StatusCode::OK);
        extract_csrf_token(&body)
    }

    async fn signup(&mut self, name: &str, email: &str, password: &str) {
        let token = self.csrf_token_from("/user/signup").await;
        let (status, _, _) = self
            .post_form(
                "/user/signup",
                &[
                    ("name", name),
                    ("email", email),
                    ("password", password),
                    ("csrf_token", &token),
                ],
            )
            .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
    }

    async fn login(&mut self, email: &str, password: &str) -> (StatusCode, HeaderMap, String) {
        let token = self.csrf_token_from("/user/login").await;
        self.post_form(
            "/user/login",
            &[
                ("email", email),
                ("password", password),
                ("csrf_token", &token),
            ],
        )
        .await
    }
}

fn extract_csrf_token(body: &str) -> String {
    let rx = Regex::new(r"name='csrf_token' value='([^']+)'").unwrap();
    rx.captures(body)
        .expect("no csrf token found in body")
        .get(1)
        .unwrap()
        .as_str()
        .to_string()
}

fn location(headers: &HeaderMap) -> &str {
    headers
        .get(header::LOCATION)
        .expect("missing Location header")
        .to_str()
        .unwrap()
}

#[tokio::test]
async fn ping_returns_ok() {
    let mut app = TestApp::new();

    let (status, _, body) = app.get("/ping").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn security_headers_are_set_on_every_response() {
    let mut app = TestApp::new();

    let (_, headers, _) = app.get("/").await;

    assert_eq!(
        headers.get(header::X_FRAME_OPTIONS).unwrap(),
        "deny"
    );
    assert_eq!(
        headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(),
        "nosniff"
    );
    assert_eq!(headers.get(header::X_XSS_PROTECTION).unwrap(), "0");
    assert!(headers.contains_key(header::CONTENT_SECURITY_POLICY));
    assert!(headers.contains_key(header::REFERRER_POLICY));

    // The fallback is wrapped by the same chain.
    let (status, headers, _) = app.get("/no/such/route").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(headers.get(header::X_FRAME_OPTIONS).unwrap(), "deny");
}

#[tokio::test]
async fn home_lists_latest_snippets() {
    let mut app = TestApp::new();
    app.db
        .insert_snippet("An old silent pond...", "A frog jumps in", 7)
        .unwrap();

    let (status, _, body) = app.get("/").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("An old silent pond..."));
}

#[tokio::test]
async fn snippet_view_found_and_not_found() {
    let mut app = TestApp::new();
    let id = app
        .db
        .insert_snippet("An old silent pond...", "A frog jumps in", 7)
        .unwrap();

    let (status, _, body) = app.get(&format!("/snippet/view/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("An old silent pond..."));

    // Unknown, malformed or empty ids are all a uniform 404.
    for path in [
        "/snippet/view/99",
        "/snippet/view/-1",
        "/snippet/view/1.2",
        "/snippet/view/bar",
        "/snippet/view/",
    ] {
        let (status, _, _) = app.get(path).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn expired_snippet_is_not_found() {
    let mut app = TestApp::new();
    let id = app.db.insert_snippet("ephemeral", "gone", 0).unwrap();

    let (status, _, _) = app.get(&format!("/snippet/view/{id}")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unauthenticated_create_redirects_to_login() {
    let mut app = TestApp::new();

    let (status, headers, _) = app.get("/snippet/create").await;

    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location(&headers), "/user/login");
}

#[tokio::test]
async fn signup_validation_matrix() {
    let mut app = TestApp::new();
    app.db
        .insert_user("Taken", "dupe@example.com", "pa$$word9")
        .unwrap();

    let valid_token = app.csrf_token_from("/user/signup").await;
    let form_tag = "<form action='/user/signup' method='POST' novalidate>";

    let cases: &[(&str, &str, &str, &str, StatusCode)] = &[
        ("Bob", "bob@example.com", "validPa$$word", &valid_token, StatusCode::SEE_OTHER),
        ("Bob", "bob2@example.com", "validPa$$word", "wrongToken", StatusCode::BAD_REQUEST),
        ("Bob", "", "validPa$$word", &valid_token, StatusCode::UNPROCESSABLE_ENTITY),
        ("Bob", "bob3@example.com", "", &valid_token, StatusCode::UNPROCESSABLE_ENTITY),
        ("Bob", "bob@example.", "validPa$$word", &valid_token, StatusCode::UNPROCESSABLE_ENTITY),
        ("Bob", "bob4@example.com", "pa$$", &valid_token, StatusCode::UNPROCESSABLE_ENTITY),
        ("Bob", "dupe@example.com", "validPa$$word", &valid_token, StatusCode::UNPROCESSABLE_ENTITY),
    ];

    for (name, email, password, token, want) in cases {
        let (status, headers, body) = app
            .post_form(
                "/user/signup",
                &[
                    ("name", name),
                    ("email", email),
                    ("password", password),
                    ("csrf_token", token),
                ],
            )
            .await;

        assert_eq!(status, *want, "signup as {email:?}");
        match *want {
            StatusCode::SEE_OTHER => assert_eq!(location(&headers), "/user/login"),
            StatusCode::UNPROCESSABLE_ENTITY => {
                // Re-rendered form with the entered name preserved.
                assert!(body.contains(form_tag));
                assert!(body.contains("Bob"));
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn duplicate_email_shows_field_error() {
    let mut app = TestApp::new();
    app.db
        .insert_user("Taken", "dupe@example.com", "pa$$word9")
        .unwrap();

    let token = app.csrf_token_from("/user/signup").await;
    let (status, _, body) = app
        .post_form(
            "/user/signup",
            &[
                ("name", "Bob"),
                ("email", "dupe@example.com"),
                ("password", "validPa$$word"),
                ("csrf_token", &token),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body.contains("Email address is already in use"));
}

#[tokio::test]
async fn login_rejects_bad_credentials_uniformly() {
    let mut app = TestApp::new();
    app.signup("Alice", "alice@example.com", "pa$$word9").await;

    for (email, password) in [
        ("alice@example.com", "wrong-password"),
        ("nobody@example.com", "pa$$word9"),
    ] {
        let (status, _, body) = app.login(email, password).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body.contains("Email or password is incorrect"));
    }
}

#[tokio::test]
async fn login_then_create_snippet_flow() {
    let mut app = TestApp::new();
    app.signup("Alice", "alice@example.com", "pa$$word9").await;

    let (status, headers, _) = app.login("alice@example.com", "pa$$word9").await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location(&headers), "/snippet/create");

    let (status, headers, body) = app.get("/snippet/create").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<form action='/snippet/create' method='POST'>"));
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");

    let token = extract_csrf_token(&body);
    let (status, headers, _) = app
        .post_form(
            "/snippet/create",
            &[
                ("title", "An old silent pond..."),
                ("content", "A frog jumps in"),
                ("expires", "7"),
                ("csrf_token", &token),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    let target = location(&headers).to_string();
    assert!(target.starts_with("/snippet/view/"));

    // The flash shows exactly once after the redirect.
    let (status, _, body) = app.get(&target).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Snippet created successfully!"));

    let (_, _, body) = app.get(&target).await;
    assert!(!body.contains("Snippet created successfully!"));
}

#[tokio::test]
async fn create_snippet_validation_failure_rerenders() {
    let mut app = TestApp::new();
    app.signup("Alice", "alice@example.com", "pa$$word9").await;
    app.login("alice@example.com", "pa$$word9").await;

    let token = app.csrf_token_from("/snippet/create").await;
    let (status, _, body) = app
        .post_form(
            "/snippet/create",
            &[
                ("title", ""),
                ("content", "still here"),
                ("expires", "3"),
                ("csrf_token", &token),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body.contains("This field cannot be blank"));
    assert!(body.contains("This field must equal 1, 7 or 365"));
    // The submitted content is preserved in the re-rendered form.
    assert!(body.contains("still here"));
}

#[tokio::test]
async fn login_follows_remembered_redirect_path() {
    let mut app = TestApp::new();
    app.signup("Alice", "alice@example.com", "pa$$word9").await;

    // The denied request records its path in the session.
    let (status, _, _) = app.get("/account/view").await;
    assert_eq!(status, StatusCode::SEE_OTHER);

    let (status, headers, _) = app.login("alice@example.com", "pa$$word9").await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location(&headers), "/account/view");
}

#[tokio::test]
async fn login_renews_session_token() {
    let mut app = TestApp::new();
    app.signup("Alice", "alice@example.com", "pa$$word9").await;

    app.get("/").await;
    let before = app.cookies.get("session").cloned().unwrap();

    app.login("alice@example.com", "pa$$word9").await;
    let after = app.cookies.get("session").cloned().unwrap();

    assert_ne!(before, after);
}

#[tokio::test]
async fn csrf_is_required_on_state_changing_routes() {
    let mut app = TestApp::new();
    app.signup("Alice", "alice@example.com", "pa$$word9").await;

    // Establish a session, then post without any token.
    app.get("/user/login").await;
    let (status, _, _) = app
        .post_form(
            "/user/login",
            &[("email", "alice@example.com"), ("password", "pa$$word9")],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A forged token fails the same way, even with valid credentials.
    let (status, _, _) = app
        .post_form(
            "/user/login",
            &[
                ("email", "alice@example.com"),
                ("password", "pa$$word9"),
                ("csrf_token", "forged"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn logout_clears_authentication() {
    let mut app = TestApp::new();
    app.signup("Alice", "alice@example.com", "pa$$word9").await;
    app.login("alice@example.com", "pa$$word9").await;

    let (_, _, body) = app.get("/snippet/create").await;
    let token = extract_csrf_token(&body);

    let (status, headers, _) = app
        .post_form("/user/logout", &[("csrf_token", &token)])
        .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location(&headers), "/");

    let (status, headers, _) = app.get("/snippet/create").await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location(&headers), "/user/login");
}

#[tokio::test]
async fn account_view_shows_profile_without_hash() {
    let mut app = TestApp::new();
    app.signup("Alice", "alice@example.com", "pa$$word9").await;
    app.login("alice@example.com", "pa$$word9").await;

    let (status, _, body) = app.get("/account/view").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Alice"));
    assert!(body.contains("alice@example.com"));
    assert!(!body.contains("argon2"));
}

#[tokio::test]
async fn password_update_flow() {
    let mut app = TestApp::new();
    app.signup("Alice", "alice@example.com", "pa$$word9").await;
    app.login("alice@example.com", "pa$$word9").await;

    // Wrong current password re-renders with a field error.
    let token = app.csrf_token_from("/account/password/update").await;
    let (status, _, body) = app
        .post_form(
            "/account/password/update",
            &[
                ("current_password", "not-right"),
                ("new_password", "newPa$$word"),
                ("new_password_confirmation", "newPa$$word"),
                ("csrf_token", &token),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body.contains("Current password is incorrect"));

    // Mismatched confirmation is a validation failure.
    let token = app.csrf_token_from("/account/password/update").await;
    let (status, _, body) = app
        .post_form(
            "/account/password/update",
            &[
                ("current_password", "pa$$word9"),
                ("new_password", "newPa$$word"),
                ("new_password_confirmation", "different"),
                ("csrf_token", &token),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body.contains("Passwords must match"));

    // The real thing.
    let token = app.csrf_token_from("/account/password/update").await;
    let (status, headers, _) = app
        .post_form(
            "/account/password/update",
            &[
                ("current_password", "pa$$word9"),
                ("new_password", "newPa$$word"),
                ("new_password_confirmation", "newPa$$word"),
                ("csrf_token", &token),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location(&headers), "/account/view");

    assert!(
        app.db
            .authenticate_user("alice@example.com", "newPa$$word")
            .is_ok()
    );
}

#[tokio::test]
async fn malformed_form_body_is_bad_request() {
    let mut app = TestApp::new();
    app.signup("Alice", "alice@example.com", "pa$$word9").await;
    app.login("alice@example.com", "pa$$word9").await;

    let token = app.csrf_token_from("/snippet/create").await;
    let (status, _, _) = app
        .post_form(
            "/snippet/create",
            &[
                ("title", "t"),
                ("content", "c"),
                ("expires", "not-a-number"),
                ("csrf_token", &token),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Session middleware plus panic recovery around a single route, for
/// exercising the save-on-panic paths directly.
fn session_panic_router(db: &Database, route: axum::routing::MethodRouter) -> Router {
    let state = std::sync::Arc::new(AppStateInner { db: db.clone() });
    Router::new()
        .route("/boom", route)
        .layer(from_fn_with_state(state, middleware::load_and_save_session))
        .layer(CatchPanicLayer::custom(middleware::handle_panic))
}

#[tokio::test]
async fn session_data_survives_a_panicking_handler() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("test.db")).unwrap();
    db.save_session(
        "tok-known",
        r#"{"csrf_token":"abc"}"#,
        Utc::now() + Duration::hours(1),
    )
    .unwrap();

    let app = session_panic_router(
        &db,
        get(|Extension(session): Extension<Session>| async move {
            session.put_flash("saved before the panic");
            panic!("boom");
            #[allow(unreachable_code)]
            ""
        }),
    );

    let res = app
        .oneshot(
            Request::builder()
                .uri("/boom")
                .header(header::COOKIE, "session=tok-known")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // The client's token did not change, so the updated data was persisted
    // before the panic resumed.
    let data = db.load_session("tok-known").unwrap().unwrap();
    assert!(data.contains("saved before the panic"));
}

#[tokio::test]
async fn panic_after_token_renewal_keeps_the_presentable_row() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("test.db")).unwrap();
    db.save_session(
        "tok-old",
        r#"{"csrf_token":"abc"}"#,
        Utc::now() + Duration::hours(1),
    )
    .unwrap();

    let app = session_panic_router(
        &db,
        get(|Extension(session): Extension<Session>| async move {
            session.renew_token();
            panic!("boom");
            #[allow(unreachable_code)]
            ""
        }),
    );

    let res = app
        .oneshot(
            Request::builder()
                .uri("/boom")
                .header(header::COOKIE, "session=tok-old")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // The 500 carries no Set-Cookie, so the renewed token was abandoned and
    // the row the client can still present was left in place.
    assert!(!res.headers().contains_key(header::SET_COOKIE));
    assert!(db.load_session("tok-old").unwrap().is_some());
}

#[tokio::test]
async fn panic_on_first_visit_sets_no_cookie() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("test.db")).unwrap();

    let app = session_panic_router(
        &db,
        get(|| async {
            panic!("boom");
            #[allow(unreachable_code)]
            ""
        }),
    );

    let res = app
        .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!res.headers().contains_key(header::SET_COOKIE));
}

#[tokio::test]
async fn method_not_allowed_on_wrong_verb() {
    let mut app = TestApp::new();

    // TRACE is exempt from the CSRF check, so the router's method
    // matching is what answers here.
    let (status, _, _) = app.request("TRACE", "/about", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    // A state-changing verb on a read-only route is stopped by the
    // CSRF check before routing.
    let (status, _, _) = app.request("POST", "/about", Some(&[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
