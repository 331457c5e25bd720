use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, Request, Response},
    middleware::Next,
};

// The only HTML served is the static authorization code page: no scripts,
// no frames, nothing loaded from elsewhere.
const CSP: &str = "default-src 'none'; style-src 'unsafe-inline'; base-uri 'none'; form-action 'none'; frame-ancestors 'none'";

/// Adds the Content-Security-Policy and related headers to every response.
/// Headers already set by a handler are left alone.
pub async fn csp_middleware(req: Request<Body>, next: Next) -> Response<Body> {
    let mut res = next.run(req).await;

    let defaults: [(HeaderName, &'static str); 5] = [
        (header::CONTENT_SECURITY_POLICY, CSP),
        (header::REFERRER_POLICY, "no-referrer"),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        (header::X_FRAME_OPTIONS, "DENY"),
        // Pages may carry a one-time authorization code.
        (header::CACHE_CONTROL, "no-store"),
    ];

    let headers = res.headers_mut();
    for (name, value) in defaults {
        if !headers.contains_key(&name) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn security_headers_are_added_without_overriding() {
        let app: Router = Router::new()
            .route("/", get(|| async { "ok" }))
            .route(
                "/cached",
                get(|| async { ([(header::CACHE_CONTROL, "max-age=60")], "ok") }),
            )
            .layer(axum::middleware::from_fn(csp_middleware));

        let res = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.headers()[header::CONTENT_SECURITY_POLICY], CSP);
        assert_eq!(res.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(res.headers()[header::CACHE_CONTROL], "no-store");

        let res = app
            .oneshot(Request::get("/cached").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.headers()[header::CACHE_CONTROL], "max-age=60");
        assert_eq!(res.headers()[header::X_FRAME_OPTIONS], "DENY");
    }
}
