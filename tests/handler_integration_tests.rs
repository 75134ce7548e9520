mod common;

use axum::http::{Method, StatusCode, header};
use blog_server::{
    models::PageType,
    request::RequestContext,
    response::View,
};
use chrono::{DateTime, Utc};
use common::*;
use std::collections::HashMap;

const T_POST: i64 = 1_500_000_000;
const T_MENU: i64 = 1_550_000_000;
const T_TEMPLATE: u64 = 1_600_000_000;

fn post_path(published: i64, name: &str) -> String {
    let published = DateTime::<Utc>::from_timestamp(published, 0).unwrap();
    format!("{}{name}", published.format("/%Y/%m/"))
}

// --- Conditional GET ---

#[tokio::test]
async fn last_modified_is_the_newest_of_page_template_and_menu() {
    let blog = test_blog().await;
    blog.add_page(PageType::Post, "first-post", "First", T_POST, T_POST - 1000).await;
    blog.add_page(PageType::Static, "about", "About", T_MENU, T_MENU - 1000).await;
    blog.touch("blogindex.html", T_TEMPLATE, 500_000_000);

    let response = blog.send(get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::LAST_MODIFIED],
        http_date(T_TEMPLATE).as_str()
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "max-age=60,s-maxage=5");
    assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");

    let body = body_text(response).await;
    assert!(body.contains("<h2>First</h2>"), "{body}");
    assert!(body.contains("<nav>About</nav>"), "{body}");
}

#[tokio::test]
async fn menu_freshness_counts_when_it_is_newest() {
    let blog = test_blog().await;
    blog.add_page(PageType::Post, "first-post", "First", T_POST, T_POST).await;
    let newest = 1_700_000_000;
    blog.add_page(PageType::Static, "about", "About", newest, newest - 5).await;

    let response = blog.send(get("/")).await;
    assert_eq!(
        response.headers()[header::LAST_MODIFIED],
        http_date(newest as u64).as_str()
    );
}

#[tokio::test]
async fn matching_if_modified_since_yields_304_with_cache_headers() {
    let blog = test_blog().await;
    blog.add_page(PageType::Post, "first-post", "First", T_POST, T_POST).await;
    let last_modified = http_date(T_POST as u64);

    for _ in 0..2 {
        let request = request(Method::GET, "/")
            .header(header::IF_MODIFIED_SINCE, &last_modified)
            .body(axum::body::Body::empty())
            .unwrap();
        let response = blog.send(request).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "max-age=60,s-maxage=5");
        assert!(body_text(response).await.is_empty());
    }
}

#[tokio::test]
async fn stale_or_legacy_if_modified_since_gets_the_full_page() {
    let blog = test_blog().await;
    blog.add_page(PageType::Post, "first-post", "First", T_POST, T_POST).await;

    for since in [
        http_date(T_POST as u64 - 1),
        "Friday, 14-Jul-17 02:40:00 GMT".to_string(),
        "garbage".to_string(),
    ] {
        let request = request(Method::GET, "/")
            .header(header::IF_MODIFIED_SINCE, since.as_str())
            .body(axum::body::Body::empty())
            .unwrap();
        let response = blog.send(request).await;
        assert_eq!(response.status(), StatusCode::OK, "{since}");
    }
}

#[tokio::test]
async fn error_status_is_never_reduced_to_304() {
    let blog = test_blog().await;
    let tracked = DateTime::<Utc>::from_timestamp(T_POST, 0).unwrap();

    let mut headers = axum::http::HeaderMap::new();
    headers.insert(header::HOST, HOST.parse().unwrap());
    headers.insert(
        header::IF_MODIFIED_SINCE,
        http_date(TEMPLATE_TIME.max(T_POST as u64)).parse().unwrap(),
    );
    let req = RequestContext {
        method: Method::GET,
        uri: "/gone".parse().unwrap(),
        headers,
        form: HashMap::new(),
    };

    let response = View::new(&blog.state)
        .unwrap()
        .template("404")
        .status(StatusCode::NOT_FOUND)
        .with("url", "/gone")
        .output(&blog.state, &req, Some(tracked))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().contains_key(header::LAST_MODIFIED));
    assert!(body_text(response).await.starts_with("not found"));
}

#[tokio::test]
async fn untracked_views_send_no_freshness_headers() {
    let blog = test_blog().await;
    let response = blog.send(get("/no/such/page")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!response.headers().contains_key(header::LAST_MODIFIED));
    assert!(!response.headers().contains_key(header::CACHE_CONTROL));
    assert!(body_text(response).await.starts_with("not found"));
}

#[tokio::test]
async fn head_sends_headers_without_body() {
    let blog = test_blog().await;
    blog.add_page(PageType::Post, "first-post", "First", T_POST, T_POST).await;

    let request = request(Method::HEAD, "/").body(axum::body::Body::empty()).unwrap();
    let response = blog.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::LAST_MODIFIED));
    let length: usize = response.headers()[header::CONTENT_LENGTH]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(length > 0);
    assert!(body_text(response).await.is_empty());
}

// --- Routing ---

#[tokio::test]
async fn missing_trailing_slash_redirects_permanently() {
    let blog = test_blog().await;

    let response = blog.send(get("/archive")).await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()[header::LOCATION], "/archive/");

    let response = blog.send(get("/admin?next=1")).await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()[header::LOCATION], "/admin/?next=1");
}

#[tokio::test]
async fn posts_and_static_pages_live_at_their_own_urls() {
    let blog = test_blog().await;
    blog.add_page(PageType::Post, "first-post", "First", T_POST, T_POST).await;
    blog.add_page(PageType::Static, "about", "About", T_MENU, T_MENU).await;
    blog.add_page(PageType::Post, "draft", "Draft", 0, T_POST).await;

    let path = post_path(T_POST, "first-post");
    let response = blog.send(get(&path)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("<h1>First</h1>"), "{body}");
    assert!(body.contains("<em>First</em>"), "{body}");

    let response = blog.send(get("/about")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("<h1>About</h1>"));

    assert_eq!(blog.send(get("/first-post")).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(blog.send(get("/1999/01/first-post")).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(blog.send(get("/draft")).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(blog.send(get("/nobody")).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn archive_and_feed_list_published_posts() {
    let blog = test_blog().await;
    blog.add_page(PageType::Post, "older", "Older", T_POST - 100, T_POST - 100).await;
    blog.add_page(PageType::Post, "newer", "Newer", T_POST, T_POST).await;
    blog.add_page(PageType::Post, "draft", "Draft", 0, T_POST).await;

    let body = body_text(blog.send(get("/archive/")).await).await;
    let newer = body.find("Newer").unwrap();
    let older = body.find("Older").unwrap();
    assert!(newer < older, "{body}");
    assert!(!body.contains("Draft"));

    let response = blog.send(get("/feed.xml")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/atom+xml; charset=utf-8"
    );
    let body = body_text(response).await;
    assert_eq!(body.matches("<entry>").count(), 2);
    assert!(body.contains("<updated>2017-07-14T02:40:00Z</updated>"), "{body}");
}

#[tokio::test]
async fn the_blog_can_be_mounted_under_a_prefix() {
    let blog = test_blog_with(|config| config.url_prefix = "/blog".into()).await;

    assert_eq!(blog.send(get("/blog/")).await.status(), StatusCode::OK);
    assert_eq!(blog.send(get("/")).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(blog.send(get("/archive/")).await.status(), StatusCode::NOT_FOUND);

    let response = blog.send(get("/blog/archive")).await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()[header::LOCATION], "/blog/archive/");
}

// --- CSRF ---

#[tokio::test]
async fn unprotected_post_is_forbidden_before_any_handler_runs() {
    let blog = test_blog().await;
    blog.add_user(EMAIL, "Ayke", PASSWORD).await;
    let session = blog.session_cookie(EMAIL);

    let request = post_form(
        "/admin/edit/newpost",
        &[("name", "sneaky"), ("title", "Sneaky")],
        &[(header::COOKIE, session.as_str())],
    );
    let response = blog.send(request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(blog.page_count().await, 0);

    let response = blog
        .send(post_form("/no/such/route", &[], &[(header::ORIGIN, "http://evil.example")]))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn double_submitted_token_lets_a_post_through() {
    let blog = test_blog().await;
    blog.add_user(EMAIL, "Ayke", PASSWORD).await;
    let token = "a".repeat(40);
    let cookies = format!("{}; csrftoken={token}", blog.session_cookie(EMAIL));

    let request = post_form(
        "/admin/edit/newpost",
        &[("csrftoken", token.as_str()), ("name", "hello"), ("title", "Hello")],
        &[(header::COOKIE, cookies.as_str())],
    );
    let response = blog.send(request).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(blog.page_count().await, 1);
}

#[tokio::test]
async fn short_double_submitted_token_is_rejected() {
    let blog = test_blog().await;
    let cookies = "csrftoken=short";
    let request = post_form(
        "/admin/edit/newpost",
        &[("csrftoken", "short")],
        &[(header::COOKIE, cookies)],
    );
    assert_eq!(blog.send(request).await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn oversized_form_bodies_are_refused_with_413() {
    let blog = test_blog().await;
    let text = "x".repeat(2 * 1024 * 1024);
    let request = post_form(
        "/admin/edit/newpost",
        &[("text", text.as_str())],
        &[(header::ORIGIN, ORIGIN)],
    );
    assert_eq!(blog.send(request).await.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(blog.page_count().await, 0);
}

// --- Assets ---

#[tokio::test]
async fn assets_are_served_compressed_with_conditional_get() {
    let blog = test_blog().await;
    let mtime = 1_450_000_000;
    blog.touch("common.js", mtime, 250_000_000);

    let response = blog.send(get("/assets/common.js")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "max-age=3600,s-maxage=5");
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/javascript; charset=utf-8"
    );
    assert_eq!(response.headers()[header::LAST_MODIFIED], http_date(mtime).as_str());
    assert_eq!(body_text(response).await, "console.log('hello');\n");

    let request = request(Method::GET, "/assets/common.js")
        .header(header::IF_MODIFIED_SINCE, http_date(mtime))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = blog.send(request).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "max-age=3600,s-maxage=5");

    let response = blog.send(get("/assets/style.css")).await;
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css; charset=utf-8");

    assert_eq!(blog.send(get("/assets/notes.txt")).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(blog.send(get("/assets/missing.js")).await.status(), StatusCode::NOT_FOUND);
}

// --- Ambient layers ---

#[tokio::test]
async fn hsts_is_sent_only_for_secure_deployments() {
    let blog = test_blog().await;
    let response = blog.send(get("/")).await;
    assert!(!response.headers().contains_key(header::STRICT_TRANSPORT_SECURITY));
    assert!(response.headers().contains_key("x-request-id"));

    let blog = test_blog_with(|config| config.secure = true).await;
    let response = blog.send(get("/")).await;
    assert_eq!(
        response.headers()[header::STRICT_TRANSPORT_SECURITY],
        "max-age=15552000"
    );
}
