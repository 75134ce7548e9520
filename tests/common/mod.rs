#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, Response, header},
};
use blog_server::{
    AppConfig, AppState, SqliteRepository, create_router,
    models::{Page, PageType},
    password,
    repository::{Repository, RepositoryState},
};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tempfile::TempDir;
use tower::ServiceExt;

/// `Host` matching the default canonical origin.
pub const HOST: &str = "localhost:3000";
pub const ORIGIN: &str = "http://localhost:3000";

/// Modification time given to every template file of the test skin.
pub const TEMPLATE_TIME: u64 = 1_300_000_000;

pub const EMAIL: &str = "ayke@example.com";
pub const PASSWORD: &str = "correct horse battery";

const TEMPLATES: &[(&str, &str)] = &[
    (
        "blogindex.html",
        "{% for post in posts %}<h2>{{ post.title }}</h2>{% endfor %}\
         {% for item in menu %}<nav>{{ item.title }}</nav>{% endfor %}",
    ),
    (
        "blogpost.html",
        "<h1>{{ page.title }}</h1>{{ page.text | markdown }}<p>{{ page.published | date }}</p>",
    ),
    ("page.html", "<h1>{{ page.title }}</h1>{{ page.text | markdown }}"),
    (
        "archive.html",
        "{% for post in posts %}<li><a href=\"{{ base }}{{ post.url }}\">{{ post.title }}</a></li>{% endfor %}",
    ),
    (
        "feed.xml",
        "<feed><updated>{{ updated | timestamp }}</updated>\
         {% for post in posts %}<entry><title>{{ post.title }}</title></entry>{% endfor %}</feed>",
    ),
    (
        "admin.html",
        "admin {{ user.name }} drafts={{ drafts | length }} published={{ published | length }} \
         static={{ menuUnpublished | length }} csrf={{ csrftoken }}",
    ),
    ("editpage.html", "edit [{{ page.title }}] csrf={{ csrftoken }}"),
    ("previewpage.html", "preview {{ page.title }}"),
    ("login.html", "login error=[{{ loginerror }}] csrf={{ csrftoken }}"),
    ("404.html", "not found {{ url }}"),
];

const SKIN_JSON: &str = r#"{
    "pages": {
        "blogindex": {"templates": ["blogindex.html"]},
        "blogpost": {"templates": ["blogpost.html"]},
        "page": {"templates": ["page.html"]},
        "archive": {"templates": ["archive.html"]},
        "feed": {"templates": ["feed.xml"]},
        "admin": {"templates": ["admin.html"]},
        "editpage": {"templates": ["editpage.html"]},
        "previewpage": {"templates": ["previewpage.html"]},
        "login": {"templates": ["login.html"]},
        "404": {"templates": ["404.html"]}
    },
    "extraCSS": ["style.css"]
}"#;

/// TestBlog
///
/// An app wired to an in-memory database and a throwaway skin directory.
pub struct TestBlog {
    pub state: AppState,
    pub repo: Arc<SqliteRepository>,
    pub pool: SqlitePool,
    pub dir: TempDir,
}

impl TestBlog {
    pub fn app(&self) -> Router {
        create_router(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app().oneshot(request).await.unwrap()
    }

    pub fn skin_dir(&self) -> PathBuf {
        self.dir.path().join("skins").join("base")
    }

    /// Sets the modification time of a skin file.
    pub fn touch(&self, file: &str, secs: u64, nanos: u32) {
        set_mtime(&self.skin_dir().join(file), secs, nanos);
    }

    pub async fn add_user(&self, email: &str, name: &str, password: &str) {
        let hash = password::hash_password(password).unwrap();
        self.repo.add_user(email, name, &hash).await.unwrap();
    }

    /// Inserts a page with fixed timestamps (Unix seconds; 0 = unset).
    pub async fn add_page(
        &self,
        page_type: PageType,
        name: &str,
        title: &str,
        published: i64,
        modified: i64,
    ) -> i64 {
        let mut page = Page::new(page_type);
        page.name = name.to_string();
        page.title = title.to_string();
        page.text = format!("Text of *{title}*.");
        self.repo.save_page(&mut page).await.unwrap();
        sqlx::query("UPDATE pages SET published = ?, modified = ? WHERE id = ?")
            .bind(published)
            .bind(modified)
            .bind(page.id)
            .execute(&self.pool)
            .await
            .unwrap();
        page.id
    }

    pub async fn page_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM pages")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    /// A valid session cookie header value for `email`.
    pub fn session_cookie(&self, email: &str) -> String {
        let token = self.state.sessions.issue(email).unwrap();
        format!("session={token}")
    }
}

pub async fn test_blog() -> TestBlog {
    test_blog_with(|_| {}).await
}

pub async fn test_blog_with(configure: impl FnOnce(&mut AppConfig)) -> TestBlog {
    let dir = tempfile::tempdir().unwrap();
    let skin = dir.path().join("skins").join("base");
    fs::create_dir_all(&skin).unwrap();
    fs::write(skin.join("skin.json"), SKIN_JSON).unwrap();
    for (file, contents) in TEMPLATES {
        fs::write(skin.join(file), contents).unwrap();
        set_mtime(&skin.join(file), TEMPLATE_TIME, 0);
    }
    fs::write(skin.join("common.js"), "console.log('hello');\n").unwrap();
    fs::write(skin.join("style.css"), "body { margin: 0 }\n").unwrap();
    fs::write(skin.join("notes.txt"), "not an asset\n").unwrap();

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let repo = Arc::new(SqliteRepository::new(pool.clone()));
    repo.install().await.unwrap();

    let mut config = AppConfig::default();
    config.blog_path = dir.path().to_path_buf();
    configure(&mut config);

    let state = AppState::new(repo.clone() as RepositoryState, config).unwrap();
    TestBlog {
        state,
        repo,
        pool,
        dir,
    }
}

pub fn set_mtime(path: &Path, secs: u64, nanos: u32) {
    let time = UNIX_EPOCH + Duration::new(secs, nanos);
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

pub fn http_date(secs: u64) -> String {
    let time: DateTime<Utc> = (UNIX_EPOCH + Duration::from_secs(secs)).into();
    blog_server::clock::http_date(time)
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// A request from a browser on the canonical host.
pub fn request(method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, HOST)
}

pub fn get(uri: &str) -> Request<Body> {
    request(Method::GET, uri).body(Body::empty()).unwrap()
}

/// A form POST. `extra` headers are added as given.
pub fn post_form(uri: &str, fields: &[(&str, &str)], extra: &[(header::HeaderName, &str)]) -> Request<Body> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish();
    let mut builder = request(Method::POST, uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    for (name, value) in extra {
        builder = builder.header(name.clone(), *value);
    }
    builder.body(Body::from(body)).unwrap()
}

/// Body as text, gunzipped when the response says so.
pub async fn body_text(response: Response<Body>) -> String {
    let gzipped = response
        .headers()
        .get(header::CONTENT_ENCODING)
        .is_some_and(|v| v == "gzip");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if !gzipped || bytes.is_empty() {
        return String::from_utf8(bytes.to_vec()).unwrap();
    }
    let mut out = String::new();
    GzDecoder::new(bytes.as_ref())
        .read_to_string(&mut out)
        .unwrap();
    out
}

/// The `name=value` part of every `Set-Cookie` header for `name`.
pub fn set_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .map(|v| v.split(';').next().unwrap_or(v).to_string())
}
