use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, SubsecRound, Utc};
use std::path::Path;

use crate::{
    AppState,
    auth::{Gate, require_user},
    clock::{self, last_time},
    csrf,
    error::AppError,
    models::{self, Page, PageType},
    repository::{PageOrder, PageQuery},
    request::RequestContext,
    response::{self, ATOM, View},
    router::{Params, Resolution, RouteName},
};

/// Number of posts on the index page and in the feed.
const RECENT_POSTS: i64 = 10;

const ASSET_CACHE: &str = "max-age=3600,s-maxage=5";

/// dispatch
///
/// The single axum entry point. Reads the request, lets the blog router
/// decide, and runs the chosen handler. Failures become responses here.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let req = match RequestContext::from_request(request).await {
        Ok(req) => req,
        Err(e) => return e.into_response(),
    };

    match handle(&state, &req).await {
        Ok(response) => response,
        Err(AppError::NotFound) => not_found(&state, &req)
            .await
            .unwrap_or_else(IntoResponse::into_response),
        Err(e) => e.into_response(),
    }
}

async fn handle(state: &AppState, req: &RequestContext) -> Result<Response, AppError> {
    let resolution = state.router.resolve(&req.method, req.path(), || {
        csrf::validate(&state.config.origin, &req.headers, &req.form)
    });

    match resolution {
        Resolution::Dispatch { route, params } => {
            tracing::debug!(?route, "dispatching");
            run(route, state, req, &params).await
        }
        Resolution::Redirect(path) => {
            let location = match req.uri.query() {
                Some(query) => format!("{path}?{query}"),
                None => path,
            };
            response::moved_permanently(&location)
        }
        Resolution::Forbidden => Err(AppError::CsrfRejected),
        Resolution::NotFound => Err(AppError::NotFound),
    }
}

async fn run(
    route: RouteName,
    state: &AppState,
    req: &RequestContext,
    params: &Params,
) -> Result<Response, AppError> {
    match route {
        RouteName::Index => index(state, req).await,
        RouteName::PageView => page_view(state, req, params).await,
        RouteName::Admin => admin(state, req).await,
        RouteName::PageEdit => page_edit(state, req, params).await,
        RouteName::PagePreview => page_preview(state, req, params).await,
        RouteName::Archive => archive(state, req).await,
        RouteName::Feed => feed(state, req).await,
        RouteName::Asset => asset(state, req, params).await,
    }
}

/// index
///
/// The most recent published posts.
pub async fn index(state: &AppState, req: &RequestContext) -> Result<Response, AppError> {
    let posts = state
        .repo
        .pages(&PageQuery::published(PageType::Post, PageOrder::PublishedDesc).limit(RECENT_POSTS))
        .await?;

    View::new(state)?
        .template("blogindex")
        .with("posts", &posts)
        .output(state, req, models::last_modified(&posts))
        .await
}

/// page_view
///
/// A published post (under `/YYYY/MM/`) or static page (directly under the
/// root). A page is only served at its own URL.
pub async fn page_view(
    state: &AppState,
    req: &RequestContext,
    params: &Params,
) -> Result<Response, AppError> {
    let name = params.get("name").unwrap_or("");
    let page = state
        .repo
        .page(&PageQuery::published_by_name(name))
        .await?
        .ok_or(AppError::NotFound)?;

    let expected = match (params.get("year"), params.get("month")) {
        (Some(year), Some(month)) if !year.is_empty() => format!("/{year}/{month}/{name}"),
        _ => format!("/{name}"),
    };
    if page.url != expected {
        return Err(AppError::NotFound);
    }

    let template = match page.page_type {
        PageType::Post => "blogpost",
        PageType::Static => "page",
    };

    View::new(state)?
        .template(template)
        .with("title", &page.title)
        .with("page", &page)
        .output(state, req, page.last_modified())
        .await
}

/// archive
///
/// Every published post, newest first.
pub async fn archive(state: &AppState, req: &RequestContext) -> Result<Response, AppError> {
    let posts = state
        .repo
        .pages(&PageQuery::published(PageType::Post, PageOrder::PublishedDesc))
        .await?;

    View::new(state)?
        .template("archive")
        .with("posts", &posts)
        .output(state, req, models::last_modified(&posts))
        .await
}

/// feed
///
/// Atom feed of the most recent published posts.
pub async fn feed(state: &AppState, req: &RequestContext) -> Result<Response, AppError> {
    let posts = state
        .repo
        .pages(&PageQuery::published(PageType::Post, PageOrder::PublishedDesc).limit(RECENT_POSTS))
        .await?;
    let updated = models::last_modified(&posts);

    View::new(state)?
        .template("feed")
        .content_type(ATOM)
        .with("posts", &posts)
        .with("updated", updated)
        .with("origin", &state.config.origin)
        .output(state, req, updated)
        .await
}

/// admin
///
/// Dashboard: drafts, published posts and unpublished static pages.
pub async fn admin(state: &AppState, req: &RequestContext) -> Result<Response, AppError> {
    let view = match require_user(state, req).await? {
        Gate::Admitted(view) => view,
        Gate::Answered(response) => return Ok(response),
    };

    let drafts = state
        .repo
        .pages(&PageQuery::drafts(PageType::Post, PageOrder::ModifiedDesc))
        .await?;
    let published = state
        .repo
        .pages(&PageQuery::published(PageType::Post, PageOrder::PublishedDesc))
        .await?;
    let menu_unpublished = state
        .repo
        .pages(&PageQuery::drafts(PageType::Static, PageOrder::TitleDesc))
        .await?;

    let freshness = last_time([
        models::last_modified(&drafts),
        models::last_modified(&published),
        models::last_modified(&menu_unpublished),
    ]);

    view.template("admin")
        .with("drafts", &drafts)
        .with("published", &published)
        .with("menuUnpublished", &menu_unpublished)
        .output(state, req, freshness)
        .await
}

/// page_edit
///
/// GET shows the editor for a new post, a new static page, or an existing
/// page. POST saves the form and redirects (303):
///
/// - `publish`: publishes and goes to the page itself
/// - `unpublish`: unpublishes and comes back to the editor
/// - a newly created page: goes to its own editor URL
/// - otherwise: back to the editor
pub async fn page_edit(
    state: &AppState,
    req: &RequestContext,
    params: &Params,
) -> Result<Response, AppError> {
    let view = match require_user(state, req).await? {
        Gate::Admitted(view) => view,
        Gate::Answered(response) => return Ok(response),
    };

    let mut page = match params.get("id").unwrap_or("") {
        "post" => Page::new(PageType::Post),
        "page" => Page::new(PageType::Static),
        id => load_page(state, id).await?,
    };

    if req.method == Method::POST {
        return save_page(state, req, &mut page).await;
    }

    let view = view.template("editpage");
    if page.is_new() {
        view.with("page", &page).output(state, req, None).await
    } else {
        view.with("title", &page.title)
            .with("page", &page)
            .output(state, req, page.last_modified())
            .await
    }
}

async fn save_page(
    state: &AppState,
    req: &RequestContext,
    page: &mut Page,
) -> Result<Response, AppError> {
    let created = page.is_new();
    page.name = req.form_value("name").to_string();
    page.title = req.form_value("title").to_string();
    page.summary = req.form_value("summary").to_string();
    page.text = req.form_value("text").to_string();
    state.repo.save_page(page).await?;
    tracing::info!(id = page.id, name = %page.name, created, "page saved");

    let location = if !req.form_value("publish").is_empty() {
        let now = Utc::now().trunc_subsecs(0);
        state.repo.set_published(page.id, Some(now)).await?;
        page.published = Some(now);
        page.url = page.path();
        tracing::info!(id = page.id, url = %page.url, "page published");
        format!("{}{}", state.config.url_prefix, page.url)
    } else if !req.form_value("unpublish").is_empty() {
        state.repo.set_published(page.id, None).await?;
        tracing::info!(id = page.id, "page unpublished");
        req.path_and_query()
    } else if created {
        format!("{}admin/edit/{}", state.router.root(), page.id)
    } else {
        req.path_and_query()
    };

    response::see_other(&location)
}

/// page_preview
///
/// Renders a page, published or not, the way it would look on the site.
pub async fn page_preview(
    state: &AppState,
    req: &RequestContext,
    params: &Params,
) -> Result<Response, AppError> {
    let view = match require_user(state, req).await? {
        Gate::Admitted(view) => view,
        Gate::Answered(response) => return Ok(response),
    };

    let page = load_page(state, params.get("id").unwrap_or("")).await?;

    view.template("previewpage")
        .with("title", &page.title)
        .with("page", &page)
        .output(state, req, page.last_modified())
        .await
}

async fn load_page(state: &AppState, id: &str) -> Result<Page, AppError> {
    let id: i64 = id.parse().map_err(|_| AppError::NotFound)?;
    state
        .repo
        .page(&PageQuery::by_id(id))
        .await?
        .ok_or(AppError::NotFound)
}

/// asset
///
/// Serves `.js` and `.css` files from the skin chain, compressed, with their
/// file modification time as `Last-Modified`.
pub async fn asset(
    state: &AppState,
    req: &RequestContext,
    params: &Params,
) -> Result<Response, AppError> {
    let name = params.get("name").unwrap_or("");
    let content_type = match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        _ => return Err(AppError::NotFound),
    };

    let path = state
        .skins
        .get()?
        .asset_path(name)
        .ok_or(AppError::NotFound)?;

    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|e| AppError::io(format!("could not stat asset {}", path.display()), e))?;
    let modified = metadata
        .modified()
        .map(|t| clock::truncate_to_seconds(DateTime::<Utc>::from(t)))
        .map_err(|e| AppError::io(format!("could not stat asset {}", path.display()), e))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(ASSET_CACHE));

    if response::not_modified(&req.headers, modified) {
        return Ok((StatusCode::NOT_MODIFIED, headers).into_response());
    }

    let contents = tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::io(format!("could not read asset {}", path.display()), e))?;
    let body = response::gzip(&contents)?;

    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    headers.insert(
        header::LAST_MODIFIED,
        response::header_value(&clock::http_date(modified))?,
    );

    let body = if req.is_head() {
        Body::empty()
    } else {
        Body::from(body)
    };
    Ok((StatusCode::OK, headers, body).into_response())
}

/// not_found
///
/// The 404 page. Never cached, never a 304.
pub async fn not_found(state: &AppState, req: &RequestContext) -> Result<Response, AppError> {
    View::new(state)?
        .template("404")
        .status(StatusCode::NOT_FOUND)
        .with("url", req.path())
        .output(state, req, None)
        .await
}
