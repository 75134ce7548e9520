//! Markdown file import and export.
//!
//! One file per page: mail-style headers (`Name`, `Content-Type`, `Created`,
//! `Published`, `Modified`, and `Type` for static pages), a blank line, a
//! `# Title` line, a blank line, then the Markdown text. Times are RFC 3339.
//! Exported files are named `YYYY-MM-DD-<name>.markdown` once published and
//! `<name>.markdown` before that.

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::{
    clock::{self, Freshness},
    error::AppError,
    models::{Page, PageType},
    repository::{PageQuery, Repository},
};

const EXTENSION: &str = "markdown";

/// What an import did, page by page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// parse_page
///
/// Reads one exported file. The name header is required; the title line is
/// optional, and without it the whole body is the text.
pub fn parse_page(raw: &str) -> Result<Page, AppError> {
    let raw = raw.replace("\r\n", "\n");
    let (head, body) = raw.split_once("\n\n").unwrap_or((raw.as_str(), ""));

    let mut page = Page::new(PageType::Post);
    for line in head.lines().filter(|line| !line.trim().is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| AppError::Internal(format!("malformed header line {line:?}")))?;
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => page.name = value.to_string(),
            "type" => {
                page.page_type = match value {
                    "post" => PageType::Post,
                    "page" => PageType::Static,
                    other => {
                        return Err(AppError::Internal(format!("unknown page type {other:?}")));
                    }
                }
            }
            "created" => page.created = parse_time(key, value)?,
            "published" => page.published = parse_time(key, value)?,
            "modified" => page.modified = parse_time(key, value)?,
            _ => {}
        }
    }
    if page.name.is_empty() {
        return Err(AppError::Internal("missing Name header".to_string()));
    }

    match body.strip_prefix("# ") {
        Some(rest) => {
            let (title, text) = rest.split_once('\n').unwrap_or((rest, ""));
            page.title = title.trim().to_string();
            page.text = text.trim_start().to_string();
        }
        None => page.text = body.to_string(),
    }

    page.url = page.path();
    Ok(page)
}

fn parse_time(key: &str, value: &str) -> Result<Freshness, AppError> {
    let time = DateTime::parse_from_rfc3339(value)
        .map_err(|e| AppError::Internal(format!("invalid {key} timestamp {value:?}: {e}")))?;
    // Stored with one-second resolution, like every other page time.
    let unix = clock::export_time(Some(time.with_timezone(&Utc)));
    Ok(clock::import_time(unix))
}

/// The file contents [`parse_page`] reads back into the same page.
pub fn format_page(page: &Page) -> String {
    let mut out = format!(
        "Name: {}\nContent-Type: text/markdown; charset=utf-8\n",
        page.name
    );
    if page.page_type == PageType::Static {
        out.push_str("Type: page\n");
    }
    for (key, time) in [
        ("Created", page.created),
        ("Published", page.published),
        ("Modified", page.modified),
    ] {
        if let Some(time) = time {
            out.push_str(&format!(
                "{key}: {}\n",
                time.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }
    }
    out.push_str(&format!("\n# {}\n\n{}", page.title, page.text));
    out
}

pub fn file_name(page: &Page) -> String {
    match page.published {
        Some(published) => format!("{}-{}.{EXTENSION}", published.format("%Y-%m-%d"), page.name),
        None => format!("{}.{EXTENSION}", page.name),
    }
}

/// import_dir
///
/// Imports every `.markdown` file of `dir`, in file name order. Pages are
/// matched by name: known names are updated, unknown ones inserted. The
/// first unreadable file stops the import.
pub async fn import_dir(repo: &dyn Repository, dir: &Path) -> Result<ImportSummary, AppError> {
    let mut files = markdown_files(dir).await?;
    files.sort();

    let mut summary = ImportSummary::default();
    for path in files {
        let raw = fs::read_to_string(&path)
            .await
            .map_err(|e| AppError::io(format!("failed to read page {}", path.display()), e))?;
        let mut page = parse_page(&raw).map_err(|e| {
            AppError::Internal(format!("failed to read page {}: {e}", path.display()))
        })?;

        if repo.import_page(&mut page).await? {
            tracing::info!(name = %page.name, "imported page");
            summary.inserted += 1;
        } else {
            tracing::info!(name = %page.name, "updated page");
            summary.updated += 1;
        }
    }
    Ok(summary)
}

async fn markdown_files(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let context = || format!("failed to read directory {}", dir.display());
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| AppError::io(context(), e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::io(context(), e))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == EXTENSION) {
            files.push(path);
        }
    }
    Ok(files)
}

/// export_dir
///
/// Writes every page to `dir`, creating it when missing. Each file is
/// written under a `.tmp` name first and renamed into place, so a reader
/// never sees half a page. Returns the number of pages written.
pub async fn export_dir(repo: &dyn Repository, dir: &Path) -> Result<usize, AppError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| AppError::io(format!("failed to create {}", dir.display()), e))?;

    let pages = repo.pages(&PageQuery::default()).await?;
    for page in &pages {
        let path = dir.join(file_name(page));
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));

        fs::write(&tmp, format_page(page))
            .await
            .map_err(|e| AppError::io(format!("failed to write {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| AppError::io(format!("failed to rename {}", tmp.display()), e))?;
        tracing::info!(name = %page.name, file = %path.display(), "exported page");
    }
    Ok(pages.len())
}
