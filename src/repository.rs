use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;

use crate::{
    clock::{export_time, import_time},
    error::AppError,
    models::{Credential, Page, PageType, User},
};

/// PageOrder
///
/// Ordering clauses a caller may ask for. Kept as an enum so no SQL text ever
/// crosses the repository boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageOrder {
    #[default]
    Unordered,
    PublishedDesc,
    ModifiedDesc,
    TitleDesc,
}

/// PageQuery
///
/// The predicate half of a page lookup. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct PageQuery {
    pub page_type: Option<PageType>,
    pub published: Option<bool>,
    pub name: Option<String>,
    pub id: Option<i64>,
    pub order: PageOrder,
    pub limit: Option<i64>,
}

impl PageQuery {
    /// Published pages of one type, in the given order.
    pub fn published(page_type: PageType, order: PageOrder) -> Self {
        Self {
            page_type: Some(page_type),
            published: Some(true),
            order,
            ..Self::default()
        }
    }

    /// Unpublished pages of one type, in the given order.
    pub fn drafts(page_type: PageType, order: PageOrder) -> Self {
        Self {
            page_type: Some(page_type),
            published: Some(false),
            order,
            ..Self::default()
        }
    }

    /// The navigation menu: published static pages.
    pub fn menu() -> Self {
        Self::published(PageType::Static, PageOrder::TitleDesc)
    }

    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// A page by name, published or not.
    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn published_by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            published: Some(true),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Repository Trait
///
/// Persistence contract used by the handlers and the authenticator. Every
/// call is a single query; failures propagate to the caller unchanged.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Pages ---
    async fn pages(&self, query: &PageQuery) -> Result<Vec<Page>, AppError>;
    /// Inserts the page when `page.id == 0`, otherwise updates it. Sets
    /// `modified` (and `created` on insert) to now.
    async fn save_page(&self, page: &mut Page) -> Result<(), AppError>;
    /// Sets (`Some`) or clears (`None`) the publication time.
    async fn set_published(&self, id: i64, published: Option<DateTime<Utc>>)
    -> Result<(), AppError>;
    /// Stores a page by name with its timestamps as given: inserts it when no
    /// page of that name exists, otherwise replaces text, title and times.
    /// Returns whether the page was inserted.
    async fn import_page(&self, page: &mut Page) -> Result<bool, AppError>;

    // --- Users ---
    async fn credential(&self, email: &str) -> Result<Option<Credential>, AppError>;
    async fn user(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn add_user(&self, email: &str, name: &str, password_hash: &str) -> Result<(), AppError>;

    /// A query that must match at most one page.
    async fn page(&self, query: &PageQuery) -> Result<Option<Page>, AppError> {
        let mut pages = self.pages(query).await?;
        if pages.len() > 1 {
            return Err(AppError::Internal(
                "tried to fetch one page, but got more than one".to_string(),
            ));
        }
        Ok(pages.pop())
    }
}

/// RepositoryState
///
/// Shared handle to the persistence layer.
pub type RepositoryState = Arc<dyn Repository>;

#[derive(FromRow)]
struct PageRow {
    id: i64,
    name: String,
    title: String,
    #[sqlx(rename = "type")]
    page_type: i64,
    summary: String,
    created: i64,
    published: i64,
    modified: i64,
    text: String,
}

impl TryFrom<PageRow> for Page {
    type Error = AppError;

    fn try_from(row: PageRow) -> Result<Self, Self::Error> {
        let page_type = PageType::from_i64(row.page_type).ok_or_else(|| {
            AppError::Internal(format!("page {} has unknown type {}", row.id, row.page_type))
        })?;
        let mut page = Page {
            id: row.id,
            name: row.name,
            title: row.title,
            page_type,
            summary: row.summary,
            created: import_time(row.created),
            published: import_time(row.published),
            modified: import_time(row.modified),
            text: row.text,
            url: String::new(),
        };
        page.url = page.path();
        Ok(page)
    }
}

#[derive(FromRow)]
struct UserRow {
    fullname: String,
    email: String,
}

/// SqliteRepository
///
/// The `Repository` implementation backed by a SQLite database.
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// install
    ///
    /// Creates missing tables. Safe to run repeatedly.
    pub async fn install(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                text TEXT DEFAULT '',
                name TEXT UNIQUE DEFAULT '',
                title TEXT DEFAULT '',
                type INTEGER DEFAULT 1,
                summary TEXT DEFAULT '',
                created INTEGER DEFAULT 0,
                published INTEGER DEFAULT 0,
                modified INTEGER DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                email TEXT UNIQUE,
                passwordHash TEXT,
                fullname VARCHAR DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("database tables installed");
        Ok(())
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn pages(&self, query: &PageQuery) -> Result<Vec<Page>, AppError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, name, title, type, summary, created, published, modified, text \
             FROM pages WHERE 1 = 1",
        );

        if let Some(page_type) = query.page_type {
            builder.push(" AND type = ");
            builder.push_bind(page_type.as_i64());
        }
        match query.published {
            Some(true) => {
                builder.push(" AND published != 0");
            }
            Some(false) => {
                builder.push(" AND published = 0");
            }
            None => {}
        }
        if let Some(name) = &query.name {
            builder.push(" AND name = ");
            builder.push_bind(name.clone());
        }
        if let Some(id) = query.id {
            builder.push(" AND id = ");
            builder.push_bind(id);
        }

        builder.push(match query.order {
            PageOrder::Unordered => "",
            PageOrder::PublishedDesc => " ORDER BY published DESC",
            PageOrder::ModifiedDesc => " ORDER BY modified DESC",
            PageOrder::TitleDesc => " ORDER BY title DESC",
        });

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit);
        }

        let rows: Vec<PageRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Page::try_from).collect()
    }

    async fn save_page(&self, page: &mut Page) -> Result<(), AppError> {
        let now = Utc::now().trunc_subsecs(0);
        page.modified = Some(now);

        if page.is_new() {
            page.created = Some(now);
            let result = sqlx::query(
                "INSERT INTO pages (name, title, type, summary, text, created, modified) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&page.name)
            .bind(&page.title)
            .bind(page.page_type.as_i64())
            .bind(&page.summary)
            .bind(&page.text)
            .bind(export_time(page.created))
            .bind(export_time(page.modified))
            .execute(&self.pool)
            .await?;

            page.id = result.last_insert_rowid();
            if page.id <= 0 {
                return Err(AppError::Internal("inserted page got no id".to_string()));
            }
        } else {
            sqlx::query(
                "UPDATE pages SET name = ?, title = ?, summary = ?, text = ?, modified = ? \
                 WHERE id = ?",
            )
            .bind(&page.name)
            .bind(&page.title)
            .bind(&page.summary)
            .bind(&page.text)
            .bind(export_time(page.modified))
            .bind(page.id)
            .execute(&self.pool)
            .await?;
        }

        page.url = page.path();
        Ok(())
    }

    async fn set_published(
        &self,
        id: i64,
        published: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE pages SET published = ? WHERE id = ?")
            .bind(export_time(published))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn import_page(&self, page: &mut Page) -> Result<bool, AppError> {
        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM pages WHERE name = ?")
            .bind(&page.name)
            .fetch_optional(&self.pool)
            .await?;

        let inserted = match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE pages SET text = ?, title = ?, created = ?, published = ?, \
                     modified = ? WHERE id = ?",
                )
                .bind(&page.text)
                .bind(&page.title)
                .bind(export_time(page.created))
                .bind(export_time(page.published))
                .bind(export_time(page.modified))
                .bind(id)
                .execute(&self.pool)
                .await?;
                page.id = id;
                false
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO pages (text, name, title, type, created, published, modified) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&page.text)
                .bind(&page.name)
                .bind(&page.title)
                .bind(page.page_type.as_i64())
                .bind(export_time(page.created))
                .bind(export_time(page.published))
                .bind(export_time(page.modified))
                .execute(&self.pool)
                .await?;
                page.id = result.last_insert_rowid();
                true
            }
        };

        page.url = page.path();
        Ok(inserted)
    }

    async fn credential(&self, email: &str) -> Result<Option<Credential>, AppError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT email, passwordHash FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(email, password_hash)| Credential {
            email,
            password_hash,
        }))
    }

    async fn user(&self, email: &str) -> Result<Option<User>, AppError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT fullname, email FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|row| User {
            name: row.fullname,
            email: row.email,
        }))
    }

    async fn add_user(&self, email: &str, name: &str, password_hash: &str) -> Result<(), AppError> {
        sqlx::query("INSERT INTO users (email, fullname, passwordHash) VALUES (?, ?, ?)")
            .bind(email)
            .bind(name)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
