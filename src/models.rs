use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{self, Freshness};

/// PageType
///
/// Posts appear in the index, archive and feed and live under `/YYYY/MM/`.
/// Static pages make up the navigation menu and live directly under the root.
/// Stored as an integer column (1 = post, 2 = static page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Post,
    #[serde(rename = "page")]
    Static,
}

impl PageType {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Post => 1,
            Self::Static => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Post),
            2 => Some(Self::Static),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Static => "page",
        }
    }
}

/// Page
///
/// A post or static page. Timestamps that were never set (e.g. `published`
/// on a draft) are `None`.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub id: i64,
    pub name: String,
    pub title: String,
    #[serde(rename = "type")]
    pub page_type: PageType,
    pub summary: String,
    pub created: Option<DateTime<Utc>>,
    pub published: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub text: String,
    /// Relative URL, filled in for templates.
    pub url: String,
}

impl Page {
    /// A fresh, unsaved page of the given type.
    pub fn new(page_type: PageType) -> Self {
        Self {
            id: 0,
            name: String::new(),
            title: String::new(),
            page_type,
            summary: String::new(),
            created: None,
            published: None,
            modified: None,
            text: String::new(),
            url: String::new(),
        }
    }

    /// The last time anything changed on this page. Publication counts as a
    /// change, so publication dates must not lie in the future.
    pub fn last_modified(&self) -> Freshness {
        clock::last_time([self.published, self.modified])
    }

    /// Path of this page below the blog prefix.
    pub fn path(&self) -> String {
        match (self.page_type, self.published) {
            (PageType::Post, Some(published)) => {
                format!("{}{}", published.format("/%Y/%m/"), self.name)
            }
            _ => format!("/{}", self.name),
        }
    }

    pub fn is_new(&self) -> bool {
        self.id == 0
    }
}

/// Latest `last_modified` over a list of pages.
pub fn last_modified(pages: &[Page]) -> Freshness {
    clock::last_time(pages.iter().map(Page::last_modified))
}

/// User
///
/// The authenticated user, as shown to templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub name: String,
    pub email: String,
}

/// Credential
///
/// Stored login data for one email address. Never serialized.
#[derive(Debug, Clone)]
pub struct Credential {
    pub email: String,
    pub password_hash: String,
}
