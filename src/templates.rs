//! Skin loading and template rendering.
//!
//! A skin is a directory under `<blog_path>/skins/` with a `skin.json` that
//! maps logical page names to template files and may name a parent skin.
//! Pages defined by a child skin override the parent's.

use chrono::{DateTime, SecondsFormat, Utc};
use minijinja::{Environment, Value};
use pulldown_cmark::{Options, Parser, html};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use crate::{
    clock::{self, Freshness},
    error::AppError,
};

#[derive(Debug, Deserialize)]
struct SkinJson {
    #[serde(default)]
    parent: String,
    #[serde(default)]
    pages: HashMap<String, SkinPage>,
    #[serde(default, rename = "extraCSS")]
    extra_css: Vec<String>,
    #[serde(default, rename = "extraJS")]
    extra_js: Vec<String>,
    #[serde(default)]
    icons: Option<Vec<SkinIcon>>,
}

#[derive(Debug, Deserialize)]
struct SkinPage {
    templates: Vec<String>,
}

/// An icon declared by a skin, exposed to templates as `icons`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkinIcon {
    pub asset: String,
    pub sizes: String,
}

/// The files making up one logical template. The first file is the entry
/// point; the others are available to it for `extends` and `include`.
#[derive(Debug, Clone)]
struct TemplateFiles {
    dir: PathBuf,
    files: Vec<String>,
}

/// Skin
///
/// A fully resolved skin chain.
#[derive(Debug)]
pub struct Skin {
    /// `[skin, parent, grandparent, ...]` as directories.
    chain: Vec<PathBuf>,
    pages: HashMap<String, TemplateFiles>,
    pub extra_css: Vec<String>,
    pub extra_js: Vec<String>,
    pub icons: Vec<SkinIcon>,
}

/// Skins
///
/// Lazily loads the configured skin on first use and keeps it for the life
/// of the process.
pub struct Skins {
    root: PathBuf,
    name: String,
    loaded: OnceLock<Skin>,
}

impl Skins {
    pub fn new(blog_path: &Path, name: &str) -> Self {
        Self {
            root: blog_path.join("skins"),
            name: name.to_string(),
            loaded: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Result<&Skin, AppError> {
        if let Some(skin) = self.loaded.get() {
            return Ok(skin);
        }
        let skin = Skin::load(&self.root, &self.name)?;
        Ok(self.loaded.get_or_init(|| skin))
    }
}

impl Skin {
    fn load(root: &Path, name: &str) -> Result<Self, AppError> {
        let mut skin = Skin {
            chain: Vec::new(),
            pages: HashMap::new(),
            extra_css: Vec::new(),
            extra_js: Vec::new(),
            icons: Vec::new(),
        };

        let mut current = name.to_string();
        while !current.is_empty() {
            let dir = root.join(&current);
            if skin.chain.contains(&dir) {
                return Err(AppError::Internal(format!(
                    "skin {current:?} is its own ancestor"
                )));
            }

            let path = dir.join("skin.json");
            let raw = fs::read_to_string(&path).map_err(|e| {
                AppError::io(format!("failed to read skin file {}", path.display()), e)
            })?;
            let parsed: SkinJson = serde_json::from_str(&raw).map_err(|e| {
                AppError::Internal(format!("failed to parse {}: {e}", path.display()))
            })?;

            for (page, files) in parsed.pages {
                if files.templates.is_empty() {
                    return Err(AppError::Internal(format!(
                        "page {page:?} in skin {current:?} lists no templates"
                    )));
                }
                skin.pages.entry(page).or_insert_with(|| TemplateFiles {
                    dir: dir.clone(),
                    files: files.templates,
                });
            }
            skin.extra_css.extend(parsed.extra_css);
            skin.extra_js.extend(parsed.extra_js);
            if skin.icons.is_empty() {
                skin.icons = parsed.icons.unwrap_or_default();
            }

            tracing::debug!(skin = %current, "loaded skin");
            skin.chain.push(dir);
            current = parsed.parent;
        }

        Ok(skin)
    }

    fn files(&self, name: &str) -> Result<&TemplateFiles, AppError> {
        self.pages
            .get(name)
            .ok_or_else(|| AppError::Internal(format!("could not find template {name}")))
    }

    /// template_modified
    ///
    /// The most recent modification time among the files of a template.
    /// A file that cannot be stat'ed is an error, not "unknown".
    pub fn template_modified(&self, name: &str) -> Result<Freshness, AppError> {
        let template = self.files(name)?;
        let mut times = Vec::with_capacity(template.files.len());
        for file in &template.files {
            let path = template.dir.join(file);
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .map_err(|e| {
                    AppError::io(format!("failed to stat template file {}", path.display()), e)
                })?;
            times.push(Some(DateTime::<Utc>::from(modified)));
        }
        Ok(clock::last_time(times))
    }

    /// render
    ///
    /// Renders a logical template with the given context.
    pub fn render(&self, name: &str, ctx: &impl Serialize) -> Result<String, AppError> {
        let template = self.files(name)?;

        let mut env = environment();
        for file in &template.files {
            let path = template.dir.join(file);
            let source = fs::read_to_string(&path).map_err(|e| {
                AppError::io(format!("failed to read template {}", path.display()), e)
            })?;
            env.add_template_owned(file.clone(), source)?;
        }

        Ok(env.get_template(&template.files[0])?.render(ctx)?)
    }

    /// Finds a static file by name, child skins first.
    pub fn asset_path(&self, name: &str) -> Option<PathBuf> {
        self.chain
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.add_filter("markdown", markdown);
    env.add_filter("date", date);
    env.add_filter("timestamp", timestamp);
    env.add_filter("capitalize", capitalize);
    env
}

/// Markdown to HTML, marked safe for autoescaping templates.
fn markdown(text: String) -> Value {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, Parser::new_ext(&text, options));
    Value::from_safe_string(out)
}

fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?.as_str())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// `3 July 2015`. Unset times render as an empty string.
fn date(value: Option<String>) -> String {
    parse_time(value)
        .map(|t| t.format("%-d %B %Y").to_string())
        .unwrap_or_default()
}

/// RFC 3339, as used by Atom feeds.
fn timestamp(value: Option<String>) -> String {
    parse_time(value)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn capitalize(value: String) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
