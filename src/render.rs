//! Page rendering: markdown, templates and layouts.
//!
//! Content pages are rendered by the extensions they carry, right to left,
//! until an extension no engine resolves:
//!
//! ```text
//! post/index.md.tera   ─tera─▶  post/index.md  ─markdown─▶  post/index.html
//! feed.xml.tera        ─tera─▶  feed.xml                     (kept as XML)
//! about/index.html                                           (no engine)
//! ```
//!
//! HTML results are then wrapped by a layout (see [`Renderer::layout`]).
//!
//! ## Template context
//!
//! | Name | Value |
//! |------|-------|
//! | `page` | Front matter, including `base_url`, `page_url` and `excerpt` |
//! | `site` | Layered site metadata |
//! | `content` | Rendered page body (layouts only) |
//!
//! Partials, helpers and decorators come from the [`AssetTable`].
//!
//! ## Fallback layout
//!
//! Sites without `layouts/base` still get a complete HTML document: a
//! minimal wrapper generated with [maud](https://maud.lambda.xyz/).

use crate::assets::AssetTable;
use crate::config::MarkdownConfig;
use crate::types::FrontMatter;
use maud::{DOCTYPE, Markup, PreEscaped, html};
use pulldown_cmark::{CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd, html as md_html};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Layout used when front matter does not name one.
pub const DEFAULT_LAYOUT: &str = "base";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("template error: {}", error_chain(.0))]
    Template(#[from] tera::Error),
    #[error("layout `{0}` does not exist")]
    MissingLayout(String),
    #[error("front matter `layout` must be a string or false")]
    InvalidLayout,
}

/// Tera nests the useful message (line, variable) in the source chain.
pub(crate) fn error_chain(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// Render engine named by a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Markdown,
    Template,
}

impl Engine {
    pub fn for_extension(extension: &str) -> Option<Self> {
        match extension {
            "md" | "markdown" => Some(Engine::Markdown),
            "tera" => Some(Engine::Template),
            _ => None,
        }
    }
}

/// Shared, read-only rendering state for one build.
pub struct Renderer {
    tera: tera::Tera,
    /// Prepared copies of `tera` for page templates, since `render_str`
    /// needs `&mut`. Grows to at most one per concurrent render.
    spare: Mutex<Vec<tera::Tera>>,
    markdown: MarkdownConfig,
    site: Map<String, Value>,
    layouts: Vec<String>,
}

impl Renderer {
    pub fn new(
        assets: &AssetTable,
        markdown: MarkdownConfig,
        site: Map<String, Value>,
    ) -> Result<Self, RenderError> {
        let mut tera = tera::Tera::default();
        tera.autoescape_on(vec![]);
        assets.register(&mut tera)?;
        Ok(Self {
            tera,
            spare: Mutex::new(Vec::new()),
            markdown,
            site,
            layouts: assets.layouts.keys().cloned().collect(),
        })
    }

    /// Render a page through every engine its extensions name.
    ///
    /// `resolvable` bounds the chain exactly as it bounds URL derivation, so
    /// the returned file name always matches
    /// [`rendered_name`](crate::paths::rendered_name).
    pub fn render_chain<S: AsRef<str>>(
        &self,
        file_name: &str,
        text: String,
        page: &FrontMatter,
        resolvable: &[S],
    ) -> Result<(String, String), RenderError> {
        let mut parts: Vec<&str> = file_name.split('.').collect();
        let base = parts.remove(0);
        let mut body = text;

        while let Some(extension) = parts.last().copied() {
            if !resolvable.iter().any(|r| r.as_ref() == extension) {
                break;
            }
            body = match Engine::for_extension(extension) {
                Some(Engine::Markdown) => self.markdown(&body),
                Some(Engine::Template) => self.template(&body, page)?,
                None => body,
            };
            parts.pop();
        }

        let name = if parts.is_empty() {
            format!("{base}.html")
        } else {
            format!("{base}.{}", parts.join("."))
        };
        Ok((name, body))
    }

    /// Markdown to HTML with the configured extensions.
    pub fn markdown(&self, text: &str) -> String {
        render_markdown(text, &self.markdown)
    }

    /// Render template text with `page` and `site` in context.
    pub fn template(&self, text: &str, page: &FrontMatter) -> Result<String, RenderError> {
        let mut tera = self.checkout();
        let rendered = tera.render_str(text, &self.context(page));
        self.checkin(tera);
        Ok(rendered?)
    }

    fn checkout(&self) -> tera::Tera {
        self.spare
            .lock()
            .ok()
            .and_then(|mut spare| spare.pop())
            .unwrap_or_else(|| self.tera.clone())
    }

    fn checkin(&self, tera: tera::Tera) {
        if let Ok(mut spare) = self.spare.lock() {
            spare.push(tera);
        }
    }

    /// Wrap rendered HTML in the page's layout.
    ///
    /// - front matter `layout = false`: returned unchanged
    /// - `layout = "name"`: `layouts/name`, which must exist
    /// - absent: `layouts/base` if defined, the built-in wrapper otherwise
    pub fn layout(&self, content: &str, page: &FrontMatter) -> Result<String, RenderError> {
        let name = match page.get("layout") {
            Some(Value::Bool(false)) => return Ok(content.to_string()),
            Some(Value::String(name)) => {
                if !self.layouts.iter().any(|l| l == name) {
                    return Err(RenderError::MissingLayout(name.clone()));
                }
                name.as_str()
            }
            Some(Value::Null) | None => {
                if !self.layouts.iter().any(|l| l == DEFAULT_LAYOUT) {
                    return Ok(fallback_document(page, content).into_string());
                }
                DEFAULT_LAYOUT
            }
            Some(_) => return Err(RenderError::InvalidLayout),
        };

        let mut context = self.context(page);
        context.insert("content", content);
        Ok(self.tera.render(&format!("layouts/{name}"), &context)?)
    }

    fn context(&self, page: &FrontMatter) -> tera::Context {
        let mut context = tera::Context::new();
        context.insert("page", page);
        context.insert("site", &self.site);
        context
    }
}

/// Minimal document used when no `layouts/base` exists.
fn fallback_document(page: &FrontMatter, content: &str) -> Markup {
    let title = page.get("title").and_then(Value::as_str).unwrap_or_default();
    let description = page.get("description").and_then(Value::as_str);
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                @if let Some(description) = description {
                    meta name="description" content=(description);
                }
                title { (title) }
            }
            body {
                main {
                    (PreEscaped(content))
                }
            }
        }
    }
}

pub fn render_markdown(text: &str, config: &MarkdownConfig) -> String {
    let mut options = Options::empty();
    options.set(Options::ENABLE_TABLES, config.tables);
    options.set(Options::ENABLE_FOOTNOTES, config.footnotes);
    options.set(Options::ENABLE_STRIKETHROUGH, config.strikethrough);
    options.set(Options::ENABLE_TASKLISTS, config.tasklists);
    options.set(Options::ENABLE_SMART_PUNCTUATION, config.smart_punctuation);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

    let events = Parser::new_ext(text, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) if !config.html => Event::Text(raw),
        other => other,
    });
    let events: Vec<Event> = if config.anchors {
        with_heading_anchors(events)
    } else {
        events.collect()
    };
    let events = if config.highlight {
        with_highlight_markup(events)
    } else {
        events
    };

    let mut out = String::with_capacity(text.len() * 3 / 2);
    md_html::push_html(&mut out, events.into_iter());
    out
}

/// Replace fenced code blocks with `hljs` markup tagged by language.
fn with_highlight_markup(events: Vec<Event<'_>>) -> Vec<Event<'_>> {
    let mut out = Vec::with_capacity(events.len());
    let mut code: Option<(Option<String>, String)> = None;

    for event in events {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                let language = info.split_whitespace().next().map(str::to_string);
                code = Some((language, String::new()));
            }
            Event::Text(text) if code.is_some() => {
                if let Some((_, body)) = code.as_mut() {
                    body.push_str(&text);
                }
            }
            Event::End(TagEnd::CodeBlock) if code.is_some() => {
                if let Some((language, body)) = code.take() {
                    let markup = html! {
                        pre.hljs {
                            @if let Some(language) = language {
                                code class={ "language-" (language) } { (body) }
                            } @else {
                                code { (body) }
                            }
                        }
                    };
                    out.push(Event::Html(CowStr::from(markup.into_string() + "\n")));
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Give every heading without an explicit `{#id}` a slug id, unique per page.
fn with_heading_anchors<'a>(events: impl Iterator<Item = Event<'a>>) -> Vec<Event<'a>> {
    let mut out = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut heading: Option<Vec<Event<'a>>> = None;

    for event in events {
        if let Some(buffer) = heading.as_mut() {
            let Event::End(TagEnd::Heading(level)) = event else {
                buffer.push(event);
                continue;
            };
            let mut buffer = heading.take().unwrap_or_default();
            let text: String = buffer
                .iter()
                .filter_map(|e| match e {
                    Event::Text(t) | Event::Code(t) => Some(t.as_ref()),
                    _ => None,
                })
                .collect();
            if let Some(Event::Start(Tag::Heading { id, .. })) = buffer.first_mut()
                && id.is_none()
            {
                *id = Some(CowStr::from(unique_slug(&slugify(&text), &mut seen)));
            }
            out.extend(buffer);
            out.push(Event::End(TagEnd::Heading(level)));
            continue;
        }
        match event {
            Event::Start(Tag::Heading { .. }) => heading = Some(vec![event]),
            other => out.push(other),
        }
    }
    out
}

fn unique_slug(slug: &str, seen: &mut HashMap<String, usize>) -> String {
    let base = if slug.is_empty() { "section" } else { slug };
    let count = seen.entry(base.to_string()).or_insert(0);
    *count += 1;
    if *count == 1 {
        base.to_string()
    } else {
        format!("{base}-{}", *count - 1)
    }
}

/// Lowercase, alphanumerics kept, everything else collapsed to single dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut prev_dash = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            slug.push('-');
            prev_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}
