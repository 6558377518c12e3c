//! Stage engines, and the fixed order they run in.
//!
//! | # | Stage | Kind | Scope |
//! |---|-------|------|-------|
//! | 1 | `duplicate-filter` | filter | everything |
//! | 2 | `changed-filter` | filter | everything (skipped with `--no-changed`) |
//! | 3 | `read` | read | everything |
//! | 4 | `rename` | rename | `content/*` |
//! | 5 | `frontmatter` | enrich | content pages |
//! | 6 | `render` | render | `content/*.md`, `*.markdown`, `*.tera` |
//! | 7 | `layout` | render | `content/*.html` |
//! | 8 | `transform-css` | convert | `[transform.css] patterns` |
//! | 9 | `transform-js` | convert | `[transform.js] patterns` |
//! | 10 | `minify-html` / `-css` / `-js` | minify | `*.html` / `*.css` / `*.js` |
//! | 11 | `cleanup` | rename | everything |
//! | 12 | `write` | write | everything |
//!
//! Stages 8 to 10 are left out entirely when disabled by configuration or
//! run options.

use super::{Engine, Outcome, Pipeline, Stage, StageContext, StageError, StageKind, WrittenFile};
use crate::config::{MinifyConfig, RenameConfig, RunOptions, SiteConfig};
use crate::external::ExternalCommand;
use crate::manifest::{Fingerprint, Freshness};
use crate::minify::{MinifyKind, minify};
use crate::paths::{page_url, rename_content, strip_type_segment, with_extension, with_file_name};
use crate::pattern::{PatternError, PatternSet};
use crate::types::{FrontMatter, VirtualFile};
use futures::FutureExt;
use futures::future::BoxFuture;
use gray_matter::Matter;
use gray_matter::engine::YAML;
use serde_json::Value;
use std::sync::Arc;

/// Content pages that may carry front matter.
const PAGE_PATTERNS: [&str; 4] = [
    "content/*.md",
    "content/*.markdown",
    "content/*.tera",
    "content/*.html",
];

/// Build the stage list for one run.
pub fn assemble(config: &SiteConfig, options: RunOptions) -> Result<Pipeline, PatternError> {
    let resolvable = config.rename.resolvable.clone();
    let mut stages = vec![Stage::new(
        "duplicate-filter",
        StageKind::Filter,
        PatternSet::everything(),
        DuplicateFilter,
    )];

    if !options.no_changed {
        stages.push(Stage::new(
            "changed-filter",
            StageKind::Filter,
            PatternSet::everything(),
            ChangedFilter,
        ));
    }

    stages.push(Stage::new("read", StageKind::Read, PatternSet::everything(), Read));
    stages.push(Stage::new(
        "rename",
        StageKind::Rename,
        PatternSet::any(&["content/*"])?,
        Rename {
            rules: config.rename.clone(),
        },
    ));
    stages.push(Stage::new(
        "frontmatter",
        StageKind::Enrich,
        PatternSet::any(&PAGE_PATTERNS)?,
        ExtractFrontMatter {
            resolvable: resolvable.clone(),
        },
    ));

    let render_patterns: Vec<String> = resolvable.iter().map(|ext| format!("content/*.{ext}")).collect();
    if !render_patterns.is_empty() {
        stages.push(Stage::new(
            "render",
            StageKind::Render,
            PatternSet::any(&render_patterns)?,
            Render { resolvable },
        ));
    }
    stages.push(Stage::new(
        "layout",
        StageKind::Render,
        PatternSet::any(&["content/*.html"])?,
        Layout,
    ));

    let css = &config.transform.css;
    if !options.no_transform_css
        && let Some(command) = ExternalCommand::from_config(css, Vec::new())
    {
        stages.push(Stage::new(
            "transform-css",
            StageKind::Convert,
            PatternSet::any(&css.patterns)?,
            Transform {
                command,
                output_extension: "css",
                artifacts: Vec::new(),
                dumps: Vec::new(),
            },
        ));
    }

    let js = &config.transform.js;
    let companions: Vec<String> = js.artifacts.iter().chain(&js.dumps).cloned().collect();
    if !options.no_transform_js
        && let Some(command) = ExternalCommand::from_config(&js.as_command(), companions)
    {
        stages.push(Stage::new(
            "transform-js",
            StageKind::Convert,
            PatternSet::any(&js.patterns)?,
            Transform {
                command,
                output_extension: "js",
                artifacts: js.artifacts.clone(),
                dumps: js.dumps.clone(),
            },
        ));
    }

    if options.minify() {
        let minify = &config.minify;
        for (name, enabled, kind, pattern) in [
            ("minify-html", minify.html, MinifyKind::Html, "*.html"),
            ("minify-css", minify.css, MinifyKind::Css, "*.css"),
            ("minify-js", minify.js, MinifyKind::Js, "*.js"),
        ] {
            if enabled {
                stages.push(Stage::new(
                    name,
                    StageKind::Minify,
                    PatternSet::any(&[pattern])?,
                    Minify {
                        kind,
                        config: minify.clone(),
                    },
                ));
            }
        }
    }

    stages.push(Stage::new(
        "cleanup",
        StageKind::Rename,
        PatternSet::everything(),
        Cleanup,
    ));
    stages.push(Stage::new("write", StageKind::Write, PatternSet::everything(), Write));

    Ok(Pipeline {
        stages,
        concurrency: config.concurrency,
    })
}

// =========================================================================
// Filters
// =========================================================================

/// Drops any file whose source lost the precedence comparison.
pub struct DuplicateFilter;

impl Engine for DuplicateFilter {
    fn apply<'a>(
        &'a self,
        file: VirtualFile,
        ctx: &'a Arc<StageContext>,
    ) -> BoxFuture<'a, Result<Outcome, StageError>> {
        async move {
            match ctx.winners.get(&file.logical_path) {
                Some(&winner) if winner == file.source => Ok(Outcome::Keep(file)),
                _ => Ok(Outcome::Reject("shadowed")),
            }
        }
        .boxed()
    }
}

/// Drops files whose source and outputs match the build manifest.
pub struct ChangedFilter;

impl Engine for ChangedFilter {
    fn apply<'a>(
        &'a self,
        mut file: VirtualFile,
        ctx: &'a Arc<StageContext>,
    ) -> BoxFuture<'a, Result<Outcome, StageError>> {
        async move {
            let ctx = Arc::clone(ctx);
            let logical_path = file.logical_path.clone();
            let source = file.absolute_path.clone();
            let freshness = tokio::task::spawn_blocking(move || {
                ctx.manifest.freshness(&logical_path, &source, &ctx.destination)
            })
            .await??;

            match freshness {
                Freshness::Unchanged => Ok(Outcome::Reject("unchanged")),
                Freshness::Changed(fingerprint) => {
                    file.fingerprint = fingerprint;
                    Ok(Outcome::Keep(file))
                }
            }
        }
        .boxed()
    }
}

// =========================================================================
// Read and rename
// =========================================================================

pub struct Read;

impl Engine for Read {
    fn apply<'a>(
        &'a self,
        mut file: VirtualFile,
        _ctx: &'a Arc<StageContext>,
    ) -> BoxFuture<'a, Result<Outcome, StageError>> {
        async move {
            let meta = tokio::fs::metadata(&file.absolute_path).await?;
            let bytes = tokio::fs::read(&file.absolute_path).await?;
            file.fingerprint = Some(Fingerprint::of_bytes(&meta, &bytes));
            file.content = Some(bytes);
            Ok(Outcome::Keep(file))
        }
        .boxed()
    }
}

/// Underscore and prettify rules for content pages.
pub struct Rename {
    rules: RenameConfig,
}

impl Engine for Rename {
    fn apply<'a>(
        &'a self,
        mut file: VirtualFile,
        _ctx: &'a Arc<StageContext>,
    ) -> BoxFuture<'a, Result<Outcome, StageError>> {
        async move {
            let renamed = rename_content(&file.path, &self.rules);
            if renamed != file.path {
                tracing::debug!("{} -> {renamed}", file.path);
                file.path = renamed;
            }
            Ok(Outcome::Keep(file))
        }
        .boxed()
    }
}

// =========================================================================
// Front matter and rendering
// =========================================================================

/// Splits YAML front matter off a page and records its URL.
pub struct ExtractFrontMatter {
    resolvable: Vec<String>,
}

impl ExtractFrontMatter {
    fn extract(&self, file: &mut VirtualFile, base_url: &str) -> Result<(), StageError> {
        let text = file.text().ok_or(StageError::NotUtf8)?;
        let parsed = Matter::<YAML>::new()
            .parse::<Value>(text)
            .map_err(|e| StageError::FrontMatter(e.to_string()))?;

        let mut page: FrontMatter = match parsed.data {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => FrontMatter::new(),
            Some(_) => {
                return Err(StageError::FrontMatter(
                    "front matter must be a mapping".into(),
                ));
            }
        };
        if !page.contains_key("excerpt")
            && let Some(excerpt) = parsed.excerpt.filter(|e| !e.trim().is_empty())
        {
            page.insert("excerpt".into(), Value::String(excerpt.trim().to_string()));
        }
        page.insert("base_url".into(), Value::String(base_url.to_string()));
        page.insert(
            "page_url".into(),
            Value::String(page_url(base_url, &file.path, &self.resolvable)),
        );

        file.content = Some(parsed.content.into_bytes());
        file.frontmatter = Some(page);
        Ok(())
    }
}

impl Engine for ExtractFrontMatter {
    fn apply<'a>(
        &'a self,
        mut file: VirtualFile,
        ctx: &'a Arc<StageContext>,
    ) -> BoxFuture<'a, Result<Outcome, StageError>> {
        async move {
            self.extract(&mut file, &ctx.base_url)?;
            Ok(Outcome::Keep(file))
        }
        .boxed()
    }
}

/// Markdown and template rendering.
pub struct Render {
    resolvable: Vec<String>,
}

impl Engine for Render {
    fn apply<'a>(
        &'a self,
        mut file: VirtualFile,
        ctx: &'a Arc<StageContext>,
    ) -> BoxFuture<'a, Result<Outcome, StageError>> {
        async move {
            let text = take_text(&mut file)?;
            let page = file.frontmatter.clone().unwrap_or_default();
            let renderer = Arc::clone(&ctx.renderer);
            let resolvable = self.resolvable.clone();
            let file_name = file.file_name().to_string();

            let (name, body) = tokio::task::spawn_blocking(move || {
                renderer.render_chain(&file_name, text, &page, &resolvable)
            })
            .await??;

            file.path = with_file_name(&file.path, &name);
            file.content = Some(body.into_bytes());
            Ok(Outcome::Keep(file))
        }
        .boxed()
    }
}

/// Wraps rendered HTML pages in their layout.
pub struct Layout;

impl Engine for Layout {
    fn apply<'a>(
        &'a self,
        mut file: VirtualFile,
        ctx: &'a Arc<StageContext>,
    ) -> BoxFuture<'a, Result<Outcome, StageError>> {
        async move {
            let text = take_text(&mut file)?;
            let page = file.frontmatter.clone().unwrap_or_default();
            let renderer = Arc::clone(&ctx.renderer);
            let html = tokio::task::spawn_blocking(move || renderer.layout(&text, &page)).await??;
            file.content = Some(html.into_bytes());
            Ok(Outcome::Keep(file))
        }
        .boxed()
    }
}

fn take_text(file: &mut VirtualFile) -> Result<String, StageError> {
    let bytes = file.content.take().unwrap_or_default();
    String::from_utf8(bytes).map_err(|_| StageError::NotUtf8)
}

// =========================================================================
// Asset conversion and minification
// =========================================================================

/// Runs an external compiler and fans out its companions.
///
/// Artifacts continue through the remaining stages; dumps go straight to
/// the write queue.
pub struct Transform {
    command: ExternalCommand,
    output_extension: &'static str,
    artifacts: Vec<String>,
    dumps: Vec<String>,
}

impl Engine for Transform {
    fn apply<'a>(
        &'a self,
        mut file: VirtualFile,
        _ctx: &'a Arc<StageContext>,
    ) -> BoxFuture<'a, Result<Outcome, StageError>> {
        async move {
            let input = file.content.take().unwrap_or_default();
            let result = self
                .command
                .run(&input, file.file_name(), self.output_extension)
                .await?;

            file.path = with_extension(&file.path, self.output_extension);
            let mut next = Vec::new();
            let mut direct = Vec::new();
            for (suffix, content) in result.companions {
                let path = with_extension(&file.path, &format!("{suffix}.{}", self.output_extension));
                let mut companion = file.derive(path, content);
                if self.dumps.contains(&suffix) {
                    companion.destination_path = Some(strip_type_segment(&companion.path));
                    direct.push(companion);
                } else if self.artifacts.contains(&suffix) {
                    next.push(companion);
                }
            }
            file.content = Some(result.output);

            if next.is_empty() && direct.is_empty() {
                return Ok(Outcome::Keep(file));
            }
            next.insert(0, file);
            Ok(Outcome::FanOut { next, direct })
        }
        .boxed()
    }
}

pub struct Minify {
    kind: MinifyKind,
    config: MinifyConfig,
}

impl Engine for Minify {
    fn apply<'a>(
        &'a self,
        mut file: VirtualFile,
        _ctx: &'a Arc<StageContext>,
    ) -> BoxFuture<'a, Result<Outcome, StageError>> {
        async move {
            let content = file.content.take().unwrap_or_default();
            let kind = self.kind;
            let config = self.config.clone();
            let minified =
                tokio::task::spawn_blocking(move || minify(&content, kind, &config)).await?;
            file.content = Some(minified);
            Ok(Outcome::Keep(file))
        }
        .boxed()
    }
}

// =========================================================================
// Output
// =========================================================================

/// Fixes the destination path by dropping the type segment.
pub struct Cleanup;

impl Engine for Cleanup {
    fn apply<'a>(
        &'a self,
        mut file: VirtualFile,
        _ctx: &'a Arc<StageContext>,
    ) -> BoxFuture<'a, Result<Outcome, StageError>> {
        async move {
            if file.destination_path.is_none() {
                file.destination_path = Some(strip_type_segment(&file.path));
            }
            Ok(Outcome::Keep(file))
        }
        .boxed()
    }
}

pub struct Write;

impl Engine for Write {
    fn apply<'a>(
        &'a self,
        file: VirtualFile,
        ctx: &'a Arc<StageContext>,
    ) -> BoxFuture<'a, Result<Outcome, StageError>> {
        async move {
            let destination = file
                .destination_path
                .clone()
                .unwrap_or_else(|| strip_type_segment(&file.path));
            let target = ctx.destination.join(&destination);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, file.content.as_deref().unwrap_or_default()).await?;
            Ok(Outcome::Written(WrittenFile {
                logical_path: file.logical_path,
                destination,
                fingerprint: file.fingerprint,
            }))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetTable, PluginRegistry};
    use crate::config::MarkdownConfig;
    use crate::manifest::BuildManifest;
    use crate::render::Renderer;
    use crate::test_helpers::SiteFixture;
    use serde_json::{Map, json};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn context(fixture: &SiteFixture) -> Arc<StageContext> {
        let assets = AssetTable::load(&fixture.sources(), &PluginRegistry::with_builtins()).unwrap();
        let renderer = Renderer::new(&assets, MarkdownConfig::default(), Map::new()).unwrap();
        Arc::new(StageContext {
            config: Arc::new(fixture.config()),
            destination: fixture.destination(),
            winners: BTreeMap::from([("content/a.md".to_string(), 0)]),
            manifest: BuildManifest::empty("p"),
            renderer: Arc::new(renderer),
            base_url: "https://example.com/".into(),
        })
    }

    fn page(path: &str, content: &str) -> VirtualFile {
        let mut file = VirtualFile::discovered(path.into(), 0, PathBuf::new());
        file.content = Some(content.as_bytes().to_vec());
        file
    }

    fn kept(outcome: Outcome) -> VirtualFile {
        match outcome {
            Outcome::Keep(file) => file,
            other => panic!("expected Keep, got {other:?}"),
        }
    }

    // =========================================================================
    // Assembly
    // =========================================================================

    #[test]
    fn default_stage_order() {
        let pipeline = assemble(&SiteConfig::default(), RunOptions::default()).unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "duplicate-filter",
                "changed-filter",
                "read",
                "rename",
                "frontmatter",
                "render",
                "layout",
                "minify-html",
                "minify-css",
                "minify-js",
                "cleanup",
                "write",
            ]
        );
    }

    #[test]
    fn options_remove_stages() {
        let mut config = SiteConfig::default();
        config.transform.css.command = vec!["sass".into(), "--stdin".into()];
        config.transform.js.command = vec!["esbuild".into()];
        let with = assemble(&config, RunOptions::default()).unwrap().stage_names();
        assert!(with.contains(&"transform-css"));
        assert!(with.contains(&"transform-js"));

        let options = RunOptions {
            no_changed: true,
            no_transform_css: true,
            no_transform_js: true,
            development: true,
            ..RunOptions::default()
        };
        let without = assemble(&config, options).unwrap().stage_names();
        assert_eq!(
            without,
            vec!["duplicate-filter", "read", "rename", "frontmatter", "render", "layout", "cleanup", "write"]
        );
    }

    // =========================================================================
    // Engines
    // =========================================================================

    #[tokio::test]
    async fn duplicate_filter_keeps_only_the_winner() {
        let fixture = SiteFixture::new(&["src", "theme"]);
        let ctx = context(&fixture);
        let winner = VirtualFile::discovered("content/a.md".into(), 0, PathBuf::new());
        let loser = VirtualFile::discovered("content/a.md".into(), 1, PathBuf::new());
        assert!(matches!(DuplicateFilter.apply(winner, &ctx).await.unwrap(), Outcome::Keep(_)));
        assert!(matches!(
            DuplicateFilter.apply(loser, &ctx).await.unwrap(),
            Outcome::Reject("shadowed")
        ));
    }

    #[tokio::test]
    async fn front_matter_is_split_off_with_urls() {
        let fixture = SiteFixture::new(&["src"]);
        let ctx = context(&fixture);
        let engine = ExtractFrontMatter {
            resolvable: vec!["md".into()],
        };
        let file = page("content/blog/post/index.md", "---\ntitle: Hello\n---\n# Body\n");
        let file = kept(engine.apply(file, &ctx).await.unwrap());

        let fm = file.frontmatter.as_ref().unwrap();
        assert_eq!(fm["title"], json!("Hello"));
        assert_eq!(fm["base_url"], json!("https://example.com/"));
        assert_eq!(fm["page_url"], json!("https://example.com/blog/post/index.html"));
        assert_eq!(file.text().unwrap().trim(), "# Body");
    }

    #[tokio::test]
    async fn page_without_front_matter_still_gets_urls() {
        let fixture = SiteFixture::new(&["src"]);
        let ctx = context(&fixture);
        let engine = ExtractFrontMatter {
            resolvable: vec!["md".into()],
        };
        let file = kept(engine.apply(page("content/index.md", "# Home"), &ctx).await.unwrap());
        let fm = file.frontmatter.unwrap();
        assert_eq!(fm.len(), 2);
        assert_eq!(fm["page_url"], json!("https://example.com/index.html"));
    }

    #[tokio::test]
    async fn non_mapping_front_matter_fails() {
        let fixture = SiteFixture::new(&["src"]);
        let ctx = context(&fixture);
        let engine = ExtractFrontMatter { resolvable: vec![] };
        let result = engine.apply(page("content/x.md", "---\n- a\n- b\n---\nbody"), &ctx).await;
        assert!(matches!(result, Err(StageError::FrontMatter(_))));
    }

    #[tokio::test]
    async fn render_renames_to_html() {
        let fixture = SiteFixture::new(&["src"]);
        let ctx = context(&fixture);
        let engine = Render {
            resolvable: vec!["md".into(), "tera".into()],
        };
        let file = kept(engine.apply(page("content/about/index.md", "*hi*"), &ctx).await.unwrap());
        assert_eq!(file.path, "content/about/index.html");
        assert_eq!(file.text().unwrap().trim(), "<p><em>hi</em></p>");
    }

    #[tokio::test]
    async fn render_rejects_binary_content() {
        let fixture = SiteFixture::new(&["src"]);
        let ctx = context(&fixture);
        let engine = Render {
            resolvable: vec!["md".into()],
        };
        let mut file = page("content/x.md", "");
        file.content = Some(vec![0xff, 0xfe]);
        assert!(matches!(engine.apply(file, &ctx).await, Err(StageError::NotUtf8)));
    }

    #[tokio::test]
    async fn cleanup_keeps_preset_destination() {
        let fixture = SiteFixture::new(&["src"]);
        let ctx = context(&fixture);
        let mut dumped = page("static/js/app.ast.js", "[]");
        dumped.destination_path = Some("js/app.ast.js".into());
        let file = kept(Cleanup.apply(dumped, &ctx).await.unwrap());
        assert_eq!(file.destination_path.as_deref(), Some("js/app.ast.js"));

        let file = kept(Cleanup.apply(page("content/a/index.html", ""), &ctx).await.unwrap());
        assert_eq!(file.destination_path.as_deref(), Some("a/index.html"));
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let fixture = SiteFixture::new(&["src"]);
        let ctx = context(&fixture);
        let mut file = page("content/a/b/index.html", "<p>x</p>");
        file.destination_path = Some("a/b/index.html".into());
        match Write.apply(file, &ctx).await.unwrap() {
            Outcome::Written(w) => assert_eq!(w.destination, "a/b/index.html"),
            other => panic!("expected Written, got {other:?}"),
        }
        assert_eq!(fixture.output("a/b/index.html"), "<p>x</p>");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn transform_fans_out_artifacts_and_dumps() {
        let fixture = SiteFixture::new(&["src"]);
        let ctx = context(&fixture);
        let config = crate::config::CommandConfig {
            command: vec![
                "sh".into(),
                "-c".into(),
                "cat > \"$0\" && echo m > \"$0.map\" && echo a > \"$0.ast\"".into(),
                "{output}".into(),
            ],
            patterns: vec![],
            timeout_secs: 5,
        };
        let engine = Transform {
            command: ExternalCommand::from_config(&config, vec!["map".into(), "ast".into()]).unwrap(),
            output_extension: "js",
            artifacts: vec!["map".into()],
            dumps: vec!["ast".into()],
        };

        match engine.apply(page("static/js/app.ts", "let a;"), &ctx).await.unwrap() {
            Outcome::FanOut { next, direct } => {
                let paths: Vec<_> = next.iter().map(|f| f.path.as_str()).collect();
                assert_eq!(paths, vec!["static/js/app.js", "static/js/app.map.js"]);
                assert_eq!(next[0].content.as_deref(), Some(&b"let a;"[..]));
                assert_eq!(direct.len(), 1);
                assert_eq!(direct[0].destination_path.as_deref(), Some("js/app.ast.js"));
                assert!(next.iter().chain(&direct).all(|f| f.logical_path == "static/js/app.ts"));
            }
            other => panic!("expected FanOut, got {other:?}"),
        }
    }
}
