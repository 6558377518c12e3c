//! End-to-end builds over layered source trees in a temp directory.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use strata::config::{RunOptions, SiteConfig};
use strata::site::{BuildError, BuildReport, build};
use tempfile::TempDir;

struct Site {
    tmp: TempDir,
    config: SiteConfig,
}

impl Site {
    fn new(sources: &[&str]) -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
            config: SiteConfig {
                sources: sources.iter().map(|s| s.to_string()).collect(),
                ..SiteConfig::default()
            },
        }
    }

    fn file(self, source: &str, path: &str, content: &str) -> Self {
        self.write(source, path, content);
        self
    }

    fn write(&self, source: &str, path: &str, content: &str) {
        let full = self.tmp.path().join(source).join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn dst(&self) -> PathBuf {
        self.root().join("dst")
    }

    async fn build(&self) -> BuildReport {
        self.build_with(plain()).await.unwrap()
    }

    async fn build_with(&self, options: RunOptions) -> Result<BuildReport, BuildError> {
        build(self.root(), self.config.clone(), options).await
    }

    fn output(&self, path: &str) -> String {
        fs::read_to_string(self.dst().join(path))
            .unwrap_or_else(|e| panic!("missing output {path}: {e}"))
    }

    fn outputs(&self) -> Vec<String> {
        let dst = self.dst();
        let mut files: Vec<String> = walkdir::WalkDir::new(&dst)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(&dst)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .filter(|p| p != strata::manifest::MANIFEST_FILENAME)
            .collect();
        files.sort();
        files
    }
}

/// No minification, so outputs can be compared literally.
fn plain() -> RunOptions {
    RunOptions {
        no_minify: true,
        ..RunOptions::default()
    }
}

const BARE_LAYOUT: &str = "{{ content }}";

// =========================================================================
// Precedence and duplicates
// =========================================================================

#[tokio::test]
async fn earliest_source_wins() {
    let site = Site::new(&["src", "theme"])
        .file("theme", "layouts/base.tera", BARE_LAYOUT)
        .file("src", "content/about.md", "site about")
        .file("theme", "content/about.md", "theme about")
        .file("theme", "content/contact.md", "theme contact")
        .file("theme", "static/site.css", "theme css")
        .file("src", "static/site.css", "site css");

    let report = site.build().await;

    assert!(site.output("about/index.html").contains("site about"));
    assert!(site.output("contact/index.html").contains("theme contact"));
    assert_eq!(site.output("site.css"), "site css");
    assert_eq!(report.discovered, 3);
    assert_eq!(report.shadowed, 2);
}

#[tokio::test]
async fn each_destination_is_written_once() {
    let site = Site::new(&["a", "b", "c"])
        .file("a", "static/x.txt", "a")
        .file("b", "static/x.txt", "b")
        .file("c", "static/x.txt", "c")
        .file("c", "static/y.txt", "c");

    let report = site.build().await;

    let destinations: Vec<_> = report.written.iter().map(|w| w.destination.as_str()).collect();
    let unique: BTreeSet<_> = destinations.iter().collect();
    assert_eq!(destinations.len(), unique.len());
    assert_eq!(site.outputs(), vec!["x.txt", "y.txt"]);
    assert_eq!(site.output("x.txt"), "a");
}

#[tokio::test]
async fn layouts_and_metadata_are_layered() {
    let site = Site::new(&["src", "theme"])
        .file("theme", "metadata.json", r#"{"title": "Theme", "author": "Ann"}"#)
        .file("src", "metadata.json", r#"{"title": "Site"}"#)
        .file("theme", "layouts/base.tera", "{% include \"partials/head\" %}{{ content }}")
        .file("theme", "partials/head.html", "<title>theme</title>")
        .file("src", "partials/head.html", "<title>{{ site.title }} by {{ site.author }}</title>")
        .file("src", "content/index.md", "hi");

    site.build().await;

    assert_eq!(
        site.output("index.html"),
        "<title>Site by Ann</title><p>hi</p>\n"
    );
}

// =========================================================================
// Paths and URLs
// =========================================================================

#[tokio::test]
async fn page_url_matches_destination() {
    let mut site = Site::new(&["src"])
        .file("src", "layouts/base.tera", "{{ page.page_url }}")
        .file("src", "content/about.md", "x")
        .file("src", "content/blog/first-post.md", "x")
        .file("src", "content/feed.xml.tera", "{{ page.page_url }}");
    site.config
        .metadata
        .insert("site_url".into(), "https://example.com".into());

    site.build().await;

    for destination in ["about/index.html", "blog/first-post/index.html", "feed/index.xml"] {
        assert_eq!(
            site.output(destination),
            format!("https://example.com/{destination}")
        );
    }
}

#[tokio::test]
async fn site_url_from_metadata_file_sets_page_urls() {
    let site = Site::new(&["src", "theme"])
        .file("theme", "metadata.json", r#"{"site_url": "https://example.com"}"#)
        .file("src", "layouts/base.tera", "{{ page.page_url }} {{ site.site_url }}")
        .file("src", "content/about.md", "x");

    site.build().await;
    assert_eq!(
        site.output("about/index.html"),
        "https://example.com/about/index.html https://example.com"
    );

    site.build_with(RunOptions {
        development: true,
        ..plain()
    })
    .await
    .unwrap();
    assert_eq!(
        site.output("about/index.html"),
        "http://localhost:8080/about/index.html http://localhost:8080"
    );
}

#[tokio::test]
async fn index_pages_are_not_nested() {
    let site = Site::new(&["src"])
        .file("src", "layouts/base.tera", BARE_LAYOUT)
        .file("src", "content/index.md", "home")
        .file("src", "content/blog/index.md", "blog");

    site.build().await;

    assert_eq!(site.outputs(), vec!["blog/index.html", "index.html"]);
}

#[tokio::test]
async fn underscore_prefix_follows_config() {
    let mut site = Site::new(&["src"])
        .file("src", "layouts/base.tera", BARE_LAYOUT)
        .file("src", "content/_draft.md", "d");

    site.build().await;
    assert_eq!(site.outputs(), vec!["_draft/index.html"]);

    site.config.rename.underscore = true;
    site.build_with(RunOptions {
        remove: true,
        ..plain()
    })
    .await
    .unwrap();
    assert_eq!(site.outputs(), vec!["draft/index.html"]);
}

#[tokio::test]
async fn static_files_keep_their_names() {
    let site = Site::new(&["src"])
        .file("src", "static/img/logo.svg", "<svg/>")
        .file("src", "static/about.html", "<p>static</p>");

    site.build().await;

    assert_eq!(site.outputs(), vec!["about.html", "img/logo.svg"]);
    assert_eq!(site.output("about.html"), "<p>static</p>");
}

// =========================================================================
// Change detection
// =========================================================================

#[tokio::test]
async fn second_build_reads_nothing() {
    let site = Site::new(&["src"])
        .file("src", "layouts/base.tera", BARE_LAYOUT)
        .file("src", "content/index.md", "# Home")
        .file("src", "content/about.md", "# About")
        .file("src", "static/site.css", "body {}");

    let first = site.build().await;
    let before: Vec<_> = site.outputs().iter().map(|p| site.output(p)).collect();

    let second = site.build().await;
    let after: Vec<_> = site.outputs().iter().map(|p| site.output(p)).collect();

    assert_eq!(first.pipeline.entered("read"), 3);
    assert_eq!(second.pipeline.entered("read"), 0);
    assert_eq!(second.pipeline.entered("render"), 0);
    assert_eq!(second.unchanged, 3);
    assert!(second.written.is_empty());
    assert_eq!(before, after);
}

#[tokio::test]
async fn edited_file_is_rebuilt_alone() {
    let site = Site::new(&["src"])
        .file("src", "layouts/base.tera", BARE_LAYOUT)
        .file("src", "content/index.md", "old")
        .file("src", "content/about.md", "about");
    site.build().await;

    site.write("src", "content/index.md", "new and longer");
    let report = site.build().await;

    assert_eq!(report.pipeline.entered("read"), 1);
    assert!(site.output("index.html").contains("new and longer"));
}

#[tokio::test]
async fn deleted_output_is_rebuilt() {
    let site = Site::new(&["src"]).file("src", "static/a.txt", "a");
    site.build().await;
    fs::remove_file(site.dst().join("a.txt")).unwrap();

    let report = site.build().await;
    assert_eq!(report.pipeline.entered("read"), 1);
    assert_eq!(site.output("a.txt"), "a");
}

#[tokio::test]
async fn layout_change_rebuilds_everything() {
    let site = Site::new(&["src"])
        .file("src", "layouts/base.tera", "v1 {{ content }}")
        .file("src", "content/index.md", "x");
    site.build().await;

    site.write("src", "layouts/base.tera", "v2 {{ content }}");
    let report = site.build().await;

    assert_eq!(report.unchanged, 0);
    assert!(site.output("index.html").starts_with("v2"));
}

#[tokio::test]
async fn no_changed_rebuilds_everything() {
    let site = Site::new(&["src"]).file("src", "static/a.txt", "a");
    site.build().await;

    let report = site
        .build_with(RunOptions {
            no_changed: true,
            ..plain()
        })
        .await
        .unwrap();
    assert_eq!(report.pipeline.entered("read"), 1);
    assert_eq!(report.pipeline.entered("changed-filter"), 0);
}

#[tokio::test]
async fn remove_clears_stray_files() {
    let site = Site::new(&["src"]).file("src", "static/a.txt", "a");
    fs::create_dir_all(site.dst()).unwrap();
    fs::write(site.dst().join("stray.txt"), "old").unwrap();

    site.build_with(RunOptions {
        remove: true,
        ..plain()
    })
    .await
    .unwrap();
    assert_eq!(site.outputs(), vec!["a.txt"]);
}

// =========================================================================
// Failures
// =========================================================================

#[tokio::test]
async fn broken_page_does_not_stop_the_build() {
    let site = Site::new(&["src"])
        .file("src", "layouts/base.tera", BARE_LAYOUT)
        .file("src", "content/broken.md.tera", "{{ missing.value }}")
        .file("src", "content/fine.md", "fine");

    let report = site.build().await;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].logical_path, "content/broken.md.tera");
    assert_eq!(report.failed[0].stage, "render");
    assert_eq!(site.outputs(), vec!["fine/index.html"]);

    // Failed sources are retried on the next run.
    let again = site.build().await;
    assert_eq!(again.pipeline.entered("read"), 1);
}

#[tokio::test]
async fn broken_theme_partial_does_not_stop_the_build() {
    let site = Site::new(&["src", "theme"])
        .file("src", "layouts/base.tera", BARE_LAYOUT)
        .file("theme", "partials/unused.tera", "{% if %}")
        .file("theme", "layouts/base.tera", "{{ content")
        .file("src", "content/index.md", "hi");

    let report = site.build().await;
    assert!(report.failed.is_empty());
    assert_eq!(site.output("index.html"), "<p>hi</p>\n");
}

#[tokio::test]
async fn too_old_engine_is_fatal() {
    let mut site = Site::new(&["src"]).file("src", "static/a.txt", "a");
    site.config.version = Some("99.0.0".into());
    assert!(site.build_with(plain()).await.is_err());
    assert!(site.outputs().is_empty());
}

// =========================================================================
// Helpers, decorators, minification
// =========================================================================

#[tokio::test]
async fn helpers_and_decorators_reach_templates() {
    let site = Site::new(&["src"])
        .file("src", "helpers/year.toml", "builtin = \"literal\"\n[params]\nvalue = 2024\n")
        .file("src", "decorators/shout.toml", "builtin = \"upper\"\n")
        .file("src", "content/index.html.tera", "---\nlayout: false\n---\n{{ year() }} {{ \"hi\" | shout }}");

    site.build().await;
    assert_eq!(site.output("index.html").trim(), "2024 HI");
}

#[tokio::test]
async fn minification_is_skipped_in_development() {
    let site = Site::new(&["src"])
        .file("src", "static/site.css", "body {\n    color: red;\n}\n");

    site.build_with(RunOptions::default()).await.unwrap();
    assert_eq!(site.output("site.css"), "body{color:red}");

    site.build_with(RunOptions {
        development: true,
        remove: true,
        ..RunOptions::default()
    })
    .await
    .unwrap();
    assert_eq!(site.output("site.css"), "body {\n    color: red;\n}\n");
}

// =========================================================================
// External transforms
// =========================================================================

#[cfg(unix)]
#[tokio::test]
async fn css_transform_pipes_through_command() {
    let mut site = Site::new(&["src"]).file("src", "static/site.css", "body{color:red}");
    site.config.transform.css.command = vec!["tr".into(), "a-z".into(), "A-Z".into()];

    site.build().await;
    assert_eq!(site.output("site.css"), "BODY{COLOR:RED}");

    site.build_with(RunOptions {
        no_transform_css: true,
        remove: true,
        ..plain()
    })
    .await
    .unwrap();
    assert_eq!(site.output("site.css"), "body{color:red}");
}

#[cfg(unix)]
#[tokio::test]
async fn script_transform_fans_out_companions() {
    let mut site = Site::new(&["src"]).file("src", "static/js/app.ts", "let a: number = 1;");
    site.config.transform.js.command = vec![
        "sh".into(),
        "-c".into(),
        "cat > \"$0\" && echo '{}' > \"$0.map\" && echo tree > \"$0.ast\"".into(),
        "{output}".into(),
    ];
    site.config.transform.js.artifacts = vec!["map".into()];
    site.config.transform.js.dumps = vec!["ast".into()];

    let report = site.build().await;

    assert_eq!(
        site.outputs(),
        vec!["js/app.ast.js", "js/app.js", "js/app.map.js"]
    );
    assert_eq!(site.output("js/app.js"), "let a: number = 1;");
    assert!(report.written.iter().all(|w| w.logical_path == "static/js/app.ts"));

    let again = site.build().await;
    assert_eq!(again.unchanged, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn script_transform_keeps_inner_dots() {
    let mut site = Site::new(&["src"])
        .file("src", "static/app.js", "let app;")
        .file("src", "static/app.min.js", "let min;");
    site.config.transform.js.command = vec![
        "sh".into(),
        "-c".into(),
        "cat > \"$0\" && echo '{}' > \"$0.map\"".into(),
        "{output}".into(),
    ];
    site.config.transform.js.artifacts = vec!["map".into()];

    let report = site.build().await;

    assert_eq!(
        site.outputs(),
        vec!["app.js", "app.map.js", "app.min.js", "app.min.map.js"]
    );
    assert_eq!(site.output("app.js"), "let app;");
    assert_eq!(site.output("app.min.js"), "let min;");
    assert_eq!(report.written.len(), 4);
}
