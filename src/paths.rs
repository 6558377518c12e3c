//! Output path planning and URL derivation.
//!
//! Content pages are renamed before rendering so that every page ends up
//! with a clean URL:
//!
//! ```text
//! content/about.md        → content/about/index.md   → about/index.html
//! content/_draft.md       → content/draft/index.md   (underscore = true)
//! content/blog/index.md   → content/blog/index.md    (already an index)
//! static/js/app.js        → static/js/app.js         → js/app.js
//! ```
//!
//! ## Extension Resolution
//!
//! A file name may carry a chain of extensions, each consumed by a render
//! engine (`page.md.tera` is a template whose output is markdown). Only the
//! contiguous run of *resolvable* extensions at the end of the name is
//! stripped; the scan stops at the first extension that no engine resolves:
//!
//! ```text
//! about.md            → about
//! notes.txt.md        → notes.txt
//! page.md.tera        → page
//! archive.md.zip      → archive.md.zip
//! ```

use crate::config::RenameConfig;
use crate::types::Subtree;

/// Strip the trailing run of resolvable extensions from a file name.
pub fn resolve_extensions<S: AsRef<str>>(file_name: &str, resolvable: &[S]) -> String {
    let mut parts = file_name.split('.');
    let base = parts.next().unwrap_or_default();
    let mut extensions: Vec<&str> = parts.collect();

    while let Some(last) = extensions.last() {
        if resolvable.iter().any(|r| r.as_ref() == *last) {
            extensions.pop();
        } else {
            break;
        }
    }

    if extensions.is_empty() {
        base.to_string()
    } else {
        format!("{}.{}", base, extensions.join("."))
    }
}

/// Name a content file will have once every render engine has run.
///
/// If rendering consumed all extensions the page becomes `.html`; an
/// extension that survives resolution (`feed.xml.tera` → `feed.xml`) is kept.
pub fn rendered_name<S: AsRef<str>>(file_name: &str, resolvable: &[S]) -> String {
    let resolved = resolve_extensions(file_name, resolvable);
    if resolved.contains('.') {
        resolved
    } else {
        format!("{resolved}.html")
    }
}

/// Apply the underscore and prettify rename rules to a content path.
///
/// Paths outside the `content` subtree are returned unchanged.
pub fn rename_content(path: &str, rules: &RenameConfig) -> String {
    let mut segments: Vec<String> = path.split('/').map(str::to_string).collect();
    if segments.first().map(String::as_str) != Some(Subtree::Content.dir_name()) {
        return path.to_string();
    }
    let Some(last) = segments.pop() else {
        return path.to_string();
    };

    let name = match last.strip_prefix('_') {
        Some(stripped) if rules.underscore => stripped,
        _ => last.as_str(),
    };

    let resolved = resolve_extensions(name, &rules.resolvable);
    let base = resolved.split('.').next().unwrap_or_default();
    let renamed = if rules.prettify && base != "index" {
        prettify(name)
    } else {
        name.to_string()
    };

    segments.push(renamed);
    segments.join("/")
}

/// `name.ext1.ext2` → `name/index.ext1.ext2`.
fn prettify(name: &str) -> String {
    match name.split_once('.') {
        Some((base, extensions)) => format!("{base}/index.{extensions}"),
        None => format!("{name}/index"),
    }
}

/// Strip the leading `content`/`static` segment, producing the
/// destination-relative path.
pub fn strip_type_segment(path: &str) -> String {
    match path.split_once('/') {
        Some((head, rest)) if matches!(Subtree::from_segment(head), Some(Subtree::Content | Subtree::Static)) => {
            rest.to_string()
        }
        _ => path.to_string(),
    }
}

/// Site root URL: the configured site URL with a trailing slash, or `/`.
pub fn base_url(site_url: Option<&str>) -> String {
    match site_url.map(str::trim).filter(|url| !url.is_empty()) {
        Some(url) if url.ends_with('/') => url.to_string(),
        Some(url) => format!("{url}/"),
        None => "/".to_string(),
    }
}

/// Public URL of a renamed content page.
///
/// `base_url` + the directories between the type segment and the file name
/// + the rendered file name.
pub fn page_url<S: AsRef<str>>(base_url: &str, path: &str, resolvable: &[S]) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let Some((file_name, rest)) = segments.split_last() else {
        return base_url.to_string();
    };

    let mut url = base_url.to_string();
    let directories = rest.get(1..).unwrap_or_default();
    if !directories.is_empty() {
        url.push_str(&directories.join("/"));
        url.push('/');
    }
    url.push_str(&rendered_name(file_name, resolvable));
    url
}

/// Replace the file name of a `/`-separated path.
pub fn with_file_name(path: &str, file_name: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/{file_name}"),
        None => file_name.to_string(),
    }
}

/// Replace the last extension of the file name with `extension`.
///
/// `static/js/app.ts` → `static/js/app.js`, `static/js/vendor.min.ts` →
/// `static/js/vendor.min.js`. A name without a dot gains the extension.
pub fn with_extension(path: &str, extension: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    with_file_name(path, &format!("{stem}.{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(prettify: bool, underscore: bool) -> RenameConfig {
        RenameConfig {
            prettify,
            underscore,
            ..RenameConfig::default()
        }
    }

    // =========================================================================
    // Extension resolution
    // =========================================================================

    #[test]
    fn resolves_single_extension() {
        assert_eq!(resolve_extensions("about.md", &["md"]), "about");
    }

    #[test]
    fn resolves_chained_extensions() {
        assert_eq!(resolve_extensions("page.md.tera", &["md", "tera"]), "page");
    }

    #[test]
    fn stops_at_first_unresolvable_extension() {
        assert_eq!(resolve_extensions("notes.txt.md", &["md"]), "notes.txt");
        // `md` is resolvable but sits before the unresolvable `zip`.
        assert_eq!(resolve_extensions("archive.md.zip", &["md"]), "archive.md.zip");
    }

    #[test]
    fn no_extension_is_unchanged() {
        assert_eq!(resolve_extensions("README", &["md"]), "README");
    }

    #[test]
    fn rendered_name_appends_html_only_when_fully_resolved() {
        assert_eq!(rendered_name("index.md", &["md"]), "index.html");
        assert_eq!(rendered_name("feed.xml.tera", &["tera"]), "feed.xml");
        assert_eq!(rendered_name("contact.html", &["md"]), "contact.html");
    }

    // =========================================================================
    // Rename rules
    // =========================================================================

    #[test]
    fn prettify_inserts_index_directory() {
        assert_eq!(rename_content("content/about.md", &rules(true, false)), "content/about/index.md");
    }

    #[test]
    fn prettify_keeps_all_extensions() {
        assert_eq!(
            rename_content("content/blog/post.md.tera", &rules(true, false)),
            "content/blog/post/index.md.tera"
        );
    }

    #[test]
    fn index_is_never_reprettified() {
        assert_eq!(rename_content("content/index.md", &rules(true, false)), "content/index.md");
        assert_eq!(rename_content("content/blog/index.md", &rules(true, false)), "content/blog/index.md");
        assert_eq!(rename_content("content/about/index", &rules(true, false)), "content/about/index");
        // `index.html.tera` resolves to `index.html`, still an index page.
        assert_eq!(
            rename_content("content/index.html.tera", &rules(true, false)),
            "content/index.html.tera"
        );
    }

    #[test]
    fn extensionless_name_prettifies() {
        assert_eq!(rename_content("content/about", &rules(true, false)), "content/about/index");
    }

    #[test]
    fn underscore_stripped_before_prettify() {
        assert_eq!(rename_content("content/_hidden.md", &rules(true, true)), "content/hidden/index.md");
    }

    #[test]
    fn underscore_preserved_when_disabled() {
        assert_eq!(rename_content("content/_hidden.md", &rules(true, false)), "content/_hidden/index.md");
        assert_eq!(rename_content("content/_hidden.md", &rules(false, false)), "content/_hidden.md");
    }

    #[test]
    fn underscore_index_is_exempt_after_stripping() {
        assert_eq!(rename_content("content/_index.md", &rules(true, true)), "content/index.md");
    }

    #[test]
    fn static_paths_are_not_renamed() {
        assert_eq!(rename_content("static/_app.js", &rules(true, true)), "static/_app.js");
    }

    #[test]
    fn prettify_disabled_keeps_name() {
        assert_eq!(rename_content("content/about.md", &rules(false, false)), "content/about.md");
    }

    // =========================================================================
    // Type segment
    // =========================================================================

    #[test]
    fn strips_type_segment() {
        assert_eq!(strip_type_segment("content/about/index.html"), "about/index.html");
        assert_eq!(strip_type_segment("static/js/app.js"), "js/app.js");
        assert_eq!(strip_type_segment("other/file.txt"), "other/file.txt");
        assert_eq!(strip_type_segment("content"), "content");
    }

    // =========================================================================
    // URLs
    // =========================================================================

    #[test]
    fn base_url_defaults_to_root() {
        assert_eq!(base_url(None), "/");
        assert_eq!(base_url(Some("")), "/");
    }

    #[test]
    fn base_url_gets_single_trailing_slash() {
        assert_eq!(base_url(Some("https://example.com")), "https://example.com/");
        assert_eq!(base_url(Some("https://example.com/")), "https://example.com/");
    }

    #[test]
    fn page_url_for_prettified_page() {
        let base = base_url(Some("https://example.com"));
        assert_eq!(
            page_url(&base, "content/about/index.md", &["md"]),
            "https://example.com/about/index.html"
        );
    }

    #[test]
    fn page_url_at_root_has_no_directory_prefix() {
        assert_eq!(page_url("/", "content/index.md", &["md"]), "/index.html");
    }

    #[test]
    fn page_url_nested_directories() {
        assert_eq!(
            page_url("/", "content/blog/2024/post/index.md.tera", &["md", "tera"]),
            "/blog/2024/post/index.html"
        );
    }

    #[test]
    fn extension_helpers() {
        assert_eq!(with_extension("static/js/app.ts", "js"), "static/js/app.js");
        assert_eq!(with_extension("static/js/app.ts", "map.js"), "static/js/app.map.js");
        assert_eq!(with_extension("static/js/LICENSE", "js"), "static/js/LICENSE.js");
        assert_eq!(with_file_name("content/a/b.md", "c.html"), "content/a/c.html");
        assert_eq!(with_file_name("b.md", "c.html"), "c.html");
    }

    #[test]
    fn with_extension_keeps_inner_dots() {
        assert_eq!(with_extension("static/vendor.min.ts", "js"), "static/vendor.min.js");
        assert_eq!(
            with_extension("static/vendor.min.js", "map.js"),
            "static/vendor.min.map.js"
        );
        assert_ne!(
            with_extension("static/app.min.js", "js"),
            with_extension("static/app.js", "js")
        );
    }
}
