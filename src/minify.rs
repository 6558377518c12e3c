//! Minification of HTML, CSS and JS output.
//!
//! Everything goes through `minify_html`. Standalone stylesheets and scripts
//! are wrapped in a `<style>`/`<script>` element, minified as an HTML
//! fragment, and unwrapped again.

use crate::config::MinifyConfig;

/// Kind of content to minify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinifyKind {
    Html,
    Css,
    Js,
}

impl MinifyKind {
    fn wrapper(self) -> Option<(&'static str, &'static str)> {
        match self {
            MinifyKind::Html => None,
            MinifyKind::Css => Some(("<style>", "</style>")),
            MinifyKind::Js => Some(("<script>", "</script>")),
        }
    }
}

fn cfg(config: &MinifyConfig) -> minify_html::Cfg {
    let mut cfg = minify_html::Cfg::new();
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    cfg.keep_comments = config.keep_comments;
    cfg.minify_css = config.css;
    cfg.minify_js = config.js;
    cfg.remove_bangs = !config.keep_comments;
    cfg.remove_processing_instructions = true;
    cfg
}

/// Minify `content`. Returns the input unchanged if it cannot be minified
/// safely.
pub fn minify(content: &[u8], kind: MinifyKind, config: &MinifyConfig) -> Vec<u8> {
    let Some((open, close)) = kind.wrapper() else {
        return minify_html::minify(content, &cfg(config));
    };

    // The closing tag inside the content would end the wrapper early.
    let needle = &close.as_bytes()[..close.len() - 1];
    if content
        .windows(needle.len())
        .any(|w| w.eq_ignore_ascii_case(needle))
    {
        tracing::debug!("not minifying {kind:?} containing {close}");
        return content.to_vec();
    }

    let mut wrapped = Vec::with_capacity(content.len() + open.len() + close.len());
    wrapped.extend_from_slice(open.as_bytes());
    wrapped.extend_from_slice(content);
    wrapped.extend_from_slice(close.as_bytes());

    let minified = minify_html::minify(&wrapped, &cfg(config));
    match minified
        .strip_prefix(open.as_bytes())
        .and_then(|rest| rest.strip_suffix(close.as_bytes()))
    {
        Some(inner) => inner.to_vec(),
        None => {
            tracing::debug!("minified {kind:?} lost its wrapper, keeping original");
            content.to_vec()
        }
    }
}
