//! Vanity-domain discovery
//!
//! A vanity host serves an HTML page carrying
//! `<meta name="vessel-import" content="<prefix> <vcs> <repo-root>">` tags when
//! queried with `?vessel-get=1`. Recipe and car lookups use the tags to map a
//! custom domain onto a code-host repository.

use regex::Regex;
use vessel_errors::Error;
use vessel_events::EventSender;

use crate::{fetch_text, NetClient};

/// Query parameter that asks a vanity host for its import tags
pub const DISCOVERY_QUERY: &str = "vessel-get=1";

/// `name` attribute of the discovery meta tag
pub const META_NAME: &str = "vessel-import";

/// One `vessel-import` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaImport {
    pub prefix: String,
    pub vcs: String,
    pub repo_root: String,
}

/// Extract every `vessel-import` declaration from an HTML document
///
/// # Errors
///
/// Returns an error if the tag patterns fail to compile.
pub fn parse_meta_imports(html: &str) -> Result<Vec<MetaImport>, Error> {
    let meta = Regex::new(r#"(?is)<meta\s+([^>]*)>"#)
        .map_err(|e| Error::internal(format!("meta tag pattern: {e}")))?;
    let attrs = Regex::new(r#"(?i)([a-z-]+)\s*=\s*"([^"]*)""#)
        .map_err(|e| Error::internal(format!("attribute pattern: {e}")))?;

    let mut imports = Vec::new();

    for tag in meta.captures_iter(html) {
        let mut name = None;
        let mut content = None;
        for attr in attrs.captures_iter(&tag[1]) {
            match attr[1].to_ascii_lowercase().as_str() {
                "name" => name = Some(attr[2].to_string()),
                "content" => content = Some(attr[2].to_string()),
                _ => {}
            }
        }

        if name.as_deref() != Some(META_NAME) {
            continue;
        }
        let Some(content) = content else { continue };

        let fields: Vec<&str> = content.split_whitespace().collect();
        if let [prefix, vcs, repo_root] = fields.as_slice() {
            imports.push(MetaImport {
                prefix: (*prefix).to_string(),
                vcs: (*vcs).to_string(),
                repo_root: (*repo_root).to_string(),
            });
        }
    }

    Ok(imports)
}

/// Ask `<scheme>://<repo>?vessel-get=1` which repository serves `repo`
///
/// Returns the repo root of the declaration whose prefix equals `repo`, or
/// `None` when the page declares no matching import.
///
/// # Errors
///
/// Returns an error if the discovery page cannot be fetched.
pub async fn discover(
    client: &NetClient,
    scheme: &str,
    repo: &str,
    tx: &EventSender,
) -> Result<Option<String>, Error> {
    let url = format!("{scheme}://{repo}?{DISCOVERY_QUERY}");
    let html = fetch_text(client, &url, tx).await?;

    let found = parse_meta_imports(&html)?
        .into_iter()
        .find(|import| import.prefix == repo)
        .map(|import| import.repo_root);

    tracing::debug!(repo, resolved = ?found, "vanity discovery");
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta_imports() {
        let html = r#"
            <html><head>
            <meta name="vessel-import" content="pkgs.example.org github.com/example/pkgs">
            <meta name="vessel-import" content="pkgs.example.org git github.com/example/pkgs">
            <meta name="go-import" content="pkgs.example.org git github.com/example/go">
            <META CONTENT="other.example.org git github.com/example/other" NAME="vessel-import">
            </head></html>
        "#;

        let imports = parse_meta_imports(html).unwrap();
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].prefix, "pkgs.example.org");
        assert_eq!(imports[0].vcs, "git");
        assert_eq!(imports[0].repo_root, "github.com/example/pkgs");
        assert_eq!(imports[1].prefix, "other.example.org");
    }
}
