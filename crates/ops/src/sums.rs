//! Recording input sums
//!
//! A recipe's URL inputs need a digest before the recipe can be identified.
//! `record_sums` resolves the missing ones and stores them in the recipe's
//! sums record; `sum_path` computes one sum for pasting into a recipe.

use std::collections::BTreeMap;
use std::path::Path;

use vessel_errors::{Error, OpsError};
use vessel_events::{AppEvent, EventEmitter, RecipeEvent};
use vessel_hash::{Sum, SumAlgo};
use vessel_net::{fetch_to_cache, head_etag, sum_file};
use vessel_recipe::sums_asset;

use crate::types::SumsReport;
use crate::OpsCtx;

/// Resolve every URL input of `name` that has no sum and record it
///
/// A quoted `ETag` from a HEAD request is recorded when the server sends one;
/// otherwise the input is downloaded into the cache and hashed with `b2`.
/// The record is written next to the recipe, so only local recipes qualify.
///
/// # Errors
///
/// Returns `OpsError::OperationFailed` if the recipe is not local, or an
/// error if a request fails or the record cannot be written.
pub async fn record_sums(ctx: &OpsCtx, name: &str) -> Result<SumsReport, Error> {
    ctx.emit_operation_started("sum");
    let inspection = ctx.loader.inspect(name).await?;
    let Some(dir) = inspection.dir else {
        return Err(OpsError::OperationFailed {
            message: format!("recipe {name} is not in a local directory; sums cannot be recorded"),
        }
        .into());
    };

    let mut sums = inspection.sums;
    let mut recorded = BTreeMap::new();
    for (input, spec) in &inspection.evaluated.inputs {
        if !spec.is_url() || spec.sum.is_some() {
            continue;
        }
        let Some(url) = spec.path.as_deref() else {
            continue;
        };
        if sums.get(url).is_some() {
            continue;
        }
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let sum = url_sum(ctx, url).await?;
        tracing::info!(recipe = name, %input, url, %sum, "recorded sum");
        sums.insert(url, sum.clone());
        recorded.insert(url.to_string(), sum);
    }

    let file = dir.join(sums_asset(name));
    if !recorded.is_empty() {
        let json = serde_json::to_vec_pretty(&sums)
            .map_err(|e| Error::internal(format!("serialize sums: {e}")))?;
        tokio::fs::write(&file, json)
            .await
            .map_err(|e| Error::io_with_path(&e, &file))?;
        ctx.emit(AppEvent::Recipe(RecipeEvent::SumsRecorded {
            name: name.to_string(),
            count: recorded.len(),
        }));
    }

    ctx.emit_operation_completed("sum", true);
    Ok(SumsReport {
        file,
        recorded,
        total: sums.len(),
    })
}

/// Sum of a local file or URL, as a `file(...)` snippet for a recipe
///
/// # Errors
///
/// Returns an error if the file cannot be read or the URL cannot be fetched.
pub async fn sum_path(ctx: &OpsCtx, path: &str) -> Result<String, Error> {
    let sum = if path.starts_with("http://") || path.starts_with("https://") {
        url_sum(ctx, path).await?
    } else {
        sum_file(Path::new(path), SumAlgo::B2).await?
    };
    Ok(snippet(path, &sum))
}

async fn url_sum(ctx: &OpsCtx, url: &str) -> Result<Sum, Error> {
    if let Some(etag) = head_etag(&ctx.net, url).await? {
        return Ok(Sum::new(SumAlgo::Etag, etag));
    }
    let fetched = fetch_to_cache(&ctx.net, &ctx.config.cache_path(), url, None, &ctx.tx).await?;
    sum_file(&fetched.path, SumAlgo::B2).await
}

fn snippet(path: &str, sum: &Sum) -> String {
    format!(
        "file(\"{path}\", sum = (\"{}\", \"{}\"))",
        sum.algo,
        sum.value.replace('"', "\\\"")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_escapes_etag_quotes() {
        let sum = Sum::new(SumAlgo::Etag, "\"abc\"");
        assert_eq!(
            snippet("https://example.com/a.tar.gz", &sum),
            r#"file("https://example.com/a.tar.gz", sum = ("etag", "\"abc\""))"#
        );
    }

    #[test]
    fn test_snippet_for_b2() {
        let sum = Sum::b2_of(b"data");
        assert_eq!(
            snippet("./patch.diff", &sum),
            format!("file(\"./patch.diff\", sum = (\"b2\", \"{}\"))", sum.value)
        );
    }
}
