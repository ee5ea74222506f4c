//! Fan-out over paged backend endpoints

use crate::dataloader::Loader;
use crate::error::FetchError;
use crate::fetch::Params;
use futures::future::try_join_all;
use serde_json::Value;

/// Header carrying the total item count of a paged endpoint
pub const TOTAL_COUNT_HEADER: &str = "x-total-count";

/// Page size used for the fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOptions {
    pub size: u64,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self { size: 25 }
    }
}

/// Number of pages still to fetch after the first one
pub fn remaining_pages(total: u64, size: u64) -> u64 {
    if size == 0 || total == 0 {
        return 0;
    }
    total.div_ceil(size).saturating_sub(1)
}

/// Fetch every page of `path` and flatten the results.
///
/// The first page is fetched with `total_count=true`; the count it reports is
/// read once and fixes how many further pages are requested, so the fan-out
/// always terminates. Pages 2..n are fetched concurrently. Items keep their
/// order within a page and pages are concatenated in page order. Any failed
/// page fails the whole call.
///
/// If the backend omits the total count the first page is all there is.
pub async fn all_via_loader(
    loader: &Loader,
    path: &str,
    params: &Params,
    options: PageOptions,
) -> Result<Vec<Value>, FetchError> {
    if options.size == 0 {
        return Err(FetchError::InvalidRequest {
            url: path.to_string(),
            message: "page size must be greater than zero".into(),
        });
    }

    let first = loader
        .load(path, &page_params(params, 1, options.size, true))
        .await?;

    let Some(total) = first.header_u64(TOTAL_COUNT_HEADER) else {
        return Ok(items_of(first.body));
    };
    if total == 0 {
        return Ok(Vec::new());
    }

    let remaining = remaining_pages(total, options.size);
    tracing::debug!(
        loader = loader.name(),
        total,
        size = options.size,
        remaining,
        "fanning out paged request"
    );

    let pages = (2..=remaining + 1).map(|page| {
        let params = page_params(params, page, options.size, false);
        async move { loader.load(path, &params).await }
    });
    let rest = try_join_all(pages).await?;

    let mut items = items_of(first.body);
    for page in rest {
        items.extend(items_of(page.body));
    }
    Ok(items)
}

fn page_params(base: &Params, page: u64, size: u64, total_count: bool) -> Params {
    let mut params = base.clone();
    params.insert("page".into(), Value::from(page));
    params.insert("size".into(), Value::from(size));
    if total_count {
        params.insert("total_count".into(), Value::Bool(true));
    }
    params
}

fn items_of(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}
