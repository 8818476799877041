//! Paginated search over the mailbox

use tracing::debug;

use crate::client::GmailClient;
use crate::error::Result;
use crate::models::ExtractionBatch;

/// Upper bound Gmail accepts for `maxResults` on messages.list
pub const MAX_PAGE_SIZE: u32 = 500;

/// Run `query` and collect matching ids across all pages, in service order.
/// Pages are followed until the service stops returning a continuation token.
pub async fn collect_message_ids<C>(client: &C, query: &str, page_size: u32) -> Result<Vec<String>>
where
    C: GmailClient + ?Sized,
{
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let mut ids: Vec<String> = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = client
            .list_message_page(query, page_token.take(), page_size)
            .await?;
        pages += 1;
        ids.extend(page.ids);

        page_token = page.next_page_token;
        if page_token.is_none() {
            break;
        }
    }

    debug!(
        "Query '{}' yielded {} ids over {} page(s)",
        query,
        ids.len(),
        pages
    );
    Ok(ids)
}

/// Page through `query` adding ids to `batch` until it is full or the
/// service stops returning a continuation token.
///
/// Each page asks only for the room left in the batch. Ids the batch already
/// holds don't count toward it, so a page of duplicates leads to another
/// page rather than a short batch. Ids added before an error stay in the
/// batch. Returns how many ids this query added.
pub async fn fill_batch<C>(
    client: &C,
    query: &str,
    batch: &mut ExtractionBatch,
    page_size: u32,
) -> Result<usize>
where
    C: GmailClient + ?Sized,
{
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let mut page_token: Option<String> = None;
    let mut added = 0usize;
    let mut pages = 0usize;

    while !batch.is_full() {
        let max_results = page_size.min(u32::try_from(batch.remaining()).unwrap_or(page_size));
        let page = client
            .list_message_page(query, page_token.take(), max_results)
            .await?;
        pages += 1;
        added += batch.extend(page.ids);

        page_token = page.next_page_token;
        if page_token.is_none() {
            break;
        }
    }

    debug!(
        "Query '{}' added {} ids over {} page(s)",
        query, added, pages
    );
    Ok(added)
}
