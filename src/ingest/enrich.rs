// src/ingest/enrich.rs
use futures::future::join_all;
use metrics::counter;

use crate::ingest::types::{Attachment, Entry};
use crate::preview::PreviewLookup;

/// Attach preview text to every attachment that has a preview id.
///
/// Best effort: a failed lookup leaves that attachment as it was and is only
/// logged. Lookups for one entry run concurrently; output order matches input.
pub async fn enrich_entry(
    mut entry: Entry,
    lookup: Option<&dyn PreviewLookup>,
    source_id: &str,
) -> Entry {
    let Some(lookup) = lookup else {
        return entry;
    };
    if entry.attachments.is_empty() {
        return entry;
    }

    let attachments = std::mem::take(&mut entry.attachments);
    entry.attachments = join_all(
        attachments
            .into_iter()
            .map(|att| enrich_attachment(att, lookup, source_id)),
    )
    .await;
    entry
}

async fn enrich_attachment(
    attachment: Attachment,
    lookup: &dyn PreviewLookup,
    source_id: &str,
) -> Attachment {
    let Some(preview_id) = attachment.preview_id.clone() else {
        return attachment;
    };
    match lookup.fetch_preview(&preview_id).await {
        Ok(content) => Attachment {
            preview_content: Some(content),
            ..attachment
        },
        Err(e) => {
            tracing::error!(
                source = source_id,
                preview_id = %preview_id,
                error = %e,
                "failed to fetch attachment preview"
            );
            counter!("archiver_preview_errors_total").increment(1);
            attachment
        }
    }
}
