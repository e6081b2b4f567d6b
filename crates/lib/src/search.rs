//! Search-only mode: retrieve ranked chunks instead of generating, and render them as one
//! assistant message.

use crate::api::{ApiError, Backend, Chunk, ChunksRequest, ContextFilter};
use crate::conversation::Message;

/// Chunks requested per search.
pub const SEARCH_LIMIT: u32 = 4;

/// Retrieve chunks for `text` within `filter` and render them. The message carries no sources.
pub async fn search(
    backend: &dyn Backend,
    text: &str,
    filter: Option<ContextFilter>,
) -> Result<Message, ApiError> {
    let chunks = backend
        .chunks_retrieval(ChunksRequest {
            text: text.to_string(),
            context_filter: filter,
            limit: Some(SEARCH_LIMIT),
        })
        .await?;
    log::debug!("search returned {} chunks", chunks.len());
    Ok(Message::assistant(format_chunks(&chunks)))
}

/// `**{n}.{file}** \n\n {excerpt} \n\n  ` per chunk, with ` (page {label})` before the closing
/// marker when the chunk has a page label. Numbering is 1-based in ranked order.
pub fn format_chunks(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .fold(String::new(), |mut out, (index, chunk)| {
            let file_name = chunk.file_name().unwrap_or(&chunk.document.doc_id);
            let heading_end = match chunk.page_label() {
                Some(page) => format!(" (page {})** ", page),
                None => "**".to_string(),
            };
            out.push_str(&format!(
                "**{}.{}{}\n\n {} \n\n  ",
                index + 1,
                file_name,
                heading_end,
                chunk.excerpt()
            ));
            out
        })
}
