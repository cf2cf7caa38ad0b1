pub mod chat;
pub mod kb;
pub mod meta;
pub mod openai;
pub mod providers;
pub mod reflexion;

use futures_util::{stream, StreamExt};
use reflex_providers::{LlmChunkStream, LlmResponse, LlmResultChunk, LlmResultChunkDelta};

/// Streamed handlers accept either response shape; a complete result becomes
/// a single final chunk.
pub(crate) fn into_chunk_stream(response: LlmResponse) -> LlmChunkStream {
    match response {
        LlmResponse::Stream(chunks) => chunks,
        LlmResponse::Complete(result) => stream::once(async move {
            Ok(LlmResultChunk {
                model: result.model,
                delta: LlmResultChunkDelta {
                    index: 0,
                    message: result.message,
                    usage: Some(result.usage),
                    finish_reason: result.finish_reason.or_else(|| Some("stop".into())),
                },
            })
        })
        .boxed(),
    }
}
