//! Upload transfer: one form POST of a synthesized payload.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use url::Url;
use url::form_urlencoded;

use crate::download;
use crate::error::Result;
use crate::params;
use crate::progress::ProgressSink;
use crate::transport::{RequestBody, TransferRequest, Transport};

/// Build the form body for a `size_kb` upload.
///
/// The `content` field repeats a ten character block `size_kb * 100 - 51`
/// times; the missing blocks make room for the framing the server counts.
pub fn payload(size_kb: u32) -> Bytes {
    let content = params::UPLOAD_BLOCK.repeat(block_count(size_kb));
    let encoded = form_urlencoded::Serializer::new(String::new())
        .append_pair("content", &content)
        .finish();
    Bytes::from(encoded)
}

fn block_count(size_kb: u32) -> usize {
    (size_kb as usize)
        .saturating_mul(100)
        .saturating_sub(params::UPLOAD_FRAMING_BLOCKS as usize)
}

/// Megabytes a `size_kb` upload nominally carries.
pub fn size_to_megabytes(size_kb: u32) -> f64 {
    size_kb as f64 / 1000.0
}

/// POST `payload` to `url` and drain the response. Returns the number of body
/// bytes written.
pub async fn run(
    transport: &dyn Transport,
    url: Url,
    payload: Bytes,
    progress: Option<Arc<dyn ProgressSink>>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let body = RequestBody::new(payload).with_progress(progress);
    let written = body.content_length();
    let response = transport
        .send(TransferRequest::post_form(url.clone(), body), cancel)
        .await?;
    download::ensure_success(response.status, &url)?;
    download::drain(response.body, None, cancel).await?;
    Ok(written)
}
