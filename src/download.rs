//! Download transfer: one GET whose body is read and discarded.
//!
//! When a progress sink is attached, each chunk is reported as it is read.

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, SpeedtestError};
use crate::progress::ProgressSink;
use crate::transport::{TransferRequest, Transport};

/// Fetch `url` and drain the body. Returns the number of body bytes read.
pub async fn run(
    transport: &dyn Transport,
    url: Url,
    progress: Option<&dyn ProgressSink>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let response = transport
        .send(TransferRequest::get(url.clone()), cancel)
        .await?;
    ensure_success(response.status, &url)?;
    drain(response.body, progress, cancel).await
}

pub(crate) fn ensure_success(status: reqwest::StatusCode, url: &Url) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(SpeedtestError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

/// Read `body` to the end, discarding it.
pub(crate) async fn drain(
    mut body: BoxStream<'static, Result<Bytes>>,
    progress: Option<&dyn ProgressSink>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(SpeedtestError::Cancelled),
            chunk = body.next() => chunk,
        };
        let Some(chunk) = chunk else {
            return Ok(total);
        };
        let n = chunk?.len() as u64;
        if n != 0 {
            total += n;
            if let Some(sink) = progress {
                sink.update(n);
            }
        }
    }
}
