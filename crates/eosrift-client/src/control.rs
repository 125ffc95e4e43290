//! Control connection dialing

use crate::ClientError;
use eosrift_proto::{
    read_json, write_json, HttpTunnelRequest, HttpTunnelResponse, TunnelRequest, TunnelResponse,
};
use eosrift_transport::{connect_control, MuxSession};
use std::time::Duration;
use tracing::debug;

const MIN_DIAL_DELAY: Duration = Duration::from_millis(250);
const MAX_DIAL_DELAY: Duration = Duration::from_secs(5);

/// Dial the control endpoint until it succeeds, with exponential backoff.
/// Cancellation is the caller's business (drop the future or race it).
pub async fn dial_control_with_retry(control_url: &str) -> Result<MuxSession, ClientError> {
    let mut delay = MIN_DIAL_DELAY;

    loop {
        match connect_control(control_url).await {
            Ok(session) => return Ok(session),
            Err(err) => {
                debug!(%control_url, "control dial failed: {err}, retrying in {delay:?}");
            }
        }

        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(MAX_DIAL_DELAY);
    }
}

/// Dial, send an HTTP tunnel request on a fresh control stream, and read
/// the server's verdict. On any failure the session is torn down.
pub(crate) async fn create_http_tunnel(
    control_url: &str,
    request: HttpTunnelRequest,
) -> Result<(MuxSession, HttpTunnelResponse), ClientError> {
    let session = dial_control_with_retry(control_url).await?;

    let response = match control_exchange(&session, TunnelRequest::Http(request)).await {
        Ok(response) => response,
        Err(err) => {
            session.close().await;
            return Err(err);
        }
    };

    let response = match response {
        TunnelResponse::Http(resp) => resp,
        TunnelResponse::Tcp(_) => {
            session.close().await;
            return Err(ClientError::InvalidServerResponse);
        }
    };

    if let Some(message) = response.error {
        session.close().await;
        return Err(ClientError::Control(message));
    }
    if response.id.is_empty() || response.url.is_empty() {
        session.close().await;
        return Err(ClientError::InvalidServerResponse);
    }

    Ok((session, response))
}

/// One request/response round trip on a fresh control stream.
pub(crate) async fn control_exchange(
    session: &MuxSession,
    request: TunnelRequest,
) -> Result<TunnelResponse, ClientError> {
    let mut stream = session.open_stream().await?;
    write_json(&mut stream, &request).await?;
    let response: TunnelResponse = read_json(&mut stream).await?;
    Ok(response)
}
