//! JSON line framing for control streams
//!
//! Messages are written as a single JSON value followed by a newline, in one
//! buffered write. Multi-write encoders can surface spurious write errors
//! when the peer decodes the request and closes the stream quickly.

use crate::{ProtoError, MAX_CONTROL_FRAME_BYTES};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write `value` as a single JSON line.
pub async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut buf = serde_json::to_vec(value)?;
    buf.push(b'\n');
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one JSON line from the stream.
///
/// Reading stops at the first newline or at EOF. Peers may close the stream
/// immediately after sending a complete response, which can surface a late
/// transport error; if a parseable payload was delivered, it wins.
pub async fn read_json<R, T>(reader: &mut R) -> Result<T, ProtoError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut payload: Vec<u8> = Vec::new();
    let mut byte = [0u8; 1];

    let read_err = loop {
        match reader.read(&mut byte).await {
            Ok(0) => break None,
            Ok(_) => {
                if byte[0] == b'\n' {
                    break None;
                }
                payload.push(byte[0]);
                if payload.len() > MAX_CONTROL_FRAME_BYTES {
                    return Err(ProtoError::FrameTooLarge);
                }
            }
            Err(err) => break Some(err),
        }
    };

    if payload.is_empty() {
        return match read_err {
            Some(err) => Err(err.into()),
            None => Err(ProtoError::UnexpectedEof),
        };
    }

    match serde_json::from_slice(&payload) {
        Ok(value) => Ok(value),
        Err(parse_err) => match read_err {
            Some(err) => Err(err.into()),
            None => Err(parse_err.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{TcpTunnelRequest, TunnelRequest};

    #[tokio::test]
    async fn test_write_then_read() {
        let req = TunnelRequest::Tcp(TcpTunnelRequest {
            authtoken: "eos_x".into(),
            remote_port: 0,
        });

        let mut buf = Vec::new();
        write_json(&mut buf, &req).await.unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));

        let mut cursor = std::io::Cursor::new(buf);
        let decoded: TunnelRequest = read_json(&mut cursor).await.unwrap();
        assert_eq!(decoded, req);
    }

    #[tokio::test]
    async fn test_read_without_trailing_newline() {
        // A peer may close the stream right after the payload.
        let mut cursor = std::io::Cursor::new(br#"{"type":"tcp","remote_port":7}"#.to_vec());
        let decoded: TunnelRequest = read_json(&mut cursor).await.unwrap();
        match decoded {
            TunnelRequest::Tcp(req) => assert_eq!(req.remote_port, 7),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_empty_stream() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        let err = read_json::<_, TunnelRequest>(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtoError::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_read_oversized_frame() {
        let mut huge = vec![b'x'; MAX_CONTROL_FRAME_BYTES + 2];
        huge.push(b'\n');
        let mut cursor = std::io::Cursor::new(huge);
        let err = read_json::<_, TunnelRequest>(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtoError::FrameTooLarge));
    }
}
