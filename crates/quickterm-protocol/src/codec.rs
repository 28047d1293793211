//! Line framing over any async byte stream.
//!
//! Frames are JSON objects terminated by `\n`, capped at
//! [`MAX_PAYLOAD_BYTES`]. Both halves of a split stream can be used
//! independently through the generic helpers below.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use quickterm_core::config::MAX_PAYLOAD_BYTES;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::error::{ProtocolError, Result};
use crate::frames::{InboundFrame, ReqFrame, ResFrame};

pub type FrameTransport<T> = Framed<T, LinesCodec>;

/// Wrap `io` in the newline-delimited codec used on every socket.
pub fn framed<T: AsyncRead + AsyncWrite>(io: T) -> FrameTransport<T> {
    Framed::new(io, LinesCodec::new_with_max_length(MAX_PAYLOAD_BYTES))
}

/// Serialize `payload` and write it as one line.
pub async fn send_json<S, T>(sink: &mut S, payload: &T) -> Result<()>
where
    S: Sink<String, Error = LinesCodecError> + Unpin,
    T: Serialize,
{
    let line = serde_json::to_string(payload)?;
    sink.send(line).await?;
    Ok(())
}

/// Read the next frame. `None` on clean EOF.
pub async fn next_frame<S>(stream: &mut S) -> Option<Result<InboundFrame>>
where
    S: Stream<Item = std::result::Result<String, LinesCodecError>> + Unpin,
{
    let line = match stream.next().await? {
        Ok(line) => line,
        Err(e) => return Some(Err(ProtocolError::Codec(e))),
    };
    Some(serde_json::from_str(&line).map_err(ProtocolError::Malformed))
}

/// Send `req` and wait for the response carrying the same id.
///
/// Frames that are not the matching response are skipped.
pub async fn request<T>(transport: &mut FrameTransport<T>, req: &ReqFrame) -> Result<ResFrame>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    send_json(transport, req).await?;
    loop {
        let frame = match next_frame(transport).await {
            Some(frame) => frame?,
            None => return Err(ProtocolError::Closed),
        };
        if let Some(res) = frame.as_res() {
            if res.id == req.id {
                return Ok(res);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::ResFrame;
    use crate::methods::PING;

    #[tokio::test]
    async fn request_skips_unrelated_frames() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client = framed(client);
        let mut server = framed(server);

        let req = ReqFrame::new(PING, ());
        let req_id = req.id.clone();

        let server_task = tokio::spawn(async move {
            let frame = next_frame(&mut server).await.unwrap().unwrap();
            let req = frame.as_req().unwrap();
            send_json(&mut server, &ResFrame::ok("someone-else", serde_json::json!({})))
                .await
                .unwrap();
            send_json(&mut server, &ResFrame::ok(&req.id, serde_json::json!({"pong": true})))
                .await
                .unwrap();
        });

        let res = request(&mut client, &req).await.unwrap();
        assert_eq!(res.id, req_id);
        assert!(res.ok);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn request_reports_closed_peer() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client = framed(client);
        drop(server);

        let err = request(&mut client, &ReqFrame::new(PING, ())).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Closed | ProtocolError::Codec(_)));
    }

    #[tokio::test]
    async fn oversized_line_is_a_codec_error() {
        let (client, server) = tokio::io::duplex(MAX_PAYLOAD_BYTES * 2 + 64);
        let mut server = framed(server);
        let mut client = framed(client);

        let huge = "x".repeat(MAX_PAYLOAD_BYTES + 1);
        client.send(huge).await.unwrap();

        let result = next_frame(&mut server).await.unwrap();
        assert!(matches!(result, Err(ProtocolError::Codec(_))));
    }
}
