//! Frame codec for rendezvous streams.
//!
//! Every message is a fixed 48-byte big-endian header followed by a
//! bincode payload. Header layout:
//!
//! ```text
//! offset  size  field
//!      0     4  subprotocol code
//!      4     4  payload length
//!      8     8  send timestamp, unix nanoseconds
//!     16    16  message id
//!     32    16  original id (the request this message answers, or zero)
//! ```
//!
//! The length field is validated against [`MAX_PAYLOAD_LENGTH`] before any
//! payload allocation, so a hostile header cannot make the server reserve
//! gigabytes.

use polaris_core::{SubProtocol, WireError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Size of the fixed frame header.
pub const HEADER_LENGTH: usize = 48;

/// Hard cap on a whole frame, header included.
pub const MAX_MESSAGE_LENGTH: usize = 8 * 1024 * 1024;

/// Largest payload a frame may carry.
pub const MAX_PAYLOAD_LENGTH: usize = MAX_MESSAGE_LENGTH - HEADER_LENGTH;

/// 16-byte message identifier, unique per sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgId(pub [u8; 16]);

impl MsgId {
    /// A fresh random id.
    pub fn generate() -> Self {
        MsgId(*Uuid::new_v4().as_bytes())
    }

    /// The all-zero id, used as `original_id` of unsolicited messages.
    pub const ZERO: MsgId = MsgId([0u8; 16]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl std::fmt::Display for MsgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}

/// A decoded frame: header fields plus the raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subprotocol: SubProtocol,
    pub id: MsgId,
    pub original_id: MsgId,
    /// Unix nanoseconds at send time. Informational only.
    pub timestamp: i64,
    pub payload: Vec<u8>,
}

impl Message {
    /// An unsolicited message carrying `payload`.
    pub fn new(subprotocol: SubProtocol, payload: Vec<u8>) -> Self {
        Message {
            subprotocol,
            id: MsgId::generate(),
            original_id: MsgId::ZERO,
            timestamp: unix_nanos(),
            payload,
        }
    }

    /// A reply to the message identified by `original_id`.
    pub fn reply(subprotocol: SubProtocol, original_id: MsgId, payload: Vec<u8>) -> Self {
        Message {
            original_id,
            ..Message::new(subprotocol, payload)
        }
    }
}

fn unix_nanos() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(_) => 0,
    }
}

/// Serialize a payload struct to its bincode wire form.
pub fn encode_payload<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, WireError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| WireError::Encode(e.to_string()))
}

/// Deserialize a payload struct from its bincode wire form.
pub fn decode_payload<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, WireError> {
    let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| WireError::Decode(e.to_string()))?;
    Ok(value)
}

/// Read one frame. Fails without allocating when the header advertises a
/// payload larger than [`MAX_PAYLOAD_LENGTH`] or an unknown subprotocol.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, WireError> {
    let mut header = [0u8; HEADER_LENGTH];
    reader.read_exact(&mut header).await?;

    let sub_code = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let timestamp = i64::from_be_bytes([
        header[8], header[9], header[10], header[11], header[12], header[13], header[14],
        header[15],
    ]);
    let mut id = [0u8; 16];
    id.copy_from_slice(&header[16..32]);
    let mut original_id = [0u8; 16];
    original_id.copy_from_slice(&header[32..48]);

    if length > MAX_PAYLOAD_LENGTH {
        return Err(WireError::PayloadTooLarge {
            size: length,
            max: MAX_PAYLOAD_LENGTH,
        });
    }
    let subprotocol =
        SubProtocol::from_u32(sub_code).ok_or(WireError::UnexpectedSubprotocol { got: sub_code })?;

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    Ok(Message {
        subprotocol,
        id: MsgId(id),
        original_id: MsgId(original_id),
        timestamp,
        payload,
    })
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), WireError> {
    if message.payload.len() > MAX_PAYLOAD_LENGTH {
        return Err(WireError::PayloadTooLarge {
            size: message.payload.len(),
            max: MAX_PAYLOAD_LENGTH,
        });
    }
    let mut header = [0u8; HEADER_LENGTH];
    header[0..4].copy_from_slice(&message.subprotocol.as_u32().to_be_bytes());
    header[4..8].copy_from_slice(&(message.payload.len() as u32).to_be_bytes());
    header[8..16].copy_from_slice(&message.timestamp.to_be_bytes());
    header[16..32].copy_from_slice(&message.id.0);
    header[32..48].copy_from_slice(&message.original_id.0);

    writer.write_all(&header).await?;
    writer.write_all(&message.payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polaris_core::{MapQuery, Ping};

    #[tokio::test]
    async fn frame_round_trip() {
        let payload = encode_payload(&MapQuery {
            add_me: true,
            size: 20,
            ..MapQuery::default()
        })
        .unwrap();
        let msg = Message::new(SubProtocol::MapQuery, payload);

        let mut buf = Vec::new();
        write_frame(&mut buf, &msg).await.unwrap();
        assert_eq!(buf.len(), HEADER_LENGTH + msg.payload.len());

        let decoded = read_frame(&mut buf.as_slice()).await.unwrap();
        assert_eq!(decoded, msg);
        let query: MapQuery = decode_payload(&decoded.payload).unwrap();
        assert!(query.add_me);
        assert_eq!(query.size, 20);
    }

    #[tokio::test]
    async fn reply_links_original_id() {
        let req = Message::new(SubProtocol::Ping, encode_payload(&Ping {}).unwrap());
        let resp = Message::reply(SubProtocol::PingResponse, req.id, Vec::new());
        assert_eq!(resp.original_id, req.id);
        assert_ne!(resp.id, req.id);
    }

    #[tokio::test]
    async fn oversized_header_rejected_before_alloc() {
        let mut header = [0u8; HEADER_LENGTH];
        header[0..4].copy_from_slice(&SubProtocol::MapQuery.as_u32().to_be_bytes());
        header[4..8].copy_from_slice(&u32::MAX.to_be_bytes());
        let err = read_frame(&mut header.as_slice()).await.unwrap_err();
        assert!(matches!(err, WireError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn oversized_write_rejected() {
        let msg = Message::new(SubProtocol::MapResponse, vec![0u8; MAX_PAYLOAD_LENGTH + 1]);
        let mut buf = Vec::new();
        let err = write_frame(&mut buf, &msg).await.unwrap_err();
        assert!(matches!(err, WireError::PayloadTooLarge { .. }));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn unknown_subprotocol_rejected() {
        let mut header = [0u8; HEADER_LENGTH];
        header[0..4].copy_from_slice(&0xdead_beefu32.to_be_bytes());
        let err = read_frame(&mut header.as_slice()).await.unwrap_err();
        assert!(matches!(
            err,
            WireError::UnexpectedSubprotocol { got: 0xdead_beef }
        ));
    }

    #[tokio::test]
    async fn truncated_frame_is_io_error() {
        let msg = Message::new(SubProtocol::Ping, vec![1, 2, 3, 4]);
        let mut buf = Vec::new();
        write_frame(&mut buf, &msg).await.unwrap();
        buf.truncate(buf.len() - 2);
        let err = read_frame(&mut buf.as_slice()).await.unwrap_err();
        assert!(matches!(err, WireError::Io(_)));
    }

    #[test]
    fn msg_id_zero() {
        assert!(MsgId::ZERO.is_zero());
        assert!(!MsgId::generate().is_zero());
    }
}
