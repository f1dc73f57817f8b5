//! Length-prefixed framing shared by [`crate::channel::Channel`] and the
//! server terminator: a 2-byte prefix (BCD or binary per schema) denoting
//! body length, covering MTI through the end of the message (spec §4.2,
//! §6 "Wire format").

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use iso8583::field::{Encoding, HeaderDescriptor};
use iso8583::{codec, MessageSchema};

use crate::error::FramingError;

/// Read one full frame (length prefix + body) from `reader`, validating it
/// against the schema's declared maximum frame length, and return the raw
/// bytes ready to hand to [`iso8583::decode`].
pub async fn read_frame<R>(reader: &mut R, schema: &MessageSchema) -> Result<Vec<u8>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let header = header_or_default(schema);
    let mut prefix = vec![0u8; header.prefix_width];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FramingError::Closed),
        Err(e) => return Err(e.into()),
    }

    let covered_len = codec::decode_length_prefix(&prefix, header.prefix_encoding)?;
    let body_len = if header.prefix_includes_header {
        covered_len.saturating_sub(header.prefix_width)
    } else {
        covered_len
    };

    let total_len = header.prefix_width + body_len;
    if total_len > schema.max_frame_len {
        return Err(FramingError::FrameTooLarge { len: total_len, max: schema.max_frame_len });
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;

    let mut frame = Vec::with_capacity(total_len);
    frame.extend_from_slice(&prefix);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one full frame (as produced by [`iso8583::encode`]) to `writer`.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Schemas used by this workspace always carry a header (the 2-byte wire
/// prefix); fall back to a BCD 2-byte prefix if one somehow doesn't, so
/// framing never panics on a headerless schema.
fn header_or_default(schema: &MessageSchema) -> HeaderDescriptor {
    schema.header.clone().unwrap_or(HeaderDescriptor {
        prefix_encoding: Encoding::Bcd,
        prefix_width: 2,
        prefix_includes_header: false,
        fields: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use iso8583::standard::{default_schema, fields};
    use iso8583::MessageInstance;

    #[tokio::test]
    async fn frame_round_trips_over_a_duplex_pipe() {
        let schema = default_schema();
        let mut instance = MessageInstance::new();
        instance.set(fields::MTI, "0800");
        instance.set(fields::STAN, "000001");

        let encoded = iso8583::encode(&instance, &schema).unwrap();

        let (mut a, mut b) = tokio::io::duplex(4096);
        write_frame(&mut a, &encoded).await.unwrap();
        let received = read_frame(&mut b, &schema).await.unwrap();

        assert_eq!(received, encoded);
        let decoded = iso8583::decode(&received, &schema).unwrap();
        assert_eq!(decoded.get_str(fields::STAN), Some("000001"));
    }

    #[tokio::test]
    async fn clean_close_before_any_bytes_is_reported_as_closed() {
        let schema = default_schema();
        let (a, mut b) = tokio::io::duplex(4096);
        drop(a);
        let err = read_frame(&mut b, &schema).await.unwrap_err();
        assert!(matches!(err, FramingError::Closed));
    }
}
