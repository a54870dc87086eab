//! Vector read planning.
//!
//! A scatter read is sent as one request whose chunk list fills a single flat
//! buffer in order, so chunks keep the caller's segment order and, inside a
//! split segment, ascending offsets.

use common::{Error, Result};
use endpoint::ChunkRequest;

/// One `(position, length)` pair of a scatter read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSegment {
    pub position: u64,
    pub length: u32,
}

impl ReadSegment {
    pub fn new(position: u64, length: u32) -> Self {
        Self { position, length }
    }
}

/// Split every segment longer than `max_chunk` into `max_chunk` sized pieces
/// plus a remainder. A zero remainder produces no chunk.
pub fn plan_chunks(segments: &[ReadSegment], max_chunk: u32) -> Result<Vec<ChunkRequest>> {
    if max_chunk == 0 {
        return Err(Error::Protocol(
            "server advertised a zero vector read size".to_string(),
        ));
    }

    let mut chunks = Vec::with_capacity(segments.len());
    for segment in segments {
        if segment.length <= max_chunk {
            chunks.push(ChunkRequest::new(segment.position, segment.length));
            continue;
        }

        let count = segment.length.div_ceil(max_chunk);
        for index in 0..count {
            let consumed = index * max_chunk;
            let length = (segment.length - consumed).min(max_chunk);
            chunks.push(ChunkRequest::new(segment.position + consumed as u64, length));
        }
    }
    Ok(chunks)
}

/// Bytes a segment list needs in the destination buffer.
pub fn total_length(segments: &[ReadSegment]) -> u64 {
    segments.iter().map(|s| s.length as u64).sum()
}

/// Parse the textual reply of the vector read limit query.
pub fn parse_readv_max(reply: &[u8]) -> Result<u32> {
    let text = std::str::from_utf8(reply)
        .map_err(|e| Error::Protocol(format!("readv limit reply is not text: {}", e)))?;
    let value = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    match value.parse::<u32>() {
        Ok(max) if max > 0 => Ok(max),
        _ => Err(Error::Protocol(format!(
            "unusable readv limit reply: {:?}",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lengths(chunks: &[ChunkRequest]) -> Vec<u32> {
        chunks.iter().map(|c| c.length).collect()
    }

    #[test]
    fn test_split_with_remainder() {
        let chunks = plan_chunks(&[ReadSegment::new(100, 2500)], 1000).unwrap();
        assert_eq!(lengths(&chunks), vec![1000, 1000, 500]);
        let offsets: Vec<u64> = chunks.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![100, 1100, 2100]);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_chunk() {
        let chunks = plan_chunks(&[ReadSegment::new(0, 1000)], 1000).unwrap();
        assert_eq!(lengths(&chunks), vec![1000]);

        let chunks = plan_chunks(&[ReadSegment::new(0, 3000)], 1000).unwrap();
        assert_eq!(lengths(&chunks), vec![1000, 1000, 1000]);
    }

    #[test]
    fn test_segment_order_is_kept() {
        let segments = [
            ReadSegment::new(5000, 1500),
            ReadSegment::new(0, 10),
            ReadSegment::new(300, 1000),
        ];
        let chunks = plan_chunks(&segments, 1000).unwrap();
        assert_eq!(
            chunks,
            vec![
                ChunkRequest::new(5000, 1000),
                ChunkRequest::new(6000, 500),
                ChunkRequest::new(0, 10),
                ChunkRequest::new(300, 1000),
            ]
        );
        assert_eq!(total_length(&segments), 2510);
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        assert!(matches!(
            plan_chunks(&[ReadSegment::new(0, 1)], 0),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_readv_max() {
        assert_eq!(parse_readv_max(b"2097136\n").unwrap(), 2_097_136);
        assert_eq!(parse_readv_max(b" 1024\0\0").unwrap(), 1024);
        assert!(parse_readv_max(b"0").is_err());
        assert!(parse_readv_max(b"-5").is_err());
        assert!(parse_readv_max(b"readv_ior_max").is_err());
        assert!(parse_readv_max(&[0xff, 0xfe]).is_err());
    }
}
