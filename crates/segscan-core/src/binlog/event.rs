//! Event framing shared by legacy binlogs and deltalogs
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! magic: i32 = 0xFFFABC
//! descriptor event:
//!   header  { timestamp: u64, type_code: i8, event_length: i32, next_position: i32 }
//!   data    { collection_id, partition_id, segment_id, field_id: i64,
//!             start_ts, end_ts: u64, payload_type: i32 }
//!   post_header_lengths: [u8; EVENT_TYPE_COUNT]
//!   extra_length: i32, extras: [u8; extra_length] (JSON)
//! data events, repeated:
//!   header  { timestamp: u64, type_code: i8, event_length: i32, next_position: i32 }
//!   data    { start_ts: u64, end_ts: u64 }
//!   payload: [u8; event_length - header - data]  (single-column Parquet file)
//! ```

use bytes::{Buf, Bytes};
use serde_json::{Map, Value as JsonValue};

use crate::models::DataType;
use crate::{Error, Result};

pub const MAGIC_NUMBER: i32 = 0xFFFABC;

/// Size of an encoded event header
pub const EVENT_HEADER_SIZE: usize = 8 + 1 + 4 + 4;
/// Size of the descriptor event's fixed data part
pub const DESCRIPTOR_FIX_PART_SIZE: usize = 4 * 8 + 2 * 8 + 4;
/// Size of every data event's fixed part (start and end timestamps)
pub const EVENT_FIX_PART_SIZE: usize = 2 * 8;
/// Number of event types with an entry in `post_header_lengths`
pub const EVENT_TYPE_COUNT: usize = 8;

pub const ORIGINAL_SIZE_KEY: &str = "original_size";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum EventType {
    Descriptor = 0,
    Insert = 1,
    Delete = 2,
    CreateCollection = 3,
    DropCollection = 4,
    CreatePartition = 5,
    DropPartition = 6,
    IndexFile = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub timestamp: u64,
    pub type_code: i8,
    pub event_length: i32,
    pub next_position: i32,
}

/// Parsed descriptor event
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorEvent {
    pub header: EventHeader,
    pub collection_id: i64,
    pub partition_id: i64,
    pub segment_id: i64,
    pub field_id: i64,
    pub start_ts: u64,
    pub end_ts: u64,
    pub payload_type: i32,
    pub post_header_lengths: Vec<u8>,
    pub extras: Map<String, JsonValue>,
}

impl DescriptorEvent {
    /// Logical type of the payload column
    pub fn payload_data_type(&self) -> Option<DataType> {
        DataType::from_code(i64::from(self.payload_type))
    }

    /// Uncompressed payload size recorded by the writer
    pub fn original_size(&self) -> Option<u64> {
        match self.extras.get(ORIGINAL_SIZE_KEY)? {
            JsonValue::String(s) => s.parse().ok(),
            JsonValue::Number(n) => n.as_u64(),
            _ => None,
        }
    }
}

/// One data event with its embedded payload
#[derive(Debug, Clone)]
pub struct DataEvent {
    pub header: EventHeader,
    pub start_ts: u64,
    pub end_ts: u64,
    pub payload: Bytes,
}

/// Sequential reader over an event-framed file
pub struct EventCursor {
    buf: Bytes,
}

impl EventCursor {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Read the magic number and the descriptor event
    pub fn read_preamble(&mut self) -> Result<DescriptorEvent> {
        self.need(4, "magic number")?;
        let magic = self.buf.get_i32_le();
        if magic != MAGIC_NUMBER {
            return Err(Error::format(format!(
                "parse magic number failed, expected: {}, actual: {}",
                MAGIC_NUMBER, magic
            )));
        }
        self.read_descriptor()
    }

    fn read_descriptor(&mut self) -> Result<DescriptorEvent> {
        let header = self.read_header("descriptor event header")?;
        if header.type_code != EventType::Descriptor as i8 {
            return Err(Error::format(format!(
                "expected descriptor event, found event type {}",
                header.type_code
            )));
        }

        self.need(DESCRIPTOR_FIX_PART_SIZE, "descriptor event data")?;
        let collection_id = self.buf.get_i64_le();
        let partition_id = self.buf.get_i64_le();
        let segment_id = self.buf.get_i64_le();
        let field_id = self.buf.get_i64_le();
        let start_ts = self.buf.get_u64_le();
        let end_ts = self.buf.get_u64_le();
        let payload_type = self.buf.get_i32_le();

        self.need(EVENT_TYPE_COUNT, "post header lengths")?;
        let post_header_lengths = self.buf.split_to(EVENT_TYPE_COUNT).to_vec();

        self.need(4, "extra length")?;
        let extra_length = self.buf.get_i32_le();
        let extra_length = usize::try_from(extra_length)
            .map_err(|_| Error::format(format!("negative extra length {}", extra_length)))?;
        self.need(extra_length, "descriptor extras")?;
        let extra_bytes = self.buf.split_to(extra_length);
        let extras = if extra_bytes.is_empty() {
            Map::new()
        } else {
            serde_json::from_slice(&extra_bytes)
                .map_err(|e| Error::format(format!("garbled descriptor extras: {}", e)))?
        };

        Ok(DescriptorEvent {
            header,
            collection_id,
            partition_id,
            segment_id,
            field_id,
            start_ts,
            end_ts,
            payload_type,
            post_header_lengths,
            extras,
        })
    }

    /// Read the next data event; `None` once the file is fully consumed
    pub fn next_event(&mut self) -> Result<Option<DataEvent>> {
        if !self.buf.has_remaining() {
            return Ok(None);
        }
        let header = self.read_header("event header")?;

        self.need(EVENT_FIX_PART_SIZE, "event data")?;
        let start_ts = self.buf.get_u64_le();
        let end_ts = self.buf.get_u64_le();

        let payload_len = i64::from(header.event_length)
            - (EVENT_HEADER_SIZE + EVENT_FIX_PART_SIZE) as i64;
        let payload_len = usize::try_from(payload_len).map_err(|_| {
            Error::format(format!(
                "event length {} shorter than its fixed parts",
                header.event_length
            ))
        })?;
        self.need(payload_len, "event payload")?;
        let payload = self.buf.split_to(payload_len);

        Ok(Some(DataEvent {
            header,
            start_ts,
            end_ts,
            payload,
        }))
    }

    fn read_header(&mut self, what: &str) -> Result<EventHeader> {
        self.need(EVENT_HEADER_SIZE, what)?;
        Ok(EventHeader {
            timestamp: self.buf.get_u64_le(),
            type_code: self.buf.get_i8(),
            event_length: self.buf.get_i32_le(),
            next_position: self.buf.get_i32_le(),
        })
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::format(format!(
                "truncated {}: need {} bytes, {} left",
                what,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{encode_event_file, DescriptorSpec};

    #[test]
    fn test_descriptor_round_trip() {
        let spec = DescriptorSpec {
            collection_id: 1,
            partition_id: 2,
            segment_id: 3,
            field_id: 101,
            payload_type: DataType::Int64,
            original_size: 4096,
        };
        let file = encode_event_file(&spec, EventType::Insert, &[b"abc".as_slice(), b"".as_slice()]);

        let mut cursor = EventCursor::new(Bytes::from(file));
        let descriptor = cursor.read_preamble().unwrap();
        assert_eq!(descriptor.segment_id, 3);
        assert_eq!(descriptor.field_id, 101);
        assert_eq!(descriptor.payload_data_type(), Some(DataType::Int64));
        assert_eq!(descriptor.original_size(), Some(4096));
        assert_eq!(descriptor.post_header_lengths.len(), EVENT_TYPE_COUNT);

        let first = cursor.next_event().unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), b"abc");
        assert_eq!(first.header.type_code, EventType::Insert as i8);
        let second = cursor.next_event().unwrap().unwrap();
        assert!(second.payload.is_empty());
        assert!(cursor.next_event().unwrap().is_none());
    }

    #[test]
    fn test_bad_magic_number() {
        let mut file = encode_event_file(&DescriptorSpec::default(), EventType::Insert, &[]);
        file[0] ^= 0xFF;
        let err = EventCursor::new(Bytes::from(file)).read_preamble().unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert!(err.to_string().contains("magic number"));
    }

    #[test]
    fn test_truncated_descriptor() {
        let file = encode_event_file(&DescriptorSpec::default(), EventType::Insert, &[]);
        let truncated = Bytes::from(file).slice(0..20);
        let err = EventCursor::new(truncated).read_preamble().unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_truncated_payload() {
        let file = encode_event_file(&DescriptorSpec::default(), EventType::Insert, &[b"payload".as_slice()]);
        let len = file.len();
        let mut cursor = EventCursor::new(Bytes::from(file).slice(0..len - 3));
        cursor.read_preamble().unwrap();
        let err = cursor.next_event().unwrap_err();
        assert!(err.to_string().contains("truncated event payload"));
    }
}
