//! Point records and the fixed-length string fields they carry.
//!
//! A record occupies exactly [`RECORD_SIZE`] bytes on a page:
//! `id` (25 bytes) | `longitude` (f32 LE) | `latitude` (f32 LE) |
//! `timestamp` (29 bytes) | `hilbert_key` (u32 LE). String fields are ASCII,
//! NUL-padded to their fixed width; padding is stripped on the way out.

use std::borrow::Cow;
use std::fmt;

use crate::error::{Result, TreeError};
use crate::hilbert;

/// Encoded size of one point record.
pub const RECORD_SIZE: usize = 66;

/// Fixed width of the record id field.
pub const ID_LEN: usize = 25;

/// Fixed width of the timestamp field (`YYYY-MM-DD HH:MM:SS`, NUL-padded).
pub const TIMESTAMP_LEN: usize = 29;

const ID_RANGE: std::ops::Range<usize> = 0..25;
const LON_RANGE: std::ops::Range<usize> = 25..29;
const LAT_RANGE: std::ops::Range<usize> = 29..33;
const TS_RANGE: std::ops::Range<usize> = 33..62;
const KEY_RANGE: std::ops::Range<usize> = 62..66;

/// Fixed-width ASCII field, NUL-padded on encode and trimmed on decode.
///
/// Construction rejects over-long or non-ASCII input rather than silently
/// truncating; bytes read back from disk are accepted as-is.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedAscii<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FixedAscii<N> {
    /// Builds a field from `text`, padding the tail with NUL bytes.
    pub fn new(text: &str) -> Result<Self> {
        if !text.is_ascii() {
            return Err(TreeError::InvalidArgument("fixed field must be ASCII"));
        }
        if text.len() > N {
            return Err(TreeError::InvalidArgument("fixed field exceeds its width"));
        }
        let mut bytes = [0u8; N];
        bytes[..text.len()].copy_from_slice(text.as_bytes());
        Ok(Self { bytes })
    }

    /// Wraps raw on-disk bytes without validation.
    pub fn from_bytes(bytes: [u8; N]) -> Self {
        Self { bytes }
    }

    /// Full fixed-width view, padding included.
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.bytes
    }

    /// Field content with trailing NUL padding stripped.
    pub fn trimmed(&self) -> &[u8] {
        let end = self
            .bytes
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |pos| pos + 1);
        &self.bytes[..end]
    }

    /// Text view of the trimmed content. Lossy for non-UTF-8 disk bytes.
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.trimmed())
    }
}

impl<const N: usize> fmt::Debug for FixedAscii<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> fmt::Display for FixedAscii<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.as_str())
    }
}

/// One geospatial point, keyed by its Hilbert index.
///
/// Coordinates and key are coupled: the key is derived on construction and
/// recomputed by [`PointRecord::set_coordinates`], never set independently.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointRecord {
    /// Record identifier, assigned upstream and globally unique.
    pub id: FixedAscii<ID_LEN>,
    longitude: f32,
    latitude: f32,
    /// Observation timestamp, pre-formatted upstream.
    pub timestamp: FixedAscii<TIMESTAMP_LEN>,
    hilbert_key: u32,
}

impl PointRecord {
    /// Builds a record, deriving its Hilbert key from the coordinates.
    pub fn new(
        id: FixedAscii<ID_LEN>,
        latitude: f32,
        longitude: f32,
        timestamp: FixedAscii<TIMESTAMP_LEN>,
    ) -> Result<Self> {
        let hilbert_key = hilbert::encode(f64::from(latitude), f64::from(longitude))?;
        Ok(Self {
            id,
            longitude,
            latitude,
            timestamp,
            hilbert_key,
        })
    }

    /// Builds a record around a key computed upstream.
    ///
    /// Ingestion sources that pre-sort by Hilbert value ship the key alongside
    /// the coordinates; this constructor trusts it instead of re-deriving.
    pub fn from_parts(
        id: FixedAscii<ID_LEN>,
        latitude: f32,
        longitude: f32,
        timestamp: FixedAscii<TIMESTAMP_LEN>,
        hilbert_key: u32,
    ) -> Self {
        Self {
            id,
            longitude,
            latitude,
            timestamp,
            hilbert_key,
        }
    }

    /// The record's Hilbert key.
    pub fn hilbert_key(&self) -> u32 {
        self.hilbert_key
    }

    /// Latitude in decimal degrees.
    pub fn latitude(&self) -> f32 {
        self.latitude
    }

    /// Longitude in decimal degrees.
    pub fn longitude(&self) -> f32 {
        self.longitude
    }

    /// Replaces the coordinates, recomputing the Hilbert key.
    pub fn set_coordinates(&mut self, latitude: f32, longitude: f32) -> Result<()> {
        self.hilbert_key = hilbert::encode(f64::from(latitude), f64::from(longitude))?;
        self.latitude = latitude;
        self.longitude = longitude;
        Ok(())
    }

    /// Ordering key for leaf placement: Hilbert key, ties broken by id.
    pub fn sort_key(&self) -> (u32, &[u8; ID_LEN]) {
        (self.hilbert_key, self.id.as_bytes())
    }

    /// Serializes the record into `dst`, which must be exactly
    /// [`RECORD_SIZE`] bytes.
    pub fn encode_into(&self, dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), RECORD_SIZE);
        dst[ID_RANGE].copy_from_slice(self.id.as_bytes());
        dst[LON_RANGE].copy_from_slice(&self.longitude.to_le_bytes());
        dst[LAT_RANGE].copy_from_slice(&self.latitude.to_le_bytes());
        dst[TS_RANGE].copy_from_slice(self.timestamp.as_bytes());
        dst[KEY_RANGE].copy_from_slice(&self.hilbert_key.to_le_bytes());
    }

    /// Deserializes a record from a [`RECORD_SIZE`]-byte slice.
    ///
    /// Stored bytes are trusted: the persisted key is not re-derived and the
    /// string fields are not re-validated.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() != RECORD_SIZE {
            return Err(TreeError::CorruptPage("record slice has wrong length"));
        }
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&src[ID_RANGE]);
        let mut ts = [0u8; TIMESTAMP_LEN];
        ts.copy_from_slice(&src[TS_RANGE]);
        let longitude = f32::from_le_bytes(src[LON_RANGE].try_into().expect("4-byte slice"));
        let latitude = f32::from_le_bytes(src[LAT_RANGE].try_into().expect("4-byte slice"));
        let hilbert_key = u32::from_le_bytes(src[KEY_RANGE].try_into().expect("4-byte slice"));
        Ok(Self {
            id: FixedAscii::from_bytes(id),
            longitude,
            latitude,
            timestamp: FixedAscii::from_bytes(ts),
            hilbert_key,
        })
    }
}
