// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! TI mmWave UART output protocol: frame header, TLV records and the two
//! record decoders used by the out of box demo.

use std::{fmt, io};

/// Magic word which starts every frame on the UART data port.
pub const MAGIC_WORD: [u8; 8] = [0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07];

/// TLV type carrying the detected points (x, y, z, v).
pub const TLV_DETECTED_POINTS: u32 = 1;

/// TLV type carrying the per-point side info (snr, noise).
pub const TLV_SIDE_INFO: u32 = 7;

/// Protocol anomalies found while decoding a frame.  Except for `Io` these
/// never leave the frame reader, they select one of the fallback frames.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    SyncLost([u8; 8]),
    NoDetections,
    UnexpectedTlvType(u32),
    InvalidTlvLength { length: u32, available: usize },
    UnexpectedEndOfSlice(usize),
    PacketTooLong(u32),
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::SyncLost(word) => write!(f, "magic word not found: {:02X?}", word),
            Error::NoDetections => write!(f, "frame reports no detected objects"),
            Error::UnexpectedTlvType(tlv_type) => {
                write!(f, "unexpected tlv type: {}", tlv_type)
            }
            Error::InvalidTlvLength { length, available } => {
                write!(f, "invalid tlv length: {} [{} available]", length, available)
            }
            Error::UnexpectedEndOfSlice(size) => {
                write!(f, "unexpected end of slice: {}", size)
            }
            Error::PacketTooLong(len) => {
                write!(
                    f,
                    "packet length {} exceeds {}",
                    len,
                    FrameHeader::MAX_PACKET_LEN
                )
            }
        }
    }
}

/// Frame header following the magic word.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub version: u32,
    /// Total packet length including the 40 bytes of magic word and header.
    pub total_packet_len: u32,
    /// Platform identifier, the raw bytes reversed and hex encoded.
    pub platform: String,
    pub frame_number: u32,
    pub time_cpu_cycles: u32,
    pub num_detected_obj: u32,
    pub num_tlvs: u32,
    pub sub_frame_number: u32,
}

impl FrameHeader {
    /// Length of the header in bytes, excluding the magic word.
    pub const LEN: usize = 32;
    /// Length of the magic word and header together.
    pub const PACKET_HEADER_LEN: usize = MAGIC_WORD.len() + Self::LEN;
    /// Largest packet length accepted.  A longer one can only come from a
    /// corrupt header and is handled like a missing magic word.
    pub const MAX_PACKET_LEN: u32 = 0x10000;

    /// Length of the payload following the header.  Corrupt packet lengths
    /// smaller than the header yield an empty payload.
    #[inline]
    pub fn payload_len(&self) -> usize {
        (self.total_packet_len as usize).saturating_sub(Self::PACKET_HEADER_LEN)
    }

    /// Key identifying the frame for duplicate detection.
    #[inline]
    pub fn key(&self) -> (u32, u32) {
        (self.frame_number, self.sub_frame_number)
    }
}

impl From<&[u8; FrameHeader::LEN]> for FrameHeader {
    fn from(data: &[u8; FrameHeader::LEN]) -> Self {
        let word = |offset: usize| {
            u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ])
        };

        let platform = data[8..12]
            .iter()
            .rev()
            .map(|b| format!("{:02x}", b))
            .collect();

        FrameHeader {
            version: word(0),
            total_packet_len: word(4),
            platform,
            frame_number: word(12),
            time_cpu_cycles: word(16),
            num_detected_obj: word(20),
            num_tlvs: word(24),
            sub_frame_number: word(28),
        }
    }
}

/// A type-length-value record borrowed from the frame payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TlvRecord<'a> {
    pub tlv_type: u32,
    /// Declared payload length, may exceed `payload.len()` on corrupt frames.
    pub length: u32,
    pub payload: &'a [u8],
}

impl<'a> TlvRecord<'a> {
    /// Length of the type and length fields.
    pub const HEADER_LEN: usize = 8;

    /// Record used when the payload ends before a record header.
    pub const EMPTY: TlvRecord<'static> = TlvRecord {
        tlv_type: 0,
        length: 0,
        payload: &[],
    };

    /// Parses the record starting at the beginning of the slice.  The record
    /// payload is clipped to the bytes actually present.
    pub fn parse(slice: &'a [u8]) -> TlvRecord<'a> {
        if slice.len() < Self::HEADER_LEN {
            return TlvRecord::EMPTY;
        }

        let tlv_type = u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]);
        let length = u32::from_le_bytes([slice[4], slice[5], slice[6], slice[7]]);
        let body = &slice[Self::HEADER_LEN..];
        let end = (length as usize).min(body.len());

        TlvRecord {
            tlv_type,
            length,
            payload: &body[..end],
        }
    }

    /// Offset of the record following this one, relative to this record.
    #[inline]
    pub fn next_offset(&self) -> usize {
        Self::HEADER_LEN.saturating_add(self.length as usize)
    }
}

/// Reads the two TLV records carried by every frame.  The second record
/// starts right after the first one's declared payload; a record that does
/// not fit in the payload is returned as [`TlvRecord::EMPTY`].
pub fn read_two(payload: &[u8]) -> (TlvRecord<'_>, TlvRecord<'_>) {
    let first = TlvRecord::parse(payload);
    let second = if payload.len() < TlvRecord::HEADER_LEN {
        TlvRecord::EMPTY
    } else {
        payload
            .get(first.next_offset()..)
            .map_or(TlvRecord::EMPTY, TlvRecord::parse)
    };

    (first, second)
}

/// Position and velocity of one detected point as sent on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub v: f32,
}

impl Point {
    /// Bytes per point in the detected points record.
    pub const LEN: usize = 16;

    /// Distance from the sensor in meters.
    pub fn range(&self) -> f64 {
        let (x, y, z) = (self.x as f64, self.y as f64, self.z as f64);
        (x * x + y * y + z * z).sqrt()
    }

    /// Azimuth in degrees, ±90 on the x axis.
    pub fn azimuth(&self) -> f64 {
        let (x, y) = (self.x as f64, self.y as f64);
        if y == 0.0 {
            if x >= 0.0 {
                90.0
            } else {
                -90.0
            }
        } else {
            (x / y).atan().to_degrees()
        }
    }

    /// Elevation in degrees, ±90 straight above or below the sensor.
    pub fn elevation(&self) -> f64 {
        let (x, y, z) = (self.x as f64, self.y as f64, self.z as f64);
        if x == 0.0 && y == 0.0 {
            if z >= 0.0 {
                90.0
            } else {
                -90.0
            }
        } else {
            (z / (x * x + y * y).sqrt()).atan().to_degrees()
        }
    }
}

impl From<&[u8]> for Point {
    fn from(data: &[u8]) -> Self {
        let float = |offset: usize| {
            f32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ])
        };

        Point {
            x: float(0),
            y: float(4),
            z: float(8),
            v: float(12),
        }
    }
}

/// Signal quality of one detected point, both in 0.1 dB steps.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct SideInfo {
    pub snr: u16,
    pub noise: u16,
}

impl SideInfo {
    /// Bytes per point in the side info record.
    pub const LEN: usize = 4;
}

/// Decodes `count` points from a detected points record.
///
/// The record must be of type 1, declare a length smaller than the frame
/// payload and hold every point, otherwise the caller falls back to the
/// placeholder frame.
pub fn decode_points(
    record: &TlvRecord,
    payload_len: usize,
    count: usize,
) -> Result<Vec<Point>, Error> {
    if record.tlv_type != TLV_DETECTED_POINTS {
        return Err(Error::UnexpectedTlvType(record.tlv_type));
    }

    if record.length as usize >= payload_len {
        return Err(Error::InvalidTlvLength {
            length: record.length,
            available: payload_len,
        });
    }

    let needed = count.saturating_mul(Point::LEN);
    if record.payload.len() < needed {
        return Err(Error::UnexpectedEndOfSlice(record.payload.len()));
    }

    Ok(record.payload[..needed]
        .chunks_exact(Point::LEN)
        .map(Point::from)
        .collect())
}

/// Decodes `count` side info entries.  Any record other than a complete
/// type 7 record yields zeros for every point.
pub fn decode_side_info(record: &TlvRecord, count: usize) -> Vec<SideInfo> {
    let needed = count.saturating_mul(SideInfo::LEN);

    if record.tlv_type != TLV_SIDE_INFO || record.payload.len() < needed {
        return vec![SideInfo::default(); count];
    }

    record.payload[..needed]
        .chunks_exact(SideInfo::LEN)
        .map(|chunk| SideInfo {
            snr: u16::from_le_bytes([chunk[0], chunk[1]]),
            noise: u16::from_le_bytes([chunk[2], chunk[3]]),
        })
        .collect()
}

/// One detected object of a decoded frame.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct DetectionRecord {
    /// Position of the object within the frame, not a sensor track id.
    pub index: usize,
    /// Position in meters.
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Radial velocity in m/s.
    pub v: f32,
    /// Range in meters.
    pub range: f64,
    /// Azimuth in degrees.
    pub azimuth: f64,
    /// Elevation in degrees.
    pub elevation: f64,
    /// Signal to noise ratio in 0.1 dB.
    pub snr: u16,
    /// Noise floor in 0.1 dB.
    pub noise: u16,
}

impl DetectionRecord {
    /// Number of output fields per record.
    pub const FIELDS: usize = 10;

    /// Column names matching [`DetectionRecord::to_row`].
    pub const COLUMNS: [&'static str; Self::FIELDS] = [
        "index",
        "x",
        "y",
        "z",
        "v",
        "range",
        "azimuth",
        "elevation",
        "snr",
        "noise",
    ];

    /// Builds the record for the point at `index` with derived range and
    /// angles.
    pub fn new(index: usize, point: Point, side: SideInfo) -> Self {
        DetectionRecord {
            index,
            x: point.x,
            y: point.y,
            z: point.z,
            v: point.v,
            range: point.range(),
            azimuth: point.azimuth(),
            elevation: point.elevation(),
            snr: side.snr,
            noise: side.noise,
        }
    }

    /// Placeholder record with every field zero.
    pub fn zero() -> Self {
        DetectionRecord::default()
    }

    /// The ten output fields in [`DetectionRecord::COLUMNS`] order.
    pub fn to_row(&self) -> [f64; Self::FIELDS] {
        [
            self.index as f64,
            self.x as f64,
            self.y as f64,
            self.z as f64,
            self.v as f64,
            self.range,
            self.azimuth,
            self.elevation,
            self.snr as f64,
            self.noise as f64,
        ]
    }
}
