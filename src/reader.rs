// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::protocol::{
    decode_points, decode_side_info, read_two, DetectionRecord, Error, FrameHeader, MAGIC_WORD,
};
use std::{
    fmt,
    io::{self, BufRead, BufReader, Read},
};
use tracing::{debug, instrument, trace, warn};

/// Blocking byte source feeding the frame reader, typically the UART data
/// port of the radar.
pub trait ByteStream {
    /// Blocks until `buf` has been filled.
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Drops every byte received but not yet read.
    fn discard_buffered(&mut self) -> io::Result<()>;
}

/// Replays captured bytes.  Discarding drops whatever the `BufReader`
/// currently holds, the same way the UART driver drops its input queue.
impl<R: Read> ByteStream for BufReader<R> {
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        Read::read_exact(self, buf)
    }

    fn discard_buffered(&mut self) -> io::Result<()> {
        let buffered = self.buffer().len();
        self.consume(buffered);
        Ok(())
    }
}

/// Outcome of the magic word search.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SyncStatus {
    Found,
    NotFound([u8; 8]),
}

/// One decoded frame.  There is always at least one record: frames without
/// usable detections carry a single all-zero placeholder.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Running frame count assigned by the reader.
    pub index: u64,
    /// The frame header, `None` after a sync loss.
    pub header: Option<FrameHeader>,
    /// Effective number of objects, always `records.len()`.
    pub num_detected_obj: usize,
    pub records: Vec<DetectionRecord>,
    /// Set when the header repeats the previous frame's frame and sub-frame
    /// numbers.
    pub duplicate: bool,
    /// Set when `records` holds the synthesized zero record instead of
    /// decoded detections.
    pub placeholder: bool,
}

impl Frame {
    fn placeholder(index: u64, header: Option<FrameHeader>) -> Frame {
        Frame {
            index,
            header,
            num_detected_obj: 1,
            records: vec![DetectionRecord::zero()],
            duplicate: false,
            placeholder: true,
        }
    }

    /// True when the frame was synthesized after losing the magic word or
    /// rejecting an oversized packet length.
    #[inline]
    pub fn is_sync_lost(&self) -> bool {
        self.header.is_none()
    }

    /// Frame and sub-frame numbers from the header.
    #[inline]
    pub fn key(&self) -> Option<(u32, u32)> {
        self.header.as_ref().map(FrameHeader::key)
    }

    /// Records describing real detections, empty for placeholder frames.
    pub fn targets(&self) -> &[DetectionRecord] {
        match self.placeholder {
            true => &[],
            false => &self.records,
        }
    }

    /// The ten output fields of every record, row by row.
    pub fn rows(&self) -> Vec<[f64; DetectionRecord::FIELDS]> {
        self.records.iter().map(DetectionRecord::to_row).collect()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match &self.header {
            Some(header) => write!(
                f,
                "Frame {} [{}.{}] => {:?}",
                self.index, header.frame_number, header.sub_frame_number, self.records
            ),
            None => write!(f, "Frame {} [sync lost] => {:?}", self.index, self.records),
        }
    }
}

/// Decoder context for the UART frame stream.  The reader keeps no frame
/// data between calls, only counters and the key of the last frame.
#[derive(Debug, Default)]
pub struct FrameReader {
    frames: u64,
    sync_losses: u64,
    duplicates: u64,
    last_key: Option<(u32, u32)>,
}

impl FrameReader {
    /// Creates a reader with zeroed counters.
    pub fn new() -> FrameReader {
        FrameReader::default()
    }

    /// Number of frames returned so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Number of frames synthesized after a missing magic word.
    pub fn sync_losses(&self) -> u64 {
        self.sync_losses
    }

    /// Number of frames flagged as duplicates.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Reads the next frame from the stream.  Protocol anomalies are turned
    /// into placeholder frames, only transport errors are returned.
    pub fn read<S: ByteStream + ?Sized>(&mut self, stream: &mut S) -> Result<Frame, Error> {
        let index = self.frames;

        let mut frame = match locate(stream)? {
            SyncStatus::Found => match read_frame(stream, index) {
                Err(err @ Error::PacketTooLong(_)) => {
                    stream.discard_buffered()?;
                    self.lose_sync(index, err)
                }
                frame => frame?,
            },
            SyncStatus::NotFound(word) => self.lose_sync(index, Error::SyncLost(word)),
        };

        if let Some(key) = frame.key() {
            if self.last_key == Some(key) {
                debug!("duplicate frame {}.{}", key.0, key.1);
                frame.duplicate = true;
                self.duplicates += 1;
            }
            self.last_key = Some(key);
        }

        self.frames += 1;
        Ok(frame)
    }

    fn lose_sync(&mut self, index: u64, err: Error) -> Frame {
        warn!("{}", err);
        self.sync_losses += 1;
        Frame::placeholder(index, None)
    }
}

/// Reads the 8 byte magic word.  On a mismatch the stream's buffered bytes
/// are discarded rather than searching byte by byte for the next frame.
pub fn locate<S: ByteStream + ?Sized>(stream: &mut S) -> Result<SyncStatus, Error> {
    let mut word = [0u8; 8];
    stream.read_exact(&mut word)?;

    if word == MAGIC_WORD {
        Ok(SyncStatus::Found)
    } else {
        stream.discard_buffered()?;
        Ok(SyncStatus::NotFound(word))
    }
}

/// Reads the header and the payload it announces, then assembles the frame.
#[instrument(skip_all, level = "trace")]
fn read_frame<S: ByteStream + ?Sized>(stream: &mut S, index: u64) -> Result<Frame, Error> {
    let mut header = [0u8; FrameHeader::LEN];
    stream.read_exact(&mut header)?;
    let header = FrameHeader::from(&header);
    trace!("{:?}", header);

    if header.total_packet_len > FrameHeader::MAX_PACKET_LEN {
        return Err(Error::PacketTooLong(header.total_packet_len));
    }

    let mut payload = vec![0u8; header.payload_len()];
    stream.read_exact(&mut payload)?;

    Ok(assemble(index, header, &payload))
}

/// Builds the frame from its header and payload.
pub fn assemble(index: u64, header: FrameHeader, payload: &[u8]) -> Frame {
    let count = header.num_detected_obj as usize;
    if count == 0 {
        debug!("{}", Error::NoDetections);
        return Frame::placeholder(index, Some(header));
    }

    let (points, side_info) = read_two(payload);

    let (records, placeholder) = match decode_points(&points, header.payload_len(), count) {
        Ok(points) => {
            let side_info = decode_side_info(&side_info, points.len());
            let records: Vec<_> = points
                .into_iter()
                .zip(side_info)
                .enumerate()
                .map(|(i, (point, side))| DetectionRecord::new(i, point, side))
                .collect();
            (records, false)
        }
        Err(err) => {
            warn!("frame {} detected points: {}", header.frame_number, err);
            let side = decode_side_info(&side_info, 1)
                .into_iter()
                .next()
                .unwrap_or_default();
            let record = DetectionRecord {
                snr: side.snr,
                noise: side.noise,
                ..DetectionRecord::zero()
            };
            (vec![record], true)
        }
    };

    Frame {
        index,
        header: Some(header),
        num_detected_obj: records.len(),
        records,
        duplicate: false,
        placeholder,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    fn stream(data: Vec<u8>) -> BufReader<Cursor<Vec<u8>>> {
        BufReader::new(Cursor::new(data))
    }

    /// Builds a complete frame from a list of x, y, z, v and snr, noise
    /// values.
    fn frame_bytes(frame_number: u32, points: &[([f32; 4], [u16; 2])], side_type: u32) -> Vec<u8> {
        let tlv1: Vec<u8> = points
            .iter()
            .flat_map(|(p, _)| p.iter().flat_map(|v| v.to_le_bytes()))
            .collect();
        let tlv2: Vec<u8> = points
            .iter()
            .flat_map(|(_, s)| s.iter().flat_map(|v| v.to_le_bytes()))
            .collect();

        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&(tlv1.len() as u32).to_le_bytes());
        payload.extend_from_slice(&tlv1);
        payload.extend_from_slice(&side_type.to_le_bytes());
        payload.extend_from_slice(&(tlv2.len() as u32).to_le_bytes());
        payload.extend_from_slice(&tlv2);

        with_header(frame_number, points.len() as u32, &payload)
    }

    fn with_header(frame_number: u32, num_detected_obj: u32, payload: &[u8]) -> Vec<u8> {
        let mut data = MAGIC_WORD.to_vec();
        data.extend_from_slice(&0x0306_0004u32.to_le_bytes());
        data.extend_from_slice(&((payload.len() + 40) as u32).to_le_bytes());
        data.extend_from_slice(&[0x43, 0x68, 0x0a, 0x00]);
        data.extend_from_slice(&frame_number.to_le_bytes());
        data.extend_from_slice(&123456u32.to_le_bytes());
        data.extend_from_slice(&num_detected_obj.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    fn assert_placeholder(frame: &Frame) {
        assert!(frame.placeholder);
        assert!(frame.targets().is_empty());
        assert_eq!(frame.num_detected_obj, 1);
        assert_eq!(frame.records, vec![DetectionRecord::zero()]);
        assert_eq!(frame.rows(), vec![[0.0; 10]]);
    }

    #[test]
    fn test_valid_frame() {
        let points = [
            ([1.0, 2.0, 0.5, -0.25], [150, 30]),
            ([-3.0, 4.0, -1.0, 1.5], [220, 31]),
            ([0.125, 10.0, 2.0, 0.0], [90, 29]),
        ];
        let mut stream = stream(frame_bytes(42, &points, 7));
        let mut reader = FrameReader::new();

        let frame = reader.read(&mut stream).unwrap();
        assert_eq!(frame.num_detected_obj, 3);
        assert_eq!(frame.records.len(), 3);
        assert_eq!(frame.key(), Some((42, 0)));
        assert_eq!(frame.header.as_ref().unwrap().platform, "000a6843");

        for (i, (record, (p, s))) in frame.records.iter().zip(points.iter()).enumerate() {
            assert_eq!(record.index, i);
            assert_eq!(record.x.to_bits(), p[0].to_bits());
            assert_eq!(record.y.to_bits(), p[1].to_bits());
            assert_eq!(record.z.to_bits(), p[2].to_bits());
            assert_eq!(record.v.to_bits(), p[3].to_bits());

            let (x, y, z) = (p[0] as f64, p[1] as f64, p[2] as f64);
            assert!((record.range - (x * x + y * y + z * z).sqrt()).abs() < 1e-9);
            assert_eq!(record.snr, s[0]);
            assert_eq!(record.noise, s[1]);
        }

        assert!(!frame.placeholder);
        assert_eq!(frame.targets(), &frame.records[..]);
        assert_eq!(reader.frames(), 1);
        assert_eq!(reader.sync_losses(), 0);
    }

    #[test]
    fn test_boundary_angles() {
        let points = [
            ([5.0, 0.0, 0.0, 0.0], [1, 1]),
            ([-5.0, 0.0, 0.0, 0.0], [1, 1]),
            ([0.0, 0.0, 3.0, 0.0], [1, 1]),
            ([0.0, 0.0, -3.0, 0.0], [1, 1]),
        ];
        let frame = FrameReader::new()
            .read(&mut stream(frame_bytes(1, &points, 7)))
            .unwrap();

        assert_eq!(frame.records[0].azimuth, 90.0);
        assert_eq!(frame.records[1].azimuth, -90.0);
        assert_eq!(frame.records[2].elevation, 90.0);
        assert_eq!(frame.records[3].elevation, -90.0);
    }

    #[test]
    fn test_missing_magic_word() {
        let mut data = vec![0xAA; 8];
        data.extend(frame_bytes(7, &[([1.0, 1.0, 1.0, 1.0], [5, 5])], 7));
        let mut stream = stream(data);
        let mut reader = FrameReader::new();

        let frame = reader.read(&mut stream).unwrap();
        assert!(frame.is_sync_lost());
        assert_placeholder(&frame);
        assert_eq!(reader.sync_losses(), 1);

        // The whole buffered batch, including the following frame, is gone.
        assert!(matches!(
            reader.read(&mut stream),
            Err(Error::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof
        ));
    }

    #[test]
    fn test_magic_word_last_byte() {
        let mut data = MAGIC_WORD.to_vec();
        data[7] = 0x09;
        data.extend(frame_bytes(8, &[([1.0, 1.0, 1.0, 1.0], [5, 5])], 7));
        let mut stream = BufReader::with_capacity(8, Cursor::new(data));
        let mut reader = FrameReader::new();

        let frame = reader.read(&mut stream).unwrap();
        assert!(frame.is_sync_lost());
        assert_placeholder(&frame);
        assert_eq!(reader.sync_losses(), 1);

        let frame = reader.read(&mut stream).unwrap();
        assert_eq!(frame.key(), Some((8, 0)));
        assert!(!frame.placeholder);
    }

    #[test]
    fn test_packet_too_long() {
        let mut data = with_header(2, 1, &[]);
        data[12..16].copy_from_slice(&0x0100_0000u32.to_le_bytes());
        data.extend(frame_bytes(3, &[([0.0, 2.0, 0.0, 0.0], [7, 8])], 7));
        let mut stream = BufReader::with_capacity(8, Cursor::new(data));
        let mut reader = FrameReader::new();

        let frame = reader.read(&mut stream).unwrap();
        assert!(frame.is_sync_lost());
        assert_placeholder(&frame);
        assert_eq!(reader.sync_losses(), 1);

        let frame = reader.read(&mut stream).unwrap();
        assert_eq!(frame.key(), Some((3, 0)));
        assert_eq!(frame.records[0].range, 2.0);
    }

    #[test]
    fn test_max_packet_len() {
        // The largest accepted length still reads its whole payload.
        let payload = vec![0u8; FrameHeader::MAX_PACKET_LEN as usize - 40];
        let mut data = with_header(4, 0, &payload);
        data.extend(frame_bytes(5, &[([1.0, 0.0, 0.0, 0.0], [1, 1])], 7));
        let mut stream = stream(data);
        let mut reader = FrameReader::new();

        let frame = reader.read(&mut stream).unwrap();
        assert!(!frame.is_sync_lost());
        assert_placeholder(&frame);
        assert_eq!(reader.read(&mut stream).unwrap().key(), Some((5, 0)));
    }

    #[test]
    fn test_discard_keeps_unbuffered_bytes() {
        let mut data = vec![0x55; 8];
        data.extend(frame_bytes(9, &[([1.0, 0.0, 0.0, 0.0], [5, 6])], 7));
        // A buffer no larger than the magic word means nothing sits in the
        // buffer when the mismatch is detected.
        let mut stream = BufReader::with_capacity(8, Cursor::new(data));
        let mut reader = FrameReader::new();

        assert!(reader.read(&mut stream).unwrap().is_sync_lost());

        let frame = reader.read(&mut stream).unwrap();
        assert_eq!(frame.key(), Some((9, 0)));
        assert_eq!(frame.index, 1);
        assert_eq!(frame.records[0].snr, 5);
        assert_eq!(frame.records[0].noise, 6);
    }

    #[test]
    fn test_zero_detections() {
        // Valid looking points are ignored when the header reports none.
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&16u32.to_le_bytes());
        for v in [1.0f32, 2.0, 3.0, 4.0] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        payload.extend_from_slice(&7u32.to_le_bytes());
        payload.extend_from_slice(&4u32.to_le_bytes());
        payload.extend_from_slice(&[9, 0, 9, 0]);

        let mut data = with_header(3, 0, &payload);
        data.extend(frame_bytes(4, &[([1.0, 1.0, 0.0, 0.0], [1, 2])], 7));
        let mut stream = stream(data);
        let mut reader = FrameReader::new();

        let frame = reader.read(&mut stream).unwrap();
        assert!(!frame.is_sync_lost());
        assert_placeholder(&frame);

        // Header and payload were consumed, the next frame follows in sync.
        let frame = reader.read(&mut stream).unwrap();
        assert_eq!(frame.key(), Some((4, 0)));
        assert_eq!(frame.num_detected_obj, 1);
        assert_eq!(frame.records[0].x, 1.0);
    }

    #[test]
    fn test_side_info_type() {
        let points = [
            ([1.0, 2.0, 3.0, 4.0], [100, 200]),
            ([2.0, 3.0, 4.0, 5.0], [300, 400]),
        ];
        let frame = FrameReader::new()
            .read(&mut stream(frame_bytes(1, &points, 6)))
            .unwrap();

        assert_eq!(frame.num_detected_obj, 2);
        assert!(!frame.placeholder);
        for record in &frame.records {
            assert_eq!(record.snr, 0);
            assert_eq!(record.noise, 0);
        }
        assert_eq!(frame.records[1].x, 2.0);
    }

    #[test]
    fn test_invalid_tlv_length() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&4096u32.to_le_bytes());
        payload.extend_from_slice(&[0x11; 32]);

        let frame = FrameReader::new()
            .read(&mut stream(with_header(5, 2, &payload)))
            .unwrap();

        assert_eq!(frame.key(), Some((5, 0)));
        assert_placeholder(&frame);
    }

    #[test]
    fn test_unexpected_tlv_type() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.extend_from_slice(&16u32.to_le_bytes());
        payload.extend_from_slice(&[0x11; 16]);
        payload.extend_from_slice(&7u32.to_le_bytes());
        payload.extend_from_slice(&4u32.to_le_bytes());
        payload.extend_from_slice(&[3, 0, 4, 0]);

        let frame = FrameReader::new()
            .read(&mut stream(with_header(5, 1, &payload)))
            .unwrap();

        // The placeholder position is paired with the side info of object 0.
        assert_eq!(frame.num_detected_obj, 1);
        assert!(frame.placeholder);
        assert!(frame.targets().is_empty());
        assert_eq!(frame.records[0].range, 0.0);
        assert_eq!(frame.records[0].snr, 3);
        assert_eq!(frame.records[0].noise, 4);
    }

    #[test]
    fn test_short_packet() {
        // A packet length below the header size reads no payload.
        let mut data = with_header(6, 1, &[]);
        data[12..16].copy_from_slice(&8u32.to_le_bytes());
        data.extend(frame_bytes(7, &[([0.0, 1.0, 0.0, 0.0], [1, 1])], 7));
        let mut stream = stream(data);
        let mut reader = FrameReader::new();

        assert_placeholder(&reader.read(&mut stream).unwrap());
        assert_eq!(reader.read(&mut stream).unwrap().key(), Some((7, 0)));
    }

    #[test]
    fn test_duplicate_frames() {
        let points = [([1.0, 1.0, 1.0, 1.0], [1, 1])];
        let mut data = frame_bytes(10, &points, 7);
        data.extend(frame_bytes(10, &points, 7));
        data.extend(frame_bytes(11, &points, 7));
        let mut stream = stream(data);
        let mut reader = FrameReader::new();

        let flags: Vec<_> = (0..3)
            .map(|_| reader.read(&mut stream).unwrap().duplicate)
            .collect();
        assert_eq!(flags, vec![false, true, false]);
        assert_eq!(reader.duplicates(), 1);
        assert_eq!(reader.frames(), 3);
    }
}
