// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! mmWavePub Library
//!
//! This library decodes the UART output of TI mmWave radar sensors running
//! the out of box demo into per-frame detection lists and publishes them to
//! the EdgeFirst Perception Middleware via Zenoh.
//!
//! # Features
//!
//! - **Frame Decoding** - Magic word sync, frame header and the detected
//!   points and side info TLV records
//! - **Serial Interface** - Data and CLI ports via the `serialport` crate
//! - **Sensor Interface** - Common capability trait for the radar and a
//!   random test sensor
//! - **Zenoh Publishing** - ROS2-compatible PointCloud2 publishing
//!
//! # Example
//!
//! ```no_run
//! use mmwavepub::{reader::FrameReader, serial::SerialStream};
//!
//! let mut port = SerialStream::open("/dev/ttyACM1", 921_600)?;
//! let mut reader = FrameReader::new();
//! loop {
//!     let frame = reader.read(&mut port)?;
//!     println!("{}", frame);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]

/// UART frame format and TLV record decoders
pub mod protocol;

/// Frame synchronization and assembly
pub mod reader;

/// Serial data and CLI ports
pub mod serial;

/// Sensor capability interface
pub mod sensor;
