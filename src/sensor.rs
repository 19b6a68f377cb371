// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Sensor capability interface shared by the radar and a random test source.

use crate::{
    protocol::{self, DetectionRecord},
    reader::{Frame, FrameReader},
    serial::SerialStream,
};
use log::info;
use ndarray::Array2;
use rand::Rng;
use serde_json::{json, Value};
use std::{
    fmt, io,
    time::{Duration, Instant},
};

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Serial(serialport::Error),
    Protocol(protocol::Error),
    Shape(ndarray::ShapeError),
    NotConnected(String),
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Error {
        Error::Serial(err)
    }
}

impl From<protocol::Error> for Error {
    fn from(err: protocol::Error) -> Error {
        Error::Protocol(err)
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Error {
        Error::Shape(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Serial(err) => write!(f, "serial error: {}", err),
            Error::Protocol(err) => write!(f, "protocol error: {}", err),
            Error::Shape(err) => write!(f, "shape error: {}", err),
            Error::NotConnected(sensor) => write!(f, "{} sensor not connected", sensor),
        }
    }
}

/// Value type of an output field.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FieldType {
    Int,
    Float,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldType::Int => write!(f, "int"),
            FieldType::Float => write!(f, "float"),
        }
    }
}

/// Describes one group of columns produced by a sensor.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputField {
    pub field_type: FieldType,
    pub count: usize,
    pub tag: String,
}

impl OutputField {
    pub fn to_json(&self) -> Value {
        json!({
            "type": self.field_type.to_string(),
            "count": self.count,
            "tag": self.tag,
        })
    }
}

/// Serializes a sensor schema to the JSON list understood by capture tools.
pub fn schema_json(fields: &[OutputField]) -> Value {
    Value::Array(fields.iter().map(OutputField::to_json).collect())
}

/// A source of samples.  Each sample is a matrix with one row per reading
/// and the columns described by [`Sensor::output_schema`].
pub trait Sensor {
    fn connect(&mut self) -> Result<(), Error>;

    /// Returns the next sample, or `None` when nothing new is available.
    fn read_data(&mut self) -> Result<Option<Array2<f64>>, Error>;

    fn disconnect(&mut self) -> Result<(), Error>;

    fn output_schema(&self) -> Vec<OutputField>;
}

/// The mmWave radar behind its UART data port.  Samples have one row per
/// detected object; repeated frames are skipped.
pub struct RadarSensor {
    path: String,
    baud_rate: u32,
    stream: Option<SerialStream>,
    reader: FrameReader,
}

impl RadarSensor {
    pub fn new(path: &str, baud_rate: u32) -> Self {
        RadarSensor {
            path: path.to_string(),
            baud_rate,
            stream: None,
            reader: FrameReader::new(),
        }
    }

    /// Reads the next frame from the data port.
    pub fn read_frame(&mut self) -> Result<Frame, Error> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::NotConnected("radar".to_string()))?;
        Ok(self.reader.read(stream)?)
    }
}

impl Sensor for RadarSensor {
    fn connect(&mut self) -> Result<(), Error> {
        self.stream = Some(SerialStream::open(&self.path, self.baud_rate)?);
        Ok(())
    }

    fn read_data(&mut self) -> Result<Option<Array2<f64>>, Error> {
        let frame = self.read_frame()?;
        if frame.duplicate {
            return Ok(None);
        }

        Ok(Some(frame_to_array(&frame)?))
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        if self.stream.take().is_some() {
            info!("radar on {} disconnected", self.path);
        }
        Ok(())
    }

    fn output_schema(&self) -> Vec<OutputField> {
        vec![OutputField {
            field_type: FieldType::Float,
            count: DetectionRecord::FIELDS,
            tag: "radar".to_string(),
        }]
    }
}

/// Lays out the frame's records as an `objects x 10` matrix.
pub fn frame_to_array(frame: &Frame) -> Result<Array2<f64>, ndarray::ShapeError> {
    let data: Vec<f64> = frame.rows().into_iter().flatten().collect();
    Array2::from_shape_vec((frame.records.len(), DetectionRecord::FIELDS), data)
}

/// Configuration of the [`RandomSensor`].
#[derive(Clone, Debug)]
pub struct RandomConfig {
    /// Inclusive lower bound.
    pub min_value: f64,
    /// Exclusive upper bound.
    pub max_value: f64,
    pub dimensions: usize,
    pub sample_time: Duration,
    pub field_type: FieldType,
}

impl Default for RandomConfig {
    fn default() -> Self {
        RandomConfig {
            min_value: 0.0,
            max_value: 100.0,
            dimensions: 3,
            sample_time: Duration::from_millis(100),
            field_type: FieldType::Int,
        }
    }
}

/// Test sensor producing one row of random values per sample period.
pub struct RandomSensor {
    config: RandomConfig,
    connected: bool,
    last_reading: Instant,
}

impl RandomSensor {
    pub fn new(config: RandomConfig) -> Self {
        RandomSensor {
            config,
            connected: false,
            last_reading: Instant::now(),
        }
    }

    fn sample(&self) -> Vec<f64> {
        let mut rng = rand::thread_rng();
        let (min, max) = (self.config.min_value, self.config.max_value);

        (0..self.config.dimensions)
            .map(|_| match self.config.field_type {
                FieldType::Int => {
                    let (min, max) = (min.ceil() as i64, max.ceil() as i64);
                    if min < max {
                        rng.gen_range(min..max) as f64
                    } else {
                        min as f64
                    }
                }
                FieldType::Float => {
                    if min < max {
                        rng.gen_range(min..max)
                    } else {
                        min
                    }
                }
            })
            .collect()
    }
}

impl Default for RandomSensor {
    fn default() -> Self {
        Self::new(RandomConfig::default())
    }
}

impl Sensor for RandomSensor {
    fn connect(&mut self) -> Result<(), Error> {
        self.connected = true;
        info!("random sensor connected");
        Ok(())
    }

    fn read_data(&mut self) -> Result<Option<Array2<f64>>, Error> {
        if !self.connected {
            return Err(Error::NotConnected("random".to_string()));
        }

        if self.last_reading.elapsed() <= self.config.sample_time {
            return Ok(None);
        }

        self.last_reading = Instant::now();
        Ok(Some(Array2::from_shape_vec(
            (1, self.config.dimensions),
            self.sample(),
        )?))
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        self.connected = false;
        info!("random sensor disconnected");
        Ok(())
    }

    fn output_schema(&self) -> Vec<OutputField> {
        vec![OutputField {
            field_type: self.config.field_type,
            count: self.config.dimensions,
            tag: "random".to_string(),
        }]
    }
}
