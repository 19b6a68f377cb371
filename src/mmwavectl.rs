// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::{Parser, ValueEnum};
use log::{debug, error};
use mmwavepub::{
    protocol::{self, DetectionRecord},
    reader::FrameReader,
    sensor::{schema_json, FieldType, RadarSensor, RandomConfig, RandomSensor, Sensor},
    serial::{CommandPort, CLI_BAUD_RATE, DATA_BAUD_RATE},
};
use std::{fs::File, io, io::BufReader, thread, time::Duration};

/// Sensor used by the monitor.
#[derive(Copy, Clone, Debug, ValueEnum)]
enum Source {
    Radar,
    Random,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UART data port of the radar.
    #[arg(short, long, default_value = "/dev/ttyACM1")]
    data_port: String,

    /// Baud rate of the data port.
    #[arg(long, default_value_t = DATA_BAUD_RATE)]
    data_baud: u32,

    /// UART CLI port of the radar.
    #[arg(long, default_value = "/dev/ttyACM0")]
    cli_port: String,

    /// Send a single command line, e.g. "sensorStop", to the CLI port.
    #[arg(short, long)]
    command: Option<String>,

    /// Monitor the sensor and print every sample.
    #[arg(short, long)]
    monitor: bool,

    /// Sensor to monitor.
    #[arg(short, long, value_enum, default_value = "radar")]
    source: Source,

    /// Print the decoded frames of a captured data port dump.
    #[arg(short, long)]
    replay: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    if let Some(command) = &args.command {
        debug!("opening cli port {}", args.cli_port);
        let mut port = CommandPort::open(&args.cli_port, CLI_BAUD_RATE)?;
        port.send(command)?;
        println!("sent: {}", command);
    }

    if let Some(path) = &args.replay {
        replay(path)?;
    }

    if args.monitor {
        let mut sensor: Box<dyn Sensor> = match args.source {
            Source::Radar => Box::new(RadarSensor::new(&args.data_port, args.data_baud)),
            Source::Random => Box::new(RandomSensor::new(RandomConfig {
                field_type: FieldType::Float,
                ..RandomConfig::default()
            })),
        };
        monitor(sensor.as_mut())?;
    }

    Ok(())
}

fn replay(path: &str) -> Result<(), protocol::Error> {
    let mut stream = BufReader::new(File::open(path)?);
    let mut reader = FrameReader::new();

    println!("{}", DetectionRecord::COLUMNS.join(","));
    loop {
        match reader.read(&mut stream) {
            Ok(frame) => {
                println!("# {}", frame);
                for row in frame.rows() {
                    let row: Vec<_> = row.iter().map(|v| v.to_string()).collect();
                    println!("{}", row.join(","));
                }
            }
            Err(protocol::Error::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err),
        }
    }

    println!(
        "# frames: {} sync losses: {} duplicates: {}",
        reader.frames(),
        reader.sync_losses(),
        reader.duplicates()
    );
    Ok(())
}

fn monitor(sensor: &mut dyn Sensor) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", schema_json(&sensor.output_schema()));
    sensor.connect()?;

    loop {
        match sensor.read_data() {
            Ok(Some(sample)) => println!("{}", sample),
            Ok(None) => thread::sleep(Duration::from_millis(1)),
            Err(err) => {
                error!("read error: {}", err);
                sensor.disconnect()?;
                return Err(err.into());
            }
        }
    }
}
