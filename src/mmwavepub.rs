// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use edgefirst_schemas::{
    builtin_interfaces::{self, Time},
    geometry_msgs::{Quaternion, Transform, TransformStamped, Vector3},
    sensor_msgs, serde_cdr,
    std_msgs::{self, Header},
};
use kanal::{AsyncReceiver, Sender};
use mmwavepub::{
    protocol::{self, DetectionRecord},
    reader::{ByteStream, Frame, FrameReader},
    serial::SerialStream,
};
use std::{fs::File, io, io::BufReader, thread, time::Duration};
use tracing::{debug, error, info, info_span, instrument, Instrument};
use tracing_subscriber::{layer::SubscriberExt as _, Layer as _, Registry};
use tracy_client::{frame_mark, plot};
use zenoh::{
    bytes::{Encoding, ZBytes},
    qos::{CongestionControl, Priority},
    Session,
};

#[cfg(feature = "profiling")]
#[global_allocator]
static GLOBAL: tracy_client::ProfiledAllocator<std::alloc::System> =
    tracy_client::ProfiledAllocator::new(std::alloc::System, 100);

#[derive(Debug)]
#[allow(dead_code)]
pub enum PointFieldType {
    INT8 = 1,
    UINT8 = 2,
    INT16 = 3,
    UINT16 = 4,
    INT32 = 5,
    UINT32 = 6,
    FLOAT32 = 7,
    FLOAT64 = 8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    args.tracy.then(tracy_client::Client::start);

    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(args.rust_log);

    let journald = match tracing_journald::layer() {
        Ok(journald) => Some(journald.with_filter(args.rust_log)),
        Err(_) => None,
    };

    let tracy = match args.tracy {
        true => Some(tracing_tracy::TracyLayer::default().with_filter(args.rust_log)),
        false => None,
    };

    let subscriber = Registry::default()
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
    tracing_log::LogTracer::init()?;

    let session = zenoh::open(args.clone()).await?;

    let source: Box<dyn ByteStream + Send> = match &args.replay {
        Some(path) => {
            info!("replaying {}", path.display());
            Box::new(BufReader::new(File::open(path)?))
        }
        None => Box::new(SerialStream::open(&args.data_port, args.data_baud)?),
    };

    let tf_session = session.clone();
    let tf_msg = TransformStamped {
        header: Header {
            frame_id: args.base_frame_id.clone(),
            stamp: timestamp().unwrap_or(Time { sec: 0, nanosec: 0 }),
        },
        child_frame_id: args.radar_frame_id.clone(),
        transform: Transform {
            translation: Vector3 {
                x: args.radar_tf_vec[0],
                y: args.radar_tf_vec[1],
                z: args.radar_tf_vec[2],
            },
            rotation: Quaternion {
                x: args.radar_tf_quat[0],
                y: args.radar_tf_quat[1],
                z: args.radar_tf_quat[2],
                w: args.radar_tf_quat[3],
            },
        },
    };
    let tf_msg = ZBytes::from(serde_cdr::serialize(&tf_msg)?);
    let tf_enc = Encoding::APPLICATION_CDR.with_schema("geometry_msgs/msg/TransformStamped");
    let tf_task = tokio::spawn(async move {
        if let Err(e) = tf_static(tf_session, tf_msg, tf_enc).await {
            error!("tf_static error: {:?}", e);
        }
    });
    std::mem::drop(tf_task);

    let (tx, rx) = kanal::bounded(16);
    let tracy_enabled = args.tracy;

    thread::Builder::new()
        .name("serial".to_string())
        .spawn(move || {
            if let Err(err) = read_loop(source, tx, tracy_enabled) {
                error!("frame reader error: {}", err);
            }
        })?;

    stream(session, args, rx.to_async()).await
}

/// Decodes frames on the blocking data port and hands them to the publisher.
/// A replay ends cleanly at the end of its file.
fn read_loop(
    mut source: Box<dyn ByteStream + Send>,
    tx: Sender<Frame>,
    tracy: bool,
) -> Result<(), protocol::Error> {
    let mut reader = FrameReader::new();

    loop {
        let frame = match reader.read(&mut *source) {
            Ok(frame) => frame,
            Err(protocol::Error::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                info!(
                    "end of stream after {} frames, {} sync losses, {} duplicates",
                    reader.frames(),
                    reader.sync_losses(),
                    reader.duplicates()
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        tracy.then(|| plot!("sync losses", reader.sync_losses() as f64));

        if tx.send(frame).is_err() {
            return Ok(());
        }
    }
}

/// Publishes the targets of each frame.  Placeholder frames go out as empty
/// clouds, sync-lost frames are skipped.
async fn stream(
    session: Session,
    args: Args,
    rx: AsyncReceiver<Frame>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let targets_publisher = session
        .declare_publisher(args.targets_topic.clone())
        .priority(Priority::DataHigh)
        .congestion_control(CongestionControl::Drop)
        .await?;

    while let Ok(frame) = rx.recv().await {
        if frame.is_sync_lost() {
            debug!("skipping frame {} without sync", frame.index);
            continue;
        }

        if frame.duplicate && !args.publish_duplicates {
            debug!("skipping duplicate frame {:?}", frame.key());
            continue;
        }

        let targets = frame.targets();
        args.tracy.then(|| plot!("targets", targets.len() as f64));

        let (msg, enc) = format_targets(targets, &args.radar_frame_id)?;

        let span = info_span!("targets_publish");
        async {
            match targets_publisher.put(msg).encoding(enc).await {
                Ok(_) => {}
                Err(e) => error!("{} publish error: {:?}", args.targets_topic, e),
            }
        }
        .instrument(span)
        .await;

        args.tracy.then(frame_mark);
    }

    info!("frame reader stopped");
    Ok(())
}

#[instrument(skip_all)]
fn format_targets(
    records: &[DetectionRecord],
    frame_id: &str,
) -> Result<(ZBytes, Encoding), Box<dyn std::error::Error + Send + Sync>> {
    let n_targets = records.len() as u32;
    let data: Vec<_> = records
        .iter()
        .flat_map(|record| {
            [
                record.x,
                record.y,
                record.z,
                record.v,
                record.range as f32,
                record.azimuth as f32,
                record.elevation as f32,
                record.snr as f32,
                record.noise as f32,
            ]
        })
        .flat_map(|elem| elem.to_ne_bytes())
        .collect();

    let fields = [
        "x",
        "y",
        "z",
        "speed",
        "range",
        "azimuth",
        "elevation",
        "snr",
        "noise",
    ]
    .iter()
    .enumerate()
    .map(|(i, name)| sensor_msgs::PointField {
        name: name.to_string(),
        offset: 4 * i as u32,
        datatype: PointFieldType::FLOAT32 as u8,
        count: 1,
    })
    .collect::<Vec<_>>();
    let point_step = 4 * fields.len() as u32;

    let msg = sensor_msgs::PointCloud2 {
        header: std_msgs::Header {
            stamp: timestamp()?,
            frame_id: frame_id.to_string(),
        },
        height: 1,
        width: n_targets,
        fields,
        is_bigendian: false,
        point_step,
        row_step: point_step * n_targets,
        data,
        is_dense: true,
    };

    let msg = ZBytes::from(serde_cdr::serialize(&msg)?);
    let enc = Encoding::APPLICATION_CDR.with_schema("sensor_msgs/msg/PointCloud2");

    Ok((msg, enc))
}

async fn tf_static(
    session: Session,
    msg: ZBytes,
    enc: Encoding,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let topic = "rt/tf_static".to_string();
    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        interval.tick().await;
        let span = info_span!("tf_static_publish");
        async { session.put(&topic, msg.clone()).encoding(enc.clone()).await }
            .instrument(span)
            .await?;
    }
}

fn timestamp() -> Result<builtin_interfaces::Time, std::io::Error> {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let err = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut tp) };
    if err != 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(builtin_interfaces::Time {
        sec: tp.tv_sec as i32,
        nanosec: tp.tv_nsec as u32,
    })
}
