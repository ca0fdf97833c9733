mod common;

use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use camstream_capture::{VirtualCameraConfig, VirtualCameraProvider};
use camstream_encoder::SyntheticEncoderFactory;
use camstream_engine::{create_engine, Hardware, Pipeline};
use camstream_ipc::{
    command_channel, event_channel, Destination, EngineCommand, EngineEvent, PipelinePolicy,
    StreamConfig,
};
use camstream_transport::UdpSinkFactory;

use common::{destination, wait_until, Fakes, OpenMode, Step};

const WAIT: Duration = Duration::from_secs(5);

fn next_matching(
    events: &crossbeam_channel::Receiver<EngineEvent>,
    mut predicate: impl FnMut(&EngineEvent) -> bool,
) -> Option<EngineEvent> {
    let deadline = std::time::Instant::now() + WAIT;
    while let Some(remaining) = deadline.checked_duration_since(std::time::Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(event) if predicate(&event) => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

#[test]
fn engine_runs_commands_until_shutdown() {
    let fakes = Fakes::new(&["0"], OpenMode::Immediate, vec![Step::Buffer(64)]);
    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let mut engine =
        create_engine(fakes.hardware(), PipelinePolicy::default(), command_rx, event_tx).unwrap();
    let handle = thread::spawn(move || engine.run());

    assert!(next_matching(&event_rx, |e| matches!(e, EngineEvent::Ready)).is_some());

    command_tx
        .send(EngineCommand::Start {
            destination: destination(),
            config: StreamConfig {
                width: 16,
                height: 8,
                ..Default::default()
            },
        })
        .unwrap();
    assert!(next_matching(&event_rx, |e| matches!(
        e,
        EngineEvent::StateChanged { current, .. } if current.is_live()
    ))
    .is_some());

    command_tx.send(EngineCommand::GetMetrics).unwrap();
    let metrics = next_matching(&event_rx, |e| matches!(e, EngineEvent::Metrics(_)));
    assert!(matches!(metrics, Some(EngineEvent::Metrics(m)) if m.target_bitrate_bps == 2_000_000));

    command_tx.send(EngineCommand::GetState).unwrap();
    assert!(next_matching(&event_rx, |e| matches!(
        e,
        EngineEvent::StateChanged { previous, current } if previous == current
    ))
    .is_some());

    command_tx.send(EngineCommand::Shutdown).unwrap();
    assert!(next_matching(&event_rx, |e| matches!(e, EngineEvent::Shutdown)).is_some());
    handle.join().unwrap();

    assert!(fakes.all_released());
}

#[test]
fn engine_reports_start_failure() {
    let fakes = Fakes::new(&[], OpenMode::Immediate, Vec::new());
    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let mut engine =
        create_engine(fakes.hardware(), PipelinePolicy::default(), command_rx, event_tx).unwrap();
    let handle = thread::spawn(move || engine.run());

    command_tx
        .send(EngineCommand::Start {
            destination: destination(),
            config: StreamConfig::default(),
        })
        .unwrap();
    let error = next_matching(&event_rx, |e| matches!(e, EngineEvent::Error { .. }));
    assert!(matches!(
        error,
        Some(EngineEvent::Error { recoverable: true, ref message }) if message.contains("No camera")
    ));

    drop(command_tx);
    handle.join().unwrap();
}

#[test]
fn virtual_devices_stream_to_udp() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver.set_read_timeout(Some(WAIT)).unwrap();
    let port = receiver.local_addr().unwrap().port();

    let cameras = VirtualCameraProvider::new(VirtualCameraConfig {
        open_delay: Duration::from_millis(1),
        configure_delay: Duration::from_millis(1),
        frame_rate: 30,
        ..Default::default()
    });
    let hardware = Hardware::new(
        Arc::new(cameras.clone()),
        Arc::new(SyntheticEncoderFactory),
        Arc::new(UdpSinkFactory),
    );
    let (event_tx, _event_rx) = crossbeam_channel::unbounded();
    let pipeline = Pipeline::new(hardware, PipelinePolicy::default(), event_tx).unwrap();

    pipeline
        .start(
            Destination::new("127.0.0.1", port),
            StreamConfig {
                width: 32,
                height: 16,
                bitrate_bps: 100_000,
                frame_rate: 30,
                keyframe_interval_secs: 1,
            },
        )
        .unwrap();
    assert!(wait_until(WAIT, || pipeline.state().is_live()));

    // Codec config first, then at least one coded picture.
    let mut buf = [0u8; 65_536];
    let (n, _) = receiver.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..4], &[0, 0, 0, 1]);
    assert_eq!(buf[4] & 0x1F, 7);
    assert!(n > 8);
    let (n, _) = receiver.recv_from(&mut buf).unwrap();
    assert!(n > 5);
    assert_eq!(buf[4], 0x65);

    pipeline.stop();
    assert_eq!(cameras.open_devices(), 0);
    assert_eq!(cameras.open_sessions(), 0);
    assert!(pipeline.metrics().datagrams_sent >= 2);
}
