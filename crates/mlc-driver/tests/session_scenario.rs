//! 通过真实 IO 线程和 mock 串口验证会话的端到端行为

use mlc_driver::{DeviceConfig, DriverError, EventCallback, MlcEvent, MlcSession, ResponseFault};
use mlc_model::{Layer, LayerCount, MlcConfig, PairKey, PredefinedShape, Side};
use mlc_protocol::{BroadcastKind, MlcFrame};
use mlc_serial::{MockLink, SimulatedDevice};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

fn single_layer() -> MlcConfig {
    MlcConfig {
        number_of_pairs: 4,
        layers: LayerCount::One,
        ..Default::default()
    }
}

fn corrupt(mut bytes: Vec<u8>) -> Vec<u8> {
    if let Some(last) = bytes.last_mut() {
        *last ^= 0xFF;
    }
    bytes
}

struct SentCounter(Arc<AtomicU64>);

impl EventCallback for SentCounter {
    fn on_event(&self, _event: &MlcEvent) {}

    fn on_frame_sent(&self, _layer: Layer, _frame: &MlcFrame) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn crc_error_is_retransmitted_once_then_broadcast_completes() {
    let link = MockLink::new();
    let mut device = SimulatedDevice::new(1..=8);
    let mut corrupted_once = false;
    link.set_responder(move |frame| {
        let reply = device.respond(frame);
        if frame.address() == 5 && !corrupted_once {
            corrupted_once = true;
            return corrupt(reply);
        }
        reply
    });

    let session = MlcSession::builder()
        .collimator(single_layer())
        .adapter(Layer::Layer1, "mock", link.adapter())
        .build()
        .unwrap();
    let events = session.subscribe(64).unwrap();
    let sent = Arc::new(AtomicU64::new(0));
    session
        .add_callback(Arc::new(SentCounter(sent.clone())))
        .unwrap();

    session.query_leaf(Layer::Layer1, 2).unwrap();
    session.query_leaf(Layer::Layer1, 5).unwrap();
    session.broadcast(Layer::Layer1, BroadcastKind::Start).unwrap();
    session.wait_idle(Duration::from_secs(2)).unwrap();

    let written: Vec<u8> = link.written_frames().iter().map(|f| f.address()).collect();
    assert_eq!(written, vec![2, 5, 5, 0]);
    assert_eq!(sent.load(Ordering::Relaxed), 4);

    let stats = session.stats(Layer::Layer1).unwrap();
    assert_eq!(stats.sent, 3);
    assert_eq!(stats.confirmed, 2);
    assert_eq!(stats.retransmitted, 1);
    assert_eq!(stats.broadcasts, 1);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.queued, 0);
    assert!(!stats.in_flight);

    let events: Vec<MlcEvent> = events.try_iter().collect();
    let decoded: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            MlcEvent::FrameDecoded { report, .. } => Some(report.address),
            _ => None,
        })
        .collect();
    assert_eq!(decoded, vec![2, 5]);
    assert!(events.contains(&MlcEvent::SwitchChanged {
        address: 5,
        layer: Layer::Layer1,
        side: Side::Side1,
        pressed: true,
    }));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, MlcEvent::CommandDropped { .. }))
    );

    let position = session
        .with_leaves(Layer::Layer1, |leaves| {
            leaves
                .leaf_by_address(2, Layer::Layer1)
                .and_then(|leaf| leaf.actual_current_position())
        })
        .unwrap();
    assert_eq!(position, Some(0));
}

#[test]
fn persistent_crc_errors_drop_the_command() {
    let link = MockLink::new();
    let mut device = SimulatedDevice::new(1..=8);
    link.set_responder(move |frame| corrupt(device.respond(frame)));

    let device_config = DeviceConfig {
        max_retransmits: 2,
        ..Default::default()
    };
    let session = MlcSession::builder()
        .collimator(single_layer())
        .device(device_config)
        .adapter(Layer::Layer1, "noisy", link.adapter())
        .build()
        .unwrap();
    let events = session.subscribe(16).unwrap();

    session.query_leaf(Layer::Layer1, 3).unwrap();
    session.wait_idle(Duration::from_secs(2)).unwrap();

    assert_eq!(link.written_frames().len(), 3);
    let stats = session.stats(Layer::Layer1).unwrap();
    assert_eq!(stats.retransmitted, 2);
    assert_eq!(stats.dropped, 1);

    let dropped: Vec<MlcEvent> = events.try_iter().collect();
    assert_eq!(dropped.len(), 1);
    assert!(matches!(
        dropped[0],
        MlcEvent::CommandDropped {
            layer: Layer::Layer1,
            fault: ResponseFault::CrcMismatch,
            ..
        }
    ));
}

#[test]
fn shape_then_parameters_reach_every_leaf() {
    let link = MockLink::new();
    let device = SimulatedDevice::new(1..=8).attach(&link);
    let session = MlcSession::builder()
        .collimator(single_layer())
        .adapter(Layer::Layer1, "sim", link.adapter())
        .build()
        .unwrap();

    session
        .with_leaves_mut(Layer::Layer1, |leaves| {
            for address in leaves.addresses_in_layer(Layer::Layer1) {
                if let Some(leaf) = leaves.leaf_by_address_mut(address, Layer::Layer1) {
                    leaf.calibration_steps = Some(10_000);
                }
            }
        })
        .unwrap();

    let mut table: BTreeMap<(PairKey, Side), f64> = BTreeMap::new();
    session
        .apply_shape(Layer::Layer1, PredefinedShape::Close, &mut table)
        .unwrap();
    assert_eq!(table.len(), 8);
    assert_eq!(session.send_parameters(Layer::Layer1).unwrap(), 8);
    session.broadcast(Layer::Layer1, BroadcastKind::Start).unwrap();
    session.wait_idle(Duration::from_secs(2)).unwrap();

    let device = device.lock();
    for address in 1..=8 {
        assert_eq!(device.position(address), Some(10_000));
    }
    drop(device);

    // 广播启动不应答，重新查询后模型才看到新位置
    session.query_state(Layer::Layer1).unwrap();
    session.wait_idle(Duration::from_secs(2)).unwrap();
    assert_eq!(session.position_gap(Layer::Layer1, 1).unwrap(), Some(0.0));
}

#[test]
fn closed_link_marks_session_unhealthy() {
    let link = MockLink::new();
    let session = MlcSession::builder()
        .collimator(single_layer())
        .adapter(Layer::Layer1, "mock", link.adapter())
        .build()
        .unwrap();
    assert!(session.is_healthy());

    link.close();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while session.is_healthy() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(!session.is_healthy());

    match session.query_leaf(Layer::Layer1, 1) {
        Err(DriverError::ChannelClosed) => {},
        Ok(()) => assert!(matches!(
            session.wait_idle(Duration::from_millis(100)),
            Err(DriverError::ChannelClosed)
        )),
        Err(other) => panic!("unexpected error: {}", other),
    }
}

#[test]
fn slow_subscriber_sees_how_many_events_it_lost() {
    let link = MockLink::new();
    SimulatedDevice::new(1..=8).attach(&link);
    let session = MlcSession::builder()
        .collimator(single_layer())
        .adapter(Layer::Layer1, "sim", link.adapter())
        .build()
        .unwrap();
    let events = session.subscribe(2).unwrap();

    // 每条状态应答至少产生一个 FrameDecoded 事件
    assert_eq!(session.query_state(Layer::Layer1).unwrap(), 8);
    session.wait_idle(Duration::from_secs(2)).unwrap();

    let received = events.try_iter().count() as u64;
    assert_eq!(received, 2);
    assert!(events.dropped_events() >= 6);
    assert!(events.try_recv().is_err());
}
