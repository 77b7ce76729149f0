
use crate::device::mock::MockDevice;
use crate::{Engine, EngineConfig, Error, Packet};
use packets::{udp_source_port, PacketFactory};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn engine_with(dev: &MockDevice, config: EngineConfig) -> Engine {
    Engine::with_device(Box::new(dev.clone()), config).unwrap()
}

fn started_engine(dev: &MockDevice) -> Engine {
    let engine = engine_with(dev, EngineConfig::default());
    engine.start().unwrap();
    engine
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_reads_preserve_device_order() {
    let dev = MockDevice::new();
    let engine = started_engine(&dev);

    let sent = PacketFactory::sequence(25);
    for packet in &sent {
        dev.inject_packet(packet.clone());
    }

    for expected in &sent {
        let packet = engine.read().unwrap();
        assert_eq!(packet.len(), expected.len());
        assert_eq!(packet.as_bytes(), &expected[..]);
    }
    engine.close().unwrap();
}

#[test]
fn test_full_incoming_queue_blocks_read_pump() {
    let dev = MockDevice::new();
    let engine = started_engine(&dev);
    let capacity = engine.config().queue_capacity;

    let sent = PacketFactory::sequence(capacity as u16 + 2);
    for packet in &sent {
        dev.inject_packet(packet.clone());
    }

    // The pump fills the queue, pulls one more packet and parks on the enqueue.
    wait_until("queue to fill", || engine.pending_incoming() == capacity);
    wait_until("pump to pull one extra packet", || dev.recv_calls() == capacity + 1);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(dev.recv_calls(), capacity + 1);
    assert_eq!(engine.pending_incoming(), capacity);

    let first = engine.read().unwrap();
    assert_eq!(udp_source_port(first.as_bytes()), 40000);
    wait_until("pump to resume", || dev.recv_calls() == capacity + 2);

    let rest: Vec<u16> = (0..capacity + 1)
        .map(|_| udp_source_port(engine.read().unwrap().as_bytes()))
        .collect();
    let expected: Vec<u16> = (1..capacity as u16 + 2).map(|i| 40000 + i).collect();
    assert_eq!(rest, expected);

    engine.close().unwrap();
}

#[test]
fn test_write_reaches_device_with_exact_length() {
    let dev = MockDevice::new();
    let engine = started_engine(&dev);

    let datagram = PacketFactory::udp("10.0.0.1", "10.0.0.2", 53, 40000, b"answer");
    let mut buf = vec![0xee; 2048];
    buf[..datagram.len()].copy_from_slice(&datagram);
    engine
        .write(Packet::from_buffer(buf, datagram.len()).unwrap())
        .unwrap();

    assert_eq!(dev.next_sent(WAIT), Some(datagram));
    engine.close().unwrap();
}

#[test]
fn test_writes_preserve_submission_order() {
    let dev = MockDevice::new();
    let engine = started_engine(&dev);

    let packets = PacketFactory::sequence(30);
    for packet in &packets {
        engine.write(Packet::new(packet.clone())).unwrap();
    }
    for expected in packets {
        assert_eq!(dev.next_sent(WAIT), Some(expected));
    }
    engine.close().unwrap();
}

#[test]
fn test_echo_round_trip() {
    let dev = MockDevice::new();
    let engine = started_engine(&dev);

    let ping = PacketFactory::udp("10.0.0.2", "10.0.0.1", 5000, 7, b"ping");
    dev.inject_packet(ping.clone());

    let packet = engine.read().unwrap();
    engine.write(packet).unwrap();

    assert_eq!(dev.next_sent(WAIT), Some(ping));
    engine.close().unwrap();
}

#[test]
fn test_transient_read_errors_do_not_stop_pump() {
    let dev = MockDevice::new();
    let engine = started_engine(&dev);

    dev.inject_error(io::ErrorKind::Other);
    dev.inject_error(io::ErrorKind::Interrupted);
    dev.inject_error(io::ErrorKind::Other);
    let packet = PacketFactory::udp("10.0.0.2", "10.0.0.1", 1234, 80, b"after errors");
    dev.inject_packet(packet.clone());

    assert_eq!(engine.read().unwrap().as_bytes(), &packet[..]);
    engine.close().unwrap();
}

#[test]
fn test_failed_write_is_not_fatal() {
    let dev = MockDevice::new();
    dev.fail_next_sends(2);
    let engine = started_engine(&dev);

    for byte in [1u8, 2, 3] {
        engine.write(Packet::new(vec![byte; 40])).unwrap();
    }

    assert_eq!(dev.next_sent(WAIT), Some(vec![3u8; 40]));
    engine.close().unwrap();
}

#[test]
fn test_write_after_close_fails_fast() {
    let dev = MockDevice::new();
    let engine = started_engine(&dev);
    engine.close().unwrap();

    let started = Instant::now();
    let err = engine.write(Packet::new(vec![0x45; 20])).unwrap_err();
    assert!(matches!(err, Error::DeviceClosed));
    assert!(started.elapsed() < Duration::from_secs(1));

    thread::sleep(Duration::from_millis(20));
    assert_eq!(dev.sends_after_close(), 0);
    assert!(dev.next_sent(Duration::ZERO).is_none());
}

#[test]
fn test_close_unblocks_writer_waiting_on_full_queue() {
    let dev = MockDevice::new();
    let config = EngineConfig {
        queue_capacity: 2,
        ..EngineConfig::default()
    };
    // Not started: nothing drains the outgoing queue.
    let engine = Arc::new(engine_with(&dev, config));
    engine.write(Packet::new(vec![1])).unwrap();
    engine.write(Packet::new(vec![2])).unwrap();

    let blocked = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.write(Packet::new(vec![3])))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!blocked.is_finished());

    engine.close().unwrap();
    assert!(matches!(blocked.join().unwrap(), Err(Error::DeviceClosed)));
    assert_eq!(dev.sends_after_close(), 0);
}

#[test]
fn test_close_drains_then_reports_queue_closed() {
    let dev = MockDevice::new();
    let engine = started_engine(&dev);

    let sent = PacketFactory::sequence(3);
    for packet in &sent {
        dev.inject_packet(packet.clone());
    }
    wait_until("packets to be queued", || engine.pending_incoming() == 3);

    engine.close().unwrap();
    for expected in &sent {
        assert_eq!(engine.read().unwrap().as_bytes(), &expected[..]);
    }
    assert!(matches!(engine.read(), Err(Error::QueueClosed)));
    assert!(matches!(engine.read(), Err(Error::QueueClosed)));
}

#[test]
fn test_close_unblocks_pending_read() {
    let dev = MockDevice::new();
    let engine = Arc::new(started_engine(&dev));

    let reader = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.read())
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!reader.is_finished());

    engine.close().unwrap();
    assert!(matches!(reader.join().unwrap(), Err(Error::QueueClosed)));
}

#[test]
fn test_start_twice_fails() {
    let dev = MockDevice::new();
    let engine = started_engine(&dev);

    assert!(matches!(engine.start(), Err(Error::AlreadyStarted)));
    assert!(engine.is_started());
    engine.close().unwrap();
}

#[test]
fn test_start_after_close_fails() {
    let dev = MockDevice::new();
    let engine = engine_with(&dev, EngineConfig::default());
    engine.close().unwrap();

    assert!(matches!(engine.start(), Err(Error::DeviceClosed)));
    assert_eq!(dev.recv_calls(), 0);
}

#[test]
fn test_device_closed_exactly_once() {
    let dev = MockDevice::new();
    let engine = started_engine(&dev);

    engine.close().unwrap();
    engine.close().unwrap();
    assert!(engine.is_closed());
    drop(engine);

    assert_eq!(dev.close_calls(), 1);
}

#[test]
fn test_drop_closes_device() {
    let dev = MockDevice::new();
    drop(started_engine(&dev));
    assert_eq!(dev.close_calls(), 1);
}

#[test]
fn test_read_pump_stops_after_close() {
    let dev = MockDevice::new();
    let engine = started_engine(&dev);
    wait_until("pump to wait on the device", || dev.recv_calls() == 1);

    engine.close().unwrap();
    // The parked recv returns EBADF once the mock is closed; the pump must
    // then see the token instead of reading again.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(dev.recv_calls(), 1);
}

#[test]
fn test_invalid_config_builds_nothing() {
    let dev = MockDevice::new();
    let config = EngineConfig {
        queue_capacity: 0,
        ..EngineConfig::default()
    };
    let err = Engine::with_device(Box::new(dev.clone()), config).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert_eq!(dev.close_calls(), 0);
}

#[test]
fn test_long_interface_name_is_config_error() {
    // Rejected before /dev/net/tun is touched, with the same error the
    // kernel request would give.
    match Engine::open("a-name-over-fifteen") {
        Err(Error::Config { name, source }) => {
            assert_eq!(name, "a-name-over-fifteen");
            assert_eq!(source.kind(), io::ErrorKind::InvalidInput);
        }
        other => panic!("expected config error, got {other:?}"),
    }
}
