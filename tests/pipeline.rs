//! End-to-end tests over loopback UDP
//!
//! Datagrams go through a real socket into the ingestion thread, then the
//! playout loop drains the jitter buffer into an in-memory sink.

use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

use lan_pcm_streamer::{
    audio::{
        buffer::{create_shared_buffer, JitterThresholds, SharedJitterBuffer},
        playout::{BlockSource, MemorySink, PlayoutLoop, PlayoutState},
        volume::{SharedVolume, Volume},
    },
    config::NetworkConfig,
    network::{
        udp::connect_socket, AudioReceiver, AudioSender, ControlEmitter, ControlListener,
    },
    protocol::{encode_legacy, encode_sequenced, samples_to_payload, AudioFormat},
};

fn format() -> AudioFormat {
    // 4 stereo frames: 8 samples, 16 byte payload
    AudioFormat::new(48000, 2, 4)
}

fn thresholds() -> JitterThresholds {
    JitterThresholds {
        prebuffer_min: 3,
        low_watermark: 1,
        target: 2,
        high_watermark: 8,
        capacity: 16,
    }
}

fn loopback_config() -> NetworkConfig {
    NetworkConfig {
        bind_address: "127.0.0.1".to_string(),
        listen_port: 0,
        read_timeout_ms: 20,
        ..NetworkConfig::default()
    }
}

fn start_receiver() -> (AudioReceiver, SharedJitterBuffer, UdpSocket) {
    let buffer = create_shared_buffer(thresholds(), format().payload_size()).unwrap();
    let mut receiver = AudioReceiver::new();
    let addr = receiver
        .start(&loopback_config(), buffer.clone(), 50)
        .unwrap();
    let socket = connect_socket(addr).unwrap();
    (receiver, buffer, socket)
}

fn block(value: i16) -> Vec<u8> {
    samples_to_payload(&[value; 8]).to_vec()
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_out_of_order_stream_plays_in_order() {
    let (receiver, buffer, socket) = start_receiver();

    for seq in [2u32, 0, 1, 4, 3] {
        socket
            .send(&encode_sequenced(seq, &block(seq as i16 * 100)))
            .unwrap();
    }
    wait_for(|| buffer.occupancy() == 5);

    let mut playout = PlayoutLoop::new(buffer.clone(), Volume::new(0.5).unwrap(), 8);
    assert!(playout.prebuffer_timeout(Duration::from_secs(1)));
    assert_eq!(playout.state(), PlayoutState::Steady);

    let mut sink = MemorySink::default();
    for _ in 0..5 {
        let report = playout.step(&mut sink).unwrap();
        assert_eq!(report.source, BlockSource::Packet);
    }
    let report = playout.step(&mut sink).unwrap();
    assert!(report.source.is_silence());

    let firsts: Vec<i16> = sink.blocks.iter().map(|b| b[0]).collect();
    assert_eq!(firsts, vec![0, 50, 100, 150, 200, 0]);
    assert!(sink.blocks.iter().all(|b| b.len() == 8));

    let stats = receiver.stats();
    assert_eq!(stats.packets_received, 5);
    assert_eq!(stats.invalid_packets, 0);
}

#[test]
fn test_legacy_and_malformed_datagrams() {
    let (receiver, buffer, socket) = start_receiver();

    socket.send(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
    socket.send(&encode_legacy(&block(42))).unwrap();
    wait_for(|| buffer.occupancy() == 1);

    let stats = receiver.stats();
    assert_eq!(stats.invalid_packets, 1);
    assert_eq!(stats.legacy_packets, 1);
    assert_eq!(buffer.dequeue().unwrap(), block(42));
}

#[test]
fn test_duplicates_are_delivered_once() {
    let (receiver, buffer, socket) = start_receiver();

    for seq in [0u32, 0, 1, 1, 2] {
        socket.send(&encode_sequenced(seq, &block(seq as i16))).unwrap();
    }
    wait_for(|| buffer.occupancy() == 3 && receiver.stats().stale_purged == 2);

    let stats = receiver.stats();
    assert_eq!(stats.packets_received, 5);
    assert_eq!(stats.invalid_packets, 0);
}

#[test]
fn test_sender_to_receiver() {
    let (receiver, buffer, _socket) = start_receiver();
    let sender = AudioSender::connect(receiver.local_addr().unwrap(), false).unwrap();

    for value in 1..=3i16 {
        sender.send_block(&[value; 8]).unwrap();
    }
    wait_for(|| buffer.occupancy() == 3);

    assert_eq!(sender.stats().packets_sent, 3);
    assert_eq!(receiver.stats().bytes_received, 3 * 20);
}

#[test]
fn test_starved_playout_emits_silence() {
    let buffer = create_shared_buffer(thresholds(), format().payload_size()).unwrap();
    for value in [7i16, 8, 9] {
        buffer.enqueue(block(value).into());
    }

    let mut playout = PlayoutLoop::new(buffer.clone(), Volume::FULL, 8);
    playout.prebuffer();

    let mut sink = MemorySink::default();
    for _ in 0..6 {
        playout.step(&mut sink).unwrap();
    }

    let firsts: Vec<i16> = sink.blocks.iter().map(|b| b[0]).collect();
    assert_eq!(firsts, vec![7, 8, 9, 0, 0, 0]);
    // Still steady: starvation never returns to prebuffering
    assert_eq!(playout.state(), PlayoutState::Steady);
    assert_eq!(buffer.stats().silence_inserted, 3);
}

#[test]
fn test_control_round_trip() {
    let volume = SharedVolume::default();
    let mut listener = ControlListener::new(volume.clone());
    let addr = listener.start("127.0.0.1:0".parse().unwrap()).unwrap();

    let emitter = ControlEmitter::connect(addr).unwrap();
    emitter.send_volume(Volume::new(0.75).unwrap()).unwrap();

    wait_for(|| volume.load().get() == 0.75);
    listener.stop();
}
