//! End-to-end transfers over real loopback UDP sockets, exercising a small
//! transfer, a multi-segment window-pump transfer, and an empty input.

use std::fs;
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::Rng;
use urp::eventlog::EventLog;
use urp::io_abstractions::{BufferedFileSink, BufferedFileSource};
use urp::plc::{Plc, PlcParams};
use urp::receiver::{Receiver, ReceiverConfig};
use urp::sender::{Sender, SenderConfig};

fn scratch_path(label: &str) -> std::path::PathBuf {
    let tag: u32 = rand::thread_rng().gen();
    std::env::temp_dir().join(format!("urp_test_{label}_{tag}"))
}

fn no_loss() -> PlcParams {
    PlcParams {
        forward_loss: 0.0,
        reverse_loss: 0.0,
        forward_corruption: 0.0,
        reverse_corruption: 0.0,
    }
}

/// Runs a full sender/receiver transfer over two bound loopback sockets and
/// returns the bytes the receiver wrote out.
fn transfer(input: &[u8], max_win: u16, plc_params: PlcParams) -> Vec<u8> {
    let sender_sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    let receiver_sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    let sender_addr = sender_sock.local_addr().unwrap();
    let receiver_addr = receiver_sock.local_addr().unwrap();

    let input_path = scratch_path("in");
    let output_path = scratch_path("out");
    fs::write(&input_path, input).unwrap();

    let sender_log = Arc::new(Mutex::new(EventLog::create(scratch_path("sender_log")).unwrap()));
    let receiver_log = Arc::new(Mutex::new(EventLog::create(scratch_path("receiver_log")).unwrap()));

    let sender_plc = Arc::new(Plc::new(Arc::new(sender_sock), receiver_addr, plc_params, sender_log.clone()));
    let receiver_plc = Arc::new(Plc::new(Arc::new(receiver_sock), sender_addr, no_loss(), receiver_log.clone()));

    let source = BufferedFileSource::open(&input_path).unwrap();
    let sink = BufferedFileSink::create(&output_path).unwrap();

    let sender = Sender::new(
        source,
        sender_plc,
        SenderConfig {
            max_win,
            rto: Duration::from_millis(200),
        },
        sender_log,
    );
    let receiver = Arc::new(Receiver::new(
        sink,
        receiver_plc,
        ReceiverConfig { max_win },
        receiver_log,
    ));

    let receiver_handle = thread::spawn(move || receiver.run().unwrap());
    let sender_stats = sender.run().unwrap();
    let receiver_stats = receiver_handle.join().unwrap();

    assert_eq!(sender_stats.original_bytes_sent as usize, input.len());
    assert_eq!(receiver_stats.original_bytes_recv as usize, input.len());

    let output = fs::read(&output_path).unwrap();
    let _ = fs::remove_file(&input_path);
    let _ = fs::remove_file(&output_path);
    output
}

#[test]
fn small_transfer_with_no_loss() {
    let input = b"the quick brown fox jumps over the lazy dog";
    let output = transfer(input, 64, no_loss());
    assert_eq!(output, input);
}

#[test]
fn window_pump_transfer_spans_many_segments() {
    let input: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let output = transfer(&input, 4000, no_loss());
    assert_eq!(output, input);
}

#[test]
fn empty_input_still_completes_the_handshake() {
    let output = transfer(b"", 64, no_loss());
    assert!(output.is_empty());
}

#[test]
fn transfer_survives_moderate_loss_and_corruption() {
    let input: Vec<u8> = (0..5000u32).map(|i| (i % 199) as u8).collect();
    let lossy = PlcParams {
        forward_loss: 0.05,
        reverse_loss: 0.05,
        forward_corruption: 0.05,
        reverse_corruption: 0.05,
    };
    let output = transfer(&input, 4000, lossy);
    assert_eq!(output, input);
}
