//! `urp-receiver <receiver_port> <sender_port> <output_file> <max_win>`
//!
//! Binds a UDP socket on `127.0.0.1:<receiver_port>`, accepts one connection
//! from `127.0.0.1:<sender_port>`, writes the received byte stream to
//! `output_file`, and writes `receiver_log.txt` in the current directory.

use std::net::UdpSocket;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use urp::eventlog::EventLog;
use urp::io_abstractions::BufferedFileSink;
use urp::plc::{Plc, PlcParams};
use urp::receiver::{Receiver, ReceiverConfig};
use urp::{Result, UrpError};

struct Args {
    receiver_port: u16,
    sender_port: u16,
    output_file: String,
    max_win: u16,
}

fn parse_args() -> Result<Args> {
    let argv: Vec<String> = std::env::args().collect();
    if argv.len() != 5 {
        return Err(UrpError::BadArgs(
            "urp-receiver <receiver_port> <sender_port> <output_file> <max_win>".to_string(),
        ));
    }

    let parse_u16 = |s: &str| s.parse::<u16>().map_err(|e| UrpError::BadArgs(e.to_string()));

    Ok(Args {
        receiver_port: parse_u16(&argv[1])?,
        sender_port: parse_u16(&argv[2])?,
        output_file: argv[3].clone(),
        max_win: parse_u16(&argv[4])?,
    })
}

fn run() -> Result<()> {
    env_logger::init();
    let args = parse_args()?;

    let socket = UdpSocket::bind(("127.0.0.1", args.receiver_port))?;
    let peer = format!("127.0.0.1:{}", args.sender_port)
        .parse()
        .expect("loopback socket address always parses");

    let event_log = Arc::new(Mutex::new(EventLog::create("receiver_log.txt")?));
    // PLC has no independent state to apply on the receive side beyond what
    // the sender's shim already rolled; both peers run their own instance so
    // each direction of loss/corruption is modeled exactly once.
    let plc = Arc::new(Plc::new(
        Arc::new(socket),
        peer,
        PlcParams {
            forward_loss: 0.0,
            reverse_loss: 0.0,
            forward_corruption: 0.0,
            reverse_corruption: 0.0,
        },
        event_log.clone(),
    ));
    let sink = BufferedFileSink::create(&args.output_file)?;

    let config = ReceiverConfig { max_win: args.max_win };
    let receiver = Arc::new(Receiver::new(sink, plc, config, event_log));
    let stats = receiver.run()?;
    log::info!("transfer complete: {stats:?}");
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("urp-receiver: {e}");
            ExitCode::FAILURE
        }
    }
}
