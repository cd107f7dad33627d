//! `urp-sender <sender_port> <receiver_port> <input_file> <max_win> <rto_ms> <flp> <rlp> <fcp> <rcp>`
//!
//! Binds a UDP socket on `127.0.0.1:<sender_port>`, runs the handshake and
//! data transfer to `127.0.0.1:<receiver_port>`, and writes `sender_log.txt`
//! in the current directory.

use std::net::UdpSocket;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use urp::eventlog::EventLog;
use urp::io_abstractions::BufferedFileSource;
use urp::plc::{Plc, PlcParams};
use urp::sender::{Sender, SenderConfig};
use urp::{Result, UrpError};

struct Args {
    sender_port: u16,
    receiver_port: u16,
    input_file: String,
    max_win: u16,
    rto: Duration,
    plc: PlcParams,
}

fn parse_args() -> Result<Args> {
    let argv: Vec<String> = std::env::args().collect();
    if argv.len() != 10 {
        return Err(UrpError::BadArgs(
            "urp-sender <sender_port> <receiver_port> <input_file> <max_win> <rto_ms> <flp> <rlp> <fcp> <rcp>"
                .to_string(),
        ));
    }

    let parse_u16 = |s: &str| s.parse::<u16>().map_err(|e| UrpError::BadArgs(e.to_string()));
    let parse_f64 = |s: &str| s.parse::<f64>().map_err(|e| UrpError::BadArgs(e.to_string()));

    Ok(Args {
        sender_port: parse_u16(&argv[1])?,
        receiver_port: parse_u16(&argv[2])?,
        input_file: argv[3].clone(),
        max_win: parse_u16(&argv[4])?,
        rto: Duration::from_millis(parse_u16(&argv[5])? as u64),
        plc: PlcParams {
            forward_loss: parse_f64(&argv[6])?,
            reverse_loss: parse_f64(&argv[7])?,
            forward_corruption: parse_f64(&argv[8])?,
            reverse_corruption: parse_f64(&argv[9])?,
        },
    })
}

fn run() -> Result<()> {
    env_logger::init();
    let args = parse_args()?;

    let socket = UdpSocket::bind(("127.0.0.1", args.sender_port))?;
    let peer = format!("127.0.0.1:{}", args.receiver_port)
        .parse()
        .expect("loopback socket address always parses");

    let event_log = Arc::new(Mutex::new(EventLog::create("sender_log.txt")?));
    let plc = Arc::new(Plc::new(Arc::new(socket), peer, args.plc, event_log.clone()));
    let source = BufferedFileSource::open(&args.input_file)?;

    let config = SenderConfig {
        max_win: args.max_win,
        rto: args.rto,
    };
    let sender = Sender::new(source, plc, config, event_log);
    let stats = sender.run()?;
    log::info!("transfer complete: {stats:?}");
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("urp-sender: {e}");
            ExitCode::FAILURE
        }
    }
}
