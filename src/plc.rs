//! The packet-loss-and-corruption shim: a thin wrapper around a
//! [`DatagramSocket`] plus four independent Bernoulli trials that models a
//! lossy, bit-flipping channel.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::eventlog::{Action, Dir, EventLog};
use crate::io_abstractions::DatagramSocket;
use crate::segment::{Segment, HEADER_LEN};

#[derive(Debug, Clone, Copy)]
pub struct PlcParams {
    pub forward_loss: f64,
    pub reverse_loss: f64,
    pub forward_corruption: f64,
    pub reverse_corruption: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlcStats {
    pub forward_dropped: u64,
    pub forward_corrupted: u64,
    pub reverse_dropped: u64,
    pub reverse_corrupted: u64,
}

struct Guarded {
    rng: StdRng,
    stats: PlcStats,
}

/// Wraps a [`DatagramSocket`] bound to exactly one peer address.
pub struct Plc<S: DatagramSocket> {
    socket: Arc<S>,
    peer: SocketAddr,
    params: PlcParams,
    log: Arc<Mutex<EventLog>>,
    guarded: Mutex<Guarded>,
}

impl<S: DatagramSocket> Plc<S> {
    pub fn new(socket: Arc<S>, peer: SocketAddr, params: PlcParams, log: Arc<Mutex<EventLog>>) -> Self {
        Plc {
            socket,
            peer,
            params,
            log,
            guarded: Mutex::new(Guarded {
                rng: StdRng::from_entropy(),
                stats: PlcStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> PlcStats {
        self.guarded.lock().unwrap().stats
    }

    pub fn set_read_timeout(&self, dur: Option<Duration>) -> std::io::Result<()> {
        self.socket.set_read_timeout(dur)
    }

    /// Forward-loss, then forward-corruption, then transmit. Holds the
    /// shim's lock for the whole call so that log lines from concurrent
    /// callers (main loop vs. retransmission timer) stay interleaved
    /// atomically, matching §4.3/§5.
    pub fn send(&self, seg: &Segment) -> std::io::Result<()> {
        let mut guarded = self.guarded.lock().unwrap();

        if flip(&mut guarded.rng, self.params.forward_loss) {
            guarded.stats.forward_dropped += 1;
            self.log.lock().unwrap().log(Dir::Snd, Action::Drp, seg.kind, seg.seq_num, seg.data.len());
            return Ok(());
        }

        let mut encoded = seg
            .encode()
            .expect("encoding a well-formed outgoing segment cannot fail");

        if flip(&mut guarded.rng, self.params.forward_corruption) && corrupt(&mut encoded, &mut guarded.rng) {
            guarded.stats.forward_corrupted += 1;
            self.log.lock().unwrap().log(Dir::Snd, Action::Cor, seg.kind, seg.seq_num, seg.data.len());
        } else {
            self.log.lock().unwrap().log(Dir::Snd, Action::Ok, seg.kind, seg.seq_num, seg.data.len());
        }

        self.socket.send_to(&encoded, self.peer)?;
        Ok(())
    }

    /// Receives one datagram addressed from the configured peer, applying
    /// reverse-loss and reverse-corruption. Loops past datagrams from an
    /// unexpected source and past reverse-dropped datagrams.
    ///
    /// Returns the raw bytes handed to the caller for decoding: the shim
    /// itself never decodes, since a corrupted datagram must still reach
    /// the caller's own decode-and-count logic. `Ok(None)` means the read
    /// timed out (used by the receiver's `time_wait` poll).
    pub fn recv(&self, buf: &mut [u8; 2048]) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            let (n, from) = match self.socket.recv_from(buf) {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    return Ok(None)
                }
                Err(e) => return Err(e),
            };

            if from != self.peer {
                log::warn!("received datagram from unexpected address {from}, expected {}", self.peer);
                continue;
            }

            let data = buf[..n].to_vec();

            debug_assert!(
                matches!(Segment::decode(&data), Ok((Some(_), true))),
                "loopback substrate delivered a segment that doesn't decode cleanly; \
                 corruption must only be introduced by this shim"
            );

            let mut guarded = self.guarded.lock().unwrap();

            if flip(&mut guarded.rng, self.params.reverse_loss) {
                guarded.stats.reverse_dropped += 1;
                log_decoded(&self.log, Dir::Rcv, Action::Drp, &data);
                continue;
            }

            if flip(&mut guarded.rng, self.params.reverse_corruption) {
                let mut corrupted = data.clone();
                if corrupt(&mut corrupted, &mut guarded.rng) {
                    guarded.stats.reverse_corrupted += 1;
                    log_decoded(&self.log, Dir::Rcv, Action::Cor, &corrupted);
                    return Ok(Some(corrupted));
                }
            }

            log_decoded(&self.log, Dir::Rcv, Action::Ok, &data);
            return Ok(Some(data));
        }
    }
}

fn log_decoded(log: &Arc<Mutex<EventLog>>, dir: Dir, action: Action, data: &[u8]) {
    match Segment::decode(data) {
        Ok((Some(seg), _)) => log.lock().unwrap().log(dir, action, seg.kind, seg.seq_num, seg.data.len()),
        _ => { /* header didn't parse even before this shim's own drop/corrupt path; nothing sane to log */ }
    }
}

fn flip(rng: &mut StdRng, probability: f64) -> bool {
    probability > 0.0 && rng.gen::<f64>() < probability
}

/// Flips one uniformly random bit within `data[HEADER_LEN..]`. Returns
/// `false` (no-op) for header-only segments — there is no payload region to
/// corrupt, and corrupting the header would defeat the "header always
/// parses" guarantee the corrupted-segment code path relies on.
fn corrupt(data: &mut [u8], rng: &mut StdRng) -> bool {
    if data.len() <= HEADER_LEN {
        return false;
    }
    let offset = rng.gen_range(HEADER_LEN..data.len());
    let bit = rng.gen_range(0..8u32);
    data[offset] ^= 1 << bit;
    true
}
