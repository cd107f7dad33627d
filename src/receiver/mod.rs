//! The receiver engine: state machine, reorder buffer, cumulative ACK
//! generation, and `TIME_WAIT` (§4.5).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, UrpError};
use crate::eventlog::EventLog;
use crate::io_abstractions::{ByteSink, DatagramSocket};
use crate::plc::Plc;
use crate::segment::{Kind, Segment};
use crate::seq;

/// Two maximum segment lifetimes, per §4.5's `TIME_WAIT` duration.
const MSL: Duration = Duration::from_millis(1000);
const TIME_WAIT_DURATION: Duration = Duration::from_millis(2 * MSL.as_millis() as u64);
/// Poll granularity while waiting out `TIME_WAIT`, matching the reference
/// implementation's non-blocking `select()` cadence.
const TIME_WAIT_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Listen,
    Est,
    TimeWait,
    Closed,
}

/// Invariant: every key in `reorder` lies strictly ahead of `rcv_nxt` within
/// the receive window, and no two buffered segments overlap (§4.5 edge
/// case: an overlapping arrival is dropped, not merged).
struct Scb {
    rcv_nxt: u16,
    state: State,
    reorder: BTreeMap<u16, Vec<u8>>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub original_bytes_recv: u64,
    pub original_segs_recv: u64,
    pub out_of_order_segs_recv: u64,
    pub duplicate_segs_recv: u64,
    pub corrupted_segs_discarded: u64,
    pub dup_acks_sent: u64,
}

pub struct ReceiverConfig {
    pub max_win: u16,
}

pub struct Receiver<S: DatagramSocket, Snk: ByteSink> {
    scb: Mutex<Scb>,
    stats: Mutex<Stats>,
    plc: Arc<Plc<S>>,
    sink: Mutex<Snk>,
    max_win: u16,
    event_log: Arc<Mutex<EventLog>>,
}

impl<S: DatagramSocket + 'static, Snk: ByteSink> Receiver<S, Snk> {
    pub fn new(sink: Snk, plc: Arc<Plc<S>>, config: ReceiverConfig, event_log: Arc<Mutex<EventLog>>) -> Self {
        Receiver {
            scb: Mutex::new(Scb {
                rcv_nxt: 0,
                state: State::Listen,
                reorder: BTreeMap::new(),
            }),
            stats: Mutex::new(Stats::default()),
            plc,
            sink: Mutex::new(sink),
            max_win: config.max_win,
            event_log,
        }
    }

    pub fn stats(&self) -> Stats {
        *self.stats.lock().unwrap()
    }

    /// Drives the connection end to end: waits for the SYN, accepts DATA
    /// segments until FIN, then rides out `TIME_WAIT` before returning.
    pub fn run(self: Arc<Self>) -> Result<Stats> {
        self.accept_syn()?;

        loop {
            let mut buf = [0u8; 2048];
            let Some(data) = self.plc.recv(&mut buf)? else {
                continue;
            };
            let (maybe_seg, intact) = Segment::decode(&data)?;

            let Some(seg) = maybe_seg else {
                self.stats.lock().unwrap().corrupted_segs_discarded += 1;
                continue;
            };
            if !intact {
                self.stats.lock().unwrap().corrupted_segs_discarded += 1;
                continue;
            }

            match seg.kind {
                Kind::Data => self.process_data_segment(seg)?,
                Kind::Fin => {
                    self.process_fin(seg)?;
                    break;
                }
                // A duplicate SYN means our original ACK was lost; re-ACK
                // it, the send is idempotent.
                Kind::Syn => {
                    let ack_for = self.scb.lock().unwrap().rcv_nxt;
                    self.send_ack(ack_for);
                }
                other => {
                    return Err(UrpError::fatal(format!(
                        "receiver received unexpected segment kind {other:?} in ESTABLISHED"
                    )))
                }
            }
        }

        self.time_wait()?;
        self.write_summary();
        Ok(self.stats())
    }

    fn write_summary(&self) {
        let stats = self.stats();
        let plc = self.plc.stats();
        let mut log = self.event_log.lock().unwrap();
        log.summary_line("Original data received", stats.original_bytes_recv);
        log.summary_line("Original segments received", stats.original_segs_recv);
        log.summary_line("Out of order segments received", stats.out_of_order_segs_recv);
        log.summary_line("Duplicate segments received", stats.duplicate_segs_recv);
        log.summary_line("Corrupted segments discarded", stats.corrupted_segs_discarded);
        log.summary_line("Duplicate acks sent", stats.dup_acks_sent);
        log.summary_line("PLC forward segments dropped", plc.forward_dropped);
        log.summary_line("PLC forward segments corrupted", plc.forward_corrupted);
        log.summary_line("PLC reverse segments dropped", plc.reverse_dropped);
        log.summary_line("PLC reverse segments corrupted", plc.reverse_corrupted);
    }

    /// Blocks until an intact SYN arrives; any corrupted or non-SYN arrival
    /// before that is discarded rather than treated as fatal, since a lost
    /// or corrupted SYN is the sender's retransmission timer's problem, not
    /// ours.
    fn accept_syn(&self) -> Result<()> {
        let mut buf = [0u8; 2048];
        loop {
            let Some(data) = self.plc.recv(&mut buf)? else {
                continue;
            };
            let (maybe_seg, intact) = Segment::decode(&data)?;
            let Some(seg) = maybe_seg else { continue };
            if !intact || seg.kind != Kind::Syn {
                continue;
            }

            let mut scb = self.scb.lock().unwrap();
            scb.rcv_nxt = seq::wrap_add(seg.seq_num, 1);
            scb.state = State::Est;
            drop(scb);

            self.plc.send(&Segment::ack(seq::wrap_add(seg.seq_num, 1)))?;
            return Ok(());
        }
    }

    /// §4.5's reorder-buffer logic: deliver what's contiguous from `rcv_nxt`
    /// forward, buffer what arrives early, drop what's already been
    /// delivered or exceeds the advertised window, and always answer with
    /// the current cumulative ACK once a segment is accepted.
    fn process_data_segment(&self, seg: Segment) -> Result<()> {
        if seg.data.is_empty() {
            log::warn!("dropping malformed zero-length DATA segment at {}", seg.seq_num);
            return Ok(());
        }

        let mut scb = self.scb.lock().unwrap();

        if seq::wrap_cmp(seg.seq_num, scb.rcv_nxt) == -1 {
            self.stats.lock().unwrap().duplicate_segs_recv += 1;
            let ack_for = scb.rcv_nxt;
            drop(scb);
            self.send_ack(ack_for);
            return Ok(());
        }

        let window_end = seq::wrap_add(scb.rcv_nxt, self.max_win);
        if seq::wrap_cmp(seg.end_seq_num(), window_end) == 1 {
            log::warn!("dropping segment {} exceeding advertised receive window", seg.seq_num);
            return Ok(());
        }

        if seg.seq_num != scb.rcv_nxt {
            // Walk the buffer in modular order relative to rcv_nxt: find
            // either an exact-start duplicate, or the first buffered
            // segment that starts strictly after `seg` (which `seg` must
            // not overlap into).
            let seg_dist = seq::wrap_sub(seg.seq_num, scb.rcv_nxt);
            let mut keys: Vec<u16> = scb.reorder.keys().copied().collect();
            keys.sort_by_key(|&k| seq::wrap_sub(k, scb.rcv_nxt));

            let mut duplicate = false;
            for key in keys {
                if key == seg.seq_num {
                    let existing_len = scb.reorder.get(&key).unwrap().len();
                    if existing_len != seg.data.len() {
                        return Err(UrpError::fatal(format!(
                            "duplicate out-of-order segment at {} has mismatched length ({} vs {})",
                            seg.seq_num,
                            existing_len,
                            seg.data.len()
                        )));
                    }
                    duplicate = true;
                    break;
                }
                let key_dist = seq::wrap_sub(key, scb.rcv_nxt);
                if key_dist > seg_dist {
                    if seq::wrap_cmp(seg.end_seq_num(), key) == 1 {
                        return Err(UrpError::fatal(format!(
                            "segment at {} (end {}) overlaps buffered segment at {}",
                            seg.seq_num,
                            seg.end_seq_num(),
                            key
                        )));
                    }
                    break;
                }
            }

            if duplicate {
                self.stats.lock().unwrap().duplicate_segs_recv += 1;
            } else {
                self.stats.lock().unwrap().out_of_order_segs_recv += 1;
                scb.reorder.insert(seg.seq_num, seg.data);
            }

            let ack_for = scb.rcv_nxt;
            self.stats.lock().unwrap().dup_acks_sent += 1;
            drop(scb);
            self.send_ack(ack_for);
            return Ok(());
        }

        let mut delivered_bytes = 0u64;
        let mut delivered_segs = 0u64;

        scb.rcv_nxt = seq::wrap_add(scb.rcv_nxt, seg.data.len() as u16);
        delivered_bytes += seg.data.len() as u64;
        delivered_segs += 1;
        self.sink.lock().unwrap().write(&seg.data)?;

        while let Some(data) = scb.reorder.remove(&scb.rcv_nxt) {
            scb.rcv_nxt = seq::wrap_add(scb.rcv_nxt, data.len() as u16);
            delivered_bytes += data.len() as u64;
            delivered_segs += 1;
            self.sink.lock().unwrap().write(&data)?;
        }

        let ack_for = scb.rcv_nxt;
        drop(scb);

        {
            let mut stats = self.stats.lock().unwrap();
            stats.original_bytes_recv += delivered_bytes;
            stats.original_segs_recv += delivered_segs;
        }

        self.send_ack(ack_for);
        Ok(())
    }

    /// A FIN is only meaningful exactly at `rcv_nxt`: §4.5 treats any other
    /// FIN sequence number as a protocol violation rather than something to
    /// silently drop, since a well-behaved sender never sends FIN until
    /// every byte up to it has been cumulatively acknowledged.
    fn process_fin(&self, seg: Segment) -> Result<()> {
        let mut scb = self.scb.lock().unwrap();
        if seg.seq_num != scb.rcv_nxt {
            return Err(UrpError::fatal(format!(
                "FIN sequence number {} does not match expected {}",
                seg.seq_num, scb.rcv_nxt
            )));
        }
        scb.rcv_nxt = seq::wrap_add(scb.rcv_nxt, 1);
        scb.state = State::TimeWait;
        let ack_for = scb.rcv_nxt;
        drop(scb);
        self.send_ack(ack_for);
        Ok(())
    }

    fn send_ack(&self, ack_num: u16) {
        let _ = self.plc.send(&Segment::ack(ack_num));
    }

    /// Rides out `2*MSL`, re-acknowledging any retransmitted FIN that
    /// arrives in the meantime (the sender's own FIN ACK was itself lost),
    /// then transitions to `Closed`. Uses a short read timeout so the poll
    /// loop can also check the deadline, rather than blocking indefinitely
    /// on one read.
    fn time_wait(&self) -> Result<()> {
        self.plc.set_read_timeout(Some(TIME_WAIT_POLL))?;
        let deadline = Timeout::start(TIME_WAIT_DURATION);

        while !deadline.elapsed() {
            let mut buf = [0u8; 2048];
            match self.plc.recv(&mut buf)? {
                None => continue,
                Some(data) => {
                    if let Ok((Some(seg), true)) = Segment::decode(&data) {
                        if seg.kind == Kind::Fin {
                            let ack_for = self.scb.lock().unwrap().rcv_nxt;
                            self.send_ack(ack_for);
                        }
                    }
                }
            }
        }

        self.scb.lock().unwrap().state = State::Closed;
        Ok(())
    }
}

/// A simple deadline helper so `time_wait` doesn't depend on the
/// cancellable [`RtoTimer`] machinery it has no use for: nothing needs to
/// interrupt this wait early, only poll it.
struct Timeout {
    started: std::time::Instant,
    duration: Duration,
}

impl Timeout {
    fn start(duration: Duration) -> Self {
        Timeout {
            started: std::time::Instant::now(),
            duration,
        }
    }

    fn elapsed(&self) -> bool {
        self.started.elapsed() >= self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scb_reorder_buffer_drains_in_order() {
        let mut reorder = BTreeMap::new();
        reorder.insert(10u16, vec![1, 2, 3]);
        reorder.insert(13u16, vec![4, 5]);

        let mut rcv_nxt = 10u16;
        let mut delivered = Vec::new();
        while let Some(data) = reorder.remove(&rcv_nxt) {
            rcv_nxt = seq::wrap_add(rcv_nxt, data.len() as u16);
            delivered.extend(data);
        }
        assert_eq!(delivered, vec![1, 2, 3, 4, 5]);
        assert_eq!(rcv_nxt, 15);
    }
}
