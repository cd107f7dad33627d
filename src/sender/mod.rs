//! The sender engine: state machine, retransmission queue, window pump, ACK
//! handler, and retransmission timer (§4.4).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;

use crate::error::{Result, UrpError};
use crate::eventlog::EventLog;
use crate::io_abstractions::{ByteSource, DatagramSocket};
use crate::plc::Plc;
use crate::segment::{Kind, Segment};
use crate::seq;
use crate::timer::RtoTimer;

/// Maximum segment size, fixed per §6.
pub const MSS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    SynSent,
    Est,
    Closing,
    FinWait,
}

#[derive(Debug, Clone)]
struct QueuedSegment {
    seq_num: u16,
    data: Vec<u8>,
}

impl QueuedSegment {
    fn end_seq_num(&self) -> u16 {
        seq::wrap_add(self.seq_num, self.data.len() as u16)
    }

    fn to_segment(&self) -> Segment {
        Segment::data(self.seq_num, self.data.clone())
    }
}

/// Invariant A (§3): concatenating `unacked_queue`'s payloads is exactly the
/// byte range `[snd_base, next_seqnum)`. Invariant B: every queued segment
/// has nonzero payload length.
struct Scb {
    snd_base: u16,
    next_seqnum: u16,
    dup_acks: u32,
    state: State,
    unacked_queue: VecDeque<QueuedSegment>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub original_bytes_sent: u64,
    pub total_bytes_sent: u64,
    pub original_segs_sent: u64,
    pub total_segs_sent: u64,
    pub timeouts: u64,
    pub fast_retransmissions: u64,
    pub dup_acks_received: u64,
    pub corrupted_acks_discarded: u64,
}

pub struct SenderConfig {
    pub max_win: u16,
    pub rto: Duration,
}

pub struct Sender<S: DatagramSocket, Src: ByteSource> {
    scb: Arc<Mutex<Scb>>,
    stats: Arc<Mutex<Stats>>,
    plc: Arc<Plc<S>>,
    rt_timer: Arc<RtoTimer>,
    source: Src,
    max_win: u16,
    rto: Duration,
    event_log: Arc<Mutex<EventLog>>,
}

impl<S: DatagramSocket + 'static, Src: ByteSource> Sender<S, Src> {
    pub fn new(source: Src, plc: Arc<Plc<S>>, config: SenderConfig, event_log: Arc<Mutex<EventLog>>) -> Self {
        let isn: u16 = rand::thread_rng().gen_range(0..=u16::MAX);
        Sender {
            scb: Arc::new(Mutex::new(Scb {
                snd_base: isn,
                next_seqnum: isn,
                dup_acks: 0,
                state: State::Closed,
                unacked_queue: VecDeque::new(),
            })),
            stats: Arc::new(Mutex::new(Stats::default())),
            plc,
            rt_timer: RtoTimer::new(),
            source,
            max_win: config.max_win,
            rto: config.rto,
            event_log,
        }
    }

    pub fn stats(&self) -> Stats {
        *self.stats.lock().unwrap()
    }

    /// Drives the connection end to end: SYN exchange, data transfer until
    /// the source is exhausted and every byte is acknowledged, then the FIN
    /// exchange. Writes the trailing summary block to the event log before
    /// returning.
    pub fn run(mut self) -> Result<Stats> {
        self.scb.lock().unwrap().state = State::SynSent;
        let isn = self.scb.lock().unwrap().snd_base;
        self.stop_wait_exchange(Segment::syn(isn))?;
        self.scb.lock().unwrap().state = State::Est;

        loop {
            let state = self.scb.lock().unwrap().state;
            if state == State::FinWait {
                break;
            }
            if state == State::Est {
                self.transmit_window()?;
            }
            let ack = self.recv_ack()?;
            self.handle_ack(ack.seq_num)?;
        }

        let fin_seq = self.scb.lock().unwrap().snd_base;
        self.stop_wait_exchange(Segment::fin(fin_seq))?;
        self.scb.lock().unwrap().state = State::Closed;

        self.write_summary();
        Ok(self.stats())
    }

    fn write_summary(&self) {
        let stats = self.stats();
        let plc = self.plc.stats();
        let mut log = self.event_log.lock().unwrap();
        log.summary_line("Original data sent", stats.original_bytes_sent);
        log.summary_line("Total data sent", stats.total_bytes_sent);
        log.summary_line("Original segments sent", stats.original_segs_sent);
        log.summary_line("Total segments sent", stats.total_segs_sent);
        log.summary_line("Timeout retransmissions", stats.timeouts);
        log.summary_line("Fast retransmissions", stats.fast_retransmissions);
        log.summary_line("Duplicate acks received", stats.dup_acks_received);
        log.summary_line("Corrupted acks discarded", stats.corrupted_acks_discarded);
        log.summary_line("PLC forward segments dropped", plc.forward_dropped);
        log.summary_line("PLC forward segments corrupted", plc.forward_corrupted);
        log.summary_line("PLC reverse segments dropped", plc.reverse_dropped);
        log.summary_line("PLC reverse segments corrupted", plc.reverse_corrupted);
    }

    /// Used for the zero-payload SYN and FIN exchanges: send, arm a timer
    /// that resends on every firing, block until the matching ACK arrives
    /// (ignoring anything else), then advance `snd_base`/`next_seqnum` by one.
    fn stop_wait_exchange(&mut self, seg: Segment) -> Result<()> {
        self.plc.send(&seg)?;
        self.count_original_send(&seg);
        arm_stop_wait_timer(self.rt_timer.clone(), self.plc.clone(), self.stats.clone(), self.rto, seg.clone());

        let expected = seq::wrap_add(seg.seq_num, 1);
        loop {
            let ack = self.recv_ack()?;
            if ack.seq_num == expected {
                break;
            }
            log::debug!("ignoring ack {} while awaiting {expected}", ack.seq_num);
        }
        self.rt_timer.cancel();

        let mut scb = self.scb.lock().unwrap();
        debug_assert_eq!(scb.snd_base, seg.seq_num);
        debug_assert_eq!(scb.next_seqnum, seg.seq_num);
        scb.snd_base = seq::wrap_add(scb.snd_base, 1);
        scb.next_seqnum = seq::wrap_add(scb.next_seqnum, 1);
        Ok(())
    }

    /// Pulls bytes from the source and transmits DATA segments while the
    /// window has room, per §4.4: each read is capped at
    /// `min(mss, remaining_window_bytes)` so a segment never exceeds the
    /// window the receiver is advertising.
    fn transmit_window(&mut self) -> Result<()> {
        loop {
            let (next, base, state) = {
                let scb = self.scb.lock().unwrap();
                (scb.next_seqnum, scb.snd_base, scb.state)
            };
            if state != State::Est {
                return Ok(());
            }
            if seq::wrap_cmp(next, seq::wrap_add(base, self.max_win)) != -1 {
                return Ok(());
            }

            let window_bytes_remaining = seq::wrap_sub(seq::wrap_add(base, self.max_win), next);
            let nbytes = std::cmp::min(MSS as u16, window_bytes_remaining) as usize;

            let mut chunk = vec![0u8; nbytes];
            let n = self.source.read(&mut chunk)?;

            if n == 0 {
                self.scb.lock().unwrap().state = State::Closing;
                return Ok(());
            }
            chunk.truncate(n);

            let seg;
            let was_empty;
            {
                let mut scb = self.scb.lock().unwrap();
                seg = Segment::data(scb.next_seqnum, chunk);
                scb.next_seqnum = seq::wrap_add(scb.next_seqnum, n as u16);
                was_empty = scb.unacked_queue.is_empty();
                scb.unacked_queue.push_back(QueuedSegment {
                    seq_num: seg.seq_num,
                    data: seg.data.clone(),
                });
            }

            {
                let mut stats = self.stats.lock().unwrap();
                stats.original_bytes_sent += n as u64;
                stats.total_bytes_sent += n as u64;
                stats.original_segs_sent += 1;
                stats.total_segs_sent += 1;
            }

            if was_empty {
                arm_retransmit_timer(self.rt_timer.clone(), self.scb.clone(), self.plc.clone(), self.stats.clone(), self.rto);
            }

            self.plc.send(&seg)?;
        }
    }

    /// Receives one segment and demands it be an intact ACK; corrupted or
    /// header-invalid arrivals are counted and skipped, any non-ACK segment
    /// is a protocol violation (§7).
    fn recv_ack(&mut self) -> Result<Segment> {
        let mut buf = [0u8; 2048];
        loop {
            let Some(data) = self.plc.recv(&mut buf)? else {
                continue;
            };
            let (maybe_seg, intact) = Segment::decode(&data)?;
            let Some(seg) = maybe_seg else {
                self.stats.lock().unwrap().corrupted_acks_discarded += 1;
                continue;
            };
            if !intact {
                self.stats.lock().unwrap().corrupted_acks_discarded += 1;
                continue;
            }
            if seg.kind != Kind::Ack {
                return Err(UrpError::fatal(format!(
                    "sender received non-ACK segment of kind {:?}",
                    seg.kind
                )));
            }
            return Ok(seg);
        }
    }

    /// §4.4 ACK handling.
    fn handle_ack(&mut self, a: u16) -> Result<()> {
        let mut scb = self.scb.lock().unwrap();

        if seq::wrap_cmp(a, scb.snd_base) == -1 || seq::wrap_cmp(a, scb.next_seqnum) == 1 {
            log::warn!("ack {a} outside window [{}, {}]", scb.snd_base, scb.next_seqnum);
            return Ok(());
        }

        if a == scb.snd_base {
            scb.dup_acks += 1;
            self.stats.lock().unwrap().dup_acks_received += 1;
            if scb.dup_acks == 3 {
                scb.dup_acks = 0;
                drop(scb);
                self.trigger_fast_retransmit();
            }
            return Ok(());
        }

        while let Some(front) = scb.unacked_queue.front() {
            if seq::wrap_cmp(front.end_seq_num(), a) <= 0 {
                scb.unacked_queue.pop_front();
            } else {
                break;
            }
        }
        scb.snd_base = a;
        scb.dup_acks = 0;

        if scb.snd_base == scb.next_seqnum {
            debug_assert!(scb.unacked_queue.is_empty(), "sender queue invariant violated");
            self.rt_timer.cancel();
            if scb.state == State::Closing {
                scb.state = State::FinWait;
            }
        } else {
            debug_assert!(!scb.unacked_queue.is_empty(), "sender queue invariant violated");
            if let Some(front) = scb.unacked_queue.front_mut() {
                let trim_len = seq::wrap_sub(a, front.seq_num);
                if trim_len != 0 {
                    front.data.drain(0..trim_len as usize);
                    front.seq_num = a;
                }
            }
            drop(scb);
            arm_retransmit_timer(self.rt_timer.clone(), self.scb.clone(), self.plc.clone(), self.stats.clone(), self.rto);
        }

        Ok(())
    }

    fn trigger_fast_retransmit(&self) {
        self.stats.lock().unwrap().fast_retransmissions += 1;
        retransmit_head(&self.scb, &self.plc, &self.stats);
        arm_retransmit_timer(self.rt_timer.clone(), self.scb.clone(), self.plc.clone(), self.stats.clone(), self.rto);
    }

    fn count_original_send(&self, seg: &Segment) {
        let mut stats = self.stats.lock().unwrap();
        stats.original_bytes_sent += seg.data.len() as u64;
        stats.total_bytes_sent += seg.data.len() as u64;
        stats.original_segs_sent += 1;
        stats.total_segs_sent += 1;
    }
}

/// Resends `unacked_queue`'s head segment, if any, counting it towards the
/// total (not original) send counters. Returns whether there was a segment
/// to resend.
fn retransmit_head<S: DatagramSocket>(scb: &Arc<Mutex<Scb>>, plc: &Plc<S>, stats: &Arc<Mutex<Stats>>) -> bool {
    let head = {
        let scb = scb.lock().unwrap();
        scb.unacked_queue.front().map(QueuedSegment::to_segment)
    };
    let Some(seg) = head else {
        return false;
    };
    let _ = plc.send(&seg);
    let mut stats = stats.lock().unwrap();
    stats.total_bytes_sent += seg.data.len() as u64;
    stats.total_segs_sent += 1;
    true
}

/// Arms the data retransmission timer. On firing: reset `dup_acks`, resend
/// the unacked queue's head if one is still there, and re-arm — except when
/// the queue emptied out from under us (an ACK raced the timer), in which
/// case both the retransmission and the re-arm are skipped, matching §5's
/// acknowledged race.
fn arm_retransmit_timer<S: DatagramSocket + 'static>(
    timer: Arc<RtoTimer>,
    scb: Arc<Mutex<Scb>>,
    plc: Arc<Plc<S>>,
    stats: Arc<Mutex<Stats>>,
    rto: Duration,
) {
    let (timer2, scb2, plc2, stats2) = (timer.clone(), scb.clone(), plc.clone(), stats.clone());
    timer.arm(rto, move || {
        stats2.lock().unwrap().timeouts += 1;
        scb2.lock().unwrap().dup_acks = 0;
        if retransmit_head(&scb2, &plc2, &stats2) {
            arm_retransmit_timer(timer2, scb2, plc2, stats2, rto);
        }
    });
}

/// Arms the stop-and-wait timer used for the SYN/FIN exchanges. Unlike the
/// data retransmission timer there is no queue to race against: the
/// exchange always resends the same control segment until the matching ACK
/// arrives and cancels it.
fn arm_stop_wait_timer<S: DatagramSocket + 'static>(
    timer: Arc<RtoTimer>,
    plc: Arc<Plc<S>>,
    stats: Arc<Mutex<Stats>>,
    rto: Duration,
    seg: Segment,
) {
    let (timer2, plc2, stats2, seg2) = (timer.clone(), plc.clone(), stats.clone(), seg.clone());
    timer.arm(rto, move || {
        stats2.lock().unwrap().timeouts += 1;
        let _ = plc2.send(&seg2);
        {
            let mut stats = stats2.lock().unwrap();
            stats.total_bytes_sent += seg2.data.len() as u64;
            stats.total_segs_sent += 1;
        }
        arm_stop_wait_timer(timer2, plc2, stats2, rto, seg2);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_segment_end_seq_num_wraps() {
        let seg = QueuedSegment {
            seq_num: 65534,
            data: vec![0u8; 4],
        };
        assert_eq!(seg.end_seq_num(), 2);
    }
}
