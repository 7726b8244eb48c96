//! Worker topology: rank identity, virtual-rank remapping, and the
//! collective/point-to-point primitives of spec §4.1.
//!
//! Every "worker" is a cooperating OS thread inside this process rather
//! than a separate MPI rank; `crossbeam`'s channels stand in for the
//! underlying transport. This keeps the message-passing discipline the
//! spec requires (no shared pointer ever crosses a worker boundary, every
//! transfer is an explicit send/receive) while staying inside a single
//! binary, matching the teacher's preference for `crossbeam` plus
//! in-process parallelism over a hard external dependency on a native MPI
//! installation.

use std::cell::RefCell;
use std::sync::{Arc, Barrier};

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::error::{CoreError, CoreResult};
use super::message::{tags, Message};

struct Envelope {
    from: usize, // real rank
    msg: Message,
}

/// A worker's view of the process group. Owns its inbound channel
/// exclusively; outbound channels to every peer are shared (`Arc`).
pub struct Topology {
    rank_count: usize,
    real_rank: usize,
    my_rank: usize, // virtual rank; 0 is always the master
    v2r: Arc<Vec<usize>>,
    r2v: Arc<Vec<usize>>,
    senders: Arc<Vec<Sender<Envelope>>>,
    receiver: Receiver<Envelope>,
    pending: RefCell<Vec<Envelope>>,
    barrier: Arc<Barrier>,
    processor_name: String,
}

impl Topology {
    /// Build one `Topology` handle per real rank, establishing the
    /// virtual-rank permutation so that virtual rank 0 always refers to
    /// `master_real_rank` regardless of where the underlying transport
    /// actually placed it (spec §4.1, §9 design note on rank remapping).
    pub fn init(rank_count: usize, master_real_rank: usize) -> CoreResult<Vec<Topology>> {
        if rank_count == 0 {
            return Err(CoreError::TopologyInit("rank_count must be >= 1".into()));
        }
        if master_real_rank >= rank_count {
            return Err(CoreError::TopologyInit(format!(
                "master_real_rank {master_real_rank} out of range for {rank_count} ranks"
            )));
        }
        tracing::info!(rank_count, master_real_rank, "initializing worker topology");

        let mut senders = Vec::with_capacity(rank_count);
        let mut receivers: Vec<Option<Receiver<Envelope>>> = Vec::with_capacity(rank_count);
        for _ in 0..rank_count {
            let (tx, rx) = unbounded();
            senders.push(tx);
            receivers.push(Some(rx));
        }
        let senders = Arc::new(senders);

        let mut v2r = vec![0usize; rank_count];
        v2r[0] = master_real_rank;
        let mut v = 1;
        for r in 0..rank_count {
            if r == master_real_rank {
                continue;
            }
            v2r[v] = r;
            v += 1;
        }
        let mut r2v = vec![0usize; rank_count];
        for (vr, &rr) in v2r.iter().enumerate() {
            r2v[rr] = vr;
        }
        let v2r = Arc::new(v2r);
        let r2v = Arc::new(r2v);
        let barrier = Arc::new(Barrier::new(rank_count));

        let mut out = Vec::with_capacity(rank_count);
        for real_rank in 0..rank_count {
            let receiver = receivers[real_rank].take().expect("each slot taken once");
            out.push(Topology {
                rank_count,
                real_rank,
                my_rank: r2v[real_rank],
                v2r: v2r.clone(),
                r2v: r2v.clone(),
                senders: senders.clone(),
                receiver,
                pending: RefCell::new(Vec::new()),
                barrier: barrier.clone(),
                processor_name: format!("worker-{real_rank}"),
            });
        }
        Ok(out)
    }

    pub fn rank_count(&self) -> usize {
        self.rank_count
    }

    pub fn my_rank(&self) -> usize {
        self.my_rank
    }

    pub fn is_master(&self) -> bool {
        self.my_rank == 0
    }

    pub fn processor_name(&self) -> &str {
        &self.processor_name
    }

    // ---- point to point -------------------------------------------------

    pub fn send(&self, to_virtual: usize, msg: Message) -> CoreResult<()> {
        let real_to = self.v2r[to_virtual];
        self.senders[real_to]
            .send(Envelope { from: self.real_rank, msg })
            .map_err(|e| CoreError::Resource(format!("send to rank {to_virtual}: {e}")))
    }

    /// Block until a message tagged `tag` arrives from `from_virtual`.
    /// Messages from other peers or with other tags are buffered for a
    /// later matching call, so out-of-order arrival (e.g. the top ghost
    /// slab racing the bottom one) never deadlocks a receiver waiting on a
    /// specific tag.
    pub fn receive_expect(&self, from_virtual: usize, tag: i32) -> CoreResult<Message> {
        let real_from = self.v2r[from_virtual];

        {
            let mut pending = self.pending.borrow_mut();
            if let Some(pos) = pending.iter().position(|e| e.from == real_from && e.msg.tag == tag) {
                return Ok(pending.remove(pos).msg);
            }
        }

        loop {
            let envelope = self
                .receiver
                .recv()
                .map_err(|e| CoreError::Resource(format!("receive from rank {from_virtual}: {e}")))?;
            if envelope.from == real_from && envelope.msg.tag == tag {
                return Ok(envelope.msg);
            }
            self.pending.borrow_mut().push(envelope);
        }
    }

    // ---- collectives ------------------------------------------------------

    pub fn barrier(&self) {
        self.barrier.wait();
    }

    pub fn broadcast_f64(&self, value: Option<f64>, root: usize) -> CoreResult<f64> {
        if self.my_rank == root {
            let v = value.expect("root must supply a broadcast value");
            for to in 0..self.rank_count {
                if to == root {
                    continue;
                }
                self.send(to, Message::floats(tags::BROADCAST, vec![v]))?;
            }
            Ok(v)
        } else {
            Ok(self.receive_expect(root, tags::BROADCAST)?.floats[0])
        }
    }

    pub fn broadcast_bool(&self, value: Option<bool>, root: usize) -> CoreResult<bool> {
        if self.my_rank == root {
            let v = value.expect("root must supply a broadcast value");
            for to in 0..self.rank_count {
                if to == root {
                    continue;
                }
                self.send(to, Message::ints(tags::BROADCAST, vec![v as i64]))?;
            }
            Ok(v)
        } else {
            Ok(self.receive_expect(root, tags::BROADCAST)?.ints[0] != 0)
        }
    }

    pub fn broadcast_bytes(&self, value: Option<Vec<u8>>, root: usize) -> CoreResult<Vec<u8>> {
        if self.my_rank == root {
            let v = value.expect("root must supply a broadcast value");
            for to in 0..self.rank_count {
                if to == root {
                    continue;
                }
                self.send(to, Message::bytes(tags::BROADCAST, v.clone()))?;
            }
            Ok(v)
        } else {
            Ok(self.receive_expect(root, tags::BROADCAST)?.bytes)
        }
    }

    fn gather_messages(&self, local: Message, root: usize) -> CoreResult<Option<Vec<Message>>> {
        let tag = local.tag;
        if self.my_rank == root {
            let mut out: Vec<Option<Message>> = (0..self.rank_count).map(|_| None).collect();
            out[root] = Some(local);
            for from in 0..self.rank_count {
                if from == root {
                    continue;
                }
                out[from] = Some(self.receive_expect(from, tag)?);
            }
            Ok(Some(out.into_iter().map(|m| m.expect("every rank reported")).collect()))
        } else {
            self.send(root, local)?;
            Ok(None)
        }
    }

    pub fn gather(&self, local: Vec<f64>, root: usize) -> CoreResult<Option<Vec<Vec<f64>>>> {
        let gathered = self.gather_messages(Message::floats(tags::GATHER, local), root)?;
        Ok(gathered.map(|v| v.into_iter().map(|m| m.floats).collect()))
    }

    pub fn scatter(&self, chunks: Option<Vec<Vec<f64>>>, root: usize) -> CoreResult<Vec<f64>> {
        if self.my_rank == root {
            let mut chunks = chunks.expect("root must supply chunks to scatter");
            debug_assert_eq!(chunks.len(), self.rank_count);
            let mine = std::mem::take(&mut chunks[root]);
            for (to, chunk) in chunks.into_iter().enumerate() {
                if to == root {
                    continue;
                }
                self.send(to, Message::floats(tags::SCATTER, chunk))?;
            }
            Ok(mine)
        } else {
            Ok(self.receive_expect(root, tags::SCATTER)?.floats)
        }
    }

    fn reduce_fold(&self, value: f64, root: usize, fold: impl Fn(f64, f64) -> f64) -> CoreResult<Option<f64>> {
        let gathered = self.gather_messages(Message::floats(tags::REDUCE, vec![value]), root)?;
        Ok(gathered.map(|v| {
            v.into_iter()
                .map(|m| m.floats[0])
                .fold(f64::NAN, |acc, x| if acc.is_nan() { x } else { fold(acc, x) })
        }))
    }

    pub fn reduce_min(&self, value: f64, root: usize) -> CoreResult<Option<f64>> {
        self.reduce_fold(value, root, f64::min)
    }

    pub fn reduce_max(&self, value: f64, root: usize) -> CoreResult<Option<f64>> {
        self.reduce_fold(value, root, f64::max)
    }

    pub fn reduce_or(&self, flag: bool, root: usize) -> CoreResult<Option<bool>> {
        let gathered = self.gather_messages(Message::ints(tags::REDUCE, vec![flag as i64]), root)?;
        Ok(gathered.map(|v| v.into_iter().any(|m| m.ints[0] != 0)))
    }

    /// Reduce-max across all workers, with every worker learning the
    /// result (spec §4.3: "all workers compute h' independently from the
    /// reduced ε to avoid an extra exchange").
    pub fn all_reduce_max(&self, value: f64) -> CoreResult<f64> {
        let reduced = self.reduce_max(value, 0)?;
        self.broadcast_f64(reduced, 0)
    }

    /// Reduce-OR across all workers, with every worker learning the
    /// result. Used for the NaN short-circuit flag (spec §4.3).
    pub fn all_reduce_or(&self, flag: bool) -> CoreResult<bool> {
        let reduced = self.reduce_or(flag, 0)?;
        self.broadcast_bool(reduced, 0)
    }

    /// All-ranks error check (spec §4.1, §7): every worker reports an
    /// integer code plus a message; if any is nonzero the offending rank
    /// and message are surfaced identically to every worker, which then
    /// returns a coordinated `CoreError::Collective`. Must be called by
    /// every worker cooperatively — it is itself a collective.
    pub fn all_ranks_error_check(&self, code: i32, message: &str) -> CoreResult<()> {
        let local = Message {
            tag: tags::ERROR_CHECK,
            floats: Vec::new(),
            ints: vec![code as i64],
            bytes: message.as_bytes().to_vec(),
        };
        let gathered = self.gather_messages(local, 0)?;

        let verdict: Option<(usize, i32, String)> = gathered.map(|reports| {
            reports
                .into_iter()
                .enumerate()
                .find_map(|(rank, m)| {
                    let c = m.ints[0] as i32;
                    (c != 0).then(|| (rank, c, String::from_utf8_lossy(&m.bytes).into_owned()))
                })
        }).flatten();

        if self.my_rank == 0 {
            if let Some((rank, code, ref msg)) = verdict {
                tracing::error!(rank, code, %msg, "all_ranks_error_check: halting");
            }
        }

        let halt = self.broadcast_bool(self.is_master().then(|| verdict.is_some()), 0)?;
        if !halt {
            return Ok(());
        }

        let packed = if self.my_rank == 0 {
            let (rank, code, msg) = verdict.expect("halt implies a verdict at master");
            format!("{rank}\u{1}{code}\u{1}{msg}")
        } else {
            String::new()
        };
        let packed = self.broadcast_bytes(self.is_master().then(|| packed.into_bytes()), 0)?;
        let packed = String::from_utf8_lossy(&packed).into_owned();
        let mut parts = packed.splitn(3, '\u{1}');
        let rank: usize = parts.next().unwrap_or("0").parse().unwrap_or(0);
        let code: i32 = parts.next().unwrap_or("1").parse().unwrap_or(1);
        let message = parts.next().unwrap_or("").to_string();

        self.barrier();
        Err(CoreError::Collective { rank, message, code })
    }

    /// Final rendezvous before process exit: every worker reaches this
    /// point before any of them tears down its transport.
    pub fn finalize_and_wait(&self) {
        self.barrier();
    }
}
