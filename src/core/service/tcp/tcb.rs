//! The TCP control block: per-connection state, the receive reorder heap,
//! and the segment state machine.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::mpsc::SyncSender;
use std::thread;
use std::time::Duration;

use crate::{
    Error,
    Result,
};
use crate::core::iface::Interface;
use crate::core::pb::PacketBuffer;
use crate::core::repr::{
    tcp::flags,
    TcpRepr,
};
use crate::core::socket::SocketAddr;
use crate::core::service::tcp::{
    isn,
    send_segment,
    AcceptNotice,
    TcbEvent,
    TcpCtx,
    TCP_WINDOW,
    TWO_MSL_SECS,
};

/// Connection states of the canonical TCP subset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// A parsed segment riding its packet buffer through the control block.
/// The header has been stripped from the buffer, so `pb.data` is the
/// application payload.
pub struct TcpSegment {
    pub header: TcpRepr,
    pub pb: PacketBuffer,
}

/// Heap entry ordered so the smallest sequence number surfaces first.
pub(super) struct SegmentEntry(pub TcpSegment);

impl PartialEq for SegmentEntry {
    fn eq(&self, other: &SegmentEntry) -> bool {
        self.0.header.seq_num == other.0.header.seq_num
    }
}

impl Eq for SegmentEntry {}

impl PartialOrd for SegmentEntry {
    fn partial_cmp(&self, other: &SegmentEntry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SegmentEntry {
    fn cmp(&self, other: &SegmentEntry) -> Ordering {
        // Reversed so the std max-heap pops the lowest sequence number.
        other.0.header.seq_num.cmp(&self.0.header.seq_num)
    }
}

/// Per-connection record keyed by `local-remote`.
pub struct Tcb {
    pub id: String,
    pub state: State,

    pub send_una: u32,
    pub send_nxt: u32,
    pub send_wnd: u32,
    pub send_up: u32,
    pub send_wl1: u32,
    pub send_wl2: u32,
    pub send_isn: u32,

    pub recv_nxt: u32,
    pub recv_wnd: u32,
    pub recv_up: u32,
    pub recv_isn: u32,

    pub(super) rx_queue: BinaryHeap<SegmentEntry>,

    pub src_addr: SocketAddr,
    pub dst_addr: SocketAddr,
    pub tx_iface: Option<Arc<Interface>>,

    /// Wakes the user parked in `connect`; fired on ESTABLISHED or abort.
    pub(super) established: Option<SyncSender<Result<()>>>,
    /// Wakes the user parked in `accept` on a passive open.
    pub(super) accept_tx: Option<SyncSender<AcceptNotice>>,
}

impl Tcb {
    pub fn new(id: String, src_addr: SocketAddr, dst_addr: SocketAddr) -> Tcb {
        Tcb {
            id,
            state: State::Closed,
            send_una: 0,
            send_nxt: 0,
            send_wnd: TCP_WINDOW as u32,
            send_up: 0,
            send_wl1: 0,
            send_wl2: 0,
            send_isn: 0,
            recv_nxt: 0,
            recv_wnd: TCP_WINDOW as u32,
            recv_up: 0,
            recv_isn: 0,
            rx_queue: BinaryHeap::new(),
            src_addr,
            dst_addr,
            tx_iface: None,
            established: None,
            accept_tx: None,
        }
    }

    /// The sorting stage: orders raw arrivals by sequence number and
    /// feeds the sorted stage everything that is ready, advancing
    /// `recv_nxt` segment by segment.
    ///
    /// SYN_SENT and LISTEN segments skip the window check entirely; no
    /// receive sequence space exists before the first SYN.
    pub(crate) fn sort_segment(
        &mut self,
        ctx: &TcpCtx,
        segment: TcpSegment,
        sorted: &SyncSender<TcbEvent>,
    ) {
        match self.state {
            State::SynSent => {
                self.handle_syn_sent(ctx, segment);
                return;
            }
            State::Listen => {
                self.segment_arrives(ctx, segment);
                return;
            }
            _ => {}
        }

        let seq_num = segment.header.seq_num;
        if seq_num < self.recv_nxt || seq_num > self.recv_nxt.wrapping_add(self.recv_wnd) {
            debug!(
                "{}: seq {} outside [{}, {}]",
                self.id,
                seq_num,
                self.recv_nxt,
                self.recv_nxt.wrapping_add(self.recv_wnd)
            );
            let mut segment = segment;
            segment.pb.resolve(Err(Error::InvalidSequenceNumber));
            return;
        }

        self.rx_queue.push(SegmentEntry(segment));

        while let Some(top) = self.rx_queue.peek() {
            if top.0.header.seq_num != self.recv_nxt {
                break;
            }

            let entry = self.rx_queue.pop().unwrap();
            let advance = entry.0.pb.data.len() as u32;
            let _ = sorted.send(TcbEvent::Sorted(entry.0));
            self.recv_nxt = self.recv_nxt.wrapping_add(advance);
        }
    }

    /// The processing stage. Consumes segments in sequence number order
    /// and drives the state machine.
    pub(crate) fn segment_arrives(&mut self, ctx: &TcpCtx, segment: TcpSegment) {
        let header = segment.header;

        // A valid RST aborts the connection from any synchronized state.
        if header.is_rst() {
            debug!("{}: reset by peer", self.id);
            self.notify_established(Err(Error::ConnectionReset));
            self.state = State::Closed;
            return;
        }

        if header.is_ack() {
            self.send_una = header.ack_num;
            self.send_nxt = header.ack_num;
        }

        match self.state {
            State::Listen => {
                if header.is_syn() {
                    if let Some(mss) = header.options.mss {
                        debug!("{}: peer mss {}", self.id, mss);
                    }
                    self.send_syn_ack(ctx, &header);
                }
            }

            State::SynRcvd => {
                // We sent a SYN+ACK; the handshake completes on its ACK.
                if header.is_ack() && header.ack_num == self.send_nxt {
                    self.state = State::Established;
                    self.notify_established(Ok(()));
                }
            }

            State::SynSent => {
                // Already handled by the sorting stage.
                debug!("{}: segment in SYN_SENT reached the sorted stage", self.id);
            }

            State::Established => {
                if header.is_fin() {
                    self.recv_nxt = self.recv_nxt.wrapping_add(1);
                    self.send_ack(ctx);
                    self.state = State::CloseWait;
                } else if !segment.pb.data.is_empty() {
                    // In-order data; acknowledge what the sorter advanced.
                    self.send_ack(ctx);
                }
            }

            State::FinWait1 => {
                if header.is_ack() && header.ack_num == self.send_nxt {
                    if header.is_fin() {
                        self.recv_nxt = self.recv_nxt.wrapping_add(1);
                        self.send_ack(ctx);
                        self.enter_time_wait(ctx);
                    } else {
                        self.state = State::FinWait2;
                    }
                } else if header.is_fin() {
                    self.recv_nxt = self.recv_nxt.wrapping_add(1);
                    self.send_ack(ctx);
                    self.state = State::Closing;
                }
            }

            State::FinWait2 => {
                if header.is_fin() {
                    self.recv_nxt = self.recv_nxt.wrapping_add(1);
                    self.send_ack(ctx);
                    self.enter_time_wait(ctx);
                }
            }

            State::Closing => {
                if header.is_ack() {
                    self.enter_time_wait(ctx);
                }
            }

            State::LastAck => {
                if header.is_ack() {
                    self.state = State::Closed;
                }
            }

            State::CloseWait | State::TimeWait => {
                // A retransmitted FIN deserves a fresh ACK.
                if header.is_fin() {
                    self.send_ack(ctx);
                }
            }

            State::Closed => {}
        }
    }

    /// SYN_SENT has its own acceptance rules; the usual window processing
    /// does not apply.
    pub(crate) fn handle_syn_sent(&mut self, ctx: &TcpCtx, segment: TcpSegment) {
        let header = segment.header;

        if header.is_ack()
            && (header.ack_num <= self.send_isn || header.ack_num > self.send_nxt)
        {
            debug!("{}: unacceptable ack {} in SYN_SENT", self.id, header.ack_num);
            self.send_reset_for(ctx, &header);
            return;
        }

        if header.is_rst() {
            self.notify_established(Err(Error::ConnectionReset));
            self.state = State::Closed;
            return;
        }

        if header.is_syn() {
            if let Some(mss) = header.options.mss {
                debug!("{}: peer mss {}", self.id, mss);
            }

            self.recv_isn = header.seq_num;
            self.recv_nxt = header.seq_num.wrapping_add(1);
            if header.is_ack() {
                self.send_una = header.ack_num;
            }

            if self.send_una > self.send_isn {
                self.state = State::Established;
                self.send_ack(ctx);
                self.notify_established(Ok(()));
            } else {
                // Simultaneous open: a bare SYN crossed ours.
                self.send_syn_ack(ctx, &header);
            }
        }
    }

    /// Answers a SYN with a SYN+ACK, seeding both sequence spaces and
    /// moving to SYN_RCVD.
    fn send_syn_ack(&mut self, ctx: &TcpCtx, request: &TcpRepr) {
        let isn = isn();

        self.send_isn = isn;
        self.send_una = isn;
        self.send_nxt = isn.wrapping_add(1);
        self.send_wnd = TCP_WINDOW as u32;
        self.send_up = 0;
        self.send_wl1 = isn;
        self.send_wl2 = isn;
        self.recv_isn = request.seq_num;
        self.recv_nxt = request.seq_num.wrapping_add(1);
        self.recv_wnd = TCP_WINDOW as u32;
        self.recv_up = 0;
        self.state = State::SynRcvd;

        let header = TcpRepr {
            src_port: self.src_addr.port,
            dst_port: self.dst_addr.port,
            seq_num: isn,
            ack_num: self.recv_nxt,
            data_offset: 5,
            flags: flags::SYN | flags::ACK,
            window_size: TCP_WINDOW,
            urgent_pointer: 0,
            options: Default::default(),
        };

        if let Err(err) = send_segment(
            ctx,
            header,
            self.src_addr,
            self.dst_addr,
            self.tx_iface.clone(),
            &[],
        ) {
            warn!("{}: sending syn+ack: {}", self.id, err);
        }
    }

    /// Acknowledges everything received so far.
    pub(super) fn send_ack(&mut self, ctx: &TcpCtx) {
        let header = TcpRepr {
            src_port: self.src_addr.port,
            dst_port: self.dst_addr.port,
            seq_num: self.send_nxt,
            ack_num: self.recv_nxt,
            data_offset: 5,
            flags: flags::ACK,
            window_size: TCP_WINDOW,
            urgent_pointer: 0,
            options: Default::default(),
        };

        if let Err(err) = send_segment(
            ctx,
            header,
            self.src_addr,
            self.dst_addr,
            self.tx_iface.clone(),
            &[],
        ) {
            warn!("{}: sending ack: {}", self.id, err);
        }
    }

    /// Emits the empty RST answering an unacceptable segment.
    fn send_reset_for(&self, ctx: &TcpCtx, received: &TcpRepr) {
        let header = reset_for(received);

        if let Err(err) = send_segment(
            ctx,
            header,
            self.src_addr,
            self.dst_addr,
            self.tx_iface.clone(),
            &[],
        ) {
            warn!("{}: sending rst: {}", self.id, err);
        }
    }

    /// Sends a FIN for everything we transmitted.
    pub(super) fn send_fin(&mut self, ctx: &TcpCtx) -> Result<()> {
        let header = TcpRepr {
            src_port: self.src_addr.port,
            dst_port: self.dst_addr.port,
            seq_num: self.send_nxt,
            ack_num: self.recv_nxt,
            data_offset: 5,
            flags: flags::FIN | flags::ACK,
            window_size: TCP_WINDOW,
            urgent_pointer: 0,
            options: Default::default(),
        };

        send_segment(
            ctx,
            header,
            self.src_addr,
            self.dst_addr,
            self.tx_iface.clone(),
            &[],
        )?;
        Ok(())
    }

    /// Wakes whoever is parked on this connection: the `connect` caller
    /// for an active open, the `accept` caller for a passive one.
    pub(super) fn notify_established(&mut self, result: Result<()>) {
        if let Some(chan) = self.established.take() {
            let _ = chan.send(result);
            return;
        }

        if result.is_ok() {
            if let Some(chan) = self.accept_tx.take() {
                let _ = chan.send(AcceptNotice {
                    local: self.src_addr,
                    remote: self.dst_addr,
                });
            }
        }
    }

    /// Enters TIME_WAIT and arms the 2MSL reclamation timer.
    fn enter_time_wait(&mut self, ctx: &TcpCtx) {
        self.state = State::TimeWait;

        let conn_table = Arc::clone(&ctx.conn_table);
        let id = self.id.clone();
        thread::Builder::new()
            .name(format!("{}-2msl", id))
            .spawn(move || {
                thread::sleep(Duration::from_secs(TWO_MSL_SECS));
                if let Some(handle) = conn_table.lock().unwrap().remove(&id) {
                    let _ = handle.events.try_send(TcbEvent::Quit);
                }
            })
            .expect("spawning 2msl timer");
    }
}

/// Builds the RST answering a segment that named no live connection, per
/// the mirror-image rule: acknowledge what arrived, take the sequence
/// number from the peer's ACK if it sent one.
pub(super) fn reset_for(received: &TcpRepr) -> TcpRepr {
    let (seq_num, reset_flags) = if received.is_ack() {
        (received.ack_num, flags::RST)
    } else {
        (0, flags::RST | flags::ACK)
    };

    TcpRepr {
        src_port: received.dst_port,
        dst_port: received.src_port,
        seq_num,
        ack_num: received.seq_num.wrapping_add(1),
        data_offset: 5,
        flags: reset_flags,
        window_size: TCP_WINDOW,
        urgent_pointer: 0,
        options: Default::default(),
    }
}
