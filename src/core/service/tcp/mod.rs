//! The TCP engine: the connection table, the per-connection tasks, and
//! the operations the socket layer drives (open, close, send, listen).

mod tcb;

pub use self::tcb::{
    State,
    Tcb,
    TcpSegment,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc::{
    sync_channel,
    Receiver,
    SyncSender,
};
use std::thread;

use crate::{
    Error,
    Result,
};
use crate::core::iface::Interface;
use crate::core::layer::{
    Protocol,
    ProtocolCore,
};
use crate::core::pb::{
    L4Header,
    PacketBuffer,
    ProtocolType,
};
use crate::core::repr::{
    tcp::flags,
    TcpRepr,
};
use crate::core::service::set_type_by_family;
use crate::core::socket::SocketAddr;

/// Events multiplexed onto a control block's task: raw arrivals, the
/// sorter's in-order emissions, and shutdown.
pub enum TcbEvent {
    Segment(TcpSegment),
    Sorted(TcpSegment),
    Quit,
}

/// Depth of a control block's event mailbox.
pub const TCB_EVENT_QUEUE_LEN: usize = 1024;

/// The fixed window advertisement; window management is out of scope.
pub const TCP_WINDOW: u16 = 0xFFFF;

/// Seconds a TIME_WAIT control block lingers before reclamation.
pub const TWO_MSL_SECS: u64 = 30;

/// A fresh initial sequence number.
pub fn isn() -> u32 {
    rand::random()
}

/// The connection identifier: `localAddr-remoteAddr`.
pub fn conn_id(local: &SocketAddr, remote: &SocketAddr) -> String {
    format!("{}-{}", local, remote)
}

/// A connection arriving on a listening port, delivered to whoever is
/// parked in `accept`.
#[derive(Clone, Copy, Debug)]
pub struct AcceptNotice {
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

/// The handle the protocol keeps per connection: the event mailbox of the
/// control block's task, and the control block itself.
#[derive(Clone)]
pub struct TcbHandle {
    pub(crate) events: SyncSender<TcbEvent>,
    pub(crate) tcb: Arc<Mutex<Tcb>>,
}

/// What a control block task needs from the protocol: the path down the
/// stack and the table it removes itself from.
#[derive(Clone)]
pub(crate) struct TcpCtx {
    pub core: ProtocolCore,
    pub conn_table: Arc<Mutex<HashMap<String, TcbHandle>>>,
}

pub struct TcpProtocol {
    ctx: TcpCtx,
    listeners: Mutex<HashMap<u16, SyncSender<AcceptNotice>>>,
}

impl TcpProtocol {
    pub fn new(core: ProtocolCore) -> Arc<TcpProtocol> {
        Arc::new(TcpProtocol {
            ctx: TcpCtx {
                core,
                conn_table: Arc::new(Mutex::new(HashMap::new())),
            },
            listeners: Mutex::new(HashMap::new()),
        })
    }

    fn lookup(&self, id: &str) -> Option<TcbHandle> {
        self.ctx.conn_table.lock().unwrap().get(id).cloned()
    }

    /// Registers a control block and spawns its task.
    fn spawn_tcb(&self, tcb: Tcb) -> TcbHandle {
        let id = tcb.id.clone();
        let (events_tx, events) = sync_channel(TCB_EVENT_QUEUE_LEN);
        let handle = TcbHandle {
            events: events_tx.clone(),
            tcb: Arc::new(Mutex::new(tcb)),
        };

        self.ctx
            .conn_table
            .lock()
            .unwrap()
            .insert(id.clone(), handle.clone());

        let ctx = self.ctx.clone();
        let tcb = Arc::clone(&handle.tcb);
        thread::Builder::new()
            .name(format!("tcb-{}", id))
            .spawn(move || main_loop(ctx, tcb, events, events_tx))
            .expect("spawning tcb task");

        handle
    }

    /// Active open: create the SYN_SENT control block, send the initial
    /// SYN, and hand back the wakeup the blocking `connect` parks on.
    pub fn open_connection(
        &self,
        src_addr: SocketAddr,
        dst_addr: SocketAddr,
        iface: Arc<Interface>,
    ) -> Result<Receiver<Result<()>>> {
        let id = conn_id(&src_addr, &dst_addr);
        if self.lookup(&id).is_some() {
            return Err(Error::InvalidState);
        }

        debug!("opening {}", id);

        let isn = isn();
        let (established_tx, established_rx) = sync_channel(1);

        let mut tcb = Tcb::new(id.clone(), src_addr, dst_addr);
        tcb.state = State::SynSent;
        tcb.send_isn = isn;
        tcb.send_una = isn;
        tcb.send_nxt = isn.wrapping_add(1);
        tcb.tx_iface = Some(Arc::clone(&iface));
        tcb.established = Some(established_tx);
        self.spawn_tcb(tcb);

        let header = TcpRepr {
            src_port: src_addr.port,
            dst_port: dst_addr.port,
            seq_num: isn,
            ack_num: 0,
            data_offset: 5,
            flags: flags::SYN,
            window_size: TCP_WINDOW,
            urgent_pointer: 0,
            options: Default::default(),
        };

        if let Err(err) = send_segment(&self.ctx, header, src_addr, dst_addr, Some(iface), &[]) {
            self.remove_connection(&id);
            return Err(err);
        }

        Ok(established_rx)
    }

    /// Close, dispatched on connection state.
    pub fn close_connection(&self, src_addr: SocketAddr, dst_addr: SocketAddr) -> Result<()> {
        let id = conn_id(&src_addr, &dst_addr);
        let handle = match self.lookup(&id) {
            Some(handle) => handle,
            None => return Err(Error::ConnectionNoExist),
        };

        let mut tcb = handle.tcb.lock().unwrap();
        match tcb.state {
            State::Closed => Err(Error::InvalidState),

            State::Listen | State::SynSent => {
                drop(tcb);
                self.remove_connection(&id);
                Ok(())
            }

            State::SynRcvd | State::Established => {
                tcb.state = State::FinWait1;
                tcb.send_fin(&self.ctx)
            }

            State::CloseWait => {
                tcb.state = State::Closing;
                tcb.send_fin(&self.ctx)
            }

            _ => Err(Error::ConnectionClosing),
        }
    }

    /// Transmits one in-order data segment on an established connection.
    pub fn send(&self, src_addr: SocketAddr, dst_addr: SocketAddr, payload: &[u8]) -> Result<usize> {
        let id = conn_id(&src_addr, &dst_addr);
        let handle = match self.lookup(&id) {
            Some(handle) => handle,
            None => return Err(Error::ConnectionNoExist),
        };

        let mut tcb = handle.tcb.lock().unwrap();
        if tcb.state != State::Established && tcb.state != State::CloseWait {
            return Err(Error::InvalidState);
        }

        let header = TcpRepr {
            src_port: src_addr.port,
            dst_port: dst_addr.port,
            seq_num: tcb.send_nxt,
            ack_num: tcb.recv_nxt,
            data_offset: 5,
            flags: flags::PSH | flags::ACK,
            window_size: TCP_WINDOW,
            urgent_pointer: 0,
            options: Default::default(),
        };

        let written = send_segment(
            &self.ctx,
            header,
            src_addr,
            dst_addr,
            tcb.tx_iface.clone(),
            payload,
        )?;
        tcb.send_nxt = tcb.send_nxt.wrapping_add(payload.len() as u32);
        Ok(written)
    }

    /// Registers a listening port. A SYN for it with no live connection
    /// creates a LISTEN control block; reaching ESTABLISHED notifies the
    /// accept mailbox.
    pub fn listen(&self, port: u16, accept_tx: SyncSender<AcceptNotice>) {
        self.listeners.lock().unwrap().insert(port, accept_tx);
    }

    pub fn unlisten(&self, port: u16) {
        self.listeners.lock().unwrap().remove(&port);
    }

    fn remove_connection(&self, id: &str) {
        if let Some(handle) = self.ctx.conn_table.lock().unwrap().remove(id) {
            let _ = handle.events.try_send(TcbEvent::Quit);
        }
    }

    /// Answers a segment that named no connection with an empty RST.
    fn send_empty_rst(&self, received: &TcpRepr, pb: &PacketBuffer) {
        let header = tcb::reset_for(received);
        let tx_iface = pb.rx_iface().cloned();

        if let Err(err) = send_segment(
            &self.ctx,
            header,
            pb.dst_addr(),
            pb.src_addr(),
            tx_iface,
            &[],
        ) {
            debug!("sending empty rst: {}", err);
        }
    }
}

impl Protocol for TcpProtocol {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Tcp
    }

    /// Parse the header, find the control block, and queue the segment
    /// for its task. A segment with no control block earns an RST unless
    /// it is one itself, or a SYN for a listening port.
    fn handle_rx(&self, mut pb: PacketBuffer) {
        let header = match TcpRepr::deserialize(&pb.data) {
            Ok(header) => header,
            Err(err) => {
                debug!("dropping tcp segment: {}", err);
                return;
            }
        };

        pb.strip_bytes(header.header_len());

        let mut src_addr = pb.src_addr();
        src_addr.port = header.src_port;
        pb.set_src_addr(src_addr);

        let mut dst_addr = pb.dst_addr();
        dst_addr.port = header.dst_port;
        pb.set_dst_addr(dst_addr);

        // Local address is where the segment landed; remote is where it
        // came from.
        let id = conn_id(&pb.dst_addr(), &pb.src_addr());

        if let Some(handle) = self.lookup(&id) {
            let _ = handle.events.send(TcbEvent::Segment(TcpSegment { header, pb }));
            return;
        }

        if header.is_rst() {
            debug!("rst for unknown connection {}", id);
            return;
        }

        let listener = self
            .listeners
            .lock()
            .unwrap()
            .get(&header.dst_port)
            .cloned();

        match listener {
            Some(accept_tx) if header.is_syn() && !header.is_ack() => {
                debug!("passive open {}", id);
                let mut tcb = Tcb::new(id, pb.dst_addr(), pb.src_addr());
                tcb.state = State::Listen;
                tcb.tx_iface = pb.rx_iface().cloned();
                tcb.accept_tx = Some(accept_tx);

                let handle = self.spawn_tcb(tcb);
                let _ = handle.events.send(TcbEvent::Segment(TcpSegment { header, pb }));
            }
            _ => self.send_empty_rst(&header, &pb),
        }
    }

    /// Unused: the socket layer drives transmission through the
    /// connection operations above.
    fn handle_tx(&self, mut pb: PacketBuffer) {
        pb.resolve(Err(Error::InvalidState));
    }
}

fn main_loop(
    ctx: TcpCtx,
    tcb: Arc<Mutex<Tcb>>,
    events: Receiver<TcbEvent>,
    events_tx: SyncSender<TcbEvent>,
) {
    for event in events.iter() {
        let mut tcb = tcb.lock().unwrap();

        match event {
            TcbEvent::Segment(segment) => tcb.sort_segment(&ctx, segment, &events_tx),
            TcbEvent::Sorted(segment) => tcb.segment_arrives(&ctx, segment),
            TcbEvent::Quit => return,
        }

        if tcb.state == State::Closed {
            debug!("reclaiming {}", tcb.id);
            ctx.conn_table.lock().unwrap().remove(&tcb.id);
            return;
        }
    }
}

/// Builds a segment, blocks until it reaches the wire, and reports the
/// payload bytes carried.
pub(crate) fn send_segment(
    ctx: &TcpCtx,
    header: TcpRepr,
    src_addr: SocketAddr,
    dst_addr: SocketAddr,
    tx_iface: Option<Arc<Interface>>,
    payload: &[u8],
) -> Result<usize> {
    let src_ip = src_addr.ipv4()?;
    let dst_ip = dst_addr.ipv4()?;

    let mut data = header.emit(src_ip, dst_ip, payload);
    data.extend_from_slice(payload);

    let (mut pb, completion) = PacketBuffer::with_completion(data);
    pb.set_l4_header(L4Header::Tcp(header));
    pb.set_src_addr(src_addr);
    pb.set_dst_addr(dst_addr);
    if let Some(iface) = tx_iface {
        pb.set_tx_iface(iface);
    }
    set_type_by_family(&mut pb);

    ctx.core.tx_down(pb);
    completion.wait()?;
    Ok(payload.len())
}
