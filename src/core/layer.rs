//! Layer and protocol scaffolding: bounded mailboxes, dispatch tasks, and
//! the helpers protocols use to cross layer boundaries.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc::{
    sync_channel,
    Receiver,
    SyncSender,
};
use std::thread;

use crate::core::pb::{
    PacketBuffer,
    ProtocolType,
};

/// Depth of every pipeline mailbox. Backpressure is blocking: a slow
/// consumer stalls its producer.
pub const PB_CHANNEL_BOUND: usize = 32;

/// A stateful handler for one wire protocol. The receive and transmit
/// loops run on separate tasks, so handlers take `&self` and keep any
/// mutable state behind their own locks.
pub trait Protocol: Send + Sync {
    fn protocol_type(&self) -> ProtocolType;

    /// Processes a packet moving up toward the application.
    fn handle_rx(&self, pb: PacketBuffer);

    /// Processes a packet moving down toward the wire.
    fn handle_tx(&self, pb: PacketBuffer);
}

/// Enqueue handles for a started protocol's receive and transmit loops.
#[derive(Clone)]
pub struct ProtocolHandle {
    protocol_type: ProtocolType,
    rx: SyncSender<PacketBuffer>,
    tx: SyncSender<PacketBuffer>,
}

impl ProtocolHandle {
    pub fn protocol_type(&self) -> ProtocolType {
        self.protocol_type
    }

    pub fn rx_chan(&self) -> SyncSender<PacketBuffer> {
        self.rx.clone()
    }

    pub fn tx_chan(&self) -> SyncSender<PacketBuffer> {
        self.tx.clone()
    }
}

/// Spawns the receive and transmit loops for a protocol and returns the
/// handles its layer dispatches into.
pub fn start_protocol(protocol: Arc<dyn Protocol>) -> ProtocolHandle {
    let (rx_tx, rx_queue) = sync_channel(PB_CHANNEL_BOUND);
    let (tx_tx, tx_queue) = sync_channel(PB_CHANNEL_BOUND);
    let protocol_type = protocol.protocol_type();

    let rx_protocol = Arc::clone(&protocol);
    thread::Builder::new()
        .name(format!("{:?}-rx", protocol_type))
        .spawn(move || {
            for pb in rx_queue.iter() {
                rx_protocol.handle_rx(pb);
            }
        })
        .expect("spawning protocol rx loop");

    thread::Builder::new()
        .name(format!("{:?}-tx", protocol_type))
        .spawn(move || {
            for pb in tx_queue.iter() {
                protocol.handle_tx(pb);
            }
        })
        .expect("spawning protocol tx loop");

    ProtocolHandle {
        protocol_type,
        rx: rx_tx,
        tx: tx_tx,
    }
}

/// The boundary-crossing helpers a protocol composes: `rx_up` enqueues to
/// the next-higher layer's receive mailbox, `tx_down` to the next-lower
/// layer's transmit mailbox. Protocols know their neighbors only by
/// position, never by type.
#[derive(Clone)]
pub struct ProtocolCore {
    rx_up: Option<SyncSender<PacketBuffer>>,
    tx_down: Option<SyncSender<PacketBuffer>>,
}

impl ProtocolCore {
    pub fn new(
        rx_up: Option<SyncSender<PacketBuffer>>,
        tx_down: Option<SyncSender<PacketBuffer>>,
    ) -> ProtocolCore {
        ProtocolCore { rx_up, tx_down }
    }

    /// Enqueues a packet to the next layer up. A packet with nowhere to go
    /// is dropped with a log.
    pub fn rx_up(&self, pb: PacketBuffer) {
        match self.rx_up {
            Some(ref chan) => {
                let _ = chan.send(pb);
            }
            None => debug!("no upper layer, dropping {:?}", pb),
        }
    }

    /// Enqueues a packet to the next layer down.
    pub fn tx_down(&self, pb: PacketBuffer) {
        match self.tx_down {
            Some(ref chan) => {
                let _ = chan.send(pb);
            }
            None => debug!("no lower layer, dropping {:?}", pb),
        }
    }
}

/// A dispatcher holding a named set of protocols and two mailboxes. The
/// receive dispatcher routes each packet to the protocol named by its tag;
/// the transmit dispatcher does the symmetric thing.
pub struct Layer {
    name: &'static str,
    rx: SyncSender<PacketBuffer>,
    tx: SyncSender<PacketBuffer>,
    rx_queue: Mutex<Option<Receiver<PacketBuffer>>>,
    tx_queue: Mutex<Option<Receiver<PacketBuffer>>>,
}

impl Layer {
    pub fn new(name: &'static str) -> Layer {
        let (rx, rx_queue) = sync_channel(PB_CHANNEL_BOUND);
        let (tx, tx_queue) = sync_channel(PB_CHANNEL_BOUND);

        Layer {
            name,
            rx,
            tx,
            rx_queue: Mutex::new(Some(rx_queue)),
            tx_queue: Mutex::new(Some(tx_queue)),
        }
    }

    pub fn rx_chan(&self) -> SyncSender<PacketBuffer> {
        self.rx.clone()
    }

    pub fn tx_chan(&self) -> SyncSender<PacketBuffer> {
        self.tx.clone()
    }

    /// Spawns the layer's dispatch tasks over the given protocol handles.
    ///
    /// # Panics
    ///
    /// Panics if called twice; the mailboxes have a single consumer each.
    pub fn start(&self, protocols: Vec<ProtocolHandle>) {
        let table: HashMap<ProtocolType, ProtocolHandle> = protocols
            .into_iter()
            .map(|handle| (handle.protocol_type(), handle))
            .collect();

        let rx_queue = self
            .rx_queue
            .lock()
            .unwrap()
            .take()
            .expect("layer already started");
        let tx_queue = self
            .tx_queue
            .lock()
            .unwrap()
            .take()
            .expect("layer already started");

        dispatch_loop(format!("{}-rxdispatch", self.name), rx_queue, table.clone(), false);
        dispatch_loop(format!("{}-txdispatch", self.name), tx_queue, table, true);
    }
}

fn dispatch_loop(
    name: String,
    queue: Receiver<PacketBuffer>,
    table: HashMap<ProtocolType, ProtocolHandle>,
    transmit: bool,
) {
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            for pb in queue.iter() {
                match table.get(&pb.protocol_type()) {
                    Some(handle) => {
                        let chan = if transmit { &handle.tx } else { &handle.rx };
                        let _ = chan.send(pb);
                    }
                    None => debug!("no protocol registered for {:?}", pb),
                }
            }
        })
        .expect("spawning layer dispatch");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct Recorder {
        protocol_type: ProtocolType,
        seen: SyncSender<(bool, PacketBuffer)>,
    }

    impl Protocol for Recorder {
        fn protocol_type(&self) -> ProtocolType {
            self.protocol_type
        }

        fn handle_rx(&self, pb: PacketBuffer) {
            self.seen.send((false, pb)).unwrap();
        }

        fn handle_tx(&self, pb: PacketBuffer) {
            self.seen.send((true, pb)).unwrap();
        }
    }

    #[test]
    fn test_layer_dispatches_by_protocol_type() {
        let (seen, observed) = sync_channel(16);
        let recorder = Arc::new(Recorder {
            protocol_type: ProtocolType::Ipv4,
            seen,
        });

        let layer = Layer::new("test");
        layer.start(vec![start_protocol(recorder)]);

        let mut pb = PacketBuffer::new(vec![1]);
        pb.set_protocol_type(ProtocolType::Ipv4);
        layer.rx_chan().send(pb).unwrap();

        let (transmit, pb) = observed.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(!transmit);
        assert_eq!(&[1][..], &pb.data[..]);

        let mut pb = PacketBuffer::new(vec![2]);
        pb.set_protocol_type(ProtocolType::Ipv4);
        layer.tx_chan().send(pb).unwrap();

        let (transmit, pb) = observed.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(transmit);
        assert_eq!(&[2][..], &pb.data[..]);
    }

    #[test]
    fn test_layer_drops_unknown_protocol_type() {
        let (seen, observed) = sync_channel(16);
        let recorder = Arc::new(Recorder {
            protocol_type: ProtocolType::Ipv4,
            seen,
        });

        let layer = Layer::new("test");
        layer.start(vec![start_protocol(recorder)]);

        let mut pb = PacketBuffer::new(vec![1]);
        pb.set_protocol_type(ProtocolType::Ipv6);
        layer.rx_chan().send(pb).unwrap();

        assert_matches!(observed.recv_timeout(Duration::from_millis(100)), Err(_));
    }
}
