//! Interfaces bridge the packet pipeline to the outside world: a read
//! loop wraps device frames into packet buffers for the link layer, and a
//! write loop drains the interface's transmit mailbox onto the device.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc::{
    sync_channel,
    Receiver,
    SyncSender,
};
use std::thread;

use crate::core::dev::Device;
use crate::core::layer::PB_CHANNEL_BOUND;
use crate::core::pb::{
    PacketBuffer,
    ProtocolType,
};
use crate::core::repr::{
    EthernetAddress,
    EthernetRepr,
    Ipv4Address,
};

/// One L3 address assignment on an interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IfAddr {
    pub ip: Ipv4Address,
    pub netmask: Ipv4Address,
    pub gateway: Ipv4Address,
}

/// Represents a wire. Created at startup, runs two loops forever, never
/// destroyed.
pub struct Interface {
    name: String,
    hw_addr: EthernetAddress,
    mtu: usize,
    addrs: Vec<IfAddr>,
    link_type: ProtocolType,
    tx: SyncSender<PacketBuffer>,
    tx_queue: Mutex<Option<Receiver<PacketBuffer>>>,
}

impl Interface {
    pub fn new(
        name: &str,
        hw_addr: EthernetAddress,
        mtu: usize,
        addrs: Vec<IfAddr>,
    ) -> Arc<Interface> {
        let (tx, tx_queue) = sync_channel(PB_CHANNEL_BOUND);

        Arc::new(Interface {
            name: name.to_string(),
            hw_addr,
            mtu,
            addrs,
            link_type: ProtocolType::Ethernet,
            tx,
            tx_queue: Mutex::new(Some(tx_queue)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hw_addr(&self) -> EthernetAddress {
        self.hw_addr
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn addrs(&self) -> &[IfAddr] {
        &self.addrs
    }

    /// The L2 protocol the interface speaks; the tag given to every packet
    /// buffer read off the device.
    pub fn link_type(&self) -> ProtocolType {
        self.link_type
    }

    /// Checks if the IP is assigned to this interface.
    pub fn has_ip(&self, ip: Ipv4Address) -> bool {
        self.addrs.iter().any(|addr| addr.ip == ip)
    }

    /// The interface's transmit mailbox. The write loop resolves every
    /// packet buffer it dequeues.
    pub fn tx_chan(&self) -> SyncSender<PacketBuffer> {
        self.tx.clone()
    }

    /// Spawns the interface's read and write loops over a device.
    ///
    /// # Panics
    ///
    /// Panics if called twice.
    pub fn start(
        self: &Arc<Self>,
        dev: Arc<dyn Device>,
        link_rx: SyncSender<PacketBuffer>,
    ) {
        let tx_queue = self
            .tx_queue
            .lock()
            .unwrap()
            .take()
            .expect("interface already started");

        let rx_iface = Arc::clone(self);
        let rx_dev = Arc::clone(&dev);
        thread::Builder::new()
            .name(format!("{}-rx", self.name))
            .spawn(move || {
                let mut buffer = vec![0; rx_dev.max_transmission_unit() + EthernetRepr::HEADER_LEN];
                loop {
                    match rx_dev.recv(&mut buffer) {
                        Ok(len) => {
                            let mut pb = PacketBuffer::new(buffer[.. len].to_vec());
                            pb.set_protocol_type(rx_iface.link_type());
                            pb.set_rx_iface(Arc::clone(&rx_iface));
                            if link_rx.send(pb).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            warn!("reading from {}: {}", rx_iface.name(), err);
                            return;
                        }
                    }
                }
            })
            .expect("spawning interface rx loop");

        let tx_iface = Arc::clone(self);
        thread::Builder::new()
            .name(format!("{}-tx", self.name))
            .spawn(move || {
                for mut pb in tx_queue.iter() {
                    let len = pb.data.len();
                    match dev.send(&pb.data) {
                        Ok(()) => {
                            trace!("{} wrote {} bytes", tx_iface.name(), len);
                            pb.resolve(Ok(len));
                        }
                        Err(err) => {
                            warn!("writing to {}: {}", tx_iface.name(), err);
                            pb.resolve(Err(err));
                        }
                    }
                }
            })
            .expect("spawning interface tx loop");
    }
}
