//! Minimal UDP socket table
//!
//! Each bound port owns a queue of received datagrams. The table is the
//! [`SocketDemux`] the UDP engine delivers into; applications drain it with
//! [`UdpSocketTable::recv_from`].

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::buf::PacketBuf;
use crate::config::DEFAULT_SOCKET_QUEUE_LEN;
use crate::error::{NetError, Result};
use crate::iface::ip::{IpAddr, SocketDemux};
use crate::stats::Counter;
use crate::transport::udp::rx_app_data;

/// Sender of a datagram returned by [`UdpSocketTable::recv_from`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvMeta {
    /// Octets copied into the caller's buffer
    pub len: usize,
    pub src: IpAddr,
    pub src_port: u16,
}

#[derive(Debug)]
struct UdpSocket {
    bind_port: u16,
    rx_queue: VecDeque<PacketBuf>,
}

#[derive(Debug)]
pub struct UdpSocketTable {
    sockets: Mutex<HashMap<u16, UdpSocket>>,
    queue_limit: usize,
    rx_queue_drops: Counter,
}

impl Default for UdpSocketTable {
    fn default() -> Self {
        Self::with_queue_limit(DEFAULT_SOCKET_QUEUE_LEN)
    }
}

impl UdpSocketTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table whose sockets each queue at most `limit` datagrams
    pub fn with_queue_limit(limit: usize) -> Self {
        UdpSocketTable {
            sockets: Mutex::new(HashMap::new()),
            queue_limit: limit.max(1),
            rx_queue_drops: Counter::default(),
        }
    }

    /// Datagrams dropped because the socket's queue was full
    pub fn queue_drops(&self) -> u64 {
        self.rx_queue_drops.get()
    }

    pub fn bind(&self, port: u16) -> Result<()> {
        if port == 0 {
            return Err(NetError::InvalidArgument("port zero is reserved"));
        }
        let mut sockets = self.sockets.lock();
        if sockets.contains_key(&port) {
            return Err(NetError::InvalidArgument("port already bound"));
        }
        sockets.insert(
            port,
            UdpSocket {
                bind_port: port,
                rx_queue: VecDeque::new(),
            },
        );
        log::debug!("udp socket bound to port {}", port);
        Ok(())
    }

    /// Close the socket on `port`, dropping queued datagrams
    pub fn unbind(&self, port: u16) -> bool {
        self.sockets.lock().remove(&port).is_some()
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.sockets.lock().contains_key(&port)
    }

    /// Datagrams waiting on `port`
    pub fn queued(&self, port: u16) -> usize {
        self.sockets
            .lock()
            .get(&port)
            .map_or(0, |s| s.rx_queue.len())
    }

    /// Copy the oldest datagram queued on `port` into `out`.
    ///
    /// With `peek` the datagram stays queued. Without it the datagram is
    /// consumed even when `out` was too small and
    /// [`NetError::RxOverflow`] is returned.
    pub fn recv_from(&self, port: u16, out: &mut [u8], peek: bool) -> Result<Option<RecvMeta>> {
        let mut sockets = self.sockets.lock();
        let socket = sockets
            .get_mut(&port)
            .ok_or(NetError::InvalidArgument("port not bound"))?;
        let Some(buf) = socket.rx_queue.front() else {
            return Ok(None);
        };

        let copied = rx_app_data(buf, out);
        let meta = RecvMeta {
            len: copied.as_ref().map_or(0, |n| *n),
            src: buf.meta.ip_src,
            src_port: buf.meta.src_port,
        };
        if !peek {
            socket.rx_queue.pop_front();
        }
        copied.map(|_| Some(meta))
    }
}

impl SocketDemux for UdpSocketTable {
    fn deliver(&self, buf: PacketBuf) -> std::result::Result<(), PacketBuf> {
        let mut sockets = self.sockets.lock();
        match sockets.get_mut(&buf.meta.dst_port) {
            Some(socket) if socket.rx_queue.len() >= self.queue_limit => {
                self.rx_queue_drops.inc();
                log::debug!("udp rx queue full on port {}, datagram dropped", socket.bind_port);
                Ok(())
            }
            Some(socket) => {
                log::trace!("udp datagram queued on port {}", socket.bind_port);
                socket.rx_queue.push_back(buf);
                Ok(())
            }
            None => Err(buf),
        }
    }
}
