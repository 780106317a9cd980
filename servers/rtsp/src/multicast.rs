//! Per-path multicast listener pairs, reference-counted across the reader
//! sessions that share them.

use std::{
    collections::HashMap,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

use unified_io::udp::{UdpListener, UdpListenerConfig};

use crate::errors::{RtspServerError, RtspServerResult};

#[derive(Clone)]
pub(crate) struct MulticastHandle {
    pub group: Ipv4Addr,
    pub rtp_port: u16,
    pub rtcp_port: u16,
    pub rtp_listener: Arc<UdpListener>,
    pub rtcp_listener: Arc<UdpListener>,
}

impl MulticastHandle {
    pub fn rtp_group_addr(&self) -> SocketAddr {
        SocketAddr::new(self.group.into(), self.rtp_port)
    }

    pub fn rtcp_group_addr(&self) -> SocketAddr {
        SocketAddr::new(self.group.into(), self.rtcp_port)
    }
}

struct Entry {
    handle: MulticastHandle,
    refcount: usize,
}

pub(crate) struct MulticastRegistry {
    base_ip: Ipv4Addr,
    rtp_port: u16,
    max_packet_size: usize,
    write_timeout: Duration,
    entries: Mutex<HashMap<String, Entry>>,
    next_offset: Mutex<u32>,
}

impl MulticastRegistry {
    pub fn new(
        base_ip: Ipv4Addr,
        rtp_port: u16,
        max_packet_size: usize,
        write_timeout: Duration,
    ) -> Self {
        Self {
            base_ip,
            rtp_port,
            max_packet_size,
            write_timeout,
            entries: Mutex::new(HashMap::new()),
            next_offset: Mutex::new(1),
        }
    }

    fn allocate_group(&self) -> Ipv4Addr {
        let mut next = self.next_offset.lock().unwrap();
        let base = u32::from(self.base_ip);
        // walk the low 16 bits of the configured range
        let group = Ipv4Addr::from((base & 0xFFFF_0000) | (*next & 0xFFFF));
        *next = next.wrapping_add(1).max(1);
        group
    }

    /// Gets or creates the pair for a path; every acquire must be paired
    /// with a release.
    pub async fn acquire(&self, path: &str) -> RtspServerResult<MulticastHandle> {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(path) {
                entry.refcount += 1;
                return Ok(entry.handle.clone());
            }
        }

        let group = self.allocate_group();
        let rtp_listener = UdpListener::bind(
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), self.rtp_port),
            UdpListenerConfig {
                multicast_group: Some(group),
                max_packet_size: self.max_packet_size,
                write_timeout: self.write_timeout,
                any_port: false,
            },
        )
        .await?;
        let rtcp_listener = UdpListener::bind(
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), self.rtp_port + 1),
            UdpListenerConfig {
                multicast_group: Some(group),
                max_packet_size: self.max_packet_size,
                write_timeout: self.write_timeout,
                any_port: false,
            },
        )
        .await?;
        rtp_listener.start();
        rtcp_listener.start();

        let handle = MulticastHandle {
            group,
            rtp_port: self.rtp_port,
            rtcp_port: self.rtp_port + 1,
            rtp_listener: Arc::new(rtp_listener),
            rtcp_listener: Arc::new(rtcp_listener),
        };
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(path) {
            // another session raced us to the same path
            Some(entry) => {
                entry.refcount += 1;
                Ok(entry.handle.clone())
            }
            None => {
                entries.insert(
                    path.to_owned(),
                    Entry {
                        handle: handle.clone(),
                        refcount: 1,
                    },
                );
                Ok(handle)
            }
        }
    }

    /// Drops one reference; the last one closes the listeners.
    pub async fn release(&self, path: &str) {
        let closing = {
            let mut entries = self.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(path) else {
                return;
            };
            entry.refcount -= 1;
            if entry.refcount > 0 {
                return;
            }
            entries.remove(path).map(|entry| entry.handle)
        };
        if let Some(handle) = closing {
            tracing::debug!("closing multicast pair for path {}", path);
            handle.rtp_listener.close().await;
            handle.rtcp_listener.close().await;
        }
    }

    /// Clone of an existing handle without touching the refcount.
    pub fn peek(&self, path: &str) -> Option<MulticastHandle> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .map(|entry| entry.handle.clone())
    }

    pub fn refcount(&self, path: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .map(|entry| entry.refcount)
            .unwrap_or(0)
    }

    pub fn active_paths(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl std::fmt::Debug for MulticastRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MulticastRegistry")
            .field("base_ip", &self.base_ip)
            .field("rtp_port", &self.rtp_port)
            .field("active_paths", &self.active_paths())
            .finish()
    }
}

pub(crate) fn validate_udp_ports(
    rtp: Option<SocketAddr>,
    rtcp: Option<SocketAddr>,
) -> RtspServerResult<Option<(SocketAddr, SocketAddr)>> {
    match (rtp, rtcp) {
        (None, None) => Ok(None),
        (Some(rtp), Some(rtcp)) => {
            if rtp.port() % 2 != 0 {
                return Err(RtspServerError::InvalidUDPPorts(format!(
                    "rtp port {} must be even",
                    rtp.port()
                )));
            }
            if rtcp.port() != rtp.port() + 1 {
                return Err(RtspServerError::InvalidUDPPorts(format!(
                    "rtcp port {} must be rtp port + 1",
                    rtcp.port()
                )));
            }
            Ok(Some((rtp, rtcp)))
        }
        _ => Err(RtspServerError::InvalidUDPPorts(
            "rtp and rtcp addresses must be configured together".to_owned(),
        )),
    }
}
