//! AF_PACKET receive tap

use super::{PacketSource, RxInfo};
use crate::{Error, Result};
use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::unix::AsyncFd;

/// Read-only AF_PACKET socket bound to one interface
///
/// Only IPv4 frames are delivered (`ETH_P_IP`); the tap never transmits.
pub struct AfPacketTap {
    async_fd: AsyncFd<OwnedFd>,
    ifname: String,
    ifindex: i32,
    promisc: bool,
}

impl AfPacketTap {
    /// Open a tap on `ifname`
    pub fn bind(ifname: &str, promisc: bool) -> Result<Self> {
        let ifindex = Self::ifindex_of(ifname)?;
        let protocol = (libc::ETH_P_IP as u16).to_be();

        let raw = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                protocol as i32,
            )
        };
        if raw < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        // closes the socket on every early return below
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut sockaddr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        sockaddr.sll_family = libc::AF_PACKET as u16;
        sockaddr.sll_protocol = protocol;
        sockaddr.sll_ifindex = ifindex;

        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        if promisc {
            Self::membership(fd.as_raw_fd(), ifindex, libc::PACKET_ADD_MEMBERSHIP)?;
        }

        Ok(Self {
            async_fd: AsyncFd::new(fd).map_err(Error::Io)?,
            ifname: ifname.to_string(),
            ifindex,
            promisc,
        })
    }

    fn ifindex_of(ifname: &str) -> Result<i32> {
        let not_found = || Error::InterfaceNotFound {
            name: ifname.to_string(),
        };
        let name = CString::new(ifname).map_err(|_| not_found())?;
        match unsafe { libc::if_nametoindex(name.as_ptr()) } {
            0 => Err(not_found()),
            index => Ok(index as i32),
        }
    }

    fn membership(fd: RawFd, ifindex: i32, optname: libc::c_int) -> Result<()> {
        let mreq = libc::packet_mreq {
            mr_ifindex: ifindex,
            mr_type: libc::PACKET_MR_PROMISC as u16,
            mr_alen: 0,
            mr_address: [0; 8],
        };
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_PACKET,
                optname,
                &mreq as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Receive one frame (async)
    pub async fn recv(&self, buf: &mut [u8]) -> Result<RxInfo> {
        loop {
            let mut guard = self.async_fd.readable().await.map_err(Error::Io)?;

            let result = guard.try_io(|inner| {
                let mut from: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
                let mut from_len = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
                // MSG_TRUNC: report the wire length even when it exceeds buf
                let n = unsafe {
                    libc::recvfrom(
                        inner.as_raw_fd(),
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                        libc::MSG_TRUNC,
                        &mut from as *mut _ as *mut libc::sockaddr,
                        &mut from_len,
                    )
                };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(rx_info(n as usize, buf.len(), from.sll_pkttype))
                }
            });

            match result {
                Ok(Ok(info)) => return Ok(info),
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    pub fn ifindex(&self) -> i32 {
        self.ifindex
    }
}

fn rx_info(wire_len: usize, capacity: usize, pkttype: u8) -> RxInfo {
    RxInfo {
        len: wire_len.min(capacity),
        wire_len,
        outgoing: pkttype == libc::PACKET_OUTGOING as u8,
    }
}

impl AsRawFd for AfPacketTap {
    fn as_raw_fd(&self) -> RawFd {
        self.async_fd.get_ref().as_raw_fd()
    }
}

impl Drop for AfPacketTap {
    fn drop(&mut self) {
        if self.promisc {
            let _ = Self::membership(
                self.as_raw_fd(),
                self.ifindex,
                libc::PACKET_DROP_MEMBERSHIP,
            );
        }
    }
}

impl PacketSource for AfPacketTap {
    fn name(&self) -> &str {
        &self.ifname
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<RxInfo> {
        AfPacketTap::recv(self, buf).await
    }
}
