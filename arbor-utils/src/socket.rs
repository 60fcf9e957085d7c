//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};
use std::os::raw::{c_int, c_void};
use std::os::unix::io::AsRawFd;

use libc::{ip_mreqn, packet_mreq};
use nix::sys::socket::{LinkAddr, SockaddrLike};
use serde::{Deserialize, Serialize};
// Re-export standard socket types.
pub use {
    socket2::Socket,
    tokio::io::unix::AsyncFd,
    tokio::net::{
        TcpListener, TcpSocket, TcpStream, UdpSocket, tcp::OwnedReadHalf,
        tcp::OwnedWriteHalf,
    },
};

// Maximum TTL for IPv4 or Hop Limit for IPv6.
pub const TTL_MAX: u8 = 255;

// TCP connection information.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct TcpConnInfo {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
}

// FFI struct used to set the TCP_MD5SIG socket option.
#[repr(C)]
#[derive(Copy, Clone)]
struct tcp_md5sig {
    tcpm_addr: libc::sockaddr_storage,
    tcpm_flags: u8,
    tcpm_prefixlen: u8,
    tcpm_keylen: u16,
    __tcpm_pad: u32,
    tcpm_key: [u8; 108],
}

// Useful type definition.
type Result<T> = std::io::Result<T>;

// Extension methods for all socket types.
pub trait SocketExt: Sized + AsRawFd {
    // Sets the value of the IP_TOS option for this socket.
    fn set_ipv4_tos(&self, tos: u8) -> Result<()> {
        let optval = tos as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_TOS,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_RECVTOS option for this socket, so the DSCP of
    // received packets is available as ancillary data.
    fn set_ipv4_recvtos(&self, enable: bool) -> Result<()> {
        let optval = enable as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_RECVTOS,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_TTL option for this socket.
    fn set_ipv4_ttl(&self, ttl: u8) -> Result<()> {
        let optval = ttl as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_TTL,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_MULTICAST_TTL option for this socket.
    fn set_ipv4_multicast_ttl(&self, ttl: u8) -> Result<()> {
        let optval = ttl as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_TTL,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_MULTICAST_LOOP option for this socket.
    fn set_ipv4_multicast_loop(&self, enable: bool) -> Result<()> {
        let optval = enable as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_LOOP,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_PKTINFO option for this socket.
    fn set_ipv4_pktinfo(&self, value: bool) -> Result<()> {
        let optval = value as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_PKTINFO,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_MULTICAST_IF option for this socket.
    fn set_multicast_ifindex_v4(&self, ifindex: u32) -> Result<()> {
        let optval = ip_mreqn {
            imr_multiaddr: libc::in_addr { s_addr: 0 },
            imr_address: libc::in_addr { s_addr: 0 },
            imr_ifindex: ifindex as i32,
        };

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_IF,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<ip_mreqn>() as libc::socklen_t,
        )
    }

    // Executes an operation of the IP_ADD_MEMBERSHIP type.
    fn join_multicast_ifindex_v4(
        &self,
        multiaddr: &Ipv4Addr,
        ifindex: u32,
    ) -> Result<()> {
        let multiaddr: u32 = (*multiaddr).into();

        let optval = ip_mreqn {
            imr_multiaddr: libc::in_addr {
                s_addr: multiaddr.to_be(),
            },
            imr_address: libc::in_addr { s_addr: 0 },
            imr_ifindex: ifindex as c_int,
        };

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_ADD_MEMBERSHIP,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<ip_mreqn>() as libc::socklen_t,
        )
    }

    // Executes an operation of the IP_DROP_MEMBERSHIP type.
    fn leave_multicast_ifindex_v4(
        &self,
        multiaddr: &Ipv4Addr,
        ifindex: u32,
    ) -> Result<()> {
        let multiaddr: u32 = (*multiaddr).into();

        let optval = ip_mreqn {
            imr_multiaddr: libc::in_addr {
                s_addr: multiaddr.to_be(),
            },
            imr_address: libc::in_addr { s_addr: 0 },
            imr_ifindex: ifindex as c_int,
        };

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_DROP_MEMBERSHIP,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<ip_mreqn>() as libc::socklen_t,
        )
    }

    // Executes an operation of the PACKET_ADD_MEMBERSHIP type.
    fn join_packet_multicast(&self, addr: [u8; 6], ifindex: u32) -> Result<()> {
        let mut optval = packet_mreq {
            mr_ifindex: ifindex as c_int,
            mr_type: libc::PACKET_MR_MULTICAST as libc::c_ushort,
            mr_alen: 6,
            mr_address: [0; 8],
        };
        optval.mr_address[..6].copy_from_slice(&addr);

        setsockopt(
            self,
            libc::SOL_PACKET,
            libc::PACKET_ADD_MEMBERSHIP,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<packet_mreq>() as libc::socklen_t,
        )
    }

    // Attaches a classic BPF filter to this socket.
    fn attach_filter(&self, filter: &[libc::sock_filter]) -> Result<()> {
        let prog = libc::sock_fprog {
            len: filter.len() as u16,
            filter: filter.as_ptr() as *mut _,
        };

        setsockopt(
            self,
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            &prog as *const _ as *const c_void,
            std::mem::size_of::<libc::sock_fprog>() as libc::socklen_t,
        )
    }

    // Sets the value of the TCP_MD5SIG option for this socket.
    fn set_md5sig(&self, dst: &IpAddr, password: Option<&str>) -> Result<()> {
        let mut optval = tcp_md5sig {
            tcpm_addr: unsafe { std::mem::zeroed() },
            tcpm_flags: 0,
            tcpm_prefixlen: 0,
            tcpm_keylen: 0,
            __tcpm_pad: 0,
            tcpm_key: [0; 108],
        };
        match dst {
            IpAddr::V4(addr) => {
                let sin = libc::sockaddr_in {
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: 0,
                    sin_addr: libc::in_addr {
                        s_addr: u32::from(*addr).to_be(),
                    },
                    sin_zero: [0; 8],
                };
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        &sin as *const _ as *const u8,
                        &mut optval.tcpm_addr as *mut _ as *mut u8,
                        std::mem::size_of::<libc::sockaddr_in>(),
                    );
                }
            }
            IpAddr::V6(addr) => {
                let sin6 = libc::sockaddr_in6 {
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: 0,
                    sin6_flowinfo: 0,
                    sin6_addr: libc::in6_addr {
                        s6_addr: addr.octets(),
                    },
                    sin6_scope_id: 0,
                };
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        &sin6 as *const _ as *const u8,
                        &mut optval.tcpm_addr as *mut _ as *mut u8,
                        std::mem::size_of::<libc::sockaddr_in6>(),
                    );
                }
            }
        }
        if let Some(password) = password {
            let key = password.as_bytes();
            optval.tcpm_keylen = key.len() as u16;
            optval.tcpm_key[..key.len()].copy_from_slice(key);
        }

        setsockopt(
            self,
            libc::IPPROTO_TCP,
            libc::TCP_MD5SIG,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<tcp_md5sig>() as libc::socklen_t,
        )
    }
}

// Extension methods for LinkAddr.
pub trait LinkAddrExt {
    // Returns a new `LinkAddr` with the given protocol, interface index and
    // link-layer address.
    fn new(protocol: u16, ifindex: u32, addr: Option<[u8; 6]>) -> Self;
}

impl LinkAddrExt for LinkAddr {
    fn new(protocol: u16, ifindex: u32, addr: Option<[u8; 6]>) -> Self {
        let mut sll = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: protocol.to_be(),
            sll_ifindex: ifindex as _,
            sll_halen: 0,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_addr: [0; 8],
        };
        if let Some(addr) = addr {
            sll.sll_halen = 6;
            sll.sll_addr[..6].copy_from_slice(&addr);
        }
        let sll_len = size_of_val(&sll) as libc::socklen_t;
        unsafe {
            LinkAddr::from_raw(&sll as *const _ as *const _, Some(sll_len))
        }
        .unwrap()
    }
}

impl SocketExt for Socket {}
impl SocketExt for TcpListener {}
impl SocketExt for TcpSocket {}
impl SocketExt for TcpStream {}
impl SocketExt for UdpSocket {}

// ===== helper functions =====

fn setsockopt<S: AsRawFd>(
    socket: &S,
    level: c_int,
    optname: c_int,
    optval: *const c_void,
    optlen: libc::socklen_t,
) -> Result<()> {
    let ret = unsafe {
        libc::setsockopt(socket.as_raw_fd(), level, optname, optval, optlen)
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}
