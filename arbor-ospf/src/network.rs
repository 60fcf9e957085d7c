//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::io::{IoSlice, IoSliceMut};
use std::net::Ipv4Addr;
use std::ops::Deref;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use arbor_utils::Sender;
use arbor_utils::socket::{AsyncFd, Socket, SocketExt};
use bytes::{Buf, Bytes};
use nix::sys::socket::{self, SockaddrIn};
use tokio::sync::mpsc::error::SendError;

use crate::debug::Debug;
use crate::error::IoError;
use crate::packet::Packet;
use crate::packet::error::{DecodeError, DecodeResult};
use crate::tasks::messages::input::NetRxPacketMsg;
use crate::tasks::messages::output::NetTxPacketMsg;

// OSPF IP protocol number.
pub const OSPF_IP_PROTO: i32 = 89;

// OSPF multicast addresses.
pub const ALL_SPF_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 5);
pub const ALL_DR_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 6);

// ===== global functions =====

// Creates the per-interface raw IP socket.
pub(crate) fn socket(ifname: &str) -> Result<Socket, std::io::Error> {
    use socket2::{Domain, Protocol, Type};

    let socket = Socket::new(
        Domain::IPV4,
        Type::RAW,
        Some(Protocol::from(OSPF_IP_PROTO)),
    )?;

    socket.set_nonblocking(true)?;
    socket.bind_device(Some(ifname.as_bytes()))?;
    socket.set_multicast_loop_v4(false)?;
    socket.set_multicast_ttl_v4(1)?;
    socket.set_ipv4_pktinfo(true)?;
    socket.set_tos_v4(libc::IPTOS_PREC_INTERNETCONTROL as u32)?;

    Ok(socket)
}

pub(crate) fn join_multicast(
    socket: &AsyncFd<Socket>,
    addr: Ipv4Addr,
    ifindex: u32,
) -> Result<(), std::io::Error> {
    socket.get_ref().join_multicast_ifindex_v4(&addr, ifindex)
}

pub(crate) fn leave_multicast(
    socket: &AsyncFd<Socket>,
    addr: Ipv4Addr,
    ifindex: u32,
) -> Result<(), std::io::Error> {
    socket.get_ref().leave_multicast_ifindex_v4(&addr, ifindex)
}

// Sends a single packet, selecting the source address through IP_PKTINFO.
pub(crate) async fn send_packet(
    socket: &AsyncFd<Socket>,
    ifindex: u32,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    packet: &Packet,
) -> Result<usize, IoError> {
    Debug::PacketTx(ifindex, &dst, packet).log();

    // Encode packet.
    let buf = packet.encode();

    // Send packet.
    let iov = [IoSlice::new(&buf)];
    let sockaddr: SockaddrIn = std::net::SocketAddrV4::new(dst, 0).into();
    let pktinfo = libc::in_pktinfo {
        ipi_ifindex: ifindex as i32,
        ipi_spec_dst: libc::in_addr { s_addr: 0 },
        ipi_addr: libc::in_addr {
            s_addr: u32::from(src).to_be(),
        },
    };
    let cmsg = [socket::ControlMessage::Ipv4PacketInfo(&pktinfo)];
    socket
        .async_io(tokio::io::Interest::WRITABLE, |socket| {
            socket::sendmsg(
                socket.as_raw_fd(),
                &iov,
                &cmsg,
                socket::MsgFlags::empty(),
                Some(&sockaddr),
            )
            .map_err(|errno| errno.into())
        })
        .await
        .map_err(IoError::SendError)
}

// Network Tx loop: drains the per-interface outbound queue.
pub(crate) async fn write_loop(
    socket: Arc<AsyncFd<Socket>>,
    ifindex: u32,
    src: Ipv4Addr,
    net_tx_packetc: &mut arbor_utils::UnboundedReceiver<NetTxPacketMsg>,
) {
    while let Some(NetTxPacketMsg { packet, dst }) = net_tx_packetc.recv().await
    {
        for dst in dst {
            if let Err(error) =
                send_packet(&socket, ifindex, src, dst, &packet).await
            {
                error.log();
            }
        }
    }
}

// Network Rx loop: receives raw IP datagrams, strips the IP header and
// hands the OSPF payload to the instance.
pub(crate) async fn read_loop(
    socket: Arc<AsyncFd<Socket>>,
    ifname: String,
    net_packet_rxp: Sender<NetRxPacketMsg>,
) -> Result<(), SendError<NetRxPacketMsg>> {
    let mut buf = [0; 16384];
    let mut iov = [IoSliceMut::new(&mut buf)];

    loop {
        // Receive data packet.
        match socket
            .async_io(tokio::io::Interest::READABLE, |socket| {
                match socket::recvmsg::<SockaddrIn>(
                    socket.as_raw_fd(),
                    &mut iov,
                    None,
                    socket::MsgFlags::empty(),
                ) {
                    Ok(msg) => {
                        let src = msg
                            .address
                            .as_ref()
                            .map(|addr| Ipv4Addr::from(addr.ip()));
                        Ok((src, msg.bytes))
                    }
                    Err(errno) => Err(errno.into()),
                }
            })
            .await
        {
            Ok((src, bytes)) => {
                let Some(src) = src else {
                    IoError::RecvMissingSourceAddr.log();
                    continue;
                };

                // Validate and strip the IP header, keeping the TOS byte
                // (ingress DSCP) and the destination address.
                let mut buf = Bytes::copy_from_slice(&iov[0].deref()[0..bytes]);
                let mut dst = Ipv4Addr::UNSPECIFIED;
                let mut dscp = 0;
                let packet = validate_ip_hdr(&mut buf, &mut dst, &mut dscp)
                    .and_then(|_| Packet::decode(&buf));
                let msg = NetRxPacketMsg {
                    ifname: ifname.clone(),
                    src,
                    dst,
                    dscp,
                    packet,
                };
                net_packet_rxp.send(msg).await?;
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {
                // Retry if the syscall was interrupted (EINTR).
                continue;
            }
            Err(error) => {
                IoError::RecvError(error).log();
            }
        }
    }
}

// ===== helper functions =====

// Validates the IPv4 header of a received packet and advances the buffer
// past it.
fn validate_ip_hdr(
    buf: &mut Bytes,
    dst: &mut Ipv4Addr,
    dscp: &mut u8,
) -> DecodeResult<()> {
    use arbor_utils::bytes::BytesExt;

    let buf_len = buf.len() as u16;
    if buf_len < 20 {
        return Err(DecodeError::InvalidIpHdrLength(buf_len));
    }

    // Parse IHL (header length).
    let hdr_len = buf.get_u8() & 0x0F;

    // The TOS byte carries the ingress DSCP in its six most significant
    // bits.
    *dscp = buf.get_u8() >> 2;

    // Parse and validate the IP header total length.
    let total_len = buf.get_u16();
    if buf_len != total_len {
        return Err(DecodeError::InvalidIpHdrLength(total_len));
    }

    // Skip to the destination address.
    buf.advance(12);
    *dst = buf.get_ipv4();

    // Move past any IP options.
    let consumed = 20;
    let hdr_total = (hdr_len as usize) << 2;
    if hdr_total < consumed || hdr_total > buf_len as usize {
        return Err(DecodeError::InvalidIpHdrLength(buf_len));
    }
    buf.advance(hdr_total - consumed);

    Ok(())
}
