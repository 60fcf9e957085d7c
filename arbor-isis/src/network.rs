//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::io::{IoSlice, IoSliceMut};
use std::ops::Deref;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use arbor_utils::Sender;
use arbor_utils::socket::{AsyncFd, LinkAddrExt, Socket, SocketExt};
use nix::sys::socket::{self, LinkAddr};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::SendError;

use crate::debug::Debug;
use crate::error::IoError;
use crate::packet::LevelNumber;
use crate::packet::pdu::Pdu;
use crate::tasks::messages::input::NetRxPduMsg;
use crate::tasks::messages::output::NetTxPduMsg;

// Ethernet LLC header used by IS-IS over 802.3.
pub const LLC_HDR: [u8; 3] = [0xFE, 0xFE, 0x03];

// IS-IS ethernet multicast addresses.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MulticastAddr {
    AllL1Iss,
    AllL2Iss,
}

// BPF filter accepting IS-IS over LLC only.
const ISIS_BPF_FILTER: [socket2::SockFilter; 6] = [
    // l0: ldh [0]
    bpf_filter_block(0x28, 0, 0, 0x00000000),
    // l1: jeq #0xfefe, l2, l5
    bpf_filter_block(0x15, 0, 3, 0x0000fefe),
    // l2: ldb [3]
    bpf_filter_block(0x30, 0, 0, 0x00000003),
    // l3: jeq #0x83, l4, l5
    bpf_filter_block(0x15, 0, 1, 0x00000083),
    // l4: ret #0x40000
    bpf_filter_block(0x06, 0, 0, 0x00040000),
    // l5: ret #0
    bpf_filter_block(0x06, 0, 0, 0x00000000),
];

const fn bpf_filter_block(
    code: u16,
    jt: u8,
    jf: u8,
    k: u32,
) -> socket2::SockFilter {
    socket2::SockFilter::new(code, jt, jf, k)
}

// ===== impl MulticastAddr =====

impl MulticastAddr {
    pub(crate) const fn as_bytes(&self) -> [u8; 6] {
        match self {
            MulticastAddr::AllL1Iss => [0x01, 0x80, 0xC2, 0x00, 0x00, 0x14],
            MulticastAddr::AllL2Iss => [0x01, 0x80, 0xC2, 0x00, 0x00, 0x15],
        }
    }
}

impl From<LevelNumber> for MulticastAddr {
    fn from(level: LevelNumber) -> MulticastAddr {
        match level {
            LevelNumber::L1 => MulticastAddr::AllL1Iss,
            LevelNumber::L2 => MulticastAddr::AllL2Iss,
        }
    }
}

// ===== global functions =====

// Creates the per-interface raw packet socket and joins the IS-IS
// multicast MAC groups.
pub(crate) fn socket(ifindex: u32) -> Result<Socket, std::io::Error> {
    use socket2::{Domain, Protocol, Type};

    // Create raw socket.
    let socket = Socket::new(
        Domain::PACKET,
        Type::DGRAM,
        Some(Protocol::from(libc::ETH_P_ALL)),
    )?;
    socket.set_nonblocking(true)?;

    // Bind to local interface.
    let sockaddr = LinkAddr::new(libc::ETH_P_ALL as u16, ifindex, None);
    socket::bind(socket.as_raw_fd(), &sockaddr)?;

    // Attach BPF filter.
    socket.attach_filter(&ISIS_BPF_FILTER)?;

    // Join the multicast groups for both levels.
    socket
        .join_packet_multicast(MulticastAddr::AllL1Iss.as_bytes(), ifindex)?;
    socket
        .join_packet_multicast(MulticastAddr::AllL2Iss.as_bytes(), ifindex)?;

    Ok(socket)
}

// Sends a single PDU, prepending the LLC header.
pub(crate) async fn send_pdu(
    socket: &AsyncFd<Socket>,
    ifname: &str,
    ifindex: u32,
    dst: MulticastAddr,
    pdu: &Pdu,
) -> Result<usize, IoError> {
    Debug::PduTx(ifname, pdu).log();

    // Encode PDU.
    let buf = pdu.encode();

    // Send PDU.
    socket
        .async_io(tokio::io::Interest::WRITABLE, |socket| {
            let iov = [IoSlice::new(&LLC_HDR), IoSlice::new(&buf)];
            let sockaddr = LinkAddr::new(
                (LLC_HDR.len() + buf.len()) as u16,
                ifindex,
                Some(dst.as_bytes()),
            );
            socket::sendmsg(
                socket.as_raw_fd(),
                &iov,
                &[],
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
    ifname: String,
    ifindex: u32,
    net_tx_pduc: &mut arbor_utils::UnboundedReceiver<NetTxPduMsg>,
) {
    while let Some(NetTxPduMsg { pdu, dst }) = net_tx_pduc.recv().await {
        if let Err(error) =
            send_pdu(&socket, &ifname, ifindex, dst, &pdu).await
        {
            error.log();
        }
    }
}

// Network Rx loop: receives LLC frames and hands the IS-IS payload to the
// instance.
pub(crate) async fn read_loop(
    socket: Arc<AsyncFd<Socket>>,
    ifname: String,
    net_pdu_rxp: Sender<NetRxPduMsg>,
) -> Result<(), SendError<NetRxPduMsg>> {
    let mut buf = [0; 16384];
    let mut iov = [IoSliceMut::new(&mut buf)];

    loop {
        // Receive data packet.
        match socket
            .async_io(tokio::io::Interest::READABLE, |socket| {
                match socket::recvmsg::<LinkAddr>(
                    socket.as_raw_fd(),
                    &mut iov,
                    None,
                    socket::MsgFlags::empty(),
                ) {
                    Ok(msg) => Ok((msg.address, msg.bytes)),
                    Err(errno) => Err(errno.into()),
                }
            })
            .await
        {
            Ok((src, bytes)) => {
                // Filter out non-IS-IS packets by checking the LLC header.
                if iov[0].deref()[0..3] != LLC_HDR {
                    continue;
                }

                // Extract the source MAC address from the packet metadata.
                let Some(src) = src.as_ref().and_then(|src| src.addr())
                else {
                    IoError::RecvMissingSourceAddr.log();
                    continue;
                };

                // Decode PDU, skipping the LLC header.
                let data = &iov[0].deref()[LLC_HDR.len()..bytes];
                let pdu = Pdu::decode(data);
                let msg = NetRxPduMsg {
                    ifname: ifname.clone(),
                    src,
                    pdu,
                };
                net_pdu_rxp.send(msg).await?;
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
