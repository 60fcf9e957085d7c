//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use arbor_utils::Sender;
use arbor_utils::socket::{
    SocketExt, TcpConnInfo, TcpListener, TcpSocket, TcpStream, TTL_MAX,
};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::error::SendError;

use crate::debug::Debug;
use crate::error::IoError;
use crate::packet::message::{DecodeCxt, EncodeCxt, Message};
use crate::tasks::messages::input::{
    NbrRxMsg, ProtocolInputMsg, TcpAcceptMsg, TcpConnectMsg,
};

// BGP TCP port.
pub const BGP_PORT: u16 = 179;

// ===== global functions =====

// Creates the TCP listening socket.
pub(crate) fn listen_socket(
    addr: IpAddr,
    port: u16,
) -> Result<TcpListener, std::io::Error> {
    let sockaddr = SocketAddr::from((addr, port));
    let socket = match addr {
        IpAddr::V4(_) => TcpSocket::new_v4()?,
        IpAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(sockaddr)?;
    socket.listen(4096)
}

// Registers an MD5 key for the given peer on the listening socket, so
// inbound SYNs are authenticated by the kernel.
pub(crate) fn listen_socket_md5sig_update(
    listener: &TcpListener,
    nbr_addr: &IpAddr,
    password: Option<&str>,
) {
    if let Err(error) = listener.set_md5sig(nbr_addr, password) {
        IoError::ListenError(error).log();
    }
}

// Accept loop.
pub(crate) async fn listen_loop(
    listener: Arc<TcpListener>,
    session_txp: Sender<ProtocolInputMsg>,
) -> Result<(), SendError<ProtocolInputMsg>> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => match conn_info(&stream) {
                Ok(conn_info) => {
                    session_txp
                        .send(ProtocolInputMsg::TcpAccept(TcpAcceptMsg {
                            stream,
                            conn_info,
                        }))
                        .await?;
                }
                Err(error) => {
                    IoError::TcpInfoError(error).log();
                }
            },
            Err(error) => {
                IoError::AcceptError(error).log();
            }
        }
    }
}

// Initiates an outbound connection to the given peer.
pub(crate) async fn connect(
    remote_addr: IpAddr,
    md5_key: Option<String>,
    session_txp: Sender<ProtocolInputMsg>,
) {
    let result: Result<(TcpStream, TcpConnInfo), IoError> = async {
        let socket = match remote_addr {
            IpAddr::V4(_) => TcpSocket::new_v4(),
            IpAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(IoError::ConnectError)?;
        if md5_key.is_some() {
            socket
                .set_md5sig(&remote_addr, md5_key.as_deref())
                .map_err(IoError::ConnectError)?;
        }
        socket.set_ipv4_ttl(TTL_MAX).ok();

        let sockaddr = SocketAddr::from((remote_addr, BGP_PORT));
        let stream = socket
            .connect(sockaddr)
            .await
            .map_err(IoError::ConnectError)?;
        let conn_info = conn_info(&stream).map_err(IoError::TcpInfoError)?;
        Ok((stream, conn_info))
    }
    .await;

    let msg = match result {
        Ok((stream, conn_info)) => {
            ProtocolInputMsg::TcpConnect(TcpConnectMsg { stream, conn_info })
        }
        Err(error) => {
            error.log();
            ProtocolInputMsg::TcpConnFail(remote_addr)
        }
    };
    let _ = session_txp.send(msg).await;
}

// Neighbor read loop: reassembles and decodes BGP messages from the TCP
// stream.
pub(crate) async fn nbr_read_loop(
    mut read_half: OwnedReadHalf,
    nbr_addr: IpAddr,
    cxt: DecodeCxt,
    session_txp: Sender<ProtocolInputMsg>,
) -> Result<(), SendError<ProtocolInputMsg>> {
    let mut buf = BytesMut::with_capacity(65536);

    loop {
        match read_half.read_buf(&mut buf).await {
            Ok(0) => {
                // Connection closed by the peer.
                session_txp
                    .send(ProtocolInputMsg::TcpConnFail(nbr_addr))
                    .await?;
                return Ok(());
            }
            Ok(_) => {
                // Process all complete messages in the buffer.
                while let Some(msg_len) = Message::get_message_len(&buf) {
                    let msg = Message::decode(&buf[0..msg_len], &cxt);
                    buf.advance(msg_len);
                    let failed = msg.is_err();
                    session_txp
                        .send(ProtocolInputMsg::NbrRx(NbrRxMsg {
                            nbr_addr,
                            msg,
                        }))
                        .await?;
                    if failed {
                        // The session is being torn down.
                        return Ok(());
                    }
                }
            }
            Err(error)
                if error.kind() == std::io::ErrorKind::Interrupted =>
            {
                continue;
            }
            Err(error) => {
                IoError::RecvError(error).log();
                session_txp
                    .send(ProtocolInputMsg::TcpConnFail(nbr_addr))
                    .await?;
                return Ok(());
            }
        }
    }
}

// Neighbor write loop.
pub(crate) async fn nbr_write_loop(
    mut write_half: OwnedWriteHalf,
    nbr_addr: IpAddr,
    cxt: EncodeCxt,
    msg_txc: &mut arbor_utils::UnboundedReceiver<Message>,
) {
    while let Some(msg) = msg_txc.recv().await {
        Debug::NbrMsgTx(&nbr_addr, &msg).log();
        let buf = msg.encode(&cxt);
        if let Err(error) = write_half.write_all(&buf).await {
            IoError::SendError(error).log();
            return;
        }
    }
}

// ===== helper functions =====

fn conn_info(stream: &TcpStream) -> Result<TcpConnInfo, std::io::Error> {
    let local = stream.local_addr()?;
    let remote = stream.peer_addr()?;
    Ok(TcpConnInfo {
        local_addr: local.ip(),
        local_port: local.port(),
        remote_addr: remote.ip(),
        remote_port: remote.port(),
    })
}
