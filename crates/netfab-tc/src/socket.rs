//! Synchronous NETLINK_ROUTE request socket.

use crate::{TcError, TcResult};
use netlink_packet_core::{
    NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_REQUEST,
};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
use tracing::trace;

const RECV_BUF_LEN: usize = 16384;

/// A blocking netlink socket speaking the NETLINK_ROUTE protocol.
///
/// One request is in flight at a time; replies are matched by sequence
/// number and the ack (or error) terminates the exchange. This is all
/// the control plane needs: it never subscribes to notification groups.
pub struct NlSocket {
    socket: Socket,
    seq: u32,
    buf: Vec<u8>,
}

impl std::fmt::Debug for NlSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NlSocket").field("seq", &self.seq).finish()
    }
}

impl NlSocket {
    /// Opens and connects a NETLINK_ROUTE socket.
    pub fn new() -> TcResult<Self> {
        let mut socket =
            Socket::new(NETLINK_ROUTE).map_err(|e| TcError::socket("open", e))?;
        socket
            .bind_auto()
            .map_err(|e| TcError::socket("bind", e))?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| TcError::socket("connect", e))?;
        Ok(NlSocket {
            socket,
            seq: 0,
            buf: vec![0u8; RECV_BUF_LEN],
        })
    }

    /// Sends one request and drains replies until the kernel acks it.
    ///
    /// `flags` are OR-ed into the header on top of the implied
    /// `NLM_F_REQUEST | NLM_F_ACK`. Replies carrying payload (dump
    /// responses) are returned in order.
    pub fn request(
        &mut self,
        payload: RouteNetlinkMessage,
        flags: u16,
        operation: &str,
    ) -> TcResult<Vec<RouteNetlinkMessage>> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;

        let mut msg = NetlinkMessage::from(payload);
        msg.header.flags = NLM_F_REQUEST | NLM_F_ACK | flags;
        msg.header.sequence_number = seq;
        msg.finalize();

        let mut out = vec![0u8; msg.header.length as usize];
        msg.serialize(&mut out);
        trace!(operation, seq, len = out.len(), "netlink request");
        self.socket
            .send(&out, 0)
            .map_err(|e| TcError::socket("send", e))?;

        let mut replies = Vec::new();
        loop {
            let len = self
                .socket
                .recv(&mut &mut self.buf[..], 0)
                .map_err(|e| TcError::socket("recv", e))?;

            let mut offset = 0;
            while offset < len {
                let reply: NetlinkMessage<RouteNetlinkMessage> =
                    NetlinkMessage::deserialize(&self.buf[offset..len]).map_err(|_| {
                        TcError::Malformed {
                            operation: operation.to_string(),
                        }
                    })?;
                let reply_len = reply.header.length as usize;
                if reply_len == 0 {
                    return Err(TcError::Malformed {
                        operation: operation.to_string(),
                    });
                }
                if reply.header.sequence_number == seq {
                    match reply.payload {
                        NetlinkPayload::Error(err) => {
                            return match err.code {
                                None => Ok(replies),
                                Some(code) => {
                                    Err(TcError::rejected(operation, code.get()))
                                }
                            };
                        }
                        NetlinkPayload::Done(_) => return Ok(replies),
                        NetlinkPayload::InnerMessage(inner) => replies.push(inner),
                        _ => {}
                    }
                }
                offset += reply_len;
            }
        }
    }
}
