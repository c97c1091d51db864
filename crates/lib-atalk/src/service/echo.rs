use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::constants;
use crate::port::Port;
use crate::router::Router;
use crate::types::Datagram;

use super::Service;

pub const ECHO_FUNC_REQUEST: u8 = 1;
pub const ECHO_FUNC_REPLY: u8 = 2;

/// The AppleTalk Echo responder on socket 4.
#[derive(Debug, Default)]
pub struct EchoService;

impl EchoService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Service for EchoService {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn socket(&self) -> Option<u8> {
        Some(constants::ECHO_SOCKET)
    }

    async fn handle(&self, router: &Router, datagram: Datagram, ingress: &Arc<Port>) {
        if datagram.ddp_type != constants::DDP_TYPE_ECHO
            || datagram.payload.first() != Some(&ECHO_FUNC_REQUEST)
        {
            trace!("ignoring non-echo-request datagram");
            return;
        }

        let Some(our_addr) = ingress.addr(constants::ECHO_SOCKET) else {
            return;
        };

        let mut payload = datagram.payload.clone();
        payload[0] = ECHO_FUNC_REPLY;

        let mut reply = Datagram::new(
            our_addr,
            datagram.src,
            constants::DDP_TYPE_ECHO,
            payload,
        );
        reply.checksummed = datagram.checksummed;
        router.reply_via(reply, ingress).await;
    }
}
