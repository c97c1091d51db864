use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace};

use crate::constants;
use crate::types::{
    Datagram, LlapFrame, LLAP_TYPE_ACK, LLAP_TYPE_DDP_LONG, LLAP_TYPE_DDP_SHORT, LLAP_TYPE_ENQ,
};

use super::{InboundFrame, LinkAddr, LinkDest, LinkDriver, LinkError, LinkEvent};

/// Host-to-modem command prefixes.
const CMD_FRAME: u8 = 0x01;
const CMD_NODE_MASK: u8 = 0x02;

/// The escape byte and its codes. A literal escape byte in frame data is
/// doubled up as ESC LITERAL; ESC DONE terminates a frame; ESC ABORT means
/// the modem gave up on the frame in progress.
const ESC: u8 = 0x00;
const ESC_LITERAL: u8 = 0xFF;
const ESC_DONE: u8 = 0xFD;
const ESC_ABORT: u8 = 0xFE;

/// Escape-encode one LLAP frame for the modem, with the frame command
/// prefix and the end marker.
pub fn encode_modem_frame(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() + 4);
    out.push(CMD_FRAME);
    for b in frame {
        if *b == ESC {
            out.push(ESC);
            out.push(ESC_LITERAL);
        } else {
            out.push(*b);
        }
    }
    out.push(ESC);
    out.push(ESC_DONE);
    out
}

/// Incremental decoder for the modem-to-host byte stream.
#[derive(Debug, Default)]
pub struct ModemFrameDecoder {
    buf: Vec<u8>,
    escaped: bool,
}

impl ModemFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; returns a complete LLAP frame when one ends here.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        if self.escaped {
            self.escaped = false;
            match byte {
                ESC_LITERAL => self.buf.push(ESC),
                ESC_DONE => return Some(std::mem::take(&mut self.buf)),
                _ => {
                    // ESC_ABORT and unknown codes discard the frame so far.
                    self.buf.clear();
                }
            }
        } else if byte == ESC {
            self.escaped = true;
        } else {
            self.buf.push(byte);
            if self.buf.len() > 3 + constants::MAX_LINK_PAYLOAD {
                self.buf.clear();
            }
        }
        None
    }
}

struct ReaderState<R> {
    reader: R,
    decoder: ModemFrameDecoder,

    /// Frames decoded but not yet handed upward; one read may complete
    /// several.
    frames: VecDeque<Vec<u8>>,
}

/// LocalTalk behind an external packet modem on a serial byte pipe. The
/// modem delivers and accepts whole LLAP frames under the escape encoding
/// above; serial port setup belongs to the caller.
pub struct TashtalkDriver<R, W> {
    reader: AsyncMutex<ReaderState<R>>,
    writer: AsyncMutex<W>,
    bound: Mutex<Option<u8>>,
}

impl<R, W> TashtalkDriver<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: AsyncMutex::new(ReaderState {
                reader,
                decoder: ModemFrameDecoder::new(),
                frames: VecDeque::new(),
            }),
            writer: AsyncMutex::new(writer),
            bound: Mutex::new(None),
        }
    }

    fn bound_node(&self) -> Option<u8> {
        *self.bound.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn transmit(&self, frame: &LlapFrame) -> Result<(), LinkError> {
        let encoded = encode_modem_frame(&frame.encode());
        let mut writer = self.writer.lock().await;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<R, W> LinkDriver for TashtalkDriver<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn kind(&self) -> &'static str {
        "tashtalk"
    }

    fn max_payload(&self) -> usize {
        constants::MAX_LINK_PAYLOAD
    }

    async fn bind(&self, _network: u16, node: u8) {
        *self.bound.lock().unwrap_or_else(|e| e.into_inner()) = Some(node);

        // Give the modem the node mask so it acknowledges on our behalf at
        // line speed.
        let mut cmd = [0u8; 33];
        cmd[0] = CMD_NODE_MASK;
        cmd[1 + (node as usize) / 8] = 1 << (node % 8);
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.write_all(&cmd).await {
            debug!(%err, "node mask command failed");
        }
    }

    async fn recv(&self) -> Result<LinkEvent, LinkError> {
        let mut state = self.reader.lock().await;
        let mut chunk = [0u8; 512];
        loop {
            while let Some(raw) = state.frames.pop_front() {
                let frame = match LlapFrame::parse(&raw) {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(%err, "bad llap frame from modem");
                        continue;
                    }
                };

                match frame.kind {
                    LLAP_TYPE_DDP_SHORT => {
                        return Ok(LinkEvent::Inbound(InboundFrame {
                            ddp: frame.payload,
                            llap: Some((frame.src, frame.dst)),
                            src: LinkAddr::Node(frame.src),
                        }))
                    }
                    LLAP_TYPE_DDP_LONG => {
                        return Ok(LinkEvent::Inbound(InboundFrame {
                            ddp: frame.payload,
                            llap: None,
                            src: LinkAddr::Node(frame.src),
                        }))
                    }
                    LLAP_TYPE_ENQ => {
                        if Some(frame.dst) == self.bound_node() {
                            // The writer has its own lock, so defending here
                            // is safe while the reader stays held.
                            let ack = LlapFrame::control(frame.src, frame.dst, LLAP_TYPE_ACK);
                            self.transmit(&ack).await?;
                        }
                        return Ok(LinkEvent::Claimed {
                            network: 0,
                            node: frame.src,
                        });
                    }
                    LLAP_TYPE_ACK => {
                        return Ok(LinkEvent::Claimed {
                            network: 0,
                            node: frame.src,
                        })
                    }
                    other => trace!(kind = other, "unhandled llap frame type"),
                }
            }

            let n = state.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(LinkError::Closed);
            }
            for byte in &chunk[..n] {
                if let Some(frame) = state.decoder.push(*byte) {
                    state.frames.push_back(frame);
                }
            }
        }
    }

    async fn probe(&self, _network: u16, node: u8) -> Result<(), LinkError> {
        self.transmit(&LlapFrame::control(node, node, LLAP_TYPE_ENQ))
            .await
    }

    async fn send_ddp(&self, datagram: &Datagram, dest: LinkDest) -> Result<(), LinkError> {
        let ddp = datagram
            .encode_long()
            .map_err(|_| LinkError::FrameTooLarge)?;
        if ddp.len() > self.max_payload() {
            return Err(LinkError::FrameTooLarge);
        }

        let dst_node = match dest {
            LinkDest::Unicast { node, .. } if node != constants::BROADCAST_NODE => node,
            _ => constants::BROADCAST_NODE,
        };
        let src_node = self.bound_node().unwrap_or(datagram.src.node);
        self.transmit(&LlapFrame::data(dst_node, src_node, LLAP_TYPE_DDP_LONG, ddp))
            .await
    }
}
