use crossbeam::channel::{Receiver, Sender, unbounded};

use super::{Payload, Transport};
use crate::error::{DrError, Result};

/// The transport of a single-rank group.
///
/// Collectives over a group of one never communicate; messages a rank sends
/// to itself are queued and handed back by `recv`.
pub struct SelfTransport {
    tx: Sender<Payload>,
    rx: Receiver<Payload>,
}

impl SelfTransport {
    /// Creates the transport for rank 0 of a group of size 1.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    fn check_peer(op: &'static str, peer: usize) -> Result<()> {
        if peer != 0 {
            return Err(DrError::collective(
                op,
                format!("rank {peer} does not exist in a single-rank group"),
            ));
        }
        Ok(())
    }
}

impl Default for SelfTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SelfTransport {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, dst: usize, payload: Payload) -> Result<()> {
        Self::check_peer("send", dst)?;
        self.tx
            .send(payload)
            .map_err(|err| DrError::collective("send", err.to_string()))
    }

    fn recv(&self, src: usize) -> Result<Payload> {
        Self::check_peer("recv", src)?;
        self.rx
            .try_recv()
            .map_err(|err| DrError::collective("recv", err.to_string()))
    }
}
