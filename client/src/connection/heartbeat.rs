//! Liveness budgets.
//!
//! Two countdowns share one ticker. The receive budget is refilled by every
//! inbound frame and kills the connection when it runs out. The send budget
//! is refilled by every outgoing call and, when it runs out, asks the driver
//! to send a cheap probe so an idle connection still produces replies.

/// What the driver should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Beat {
    /// Nothing to do.
    Idle,
    /// The link has been idle on our side; send a keepalive probe.
    Probe,
    /// Nothing arrived for the whole receive budget. Presume dead.
    Dead,
}

#[derive(Debug, Clone)]
pub(crate) struct Heartbeat {
    max_send_life: u32,
    max_recv_life: u32,
    send_life: u32,
    recv_life: u32,
}

impl Heartbeat {
    pub(crate) fn new(max_send_life: u32, max_recv_life: u32) -> Self {
        Self {
            max_send_life,
            max_recv_life,
            send_life: max_send_life,
            recv_life: max_recv_life,
        }
    }

    /// An outgoing call was written.
    pub(crate) fn on_send(&mut self) {
        self.send_life = self.max_send_life;
    }

    /// Any inbound frame arrived.
    pub(crate) fn on_receive(&mut self) {
        self.recv_life = self.max_recv_life;
    }

    /// Refills both budgets, e.g. after a fresh socket was opened.
    pub(crate) fn reset(&mut self) {
        self.on_send();
        self.on_receive();
    }

    pub(crate) fn tick(&mut self) -> Beat {
        self.recv_life = self.recv_life.saturating_sub(1);
        if self.recv_life == 0 {
            return Beat::Dead;
        }

        self.send_life = self.send_life.saturating_sub(1);
        if self.send_life == 0 {
            self.send_life = self.max_send_life;
            return Beat::Probe;
        }

        Beat::Idle
    }
}
