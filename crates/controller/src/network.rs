//! Network reachability. A UDP `connect` asks the kernel for a route to the
//! probe address without sending anything; no route means no uplink.

use std::cell::Cell;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use irrigation_core::link::NetworkStatus;

const RECHECK: Duration = Duration::from_secs(1);

pub struct RouteProbe {
    target: SocketAddr,
    cached: Cell<Option<(Instant, bool)>>,
}

impl RouteProbe {
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            cached: Cell::new(None),
        }
    }

    fn probe(&self) -> bool {
        let bind: SocketAddr = if self.target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        UdpSocket::bind(bind)
            .and_then(|s| s.connect(self.target))
            .is_ok()
    }
}

impl Default for RouteProbe {
    fn default() -> Self {
        Self::new(([8, 8, 8, 8], 53).into())
    }
}

impl NetworkStatus for RouteProbe {
    fn is_connected(&self) -> bool {
        if let Some((at, up)) = self.cached.get() {
            if at.elapsed() < RECHECK {
                return up;
            }
        }
        let up = self.probe();
        self.cached.set(Some((Instant::now(), up)));
        up
    }
}
