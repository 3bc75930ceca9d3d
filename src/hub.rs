use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tokio::sync::mpsc;
use tracing::trace;

use crate::packets::Packet;

pub type ConnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    /// Control surface; may issue select/unfeature/resolve/create.
    Dock,
    /// Display surface; receives state only.
    Overlay,
}

impl ClientRole {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "dock" => Some(ClientRole::Dock),
            "overlay" => Some(ClientRole::Overlay),
            _ => None,
        }
    }
}

/// Handle to a connected socket. Frames go through an unbounded sender into
/// the connection's write loop, so every hub operation is non-blocking and
/// per-connection delivery order matches publish order.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: ConnId,
    pub role: ClientRole,
    sender: mpsc::UnboundedSender<String>,
}

impl ClientHandle {
    pub fn new(id: ConnId, role: ClientRole, sender: mpsc::UnboundedSender<String>) -> Self {
        Self { id, role, sender }
    }

    pub fn send(&self, packet: &Packet) {
        if let Ok(frame) = serde_json::to_string(packet) {
            self.send_raw(frame);
        }
    }

    fn send_raw(&self, frame: String) {
        // A failed send means the write loop is gone; the read loop will
        // clean the room up shortly.
        let _ = self.sender.send(frame);
    }
}

/// Room-scoped fan-out over live connections. Membership is rebuilt
/// entirely from live sockets; nothing here is persisted.
#[derive(Default)]
pub struct BroadcastHub {
    rooms: RwLock<HashMap<String, Vec<ClientHandle>>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Add a connection to a channel's room. State replay is the
    /// coordinator's responsibility so it stays atomic with session
    /// mutation; the hub only tracks membership.
    pub fn add(&self, channel: &str, handle: ClientHandle) {
        let mut rooms = self.rooms.write().expect("room lock poisoned");
        rooms.entry(channel.to_string()).or_default().push(handle);
    }

    /// Deliver a packet to every room member except the optional
    /// originator (echo suppression).
    pub fn publish(&self, channel: &str, packet: &Packet, exclude: Option<ConnId>) {
        let rooms = self.rooms.read().expect("room lock poisoned");
        let Some(members) = rooms.get(channel) else {
            return;
        };
        let Ok(frame) = serde_json::to_string(packet) else {
            return;
        };
        trace!(%channel, members = members.len(), "publish");
        for member in members {
            if Some(member.id) == exclude {
                continue;
            }
            member.send_raw(frame.clone());
        }
    }

    /// Remove a connection from all rooms. Idempotent.
    pub fn leave(&self, id: ConnId) {
        let mut rooms = self.rooms.write().expect("room lock poisoned");
        for members in rooms.values_mut() {
            members.retain(|m| m.id != id);
        }
        rooms.retain(|_, members| !members.is_empty());
    }

    pub fn room_size(&self, channel: &str) -> usize {
        self.rooms
            .read()
            .expect("room lock poisoned")
            .get(channel)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn client(hub: &BroadcastHub, role: ClientRole) -> (ClientHandle, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientHandle::new(hub.next_conn_id(), role, tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_publish_reaches_all_room_members() {
        let hub = BroadcastHub::new();
        let (dock, mut dock_rx) = client(&hub, ClientRole::Dock);
        let (overlay, mut overlay_rx) = client(&hub, ClientRole::Overlay);
        hub.add("chan", dock);
        hub.add("chan", overlay);

        hub.publish("chan", &Packet::UnfeatureMarket, None);

        assert_eq!(drain(&mut dock_rx).len(), 1);
        assert_eq!(drain(&mut overlay_rx).len(), 1);
    }

    #[test]
    fn test_publish_excludes_originator() {
        let hub = BroadcastHub::new();
        let (dock, mut dock_rx) = client(&hub, ClientRole::Dock);
        let (overlay, mut overlay_rx) = client(&hub, ClientRole::Overlay);
        let dock_id = dock.id;
        hub.add("chan", dock);
        hub.add("chan", overlay);

        hub.publish("chan", &Packet::SelectMarketId("m1".into()), Some(dock_id));

        assert!(drain(&mut dock_rx).is_empty());
        assert_eq!(drain(&mut overlay_rx).len(), 1);
    }

    #[test]
    fn test_publish_scoped_to_room() {
        let hub = BroadcastHub::new();
        let (a, mut a_rx) = client(&hub, ClientRole::Overlay);
        let (b, mut b_rx) = client(&hub, ClientRole::Overlay);
        hub.add("alpha", a);
        hub.add("beta", b);

        hub.publish("alpha", &Packet::Clear, None);

        assert_eq!(drain(&mut a_rx).len(), 1);
        assert!(drain(&mut b_rx).is_empty());
    }

    #[test]
    fn test_ordering_preserved_per_connection() {
        let hub = BroadcastHub::new();
        let (c, mut rx) = client(&hub, ClientRole::Overlay);
        hub.add("chan", c);

        hub.publish("chan", &Packet::UnfeatureMarket, None);
        hub.publish("chan", &Packet::SelectMarketId("m1".into()), None);
        hub.publish("chan", &Packet::Clear, None);

        let frames = drain(&mut rx);
        assert!(frames[0].contains("unfeature_market"));
        assert!(frames[1].contains("select_market_id"));
        assert!(frames[2].contains("clear"));
    }

    #[test]
    fn test_leave_is_idempotent() {
        let hub = BroadcastHub::new();
        let (c, mut rx) = client(&hub, ClientRole::Overlay);
        let id = c.id;
        hub.add("chan", c);

        hub.leave(id);
        hub.leave(id);
        assert_eq!(hub.room_size("chan"), 0);

        hub.publish("chan", &Packet::Clear, None);
        assert!(drain(&mut rx).is_empty());
    }
}
