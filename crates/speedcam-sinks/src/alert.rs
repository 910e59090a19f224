use anyhow::{Context, Result};
use speedcam_proto::{AlertMessage, SpeedEvent};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::bus::Sink;

/// Best-effort datagram alert for over-speed vehicles. Nothing is retried.
pub struct UdpAlertSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpAlertSink {
    pub async fn bind(bind: &str, target: &str) -> Result<Self> {
        let target: SocketAddr = target.parse().with_context(|| format!("alert target {:?}", target))?;
        let socket = UdpSocket::bind(bind).await.with_context(|| format!("bind {}", bind))?;
        socket.set_broadcast(true).context("enable broadcast")?;
        info!("alert: sending to {}", target);
        Ok(Self { socket, target })
    }

    /// `false` if the event was not over the limit and nothing was sent.
    pub async fn send(&self, ev: &SpeedEvent) -> Result<bool> {
        let Some(msg) = AlertMessage::from_event(ev) else {
            return Ok(false);
        };
        let body = serde_json::to_vec(&msg)?;
        self.socket
            .send_to(&body, self.target)
            .await
            .with_context(|| format!("send to {}", self.target))?;
        debug!("alert: track {} at {:.1} {}", ev.track_id, ev.speed, ev.unit.label());
        Ok(true)
    }
}

impl Sink for UdpAlertSink {
    fn name(&self) -> &'static str {
        "alert"
    }

    async fn handle(&mut self, ev: &SpeedEvent) -> Result<()> {
        self.send(ev).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::event;
    use speedcam_proto::{VehicleColor, STATUS_SLOW_DOWN};
    use std::time::Duration;

    #[tokio::test]
    async fn only_over_speed_is_sent() {
        let rx = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = rx.local_addr().unwrap().to_string();
        let sink = UdpAlertSink::bind("127.0.0.1:0", &target).await.unwrap();

        assert!(!sink.send(&event(1, VehicleColor::Green, 9.0, false)).await.unwrap());
        assert!(sink.send(&event(2, VehicleColor::Yellow, 44.0, true)).await.unwrap());

        let mut buf = [0u8; 512];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), rx.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let msg: AlertMessage = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(msg.color, VehicleColor::Yellow);
        assert_eq!(msg.speed, 44.0);
        assert_eq!(msg.msg, STATUS_SLOW_DOWN);

        // the under-limit event never arrives
        assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv_from(&mut buf)).await.is_err());
    }

    #[tokio::test]
    async fn bad_target_is_rejected() {
        assert!(UdpAlertSink::bind("127.0.0.1:0", "not-an-addr").await.is_err());
    }
}
