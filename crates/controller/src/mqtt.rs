//! MQTT-backed cloud backend. Backend paths map onto topics under the device
//! root; `set` publishes retained so the latest value is what a new
//! subscriber sees, `push` publishes a plain message per entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use irrigation_core::link::{Backend, StreamEvent};
use irrigation_core::LinkError;
use rumqttc::{AsyncClient, ClientError, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Full topic for a backend path: "<root>/<path>".
pub(crate) fn topic(root: &str, path: &str) -> String {
    let root = root.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        root.to_string()
    } else {
        format!("{root}/{path}")
    }
}

/// Path of `topic` relative to a subscribed `base` topic: "/" for the base
/// itself, "/<rest>" below it, `None` outside it.
pub(crate) fn stream_path(base: &str, topic: &str) -> Option<String> {
    let rest = topic.strip_prefix(base)?;
    if rest.is_empty() {
        Some("/".to_string())
    } else if rest.starts_with('/') {
        Some(rest.to_string())
    } else {
        None
    }
}

fn publish_error(e: ClientError) -> LinkError {
    LinkError::Transport(format!("mqtt publish: {e}"))
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

pub struct MqttBackend {
    client: AsyncClient,
    root: String,
    connected: Arc<AtomicBool>,
    bases: Arc<Mutex<Vec<String>>>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl MqttBackend {
    /// Build the client and spawn the event loop on the current runtime. The
    /// loop reconnects on its own; readiness follows the broker session.
    pub fn connect(cfg: &MqttConfig, root: &str) -> Self {
        let mut mqttoptions = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        mqttoptions.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);
        let connected = Arc::new(AtomicBool::new(false));
        let bases: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let (tx, events) = mpsc::unbounded_channel();

        let loop_connected = Arc::clone(&connected);
        let loop_bases = Arc::clone(&bases);
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        let path = loop_bases.lock().ok().and_then(|bases| {
                            bases.iter().find_map(|b| stream_path(b, &p.topic))
                        });
                        let Some(path) = path else {
                            debug!(topic = %p.topic, "mqtt: unhandled topic");
                            continue;
                        };
                        let payload = String::from_utf8_lossy(&p.payload).into_owned();
                        if tx.send(StreamEvent { path, payload }).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt connected");
                        loop_connected.store(true, Ordering::SeqCst);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("mqtt disconnected");
                        loop_connected.store(false, Ordering::SeqCst);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if loop_connected.swap(false, Ordering::SeqCst) {
                            warn!("mqtt error: {e}. reconnecting...");
                        } else {
                            debug!("mqtt still unreachable: {e}");
                        }
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Self {
            client,
            root: root.to_string(),
            connected,
            bases,
            events,
        }
    }

    async fn publish(&self, path: &str, body: &Value, retain: bool) -> Result<(), LinkError> {
        if !self.is_ready() {
            return Err(LinkError::Offline);
        }
        let payload =
            serde_json::to_vec(body).map_err(|e| LinkError::Decode(format!("encode body: {e}")))?;
        self.client
            .publish(topic(&self.root, path), QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(publish_error)
    }
}

impl Backend for MqttBackend {
    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn push(&mut self, path: &str, body: &Value) -> Result<(), LinkError> {
        self.publish(path, body, false).await
    }

    async fn set(&mut self, path: &str, body: &Value) -> Result<(), LinkError> {
        self.publish(path, body, true).await
    }

    async fn subscribe(&mut self, path: &str) -> Result<(), LinkError> {
        let base = topic(&self.root, path);
        if let Ok(mut bases) = self.bases.lock() {
            if !bases.contains(&base) {
                bases.push(base.clone());
            }
        }
        for filter in [base.clone(), format!("{base}/#")] {
            self.client
                .subscribe(filter, QoS::AtLeastOnce)
                .await
                .map_err(|e| LinkError::Transport(format!("mqtt subscribe: {e}")))?;
        }
        info!(topic = %base, "subscribed to control stream");
        Ok(())
    }

    fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.try_recv().ok()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- topic --------------------------------------------------------------

    #[test]
    fn topic_joins_root_and_path() {
        assert_eq!(
            topic("IrrigationSystem/ESP1", "sensors/current"),
            "IrrigationSystem/ESP1/sensors/current"
        );
    }

    #[test]
    fn topic_tolerates_stray_slashes() {
        assert_eq!(topic("farm/", "/controls/current"), "farm/controls/current");
        assert_eq!(topic("farm", ""), "farm");
    }

    // -- stream_path --------------------------------------------------------

    #[test]
    fn stream_path_for_base_topic() {
        assert_eq!(
            stream_path("farm/controls/current", "farm/controls/current"),
            Some("/".into())
        );
    }

    #[test]
    fn stream_path_for_child_topic() {
        assert_eq!(
            stream_path("farm/controls/current", "farm/controls/current/pump_state"),
            Some("/pump_state".into())
        );
    }

    #[test]
    fn stream_path_rejects_sibling_prefix() {
        assert_eq!(
            stream_path("farm/controls/current", "farm/controls/currently"),
            None
        );
    }

    #[test]
    fn stream_path_rejects_other_topics() {
        assert_eq!(stream_path("farm/controls/current", "farm/sensors/current"), None);
    }

    // -- backend ------------------------------------------------------------

    #[tokio::test]
    async fn unconnected_backend_reports_offline() {
        let cfg = MqttConfig {
            host: "127.0.0.1".into(),
            port: 1,
            ..MqttConfig::default()
        };
        let mut backend = MqttBackend::connect(&cfg, "farm");
        assert!(!backend.is_ready());
        let err = backend
            .push("sensors/history/2024-05-01", &serde_json::json!({"a": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Offline));
        assert!(backend.next_event().is_none());
    }
}
