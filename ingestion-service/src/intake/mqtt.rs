use std::time::Duration;

use anyhow::anyhow;
use fleet_client::domain::{MeterSample, VehicleSample};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, Publish, QoS};
use tokio::sync::watch;

use super::{parse_broker_url, stream_for_topic, METER_TOPIC_FILTER, VEHICLE_TOPIC_FILTER};
use crate::config::MqttConfig;
use crate::queue::{DurableQueue, Stream};
use crate::transform;
use uuid::Uuid;

const RECONNECT_MIN: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

pub struct MqttIntake {
    cfg: MqttConfig,
    queue: DurableQueue,
    shutdown: watch::Receiver<bool>,
}

impl MqttIntake {
    pub fn new(cfg: MqttConfig, queue: DurableQueue, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            cfg,
            queue,
            shutdown,
        }
    }

    /// Poll the broker until shutdown. Acks are manual: an invalid delivery
    /// is acked and dropped, a valid one is acked only after the queue took
    /// it, and an enqueue failure leaves it unacked so the broker redelivers.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let (host, port) = parse_broker_url(&self.cfg.broker_url)
            .ok_or_else(|| anyhow!("invalid broker url '{}'", self.cfg.broker_url))?;

        let mut options = MqttOptions::new(self.cfg.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(self.cfg.keep_alive_secs));
        options.set_manual_acks(true);
        options.set_clean_session(false);

        let (client, mut eventloop) = AsyncClient::new(options, self.cfg.channel_capacity);
        let mut reconnect_delay = RECONNECT_MIN;

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("intake stopping, disconnecting from broker");
                    let _ = client.disconnect().await;
                    return Ok(());
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        reconnect_delay = RECONNECT_MIN;
                        tracing::info!(broker = %self.cfg.broker_url, "connected to broker, subscribing");
                        client.subscribe(METER_TOPIC_FILTER, QoS::AtLeastOnce).await?;
                        client.subscribe(VEHICLE_TOPIC_FILTER, QoS::AtLeastOnce).await?;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.handle_publish(&client, publish).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            retry_in_ms = reconnect_delay.as_millis() as u64,
                            "broker connection error, will reconnect"
                        );
                        tokio::time::sleep(reconnect_delay).await;
                        reconnect_delay = (reconnect_delay * 2).min(RECONNECT_MAX);
                    }
                }
            }
        }
    }

    async fn handle_publish(&self, client: &AsyncClient, publish: Publish) {
        let Some((stream, device_id)) = stream_for_topic(&publish.topic) else {
            tracing::warn!(topic = %publish.topic, "delivery on unroutable topic, dropping");
            metrics::counter!("intake_dropped_invalid_total", "stream" => "unknown").increment(1);
            self.ack(client, &publish).await;
            return;
        };

        let enqueue_result = match stream {
            Stream::Meter => match decode_meter(&publish.payload, device_id) {
                Ok(sample) => Some(self.queue.enqueue(stream, &sample).await),
                Err(reason) => {
                    self.drop_invalid(stream, &publish, &reason);
                    None
                }
            },
            Stream::Vehicle => match decode_vehicle(&publish.payload, device_id) {
                Ok(sample) => Some(self.queue.enqueue(stream, &sample).await),
                Err(reason) => {
                    self.drop_invalid(stream, &publish, &reason);
                    None
                }
            },
        };

        match enqueue_result {
            // Invalid sample: already counted, ack so the broker stops
            // redelivering something that can never become valid.
            None => self.ack(client, &publish).await,
            Some(Ok(())) => {
                metrics::counter!("intake_accepted_total", "stream" => stream.as_str()).increment(1);
                self.ack(client, &publish).await;
            }
            Some(Err(e)) => {
                metrics::counter!("intake_enqueue_failed_total", "stream" => stream.as_str())
                    .increment(1);
                tracing::warn!(
                    stream = %stream,
                    error = %e,
                    "enqueue failed, leaving delivery unacked for redelivery"
                );
            }
        }
    }

    fn drop_invalid(&self, stream: Stream, publish: &Publish, reason: &str) {
        metrics::counter!("intake_dropped_invalid_total", "stream" => stream.as_str()).increment(1);
        tracing::warn!(
            stream = %stream,
            topic = %publish.topic,
            reason,
            "dropping invalid telemetry sample"
        );
    }

    async fn ack(&self, client: &AsyncClient, publish: &Publish) {
        if let Err(e) = client.ack(publish).await {
            tracing::warn!(error = %e, "failed to ack delivery");
        }
    }
}

fn decode_meter(payload: &[u8], topic_device: Uuid) -> Result<MeterSample, String> {
    let sample: MeterSample =
        serde_json::from_slice(payload).map_err(|e| format!("malformed payload: {e}"))?;
    if sample.meter_id != topic_device {
        return Err("payload meterId does not match topic device id".to_string());
    }
    transform::validate_meter(sample).map_err(|e| e.to_string())
}

fn decode_vehicle(payload: &[u8], topic_device: Uuid) -> Result<VehicleSample, String> {
    let sample: VehicleSample =
        serde_json::from_slice(payload).map_err(|e| format!("malformed payload: {e}"))?;
    if sample.vehicle_id != topic_device {
        return Err("payload vehicleId does not match topic device id".to_string());
    }
    transform::validate_vehicle(sample).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE: &str = "7f4df052-3bbf-4b27-b1a4-7f8b373c0e65";

    fn device() -> Uuid {
        DEVICE.parse().unwrap()
    }

    #[test]
    fn decodes_valid_meter_payload() {
        let payload = format!(
            r#"{{ "meterId": "{DEVICE}", "kwhConsumedAc": 12.5, "voltage": 230.0,
                 "timestamp": "2026-03-01T08:30:00Z" }}"#
        );
        let sample = decode_meter(payload.as_bytes(), device()).unwrap();
        assert_eq!(sample.kwh_consumed_ac, 12.5);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = decode_meter(b"not json", device()).unwrap_err();
        assert!(err.contains("malformed payload"));
    }

    #[test]
    fn rejects_device_id_mismatch() {
        let payload = format!(
            r#"{{ "meterId": "{DEVICE}", "kwhConsumedAc": 12.5, "voltage": 230.0,
                 "timestamp": "2026-03-01T08:30:00Z" }}"#
        );
        let err = decode_meter(payload.as_bytes(), Uuid::nil()).unwrap_err();
        assert!(err.contains("does not match topic"));
    }

    #[test]
    fn rejects_out_of_range_vehicle_sample() {
        let payload = format!(
            r#"{{ "vehicleId": "{DEVICE}", "soc": 120.0, "kwhDeliveredDc": 1.0,
                 "batteryTemp": 20.0, "timestamp": "2026-03-01T08:30:00Z" }}"#
        );
        let err = decode_vehicle(payload.as_bytes(), device()).unwrap_err();
        assert!(err.contains("soc"));
    }
}
