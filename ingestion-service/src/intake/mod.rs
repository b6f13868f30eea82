//! Broker-fed intake.
//!
//! Subscribes one topic filter per device class and routes each delivery by
//! topic. The intake is stateless: a delivery is parsed, validated and
//! enqueued, and only then acknowledged, so the broker's at-least-once
//! guarantee holds up to the point the job is durably queued.

mod mqtt;

pub use mqtt::MqttIntake;

use crate::queue::Stream;
use uuid::Uuid;

pub const METER_TOPIC_FILTER: &str = "telemetry/meter/+";
pub const VEHICLE_TOPIC_FILTER: &str = "telemetry/vehicle/+";

/// Route a publish topic to its stream and device id.
/// `telemetry/meter/<uuid>` and `telemetry/vehicle/<uuid>` are the only
/// recognized shapes.
pub(crate) fn stream_for_topic(topic: &str) -> Option<(Stream, Uuid)> {
    let rest = topic.strip_prefix("telemetry/")?;
    let (class, device) = rest.split_once('/')?;
    if device.contains('/') {
        return None;
    }

    let device_id = Uuid::parse_str(device).ok()?;
    match class {
        "meter" => Some((Stream::Meter, device_id)),
        "vehicle" => Some((Stream::Vehicle, device_id)),
        _ => None,
    }
}

/// Split `mqtt://host:port` (or bare `host:port`, or bare `host`) into the
/// connect pair; the port defaults to 1883.
pub(crate) fn parse_broker_url(url: &str) -> Option<(String, u16)> {
    let rest = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    if rest.is_empty() {
        return None;
    }

    match rest.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((rest.to_string(), 1883)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE: &str = "7f4df052-3bbf-4b27-b1a4-7f8b373c0e65";

    #[test]
    fn routes_meter_and_vehicle_topics() {
        let (stream, id) = stream_for_topic(&format!("telemetry/meter/{DEVICE}")).unwrap();
        assert_eq!(stream, Stream::Meter);
        assert_eq!(id, DEVICE.parse::<Uuid>().unwrap());

        let (stream, _) = stream_for_topic(&format!("telemetry/vehicle/{DEVICE}")).unwrap();
        assert_eq!(stream, Stream::Vehicle);
    }

    #[test]
    fn rejects_unknown_class_and_malformed_topics() {
        assert!(stream_for_topic(&format!("telemetry/charger/{DEVICE}")).is_none());
        assert!(stream_for_topic(&format!("other/meter/{DEVICE}")).is_none());
        assert!(stream_for_topic("telemetry/meter").is_none());
        assert!(stream_for_topic(&format!("telemetry/meter/{DEVICE}/extra")).is_none());
        assert!(stream_for_topic("telemetry/meter/not-a-uuid").is_none());
    }

    #[test]
    fn parses_broker_urls() {
        assert_eq!(
            parse_broker_url("mqtt://broker.fleet:1884"),
            Some(("broker.fleet".to_string(), 1884))
        );
        assert_eq!(
            parse_broker_url("tcp://10.0.0.5:1883"),
            Some(("10.0.0.5".to_string(), 1883))
        );
        assert_eq!(
            parse_broker_url("localhost"),
            Some(("localhost".to_string(), 1883))
        );
        assert_eq!(parse_broker_url("mqtt://host:notaport"), None);
        assert_eq!(parse_broker_url(""), None);
    }
}
