/// Topic naming and matching
///
/// Topic names are pure functions of fleet, device and purpose, so publishers
/// and the bridge agree without a shared routing table.
///
/// Canonical shapes:
/// - `/<fleet>/<device_id>/telemetry/<sensor_type>`
/// - `/<fleet>/<device_id>/cmd_vel`
/// - `/<fleet>/<device_id>/navigation_goal`

pub const TELEMETRY_SEGMENT: &str = "telemetry";
pub const CMD_VEL_SEGMENT: &str = "cmd_vel";
pub const NAVIGATION_GOAL_SEGMENT: &str = "navigation_goal";

pub fn telemetry_topic(fleet: &str, device_id: &str, sensor_type: &str) -> String {
    format!("/{}/{}/{}/{}", fleet, device_id, TELEMETRY_SEGMENT, sensor_type)
}

pub fn cmd_vel_topic(fleet: &str, device_id: &str) -> String {
    format!("/{}/{}/{}", fleet, device_id, CMD_VEL_SEGMENT)
}

pub fn navigation_goal_topic(fleet: &str, device_id: &str) -> String {
    format!("/{}/{}/{}", fleet, device_id, NAVIGATION_GOAL_SEGMENT)
}

/// Pattern matching telemetry of every device and sensor in a fleet
pub fn telemetry_filter(fleet: &str) -> String {
    format!("/{}/+/{}/+", fleet, TELEMETRY_SEGMENT)
}

/// Device and sensor parsed from a telemetry topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryTopic {
    pub fleet: String,
    pub device_id: String,
    pub sensor_type: String,
}

/// Parse `/<fleet>/<device_id>/telemetry/<sensor_type>`
pub fn parse_telemetry_topic(topic: &str) -> Option<TelemetryTopic> {
    let parts: Vec<&str> = topic.trim_start_matches('/').split('/').collect();
    match parts.as_slice() {
        [fleet, device_id, segment, sensor_type]
            if *segment == TELEMETRY_SEGMENT
                && !fleet.is_empty()
                && !device_id.is_empty()
                && !sensor_type.is_empty() =>
        {
            Some(TelemetryTopic {
                fleet: fleet.to_string(),
                device_id: device_id.to_string(),
                sensor_type: sensor_type.to_string(),
            })
        }
        _ => None,
    }
}

/// MQTT-style match: `+` is exactly one level, a trailing `#` is the remainder
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic == filter || filter == "#" {
        return true;
    }

    let mut topic_parts = topic.split('/');
    for level in filter.split('/') {
        if level == "#" {
            return true;
        }
        match topic_parts.next() {
            Some(part) if level == "+" || level == part => continue,
            _ => return false,
        }
    }

    topic_parts.next().is_none()
}
