use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Number of ranging sensors in one anchor set.
pub const SENSOR_COUNT: usize = 3;

/// Identifier of one of the three fixed ranging sensors (`1`, `2` or `3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct SensorId(u8);

impl SensorId {
    pub const ONE: SensorId = SensorId(1);
    pub const TWO: SensorId = SensorId(2);
    pub const THREE: SensorId = SensorId(3);

    /// All sensor ids in ascending order.
    pub const ALL: [SensorId; SENSOR_COUNT] = [Self::ONE, Self::TWO, Self::THREE];

    /// Zero-based slot index (`0..3`).
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for SensorId {
    type Error = FuseError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        match raw {
            1..=3 => Ok(SensorId(raw as u8)),
            other => Err(FuseError::InvalidReading(format!(
                "sensor id {other} is not one of 1, 2, 3"
            ))),
        }
    }
}

impl From<SensorId> for u8 {
    fn from(id: SensorId) -> u8 {
        id.0
    }
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inbound wire payload published by a sensor node: `{ "id": 1, "d": 93.4 }`.
///
/// Only a JSON object is accepted.  `id` may be written as any integral
/// number (`1` or `1.0`); value ranges are checked when the payload is
/// converted into a [`SensorReading`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorPayload {
    pub id: i64,
    pub d: f64,
}

impl<'de> Deserialize<'de> for SensorPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(PayloadVisitor)
    }
}

struct PayloadVisitor;

impl<'de> serde::de::Visitor<'de> for PayloadVisitor {
    type Value = SensorPayload;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("an object with numeric fields `id` and `d`")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        use serde::de::{Error, IgnoredAny, Unexpected};

        let mut id: Option<f64> = None;
        let mut d: Option<f64> = None;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "id" if id.is_some() => return Err(A::Error::duplicate_field("id")),
                "d" if d.is_some() => return Err(A::Error::duplicate_field("d")),
                "id" => id = Some(map.next_value()?),
                "d" => d = Some(map.next_value()?),
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        let id = id.ok_or_else(|| A::Error::missing_field("id"))?;
        let d = d.ok_or_else(|| A::Error::missing_field("d"))?;
        if !id.is_finite() || id.fract() != 0.0 {
            return Err(A::Error::invalid_value(Unexpected::Float(id), &"an integral sensor id"));
        }
        Ok(SensorPayload { id: id as i64, d })
    }
}

/// A validated distance report from one sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub sensor: SensorId,
    /// Raw distance as reported, before any offset is applied.
    pub distance: f64,
}

impl SensorReading {
    /// Build a reading, rejecting unknown sensor ids and distances that are
    /// negative, NaN or infinite.
    pub fn new(id: i64, distance: f64) -> Result<Self, FuseError> {
        let sensor = SensorId::try_from(id)?;
        if !distance.is_finite() || distance < 0.0 {
            return Err(FuseError::InvalidReading(format!(
                "distance {distance} from sensor {sensor} is not a non-negative number"
            )));
        }
        Ok(Self { sensor, distance })
    }
}

impl TryFrom<SensorPayload> for SensorReading {
    type Error = FuseError;

    fn try_from(payload: SensorPayload) -> Result<Self, Self::Error> {
        SensorReading::new(payload.id, payload.d)
    }
}

/// Round to two decimal places.
///
/// Every accepted coordinate and every emitted field goes through this, so
/// statistics derived from history are reproducible.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// A point produced by one successful trilateration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Distance of the point from the origin (sensor 1).
    pub fn radius(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn rounded(self) -> Self {
        Self::new(round2(self.x), round2(self.y), round2(self.z))
    }
}

/// Windowed-average position plus error radius, emitted once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: f64,
}

impl FusedResult {
    /// Emitted when no valid point was accumulated during the interval.
    pub const SENTINEL: FusedResult = FusedResult { x: 0.0, y: 0.0, z: 0.0, r: 0.0 };

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }

    pub fn rounded(self) -> Self {
        Self {
            x: round2(self.x),
            y: round2(self.y),
            z: round2(self.z),
            r: round2(self.r),
        }
    }
}

/// Outbound wire payload: `{ "deviceID": 1, "data": { "x", "y", "z", "r" } }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "deviceID")]
    pub device_id: u32,
    pub data: FusedResult,
}

impl OutboundMessage {
    /// Wrap `result` for `device_id`, rounding all four fields to two
    /// decimals.
    pub fn new(device_id: u32, result: FusedResult) -> Self {
        Self {
            device_id,
            data: result.rounded(),
        }
    }
}

/// Console verbosity selected in configuration. Has no effect on computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum LogLevel {
    /// Every state transition and intermediate value.
    #[default]
    Verbose,
    /// Informational messages, warnings and results.
    Results,
    /// Errors and results only.
    Minimal,
}

impl From<String> for LogLevel {
    /// Unknown names fall back to [`LogLevel::Verbose`].
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "results" => LogLevel::Results,
            "minimal" => LogLevel::Minimal,
            _ => LogLevel::Verbose,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Verbose => write!(f, "verbose"),
            LogLevel::Results => write!(f, "results"),
            LogLevel::Minimal => write!(f, "minimal"),
        }
    }
}

/// Unified event wrapper for the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "rangefuse-cli::stdin"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Raw, still-unparsed message text as delivered by a sensor transport.
    SensorMessage(String),
    /// A periodic fused position ready for the downstream consumer.
    FusedPosition(OutboundMessage),
    /// A sensor stopped (or resumed) reporting.
    SensorLiveness { sensor: SensorId, alive: bool },
}

/// Global error type for the fusion stack.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FuseError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("I/O error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_id_accepts_only_one_to_three() {
        assert_eq!(SensorId::try_from(2_i64).map(SensorId::get), Ok(2));
        assert!(SensorId::try_from(0_i64).is_err());
        assert!(SensorId::try_from(4_i64).is_err());
        assert!(SensorId::try_from(-1_i64).is_err());
    }

    #[test]
    fn sensor_id_index_is_zero_based() {
        let indices: Vec<usize> = SensorId::ALL.iter().map(|id| id.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn reading_rejects_negative_and_non_finite_distances() {
        assert!(SensorReading::new(1, 0.0).is_ok());
        assert!(SensorReading::new(1, -0.5).is_err());
        assert!(SensorReading::new(1, f64::NAN).is_err());
        assert!(SensorReading::new(1, f64::INFINITY).is_err());
    }

    #[test]
    fn payload_with_wrong_field_type_fails_to_parse() {
        assert!(serde_json::from_str::<SensorPayload>(r#"{"id":"1","d":2.0}"#).is_err());
        assert!(serde_json::from_str::<SensorPayload>(r#"{"id":1}"#).is_err());
        let ok: SensorPayload = serde_json::from_str(r#"{"id":3,"d":42}"#).unwrap();
        assert_eq!(ok, SensorPayload { id: 3, d: 42.0 });
    }

    #[test]
    fn payload_must_be_an_object() {
        assert!(serde_json::from_str::<SensorPayload>("[1, 90]").is_err());
        assert!(serde_json::from_str::<SensorPayload>("90").is_err());
        assert!(serde_json::from_str::<SensorPayload>(r#"{"id":1,"id":2,"d":5}"#).is_err());
    }

    #[test]
    fn payload_id_accepts_integral_floats_only() {
        let ok: SensorPayload = serde_json::from_str(r#"{"id":1.0,"d":90}"#).unwrap();
        assert_eq!(ok, SensorPayload { id: 1, d: 90.0 });
        assert!(serde_json::from_str::<SensorPayload>(r#"{"id":1.5,"d":90}"#).is_err());
        let extra: SensorPayload = serde_json::from_str(r#"{"id":2,"d":7,"rssi":-60}"#).unwrap();
        assert_eq!(extra.id, 2);
    }

    #[test]
    fn round2_keeps_two_decimals() {
        assert_eq!(round2(101.22839275618279), 101.23);
        assert_eq!(round2(19.25), 19.25);
        assert_eq!(round2(-3.14159), -3.14);
    }

    #[test]
    fn outbound_message_uses_device_id_key_and_rounds() {
        let msg = OutboundMessage::new(
            1,
            FusedResult { x: 61.504, y: 19.2549, z: 101.228, r: 30.126 },
        );
        let json = serde_json::to_value(msg).unwrap();
        assert_eq!(json["deviceID"], 1);
        assert_eq!(json["data"]["x"], 61.5);
        assert_eq!(json["data"]["y"], 19.25);
        assert_eq!(json["data"]["z"], 101.23);
        assert_eq!(json["data"]["r"], 30.13);
    }

    #[test]
    fn sentinel_serializes_to_zeros() {
        let msg = OutboundMessage::new(7, FusedResult::SENTINEL);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"deviceID":7,"data":{"x":0.0,"y":0.0,"z":0.0,"r":0.0}}"#);
        assert!(msg.data.is_sentinel());
    }

    #[test]
    fn log_level_parses_leniently() {
        assert_eq!(LogLevel::from("results".to_string()), LogLevel::Results);
        assert_eq!(LogLevel::from("MINIMAL".to_string()), LogLevel::Minimal);
        assert_eq!(LogLevel::from("chatty".to_string()), LogLevel::Verbose);
        let parsed: LogLevel = serde_json::from_str(r#""minimal""#).unwrap();
        assert_eq!(parsed, LogLevel::Minimal);
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new("rangefuse-cli::stdin", EventPayload::SensorMessage(r#"{"id":1,"d":5}"#.into()));
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
    }

    #[test]
    fn fuse_error_display() {
        let err = FuseError::InvalidConfig("anchor a must be non-zero".into());
        assert!(err.to_string().contains("Invalid configuration"));
    }
}
