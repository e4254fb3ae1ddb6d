//! Timestamps are [`hifitime::Epoch`] values, persisted as signed unix
//! nanoseconds.

use hifitime::Duration;
use hifitime::Epoch;

pub fn now() -> Epoch {
    Epoch::now().expect("system time")
}

/// Nanoseconds since the unix epoch.
pub fn unix_nanos(epoch: &Epoch) -> i128 {
    epoch.to_unix_duration().total_nanoseconds()
}

pub fn from_unix_nanos(nanos: i128) -> Epoch {
    Epoch::from_unix_duration(Duration::from_total_nanoseconds(nanos))
}

/// `#[serde(with = "...")]` adapter storing an [`Epoch`] as unix nanoseconds.
pub mod nanos {
    use hifitime::Epoch;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(epoch: &Epoch, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = i64::try_from(super::unix_nanos(epoch)).map_err(serde::ser::Error::custom)?;
        serializer.serialize_i64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Epoch, D::Error> {
        let nanos = i64::deserialize(deserializer)?;
        Ok(super::from_unix_nanos(nanos as i128))
    }

    pub mod option {
        use hifitime::Epoch;
        use serde::Deserialize;
        use serde::Deserializer;
        use serde::Serializer;

        pub fn serialize<S: Serializer>(
            epoch: &Option<Epoch>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match epoch {
                Some(epoch) => super::serialize(epoch, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Epoch>, D::Error> {
            let nanos = Option::<i64>::deserialize(deserializer)?;
            Ok(nanos.map(|n| super::super::from_unix_nanos(n as i128)))
        }
    }
}
