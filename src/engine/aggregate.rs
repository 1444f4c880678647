//! Results of calls fanned out to every service.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{JsonError, StorageError};

/// One service's outcome inside an aggregate reply.
///
/// Successes serialise as the bare value, failures as `{"error": ...}`.
/// Failures are tried first when decoding.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServiceResult<T> {
    /// The service failed; other services are unaffected.
    Err {
        /// Structured failure.
        error: JsonError,
    },
    /// The service answered.
    Ok(T),
}

impl<T> ServiceResult<T> {
    /// The successful value, if any.
    #[must_use]
    pub const fn ok(&self) -> Option<&T> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Err { .. } => None,
        }
    }

    /// The failure, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&JsonError> {
        match self {
            Self::Ok(_) => None,
            Self::Err { error } => Some(error),
        }
    }

    /// Converts into a plain result.
    ///
    /// # Errors
    ///
    /// Returns the service's failure converted back into a
    /// [`StorageError`].
    pub fn into_result(self) -> Result<T, StorageError> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Err { error } => Err(error.into()),
        }
    }
}

impl<T> From<Result<T, StorageError>> for ServiceResult<T> {
    fn from(value: Result<T, StorageError>) -> Self {
        match value {
            Ok(inner) => Self::Ok(inner),
            Err(err) => Self::Err {
                error: err.to_json(),
            },
        }
    }
}

/// Per-service outcomes in registry order.
///
/// Serialises as a JSON object whose keys appear in registry order. Every
/// service has an entry, even when its list is empty or it failed.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceMap<T> {
    entries: Vec<(String, ServiceResult<T>)>,
}

impl<T> Default for ServiceMap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> ServiceMap<T> {
    /// Appends one service's outcome.
    pub fn push(&mut self, service: impl Into<String>, result: impl Into<ServiceResult<T>>) {
        self.entries.push((service.into(), result.into()));
    }

    /// The outcome for `service`.
    #[must_use]
    pub fn get(&self, service: &str) -> Option<&ServiceResult<T>> {
        self.entries
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, result)| result)
    }

    /// Service names in registry order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Entries in registry order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServiceResult<T>)> {
        self.entries.iter().map(|(name, result)| (name.as_str(), result))
    }

    /// Number of services in the reply.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the reply is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> FromIterator<(String, Result<T, StorageError>)> for ServiceMap<T> {
    fn from_iter<I: IntoIterator<Item = (String, Result<T, StorageError>)>>(iter: I) -> Self {
        let mut map = Self::default();
        for (service, result) in iter {
            map.push(service, result);
        }
        map
    }
}

impl<T: Serialize> Serialize for ServiceMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (service, result) in &self.entries {
            map.serialize_entry(service, result)?;
        }
        map.end()
    }
}

struct ServiceMapVisitor<T>(PhantomData<T>);

impl<'de, T: Deserialize<'de>> Visitor<'de> for ServiceMapVisitor<T> {
    type Value = ServiceMap<T>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map from service name to result")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = ServiceMap::default();
        while let Some((service, result)) = access.next_entry::<String, ServiceResult<T>>()? {
            map.entries.push((service, result));
        }
        Ok(map)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for ServiceMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(ServiceMapVisitor(PhantomData))
    }
}
