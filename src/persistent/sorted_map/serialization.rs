//! `serde` support for [`SortedMap`].
//!
//! Maps serialize as a plain map in key order. Deserialization replays the
//! entries into a linear map and forks it, so a key that appears twice keeps
//! its last value.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::SortedMap;
use crate::persistent::Comparator;

impl<K, V, C> Serialize for SortedMap<K, V, C>
where
    K: Serialize,
    V: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct SortedMapVisitor<K, V, C> {
    marker: PhantomData<fn() -> SortedMap<K, V, C>>,
}

impl<K, V, C> SortedMapVisitor<K, V, C> {
    const fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<'de, K, V, C> Visitor<'de> for SortedMapVisitor<K, V, C>
where
    K: Deserialize<'de> + Clone,
    V: Deserialize<'de> + Clone,
    C: Comparator<K> + Default,
{
    type Value = SortedMap<K, V, C>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut map = SortedMap::default().linear();
        while let Some((key, value)) = access.next_entry()? {
            map.put(key, value);
        }
        Ok(map.forked())
    }
}

impl<'de, K, V, C> Deserialize<'de> for SortedMap<K, V, C>
where
    K: Deserialize<'de> + Clone,
    V: Deserialize<'de> + Clone,
    C: Comparator<K> + Default,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(SortedMapVisitor::new())
    }
}
