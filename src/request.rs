//! Downstream requests.
//!
//! A [`Request`] names the subset of data a consumer actually needs from a
//! producer: which unit of the domain (`time_step`), which variables
//! (`arrays`), and which index-space box (`extent`). Requests are immutable
//! once built and compare structurally, so two requests with the same keys
//! and values are the same cache key.
//!
//! ```
//! use geoflow::request::Request;
//!
//! let a = Request::new().with_time_step(3).with_arrays(["prw"]);
//! let b = Request::new().with_arrays(["prw"]).with_time_step(3);
//! assert_eq!(a, b);
//! assert_eq!(a.time_step(), Some(3));
//! ```

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::Arc;

/// Well-known request keys.
pub mod keys {
    /// Index of the unit (timestep) to produce.
    pub const TIME_STEP: &str = "time_step";
    /// List of variable names to produce.
    pub const ARRAYS: &str = "arrays";
    /// Inclusive index-space box `[i0, i1, j0, j1]`.
    pub const EXTENT: &str = "extent";
}

/// Immutable, structurally comparable key/value request.
///
/// Cloning is cheap (the map is shared); [`Request::with`] copies on write.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Request(Arc<BTreeMap<String, Value>>);

impl Request {
    /// The empty request: "everything you would produce by default".
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of this request with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.0).insert(key.into(), value.into());
        self
    }

    /// Return a copy of this request without `key`.
    #[must_use]
    pub fn without(mut self, key: &str) -> Self {
        if self.0.contains_key(key) {
            Arc::make_mut(&mut self.0).remove(key);
        }
        self
    }

    #[must_use]
    pub fn with_time_step(self, step: u64) -> Self {
        self.with(keys::TIME_STEP, step)
    }

    #[must_use]
    pub fn with_arrays<I, S>(self, arrays: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list: Vec<Value> = arrays.into_iter().map(|a| Value::Str(a.into())).collect();
        self.with(keys::ARRAYS, Value::List(list))
    }

    #[must_use]
    pub fn with_extent(self, extent: [u64; 4]) -> Self {
        self.with(keys::EXTENT, extent.to_vec())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Requested unit index, if any.
    #[must_use]
    pub fn time_step(&self) -> Option<u64> {
        self.get(keys::TIME_STEP).and_then(Value::as_u64)
    }

    /// Requested variable names, if the request restricts them.
    #[must_use]
    pub fn arrays(&self) -> Option<Vec<&str>> {
        self.get(keys::ARRAYS).and_then(Value::as_str_list)
    }

    /// Requested extent, if present and well formed.
    #[must_use]
    pub fn extent(&self) -> Option<[u64; 4]> {
        let list = self.get(keys::EXTENT)?.as_list()?;
        let parsed: Option<Vec<u64>> = list.iter().map(Value::as_u64).collect();
        parsed?.try_into().ok()
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}
