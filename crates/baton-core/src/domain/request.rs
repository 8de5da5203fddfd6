//! Request: the immutable description of a unit of work.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// What a Task was asked to do.
///
/// Built once through [`RequestBuilder`] and never mutated afterwards; a Task
/// only ever hands out shared references to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Request {
    id: String,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Fluent builder for [`Request`].
///
/// # Example
/// ```ignore
/// let request = Request::builder().id("firmware-v2").build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    id: Option<String>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Finish the request. A request without an explicit id gets a fresh ULID.
    pub fn build(self) -> Request {
        Request {
            id: self.id.unwrap_or_else(|| Ulid::new().to_string()),
        }
    }
}
