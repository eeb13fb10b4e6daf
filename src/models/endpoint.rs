//! The three gateway endpoints.
//!
//! The same names identify a transaction's type, a usage record's endpoint
//! and an API key permission. They are stored as text columns.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A gateway endpoint backed by the external AI service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Endpoint {
    /// Text plus document in, document out.
    UseCase,
    /// Text plus document in, document out.
    ReverseTransaction,
    /// Text in, text out.
    MultiAgent,
}

impl Endpoint {
    pub const ALL: [Endpoint; 3] = [
        Endpoint::UseCase,
        Endpoint::ReverseTransaction,
        Endpoint::MultiAgent,
    ];

    /// Column value and JSON name.
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::UseCase => "useCase",
            Endpoint::ReverseTransaction => "reverseTransaction",
            Endpoint::MultiAgent => "multiAgent",
        }
    }

    /// Path on the external AI service.
    pub fn upstream_path(self) -> &'static str {
        match self {
            Endpoint::UseCase => "use-case",
            Endpoint::ReverseTransaction => "reverse-transaction",
            Endpoint::MultiAgent => "multi-agent",
        }
    }

    /// Prefix for documents produced by this endpoint.
    pub fn output_prefix(self) -> &'static str {
        match self {
            Endpoint::UseCase => "usecase",
            Endpoint::ReverseTransaction => "reverse",
            Endpoint::MultiAgent => "multiagent",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown endpoint: {0}")]
pub struct UnknownEndpoint(pub String);

/// Decodes the text column.
impl TryFrom<String> for Endpoint {
    type Error = UnknownEndpoint;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Endpoint::ALL
            .into_iter()
            .find(|e| e.as_str() == value)
            .ok_or(UnknownEndpoint(value))
    }
}
