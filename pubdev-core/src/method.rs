use std::fmt;

use serde::{Deserialize, Serialize};

/// HTTP verbs that map onto a module handler.
///
/// Verbs outside this set (`HEAD`, `OPTIONS`, ...) have no handler and are
/// rejected by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    /// Parse a verb case-insensitively. Returns `None` for unmapped verbs.
    #[must_use]
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "PATCH" => Some(Self::Patch),
            _ => None,
        }
    }

    /// Name of the exported module function that serves this verb.
    ///
    /// `delete` is a reserved word in the script language, so `DELETE` is
    /// served by `del`.
    #[must_use]
    pub fn handler_name(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Put => "put",
            Self::Delete => "del",
            Self::Patch => "patch",
        }
    }

    /// All mapped verbs, in declaration order.
    #[must_use]
    pub fn all() -> [Self; 5] {
        [Self::Get, Self::Post, Self::Put, Self::Delete, Self::Patch]
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        };
        f.write_str(s)
    }
}
