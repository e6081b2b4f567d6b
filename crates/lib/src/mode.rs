//! Interaction modes and the policy each one implies for a request.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a send does with the user's input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Generate with context from the ingested documents (with sources).
    Query,
    /// Skip generation; list the most related chunks of the ingested documents.
    Search,
    /// Generate without context from files. Stored as "prompt" by older prompt surfaces.
    #[default]
    #[serde(alias = "prompt")]
    Chat,
}

/// Request behavior implied by a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub use_context: bool,
    pub include_sources: bool,
    pub skip_generation: bool,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Query, Mode::Search, Mode::Chat];

    pub const fn policy(self) -> Policy {
        match self {
            Mode::Query => Policy {
                use_context: true,
                include_sources: true,
                skip_generation: false,
            },
            Mode::Chat => Policy {
                use_context: false,
                include_sources: false,
                skip_generation: false,
            },
            Mode::Search => Policy {
                use_context: false,
                include_sources: false,
                skip_generation: true,
            },
        }
    }

    /// True when the file selection narrows what the backend may look at.
    pub const fn scopes_to_selection(self) -> bool {
        matches!(self, Mode::Query | Mode::Search)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Query => "query",
            Mode::Search => "search",
            Mode::Chat => "chat",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Mode::Query => "Query docs",
            Mode::Search => "Search files",
            Mode::Chat => "LLM Chat",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Mode::Query => "Uses the context from the ingested documents to answer the questions",
            Mode::Search => "Fast search that returns the 4 most related text chunks",
            Mode::Chat => "No context from files",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode '{0}' (expected query, search, or chat)")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "query" | "generate-with-context" => Ok(Mode::Query),
            "search" | "search-only" => Ok(Mode::Search),
            "chat" | "prompt" | "generate-without-context" => Ok(Mode::Chat),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}
