use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Custom(String),
    #[default]
    Direct,
    Fanout,
    Headers,
    Topic,
}

impl ExchangeKind {
    pub fn kind(&self) -> &str {
        match self {
            Self::Custom(c) => c.as_str(),
            Self::Direct => "direct",
            Self::Fanout => "fanout",
            Self::Headers => "headers",
            Self::Topic => "topic",
        }
    }
}

impl FromStr for ExchangeKind {
    type Err = std::convert::Infallible;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        Ok(match kind {
            "direct" => Self::Direct,
            "fanout" => Self::Fanout,
            "headers" => Self::Headers,
            "topic" => Self::Topic,
            custom => Self::Custom(custom.into()),
        })
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Names the server reserves for itself: they can be used but not declared.
pub(crate) fn is_predefined(exchange: &str) -> bool {
    exchange.is_empty() || exchange.starts_with("amq.")
}
