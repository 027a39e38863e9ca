use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable holding the JSON session blob `{"token": ..., "classId": ...}`.
pub const SESSION_ENV: &str = "ATTENTRS_SESSION";

/// Credential and class identifier the reports are filed under.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub token: String,
    pub class_id: ClassId,
}

/// Class identifier as issued by the conference service. Numbers stay numbers
/// on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassId {
    Number(serde_json::Number),
    Text(String),
}

impl ClassId {
    pub fn is_empty(&self) -> bool {
        matches!(self, ClassId::Text(s) if s.is_empty())
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassId::Number(n) => write!(f, "{}", n),
            ClassId::Text(s) => f.write_str(s),
        }
    }
}

/// Command-line form: all-digit ids are numeric, anything else is text.
impl FromStr for ClassId {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.parse::<u64>() {
            Ok(n) => ClassId::from(n),
            Err(_) => ClassId::from(s),
        })
    }
}

impl From<&str> for ClassId {
    fn from(s: &str) -> Self {
        ClassId::Text(s.to_string())
    }
}

impl From<String> for ClassId {
    fn from(s: String) -> Self {
        ClassId::Text(s)
    }
}

impl From<u64> for ClassId {
    fn from(n: u64) -> Self {
        ClassId::Number(n.into())
    }
}

impl AuthContext {
    pub fn new(token: impl Into<String>, class_id: impl Into<ClassId>) -> Self {
        Self {
            token: token.into(),
            class_id: class_id.into(),
        }
    }

    /// Parse the session blob handed over by the conference client.
    pub fn from_json(raw: &str) -> Result<Self> {
        let ctx: AuthContext = serde_json::from_str(raw).context("parsing session JSON")?;
        if ctx.token.is_empty() || ctx.class_id.is_empty() {
            anyhow::bail!("session is missing a token or class id");
        }
        Ok(ctx)
    }

    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(SESSION_ENV)
            .with_context(|| format!("{} is not set", SESSION_ENV))?;
        Self::from_json(&raw)
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("token", &"<redacted>")
            .field("class_id", &self.class_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let ctx = AuthContext::from_json(r#"{"token":"abc","classId":"cs101"}"#).unwrap();
        assert_eq!(ctx, AuthContext::new("abc", "cs101"));
    }

    #[test]
    fn test_numeric_class_id() {
        let ctx = AuthContext::from_json(r#"{"token":"abc","classId":42}"#).unwrap();
        assert_eq!(ctx.class_id, ClassId::from(42));
        assert_eq!(ctx.class_id.to_string(), "42");
        assert_eq!(
            serde_json::to_value(&ctx.class_id).unwrap(),
            serde_json::json!(42)
        );
    }

    #[test]
    fn test_class_id_from_argument() {
        assert_eq!("42".parse::<ClassId>().unwrap(), ClassId::from(42));
        assert_eq!("cs101".parse::<ClassId>().unwrap(), ClassId::from("cs101"));
    }

    #[test]
    fn test_from_json_rejects_incomplete() {
        assert!(AuthContext::from_json(r#"{"token":"abc"}"#).is_err());
        assert!(AuthContext::from_json(r#"{"token":"","classId":"cs101"}"#).is_err());
        assert!(AuthContext::from_json("not json").is_err());
        assert!(AuthContext::from_json(r#"{"token":"abc","classId":null}"#).is_err());
        assert!(AuthContext::from_json(r#"{"token":"abc","classId":true}"#).is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let out = format!("{:?}", AuthContext::new("s3cret", "cs101"));
        assert!(!out.contains("s3cret"));
        assert!(out.contains("cs101"));
    }
}
