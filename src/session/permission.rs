//! Permission decisions written back to the child's stdin

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// An external decision for one permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Deny,
}

impl PermissionDecision {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

#[derive(Serialize)]
struct PermissionResponse<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: &'a str,
    decision: PermissionDecision,
}

/// The stdin line for a decision, newline included
pub fn encode_permission_response(request_id: &str, decision: PermissionDecision) -> String {
    let response = PermissionResponse {
        kind: "permission_response",
        id: request_id,
        decision,
    };
    // Serializing a struct of strings cannot fail
    let mut line = serde_json::to_string(&response).unwrap_or_default();
    line.push('\n');
    line
}

/// Write one decision line and flush
pub async fn write_permission_response<W>(
    writer: &mut W,
    request_id: &str,
    decision: PermissionDecision,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let line = encode_permission_response(request_id, decision);
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_encode_exact_line() {
        assert_eq!(
            encode_permission_response("req-1", PermissionDecision::Allow),
            "{\"type\":\"permission_response\",\"id\":\"req-1\",\"decision\":\"allow\"}\n"
        );
        assert_eq!(
            encode_permission_response("a\"b", PermissionDecision::Deny),
            "{\"type\":\"permission_response\",\"id\":\"a\\\"b\",\"decision\":\"deny\"}\n"
        );
    }

    #[test]
    fn test_parse_decision() {
        assert_eq!(PermissionDecision::parse("allow"), Some(PermissionDecision::Allow));
        assert_eq!(PermissionDecision::parse("deny"), Some(PermissionDecision::Deny));
        assert_eq!(PermissionDecision::parse("Allow"), None);
    }

    #[tokio::test]
    async fn test_write_permission_response() {
        let (mut writer, mut reader) = tokio::io::duplex(256);
        write_permission_response(&mut writer, "r9", PermissionDecision::Deny)
            .await
            .unwrap();
        drop(writer);

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(
            out,
            "{\"type\":\"permission_response\",\"id\":\"r9\",\"decision\":\"deny\"}\n"
        );
    }
}
