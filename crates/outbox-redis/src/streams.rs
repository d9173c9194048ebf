//! Redis Streams consumer group helpers

use crate::{RedisClient, Result};
use redis::streams::StreamInfoGroupsReply;
use redis::AsyncCommands;

/// Consumer group summary as reported by XINFO GROUPS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub consumers: usize,
    pub pending: usize,
    pub last_delivered_id: String,
}

impl RedisClient {
    // ============================================================================
    // Consumer Groups
    // ============================================================================

    /// XGROUP CREATE key group $ MKSTREAM
    ///
    /// The group starts at the current end of the stream, so it only sees
    /// entries appended after it exists. Returns false if the group already
    /// existed.
    pub async fn xgroup_create(&mut self, stream_key: &str, group: &str) -> Result<bool> {
        let created: Result<()> = self
            .connection_mut()
            .xgroup_create_mkstream(stream_key, group, "$")
            .await;

        match created {
            Ok(()) => Ok(true),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// XINFO GROUPS - empty when the stream does not exist yet
    pub async fn xinfo_groups(&mut self, stream_key: &str) -> Result<Vec<GroupInfo>> {
        let exists: bool = self.connection_mut().exists(stream_key).await?;
        if !exists {
            return Ok(Vec::new());
        }

        let reply: StreamInfoGroupsReply = self.connection_mut().xinfo_groups(stream_key).await?;

        Ok(reply
            .groups
            .into_iter()
            .map(|g| GroupInfo {
                name: g.name,
                consumers: g.consumers,
                pending: g.pending,
                last_delivered_id: g.last_delivered_id,
            })
            .collect())
    }

    /// XLEN - Get stream length
    pub async fn xlen(&mut self, stream_key: &str) -> Result<u64> {
        self.connection_mut().xlen(stream_key).await
    }
}

/// Parse the millisecond part of a stream id (`"42-0"` -> 42)
///
/// The outbox appends entries with explicit ids `<seq>-0`, so the first part
/// is the message sequence number.
pub fn parse_stream_seq(id: &str) -> Option<i64> {
    let (seq, rest) = id.split_once('-').unwrap_or((id, "0"));
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    seq.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_seq() {
        assert_eq!(parse_stream_seq("42-0"), Some(42));
        assert_eq!(parse_stream_seq("7"), Some(7));
        assert_eq!(parse_stream_seq("0-0"), Some(0));
        assert_eq!(parse_stream_seq("abc-0"), None);
        assert_eq!(parse_stream_seq("5-x"), None);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_group_lifecycle() -> Result<()> {
        let mut client = RedisClient::connect("redis://localhost:6379").await?;
        let stream_key = "outbox_test_groups";
        let _: i64 = client.connection_mut().del(stream_key).await?;

        assert!(client.xgroup_create(stream_key, "billing").await?);
        assert!(!client.xgroup_create(stream_key, "billing").await?);

        let groups = client.xinfo_groups(stream_key).await?;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "billing");
        assert_eq!(groups[0].pending, 0);
        assert_eq!(client.xlen(stream_key).await?, 0);

        let _: i64 = client.connection_mut().del(stream_key).await?;
        Ok(())
    }
}
