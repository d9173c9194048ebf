// ============================================================================
// Redis Streams log store
// ============================================================================
//
// Layout (all keys derived from the stream key, default "outbox"):
//   {stream}              - XADD log, entry ids are "<seq>-0", one field "content"
//   {stream}:seq          - INCR counter issuing message ids
//   {stream}:lease:{grp}  - HASH entry id -> "<expiry_ms>|<holder>"
//
// A component is a consumer group created at "$" with a single stream
// consumer named after the group. An entry delivered to a group sits in its
// pending list until acknowledged; the lease hash says which holder has it
// and until when. A pending entry without a live lease is eligible
// for claiming again. Every operation is one Lua script reading the server
// clock, so each is atomic against all other clients.
//
// ============================================================================

use super::ClaimableStore;
use crate::message::{ClaimedMessage, ComponentName, HolderId, Lease, Message, MessageId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use outbox_config::RedisStreamConfig;
use outbox_error::{QueueError, QueueResult};
use outbox_redis::RedisClient;
use redis::Script;
use std::time::Duration;

const NOW_MS: &str = r#"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
"#;

const LUA_HELPERS: &str = r#"
local function lease_expiry(lease)
  if not lease then return nil end
  local sep = string.find(lease, '|', 1, true)
  if not sep then return nil end
  return tonumber(string.sub(lease, 1, sep - 1))
end

local function pending_or_nogroup(stream, group, count)
  local ok, res = pcall(redis.call, 'XPENDING', stream, group, '-', '+', count)
  if ok then return res, nil end
  local msg = type(res) == 'table' and res.err or tostring(res)
  return nil, msg
end
"#;

// KEYS: stream, seq   ARGV: content
const APPEND_LUA: &str = r#"
local id = redis.call('INCR', KEYS[2])
redis.call('XADD', KEYS[1], id .. '-0', 'content', ARGV[1])
return id
"#;

// KEYS: stream, lease hash   ARGV: group, holder, lease_ms, scan
// Returns {entry id, content, expiry_ms} or nil
static CLAIM_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(&format!(
        "{}{}{}",
        NOW_MS,
        LUA_HELPERS,
        r#"
local group, holder = ARGV[1], ARGV[2]
-- one stream consumer per group; holders only live in the lease hash
local consumer = group
local expiry = now + tonumber(ARGV[3])

local function content_of(fields)
  for i = 1, #fields, 2 do
    if fields[i] == 'content' then return fields[i + 1] end
  end
  return nil
end

local pending, err = pending_or_nogroup(KEYS[1], group, tonumber(ARGV[4]))
if err then
  if string.find(err, 'NOGROUP', 1, true) then
    return redis.error_reply('NOGROUP ' .. group)
  end
  return redis.error_reply(err)
end

for _, entry in ipairs(pending) do
  local id = entry[1]
  local held_until = lease_expiry(redis.call('HGET', KEYS[2], id))
  if not held_until or held_until < now then
    local claimed = redis.call('XCLAIM', KEYS[1], group, consumer, 0, id)
    local item = claimed[1]
    if type(item) == 'table' and type(item[2]) == 'table' then
      redis.call('HSET', KEYS[2], id, expiry .. '|' .. holder)
      return {id, content_of(item[2]), expiry}
    end
    -- entry vanished from the log; drop it from the pending list
    redis.call('XACK', KEYS[1], group, id)
    redis.call('HDEL', KEYS[2], id)
  end
end

local read = redis.call('XREADGROUP', 'GROUP', group, consumer, 'COUNT', 1, 'STREAMS', KEYS[1], '>')
if not read then return nil end
local item = read[1][2][1]
if not item then return nil end
redis.call('HSET', KEYS[2], item[1], expiry .. '|' .. holder)
return {item[1], content_of(item[2]), expiry}
"#
    ))
});

// KEYS: stream, lease hash   ARGV: group, entry id, holder, expiry_ms
static ACK_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(&format!(
        "{}{}",
        NOW_MS,
        r#"
local lease = redis.call('HGET', KEYS[2], ARGV[2])
if lease ~= ARGV[4] .. '|' .. ARGV[3] then return 0 end
if tonumber(ARGV[4]) < now then return 0 end
redis.call('XACK', KEYS[1], ARGV[1], ARGV[2])
redis.call('HDEL', KEYS[2], ARGV[2])
return 1
"#
    ))
});

// KEYS: stream, lease hash   ARGV: group, scan
static RECLAIM_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(&format!(
        "{}{}{}",
        NOW_MS,
        LUA_HELPERS,
        r#"
local pending, err = pending_or_nogroup(KEYS[1], ARGV[1], tonumber(ARGV[2]))
if err then
  if string.find(err, 'NOGROUP', 1, true) then return 0 end
  return redis.error_reply(err)
end

local reclaimed = 0
for _, entry in ipairs(pending) do
  local held_until = lease_expiry(redis.call('HGET', KEYS[2], entry[1]))
  if held_until and held_until < now then
    redis.call('HDEL', KEYS[2], entry[1])
    reclaimed = reclaimed + 1
  end
end
return reclaimed
"#
    ))
});

// KEYS: stream   ARGV: upper bound (0 = none), max deletions (0 = report only)
// Returns {frontier or -1, deleted}
static PRUNE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local function seq_of(id)
  return tonumber(string.match(id, '^(%d+)'))
end

if redis.call('EXISTS', KEYS[1]) == 0 then return {-1, 0} end

local frontier = nil
local groups = redis.call('XINFO', 'GROUPS', KEYS[1])
for _, raw in ipairs(groups) do
  local g = {}
  for i = 1, #raw, 2 do g[raw[i]] = raw[i + 1] end

  local required
  if tonumber(g['pending']) > 0 then
    local summary = redis.call('XPENDING', KEYS[1], g['name'])
    required = seq_of(summary[2])
  else
    required = seq_of(g['last-delivered-id']) + 1
  end
  if not frontier or required < frontier then frontier = required end
end

if not frontier then
  local last = redis.call('XREVRANGE', KEYS[1], '+', '-', 'COUNT', 1)
  if last[1] then frontier = seq_of(last[1][1]) + 1 else frontier = 1 end
end

local limit = frontier
local bound = tonumber(ARGV[1])
if bound > 0 and bound < limit then limit = bound end

local deleted = 0
local cap = tonumber(ARGV[2])
if cap > 0 and limit > 1 then
  local doomed = redis.call('XRANGE', KEYS[1], '-', (limit - 1) .. '-0', 'COUNT', cap)
  for _, entry in ipairs(doomed) do
    deleted = deleted + redis.call('XDEL', KEYS[1], entry[1])
  end
end

return {frontier, deleted}
"#,
    )
});

static APPEND_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(APPEND_LUA));

pub struct RedisStreamStore {
    client: RedisClient,
    config: RedisStreamConfig,
}

impl RedisStreamStore {
    pub fn new(client: RedisClient, config: RedisStreamConfig) -> Self {
        Self { client, config }
    }

    pub async fn connect(url: &str, config: RedisStreamConfig) -> QueueResult<Self> {
        let mut client = RedisClient::connect(url).await?;
        client.ping().await?;
        Ok(Self::new(client, config))
    }

    pub fn config(&self) -> &RedisStreamConfig {
        &self.config
    }

    /// ConnectionManager is a cheap handle; each call works on its own clone
    fn client(&self) -> RedisClient {
        self.client.clone()
    }

    async fn run_prune(&self, bound: i64, cap: usize) -> QueueResult<(i64, u64)> {
        let mut client = self.client();
        let (frontier, deleted): (i64, u64) = client
            .eval_script(
                &PRUNE_SCRIPT
                    .key(&self.config.stream_key)
                    .arg(bound)
                    .arg(cap)
            )
            .await?;
        Ok((frontier, deleted))
    }
}

fn millis_to_utc(ms: i64) -> QueueResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QueueError::storage(format!("lease expiry out of range: {}", ms)))
}

fn entry_seq(entry_id: &str) -> QueueResult<MessageId> {
    outbox_redis::parse_stream_seq(entry_id)
        .map(MessageId)
        .ok_or_else(|| QueueError::storage(format!("unexpected stream entry id '{}'", entry_id)))
}

#[async_trait]
impl ClaimableStore for RedisStreamStore {
    async fn register_component(&self, component: &ComponentName) -> QueueResult<()> {
        let mut client = self.client();
        let created = client
            .xgroup_create(&self.config.stream_key, component.as_str())
            .await?;
        if created {
            tracing::debug!(component = %component, "Consumer group created");
        }
        Ok(())
    }

    async fn components(&self) -> QueueResult<Vec<ComponentName>> {
        let mut client = self.client();
        let groups = client.xinfo_groups(&self.config.stream_key).await?;
        groups
            .into_iter()
            .map(|g| ComponentName::new(g.name))
            .collect()
    }

    async fn append(&self, content: serde_json::Value) -> QueueResult<MessageId> {
        let encoded = serde_json::to_string(&content)?;
        let mut client = self.client();
        let id: i64 = client
            .eval_script(
                &APPEND_SCRIPT
                    .key(&self.config.stream_key)
                    .key(self.config.sequence_key())
                    .arg(encoded)
            )
            .await?;
        Ok(MessageId(id))
    }

    async fn claim_one(
        &self,
        component: &ComponentName,
        holder: &HolderId,
        lease_duration: Duration,
    ) -> QueueResult<Option<ClaimedMessage>> {
        let mut client = self.client();
        let reply: Result<Option<(String, Option<String>, i64)>, redis::RedisError> = client
            .eval_script(
                &CLAIM_SCRIPT
                    .key(&self.config.stream_key)
                    .key(self.config.lease_key(component.as_str()))
                    .arg(component.as_str())
                    .arg(holder.as_str())
                    .arg(lease_duration.as_millis() as u64)
                    .arg(self.config.pending_scan_limit)
            )
            .await;

        let (entry_id, content, expiry_ms) = match reply {
            Ok(Some(claimed)) => claimed,
            Ok(None) => return Ok(None),
            Err(e) if e.code() == Some("NOGROUP") => {
                return Err(QueueError::UnknownComponent(component.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let id = entry_seq(&entry_id)?;
        let content = match content {
            Some(raw) => serde_json::from_str(&raw)?,
            None => serde_json::Value::Null,
        };

        Ok(Some(ClaimedMessage {
            message: Message { id, content },
            lease: Lease {
                message_id: id,
                component: component.clone(),
                holder: holder.clone(),
                expires_at: millis_to_utc(expiry_ms)?,
            },
        }))
    }

    async fn ack(&self, lease: &Lease) -> QueueResult<()> {
        let mut client = self.client();
        let acked: i64 = client
            .eval_script(
                &ACK_SCRIPT
                    .key(&self.config.stream_key)
                    .key(self.config.lease_key(lease.component.as_str()))
                    .arg(lease.component.as_str())
                    .arg(format!("{}-0", lease.message_id))
                    .arg(lease.holder.as_str())
                    .arg(lease.expires_at.timestamp_millis())
            )
            .await?;

        if acked == 0 {
            return Err(QueueError::conflict(
                lease.component.as_str(),
                lease.message_id.get(),
            ));
        }
        Ok(())
    }

    async fn reclaim_expired(&self, component: &ComponentName) -> QueueResult<u64> {
        let mut client = self.client();
        let reclaimed: u64 = client
            .eval_script(
                &RECLAIM_SCRIPT
                    .key(&self.config.stream_key)
                    .key(self.config.lease_key(component.as_str()))
                    .arg(component.as_str())
                    .arg(self.config.pending_scan_limit)
            )
            .await?;
        Ok(reclaimed)
    }

    async fn prune_frontier(&self) -> QueueResult<Option<MessageId>> {
        let (frontier, _) = self.run_prune(0, 0).await?;
        Ok((frontier >= 0).then_some(MessageId(frontier)))
    }

    async fn prune_below(&self, frontier: MessageId) -> QueueResult<u64> {
        if frontier.get() <= 1 {
            return Ok(0);
        }
        let (_, deleted) = self.run_prune(frontier.get(), self.config.prune_batch).await?;
        Ok(deleted)
    }

    async fn depth(&self) -> QueueResult<u64> {
        let mut client = self.client();
        Ok(client.xlen(&self.config.stream_key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Note: these tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7

    const LEASE: Duration = Duration::from_millis(2500);

    async fn setup_test_store(components: &[&str]) -> RedisStreamStore {
        let config = RedisStreamConfig {
            stream_key: format!("outbox_test_{}", uuid::Uuid::new_v4().simple()),
            ..RedisStreamConfig::default()
        };
        let store = RedisStreamStore::connect("redis://localhost:6379", config)
            .await
            .expect("Failed to connect to Redis");
        for name in components {
            store
                .register_component(&ComponentName::new(*name).unwrap())
                .await
                .unwrap();
        }
        store
    }

    async fn cleanup(store: &RedisStreamStore, components: &[&str]) {
        let mut client = store.client();
        let mut keys = vec![
            store.config.stream_key.clone(),
            store.config.sequence_key(),
        ];
        keys.extend(components.iter().map(|c| store.config.lease_key(c)));
        client.del_keys(&keys).await.unwrap();
    }

    fn component(name: &str) -> ComponentName {
        ComponentName::new(name).unwrap()
    }

    fn holder(name: &str) -> HolderId {
        HolderId::new(name).unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_claim_ack_prune_cycle() {
        let store = setup_test_store(&["aaa", "bbb"]).await;
        let first = store.append(json!({"attr": 1})).await.unwrap();
        let second = store.append(json!({"attr": 2})).await.unwrap();
        assert_eq!(first, MessageId(1));
        assert_eq!(second, MessageId(2));

        let a = store.claim_one(&component("aaa"), &holder("ha"), LEASE).await.unwrap().unwrap();
        assert_eq!(a.message.id, first);
        assert_eq!(a.message.content, json!({"attr": 1}));
        store.ack(&a.lease).await.unwrap();
        assert!(store.ack(&a.lease).await.is_err());

        // bbb has not read anything yet
        assert_eq!(store.prune_frontier().await.unwrap(), Some(first));
        assert_eq!(store.prune_below(MessageId(3)).await.unwrap(), 0);

        let b = store.claim_one(&component("bbb"), &holder("hb"), LEASE).await.unwrap().unwrap();
        store.ack(&b.lease).await.unwrap();

        // aaa still needs message 2
        assert_eq!(store.prune_frontier().await.unwrap(), Some(second));
        assert_eq!(store.prune_below(MessageId(3)).await.unwrap(), 1);
        assert_eq!(store.depth().await.unwrap(), 1);

        cleanup(&store, &["aaa", "bbb"]).await;
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_expired_lease_is_redelivered() {
        let store = setup_test_store(&["aaa"]).await;
        store.append(json!({})).await.unwrap();
        let aaa = component("aaa");

        let first = store
            .claim_one(&aaa, &holder("h1"), Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert!(store.claim_one(&aaa, &holder("h2"), LEASE).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.reclaim_expired(&aaa).await.unwrap(), 1);

        let second = store.claim_one(&aaa, &holder("h2"), LEASE).await.unwrap().unwrap();
        assert_eq!(second.message.id, first.message.id);
        assert!(matches!(
            store.ack(&first.lease).await,
            Err(QueueError::ClaimConflict { .. })
        ));
        store.ack(&second.lease).await.unwrap();

        cleanup(&store, &["aaa"]).await;
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_unknown_component() {
        let store = setup_test_store(&["aaa"]).await;
        let zzz = component("zzz");

        assert!(matches!(
            store.claim_one(&zzz, &holder("h1"), LEASE).await,
            Err(QueueError::UnknownComponent(_))
        ));
        assert_eq!(store.reclaim_expired(&zzz).await.unwrap(), 0);

        cleanup(&store, &["aaa"]).await;
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_holders_share_one_stream_consumer() {
        let store = setup_test_store(&["aaa"]).await;
        let aaa = component("aaa");
        for i in 0..4 {
            store.append(json!({ "attr": i })).await.unwrap();
        }

        for i in 0..3 {
            let h = HolderId::generate(&aaa);
            let claimed = store
                .claim_one(&aaa, &h, Duration::from_millis(50))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(claimed.lease.holder, h, "claim {}", i);
        }
        // expired entries move between holders through XCLAIM
        tokio::time::sleep(Duration::from_millis(100)).await;
        let late = store.claim_one(&aaa, &HolderId::generate(&aaa), LEASE).await.unwrap().unwrap();
        store.ack(&late.lease).await.unwrap();

        let mut client = store.client();
        let consumers: Vec<redis::Value> = redis::cmd("XINFO")
            .arg("CONSUMERS")
            .arg(&store.config.stream_key)
            .arg("aaa")
            .query_async(client.connection_mut())
            .await
            .unwrap();
        assert_eq!(consumers.len(), 1);

        cleanup(&store, &["aaa"]).await;
    }
}
