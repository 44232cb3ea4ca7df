//! Redis backend for the coordination store
//!
//! All replicas share one Redis; `ConnectionManager` handles reconnects and
//! is cheap to clone per operation. Cross-set pipelines run as `MULTI`/`EXEC`
//! so membership changes are all-or-nothing at the store.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::error::Result;
use crate::store::{CoordinationStore, StoreFuture, StoreOp};

/// Coordination store backed by a shared Redis instance.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url, "connected to coordination store");
        Ok(Self { conn })
    }

    /// `PING` — used by the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

/// Append one pipeline operation to a redis pipeline.
fn apply_op(pipe: &mut redis::Pipeline, op: StoreOp) {
    match op {
        StoreOp::SetAdd { set, members } => {
            if !members.is_empty() {
                pipe.sadd(set, members).ignore();
            }
        }
        StoreOp::SetRemove { set, members } => {
            if !members.is_empty() {
                pipe.srem(set, members).ignore();
            }
        }
        StoreOp::SortedSetAdd { set, entries } => {
            for (member, score) in entries {
                pipe.zadd(&set, member, score).ignore();
            }
        }
        StoreOp::SortedSetRemove { set, members } => {
            if !members.is_empty() {
                pipe.zrem(set, members).ignore();
            }
        }
        StoreOp::HashSet { key, fields } => {
            if !fields.is_empty() {
                pipe.hset_multiple(key, &fields).ignore();
            }
        }
        StoreOp::Delete { keys } => {
            if !keys.is_empty() {
                pipe.del(keys).ignore();
            }
        }
    }
}

impl CoordinationStore for RedisStore {
    fn set_add<'a>(&'a self, set: &'a str, members: &'a [String]) -> StoreFuture<'a, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            if members.is_empty() {
                return Ok(());
            }
            conn.sadd::<_, _, ()>(set, members).await?;
            Ok(())
        })
    }

    fn set_pop_random<'a>(&'a self, set: &'a str) -> StoreFuture<'a, Option<String>> {
        let mut conn = self.conn.clone();
        Box::pin(async move { Ok(conn.spop::<_, Option<String>>(set).await?) })
    }

    fn set_remove<'a>(&'a self, set: &'a str, members: &'a [String]) -> StoreFuture<'a, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            if members.is_empty() {
                return Ok(());
            }
            conn.srem::<_, _, ()>(set, members).await?;
            Ok(())
        })
    }

    fn set_members<'a>(&'a self, set: &'a str) -> StoreFuture<'a, Vec<String>> {
        let mut conn = self.conn.clone();
        Box::pin(async move { Ok(conn.smembers::<_, Vec<String>>(set).await?) })
    }

    fn set_contains<'a>(&'a self, set: &'a str, member: &'a str) -> StoreFuture<'a, bool> {
        let mut conn = self.conn.clone();
        Box::pin(async move { Ok(conn.sismember::<_, _, bool>(set, member).await?) })
    }

    fn sorted_set_add<'a>(
        &'a self,
        set: &'a str,
        member: &'a str,
        score: f64,
    ) -> StoreFuture<'a, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            conn.zadd::<_, _, _, ()>(set, member, score).await?;
            Ok(())
        })
    }

    fn sorted_set_range_by_score<'a>(
        &'a self,
        set: &'a str,
        max: f64,
    ) -> StoreFuture<'a, Vec<String>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            Ok(conn
                .zrangebyscore::<_, _, _, Vec<String>>(set, "-inf", max)
                .await?)
        })
    }

    fn sorted_set_entries<'a>(&'a self, set: &'a str) -> StoreFuture<'a, Vec<(String, f64)>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            Ok(conn
                .zrange_withscores::<_, Vec<(String, f64)>>(set, 0, -1)
                .await?)
        })
    }

    fn hash_get_all<'a>(
        &'a self,
        key: &'a str,
    ) -> StoreFuture<'a, std::collections::HashMap<String, String>> {
        let mut conn = self.conn.clone();
        Box::pin(async move { Ok(conn.hgetall(key).await?) })
    }

    fn hash_set<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [(String, String)],
    ) -> StoreFuture<'a, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            if fields.is_empty() {
                return Ok(());
            }
            conn.hset_multiple::<_, _, _, ()>(key, fields).await?;
            Ok(())
        })
    }

    fn hash_incr_by_float<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        delta: f64,
    ) -> StoreFuture<'a, f64> {
        let mut conn = self.conn.clone();
        // f64 delta selects HINCRBYFLOAT
        Box::pin(async move { Ok(conn.hincr::<_, _, _, f64>(key, field, delta).await?) })
    }

    fn incr<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64> {
        let mut conn = self.conn.clone();
        Box::pin(async move { Ok(conn.incr::<_, _, i64>(key, 1i64).await?) })
    }

    fn incr_with_ttl<'a>(&'a self, key: &'a str, ttl_secs: u64) -> StoreFuture<'a, i64> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let (count,): (i64,) = redis::pipe()
                .atomic()
                .incr(key, 1i64)
                .expire(key, ttl_secs as i64)
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok(count)
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        let mut conn = self.conn.clone();
        Box::pin(async move { Ok(conn.get::<_, Option<String>>(key).await?) })
    }

    fn set_with_ttl<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl_secs: u64,
    ) -> StoreFuture<'a, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
            Ok(())
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        let mut conn = self.conn.clone();
        Box::pin(async move { Ok(conn.exists::<_, bool>(key).await?) })
    }

    fn delete<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(());
            }
            conn.del::<_, ()>(keys).await?;
            Ok(())
        })
    }

    fn pipeline(&self, ops: Vec<StoreOp>) -> StoreFuture<'_, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for op in ops {
                apply_op(&mut pipe, op);
            }
            pipe.query_async::<()>(&mut conn).await?;
            Ok(())
        })
    }
}
