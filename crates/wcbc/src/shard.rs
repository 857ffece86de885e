use rand::seq::SliceRandom;

/// Picks the bridge host for a new connection when none is configured.
pub trait ShardSelector: Send + Sync {
    /// Returns one of `shards`, or `None` if the list is empty.
    fn select(&self, shards: &[String]) -> Option<String>;
}

/// Uniform random choice over the shard list.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomShard;

impl ShardSelector for RandomShard {
    fn select(&self, shards: &[String]) -> Option<String> {
        shards.choose(&mut rand::thread_rng()).cloned()
    }
}

/// Always returns the same host, ignoring the shard list.
#[derive(Debug, Clone)]
pub struct FixedHost(pub String);

impl ShardSelector for FixedHost {
    fn select(&self, _shards: &[String]) -> Option<String> {
        Some(self.0.clone())
    }
}
