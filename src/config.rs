use std::time::Duration;

/// Engine-wide tunables. Page size may only be changed before any file is
/// opened (changing it afterward would desynchronize on-disk layouts already
/// computed from the old value), so `Config` is consumed once by
/// `Engine::new` and then treated as immutable.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub page_size: usize,
    pub pool_capacity: usize,
    pub old_list_fraction: f64,
    pub old_block_time: Duration,
    pub lock_retry_min: Duration,
    pub lock_retry_max: Duration,
    pub lock_retry_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_size: 4096,
            pool_capacity: 50,
            old_list_fraction: 0.2,
            old_block_time: Duration::from_millis(1000),
            lock_retry_min: Duration::from_millis(200),
            lock_retry_max: Duration::from_millis(500),
            lock_retry_limit: 5,
        }
    }
}

impl Config {
    pub fn old_capacity(&self) -> usize {
        ((self.pool_capacity as f64) * self.old_list_fraction).floor() as usize
    }

    pub fn young_capacity(&self) -> usize {
        self.pool_capacity - self.old_capacity()
    }
}
