use std::sync::atomic::{AtomicU64, Ordering};

/// Number of requests seen by a handler, labeled with the server it runs in
#[derive(Debug)]
pub struct RequestCounter {
    server: String,
    count: AtomicU64,
}

impl RequestCounter {
    pub fn new(server: impl Into<String>) -> Self {
        RequestCounter {
            server: server.into(),
            count: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}
