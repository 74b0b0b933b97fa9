#![allow(dead_code)]

pub mod strategies;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn eventually<F>(description: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for: {description}");
}

/// Await `future`, failing the test after five seconds
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("operation timed out")
}

/// A raw TCP worker speaking the wire protocol by hand
pub struct FakeWorker {
    pub stream: TcpStream,
}

impl FakeWorker {
    pub async fn connect(address: SocketAddr) -> Self {
        let stream = TcpStream::connect(address).await.expect("connect to dispatcher");
        Self { stream }
    }

    /// One read, as a worker would do it
    pub async fn read_message(&mut self) -> String {
        let mut buffer = [0u8; 1024];
        let n = within(self.stream.read(&mut buffer))
            .await
            .expect("read from dispatcher");
        String::from_utf8_lossy(&buffer[..n]).to_string()
    }

    /// Skip idle signals until a task arrives
    pub async fn next_task(&mut self) -> String {
        loop {
            let message = self.read_message().await;
            let task = message.trim_start_matches("NO_TASK");
            if !task.is_empty() {
                return task.to_string();
            }
        }
    }

    pub async fn reply(&mut self, reply: &str) {
        self.stream
            .write_all(reply.as_bytes())
            .await
            .expect("write to dispatcher");
    }
}
