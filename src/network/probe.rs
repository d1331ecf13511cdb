use log::debug;
use std::time::Duration;
use tokio::time::sleep;

use crate::network::Transport;

/// Result of a multi-attempt connectivity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub attempts: u32,
    pub successes: u32,
}

impl ProbeOutcome {
    pub fn is_live(&self) -> bool {
        self.successes > 0
    }
}

/// Dial `addr` `attempts` times, independently. Every attempt runs even after
/// a success so the outcome reports how flaky the target is.
pub async fn probe(
    addr: &str,
    attempts: u32,
    connect_timeout: Duration,
    retry_delay: Duration,
) -> ProbeOutcome {
    let mut successes = 0;

    for attempt in 1..=attempts {
        match Transport::connect(addr, connect_timeout).await {
            Ok(_) => successes += 1,
            Err(e) => debug!("Probe {}/{} to {} failed: {}", attempt, attempts, addr, e),
        }

        if attempt < attempts && !retry_delay.is_zero() {
            sleep(retry_delay).await;
        }
    }

    ProbeOutcome {
        attempts,
        successes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn test_no_listener_is_not_live() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let outcome = probe(&addr, 3, TIMEOUT, Duration::ZERO).await;
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.successes, 0);
        assert!(!outcome.is_live());
    }

    #[tokio::test]
    async fn test_listener_is_live() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let outcome = probe(&addr, 3, TIMEOUT, Duration::ZERO).await;
        assert_eq!(outcome.successes, 3);
        assert!(outcome.is_live());
    }
}
