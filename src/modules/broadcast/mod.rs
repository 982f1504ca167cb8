//! Fan-out across every port.
//!
//! Runs one task per port and collects whatever settles before a shared
//! deadline. Tasks still running at the deadline are left to finish on their
//! own so they can release their claims normally.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// How a single port fared during a broadcast.
#[derive(Debug)]
pub enum PortOutcome<T, E> {
    Settled(Result<T, E>),
    /// Still running when the window closed.
    Unsettled,
    /// The task panicked or was cancelled.
    Aborted(String),
}

/// Spawns `attempt(port)` for every port and waits up to `window`.
pub async fn broadcast<T, E, F, Fut>(
    ports: &[u16],
    window: Duration,
    mut attempt: F,
) -> Vec<(u16, PortOutcome<T, E>)>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnMut(u16) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let deadline = Instant::now() + window;
    let handles: Vec<_> = ports
        .iter()
        .map(|&port| (port, tokio::spawn(attempt(port))))
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (port, handle) in handles {
        let outcome = match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(result)) => PortOutcome::Settled(result),
            Ok(Err(join_err)) => PortOutcome::Aborted(join_err.to_string()),
            Err(_) => PortOutcome::Unsettled,
        };
        outcomes.push((port, outcome));
    }
    outcomes
}

/// Uniformly random pick among the successful outcomes.
pub fn pick_survivor<T, E>(outcomes: Vec<(u16, PortOutcome<T, E>)>) -> Option<(u16, T)> {
    let mut survivors: Vec<(u16, T)> = outcomes
        .into_iter()
        .filter_map(|(port, outcome)| match outcome {
            PortOutcome::Settled(Ok(value)) => Some((port, value)),
            _ => None,
        })
        .collect();
    if survivors.is_empty() {
        return None;
    }
    let index = rand::thread_rng().gen_range(0..survivors.len());
    Some(survivors.swap_remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test(start_paused = true)]
    async fn collects_settled_and_marks_slow_ports() {
        let outcomes = broadcast(&[1, 2, 3], Duration::from_secs(10), |port| async move {
            match port {
                1 => Ok::<_, String>(format!("body-{port}")),
                2 => Err("connection reset".to_string()),
                _ => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok("late".to_string())
                }
            }
        })
        .await;

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0].1, PortOutcome::Settled(Ok(_))));
        assert!(matches!(outcomes[1].1, PortOutcome::Settled(Err(_))));
        assert!(matches!(outcomes[2].1, PortOutcome::Unsettled));

        let (port, body) = pick_survivor(outcomes).unwrap();
        assert_eq!(port, 1);
        assert_eq!(body, "body-1");
    }

    #[test]
    fn survivor_choice_covers_every_success() {
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let outcomes: Vec<(u16, PortOutcome<u16, ()>)> = vec![
                (1, PortOutcome::Settled(Ok(1))),
                (2, PortOutcome::Settled(Err(()))),
                (3, PortOutcome::Settled(Ok(3))),
                (4, PortOutcome::Unsettled),
            ];
            seen.insert(pick_survivor(outcomes).unwrap().0);
        }
        assert_eq!(seen, HashSet::from([1, 3]));
    }

    #[test]
    fn no_survivors() {
        let outcomes: Vec<(u16, PortOutcome<(), &str>)> =
            vec![(1, PortOutcome::Settled(Err("x"))), (2, PortOutcome::Unsettled)];
        assert!(pick_survivor(outcomes).is_none());
    }
}
