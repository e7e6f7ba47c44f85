//! Retry executor driving queued commands.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lumagate_commands::{Command, CommandQueue, QueueError, RetryExecutor, RetryPolicy};
use lumagate_core::{LightAction, UpstreamError};

fn retrying_queue(failures_before_success: u32, calls: Arc<AtomicU32>) -> CommandQueue<u32> {
    let retry = RetryExecutor::new(RetryPolicy::new(
        3,
        Duration::from_millis(100),
        Duration::from_secs(1),
    ));

    CommandQueue::with_settings(Duration::from_millis(200), None, move |_, command: Command| {
        let retry = retry.clone();
        let calls = Arc::clone(&calls);
        async move {
            retry
                .execute_with_correlation(&command.correlation_id, || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < failures_before_success {
                            Err(UpstreamError::status(503, "busy"))
                        } else {
                            Ok(n + 1)
                        }
                    }
                })
                .await
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_queued_command_retries_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let queue = retrying_queue(2, Arc::clone(&calls));

    let settled = queue
        .enqueue("lamp", Command::new(LightAction::Brightness(30), "req-1"))
        .await
        .unwrap();

    assert_eq!(settled.value, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_queued_command_surfaces_exhaustion() {
    let calls = Arc::new(AtomicU32::new(0));
    let queue = retrying_queue(u32::MAX, Arc::clone(&calls));

    let result = queue
        .enqueue("lamp", Command::new(LightAction::Brightness(30), "req-1"))
        .await;

    assert_eq!(
        result,
        Err(QueueError::Upstream(UpstreamError::status(503, "busy")))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_rejects_every_merged_request() {
    let queue = CommandQueue::with_settings(Duration::from_millis(200), None, |_, _| async {
        RetryExecutor::new(RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50)))
            .execute(|| async { Err::<(), _>(UpstreamError::status(400, "invalid level")) })
            .await
    });

    // Both land in the waiting list before the drain task first runs.
    let first = queue.submit("lamp", Command::new(LightAction::Brightness(30), "a"));
    let second = queue.submit("lamp", Command::new(LightAction::Brightness(40), "b"));
    let (first, second) = tokio::join!(first, second);

    let expected = Err(QueueError::Upstream(UpstreamError::status(400, "invalid level")));
    assert_eq!(first, expected);
    assert_eq!(second, expected);
}
