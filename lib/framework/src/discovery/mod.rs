mod target;

use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tokio::time::{Instant, MissedTickBehavior};

use crate::context::Context;
pub use target::{ADDRESS_LABEL, LabelSet, META_LABEL_PREFIX, TargetGroup};

/// `run` drives a periodic discoverer, those with a WATCH mechanism should not
/// use it.
///
/// Targets are refreshed right away, then once per `interval`. Every refresh
/// gets a child of `cx`, so shutdown interrupts the in-flight one. A failed
/// refresh is logged and nothing is published, consumers keep the targets of
/// the last successful one.
///
/// The loop ends when `cx` is cancelled or the receiving side of `output`
/// is dropped.
pub async fn run<R>(
    name: &str,
    interval: Duration,
    cx: Context,
    mut refresh: R,
    output: Sender<Vec<TargetGroup>>,
) where
    R: AsyncFnMut(Context) -> crate::Result<Vec<TargetGroup>>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cx.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let start = Instant::now();
        match refresh(cx.child()).await {
            Ok(groups) => {
                debug!(
                    message = "refresh target groups finished",
                    discoverer = name,
                    groups = groups.len(),
                    targets = groups.iter().map(TargetGroup::len).sum::<usize>(),
                    elapsed = ?start.elapsed(),
                );

                tokio::select! {
                    biased;

                    _ = cx.cancelled() => break,
                    result = output.send(groups) => {
                        if result.is_err() {
                            warn!(message = "publish target groups failed", discoverer = name);
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                if cx.is_cancelled() {
                    break;
                }

                warn!(
                    message = "unable to refresh target groups",
                    discoverer = name,
                    %err,
                );
            }
        }
    }

    debug!(message = "discoverer stopped", discoverer = name);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn refresh_immediately_and_periodically() {
        let (tx, mut rx) = mpsc::channel(4);
        let cx = Context::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let handle = tokio::spawn(run(
            "test",
            Duration::from_secs(10),
            cx.clone(),
            async move |_cx| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![TargetGroup::new(format!("source-{n}"))])
            },
            tx,
        ));

        let first = rx.recv().await.unwrap();
        assert_eq!(first, vec![TargetGroup::new("source-0")]);

        let second = rx.recv().await.unwrap();
        assert_eq!(second, vec![TargetGroup::new("source-1")]);

        cx.cancel();
        handle.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_going_after_failure() {
        let (tx, mut rx) = mpsc::channel(4);
        let cx = Context::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let handle = tokio::spawn(run(
            "test",
            Duration::from_secs(1),
            cx.clone(),
            async move |_cx| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err("connection refused".into());
                }

                Ok(vec![TargetGroup::new("ok")])
            },
            tx,
        ));

        let got = rx.recv().await.unwrap();
        assert_eq!(got, vec![TargetGroup::new("ok")]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cx.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stop_when_cancelled_during_refresh() {
        let (tx, mut rx) = mpsc::channel(1);
        let cx = Context::new();

        let handle = tokio::spawn(run(
            "test",
            Duration::from_secs(1),
            cx.clone(),
            async |cx: Context| {
                cx.run(std::future::pending::<()>()).await?;
                Ok(vec![])
            },
            tx,
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        cx.cancel();

        handle.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn stop_when_output_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        tokio::time::timeout(
            Duration::from_secs(5),
            run(
                "test",
                Duration::from_millis(10),
                Context::new(),
                async |_cx| Ok(vec![TargetGroup::new("dropped")]),
                tx,
            ),
        )
        .await
        .unwrap();
    }
}
