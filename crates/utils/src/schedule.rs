use std::future::Future;
use std::time::Duration;

/// Run `f` every `every`, waiting out an optional jitter delay first.
/// Never returns; callers spawn it on its own task.
pub async fn schedule<F, Fut>(f: F, every: Duration, delay: Duration)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    if delay > Duration::ZERO {
        tokio::time::sleep(delay).await;
    }

    let mut interval = tokio::time::interval(every);
    // the first tick of a tokio interval fires immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        f().await;
    }
}

/// Run `f` once now, then on every interval tick.
pub async fn schedule_and_run_now<F, Fut>(f: F, every: Duration)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    f().await;
    schedule(f, every, Duration::ZERO).await;
}
