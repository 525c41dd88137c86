/// Run a blocking job on a pooled worker.
///
/// When called from inside a tokio runtime the job goes to the runtime's
/// blocking pool; otherwise a short-lived named thread is used so that
/// library callers without a runtime still get fire-and-forget semantics.
pub fn spawn_pooled<F>(name: &str, func: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            drop(handle.spawn_blocking(func));
        }
        Err(_) => {
            if let Err(err) = std::thread::Builder::new()
                .name(format!("serimon-{name}"))
                .spawn(func)
            {
                log::error!("failed to spawn worker '{name}': {err}");
            }
        }
    }
}

/// Spawn a blocking task on the current runtime and keep its handle.
pub fn spawn_blocking_task<F, R>(func: F) -> tokio::task::JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn runs_without_runtime() {
        let (tx, rx) = flume::bounded(1);
        spawn_pooled("test", move || {
            let _ = tx.send(42);
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(42));
    }

    #[tokio::test]
    async fn runs_on_runtime_pool() {
        let (tx, rx) = flume::bounded(1);
        spawn_pooled("test", move || {
            let _ = tx.send(7);
        });
        assert_eq!(rx.recv_async().await, Ok(7));
    }

    #[tokio::test]
    async fn blocking_task_returns_value() {
        let value = spawn_blocking_task(|| 3 + 4).await.unwrap();
        assert_eq!(value, 7);
    }
}
