use std::future::Future;
use std::time::Instant;

/// The way a measured future terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FutureCompletion {
    /// The future resolved to an `Ok`.
    Ok,
    /// The future resolved to an `Err`.
    Error,
    /// The future was dropped before completing.
    Dropped,
}

impl FutureCompletion {
    fn name(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "err",
            Self::Dropped => "dropped",
        }
    }
}

/// Emits a `futures.done` timer once, either on completion or when dropped.
#[derive(Debug)]
struct FutureMetric {
    task_name: &'static str,
    start: Instant,
    done: bool,
}

impl FutureMetric {
    fn new(task_name: &'static str) -> Self {
        Self {
            task_name,
            start: Instant::now(),
            done: false,
        }
    }

    fn complete(&mut self, completion: FutureCompletion) {
        if self.done {
            return;
        }
        self.done = true;

        metric!(
            timer("futures.done") = self.start.elapsed(),
            "task_name" => self.task_name,
            "status" => completion.name(),
        );
    }
}

impl Drop for FutureMetric {
    fn drop(&mut self) {
        self.complete(FutureCompletion::Dropped);
    }
}

/// Runs `f` to completion, emitting a `futures.done` timer tagged with `task_name` and the way
/// the future terminated.
pub async fn measure<F, T, E>(task_name: &'static str, f: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let mut metric = FutureMetric::new(task_name);
    let result = f.await;
    metric.complete(match result {
        Ok(_) => FutureCompletion::Ok,
        Err(_) => FutureCompletion::Error,
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_measure_passes_result_through() {
        assert_eq!(measure("test", async { Ok::<_, ()>(5) }).await, Ok(5));
        assert_eq!(measure("test", async { Err::<(), _>("no") }).await, Err("no"));
    }

    #[test]
    fn test_complete_once() {
        let mut metric = FutureMetric::new("test");
        metric.complete(FutureCompletion::Ok);
        assert!(metric.done);
        metric.complete(FutureCompletion::Error);
        drop(metric);
    }
}
