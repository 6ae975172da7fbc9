use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Funnels background job completions back to the owning thread.
///
/// Each submitted job runs on its own background thread, mirroring the
/// one-offloaded-call-per-attempt model of the localization engine. Any
/// number of jobs may be in flight concurrently; their results queue up in
/// a channel and are drained serially on whichever thread calls
/// [`Funnel::try_recv`]. That single drain point is what lets everything
/// downstream stay lock-free.
#[derive(Debug)]
pub(crate) struct Funnel<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    in_flight: Arc<AtomicUsize>,
}

impl<T: Send + 'static> Funnel<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Runs `job` on a background thread and queues its result. A result is
    /// never lost: if the owning side has gone away the send just fails and
    /// the thread exits.
    ///
    /// The result is queued before the job stops counting as in flight, so
    /// once [`Funnel::in_flight`] reads zero every completed result is
    /// already visible to [`Funnel::try_recv`]. The send cannot block; the
    /// channel is unbounded.
    pub fn submit(&self, job: impl FnOnce() -> T + Send + 'static) {
        let tx = self.tx.clone();
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::SeqCst);
        thread::spawn(move || {
            let result = job();
            let _ = tx.send(result);
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Takes the next completed result, in completion order, if any.
    pub fn try_recv(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Number of jobs submitted but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn completions_are_drained_in_completion_order() {
        let funnel: Funnel<u32> = Funnel::new();
        funnel.submit(|| {
            thread::sleep(Duration::from_millis(50));
            1
        });
        funnel.submit(|| 2);

        let mut received = Vec::new();
        while received.len() < 2 {
            if let Some(v) = funnel.try_recv() {
                received.push(v);
            } else {
                thread::sleep(Duration::from_millis(5));
            }
        }
        // The quick job resumes first even though it was issued second.
        assert_eq!(received, vec![2, 1]);
        assert_eq!(funnel.in_flight(), 0);
    }

    #[test]
    fn drained_in_flight_count_implies_result_is_queued() {
        // Waiting for the in-flight count to reach zero and then draining
        // must never miss a completed result, even for jobs that finish
        // immediately.
        let funnel: Funnel<u32> = Funnel::new();
        for i in 0..10_000 {
            funnel.submit(move || i);
            while funnel.in_flight() > 0 {
                std::hint::spin_loop();
            }
            assert_eq!(funnel.try_recv(), Some(i), "completed result not queued");
        }
    }
}
