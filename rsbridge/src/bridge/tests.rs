#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use rand::Rng;
    use rsbridge_sys::sim::SimSdk;

    use crate::bridge::*;
    use crate::{Api, HostConfig};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn host_with(backpressure: Backpressure) -> Host {
        let config = HostConfig {
            backpressure,
            ..Default::default()
        };
        Host::with_config(Api::new(SimSdk::new()), config)
    }

    #[derive(Default)]
    struct Outcomes {
        run: Mutex<Vec<usize>>,
        released: Mutex<Vec<usize>>,
    }

    impl Outcomes {
        fn run(&self) -> Vec<usize> {
            self.run.lock().unwrap().clone()
        }

        fn released(&self) -> Vec<usize> {
            self.released.lock().unwrap().clone()
        }
    }

    struct Tracked {
        id: usize,
        outcomes: Arc<Outcomes>,
        /// How long every tenth event takes to run.
        slow: Duration,
    }

    impl Tracked {
        fn boxed(id: usize, outcomes: &Arc<Outcomes>) -> Box<Self> {
            Self::slow(id, outcomes, Duration::from_millis(1))
        }

        fn slow(id: usize, outcomes: &Arc<Outcomes>, slow: Duration) -> Box<Self> {
            Box::new(Self {
                id,
                outcomes: outcomes.clone(),
                slow,
            })
        }
    }

    impl PendingEvent for Tracked {
        fn run(self: Box<Self>, _host: &Host) {
            if self.id % 10 == 0 {
                thread::sleep(self.slow);
            }
            self.outcomes.run.lock().unwrap().push(self.id);
        }

        fn release(self: Box<Self>) {
            self.outcomes.released.lock().unwrap().push(self.id);
        }
    }

    /// Submits from several threads while the consumer dispatches a random number of times, then
    /// tears the relay down and checks every event was run or released exactly once.
    fn run_and_tear_down(slow: Duration) {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let host = host_with(Backpressure::Unbounded);
        let outcomes = Arc::new(Outcomes::default());
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let notifier = host.notifier();
                let outcomes = outcomes.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let id = producer * PER_PRODUCER + i;
                        let _ = notifier.notify_main_thread(Tracked::slow(id, &outcomes, slow));
                    }
                })
            })
            .collect();

        let teardown_at = rand::thread_rng().gen_range(1..40);
        for _ in 0..teardown_at {
            host.dispatch_timeout(Duration::from_millis(2));
        }
        host.shutdown();
        for producer in producers {
            producer.join().unwrap();
        }

        let run = outcomes.run();
        let released = outcomes.released();
        assert_eq!(run.len() + released.len(), PRODUCERS * PER_PRODUCER);

        let run_ids: HashSet<_> = run.iter().copied().collect();
        let released_ids: HashSet<_> = released.iter().copied().collect();
        assert_eq!(run_ids.len(), run.len());
        assert_eq!(released_ids.len(), released.len());
        assert!(run_ids.is_disjoint(&released_ids));

        let stats = host.bridge_stats();
        assert_eq!(stats.submitted, (PRODUCERS * PER_PRODUCER) as u64);
        assert_eq!(stats.run + stats.released, stats.submitted);
        assert_eq!(stats.run, run.len() as u64);
    }

    #[test]
    fn test_every_event_is_run_or_released_once() {
        init();
        run_and_tear_down(Duration::from_millis(1));
    }

    #[test]
    fn test_slow_events_are_run_or_released_once() {
        init();
        run_and_tear_down(Duration::from_millis(50));
    }

    #[test]
    fn test_zero_capacity_block_is_raised_to_one() {
        init();
        let host = host_with(Backpressure::Block(0));
        let outcomes = Arc::new(Outcomes::default());

        let notifier = host.notifier();
        let producer = {
            let outcomes = outcomes.clone();
            thread::spawn(move || {
                for id in 0..2 {
                    notifier
                        .notify_main_thread(Tracked::boxed(id, &outcomes))
                        .unwrap();
                }
            })
        };

        let mut delivered = 0;
        for _ in 0..50 {
            delivered += host.dispatch_timeout(Duration::from_millis(100));
            if delivered == 2 {
                break;
            }
        }
        producer.join().unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(outcomes.run(), vec![0, 1]);
        assert!(outcomes.released().is_empty());
    }

    #[test]
    fn test_zero_capacity_drop_newest_is_raised_to_one() {
        init();
        let host = host_with(Backpressure::DropNewest(0));
        let outcomes = Arc::new(Outcomes::default());
        let notifier = host.notifier();

        notifier
            .notify_main_thread(Tracked::boxed(0, &outcomes))
            .unwrap();
        assert_eq!(
            notifier.notify_main_thread(Tracked::boxed(1, &outcomes)),
            Err(SubmitError::Overflow)
        );

        assert_eq!(host.dispatch(), 1);
        assert_eq!(outcomes.run(), vec![0]);
        assert_eq!(outcomes.released(), vec![1]);
    }

    #[test]
    fn test_events_keep_submission_order_per_producer() {
        init();
        let host = host_with(Backpressure::Unbounded);
        let outcomes = Arc::new(Outcomes::default());
        let producers: Vec<_> = (0..2)
            .map(|producer| {
                let notifier = host.notifier();
                let outcomes = outcomes.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        notifier
                            .notify_main_thread(Tracked::boxed(producer * 1000 + i, &outcomes))
                            .unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(host.pending(), 200);
        assert_eq!(host.dispatch(), 200);

        let run = outcomes.run();
        for producer in 0..2 {
            let ids: Vec<_> = run
                .iter()
                .copied()
                .filter(|id| id / 1000 == producer)
                .collect();
            let expected: Vec<_> = (0..100).map(|i| producer * 1000 + i).collect();
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn test_submit_after_teardown_is_released() {
        init();
        let host = host_with(Backpressure::Unbounded);
        let outcomes = Arc::new(Outcomes::default());
        let notifier = host.notifier();

        notifier
            .notify_main_thread(Tracked::boxed(1, &outcomes))
            .unwrap();
        assert_eq!(host.shutdown(), 1);
        assert!(!notifier.is_open());

        assert_eq!(
            notifier.notify_main_thread(Tracked::boxed(2, &outcomes)),
            Err(SubmitError::TornDown)
        );
        assert_eq!(
            host.notifier()
                .notify_main_thread(Tracked::boxed(3, &outcomes)),
            Err(SubmitError::TornDown)
        );
        assert_eq!(host.dispatch(), 0);

        assert!(outcomes.run().is_empty());
        assert_eq!(outcomes.released(), vec![1, 2, 3]);
        let stats = host.bridge_stats();
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.released, 3);
    }

    #[test]
    fn test_shutdown_before_first_use_refuses_submissions() {
        init();
        let host = host_with(Backpressure::Unbounded);
        let outcomes = Arc::new(Outcomes::default());

        assert_eq!(host.shutdown(), 0);
        assert_eq!(
            host.notifier()
                .notify_main_thread(Tracked::boxed(7, &outcomes)),
            Err(SubmitError::TornDown)
        );
        assert_eq!(outcomes.released(), vec![7]);
    }

    #[test]
    fn test_drop_newest_releases_overflow() {
        init();
        let host = host_with(Backpressure::DropNewest(2));
        let outcomes = Arc::new(Outcomes::default());
        let notifier = host.notifier();

        for id in 0..2 {
            notifier
                .notify_main_thread(Tracked::boxed(id, &outcomes))
                .unwrap();
        }
        assert_eq!(
            notifier.notify_main_thread(Tracked::boxed(2, &outcomes)),
            Err(SubmitError::Overflow)
        );
        assert_eq!(outcomes.released(), vec![2]);

        assert_eq!(host.dispatch(), 2);
        assert_eq!(outcomes.run(), vec![0, 1]);
        assert_eq!(host.bridge_stats().rejected, 1);
    }

    #[test]
    fn test_block_waits_for_the_consumer() {
        init();
        let host = host_with(Backpressure::Block(1));
        let outcomes = Arc::new(Outcomes::default());
        let accepted = Arc::new(AtomicUsize::new(0));

        let notifier = host.notifier();
        let producer = {
            let outcomes = outcomes.clone();
            let accepted = accepted.clone();
            thread::spawn(move || {
                for id in 0..3 {
                    notifier
                        .notify_main_thread(Tracked::boxed(id, &outcomes))
                        .unwrap();
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(host.pending(), 1);

        let mut delivered = 0;
        while delivered < 3 {
            delivered += host.dispatch_timeout(Duration::from_millis(100));
        }
        producer.join().unwrap();

        assert_eq!(outcomes.run(), vec![0, 1, 2]);
        assert!(outcomes.released().is_empty());
    }

    #[test]
    fn test_dropping_the_host_releases_pending_events() {
        init();
        let host = host_with(Backpressure::Unbounded);
        let outcomes = Arc::new(Outcomes::default());
        let notifier = host.notifier();

        for id in 0..5 {
            notifier
                .notify_main_thread(Tracked::boxed(id, &outcomes))
                .unwrap();
        }
        drop(host);

        assert_eq!(outcomes.released(), vec![0, 1, 2, 3, 4]);
        assert_eq!(
            notifier.notify_main_thread(Tracked::boxed(5, &outcomes)),
            Err(SubmitError::TornDown)
        );
    }
}
