use crossbeam_utils::sync::WaitGroup;
use parking_lot::Mutex;

/// loader 任务的固定大小 worker 池。
///
/// rayon 提供线程池，屏障语义用 WaitGroup 实现：每个任务持有当前
/// epoch 的一个 clone，`wait_all` 把 epoch 换新后等旧 epoch 的 clone
/// 全部落地，即“等到目前为止提交的所有任务”。屏障期间新提交的任务
/// 挂在新 epoch 上，不会被误等。
pub struct ThreadPool {
    pool: rayon::ThreadPool,
    epoch: Mutex<WaitGroup>,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|index| format!("mirage-loader-{}", index))
            .build()
            .expect("failed to create loader thread pool");
        Self {
            pool,
            epoch: Mutex::new(WaitGroup::new()),
        }
    }

    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.epoch.lock().clone();
        self.pool.spawn(move || {
            task();
            drop(guard);
        });
    }

    /// 阻塞直到此前提交的所有任务完成。
    pub fn wait_all(&self) {
        let previous = {
            let mut epoch = self.epoch.lock();
            std::mem::replace(&mut *epoch, WaitGroup::new())
        };
        previous.wait();
    }

    pub fn size(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // 保证排队中的任务先跑完，再让 rayon 收线程
        self.wait_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn wait_all_is_a_barrier() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let counter = counter.clone();
            pool.submit(move || {
                std::thread::sleep(std::time::Duration::from_micros(100));
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.wait_all();
        assert_eq!(counter.load(Ordering::Relaxed), 64);

        // 空屏障直接返回
        pool.wait_all();
    }

    #[test]
    fn barrier_covers_only_prior_submissions() {
        let pool = Arc::new(ThreadPool::new(2));
        let counter = Arc::new(AtomicUsize::new(0));

        for round in 0..8 {
            for _ in 0..8 {
                let counter = counter.clone();
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
            pool.wait_all();
            assert_eq!(counter.load(Ordering::Relaxed), (round + 1) * 8);
        }
    }

    #[test]
    fn size_respects_request() {
        assert_eq!(ThreadPool::new(3).size(), 3);
        assert_eq!(ThreadPool::new(0).size(), 1);
    }
}
