use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use mirage_gfx::{GfxEvent, GfxResult, GfxStream};

/// 一次异步请求处理的完成句柄。
///
/// `wait` 是真正的阻塞等待（condvar 风格）。传入 event 时会在 host 工作
/// 完成后把 event 录在发起该批次的 render stream 上（不是拷贝用的
/// copy stream），调用方后续的 stream 工作由此依赖上传完成。
pub struct Ticket {
    inner: Option<Arc<TicketInner>>,
}

impl Ticket {
    /// 空 ticket：没有任何任务，立即处于完成态。
    pub fn completed() -> Self {
        Self { inner: None }
    }

    pub(crate) fn new(stream: GfxStream) -> (Self, Arc<TicketInner>) {
        let inner = Arc::new(TicketInner {
            stream,
            state: Mutex::new(false),
            cv: Condvar::new(),
        });
        (
            Self {
                inner: Some(inner.clone()),
            },
            inner,
        )
    }

    /// 总任务数；空 ticket 为 0，否则恒为 1。
    pub fn tasks_total(&self) -> usize {
        usize::from(self.inner.is_some())
    }

    /// 尚未完成的任务数。
    pub fn tasks_remaining(&self) -> usize {
        match &self.inner {
            Some(inner) => usize::from(!*inner.state.lock()),
            None => 0,
        }
    }

    /// 阻塞到 host 工作完成。`event` 非 None 时随后录制在原 render
    /// stream 上。
    pub fn wait(&self, event: Option<&GfxEvent>) -> GfxResult<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        {
            let mut done = inner.state.lock();
            while !*done {
                inner.cv.wait(&mut done);
            }
        }
        if let Some(event) = event {
            event.record(&inner.stream)?;
        }
        Ok(())
    }
}

pub(crate) struct TicketInner {
    stream: GfxStream,
    state: Mutex<bool>,
    cv: Condvar,
}

impl TicketInner {
    pub fn mark_done(&self) {
        let mut done = self.state.lock();
        *done = true;
        self.cv.notify_all();
    }
}

type WorkerJob = Box<dyn FnOnce() + Send>;

/// 服务异步完成路径的单个后台线程。
///
/// 任务通过 channel 投递；teardown 时先关 sender 再 join，排队中的
/// 任务会先跑完（引擎保证在此之前 in-flight 已 drain）。
pub(crate) struct TicketWorker {
    sender: Option<crossbeam_channel::Sender<WorkerJob>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TicketWorker {
    pub fn spawn() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<WorkerJob>();
        let thread = std::thread::Builder::new()
            .name("mirage-ticket-worker".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            })
            .expect("failed to spawn ticket worker thread");
        Self {
            sender: Some(tx),
            thread: Some(thread),
        }
    }

    /// 投递失败（worker 已关闭）返回 false，调用方自行收尾。
    pub fn submit(&self, job: WorkerJob) -> bool {
        match &self.sender {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        }
    }
}

impl Drop for TicketWorker {
    fn drop(&mut self) {
        // 必须先 drop sender，否则 recv 一直阻塞，join 死锁
        self.sender = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("ticket worker thread panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use mirage_gfx::{GfxDevice, HostBackend};

    fn stream() -> GfxStream {
        let device = GfxDevice::new(Arc::new(HostBackend::new()));
        GfxStream::new(&device).unwrap()
    }

    #[test]
    fn empty_ticket_is_done() {
        let ticket = Ticket::completed();
        assert_eq!(ticket.tasks_total(), 0);
        assert_eq!(ticket.tasks_remaining(), 0);
        ticket.wait(None).unwrap();
    }

    #[test]
    fn wait_blocks_until_marked_done() {
        let (ticket, inner) = Ticket::new(stream());
        assert_eq!(ticket.tasks_total(), 1);
        assert_eq!(ticket.tasks_remaining(), 1);

        let flag = Arc::new(AtomicBool::new(false));
        let worker_flag = flag.clone();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            worker_flag.store(true, Ordering::Release);
            inner.mark_done();
        });

        ticket.wait(None).unwrap();
        assert!(flag.load(Ordering::Acquire));
        assert_eq!(ticket.tasks_remaining(), 0);
        worker.join().unwrap();

        // 再次 wait 直接返回
        ticket.wait(None).unwrap();
    }

    #[test]
    fn wait_records_event_on_origin_stream() {
        let device = GfxDevice::new(Arc::new(HostBackend::new()));
        let render_stream = GfxStream::new(&device).unwrap();
        let (ticket, inner) = Ticket::new(render_stream);
        inner.mark_done();

        let event = GfxEvent::new(&device).unwrap();
        ticket.wait(Some(&event)).unwrap();
        event.synchronize().unwrap();
    }

    #[test]
    fn worker_runs_jobs_in_order() {
        let worker = TicketWorker::spawn();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let log = log.clone();
            assert!(worker.submit(Box::new(move || log.lock().push(i))));
        }
        drop(worker);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
    }
}
