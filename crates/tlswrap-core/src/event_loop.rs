use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    rc::Rc,
};

type Task = Box<dyn FnOnce()>;

/// 单线程协作式事件循环，承担“异步回调永不同步触发”的契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 传输层与流适配器都承诺：`on_read`/`on_complete` 不会在注册它们的调用内部同步触发；
///   否则调用方在 `write` 返回前就会被重入，破坏状态机；
/// - 真实部署中该角色由外部 reactor 扮演，本结构是它的最小替身：一个先进先出的延迟任务队列。
///
/// ## 逻辑（How）
/// - `defer` 把闭包压入队尾；
/// - `turn` 取出当前队列中已有的任务逐个执行，执行期间新压入的任务留到下一轮；
/// - `run_until_idle` 重复 `turn` 直到队列为空，返回执行的任务总数。
///
/// ## 契约（What）
/// - 句柄可廉价克隆，所有克隆共享同一个队列；
/// - 任务在持有队列借用之外执行，任务内部可以继续 `defer`；
/// - **前置条件**：只在创建它的线程上使用（`Rc` 保证 `!Send`）。
///
/// ## 风险与权衡（Trade-offs）
/// - 不提供定时器与 I/O 轮询，调用方若在任务中无限 `defer` 自身，`run_until_idle` 不会返回；
///   需要上限时改用 [`EventLoop::run_bounded`]。
#[derive(Clone, Default)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

#[derive(Default)]
struct LoopInner {
    queue: RefCell<VecDeque<Task>>,
    executed: Cell<u64>,
}

impl EventLoop {
    /// 创建空事件循环。
    pub fn new() -> Self {
        Self::default()
    }

    /// 延迟执行一个任务。
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.inner.queue.borrow_mut().push_back(Box::new(task));
    }

    /// 当前排队的任务数。
    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// 自创建以来执行过的任务总数。
    pub fn executed(&self) -> u64 {
        self.inner.executed.get()
    }

    /// 执行一轮：只处理调用时已在队列中的任务。
    pub fn turn(&self) -> usize {
        let batch = self.inner.queue.borrow().len();
        let mut ran = 0;
        for _ in 0..batch {
            let task = self.inner.queue.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        self.inner.executed.set(self.inner.executed.get() + ran as u64);
        ran
    }

    /// 持续执行直到队列为空。
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.turn();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    /// 最多执行 `max_turns` 轮，返回队列是否已经清空。
    pub fn run_bounded(&self, max_turns: usize) -> bool {
        for _ in 0..max_turns {
            if self.turn() == 0 {
                return true;
            }
        }
        self.pending() == 0
    }

    /// 两个句柄是否指向同一个循环。
    pub fn same_loop(&self, other: &EventLoop) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .field("executed", &self.executed())
            .finish()
    }
}
