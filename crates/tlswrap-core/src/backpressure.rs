use std::fmt;

/// 背压判定所需的运行时快照。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 流适配器在把明文交给 TLS 引擎之前，需要知道“下游还堆着多少密文没送出去”，
///   否则调用方的写会无上限地转化为内存中的密文；
/// - 把指标收拢到一个结构里，使判定策略可以替换而无需改动适配器的泵循环。
///
/// ## 契约（What）
/// - `queued_writes`：调用方已提交、尚未完全交给引擎的写请求数；
/// - `transport_queue_bytes`：底层传输已受理但尚未完成的字节数；
/// - `outbound_bytes`：引擎出站通道中尚未交给传输的密文字节数；
/// - **后置条件**：该结构只是快照，不持有任何连接状态。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackpressureMetrics {
    /// 排队中的写请求数。
    pub queued_writes: usize,
    /// 传输写队列深度（字节）。
    pub transport_queue_bytes: usize,
    /// 引擎出站密文积压（字节）。
    pub outbound_bytes: usize,
}

impl BackpressureMetrics {
    /// 下游总积压：传输队列与出站通道之和。
    pub fn downstream_bytes(&self) -> usize {
        self.transport_queue_bytes
            .saturating_add(self.outbound_bytes)
    }
}

/// 背压决策。
///
/// - `Ready`：可以继续向引擎推送明文；
/// - `Busy`：下游积压超过高水位，等待传输写完成后再推进；
/// - `BudgetExhausted`：积压已超过硬上限，继续推送只会放大内存占用。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackpressureDecision {
    Ready,
    Busy,
    BudgetExhausted,
}

impl BackpressureDecision {
    /// 是否允许立即推送。
    pub fn is_ready(self) -> bool {
        matches!(self, BackpressureDecision::Ready)
    }
}

/// 背压分类器，把快照映射为决策。
///
/// 实现必须是纯函数式的快速判断；需要状态的策略请在内部自行持有。
pub trait BackpressureClassifier {
    /// 计算决策。
    fn classify(&self, metrics: &BackpressureMetrics) -> BackpressureDecision;
}

/// 基于高水位与硬上限的默认分类器。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// - 下游积压 `< high_water` 时返回 `Ready`；
/// - 介于 `high_water` 与 `hard_limit` 之间返回 `Busy`；
/// - 达到 `hard_limit` 返回 `BudgetExhausted`。
///
/// ## 风险与权衡（Trade-offs）
/// - 高水位取值过小会让每条记录都等待一次传输完成，吞吐下降；
///   过大则削弱背压的意义。默认值与一个 TLS 记录上限（16 KiB）的数倍对齐。
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WatermarkClassifier {
    high_water: usize,
    hard_limit: usize,
}

impl WatermarkClassifier {
    /// 构造分类器；`hard_limit` 小于 `high_water` 时取 `high_water`。
    pub fn new(high_water: usize, hard_limit: usize) -> Self {
        Self {
            high_water,
            hard_limit: hard_limit.max(high_water),
        }
    }

    /// 高水位。
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// 硬上限。
    pub fn hard_limit(&self) -> usize {
        self.hard_limit
    }
}

impl Default for WatermarkClassifier {
    fn default() -> Self {
        Self::new(64 * 1024, 1024 * 1024)
    }
}

impl fmt::Debug for WatermarkClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatermarkClassifier")
            .field("high_water", &self.high_water)
            .field("hard_limit", &self.hard_limit)
            .finish()
    }
}

impl BackpressureClassifier for WatermarkClassifier {
    fn classify(&self, metrics: &BackpressureMetrics) -> BackpressureDecision {
        let downstream = metrics.downstream_bytes();
        if downstream >= self.hard_limit {
            BackpressureDecision::BudgetExhausted
        } else if downstream >= self.high_water {
            BackpressureDecision::Busy
        } else {
            BackpressureDecision::Ready
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn watermarks_split_the_three_decisions() {
        let classifier = WatermarkClassifier::new(100, 400);
        let at = |transport, outbound| {
            classifier.classify(&BackpressureMetrics {
                queued_writes: 1,
                transport_queue_bytes: transport,
                outbound_bytes: outbound,
            })
        };
        assert_eq!(at(0, 99), BackpressureDecision::Ready);
        assert_eq!(at(50, 50), BackpressureDecision::Busy);
        assert_eq!(at(399, 1), BackpressureDecision::BudgetExhausted);
    }

    #[test]
    fn hard_limit_never_below_high_water() {
        let classifier = WatermarkClassifier::new(1000, 10);
        assert_eq!(classifier.hard_limit(), 1000);
    }

    proptest! {
        #[test]
        fn decision_is_monotonic_in_backlog(a in 0usize..1 << 20, b in 0usize..1 << 20) {
            let classifier = WatermarkClassifier::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let rank = |bytes| match classifier.classify(&BackpressureMetrics {
                queued_writes: 0,
                transport_queue_bytes: bytes,
                outbound_bytes: 0,
            }) {
                BackpressureDecision::Ready => 0,
                BackpressureDecision::Busy => 1,
                BackpressureDecision::BudgetExhausted => 2,
            };
            prop_assert!(rank(lo) <= rank(hi));
        }
    }
}
