//! 流适配器配置。
//!
//! 配置以 TOML 形式声明，缺省字段取默认值：
//!
//! ```toml
//! read_chunk_size = 16384
//! write_high_water_mark = 65536
//! max_inbound_buffer = 1048576
//! engine_buffer_limit = 65536
//! allow_truncated_eof = false
//! ```

use serde::Deserialize;

use crate::{
    backpressure::WatermarkClassifier,
    error::{CoreError, Result, codes},
};

/// 单条连接的缓冲与背压参数。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `read_chunk_size`：单次向调用方交付的明文上限；
/// - `write_high_water_mark`：下游积压达到该值后暂停向引擎推送明文；
/// - `max_write_hard_limit`：下游积压的硬上限，超过即视为预算耗尽；
/// - `max_inbound_buffer`：入站密文通道上限，超出时连接以 OutOfMemory 失败；
/// - `engine_buffer_limit`：引擎内部待加密缓冲上限，决定 `push_plaintext` 的部分受理；
///   `None` 表示不限制；
/// - `max_write_chunk`：单次交给引擎的明文块上限，用于把大写切成多条记录；
/// - `allow_truncated_eof`：未收到 close_notify 的 EOF 是否按正常 EOF 处理。
///
/// ## 风险与权衡（Trade-offs）
/// - `max_inbound_buffer` 过小会让对端的一次正常突发被判定为内存耗尽；
/// - 开启 `allow_truncated_eof` 会放弃截断攻击检测，只应对明确以长度分帧的上层协议使用。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    pub read_chunk_size: usize,
    pub write_high_water_mark: usize,
    pub max_write_hard_limit: usize,
    pub max_inbound_buffer: usize,
    pub engine_buffer_limit: Option<usize>,
    pub max_write_chunk: usize,
    pub allow_truncated_eof: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 16 * 1024,
            write_high_water_mark: 64 * 1024,
            max_write_hard_limit: 1024 * 1024,
            max_inbound_buffer: 1024 * 1024,
            engine_buffer_limit: Some(64 * 1024),
            max_write_chunk: 16 * 1024,
            allow_truncated_eof: false,
        }
    }
}

impl StreamConfig {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: StreamConfig = toml::from_str(text).map_err(|err| {
            CoreError::new(codes::CONFIG_INVALID, "stream config: malformed toml").with_cause(err)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 校验取值。
    ///
    /// 所有尺寸必须为正；硬上限不得低于高水位。
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("read_chunk_size", self.read_chunk_size),
            ("write_high_water_mark", self.write_high_water_mark),
            ("max_write_hard_limit", self.max_write_hard_limit),
            ("max_inbound_buffer", self.max_inbound_buffer),
            ("max_write_chunk", self.max_write_chunk),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(CoreError::new(
                    codes::CONFIG_INVALID,
                    format!("stream config: `{name}` must be greater than zero"),
                ));
            }
        }
        if self.engine_buffer_limit == Some(0) {
            return Err(CoreError::new(
                codes::CONFIG_INVALID,
                "stream config: `engine_buffer_limit` must be greater than zero",
            ));
        }
        if self.max_write_hard_limit < self.write_high_water_mark {
            return Err(CoreError::new(
                codes::CONFIG_INVALID,
                "stream config: `max_write_hard_limit` is below `write_high_water_mark`",
            ));
        }
        Ok(())
    }

    /// 由水位参数构造默认背压分类器。
    pub fn classifier(&self) -> WatermarkClassifier {
        WatermarkClassifier::new(self.write_high_water_mark, self.max_write_hard_limit)
    }
}
