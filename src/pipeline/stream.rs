//! 流式片段缓冲
//!
//! 小状态机：Accumulating（攒片段）→ FlushPending（遇到句/行边界且长度达到阈值）→ 推出一段后回到 Accumulating；
//! 流结束时进入 Draining，把剩余尾巴作为最后一段推出，然后 Finished。
//! 所有推出的片段按顺序拼接，恰好等于完整累积文本。

/// 触发推送的边界字符
const BOUNDARY_CHARS: [char; 4] = ['.', '!', '?', '\n'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Accumulating,
    FlushPending,
    Draining,
    Finished,
}

#[derive(Debug)]
pub struct ChunkBuffer {
    state: BufferState,
    buffer: String,
    accumulated: String,
    min_flush_chars: usize,
}

impl ChunkBuffer {
    pub fn new(min_flush_chars: usize) -> Self {
        Self {
            state: BufferState::Accumulating,
            buffer: String::new(),
            accumulated: String::new(),
            min_flush_chars,
        }
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// 目前收到的全部文本
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// 追加一个片段；满足推送条件时返回要推送的一段
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        if matches!(self.state, BufferState::Draining | BufferState::Finished) {
            tracing::warn!("fragment after stream end ignored");
            return None;
        }
        if fragment.is_empty() {
            return None;
        }
        self.accumulated.push_str(fragment);
        self.buffer.push_str(fragment);

        if self.ready_to_flush() {
            self.state = BufferState::FlushPending;
        }
        self.take_pending()
    }

    /// 流结束：推出剩余内容（若有）
    pub fn finish(&mut self) -> Option<String> {
        if self.state == BufferState::Finished {
            return None;
        }
        self.state = BufferState::Draining;
        let tail = std::mem::take(&mut self.buffer);
        self.state = BufferState::Finished;
        if tail.is_empty() {
            None
        } else {
            Some(tail)
        }
    }

    /// 结束并取出完整文本
    pub fn into_accumulated(self) -> String {
        self.accumulated
    }

    fn ready_to_flush(&self) -> bool {
        self.buffer.contains(&BOUNDARY_CHARS[..]) && self.buffer.chars().count() >= self.min_flush_chars
    }

    fn take_pending(&mut self) -> Option<String> {
        if self.state != BufferState::FlushPending {
            return None;
        }
        self.state = BufferState::Accumulating;
        Some(std::mem::take(&mut self.buffer))
    }
}
