//! SkbQueue：帧的 FIFO

use alloc::collections::VecDeque;

use super::SkBuff;

#[derive(Debug, Default)]
pub struct SkbQueue {
    queue: VecDeque<SkBuff>,
}

impl SkbQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn push_tail(&mut self, skb: SkBuff) {
        self.queue.push_back(skb);
    }

    pub fn pop_head(&mut self) -> Option<SkBuff> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// 把 `other` 的全部帧接到队尾
    pub fn append(&mut self, other: &mut SkbQueue) {
        self.queue.append(&mut other.queue);
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkBuff> {
        self.queue.iter()
    }
}

impl Iterator for SkbQueue {
    type Item = SkBuff;

    fn next(&mut self) -> Option<SkBuff> {
        self.pop_head()
    }
}
