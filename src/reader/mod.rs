mod live_buffer;

pub use live_buffer::{LiveBuffer, LiveReader};

use bytes::Bytes;

pub trait AppendableDataWrapper {
    /// 添加数据
    fn append_chunk(&mut self, chunk: Bytes);
    /// 完成数据添加
    fn complete(&mut self);
    /// 数据流异常中断
    fn fail(&mut self);
}
