//! 수신 청크 버퍼
//!
//! 한 번에 하나의 수신 전송만 조립한다. 청크 페이로드는 도착 순서대로
//! 뒤에 붙고, 마지막 청크에서 한 번 꺼낸 뒤 비워진다.

use bytes::{Bytes, BytesMut};

/// 수신 중인 콘텐츠 누적 버퍼
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    /// 누적 데이터
    data: BytesMut,

    /// 현재까지 수신한 바이트 수
    current_size: u64,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 청크 추가
    pub fn add_chunk(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
        self.current_size += chunk.len() as u64;
    }

    /// 현재까지 수신한 바이트 수
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    pub fn is_empty(&self) -> bool {
        self.current_size == 0
    }

    /// 누적 데이터를 꺼내고 버퍼를 비움
    pub fn take(&mut self) -> Bytes {
        self.current_size = 0;
        self.data.split().freeze()
    }

    /// 누적 데이터 폐기
    pub fn reset(&mut self) {
        self.data.clear();
        self.current_size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_and_take() {
        let mut buffer = ReceiveBuffer::new();
        buffer.add_chunk(&[1u8; 100]);
        buffer.add_chunk(&[2u8; 50]);
        assert_eq!(buffer.current_size(), 150);

        let data = buffer.take();
        assert_eq!(data.len(), 150);
        assert_eq!(&data[..100], &[1u8; 100][..]);
        assert_eq!(&data[100..], &[2u8; 50][..]);

        assert!(buffer.is_empty());
        assert_eq!(buffer.take().len(), 0);
    }

    #[test]
    fn test_reset() {
        let mut buffer = ReceiveBuffer::new();
        buffer.add_chunk(b"partial");
        buffer.reset();
        assert_eq!(buffer.current_size(), 0);

        buffer.add_chunk(b"next");
        assert_eq!(&buffer.take()[..], b"next");
    }
}
