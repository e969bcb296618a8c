//! 트랜잭션 ID / 메시지 ID 생성기
//!
//! 64비트 난수를 16진수 토큰으로 만들고, 생성기 수명 동안 발급한 ID 와
//! 겹치지 않도록 검사한다. 생성기는 세션(연결)마다 하나씩 둔다.

use dashmap::DashSet;
use rand::Rng;

/// 연결 수명 범위에서 유일한 ID 생성기
#[derive(Debug, Default)]
pub struct TransactionIdGenerator {
    issued: DashSet<u64>,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 새 ID 발급
    pub fn next_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id: u64 = rng.gen();
            // 0 은 토큰 길이가 너무 짧아지므로 제외
            if id != 0 && self.issued.insert(id) {
                return format!("{:x}", id);
            }
        }
    }

    /// 발급한 ID 수
    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }
}
