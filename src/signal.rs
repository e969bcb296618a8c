//! 대기 해제 신호
//!
//! 응답 대기와 REPORT 대기는 각각 독립된 `Signal` 을 사용한다.
//! 해제는 결과 값이 없는 "대기 중지" 신호일 뿐이며, 대기자는 `WaitOutcome` 으로
//! 실제 해제/타임아웃/세션 종료를 구분한다.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// 대기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 상대측 이벤트(응답, REPORT)로 해제됨
    Released,

    /// 타임아웃 경과
    TimedOut,

    /// 세션 종료로 해제됨
    Closed,
}

#[derive(Debug, Default)]
struct SignalState {
    /// 대기 전에 도착한 해제
    pending: bool,

    /// close 이후 영구 해제
    closed: bool,
}

/// 단일 대기자용 해제 신호
#[derive(Debug, Default)]
pub struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 이전 해제 기록을 지움
    ///
    /// 요청을 보내기 직전에 호출해야 그 요청 이전에 도착한 해제가 무시된다.
    pub fn arm(&self) {
        self.state.lock().pending = false;
    }

    /// 대기자 해제 (대기자가 없으면 다음 wait 가 즉시 반환)
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.pending = true;
        self.cond.notify_all();
    }

    /// 영구 해제. 이후 모든 wait 는 `Closed` 를 반환한다.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// 해제될 때까지 대기. `timeout` 이 None 이면 무기한.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return WaitOutcome::Closed;
            }
            if state.pending {
                state.pending = false;
                return WaitOutcome::Released;
            }

            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        if state.closed {
                            return WaitOutcome::Closed;
                        }
                        if state.pending {
                            state.pending = false;
                            return WaitOutcome::Released;
                        }
                        return WaitOutcome::TimedOut;
                    }
                }
                None => self.cond.wait(&mut state),
            }
        }
    }
}
