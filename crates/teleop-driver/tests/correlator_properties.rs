//! 关联器的属性测试（注入时钟）

use proptest::prelude::*;
use std::time::{Duration, Instant};
use teleop_driver::{
    CommandKind, Correlator, Resolution, RetryPolicies, TimeoutAction, TransportKind,
};

fn transport_strategy() -> impl Strategy<Value = TransportKind> {
    prop_oneof![Just(TransportKind::Serial), Just(TransportKind::Can)]
}

/// 以固定节拍推进时钟，收集所有超时动作
fn run_until(
    correlator: &mut Correlator,
    t0: Instant,
    from_ms: u64,
    to_ms: u64,
    step_ms: u64,
) -> Vec<TimeoutAction> {
    let mut actions = Vec::new();
    let mut t = from_ms;
    while t <= to_ms {
        actions.extend(correlator.tick(t0 + Duration::from_millis(t)));
        t += step_ms;
    }
    actions
}

proptest! {
    /// 无应答的版本请求：恰好 2 次重发后放弃，与节拍粒度无关
    #[test]
    fn unanswered_version_gives_up_after_three_attempts(
        transport in transport_strategy(),
        step_ms in 1u64..=250,
    ) {
        let mut correlator = Correlator::new(transport, RetryPolicies::default());
        let t0 = Instant::now();
        correlator.register(CommandKind::GetVersion, t0);

        let actions = run_until(&mut correlator, t0, 0, 10_000, step_ms);
        let resends = actions
            .iter()
            .filter(|a| matches!(a, TimeoutAction::Resend { .. }))
            .count();
        prop_assert_eq!(resends, 2);
        prop_assert_eq!(
            actions.last(),
            Some(&TimeoutAction::GiveUp { kind: CommandKind::GetVersion, attempts: 3 })
        );
        prop_assert_eq!(correlator.pending_count(), 0);
    }

    /// 在第 k 次尝试期间收到应答：完成且不再有后续动作
    #[test]
    fn response_between_attempts_cancels_next_retry(answer_ms in 0u64..3000) {
        let mut correlator = Correlator::new(TransportKind::Serial, RetryPolicies::default());
        let t0 = Instant::now();
        correlator.register(CommandKind::GetVersion, t0);

        let before = run_until(&mut correlator, t0, 0, answer_ms, 1);
        let expected_attempts = 1 + (answer_ms / 1000) as u8;
        prop_assert_eq!(before.len() as u8, expected_attempts - 1);

        let resolution = correlator.resolve(
            CommandKind::GetVersion,
            t0 + Duration::from_millis(answer_ms),
        );
        prop_assert_eq!(
            resolution,
            Resolution::Completed {
                attempts: expected_attempts,
                elapsed: Duration::from_millis(answer_ms),
            }
        );

        let after = run_until(&mut correlator, t0, answer_ms + 1, answer_ms + 5000, 7);
        prop_assert!(after.is_empty());

        // 迟到的重复应答只是被丢弃
        prop_assert_eq!(
            correlator.resolve(CommandKind::GetVersion, t0 + Duration::from_millis(answer_ms + 10)),
            Resolution::Unsolicited
        );
    }
}
