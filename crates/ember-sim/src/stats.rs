use ember_sched::{Message, SchedState};

/// Scale factor keeping the sum of squared loop times inside 32 bits.
const STATS_SUMSQ_BASE: u64 = 256;

/// Accumulates task-loop timing and reports it periodically.
///
/// Each task-loop iteration contributes its tick range; a `stats` message is
/// emitted once the periodic report deadline passes, after which the
/// accumulators restart.
#[derive(Debug, Default)]
pub struct LoopStats {
    count: u32,
    sum: u32,
    sumsq: u32,
    report_deadline: u32,
}

impl LoopStats {
    pub fn update(&mut self, sched: &mut SchedState, start: u32, cur: u32) {
        let diff = cur.wrapping_sub(start);
        self.count = self.count.wrapping_add(1);
        self.sum = self.sum.wrapping_add(diff);
        let sq = (u64::from(diff) * u64::from(diff)) / STATS_SUMSQ_BASE;
        self.sumsq = self.sumsq.saturating_add(sq.min(u64::from(u32::MAX)) as u32);

        if !sched.check_periodic(&mut self.report_deadline) {
            return;
        }
        sched.send(Message::Stats {
            count: self.count,
            sum: self.sum,
            sumsq: self.sumsq,
        });
        self.count = 0;
        self.sum = 0;
        self.sumsq = 0;
    }
}
