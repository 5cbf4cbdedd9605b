//! Multi-stage on/off sequencer.
//!
//! Stage *k* (1-based) is required once the control error reaches
//! `deadband + (k-1) * stage_increment` and, once on, is held until the error
//! falls `hysteresis` below that threshold. At most one stage changes per
//! evaluation and changes respect `minimum_runtime_ms` since the last change.
//! Breaching either hard limit drops every stage at once.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagingCfg {
    pub stages: usize,
    pub deadband: f64,
    pub stage_increment: f64,
    pub hysteresis: f64,
    pub minimum_runtime_ms: u64,
    /// Controlled value at or above this forces all stages off.
    pub high_limit: f64,
    /// Controlled value at or below this forces all stages off.
    pub low_limit: f64,
}

impl Default for StagingCfg {
    fn default() -> Self {
        Self {
            stages: 4,
            deadband: 1.75,
            stage_increment: 2.0,
            hysteresis: 0.5,
            minimum_runtime_ms: 300_000,
            high_limit: 65.0,
            low_limit: 35.0,
        }
    }
}

impl StagingCfg {
    /// Error at which stage `k` (1-based) turns on.
    pub fn threshold(&self, k: usize) -> f64 {
        self.deadband + (k.saturating_sub(1) as f64) * self.stage_increment
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub enabled: bool,
    pub started_at_ms: Option<u64>,
    pub runtime_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagingMemory {
    pub stages: Vec<StageState>,
    pub last_stage_change_ms: Option<u64>,
    /// Round-robin counter choosing the first stage started from all-off.
    pub rotation: u64,
    pub last_eval_ms: Option<u64>,
}

impl StagingMemory {
    pub fn active(&self) -> usize {
        self.stages.iter().filter(|s| s.enabled).count()
    }

    pub fn enabled(&self, idx: usize) -> bool {
        self.stages.get(idx).is_some_and(|s| s.enabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageChange {
    /// Stage index (0-based) switched on.
    Up(usize),
    /// Stage index (0-based) switched off.
    Down(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagingDecision {
    pub required: usize,
    pub active: usize,
    pub change: Option<StageChange>,
    /// A change was wanted but the minimum runtime has not elapsed.
    pub held_by_runtime: bool,
    pub emergency: Option<String>,
}

/// Number of stages the error calls for, given how many are already on.
pub fn required_stages(error: f64, active: usize, cfg: &StagingCfg) -> usize {
    if !error.is_finite() {
        return 0;
    }
    let mut n = 0;
    for k in 1..=cfg.stages {
        let on_at = cfg.threshold(k);
        let needed = if k <= active {
            error >= on_at - cfg.hysteresis
        } else {
            error >= on_at
        };
        if !needed {
            break;
        }
        n = k;
    }
    n
}

fn accumulate_runtime(mem: &mut StagingMemory, now_ms: u64) {
    if let Some(prev) = mem.last_eval_ms {
        let elapsed = now_ms.saturating_sub(prev);
        for s in mem.stages.iter_mut().filter(|s| s.enabled) {
            s.runtime_ms = s.runtime_ms.saturating_add(elapsed);
        }
    }
    mem.last_eval_ms = Some(now_ms);
}

fn stage_up(mem: &mut StagingMemory, now_ms: u64) -> Option<usize> {
    let n = mem.stages.len();
    if n == 0 {
        return None;
    }
    let idx = if mem.active() == 0 {
        let first = (mem.rotation % n as u64) as usize;
        mem.rotation = mem.rotation.wrapping_add(1);
        first
    } else {
        mem.stages.iter().position(|s| !s.enabled)?
    };
    let s = &mut mem.stages[idx];
    s.enabled = true;
    s.started_at_ms = Some(now_ms);
    Some(idx)
}

fn stage_down(mem: &mut StagingMemory) -> Option<usize> {
    let idx = mem
        .stages
        .iter()
        .enumerate()
        .filter(|(_, s)| s.enabled)
        .max_by_key(|(i, s)| (s.started_at_ms.unwrap_or(0), *i))
        .map(|(i, _)| i)?;
    let s = &mut mem.stages[idx];
    s.enabled = false;
    s.started_at_ms = None;
    Some(idx)
}

fn limit_breach(cfg: &StagingCfg, value: f64) -> Option<String> {
    if value >= cfg.high_limit {
        Some(format!("high limit: {value:.1} >= {:.1}", cfg.high_limit))
    } else if value <= cfg.low_limit {
        Some(format!("low limit: {value:.1} <= {:.1}", cfg.low_limit))
    } else {
        None
    }
}

fn prepare(cfg: &StagingCfg, mem: &mut StagingMemory, now_ms: u64) {
    if mem.stages.len() != cfg.stages {
        mem.stages.resize(cfg.stages, StageState::default());
    }
    accumulate_runtime(mem, now_ms);
}

fn drop_all(mem: &mut StagingMemory, now_ms: u64, emergency: Option<String>) -> StagingDecision {
    let was_active = mem.active();
    for s in &mut mem.stages {
        s.enabled = false;
        s.started_at_ms = None;
    }
    if was_active > 0 {
        mem.last_stage_change_ms = Some(now_ms);
    }
    StagingDecision {
        required: 0,
        active: 0,
        change: None,
        held_by_runtime: false,
        emergency,
    }
}

/// Turn every stage off at once, ignoring minimum runtime. Used when the unit
/// itself is disabled. Limit breaches are still reported.
pub fn shed_all(cfg: &StagingCfg, mem: &mut StagingMemory, value: f64, now_ms: u64) -> StagingDecision {
    prepare(cfg, mem, now_ms);
    drop_all(mem, now_ms, limit_breach(cfg, value))
}

/// One staging evaluation on `value` (the controlled variable) and `error`
/// (positive when more capacity is needed).
pub fn evaluate(
    cfg: &StagingCfg,
    mem: &mut StagingMemory,
    value: f64,
    error: f64,
    now_ms: u64,
) -> StagingDecision {
    prepare(cfg, mem, now_ms);
    if let Some(reason) = limit_breach(cfg, value) {
        return drop_all(mem, now_ms, Some(reason));
    }

    let active = mem.active();
    let required = required_stages(error, active, cfg);
    let mut decision = StagingDecision {
        required,
        active,
        change: None,
        held_by_runtime: false,
        emergency: None,
    };
    if required == active {
        return decision;
    }

    if let Some(last) = mem.last_stage_change_ms {
        if now_ms.saturating_sub(last) < cfg.minimum_runtime_ms {
            decision.held_by_runtime = true;
            return decision;
        }
    }

    let change = if required > active {
        stage_up(mem, now_ms).map(StageChange::Up)
    } else {
        stage_down(mem).map(StageChange::Down)
    };
    if change.is_some() {
        mem.last_stage_change_ms = Some(now_ms);
    }
    decision.change = change;
    decision.active = mem.active();
    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u64 = 300_000;

    fn cfg() -> StagingCfg {
        StagingCfg::default()
    }

    #[test]
    fn required_stage_thresholds() {
        let c = cfg();
        assert_eq!(required_stages(1.0, 0, &c), 0);
        assert_eq!(required_stages(1.75, 0, &c), 1);
        assert_eq!(required_stages(4.0, 0, &c), 2);
        assert_eq!(required_stages(8.0, 0, &c), 4);
        assert_eq!(required_stages(f64::NAN, 2, &c), 0);
    }

    #[test]
    fn hysteresis_holds_active_stage() {
        let c = cfg();
        // stage 2 turns on at 3.75 and stays down to 3.25
        assert_eq!(required_stages(3.5, 2, &c), 2);
        assert_eq!(required_stages(3.5, 1, &c), 1);
        assert_eq!(required_stages(3.2, 2, &c), 1);
    }

    #[test]
    fn adds_one_stage_per_evaluation() {
        let c = cfg();
        let mut m = StagingMemory::default();
        let mut now = 1_000_000;
        let d = evaluate(&c, &mut m, 50.0, 9.0, now);
        assert_eq!(d.required, 4);
        assert_eq!(d.active, 1);
        for expected in 2..=4 {
            now += MIN;
            let d = evaluate(&c, &mut m, 50.0, 9.0, now);
            assert_eq!(d.active, expected);
        }
    }

    #[test]
    fn minimum_runtime_blocks_change() {
        let c = cfg();
        let mut m = StagingMemory::default();
        evaluate(&c, &mut m, 50.0, 2.0, 1_000_000);
        let d = evaluate(&c, &mut m, 50.0, 9.0, 1_000_000 + MIN - 1);
        assert!(d.held_by_runtime);
        assert_eq!(d.change, None);
        assert_eq!(m.active(), 1);
        assert_eq!(m.last_stage_change_ms, Some(1_000_000));
    }

    #[test]
    fn first_stage_rotates_from_all_off() {
        let c = cfg();
        let mut m = StagingMemory::default();
        let mut now = 0;
        let mut firsts = Vec::new();
        for _ in 0..5 {
            now += MIN;
            let d = evaluate(&c, &mut m, 50.0, 2.0, now);
            if let Some(StageChange::Up(i)) = d.change {
                firsts.push(i);
            }
            now += MIN;
            evaluate(&c, &mut m, 50.0, 0.0, now);
        }
        assert_eq!(firsts, vec![0, 1, 2, 3, 0]);
    }

    #[test]
    fn stage_down_removes_most_recent() {
        let c = cfg();
        let mut m = StagingMemory::default();
        m.rotation = 2;
        let mut now = 0;
        for _ in 0..3 {
            now += MIN;
            evaluate(&c, &mut m, 50.0, 6.0, now);
        }
        // stage 3 first (rotation 2), then the lowest free: 1, then 2
        assert!(m.enabled(0) && m.enabled(1) && m.enabled(2));
        now += MIN;
        let d = evaluate(&c, &mut m, 50.0, 2.0, now);
        assert_eq!(d.change, Some(StageChange::Down(1)));
    }

    #[test]
    fn high_limit_forces_all_off_ignoring_runtime() {
        let c = cfg();
        let mut m = StagingMemory::default();
        evaluate(&c, &mut m, 50.0, 9.0, 1_000);
        assert_eq!(m.active(), 1);
        let d = evaluate(&c, &mut m, 65.0, 9.0, 2_000);
        assert_eq!(m.active(), 0);
        assert!(d.emergency.as_deref().is_some_and(|r| r.starts_with("high limit")));
    }

    #[test]
    fn low_limit_is_inclusive() {
        let c = cfg();
        let mut m = StagingMemory::default();
        let d = evaluate(&c, &mut m, 35.0, 9.0, 1_000);
        assert!(d.emergency.is_some());
        assert_eq!(d.active, 0);
    }

    #[test]
    fn runtime_accumulates_for_enabled_stages() {
        let c = cfg();
        let mut m = StagingMemory::default();
        evaluate(&c, &mut m, 50.0, 2.0, 1_000);
        evaluate(&c, &mut m, 50.0, 2.0, 61_000);
        assert_eq!(m.stages[0].runtime_ms, 60_000);
        assert_eq!(m.stages[1].runtime_ms, 0);
    }

    #[test]
    fn shed_all_drops_every_stage_inside_minimum_runtime() {
        let c = cfg();
        let mut m = StagingMemory::default();
        let mut now = 1_000_000;
        evaluate(&c, &mut m, 50.0, 9.0, now);
        now += MIN;
        evaluate(&c, &mut m, 50.0, 9.0, now);
        assert_eq!(m.active(), 2);

        let d = shed_all(&c, &mut m, 50.0, now + 1);
        assert_eq!(d.active, 0);
        assert_eq!(d.emergency, None);
        assert_eq!(m.active(), 0);
        assert!(m.stages.iter().all(|s| s.started_at_ms.is_none()));
        assert_eq!(m.last_stage_change_ms, Some(now + 1));
    }
}
