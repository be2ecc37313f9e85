use std::time::{Duration, Instant};

use super::model::{Challenge, ChallengeState, CompletionReason, LastVerdict, StateChange};
use crate::bridge::BridgeMessage;
use crate::config::Config;
use crate::error::EngineError;
use crate::geo::{self, GeoPoint};
use crate::pose::MatchVerdict;

/// 判定を進捗に変えるときの設定
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    /// 完了に必要な `matched = true` の継続時間
    pub sustain: Duration,
    /// 途中で圏外に出てもレップ数を残す
    pub keep_progress_on_exit: bool,
}

impl SessionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sustain: Duration::from_millis(config.tracking.sustain_ms),
            keep_progress_on_exit: config.session.keep_progress_on_exit,
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 開いている 1 つのチャレンジの状態。
///
/// 純粋な状態機械で、トラッカーの起動や停止はしない。遷移を返し、それに応じて runner が動く。
#[derive(Debug, Clone)]
pub struct ChallengeSession {
    challenge: Challenge,
    policy: SessionPolicy,
    current_distance_km: Option<f64>,
    state: ChallengeState,
    rep_count: u32,
    last_verdict: Option<LastVerdict>,
    matched_since: Option<Instant>,
    completion: Option<CompletionReason>,
}

impl ChallengeSession {
    pub fn new(challenge: Challenge, policy: SessionPolicy) -> Self {
        Self {
            challenge,
            policy,
            current_distance_km: None,
            state: ChallengeState::Locked,
            rep_count: 0,
            last_verdict: None,
            matched_since: None,
            completion: None,
        }
    }

    pub fn challenge(&self) -> &Challenge {
        &self.challenge
    }

    pub fn state(&self) -> ChallengeState {
        self.state
    }

    pub fn current_distance_km(&self) -> Option<f64> {
        self.current_distance_km
    }

    pub fn rep_count(&self) -> u32 {
        self.rep_count
    }

    pub fn last_verdict(&self) -> Option<&LastVerdict> {
        self.last_verdict.as_ref()
    }

    pub fn completion(&self) -> Option<CompletionReason> {
        self.completion
    }

    /// 位置が分かっていて圏内
    pub fn can_start(&self) -> bool {
        geo::within_radius(self.current_distance_km, self.challenge.unlock_radius_km)
    }

    /// 新しい位置情報。`None` は取得できなかったことを表す。
    pub fn update_location(&mut self, reading: Option<GeoPoint>) -> Option<StateChange> {
        let distance = reading.map(|p| geo::distance_km(p, self.challenge.location));
        self.set_distance(distance)
    }

    pub fn set_distance(&mut self, distance_km: Option<f64>) -> Option<StateChange> {
        self.current_distance_km = distance_km;
        let inside = self.can_start();

        match self.state {
            ChallengeState::Locked if inside => self.transition(ChallengeState::Unlockable),
            ChallengeState::Unlockable if !inside => self.transition(ChallengeState::Locked),
            // 位置が取れなくなっただけでは中断しない
            ChallengeState::Active if distance_km.is_some() && !inside => {
                log::info!(
                    "left the geofence ({:.3} km > {} km), stopping challenge",
                    distance_km.unwrap_or_default(),
                    self.challenge.unlock_radius_km
                );
                self.interrupt()
            }
            _ => None,
        }
    }

    /// 今「開始」できるか
    pub fn check_startable(&self) -> Result<(), EngineError> {
        match self.state {
            ChallengeState::Unlockable if self.can_start() => Ok(()),
            ChallengeState::Locked | ChallengeState::Unlockable => Err(EngineError::NotStartable {
                reason: match self.current_distance_km {
                    Some(d) => format!(
                        "{:.1} km away, need to be within {} km",
                        d, self.challenge.unlock_radius_km
                    ),
                    None => "location unavailable".to_string(),
                },
            }),
            state => Err(EngineError::InvalidTransition {
                from: state.as_str(),
                action: "start",
            }),
        }
    }

    /// ユーザーによる「開始」
    pub fn start(&mut self) -> Result<StateChange, EngineError> {
        self.check_startable()?;
        self.matched_since = None;
        self.last_verdict = None;
        Ok(self.set_state(ChallengeState::Active))
    }

    pub fn apply_verdict(&mut self, verdict: MatchVerdict, at: Instant) -> Option<StateChange> {
        if self.state != ChallengeState::Active {
            return None;
        }
        self.last_verdict = Some(LastVerdict::Match(verdict));

        if !verdict.matched {
            self.matched_since = None;
            return None;
        }
        let since = *self.matched_since.get_or_insert(at);
        if at.saturating_duration_since(since) >= self.policy.sustain {
            return self.complete(CompletionReason::SustainedMatch);
        }
        None
    }

    /// 人が映っていない。継続判定はやり直し。
    pub fn apply_no_person(&mut self) {
        if self.state == ChallengeState::Active {
            self.matched_since = None;
        }
    }

    /// ターゲットが変わったので、それまでの継続判定は無効
    pub fn reset_match_streak(&mut self) {
        self.matched_since = None;
    }

    pub fn apply_bridge(&mut self, msg: &BridgeMessage) -> Option<StateChange> {
        if self.state != ChallengeState::Active {
            return None;
        }
        self.last_verdict = Some(LastVerdict::Bridge(msg.clone()));

        if let BridgeMessage::RepCounter { current_count } = msg {
            self.rep_count = *current_count;
            if self.rep_count >= self.challenge.rep_target {
                return self.complete(CompletionReason::RepTarget);
            }
        }
        None
    }

    /// 埋め込みトラッカーが完了を通知しないときの暫定完了
    pub fn apply_fallback(&mut self) -> Option<StateChange> {
        if self.state != ChallengeState::Active {
            return None;
        }
        self.complete(CompletionReason::FallbackTimeout)
    }

    /// 実行中のトラッカーが止まった
    pub fn tracking_failed(&mut self) -> Option<StateChange> {
        if self.state != ChallengeState::Active {
            return None;
        }
        self.interrupt()
    }

    /// ユーザーが挑戦を中断した
    pub fn abandon(&mut self) -> Option<StateChange> {
        if self.state != ChallengeState::Active {
            return None;
        }
        self.interrupt()
    }

    fn interrupt(&mut self) -> Option<StateChange> {
        self.matched_since = None;
        if !self.policy.keep_progress_on_exit {
            self.rep_count = 0;
        }
        let from = self.state;
        self.set_state(ChallengeState::Unlockable);
        // 圏外ならそのまま Locked まで戻す
        if !self.can_start() {
            self.set_state(ChallengeState::Locked);
        }
        Some(StateChange {
            from,
            to: self.state,
        })
    }

    fn complete(&mut self, reason: CompletionReason) -> Option<StateChange> {
        self.completion = Some(reason);
        log::info!("challenge {:?} completed ({:?})", self.challenge.title, reason);
        self.transition(ChallengeState::Completed)
    }

    fn transition(&mut self, to: ChallengeState) -> Option<StateChange> {
        if self.state == to {
            return None;
        }
        Some(self.set_state(to))
    }

    fn set_state(&mut self, to: ChallengeState) -> StateChange {
        let change = StateChange {
            from: self.state,
            to,
        };
        log::debug!("challenge state {} -> {}", change.from, change.to);
        self.state = to;
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AWAY_5KM: GeoPoint = GeoPoint { latitude: 51.4749, longitude: -0.0364 };

    fn policy(sustain_ms: u64, keep_progress: bool) -> SessionPolicy {
        SessionPolicy {
            sustain: Duration::from_millis(sustain_ms),
            keep_progress_on_exit: keep_progress,
        }
    }

    fn session(sustain_ms: u64) -> ChallengeSession {
        ChallengeSession::new(Challenge::london_bridge_pushups(), policy(sustain_ms, false))
    }

    fn at_challenge(s: &mut ChallengeSession) {
        let location = s.challenge().location;
        s.update_location(Some(location));
    }

    const MATCH: MatchVerdict = MatchVerdict { score: 5, matched: true };
    const MISS: MatchVerdict = MatchVerdict { score: 1, matched: false };

    #[test]
    fn test_starts_locked_without_location() {
        let s = session(0);
        assert_eq!(s.state(), ChallengeState::Locked);
        assert_eq!(s.current_distance_km(), None);
        assert!(!s.can_start());
    }

    #[test]
    fn test_unlock_at_exact_location() {
        let mut s = session(0);
        let location = s.challenge().location;
        let change = s.update_location(Some(location));
        assert_eq!(
            change,
            Some(StateChange { from: ChallengeState::Locked, to: ChallengeState::Unlockable })
        );
        assert_eq!(s.current_distance_km(), Some(0.0));
        assert!(s.can_start());
    }

    #[test]
    fn test_can_start_boundary() {
        let mut s = session(0);
        assert!(s.set_distance(Some(0.1)).is_some());
        assert!(s.can_start());
        s.set_distance(Some(0.1001));
        assert!(!s.can_start());
        assert_eq!(s.state(), ChallengeState::Locked);
    }

    #[test]
    fn test_far_away_start_rejected() {
        let mut s = session(0);
        assert!(s.update_location(Some(AWAY_5KM)).is_none());
        assert_eq!(s.state(), ChallengeState::Locked);
        let err = s.start().unwrap_err();
        assert!(matches!(err, EngineError::NotStartable { .. }));
        assert!(err.to_string().contains("km away"));
        assert_eq!(s.state(), ChallengeState::Locked);
    }

    #[test]
    fn test_start_without_location_rejected() {
        let mut s = session(0);
        s.update_location(None);
        let err = s.start().unwrap_err();
        assert!(err.to_string().contains("location unavailable"));
    }

    #[test]
    fn test_sustained_match_completes() {
        let mut s = session(2000);
        at_challenge(&mut s);
        s.start().unwrap();
        assert_eq!(s.state(), ChallengeState::Active);

        let t0 = Instant::now();
        assert!(s.apply_verdict(MATCH, t0).is_none());
        assert!(s.apply_verdict(MATCH, t0 + Duration::from_millis(1000)).is_none());
        let change = s.apply_verdict(MATCH, t0 + Duration::from_millis(2000));
        assert_eq!(
            change,
            Some(StateChange { from: ChallengeState::Active, to: ChallengeState::Completed })
        );
        assert_eq!(s.completion(), Some(CompletionReason::SustainedMatch));
        assert_eq!(s.last_verdict(), Some(&LastVerdict::Match(MATCH)));
    }

    #[test]
    fn test_miss_resets_streak() {
        let mut s = session(1000);
        at_challenge(&mut s);
        s.start().unwrap();

        let t0 = Instant::now();
        s.apply_verdict(MATCH, t0);
        s.apply_verdict(MISS, t0 + Duration::from_millis(900));
        assert!(s.apply_verdict(MATCH, t0 + Duration::from_millis(1100)).is_none());
        assert!(s.apply_verdict(MATCH, t0 + Duration::from_millis(1900)).is_none());
        assert!(s.apply_verdict(MATCH, t0 + Duration::from_millis(2100)).is_some());
    }

    #[test]
    fn test_no_person_resets_streak() {
        let mut s = session(1000);
        at_challenge(&mut s);
        s.start().unwrap();

        let t0 = Instant::now();
        s.apply_verdict(MATCH, t0);
        s.apply_no_person();
        assert!(s.apply_verdict(MATCH, t0 + Duration::from_millis(1500)).is_none());
        assert_eq!(s.state(), ChallengeState::Active);
    }

    #[test]
    fn test_zero_sustain_completes_on_first_match() {
        let mut s = session(0);
        at_challenge(&mut s);
        s.start().unwrap();
        assert!(s.apply_verdict(MATCH, Instant::now()).is_some());
        assert_eq!(s.state(), ChallengeState::Completed);
    }

    #[test]
    fn test_verdicts_ignored_unless_active() {
        let mut s = session(0);
        at_challenge(&mut s);
        assert!(s.apply_verdict(MATCH, Instant::now()).is_none());
        assert!(s.apply_bridge(&BridgeMessage::RepCounter { current_count: 99 }).is_none());
        assert!(s.apply_fallback().is_none());
        assert_eq!(s.state(), ChallengeState::Unlockable);
        assert_eq!(s.rep_count(), 0);
    }

    #[test]
    fn test_rep_target_completes() {
        let mut s = session(0);
        at_challenge(&mut s);
        s.start().unwrap();

        for n in 1..10 {
            assert!(s.apply_bridge(&BridgeMessage::RepCounter { current_count: n }).is_none());
        }
        assert_eq!(s.rep_count(), 9);
        let change = s.apply_bridge(&BridgeMessage::RepCounter { current_count: 10 });
        assert_eq!(change.map(|c| c.to), Some(ChallengeState::Completed));
        assert_eq!(s.completion(), Some(CompletionReason::RepTarget));
    }

    #[test]
    fn test_status_messages_do_not_complete() {
        let mut s = session(0);
        at_challenge(&mut s);
        s.start().unwrap();
        let status = BridgeMessage::PoseTrackerStatus {
            kind: Some("posture".into()),
            ready: Some(true),
            posture_direction: None,
        };
        assert!(s.apply_bridge(&status).is_none());
        assert_eq!(s.last_verdict(), Some(&LastVerdict::Bridge(status)));
    }

    #[test]
    fn test_fallback_completes() {
        let mut s = session(0);
        at_challenge(&mut s);
        s.start().unwrap();
        assert!(s.apply_fallback().is_some());
        assert_eq!(s.completion(), Some(CompletionReason::FallbackTimeout));
    }

    #[test]
    fn test_completed_is_terminal() {
        let mut s = session(0);
        at_challenge(&mut s);
        s.start().unwrap();
        s.apply_fallback();

        assert!(s.update_location(Some(AWAY_5KM)).is_none());
        assert_eq!(s.state(), ChallengeState::Completed);
        assert!(matches!(s.start(), Err(EngineError::InvalidTransition { .. })));
        assert!(s.tracking_failed().is_none());
    }

    #[test]
    fn test_geofence_exit_reverts_and_resets() {
        let mut s = session(0);
        at_challenge(&mut s);
        s.start().unwrap();
        s.apply_bridge(&BridgeMessage::RepCounter { current_count: 4 });

        let change = s.update_location(Some(AWAY_5KM)).unwrap();
        assert_eq!(change.from, ChallengeState::Active);
        assert_eq!(change.to, ChallengeState::Locked);
        assert_eq!(s.rep_count(), 0);

        // 戻ってきたら再開できる
        at_challenge(&mut s);
        assert_eq!(s.state(), ChallengeState::Unlockable);
        assert!(s.start().is_ok());
    }

    #[test]
    fn test_geofence_exit_keeps_progress_when_configured() {
        let mut s = ChallengeSession::new(Challenge::london_bridge_pushups(), policy(0, true));
        at_challenge(&mut s);
        s.start().unwrap();
        s.apply_bridge(&BridgeMessage::RepCounter { current_count: 4 });
        s.update_location(Some(AWAY_5KM));
        assert_eq!(s.rep_count(), 4);
    }

    #[test]
    fn test_location_loss_does_not_stop_active() {
        let mut s = session(0);
        at_challenge(&mut s);
        s.start().unwrap();
        assert!(s.update_location(None).is_none());
        assert_eq!(s.state(), ChallengeState::Active);
    }

    #[test]
    fn test_tracking_failure_reverts_to_unlockable() {
        let mut s = session(0);
        at_challenge(&mut s);
        s.start().unwrap();
        let change = s.tracking_failed().unwrap();
        assert_eq!(change.to, ChallengeState::Unlockable);
        assert!(s.tracking_failed().is_none());
    }

    #[test]
    fn test_abandon_reverts_to_unlockable() {
        let mut s = session(0);
        at_challenge(&mut s);
        assert!(s.abandon().is_none());
        s.start().unwrap();
        let change = s.abandon().unwrap();
        assert_eq!(change.to, ChallengeState::Unlockable);
        assert_eq!(s.rep_count(), 0);
    }

    #[test]
    fn test_double_start_rejected() {
        let mut s = session(0);
        at_challenge(&mut s);
        s.start().unwrap();
        assert!(matches!(s.start(), Err(EngineError::InvalidTransition { from: "Active", .. })));
    }
}
