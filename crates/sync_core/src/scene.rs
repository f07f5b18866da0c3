//! # Scene Transitions
//!
//! Per-session state machine gating scene progression:
//!
//! ```text
//! Exploring ──all members in zone──▶ CountdownPending ──timer──▶ Transitioning
//!     ▲                                   │                          │
//!     └──────────any member leaves────────┘       next scene ◀───────┤
//!                                                                    ▼
//!                                                                  Ended
//! ```
//!
//! The countdown timer is stored next to the zone membership it depends on,
//! and every operation that breaks the "everyone is in their zone" condition
//! cancels it in the same call.

use crate::timer::DeadlineTimer;
use crate::types::{CharacterId, SceneId, SessionCode};
use std::collections::{BTreeSet, HashMap};
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPhase {
    Exploring,
    CountdownPending,
    Transitioning,
    Ended,
}

/// Side effect of a zone change that peers must hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneEvent {
    Unchanged,
    CountdownStarted { time_left: Duration },
    Canceled,
}

#[derive(Debug)]
pub struct SceneProgress {
    pub scene_id: SceneId,
    pub phase: TransitionPhase,
    zone_members: BTreeSet<CharacterId>,
    countdown: Option<DeadlineTimer>,
}

impl SceneProgress {
    fn new(scene_id: SceneId) -> Self {
        Self {
            scene_id,
            phase: TransitionPhase::Exploring,
            zone_members: BTreeSet::new(),
            countdown: None,
        }
    }

    pub fn zone_members(&self) -> &BTreeSet<CharacterId> {
        &self.zone_members
    }

    pub fn countdown_deadline(&self) -> Option<Instant> {
        self.countdown.as_ref().map(DeadlineTimer::deadline)
    }

    fn covers(&self, members: &[CharacterId]) -> bool {
        !members.is_empty() && members.iter().all(|id| self.zone_members.contains(id))
    }

    fn cancel_countdown(&mut self) -> ZoneEvent {
        if self.phase != TransitionPhase::CountdownPending {
            return ZoneEvent::Unchanged;
        }
        if let Some(mut timer) = self.countdown.take() {
            timer.cancel();
        }
        self.phase = TransitionPhase::Exploring;
        ZoneEvent::Canceled
    }

    /// Re-checks the trigger condition after a membership or zone change.
    fn reevaluate(&mut self, members: &[CharacterId], countdown: Duration) -> ZoneEvent {
        match self.phase {
            TransitionPhase::Exploring if self.covers(members) => {
                self.countdown = Some(DeadlineTimer::start(countdown));
                self.phase = TransitionPhase::CountdownPending;
                ZoneEvent::CountdownStarted { time_left: countdown }
            }
            TransitionPhase::CountdownPending if !self.covers(members) => self.cancel_countdown(),
            _ => ZoneEvent::Unchanged,
        }
    }
}

#[derive(Debug)]
pub struct SceneTransitionController {
    sessions: HashMap<SessionCode, SceneProgress>,
    countdown: Duration,
}

impl SceneTransitionController {
    pub fn new(countdown: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            countdown,
        }
    }

    /// Starts tracking a session at its first scene.
    pub fn begin(&mut self, code: &SessionCode, scene_id: impl Into<SceneId>) {
        self.sessions.insert(code.clone(), SceneProgress::new(scene_id.into()));
    }

    pub fn progress(&self, code: &SessionCode) -> Option<&SceneProgress> {
        self.sessions.get(code)
    }

    pub fn phase(&self, code: &SessionCode) -> Option<TransitionPhase> {
        self.sessions.get(code).map(|p| p.phase)
    }

    pub fn scene_id(&self, code: &SessionCode) -> Option<&str> {
        self.sessions.get(code).map(|p| p.scene_id.as_str())
    }

    pub fn is_in_zone(&self, code: &SessionCode, character_id: CharacterId) -> bool {
        self.sessions.get(code).is_some_and(|p| p.zone_members.contains(&character_id))
    }

    /// Records a server-verified zone entry. `members` is the full member
    /// set of the session.
    pub fn enter_zone(&mut self, code: &SessionCode, character_id: CharacterId, members: &[CharacterId]) -> ZoneEvent {
        let Some(progress) = self.sessions.get_mut(code) else {
            return ZoneEvent::Unchanged;
        };
        if !matches!(progress.phase, TransitionPhase::Exploring | TransitionPhase::CountdownPending) {
            return ZoneEvent::Unchanged;
        }

        if progress.zone_members.insert(character_id) {
            debug!("Character {} entered the zone in session {}", character_id, code);
        }
        let event = progress.reevaluate(members, self.countdown);
        if let ZoneEvent::CountdownStarted { .. } = event {
            info!("⏳ Session {} countdown started for scene '{}'", code, progress.scene_id);
        }
        event
    }

    /// Records a zone exit, cancelling a running countdown.
    pub fn leave_zone(&mut self, code: &SessionCode, character_id: CharacterId) -> ZoneEvent {
        let Some(progress) = self.sessions.get_mut(code) else {
            return ZoneEvent::Unchanged;
        };
        if !progress.zone_members.remove(&character_id) {
            return ZoneEvent::Unchanged;
        }
        let event = progress.cancel_countdown();
        if event == ZoneEvent::Canceled {
            info!("✋ Session {} countdown canceled, character {} left the zone", code, character_id);
        }
        event
    }

    /// Drops a member who left the session and re-checks the remaining ones.
    pub fn remove_member(&mut self, code: &SessionCode, character_id: CharacterId, remaining: &[CharacterId]) -> ZoneEvent {
        let Some(progress) = self.sessions.get_mut(code) else {
            return ZoneEvent::Unchanged;
        };
        progress.zone_members.remove(&character_id);
        progress.reevaluate(remaining, self.countdown)
    }

    /// Sessions whose countdown has run out. They move to `Transitioning`
    /// and must be finished with [`complete_transition`](Self::complete_transition).
    pub fn expired(&mut self, now: Instant) -> Vec<SessionCode> {
        let mut due = Vec::new();
        for (code, progress) in self.sessions.iter_mut() {
            let expired = progress.phase == TransitionPhase::CountdownPending
                && progress.countdown.as_ref().is_some_and(|t| t.is_expired(now));
            if expired {
                progress.countdown = None;
                progress.phase = TransitionPhase::Transitioning;
                due.push(code.clone());
            }
        }
        due.sort();
        due
    }

    /// Finishes a transition: `Some(scene)` moves on, `None` ends the run.
    pub fn complete_transition(&mut self, code: &SessionCode, next: Option<SceneId>) {
        let Some(progress) = self.sessions.get_mut(code) else {
            return;
        };
        progress.zone_members.clear();
        progress.countdown = None;
        match next {
            Some(scene_id) => {
                progress.scene_id = scene_id;
                progress.phase = TransitionPhase::Exploring;
            }
            None => progress.phase = TransitionPhase::Ended,
        }
    }

    pub fn remove_session(&mut self, code: &SessionCode) {
        self.sessions.remove(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: CharacterId = CharacterId(1);
    const B: CharacterId = CharacterId(2);

    fn controller() -> (SceneTransitionController, SessionCode) {
        let mut controller = SceneTransitionController::new(Duration::from_secs(2));
        let code = SessionCode::new("ABCDEF");
        controller.begin(&code, "forest_clearing");
        (controller, code)
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_starts_only_when_everyone_is_in() {
        let (mut controller, code) = controller();
        assert_eq!(controller.enter_zone(&code, A, &[A, B]), ZoneEvent::Unchanged);
        assert_eq!(
            controller.enter_zone(&code, B, &[A, B]),
            ZoneEvent::CountdownStarted { time_left: Duration::from_secs(2) }
        );
        assert_eq!(controller.phase(&code), Some(TransitionPhase::CountdownPending));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(controller.expired(Instant::now()), vec![code.clone()]);
        assert_eq!(controller.phase(&code), Some(TransitionPhase::Transitioning));
        // Zone changes during a transition are ignored.
        assert_eq!(controller.leave_zone(&code, A), ZoneEvent::Unchanged);

        controller.complete_transition(&code, Some("ruined_keep".into()));
        assert_eq!(controller.scene_id(&code), Some("ruined_keep"));
        assert!(controller.progress(&code).is_some_and(|p| p.zone_members().is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_cancels_atomically() {
        let (mut controller, code) = controller();
        controller.enter_zone(&code, A, &[A, B]);
        controller.enter_zone(&code, B, &[A, B]);

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(controller.leave_zone(&code, B), ZoneEvent::Canceled);
        assert_eq!(controller.phase(&code), Some(TransitionPhase::Exploring));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(controller.expired(Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn member_leaving_session_can_complete_the_set() {
        let (mut controller, code) = controller();
        controller.enter_zone(&code, A, &[A, B]);
        let event = controller.remove_member(&code, B, &[A]);
        assert!(matches!(event, ZoneEvent::CountdownStarted { .. }));
    }

    #[test]
    fn ending_the_run_is_terminal() {
        let (mut controller, code) = controller();
        controller.complete_transition(&code, None);
        assert_eq!(controller.phase(&code), Some(TransitionPhase::Ended));
        assert_eq!(controller.enter_zone(&code, A, &[A]), ZoneEvent::Unchanged);
    }
}
