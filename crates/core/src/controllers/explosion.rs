//! Explosion Control
//!
//! Drives the exploded-view/assembly animation of the building model. The
//! simulation is the authority on the animation: commands sent from here do
//! not touch local state, which only follows `ExplosionUpdate` telemetry.

use crate::bus::{MessageBus, Subscription, lock};
use crate::protocol::{InboundEvent, OutboundTag};
use crate::throttle::Throttle;
use crate::{EventSender, SessionEvent, emit};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

pub const EXPLODE_KEYWORD: &str = "explode";
pub const ASSEMBLE_KEYWORD: &str = "assemble";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExplosionState {
    pub explosion_value: f64,
    pub is_animating: bool,
}

pub struct ExplosionController {
    bus: MessageBus,
    state: Arc<Mutex<ExplosionState>>,
    subscription: Subscription,
}

impl ExplosionController {
    pub fn attach(bus: &MessageBus, events: Option<EventSender>) -> Self {
        let state = Arc::new(Mutex::new(ExplosionState::default()));
        let listener_state = state.clone();
        let subscription = bus.on_message(move |event| {
            let InboundEvent::ExplosionUpdate {
                value,
                is_animating,
            } = event
            else {
                return;
            };
            let next = ExplosionState {
                explosion_value: *value,
                is_animating: *is_animating,
            };
            let mut current = lock(&listener_state);
            if *current != next {
                *current = next;
                drop(current);
                debug!(value, is_animating, "Explosion state updated");
                emit(&events, SessionEvent::ExplosionUpdated(next));
            }
        });
        Self {
            bus: bus.clone(),
            state,
            subscription,
        }
    }

    pub fn state(&self) -> ExplosionState {
        *lock(&self.state)
    }

    /// Requests an explosion level in `0.0..=1.0`. Out-of-range values are
    /// clamped, non-finite values become `0`.
    pub fn set_explosion_level(&self, level: f64) {
        send_level(&self.bus, level);
    }

    pub fn explode_building(&self) {
        self.bus
            .send_message(OutboundTag::ExplosionControl, EXPLODE_KEYWORD);
    }

    pub fn assemble_building(&self) {
        self.bus
            .send_message(OutboundTag::ExplosionControl, ASSEMBLE_KEYWORD);
    }

    /// A rate-limited `set_explosion_level` for slider input.
    pub fn throttled_level(&self, interval: Duration) -> Throttle<f64> {
        let bus = self.bus.clone();
        Throttle::new(interval, move |level| send_level(&bus, level))
    }

    pub fn detach(&self) {
        self.subscription.unsubscribe();
    }
}

fn send_level(bus: &MessageBus, level: f64) {
    let level = if level.is_finite() {
        level.clamp(0.0, 1.0)
    } else {
        0.0
    };
    bus.send_message(OutboundTag::ExplosionLevel, &level.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecordingTransport;
    use approx::assert_abs_diff_eq;
    use tokio::sync::mpsc;

    fn setup() -> (MessageBus, Arc<RecordingTransport>, ExplosionController) {
        let transport = Arc::new(RecordingTransport::new());
        let bus = MessageBus::new(transport.clone());
        let controller = ExplosionController::attach(&bus, None);
        (bus, transport, controller)
    }

    #[test]
    fn test_follows_remote_telemetry() {
        let (bus, _, controller) = setup();
        bus.dispatch_frame("ExplosionUpdate:0.4:true");
        let state = controller.state();
        assert_abs_diff_eq!(state.explosion_value, 0.4);
        assert!(state.is_animating);

        bus.dispatch_frame("ExplosionUpdate:1:false");
        assert_abs_diff_eq!(controller.state().explosion_value, 1.0);
        assert!(!controller.state().is_animating);
    }

    #[test]
    fn test_ignores_other_tags() {
        let (bus, _, controller) = setup();
        bus.dispatch_frame("TaskProgress:3");
        bus.dispatch_frame("ToolChange:0.9");
        assert_eq!(controller.state(), ExplosionState::default());
    }

    #[test]
    fn test_repeated_command_sends_twice_without_local_change() {
        let (bus, transport, controller) = setup();
        controller.explode_building();
        controller.explode_building();
        assert_eq!(
            transport.frames(),
            vec!["ExplosionControl:explode", "ExplosionControl:explode"]
        );
        assert_eq!(controller.state(), ExplosionState::default());

        bus.dispatch_frame("ExplosionUpdate:1:false");
        let after_one = controller.state();
        bus.dispatch_frame("ExplosionUpdate:1:false");
        assert_eq!(controller.state(), after_one);
    }

    #[test]
    fn test_level_is_clamped_and_stringified() {
        let (_, transport, controller) = setup();
        controller.set_explosion_level(0.5);
        controller.set_explosion_level(3.0);
        controller.set_explosion_level(-1.0);
        controller.set_explosion_level(f64::NAN);
        controller.assemble_building();
        assert_eq!(
            transport.frames(),
            vec![
                "ExplosionLevel:0.5",
                "ExplosionLevel:1",
                "ExplosionLevel:0",
                "ExplosionLevel:0",
                "ExplosionControl:assemble",
            ]
        );
    }

    #[test]
    fn test_emits_only_on_change() {
        let transport = Arc::new(RecordingTransport::new());
        let bus = MessageBus::new(transport);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _controller = ExplosionController::attach(&bus, Some(tx));

        bus.dispatch_frame("ExplosionUpdate:0.2:true");
        bus.dispatch_frame("ExplosionUpdate:0.2:true");
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::ExplosionUpdated(ExplosionState { is_animating: true, .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_detach_stops_updates() {
        let (bus, _, controller) = setup();
        controller.detach();
        bus.dispatch_frame("ExplosionUpdate:0.7:true");
        assert_eq!(controller.state(), ExplosionState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_level_collapses_slider_burst() {
        let (_, transport, controller) = setup();
        let throttled = controller.throttled_level(Duration::from_millis(100));
        for level in [0.1, 0.2, 0.3, 0.4, 0.5] {
            throttled.call(level);
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            transport.frames(),
            vec!["ExplosionLevel:0.1", "ExplosionLevel:0.5"]
        );
    }
}
