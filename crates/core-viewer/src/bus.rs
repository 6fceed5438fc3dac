//! Mouse event coalescing.
//!
//! Move, drag, and wheel events accumulate between 30 Hz ticks; each tick
//! flushes at most one move and one wheel call. Press and release never
//! pass through here; the viewer dispatches them immediately in arrival
//! order. Under outbound saturation the buffered state is kept for the next
//! tick instead of being dropped.

use core_events::MouseButton;

/// Latest pointer position, with the drag button when one is held.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingMove {
    pub x: f64,
    pub y: f64,
    /// Button held during a drag; `None` for a plain move.
    pub button: MouseButton,
    pub modifiers: u8,
}

/// Accumulated wheel deltas at the position of the most recent wheel event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingWheel {
    pub x: f64,
    pub y: f64,
    pub delta_x: f64,
    pub delta_y: f64,
    pub modifiers: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusFlush {
    pub movement: Option<PendingMove>,
    pub wheel: Option<PendingWheel>,
}

#[derive(Debug, Clone, Default)]
pub struct EventBus {
    movement: Option<PendingMove>,
    wheel: Option<PendingWheel>,
}

impl EventBus {
    /// Record a move or drag; only the most recent position survives.
    pub fn record_move(&mut self, x: f64, y: f64, button: MouseButton, modifiers: u8) {
        self.movement = Some(PendingMove {
            x,
            y,
            button,
            modifiers,
        });
    }

    /// Record wheel motion; deltas accumulate across the tick.
    pub fn record_wheel(&mut self, x: f64, y: f64, delta_x: f64, delta_y: f64, modifiers: u8) {
        let acc = self.wheel.take();
        self.wheel = Some(PendingWheel {
            x,
            y,
            delta_x: acc.map(|w| w.delta_x).unwrap_or(0.0) + delta_x,
            delta_y: acc.map(|w| w.delta_y).unwrap_or(0.0) + delta_y,
            modifiers,
        });
    }

    pub fn has_pending(&self) -> bool {
        self.movement.is_some() || self.wheel.is_some()
    }

    /// Consume the buffers for this tick. When `saturated`, the buffers are
    /// retained untouched and nothing is delivered.
    pub fn take_tick(&mut self, saturated: bool) -> BusFlush {
        if saturated {
            return BusFlush {
                movement: None,
                wheel: None,
            };
        }
        BusFlush {
            movement: self.movement.take(),
            wheel: self.wheel.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_latest_move_survives() {
        let mut bus = EventBus::default();
        bus.record_move(10.0, 10.0, MouseButton::None, 0);
        bus.record_move(20.0, 25.0, MouseButton::None, 0);
        bus.record_move(30.0, 35.0, MouseButton::None, 0);
        let flush = bus.take_tick(false);
        let movement = flush.movement.expect("one move");
        assert_eq!((movement.x, movement.y), (30.0, 35.0));
        assert!(!bus.has_pending());
    }

    #[test]
    fn drag_button_rides_along() {
        let mut bus = EventBus::default();
        bus.record_move(5.0, 5.0, MouseButton::Left, 0);
        let flush = bus.take_tick(false);
        assert_eq!(flush.movement.expect("move").button, MouseButton::Left);
    }

    #[test]
    fn wheel_deltas_accumulate() {
        let mut bus = EventBus::default();
        bus.record_wheel(100.0, 100.0, 0.0, 150.0, 0);
        bus.record_wheel(102.0, 101.0, -30.0, 150.0, 0);
        let flush = bus.take_tick(false);
        let wheel = flush.wheel.expect("one wheel");
        assert_eq!(wheel.delta_x, -30.0);
        assert_eq!(wheel.delta_y, 300.0);
        // Position is the most recent one.
        assert_eq!((wheel.x, wheel.y), (102.0, 101.0));
    }

    #[test]
    fn saturation_defers_but_keeps_state() {
        let mut bus = EventBus::default();
        bus.record_move(1.0, 2.0, MouseButton::None, 0);
        bus.record_wheel(1.0, 2.0, 0.0, 150.0, 0);
        let flush = bus.take_tick(true);
        assert!(flush.movement.is_none());
        assert!(flush.wheel.is_none());
        assert!(bus.has_pending(), "state survives a saturated tick");
        let flush = bus.take_tick(false);
        assert!(flush.movement.is_some());
        assert!(flush.wheel.is_some());
    }

    #[test]
    fn empty_tick_is_empty() {
        let mut bus = EventBus::default();
        let flush = bus.take_tick(false);
        assert!(flush.movement.is_none());
        assert!(flush.wheel.is_none());
    }
}
